//! Semantic declaration diff between two stylesheet snapshots.

use crate::flatten::flatten_tree;
use crate::scan::{scan, Position};
use anyhow::Result;
use std::collections::HashMap;

/// What happened to one declaration between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

/// A single declaration-level change, keyed by the flattened selector.
///
/// Values carry the literal ` !important` suffix when the flag is set, so a
/// change can be re-applied to source text verbatim.
#[derive(Debug, Clone)]
pub struct DeclarationChange {
    pub kind: ChangeKind,
    pub selector: String,
    pub property: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Position of the changed declaration in the new text (old text for
    /// deletes, which no longer exist in the new text).
    pub position: Position,
}

/// Diff two stylesheet texts into an ordered list of declaration changes.
///
/// Declarations are grouped by `(flattened selector, property)` preserving
/// duplicates in list order; the two lists per key are walked index-by-index
/// so repeated declarations pair up positionally.
///
/// # Errors
///
/// Propagates scan failures from either snapshot; the caller is expected to
/// abort the change cycle so the same pair can be retried later.
pub fn diff(old_text: &str, new_text: &str) -> Result<Vec<DeclarationChange>> {
    let old_flat = flatten_tree(&scan(old_text)?);
    let new_flat = flatten_tree(&scan(new_text)?);

    let old_groups = group(&old_flat);
    let new_groups = group(&new_flat);

    let mut changes = Vec::new();
    let empty = Vec::new();

    for (key, new_entries) in &new_groups.ordered {
        let old_entries = old_groups.get(key).unwrap_or(&empty);
        for (index, new_idx) in new_entries.iter().enumerate() {
            let new_decl = &new_flat[*new_idx];
            match old_entries.get(index).map(|idx| &old_flat[*idx]) {
                Some(old_decl)
                    if old_decl.value == new_decl.value
                        && old_decl.important == new_decl.important => {}
                Some(old_decl) => changes.push(DeclarationChange {
                    kind: ChangeKind::Modify,
                    selector: key.0.clone(),
                    property: key.1.clone(),
                    old_value: Some(old_decl.rendered()),
                    new_value: Some(new_decl.rendered()),
                    position: new_decl.position,
                }),
                None => changes.push(DeclarationChange {
                    kind: ChangeKind::Add,
                    selector: key.0.clone(),
                    property: key.1.clone(),
                    old_value: None,
                    new_value: Some(new_decl.rendered()),
                    position: new_decl.position,
                }),
            }
        }
    }

    for (key, old_entries) in &old_groups.ordered {
        let surviving = new_groups.get(key).map_or(0, Vec::len);
        for old_idx in old_entries.iter().skip(surviving) {
            let old_decl = &old_flat[*old_idx];
            changes.push(DeclarationChange {
                kind: ChangeKind::Delete,
                selector: key.0.clone(),
                property: key.1.clone(),
                old_value: Some(old_decl.rendered()),
                new_value: None,
                position: old_decl.position,
            });
        }
    }

    Ok(changes)
}

type GroupKey = (String, String);

struct Groups {
    ordered: Vec<(GroupKey, Vec<usize>)>,
    index: HashMap<GroupKey, usize>,
}

impl Groups {
    fn get(&self, key: &GroupKey) -> Option<&Vec<usize>> {
        self.index.get(key).map(|&slot| &self.ordered[slot].1)
    }
}

fn group(flat: &[crate::flatten::FlatDeclaration]) -> Groups {
    let mut ordered: Vec<(GroupKey, Vec<usize>)> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    for (pos, decl) in flat.iter().enumerate() {
        let key = (decl.selector.clone(), decl.property.clone());
        match index.get(&key) {
            Some(&slot) => ordered[slot].1.push(pos),
            None => {
                index.insert(key.clone(), ordered.len());
                ordered.push((key, vec![pos]));
            }
        }
    }
    Groups { ordered, index }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_diff_empty() {
        let text = ".btn { color: red; margin: 0 auto; }";
        assert!(diff(text, text).unwrap().is_empty());
    }

    #[test]
    fn color_modify() {
        let changes = diff(".btn { color: red; }", ".btn { color: blue; }").unwrap();
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.kind, ChangeKind::Modify);
        assert_eq!(change.selector, ".btn");
        assert_eq!(change.property, "color");
        assert_eq!(change.old_value.as_deref(), Some("red"));
        assert_eq!(change.new_value.as_deref(), Some("blue"));
    }

    #[test]
    fn nested_add_flattens_selector() {
        let old = ".card { .title { color: red; } }";
        let new = ".card { .title { color: red; font-weight: bold; } }";
        let changes = diff(old, new).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Add);
        assert_eq!(changes[0].selector, ".card .title");
        assert_eq!(changes[0].property, "font-weight");
        assert_eq!(changes[0].new_value.as_deref(), Some("bold"));
    }

    #[test]
    fn delete_emits_old_value() {
        let changes = diff(".a { color: red; padding: 4px; }", ".a { color: red; }").unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Delete);
        assert_eq!(changes[0].property, "padding");
        assert_eq!(changes[0].old_value.as_deref(), Some("4px"));
        assert!(changes[0].new_value.is_none());
    }

    #[test]
    fn important_only_difference_is_a_modify() {
        let changes = diff(".a { color: red; }", ".a { color: red !important; }").unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modify);
        assert_eq!(changes[0].new_value.as_deref(), Some("red !important"));
        assert_eq!(changes[0].old_value.as_deref(), Some("red"));
    }

    #[test]
    fn duplicate_declarations_pair_by_index() {
        let old = ".a { color: red; color: green; }";
        let new = ".a { color: red; color: blue; }";
        let changes = diff(old, new).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_value.as_deref(), Some("green"));
        assert_eq!(changes[0].new_value.as_deref(), Some("blue"));
    }

    #[test]
    fn trailing_duplicate_is_deleted() {
        let old = ".a { color: red; color: green; }";
        let new = ".a { color: red; }";
        let changes = diff(old, new).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Delete);
        assert_eq!(changes[0].old_value.as_deref(), Some("green"));
    }

    #[test]
    fn position_points_into_new_text() {
        let old = ".a { color: red; }";
        let new = ".a {\n  color: blue;\n}";
        let changes = diff(old, new).unwrap();
        assert_eq!(changes[0].position.line, 2);
        assert_eq!(changes[0].position.column, 2);
    }

    #[test]
    fn parse_failure_propagates() {
        assert!(diff(".a { color: red;", ".a { color: red; }").is_err());
    }
}
