//! Structured declaration patching for authored CSS and SCSS files.
//!
//! Each change is applied by locating the rule whose flattened selector
//! matches the change, then editing exactly one declaration span in the
//! original text. Comments, blank lines, variables, interpolation, and
//! nesting outside the edited span survive byte-equal. Writes go through a
//! sibling tempfile and an atomic rename.

use anyhow::{anyhow, Result};
use css_diff::scan::{Declaration, Rule};
use css_diff::{normalize_ws, resolve_selectors, scan, split_important, ChangeKind, DeclarationChange};
use log::{debug, error, warn};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-file patch outcome; one failed change never blocks the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Apply a batch of declaration changes to one authored file.
///
/// The file is re-read at call time (edits may have landed since the change
/// was computed) and rewritten atomically only when at least one change
/// applied.
///
/// # Errors
///
/// Returns an error only for write failures; a missing file or unmatched
/// selectors are reported through the counts.
pub fn patch_file(path: &Path, changes: &[DeclarationChange]) -> Result<PatchReport> {
    let mut text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            error!("cannot read {} for patching: {err}", path.display());
            return Ok(PatchReport {
                succeeded: 0,
                failed: changes.len(),
            });
        }
    };

    let mut report = PatchReport::default();
    for change in changes {
        match apply_change(&text, change) {
            Ok(Some(next)) => {
                text = next;
                report.succeeded += 1;
            }
            Ok(None) => {
                debug!(
                    "no rule matching `{}` for {} in {}",
                    change.selector,
                    change.property,
                    path.display()
                );
                report.failed += 1;
            }
            Err(err) => {
                warn!("skipping change to {}: {err}", path.display());
                report.failed += 1;
            }
        }
    }

    if report.succeeded > 0 {
        write_atomic(path, &text)?;
    }
    Ok(report)
}

/// Apply one change, returning the new text, or `None` when nothing matched.
fn apply_change(text: &str, change: &DeclarationChange) -> Result<Option<String>> {
    let tree = scan(text)?;
    let wanted = normalize_ws(&change.selector);
    let mut matches = Vec::new();
    for rule in &tree.rules {
        collect_matches(rule, &[], &wanted, &mut matches);
    }
    if matches.is_empty() {
        return Ok(None);
    }

    match change.kind {
        ChangeKind::Modify | ChangeKind::Add => {
            let new_value = change
                .new_value
                .as_deref()
                .ok_or_else(|| anyhow!("{:?} change without a new value", change.kind))?;
            if let Some(decl) = first_declaration(&matches, &change.property) {
                Ok(Some(replace_value(text, decl, new_value)))
            } else {
                // rule exists but the property does not: append at body end
                Ok(Some(append_declaration(
                    text,
                    matches[0],
                    &change.property,
                    new_value,
                )))
            }
        }
        ChangeKind::Delete => {
            let rule = matches
                .iter()
                .find(|rule| has_property(rule, &change.property));
            let Some(rule) = rule else {
                return Ok(None);
            };
            Ok(Some(delete_declarations(text, rule, &change.property)))
        }
    }
}

/// Depth-first search for rules whose flattened selector equals `wanted`.
fn collect_matches<'a>(
    rule: &'a Rule,
    parents: &[String],
    wanted: &str,
    out: &mut Vec<&'a Rule>,
) {
    if rule.is_at_rule {
        if normalize_ws(&rule.prelude) == wanted && !rule.declarations.is_empty() {
            out.push(rule);
        }
        for child in &rule.children {
            collect_matches(child, parents, wanted, out);
        }
        return;
    }
    let selectors = resolve_selectors(parents, &rule.prelude);
    if selectors.join(", ") == wanted {
        out.push(rule);
    }
    for child in &rule.children {
        collect_matches(child, &selectors, wanted, out);
    }
}

fn has_property(rule: &Rule, property: &str) -> bool {
    rule.declarations
        .iter()
        .any(|decl| decl.property.eq_ignore_ascii_case(property))
}

fn first_declaration<'a>(matches: &[&'a Rule], property: &str) -> Option<&'a Declaration> {
    matches.iter().find_map(|rule| {
        rule.declarations
            .iter()
            .find(|decl| decl.property.eq_ignore_ascii_case(property))
    })
}

fn render_value(value: &str) -> String {
    let (bare, important) = split_important(value);
    if important {
        format!("{bare} !important")
    } else {
        bare.to_string()
    }
}

fn replace_value(text: &str, decl: &Declaration, new_value: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    out.push_str(&text[..decl.value_span.start]);
    out.push_str(&render_value(new_value));
    out.push_str(&text[decl.value_span.end..]);
    out
}

fn append_declaration(text: &str, rule: &Rule, property: &str, value: &str) -> String {
    let rendered = render_value(value);
    match rule.declarations.last() {
        Some(last) => {
            let indent = line_indent(text, last.prop_start);
            let (insert_at, lead) = match last.semicolon {
                Some(_) => (last.end(), String::new()),
                // terminate the previous declaration first
                None => (last.value_span.end, ";".to_string()),
            };
            let insertion = format!("{lead}\n{indent}{property}: {rendered};");
            splice(text, insert_at, &insertion)
        }
        None => {
            let rule_indent = line_indent(text, rule.prelude_start);
            let insertion = format!("\n{rule_indent}  {property}: {rendered};\n{rule_indent}");
            splice(text, rule.body.start, &insertion)
        }
    }
}

fn delete_declarations(text: &str, rule: &Rule, property: &str) -> String {
    let mut out = text.to_string();
    for decl in rule
        .declarations
        .iter()
        .filter(|decl| decl.property.eq_ignore_ascii_case(property))
        .rev()
    {
        let range = removal_range(&out, decl);
        out.replace_range(range, "");
    }
    out
}

/// Byte range to cut for a deleted declaration; absorbs the whole line when
/// the declaration sits alone on it.
fn removal_range(text: &str, decl: &Declaration) -> std::ops::Range<usize> {
    let end = decl.end();
    let line_start = text[..decl.prop_start]
        .rfind('\n')
        .map_or(0, |idx| idx + 1);
    if text[line_start..decl.prop_start].trim().is_empty() {
        let rest = &text[end..];
        if let Some(newline) = rest.find('\n') {
            if rest[..newline].trim().is_empty() {
                return line_start..end + newline + 1;
            }
        }
    }
    decl.prop_start..end
}

/// Leading whitespace of the line containing `offset`.
fn line_indent(text: &str, offset: usize) -> String {
    let line_start = text[..offset].rfind('\n').map_or(0, |idx| idx + 1);
    text[line_start..offset]
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect()
}

fn splice(text: &str, at: usize, insertion: &str) -> String {
    let mut out = String::with_capacity(text.len() + insertion.len());
    out.push_str(&text[..at]);
    out.push_str(insertion);
    out.push_str(&text[at..]);
    out
}

/// Write `text` to a sibling tempfile and rename it over `path`.
///
/// # Errors
///
/// Surfaces the underlying I/O error; a failed rename can leak the tempfile
/// but never leaves `path` half-written.
fn write_atomic(path: &Path, text: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| anyhow!("system clock error: {err}"))?
        .as_millis();
    let tmp = dir.join(format!(".{millis}.tmp"));
    fs::write(&tmp, text)
        .map_err(|err| anyhow!("failed to write {}: {err}", tmp.display()))?;
    fs::rename(&tmp, path)
        .map_err(|err| anyhow!("failed to rename {} over {}: {err}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use css_diff::diff;

    fn apply_all(text: &str, changes: &[DeclarationChange]) -> String {
        let mut out = text.to_string();
        for change in changes {
            out = apply_change(&out, change)
                .unwrap()
                .unwrap_or_else(|| panic!("change did not match: {change:?}"));
        }
        out
    }

    #[test]
    fn modify_rewrites_only_the_value() {
        let old = "/* banner */\n.btn {\n  color: red; /* keep me */\n}\n";
        let changes = diff(".btn { color: red; }", ".btn { color: blue; }").unwrap();
        let patched = apply_all(old, &changes);
        assert_eq!(patched, "/* banner */\n.btn {\n  color: blue; /* keep me */\n}\n");
    }

    #[test]
    fn nested_scss_add_preserves_variables() {
        let old = "$accent: red;\n.card {\n  .title {\n    color: $accent;\n  }\n}\n";
        let changes = diff(
            ".card .title { color: red; }",
            ".card .title { color: red; font-weight: bold; }",
        )
        .unwrap();
        let patched = apply_all(old, &changes);
        assert_eq!(
            patched,
            "$accent: red;\n.card {\n  .title {\n    color: $accent;\n    font-weight: bold;\n  }\n}\n"
        );
    }

    #[test]
    fn add_into_empty_rule() {
        let old = ".a {}\n";
        let changes = diff(".a { }", ".a { margin: 0; }").unwrap();
        let patched = apply_all(old, &changes);
        assert_eq!(patched, ".a {\n  margin: 0;\n}\n");
    }

    #[test]
    fn delete_removes_whole_line() {
        let old = ".a {\n  color: red;\n  padding: 4px;\n}\n";
        let changes = diff(
            ".a { color: red; padding: 4px; }",
            ".a { color: red; }",
        )
        .unwrap();
        let patched = apply_all(old, &changes);
        assert_eq!(patched, ".a {\n  color: red;\n}\n");
    }

    #[test]
    fn important_suffix_round_trips() {
        let old = ".a {\n  color: red;\n}\n";
        let changes = diff(".a { color: red; }", ".a { color: blue !important; }").unwrap();
        let patched = apply_all(old, &changes);
        assert_eq!(patched, ".a {\n  color: blue !important;\n}\n");
    }

    #[test]
    fn ampersand_rule_matches_flattened_selector() {
        let old = ".menu {\n  &.open {\n    display: none;\n  }\n}\n";
        let changes = diff(
            ".menu.open { display: none; }",
            ".menu.open { display: block; }",
        )
        .unwrap();
        let patched = apply_all(old, &changes);
        assert!(patched.contains("display: block;"));
        assert!(patched.contains("&.open"));
    }

    #[test]
    fn unmatched_selector_is_failed_not_written() {
        let change = DeclarationChange {
            kind: ChangeKind::Modify,
            selector: ".missing".to_string(),
            property: "color".to_string(),
            old_value: Some("red".to_string()),
            new_value: Some("blue".to_string()),
            position: css_diff::Position::default(),
        };
        assert!(apply_change(".a { color: red; }", &change).unwrap().is_none());
    }

    #[test]
    fn missing_last_semicolon_is_terminated_on_append() {
        let old = ".a {\n  color: red\n}\n";
        let changes = diff(".a { color: red }", ".a { color: red; margin: 0 }").unwrap();
        let patched = apply_all(old, &changes);
        assert_eq!(patched, ".a {\n  color: red;\n  margin: 0;\n}\n");
    }

    #[test]
    fn roundtrip_matches_differ_view() {
        let authored = ".a {\n  // note\n  color: red;\n  .b {\n    margin: 0;\n  }\n}\n";
        let browser_old = ".a { color: red; }\n.a .b { margin: 0; }";
        let browser_new = ".a { color: green; }\n.a .b { margin: 4px; }";
        let changes = diff(browser_old, browser_new).unwrap();
        let patched = apply_all(authored, &changes);
        // the authored file, flattened, now agrees with the new browser text
        assert!(diff(&patched, browser_new).unwrap().is_empty());
        assert!(patched.contains("// note"));
    }
}
