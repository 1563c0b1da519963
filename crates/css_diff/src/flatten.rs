//! Selector flattening: nested (SCSS or native-nesting) rule trees down to
//! the flat selectors a browser reports in DevTools.

use crate::scan::{split_important, Position, Rule, RuleTree};

/// One declaration with its fully flattened selector.
#[derive(Debug, Clone)]
pub struct FlatDeclaration {
    pub selector: String,
    pub property: String,
    /// Value with any `!important` suffix stripped off.
    pub value: String,
    pub important: bool,
    pub position: Position,
}

impl FlatDeclaration {
    /// Value as it appears in source, suffix included.
    pub fn rendered(&self) -> String {
        if self.important {
            format!("{} !important", self.value)
        } else {
            self.value.clone()
        }
    }
}

/// Flatten every declaration in the tree, in document order.
pub fn flatten_tree(tree: &RuleTree) -> Vec<FlatDeclaration> {
    let mut out = Vec::new();
    for rule in &tree.rules {
        walk(rule, &[], &mut out);
    }
    out
}

fn walk(rule: &Rule, parents: &[String], out: &mut Vec<FlatDeclaration>) {
    if rule.is_at_rule {
        // Block at-rules (@media, @supports) are transparent containers for
        // selector purposes; declaration-only at-rules (@font-face) key their
        // declarations on the prelude itself.
        let selector = normalize_ws(&rule.prelude);
        push_declarations(rule, &selector, out);
        for child in &rule.children {
            walk(child, parents, out);
        }
        return;
    }

    let selectors = resolve_selectors(parents, &rule.prelude);
    let selector = selectors.join(", ");
    push_declarations(rule, &selector, out);
    for child in &rule.children {
        walk(child, &selectors, out);
    }
}

fn push_declarations(rule: &Rule, selector: &str, out: &mut Vec<FlatDeclaration>) {
    for decl in &rule.declarations {
        let (value, important) = split_important(&decl.value);
        out.push(FlatDeclaration {
            selector: selector.to_string(),
            property: decl.property.clone(),
            value: value.to_string(),
            important,
            position: decl.position,
        });
    }
}

/// Resolve a rule prelude against its ancestor selectors.
///
/// Commas split sibling selectors on both sides and recombine pairwise; `&`
/// splices the parent in place; otherwise the parent is prepended with a
/// single space (descendant combinator).
pub fn resolve_selectors(parents: &[String], prelude: &str) -> Vec<String> {
    let children: Vec<String> = split_top_level_commas(prelude)
        .into_iter()
        .map(normalize_ws)
        .filter(|sel| !sel.is_empty())
        .collect();
    if parents.is_empty() {
        return children;
    }
    let mut resolved = Vec::new();
    for parent in parents {
        for child in &children {
            if child.contains('&') {
                resolved.push(normalize_ws(&child.replace('&', parent)));
            } else {
                resolved.push(format!("{parent} {child}"));
            }
        }
    }
    resolved
}

/// Collapse runs of whitespace to single spaces.
pub fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split on commas that are not nested in parentheses, brackets, or strings.
pub fn split_top_level_commas(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0u32;
    let mut start = 0;
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b'"' | b'\'' => {
                let quote = bytes[idx];
                idx += 1;
                while idx < bytes.len() && bytes[idx] != quote {
                    if bytes[idx] == b'\\' {
                        idx += 1;
                    }
                    idx += 1;
                }
            }
            b',' if depth == 0 => {
                parts.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
        idx += 1;
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::scan;

    #[test]
    fn descendant_flattening_uses_single_space() {
        let tree = scan(".card {\n  .title { color: red; }\n}").unwrap();
        let flat = flatten_tree(&tree);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].selector, ".card .title");
    }

    #[test]
    fn ampersand_splices_parent() {
        let tree = scan(".menu { &.open { display: block; } & li { margin: 0; } }").unwrap();
        let flat = flatten_tree(&tree);
        assert_eq!(flat[0].selector, ".menu.open");
        assert_eq!(flat[1].selector, ".menu li");
    }

    #[test]
    fn commas_recombine_pairwise() {
        let tree = scan(".a, .b { &.x { color: red; } }").unwrap();
        let flat = flatten_tree(&tree);
        assert_eq!(flat[0].selector, ".a.x, .b.x");
    }

    #[test]
    fn media_query_is_transparent() {
        let tree = scan("@media (min-width: 600px) { .a { color: red; } }").unwrap();
        let flat = flatten_tree(&tree);
        assert_eq!(flat[0].selector, ".a");
    }

    #[test]
    fn font_face_keys_on_prelude() {
        let tree = scan("@font-face { font-family: Inter; }").unwrap();
        let flat = flatten_tree(&tree);
        assert_eq!(flat[0].selector, "@font-face");
    }

    #[test]
    fn selector_commas_inside_pseudo_args_do_not_split() {
        let parts = split_top_level_commas(":is(.a, .b) .c, .d");
        assert_eq!(parts, vec![":is(.a, .b) .c", " .d"]);
    }
}
