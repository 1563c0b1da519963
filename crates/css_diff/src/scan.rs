//! Rule-tree scanner for CSS and SCSS text.
//!
//! Produces a nested rule tree with byte spans for every rule and declaration,
//! so callers can both compare two snapshots semantically and edit a single
//! declaration in place without disturbing surrounding bytes. The scanner
//! understands block and SCSS line comments, quoted strings, `#{}`
//! interpolation, and at-rules.

use anyhow::{bail, Result};

/// Half-open byte range into the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// 1-based line, 0-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// One `property: value` pair inside a rule body.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub property: String,
    /// Raw value text, trimmed; still carries any `!important` suffix.
    pub value: String,
    /// Byte offset of the first property character.
    pub prop_start: usize,
    /// Trimmed byte range of the value text.
    pub value_span: Span,
    /// Byte offset of the terminating `;`, when present.
    pub semicolon: Option<usize>,
    /// Position of the property start in the scanned text.
    pub position: Position,
}

impl Declaration {
    /// Byte offset just past this declaration (past the `;` when present).
    pub fn end(&self) -> usize {
        match self.semicolon {
            Some(semi) => semi + 1,
            None => self.value_span.end,
        }
    }
}

/// A qualified rule or at-rule with its body contents.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Selector or at-rule prelude, trimmed.
    pub prelude: String,
    pub prelude_start: usize,
    pub is_at_rule: bool,
    /// Byte range between the braces, exclusive of both.
    pub body: Span,
    pub declarations: Vec<Declaration>,
    pub children: Vec<Rule>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleTree {
    pub rules: Vec<Rule>,
}

/// Parse `text` into a rule tree.
///
/// # Errors
///
/// Returns an error on unbalanced braces; everything else is tolerated the
/// way browsers tolerate it (unknown constructs are skipped).
pub fn scan(text: &str) -> Result<RuleTree> {
    let mut cursor = Cursor::new(text);
    // top-level declarations (SCSS `$var:` definitions) carry no rules and
    // are not part of the tree
    let (_top_level, rules) = parse_block(&mut cursor, true)?;
    Ok(RuleTree { rules })
}

struct Cursor<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            line: 1,
            column: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.bytes.get(self.pos + 1).copied()
    }

    fn bump(&mut self) {
        if let Some(&byte) = self.bytes.get(self.pos) {
            self.pos += 1;
            if byte == b'\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    /// Skip a `/* ... */` comment; an unterminated comment runs to EOF.
    fn skip_block_comment(&mut self) {
        self.bump();
        self.bump();
        while let Some(byte) = self.peek() {
            if byte == b'*' && self.peek_next() == Some(b'/') {
                self.bump();
                self.bump();
                return;
            }
            self.bump();
        }
    }

    /// Skip a `//` comment up to (not including) the newline.
    fn skip_line_comment(&mut self) {
        while let Some(byte) = self.peek() {
            if byte == b'\n' {
                return;
            }
            self.bump();
        }
    }

    /// Skip a quoted string including escapes; an unescaped newline ends it.
    fn skip_string(&mut self, quote: u8) {
        self.bump();
        while let Some(byte) = self.peek() {
            match byte {
                b'\\' => {
                    self.bump();
                    self.bump();
                }
                b'\n' => return,
                _ if byte == quote => {
                    self.bump();
                    return;
                }
                _ => self.bump(),
            }
        }
    }

    /// Skip `#{ ... }` interpolation, tolerating one level of nesting.
    fn skip_interpolation(&mut self) {
        self.bump();
        self.bump();
        let mut depth = 1usize;
        while let Some(byte) = self.peek() {
            match byte {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        self.bump();
                        return;
                    }
                }
                b'\'' | b'"' => {
                    self.skip_string(byte);
                    continue;
                }
                _ => {}
            }
            self.bump();
        }
    }
}

/// In-progress prelude / declaration text, started at the first significant
/// character after a separator.
struct Chunk {
    start: usize,
    position: Position,
}

fn parse_block(cursor: &mut Cursor<'_>, top_level: bool) -> Result<(Vec<Declaration>, Vec<Rule>)> {
    let mut declarations = Vec::new();
    let mut rules = Vec::new();
    let mut chunk: Option<Chunk> = None;
    let mut paren_depth: u32 = 0;

    loop {
        let Some(byte) = cursor.peek() else {
            if !top_level {
                bail!("unbalanced braces: block not closed before end of input");
            }
            if let Some(open) = chunk.take() {
                push_declaration(cursor.text, &open, cursor.pos, None, &mut declarations);
            }
            return Ok((declarations, rules));
        };

        match byte {
            b'/' if cursor.peek_next() == Some(b'*') => cursor.skip_block_comment(),
            // SCSS line comment; `//` inside url(...) and friends is a value.
            b'/' if cursor.peek_next() == Some(b'/') && paren_depth == 0 => {
                cursor.skip_line_comment();
            }
            b'"' | b'\'' => {
                if chunk.is_none() {
                    chunk = Some(Chunk {
                        start: cursor.pos,
                        position: cursor.position(),
                    });
                }
                cursor.skip_string(byte);
            }
            b'#' if cursor.peek_next() == Some(b'{') => {
                if chunk.is_none() {
                    chunk = Some(Chunk {
                        start: cursor.pos,
                        position: cursor.position(),
                    });
                }
                cursor.skip_interpolation();
            }
            b'(' => {
                if chunk.is_none() {
                    chunk = Some(Chunk {
                        start: cursor.pos,
                        position: cursor.position(),
                    });
                }
                paren_depth += 1;
                cursor.bump();
            }
            b')' => {
                paren_depth = paren_depth.saturating_sub(1);
                cursor.bump();
            }
            b'{' if paren_depth == 0 => {
                let open = chunk.take();
                let prelude_start = open.as_ref().map_or(cursor.pos, |c| c.start);
                let prelude = cursor.text[prelude_start..cursor.pos].trim().to_string();
                cursor.bump();
                let body_start = cursor.pos;
                let (child_decls, child_rules) = parse_block(cursor, false)?;
                // parse_block leaves the cursor just past the closing brace
                let body_end = cursor.pos.saturating_sub(1);
                rules.push(Rule {
                    is_at_rule: prelude.starts_with('@'),
                    prelude,
                    prelude_start,
                    body: Span {
                        start: body_start,
                        end: body_end,
                    },
                    declarations: child_decls,
                    children: child_rules,
                });
            }
            b'}' if paren_depth == 0 => {
                if top_level {
                    // stray close brace; skip it like a browser would
                    cursor.bump();
                    chunk = None;
                    continue;
                }
                if let Some(open) = chunk.take() {
                    push_declaration(cursor.text, &open, cursor.pos, None, &mut declarations);
                }
                cursor.bump();
                return Ok((declarations, rules));
            }
            b';' if paren_depth == 0 => {
                if let Some(open) = chunk.take() {
                    push_declaration(
                        cursor.text,
                        &open,
                        cursor.pos,
                        Some(cursor.pos),
                        &mut declarations,
                    );
                }
                cursor.bump();
            }
            _ => {
                if !byte.is_ascii_whitespace() && chunk.is_none() {
                    chunk = Some(Chunk {
                        start: cursor.pos,
                        position: cursor.position(),
                    });
                }
                cursor.bump();
            }
        }
    }
}

/// Turn a chunk ending at `end` into a declaration, if it looks like one.
/// At-statements (`@import ...;`) and colon-free text are skipped.
fn push_declaration(
    text: &str,
    chunk: &Chunk,
    end: usize,
    semicolon: Option<usize>,
    out: &mut Vec<Declaration>,
) {
    let raw = &text[chunk.start..end];
    let trimmed = raw.trim_end();
    if trimmed.is_empty() || trimmed.starts_with('@') {
        return;
    }
    let Some(colon) = find_top_level_colon(trimmed) else {
        return;
    };
    let property = trimmed[..colon].trim();
    if property.is_empty() || property.contains(|c: char| c.is_whitespace()) {
        return;
    }

    let value_rel_start = colon + 1;
    let value = trimmed[value_rel_start..].trim();
    let leading_ws = trimmed[value_rel_start..].len() - trimmed[value_rel_start..].trim_start().len();
    let value_start = chunk.start + value_rel_start + leading_ws;

    out.push(Declaration {
        property: property.to_string(),
        value: value.to_string(),
        prop_start: chunk.start,
        value_span: Span {
            start: value_start,
            end: value_start + value.len(),
        },
        semicolon,
        position: chunk.position,
    });
}

/// First `:` outside parentheses and strings, or none.
fn find_top_level_colon(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0u32;
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
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
            b':' if depth == 0 => return Some(idx),
            _ => {}
        }
        idx += 1;
    }
    None
}

/// Split a trimmed `value` into the bare value and an `!important` flag.
pub fn split_important(value: &str) -> (&str, bool) {
    let trimmed = value.trim_end();
    let lower = trimmed.to_ascii_lowercase();
    if let Some(stripped_len) = lower.strip_suffix("!important").map(str::len) {
        let bare = trimmed[..stripped_len].trim_end();
        (bare, true)
    } else {
        (trimmed, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_flat_rule() {
        let tree = scan(".btn { color: red; }").unwrap();
        assert_eq!(tree.rules.len(), 1);
        let rule = &tree.rules[0];
        assert_eq!(rule.prelude, ".btn");
        assert_eq!(rule.declarations.len(), 1);
        assert_eq!(rule.declarations[0].property, "color");
        assert_eq!(rule.declarations[0].value, "red");
        assert_eq!(rule.declarations[0].position.line, 1);
    }

    #[test]
    fn scans_nested_scss_with_comments_and_vars() {
        let text = "// header\n$accent: #f00;\n.card {\n  color: $accent; /* tone */\n  .title {\n    font-weight: bold;\n  }\n}\n";
        let tree = scan(text).unwrap();
        assert_eq!(tree.rules.len(), 1);
        let card = &tree.rules[0];
        assert_eq!(card.declarations.len(), 1);
        assert_eq!(card.children.len(), 1);
        assert_eq!(card.children[0].prelude, ".title");
        assert_eq!(card.children[0].declarations[0].property, "font-weight");
        // line comments do not shift positions
        assert_eq!(card.declarations[0].position.line, 4);
    }

    #[test]
    fn line_comment_with_brace_does_not_break_nesting() {
        let text = ".a {\n  // weird } brace\n  color: blue;\n}\n";
        let tree = scan(text).unwrap();
        assert_eq!(tree.rules.len(), 1);
        assert_eq!(tree.rules[0].declarations.len(), 1);
        assert_eq!(tree.rules[0].declarations[0].value, "blue");
    }

    #[test]
    fn url_with_double_slash_is_not_a_comment() {
        let tree = scan(".a { background: url(https://example.com/x.png); }").unwrap();
        assert_eq!(
            tree.rules[0].declarations[0].value,
            "url(https://example.com/x.png)"
        );
    }

    #[test]
    fn interpolation_brace_is_value_text() {
        let tree = scan(".a { width: #{$w}px; }").unwrap();
        assert_eq!(tree.rules[0].declarations[0].value, "#{$w}px");
    }

    #[test]
    fn last_declaration_without_semicolon() {
        let tree = scan(".a { color: red }").unwrap();
        let decl = &tree.rules[0].declarations[0];
        assert_eq!(decl.value, "red");
        assert!(decl.semicolon.is_none());
    }

    #[test]
    fn at_rule_is_flagged() {
        let tree = scan("@media (min-width: 600px) { .a { color: red; } }").unwrap();
        assert!(tree.rules[0].is_at_rule);
        assert_eq!(tree.rules[0].children.len(), 1);
        assert!(tree.rules[0].declarations.is_empty());
    }

    #[test]
    fn unbalanced_braces_error() {
        assert!(scan(".a { color: red;").is_err());
    }

    #[test]
    fn important_split() {
        assert_eq!(split_important("red !important"), ("red", true));
        assert_eq!(split_important("red!IMPORTANT"), ("red", true));
        assert_eq!(split_important("red"), ("red", false));
    }
}
