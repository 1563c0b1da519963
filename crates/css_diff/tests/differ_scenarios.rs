use css_diff::{diff, ChangeKind};

#[test]
fn diff_of_identical_snapshots_is_empty() {
    let text = r"
/* layout */
.grid { display: grid; gap: 8px; }
.grid > .cell { padding: 4px 8px; }
@media (min-width: 900px) {
  .grid { gap: 16px; }
}
";
    assert!(diff(text, text).unwrap().is_empty());
}

#[test]
fn every_differing_declaration_appears_exactly_once() {
    let old = r"
.header { color: red; margin: 0; }
.footer { color: blue; }
.gone { display: none; }
";
    let new = r"
.header { color: green; margin: 0; }
.footer { color: blue; padding: 2px; }
";
    let changes = diff(old, new).unwrap();
    assert_eq!(changes.len(), 3);

    let modify = changes
        .iter()
        .find(|change| change.kind == ChangeKind::Modify)
        .unwrap();
    assert_eq!(modify.selector, ".header");
    assert_eq!(modify.old_value.as_deref(), Some("red"));
    assert_eq!(modify.new_value.as_deref(), Some("green"));

    let add = changes
        .iter()
        .find(|change| change.kind == ChangeKind::Add)
        .unwrap();
    assert_eq!((add.selector.as_str(), add.property.as_str()), (".footer", "padding"));

    let delete = changes
        .iter()
        .find(|change| change.kind == ChangeKind::Delete)
        .unwrap();
    assert_eq!((delete.selector.as_str(), delete.property.as_str()), (".gone", "display"));
}

#[test]
fn unchanged_declarations_in_changed_rules_stay_silent() {
    let old = ".btn { color: red; border: none; cursor: pointer; }";
    let new = ".btn { color: blue; border: none; cursor: pointer; }";
    let changes = diff(old, new).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].property, "color");
}

#[test]
fn minified_and_formatted_snapshots_compare_equal() {
    let minified = ".a{color:red}.a .b{margin:0}";
    let formatted = ".a {\n  color: red;\n}\n.a .b {\n  margin: 0;\n}\n";
    assert!(diff(minified, formatted).unwrap().is_empty());
}

#[test]
fn compiled_module_selectors_survive_verbatim() {
    let old = ".Menu_item__abc123 { padding: 4px; }";
    let new = ".Menu_item__abc123 { padding: 8px; }";
    let changes = diff(old, new).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].selector, ".Menu_item__abc123");
    assert_eq!(changes[0].old_value.as_deref(), Some("4px"));
    assert_eq!(changes[0].new_value.as_deref(), Some("8px"));
}

#[test]
fn media_blocks_diff_against_their_inner_selectors() {
    let old = "@media (max-width: 600px) { .nav { display: none; } }";
    let new = "@media (max-width: 600px) { .nav { display: flex; } }";
    let changes = diff(old, new).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].selector, ".nav");
    assert_eq!(changes[0].new_value.as_deref(), Some("flex"));
}
