use css_diff::diff;
use css_patch::patch_file;
use std::fs;
use std::path::PathBuf;

fn temp_file(tag: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("restyle_patch_{}_{tag}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("styles.css");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn color_change_yields_exactly_the_new_text() {
    let path = temp_file("color", ".btn { color: red; }");
    let changes = diff(".btn { color: red; }", ".btn { color: blue; }").unwrap();

    let report = patch_file(&path, &changes).unwrap();
    assert_eq!((report.succeeded, report.failed), (1, 0));
    assert_eq!(fs::read_to_string(&path).unwrap(), ".btn { color: blue; }");
}

#[test]
fn scss_nested_add_lands_inside_the_nested_block() {
    let authored = "$weight: bold;\n.card {\n  .title {\n    color: red;\n  }\n}\n";
    let path = temp_file("nested", authored);
    let changes = diff(
        ".card .title { color: red; }",
        ".card .title { color: red; font-weight: bold; }",
    )
    .unwrap();

    let report = patch_file(&path, &changes).unwrap();
    assert_eq!((report.succeeded, report.failed), (1, 0));
    let patched = fs::read_to_string(&path).unwrap();
    assert_eq!(
        patched,
        "$weight: bold;\n.card {\n  .title {\n    color: red;\n    font-weight: bold;\n  }\n}\n"
    );
}

#[test]
fn unmatched_changes_leave_the_file_untouched() {
    let authored = ".real { color: red; }\n";
    let path = temp_file("untouched", authored);
    let changes = diff(".ghost { opacity: 1; }", ".ghost { opacity: 0; }").unwrap();

    let report = patch_file(&path, &changes).unwrap();
    assert_eq!((report.succeeded, report.failed), (0, 1));
    assert_eq!(fs::read_to_string(&path).unwrap(), authored);
}

#[test]
fn partial_batches_apply_what_they_can() {
    let authored = ".a { color: red; }\n";
    let path = temp_file("partial", authored);
    let mut changes = diff(".a { color: red; }", ".a { color: blue; }").unwrap();
    changes.extend(diff(".missing { top: 0; }", ".missing { top: 1px; }").unwrap());

    let report = patch_file(&path, &changes).unwrap();
    assert_eq!((report.succeeded, report.failed), (1, 1));
    assert_eq!(fs::read_to_string(&path).unwrap(), ".a { color: blue; }\n");
}

#[test]
fn missing_file_reports_all_failed() {
    let path = std::env::temp_dir().join("restyle_patch_never_created/styles.css");
    let changes = diff(".a { color: red; }", ".a { color: blue; }").unwrap();
    let report = patch_file(&path, &changes).unwrap();
    assert_eq!((report.succeeded, report.failed), (0, 1));
}

#[test]
fn no_tempfile_left_behind() {
    let path = temp_file("tmpclean", ".a { color: red; }");
    let changes = diff(".a { color: red; }", ".a { color: blue; }").unwrap();
    patch_file(&path, &changes).unwrap();

    let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn applying_a_diff_converges_the_file_to_the_new_snapshot() {
    let authored = "\
// tokens
$pad: 4px;

.toolbar {
  padding: $pad;

  .button {
    color: red; // brand
    border: 1px solid black;
  }
}
";
    let path = temp_file("converge", authored);
    let browser_old = ".toolbar { padding: 4px; }\n.toolbar .button { color: red; border: 1px solid black; }";
    let browser_new = ".toolbar { padding: 4px; }\n.toolbar .button { color: hotpink; border: 1px solid black; }";

    let changes = diff(browser_old, browser_new).unwrap();
    let report = patch_file(&path, &changes).unwrap();
    assert_eq!((report.succeeded, report.failed), (1, 0));

    let patched = fs::read_to_string(&path).unwrap();
    // the edit landed, the comment and the variable survived
    assert!(patched.contains("color: hotpink; // brand"));
    assert!(patched.contains("$pad: 4px;"));
    assert!(patched.contains("padding: $pad;"));
}
