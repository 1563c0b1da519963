//! Component-level checks of the write path: loop guard suppression and
//! per-file serialization around real patches.

use css_diff::diff;
use css_patch::patch_file;
use restyle::file_queue::FileQueue;
use restyle::loop_guard::{sheet_key, LoopGuard};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

fn temp_file(tag: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("restyle_pipe_{}_{tag}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("app.css");
    fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn own_write_echo_is_suppressed() {
    let guard = LoopGuard::new(Duration::from_secs(2));
    let path = temp_file("echo", ".btn { color: red; }");
    let new_browser_text = ".btn { color: blue; }";

    // agent patches the file and registers both keys, as the orchestrator does
    let changes = diff(".btn { color: red; }", new_browser_text).unwrap();
    patch_file(&path, &changes).unwrap();
    let written = fs::read_to_string(&path).unwrap();
    guard.register_write(&path.to_string_lossy(), &written);
    guard.register_write(&sheet_key("17"), new_browser_text);

    // the HMR echo carries identical text and must be dropped
    assert!(guard.should_ignore(&sheet_key("17"), new_browser_text));
    assert!(guard.should_ignore(&path.to_string_lossy(), &written));
    // a genuine user edit right after is not dropped
    assert!(!guard.should_ignore(&sheet_key("17"), ".btn { color: green; }"));
}

#[tokio::test]
async fn queued_patches_to_one_file_apply_in_order() {
    let path = temp_file("serial", ".a { color: red; }\n");
    let queue = FileQueue::new();

    let first_changes = diff(".a { color: red; }", ".a { color: blue; }").unwrap();
    let second_changes = diff(".a { color: blue; }", ".a { color: green; }").unwrap();

    let first_path = path.clone();
    let first = queue.enqueue(&path, async move { patch_file(&first_path, &first_changes) });
    let second_path = path.clone();
    let second = queue.enqueue(&path, async move { patch_file(&second_path, &second_changes) });

    let first_report = first.await.unwrap().unwrap();
    let second_report = second.await.unwrap().unwrap();
    assert_eq!(first_report.succeeded, 1);
    // the second patch re-read the file, so it saw the first patch's write
    assert_eq!(second_report.succeeded, 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), ".a { color: green; }\n");
}

#[tokio::test]
async fn reader_never_sees_a_half_written_file() {
    let path = temp_file("atomic", ".a { color: red; }");
    let reader_path = path.clone();
    let reader = tokio::spawn(async move {
        for _ in 0..200 {
            let text = fs::read_to_string(&reader_path).unwrap();
            assert!(
                text == ".a { color: red; }" || text == ".a { color: blue; }",
                "torn read: {text:?}"
            );
            tokio::time::sleep(Duration::from_micros(50)).await;
        }
    });

    let changes = diff(".a { color: red; }", ".a { color: blue; }").unwrap();
    patch_file(&path, &changes).unwrap();
    reader.await.unwrap();
}
