//! Short-TTL content-hash filter that absorbs the agent's own writes.
//!
//! After the agent patches a file, the dev server re-reads it and the browser
//! fires `styleSheetChanged` with text the agent itself produced. Entries are
//! registered under the file path and a `sheet:<id>` marker so both echo
//! paths are recognized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
struct WriteRecord {
    digest: [u8; 16],
    ts: Instant,
}

pub struct LoopGuard {
    entries: Arc<Mutex<HashMap<String, WriteRecord>>>,
    ttl: Duration,
    sweeper: Option<JoinHandle<()>>,
}

/// Guard key for a stylesheet id (file paths are used verbatim).
pub fn sheet_key(id: &str) -> String {
    format!("sheet:{id}")
}

impl LoopGuard {
    /// Create a guard and start its background sweep (one pass per TTL).
    /// Must be called inside a tokio runtime.
    pub fn new(ttl: Duration) -> Self {
        let entries: Arc<Mutex<HashMap<String, WriteRecord>>> = Arc::default();
        let sweep_entries = Arc::clone(&entries);
        let sweeper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(ttl);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let now = Instant::now();
                sweep_entries
                    .lock()
                    .expect("loop guard mutex")
                    .retain(|_, record| now.duration_since(record.ts) < ttl);
            }
        });
        Self {
            entries,
            ttl,
            sweeper: Some(sweeper),
        }
    }

    /// Record a write. Synchronous on purpose: the entry must exist before
    /// control returns to the event loop, or the echoed change event races
    /// past the guard.
    pub fn register_write(&self, key: &str, content: &str) {
        let record = WriteRecord {
            digest: md5::compute(content.as_bytes()).0,
            ts: Instant::now(),
        };
        self.entries
            .lock()
            .expect("loop guard mutex")
            .insert(key.to_string(), record);
    }

    /// True iff a fresh entry exists for `key` with the same content hash.
    /// Expired entries are purged on access.
    pub fn should_ignore(&self, key: &str, content: &str) -> bool {
        let mut entries = self.entries.lock().expect("loop guard mutex");
        let Some(record) = entries.get(key).copied() else {
            return false;
        };
        if record.ts.elapsed() >= self.ttl {
            entries.remove(key);
            return false;
        }
        record.digest == md5::compute(content.as_bytes()).0
    }

    /// Stop the background sweep.
    pub fn shutdown(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_content_is_ignored_within_ttl() {
        let guard = LoopGuard::new(Duration::from_millis(500));
        guard.register_write("/app/styles.css", ".a { color: blue; }");
        assert!(guard.should_ignore("/app/styles.css", ".a { color: blue; }"));
        assert!(!guard.should_ignore("/app/styles.css", ".a { color: red; }"));
        assert!(!guard.should_ignore("/app/other.css", ".a { color: blue; }"));
    }

    #[tokio::test]
    async fn entries_expire() {
        let guard = LoopGuard::new(Duration::from_millis(20));
        guard.register_write(&sheet_key("42"), "text");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!guard.should_ignore(&sheet_key("42"), "text"));
    }

    #[tokio::test]
    async fn sheet_keys_do_not_collide_with_paths() {
        let guard = LoopGuard::new(Duration::from_secs(2));
        guard.register_write(&sheet_key("7"), "a");
        assert!(!guard.should_ignore("7", "a"));
        assert!(guard.should_ignore(&sheet_key("7"), "a"));
    }
}
