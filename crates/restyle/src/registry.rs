//! Authoritative map of live stylesheets and their resolved source metadata.

use cdp_session::SheetHeader;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

/// One live stylesheet as tracked across its lifetime in the page.
#[derive(Debug, Clone)]
pub struct StylesheetRecord {
    pub header: SheetHeader,
    /// Most recent full text known to the agent.
    pub text: Option<String>,
    pub last_modified: Option<Instant>,
    /// Absolute path announced by a Vite-style bundler on the owning
    /// `<style>` element.
    pub vite_dev_id: Option<PathBuf>,
    /// Authored source resolved from an inline source map.
    pub original_source: Option<PathBuf>,
}

impl StylesheetRecord {
    /// True when edits to this sheet can land in an authored file.
    pub fn is_file_based(&self) -> bool {
        if self.vite_dev_id.is_some() || self.original_source.is_some() {
            return true;
        }
        if self.header.is_inline {
            return false;
        }
        let url = &self.header.source_url;
        url.starts_with("http://") || url.starts_with("https://") || url.starts_with("file://")
    }
}

/// No persistence: recreated on each agent start and cleared before a page
/// reload.
#[derive(Debug, Default)]
pub struct StylesheetRegistry {
    records: HashMap<String, StylesheetRecord>,
    order: Vec<String>,
}

impl StylesheetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-registering an id returns the existing record untouched.
    pub fn register(&mut self, header: SheetHeader) -> &StylesheetRecord {
        let id = header.id.clone();
        if !self.records.contains_key(&id) {
            self.order.push(id.clone());
            self.records.insert(
                id.clone(),
                StylesheetRecord {
                    header,
                    text: None,
                    last_modified: None,
                    vite_dev_id: None,
                    original_source: None,
                },
            );
        }
        &self.records[&id]
    }

    pub fn update_text(&mut self, id: &str, text: String) {
        if let Some(record) = self.records.get_mut(id) {
            record.text = Some(text);
            record.last_modified = Some(Instant::now());
        }
    }

    /// The stored snapshot, used as the "old" input to the differ.
    pub fn previous_text(&self, id: &str) -> Option<String> {
        self.records.get(id)?.text.clone()
    }

    pub fn set_vite_dev_id(&mut self, id: &str, path: PathBuf) {
        if let Some(record) = self.records.get_mut(id) {
            record.vite_dev_id = Some(path);
        }
    }

    pub fn set_original_source(&mut self, id: &str, path: PathBuf) {
        if let Some(record) = self.records.get_mut(id) {
            record.original_source = Some(path);
        }
    }

    pub fn get(&self, id: &str) -> Option<&StylesheetRecord> {
        self.records.get(id)
    }

    /// Records whose text is backed by an authored file, in registration
    /// order.
    pub fn file_based(&self) -> Vec<&StylesheetRecord> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|record| record.is_file_based())
            .collect()
    }

    /// All records, in registration order.
    pub fn records(&self) -> impl Iterator<Item = &StylesheetRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn remove(&mut self, id: &str) {
        self.records.remove(id);
        self.order.retain(|tracked| tracked != id);
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
