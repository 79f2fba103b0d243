use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::document::{ContentChange, Document};
use crate::source_path::SourcePath;

/// Tracks files currently open in the editor and their versions.
///
/// Open documents are applied through [`Document`] (UTF-16 edits, `\r`
/// normalization) and mirrored into the [`SourcePath`]; closed files fall
/// back to their on-disk content.
pub struct SourceFiles {
    open: Mutex<HashMap<Url, Document>>,
    source_path: Arc<SourcePath>,
}

impl SourceFiles {
    pub fn new(source_path: Arc<SourcePath>) -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
            source_path,
        }
    }

    pub fn source_path(&self) -> &Arc<SourcePath> {
        &self.source_path
    }

    pub fn open(&self, uri: &Url, text: &str, version: i32) {
        let document = Document::new(text, version);
        self.source_path
            .put_at_version(uri, document.text(), version, false);
        self.open.lock().insert(uri.clone(), document);
    }

    /// Applies `didChange` edits. Unknown URIs are ignored (the editor sent
    /// a change for a document it never opened).
    pub fn edit(&self, uri: &Url, version: i32, changes: &[ContentChange]) {
        let mut open = self.open.lock();
        let Some(document) = open.get_mut(uri) else {
            tracing::warn!(target = "kls.source", uri = %uri, "didChange for unopened document");
            return;
        };
        if let Err(err) = document.apply_changes(version, changes) {
            tracing::warn!(target = "kls.source", uri = %uri, error = %err, "rejecting edit");
            return;
        }
        let text = document.text().to_string();
        drop(open);

        self.source_path.put_at_version(uri, &text, version, false);
    }

    /// Untracks the file. Files that exist on disk revert to disk content;
    /// in-memory-only files are deleted from the source path.
    pub fn close(&self, uri: &Url) {
        self.open.lock().remove(uri);

        let on_disk = kls_core::file_uri_to_path(uri)
            .ok()
            .is_some_and(|path| path.exists());
        if !on_disk {
            self.source_path.delete(uri);
        }
    }

    pub fn is_open(&self, uri: &Url) -> bool {
        self.open.lock().contains_key(uri)
    }

    pub fn open_uris(&self) -> Vec<Url> {
        let mut out: Vec<Url> = self.open.lock().keys().cloned().collect();
        out.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        out
    }

    pub fn version(&self, uri: &Url) -> Option<i32> {
        self.open.lock().get(uri).map(Document::version)
    }
}
