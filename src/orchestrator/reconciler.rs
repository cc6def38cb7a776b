//! Append-only transcript.
//!
//! Entries are kept in arrival order and never reordered or deduplicated; at-most-once
//! delivery is the controller's job (one fragment set per resolved request).

use crate::model::HistoryEntry;

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    placeholder: Option<String>,
    entries: Vec<HistoryEntry>,
}

impl Transcript {
    pub fn with_placeholder(text: impl Into<String>) -> Self {
        Self {
            placeholder: Some(text.into()),
            entries: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    #[cfg(test)]
    pub fn placeholder(&self) -> Option<&str> {
        self.placeholder.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append backend-delivered entries in order. The start prompt is dropped on the first
    /// non-empty delivery; returns whether that happened on this call.
    pub fn append_delivered(&mut self, entries: &[HistoryEntry]) -> bool {
        if entries.is_empty() {
            return false;
        }
        let cleared = self.placeholder.take().is_some();
        self.entries.extend_from_slice(entries);
        cleared
    }

    /// Append a locally synthesized entry (errors). Leaves the start prompt in place.
    pub fn append_synthetic(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }
}
