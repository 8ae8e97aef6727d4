//! Transcript view capability and an in-memory implementation.

use parking_lot::Mutex;
use proto::{EntryId, TranscriptEntry};

/// Sink for rendered transcript entries.
pub trait TranscriptView: Send + Sync {
    /// Appends an entry at the end of the transcript.
    fn append(&self, entry: TranscriptEntry);

    /// Removes the entry with `id`. Returns whether it was present.
    fn remove(&self, id: &EntryId) -> bool;

    /// Cue shown when input is submitted while the session is locked.
    fn gate_rejected(&self) {}
}

/// Transcript kept in memory; used by tests and as a backing store for
/// views that only need to redraw.
#[derive(Default)]
pub struct MemoryTranscript {
    entries: Mutex<Vec<TranscriptEntry>>,
    rejections: Mutex<usize>,
}

impl MemoryTranscript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current entries in display order.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing has been appended (or everything was removed).
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of provisional entries still shown.
    pub fn provisional_count(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.provisional).count()
    }

    /// How many gate-rejection cues were raised.
    pub fn rejections(&self) -> usize {
        *self.rejections.lock()
    }
}

impl TranscriptView for MemoryTranscript {
    fn append(&self, entry: TranscriptEntry) {
        self.entries.lock().push(entry);
    }

    fn remove(&self, id: &EntryId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| &e.id == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn gate_rejected(&self) {
        *self.rejections.lock() += 1;
    }
}
