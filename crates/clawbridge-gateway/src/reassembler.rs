//! Streamed reply reassembly.
//!
//! Upstream sends each delta as the cumulative text of the current segment.
//! When a side-effecting sub-operation (a tool call) runs, upstream restarts
//! its counter and the next delta is shorter than the last one. That drop in
//! length is the only segment-boundary signal, so the previous segment is
//! committed and the new delta starts the next one.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Reassembler shared between the event router and the hub.
pub type SharedReassembler = Arc<Mutex<StreamReassembler>>;

/// Accumulation state for the single in-flight run.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    /// Confirmed complete prior segments. Never shrinks within a run.
    committed: String,
    /// Latest cumulative text of the current segment.
    active: String,
    /// Run this state belongs to.
    run_id: Option<String>,
}

impl StreamReassembler {
    /// Create an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty reassembler behind a shared lock.
    pub fn shared() -> SharedReassembler {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Start accumulating for a new run.
    pub fn reset(&mut self, run_id: Option<String>) {
        self.committed.clear();
        self.active.clear();
        self.run_id = run_id;
    }

    /// Drop all state after a run ends.
    pub fn clear(&mut self) {
        self.reset(None);
    }

    /// Run the accumulated text belongs to.
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Whether any text has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.active.is_empty()
    }

    /// The reply so far: committed segments plus the current one.
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.committed.len() + self.active.len());
        text.push_str(&self.committed);
        text.push_str(&self.active);
        text
    }

    /// Apply a delta and return the reply so far.
    ///
    /// `None` (a delta without text) changes nothing and publishes nothing.
    pub fn on_delta(&mut self, run_id: Option<&str>, text: Option<String>) -> Option<String> {
        let text = text?;

        if self.run_id.is_none() {
            self.run_id = run_id.map(str::to_string);
        }

        if text.chars().count() < self.active.chars().count() {
            debug!(
                committed = self.committed.len(),
                segment = self.active.len(),
                "Segment reset detected"
            );
            let previous = std::mem::take(&mut self.active);
            self.committed.push_str(&previous);
        }
        self.active = text;

        Some(self.text())
    }

    /// Finish the run and return its complete text.
    ///
    /// Text embedded in the final event wins when present and non-empty;
    /// otherwise the accumulated text is used. State is cleared either way.
    pub fn on_final(&mut self, text: Option<String>) -> String {
        let text = match text {
            Some(text) if !text.is_empty() => text,
            _ => self.text(),
        };
        self.clear();
        text
    }
}
