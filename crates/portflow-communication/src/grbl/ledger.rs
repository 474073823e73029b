//! Pending-command ledger
//!
//! FIFO record of commands admitted for sending but not yet acknowledged.
//! The running character total is the capacity metric checked against the
//! device's receive buffer; it is maintained under the same lock as the
//! entries so the two can never disagree.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A command awaiting acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Command text as transmitted, including its newline.
    pub text: String,
    /// Caller-supplied identifier echoed in the completion event.
    pub id: String,
    /// Length in bytes as sent to the device.
    pub char_len: usize,
}

impl PendingCommand {
    /// Create a pending entry for a command about to be transmitted
    pub fn new(text: impl Into<String>, id: impl Into<String>) -> Self {
        let text = text.into();
        let char_len = text.len();
        Self {
            text,
            id: id.into(),
            char_len,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: VecDeque<PendingCommand>,
    char_total: usize,
}

/// FIFO ledger of unacknowledged commands with a running character total
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an admitted command; returns the new character total
    pub fn push(&self, text: impl Into<String>, id: impl Into<String>) -> usize {
        let entry = PendingCommand::new(text, id);
        let mut state = self.state.lock();
        state.char_total += entry.char_len;
        state.entries.push_back(entry);
        state.char_total
    }

    /// Remove and return the oldest pending command
    pub fn pop(&self) -> Option<PendingCommand> {
        let mut state = self.state.lock();
        let entry = state.entries.pop_front()?;
        state.char_total -= entry.char_len;
        Some(entry)
    }

    /// Discard every pending command; returns how many were dropped
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        state.char_total = 0;
        dropped
    }

    /// Number of pending commands
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True when nothing is awaiting acknowledgment
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Total characters awaiting acknowledgment
    pub fn char_total(&self) -> usize {
        self.state.lock().char_total
    }

    /// Release excess backing capacity after a decode pass
    pub fn shrink_to_fit(&self) {
        self.state.lock().entries.shrink_to_fit();
    }
}
