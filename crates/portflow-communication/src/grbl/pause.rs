//! Pause state machine and the producer release channel
//!
//! Tracks whether admission is blocked, distinguishing the automatic
//! flow-control pause from the operator's manual hold, and delivers release
//! signals to a producer parked in the admission gate. Both flags live in
//! one state object guarded by one lock; every transition that delivers a
//! signal decides and applies under that lock, so a concurrent manual pause
//! can never slip between the decision and the state change.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Capacity of the release channel
///
/// Large enough that a burst of inbound response lines can never fill it;
/// senders use `try_send` and must not block the decode path.
pub const SIGNAL_CAPACITY: usize = 1024;

/// Signal delivered to a producer parked in the admission gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnblockSignal {
    /// Capacity is available again; transmit the admitted command.
    Resume,
    /// Pending state was wiped; the admitted command must not be sent.
    CancelAndWipe,
}

#[derive(Debug, Default)]
struct PauseFlags {
    paused: bool,
    manual: bool,
}

/// Pause flags plus the sending half of the release channel
#[derive(Debug)]
pub struct PauseGate {
    flags: Mutex<PauseFlags>,
    signal_tx: mpsc::Sender<UnblockSignal>,
}

impl PauseGate {
    /// Create a gate and the receiver the admission gate parks on
    pub fn new() -> (Self, mpsc::Receiver<UnblockSignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        (
            Self {
                flags: Mutex::new(PauseFlags::default()),
                signal_tx,
            },
            signal_rx,
        )
    }

    /// Enter the paused state without releasing anyone
    ///
    /// Used by the flow-control path when the ledger crosses capacity.
    pub fn pause(&self) {
        self.flags.lock().paused = true;
        tracing::debug!("Paused buffer");
    }

    /// Leave the paused state and release a parked producer to transmit
    pub fn unpause(&self) {
        let mut flags = self.flags.lock();
        flags.paused = false;
        self.deliver(UnblockSignal::Resume);
        tracing::debug!("Unpaused buffer");
    }

    /// Leave the paused state, telling a parked producer to drop its command
    ///
    /// Used by the wipe paths; the producer's ledger entry is already gone.
    pub fn cancel(&self) {
        let mut flags = self.flags.lock();
        flags.paused = false;
        self.deliver(UnblockSignal::CancelAndWipe);
    }

    /// Clear both the pause and the operator hold, releasing a parked
    /// producer to transmit
    ///
    /// Used on a device reset: the restarted device has an empty receive
    /// buffer, and a hold latched before the reset no longer reflects
    /// operator intent.
    pub fn force_unpause(&self) {
        let mut flags = self.flags.lock();
        flags.paused = false;
        flags.manual = false;
        self.deliver(UnblockSignal::Resume);
        tracing::debug!("Forced unpause, manual hold cleared");
    }

    /// Latch or clear the operator hold; carries no signal by itself
    pub fn set_manual_paused(&self, manual: bool) {
        self.flags.lock().manual = manual;
    }

    /// Resume automatically unless the operator hold is latched
    ///
    /// Returns true when the pause was cleared and a `Resume` delivered.
    pub fn try_auto_resume(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.paused && !flags.manual {
            flags.paused = false;
            self.deliver(UnblockSignal::Resume);
            true
        } else {
            false
        }
    }

    /// Whether admission is currently blocked
    pub fn is_paused(&self) -> bool {
        self.flags.lock().paused
    }

    /// Whether the operator hold is latched
    pub fn is_manual_paused(&self) -> bool {
        self.flags.lock().manual
    }

    // Always called with the flags lock held so the flag change and the
    // signal cannot interleave with another transition. try_send keeps the
    // delivering side non-blocking; a full channel only means the producer
    // has more releases queued than it will ever consume.
    fn deliver(&self, signal: UnblockSignal) {
        if let Err(e) = self.signal_tx.try_send(signal) {
            tracing::warn!("Release signal {:?} not delivered: {}", signal, e);
        }
    }
}
