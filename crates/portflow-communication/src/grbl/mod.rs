//! Grbl protocol support
//!
//! Grbl-family firmware acknowledges every buffered command with an `ok` or
//! `error:N` line and exposes a small fixed receive buffer, so a host must
//! meter what it sends by counting unacknowledged characters. The modules
//! here implement that character-counting discipline:
//!
//! - [`classify`]: per-command protocol traits (acked or not, real-time,
//!   buffer-wiping)
//! - [`ledger`]: the FIFO of commands awaiting acknowledgment
//! - [`pause`]: the admission gate producers park on
//! - [`flow`]: the coordinator tying gate, ledger, and decoder together
//! - [`poller`]: the periodic `?` status query task

pub mod classify;
pub mod flow;
pub mod ledger;
pub mod pause;
pub mod poller;

pub use classify::{classify, strip_comments, CommandTags, SOFT_RESET};
pub use flow::{
    Admission, BufferFlow, FlowConfig, GrblBufferFlow, ReclaimMode, DEFAULT_POLL_INTERVAL,
    DEFAULT_SUPPRESS_PREFIX, GRBL_RX_BUFFER_MAX,
};
pub use ledger::{Ledger, PendingCommand};
pub use pause::{PauseGate, UnblockSignal, SIGNAL_CAPACITY};
pub use poller::spawn_status_poller;
