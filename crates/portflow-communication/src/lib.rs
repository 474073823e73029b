#![allow(dead_code)]
//! # Portflow Communication
//!
//! Transport and protocol layer for Portflow. Provides serial port
//! discovery and I/O plus the Grbl character-counting flow control that
//! meters commands into the device's fixed receive buffer.

pub mod grbl;
pub mod serial;
pub mod transport;

pub use serial::{list_ports, SerialPortInfo, SerialTransport};
pub use transport::Transport;

pub use grbl::{
    classify, spawn_status_poller, strip_comments, Admission, BufferFlow, CommandTags, FlowConfig,
    GrblBufferFlow, Ledger, PauseGate, PendingCommand, ReclaimMode, UnblockSignal,
    GRBL_RX_BUFFER_MAX, SOFT_RESET,
};
