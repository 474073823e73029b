//! Transport interface consumed by the flow coordinator
//!
//! The coordinator only ever writes to the device; the read side is owned by
//! whoever pumps the port and feeds inbound chunks to the decoder.

use std::io;

/// Write side of a device connection
///
/// Implementations must be safe to share across the producer, decoder, and
/// poller tasks.
pub trait Transport: Send + Sync {
    /// Write raw bytes to the device
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Get the port name (e.g. "/dev/ttyUSB0", "COM3")
    fn port_name(&self) -> &str;

    /// Number of commands the owner still has queued for send
    ///
    /// Advisory; reported in queue-wipe notifications only.
    fn queued_for_send(&self) -> usize;
}
