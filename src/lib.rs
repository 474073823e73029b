//! # Portflow
//!
//! Buffer-flow coordination and response decoding for Grbl-family CNC
//! controllers over a serial link:
//! - Character-counting admission control against the device's 125-byte
//!   planner buffer
//! - Streaming response decoding (`ok`/`error` acks, status reports,
//!   reset banners)
//! - Feed-hold / cycle-start pause tracking with manual-pause latching
//! - Periodic `?` status polling
//!
//! ## Architecture
//!
//! Portflow is organized as a workspace with multiple crates:
//!
//! 1. **portflow-core** - Device events, the event hub, shared error types
//! 2. **portflow-communication** - Transports and the Grbl flow engine
//! 3. **portflow** - Facade crate that re-exports the public API
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use portflow::{BufferFlow, EventHub, FlowConfig, GrblBufferFlow, SerialTransport};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let transport = Arc::new(SerialTransport::open("/dev/ttyUSB0", 115200)?);
//! let hub = Arc::new(EventHub::new());
//! let flow = GrblBufferFlow::new(transport, hub, FlowConfig::default());
//! flow.start_polling();
//!
//! for line in ["G21", "G90", "G0 X10 Y10"] {
//!     for cmd in flow.break_apart_commands(line) {
//!         let admission = flow.block_until_ready(&cmd, "1").await;
//!         if admission.admit {
//!             // hand `cmd` to the serial writer
//!         }
//!     }
//! }
//! flow.close();
//! # Ok(())
//! # }
//! ```

pub use portflow_communication::grbl::{
    classify, strip_comments, Admission, BufferFlow, CommandTags, FlowConfig, GrblBufferFlow,
    PendingCommand, ReclaimMode, UnblockSignal, GRBL_RX_BUFFER_MAX,
};
pub use portflow_communication::{
    list_ports, SerialPortInfo, SerialTransport, Transport,
};
pub use portflow_core::{
    CompletionKind, DeviceEvent, Error, EventHub, EventSink, Result, SubscriptionId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
