//! # Portflow Core
//!
//! Core types for Portflow: device events, the event-sink capability used by
//! the flow coordinator, a broadcast-backed event hub, and shared error
//! types.

pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{
    CompletionKind, DeviceEvent, EventHub, EventSink, SubscriptionId, DEFAULT_HUB_CAPACITY,
};
