//! Device event definitions and the event hub.
//!
//! The flow coordinator reports everything it decodes or decides through a
//! [`DeviceEvent`] published to an injected [`EventSink`]. Events are
//! cloneable and serializable for logging and replay. [`EventHub`] is the
//! shipped sink: a broadcast channel plus a registry of synchronous handler
//! closures. There is no global hub; construct one and inject it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Outcome of a completed device command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionKind {
    /// The device acknowledged the command.
    Complete,
    /// The device rejected the command with an error response.
    Error,
}

impl std::fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionKind::Complete => write!(f, "Complete"),
            CompletionKind::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by the buffer-flow coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A decoded or passthrough response line, newline-terminated.
    Line {
        /// Serial port the line arrived on.
        port: String,
        /// The line content, including its trailing newline.
        data: String,
    },
    /// A previously admitted command finished (acknowledged or errored).
    Completion {
        /// Whether the device acknowledged or rejected the command.
        kind: CompletionKind,
        /// Identifier supplied when the command was admitted.
        id: String,
        /// Serial port the command was sent on.
        port: String,
        /// Total characters still awaiting acknowledgment after this one.
        queue_length: usize,
        /// The text of the completed command.
        command: String,
    },
    /// The pending-command ledger was forcibly cleared.
    QueueWiped {
        /// Commands still queued for send at the transport when wiped.
        queue_count: usize,
        /// Serial port whose queue was wiped.
        port: String,
    },
    /// A transport write failed.
    TransportError {
        /// Serial port the write was addressed to.
        port: String,
        /// Description of the failure.
        message: String,
    },
}

impl DeviceEvent {
    /// Get the port this event relates to
    pub fn port(&self) -> &str {
        match self {
            DeviceEvent::Line { port, .. } => port,
            DeviceEvent::Completion { port, .. } => port,
            DeviceEvent::QueueWiped { port, .. } => port,
            DeviceEvent::TransportError { port, .. } => port,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            DeviceEvent::Line { port, data } => {
                format!("Line on {}: {}", port, data.trim_end())
            }
            DeviceEvent::Completion { kind, id, .. } => {
                format!("Command {} finished: {}", id, kind)
            }
            DeviceEvent::QueueWiped { queue_count, port } => {
                format!("Queue wiped on {} ({} still queued)", port, queue_count)
            }
            DeviceEvent::TransportError { port, message } => {
                format!("Transport error on {}: {}", port, message)
            }
        }
    }
}

/// Capability to publish device events, injected into the flow coordinator
///
/// Implementations must never block the caller; the coordinator publishes
/// from its non-blocking decode path.
pub trait EventSink: Send + Sync {
    /// Publish an event to whoever is listening
    fn publish(&self, event: DeviceEvent);
}

/// Subscription handle for unsubscribing from hub events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Type alias for event handler functions
type EventHandler = Box<dyn Fn(DeviceEvent) + Send + Sync>;

/// Default broadcast channel capacity for [`EventHub`]
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

/// Broadcast-backed event sink
///
/// Fans each published event out to the registered synchronous handlers,
/// then sends it on a `tokio::sync::broadcast` channel for async consumers.
/// Handlers run on the publishing thread and should return quickly.
pub struct EventHub {
    /// Broadcast channel sender
    sender: broadcast::Sender<DeviceEvent>,
    /// Registered synchronous handlers
    handlers: Arc<RwLock<HashMap<SubscriptionId, EventHandler>>>,
}

impl EventHub {
    /// Create a new event hub with the default channel capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HUB_CAPACITY)
    }

    /// Create a new event hub with a custom broadcast capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to events with a synchronous handler
    ///
    /// The handler is called on the publishing thread for every event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let mut handlers = self.handlers.write();
        handlers.insert(id, Box::new(handler));
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Get a receiver for manual event polling
    ///
    /// Useful for async contexts where events are consumed in a tokio task.
    pub fn receiver(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// Unsubscribe from events
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let removed = handlers.remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Get the number of registered synchronous handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl EventSink for EventHub {
    fn publish(&self, event: DeviceEvent) {
        let handlers = self.handlers.read();
        for handler in handlers.values() {
            handler(event.clone());
        }
        // A send error only means no async receivers are attached
        let _ = self.sender.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
