//! Periodic status polling
//!
//! Issues out-of-band `?` status queries on a fixed interval, independent of
//! the command stream and of ledger state. The device answers real-time
//! queries even when its receive buffer is full, so the poller never
//! consults the admission gate.

use crate::transport::Transport;
use portflow_core::{DeviceEvent, EventSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Spawn the status polling task
///
/// Writes `?` to the transport every `poll_interval`. The task ends when a
/// shutdown message arrives, when every sender of the shutdown channel is
/// dropped, or when a write fails. A write failure emits a
/// [`DeviceEvent::TransportError`] and stops the timer; it never panics or
/// takes the session down.
pub fn spawn_status_poller(
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    mut shutdown_rx: mpsc::Receiver<()>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::debug!("Status poller started, interval {:?}", poll_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::debug!("Status poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match transport.write(b"?") {
                        Ok(n) => {
                            tracing::trace!("Wrote {} byte status query", n);
                        }
                        Err(e) => {
                            let message = format!(
                                "Error writing to {}: {}. Stopping status queries.",
                                transport.port_name(),
                                e
                            );
                            tracing::warn!("{}", message);
                            sink.publish(DeviceEvent::TransportError {
                                port: transport.port_name().to_string(),
                                message,
                            });
                            break;
                        }
                    }
                }
            }
        }
    })
}
