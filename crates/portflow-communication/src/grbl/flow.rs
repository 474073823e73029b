//! Grbl buffer-flow coordinator
//!
//! Mediates between a command producer and a Grbl-family device which
//! acknowledges each buffered line with `ok` or `error:N`. The coordinator
//! admits commands against the device's fixed receive buffer, parks the
//! producer when the buffer is full, decodes the inbound response stream,
//! and releases the producer exactly when room is restored or the pending
//! state is wiped.
//!
//! Concurrency contract: one task calls [`BufferFlow::block_until_ready`]
//! per command (the only suspending call); one task feeds inbound chunks to
//! [`BufferFlow::on_incoming_data`], which never blocks; the status poller
//! writes on its own timer. Operator interrupts (`!`, `~`, `%`, soft reset)
//! may arrive from any task.

use crate::grbl::classify::{self, strip_comments};
use crate::grbl::ledger::Ledger;
use crate::grbl::pause::{PauseGate, UnblockSignal};
use crate::grbl::poller::spawn_status_poller;
use crate::transport::Transport;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use portflow_core::{CompletionKind, DeviceEvent, Error, EventSink, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Receive-buffer capacity assumed for Grbl devices
///
/// Two bytes under the firmware's 127 so real-time characters that bypass
/// accounting still fit.
pub const GRBL_RX_BUFFER_MAX: usize = 125;

/// Default status polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default prefix for commands that configure status-report verbosity
pub const DEFAULT_SUPPRESS_PREFIX: &str = "$10=1";

/// Memory reclamation behavior after each inbound decode pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimMode {
    /// Leave allocations to the allocator.
    #[default]
    Normal,
    /// Shrink decoder and ledger backing storage after every pass.
    ///
    /// Mitigates long-session growth on constrained hosts at some
    /// throughput cost.
    Aggressive,
}

/// Configuration for a [`GrblBufferFlow`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Device receive-buffer capacity in bytes.
    pub buffer_max: usize,
    /// Interval between `?` status queries.
    pub poll_interval: Duration,
    /// Commands starting with this prefix are dropped instead of sent.
    pub suppress_report_prefix: String,
    /// Memory reclamation behavior.
    pub reclaim: ReclaimMode,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            buffer_max: GRBL_RX_BUFFER_MAX,
            poll_interval: DEFAULT_POLL_INTERVAL,
            suppress_report_prefix: DEFAULT_SUPPRESS_PREFIX.to_string(),
            reclaim: ReclaimMode::default(),
        }
    }
}

impl FlowConfig {
    /// Check the configuration for values the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.buffer_max == 0 {
            return Err(Error::InvalidConfig {
                reason: "buffer_max must be at least 1".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig {
                reason: "poll_interval must be non-zero".to_string(),
            });
        }
        if self.suppress_report_prefix.is_empty() {
            return Err(Error::InvalidConfig {
                reason: "suppress_report_prefix must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Outcome of an admission request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Whether the caller may transmit the command.
    pub admit: bool,
    /// Whether a completion event will arrive from the decoder; when false
    /// the caller must synthesize its own completion.
    pub await_ack: bool,
    /// Reserved for future gate diagnostics; currently always empty.
    pub diagnostic: String,
}

impl Admission {
    /// Admission allowing transmission
    pub fn granted(await_ack: bool) -> Self {
        Self {
            admit: true,
            await_ack,
            diagnostic: String::new(),
        }
    }

    /// Admission denying transmission after a wipe
    pub fn denied() -> Self {
        Self {
            admit: false,
            await_ack: false,
            diagnostic: String::new(),
        }
    }
}

/// Buffer-flow operations shared by producer, decoder, and operator paths
#[async_trait]
pub trait BufferFlow: Send + Sync {
    /// Admit a command for transmission, blocking while the device buffer
    /// is saturated
    ///
    /// Returns once the command may be sent (`admit == true`) or once a
    /// wipe invalidated it (`admit == false`). At most one task may call
    /// this at a time.
    async fn block_until_ready(&self, cmd: &str, id: &str) -> Admission;

    /// Decode a chunk of inbound device data
    ///
    /// Never blocks. Partial lines are held until their terminator arrives.
    fn on_incoming_data(&self, data: &str);

    /// Split an operator block into device-ready commands
    ///
    /// Handles the `*init*` / `*status*` replay requests, the `?` query,
    /// the `%` local wipe, and suppressed report-configuration lines.
    fn break_apart_commands(&self, block: &str) -> Vec<String>;

    /// Pause admissions without releasing anyone
    fn pause(&self);

    /// Resume admissions and release a parked producer
    fn unpause(&self);

    /// Latch or clear the operator hold
    fn set_manual_paused(&self, paused: bool);

    /// Whether admissions are currently blocked
    fn is_paused(&self) -> bool;

    /// Whether the operator hold is latched
    fn is_manual_paused(&self) -> bool;

    /// Clear all pending state and release a parked producer with a cancel
    fn release_lock(&self);

    /// Shut the coordinator down: wipe pending state, release any waiter,
    /// stop the status poller
    fn close(&self);
}

/// Buffer-flow coordinator for Grbl-family devices
pub struct GrblBufferFlow {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    config: FlowConfig,
    ledger: Ledger,
    gate: PauseGate,
    /// Receiver the producer parks on; the lock serializes concurrent
    /// callers that violate the single-producer contract.
    signal_rx: tokio::sync::Mutex<mpsc::Receiver<UnblockSignal>>,
    /// Unterminated tail of the inbound stream, kept across decode calls.
    latest_data: Mutex<String>,
    /// Last status report seen, for duplicate suppression and replay.
    last_status: Mutex<String>,
    /// Version token captured from the device reset banner.
    version: Mutex<String>,
    /// Advisory free-space figure from the device's last `Bf:` report.
    available_buffer: AtomicUsize,
    poller_task: RwLock<Option<JoinHandle<()>>>,
    poller_shutdown: RwLock<Option<mpsc::Sender<()>>>,
}

impl GrblBufferFlow {
    /// Create a coordinator over a transport, publishing to `sink`
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn EventSink>, config: FlowConfig) -> Self {
        let (gate, signal_rx) = PauseGate::new();
        let available_buffer = AtomicUsize::new(config.buffer_max);
        Self {
            transport,
            sink,
            config,
            ledger: Ledger::new(),
            gate,
            signal_rx: tokio::sync::Mutex::new(signal_rx),
            latest_data: Mutex::new(String::new()),
            last_status: Mutex::new(String::new()),
            version: Mutex::new(String::new()),
            available_buffer,
            poller_task: RwLock::new(None),
            poller_shutdown: RwLock::new(None),
        }
    }

    /// The active configuration
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Version token captured from the last device reset banner
    pub fn version(&self) -> String {
        self.version.lock().clone()
    }

    /// Last status report line received
    pub fn last_status(&self) -> String {
        self.last_status.lock().clone()
    }

    /// Free receive-buffer space the device last reported
    ///
    /// Advisory only; admission decisions use the ledger total.
    pub fn available_buffer_space(&self) -> usize {
        self.available_buffer.load(Ordering::Relaxed)
    }

    /// Number of commands awaiting acknowledgment
    pub fn pending_count(&self) -> usize {
        self.ledger.len()
    }

    /// Total characters awaiting acknowledgment
    pub fn pending_chars(&self) -> usize {
        self.ledger.char_total()
    }

    /// Start the periodic `?` status poller
    ///
    /// Replaces any poller already running. Must be called from within a
    /// tokio runtime.
    pub fn start_polling(&self) {
        self.stop_polling();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let handle = spawn_status_poller(
            self.transport.clone(),
            self.sink.clone(),
            shutdown_rx,
            self.config.poll_interval,
        );
        *self.poller_shutdown.write() = Some(shutdown_tx);
        *self.poller_task.write() = Some(handle);
    }

    /// Stop the status poller if it is running
    pub fn stop_polling(&self) {
        if let Some(tx) = self.poller_shutdown.write().take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.poller_task.write().take() {
            handle.abort();
        }
    }

    /// Wipe pending state without forwarding anything to the device
    ///
    /// Clears the ledger, releases a parked producer with
    /// [`UnblockSignal::CancelAndWipe`], and notifies listeners how many
    /// commands the transport owner still had queued.
    pub fn local_buffer_wipe(&self) {
        tracing::info!("Wiping pending command state without forwarding to device");
        self.release_lock();
        self.sink.publish(DeviceEvent::QueueWiped {
            queue_count: self.transport.queued_for_send(),
            port: self.transport.port_name().to_string(),
        });
    }

    fn decode_segment(&self, element: &str) {
        tracing::debug!("< {}", element);

        if element.starts_with("ok") || element.starts_with("error") {
            self.handle_ack(element);
        } else if let Some(version) = parse_reset_banner(element) {
            // Device restarted: its receive buffer is empty and everything
            // pending on it is moot, so release any parked producer to
            // transmit rather than cancelling it. A hold latched before
            // the reset no longer reflects operator intent.
            tracing::info!("Device reset banner received, firmware version {}", version);
            let dropped = self.ledger.clear();
            tracing::info!("Reset dropped {} pending commands", dropped);
            self.gate.force_unpause();
            self.sink.publish(DeviceEvent::QueueWiped {
                queue_count: self.transport.queued_for_send(),
                port: self.transport.port_name().to_string(),
            });
            *self.version.lock() = version;
        } else if element.starts_with('<') {
            let mut last = self.last_status.lock();
            if *last == element {
                tracing::debug!("Status unchanged, suppressing report");
                return;
            }
            *last = element.to_string();
        } else if let Some(available) = parse_buffer_report(element) {
            self.available_buffer.store(available, Ordering::Relaxed);
        }

        self.sink.publish(DeviceEvent::Line {
            port: self.transport.port_name().to_string(),
            data: format!("{}\n", element),
        });
    }

    fn handle_ack(&self, element: &str) {
        let errored = element.starts_with("error");
        match self.ledger.pop() {
            Some(entry) => {
                let kind = if errored {
                    tracing::error!("Error response received: {}, id: {}", entry.text.trim_end(), entry.id);
                    CompletionKind::Error
                } else {
                    CompletionKind::Complete
                };
                self.sink.publish(DeviceEvent::Completion {
                    kind,
                    id: entry.id,
                    port: self.transport.port_name().to_string(),
                    queue_length: self.ledger.char_total(),
                    command: entry.text,
                });
                tracing::debug!(
                    "Buffer decreased to {} entries, {} chars",
                    self.ledger.len(),
                    self.ledger.char_total()
                );
            }
            None => {
                // Accounting is corrupt; keep decoding rather than take the
                // session down, the protocol has no way to signal back
                tracing::error!(
                    "Response {:?} arrived with no pending command; buffer accounting is corrupt",
                    element
                );
            }
        }

        if self.ledger.char_total() < self.config.buffer_max && self.gate.try_auto_resume() {
            tracing::info!("Buffer has room again, admissions resumed");
        }
    }
}

#[async_trait]
impl BufferFlow for GrblBufferFlow {
    async fn block_until_ready(&self, cmd: &str, id: &str) -> Admission {
        tracing::debug!("block_until_ready cmd: {:?}, id: {}", cmd, id);

        let no_response = classify::expects_no_response(cmd);
        if !no_response {
            let total = self.ledger.push(cmd, id);
            tracing::debug!("Line length {}, buffer total now {}", cmd.len(), total);
            if total >= self.config.buffer_max {
                tracing::info!(
                    "Buffer total {} at or over capacity {}, pausing admissions",
                    total,
                    self.config.buffer_max
                );
                self.gate.pause();
            }
        }

        if self.gate.is_paused() {
            let mut rx = self.signal_rx.lock().await;
            // Discard releases left over from earlier resumes or wipes.
            // Bounded: the channel never holds more than its capacity.
            while rx.try_recv().is_ok() {}
            // A release delivered during the drain has already cleared the
            // pause flag, so re-check before parking
            if self.gate.is_paused() {
                tracing::info!("Blocking until the decoder signals room or a wipe");
                match rx.recv().await {
                    Some(UnblockSignal::Resume) => {
                        tracing::info!("Block released");
                    }
                    Some(UnblockSignal::CancelAndWipe) | None => {
                        tracing::info!("Pending state wiped while blocked; dropping {:?}", cmd);
                        return Admission::denied();
                    }
                }
            }
        }

        Admission::granted(!no_response)
    }

    fn on_incoming_data(&self, data: &str) {
        let to_process: Vec<String> = {
            let mut acc = self.latest_data.lock();
            acc.push_str(data);

            let segments = split_response_lines(&acc);
            if segments.len() < 2 {
                // No terminator yet; keep accumulating
                return;
            }

            let mut owned: Vec<String> = segments.iter().map(|s| (*s).to_string()).collect();
            *acc = owned.pop().unwrap_or_default();
            owned
        };

        for element in &to_process {
            self.decode_segment(element);
        }

        if self.config.reclaim == ReclaimMode::Aggressive {
            self.ledger.shrink_to_fit();
            self.latest_data.lock().shrink_to_fit();
        }
    }

    fn break_apart_commands(&self, block: &str) -> Vec<String> {
        tracing::debug!("Breaking apart block: {:?}", block);
        let mut finals = Vec::new();

        for raw in block.split('\n') {
            let item = strip_comments(raw).replace(' ', "");

            if item == "*init*" {
                // Replay the captured version for a client joining late
                self.sink.publish(DeviceEvent::Line {
                    port: self.transport.port_name().to_string(),
                    data: format!("{}\n", self.version.lock()),
                });
            } else if item == "*status*" {
                self.sink.publish(DeviceEvent::Line {
                    port: self.transport.port_name().to_string(),
                    data: format!("{}\n", self.last_status.lock()),
                });
            } else if item == "?" {
                // Real-time query goes out without a newline
                finals.push(item);
            } else if item == "%" {
                self.local_buffer_wipe();
            } else if !self.config.suppress_report_prefix.is_empty()
                && item.starts_with(&self.config.suppress_report_prefix)
            {
                tracing::debug!("Ignoring command that would change report verbosity");
            } else if !item.is_empty() {
                finals.push(format!("{}\n", item));
            }
        }

        tracing::debug!("Block produced {} commands", finals.len());
        finals
    }

    fn pause(&self) {
        self.gate.pause();
    }

    fn unpause(&self) {
        self.gate.unpause();
    }

    fn set_manual_paused(&self, paused: bool) {
        self.gate.set_manual_paused(paused);
    }

    fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    fn is_manual_paused(&self) -> bool {
        self.gate.is_manual_paused()
    }

    fn release_lock(&self) {
        let dropped = self.ledger.clear();
        tracing::info!("Send lock released, {} pending commands dropped", dropped);
        self.gate.cancel();
    }

    fn close(&self) {
        tracing::info!("Closing buffer flow, stopping the status query loop");
        self.release_lock();
        self.gate.unpause();
        self.stop_polling();
    }
}

impl std::fmt::Debug for GrblBufferFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrblBufferFlow")
            .field("port", &self.transport.port_name())
            .field("pending", &self.ledger.len())
            .field("pending_chars", &self.ledger.char_total())
            .field("paused", &self.gate.is_paused())
            .finish()
    }
}

/// Split accumulated inbound data on line terminators
///
/// Terminators are `\n`, `\n\n`, `\r\n`, or `\r\n\n`, longest match first;
/// a lone `\r` is ordinary data. The final element is the unterminated
/// tail (possibly empty) that the caller keeps for the next chunk.
fn split_response_lines(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let bytes = input.as_bytes();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let sep_len = if bytes[i] == b'\n' {
            if bytes.get(i + 1) == Some(&b'\n') {
                2
            } else {
                1
            }
        } else if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            if bytes.get(i + 2) == Some(&b'\n') {
                3
            } else {
                2
            }
        } else {
            0
        };

        if sep_len == 0 {
            i += 1;
        } else {
            parts.push(&input[start..i]);
            i += sep_len;
            start = i;
        }
    }

    parts.push(&input[start..]);
    parts
}

/// Extract the version token from a device reset banner
///
/// `"Grbl v1.1 ['$' for help]"` and `"Grbl 1.1h ['$' for help]"` yield
/// `"1.1"` and `"1.1h"`. The banner must carry text after the version.
fn parse_reset_banner(line: &str) -> Option<String> {
    let rest = line.strip_prefix("Grbl ")?;
    let rest = rest.strip_prefix('v').unwrap_or(rest);
    let (version, _) = rest.split_once(' ')?;
    if version.is_empty() {
        return None;
    }
    Some(version.to_string())
}

/// Extract the device's free receive-buffer bytes from a `Bf:` report
///
/// Matches `Bf:<1-3 digits>,<1-3 digits>` anywhere in the line; the second
/// figure is the available space.
fn parse_buffer_report(line: &str) -> Option<usize> {
    let mut search = line;
    while let Some(idx) = search.find("Bf:") {
        let after = &search[idx + 3..];
        if let Some(available) = parse_buffer_fields(after) {
            return Some(available);
        }
        search = after;
    }
    None
}

fn parse_buffer_fields(s: &str) -> Option<usize> {
    let (_, rest) = take_digits(s)?;
    let rest = rest.strip_prefix(',')?;
    let (available, _) = take_digits(rest)?;
    available.parse().ok()
}

/// Take one to three leading ASCII digits
fn take_digits(s: &str) -> Option<(&str, &str)> {
    let count = s
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .count()
        .min(3);
    if count == 0 {
        None
    } else {
        Some(s.split_at(count))
    }
}
