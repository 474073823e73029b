use portflow_communication::{BufferFlow, FlowConfig, GrblBufferFlow, Transport};
use portflow_core::{CompletionKind, DeviceEvent, EventSink};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Mock transport for testing
struct MockTransport {
    sent: Arc<Mutex<Vec<String>>>,
    queued: usize,
}

impl MockTransport {
    fn new(sent: Arc<Mutex<Vec<String>>>) -> Self {
        Self { sent, queued: 0 }
    }
}

impl Transport for MockTransport {
    fn write(&self, data: &[u8]) -> std::io::Result<usize> {
        let s = String::from_utf8_lossy(data).to_string();
        self.sent.lock().unwrap().push(s);
        Ok(data.len())
    }

    fn port_name(&self) -> &str {
        "/dev/mock0"
    }

    fn queued_for_send(&self) -> usize {
        self.queued
    }
}

// Sink that records every published event
struct CollectingSink {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl EventSink for CollectingSink {
    fn publish(&self, event: DeviceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

type Fixture = (
    Arc<GrblBufferFlow>,
    Arc<Mutex<Vec<String>>>,
    Arc<Mutex<Vec<DeviceEvent>>>,
);

fn fixture() -> Fixture {
    fixture_with_queued(0)
}

fn fixture_with_queued(queued: usize) -> Fixture {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(MockTransport {
        sent: sent.clone(),
        queued,
    });
    let sink = Arc::new(CollectingSink {
        events: events.clone(),
    });
    let flow = Arc::new(GrblBufferFlow::new(transport, sink, FlowConfig::default()));
    (flow, sent, events)
}

// A command of exactly `len` bytes including its trailing newline
fn cmd_of_len(len: usize) -> String {
    let mut s = "G".repeat(len - 1);
    s.push('\n');
    s
}

fn line_count(events: &[DeviceEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, DeviceEvent::Line { .. }))
        .count()
}

// Drive the runtime until the producer task has observed the pause and
// parked. On the current-thread runtime a yield runs the producer to its
// next suspension point, but poll a few times to avoid timing races.
async fn wait_until_paused(flow: &GrblBufferFlow) {
    let mut attempts = 0;
    while !flow.is_paused() && attempts < 50 {
        tokio::task::yield_now().await;
        attempts += 1;
    }
    assert!(flow.is_paused());
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_unacknowledged_commands_accumulate() {
    let (flow, _sent, _events) = fixture();

    // "G0 X0\n" is 6 bytes, "G1 X10\n" is 7
    let first = flow.block_until_ready("G0 X0\n", "1").await;
    assert!(first.admit);
    assert!(first.await_ack);
    assert!(first.diagnostic.is_empty());
    assert_eq!(flow.pending_count(), 1);
    assert_eq!(flow.pending_chars(), 6);

    let second = flow.block_until_ready("G1 X10\n", "2").await;
    assert!(second.admit);
    assert_eq!(flow.pending_count(), 2);
    assert_eq!(flow.pending_chars(), 13);
}

#[tokio::test]
async fn test_realtime_commands_skip_accounting() {
    let (flow, _sent, _events) = fixture();

    for cmd in ["?", "!", "~", "%", "\n", "$$\n"] {
        let admission = flow.block_until_ready(cmd, "0").await;
        assert!(admission.admit, "{:?} should be admitted", cmd);
        assert!(!admission.await_ack, "{:?} gets no acknowledgment", cmd);
    }
    assert_eq!(flow.pending_count(), 0);
    assert_eq!(flow.pending_chars(), 0);
}

#[tokio::test]
async fn test_ack_pops_in_order_and_reports_remaining() {
    let (flow, _sent, events) = fixture();

    flow.block_until_ready("G0 X0\n", "1").await;
    flow.block_until_ready("G1 X10\n", "2").await;

    flow.on_incoming_data("ok\r\nok\r\n");

    let events = events.lock().unwrap();
    let completions: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::Completion {
                kind,
                id,
                queue_length,
                command,
                ..
            } => Some((kind, id.as_str(), *queue_length, command.as_str())),
            _ => None,
        })
        .collect();

    // First ack pops the first command, leaving the second's 7 bytes
    assert_eq!(completions.len(), 2);
    assert_eq!(
        completions[0],
        (&CompletionKind::Complete, "1", 7, "G0 X0\n")
    );
    assert_eq!(
        completions[1],
        (&CompletionKind::Complete, "2", 0, "G1 X10\n")
    );

    // Both ok lines are still forwarded to listeners
    assert_eq!(line_count(&events), 2);
    assert_eq!(flow.pending_count(), 0);
}

#[tokio::test]
async fn test_error_response_completes_with_error_kind() {
    let (flow, _sent, events) = fixture();

    flow.block_until_ready("G0 X99999\n", "7").await;
    flow.on_incoming_data("error:22\r\n");

    let events = events.lock().unwrap();
    let kinds: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::Completion { kind, id, .. } => Some((*kind, id.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![(CompletionKind::Error, "7".to_string())]);
}

#[tokio::test]
async fn test_stray_ack_is_tolerated() {
    let (flow, _sent, events) = fixture();

    // No command pending; the ack is logged and forwarded but completes
    // nothing
    flow.on_incoming_data("ok\r\n");

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .all(|e| !matches!(e, DeviceEvent::Completion { .. })));
    assert_eq!(line_count(&events), 1);
    assert_eq!(flow.pending_count(), 0);
}

#[tokio::test]
async fn test_saturation_blocks_until_ack() {
    let (flow, _sent, _events) = fixture();

    // One oversized command saturates the 125-byte limit on its own
    let cmd = cmd_of_len(130);
    let producer = {
        let flow = flow.clone();
        let cmd = cmd.clone();
        tokio::spawn(async move { flow.block_until_ready(&cmd, "1").await })
    };

    wait_until_paused(&flow).await;
    assert_eq!(flow.pending_chars(), 130);
    assert!(!producer.is_finished());

    // The ack empties the ledger, which is back under the limit, so the
    // producer is released
    flow.on_incoming_data("ok\r\n");
    let admission = producer.await.unwrap();
    assert!(admission.admit);
    assert!(admission.await_ack);
    assert!(!flow.is_paused());
    assert_eq!(flow.pending_chars(), 0);
}

#[tokio::test]
async fn test_resume_waits_for_room() {
    let (flow, _sent, _events) = fixture();

    // 124 bytes stays under the 125 limit, the next 130 push to 254
    let first = flow.block_until_ready(&cmd_of_len(124), "1").await;
    assert!(first.admit);
    assert!(!flow.is_paused());

    let producer = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.block_until_ready(&cmd_of_len(130), "2").await })
    };
    wait_until_paused(&flow).await;

    // Popping 124 leaves 130, still at or over the limit: no release
    flow.on_incoming_data("ok\r\n");
    assert!(flow.is_paused());
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    assert!(!producer.is_finished());

    // Popping the rest leaves 0: released
    flow.on_incoming_data("ok\r\n");
    let admission = producer.await.unwrap();
    assert!(admission.admit);
    assert_eq!(flow.pending_chars(), 0);
}

#[tokio::test]
async fn test_pause_at_exact_capacity() {
    let (flow, _sent, _events) = fixture();

    // 60 bytes runs free; the next 65 land the total exactly on 125
    let first = flow.block_until_ready(&cmd_of_len(60), "1").await;
    assert!(first.admit);
    assert!(!flow.is_paused());

    let producer = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.block_until_ready(&cmd_of_len(65), "2").await })
    };
    wait_until_paused(&flow).await;
    assert_eq!(flow.pending_chars(), 125);
    assert!(!producer.is_finished());

    // Popping 60 leaves 65, under the limit: released
    flow.on_incoming_data("ok\r\n");
    let admission = producer.await.unwrap();
    assert!(admission.admit);
    assert!(admission.await_ack);
    assert!(!flow.is_paused());
    assert_eq!(flow.pending_chars(), 65);
}

#[tokio::test]
async fn test_release_requires_room_below_capacity() {
    let (flow, _sent, _events) = fixture();

    // 60 + 50 run free; the spawned 75 pushes the total to 185
    flow.block_until_ready(&cmd_of_len(60), "1").await;
    flow.block_until_ready(&cmd_of_len(50), "2").await;
    assert!(!flow.is_paused());

    let producer = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.block_until_ready(&cmd_of_len(75), "3").await })
    };
    wait_until_paused(&flow).await;

    // Popping 60 leaves exactly 125, which is not room: no release
    flow.on_incoming_data("ok\r\n");
    assert_eq!(flow.pending_chars(), 125);
    assert!(flow.is_paused());
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    assert!(!producer.is_finished());

    // Popping 50 leaves 75: released
    flow.on_incoming_data("ok\r\n");
    let admission = producer.await.unwrap();
    assert!(admission.admit);
    assert!(!flow.is_paused());
    assert_eq!(flow.pending_chars(), 75);
    assert_eq!(flow.pending_count(), 1);
}

#[tokio::test]
async fn test_wipe_releases_parked_producer_with_denial() {
    let (flow, _sent, events) = fixture_with_queued(3);

    let producer = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.block_until_ready(&cmd_of_len(130), "1").await })
    };
    wait_until_paused(&flow).await;

    // Operator wipe: the parked command must not be sent
    let produced = flow.break_apart_commands("%");
    assert!(produced.is_empty());

    let admission = producer.await.unwrap();
    assert!(!admission.admit);
    assert!(!admission.await_ack);
    assert_eq!(flow.pending_count(), 0);
    assert!(!flow.is_paused());

    // Listeners learn how many commands the transport owner still held
    let events = events.lock().unwrap();
    let wipes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::QueueWiped { queue_count, port } => {
                Some((*queue_count, port.as_str()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(wipes, vec![(3, "/dev/mock0")]);
}

#[tokio::test]
async fn test_reset_banner_wipes_state_and_clears_manual_hold() {
    let (flow, _sent, events) = fixture();

    flow.set_manual_paused(true);
    flow.block_until_ready("G0 X0\n", "1").await;
    assert_eq!(flow.pending_chars(), 6);

    flow.on_incoming_data("Grbl v1.1 ['$' for help]\r\n");

    // A reset invalidates pending commands and any pre-reset hold intent
    assert_eq!(flow.version(), "1.1");
    assert_eq!(flow.pending_count(), 0);
    assert!(!flow.is_manual_paused());
    assert!(!flow.is_paused());

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, DeviceEvent::QueueWiped { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        DeviceEvent::Line { data, .. } if data == "Grbl v1.1 ['$' for help]\n"
    )));
}

#[tokio::test]
async fn test_reset_banner_releases_parked_producer_with_admission() {
    let (flow, _sent, _events) = fixture();

    let producer = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.block_until_ready(&cmd_of_len(130), "1").await })
    };
    wait_until_paused(&flow).await;

    // The restarted device has a fresh, empty receive buffer, so the
    // parked command may be transmitted rather than dropped
    flow.on_incoming_data("Grbl v1.1 ['$' for help]\r\n");

    let admission = producer.await.unwrap();
    assert!(admission.admit);
    assert_eq!(flow.pending_count(), 0);
    assert!(!flow.is_paused());
}

#[tokio::test]
async fn test_manual_hold_masks_auto_resume() {
    let (flow, _sent, _events) = fixture();

    flow.set_manual_paused(true);
    let producer = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.block_until_ready(&cmd_of_len(130), "1").await })
    };
    wait_until_paused(&flow).await;

    // Room opens up, but the operator hold keeps admissions blocked
    flow.on_incoming_data("ok\r\n");
    assert!(flow.is_paused());
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    assert!(!producer.is_finished());

    // An explicit resume releases the producer; the latch itself stays
    // until cleared
    flow.unpause();
    let admission = producer.await.unwrap();
    assert!(admission.admit);
    assert!(flow.is_manual_paused());
    assert!(!flow.is_paused());
}

#[tokio::test]
async fn test_duplicate_status_reports_suppressed() {
    let (flow, _sent, events) = fixture();

    flow.on_incoming_data("<Idle|MPos:0.000,0.000,0.000>\r\n");
    flow.on_incoming_data("<Idle|MPos:0.000,0.000,0.000>\r\n");
    flow.on_incoming_data("<Run|MPos:1.000,0.000,0.000>\r\n");

    let events = events.lock().unwrap();
    // The repeated Idle report is dropped, the changed one goes through
    assert_eq!(line_count(&events), 2);
    drop(events);
    assert_eq!(flow.last_status(), "<Run|MPos:1.000,0.000,0.000>");
}

#[tokio::test]
async fn test_buffer_report_parsed_only_outside_status_lines() {
    let (flow, _sent, _events) = fixture();

    flow.on_incoming_data("Bf:14,87\r\n");
    assert_eq!(flow.available_buffer_space(), 87);

    // Inside an angle-bracket report the status branch consumes the line
    flow.on_incoming_data("<Idle|Bf:10,50>\r\n");
    assert_eq!(flow.available_buffer_space(), 87);
}

#[tokio::test]
async fn test_partial_lines_accumulate() {
    let (flow, _sent, events) = fixture();

    flow.block_until_ready("G0 X0\n", "1").await;

    flow.on_incoming_data("o");
    flow.on_incoming_data("k");
    assert_eq!(events.lock().unwrap().len(), 0);
    assert_eq!(flow.pending_count(), 1);

    flow.on_incoming_data("\r\n");
    assert_eq!(flow.pending_count(), 0);
    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, DeviceEvent::Completion { .. })));
}

#[tokio::test]
async fn test_break_apart_strips_and_filters() {
    let (flow, _sent, _events) = fixture();

    let block = "G0 X0 (rapid move)\nM3 S1000 ; spindle on\n?\n$10=115\n\nG1 X5";
    let produced = flow.break_apart_commands(block);

    // Comments and spaces are stripped, the report-verbosity write is
    // dropped, the real-time query keeps no newline
    assert_eq!(produced, vec!["G0X0\n", "M3S1000\n", "?", "G1X5\n"]);
}

#[tokio::test]
async fn test_break_apart_replays_version_and_status() {
    let (flow, _sent, events) = fixture();

    flow.on_incoming_data("Grbl v1.1 ['$' for help]\r\n");
    flow.on_incoming_data("<Idle|MPos:0.000,0.000,0.000>\r\n");
    let before = events.lock().unwrap().len();

    let produced = flow.break_apart_commands("*init*\n*status*");
    assert!(produced.is_empty());

    let events = events.lock().unwrap();
    let replayed: Vec<_> = events[before..]
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::Line { data, .. } => Some(data.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        replayed,
        vec!["1.1\n", "<Idle|MPos:0.000,0.000,0.000>\n"]
    );
}

#[tokio::test]
async fn test_close_releases_parked_producer() {
    let (flow, _sent, _events) = fixture();

    let producer = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.block_until_ready(&cmd_of_len(130), "1").await })
    };
    wait_until_paused(&flow).await;

    flow.close();

    let admission = producer.await.unwrap();
    assert!(!admission.admit);
    assert_eq!(flow.pending_count(), 0);
    assert!(!flow.is_paused());
}

#[tokio::test]
async fn test_poller_emits_periodic_queries() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let transport = Arc::new(MockTransport::new(sent.clone()));
    let sink = Arc::new(CollectingSink {
        events: events.clone(),
    });
    let config = FlowConfig {
        poll_interval: Duration::from_millis(10),
        ..FlowConfig::default()
    };
    let flow = GrblBufferFlow::new(transport, sink, config);

    flow.start_polling();
    tokio::time::sleep(Duration::from_millis(50)).await;
    flow.stop_polling();

    let after_stop = sent.lock().unwrap().len();
    assert!(after_stop >= 2, "expected repeated queries, got {}", after_stop);
    assert!(sent.lock().unwrap().iter().all(|s| s == "?"));

    // No further queries once stopped
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(sent.lock().unwrap().len(), after_stop);
}

// Transport whose writes always fail
struct FailingTransport;

impl Transport for FailingTransport {
    fn write(&self, _data: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "device unplugged",
        ))
    }

    fn port_name(&self) -> &str {
        "/dev/mock0"
    }

    fn queued_for_send(&self) -> usize {
        0
    }
}

#[tokio::test]
async fn test_poller_stops_after_write_failure() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::new(CollectingSink {
        events: events.clone(),
    });
    let config = FlowConfig {
        poll_interval: Duration::from_millis(10),
        ..FlowConfig::default()
    };
    let flow = GrblBufferFlow::new(Arc::new(FailingTransport), sink, config);

    flow.start_polling();

    // Poll for the failure notification to avoid timing races
    let mut attempts = 0;
    while events.lock().unwrap().is_empty() && attempts < 50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        attempts += 1;
    }

    // The first failed write reports the error and stops the loop
    tokio::time::sleep(Duration::from_millis(30)).await;
    let events = events.lock().unwrap();
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::TransportError { port, message } => {
                Some((port.as_str(), message.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "/dev/mock0");
    assert!(errors[0].1.contains("device unplugged"));
}
