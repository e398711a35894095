use super::*;
use crate::fragment::{Fragment, ProcessResult};
use crate::state::test_helpers;
use crate::transport::test_helpers::{TestPeer, channel_transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};

const REFERENCE_REQUEST: &str = r#"{"Frames": [{"Image":[1,2,3]}], "Extrinsics": [{"x":1.0}]}"#;
const SUCCESS: &str = r#"{"Status":"Success"}"#;
const FAILURE: &str = r#"{"Status":"Failure"}"#;

/// Fails fragments named "fail", sleeps on fragments named "slow".
struct ScriptedProcessor {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProcessor {
    fn new() -> Self {
        Self { in_flight: AtomicUsize::new(0), max_in_flight: AtomicUsize::new(0) }
    }
}

#[async_trait::async_trait]
impl FragmentProcessor for ScriptedProcessor {
    async fn process(&self, fragment: Fragment) -> ProcessResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = match fragment.model_name.as_deref() {
            Some("fail") => ProcessResult::failure(),
            Some("slow") => {
                sleep(Duration::from_millis(100)).await;
                ProcessResult::success()
            }
            _ => ProcessResult::success(),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Blocks inside `process` until released.
struct GatedProcessor {
    started: Notify,
    release: Notify,
}

#[async_trait::async_trait]
impl FragmentProcessor for GatedProcessor {
    async fn process(&self, _fragment: Fragment) -> ProcessResult {
        self.started.notify_one();
        self.release.notified().await;
        ProcessResult::success()
    }
}

fn spawn_handler(state: &AppState) -> (TestPeer, JoinHandle<CloseReason>) {
    let (transport, peer) = channel_transport();
    let handle = tokio::spawn(run(transport, state.clone(), None));
    (peer, handle)
}

async fn recv_reply(peer: &mut TestPeer) -> String {
    timeout(Duration::from_millis(500), peer.rx.recv())
        .await
        .expect("reply timed out")
        .expect("transport dropped")
}

async fn assert_no_reply(peer: &mut TestPeer) {
    assert!(
        timeout(Duration::from_millis(80), peer.rx.recv()).await.is_err(),
        "expected no reply"
    );
}

async fn finish(handle: JoinHandle<CloseReason>) -> CloseReason {
    timeout(Duration::from_millis(500), handle)
        .await
        .expect("handler did not terminate")
        .expect("handler panicked")
}

#[tokio::test]
async fn reference_request_gets_exactly_one_success() {
    let state = test_helpers::test_app_state();
    let (mut peer, handle) = spawn_handler(&state);

    peer.send(REFERENCE_REQUEST);

    assert_eq!(recv_reply(&mut peer).await, SUCCESS);
    assert_no_reply(&mut peer).await;

    peer.hang_up();
    assert_eq!(finish(handle).await, CloseReason::PeerClosed);
}

#[tokio::test]
async fn malformed_message_is_dropped_and_connection_stays_open() {
    let state = test_helpers::test_app_state();
    let (mut peer, handle) = spawn_handler(&state);

    peer.send(b"definitely not json".to_vec());
    assert_no_reply(&mut peer).await;
    assert!(!handle.is_finished());

    peer.send(REFERENCE_REQUEST);
    assert_eq!(recv_reply(&mut peer).await, SUCCESS);
    assert_no_reply(&mut peer).await;

    peer.hang_up();
    assert_eq!(finish(handle).await, CloseReason::PeerClosed);
}

#[tokio::test]
async fn schema_violation_is_dropped_without_reply() {
    let state = test_helpers::test_app_state();
    let (mut peer, handle) = spawn_handler(&state);

    peer.send(r#"{"Frames": [{"Image": [999]}]}"#);
    peer.send(r#"["not", "a", "record"]"#);
    assert_no_reply(&mut peer).await;

    peer.send("{}");
    assert_eq!(recv_reply(&mut peer).await, SUCCESS);

    peer.hang_up();
    finish(handle).await;
}

#[tokio::test]
async fn unexpected_extrinsic_shapes_still_get_success() {
    let state = test_helpers::test_app_state();
    let (mut peer, handle) = spawn_handler(&state);

    peer.send(r#"{"Frames": [{"Image": [1], "Dimensions": "640x480"}], "Extrinsics": [{"CameraPosition": {"x": 1.0}}]}"#);
    assert_eq!(recv_reply(&mut peer).await, SUCCESS);

    peer.send(r#"{"Frames": [], "Extrinsics": [[0.1, 0.2, 0.3], "pose", 7]}"#);
    assert_eq!(recv_reply(&mut peer).await, SUCCESS);

    peer.hang_up();
    assert_eq!(finish(handle).await, CloseReason::PeerClosed);
}

#[test]
fn only_idle_timeout_and_shutdown_send_close_frame() {
    assert!(CloseReason::IdleTimeout.sends_close_frame());
    assert!(CloseReason::Shutdown.sends_close_frame());
    assert!(!CloseReason::PeerClosed.sends_close_frame());
    assert!(!CloseReason::ReceiveFailed.sends_close_frame());
    assert!(!CloseReason::SendFailed.sends_close_frame());
}

#[tokio::test]
async fn replies_follow_receipt_order() {
    let processor = Arc::new(ScriptedProcessor::new());
    let state = test_helpers::test_app_state_with(processor.clone());
    let (mut peer, handle) = spawn_handler(&state);

    peer.send(r#"{"ModelName": "slow"}"#);
    peer.send(r#"{"ModelName": "fail"}"#);
    peer.send(r#"{"ModelName": "slow"}"#);
    peer.send(r#"{"ModelName": "fail"}"#);

    assert_eq!(recv_reply(&mut peer).await, SUCCESS);
    assert_eq!(recv_reply(&mut peer).await, FAILURE);
    assert_eq!(recv_reply(&mut peer).await, SUCCESS);
    assert_eq!(recv_reply(&mut peer).await, FAILURE);
    assert_eq!(processor.max_in_flight.load(Ordering::SeqCst), 1);

    peer.hang_up();
    finish(handle).await;
}

#[tokio::test]
async fn peer_close_unregisters_without_server_close() {
    let state = test_helpers::test_app_state();
    let (mut peer, handle) = spawn_handler(&state);

    peer.send(REFERENCE_REQUEST);
    recv_reply(&mut peer).await;
    assert_eq!(state.connections.len(), 1);
    assert_eq!(state.connections.snapshot()[0].fragments, 1);

    peer.hang_up();
    assert_eq!(finish(handle).await, CloseReason::PeerClosed);
    assert!(state.connections.is_empty());
    assert!(!peer.closed_by_server());
    assert!(peer.rx.recv().await.is_none(), "no sends after close");
}

#[tokio::test]
async fn failed_send_closes_connection() {
    let state = test_helpers::test_app_state();
    let (transport, mut peer) = channel_transport();
    peer.rx.close();

    let handle = tokio::spawn(run(transport, state.clone(), None));
    peer.send(REFERENCE_REQUEST);

    assert_eq!(finish(handle).await, CloseReason::SendFailed);
    assert!(state.connections.is_empty());
}

#[tokio::test]
async fn receive_error_closes_connection() {
    let state = test_helpers::test_app_state();
    let (peer, handle) = spawn_handler(&state);

    peer.inject(Err(TransportError::Closed));

    assert_eq!(finish(handle).await, CloseReason::ReceiveFailed);
    assert!(!peer.closed_by_server());
}

#[tokio::test]
async fn idle_timeout_closes_from_server_side() {
    let state = test_helpers::test_app_state();
    let (peer, handle) = spawn_handler(&state);

    peer.inject(Err(TransportError::Timeout(Duration::from_secs(1))));

    assert_eq!(finish(handle).await, CloseReason::IdleTimeout);
    assert!(peer.closed_by_server());
}

#[tokio::test]
async fn shutdown_closes_idle_connection() {
    let state = test_helpers::test_app_state();
    let (peer, handle) = spawn_handler(&state);

    sleep(Duration::from_millis(20)).await;
    state.shutdown.cancel();

    assert_eq!(finish(handle).await, CloseReason::Shutdown);
    assert!(peer.closed_by_server());
    assert!(state.connections.is_empty());
}

#[tokio::test]
async fn shutdown_lets_in_flight_fragment_finish() {
    let processor = Arc::new(GatedProcessor { started: Notify::new(), release: Notify::new() });
    let state = test_helpers::test_app_state_with(processor.clone());
    let (mut peer, handle) = spawn_handler(&state);

    peer.send(REFERENCE_REQUEST);
    timeout(Duration::from_millis(500), processor.started.notified())
        .await
        .expect("processing should start");

    state.shutdown.cancel();
    processor.release.notify_one();

    assert_eq!(recv_reply(&mut peer).await, SUCCESS);
    assert_eq!(finish(handle).await, CloseReason::Shutdown);
}

#[tokio::test]
async fn handle_message_returns_none_for_garbage() {
    let state = test_helpers::test_app_state();
    let reply = handle_message(state.processor.as_ref(), Uuid::new_v4(), b"\x00\x01").await;
    assert!(reply.is_none());
}

#[tokio::test]
async fn handle_message_records_history() {
    let state = test_helpers::test_app_state();
    let reply = handle_message(state.processor.as_ref(), Uuid::new_v4(), REFERENCE_REQUEST.as_bytes()).await;

    assert_eq!(reply.as_deref(), Some(SUCCESS));
    let history = state.history.expect("history enabled").snapshot();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].summary.frames, 1);
    assert_eq!(history[0].summary.image_bytes, 3);
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn extrinsic_lines_visible_under_default_filter() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let payload = r#"{"Frames": [], "Extrinsics": [{"CameraPosition": {"x": 1.0, "y": 2.0, "z": 3.0}}, [4, 5]]}"#;
    let reply = handle_message(&crate::processor::StubProcessor, Uuid::new_v4(), payload.as_bytes()).await;
    assert_eq!(reply.as_deref(), Some(SUCCESS));

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert_eq!(output.matches("ws: extrinsic").count(), 2, "log output: {output}");
    assert!(output.contains("[4,5]"), "log output: {output}");
}
