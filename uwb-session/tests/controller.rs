//! Session controller driven through in-memory transport and engine doubles

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use uwb_proto::{DeviceConfig, Message, PhoneConfig, ProtoError, MSG_PHONE_CONFIG};
use uwb_session::{
    EngineError, Measurement, NegotiationError, RangingEngine, RangingParams, RangingResult,
    RangingStream, Role, SessionConfig, SessionController, SessionError, SessionEvent,
    SessionHandle, SessionState, Transport, TransportError, TransportEvent, UwbAddress,
};

const LOCAL_ADDRESS: [u8; 2] = [0x12, 0x34];
const WAIT: Duration = Duration::from_secs(2);

// =========================================================================
// Doubles
// =========================================================================

struct MockTransport {
    sent: mpsc::UnboundedSender<Vec<u8>>,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Link("write failed".to_string()));
        }
        let _ = self.sent.send(frame.to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct EngineProbe {
    acquired: AtomicUsize,
    closed: AtomicUsize,
    fail_acquire: AtomicBool,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    params: Mutex<Option<RangingParams>>,
    results: Mutex<Option<futures::channel::mpsc::UnboundedSender<RangingResult>>>,
}

impl EngineProbe {
    fn push(&self, result: RangingResult) {
        let results = self.results.lock().unwrap();
        results.as_ref().expect("no ranging session open").unbounded_send(result).unwrap();
    }

    fn end_stream(&self) {
        self.results.lock().unwrap().take();
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockEngine(Arc<EngineProbe>);

#[async_trait]
impl RangingEngine for MockEngine {
    async fn acquire_session(&self, _role: Role) -> Result<UwbAddress, EngineError> {
        self.0.acquired.fetch_add(1, Ordering::SeqCst);
        let gate = self.0.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.0.fail_acquire.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("radio off".to_string()));
        }
        Ok(UwbAddress(LOCAL_ADDRESS))
    }

    fn open_ranging_session(&self, params: RangingParams) -> Result<RangingStream, EngineError> {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        *self.0.params.lock().unwrap() = Some(params);
        *self.0.results.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }

    fn close(&self) {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
        self.0.results.lock().unwrap().take();
    }
}

struct Harness {
    handle: SessionHandle,
    sent: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    engine: Arc<EngineProbe>,
    transport_fail: Arc<AtomicBool>,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let engine = Arc::new(EngineProbe::default());
        let transport_fail = Arc::new(AtomicBool::new(false));

        let transport = MockTransport {
            sent: sent_tx,
            fail: Arc::clone(&transport_fail),
        };
        let (controller, handle) =
            SessionController::new(transport, MockEngine(Arc::clone(&engine)), events_tx, config)
                .unwrap();
        tokio::spawn(controller.run());

        Self {
            handle,
            sent,
            events,
            engine,
            transport_fail,
        }
    }

    fn manual() -> Self {
        Self::new(SessionConfig {
            auto_start: false,
            ..Default::default()
        })
    }

    async fn next_sent(&mut self) -> Vec<u8> {
        timeout(WAIT, self.sent.recv()).await.expect("nothing sent").unwrap()
    }

    /// Skip events until one matches
    async fn expect_event(&mut self, want: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        loop {
            let event = timeout(WAIT, self.events.recv())
                .await
                .expect("timed out waiting for event")
                .unwrap();
            if want(&event) {
                return event;
            }
        }
    }

    async fn state(&self) -> SessionState {
        self.handle.state().await.unwrap()
    }

    fn connect(&self) {
        self.handle
            .transport_event(TransportEvent::Connected {
                peer: "UWB-Shield".to_string(),
            })
            .unwrap();
    }

    fn receive(&self, msg: Message) {
        self.handle.on_receive(msg.to_bytes()).unwrap();
    }

    /// Connected, INITIALIZE sent
    async fn awaiting_device_config(&mut self) {
        self.connect();
        self.handle.start_negotiation().await.unwrap();
        assert_eq!(self.next_sent().await, vec![0xA5]);
    }

    /// PHONE_CONFIG sent
    async fn configured(&mut self) -> PhoneConfig {
        self.awaiting_device_config().await;
        self.receive(Message::DeviceConfig(device_config(0x01, 0b10)));
        let frame = self.next_sent().await;
        assert_eq!(frame[0], MSG_PHONE_CONFIG);
        PhoneConfig::from_bytes(&frame[1..]).unwrap()
    }

    async fn ranging(&mut self) -> PhoneConfig {
        let phone_config = self.configured().await;
        self.receive(Message::DidStart);
        assert_eq!(self.state().await, SessionState::RangingActive);
        phone_config
    }
}

fn device_config(roles: u8, profiles: u32) -> DeviceConfig {
    DeviceConfig {
        spec_ver_major: 0x0100,
        spec_ver_minor: 0x0000,
        chip_id: [0x40, 0x01],
        chip_fw_version: [0x01, 0x00],
        mw_version: [0x01, 0x02, 0x00],
        supported_profile_ids: profiles,
        supported_ranging_roles: roles,
        device_mac_address: [0xAA, 0xBB],
    }
}

// =========================================================================
// Negotiation
// =========================================================================

#[tokio::test]
async fn connect_sends_initialize_when_auto_start() {
    let mut h = Harness::new(SessionConfig::default());
    h.connect();

    assert_eq!(
        h.expect_event(|e| matches!(e, SessionEvent::Connected(_))).await,
        SessionEvent::Connected("UWB-Shield".to_string())
    );
    assert_eq!(h.next_sent().await, vec![0xA5]);
    assert_eq!(h.state().await, SessionState::AwaitingDeviceConfig);
}

#[tokio::test]
async fn device_config_yields_one_phone_config() {
    let mut h = Harness::manual();
    h.awaiting_device_config().await;

    let mut raw = vec![0x01];
    raw.extend_from_slice(&device_config(0x01, 0b10).to_bytes());
    assert_eq!(raw.len(), 19);
    h.handle.on_receive(raw).unwrap();

    let frame = h.next_sent().await;
    assert_eq!(frame.len(), 15);
    assert_eq!(frame[0], 0x0B);
    let phone_config = PhoneConfig::from_bytes(&frame[1..]).unwrap();
    assert_eq!(phone_config.spec_ver_major, 0x0100);
    assert_eq!(phone_config.spec_ver_minor, 0x0000);
    assert_eq!(phone_config.channel, 9);
    assert_eq!(phone_config.preamble_id, 10);
    assert_eq!(phone_config.profile_id, 1);
    assert_eq!(phone_config.ranging_role, Role::Controlee.as_u8());
    assert_eq!(phone_config.phone_mac_address, LOCAL_ADDRESS);

    // The engine session and the listener both see the generated session id
    let params = h.engine.params.lock().unwrap().clone().unwrap();
    assert_eq!(params.session_id, phone_config.session_id);
    assert_eq!(params.peer_address, UwbAddress([0xAA, 0xBB]));
    assert_eq!(params.role, Role::Controlee);
    assert_eq!(params.session_key, vec![0x08, 0x07, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    assert_eq!(
        h.expect_event(|e| matches!(e, SessionEvent::RangingStarted(_))).await,
        SessionEvent::RangingStarted(phone_config)
    );

    assert_eq!(h.state().await, SessionState::ConfiguringSession);
    assert!(h.sent.try_recv().is_err());
    assert_eq!(h.engine.acquired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn controller_role_when_only_bit_one_is_set() {
    let mut h = Harness::manual();
    h.awaiting_device_config().await;
    h.receive(Message::DeviceConfig(device_config(0b10, 0b10)));

    let frame = h.next_sent().await;
    let phone_config = PhoneConfig::from_bytes(&frame[1..]).unwrap();
    assert_eq!(phone_config.ranging_role, Role::Controller.as_u8());
}

#[tokio::test]
async fn unsupported_role_fails_negotiation() {
    let mut h = Harness::manual();
    h.awaiting_device_config().await;
    h.receive(Message::DeviceConfig(device_config(0x00, 0b10)));

    assert_eq!(
        h.expect_event(|e| matches!(e, SessionEvent::NegotiationFailed(_))).await,
        SessionEvent::NegotiationFailed(NegotiationError::UnsupportedRole(0))
    );
    assert_eq!(h.state().await, SessionState::Idle);
    assert!(h.sent.try_recv().is_err());
    assert_eq!(h.engine.acquired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsupported_profile_fails_negotiation() {
    let mut h = Harness::manual();
    h.awaiting_device_config().await;
    h.receive(Message::DeviceConfig(device_config(0x01, 0b01)));

    assert_eq!(
        h.expect_event(|e| matches!(e, SessionEvent::NegotiationFailed(_))).await,
        SessionEvent::NegotiationFailed(NegotiationError::UnsupportedProfile(0b01))
    );
    assert_eq!(h.state().await, SessionState::Idle);
    assert!(h.sent.try_recv().is_err());
}

#[tokio::test]
async fn short_device_config_fails_negotiation() {
    let mut h = Harness::manual();
    h.awaiting_device_config().await;

    let mut raw = Message::DeviceConfig(device_config(0x01, 0b10)).to_bytes();
    raw.truncate(10);
    h.handle.on_receive(raw).unwrap();

    assert_eq!(
        h.expect_event(|e| matches!(e, SessionEvent::NegotiationFailed(_))).await,
        SessionEvent::NegotiationFailed(NegotiationError::Format(ProtoError::Format {
            record: "DeviceConfig",
            expected: 18,
            actual: 9,
        }))
    );
    assert_eq!(h.state().await, SessionState::Idle);

    // Recoverable: the caller may try again
    h.handle.start_negotiation().await.unwrap();
    assert_eq!(h.next_sent().await, vec![0xA5]);
}

#[tokio::test]
async fn engine_acquisition_failure_fails_negotiation() {
    let mut h = Harness::manual();
    h.engine.fail_acquire.store(true, Ordering::SeqCst);
    h.awaiting_device_config().await;
    h.receive(Message::DeviceConfig(device_config(0x01, 0b10)));

    assert_eq!(
        h.expect_event(|e| matches!(e, SessionEvent::NegotiationFailed(_))).await,
        SessionEvent::NegotiationFailed(NegotiationError::Engine(EngineError::Unavailable(
            "radio off".to_string()
        )))
    );
    assert_eq!(h.state().await, SessionState::Idle);
    assert_eq!(h.engine.closed(), 1);
    assert!(h.sent.try_recv().is_err());
}

#[tokio::test]
async fn framing_errors_are_discarded() {
    let mut h = Harness::manual();
    h.awaiting_device_config().await;

    h.handle.on_receive(vec![]).unwrap();
    h.handle.on_receive(vec![0x7F, 0x01]).unwrap();
    assert_eq!(h.state().await, SessionState::AwaitingDeviceConfig);

    h.receive(Message::DeviceConfig(device_config(0x01, 0b10)));
    assert_eq!(h.next_sent().await[0], MSG_PHONE_CONFIG);
}

#[tokio::test]
async fn start_negotiation_preconditions() {
    let mut h = Harness::manual();
    assert_eq!(h.handle.start_negotiation().await, Err(SessionError::NotConnected));

    h.awaiting_device_config().await;
    assert_eq!(
        h.handle.start_negotiation().await,
        Err(SessionError::Busy(SessionState::AwaitingDeviceConfig))
    );
    assert!(h.sent.try_recv().is_err());
}

#[tokio::test]
async fn failed_initialize_write_stays_idle() {
    let mut h = Harness::manual();
    h.connect();
    h.transport_fail.store(true, Ordering::SeqCst);

    assert!(matches!(
        h.handle.start_negotiation().await,
        Err(SessionError::Transport(TransportError::Link(_)))
    ));
    assert_eq!(h.state().await, SessionState::Idle);
    assert!(h.sent.try_recv().is_err());
}

// =========================================================================
// Ranging
// =========================================================================

#[tokio::test]
async fn results_are_forwarded_while_active() {
    let mut h = Harness::manual();
    h.ranging().await;

    h.engine.push(RangingResult::Distance(1.25));
    h.engine.push(RangingResult::Azimuth(-12.5));
    h.engine.push(RangingResult::Failure("no response".to_string()));

    assert_eq!(
        h.expect_event(|e| matches!(e, SessionEvent::RangingResult(_))).await,
        SessionEvent::RangingResult(Measurement::Distance(1.25))
    );
    assert_eq!(
        h.expect_event(|e| matches!(e, SessionEvent::RangingResult(_))).await,
        SessionEvent::RangingResult(Measurement::Azimuth(-12.5))
    );
    assert_eq!(
        h.expect_event(|e| matches!(e, SessionEvent::RangingError(_))).await,
        SessionEvent::RangingError("no response".to_string())
    );
    assert_eq!(h.state().await, SessionState::RangingActive);
}

#[tokio::test]
async fn measurements_before_did_start_are_dropped() {
    let mut h = Harness::manual();
    h.configured().await;

    h.engine.push(RangingResult::Distance(9.0));
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.receive(Message::DidStart);
    assert_eq!(h.state().await, SessionState::RangingActive);
    h.engine.push(RangingResult::Distance(1.0));

    assert_eq!(
        h.expect_event(|e| matches!(e, SessionEvent::RangingResult(_))).await,
        SessionEvent::RangingResult(Measurement::Distance(1.0))
    );
}

#[tokio::test]
async fn end_of_results_reports_complete() {
    let mut h = Harness::manual();
    h.ranging().await;

    h.engine.end_stream();
    h.expect_event(|e| *e == SessionEvent::RangingComplete).await;
    assert_eq!(h.state().await, SessionState::RangingActive);
}

#[tokio::test]
async fn out_of_order_acks_are_ignored() {
    let mut h = Harness::manual();
    h.receive(Message::DidStart);
    h.receive(Message::DidStop);
    assert_eq!(h.state().await, SessionState::Idle);

    h.awaiting_device_config().await;
    h.receive(Message::DidStart);
    assert_eq!(h.state().await, SessionState::AwaitingDeviceConfig);

    h.receive(Message::DeviceConfig(device_config(0x01, 0b10)));
    h.next_sent().await;
    h.receive(Message::DidStop);
    assert_eq!(h.state().await, SessionState::ConfiguringSession);
    assert_eq!(h.engine.closed(), 0);
}

// =========================================================================
// Stopping and teardown
// =========================================================================

#[tokio::test]
async fn stop_ranging_sends_stop_and_releases_once() {
    let mut h = Harness::manual();
    h.ranging().await;

    h.handle.stop_ranging().await.unwrap();
    assert_eq!(h.next_sent().await, vec![0x0C]);
    assert_eq!(h.state().await, SessionState::Stopped);
    assert_eq!(h.engine.closed(), 1);

    h.handle.stop_ranging().await.unwrap();
    assert_eq!(h.engine.closed(), 1);
    assert!(h.sent.try_recv().is_err());

    h.handle.reset().unwrap();
    assert_eq!(h.state().await, SessionState::Idle);
    assert_eq!(h.engine.closed(), 1);
}

#[tokio::test]
async fn device_did_stop_releases_engine() {
    let mut h = Harness::manual();
    h.ranging().await;

    h.receive(Message::DidStop);
    assert_eq!(h.state().await, SessionState::Stopped);
    assert_eq!(h.engine.closed(), 1);
    assert!(h.sent.try_recv().is_err());

    h.engine.end_stream();
    h.handle.stop_ranging().await.unwrap();
    assert_eq!(h.engine.closed(), 1);
}

#[tokio::test]
async fn stop_during_negotiation_cancels() {
    let mut h = Harness::manual();
    h.awaiting_device_config().await;

    h.handle.stop_ranging().await.unwrap();
    assert_eq!(h.state().await, SessionState::Idle);
    assert!(h.sent.try_recv().is_err());
    assert_eq!(h.engine.closed(), 0);
}

#[tokio::test]
async fn disconnect_from_every_state_returns_to_idle() {
    for target in [
        SessionState::Idle,
        SessionState::AwaitingDeviceConfig,
        SessionState::ConfiguringSession,
        SessionState::RangingActive,
        SessionState::Stopped,
    ] {
        let mut h = Harness::manual();
        match target {
            SessionState::Idle => h.connect(),
            SessionState::AwaitingDeviceConfig => h.awaiting_device_config().await,
            SessionState::ConfiguringSession => {
                h.configured().await;
            }
            SessionState::RangingActive => {
                h.ranging().await;
            }
            SessionState::Stopped => {
                h.ranging().await;
                h.receive(Message::DidStop);
            }
        }
        assert_eq!(h.state().await, target);
        let closed_before = h.engine.closed();

        h.handle.transport_event(TransportEvent::Disconnected).unwrap();
        h.handle.transport_event(TransportEvent::Disconnected).unwrap();

        assert_eq!(h.state().await, SessionState::Idle, "from {target:?}");
        h.expect_event(|e| *e == SessionEvent::Disconnected).await;

        let expected = match target {
            SessionState::ConfiguringSession | SessionState::RangingActive => 1,
            _ => 0,
        };
        assert_eq!(h.engine.closed() - closed_before, expected, "from {target:?}");
        assert!(h.engine.closed() <= 1, "from {target:?}");

        // Nothing works until the link is back
        assert_eq!(h.handle.start_negotiation().await, Err(SessionError::NotConnected));
    }
}

#[tokio::test]
async fn disconnect_while_acquiring_drops_the_late_scope() {
    let mut h = Harness::manual();
    let (release, gate) = oneshot::channel();
    *h.engine.gate.lock().unwrap() = Some(gate);

    h.awaiting_device_config().await;
    h.receive(Message::DeviceConfig(device_config(0x01, 0b10)));
    assert_eq!(h.state().await, SessionState::ConfiguringSession);

    h.handle.transport_event(TransportEvent::Disconnected).unwrap();
    assert_eq!(h.state().await, SessionState::Idle);
    assert_eq!(h.engine.closed(), 1);

    release.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.state().await, SessionState::Idle);
    assert!(h.sent.try_recv().is_err());
    assert!(h.engine.params.lock().unwrap().is_none());
    assert_eq!(h.engine.closed(), 1);
}

#[tokio::test]
async fn reconnect_allows_a_new_session() {
    let mut h = Harness::new(SessionConfig::default());
    h.connect();
    assert_eq!(h.next_sent().await, vec![0xA5]);
    h.receive(Message::DeviceConfig(device_config(0x01, 0b10)));
    let first = PhoneConfig::from_bytes(&h.next_sent().await[1..]).unwrap();

    h.handle.transport_event(TransportEvent::Disconnected).unwrap();
    h.connect();
    assert_eq!(h.next_sent().await, vec![0xA5]);
    h.receive(Message::DeviceConfig(device_config(0x01, 0b10)));
    let second = PhoneConfig::from_bytes(&h.next_sent().await[1..]).unwrap();

    assert_eq!(second.phone_mac_address, first.phone_mac_address);
    assert_eq!(h.engine.acquired.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn controller_stops_when_handles_drop() {
    let (sent_tx, _sent) = mpsc::unbounded_channel::<Vec<u8>>();
    let (events_tx, _events) = mpsc::unbounded_channel::<SessionEvent>();
    let transport = MockTransport {
        sent: sent_tx,
        fail: Arc::new(AtomicBool::new(false)),
    };
    let engine = Arc::new(EngineProbe::default());
    let (controller, handle) = SessionController::new(
        transport,
        MockEngine(Arc::clone(&engine)),
        events_tx,
        SessionConfig::default(),
    )
    .unwrap();
    let task = tokio::spawn(controller.run());

    drop(handle);
    timeout(WAIT, task).await.expect("controller kept running").unwrap();
}

#[tokio::test]
async fn invalid_session_key_is_rejected_up_front() {
    let (sent_tx, _sent) = mpsc::unbounded_channel::<Vec<u8>>();
    let (events_tx, _events) = mpsc::unbounded_channel::<SessionEvent>();
    let transport = MockTransport {
        sent: sent_tx,
        fail: Arc::new(AtomicBool::new(false)),
    };
    let config = SessionConfig {
        session_key: "not hex".to_string(),
        ..Default::default()
    };
    let result = SessionController::new(
        transport,
        MockEngine(Arc::new(EngineProbe::default())),
        events_tx,
        config,
    );
    assert!(result.is_err());
}
