//! Session controller: sequences INITIALIZE -> DEVICE_CONFIG -> PHONE_CONFIG ->
//! DID_START -> ranging -> STOP / DID_STOP over one transport and one engine.
//!
//! The controller is a single task draining one FIFO inbox. Transport events,
//! API calls, engine acquisitions and ranging results all arrive through it,
//! so state is only ever touched from that task. Work that can suspend for a
//! long time (acquiring the engine's session scope, pulling ranging results)
//! runs on spawned tasks that post back into the inbox, tagged with the
//! generation they were started under.

use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uwb_proto::{
    select_profile_id, select_ranging_role, DeviceConfig, Message, PhoneConfig, ProfileId, Role,
    MSG_DEVICE_CONFIG,
};

use crate::{
    ConfigError, EngineError, Measurement, NegotiationError, RangingEngine, RangingParams,
    RangingResult, RangingStream, SessionConfig, SessionError, SessionListener, Transport,
    TransportError, TransportEvent, UwbAddress,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    AwaitingDeviceConfig,
    ConfiguringSession,
    RangingActive,
    Stopped,
}

/// The ranging session negotiated with the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub role: Role,
    pub profile_id: ProfileId,
    pub session_id: u32,
    pub channel: u8,
    pub preamble_index: u8,
    pub local_address: UwbAddress,
    pub peer_address: UwbAddress,
    pub session_key: Vec<u8>,
}

enum Inbox {
    Transport(TransportEvent),
    StartNegotiation(oneshot::Sender<Result<(), SessionError>>),
    StopRanging(oneshot::Sender<Result<(), SessionError>>),
    Reset,
    State(oneshot::Sender<SessionState>),
    SessionAcquired {
        generation: u64,
        result: Result<UwbAddress, EngineError>,
    },
    Ranging {
        generation: u64,
        result: RangingResult,
    },
    RangingEnded {
        generation: u64,
    },
}

/// Selection made from DEVICE_CONFIG while the engine scope is being acquired
struct Pending {
    device_config: DeviceConfig,
    role: Role,
    profile_id: ProfileId,
}

pub struct SessionController<T, E, L> {
    transport: T,
    engine: Arc<E>,
    listener: L,
    config: SessionConfig,
    session_key: Vec<u8>,
    state: SessionState,
    connected: bool,
    generation: u64,
    pending: Option<Pending>,
    session: Option<Session>,
    /// Engine scope acquired or being acquired; `close()` is owed
    engine_held: bool,
    subscription: Option<JoinHandle<()>>,
    inbox: mpsc::UnboundedReceiver<Inbox>,
    // Weak so the controller stops once every handle is gone
    inbox_tx: mpsc::WeakUnboundedSender<Inbox>,
}

/// Cheap, cloneable entry point into a running [`SessionController`]
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Inbox>,
}

impl<T, E, L> SessionController<T, E, L>
where
    T: Transport,
    E: RangingEngine,
    L: SessionListener,
{
    pub fn new(
        transport: T,
        engine: E,
        listener: L,
        config: SessionConfig,
    ) -> Result<(Self, SessionHandle), ConfigError> {
        let session_key = config.session_key_bytes()?;
        let (tx, inbox) = mpsc::unbounded_channel();

        let controller = Self {
            transport,
            engine: Arc::new(engine),
            listener,
            config,
            session_key,
            state: SessionState::Idle,
            connected: false,
            generation: 0,
            pending: None,
            session: None,
            engine_held: false,
            subscription: None,
            inbox,
            inbox_tx: tx.downgrade(),
        };

        Ok((controller, SessionHandle { tx }))
    }

    /// Process inbox messages until every [`SessionHandle`] is dropped
    pub async fn run(mut self) {
        debug!("session controller running");

        while let Some(msg) = self.inbox.recv().await {
            self.handle(msg).await;
        }

        self.release_engine();
        debug!("session controller stopped");
    }

    async fn handle(&mut self, msg: Inbox) {
        match msg {
            Inbox::Transport(TransportEvent::Connected { peer }) => self.on_connected(peer).await,
            Inbox::Transport(TransportEvent::Disconnected) => self.on_disconnected(),
            Inbox::Transport(TransportEvent::Received(data)) => self.on_frame(&data).await,
            Inbox::StartNegotiation(reply) => {
                let result = self.start_negotiation().await;
                let _ = reply.send(result);
            }
            Inbox::StopRanging(reply) => {
                let result = self.stop_ranging().await;
                let _ = reply.send(result);
            }
            Inbox::Reset => self.reset(),
            Inbox::State(reply) => {
                let _ = reply.send(self.state);
            }
            Inbox::SessionAcquired { generation, result } => {
                if generation == self.generation {
                    self.on_session_acquired(result).await;
                } else {
                    debug!("dropping session scope from generation {generation}");
                }
            }
            Inbox::Ranging { generation, result } => {
                if generation == self.generation {
                    self.on_ranging_result(result);
                }
            }
            Inbox::RangingEnded { generation } => {
                if generation == self.generation {
                    self.subscription = None;
                    info!("ranging results ended");
                    self.listener.on_ranging_complete();
                }
            }
        }
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    async fn on_connected(&mut self, peer: String) {
        info!("transport connected to {peer}");
        self.connected = true;
        self.listener.on_connect(&peer);

        if self.config.auto_start && self.state == SessionState::Idle {
            if let Err(e) = self.start_negotiation().await {
                warn!("could not start negotiation: {e}");
            }
        }
    }

    fn on_disconnected(&mut self) {
        info!("transport disconnected");
        self.connected = false;
        self.reset();
        self.listener.on_disconnect();
    }

    async fn on_frame(&mut self, data: &[u8]) {
        debug!("<- {}", data_encoding::HEXLOWER.encode(data));

        let msg = match Message::from_bytes(data) {
            Ok(msg) => msg,
            Err(e) if e.is_framing() => {
                warn!("discarding frame: {e}");
                return;
            }
            Err(e) => {
                if data.first() == Some(&MSG_DEVICE_CONFIG)
                    && self.state == SessionState::AwaitingDeviceConfig
                {
                    self.abort(NegotiationError::Format(e));
                } else {
                    warn!("discarding malformed frame in {:?}: {e}", self.state);
                }
                return;
            }
        };

        match msg {
            Message::DeviceConfig(device_config) => self.on_device_config(device_config),
            Message::DidStart => self.on_device_started(),
            Message::DidStop => self.on_device_stopped(),
            other => warn!("ignoring {} sent by the device", other.name()),
        }
    }

    // =========================================================================
    // Negotiation
    // =========================================================================

    async fn start_negotiation(&mut self) -> Result<(), SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        if self.state != SessionState::Idle {
            return Err(SessionError::Busy(self.state));
        }

        self.send(&Message::Initialize).await?;
        self.set_state(SessionState::AwaitingDeviceConfig);
        Ok(())
    }

    fn on_device_config(&mut self, device_config: DeviceConfig) {
        if self.state != SessionState::AwaitingDeviceConfig {
            warn!("DEVICE_CONFIG in {:?}, ignoring", self.state);
            return;
        }

        let roles = device_config.supported_ranging_roles;
        let role = select_ranging_role(roles);
        debug!("device ranging roles 0x{roles:02x}, selected {role:?}");
        if !role.is_supported() {
            self.abort(NegotiationError::UnsupportedRole(roles));
            return;
        }

        let profiles = device_config.supported_profile_ids;
        let profile_id = select_profile_id(profiles);
        debug!("device profile ids 0x{profiles:08x}, selected {profile_id:?}");
        if !profile_id.is_supported() {
            self.abort(NegotiationError::UnsupportedProfile(profiles));
            return;
        }

        self.pending = Some(Pending {
            device_config,
            role,
            profile_id,
        });
        self.engine_held = true;
        self.set_state(SessionState::ConfiguringSession);

        // Acquiring the scope can block for a long time; keep it off this task
        let engine = Arc::clone(&self.engine);
        let inbox = self.inbox_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = engine.acquire_session(role).await;
            if let Some(tx) = inbox.upgrade() {
                let _ = tx.send(Inbox::SessionAcquired { generation, result });
            }
        });
    }

    async fn on_session_acquired(&mut self, result: Result<UwbAddress, EngineError>) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        let local_address = match result {
            Ok(address) => address,
            Err(e) => {
                self.abort(e.into());
                return;
            }
        };

        let session = Session {
            role: pending.role,
            profile_id: pending.profile_id,
            session_id: rand::random(),
            channel: self.config.channel,
            preamble_index: self.config.preamble_index,
            local_address,
            peer_address: UwbAddress(pending.device_config.device_mac_address),
            session_key: self.session_key.clone(),
        };
        info!(
            "session 0x{:08x}: {:?}, {:?}, local {}, peer {}",
            session.session_id,
            session.role,
            session.profile_id,
            session.local_address,
            session.peer_address
        );

        let params = RangingParams {
            role: session.role,
            profile_id: session.profile_id,
            session_id: session.session_id,
            session_key: session.session_key.clone(),
            channel: session.channel,
            preamble_index: session.preamble_index,
            peer_address: session.peer_address,
            update_rate: self.config.update_rate,
        };
        let results = match self.engine.open_ranging_session(params) {
            Ok(results) => results,
            Err(e) => {
                self.abort(e.into());
                return;
            }
        };
        self.subscription = Some(self.spawn_result_pump(results));

        let phone_config = PhoneConfig {
            spec_ver_major: self.config.spec_ver_major,
            spec_ver_minor: self.config.spec_ver_minor,
            session_id: session.session_id,
            preamble_id: session.preamble_index,
            channel: session.channel,
            profile_id: session.profile_id.as_u8(),
            ranging_role: session.role.as_u8(),
            phone_mac_address: session.local_address.0,
        };
        if let Err(e) = self.send(&Message::PhoneConfig(phone_config)).await {
            self.abort(e.into());
            return;
        }

        self.session = Some(session);
        self.listener.on_ranging_started(&phone_config);
    }

    fn spawn_result_pump(&self, mut results: RangingStream) -> JoinHandle<()> {
        let inbox = self.inbox_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            while let Some(result) = results.next().await {
                let Some(tx) = inbox.upgrade() else {
                    return;
                };
                if tx.send(Inbox::Ranging { generation, result }).is_err() {
                    return;
                }
            }
            if let Some(tx) = inbox.upgrade() {
                let _ = tx.send(Inbox::RangingEnded { generation });
            }
        })
    }

    // =========================================================================
    // Ranging
    // =========================================================================

    fn on_device_started(&mut self) {
        if self.state != SessionState::ConfiguringSession || self.session.is_none() {
            warn!("DID_START in {:?}, ignoring", self.state);
            return;
        }
        self.set_state(SessionState::RangingActive);
    }

    fn on_device_stopped(&mut self) {
        if self.state != SessionState::RangingActive {
            warn!("DID_STOP in {:?}, ignoring", self.state);
            return;
        }
        self.release_engine();
        self.set_state(SessionState::Stopped);
    }

    fn on_ranging_result(&mut self, result: RangingResult) {
        match result {
            RangingResult::Failure(reason) => {
                warn!("ranging error: {reason}");
                self.listener.on_ranging_error(&reason);
            }
            _ if self.state != SessionState::RangingActive => {
                debug!("dropping ranging result in {:?}", self.state);
            }
            RangingResult::Distance(meters) => {
                debug!("distance {meters:.2} m");
                self.listener.on_ranging_result(Measurement::Distance(meters));
            }
            RangingResult::Azimuth(degrees) => {
                debug!("azimuth {degrees:.1} deg");
                self.listener.on_ranging_result(Measurement::Azimuth(degrees));
            }
        }
    }

    async fn stop_ranging(&mut self) -> Result<(), SessionError> {
        let negotiating = matches!(
            self.state,
            SessionState::AwaitingDeviceConfig | SessionState::ConfiguringSession
        );

        if self.state == SessionState::RangingActive || (negotiating && self.session.is_some()) {
            // The device has our PHONE_CONFIG, tell it to stop
            self.release_engine();
            self.set_state(SessionState::Stopped);
            self.send(&Message::Stop).await?;
        } else if negotiating {
            info!("stop requested during negotiation, cancelling");
            self.reset();
        } else {
            self.release_engine();
        }
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    fn abort(&mut self, err: NegotiationError) {
        error!("negotiation failed: {err}");
        self.reset();
        self.listener.on_negotiation_failed(&err);
    }

    /// Back to Idle, dropping the session and anything the engine holds
    fn reset(&mut self) {
        self.release_engine();
        self.pending = None;
        self.session = None;
        self.set_state(SessionState::Idle);
    }

    /// Idempotent: the engine is closed at most once per acquisition
    fn release_engine(&mut self) {
        let released = self.subscription.is_some() || self.engine_held;

        if let Some(subscription) = self.subscription.take() {
            subscription.abort();
        }
        if self.engine_held {
            self.engine_held = false;
            self.engine.close();
            debug!("ranging engine released");
        }
        if released {
            // Anything still in flight belongs to the released session
            self.generation += 1;
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("{:?} -> {:?}", self.state, state);
            self.state = state;
            self.listener.on_state_changed(state);
        }
    }

    async fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        let bytes = msg.to_bytes();
        debug!("-> {} {}", msg.name(), data_encoding::HEXLOWER.encode(&bytes));
        self.transport.send(&bytes).await
    }
}

impl SessionHandle {
    fn post(&self, msg: Inbox) -> Result<(), SessionError> {
        self.tx.send(msg).map_err(|_| SessionError::Closed)
    }

    /// Send INITIALIZE. Only valid while connected and Idle.
    pub async fn start_negotiation(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.post(Inbox::StartNegotiation(reply))?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Send STOP if a session was configured, and release the engine either way
    pub async fn stop_ranging(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.post(Inbox::StopRanging(reply))?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub fn reset(&self) -> Result<(), SessionError> {
        self.post(Inbox::Reset)
    }

    /// Current state, after everything posted before this call was handled
    pub async fn state(&self) -> Result<SessionState, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.post(Inbox::State(reply))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub fn transport_event(&self, event: TransportEvent) -> Result<(), SessionError> {
        self.post(Inbox::Transport(event))
    }

    pub fn on_receive(&self, data: Vec<u8>) -> Result<(), SessionError> {
        self.transport_event(TransportEvent::Received(data))
    }

    /// Feed a transport's event channel into the controller until either side closes
    pub fn forward_transport_events(
        &self,
        mut events: mpsc::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if handle.transport_event(event).is_err() {
                    break;
                }
            }
        })
    }
}
