//! Observable side effects of the controller

use tokio::sync::mpsc;
use uwb_proto::PhoneConfig;

use crate::{NegotiationError, SessionState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Distance(f32),
    Azimuth(f32),
}

/// Callbacks from the controller task. All methods default to no-ops.
pub trait SessionListener: Send + 'static {
    fn on_connect(&mut self, _peer_id: &str) {}

    fn on_disconnect(&mut self) {}

    fn on_state_changed(&mut self, _state: SessionState) {}

    /// Phone config has been sent to the device
    fn on_ranging_started(&mut self, _phone_config: &PhoneConfig) {}

    fn on_ranging_result(&mut self, _measurement: Measurement) {}

    fn on_ranging_error(&mut self, _reason: &str) {}

    /// The engine's result stream ended
    fn on_ranging_complete(&mut self) {}

    fn on_negotiation_failed(&mut self, _error: &NegotiationError) {}
}

/// Listener callbacks as values, for hosts that prefer a channel
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected(String),
    Disconnected,
    StateChanged(SessionState),
    RangingStarted(PhoneConfig),
    RangingResult(Measurement),
    RangingError(String),
    RangingComplete,
    NegotiationFailed(NegotiationError),
}

impl SessionListener for mpsc::UnboundedSender<SessionEvent> {
    fn on_connect(&mut self, peer_id: &str) {
        let _ = self.send(SessionEvent::Connected(peer_id.to_string()));
    }

    fn on_disconnect(&mut self) {
        let _ = self.send(SessionEvent::Disconnected);
    }

    fn on_state_changed(&mut self, state: SessionState) {
        let _ = self.send(SessionEvent::StateChanged(state));
    }

    fn on_ranging_started(&mut self, phone_config: &PhoneConfig) {
        let _ = self.send(SessionEvent::RangingStarted(*phone_config));
    }

    fn on_ranging_result(&mut self, measurement: Measurement) {
        let _ = self.send(SessionEvent::RangingResult(measurement));
    }

    fn on_ranging_error(&mut self, reason: &str) {
        let _ = self.send(SessionEvent::RangingError(reason.to_string()));
    }

    fn on_ranging_complete(&mut self) {
        let _ = self.send(SessionEvent::RangingComplete);
    }

    fn on_negotiation_failed(&mut self, error: &NegotiationError) {
        let _ = self.send(SessionEvent::NegotiationFailed(error.clone()));
    }
}
