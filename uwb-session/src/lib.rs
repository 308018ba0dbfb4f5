//! UWB Session - drives the out-of-band negotiation with a ranging peripheral
//!
//! The [`SessionController`] sits between two collaborators it does not own
//! the internals of: a [`Transport`] that moves OoB frames to and from the
//! peripheral, and a [`RangingEngine`] that measures distance and angle once
//! both sides agree on session parameters.
//!
//! # Example
//!
//! ```ignore
//! use uwb_session::{SessionConfig, SessionController, SimulatedEngine};
//!
//! let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
//! let (controller, handle) =
//!     SessionController::new(transport, SimulatedEngine::default(), events_tx, SessionConfig::default())?;
//! tokio::spawn(controller.run());
//!
//! handle.forward_transport_events(transport_events);
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

mod config;
mod controller;
mod engine;
mod error;
mod listener;
mod sim;
mod transport;

pub use config::{ranger_home, SessionConfig};
pub use controller::{Session, SessionController, SessionHandle, SessionState};
pub use engine::{RangingEngine, RangingParams, RangingResult, RangingStream, UpdateRate, UwbAddress};
pub use error::{ConfigError, EngineError, NegotiationError, SessionError, TransportError};
pub use listener::{Measurement, SessionEvent, SessionListener};
pub use sim::SimulatedEngine;
pub use transport::{Transport, TransportEvent};

// Re-export the wire types hosts need to interpret events
pub use uwb_proto::{DeviceConfig, PhoneConfig, ProfileId, Role};
