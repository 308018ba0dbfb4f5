//! The ranging engine seam - whatever actually measures time of flight

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uwb_proto::{ProfileId, Role};

use crate::EngineError;

/// Short (2 byte) UWB MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UwbAddress(pub [u8; 2]);

impl fmt::Display for UwbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:02X}", self.0[0], self.0[1])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateRate {
    Automatic,
    #[default]
    Frequent,
    Infrequent,
}

impl UpdateRate {
    /// Nominal spacing between ranging rounds
    pub fn interval(self) -> Duration {
        match self {
            UpdateRate::Automatic => Duration::from_millis(240),
            UpdateRate::Frequent => Duration::from_millis(120),
            UpdateRate::Infrequent => Duration::from_millis(600),
        }
    }
}

/// Everything the engine needs to open a session with the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangingParams {
    pub role: Role,
    pub profile_id: ProfileId,
    pub session_id: u32,
    /// Matched against the vendor id in the device firmware
    pub session_key: Vec<u8>,
    pub channel: u8,
    pub preamble_index: u8,
    pub peer_address: UwbAddress,
    pub update_rate: UpdateRate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangingResult {
    /// Distance in meters
    Distance(f32),
    /// Azimuth angle of arrival in degrees
    Azimuth(f32),
    Failure(String),
}

/// Lazy, possibly infinite sequence of results. Dropping it unsubscribes.
pub type RangingStream = BoxStream<'static, RangingResult>;

#[async_trait]
pub trait RangingEngine: Send + Sync + 'static {
    /// Acquire a role-bound session scope and return its local address.
    ///
    /// May suspend for a long time. Never called on the controller task.
    async fn acquire_session(&self, role: Role) -> Result<UwbAddress, EngineError>;

    fn open_ranging_session(&self, params: RangingParams) -> Result<RangingStream, EngineError>;

    /// Release the scope and end any open result stream
    fn close(&self);
}
