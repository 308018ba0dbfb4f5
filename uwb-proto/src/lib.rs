//! UWB out-of-band wire protocol - message ids, framing and session parameters
//!
//! Every message is a single id byte followed by an optional payload. The
//! transport is message oriented (one BLE write or notification per frame),
//! so there is no length prefix.

pub mod ble;
mod config;
mod select;

pub use config::{DeviceConfig, PhoneConfig, DEVICE_CONFIG_LEN, PHONE_CONFIG_LEN};
pub use select::{select_profile_id, select_ranging_role, ProfileId, Role};

// Messages from the UWB device
pub const MSG_DEVICE_CONFIG: u8 = 0x01;
pub const MSG_DID_START: u8 = 0x02;
pub const MSG_DID_STOP: u8 = 0x03;

// Messages from the phone
pub const MSG_INITIALIZE: u8 = 0xA5;
pub const MSG_PHONE_CONFIG: u8 = 0x0B;
pub const MSG_STOP: u8 = 0x0C;

/// All catalogued message ids
pub const MESSAGE_IDS: [u8; 6] = [
    MSG_INITIALIZE,
    MSG_DEVICE_CONFIG,
    MSG_PHONE_CONFIG,
    MSG_DID_START,
    MSG_DID_STOP,
    MSG_STOP,
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    #[error("empty frame")]
    Empty,

    #[error("unknown message id 0x{0:02x}")]
    UnknownMessage(u8),

    #[error("{record} must be {expected} bytes, got {actual}")]
    Format {
        record: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl ProtoError {
    /// Framing errors are discarded by the receiver; format errors abort negotiation
    pub fn is_framing(&self) -> bool {
        matches!(self, ProtoError::Empty | ProtoError::UnknownMessage(_))
    }
}

/// Prepend the id byte to a payload (which may be empty)
pub fn frame(msg_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(msg_type);
    buf.extend_from_slice(payload);
    buf
}

/// Split a frame into its id byte and payload
pub fn unframe(data: &[u8]) -> Result<(u8, &[u8]), ProtoError> {
    let (&msg_type, payload) = data.split_first().ok_or(ProtoError::Empty)?;
    if !MESSAGE_IDS.contains(&msg_type) {
        return Err(ProtoError::UnknownMessage(msg_type));
    }
    Ok((msg_type, payload))
}

/// A decoded OoB message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Initialize,
    DeviceConfig(DeviceConfig),
    PhoneConfig(PhoneConfig),
    DidStart,
    DidStop,
    Stop,
}

impl Message {
    pub fn msg_type(&self) -> u8 {
        match self {
            Message::Initialize => MSG_INITIALIZE,
            Message::DeviceConfig(_) => MSG_DEVICE_CONFIG,
            Message::PhoneConfig(_) => MSG_PHONE_CONFIG,
            Message::DidStart => MSG_DID_START,
            Message::DidStop => MSG_DID_STOP,
            Message::Stop => MSG_STOP,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Message::DeviceConfig(config) => frame(MSG_DEVICE_CONFIG, &config.to_bytes()),
            Message::PhoneConfig(config) => frame(MSG_PHONE_CONFIG, &config.to_bytes()),
            other => frame(other.msg_type(), &[]),
        }
    }

    /// Parse a frame. Payload bytes after an id that carries no payload are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtoError> {
        let (msg_type, payload) = unframe(data)?;
        Ok(match msg_type {
            MSG_DEVICE_CONFIG => Message::DeviceConfig(DeviceConfig::from_bytes(payload)?),
            MSG_PHONE_CONFIG => Message::PhoneConfig(PhoneConfig::from_bytes(payload)?),
            MSG_INITIALIZE => Message::Initialize,
            MSG_DID_START => Message::DidStart,
            MSG_DID_STOP => Message::DidStop,
            MSG_STOP => Message::Stop,
            other => return Err(ProtoError::UnknownMessage(other)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Message::Initialize => "INITIALIZE",
            Message::DeviceConfig(_) => "DEVICE_CONFIG",
            Message::PhoneConfig(_) => "PHONE_CONFIG",
            Message::DidStart => "DID_START",
            Message::DidStop => "DID_STOP",
            Message::Stop => "STOP",
        }
    }
}
