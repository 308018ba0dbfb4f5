use uwb_proto::ProtoError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("link error: {0}")]
    Link(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("session scope unavailable: {0}")]
    Unavailable(String),

    #[error("invalid ranging parameters: {0}")]
    InvalidParameters(String),
}

/// Why a negotiation was aborted back to Idle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    #[error("malformed device config: {0}")]
    Format(#[from] ProtoError),

    #[error("device offers no supported ranging role (mask 0x{0:02x})")]
    UnsupportedRole(u8),

    #[error("device offers no supported profile (mask 0x{0:08x})")]
    UnsupportedProfile(u32),

    #[error("ranging engine: {0}")]
    Engine(#[from] EngineError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Errors returned to callers of [`crate::SessionHandle`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("a session is already in progress ({0:?})")]
    Busy(crate::SessionState),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("session controller has shut down")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no home directory")]
    NoHome,

    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session key must be non-empty hex: {0}")]
    InvalidSessionKey(String),
}
