//! The link the OoB frames travel over (BLE in practice)

use std::sync::Arc;

use async_trait::async_trait;

use crate::TransportError;

/// Events a transport delivers to the controller, in link order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { peer: String },
    Disconnected,
    Received(Vec<u8>),
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the link. Success is reported again as [`TransportEvent::Connected`].
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send one complete frame
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;
}

/// Lets the host keep its own reference to a transport it hands to the controller
#[async_trait]
impl<T: Transport> Transport for Arc<T> {
    async fn connect(&self) -> Result<(), TransportError> {
        (**self).connect().await
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).send(frame).await
    }
}
