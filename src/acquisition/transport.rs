//! Transport seam between the stream client and the wire

use async_trait::async_trait;
use thiserror::Error;

use crate::controller::protocol::{ClientMessage, ServerMessage};

/// Event stream errors
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Repeated authentication timeouts ({0} in a row)")]
    AuthUnresponsive(u32),

    #[error("Subscription rejected: {0}")]
    SubscribeFailed(String),

    #[error("No message for {0}s, connection presumed dead")]
    HeartbeatLost(u64),

    #[error("Event channel full, dropping connection")]
    Backpressure,

    #[error("Event consumer stopped")]
    ConsumerGone,
}

impl StreamError {
    /// Configuration-level failures stop the client instead of reconnecting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRejected(_) | Self::AuthUnresponsive(_) | Self::ConsumerGone)
    }
}

/// Opens sessions to the controller's event API.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    type Session: StreamSession;

    async fn connect(&self) -> Result<Self::Session, StreamError>;
}

/// One open connection.
#[async_trait]
pub trait StreamSession: Send + 'static {
    async fn send(&mut self, message: ClientMessage) -> Result<(), StreamError>;

    /// Next message from the controller. `Ok(None)` on an orderly close.
    async fn recv(&mut self) -> Result<Option<ServerMessage>, StreamError>;

    async fn close(&mut self);
}
