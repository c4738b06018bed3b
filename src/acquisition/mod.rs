//! Event acquisition from the controller
//!
//! The stream client owns the WebSocket subscription and pushes
//! [`StreamMessage`](crate::types::StreamMessage)s into a bounded channel
//! consumed by the monitor loop.

mod backoff;
mod stream_client;
mod transport;

pub use backoff::Backoff;
pub use stream_client::{EventStreamClient, STREAM_ENTITY};
pub use transport::{StreamConnector, StreamError, StreamSession};
