//! WebSocket transport built on tokio-tungstenite

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::protocol::{parse_frame, ClientMessage, ServerMessage};
use crate::acquisition::{StreamConnector, StreamError, StreamSession};

/// Connects to `ws://.../api/websocket` with TCP keepalive enabled.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    async fn open(&self) -> Result<WsSession, StreamError> {
        let request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::ConnectionFailed(format!("invalid url {}: {e}", self.url)))?;
        let uri = request.uri();
        let host = uri
            .host()
            .ok_or_else(|| StreamError::ConnectionFailed(format!("no host in {}", self.url)))?
            .to_string();
        let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
            Some("wss") => 443,
            _ => 80,
        });

        info!(url = %self.url, "Connecting to controller event stream");
        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;

        if let Err(e) = arm_keepalive(&tcp) {
            warn!(url = %self.url, error = %e, "Failed to enable TCP keepalive, relying on heartbeat only");
        }

        let (ws, _response) = tokio_tungstenite::client_async_tls(request, tcp)
            .await
            .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;

        Ok(WsSession {
            ws,
            pending: VecDeque::new(),
        })
    }
}

/// Detect half-open connections below the heartbeat.
fn arm_keepalive(tcp: &TcpStream) -> std::io::Result<()> {
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    socket2::SockRef::from(tcp).set_tcp_keepalive(&keepalive)
}

#[async_trait]
impl StreamConnector for WsConnector {
    type Session = WsSession;

    async fn connect(&self) -> Result<WsSession, StreamError> {
        tokio::time::timeout(self.connect_timeout, self.open())
            .await
            .map_err(|_| StreamError::Timeout("connection"))?
    }
}

/// An open WebSocket connection to the controller.
#[derive(Debug)]
pub struct WsSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Messages from a coalesced frame not yet handed out
    pending: VecDeque<ServerMessage>,
}

#[async_trait]
impl StreamSession for WsSession {
    async fn send(&mut self, message: ClientMessage) -> Result<(), StreamError> {
        let text = message
            .to_json()
            .map_err(|e| StreamError::ProtocolError(e.to_string()))?;
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| StreamError::ConnectionFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<ServerMessage>, StreamError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            let Some(frame) = self.ws.next().await else {
                return Ok(None);
            };
            match frame.map_err(|e| StreamError::ConnectionFailed(e.to_string()))? {
                Message::Text(text) => match parse_frame(&text) {
                    Ok(messages) => self.pending.extend(messages),
                    Err(e) => debug!(error = %e, "Skipping unparseable frame"),
                },
                Message::Close(frame) => {
                    debug!(?frame, "Controller closed the event stream");
                    return Ok(None);
                }
                other => trace!(kind = ?other, "Ignoring non-text frame"),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_keepalive_enabled_on_connected_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tcp = TcpStream::connect(addr).await.unwrap();

        arm_keepalive(&tcp).unwrap();
        assert!(socket2::SockRef::from(&tcp).keepalive().unwrap());
    }

    #[tokio::test]
    async fn test_url_without_host_fails_to_connect() {
        let connector = WsConnector::new("ws:///api/websocket", Duration::from_secs(1));
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, StreamError::ConnectionFailed(_)), "{err}");
    }
}
