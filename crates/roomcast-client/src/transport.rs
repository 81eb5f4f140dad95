//! Transport seam.
//!
//! [`Transport`] is one open text channel; [`Connector`] opens a fresh one
//! per (re)connect attempt. [`WsConnector`] speaks WebSocket through
//! `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use roomcast_core::RealtimeError;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

/// One open, bidirectional text channel.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), RealtimeError>;

    /// Next text frame; `None` once the peer closed the channel.
    async fn recv(&mut self) -> Option<Result<String, RealtimeError>>;

    /// Close the channel.
    async fn close(&mut self) -> Result<(), RealtimeError>;
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport.
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError>;
}

/// WebSocket connector for `{url}{path}`.
#[derive(Clone, Debug)]
pub struct WsConnector {
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl WsConnector {
    /// Connector for a full endpoint URL (`ws://host:4000/socket.io`).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: Vec::new(),
        }
    }

    /// Connector for the configured transport settings.
    pub fn from_settings(settings: &roomcast_settings::TransportSettings) -> Self {
        Self::new(settings.endpoint())
    }

    /// Add a header to every upgrade request (identity headers, cookies).
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Target endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, RealtimeError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(RealtimeError::transport)?;
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str()).map_err(RealtimeError::transport)?;
            let value = HeaderValue::try_from(value.as_str()).map_err(RealtimeError::transport)?;
            let _ = request.headers_mut().insert(name, value);
        }
        let (stream, _response) = connect_async(request)
            .await
            .map_err(RealtimeError::transport)?;
        debug!(endpoint = %self.endpoint, "websocket connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

/// Transport over a tungstenite stream.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), RealtimeError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(RealtimeError::transport)
    }

    async fn recv(&mut self) -> Option<Result<String, RealtimeError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(RealtimeError::transport(e))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), RealtimeError> {
        self.stream
            .close(None)
            .await
            .map_err(RealtimeError::transport)
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_settings::TransportSettings;

    #[test]
    fn endpoint_from_settings() {
        let connector = WsConnector::from_settings(&TransportSettings::default());
        assert_eq!(connector.endpoint(), "ws://127.0.0.1:4000/socket.io");
    }

    #[tokio::test]
    async fn invalid_url_is_transport_failure() {
        let err = WsConnector::new("not a url").connect().await.err().unwrap();
        assert_eq!(err.code(), "TRANSPORT_FAILURE");
    }

    #[tokio::test]
    async fn invalid_header_is_transport_failure() {
        let err = WsConnector::new("ws://127.0.0.1:1/socket.io")
            .with_header("bad header", "v")
            .connect()
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "TRANSPORT_FAILURE");
    }

    #[tokio::test]
    async fn refused_connection_is_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = WsConnector::new(format!("ws://{addr}/socket.io"))
            .connect()
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "TRANSPORT_FAILURE");
    }
}
