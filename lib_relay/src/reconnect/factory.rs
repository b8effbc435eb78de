//! # Connection Factories
//!
//! A `ConnectionFactory` opens one subscriber connection and exposes its inbound
//! text messages as a stream. The stream ending, or yielding an error, is an
//! unplanned close.

use std::future::Future;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::error::TransportError;

/// Inbound text messages of one open connection.
pub type InboundStream = BoxStream<'static, Result<String, TransportError>>;

/// Opens connections for a `Reconnector`.
pub trait ConnectionFactory: Send + Sync {
    /// Performs the handshake. `Ok` means the connection is open.
    fn open(&self) -> impl Future<Output = Result<InboundStream, TransportError>> + Send;
}

/// # WebSocket Connection Factory
///
/// `ws://` or `wss://` connections via `tokio-tungstenite`. Ping, pong and binary
/// frames are skipped; a close frame ends the stream.
#[derive(Debug, Clone)]
pub struct WsConnectionFactory {
    url: String,
    connect_timeout: Duration,
}

impl WsConnectionFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl ConnectionFactory for WsConnectionFactory {
    async fn open(&self) -> Result<InboundStream, TransportError> {
        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()));
        let (ws, _response) = match handshake.await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
            Err(_) => {
                return Err(TransportError::Connect(format!(
                    "handshake timed out after {:?}",
                    self.connect_timeout
                )))
            }
        };

        let inbound = futures_util::stream::unfold(ws, |mut ws| async move {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return Some((Ok(text.to_string()), ws)),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "Close frame received");
                        return None;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Some((Err(TransportError::Io(e.to_string())), ws)),
                    None => return None,
                }
            }
        });

        Ok(inbound.boxed())
    }
}
