//! Harness for the end-to-end tests: a real relay on an ephemeral port and a few
//! websocket client helpers.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

use servers::relay_logic::downstream;
use servers::relay_logic::state::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a test waits for any single expected message.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A relay serving `/ws` and the ingestion routes on `127.0.0.1:<random>`.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub state: AppState,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestRelay {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = AppState::with_capacity(16, 0);
        let stop = CancellationToken::new();

        let handle = {
            let state = state.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let _ = downstream::serve(listener, state, async move { stop.cancelled().await }).await;
            })
        };

        Ok(Self {
            addr,
            state,
            stop,
            handle,
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Connects a client and consumes its welcome frame.
    pub async fn connect(&self) -> anyhow::Result<WsClient> {
        Ok(self.connect_greeted().await?.0)
    }

    /// Connects a client and returns it with its welcome frame.
    pub async fn connect_greeted(&self) -> anyhow::Result<(WsClient, Value)> {
        let (mut ws, _) = connect_async(self.ws_url()).await?;
        let welcome = next_json(&mut ws)
            .await
            .ok_or_else(|| anyhow::anyhow!("no welcome frame"))?;
        anyhow::ensure!(welcome["type"] == "info", "unexpected first frame {welcome}");
        Ok((ws, welcome))
    }

    /// Polls the registry until it holds exactly `n` connections.
    pub async fn wait_for_connections(&self, n: usize) -> bool {
        for _ in 0..500 {
            if self.state.hub.connection_count() == n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    pub async fn stop(self) {
        self.state.hub.close_all();
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

/// Next text frame as JSON, or `None` on close, error or timeout.
pub async fn next_json(ws: &mut WsClient) -> Option<Value> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next()).await.ok()??.ok()?;
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// True if nothing arrives on `ws` within `wait`.
pub async fn stays_silent(ws: &mut WsClient, wait: Duration) -> bool {
    tokio::time::timeout(wait, ws.next()).await.is_err()
}
