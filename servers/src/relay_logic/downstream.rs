use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use lib_relay::core::event::pong_frame;
use lib_relay::core::{BroadcastHub, ClientIntent, ConnectionId};

use crate::relay_logic::ingest;
use crate::relay_logic::state::AppState;

/// Full HTTP surface of the relay.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health-check", get(health_handler))
        .merge(ingest::routes())
        .layer(cors)
        .with_state(state)
}

/// Serves `router(state)` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!("Relay listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "Server is healthy")
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One subscriber for the life of its socket.
///
/// The writer task drains the hub channel into the socket; the reader task
/// answers client intents. Whichever ends first tears the other down, and the
/// connection leaves the registry.
async fn handle_socket(socket: WebSocket, state: AppState) {
    // --- Phase 1: Admit ---
    // Welcome and registration happen under the hub lock, before any await, so
    // no publish can fall between them.
    let (connection, mut frames) = state.hub.open_connection();
    let id = connection.id();
    if !state.hub.admit(connection) {
        return;
    }
    let (mut sender, mut receiver) = socket.split();

    // --- Phase 2: Writer ---
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sender.send(Message::Text(frame.as_ref().into())).await.is_err() {
                return;
            }
        }
        // Channel closed by the hub: eviction or shutdown.
        let _ = sender.send(Message::Close(None)).await;
    });

    // --- Phase 3: Reader ---
    let hub = Arc::clone(&state.hub);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            hub.touch(id);
            match msg {
                Message::Text(text) => handle_client_text(&hub, id, text.as_str()),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.hub.unregister(id);
    tracing::info!(connection = %id, "Subscriber disconnected");
}

fn handle_client_text(hub: &BroadcastHub, id: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientIntent>(text) {
        Ok(ClientIntent::Ping) => {
            hub.send_to(id, Arc::from(pong_frame()));
        }
        Ok(ClientIntent::Subscribe { kinds }) => {
            tracing::info!(connection = %id, ?kinds, "Subscribe intent received");
        }
        Err(e) => {
            tracing::debug!(connection = %id, error = %e, "Ignoring client message");
        }
    }
}
