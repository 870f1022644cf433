pub mod history;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::auth::{Authenticator, Claims};
use crate::envelope::SendRequest;
use crate::ingest::Ingest;
use crate::metrics::DeliveryMetrics;
use crate::presence::PresenceStore;
use crate::registry::{ConnectionRegistry, OutboundSender};
use crate::store::MessageStore;
use crate::{clog_debug, clog_info, clog_warn};

/// Frames queued per connection before a slow client starts dropping pushes.
const OUTBOUND_BUFFER: usize = 128;

/// Everything the gateway's handlers share.
pub struct GatewayState {
    pub registry: Arc<ConnectionRegistry>,
    pub auth: Arc<dyn Authenticator>,
    pub presence: Arc<dyn PresenceStore>,
    pub ingest: Arc<Ingest>,
    pub store: Arc<dyn MessageStore>,
    pub metrics: Arc<DeliveryMetrics>,
    pub presence_ttl: Duration,
    pub heartbeat_interval: Duration,
}

/// The gateway's HTTP surface: the websocket endpoint, a health probe, and
/// the conversation history read.
pub fn app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/messages", get(history::query_messages))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// A chat message as submitted over the live connection.
#[derive(Deserialize)]
struct InboundFrame {
    to: i64,
    text: String,
}

/// `GET /ws?token=...`: authenticate, then upgrade.
///
/// Verification happens before the upgrade completes, so a refused caller
/// never creates registry or presence state.
async fn ws_upgrade(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.token else {
        clog_info!("websocket connect refused: no token provided");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match state.auth.verify(&token) {
        Ok(claims) => ws.on_upgrade(move |socket| handle_socket(state, claims, socket)),
        Err(err) => {
            clog_info!("websocket connect refused: {}", err);
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// Drive one authenticated connection to completion.
async fn handle_socket(state: Arc<GatewayState>, claims: Claims, socket: WebSocket) {
    let user_id = claims.user_id;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    // One token bounds every task of this connection: heartbeat, writer and
    // reader stop as a unit with the registration.
    let cancel = CancellationToken::new();
    let conn_id = state
        .registry
        .register(user_id, out_tx.clone(), cancel.clone());
    state.metrics.record_connection_opened();
    clog_info!("user {} ({}) connected", user_id, claims.name);

    if let Err(err) = state.presence.set_online(user_id, state.presence_ttl).await {
        clog_warn!("presence write failed on connect for user {}: {}", user_id, err);
    }
    let heartbeat = spawn_heartbeat(
        state.presence.clone(),
        user_id,
        state.presence_ttl,
        state.heartbeat_interval,
        cancel.clone(),
    );

    let writer: JoinHandle<()> = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            // A newer connection for the same user superseded this one
            _ = cancel.cancelled() => break,
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    state.on_inbound(user_id, text.as_str(), &out_tx).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {} // ping/pong/binary frames carry no chat payload
            },
        }
    }

    state.teardown(user_id, conn_id, &cancel).await;
    drop(out_tx);
    let _ = heartbeat.await;
    let _ = writer.await;
}

impl GatewayState {
    /// Handle one inbound chat frame from an authenticated sender.
    ///
    /// The sender id comes from the verified connection, never from the
    /// frame. The echo goes back only after the durable channel accepted
    /// the record; routing to the receiver is the processor's job.
    pub async fn on_inbound(&self, sender_id: i64, raw: &str, out: &OutboundSender) {
        let frame: InboundFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(_) => {
                let _ = out
                    .send(r#"error: expected {"to": <user id>, "text": "..."}"#.to_string())
                    .await;
                return;
            }
        };

        let text = frame.text.clone();
        let request = SendRequest {
            from: sender_id,
            to: frame.to,
            text: frame.text,
        };
        match self.ingest.submit(request).await {
            Ok(key) => {
                clog_debug!("user {} submitted envelope {}", sender_id, key);
                let _ = out.send(format!("Echo: {}", text)).await;
            }
            Err(err) => {
                clog_warn!("submit failed for user {}: {}", sender_id, err);
                let _ = out.send("error: delivery unavailable, retry".to_string()).await;
            }
        }
    }

    /// Release everything a connection owns: heartbeat, registration,
    /// presence marker. Deliberate disconnects go offline immediately
    /// instead of waiting out the TTL.
    pub async fn teardown(&self, user_id: i64, conn_id: u64, cancel: &CancellationToken) {
        cancel.cancel();
        let removed = self.registry.remove(user_id, conn_id);
        // If the registration was already superseded, the presence marker
        // belongs to the newer connection and must survive.
        if removed {
            if let Err(err) = self.presence.clear(user_id).await {
                clog_warn!("presence clear failed for user {}: {}", user_id, err);
            }
        }
        self.metrics.record_connection_closed();
        clog_info!("user {} disconnected", user_id);
    }
}

/// Refresh the presence TTL on a fixed cadence until cancelled.
///
/// The interval must be strictly shorter than the TTL so a delayed tick
/// cannot let the marker lapse while the client is still connected. A
/// failed refresh is logged and retried on the next tick.
fn spawn_heartbeat(
    presence: Arc<dyn PresenceStore>,
    user_id: i64,
    ttl: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; connect already wrote the marker
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = presence.set_online(user_id, ttl).await {
                        clog_warn!("heartbeat refresh failed for user {}: {}", user_id, err);
                    }
                }
            }
        }
    })
}
