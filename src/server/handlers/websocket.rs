//! `/api/realtime`: forwards change-feed events the caller may see.
//!
//! Events carry ids only. Clients treat them as refresh triggers and
//! re-fetch through the REST endpoints.

use std::sync::atomic::Ordering;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::error::CoreError;
use crate::identity;
use crate::logging;
use crate::server::config::MAX_WS_CONNECTIONS;
use crate::server::state::SharedState;
use crate::server::utils::{api_error, bearer_token, core_error_response};

#[derive(Deserialize)]
pub struct WsQuery {
    /// Browsers cannot set headers on an upgrade request.
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<WsQuery>,
) -> Response {
    let token = params
        .token
        .or_else(|| bearer_token(&headers).map(str::to_string));
    let Some(token) = token else {
        return core_error_response(&CoreError::Unauthenticated);
    };

    let (actor, rx) = {
        let backend = state.backend.lock().await;
        match identity::resolve_session(&backend, &token) {
            Ok(ctx) => (ctx.actor_id().to_string(), backend.feed.subscribe_all()),
            Err(e) => return core_error_response(&e),
        }
    };

    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= MAX_WS_CONNECTIONS {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("too many WebSocket connections (max {})", MAX_WS_CONNECTIONS),
        );
    }

    ws.on_upgrade(move |socket| ws_connection(socket, state, actor, rx))
        .into_response()
}

async fn ws_connection(
    mut socket: WebSocket,
    state: SharedState,
    actor: String,
    mut rx: broadcast::Receiver<crate::realtime::ChangeEvent>,
) {
    state.ws_connection_count.fetch_add(1, Ordering::Relaxed);
    crate::hlog!("ws: {} connected", logging::actor_id(&actor));

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !event.visible_to(&actor) {
                            continue;
                        }
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(WsMessage::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        crate::hlog!("ws: {} lagged, skipped {n} events", logging::actor_id(&actor));
                        let lag_msg = serde_json::json!({
                            "type": "events_missed",
                            "count": n,
                        });
                        if socket.send(WsMessage::Text(lag_msg.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = socket.send(WsMessage::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    state.ws_connection_count.fetch_sub(1, Ordering::Relaxed);
    crate::hlog!("ws: {} disconnected", logging::actor_id(&actor));
}
