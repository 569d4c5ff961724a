//! Message listing, sending and read-state handlers.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::messages::{self, MessageContent};
use crate::server::state::SharedState;
use crate::server::utils::{authed, page_limit};

#[derive(Deserialize)]
pub struct ListMessagesQuery {
    limit: Option<u32>,
}

pub async fn list_messages_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
    Query(params): Query<ListMessagesQuery>,
) -> Response {
    let limit = page_limit(params.limit, messages::DEFAULT_PAGE_SIZE);
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        messages::list(b, ctx, &conversation_id, limit)
    })
    .await
}

pub async fn send_message_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
    axum::Json(content): axum::Json<MessageContent>,
) -> Response {
    authed(&state, &headers, StatusCode::CREATED, |b, ctx| {
        messages::send(b, ctx, &conversation_id, content)
    })
    .await
}

pub async fn mark_conversation_read_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        messages::mark_conversation_read(b, ctx, &conversation_id)
            .map(|marked| serde_json::json!({ "marked": marked }))
    })
    .await
}

#[derive(Deserialize)]
pub struct MarkReadRequest {
    message_ids: Vec<String>,
}

pub async fn mark_read_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<MarkReadRequest>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        messages::mark_read(b, ctx, &req.message_ids).map(|marked| serde_json::json!({ "marked": marked }))
    })
    .await
}

pub async fn unread_total_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        messages::total_unread(b, ctx).map(|count| serde_json::json!({ "unread": count }))
    })
    .await
}
