//! Conversation resolution and listing.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::conversations;
use crate::server::state::SharedState;
use crate::server::utils::authed;

pub async fn list_conversations_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    authed(&state, &headers, StatusCode::OK, conversations::list).await
}

#[derive(Deserialize)]
pub struct OpenConversationRequest {
    other_id: String,
}

/// Find or create the conversation with another profile.
pub async fn open_conversation_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<OpenConversationRequest>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        let id = conversations::find_or_create(b, ctx, &req.other_id)?;
        conversations::get(b, ctx, &id)
    })
    .await
}

pub async fn get_conversation_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        conversations::get(b, ctx, &id)
    })
    .await
}
