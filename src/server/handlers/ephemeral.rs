//! Stories and notes.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::ephemeral::{self, ContentPayload};
use crate::server::state::SharedState;
use crate::server::utils::authed;
use crate::storage::ContentKind;

pub async fn create_content_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(payload): axum::Json<ContentPayload>,
) -> Response {
    authed(&state, &headers, StatusCode::CREATED, |b, ctx| {
        ephemeral::create(b, ctx, payload)
    })
    .await
}

pub async fn list_stories_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        ephemeral::list_visible(b, ctx, ContentKind::Story)
    })
    .await
}

pub async fn list_notes_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        ephemeral::list_visible(b, ctx, ContentKind::Note)
    })
    .await
}

#[derive(Deserialize)]
pub struct KindQuery {
    kind: Option<ContentKind>,
}

pub async fn list_author_content_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(author_id): Path<String>,
    Query(params): Query<KindQuery>,
) -> Response {
    let kind = params.kind.unwrap_or(ContentKind::Story);
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        ephemeral::list_for_author(b, ctx, &author_id, kind)
    })
    .await
}

pub async fn mark_seen_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        ephemeral::mark_seen(b, ctx, &id).map(|()| serde_json::json!({ "seen": true }))
    })
    .await
}

pub async fn toggle_like_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        ephemeral::toggle_like(b, ctx, &id)
    })
    .await
}

pub async fn list_viewers_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        ephemeral::list_viewers(b, ctx, &id)
    })
    .await
}

pub async fn delete_content_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        ephemeral::delete(b, ctx, &id).map(|()| serde_json::json!({ "deleted": true }))
    })
    .await
}
