//! Notification listing and read-state handlers.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::notifications::{self, DEFAULT_LIMIT};
use crate::server::state::SharedState;
use crate::server::utils::{authed, page_limit};

#[derive(Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    unread: bool,
    limit: Option<u32>,
}

pub async fn list_notifications_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<ListNotificationsQuery>,
) -> Response {
    let limit = page_limit(params.limit, DEFAULT_LIMIT);
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        notifications::list(b, ctx, params.unread, limit)
    })
    .await
}

pub async fn unread_count_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        notifications::unread_count(b, ctx).map(|count| serde_json::json!({ "unread": count }))
    })
    .await
}

pub async fn mark_read_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        notifications::mark_read(b, ctx, id).map(|()| serde_json::json!({ "read": true }))
    })
    .await
}

pub async fn mark_all_read_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        notifications::mark_all_read(b, ctx).map(|marked| serde_json::json!({ "marked": marked }))
    })
    .await
}
