//! Posts, the home feed, likes, saves and comments.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::server::state::SharedState;
use crate::server::utils::{authed, page_limit};
use crate::social::{self, NewPost, DEFAULT_FEED_SIZE};

#[derive(Deserialize)]
pub struct LimitQuery {
    limit: Option<u32>,
}

pub async fn create_post_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(new): axum::Json<NewPost>,
) -> Response {
    authed(&state, &headers, StatusCode::CREATED, |b, ctx| {
        social::create_post(b, ctx, new)
    })
    .await
}

pub async fn home_feed_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<LimitQuery>,
) -> Response {
    let limit = page_limit(params.limit, DEFAULT_FEED_SIZE);
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::home_feed(b, ctx, limit)
    })
    .await
}

pub async fn list_saved_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    authed(&state, &headers, StatusCode::OK, social::list_saved).await
}

pub async fn list_author_posts_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(author_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Response {
    let limit = page_limit(params.limit, DEFAULT_FEED_SIZE);
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::list_posts_by_author(b, ctx, &author_id, limit)
    })
    .await
}

pub async fn get_post_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::get_post(b, ctx, &id)
    })
    .await
}

pub async fn delete_post_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::delete_post(b, ctx, &id).map(|()| serde_json::json!({ "deleted": true }))
    })
    .await
}

pub async fn toggle_post_like_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::toggle_post_like(b, ctx, &id)
    })
    .await
}

pub async fn toggle_save_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::toggle_save(b, ctx, &id).map(|saved| serde_json::json!({ "saved": saved }))
    })
    .await
}

pub async fn list_comments_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::list_comments(b, ctx, &id)
    })
    .await
}

#[derive(Deserialize)]
pub struct CommentRequest {
    content: String,
}

pub async fn add_comment_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<CommentRequest>,
) -> Response {
    authed(&state, &headers, StatusCode::CREATED, |b, ctx| {
        social::add_comment(b, ctx, &id, &req.content)
    })
    .await
}
