//! Profile lookup and editing, follows, and close friends.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum_extra::extract::Multipart;
use serde::Deserialize;

use crate::server::handlers::objects::read_upload;
use crate::server::state::SharedState;
use crate::server::utils::{authed, page_limit};
use crate::social::{self, ProfileUpdate};

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    limit: Option<u32>,
}

pub async fn search_profiles_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<SearchQuery>,
) -> Response {
    let limit = page_limit(params.limit, 20);
    authed(&state, &headers, StatusCode::OK, |b, _| {
        social::search_profiles(b, &params.q, limit)
    })
    .await
}

/// `key` is either a profile id or `@handle`.
pub async fn get_profile_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::get_profile(b, ctx, &key)
    })
    .await
}

pub async fn update_own_profile_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    axum::Json(update): axum::Json<ProfileUpdate>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::update_profile(b, ctx, update)
    })
    .await
}

pub async fn upload_avatar_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let upload = match read_upload(multipart, state.objects.max_bytes()).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        state
            .objects
            .upload_avatar(b, ctx, &upload.bytes, &upload.content_type)
    })
    .await
}

// -- Follows --

pub async fn follow_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::follow(b, ctx, &id).map(|created| serde_json::json!({ "following": true, "created": created }))
    })
    .await
}

pub async fn unfollow_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::unfollow(b, ctx, &id).map(|removed| serde_json::json!({ "following": false, "removed": removed }))
    })
    .await
}

pub async fn list_followers_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, _| {
        social::list_followers(b, &id)
    })
    .await
}

pub async fn list_following_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, _| {
        social::list_following(b, &id)
    })
    .await
}

// -- Close friends --

pub async fn list_close_friends_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::list_close_friends(b, ctx)
    })
    .await
}

pub async fn add_close_friend_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::add_close_friend(b, ctx, &id).map(|added| serde_json::json!({ "added": added }))
    })
    .await
}

pub async fn remove_close_friend_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        social::remove_close_friend(b, ctx, &id).map(|removed| serde_json::json!({ "removed": removed }))
    })
    .await
}
