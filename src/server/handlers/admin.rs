//! Admin-only endpoints: badges, roles, takedowns and impersonation.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde::Deserialize;

use crate::identity;
use crate::moderation::{self, Badge};
use crate::server::state::SharedState;
use crate::server::utils::{authed, page_limit};
use crate::storage::Role;

#[derive(Deserialize)]
pub struct PageQuery {
    limit: Option<u32>,
    #[serde(default)]
    offset: u32,
}

pub async fn list_profiles_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<PageQuery>,
) -> Response {
    let limit = page_limit(params.limit, 50);
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        moderation::list_profiles(b, ctx, limit, params.offset)
    })
    .await
}

#[derive(Deserialize)]
pub struct BadgeRequest {
    /// `null` removes the badge.
    badge: Option<Badge>,
}

pub async fn set_badge_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<BadgeRequest>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        moderation::set_badge(b, ctx, &id, req.badge)
    })
    .await
}

#[derive(Deserialize)]
pub struct VerifiedRequest {
    verified: bool,
}

pub async fn set_verified_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::Json(req): axum::Json<VerifiedRequest>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        moderation::set_verified(b, ctx, &id, req.verified)
    })
    .await
}

pub async fn grant_role_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, role)): Path<(String, Role)>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        moderation::grant_role(b, ctx, &id, role).map(|granted| serde_json::json!({ "granted": granted }))
    })
    .await
}

pub async fn revoke_role_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, role)): Path<(String, Role)>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        moderation::revoke_role(b, ctx, &id, role).map(|revoked| serde_json::json!({ "revoked": revoked }))
    })
    .await
}

pub async fn takedown_post_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        moderation::takedown_post(b, ctx, &id).map(|()| serde_json::json!({ "deleted": true }))
    })
    .await
}

// -- Impersonation --

pub async fn impersonate_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        identity::impersonate(b, ctx, &id).map(|next| {
            serde_json::json!({
                "real": next.real,
                "effective": next.effective,
                "is_impersonating": next.is_impersonating(),
            })
        })
    })
    .await
}

pub async fn exit_impersonation_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    authed(&state, &headers, StatusCode::OK, |b, ctx| {
        identity::exit_impersonation(b, ctx).map(|next| {
            serde_json::json!({
                "real": next.real,
                "effective": next.effective,
                "is_impersonating": next.is_impersonating(),
            })
        })
    })
    .await
}
