//! Sign-up, sign-in, sign-out and session inspection.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::auth;
use crate::error::CoreError;
use crate::server::state::SharedState;
use crate::server::utils::{authed, bearer_token, core_error_response};

#[derive(Deserialize)]
pub struct SignUpRequest {
    handle: String,
    password: String,
}

pub async fn sign_up_handler(
    State(state): State<SharedState>,
    axum::Json(req): axum::Json<SignUpRequest>,
) -> Response {
    let result = {
        let backend = state.backend.lock().await;
        auth::sign_up(&backend, &req.handle, &req.password)
    };
    match result {
        Ok(session) => (StatusCode::CREATED, axum::Json(session)).into_response(),
        Err(e) => core_error_response(&e),
    }
}

#[derive(Deserialize)]
pub struct SignInRequest {
    /// Handle or full login identifier.
    login: String,
    password: String,
}

pub async fn sign_in_handler(
    State(state): State<SharedState>,
    axum::Json(req): axum::Json<SignInRequest>,
) -> Response {
    let result = {
        let backend = state.backend.lock().await;
        auth::sign_in(&backend, &req.login, &req.password)
    };
    match result {
        Ok(session) => (StatusCode::OK, axum::Json(session)).into_response(),
        Err(e) => core_error_response(&e),
    }
}

pub async fn sign_out_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return core_error_response(&CoreError::Unauthenticated);
    };
    let result = {
        let backend = state.backend.lock().await;
        auth::sign_out(&backend, token)
    };
    match result {
        Ok(revoked) => (
            StatusCode::OK,
            axum::Json(serde_json::json!({ "signed_out": revoked })),
        )
            .into_response(),
        Err(e) => core_error_response(&e),
    }
}

/// The caller's real and effective identities.
pub async fn session_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    authed(&state, &headers, StatusCode::OK, |_, ctx| {
        Ok(serde_json::json!({
            "real": ctx.real,
            "effective": ctx.effective,
            "is_admin": ctx.is_admin,
            "is_impersonating": ctx.is_impersonating(),
        }))
    })
    .await
}
