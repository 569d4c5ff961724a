//! Shared helpers for the HTTP handlers.

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::backend::Backend;
use crate::error::{CoreError, CoreResult, ErrorCategory};
use crate::identity::{self, SessionContext};
use crate::server::config::MAX_PAGE_SIZE;
use crate::server::state::SharedState;

pub const SIGN_IN_PATH: &str = "/api/auth/sign-in";

/// Build a standard JSON error response.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, axum::Json(body)).into_response()
}

/// Map a core failure onto a status code and a user-facing message.
/// Internal failures are logged with detail and reported generically.
pub fn core_error_response(err: &CoreError) -> Response {
    let category = err.category();
    let status = match category {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
        ErrorCategory::Authorization => StatusCode::FORBIDDEN,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Conflict => StatusCode::CONFLICT,
        ErrorCategory::Internal => {
            crate::hlog!("internal error: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status == StatusCode::UNAUTHORIZED {
        let body = serde_json::json!({
            "error": err.user_message(),
            "category": category.as_str(),
            "sign_in": SIGN_IN_PATH,
        });
        return (status, axum::Json(body)).into_response();
    }
    let body = serde_json::json!({
        "error": err.user_message(),
        "category": category.as_str(),
    });
    (status, axum::Json(body)).into_response()
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the caller's session from the `Authorization` header.
pub fn authenticate(backend: &Backend, headers: &HeaderMap) -> CoreResult<SessionContext> {
    let token = bearer_token(headers).ok_or(CoreError::Unauthenticated)?;
    identity::resolve_session(backend, token)
}

/// Authenticate, run one core operation under the backend lock, and render
/// its result as JSON with `status` on success.
pub async fn authed<T, F>(state: &SharedState, headers: &HeaderMap, status: StatusCode, op: F) -> Response
where
    T: Serialize,
    F: FnOnce(&Backend, &SessionContext) -> CoreResult<T>,
{
    let backend = state.backend.lock().await;
    let result = authenticate(&backend, headers).and_then(|ctx| op(&backend, &ctx));
    drop(backend);
    match result {
        Ok(value) => (status, axum::Json(value)).into_response(),
        Err(e) => core_error_response(&e),
    }
}

pub fn page_limit(requested: Option<u32>, default: u32) -> u32 {
    requested.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
}
