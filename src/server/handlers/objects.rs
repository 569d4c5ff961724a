//! Object upload and download.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::Multipart;

use crate::server::state::SharedState;
use crate::server::utils::{api_error, authed, core_error_response};

pub struct Upload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: Option<String>,
}

/// Pull the `file` field out of a multipart body.
pub async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<Upload, Response> {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|ct| ct.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let file_name = field.file_name().map(|f| f.to_string());
        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => return Err(api_error(StatusCode::BAD_REQUEST, format!("failed to read file: {e}"))),
        };
        if bytes.len() > max_bytes {
            return Err(api_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("upload exceeds maximum size of {max_bytes} bytes"),
            ));
        }
        return Ok(Upload {
            bytes: bytes.to_vec(),
            content_type,
            file_name,
        });
    }
    Err(api_error(StatusCode::BAD_REQUEST, "no file provided"))
}

pub async fn upload_object_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((bucket, path)): Path<(String, String)>,
    multipart: Multipart,
) -> Response {
    let upload = match read_upload(multipart, state.objects.max_bytes()).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if let Some(name) = &upload.file_name {
        crate::hlog!("objects: receiving {} for {}/{}", name, bucket, path);
    }
    authed(&state, &headers, StatusCode::CREATED, |b, ctx| {
        state
            .objects
            .put(b, ctx, &bucket, &path, &upload.bytes, &upload.content_type)
    })
    .await
}

/// Objects are publicly readable by key.
pub async fn download_object_handler(
    State(state): State<SharedState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Response {
    let result = {
        let backend = state.backend.lock().await;
        state.objects.get(&backend, &bucket, &path)
    };
    match result {
        Ok((meta, bytes)) => {
            let headers = [
                (header::CONTENT_TYPE, meta.content_type),
                (header::ETAG, format!("\"{}\"", meta.sha256)),
                (header::CACHE_CONTROL, "public, max-age=60".to_string()),
            ];
            (StatusCode::OK, headers, bytes).into_response()
        }
        Err(e) => core_error_response(&e),
    }
}
