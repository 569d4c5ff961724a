//! Integration tests for the HTTP API.
//!
//! Tests cover:
//! - Health endpoint
//! - Bearer-token enforcement (401 with sign-in pointer)
//! - Sign-up, conversation creation, messaging and read state
//! - Story visibility and likes across follower and stranger
//! - Object upload, scoped paths and public download
//! - Admin-only badge management and impersonation

use std::io::Read;
use std::net::SocketAddr;

use serde_json::{json, Value};
use tokio::sync::oneshot;

use hearth::auth;
use hearth::moderation::bootstrap_admins;
use hearth::server::router::build_router;
use hearth::server::state::SharedState;
use hearth::server::open_state;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Server {
    base_url: String,
    state: SharedState,
    _shutdown: oneshot::Sender<()>,
    _dir: tempfile::TempDir,
}

async fn start_server() -> Server {
    let dir = tempfile::tempdir().expect("tempdir");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind server");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    let base_url = format!("http://{addr}");
    let state = open_state(dir.path(), &base_url).expect("open state");
    let router = build_router(state.clone());
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });
    Server {
        base_url,
        state,
        _shutdown: shutdown_tx,
        _dir: dir,
    }
}

fn read_json(r: ureq::Response) -> Value {
    let body = r.into_string().unwrap_or_default();
    serde_json::from_str(&body).unwrap_or(Value::Null)
}

fn call(method: &str, url: &str, token: Option<&str>, body: Option<Value>) -> (u16, Value) {
    let mut req = ureq::request(method, url);
    if let Some(t) = token {
        req = req.set("Authorization", &format!("Bearer {t}"));
    }
    let result = match body {
        Some(b) => req
            .set("Content-Type", "application/json")
            .send_string(&b.to_string()),
        None => req.call(),
    };
    match result {
        Ok(r) => (r.status(), read_json(r)),
        Err(ureq::Error::Status(code, r)) => (code, read_json(r)),
        Err(e) => panic!("request failed: {e}"),
    }
}

fn sign_up(base: &str, handle: &str) -> (String, String) {
    let (status, body) = call(
        "POST",
        &format!("{base}/api/auth/sign-up"),
        None,
        Some(json!({ "handle": handle, "password": "correct horse" })),
    );
    assert_eq!(status, 201, "sign-up failed: {body}");
    (
        body["token"].as_str().unwrap().to_string(),
        body["user_id"].as_str().unwrap().to_string(),
    )
}

fn multipart_body(boundary: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"upload.bin\"\r\n",
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn upload(url: &str, token: &str, content_type: &str, data: &[u8]) -> (u16, Value) {
    let boundary = "hearthtestboundary";
    let result = ureq::post(url)
        .set("Authorization", &format!("Bearer {token}"))
        .set(
            "Content-Type",
            &format!("multipart/form-data; boundary={boundary}"),
        )
        .send_bytes(&multipart_body(boundary, content_type, data));
    match result {
        Ok(r) => (r.status(), read_json(r)),
        Err(ureq::Error::Status(code, r)) => (code, read_json(r)),
        Err(e) => panic!("request failed: {e}"),
    }
}

fn get_bytes(url: &str) -> (u16, Vec<u8>) {
    match ureq::get(url).call() {
        Ok(r) => {
            let status = r.status();
            let mut buf = Vec::new();
            r.into_reader().read_to_end(&mut buf).unwrap_or(0);
            (status, buf)
        }
        Err(ureq::Error::Status(code, _)) => (code, Vec::new()),
        Err(e) => panic!("request failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health() {
    let server = start_server().await;
    let (status, body) = tokio::task::spawn_blocking({
        let base = server.base_url.clone();
        move || call("GET", &format!("{base}/api/health"), None, None)
    })
    .await
    .unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthorized() {
    let server = start_server().await;
    tokio::task::spawn_blocking({
        let base = server.base_url.clone();
        move || {
            let (status, body) = call("GET", &format!("{base}/api/conversations"), None, None);
            assert_eq!(status, 401);
            assert_eq!(body["sign_in"], "/api/auth/sign-in");

            let (status, _) = call(
                "GET",
                &format!("{base}/api/conversations"),
                Some("not-a-token"),
                None,
            );
            assert_eq!(status, 401);

            let (status, _) = call(
                "POST",
                &format!("{base}/api/auth/sign-in"),
                None,
                Some(json!({ "login": "nobody", "password": "whatever" })),
            );
            assert_eq!(status, 401);
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn direct_message_flow() {
    let server = start_server().await;
    tokio::task::spawn_blocking({
        let base = server.base_url.clone();
        move || {
            let (alice, _) = sign_up(&base, "alice");
            let (bob, bob_id) = sign_up(&base, "bob");

            let (status, conv) = call(
                "POST",
                &format!("{base}/api/conversations"),
                Some(&alice),
                Some(json!({ "other_id": bob_id })),
            );
            assert_eq!(status, 200, "{conv}");
            let conv_id = conv["id"].as_str().unwrap().to_string();

            let (status, _) = call(
                "POST",
                &format!("{base}/api/conversations/{conv_id}/messages"),
                Some(&alice),
                Some(json!({ "kind": "text", "body": "   " })),
            );
            assert_eq!(status, 400);

            let (status, msg) = call(
                "POST",
                &format!("{base}/api/conversations/{conv_id}/messages"),
                Some(&alice),
                Some(json!({ "kind": "text", "body": "hi bob" })),
            );
            assert_eq!(status, 201, "{msg}");
            assert_eq!(msg["content"], "hi bob");

            let (_, list) = call("GET", &format!("{base}/api/conversations"), Some(&bob), None);
            let list = list.as_array().unwrap();
            assert_eq!(list.len(), 1);
            assert_eq!(list[0]["id"], conv_id.as_str());
            assert_eq!(list[0]["unread_count"], 1);

            let (_, unread) = call("GET", &format!("{base}/api/messages/unread"), Some(&bob), None);
            assert_eq!(unread["unread"], 1);

            let (status, messages) = call(
                "GET",
                &format!("{base}/api/conversations/{conv_id}/messages"),
                Some(&bob),
                None,
            );
            assert_eq!(status, 200);
            assert_eq!(messages[0]["sender"]["username"], "alice");

            let (_, marked) = call(
                "POST",
                &format!("{base}/api/conversations/{conv_id}/read"),
                Some(&bob),
                None,
            );
            assert_eq!(marked["marked"], 1);
            let (_, unread) = call("GET", &format!("{base}/api/messages/unread"), Some(&bob), None);
            assert_eq!(unread["unread"], 0);

            // A third party cannot read the conversation.
            let (carol, _) = sign_up(&base, "carol");
            let (status, body) = call(
                "GET",
                &format!("{base}/api/conversations/{conv_id}/messages"),
                Some(&carol),
                None,
            );
            assert_eq!(status, 403);
            assert!(!body["error"].as_str().unwrap().contains(&conv_id));
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn story_visibility_and_likes() {
    let server = start_server().await;
    tokio::task::spawn_blocking({
        let base = server.base_url.clone();
        move || {
            let (alice, alice_id) = sign_up(&base, "alice");
            let (bob, _) = sign_up(&base, "bob");
            let (carol, _) = sign_up(&base, "carol");

            let (status, story) = call(
                "POST",
                &format!("{base}/api/ephemeral"),
                Some(&alice),
                Some(json!({ "kind": "story", "media_url": "https://cdn.example/a.jpg" })),
            );
            assert_eq!(status, 201, "{story}");
            let story_id = story["id"].as_str().unwrap().to_string();

            let (status, _) = call(
                "POST",
                &format!("{base}/api/profiles/{alice_id}/follow"),
                Some(&bob),
                None,
            );
            assert_eq!(status, 200);

            let (_, groups) = call("GET", &format!("{base}/api/stories"), Some(&bob), None);
            let groups = groups.as_array().unwrap();
            assert_eq!(groups.len(), 1);
            assert_eq!(groups[0]["author"]["id"], alice_id.as_str());
            assert_eq!(groups[0]["items"][0]["id"], story_id.as_str());
            assert_eq!(groups[0]["has_unseen"], true);

            let (_, groups) = call("GET", &format!("{base}/api/stories"), Some(&carol), None);
            assert!(groups.as_array().unwrap().is_empty());

            let (_, like) = call(
                "POST",
                &format!("{base}/api/ephemeral/{story_id}/like"),
                Some(&bob),
                None,
            );
            assert_eq!(like["liked"], true);
            assert_eq!(like["like_count"], 1);

            let (_, count) = call(
                "GET",
                &format!("{base}/api/notifications/unread-count"),
                Some(&alice),
                None,
            );
            // One follow plus one story like.
            assert_eq!(count["unread"], 2);

            let (status, _) = call(
                "GET",
                &format!("{base}/api/ephemeral/{story_id}/viewers"),
                Some(&bob),
                None,
            );
            assert_eq!(status, 403);
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn object_upload_and_download() {
    let server = start_server().await;
    tokio::task::spawn_blocking({
        let base = server.base_url.clone();
        move || {
            let (alice, alice_id) = sign_up(&base, "alice");

            let (status, stored) = upload(
                &format!("{base}/api/objects/media/{alice_id}/photo.png"),
                &alice,
                "image/png",
                b"not really a png",
            );
            assert_eq!(status, 201, "{stored}");
            let url = stored["url"].as_str().unwrap().to_string();
            assert_eq!(url, format!("{base}/objects/media/{alice_id}/photo.png"));

            let (status, bytes) = get_bytes(&url);
            assert_eq!(status, 200);
            assert_eq!(bytes, b"not really a png");

            let (status, _) = upload(
                &format!("{base}/api/objects/media/someone-else/photo.png"),
                &alice,
                "image/png",
                b"x",
            );
            assert_eq!(status, 403);

            let (status, profile) = upload(
                &format!("{base}/api/me/avatar"),
                &alice,
                "image/png",
                b"face",
            );
            assert_eq!(status, 200, "{profile}");
            let avatar = profile["avatar_url"].as_str().unwrap();
            assert!(avatar.contains(&format!("/objects/avatars/{alice_id}/avatar?v=")));

            let (status, _) = get_bytes(&format!("{base}/objects/media/{alice_id}/missing.png"));
            assert_eq!(status, 404);
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn admin_badges_and_impersonation() {
    let server = start_server().await;
    let base = server.base_url.clone();

    let (admin, admin_id) = tokio::task::spawn_blocking({
        let base = base.clone();
        move || sign_up(&base, "root")
    })
    .await
    .unwrap();
    {
        let backend = server.state.backend.lock().await;
        assert_eq!(bootstrap_admins(&backend, &["root".to_string()]).unwrap(), 1);
        // A second session for the same user is fine.
        auth::sign_in(&backend, "root", "correct horse").unwrap();
    }

    tokio::task::spawn_blocking(move || {
        let (bob, bob_id) = sign_up(&base, "bob");

        let (status, _) = call(
            "PUT",
            &format!("{base}/api/admin/profiles/{admin_id}/badge"),
            Some(&bob),
            Some(json!({ "badge": { "kind": "gold" } })),
        );
        assert_eq!(status, 403);

        let (status, profile) = call(
            "PUT",
            &format!("{base}/api/admin/profiles/{bob_id}/badge"),
            Some(&admin),
            Some(json!({ "badge": { "kind": "blue", "label": "creator" } })),
        );
        assert_eq!(status, 200, "{profile}");
        assert_eq!(profile["is_verified"], true);
        assert_eq!(profile["badge_kind"], "blue");

        let (status, session) = call(
            "POST",
            &format!("{base}/api/admin/impersonate/{bob_id}"),
            Some(&admin),
            None,
        );
        assert_eq!(status, 200, "{session}");
        assert_eq!(session["effective"]["id"], bob_id.as_str());

        let (_, session) = call("GET", &format!("{base}/api/auth/session"), Some(&admin), None);
        assert_eq!(session["is_impersonating"], true);
        assert_eq!(session["real"]["id"], admin_id.as_str());

        let (status, _) = call(
            "DELETE",
            &format!("{base}/api/admin/impersonate"),
            Some(&admin),
            None,
        );
        assert_eq!(status, 200);
        let (_, session) = call("GET", &format!("{base}/api/auth/session"), Some(&admin), None);
        assert_eq!(session["is_impersonating"], false);

        let (status, _) = call(
            "POST",
            &format!("{base}/api/admin/impersonate/{admin_id}"),
            Some(&bob),
            None,
        );
        assert_eq!(status, 403);
    })
    .await
    .unwrap();
}
