//! Auth provider: handle + password sign-up, bearer-token sessions, and the
//! session-change event stream.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::RngCore;
use serde::Serialize;

use crate::backend::Backend;
use crate::error::{CoreError, CoreResult};
use crate::logging;
use crate::storage::{AuthUserRow, Profile, SessionRow};

pub const MIN_HANDLE_LEN: usize = 3;
pub const MAX_HANDLE_LEN: usize = 30;
pub const MIN_PASSWORD_LEN: usize = 6;
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn { user_id: String },
    SignedOut { user_id: String },
}

/// Issued by sign-up and sign-in.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub token: String,
    pub user_id: String,
    pub username: String,
}

/// Handles are 3-30 chars of lowercase ASCII letters, digits, `_` and `.`.
pub fn validate_handle(handle: &str) -> CoreResult<()> {
    let len = handle.chars().count();
    if !(MIN_HANDLE_LEN..=MAX_HANDLE_LEN).contains(&len) {
        return Err(CoreError::validation(format!(
            "handle must be {MIN_HANDLE_LEN}-{MAX_HANDLE_LEN} characters"
        )));
    }
    if !handle
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
    {
        return Err(CoreError::validation(
            "handle may only contain a-z, 0-9, '_' and '.'",
        ));
    }
    Ok(())
}

/// Email-shaped login identifier synthesized from a handle.
pub fn login_identifier(handle: &str, email_domain: &str) -> String {
    format!("{handle}@{email_domain}")
}

pub fn hash_password(password: &str) -> CoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::Internal(format!("failed to hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn open_session(backend: &Backend, user_id: &str, username: &str) -> CoreResult<AuthSession> {
    let token = new_token();
    backend.storage.insert_session(&SessionRow {
        token: token.clone(),
        user_id: user_id.to_string(),
        impersonating_id: None,
        created_at: backend.now(),
    })?;
    backend.emit_auth_event(AuthEvent::SignedIn {
        user_id: user_id.to_string(),
    });
    Ok(AuthSession {
        token,
        user_id: user_id.to_string(),
        username: username.to_string(),
    })
}

/// Create an auth identity and its profile, then open a session.
pub fn sign_up(backend: &Backend, handle: &str, password: &str) -> CoreResult<AuthSession> {
    let handle = handle.trim().to_lowercase();
    validate_handle(&handle)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CoreError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let now = backend.now();
    let id = uuid::Uuid::new_v4().to_string();
    let user = AuthUserRow {
        id: id.clone(),
        email: login_identifier(&handle, &backend.settings.email_domain),
        password_hash: hash_password(password)?,
        created_at: now,
    };
    backend
        .storage
        .insert_auth_user_with_profile(&user, &Profile::new(&id, &handle, now))?;
    crate::hlog!("auth: signed up {} as @{}", logging::actor_id(&id), handle);

    open_session(backend, &id, &handle)
}

/// Sign in with a handle or a full login identifier.
pub fn sign_in(backend: &Backend, login: &str, password: &str) -> CoreResult<AuthSession> {
    let login = login.trim().to_lowercase();
    let email = if login.contains('@') {
        login
    } else {
        login_identifier(&login, &backend.settings.email_domain)
    };

    let Some(user) = backend.storage.get_auth_user_by_email(&email)? else {
        return Err(CoreError::Unauthenticated);
    };
    if !verify_password(password, &user.password_hash) {
        crate::hlog!("auth: bad password for {}", logging::actor_id(&user.id));
        return Err(CoreError::Unauthenticated);
    }

    let username = match backend.storage.get_profile(&user.id)? {
        Some(p) => p.username,
        None => email.split('@').next().unwrap_or_default().to_string(),
    };
    open_session(backend, &user.id, &username)
}

/// Revoke a session token. Unknown tokens are a no-op.
pub fn sign_out(backend: &Backend, token: &str) -> CoreResult<bool> {
    let Some(session) = backend.storage.get_session(token)? else {
        return Ok(false);
    };
    backend.storage.delete_session(token)?;
    backend.emit_auth_event(AuthEvent::SignedOut {
        user_id: session.user_id,
    });
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;

    fn backend() -> Backend {
        Backend::in_memory(Arc::new(ManualClock::new(1_000))).unwrap()
    }

    #[test]
    fn test_validate_handle() {
        assert!(validate_handle("alice_01").is_ok());
        assert!(validate_handle("a.b").is_ok());
        assert!(validate_handle("al").is_err());
        assert!(validate_handle("Alice").is_err());
        assert!(validate_handle("al ice").is_err());
        assert!(validate_handle(&"x".repeat(31)).is_err());
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }

    #[test]
    fn test_sign_up_sign_in_sign_out() {
        let backend = backend();
        let mut events = backend.subscribe_auth_events();

        let session = sign_up(&backend, "Alice", "secret1").unwrap();
        assert_eq!(session.username, "alice");
        let user = backend
            .storage
            .get_auth_user_by_email("alice@hearth.local")
            .unwrap()
            .unwrap();
        assert_eq!(user.id, session.user_id);
        assert!(backend.storage.get_profile(&user.id).unwrap().is_some());

        let again = sign_in(&backend, "alice", "secret1").unwrap();
        assert_ne!(again.token, session.token);
        assert!(matches!(
            sign_in(&backend, "alice", "wrong!!"),
            Err(CoreError::Unauthenticated)
        ));

        assert!(sign_out(&backend, &again.token).unwrap());
        assert!(!sign_out(&backend, &again.token).unwrap());

        assert!(matches!(events.try_recv().unwrap(), AuthEvent::SignedIn { .. }));
        assert!(matches!(events.try_recv().unwrap(), AuthEvent::SignedIn { .. }));
        assert!(matches!(events.try_recv().unwrap(), AuthEvent::SignedOut { .. }));
    }

    #[test]
    fn test_sign_up_rejects_duplicates_and_short_passwords() {
        let backend = backend();
        sign_up(&backend, "bob", "secret1").unwrap();
        let err = sign_up(&backend, "bob", "secret2").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Conflict);
        let err = sign_up(&backend, "carol", "123").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);
    }
}
