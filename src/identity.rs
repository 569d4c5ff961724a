//! Session resolution and admin impersonation.
//!
//! A [`SessionContext`] is resolved from a bearer token at the boundary and
//! passed explicitly to every core operation. It carries both the real actor
//! (who signed in) and the effective actor (who reads and writes). They differ
//! only while an admin is viewing as someone else.

use serde::Serialize;

use crate::backend::Backend;
use crate::error::{CoreError, CoreResult};
use crate::logging;
use crate::policy;
use crate::storage::{Profile, Role, SessionRow};

#[derive(Debug, Clone, Serialize)]
pub struct SessionContext {
    #[serde(skip)]
    pub token: String,
    pub real: Profile,
    pub effective: Profile,
    /// Role of the real actor.
    pub is_admin: bool,
}

impl SessionContext {
    /// Id every read and write is attributed to.
    pub fn actor_id(&self) -> &str {
        &self.effective.id
    }

    pub fn is_impersonating(&self) -> bool {
        self.real.id != self.effective.id
    }
}

/// Create the profile for an identity that has none yet. Handle comes from
/// the login identifier, suffixed if already taken.
fn ensure_profile(backend: &Backend, user_id: &str) -> CoreResult<Profile> {
    if let Some(profile) = backend.storage.get_profile(user_id)? {
        return Ok(profile);
    }
    let user = backend
        .storage
        .get_auth_user(user_id)?
        .ok_or(CoreError::Unauthenticated)?;
    let base = user.email.split('@').next().unwrap_or("user").to_string();
    let mut handle = base.clone();
    let mut n = 1;
    while backend.storage.get_profile_by_username(&handle)?.is_some() {
        n += 1;
        handle = format!("{base}{n}");
    }
    let profile = Profile::new(user_id, &handle, backend.now());
    backend.storage.insert_profile_if_absent(&profile)?;
    crate::hlog!("identity: created profile @{} for {}", handle, logging::actor_id(user_id));
    Ok(profile)
}

fn context_for(backend: &Backend, session: &SessionRow) -> CoreResult<SessionContext> {
    let real = ensure_profile(backend, &session.user_id)?;
    let is_admin = backend.storage.has_role(&real.id, Role::Admin)?;

    let effective = match session.impersonating_id {
        // Impersonation survives only while the real actor is still admin.
        Some(ref target) if is_admin => backend
            .storage
            .get_profile(target)?
            .unwrap_or_else(|| real.clone()),
        _ => real.clone(),
    };

    Ok(SessionContext {
        token: session.token.clone(),
        real,
        effective,
        is_admin,
    })
}

/// Resolve a bearer token. Bumps the real actor's last-activity timestamp.
pub fn resolve_session(backend: &Backend, token: &str) -> CoreResult<SessionContext> {
    let session = backend
        .storage
        .get_session(token)?
        .ok_or(CoreError::Unauthenticated)?;
    let mut ctx = context_for(backend, &session)?;

    let now = backend.now();
    backend.storage.update_last_seen(&ctx.real.id, now)?;
    ctx.real.last_seen_at = Some(now);
    if !ctx.is_impersonating() {
        ctx.effective.last_seen_at = Some(now);
    }
    Ok(ctx)
}

/// Swap the effective actor to `target_id`. Admin only.
pub fn impersonate(
    backend: &Backend,
    ctx: &SessionContext,
    target_id: &str,
) -> CoreResult<SessionContext> {
    policy::ensure_admin(ctx)?;
    let target = backend
        .storage
        .get_profile(target_id)?
        .ok_or_else(|| CoreError::not_found(format!("profile {target_id}")))?;

    let stored = if target.id == ctx.real.id {
        None
    } else {
        Some(target.id.as_str())
    };
    backend
        .storage
        .set_session_impersonation(&ctx.token, stored)?;
    crate::hlog!(
        "identity: {} now viewing as {}",
        logging::actor_id(&ctx.real.id),
        logging::actor_id(&target.id)
    );

    Ok(SessionContext {
        token: ctx.token.clone(),
        real: ctx.real.clone(),
        effective: target,
        is_admin: ctx.is_admin,
    })
}

/// Restore the real actor. A no-op when not impersonating.
pub fn exit_impersonation(backend: &Backend, ctx: &SessionContext) -> CoreResult<SessionContext> {
    if ctx.is_impersonating() {
        backend.storage.set_session_impersonation(&ctx.token, None)?;
        crate::hlog!("identity: {} stopped impersonating", logging::actor_id(&ctx.real.id));
    }
    Ok(SessionContext {
        token: ctx.token.clone(),
        real: ctx.real.clone(),
        effective: ctx.real.clone(),
        is_admin: ctx.is_admin,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth;
    use crate::clock::ManualClock;

    fn backend() -> Backend {
        Backend::in_memory(Arc::new(ManualClock::new(1_000))).unwrap()
    }

    #[test]
    fn test_resolve_unknown_token() {
        let backend = backend();
        assert!(matches!(
            resolve_session(&backend, "nope"),
            Err(CoreError::Unauthenticated)
        ));
    }

    #[test]
    fn test_resolve_bumps_last_seen() {
        let backend = backend();
        let s = auth::sign_up(&backend, "alice", "secret1").unwrap();
        let ctx = resolve_session(&backend, &s.token).unwrap();
        assert_eq!(ctx.actor_id(), s.user_id);
        assert!(!ctx.is_admin);
        assert_eq!(ctx.real.last_seen_at, Some(1_000));
        let stored = backend.storage.get_profile(&s.user_id).unwrap().unwrap();
        assert_eq!(stored.last_seen_at, Some(1_000));
    }

    #[test]
    fn test_impersonation_requires_admin() {
        let backend = backend();
        let a = auth::sign_up(&backend, "alice", "secret1").unwrap();
        let b = auth::sign_up(&backend, "bob", "secret1").unwrap();
        let ctx = resolve_session(&backend, &a.token).unwrap();
        let err = impersonate(&backend, &ctx, &b.user_id).unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[test]
    fn test_impersonate_and_exit() {
        let backend = backend();
        let a = auth::sign_up(&backend, "admin", "secret1").unwrap();
        let b = auth::sign_up(&backend, "bob", "secret1").unwrap();
        backend.storage.grant_role(&a.user_id, Role::Admin).unwrap();

        let ctx = resolve_session(&backend, &a.token).unwrap();
        let viewing = impersonate(&backend, &ctx, &b.user_id).unwrap();
        assert_eq!(viewing.actor_id(), b.user_id);
        assert_eq!(viewing.real.id, a.user_id);

        // Persisted on the session, so a fresh resolution sees it too.
        let again = resolve_session(&backend, &a.token).unwrap();
        assert_eq!(again.actor_id(), b.user_id);
        assert!(again.is_admin);

        let back = exit_impersonation(&backend, &again).unwrap();
        assert_eq!(back.actor_id(), a.user_id);
        let back2 = exit_impersonation(&backend, &back).unwrap();
        assert_eq!(back2.actor_id(), a.user_id);
        assert_eq!(resolve_session(&backend, &a.token).unwrap().actor_id(), a.user_id);
    }

    #[test]
    fn test_impersonate_missing_target() {
        let backend = backend();
        let a = auth::sign_up(&backend, "admin", "secret1").unwrap();
        backend.storage.grant_role(&a.user_id, Role::Admin).unwrap();
        let ctx = resolve_session(&backend, &a.token).unwrap();
        assert!(matches!(
            impersonate(&backend, &ctx, "ghost"),
            Err(CoreError::NotFound(_))
        ));
    }
}
