//! Admin-only operations: verification badges, role grants, profile listing,
//! and post takedown. Every entry point checks the real actor's role.

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::{CoreError, CoreResult};
use crate::identity::SessionContext;
use crate::logging;
use crate::policy;
use crate::storage::{BadgeKind, Profile, Role};

pub const MAX_BADGE_LABEL_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub kind: BadgeKind,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminProfileRow {
    #[serde(flatten)]
    pub profile: Profile,
    pub is_admin: bool,
}

fn require_profile(backend: &Backend, id: &str) -> CoreResult<Profile> {
    backend
        .storage
        .get_profile(id)?
        .ok_or_else(|| CoreError::not_found(format!("profile {id}")))
}

/// Give or remove a badge. A badge implies verification; removing it
/// leaves the verified flag as it was.
pub fn set_badge(
    backend: &Backend,
    ctx: &SessionContext,
    target_id: &str,
    badge: Option<Badge>,
) -> CoreResult<Profile> {
    policy::ensure_admin(ctx)?;
    let current = require_profile(backend, target_id)?;
    let now = backend.now();
    match badge {
        Some(Badge { kind, label }) => {
            let label = label
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());
            if label
                .as_ref()
                .is_some_and(|l| l.chars().count() > MAX_BADGE_LABEL_CHARS)
            {
                return Err(CoreError::validation("badge label is too long"));
            }
            backend
                .storage
                .set_badge(target_id, true, Some(kind), label.as_deref(), now)?;
        }
        None => {
            backend
                .storage
                .set_badge(target_id, current.is_verified, None, None, now)?;
        }
    }
    crate::hlog!(
        "moderation: {} set badge on {}",
        logging::actor_id(&ctx.real.id),
        logging::actor_id(target_id)
    );
    require_profile(backend, target_id)
}

/// Toggle verification. Unverifying also clears any badge.
pub fn set_verified(
    backend: &Backend,
    ctx: &SessionContext,
    target_id: &str,
    verified: bool,
) -> CoreResult<Profile> {
    policy::ensure_admin(ctx)?;
    let current = require_profile(backend, target_id)?;
    let now = backend.now();
    if verified {
        backend.storage.set_badge(
            target_id,
            true,
            current.badge_kind,
            current.badge_label.as_deref(),
            now,
        )?;
    } else {
        backend.storage.set_badge(target_id, false, None, None, now)?;
    }
    require_profile(backend, target_id)
}

pub fn grant_role(backend: &Backend, ctx: &SessionContext, target_id: &str, role: Role) -> CoreResult<bool> {
    policy::ensure_admin(ctx)?;
    require_profile(backend, target_id)?;
    let granted = backend.storage.grant_role(target_id, role)?;
    if granted {
        crate::hlog!(
            "moderation: {} granted {} to {}",
            logging::actor_id(&ctx.real.id),
            role.as_str(),
            logging::actor_id(target_id)
        );
    }
    Ok(granted)
}

/// An admin cannot revoke their own admin role.
pub fn revoke_role(backend: &Backend, ctx: &SessionContext, target_id: &str, role: Role) -> CoreResult<bool> {
    policy::ensure_admin(ctx)?;
    if role == Role::Admin && target_id == ctx.real.id {
        return Err(CoreError::validation("cannot revoke your own admin role"));
    }
    Ok(backend.storage.revoke_role(target_id, role)?)
}

pub fn list_profiles(
    backend: &Backend,
    ctx: &SessionContext,
    limit: u32,
    offset: u32,
) -> CoreResult<Vec<AdminProfileRow>> {
    policy::ensure_admin(ctx)?;
    let mut rows = Vec::new();
    for profile in backend.storage.list_profiles(limit, offset)? {
        rows.push(AdminProfileRow {
            is_admin: backend.storage.has_role(&profile.id, Role::Admin)?,
            profile,
        });
    }
    Ok(rows)
}

pub fn takedown_post(backend: &Backend, ctx: &SessionContext, post_id: &str) -> CoreResult<()> {
    policy::ensure_admin(ctx)?;
    if !backend.storage.delete_post(post_id)? {
        return Err(CoreError::not_found(format!("post {post_id}")));
    }
    crate::hlog!(
        "moderation: {} took down {}",
        logging::actor_id(&ctx.real.id),
        logging::content_id(post_id)
    );
    Ok(())
}

/// Grant admin to each listed handle that has a profile. Returns how many
/// new grants were made.
pub fn bootstrap_admins(backend: &Backend, handles: &[String]) -> CoreResult<usize> {
    let mut granted = 0;
    for handle in handles {
        let Some(profile) = backend.storage.get_profile_by_username(handle)? else {
            continue;
        };
        if backend.storage.grant_role(&profile.id, Role::Admin)? {
            crate::hlog!("moderation: bootstrap admin @{}", handle);
            granted += 1;
        }
    }
    Ok(granted)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth;
    use crate::clock::ManualClock;
    use crate::identity::resolve_session;

    fn setup() -> (Backend, SessionContext, SessionContext) {
        let backend = Backend::in_memory(Arc::new(ManualClock::new(1_000))).unwrap();
        let admin = auth::sign_up(&backend, "root", "secret1").unwrap();
        let user = auth::sign_up(&backend, "bob", "secret1").unwrap();
        assert_eq!(bootstrap_admins(&backend, &["root".to_string(), "ghost".to_string()]).unwrap(), 1);
        let a = resolve_session(&backend, &admin.token).unwrap();
        let b = resolve_session(&backend, &user.token).unwrap();
        (backend, a, b)
    }

    #[test]
    fn test_badge_implies_verified() {
        let (backend, admin, user) = setup();
        let p = set_badge(
            &backend,
            &admin,
            user.actor_id(),
            Some(Badge {
                kind: BadgeKind::Blue,
                label: Some("creator".into()),
            }),
        )
        .unwrap();
        assert!(p.is_verified);
        assert_eq!(p.badge_kind, Some(BadgeKind::Blue));

        let p = set_badge(&backend, &admin, user.actor_id(), None).unwrap();
        assert!(p.is_verified);
        assert!(p.badge_kind.is_none());
        assert!(p.badge_label.is_none());

        let p = set_verified(&backend, &admin, user.actor_id(), false).unwrap();
        assert!(!p.is_verified);
    }

    #[test]
    fn test_non_admin_rejected() {
        let (backend, admin, user) = setup();
        assert!(matches!(
            set_badge(&backend, &user, admin.actor_id(), None),
            Err(CoreError::Forbidden(_))
        ));
        assert!(list_profiles(&backend, &user, 10, 0).is_err());
        assert!(grant_role(&backend, &user, user.actor_id(), Role::Admin).is_err());
    }

    #[test]
    fn test_grant_and_list() {
        let (backend, admin, user) = setup();
        assert!(grant_role(&backend, &admin, user.actor_id(), Role::Admin).unwrap());
        let rows = list_profiles(&backend, &admin, 10, 0).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.is_admin));
        assert!(revoke_role(&backend, &admin, admin.actor_id(), Role::Admin).is_err());
    }
}
