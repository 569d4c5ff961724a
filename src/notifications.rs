//! Notification inbox. Rows are written by the operations that trigger them
//! (likes, comments, follows) inside the same transaction as the primary row.

use serde::Serialize;

use crate::backend::Backend;
use crate::error::{CoreError, CoreResult};
use crate::identity::SessionContext;
use crate::storage::{ActorSummary, NotificationRow};

pub const DEFAULT_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationView {
    #[serde(flatten)]
    pub notification: NotificationRow,
    /// Who triggered it. `None` if that profile is gone.
    pub actor: Option<ActorSummary>,
}

/// Newest first.
pub fn list(
    backend: &Backend,
    ctx: &SessionContext,
    unread_only: bool,
    limit: u32,
) -> CoreResult<Vec<NotificationView>> {
    let rows = backend
        .storage
        .list_notifications(ctx.actor_id(), unread_only, limit)?;
    let mut result = Vec::with_capacity(rows.len());
    for notification in rows {
        let actor = backend
            .storage
            .get_profile(&notification.actor_id)?
            .map(|p| ActorSummary::from(&p));
        result.push(NotificationView {
            notification,
            actor,
        });
    }
    Ok(result)
}

pub fn unread_count(backend: &Backend, ctx: &SessionContext) -> CoreResult<u32> {
    Ok(backend.storage.count_unread_notifications(ctx.actor_id())?)
}

/// Another actor's notification reads as missing.
pub fn mark_read(backend: &Backend, ctx: &SessionContext, id: i64) -> CoreResult<()> {
    if backend.storage.mark_notification_read(id, ctx.actor_id())? {
        Ok(())
    } else {
        Err(CoreError::not_found(format!("notification {id}")))
    }
}

pub fn mark_all_read(backend: &Backend, ctx: &SessionContext) -> CoreResult<u32> {
    Ok(backend
        .storage
        .mark_all_notifications_read(ctx.actor_id())?)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth;
    use crate::clock::ManualClock;
    use crate::identity::resolve_session;
    use crate::social;

    #[test]
    fn test_inbox_lifecycle() {
        let backend = Backend::in_memory(Arc::new(ManualClock::new(1_000))).unwrap();
        let ctx = |name: &str| {
            let s = auth::sign_up(&backend, name, "secret1").unwrap();
            resolve_session(&backend, &s.token).unwrap()
        };
        let (a, b, c) = (ctx("alice"), ctx("bob"), ctx("carol"));
        social::follow(&backend, &b, a.actor_id()).unwrap();
        social::follow(&backend, &c, a.actor_id()).unwrap();

        let inbox = list(&backend, &a, false, DEFAULT_LIMIT).unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].actor.as_ref().unwrap().username, "carol");
        assert_eq!(unread_count(&backend, &a).unwrap(), 2);

        let first = inbox[0].notification.id;
        assert!(matches!(mark_read(&backend, &b, first), Err(CoreError::NotFound(_))));
        mark_read(&backend, &a, first).unwrap();
        assert_eq!(list(&backend, &a, true, DEFAULT_LIMIT).unwrap().len(), 1);
        assert_eq!(mark_all_read(&backend, &a).unwrap(), 1);
        assert_eq!(unread_count(&backend, &a).unwrap(), 0);
    }
}
