//! Row-level authorization predicates.
//!
//! Every write path calls one of these before touching storage. Rejections
//! are logged under `authz:` and surface as [`CoreError::Forbidden`].

use crate::error::{CoreError, CoreResult};
use crate::identity::SessionContext;
use crate::logging;
use crate::realtime::Audience;
use crate::storage::{EphemeralContent, Profile, Storage};

fn reject(ctx_actor: &str, what: &str) -> CoreError {
    crate::hlog!("authz: {} denied: {}", logging::actor_id(ctx_actor), what);
    CoreError::forbidden(what.to_string())
}

/// The row's owner column must equal the caller's effective actor.
pub fn ensure_actor(ctx: &SessionContext, owner_id: &str, what: &str) -> CoreResult<()> {
    if ctx.actor_id() == owner_id {
        Ok(())
    } else {
        Err(reject(ctx.actor_id(), what))
    }
}

/// Owner, or an admin acting with their real identity.
pub fn ensure_actor_or_admin(ctx: &SessionContext, owner_id: &str, what: &str) -> CoreResult<()> {
    if ctx.actor_id() == owner_id || ctx.is_admin {
        Ok(())
    } else {
        Err(reject(ctx.actor_id(), what))
    }
}

/// Role is checked on the real actor, so impersonating a non-admin keeps
/// admin rights and impersonating is never a way to gain them.
pub fn ensure_admin(ctx: &SessionContext) -> CoreResult<()> {
    if ctx.is_admin {
        Ok(())
    } else {
        Err(reject(&ctx.real.id, "admin role required"))
    }
}

pub fn ensure_participant(
    storage: &Storage,
    ctx: &SessionContext,
    conversation_id: &str,
) -> CoreResult<()> {
    if storage.is_participant(conversation_id, ctx.actor_id())? {
        Ok(())
    } else {
        Err(reject(
            ctx.actor_id(),
            &format!("not a participant of {}", logging::conv_id(conversation_id)),
        ))
    }
}

/// Inputs to the ephemeral visibility rule, gathered from storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisibilityFacts {
    pub is_author: bool,
    pub author_is_private: bool,
    pub viewer_follows_author: bool,
    pub close_friends_only: bool,
    pub viewer_is_close_friend: bool,
    pub expired: bool,
}

/// Own content is always visible while unexpired. Otherwise the author must
/// be public or followed by the viewer, and close-friends-only content also
/// needs a close-friend edge from author to viewer.
pub fn can_view_ephemeral(f: &VisibilityFacts) -> bool {
    if f.expired {
        return false;
    }
    if f.is_author {
        return true;
    }
    if f.author_is_private && !f.viewer_follows_author {
        return false;
    }
    !f.close_friends_only || f.viewer_is_close_friend
}

/// Expired content reads as missing; content hidden by privacy or the
/// close-friends flag is a policy rejection.
pub fn ensure_can_view_ephemeral(
    viewer_id: &str,
    content_id: &str,
    facts: &VisibilityFacts,
) -> CoreResult<()> {
    if facts.expired {
        return Err(CoreError::not_found(format!("content {content_id}")));
    }
    if can_view_ephemeral(facts) {
        Ok(())
    } else {
        Err(reject(
            viewer_id,
            &format!("content {} not visible", logging::content_id(content_id)),
        ))
    }
}

pub fn visibility_facts(
    storage: &Storage,
    viewer_id: &str,
    author: &Profile,
    content: &EphemeralContent,
    now: u64,
) -> CoreResult<VisibilityFacts> {
    let is_author = viewer_id == author.id;
    Ok(VisibilityFacts {
        is_author,
        author_is_private: author.is_private,
        viewer_follows_author: !is_author && storage.is_following(viewer_id, &author.id)?,
        close_friends_only: content.close_friends_only,
        viewer_is_close_friend: content.close_friends_only
            && !is_author
            && storage.is_close_friend(&author.id, viewer_id)?,
        expired: content.expires_at <= now,
    })
}

/// Posts of a private author are visible to the author and followers only.
pub fn can_view_posts_of(storage: &Storage, viewer_id: &str, author: &Profile) -> CoreResult<bool> {
    if viewer_id == author.id || !author.is_private {
        return Ok(true);
    }
    Ok(storage.is_following(viewer_id, &author.id)?)
}

pub fn ensure_can_view_posts(storage: &Storage, viewer_id: &str, author: &Profile) -> CoreResult<()> {
    if can_view_posts_of(storage, viewer_id, author)? {
        Ok(())
    } else {
        Err(reject(
            viewer_id,
            &format!("posts of private {}", logging::actor_id(&author.id)),
        ))
    }
}

/// Realtime recipients of a post event: anyone for a public author, the
/// author and followers otherwise.
pub fn post_audience(storage: &Storage, author: &Profile) -> CoreResult<Audience> {
    if !author.is_private {
        return Ok(Audience::Everyone);
    }
    let mut ids: Vec<String> = storage
        .list_followers(&author.id)?
        .into_iter()
        .map(|p| p.id)
        .collect();
    ids.push(author.id.clone());
    Ok(Audience::Only(ids))
}

/// Realtime recipients of a story or note event: the author plus whoever
/// passes [`can_view_ephemeral`] among followers, or among close friends for
/// close-friends-only content.
pub fn ephemeral_audience(
    storage: &Storage,
    author: &Profile,
    close_friends_only: bool,
) -> CoreResult<Audience> {
    let mut ids = Vec::new();
    if close_friends_only {
        for friend in storage.list_close_friends(&author.id)? {
            if !author.is_private || storage.is_following(&friend.id, &author.id)? {
                ids.push(friend.id);
            }
        }
    } else {
        ids.extend(storage.list_followers(&author.id)?.into_iter().map(|p| p.id));
    }
    ids.push(author.id.clone());
    Ok(Audience::Only(ids))
}

/// Object paths are caller-scoped: the first segment must be the caller's id
/// and the path may not contain empty, `.` or `..` segments.
pub fn object_path_allowed(caller_id: &str, path: &str) -> bool {
    let mut segments = path.split('/');
    if segments.next() != Some(caller_id) {
        return false;
    }
    let mut rest = 0;
    for seg in segments {
        if seg.is_empty() || seg == "." || seg == ".." || seg.contains('\\') {
            return false;
        }
        rest += 1;
    }
    rest > 0
}

pub fn ensure_object_path(ctx: &SessionContext, path: &str) -> CoreResult<()> {
    if object_path_allowed(ctx.actor_id(), path) {
        Ok(())
    } else {
        Err(reject(ctx.actor_id(), &format!("object path {path} outside caller prefix")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> VisibilityFacts {
        VisibilityFacts::default()
    }

    #[test]
    fn public_author_visible_without_follow() {
        assert!(can_view_ephemeral(&facts()));
    }

    #[test]
    fn private_author_needs_follow() {
        let f = VisibilityFacts {
            author_is_private: true,
            ..facts()
        };
        assert!(!can_view_ephemeral(&f));
        assert!(can_view_ephemeral(&VisibilityFacts {
            viewer_follows_author: true,
            ..f
        }));
    }

    #[test]
    fn close_friends_needs_edge_even_when_following() {
        let f = VisibilityFacts {
            viewer_follows_author: true,
            close_friends_only: true,
            ..facts()
        };
        assert!(!can_view_ephemeral(&f));
        assert!(can_view_ephemeral(&VisibilityFacts {
            viewer_is_close_friend: true,
            ..f
        }));
    }

    #[test]
    fn author_sees_own_until_expiry() {
        let f = VisibilityFacts {
            is_author: true,
            author_is_private: true,
            close_friends_only: true,
            ..facts()
        };
        assert!(can_view_ephemeral(&f));
        assert!(!can_view_ephemeral(&VisibilityFacts { expired: true, ..f }));
    }

    #[test]
    fn object_paths_are_caller_scoped() {
        assert!(object_path_allowed("u1", "u1/avatar.png"));
        assert!(object_path_allowed("u1", "u1/stories/a.jpg"));
        assert!(!object_path_allowed("u1", "u2/avatar.png"));
        assert!(!object_path_allowed("u1", "u1"));
        assert!(!object_path_allowed("u1", "u1/../u2/x"));
        assert!(!object_path_allowed("u1", "u1//x"));
        assert!(!object_path_allowed("u1", "/u1/x"));
    }
}
