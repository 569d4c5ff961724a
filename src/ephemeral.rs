//! Stories and notes: time-boxed content with relationship-gated visibility
//! and per-viewer seen/liked state.
//!
//! Expiry is evaluated at read time against `expires_at`; nothing deletes
//! expired rows here. Every read path goes through storage queries that
//! filter on `expires_at > now` or through [`policy::visibility_facts`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::{CoreError, CoreResult};
use crate::identity::SessionContext;
use crate::logging;
use crate::policy;
use crate::realtime::{Audience, ChangeEvent, ChangeOp, Table};
use crate::storage::{
    ActorSummary, ContentKind, EphemeralContent, JoinTable, NewNotification, NotificationKind,
    Profile, ViewerRow,
};

pub const MAX_NOTE_CHARS: usize = 60;
pub const MAX_CAPTION_CHARS: usize = 2_200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentPayload {
    Story {
        media_url: String,
        #[serde(default)]
        media_type: Option<String>,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        close_friends_only: bool,
    },
    Note {
        text: String,
    },
}

impl ContentPayload {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentPayload::Story { .. } => ContentKind::Story,
            ContentPayload::Note { .. } => ContentKind::Note,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        match self {
            ContentPayload::Story {
                media_url, caption, ..
            } => {
                if media_url.trim().is_empty() {
                    return Err(CoreError::validation("story needs a media reference"));
                }
                if caption
                    .as_ref()
                    .is_some_and(|c| c.chars().count() > MAX_CAPTION_CHARS)
                {
                    return Err(CoreError::validation(format!(
                        "caption longer than {MAX_CAPTION_CHARS} characters"
                    )));
                }
            }
            ContentPayload::Note { text } => {
                if text.trim().is_empty() {
                    return Err(CoreError::validation("note is empty"));
                }
                if text.chars().count() > MAX_NOTE_CHARS {
                    return Err(CoreError::validation(format!(
                        "note longer than {MAX_NOTE_CHARS} characters"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// One piece of content with the viewer's interaction state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentItem {
    #[serde(flatten)]
    pub content: EphemeralContent,
    pub seen: bool,
    pub liked: bool,
    pub like_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorGroup {
    pub author: ActorSummary,
    /// Oldest first.
    pub items: Vec<ContentItem>,
    pub has_unseen: bool,
    pub latest_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: u32,
}

/// Create content with the configured TTL for its kind.
pub fn create(backend: &Backend, ctx: &SessionContext, payload: ContentPayload) -> CoreResult<EphemeralContent> {
    let ttl_ms = match payload.kind() {
        ContentKind::Story => backend.settings.story_ttl_ms,
        ContentKind::Note => backend.settings.note_ttl_ms,
    };
    create_with_ttl(backend, ctx, payload, ttl_ms)
}

pub fn create_with_ttl(
    backend: &Backend,
    ctx: &SessionContext,
    payload: ContentPayload,
    ttl_ms: u64,
) -> CoreResult<EphemeralContent> {
    payload.validate()?;
    if ttl_ms == 0 {
        return Err(CoreError::validation("ttl must be positive"));
    }

    let now = backend.now();
    let kind = payload.kind();
    let (text, media_url, media_type, close_friends_only) = match payload {
        ContentPayload::Story {
            media_url,
            media_type,
            caption,
            close_friends_only,
        } => (
            caption.filter(|c| !c.trim().is_empty()),
            Some(media_url),
            media_type,
            close_friends_only,
        ),
        ContentPayload::Note { text } => (Some(text.trim().to_string()), None, None, false),
    };
    let content = EphemeralContent {
        id: uuid::Uuid::new_v4().to_string(),
        author_id: ctx.actor_id().to_string(),
        kind,
        text,
        media_url,
        media_type,
        close_friends_only,
        created_at: now,
        expires_at: now.saturating_add(ttl_ms),
    };
    backend.storage.insert_ephemeral(&content)?;

    crate::hlog!(
        "{}: {} by {}{}",
        kind.as_str(),
        logging::content_id(&content.id),
        logging::actor_id(&content.author_id),
        if close_friends_only { " (close friends)" } else { "" }
    );

    let author = backend
        .storage
        .get_profile(&content.author_id)?
        .unwrap_or_else(|| ctx.effective.clone());
    let audience = policy::ephemeral_audience(&backend.storage, &author, close_friends_only)?;
    backend.publish(
        ChangeEvent::new(Table::EphemeralContent, ChangeOp::Insert, &content.id, now)
            .scoped(&content.author_id)
            .with_audience(audience),
    );
    Ok(content)
}

/// Authors have always seen their own content.
fn item_for(backend: &Backend, viewer: &str, content: EphemeralContent) -> CoreResult<ContentItem> {
    Ok(ContentItem {
        seen: content.author_id == viewer
            || backend
                .storage
                .has_join(JoinTable::EphemeralViews, &content.id, viewer)?,
        liked: backend
            .storage
            .has_join(JoinTable::EphemeralLikes, &content.id, viewer)?,
        like_count: backend
            .storage
            .count_join(JoinTable::EphemeralLikes, &content.id)?,
        content,
    })
}

/// Content the caller can see, grouped by author. Candidates are the
/// caller's own content and that of authors the caller follows; each item
/// is then checked against the visibility rule. Authors with something
/// unseen come first, then by most recent item.
pub fn list_visible(backend: &Backend, ctx: &SessionContext, kind: ContentKind) -> CoreResult<Vec<AuthorGroup>> {
    let viewer = ctx.actor_id();
    let now = backend.now();
    let candidates = backend.storage.list_ephemeral_candidates(viewer, kind, now)?;

    let mut authors: HashMap<String, Profile> = HashMap::new();
    let mut groups: Vec<AuthorGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for content in candidates {
        if !authors.contains_key(&content.author_id) {
            match backend.storage.get_profile(&content.author_id)? {
                Some(p) => {
                    authors.insert(p.id.clone(), p);
                }
                None => continue,
            }
        }
        let Some(author) = authors.get(&content.author_id) else {
            continue;
        };
        let facts = policy::visibility_facts(&backend.storage, viewer, author, &content, now)?;
        if !policy::can_view_ephemeral(&facts) {
            continue;
        }

        let item = item_for(backend, viewer, content)?;
        let slot = match index.get(&item.content.author_id) {
            Some(&i) => i,
            None => {
                index.insert(item.content.author_id.clone(), groups.len());
                groups.push(AuthorGroup {
                    author: ActorSummary::from(author),
                    items: Vec::new(),
                    has_unseen: false,
                    latest_at: 0,
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[slot];
        group.has_unseen |= !item.seen;
        group.latest_at = group.latest_at.max(item.content.created_at);
        group.items.push(item);
    }

    sort_groups(&mut groups);
    Ok(groups)
}

fn sort_groups(groups: &mut [AuthorGroup]) {
    groups.sort_by(|a, b| {
        b.has_unseen
            .cmp(&a.has_unseen)
            .then(b.latest_at.cmp(&a.latest_at))
            .then_with(|| a.author.id.cmp(&b.author.id))
    });
}

/// Re-apply expiry to groups read earlier, for callers holding on to a
/// listing. Items with `expires_at <= now` are dropped, then empty groups.
pub fn drop_expired(groups: Vec<AuthorGroup>, now: u64) -> Vec<AuthorGroup> {
    let mut kept: Vec<AuthorGroup> = groups
        .into_iter()
        .filter_map(|mut group| {
            group.items.retain(|i| i.content.expires_at > now);
            if group.items.is_empty() {
                return None;
            }
            group.has_unseen = group.items.iter().any(|i| !i.seen);
            group.latest_at = group
                .items
                .iter()
                .map(|i| i.content.created_at)
                .max()
                .unwrap_or(0);
            Some(group)
        })
        .collect();
    sort_groups(&mut kept);
    kept
}

/// One author's active content as the caller may see it.
pub fn list_for_author(
    backend: &Backend,
    ctx: &SessionContext,
    author_id: &str,
    kind: ContentKind,
) -> CoreResult<Vec<ContentItem>> {
    let viewer = ctx.actor_id();
    let author = backend
        .storage
        .get_profile(author_id)?
        .ok_or_else(|| CoreError::not_found(format!("profile {author_id}")))?;
    let now = backend.now();
    let mut items = Vec::new();
    for content in backend.storage.list_ephemeral_by_author(author_id, kind, now)? {
        let facts = policy::visibility_facts(&backend.storage, viewer, &author, &content, now)?;
        if policy::can_view_ephemeral(&facts) {
            items.push(item_for(backend, viewer, content)?);
        }
    }
    Ok(items)
}

fn load_visible(backend: &Backend, ctx: &SessionContext, content_id: &str) -> CoreResult<EphemeralContent> {
    let content = backend
        .storage
        .get_ephemeral(content_id)?
        .ok_or_else(|| CoreError::not_found(format!("content {content_id}")))?;
    let author = backend
        .storage
        .get_profile(&content.author_id)?
        .ok_or_else(|| CoreError::not_found(format!("profile {}", content.author_id)))?;
    let facts = policy::visibility_facts(
        &backend.storage,
        ctx.actor_id(),
        &author,
        &content,
        backend.now(),
    )?;
    policy::ensure_can_view_ephemeral(ctx.actor_id(), content_id, &facts)?;
    Ok(content)
}

/// Record that the caller saw the content. Repeat calls are no-ops, and an
/// author viewing their own content is not recorded.
pub fn mark_seen(backend: &Backend, ctx: &SessionContext, content_id: &str) -> CoreResult<()> {
    let content = load_visible(backend, ctx, content_id)?;
    if content.author_id == ctx.actor_id() {
        return Ok(());
    }
    backend.storage.insert_join(
        JoinTable::EphemeralViews,
        content_id,
        ctx.actor_id(),
        backend.now(),
    )?;
    Ok(())
}

/// Flip the caller's like. Transitioning to liked notifies the author in the
/// same transaction, unless the caller is the author.
pub fn toggle_like(backend: &Backend, ctx: &SessionContext, content_id: &str) -> CoreResult<LikeState> {
    let content = load_visible(backend, ctx, content_id)?;
    let viewer = ctx.actor_id();
    let now = backend.now();

    let notification = (content.author_id != viewer).then(|| NewNotification {
        recipient_id: content.author_id.clone(),
        actor_id: viewer.to_string(),
        kind: match content.kind {
            ContentKind::Story => NotificationKind::StoryLike,
            ContentKind::Note => NotificationKind::NoteLike,
        },
        entity_type: Some(content.kind.as_str().to_string()),
        entity_id: Some(content.id.clone()),
        message: None,
        created_at: now,
    });
    let liked = backend.storage.toggle_join(
        JoinTable::EphemeralLikes,
        content_id,
        viewer,
        now,
        notification.as_ref(),
    )?;

    if liked && notification.is_some() {
        backend.publish(
            ChangeEvent::new(Table::Notifications, ChangeOp::Insert, content_id, now)
                .scoped(&content.author_id)
                .for_audience(vec![content.author_id.clone()]),
        );
    }
    Ok(LikeState {
        liked,
        like_count: backend
            .storage
            .count_join(JoinTable::EphemeralLikes, content_id)?,
    })
}

/// Who viewed the caller's content, most recent first. Author only.
pub fn list_viewers(backend: &Backend, ctx: &SessionContext, content_id: &str) -> CoreResult<Vec<ViewerRow>> {
    let content = backend
        .storage
        .get_ephemeral(content_id)?
        .ok_or_else(|| CoreError::not_found(format!("content {content_id}")))?;
    policy::ensure_actor(ctx, &content.author_id, "only the author can list viewers")?;
    Ok(backend.storage.list_viewers(content_id)?)
}

pub fn delete(backend: &Backend, ctx: &SessionContext, content_id: &str) -> CoreResult<()> {
    let content = backend
        .storage
        .get_ephemeral(content_id)?
        .ok_or_else(|| CoreError::not_found(format!("content {content_id}")))?;
    policy::ensure_actor_or_admin(ctx, &content.author_id, "only the author can delete content")?;
    let audience = match backend.storage.get_profile(&content.author_id)? {
        Some(author) => {
            policy::ephemeral_audience(&backend.storage, &author, content.close_friends_only)?
        }
        None => Audience::Only(vec![content.author_id.clone()]),
    };
    backend.storage.delete_ephemeral(content_id)?;
    backend.publish(
        ChangeEvent::new(Table::EphemeralContent, ChangeOp::Delete, content_id, backend.now())
            .scoped(&content.author_id)
            .with_audience(audience),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::auth;
    use crate::clock::ManualClock;
    use crate::identity::resolve_session;

    fn story(cf: bool) -> ContentPayload {
        ContentPayload::Story {
            media_url: "http://localhost/objects/stories/x.jpg".into(),
            media_type: Some("image/jpeg".into()),
            caption: None,
            close_friends_only: cf,
        }
    }

    fn setup() -> (Backend, Arc<ManualClock>, SessionContext, SessionContext) {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Backend::in_memory(clock.clone()).unwrap();
        let ctx = |name: &str| {
            let s = auth::sign_up(&backend, name, "secret1").unwrap();
            resolve_session(&backend, &s.token).unwrap()
        };
        let (a, b) = (ctx("alice"), ctx("bob"));
        (backend, clock, a, b)
    }

    #[test]
    fn test_payload_validation() {
        assert!(ContentPayload::Note { text: " ".into() }.validate().is_err());
        assert!(ContentPayload::Note {
            text: "x".repeat(MAX_NOTE_CHARS + 1)
        }
        .validate()
        .is_err());
        assert!(ContentPayload::Story {
            media_url: "".into(),
            media_type: None,
            caption: None,
            close_friends_only: false
        }
        .validate()
        .is_err());
        assert!(story(false).validate().is_ok());
    }

    #[test]
    fn test_expiry_is_fixed_at_creation() {
        let (backend, _, a, _) = setup();
        let c = create(&backend, &a, story(false)).unwrap();
        assert_eq!(c.expires_at - c.created_at, 24 * crate::clock::HOUR_MS);
    }

    #[test]
    fn test_mark_seen_is_idempotent() {
        let (backend, _, a, b) = setup();
        backend.storage.insert_follow(b.actor_id(), a.actor_id(), 1, None).unwrap();
        let c = create(&backend, &a, story(false)).unwrap();
        mark_seen(&backend, &b, &c.id).unwrap();
        mark_seen(&backend, &b, &c.id).unwrap();
        assert_eq!(backend.storage.count_join(JoinTable::EphemeralViews, &c.id).unwrap(), 1);
        let viewers = list_viewers(&backend, &a, &c.id).unwrap();
        assert_eq!(viewers.len(), 1);
        assert_eq!(viewers[0].viewer.username, "bob");
        assert!(matches!(
            list_viewers(&backend, &b, &c.id),
            Err(CoreError::Forbidden(_))
        ));
    }

    #[test]
    fn test_unseen_authors_sort_first() {
        let (backend, clock, a, b) = setup();
        let carol = {
            let s = auth::sign_up(&backend, "carol", "secret1").unwrap();
            resolve_session(&backend, &s.token).unwrap()
        };
        backend.storage.insert_follow(b.actor_id(), a.actor_id(), 1, None).unwrap();
        backend.storage.insert_follow(b.actor_id(), carol.actor_id(), 1, None).unwrap();

        let old = create(&backend, &a, story(false)).unwrap();
        clock.advance(Duration::from_secs(60));
        let newer = create(&backend, &carol, story(false)).unwrap();

        let groups = list_visible(&backend, &b, ContentKind::Story).unwrap();
        assert_eq!(groups[0].author.username, "carol");

        mark_seen(&backend, &b, &newer.id).unwrap();
        let groups = list_visible(&backend, &b, ContentKind::Story).unwrap();
        assert_eq!(groups[0].author.username, "alice");
        assert!(groups[0].has_unseen);
        assert!(!groups[1].has_unseen);
        assert_eq!(groups[0].items[0].content.id, old.id);
    }

    #[test]
    fn test_own_content_counts_as_seen() {
        let (backend, clock, a, b) = setup();
        backend.storage.insert_follow(a.actor_id(), b.actor_id(), 1, None).unwrap();
        create(&backend, &b, story(false)).unwrap();
        clock.advance(Duration::from_secs(60));
        create(&backend, &a, story(false)).unwrap();

        let groups = list_visible(&backend, &a, ContentKind::Story).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].author.username, "bob");
        assert!(groups[0].has_unseen);
        assert_eq!(groups[1].author.username, "alice");
        assert!(!groups[1].has_unseen);
        assert!(groups[1].items[0].seen);
    }

    #[test]
    fn test_drop_expired_prunes_stale_listing() {
        let (backend, clock, a, b) = setup();
        backend.storage.insert_follow(b.actor_id(), a.actor_id(), 1, None).unwrap();
        let short = create_with_ttl(&backend, &a, story(false), 1_000).unwrap();
        let long = create(&backend, &a, story(false)).unwrap();
        let groups = list_visible(&backend, &b, ContentKind::Story).unwrap();
        assert_eq!(groups[0].items.len(), 2);

        clock.advance(Duration::from_secs(1));
        let pruned = drop_expired(groups.clone(), backend.now());
        assert_eq!(pruned[0].items.len(), 1);
        assert_eq!(pruned[0].items[0].content.id, long.id);
        assert_ne!(pruned[0].items[0].content.id, short.id);
        assert!(drop_expired(groups, long.expires_at).is_empty());
    }

    #[test]
    fn test_toggle_like_notifies_author_once() {
        let (backend, _, a, b) = setup();
        let c = create(&backend, &a, ContentPayload::Note { text: "hi".into() }).unwrap();
        let on = toggle_like(&backend, &b, &c.id).unwrap();
        assert!(on.liked);
        assert_eq!(on.like_count, 1);
        let off = toggle_like(&backend, &b, &c.id).unwrap();
        assert!(!off.liked);
        assert_eq!(off.like_count, 0);

        let notes = backend.storage.list_notifications(a.actor_id(), false, 10).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::NoteLike);

        // Liking your own note never notifies.
        toggle_like(&backend, &a, &c.id).unwrap();
        assert_eq!(
            backend.storage.list_notifications(a.actor_id(), false, 10).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_delete_requires_author() {
        let (backend, _, a, b) = setup();
        let c = create(&backend, &a, story(false)).unwrap();
        assert!(matches!(delete(&backend, &b, &c.id), Err(CoreError::Forbidden(_))));
        delete(&backend, &a, &c.id).unwrap();
        assert!(backend.storage.get_ephemeral(&c.id).unwrap().is_none());
    }

    #[test]
    fn test_close_friends_story_event_skips_other_followers() {
        let (backend, _, a, b) = setup();
        let carol = {
            let s = auth::sign_up(&backend, "carol", "secret1").unwrap();
            resolve_session(&backend, &s.token).unwrap()
        };
        backend.storage.insert_follow(b.actor_id(), a.actor_id(), 1, None).unwrap();
        backend.storage.insert_follow(carol.actor_id(), a.actor_id(), 1, None).unwrap();
        backend.storage.insert_close_friend(a.actor_id(), carol.actor_id(), 1).unwrap();

        let mut rx = backend.feed.subscribe_all();
        let c = create(&backend, &a, story(true)).unwrap();
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.row_id, c.id);
        assert!(ev.visible_to(a.actor_id()));
        assert!(ev.visible_to(carol.actor_id()));
        assert!(!ev.visible_to(b.actor_id()));

        delete(&backend, &a, &c.id).unwrap();
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.op, ChangeOp::Delete);
        assert!(!ev.visible_to(b.actor_id()));
    }

    #[test]
    fn test_expired_content_reads_as_missing() {
        let (backend, clock, a, b) = setup();
        let c = create_with_ttl(&backend, &a, story(false), 1_000).unwrap();
        clock.advance(Duration::from_secs(1));
        assert!(matches!(mark_seen(&backend, &b, &c.id), Err(CoreError::NotFound(_))));
        assert!(list_for_author(&backend, &b, a.actor_id(), ContentKind::Story)
            .unwrap()
            .is_empty());
    }
}
