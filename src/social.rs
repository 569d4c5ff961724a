//! Profiles, follow and close-friend edges, posts with likes, comments and
//! saves.

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::ephemeral::LikeState;
use crate::error::{CoreError, CoreResult};
use crate::identity::SessionContext;
use crate::logging;
use crate::policy;
use crate::realtime::{Audience, ChangeEvent, ChangeOp, Table};
use crate::storage::{
    ActorSummary, Comment, JoinTable, NewNotification, NotificationKind, Post, Profile,
};

pub const MAX_DISPLAY_NAME_CHARS: usize = 50;
pub const MAX_BIO_CHARS: usize = 150;
pub const MAX_COMMENT_CHARS: usize = 1_000;
pub const DEFAULT_FEED_SIZE: u32 = 50;

fn require_profile(backend: &Backend, id: &str) -> CoreResult<Profile> {
    backend
        .storage
        .get_profile(id)?
        .ok_or_else(|| CoreError::not_found(format!("profile {id}")))
}

fn notify_published(backend: &Backend, recipient: &str, entity_id: &str, at: u64) {
    backend.publish(
        ChangeEvent::new(Table::Notifications, ChangeOp::Insert, entity_id, at)
            .scoped(recipient)
            .for_audience(vec![recipient.to_string()]),
    );
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub profile: Profile,
    pub followers: u32,
    pub following: u32,
    pub is_following: bool,
    pub follows_you: bool,
}

/// Look up by id, or by handle when prefixed with `@`.
pub fn get_profile(backend: &Backend, ctx: &SessionContext, key: &str) -> CoreResult<ProfileView> {
    let profile = match key.strip_prefix('@') {
        Some(handle) => backend
            .storage
            .get_profile_by_username(handle)?
            .ok_or_else(|| CoreError::not_found(format!("profile @{handle}")))?,
        None => require_profile(backend, key)?,
    };
    let me = ctx.actor_id();
    Ok(ProfileView {
        followers: backend.storage.count_followers(&profile.id)?,
        following: backend.storage.count_following(&profile.id)?,
        is_following: backend.storage.is_following(me, &profile.id)?,
        follows_you: backend.storage.is_following(&profile.id, me)?,
        profile,
    })
}

pub fn search_profiles(backend: &Backend, prefix: &str, limit: u32) -> CoreResult<Vec<ActorSummary>> {
    let prefix = prefix.trim().trim_start_matches('@').to_lowercase();
    if prefix.is_empty() {
        return Ok(Vec::new());
    }
    Ok(backend
        .storage
        .search_profiles(&prefix, limit)?
        .iter()
        .map(ActorSummary::from)
        .collect())
}

/// Display fields an actor may change. `None` leaves a field unchanged; an
/// empty string clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub is_private: Option<bool>,
}

fn cleared(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn update_profile(backend: &Backend, ctx: &SessionContext, update: ProfileUpdate) -> CoreResult<Profile> {
    let mut profile = require_profile(backend, ctx.actor_id())?;
    if let Some(name) = update.display_name {
        if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(CoreError::validation(format!(
                "display name longer than {MAX_DISPLAY_NAME_CHARS} characters"
            )));
        }
        profile.display_name = cleared(name);
    }
    if let Some(bio) = update.bio {
        if bio.chars().count() > MAX_BIO_CHARS {
            return Err(CoreError::validation(format!(
                "bio longer than {MAX_BIO_CHARS} characters"
            )));
        }
        profile.bio = cleared(bio);
    }
    if let Some(url) = update.avatar_url {
        profile.avatar_url = cleared(url);
    }
    if let Some(private) = update.is_private {
        profile.is_private = private;
    }
    profile.updated_at = backend.now();
    backend.storage.update_profile_fields(&profile)?;
    Ok(profile)
}

// ---------------------------------------------------------------------------
// Follows and close friends
// ---------------------------------------------------------------------------

/// Follow `target_id`. Returns whether a new edge was created; following
/// again is a no-op and sends no second notification.
pub fn follow(backend: &Backend, ctx: &SessionContext, target_id: &str) -> CoreResult<bool> {
    let me = ctx.actor_id();
    if me == target_id {
        return Err(CoreError::validation("cannot follow yourself"));
    }
    require_profile(backend, target_id)?;
    let now = backend.now();
    let notification = NewNotification {
        recipient_id: target_id.to_string(),
        actor_id: me.to_string(),
        kind: NotificationKind::Follow,
        entity_type: Some("profile".to_string()),
        entity_id: Some(me.to_string()),
        message: None,
        created_at: now,
    };
    let created = backend
        .storage
        .insert_follow(me, target_id, now, Some(&notification))?;
    if created {
        crate::hlog!(
            "follow: {} -> {}",
            logging::actor_id(me),
            logging::actor_id(target_id)
        );
        backend.publish(
            ChangeEvent::new(Table::Follows, ChangeOp::Insert, target_id, now)
                .scoped(me)
                .for_audience(vec![me.to_string(), target_id.to_string()]),
        );
        notify_published(backend, target_id, me, now);
    }
    Ok(created)
}

pub fn unfollow(backend: &Backend, ctx: &SessionContext, target_id: &str) -> CoreResult<bool> {
    let me = ctx.actor_id();
    let removed = backend.storage.delete_follow(me, target_id)?;
    if removed {
        backend.publish(
            ChangeEvent::new(Table::Follows, ChangeOp::Delete, target_id, backend.now())
                .scoped(me)
                .for_audience(vec![me.to_string(), target_id.to_string()]),
        );
    }
    Ok(removed)
}

pub fn list_followers(backend: &Backend, profile_id: &str) -> CoreResult<Vec<ActorSummary>> {
    require_profile(backend, profile_id)?;
    Ok(backend
        .storage
        .list_followers(profile_id)?
        .iter()
        .map(ActorSummary::from)
        .collect())
}

pub fn list_following(backend: &Backend, profile_id: &str) -> CoreResult<Vec<ActorSummary>> {
    require_profile(backend, profile_id)?;
    Ok(backend
        .storage
        .list_following(profile_id)?
        .iter()
        .map(ActorSummary::from)
        .collect())
}

pub fn add_close_friend(backend: &Backend, ctx: &SessionContext, friend_id: &str) -> CoreResult<bool> {
    let me = ctx.actor_id();
    if me == friend_id {
        return Err(CoreError::validation("cannot add yourself to close friends"));
    }
    require_profile(backend, friend_id)?;
    Ok(backend
        .storage
        .insert_close_friend(me, friend_id, backend.now())?)
}

pub fn remove_close_friend(backend: &Backend, ctx: &SessionContext, friend_id: &str) -> CoreResult<bool> {
    Ok(backend
        .storage
        .delete_close_friend(ctx.actor_id(), friend_id)?)
}

pub fn list_close_friends(backend: &Backend, ctx: &SessionContext) -> CoreResult<Vec<ActorSummary>> {
    Ok(backend
        .storage
        .list_close_friends(ctx.actor_id())?
        .iter()
        .map(ActorSummary::from)
        .collect())
}

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPost {
    pub caption: Option<String>,
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub author: ActorSummary,
    pub like_count: u32,
    pub comment_count: u32,
    pub liked: bool,
    pub saved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentWithAuthor {
    pub comment: Comment,
    pub author: ActorSummary,
}

fn post_view(backend: &Backend, viewer: &str, post: Post, author: &Profile) -> CoreResult<PostView> {
    Ok(PostView {
        author: ActorSummary::from(author),
        like_count: backend.storage.count_join(JoinTable::PostLikes, &post.id)?,
        comment_count: backend.storage.count_comments(&post.id)?,
        liked: backend.storage.has_join(JoinTable::PostLikes, &post.id, viewer)?,
        saved: backend.storage.has_join(JoinTable::SavedPosts, &post.id, viewer)?,
        post,
    })
}

fn views(backend: &Backend, viewer: &str, posts: Vec<Post>) -> CoreResult<Vec<PostView>> {
    let mut result = Vec::with_capacity(posts.len());
    for post in posts {
        let author = require_profile(backend, &post.author_id)?;
        result.push(post_view(backend, viewer, post, &author)?);
    }
    Ok(result)
}

/// Load a post the caller is allowed to see.
fn load_post(backend: &Backend, ctx: &SessionContext, post_id: &str) -> CoreResult<(Post, Profile)> {
    let post = backend
        .storage
        .get_post(post_id)?
        .ok_or_else(|| CoreError::not_found(format!("post {post_id}")))?;
    let author = require_profile(backend, &post.author_id)?;
    policy::ensure_can_view_posts(&backend.storage, ctx.actor_id(), &author)?;
    Ok((post, author))
}

pub fn create_post(backend: &Backend, ctx: &SessionContext, new: NewPost) -> CoreResult<Post> {
    let caption = new.caption.and_then(cleared);
    let media_url = new.media_url.and_then(cleared);
    if caption.is_none() && media_url.is_none() {
        return Err(CoreError::validation("post needs a caption or media"));
    }
    if caption
        .as_ref()
        .is_some_and(|c| c.chars().count() > crate::ephemeral::MAX_CAPTION_CHARS)
    {
        return Err(CoreError::validation("caption is too long"));
    }
    let post = Post {
        id: uuid::Uuid::new_v4().to_string(),
        author_id: ctx.actor_id().to_string(),
        caption,
        media_url,
        created_at: backend.now(),
    };
    backend.storage.insert_post(&post)?;
    crate::hlog!(
        "post: {} by {}",
        logging::content_id(&post.id),
        logging::actor_id(&post.author_id)
    );
    let author = require_profile(backend, &post.author_id)?;
    backend.publish(
        ChangeEvent::new(Table::Posts, ChangeOp::Insert, &post.id, post.created_at)
            .scoped(&post.author_id)
            .with_audience(policy::post_audience(&backend.storage, &author)?),
    );
    Ok(post)
}

pub fn get_post(backend: &Backend, ctx: &SessionContext, post_id: &str) -> CoreResult<PostView> {
    let (post, author) = load_post(backend, ctx, post_id)?;
    post_view(backend, ctx.actor_id(), post, &author)
}

/// Author, or an admin, may delete.
pub fn delete_post(backend: &Backend, ctx: &SessionContext, post_id: &str) -> CoreResult<()> {
    let post = backend
        .storage
        .get_post(post_id)?
        .ok_or_else(|| CoreError::not_found(format!("post {post_id}")))?;
    policy::ensure_actor_or_admin(ctx, &post.author_id, "only the author can delete a post")?;
    let audience = match backend.storage.get_profile(&post.author_id)? {
        Some(author) => policy::post_audience(&backend.storage, &author)?,
        None => Audience::Only(vec![post.author_id.clone()]),
    };
    backend.storage.delete_post(post_id)?;
    backend.publish(
        ChangeEvent::new(Table::Posts, ChangeOp::Delete, post_id, backend.now())
            .scoped(&post.author_id)
            .with_audience(audience),
    );
    Ok(())
}

/// An author's posts, newest first. Private authors are visible to
/// themselves and their followers only.
pub fn list_posts_by_author(
    backend: &Backend,
    ctx: &SessionContext,
    author_id: &str,
    limit: u32,
) -> CoreResult<Vec<PostView>> {
    let author = require_profile(backend, author_id)?;
    if !policy::can_view_posts_of(&backend.storage, ctx.actor_id(), &author)? {
        return Ok(Vec::new());
    }
    let posts = backend.storage.list_posts_by_author(author_id, limit)?;
    let mut result = Vec::with_capacity(posts.len());
    for post in posts {
        result.push(post_view(backend, ctx.actor_id(), post, &author)?);
    }
    Ok(result)
}

/// The caller's posts and those of everyone they follow, newest first.
pub fn home_feed(backend: &Backend, ctx: &SessionContext, limit: u32) -> CoreResult<Vec<PostView>> {
    let posts = backend.storage.list_feed(ctx.actor_id(), limit)?;
    views(backend, ctx.actor_id(), posts)
}

pub fn list_saved(backend: &Backend, ctx: &SessionContext) -> CoreResult<Vec<PostView>> {
    let posts = backend.storage.list_saved_posts(ctx.actor_id())?;
    views(backend, ctx.actor_id(), posts)
}

pub fn toggle_post_like(backend: &Backend, ctx: &SessionContext, post_id: &str) -> CoreResult<LikeState> {
    let (post, _) = load_post(backend, ctx, post_id)?;
    let me = ctx.actor_id();
    let now = backend.now();
    let notification = (post.author_id != me).then(|| NewNotification {
        recipient_id: post.author_id.clone(),
        actor_id: me.to_string(),
        kind: NotificationKind::Like,
        entity_type: Some("post".to_string()),
        entity_id: Some(post.id.clone()),
        message: None,
        created_at: now,
    });
    let liked = backend.storage.toggle_join(
        JoinTable::PostLikes,
        post_id,
        me,
        now,
        notification.as_ref(),
    )?;
    if liked && notification.is_some() {
        notify_published(backend, &post.author_id, post_id, now);
    }
    Ok(LikeState {
        liked,
        like_count: backend.storage.count_join(JoinTable::PostLikes, post_id)?,
    })
}

/// Returns the new saved state.
pub fn toggle_save(backend: &Backend, ctx: &SessionContext, post_id: &str) -> CoreResult<bool> {
    load_post(backend, ctx, post_id)?;
    Ok(backend.storage.toggle_join(
        JoinTable::SavedPosts,
        post_id,
        ctx.actor_id(),
        backend.now(),
        None,
    )?)
}

pub fn add_comment(
    backend: &Backend,
    ctx: &SessionContext,
    post_id: &str,
    content: &str,
) -> CoreResult<CommentWithAuthor> {
    let content = content.trim();
    if content.is_empty() {
        return Err(CoreError::validation("comment is empty"));
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(CoreError::validation(format!(
            "comment longer than {MAX_COMMENT_CHARS} characters"
        )));
    }
    let (post, _) = load_post(backend, ctx, post_id)?;
    let me = ctx.actor_id();
    let now = backend.now();
    let comment = Comment {
        id: uuid::Uuid::new_v4().to_string(),
        post_id: post_id.to_string(),
        author_id: me.to_string(),
        content: content.to_string(),
        created_at: now,
    };
    let notification = (post.author_id != me).then(|| NewNotification {
        recipient_id: post.author_id.clone(),
        actor_id: me.to_string(),
        kind: NotificationKind::Comment,
        entity_type: Some("post".to_string()),
        entity_id: Some(post.id.clone()),
        message: Some(content.chars().take(80).collect()),
        created_at: now,
    });
    backend.storage.insert_comment(&comment, notification.as_ref())?;
    if notification.is_some() {
        notify_published(backend, &post.author_id, post_id, now);
    }
    Ok(CommentWithAuthor {
        author: ActorSummary::from(&require_profile(backend, me)?),
        comment,
    })
}

pub fn list_comments(backend: &Backend, ctx: &SessionContext, post_id: &str) -> CoreResult<Vec<CommentWithAuthor>> {
    load_post(backend, ctx, post_id)?;
    let mut result = Vec::new();
    for comment in backend.storage.list_comments(post_id)? {
        let author = require_profile(backend, &comment.author_id)?;
        result.push(CommentWithAuthor {
            author: ActorSummary::from(&author),
            comment,
        });
    }
    Ok(result)
}
