//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::server::handlers;
use crate::server::state::SharedState;

/// Headroom for multipart framing on top of the object size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the complete Axum router with all API routes.
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.objects.max_bytes() + MULTIPART_OVERHEAD;
    Router::new()
        // Health / realtime
        .route("/api/health", get(handlers::health::health_handler))
        .route("/api/realtime", get(handlers::websocket::ws_handler))
        // Auth API
        .route("/api/auth/sign-up", post(handlers::auth::sign_up_handler))
        .route("/api/auth/sign-in", post(handlers::auth::sign_in_handler))
        .route("/api/auth/sign-out", post(handlers::auth::sign_out_handler))
        .route("/api/auth/session", get(handlers::auth::session_handler))
        // Profiles API
        .route(
            "/api/me/profile",
            put(handlers::profiles::update_own_profile_handler),
        )
        .route(
            "/api/me/avatar",
            post(handlers::profiles::upload_avatar_handler),
        )
        .route(
            "/api/profiles",
            get(handlers::profiles::search_profiles_handler),
        )
        .route(
            "/api/profiles/:id",
            get(handlers::profiles::get_profile_handler),
        )
        .route(
            "/api/profiles/:id/follow",
            post(handlers::profiles::follow_handler).delete(handlers::profiles::unfollow_handler),
        )
        .route(
            "/api/profiles/:id/followers",
            get(handlers::profiles::list_followers_handler),
        )
        .route(
            "/api/profiles/:id/following",
            get(handlers::profiles::list_following_handler),
        )
        .route(
            "/api/profiles/:id/posts",
            get(handlers::posts::list_author_posts_handler),
        )
        .route(
            "/api/profiles/:id/content",
            get(handlers::ephemeral::list_author_content_handler),
        )
        .route(
            "/api/close-friends",
            get(handlers::profiles::list_close_friends_handler),
        )
        .route(
            "/api/close-friends/:id",
            put(handlers::profiles::add_close_friend_handler)
                .delete(handlers::profiles::remove_close_friend_handler),
        )
        // Conversations / messages API
        .route(
            "/api/conversations",
            get(handlers::conversations::list_conversations_handler)
                .post(handlers::conversations::open_conversation_handler),
        )
        .route(
            "/api/conversations/:id",
            get(handlers::conversations::get_conversation_handler),
        )
        .route(
            "/api/conversations/:id/messages",
            get(handlers::messages::list_messages_handler)
                .post(handlers::messages::send_message_handler),
        )
        .route(
            "/api/conversations/:id/read",
            post(handlers::messages::mark_conversation_read_handler),
        )
        .route("/api/messages/read", post(handlers::messages::mark_read_handler))
        .route(
            "/api/messages/unread",
            get(handlers::messages::unread_total_handler),
        )
        // Stories / notes API
        .route(
            "/api/ephemeral",
            post(handlers::ephemeral::create_content_handler),
        )
        .route(
            "/api/ephemeral/:id",
            delete(handlers::ephemeral::delete_content_handler),
        )
        .route(
            "/api/ephemeral/:id/seen",
            post(handlers::ephemeral::mark_seen_handler),
        )
        .route(
            "/api/ephemeral/:id/like",
            post(handlers::ephemeral::toggle_like_handler),
        )
        .route(
            "/api/ephemeral/:id/viewers",
            get(handlers::ephemeral::list_viewers_handler),
        )
        .route("/api/stories", get(handlers::ephemeral::list_stories_handler))
        .route("/api/notes", get(handlers::ephemeral::list_notes_handler))
        // Posts API
        .route("/api/posts", post(handlers::posts::create_post_handler))
        .route(
            "/api/posts/:id",
            get(handlers::posts::get_post_handler).delete(handlers::posts::delete_post_handler),
        )
        .route(
            "/api/posts/:id/like",
            post(handlers::posts::toggle_post_like_handler),
        )
        .route(
            "/api/posts/:id/save",
            post(handlers::posts::toggle_save_handler),
        )
        .route(
            "/api/posts/:id/comments",
            get(handlers::posts::list_comments_handler).post(handlers::posts::add_comment_handler),
        )
        .route("/api/feed", get(handlers::posts::home_feed_handler))
        .route("/api/saved", get(handlers::posts::list_saved_handler))
        // Notifications API
        .route(
            "/api/notifications",
            get(handlers::notifications::list_notifications_handler),
        )
        .route(
            "/api/notifications/unread-count",
            get(handlers::notifications::unread_count_handler),
        )
        .route(
            "/api/notifications/read-all",
            post(handlers::notifications::mark_all_read_handler),
        )
        .route(
            "/api/notifications/:id/read",
            post(handlers::notifications::mark_read_handler),
        )
        // Admin API
        .route(
            "/api/admin/profiles",
            get(handlers::admin::list_profiles_handler),
        )
        .route(
            "/api/admin/profiles/:id/badge",
            put(handlers::admin::set_badge_handler),
        )
        .route(
            "/api/admin/profiles/:id/verified",
            put(handlers::admin::set_verified_handler),
        )
        .route(
            "/api/admin/profiles/:id/roles/:role",
            post(handlers::admin::grant_role_handler).delete(handlers::admin::revoke_role_handler),
        )
        .route(
            "/api/admin/posts/:id",
            delete(handlers::admin::takedown_post_handler),
        )
        .route(
            "/api/admin/impersonate",
            delete(handlers::admin::exit_impersonation_handler),
        )
        .route(
            "/api/admin/impersonate/:id",
            post(handlers::admin::impersonate_handler),
        )
        // Objects API
        .route(
            "/api/objects/:bucket/*path",
            post(handlers::objects::upload_object_handler),
        )
        .route(
            "/objects/:bucket/*path",
            get(handlers::objects::download_object_handler),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
