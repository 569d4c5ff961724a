//! Client-side orchestration for one signed-in session.
//!
//! [`SessionClient`] wraps the shared backend with the behaviour a UI needs:
//! a compose buffer that survives failed sends, live views that poll and
//! listen for realtime inserts, optimistic like toggles with rollback, and a
//! short-lived query cache invalidated after every successful mutation.

use std::sync::{Arc, Mutex};

use crate::auth::{self, AuthSession};
use crate::backend::{Backend, SharedBackend};
use crate::cache::{Optimistic, QueryCache};
use crate::conversations::{self, ConversationSummary};
use crate::ephemeral::{self, AuthorGroup, ContentPayload, LikeState};
use crate::error::CoreResult;
use crate::identity::{self, SessionContext};
use crate::messages::{self, MessageContent, MessageWithSender};
use crate::realtime::{ChangeFilter, ChangeOp, Subscription, Table};
use crate::refresh::{LiveQuery, CONVERSATION_LIST_POLL, CONVERSATION_POLL};
use crate::storage::{ContentKind, EphemeralContent, Message};

/// Text being written in a conversation. Cleared only by a successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    pub text: String,
}

impl Composer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// An open conversation. Dropping it stops polling and read-marking.
pub struct ConversationView {
    pub conversation_id: String,
    pub messages: LiveQuery<Vec<MessageWithSender>>,
}

pub struct SessionClient {
    backend: SharedBackend,
    token: String,
    actor_id: String,
    conversations: Arc<QueryCache<Vec<ConversationSummary>>>,
    stories: Arc<QueryCache<Vec<AuthorGroup>>>,
    /// Message inserts and read-state updates visible to the current actor.
    /// Drained before serving the conversation list from cache.
    inbox: Mutex<Subscription>,
}

async fn with_session<T>(
    backend: &SharedBackend,
    token: &str,
    op: impl FnOnce(&Backend, &SessionContext) -> CoreResult<T>,
) -> CoreResult<T> {
    let guard = backend.lock().await;
    let ctx = identity::resolve_session(&guard, token)?;
    op(&guard, &ctx)
}

fn message_events(backend: &Backend, viewer: &str) -> Subscription {
    backend
        .feed
        .subscribe(ChangeFilter::table(Table::Messages).viewer(viewer))
}

impl SessionClient {
    fn new(backend: SharedBackend, token: String, actor_id: String, inbox: Subscription) -> Self {
        Self {
            backend,
            token,
            actor_id,
            conversations: Arc::new(QueryCache::default()),
            stories: Arc::new(QueryCache::default()),
            inbox: Mutex::new(inbox),
        }
    }

    fn from_session(backend: SharedBackend, session: AuthSession, inbox: Subscription) -> Self {
        Self::new(backend, session.token, session.user_id, inbox)
    }

    pub async fn sign_up(backend: SharedBackend, handle: &str, password: &str) -> CoreResult<Self> {
        let (session, inbox) = {
            let guard = backend.lock().await;
            let session = auth::sign_up(&guard, handle, password)?;
            let inbox = message_events(&guard, &session.user_id);
            (session, inbox)
        };
        Ok(Self::from_session(backend, session, inbox))
    }

    pub async fn sign_in(backend: SharedBackend, login: &str, password: &str) -> CoreResult<Self> {
        let (session, inbox) = {
            let guard = backend.lock().await;
            let session = auth::sign_in(&guard, login, password)?;
            let inbox = message_events(&guard, &session.user_id);
            (session, inbox)
        };
        Ok(Self::from_session(backend, session, inbox))
    }

    pub async fn sign_out(self) -> CoreResult<()> {
        auth::sign_out(&*self.backend.lock().await, &self.token)?;
        Ok(())
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Actor id of the signed-in identity (not affected by impersonation).
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Run one operation with a freshly resolved session context.
    pub async fn run<T>(&self, op: impl FnOnce(&Backend, &SessionContext) -> CoreResult<T>) -> CoreResult<T> {
        with_session(&self.backend, &self.token, op).await
    }

    pub async fn context(&self) -> CoreResult<SessionContext> {
        self.run(|_, ctx| Ok(ctx.clone())).await
    }

    /// Point the inbox at a new effective actor and drop everything cached
    /// for the previous one.
    fn switch_actor(&self, ctx: SessionContext, inbox: Subscription) -> SessionContext {
        *self.inbox.lock().unwrap_or_else(|e| e.into_inner()) = inbox;
        self.conversations.clear();
        self.stories.clear();
        ctx
    }

    pub async fn impersonate(&self, target_id: &str) -> CoreResult<SessionContext> {
        let (ctx, inbox) = self
            .run(|b, ctx| {
                let ctx = identity::impersonate(b, ctx, target_id)?;
                let inbox = message_events(b, ctx.actor_id());
                Ok((ctx, inbox))
            })
            .await?;
        Ok(self.switch_actor(ctx, inbox))
    }

    pub async fn exit_impersonation(&self) -> CoreResult<SessionContext> {
        let (ctx, inbox) = self
            .run(|b, ctx| {
                let ctx = identity::exit_impersonation(b, ctx)?;
                let inbox = message_events(b, ctx.actor_id());
                Ok((ctx, inbox))
            })
            .await?;
        Ok(self.switch_actor(ctx, inbox))
    }

    /// True when a message event arrived since the last drain.
    fn drain_inbox(&self) -> bool {
        let mut inbox = self.inbox.lock().unwrap_or_else(|e| e.into_inner());
        let mut changed = false;
        while inbox.try_recv().is_some() {
            changed = true;
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Conversations and messages
    // -----------------------------------------------------------------------

    pub async fn find_or_create_conversation(&self, other_id: &str) -> CoreResult<String> {
        let id = self
            .run(|b, ctx| conversations::find_or_create(b, ctx, other_id))
            .await?;
        self.conversations.clear();
        Ok(id)
    }

    /// Conversation list, served from cache when fresh and no message event
    /// for the caller has arrived since it was stored.
    pub async fn conversations(&self) -> CoreResult<Vec<ConversationSummary>> {
        if self.drain_inbox() {
            self.conversations.clear();
        }
        let key = format!("conversations:{}", self.actor_id);
        self.conversations
            .get_or_fetch(&key, || self.run(|b, ctx| conversations::list(b, ctx)))
            .await
    }

    /// Send the composer's text. On success the composer is cleared; on any
    /// failure it is left untouched so the user can resubmit.
    pub async fn submit(&self, conversation_id: &str, composer: &mut Composer) -> CoreResult<Message> {
        let content = MessageContent::text(composer.text.clone());
        match self.send(conversation_id, content).await {
            Ok(message) => {
                composer.text.clear();
                Ok(message)
            }
            Err(e) => {
                crate::hlog!("client: send failed, keeping draft: {}", e);
                Err(e)
            }
        }
    }

    pub async fn send(&self, conversation_id: &str, content: MessageContent) -> CoreResult<Message> {
        let message = self
            .run(|b, ctx| messages::send(b, ctx, conversation_id, content))
            .await?;
        self.conversations.clear();
        Ok(message)
    }

    /// Open a conversation: a live message list refreshed every
    /// [`CONVERSATION_POLL`] and on each realtime insert in it. Each refresh
    /// marks incoming unread messages read, only while the view is alive.
    pub async fn open_conversation(&self, conversation_id: &str) -> CoreResult<ConversationView> {
        let viewer = self
            .run(|b, ctx| {
                crate::policy::ensure_participant(&b.storage, ctx, conversation_id)?;
                Ok(ctx.actor_id().to_string())
            })
            .await?;

        let subscription = self.backend.lock().await.feed.subscribe(
            ChangeFilter::table(Table::Messages)
                .op(ChangeOp::Insert)
                .scope(conversation_id)
                .viewer(viewer),
        );

        let backend = Arc::clone(&self.backend);
        let token = self.token.clone();
        let conv = conversation_id.to_string();
        let cache = Arc::clone(&self.conversations);
        let live = LiveQuery::spawn(
            "conversation",
            CONVERSATION_POLL,
            Some(subscription),
            move || {
                let backend = Arc::clone(&backend);
                let token = token.clone();
                let conv = conv.clone();
                let cache = Arc::clone(&cache);
                async move {
                    let (list, marked) = with_session(&backend, &token, |b, ctx| {
                        let list = messages::list(b, ctx, &conv, messages::DEFAULT_PAGE_SIZE)?;
                        let unread: Vec<String> = list
                            .iter()
                            .filter(|m| !m.message.is_read && m.message.sender_id != ctx.actor_id())
                            .map(|m| m.message.id.clone())
                            .collect();
                        let marked = messages::mark_read(b, ctx, &unread)?;
                        Ok((list, marked))
                    })
                    .await?;
                    if marked > 0 {
                        cache.clear();
                    }
                    Ok(list)
                }
            },
        );

        Ok(ConversationView {
            conversation_id: conversation_id.to_string(),
            messages: live,
        })
    }

    /// Live conversation list, refreshed every [`CONVERSATION_LIST_POLL`] and
    /// on any new message addressed to the caller.
    pub async fn watch_conversations(&self) -> CoreResult<LiveQuery<Vec<ConversationSummary>>> {
        let viewer = self.run(|_, ctx| Ok(ctx.actor_id().to_string())).await?;
        let subscription = self.backend.lock().await.feed.subscribe(
            ChangeFilter::table(Table::Messages)
                .op(ChangeOp::Insert)
                .viewer(viewer),
        );
        let backend = Arc::clone(&self.backend);
        let token = self.token.clone();
        Ok(LiveQuery::spawn(
            "conversation list",
            CONVERSATION_LIST_POLL,
            Some(subscription),
            move || {
                let backend = Arc::clone(&backend);
                let token = token.clone();
                async move { with_session(&backend, &token, |b, ctx| conversations::list(b, ctx)).await }
            },
        ))
    }

    // -----------------------------------------------------------------------
    // Stories and notes
    // -----------------------------------------------------------------------

    pub async fn post_ephemeral(&self, payload: ContentPayload) -> CoreResult<EphemeralContent> {
        let content = self
            .run(|b, ctx| ephemeral::create(b, ctx, payload))
            .await?;
        self.stories.clear();
        Ok(content)
    }

    /// Visible stories or notes grouped by author. A cached listing is
    /// re-checked against the backend clock so nothing past `expires_at` is
    /// returned.
    pub async fn stories(&self, kind: ContentKind) -> CoreResult<Vec<AuthorGroup>> {
        let key = format!("{}:{}", kind.as_str(), self.actor_id);
        let groups = self
            .stories
            .get_or_fetch(&key, || self.run(|b, ctx| ephemeral::list_visible(b, ctx, kind)))
            .await?;
        let now = self.backend.lock().await.now();
        Ok(ephemeral::drop_expired(groups, now))
    }

    pub async fn mark_seen(&self, content_id: &str) -> CoreResult<()> {
        self.run(|b, ctx| ephemeral::mark_seen(b, ctx, content_id))
            .await?;
        self.stories.clear();
        Ok(())
    }

    /// Flip the like locally first, then reconcile with the server. On
    /// failure the shown state rolls back and the error is returned.
    pub async fn toggle_like(&self, content_id: &str, state: &mut Optimistic<LikeState>) -> CoreResult<LikeState> {
        let current = *state.get();
        state.apply(LikeState {
            liked: !current.liked,
            like_count: if current.liked {
                current.like_count.saturating_sub(1)
            } else {
                current.like_count + 1
            },
        });
        match self
            .run(|b, ctx| ephemeral::toggle_like(b, ctx, content_id))
            .await
        {
            Ok(actual) => {
                state.commit(actual);
                self.stories.clear();
                Ok(actual)
            }
            Err(e) => {
                state.rollback();
                crate::hlog!("client: like failed, rolled back: {}", e);
                Err(e)
            }
        }
    }

    /// Unread messages across all conversations.
    pub async fn total_unread(&self) -> CoreResult<u32> {
        self.run(|b, ctx| messages::total_unread(b, ctx)).await
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("actor_id", &self.actor_id)
            .finish_non_exhaustive()
    }
}

/// Build a client for an existing session token.
pub async fn resume(backend: SharedBackend, token: &str) -> CoreResult<SessionClient> {
    let (real_id, inbox) = with_session(&backend, token, |b, ctx| {
        Ok((ctx.real.id.clone(), message_events(b, ctx.actor_id())))
    })
    .await?;
    Ok(SessionClient::new(backend, token.to_string(), real_id, inbox))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;

    async fn pair() -> (SharedBackend, SessionClient, SessionClient) {
        let backend = Backend::in_memory(Arc::new(ManualClock::new(1_000)))
            .unwrap()
            .into_shared();
        let a = SessionClient::sign_up(backend.clone(), "alice", "secret1").await.unwrap();
        let b = SessionClient::sign_up(backend.clone(), "bob", "secret1").await.unwrap();
        (backend, a, b)
    }

    #[tokio::test]
    async fn test_failed_submit_keeps_draft() {
        let (_, a, b) = pair().await;
        let conv = a.find_or_create_conversation(b.actor_id()).await.unwrap();

        let mut blank = Composer::new("   ");
        assert!(a.submit(&conv, &mut blank).await.is_err());
        assert_eq!(blank.text, "   ");

        let mut draft = Composer::new("hello bob");
        assert!(a.submit("no-such-conversation", &mut draft).await.is_err());
        assert_eq!(draft.text, "hello bob");

        a.submit(&conv, &mut draft).await.unwrap();
        assert!(draft.text.is_empty());
    }

    #[tokio::test]
    async fn test_open_conversation_marks_incoming_read() {
        let (_, a, b) = pair().await;
        let conv = a.find_or_create_conversation(b.actor_id()).await.unwrap();
        let mut view = b.open_conversation(&conv).await.unwrap();
        view.messages
            .wait_for(Duration::from_secs(2), |m| m.is_empty())
            .await
            .unwrap();

        a.send(&conv, MessageContent::text("ping")).await.unwrap();
        let seen = view
            .messages
            .wait_for(Duration::from_secs(2), |m| m.len() == 1)
            .await
            .unwrap();
        assert_eq!(seen[0].sender.username, "alice");

        // The fetch that observed the message also marked it read.
        view.messages.refresh_now();
        let mut read = false;
        for _ in 0..50 {
            if b.total_unread().await.unwrap() == 0 {
                read = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(read);
    }

    #[tokio::test]
    async fn test_closed_view_stops_marking_read() {
        let (_, a, b) = pair().await;
        let conv = a.find_or_create_conversation(b.actor_id()).await.unwrap();
        let mut view = b.open_conversation(&conv).await.unwrap();
        view.messages
            .wait_for(Duration::from_secs(2), |m| m.is_empty())
            .await
            .unwrap();
        drop(view);

        a.send(&conv, MessageContent::text("are you there?")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(b.total_unread().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conversation_cache_invalidated_by_send() {
        let (_, a, b) = pair().await;
        let conv = a.find_or_create_conversation(b.actor_id()).await.unwrap();
        let before = a.conversations().await.unwrap();
        assert!(before[0].last_message.is_none());
        a.send(&conv, MessageContent::text("fresh")).await.unwrap();
        let after = a.conversations().await.unwrap();
        assert_eq!(
            after[0].last_message.as_ref().and_then(|m| m.content.clone()),
            Some("fresh".to_string())
        );
    }

    #[tokio::test]
    async fn test_incoming_message_refreshes_cached_conversations() {
        let (_, a, b) = pair().await;
        let conv = a.find_or_create_conversation(b.actor_id()).await.unwrap();
        let before = a.conversations().await.unwrap();
        assert!(before[0].last_message.is_none());

        b.send(&conv, MessageContent::text("from bob")).await.unwrap();
        let after = a.conversations().await.unwrap();
        assert_eq!(
            after[0].last_message.as_ref().and_then(|m| m.content.clone()),
            Some("from bob".to_string())
        );
        assert_eq!(after[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_cached_stories_drop_expired_items() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Backend::in_memory(clock.clone()).unwrap().into_shared();
        let a = SessionClient::sign_up(backend.clone(), "alice", "secret1").await.unwrap();
        a.post_ephemeral(ContentPayload::Note { text: "brb".into() })
            .await
            .unwrap();
        assert_eq!(a.stories(ContentKind::Note).await.unwrap().len(), 1);

        clock.advance(Duration::from_secs(25 * 60 * 60));
        assert!(a.stories(ContentKind::Note).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_optimistic_like_rolls_back_on_failure() {
        let (_, a, b) = pair().await;
        let note = a
            .post_ephemeral(ContentPayload::Note { text: "hi".into() })
            .await
            .unwrap();

        let mut state = Optimistic::new(LikeState {
            liked: false,
            like_count: 0,
        });
        let result = b.toggle_like(&note.id, &mut state).await.unwrap();
        assert!(result.liked);
        assert_eq!(*state.get(), result);

        let mut missing = Optimistic::new(LikeState {
            liked: false,
            like_count: 3,
        });
        assert!(b.toggle_like("gone", &mut missing).await.is_err());
        assert!(!missing.get().liked);
        assert_eq!(missing.get().like_count, 3);
        assert!(!missing.is_pending());
    }
}
