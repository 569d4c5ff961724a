//! Message store: append, read state, unread counts, typed listing.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::conversations;
use crate::error::{CoreError, CoreResult};
use crate::identity::SessionContext;
use crate::logging;
use crate::policy;
use crate::realtime::{ChangeEvent, ChangeOp, Table};
use crate::storage::{ActorSummary, Message, MessageKind};

pub const MAX_MESSAGE_CHARS: usize = 4_000;
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// What the caller wants to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        body: String,
    },
    Image {
        url: String,
        #[serde(default)]
        caption: Option<String>,
    },
    File {
        url: String,
        name: String,
        #[serde(default)]
        caption: Option<String>,
    },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        MessageContent::Text { body: body.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MessageContent::Text { .. } => MessageKind::Text,
            MessageContent::Image { .. } => MessageKind::Image,
            MessageContent::File { .. } => MessageKind::File,
        }
    }

    /// Reject before any write: blank text, blank file references, or
    /// oversized text.
    pub fn validate(&self) -> CoreResult<()> {
        let text = match self {
            MessageContent::Text { body } => {
                if body.trim().is_empty() {
                    return Err(CoreError::validation("message is empty"));
                }
                Some(body)
            }
            MessageContent::Image { url, caption } => {
                if url.trim().is_empty() {
                    return Err(CoreError::validation("image url is empty"));
                }
                caption.as_ref()
            }
            MessageContent::File { url, name, caption } => {
                if url.trim().is_empty() || name.trim().is_empty() {
                    return Err(CoreError::validation("file reference is incomplete"));
                }
                caption.as_ref()
            }
        };
        if text.is_some_and(|t| t.chars().count() > MAX_MESSAGE_CHARS) {
            return Err(CoreError::validation(format!(
                "message longer than {MAX_MESSAGE_CHARS} characters"
            )));
        }
        Ok(())
    }

    fn into_columns(self) -> (Option<String>, Option<String>, Option<String>) {
        let blank_to_none = |s: Option<String>| s.filter(|t| !t.trim().is_empty());
        match self {
            MessageContent::Text { body } => (Some(body), None, None),
            MessageContent::Image { url, caption } => (blank_to_none(caption), Some(url), None),
            MessageContent::File { url, name, caption } => {
                (blank_to_none(caption), Some(url), Some(name))
            }
        }
    }
}

/// A message joined with its sender's public profile fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageWithSender {
    pub message: Message,
    pub sender: ActorSummary,
}

fn audience(backend: &Backend, conversation_id: &str) -> CoreResult<Vec<String>> {
    Ok(backend
        .storage
        .list_participants(conversation_id)?
        .into_iter()
        .map(|p| p.profile_id)
        .collect())
}

/// Append a message as the caller's effective actor, then bump the
/// conversation's activity timestamp.
pub fn send(
    backend: &Backend,
    ctx: &SessionContext,
    conversation_id: &str,
    content: MessageContent,
) -> CoreResult<Message> {
    content.validate()?;
    if backend.storage.get_conversation(conversation_id)?.is_none() {
        return Err(CoreError::not_found(format!("conversation {conversation_id}")));
    }
    policy::ensure_participant(&backend.storage, ctx, conversation_id)?;

    let kind = content.kind();
    let (body, file_url, file_name) = content.into_columns();
    let message = Message {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: ctx.actor_id().to_string(),
        kind,
        content: body,
        file_url,
        file_name,
        is_read: false,
        created_at: backend.now(),
    };
    backend.storage.insert_message(&message)?;
    conversations::touch(backend, conversation_id)?;

    crate::hlog!(
        "send: {} -> {} ({})",
        logging::actor_id(&message.sender_id),
        logging::conv_id(conversation_id),
        kind.as_str()
    );
    backend.publish(
        ChangeEvent::new(Table::Messages, ChangeOp::Insert, &message.id, message.created_at)
            .scoped(conversation_id)
            .for_audience(audience(backend, conversation_id)?),
    );
    Ok(message)
}

/// Mark the listed messages read by the caller. Own messages, messages in
/// other conversations, and already-read messages are skipped.
pub fn mark_read(backend: &Backend, ctx: &SessionContext, message_ids: &[String]) -> CoreResult<u32> {
    if message_ids.is_empty() {
        return Ok(0);
    }
    let changed = backend
        .storage
        .mark_messages_read(message_ids, ctx.actor_id())?;
    if changed > 0 {
        let mut touched = BTreeSet::new();
        for id in message_ids {
            if let Some(m) = backend.storage.get_message(id)? {
                touched.insert(m.conversation_id);
            }
        }
        let now = backend.now();
        for conversation_id in touched {
            backend.publish(
                ChangeEvent::new(Table::Messages, ChangeOp::Update, &conversation_id, now)
                    .scoped(&conversation_id)
                    .for_audience(audience(backend, &conversation_id)?),
            );
        }
    }
    Ok(changed)
}

/// Mark every incoming message in the conversation read and advance the
/// caller's watermark.
pub fn mark_conversation_read(
    backend: &Backend,
    ctx: &SessionContext,
    conversation_id: &str,
) -> CoreResult<u32> {
    policy::ensure_participant(&backend.storage, ctx, conversation_id)?;
    let now = backend.now();
    let changed = backend
        .storage
        .mark_conversation_read(conversation_id, ctx.actor_id())?;
    backend
        .storage
        .advance_last_read(conversation_id, ctx.actor_id(), now)?;
    if changed > 0 {
        backend.publish(
            ChangeEvent::new(Table::Messages, ChangeOp::Update, conversation_id, now)
                .scoped(conversation_id)
                .for_audience(audience(backend, conversation_id)?),
        );
    }
    Ok(changed)
}

pub fn unread_count(backend: &Backend, ctx: &SessionContext, conversation_id: &str) -> CoreResult<u32> {
    policy::ensure_participant(&backend.storage, ctx, conversation_id)?;
    Ok(backend.storage.count_unread(conversation_id, ctx.actor_id())?)
}

pub fn total_unread(backend: &Backend, ctx: &SessionContext) -> CoreResult<u32> {
    Ok(backend.storage.count_unread_total(ctx.actor_id())?)
}

/// Messages oldest first, each joined with its sender.
pub fn list(
    backend: &Backend,
    ctx: &SessionContext,
    conversation_id: &str,
    limit: u32,
) -> CoreResult<Vec<MessageWithSender>> {
    policy::ensure_participant(&backend.storage, ctx, conversation_id)?;
    let messages = backend.storage.list_messages(conversation_id, limit)?;

    let mut senders: HashMap<String, ActorSummary> = HashMap::new();
    let mut result = Vec::with_capacity(messages.len());
    for message in messages {
        let sender = match senders.get(&message.sender_id) {
            Some(s) => s.clone(),
            None => {
                let profile = backend
                    .storage
                    .get_profile(&message.sender_id)?
                    .ok_or_else(|| CoreError::not_found(format!("profile {}", message.sender_id)))?;
                let summary = ActorSummary::from(&profile);
                senders.insert(message.sender_id.clone(), summary.clone());
                summary
            }
        };
        result.push(MessageWithSender { message, sender });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::auth;
    use crate::clock::ManualClock;
    use crate::identity::resolve_session;
    use crate::realtime::ChangeFilter;

    struct Fixture {
        backend: Backend,
        clock: Arc<ManualClock>,
        a: SessionContext,
        b: SessionContext,
        c: SessionContext,
        conv: String,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Backend::in_memory(clock.clone()).unwrap();
        let ctx = |name: &str| {
            let s = auth::sign_up(&backend, name, "secret1").unwrap();
            resolve_session(&backend, &s.token).unwrap()
        };
        let (a, b, c) = (ctx("alice"), ctx("bob"), ctx("carol"));
        let conv = conversations::find_or_create(&backend, &a, b.actor_id()).unwrap();
        Fixture {
            backend,
            clock,
            a,
            b,
            c,
            conv,
        }
    }

    #[test]
    fn test_send_rejects_blank() {
        let f = fixture();
        let err = send(&f.backend, &f.a, &f.conv, MessageContent::text("   \n")).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(f.backend.storage.last_message(&f.conv).unwrap().is_none());
    }

    #[test]
    fn test_send_requires_participant() {
        let f = fixture();
        let err = send(&f.backend, &f.c, &f.conv, MessageContent::text("hi")).unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[test]
    fn test_send_touches_conversation_and_publishes() {
        let f = fixture();
        let mut sub = f
            .backend
            .feed
            .subscribe(ChangeFilter::table(Table::Messages).scope(&f.conv));
        f.clock.advance(Duration::from_secs(5));
        let m = send(&f.backend, &f.a, &f.conv, MessageContent::text("hello")).unwrap();
        assert_eq!(m.sender_id, f.a.actor_id());
        let conv = f.backend.storage.get_conversation(&f.conv).unwrap().unwrap();
        assert_eq!(conv.updated_at, 6_000);
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let ev = rt.block_on(sub.recv()).unwrap();
        assert_eq!(ev.row_id, m.id);
        assert!(ev.visible_to(f.b.actor_id()));
        assert!(!ev.visible_to(f.c.actor_id()));
    }

    #[test]
    fn test_mark_read_is_idempotent_and_skips_own() {
        let f = fixture();
        let m1 = send(&f.backend, &f.a, &f.conv, MessageContent::text("one")).unwrap();
        let m2 = send(&f.backend, &f.b, &f.conv, MessageContent::text("two")).unwrap();
        assert_eq!(unread_count(&f.backend, &f.b, &f.conv).unwrap(), 1);

        let ids = vec![m1.id.clone(), m2.id.clone()];
        assert_eq!(mark_read(&f.backend, &f.b, &ids).unwrap(), 1);
        assert_eq!(mark_read(&f.backend, &f.b, &ids).unwrap(), 0);
        assert_eq!(unread_count(&f.backend, &f.b, &f.conv).unwrap(), 0);
        // b's own message stays unread for a.
        assert_eq!(unread_count(&f.backend, &f.a, &f.conv).unwrap(), 1);
        // An outsider cannot flip anything.
        assert_eq!(mark_read(&f.backend, &f.c, &ids).unwrap(), 0);
    }

    #[test]
    fn test_mark_conversation_read_advances_watermark() {
        let f = fixture();
        send(&f.backend, &f.a, &f.conv, MessageContent::text("one")).unwrap();
        send(&f.backend, &f.a, &f.conv, MessageContent::text("two")).unwrap();
        assert_eq!(total_unread(&f.backend, &f.b).unwrap(), 2);
        f.clock.advance(Duration::from_secs(1));
        assert_eq!(mark_conversation_read(&f.backend, &f.b, &f.conv).unwrap(), 2);
        let summary = conversations::get(&f.backend, &f.b, &f.conv).unwrap();
        assert_eq!(summary.last_read_at, Some(2_000));
        assert_eq!(total_unread(&f.backend, &f.b).unwrap(), 0);
    }

    #[test]
    fn test_list_is_chronological_with_senders() {
        let f = fixture();
        send(&f.backend, &f.a, &f.conv, MessageContent::text("first")).unwrap();
        send(&f.backend, &f.b, &f.conv, MessageContent::text("second")).unwrap();
        send(
            &f.backend,
            &f.a,
            &f.conv,
            MessageContent::File {
                url: "http://x/objects/media/a/doc.pdf".into(),
                name: "doc.pdf".into(),
                caption: None,
            },
        )
        .unwrap();
        let listed = list(&f.backend, &f.b, &f.conv, DEFAULT_PAGE_SIZE).unwrap();
        let bodies: Vec<_> = listed.iter().map(|m| m.message.content.clone()).collect();
        assert_eq!(bodies, vec![Some("first".into()), Some("second".into()), None]);
        assert_eq!(listed[1].sender.username, "bob");
        assert_eq!(listed[2].message.kind, MessageKind::File);
        assert_eq!(listed[2].message.file_name.as_deref(), Some("doc.pdf"));
    }
}
