//! Two-party conversations: get-or-create and activity ordering.
//!
//! `find_or_create` scans the caller's conversations for one that also has
//! the other actor as a participant, and only then creates a new one. The
//! scan and the insert are separate steps with no pair-uniqueness constraint
//! underneath, so two concurrent callers on different backends could each
//! create a conversation for the same pair. Within one process, callers
//! serialize on the backend lock.

use serde::Serialize;

use crate::backend::Backend;
use crate::error::{CoreError, CoreResult};
use crate::identity::SessionContext;
use crate::logging;
use crate::policy;
use crate::realtime::{ChangeEvent, ChangeOp, Table};
use crate::storage::{ActorSummary, ConversationRow, Message, ParticipantRow};

/// One row of the conversation list, from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub other: Option<ActorSummary>,
    pub last_message: Option<Message>,
    pub unread_count: u32,
    pub last_read_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Return the conversation between the caller and `other_id`, creating it
/// (with exactly two participants) if none exists.
pub fn find_or_create(backend: &Backend, ctx: &SessionContext, other_id: &str) -> CoreResult<String> {
    let me = ctx.actor_id();
    if me == other_id {
        return Err(CoreError::validation("cannot start a conversation with yourself"));
    }
    if backend.storage.get_profile(other_id)?.is_none() {
        return Err(CoreError::not_found(format!("profile {other_id}")));
    }

    for conversation_id in backend.storage.list_conversation_ids_for(me)? {
        if backend.storage.is_participant(&conversation_id, other_id)? {
            return Ok(conversation_id);
        }
    }

    let now = backend.now();
    let id = uuid::Uuid::new_v4().to_string();
    let participants: Vec<ParticipantRow> = [me, other_id]
        .iter()
        .map(|profile_id| ParticipantRow {
            conversation_id: id.clone(),
            profile_id: profile_id.to_string(),
            joined_at: now,
            last_read_at: None,
        })
        .collect();
    backend.storage.insert_conversation_with_participants(
        &ConversationRow {
            id: id.clone(),
            created_at: now,
            updated_at: now,
        },
        &participants,
    )?;

    crate::hlog!(
        "conversation: created {} for {} and {}",
        logging::conv_id(&id),
        logging::actor_id(me),
        logging::actor_id(other_id)
    );
    backend.publish(
        ChangeEvent::new(Table::Conversations, ChangeOp::Insert, &id, now)
            .scoped(&id)
            .for_audience(vec![me.to_string(), other_id.to_string()]),
    );
    Ok(id)
}

/// Bump the last-activity timestamp. Ordering only.
pub fn touch(backend: &Backend, conversation_id: &str) -> CoreResult<()> {
    let now = backend.now();
    if !backend.storage.touch_conversation(conversation_id, now)? {
        return Err(CoreError::not_found(format!(
            "conversation {}",
            logging::conv_id(conversation_id)
        )));
    }
    Ok(())
}

fn summarize(
    backend: &Backend,
    viewer: &str,
    row: ConversationRow,
) -> CoreResult<ConversationSummary> {
    let participants = backend.storage.list_participants(&row.id)?;
    let mut other = None;
    let mut last_read_at = None;
    for p in &participants {
        if p.profile_id == viewer {
            last_read_at = p.last_read_at;
        } else if other.is_none() {
            other = backend
                .storage
                .get_profile(&p.profile_id)?
                .map(|profile| ActorSummary::from(&profile));
        }
    }
    Ok(ConversationSummary {
        last_message: backend.storage.last_message(&row.id)?,
        unread_count: backend.storage.count_unread(&row.id, viewer)?,
        other,
        last_read_at,
        id: row.id,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

/// The caller's conversations, most recently active first; ties by id.
pub fn list(backend: &Backend, ctx: &SessionContext) -> CoreResult<Vec<ConversationSummary>> {
    let me = ctx.actor_id();
    backend
        .storage
        .list_conversations_for(me)?
        .into_iter()
        .map(|row| summarize(backend, me, row))
        .collect()
}

pub fn get(
    backend: &Backend,
    ctx: &SessionContext,
    conversation_id: &str,
) -> CoreResult<ConversationSummary> {
    let row = backend
        .storage
        .get_conversation(conversation_id)?
        .ok_or_else(|| CoreError::not_found(format!("conversation {conversation_id}")))?;
    policy::ensure_participant(&backend.storage, ctx, conversation_id)?;
    summarize(backend, ctx.actor_id(), row)
}
