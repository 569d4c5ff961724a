//! In-process change feed with subscribe-by-filter.
//!
//! Every committed insert/update that a client view may care about is
//! published here. Subscribers use events only as a refresh trigger and
//! re-read the datastore; events never carry row content.

use serde::Serialize;
use tokio::sync::broadcast;

pub const FEED_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Messages,
    Conversations,
    EphemeralContent,
    Follows,
    Posts,
    Notifications,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Who may receive an event. Events start addressed to nobody; publishers
/// name the audience explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Audience {
    /// Any signed-in actor.
    Everyone,
    Only(Vec<String>),
    #[default]
    Nobody,
}

impl Audience {
    pub fn includes(&self, profile_id: &str) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::Only(ids) => ids.iter().any(|a| a == profile_id),
            Audience::Nobody => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub op: ChangeOp,
    pub row_id: String,
    /// Grouping key: conversation id for messages, author id for content,
    /// recipient id for notifications.
    pub scope: Option<String>,
    #[serde(skip)]
    pub audience: Audience,
    pub at: u64,
}

impl ChangeEvent {
    pub fn new(table: Table, op: ChangeOp, row_id: impl Into<String>, at: u64) -> Self {
        Self {
            table,
            op,
            row_id: row_id.into(),
            scope: None,
            audience: Audience::Nobody,
            at,
        }
    }

    pub fn scoped(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn for_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = Audience::Only(audience);
        self
    }

    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    pub fn visible_to(&self, profile_id: &str) -> bool {
        self.audience.includes(profile_id)
    }
}

/// "Rows of `table` (optionally with `op`, optionally in `scope`)".
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: Table,
    pub op: Option<ChangeOp>,
    pub scope: Option<String>,
    pub viewer: Option<String>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            op: None,
            scope: None,
            viewer: None,
        }
    }

    pub fn op(mut self, op: ChangeOp) -> Self {
        self.op = Some(op);
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Only deliver events whose audience includes `profile_id`.
    pub fn viewer(mut self, profile_id: impl Into<String>) -> Self {
        self.viewer = Some(profile_id.into());
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if let Some(op) = self.op {
            if event.op != op {
                return false;
            }
        }
        if let Some(ref scope) = self.scope {
            if event.scope.as_deref() != Some(scope.as_str()) {
                return false;
            }
        }
        match self.viewer {
            Some(ref viewer) => event.visible_to(viewer),
            None => true,
        }
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// Unfiltered receiver, for forwarders that apply their own filtering.
    pub fn subscribe_all(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(FEED_CHANNEL_CAPACITY)
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    filter: ChangeFilter,
}

impl Subscription {
    /// Wait for the next matching event. Returns `None` once the feed is gone.
    ///
    /// A lagged receiver yields a synthetic event so the subscriber still
    /// re-fetches; the missed events are not replayed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => return Some(self.lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => return Some(self.lagged(n)),
                Err(_) => return None,
            }
        }
    }

    fn lagged(&self, n: u64) -> ChangeEvent {
        crate::hlog!("realtime: subscriber lagged by {} events", n);
        ChangeEvent::new(self.filter.table, ChangeOp::Update, String::new(), 0)
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_table_op_scope() {
        let ev = ChangeEvent::new(Table::Messages, ChangeOp::Insert, "m1", 5).scoped("c1");
        assert!(ChangeFilter::table(Table::Messages).matches(&ev));
        assert!(ChangeFilter::table(Table::Messages)
            .op(ChangeOp::Insert)
            .scope("c1")
            .matches(&ev));
        assert!(!ChangeFilter::table(Table::Messages).scope("c2").matches(&ev));
        assert!(!ChangeFilter::table(Table::Messages)
            .op(ChangeOp::Update)
            .matches(&ev));
        assert!(!ChangeFilter::table(Table::Posts).matches(&ev));
    }

    #[test]
    fn audience_restricts_viewers() {
        let ev = ChangeEvent::new(Table::Messages, ChangeOp::Insert, "m1", 5)
            .for_audience(vec!["a".into(), "b".into()]);
        assert!(ChangeFilter::table(Table::Messages).viewer("a").matches(&ev));
        assert!(!ChangeFilter::table(Table::Messages).viewer("c").matches(&ev));
    }

    #[test]
    fn unaddressed_event_reaches_nobody() {
        let ev = ChangeEvent::new(Table::Posts, ChangeOp::Insert, "p1", 5);
        assert!(!ev.visible_to("a"));
        assert!(ev.clone().with_audience(Audience::Everyone).visible_to("a"));
        assert!(!ev.for_audience(Vec::new()).visible_to("a"));
    }

    #[tokio::test]
    async fn subscription_skips_non_matching() {
        let feed = ChangeFeed::default();
        let mut sub = feed.subscribe(ChangeFilter::table(Table::Messages).scope("c1"));
        feed.publish(ChangeEvent::new(Table::Messages, ChangeOp::Insert, "m0", 1).scoped("c2"));
        feed.publish(ChangeEvent::new(Table::Posts, ChangeOp::Insert, "p0", 1));
        feed.publish(ChangeEvent::new(Table::Messages, ChangeOp::Insert, "m1", 2).scoped("c1"));
        let got = sub.recv().await.unwrap();
        assert_eq!(got.row_id, "m1");
    }

    #[test]
    fn try_recv_drains_without_waiting() {
        let feed = ChangeFeed::default();
        let mut sub = feed.subscribe(ChangeFilter::table(Table::Messages).viewer("a"));
        assert!(sub.try_recv().is_none());
        feed.publish(
            ChangeEvent::new(Table::Messages, ChangeOp::Insert, "m0", 1)
                .for_audience(vec!["b".into()]),
        );
        feed.publish(
            ChangeEvent::new(Table::Messages, ChangeOp::Insert, "m1", 2)
                .for_audience(vec!["a".into(), "b".into()]),
        );
        assert_eq!(sub.try_recv().unwrap().row_id, "m1");
        assert!(sub.try_recv().is_none());
    }
}
