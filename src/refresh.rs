//! Live queries: a background task that re-runs a fetch on a fixed interval
//! and whenever a matching change-feed event arrives.
//!
//! Every trigger causes a full re-fetch; there is no incremental merge. The
//! task is aborted when the [`LiveQuery`] is dropped, so a view that goes
//! away stops polling (and stops any side effects its fetch performs).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::CoreResult;
use crate::realtime::{ChangeEvent, Subscription};

/// Poll interval for an open conversation.
pub const CONVERSATION_POLL: Duration = Duration::from_secs(2);
/// Poll interval for the conversation list.
pub const CONVERSATION_LIST_POLL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Last successful result. Kept across failed refreshes.
    pub value: Option<T>,
    /// Message from the most recent failed refresh, cleared on success.
    pub error: Option<String>,
    /// Incremented on every completed fetch.
    pub version: u64,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            error: None,
            version: 0,
        }
    }
}

pub struct LiveQuery<T> {
    rx: watch::Receiver<Snapshot<T>>,
    wake: Arc<Notify>,
    handle: JoinHandle<()>,
}

async fn next_trigger(sub: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match sub {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

impl<T> LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start polling. The first fetch runs immediately.
    pub fn spawn<F, Fut>(label: &str, interval: Duration, trigger: Option<Subscription>, mut fetch: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(Snapshot::default());
        let wake = Arc::new(Notify::new());
        let task_wake = Arc::clone(&wake);
        let label = label.to_string();

        let handle = tokio::spawn(async move {
            let mut trigger = trigger;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let mut feed_closed = false;
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = task_wake.notified() => {}
                    event = next_trigger(&mut trigger), if trigger.is_some() => {
                        feed_closed = event.is_none();
                    }
                }
                if feed_closed {
                    trigger = None;
                    continue;
                }

                let result = fetch().await;
                tx.send_modify(|snap| {
                    snap.version += 1;
                    match result {
                        Ok(ref value) => {
                            snap.value = Some(value.clone());
                            snap.error = None;
                        }
                        Err(ref e) => {
                            crate::hlog!("refresh: {} fetch failed: {}", label, e);
                            snap.error = Some(e.user_message());
                        }
                    }
                });
                if tx.is_closed() {
                    break;
                }
            }
        });

        Self { rx, wake, handle }
    }

    /// Most recent successful value, if any.
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().value.clone()
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.rx.borrow().clone()
    }

    /// Wait for the next completed fetch. `None` once the task has stopped.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `pred`, or `timeout` passes.
    pub async fn wait_for<P>(&mut self, timeout: Duration, mut pred: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(v) = self.rx.borrow_and_update().value.as_ref() {
                if pred(v) {
                    return Some(v.clone());
                }
            }
            match tokio::time::timeout_at(deadline, self.rx.changed()).await {
                Ok(Ok(())) => continue,
                _ => return None,
            }
        }
    }

    /// Re-fetch now instead of waiting for the next tick.
    pub fn refresh_now(&self) {
        self.wake.notify_one();
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
