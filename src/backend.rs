//! The in-process platform: datastore, change feed, clock, and the auth
//! session-change stream, bundled so every core operation takes one handle.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::auth::AuthEvent;
use crate::clock::{Clock, SystemClock, HOUR_MS};
use crate::realtime::{ChangeEvent, ChangeFeed};
use crate::storage::{Storage, StorageError};

const AUTH_EVENT_CAPACITY: usize = 64;

/// Tunables the core reads at operation time.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Domain used to synthesize login identifiers from handles.
    pub email_domain: String,
    pub story_ttl_ms: u64,
    pub note_ttl_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            email_domain: "hearth.local".to_string(),
            story_ttl_ms: 24 * HOUR_MS,
            note_ttl_ms: 24 * HOUR_MS,
        }
    }
}

pub struct Backend {
    pub storage: Storage,
    pub feed: ChangeFeed,
    pub settings: Settings,
    clock: Arc<dyn Clock>,
    auth_events: broadcast::Sender<AuthEvent>,
}

/// rusqlite connections are not `Sync`; async callers share the backend
/// behind a tokio mutex and hold it only for the duration of one operation.
pub type SharedBackend = Arc<Mutex<Backend>>;

impl Backend {
    pub fn new(storage: Storage, clock: Arc<dyn Clock>, settings: Settings) -> Self {
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self {
            storage,
            feed: ChangeFeed::default(),
            settings,
            clock,
            auth_events,
        }
    }

    pub fn open(path: &Path, settings: Settings) -> Result<Self, StorageError> {
        Ok(Self::new(
            Storage::open(path)?,
            Arc::new(SystemClock),
            settings,
        ))
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self, StorageError> {
        Ok(Self::new(
            Storage::open_in_memory()?,
            clock,
            Settings::default(),
        ))
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn publish(&self, event: ChangeEvent) {
        self.feed.publish(event);
    }

    pub fn emit_auth_event(&self, event: AuthEvent) {
        let _ = self.auth_events.send(event);
    }

    pub fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }

    pub fn into_shared(self) -> SharedBackend {
        Arc::new(Mutex::new(self))
    }
}
