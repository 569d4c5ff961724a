//! Shared application state.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::backend::SharedBackend;
use crate::objects::ObjectStore;

pub struct AppState {
    pub backend: SharedBackend,
    pub objects: ObjectStore,
    pub ws_connection_count: AtomicUsize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(backend: SharedBackend, objects: ObjectStore) -> SharedState {
        Arc::new(Self {
            backend,
            objects,
            ws_connection_count: AtomicUsize::new(0),
        })
    }
}
