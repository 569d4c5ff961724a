//! hearth server: REST API and realtime WebSocket over the shared backend.
//!
//! Authentication is enforced once at this boundary; every handler resolves
//! the bearer token into a session context before calling into the core.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod utils;

use std::path::Path;

use clap::Parser;

use crate::backend::Backend;
use crate::moderation::bootstrap_admins;
use crate::objects::ObjectStore;
use crate::storage::db_path;

use config::{Cli, Config, FileConfig};
use state::{AppState, SharedState};

/// Open the datastore under `data_dir`, grant configured admins, and set up
/// object storage.
pub fn open_state(data_dir: &Path, public_url: &str) -> Result<SharedState, String> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| format!("failed to create {}: {e}", data_dir.display()))?;
    let file_config = FileConfig::load(data_dir)?;

    let db = db_path(data_dir);
    crate::hlog!("  database: {}", db.display());
    let backend = Backend::open(&db, file_config.settings()).map_err(|e| e.to_string())?;

    let granted =
        bootstrap_admins(&backend, &file_config.admin_handles).map_err(|e| e.to_string())?;
    if !file_config.admin_handles.is_empty() {
        crate::hlog!(
            "  admins: {} configured, {} newly granted",
            file_config.admin_handles.len(),
            granted
        );
    }

    let objects = ObjectStore::new(
        &data_dir.join("objects"),
        public_url,
        file_config.max_upload_bytes,
    );
    Ok(AppState::new(backend.into_shared(), objects))
}

/// Entry point: parse CLI, open storage, start server.
pub async fn run() {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli);

    crate::logging::init();

    crate::hlog!("hearth starting");
    crate::hlog!("  data directory: {}", config.data_dir.display());
    crate::hlog!("  public url: {}", config.public_url);

    let state = match open_state(&config.data_dir, &config.public_url) {
        Ok(state) => state,
        Err(e) => {
            crate::hlog!("startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");
    crate::hlog!("hearth listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await.expect("server error");
}
