//! hearth: social backend server.
//!
//! Exposes profiles, follows, direct messaging, stories and notes over a
//! REST API with a realtime WebSocket, persisting state in SQLite.

#[tokio::main]
async fn main() {
    hearth::server::run().await;
}
