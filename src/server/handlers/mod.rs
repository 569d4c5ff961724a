//! Route handler modules for the hearth REST API.

pub mod admin;
pub mod auth;
pub mod conversations;
pub mod ephemeral;
pub mod health;
pub mod messages;
pub mod notifications;
pub mod objects;
pub mod posts;
pub mod profiles;
pub mod websocket;
