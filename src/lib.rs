pub mod logging;

pub mod auth;
pub mod backend;
pub mod cache;
pub mod client;
pub mod clock;
pub mod conversations;
pub mod ephemeral;
pub mod error;
pub mod identity;
pub mod messages;
pub mod moderation;
pub mod notifications;
pub mod objects;
pub mod policy;
pub mod realtime;
pub mod refresh;
pub mod server;
pub mod social;
pub mod storage;
