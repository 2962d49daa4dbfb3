// src/lib.rs

pub mod api;
pub mod chat;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod errors;
pub mod models;

pub use api::ApiClient;
pub use chat::{ChatEvent, ChatSession};
pub use config::Config;
pub use conversation::ChatState;
pub use errors::{ChatError, ChatResult};
pub use models::{ChatTurn, ModelCatalog, OutboundMessage, Role};
