// src/models.rs

use crate::api::ApiClient;
use crate::constants::DEFAULT_MODEL;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the conversation, user or assistant authored.
///
/// The id is generated once and stays stable across content mutation, so
/// consumers can diff turn lists by identity. Content is only mutated while
/// `streaming` is true; once `complete` is set the turn is immutable and
/// eligible for inclusion in the next outbound request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub streaming: bool,
    pub complete: bool,
}

impl ChatTurn {
    /// A completed user turn. Input is trimmed before storage.
    pub fn user(content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.trim().to_string(),
            timestamp: Utc::now(),
            streaming: false,
            complete: true,
        }
    }

    /// The empty assistant placeholder a streaming response accumulates into.
    pub fn streaming_placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            streaming: true,
            complete: false,
        }
    }

    /// A canned assistant notice (welcome / cleared), already complete.
    pub fn assistant_notice(content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: content.to_string(),
            timestamp: Utc::now(),
            streaming: false,
            complete: true,
        }
    }
}

/// The `{role, content}` pair serialized into a chat-completion request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub role: Role,
    pub content: String,
}

impl From<&ChatTurn> for OutboundMessage {
    fn from(turn: &ChatTurn) -> Self {
        OutboundMessage {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// The available model identifiers plus the currently selected one.
///
/// Invariant: `selected` is a member of `models`, or the fetch fell back and
/// `selected` is the built-in default.
#[derive(Clone, Debug)]
pub struct ModelCatalog {
    models: Vec<String>,
    selected: String,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            models: vec![DEFAULT_MODEL.to_string()],
            selected: DEFAULT_MODEL.to_string(),
        }
    }
}

impl ModelCatalog {
    /// Fetches the catalog from the models endpoint, falling back to the
    /// built-in default list on any failure or an empty response. Never an
    /// error to the caller.
    pub async fn fetch(client: &ApiClient) -> Self {
        let models = match client.list_models().await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => {
                debug!("Models endpoint returned an empty list, using default catalog");
                vec![DEFAULT_MODEL.to_string()]
            }
            Err(e) => {
                debug!("Failed to fetch models ({}), using default catalog", e);
                vec![DEFAULT_MODEL.to_string()]
            }
        };

        let selected = models[0].clone();
        Self { models, selected }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn selected(&self) -> &str {
        &self.selected
    }

    /// Selects a model; ids not present in the catalog are rejected.
    pub fn select(&mut self, id: &str) -> bool {
        if self.models.iter().any(|m| m == id) {
            self.selected = id.to_string();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_turn_is_trimmed_and_complete() {
        let turn = ChatTurn::user("  Hello  ");
        assert_eq!(turn.content, "Hello");
        assert!(turn.complete);
        assert!(!turn.streaming);
        assert_eq!(turn.role, Role::User);
    }

    #[test]
    fn test_placeholder_starts_empty_and_streaming() {
        let turn = ChatTurn::streaming_placeholder();
        assert!(turn.content.is_empty());
        assert!(turn.streaming);
        assert!(!turn.complete);
        assert_eq!(turn.role, Role::Assistant);
    }

    #[test]
    fn test_turn_ids_are_unique() {
        assert_ne!(ChatTurn::user("a").id, ChatTurn::user("a").id);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_catalog_select_rejects_unknown_id() {
        let mut catalog = ModelCatalog::default();
        assert!(!catalog.select("gpt-4"));
        assert_eq!(catalog.selected(), DEFAULT_MODEL);
        assert!(catalog.select(DEFAULT_MODEL));
    }
}
