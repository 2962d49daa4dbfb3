// src/errors.rs

use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Errors surfaced by the streaming client and configuration layer.
///
/// Malformed single stream lines and model-list failures are recovered
/// where they occur and never appear here.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("API call failed with status {code}")]
    HttpStatus { code: u16 },

    #[error("empty response body")]
    EmptyBody,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl ChatError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        ChatError::Config(msg.into())
    }
}
