// API Constants
pub const DEFAULT_BASE_URL: &str = "https://ahamai-api.officialprakashkrsingh.workers.dev";
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub const MODELS_PATH: &str = "/v1/models";

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

// SSE framing
pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

// Canned assistant notices
pub const WELCOME_MESSAGE: &str = "Hello! I'm AhamAI, your AI assistant powered by advanced language models. How can I help you today?";
pub const CLEARED_MESSAGE: &str = "Chat cleared! How can I help you today?";
