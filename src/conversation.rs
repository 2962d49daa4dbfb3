// src/conversation.rs

use crate::models::{ChatTurn, OutboundMessage, Role};
use log::debug;

/// The conversation plus the per-submission lifecycle flags the UI reads.
///
/// Purely synchronous: every transition is an ordinary method call, which is
/// what lets the session layer apply streamed fragments in strict arrival
/// order under one lock and keeps the state machine testable without a
/// runtime.
///
/// Invariants: at most one turn has `streaming == true`, and only turns with
/// `complete == true` are serialized into the next outbound request.
#[derive(Debug)]
pub struct ChatState {
    turns: Vec<ChatTurn>,
    error: Option<String>,
    loading: bool,
}

impl ChatState {
    /// A fresh conversation opened with the given assistant notice.
    pub fn new(welcome: &str) -> Self {
        Self {
            turns: vec![ChatTurn::assistant_notice(welcome)],
            error: None,
            loading: false,
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// The completed turns converted to request `{role, content}` pairs.
    pub fn outbound_messages(&self) -> Vec<OutboundMessage> {
        self.turns
            .iter()
            .filter(|turn| turn.complete)
            .map(OutboundMessage::from)
            .collect()
    }

    /// Opens one request/response cycle: appends the completed user turn and
    /// the streaming assistant placeholder, and clears any previous error.
    ///
    /// Returns false without mutating anything on blank input or while a
    /// response is already in flight (single-flight gate).
    pub fn begin_submission(&mut self, text: &str) -> bool {
        if text.trim().is_empty() || self.loading {
            debug!("Dropping submission (blank input or response in flight)");
            return false;
        }

        self.error = None;
        self.turns.push(ChatTurn::user(text));
        self.turns.push(ChatTurn::streaming_placeholder());
        self.loading = true;
        true
    }

    /// Appends one streamed fragment to the in-flight placeholder.
    pub fn apply_fragment(&mut self, fragment: &str) {
        if let Some(turn) = self.streaming_turn_mut() {
            turn.content.push_str(fragment);
        }
    }

    /// Finalizes the in-flight turn: content stops mutating and the turn
    /// becomes eligible for the next outbound request.
    pub fn finish_stream(&mut self) {
        if let Some(turn) = self.streaming_turn_mut() {
            turn.streaming = false;
            turn.complete = true;
        }
        self.loading = false;
    }

    /// Discards the in-flight placeholder (partial fragments are not valid
    /// content) and records the user-visible error. The user turn that
    /// triggered the request stays put so a retry can resubmit it.
    pub fn fail_stream(&mut self, message: impl Into<String>) {
        if let Some(pos) = self.turns.iter().position(|turn| turn.streaming) {
            self.turns.remove(pos);
        }
        self.error = Some(message.into());
        self.loading = false;
    }

    /// Resets to a single fresh assistant notice. Always legal; an in-flight
    /// stream is implicitly cancelled and its partial placeholder dropped
    /// with everything else.
    pub fn clear(&mut self, notice: &str) {
        self.turns.clear();
        self.turns.push(ChatTurn::assistant_notice(notice));
        self.error = None;
        self.loading = false;
    }

    /// Drops trailing incomplete assistant turns and returns the most recent
    /// user turn's text, ready to resubmit.
    pub fn retry_target(&mut self) -> Option<String> {
        let text = self
            .turns
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.clone())?;

        while matches!(
            self.turns.last(),
            Some(turn) if turn.role == Role::Assistant && !turn.complete
        ) {
            self.turns.pop();
        }

        Some(text)
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    fn streaming_turn_mut(&mut self) -> Option<&mut ChatTurn> {
        self.turns.iter_mut().find(|turn| turn.streaming)
    }
}
