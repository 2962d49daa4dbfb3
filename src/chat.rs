// src/chat.rs

use crate::{
    api::ApiClient,
    config::Config,
    constants::{CLEARED_MESSAGE, WELCOME_MESSAGE},
    conversation::ChatState,
    errors::ChatResult,
    models::{ModelCatalog, OutboundMessage},
};
use futures::StreamExt;
use log::debug;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Notification published to subscribers after every state mutation, so the
/// UI collaborator re-reads the conversation without polling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    /// A submission was accepted: user turn + placeholder appended.
    SubmissionStarted,
    /// One fragment was appended to the in-flight turn.
    Fragment(String),
    /// The in-flight turn was finalized.
    StreamEnded,
    /// The in-flight turn was discarded and an error recorded.
    StreamFailed(String),
    /// The conversation was reset.
    Cleared,
    /// The selected model changed.
    ModelSelected(String),
}

/// One chat session: the conversation state, the streaming client, and the
/// single permitted in-flight request.
///
/// Shared-state layout mirrors the rest of the app: the state lives behind
/// an `Arc<Mutex<..>>` and the streaming task mutates it fragment by
/// fragment, so mutations land in strict arrival order and a second
/// submission can never interleave (the gate inside `begin_submission`
/// rejects it while `loading` is set).
pub struct ChatSession {
    state: Arc<Mutex<ChatState>>,
    api: ApiClient,
    catalog: Mutex<ModelCatalog>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
    subscribers: Arc<Mutex<Vec<UnboundedSender<ChatEvent>>>>,
}

impl ChatSession {
    pub fn new(config: &Config) -> ChatResult<Self> {
        Ok(Self {
            state: Arc::new(Mutex::new(ChatState::new(WELCOME_MESSAGE))),
            api: ApiClient::new(config)?,
            catalog: Mutex::new(ModelCatalog::default()),
            in_flight: Mutex::new(None),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Registers an observer. Dropped receivers are pruned on the next send.
    pub fn subscribe(&self) -> UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Runs a closure against the current state; the UI reads turns, error
    /// and loading flag through this.
    pub fn with_state<T>(&self, f: impl FnOnce(&ChatState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }

    /// Populates the model catalog from the API, falling back to the
    /// built-in default list on any failure.
    pub async fn load_models(&self) -> Vec<String> {
        let catalog = ModelCatalog::fetch(&self.api).await;
        let models = catalog.models().to_vec();
        *self.catalog.lock().unwrap() = catalog;
        models
    }

    pub fn available_models(&self) -> Vec<String> {
        self.catalog.lock().unwrap().models().to_vec()
    }

    pub fn selected_model(&self) -> String {
        self.catalog.lock().unwrap().selected().to_string()
    }

    pub fn select_model(&self, id: &str) -> bool {
        let accepted = self.catalog.lock().unwrap().select(id);
        if accepted {
            self.publish(ChatEvent::ModelSelected(id.to_string()));
        }
        accepted
    }

    /// Submits user input and drives one streaming response to completion.
    ///
    /// Silently dropped on blank input or while a response is in flight.
    /// The streaming work runs on a spawned task; callers observe progress
    /// through the event subscription and the shared state.
    pub fn send_message(&self, text: &str) {
        let (model, messages) = {
            let mut state = self.state.lock().unwrap();
            if !state.begin_submission(text) {
                return;
            }
            // Snapshot while holding the lock: the placeholder is not yet
            // complete, so it is excluded from the outbound payload.
            (self.selected_model(), state.outbound_messages())
        };
        self.publish(ChatEvent::SubmissionStarted);

        let api = self.api.clone();
        let state = Arc::clone(&self.state);
        let subscribers = Arc::clone(&self.subscribers);
        let handle = tokio::spawn(async move {
            run_stream(api, state, subscribers, model, messages).await;
        });
        *self.in_flight.lock().unwrap() = Some(handle);
    }

    /// Resets the conversation. An in-flight request is aborted first;
    /// dropping the stream releases the connection, and the partial
    /// placeholder goes away with the rest of the turns.
    pub fn clear_chat(&self) {
        if let Some(handle) = self.in_flight.lock().unwrap().take() {
            handle.abort();
        }
        self.state.lock().unwrap().clear(CLEARED_MESSAGE);
        self.publish(ChatEvent::Cleared);
    }

    /// Resubmits the most recent user turn through the normal send path,
    /// discarding any trailing incomplete assistant turns first.
    pub fn retry_last_message(&self) {
        let target = self.state.lock().unwrap().retry_target();
        if let Some(text) = target {
            self.send_message(&text);
        }
    }

    pub fn dismiss_error(&self) {
        self.state.lock().unwrap().dismiss_error();
    }

    fn publish(&self, event: ChatEvent) {
        publish_to(&self.subscribers, event);
    }
}

type Subscribers = Arc<Mutex<Vec<UnboundedSender<ChatEvent>>>>;

fn publish_to(subscribers: &Subscribers, event: ChatEvent) {
    subscribers
        .lock()
        .unwrap()
        .retain(|tx| tx.send(event.clone()).is_ok());
}

/// Drives one fragment stream against the shared state. Runs on its own
/// task so the caller returns immediately; aborting the task drops the
/// stream and with it the response connection.
async fn run_stream(
    api: ApiClient,
    state: Arc<Mutex<ChatState>>,
    subscribers: Subscribers,
    model: String,
    messages: Vec<OutboundMessage>,
) {
    let fail = |message: String| {
        debug!("Stream failed: {}", message);
        state.lock().unwrap().fail_stream(message.clone());
        publish_to(&subscribers, ChatEvent::StreamFailed(message));
    };

    let stream = match api.stream_completion(&model, &messages).await {
        Ok(stream) => stream,
        Err(e) => {
            fail(format!("Failed to get response: {}", e));
            return;
        }
    };

    futures::pin_mut!(stream);

    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                state.lock().unwrap().apply_fragment(&fragment);
                publish_to(&subscribers, ChatEvent::Fragment(fragment));
            }
            Err(e) => {
                fail(format!("Failed to get response: {}", e));
                return;
            }
        }
    }

    state.lock().unwrap().finish_stream();
    publish_to(&subscribers, ChatEvent::StreamEnded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CHAT_COMPLETIONS_PATH, MODELS_PATH};
    use crate::models::Role;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn session_for(base_url: &str) -> Arc<ChatSession> {
        let mut config = Config::default();
        config.api_key = "test-api-key".to_string();
        config.base_url = base_url.to_string();
        Arc::new(ChatSession::new(&config).unwrap())
    }

    fn sse_body(fragments: &[&str]) -> String {
        let mut body = String::new();
        for fragment in fragments {
            body.push_str(&format!(
                "data: {}\n\n",
                serde_json::json!({"choices": [{"delta": {"content": fragment}}]})
            ));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn wait_for_terminal(rx: &mut UnboundedReceiver<ChatEvent>) -> ChatEvent {
        loop {
            match rx.recv().await.expect("event channel closed") {
                event @ (ChatEvent::StreamEnded | ChatEvent::StreamFailed(_)) => return event,
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_send_message_streams_to_completion() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_COMPLETIONS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(&["Hel", "lo ", "there"]), "text/event-stream"),
            )
            .mount(&mock_server)
            .await;

        let session = session_for(&mock_server.uri());
        let mut rx = session.subscribe();

        session.send_message("Hello");

        // Placeholder is visible immediately after acceptance.
        session.with_state(|state| {
            let last = state.turns().last().unwrap();
            assert_eq!(last.role, Role::Assistant);
            assert!(last.streaming);
        });

        let terminal = wait_for_terminal(&mut rx).await;
        assert_eq!(terminal, ChatEvent::StreamEnded);

        session.with_state(|state| {
            let last = state.turns().last().unwrap();
            assert_eq!(last.content, "Hello there");
            assert!(last.complete);
            assert!(!last.streaming);
            assert!(!state.is_loading());
            assert_eq!(state.error(), None);
        });
    }

    #[tokio::test]
    async fn test_http_500_removes_placeholder_and_keeps_user_turn() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let session = session_for(&mock_server.uri());
        let mut rx = session.subscribe();

        session.send_message("Hello");
        let terminal = wait_for_terminal(&mut rx).await;
        assert!(matches!(terminal, ChatEvent::StreamFailed(_)));

        session.with_state(|state| {
            let last = state.turns().last().unwrap();
            assert_eq!(last.role, Role::User);
            assert_eq!(last.content, "Hello");
            assert!(state.error().unwrap().contains("500"));
            assert!(!state.is_loading());
        });
    }

    #[tokio::test]
    async fn test_retry_after_error_repeats_the_normal_flow() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path(CHAT_COMPLETIONS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(&["recovered"]), "text/event-stream"),
            )
            .mount(&mock_server)
            .await;

        let session = session_for(&mock_server.uri());
        let mut rx = session.subscribe();

        session.send_message("Hello");
        assert!(matches!(
            wait_for_terminal(&mut rx).await,
            ChatEvent::StreamFailed(_)
        ));

        session.retry_last_message();
        assert_eq!(wait_for_terminal(&mut rx).await, ChatEvent::StreamEnded);

        session.with_state(|state| {
            let last = state.turns().last().unwrap();
            assert_eq!(last.content, "recovered");
            // Retry resubmits through the normal send path, so the user turn
            // appears twice: welcome + user + resubmitted user + assistant.
            assert_eq!(state.turns().len(), 4);
            assert_eq!(state.turns()[1].role, Role::User);
            assert_eq!(state.turns()[1].content, "Hello");
            assert_eq!(state.turns()[2].role, Role::User);
            assert_eq!(state.turns()[2].content, "Hello");
        });
    }

    #[tokio::test]
    async fn test_clear_chat_resets_conversation() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_COMPLETIONS_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse_body(&["hi"]), "text/event-stream"),
            )
            .mount(&mock_server)
            .await;

        let session = session_for(&mock_server.uri());
        let mut rx = session.subscribe();

        session.send_message("Hello");
        wait_for_terminal(&mut rx).await;

        session.clear_chat();
        session.with_state(|state| {
            assert_eq!(state.turns().len(), 1);
            assert_eq!(state.turns()[0].content, CLEARED_MESSAGE);
            assert!(!state.is_loading());
        });
    }

    #[tokio::test]
    async fn test_load_models_falls_back_on_unreachable_host() {
        // Nothing is listening here; the fetch must recover, not propagate.
        let session = session_for("http://127.0.0.1:9");
        let models = session.load_models().await;
        assert_eq!(models, vec!["gpt-3.5-turbo".to_string()]);
        assert_eq!(session.selected_model(), "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn test_load_models_uses_endpoint_order_and_selects_first() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MODELS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "gpt-4"}, {"id": "gpt-3.5-turbo"}]
            })))
            .mount(&mock_server)
            .await;

        let session = session_for(&mock_server.uri());
        let models = session.load_models().await;
        assert_eq!(models, vec!["gpt-4", "gpt-3.5-turbo"]);
        assert_eq!(session.selected_model(), "gpt-4");

        assert!(session.select_model("gpt-3.5-turbo"));
        assert!(!session.select_model("not-a-model"));
        assert_eq!(session.selected_model(), "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn test_send_while_streaming_is_dropped() {
        let mock_server = MockServer::start().await;
        // Delay the response so the first submission is still in flight.
        Mock::given(method("POST"))
            .and(path(CHAT_COMPLETIONS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(sse_body(&["slow"]), "text/event-stream")
                    .set_delay(std::time::Duration::from_millis(200)),
            )
            .mount(&mock_server)
            .await;

        let session = session_for(&mock_server.uri());
        let mut rx = session.subscribe();

        session.send_message("first");
        let len_after_first = session.with_state(|state| state.turns().len());

        session.send_message("second");
        assert_eq!(
            session.with_state(|state| state.turns().len()),
            len_after_first
        );

        wait_for_terminal(&mut rx).await;
    }
}
