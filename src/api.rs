use crate::{
    config::Config,
    constants::{CHAT_COMPLETIONS_PATH, DATA_PREFIX, DONE_SENTINEL, MODELS_PATH},
    errors::{ChatError, ChatResult},
    models::OutboundMessage,
};
use futures::{Stream, StreamExt};
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

/// HTTP client for the AhamAI chat-completion API.
///
/// One instance per session; cheap to clone (reqwest pools connections
/// internally). The base URL is carried per-instance so tests can point a
/// client at a mock server.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    request_timeout: std::time::Duration,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

/// Extracts the incremental text from one `data: ` payload.
///
/// Returns the first choice's non-empty `delta.content`, or `None` for
/// payloads without one (role-only deltas, finish chunks, usage chunks).
/// A payload that is not valid JSON also yields `None`: a single corrupt
/// line must not kill an otherwise-good stream.
fn delta_content(data: &str) -> Option<String> {
    let parsed: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!("Skipping malformed stream line ({}): {}", e, data);
            return None;
        }
    };

    parsed["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|content| !content.is_empty())
        .map(|content| content.to_string())
}

/// What one stream line amounts to.
enum LineEvent {
    /// A `data: ` payload carrying incremental text.
    Fragment(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Everything else: non-`data: ` lines, empty or malformed payloads,
    /// deltas without text.
    Ignored,
}

fn parse_line(line: &str) -> LineEvent {
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return LineEvent::Ignored;
    };
    let data = data.trim();

    if data == DONE_SENTINEL {
        return LineEvent::Done;
    }
    if data.is_empty() {
        return LineEvent::Ignored;
    }

    match delta_content(data) {
        Some(content) => LineEvent::Fragment(content),
        None => LineEvent::Ignored,
    }
}

/// Accumulates raw response bytes and hands back complete lines.
///
/// Splitting happens before UTF-8 decoding, so a multi-byte character that
/// straddles two network chunks is reassembled intact instead of decaying
/// into replacement characters.
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// The next complete line, without its terminator.
    fn next_line(&mut self) -> Option<String> {
        let newline_pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=newline_pos).collect();
        Some(decode_line(&line[..newline_pos]))
    }

    /// The trailing unterminated line once the stream has ended, if any.
    fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl ApiClient {
    pub fn new(config: &Config) -> ChatResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            request_timeout: config.request_timeout(),
        })
    }

    /// Issues one streaming chat-completion request and yields the response
    /// as an ordered sequence of text fragments.
    ///
    /// The sequence is single-pass and lazy: fragments are produced as the
    /// underlying byte stream delivers data. Dropping the stream aborts the
    /// request and releases the connection, so cancellation is cancel-by-drop
    /// on every exit path.
    ///
    /// Fails up front with [`ChatError::HttpStatus`] on a non-2xx response.
    /// Mid-stream, a transport error or a zero-byte body yields a single
    /// `Err` item and ends the sequence. Lines without the `data: ` prefix
    /// and payloads that fail to parse are skipped; the `[DONE]` sentinel
    /// ends the sequence normally even when more buffered lines follow it.
    pub async fn stream_completion(
        &self,
        model: &str,
        messages: &[OutboundMessage],
    ) -> ChatResult<impl Stream<Item = ChatResult<String>> + Send + 'static> {
        let payload = json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        debug!("Streaming completion request for model {}", model);

        let response = self
            .client
            .post(format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::HttpStatus {
                code: status.as_u16(),
            });
        }

        let stream = async_stream::stream! {
            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::new();
            let mut saw_bytes = false;
            let mut finished = false;

            'read: while let Some(chunk) = byte_stream.next().await {
                let bytes = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(ChatError::Transport(e));
                        return;
                    }
                };

                saw_bytes = saw_bytes || !bytes.is_empty();
                lines.push(&bytes);

                while let Some(line) = lines.next_line() {
                    match parse_line(&line) {
                        LineEvent::Fragment(content) => yield Ok(content),
                        LineEvent::Done => {
                            finished = true;
                            break 'read;
                        }
                        LineEvent::Ignored => {}
                    }
                }
            }

            // The server may end the body without terminating the last line.
            if !finished {
                if let Some(line) = lines.take_remainder() {
                    if let LineEvent::Fragment(content) = parse_line(&line) {
                        yield Ok(content);
                    }
                }
            }

            if !saw_bytes {
                yield Err(ChatError::EmptyBody);
            }
        };

        Ok(stream)
    }

    /// Fetches the model identifiers the API currently offers, in the order
    /// the endpoint lists them. Failures here are recoverable by design: the
    /// catalog layer falls back to the built-in default list.
    pub async fn list_models(&self) -> ChatResult<Vec<String>> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, MODELS_PATH))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::HttpStatus {
                code: status.as_u16(),
            });
        }

        let body: ModelsResponse = response.json().await?;

        Ok(body.data.into_iter().map(|entry| entry.id).collect())
    }
}
