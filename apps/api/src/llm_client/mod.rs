/// LLM Client: the single point of entry for text generation.
///
/// No other module talks to the chat-completions API directly. Pipeline
/// stages depend on the [`TextEngine`] trait and receive streamed output
/// through a [`TokenSink`].
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4";
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,
}

/// Receives streamed output from a generation call.
///
/// `on_fragment` is called once per token fragment in arrival order;
/// `on_complete` once after the last fragment of a successful generation.
pub trait TokenSink: Send {
    fn on_fragment(&mut self, text: &str);
    fn on_complete(&mut self);
}

/// "Given a prompt, produce text", with streaming delivery.
#[async_trait]
pub trait TextEngine: Send + Sync {
    /// Streams the generation into `sink` and returns the full text.
    async fn generate(&self, prompt: &str, sink: &mut dyn TokenSink) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// One meaningful line of a streamed chat-completions body.
#[derive(Debug, PartialEq)]
enum StreamLine {
    Delta(String),
    Done,
}

/// Parses one line of the server-sent event body. Blank lines, comments and
/// chunks without content yield `None`.
fn parse_stream_line(line: &str) -> Result<Option<StreamLine>, LlmError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(StreamLine::Done));
    }

    let chunk: ChatChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        return Err(LlmError::Api {
            status: 200,
            message: error.message,
        });
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(StreamLine::Delta(text)))
    }
}

/// Chat-completions client with streaming output.
#[derive(Clone)]
pub struct OpenAiEngine {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl OpenAiEngine {
    pub fn new(api_key: String, api_url: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            api_url,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Opens the streaming response. Retries on 429 and 5xx with exponential
    /// backoff; once the body starts streaming there are no retries.
    async fn open_stream(&self, prompt: &str) -> Result<reqwest::Response, LlmError> {
        let request_body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            stream: true,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl TextEngine for OpenAiEngine {
    async fn generate(&self, prompt: &str, sink: &mut dyn TokenSink) -> Result<String, LlmError> {
        let response = self.open_stream(prompt).await?;
        let mut body = response.bytes_stream();

        // Bytes are buffered until a full line arrives so multi-byte
        // characters split across chunks decode intact.
        let mut pending: Vec<u8> = Vec::new();
        let mut output = String::new();
        let mut fragments = 0usize;

        'stream: while let Some(chunk) = body.next().await {
            pending.extend_from_slice(&chunk?);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_stream_line(line.trim())? {
                    Some(StreamLine::Delta(text)) => {
                        sink.on_fragment(&text);
                        output.push_str(&text);
                        fragments += 1;
                    }
                    Some(StreamLine::Done) => break 'stream,
                    None => {}
                }
            }
        }

        if output.is_empty() {
            return Err(LlmError::EmptyContent);
        }

        debug!(
            "LLM stream finished: fragments={}, chars={}",
            fragments,
            output.len()
        );
        sink.on_complete();
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_line_delta() {
        let line = r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_stream_line(line).unwrap(),
            Some(StreamLine::Delta("Hel".to_string()))
        );
    }

    #[test]
    fn test_parse_stream_line_done() {
        assert_eq!(
            parse_stream_line("data: [DONE]").unwrap(),
            Some(StreamLine::Done)
        );
    }

    #[test]
    fn test_parse_stream_line_role_only_chunk_is_skipped() {
        let line = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_stream_line(line).unwrap(), None);
    }

    #[test]
    fn test_parse_stream_line_ignores_non_data_lines() {
        assert_eq!(parse_stream_line("").unwrap(), None);
        assert_eq!(parse_stream_line(": keep-alive").unwrap(), None);
        assert_eq!(parse_stream_line("event: message").unwrap(), None);
    }

    #[test]
    fn test_parse_stream_line_surfaces_api_error() {
        let line = r#"data: {"error":{"message":"context length exceeded"}}"#;
        match parse_stream_line(line) {
            Err(LlmError::Api { message, .. }) => assert_eq!(message, "context length exceeded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_stream_line_rejects_garbage() {
        assert!(matches!(
            parse_stream_line("data: {not json"),
            Err(LlmError::Parse(_))
        ));
    }
}
