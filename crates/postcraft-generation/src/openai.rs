//! Streaming client for OpenAI-compatible chat completions.
//!
//! Requests are sent with `stream: true`; the server-sent events are decoded into
//! [`ModelEvent`]s. Tool-call arguments arrive in fragments and are buffered until
//! the choice finishes, so each tool call surfaces as one complete
//! [`ModelEvent::ToolCallStart`] followed by its [`ModelEvent::ToolCallComplete`].

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ModelError;
use crate::model::{LanguageModel, ModelEvent, ModelRequest, ModelStream, Usage};

/// Connection settings for an OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API base including the version segment, e.g. `https://api.openai.com/v1`.
    pub api_base: String,
    /// Bearer token.
    pub api_key: String,
    /// Model name.
    pub model: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Bounds on the streamed response.
    pub sse_limits: SseLimits,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            request_timeout: Duration::from_secs(60),
            sse_limits: SseLimits::default(),
        }
    }
}

/// OpenAI-compatible chat completions client.
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiCompatible {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Network` if the HTTP client cannot be built.
    pub fn new(config: OpenAiConfig) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }

    fn body(&self, request: &ModelRequest) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "stream": true,
            "stream_options": { "include_usage": true },
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                })
                .collect();
        }
        body
    }
}

fn map_transport_error(error: &reqwest::Error) -> ModelError {
    if error.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Network(error.to_string())
    }
}

fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, body: String) -> ModelError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Authentication(body),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ModelError::Timeout,
        _ => ModelError::Api {
            status: status.as_u16(),
            message: body,
        },
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatible {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        tracing::debug!(
            model = %self.config.model,
            tools = request.tools.len(),
            "Opening chat completion stream"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&self.body(&request))
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let hint = retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, hint, body));
        }

        let body: BoxStream<'static, Result<Vec<u8>, ModelError>> = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| map_transport_error(&e)))
            .boxed();

        Ok(decode_events(body, self.config.sse_limits))
    }
}

/// Turn a raw SSE body into model events.
fn decode_events(
    body: BoxStream<'static, Result<Vec<u8>, ModelError>>,
    limits: SseLimits,
) -> ModelStream {
    struct State {
        body: BoxStream<'static, Result<Vec<u8>, ModelError>>,
        sse: SseDecoder,
        chunks: ChunkDecoder,
        pending: VecDeque<ModelEvent>,
        error: Option<ModelError>,
        done: bool,
    }

    let state = State {
        body,
        sse: SseDecoder::with_limits(limits),
        chunks: ChunkDecoder::default(),
        pending: VecDeque::new(),
        error: None,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if let Some(e) = st.error.take() {
                return Some((Err(e), st));
            }
            if st.done {
                return None;
            }

            let mut ended = false;
            let decoded = match st.body.next().await {
                Some(Ok(bytes)) => st.sse.push(&bytes),
                Some(Err(e)) => Err(e),
                None => {
                    ended = true;
                    st.sse.finish()
                }
            };
            let payloads = match decoded {
                Ok(payloads) => payloads,
                Err(e) => {
                    st.error = Some(e);
                    st.done = true;
                    continue;
                }
            };

            for data in payloads {
                if let Err(e) = st.chunks.apply(&data, &mut st.pending) {
                    st.error = Some(e);
                    st.done = true;
                    break;
                }
            }
            if st.error.is_none() && (ended || st.chunks.finished) {
                st.chunks.finish(&mut st.pending);
                st.done = true;
            }
        }
    })
    .boxed()
}

/// Size bounds applied while decoding an SSE body.
#[derive(Debug, Clone, Copy)]
pub struct SseLimits {
    /// Longest accepted line, terminator included.
    pub max_line_bytes: usize,
    /// Largest accepted `data:` payload after joining its lines.
    pub max_event_bytes: usize,
}

impl Default for SseLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 256 * 1024,
            max_event_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Line-oriented SSE decoder yielding `data:` payloads.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: String,
    limits: SseLimits,
}

impl SseDecoder {
    fn with_limits(limits: SseLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Feed bytes; returns every payload completed by them.
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ModelError> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            if pos + 1 > self.limits.max_line_bytes {
                return Err(self.line_too_long());
            }
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = std::str::from_utf8(&line)
                .map_err(|e| ModelError::InvalidResponse(format!("invalid SSE UTF-8: {e}")))?;
            let line = line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    payloads.push(std::mem::take(&mut self.data));
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                let rest = rest.trim_start();
                let separator = usize::from(!self.data.is_empty());
                if self.data.len() + separator + rest.len() > self.limits.max_event_bytes {
                    return Err(ModelError::InvalidResponse(format!(
                        "SSE event exceeds max_event_bytes={}",
                        self.limits.max_event_bytes
                    )));
                }
                if separator == 1 {
                    self.data.push('\n');
                }
                self.data.push_str(rest);
            }
        }

        // A partial line already past the limit will never become acceptable.
        if self.buffer.len() > self.limits.max_line_bytes {
            return Err(self.line_too_long());
        }
        Ok(payloads)
    }

    /// Flush a trailing event not terminated by a blank line.
    fn finish(&mut self) -> Result<Vec<String>, ModelError> {
        let mut payloads = if self.buffer.is_empty() {
            Vec::new()
        } else {
            self.push(b"\n")?
        };
        if !self.data.is_empty() {
            payloads.push(std::mem::take(&mut self.data));
        }
        Ok(payloads)
    }

    fn line_too_long(&self) -> ModelError {
        ModelError::InvalidResponse(format!(
            "SSE line exceeds max_line_bytes={}",
            self.limits.max_line_bytes
        ))
    }
}

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates chat completion chunks into model events.
#[derive(Debug, Default)]
struct ChunkDecoder {
    tool_calls: BTreeMap<u32, PartialToolCall>,
    usage: Usage,
    finished: bool,
}

impl ChunkDecoder {
    fn apply(&mut self, data: &str, out: &mut VecDeque<ModelEvent>) -> Result<(), ModelError> {
        if self.finished {
            return Ok(());
        }
        if data.trim() == "[DONE]" {
            self.finished = true;
            return Ok(());
        }

        let chunk: Chunk = serde_json::from_str(data)
            .map_err(|e| ModelError::InvalidResponse(format!("bad stream chunk: {e}")))?;

        if let Some(usage) = chunk.usage {
            self.usage = usage;
        }

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                out.push_back(ModelEvent::ContentDelta(text));
            }
            for call in choice.delta.tool_calls {
                let partial = self.tool_calls.entry(call.index).or_default();
                if let Some(id) = call.id {
                    partial.id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        partial.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial.arguments.push_str(&arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.flush_tool_calls(out);
            }
        }
        Ok(())
    }

    fn flush_tool_calls(&mut self, out: &mut VecDeque<ModelEvent>) {
        for (index, call) in std::mem::take(&mut self.tool_calls) {
            let id = if call.id.is_empty() {
                format!("call_{index}")
            } else {
                call.id
            };
            let input = if call.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.arguments).unwrap_or_else(|e| {
                    tracing::warn!(tool = %call.name, error = %e, "Unparseable tool arguments");
                    json!({})
                })
            };
            out.push_back(ModelEvent::ToolCallStart {
                id: id.clone(),
                name: call.name,
                input,
            });
            out.push_back(ModelEvent::ToolCallComplete { id });
        }
    }

    /// Flush buffered calls and emit the terminal event.
    fn finish(&mut self, out: &mut VecDeque<ModelEvent>) {
        self.flush_tool_calls(out);
        out.push_back(ModelEvent::MessageEnd { usage: self.usage });
        self.finished = true;
        self.usage = Usage::default();
    }
}
