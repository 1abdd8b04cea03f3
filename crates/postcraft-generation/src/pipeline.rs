//! Generation pipeline.
//!
//! Three modes produce the same [`GeneratedContent`] shape:
//!
//! - **plain**: one content-only model call, no tools
//! - **sequential**: a content-only call, then the hashtag and posting-time tools
//!   run in order over the finished content
//! - **interleaved**: one model call that declares the tools; each requested tool
//!   is dispatched as soon as the call arrives and its result is emitted before
//!   any further content
//!
//! Establishing the model stream is retried per [`RetryPolicy`]; the whole model
//! interaction is bounded by the pipeline timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use postcraft_core::{
    ArtifactId, GeneratedContent, GenerationMetadata, GenerationMode, GenerationRequest, Platform,
    PostingTime,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::{GenerationError, ModelError};
use crate::model::{LanguageModel, ModelEvent, ModelRequest, ModelStream, Usage};
use crate::prompt::build_prompt;
use crate::retry::RetryPolicy;
use crate::tools::posting_time::fallback_posting_time;
use crate::tools::{
    HashtagOutput, ToolInvocation, ToolRegistry, HASHTAGS_TOOL, POSTING_TIME_TOOL,
};

/// Default bound on one model interaction.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// Lifecycle of one generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    /// Not started.
    Idle,
    /// Building the prompt and opening the model stream.
    Prompting,
    /// Consuming model content.
    Streaming,
    /// Running a tool.
    ToolDispatch,
    /// Assembling the result.
    Finalizing,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
}

impl GenerationState {
    /// Whether the run has ended.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `next` may follow `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Prompting)
            | (Self::Prompting, Self::Streaming)
            | (Self::Streaming | Self::ToolDispatch, Self::ToolDispatch | Self::Finalizing)
            | (Self::ToolDispatch, Self::Streaming)
            | (Self::Finalizing, Self::Complete) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Tool call as shown to stream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    /// Tool name.
    pub name: String,
    /// Input passed to the tool.
    pub input: Value,
}

/// Tool result as shown to stream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultInfo {
    /// Tool name.
    pub name: String,
    /// Tool output (`null` when the tool failed).
    pub result: Value,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One event of the live generation stream.
///
/// `start`, `end` and `error` are emitted by the caller that owns billing; the
/// pipeline emits `content`, `tool_call` and `tool_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Generation accepted.
    Start {
        /// Request topic.
        topic: String,
        /// Target platform.
        platform: Platform,
        /// Credits the generation will cost.
        cost: i64,
    },
    /// A piece of post text.
    Content {
        /// The new text.
        delta: String,
    },
    /// A tool is about to run.
    ToolCall {
        /// The call.
        tool: ToolCallInfo,
    },
    /// A tool finished.
    ToolResult {
        /// The result.
        tool: ToolResultInfo,
    },
    /// Generation finished and was billed.
    End {
        /// Final result.
        result: Box<GeneratedContent>,
        /// Persisted artifact.
        #[serde(default)]
        artifact_id: Option<ArtifactId>,
        /// Balance after the debit.
        #[serde(default)]
        remaining_balance: Option<i64>,
    },
    /// Generation failed.
    Error {
        /// What went wrong.
        message: String,
        /// Balance, when known.
        #[serde(default)]
        remaining_balance: Option<i64>,
    },
}

impl StreamEvent {
    /// Whether this event ends the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }
}

/// Sending half of a live event stream.
///
/// A consumer that goes away does not fail the run: events are dropped from then
/// on and [`EventSink::is_connected`] turns false.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    connected: bool,
}

impl EventSink {
    /// Wrap a sender.
    #[must_use]
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            tx,
            connected: true,
        }
    }

    /// A sink and the receiver it feeds.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    /// A sink nobody listens to.
    #[must_use]
    pub fn detached() -> Self {
        let (sink, _rx) = Self::channel(1);
        sink
    }

    /// Deliver an event. Returns whether the consumer is still there.
    pub async fn emit(&mut self, event: StreamEvent) -> bool {
        if !self.connected {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            tracing::debug!("Stream consumer disconnected");
            self.connected = false;
        }
        self.connected
    }

    /// Whether the consumer is still receiving.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected && !self.tx.is_closed()
    }
}

/// Accumulated state of one run.
#[derive(Debug)]
struct Run {
    state: GenerationState,
    content: String,
    usage: Usage,
    hashtags: Option<Vec<String>>,
    posting_time: Option<PostingTime>,
}

impl Run {
    fn new() -> Self {
        Self {
            state: GenerationState::Idle,
            content: String::new(),
            usage: Usage::default(),
            hashtags: None,
            posting_time: None,
        }
    }

    fn advance(&mut self, next: GenerationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {next:?}",
            self.state
        );
        tracing::trace!(from = ?self.state, to = ?next, "Generation state");
        self.state = next;
    }

    /// Keep the parsed output of a successful tool call.
    fn record(&mut self, invocation: &ToolInvocation) {
        if !invocation.succeeded() {
            return;
        }
        match invocation.name.as_str() {
            HASHTAGS_TOOL => {
                if let Ok(output) = serde_json::from_value::<HashtagOutput>(invocation.output.clone()) {
                    self.hashtags = Some(output.hashtags);
                }
            }
            POSTING_TIME_TOOL => {
                if let Ok(time) = serde_json::from_value::<PostingTime>(invocation.output.clone()) {
                    self.posting_time = Some(time);
                }
            }
            _ => {}
        }
    }

    fn ensure_content(&self) -> Result<(), GenerationError> {
        if self.content.trim().is_empty() {
            Err(GenerationError::EmptyContent)
        } else {
            Ok(())
        }
    }
}

/// Drives a [`LanguageModel`] and the tool registry to produce posts.
#[derive(Clone)]
pub struct GenerationPipeline {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    retry: RetryPolicy,
    timeout: Duration,
    max_tokens: Option<u32>,
}

impl std::fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("model", &self.model.model_id())
            .field("tools", &self.tools)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl GenerationPipeline {
    /// Pipeline with the default tools, retry policy and timeout.
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            tools: ToolRegistry::with_default_tools(),
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            max_tokens: None,
        }
    }

    /// Replace the tool registry.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap model output.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The tool registry.
    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Generate in a non-live mode.
    ///
    /// `Interleaved` runs with a detached sink, so it is equivalent to awaiting
    /// the live stream.
    ///
    /// # Errors
    ///
    /// Returns a `GenerationError` if the model fails, times out or writes nothing.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        mode: GenerationMode,
    ) -> Result<GeneratedContent, GenerationError> {
        match mode {
            GenerationMode::Plain => self.generate_plain(request).await,
            GenerationMode::Sequential => self.generate_sequential(request).await,
            GenerationMode::Interleaved => {
                self.run_interleaved(request, &mut EventSink::detached())
                    .await
            }
        }
    }

    /// Content only; no hashtags and no posting time.
    ///
    /// # Errors
    ///
    /// Returns a `GenerationError` if the model fails, times out or writes nothing.
    pub async fn generate_plain(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, GenerationError> {
        let mut run = Run::new();
        let result = self.bounded(self.write_content(&mut run, request)).await;
        self.settle(run, request, GenerationMode::Plain, result)
    }

    /// Content first, then both tools in order over the finished content.
    ///
    /// # Errors
    ///
    /// Returns a `GenerationError` if the model fails, times out or writes nothing.
    pub async fn generate_sequential(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, GenerationError> {
        let mut run = Run::new();
        let result = self.bounded(self.write_content(&mut run, request)).await;

        if result.is_ok() {
            run.advance(GenerationState::ToolDispatch);
            for name in [HASHTAGS_TOOL, POSTING_TIME_TOOL] {
                let input = tool_input(name, Value::Null, request, &run.content);
                let invocation = self.tools.dispatch(name, input);
                run.record(&invocation);
            }
        }
        self.settle(run, request, GenerationMode::Sequential, result)
    }

    /// One tool-enabled model call, streaming events into `sink`.
    ///
    /// Every `tool_call` event is immediately followed by its `tool_result`.
    /// Tools the model did not call are run after the content completes. Content
    /// already emitted stays emitted when the run fails.
    ///
    /// # Errors
    ///
    /// Returns a `GenerationError` if the model fails, times out or writes nothing.
    pub async fn run_interleaved(
        &self,
        request: &GenerationRequest,
        sink: &mut EventSink,
    ) -> Result<GeneratedContent, GenerationError> {
        let mut run = Run::new();
        let result = self
            .bounded(self.interleave(&mut run, request, sink))
            .await;
        self.settle(run, request, GenerationMode::Interleaved, result)
    }

    async fn interleave(
        &self,
        run: &mut Run,
        request: &GenerationRequest,
        sink: &mut EventSink,
    ) -> Result<(), GenerationError> {
        run.advance(GenerationState::Prompting);
        let model_request = ModelRequest::new(build_prompt(request, true))
            .with_tools(self.tools.specs())
            .with_max_tokens(self.max_tokens);
        let mut stream = self.open_stream(model_request).await?;
        run.advance(GenerationState::Streaming);

        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::ContentDelta(delta) => {
                    run.content.push_str(&delta);
                    sink.emit(StreamEvent::Content { delta }).await;
                }
                ModelEvent::ToolCallStart { id, name, input } => {
                    tracing::debug!(tool = %name, call_id = %id, "Model requested tool");
                    run.advance(GenerationState::ToolDispatch);
                    let input = tool_input(&name, input, request, &run.content);
                    self.dispatch(run, sink, &name, input).await;
                    run.advance(GenerationState::Streaming);
                }
                ModelEvent::ToolCallComplete { id } => {
                    tracing::trace!(call_id = %id, "Tool call complete");
                }
                ModelEvent::MessageEnd { usage } => run.usage = usage,
            }
        }
        if run.content.trim().is_empty() {
            tracing::debug!("Model answered with tool calls only, requesting the post text");
            self.follow_up_content(run, request, sink).await?;
        }
        run.ensure_content()?;

        let missing: Vec<&str> = [
            (HASHTAGS_TOOL, run.hashtags.is_none()),
            (POSTING_TIME_TOOL, run.posting_time.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect();
        if !missing.is_empty() {
            run.advance(GenerationState::ToolDispatch);
            for name in missing {
                tracing::debug!(tool = %name, "Model skipped tool, running it after content");
                let input = tool_input(name, Value::Null, request, &run.content);
                self.dispatch(run, sink, name, input).await;
            }
        }
        Ok(())
    }

    /// Content-only second turn for a model that spent its first on tool calls.
    async fn follow_up_content(
        &self,
        run: &mut Run,
        request: &GenerationRequest,
        sink: &mut EventSink,
    ) -> Result<(), GenerationError> {
        let model_request =
            ModelRequest::new(build_prompt(request, false)).with_max_tokens(self.max_tokens);
        let mut stream = self.open_stream(model_request).await?;

        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::ContentDelta(delta) => {
                    run.content.push_str(&delta);
                    sink.emit(StreamEvent::Content { delta }).await;
                }
                ModelEvent::MessageEnd { usage } => run.usage += usage,
                ModelEvent::ToolCallStart { name, .. } => {
                    tracing::debug!(tool = %name, "Ignoring tool call in content-only call");
                }
                ModelEvent::ToolCallComplete { .. } => {}
            }
        }
        Ok(())
    }

    async fn dispatch(&self, run: &mut Run, sink: &mut EventSink, name: &str, input: Value) {
        sink.emit(StreamEvent::ToolCall {
            tool: ToolCallInfo {
                name: name.to_string(),
                input: input.clone(),
            },
        })
        .await;

        let invocation = self.tools.dispatch(name, input);
        run.record(&invocation);

        sink.emit(StreamEvent::ToolResult {
            tool: ToolResultInfo {
                name: invocation.name,
                result: invocation.output,
                error: invocation.error,
            },
        })
        .await;
    }

    /// Stream a content-only response into `run.content`.
    async fn write_content(
        &self,
        run: &mut Run,
        request: &GenerationRequest,
    ) -> Result<(), GenerationError> {
        run.advance(GenerationState::Prompting);
        let model_request =
            ModelRequest::new(build_prompt(request, false)).with_max_tokens(self.max_tokens);
        let mut stream = self.open_stream(model_request).await?;
        run.advance(GenerationState::Streaming);

        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::ContentDelta(delta) => run.content.push_str(&delta),
                ModelEvent::MessageEnd { usage } => run.usage = usage,
                ModelEvent::ToolCallStart { name, .. } => {
                    tracing::debug!(tool = %name, "Ignoring tool call in content-only call");
                }
                ModelEvent::ToolCallComplete { .. } => {}
            }
        }
        run.ensure_content()
    }

    async fn open_stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        self.retry
            .run(|attempt| {
                if attempt > 1 {
                    tracing::debug!(attempt, model = %self.model.model_id(), "Reopening model stream");
                }
                self.model.stream(request.clone())
            })
            .await
    }

    async fn bounded<F>(&self, fut: F) -> Result<(), GenerationError>
    where
        F: Future<Output = Result<(), GenerationError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or(Err(GenerationError::Timeout(self.timeout)))
    }

    /// Close the run: assemble the result or record the failure.
    fn settle(
        &self,
        mut run: Run,
        request: &GenerationRequest,
        mode: GenerationMode,
        result: Result<(), GenerationError>,
    ) -> Result<GeneratedContent, GenerationError> {
        if let Err(e) = result {
            run.advance(GenerationState::Failed);
            tracing::warn!(
                mode = ?mode,
                model = %self.model.model_id(),
                emitted_chars = run.content.len(),
                error = %e,
                "Generation failed"
            );
            return Err(e);
        }

        run.advance(GenerationState::Finalizing);
        let (hashtags, best_time_to_post) = if mode.uses_tools() {
            (
                run.hashtags.take().unwrap_or_default(),
                Some(run.posting_time.take().unwrap_or_else(fallback_posting_time)),
            )
        } else {
            (Vec::new(), None)
        };
        let content = GeneratedContent {
            content: run.content.trim().to_string(),
            hashtags,
            best_time_to_post,
            total_tokens_used: run.usage.total_tokens,
            metadata: GenerationMetadata::for_request(request),
        };
        run.advance(GenerationState::Complete);

        tracing::info!(
            mode = ?mode,
            model = %self.model.model_id(),
            platform = %request.platform,
            tokens = content.total_tokens_used,
            hashtags = content.hashtags.len(),
            "Generation complete"
        );
        Ok(content)
    }
}

/// Complete a tool input with request fields the model left out.
fn tool_input(name: &str, input: Value, request: &GenerationRequest, content: &str) -> Value {
    let mut object = match input {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let mut fill = |key: &str, value: &str| {
        if object.get(key).map_or(true, Value::is_null) && !value.is_empty() {
            object.insert(key.to_string(), Value::String(value.to_string()));
        }
    };

    match name {
        HASHTAGS_TOOL => {
            fill("topic", &request.topic);
            fill("tone", request.tone.as_str());
            fill("platform", request.platform.as_str());
            fill("length", request.length.as_str());
            fill("content", content.trim());
        }
        POSTING_TIME_TOOL => fill("platform", request.platform.as_str()),
        _ => {}
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{message_end, tool_call, Reply, ScriptedModel};
    use postcraft_core::{Length, Tone};
    use serde_json::json;

    fn request() -> GenerationRequest {
        GenerationRequest::new("Remote work tips", Tone::Casual, Length::Short, Platform::Twitter)
            .unwrap()
    }

    fn pipeline(model: ScriptedModel) -> (GenerationPipeline, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        (GenerationPipeline::new(model.clone()), model)
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn state_machine_transitions() {
        use GenerationState::*;
        assert!(Idle.can_transition_to(Prompting));
        assert!(Streaming.can_transition_to(ToolDispatch));
        assert!(ToolDispatch.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Finalizing));
        assert!(Prompting.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Streaming));
        assert!(!Complete.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Prompting));
    }

    #[tokio::test]
    async fn sequential_result_shape() {
        let (pipeline, model) = pipeline(ScriptedModel::repeating(Reply::text(
            &["Work from anywhere, ", "but keep a routine."],
            57,
        )));

        let result = pipeline.generate_sequential(&request()).await.unwrap();

        assert_eq!(result.content, "Work from anywhere, but keep a routine.");
        assert!(!result.hashtags.is_empty());
        assert!(result.hashtags.len() <= 3);
        let time = result.best_time_to_post.unwrap();
        assert!(time.hour <= 23);
        assert_eq!(result.total_tokens_used, 57);
        assert_eq!(result.metadata.topic, "Remote work tips");
        assert!(model.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn plain_generation_runs_no_tools() {
        let (pipeline, _) = pipeline(ScriptedModel::repeating(Reply::text(&["Hello"], 3)));

        let result = pipeline.generate_plain(&request()).await.unwrap();

        assert_eq!(result.content, "Hello");
        assert!(result.hashtags.is_empty());
        assert!(result.best_time_to_post.is_none());
    }

    #[tokio::test]
    async fn interleaved_tool_results_follow_their_calls() {
        let [start, complete] = tool_call("call_1", HASHTAGS_TOOL, json!({}));
        let events = vec![
            Ok(ModelEvent::ContentDelta("Remote work ".into())),
            Ok(start),
            Ok(complete),
            Ok(ModelEvent::ContentDelta("works.".into())),
            Ok(message_end(12)),
        ];
        let (pipeline, model) = pipeline(ScriptedModel::new().then(Reply::Events(events)));
        let (mut sink, rx) = EventSink::channel(64);

        let result = pipeline.run_interleaved(&request(), &mut sink).await.unwrap();
        drop(sink);
        let emitted = drain(rx).await;

        let kinds: Vec<&str> = emitted
            .iter()
            .map(|e| match e {
                StreamEvent::Content { .. } => "content",
                StreamEvent::ToolCall { .. } => "tool_call",
                StreamEvent::ToolResult { .. } => "tool_result",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["content", "tool_call", "tool_result", "content", "tool_call", "tool_result"]
        );

        // The model's empty input is completed from the request.
        let StreamEvent::ToolCall { tool } = &emitted[1] else {
            panic!("expected tool_call");
        };
        assert_eq!(tool.input["topic"], "Remote work tips");
        assert_eq!(tool.input["platform"], "twitter");
        assert_eq!(tool.input["content"], "Remote work");

        // Posting time was not requested by the model and ran afterwards.
        let StreamEvent::ToolCall { tool } = &emitted[4] else {
            panic!("expected tool_call");
        };
        assert_eq!(tool.name, POSTING_TIME_TOOL);

        assert_eq!(result.content, "Remote work works.");
        assert!(result.hashtags.len() <= 3);
        assert!(result.best_time_to_post.is_some());
        assert_eq!(result.total_tokens_used, 12);
        assert_eq!(model.requests()[0].tools.len(), 2);
    }

    #[tokio::test]
    async fn tool_only_reply_gets_a_content_follow_up() {
        let [h_start, h_complete] = tool_call("call_1", HASHTAGS_TOOL, json!({}));
        let [t_start, t_complete] = tool_call("call_2", POSTING_TIME_TOOL, json!({}));
        let tools_only = vec![
            Ok(h_start),
            Ok(h_complete),
            Ok(t_start),
            Ok(t_complete),
            Ok(message_end(30)),
        ];
        let (pipeline, model) = pipeline(
            ScriptedModel::new()
                .then(Reply::Events(tools_only))
                .then(Reply::text(&["Async teams ", "write things down."], 12)),
        );
        let (mut sink, rx) = EventSink::channel(64);

        let result = pipeline.run_interleaved(&request(), &mut sink).await.unwrap();
        drop(sink);
        let emitted = drain(rx).await;

        assert_eq!(result.content, "Async teams write things down.");
        assert_eq!(result.total_tokens_used, 42);
        assert!(result.best_time_to_post.is_some());
        assert_eq!(model.calls(), 2);
        assert!(model.requests()[1].tools.is_empty());

        // Tool events are not replayed; the text arrives after them.
        assert_eq!(
            emitted
                .iter()
                .filter(|e| matches!(e, StreamEvent::ToolResult { .. }))
                .count(),
            2
        );
        assert!(matches!(emitted.last(), Some(StreamEvent::Content { .. })));
    }

    #[tokio::test]
    async fn unknown_tool_does_not_abort() {
        let [start, complete] = tool_call("call_x", "summon_dragon", json!({}));
        let events = vec![
            Ok(start),
            Ok(complete),
            Ok(ModelEvent::ContentDelta("Still here.".into())),
            Ok(message_end(5)),
        ];
        let (pipeline, _) = pipeline(ScriptedModel::new().then(Reply::Events(events)));
        let (mut sink, rx) = EventSink::channel(64);

        let result = pipeline.run_interleaved(&request(), &mut sink).await.unwrap();
        drop(sink);
        let emitted = drain(rx).await;

        let StreamEvent::ToolResult { tool } = &emitted[1] else {
            panic!("expected tool_result");
        };
        assert_eq!(tool.error.as_deref(), Some("unknown tool: summon_dragon"));
        assert_eq!(result.content, "Still here.");
    }

    #[tokio::test]
    async fn mid_stream_error_keeps_emitted_content() {
        let events = vec![
            Ok(ModelEvent::ContentDelta("Partial".into())),
            Err(ModelError::Network("connection reset".into())),
        ];
        let (pipeline, model) = pipeline(ScriptedModel::new().then(Reply::Events(events)));
        let (mut sink, rx) = EventSink::channel(64);

        let result = pipeline.run_interleaved(&request(), &mut sink).await;
        drop(sink);
        let emitted = drain(rx).await;

        assert_eq!(
            result,
            Err(GenerationError::Model(ModelError::Network(
                "connection reset".into()
            )))
        );
        assert_eq!(
            emitted,
            vec![StreamEvent::Content {
                delta: "Partial".into()
            }]
        );
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_are_retried() {
        let model = ScriptedModel::new()
            .then(Reply::Reject(ModelError::RateLimited { retry_after: None }))
            .then(Reply::text(&["Second time lucky"], 9));
        let (pipeline, model) = pipeline(model);

        let result = pipeline.generate_plain(&request()).await.unwrap();

        assert_eq!(result.content, "Second time lucky");
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn authentication_failures_are_not_retried() {
        let model = ScriptedModel::repeating(Reply::Reject(ModelError::Authentication(
            "bad key".into(),
        )));
        let (pipeline, model) = pipeline(model);

        let result = pipeline.generate_sequential(&request()).await;

        assert!(matches!(
            result,
            Err(GenerationError::Model(ModelError::Authentication(_)))
        ));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_model_times_out() {
        let (pipeline, _) = pipeline(ScriptedModel::repeating(Reply::Hang));
        let pipeline = pipeline.with_timeout(Duration::from_secs(30));

        let result = pipeline.generate_sequential(&request()).await;

        assert_eq!(
            result,
            Err(GenerationError::Timeout(Duration::from_secs(30)))
        );
    }

    #[tokio::test]
    async fn empty_content_fails() {
        let (pipeline, _) = pipeline(ScriptedModel::repeating(Reply::text(&["  ", "\n"], 2)));

        let result = pipeline.generate(&request(), GenerationMode::Sequential).await;

        assert_eq!(result, Err(GenerationError::EmptyContent));
    }

    #[tokio::test]
    async fn disconnected_consumer_does_not_stop_the_run() {
        let (pipeline, _) = pipeline(ScriptedModel::repeating(Reply::text(&["Done"], 1)));
        let (mut sink, rx) = EventSink::channel(1);
        drop(rx);

        let result = pipeline.run_interleaved(&request(), &mut sink).await.unwrap();

        assert_eq!(result.content, "Done");
        assert!(!sink.is_connected());
    }

    #[test]
    fn stream_events_serialize_with_type_tag() {
        let event = StreamEvent::ToolResult {
            tool: ToolResultInfo {
                name: HASHTAGS_TOOL.into(),
                result: json!({ "hashtags": ["#AI"] }),
                error: None,
            },
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "tool_result",
                "tool": { "name": "generate_hashtags", "result": { "hashtags": ["#AI"] } }
            })
        );
        assert_eq!(
            serde_json::to_value(StreamEvent::Content { delta: "Hi".into() }).unwrap(),
            json!({ "type": "content", "delta": "Hi" })
        );
        assert!(StreamEvent::Error {
            message: "x".into(),
            remaining_balance: Some(3)
        }
        .is_terminal());
    }
}
