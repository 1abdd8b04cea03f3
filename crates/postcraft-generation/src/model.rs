//! The language model seam.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::tools::ToolSpec;

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Completion tokens.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Total tokens.
    #[serde(default)]
    pub total_tokens: u64,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One event of a model response, in provider order.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// A piece of post text.
    ContentDelta(String),
    /// The model asked for a tool, with its complete input.
    ToolCallStart {
        /// Provider call ID.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input object.
        input: Value,
    },
    /// The model finished emitting the call with this ID.
    ToolCallComplete {
        /// Provider call ID.
        id: String,
    },
    /// The response is complete.
    MessageEnd {
        /// Reported usage (zeros when the provider sent none).
        usage: Usage,
    },
}

/// A request to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    /// The full instruction block.
    pub prompt: String,
    /// Tools the model may call (empty for content-only calls).
    pub tools: Vec<ToolSpec>,
    /// Output cap.
    pub max_tokens: Option<u32>,
}

impl ModelRequest {
    /// A content-only request.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tools: Vec::new(),
            max_tokens: None,
        }
    }

    /// Declare tools.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// Cap the output length.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Stream of model events.
pub type ModelStream = BoxStream<'static, Result<ModelEvent, ModelError>>;

/// A streaming text model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs.
    fn model_id(&self) -> &str;

    /// Open a response stream.
    ///
    /// Errors returned here happen before any event was produced and may be
    /// retried; errors inside the stream may not.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError>;
}
