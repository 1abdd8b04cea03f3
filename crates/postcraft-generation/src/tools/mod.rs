//! Tool registry.
//!
//! Tools are deterministic side computations the generation pipeline invokes
//! while (or after) the model writes the post. Dispatch never fails: unknown
//! names and tool errors are reported inside the returned [`ToolInvocation`].

pub mod hashtags;
pub mod posting_time;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::ToolError;

pub use hashtags::{generate_hashtags, HashtagInput, HashtagOutput, HashtagTool};
pub use posting_time::{compute_best_posting_time, PostingTimeInput, PostingTimeTool};

/// Registered name of the hashtag tool.
pub const HASHTAGS_TOOL: &str = "generate_hashtags";

/// Registered name of the posting-time tool.
pub const POSTING_TIME_TOOL: &str = "compute_best_posting_time";

/// Declaration of a tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON schema of the input object.
    pub input_schema: Value,
}

/// A tool callable by name.
pub trait Tool: Send + Sync {
    /// Registered name.
    fn name(&self) -> &'static str;

    /// Declaration advertised to the model.
    fn spec(&self) -> ToolSpec;

    /// Run the tool.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::InvalidInput` if the input cannot be interpreted.
    fn call(&self, input: &Value) -> Result<Value, ToolError>;
}

/// Record of one tool dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    /// Tool name as requested.
    pub name: String,
    /// Input as passed to the tool.
    pub input: Value,
    /// Tool output (`null` when the tool failed).
    pub output: Value,
    /// Error message if the dispatch failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolInvocation {
    /// Whether the tool produced an output.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Name-based tool dispatcher.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.name()))
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the hashtag and posting-time tools.
    #[must_use]
    pub fn with_default_tools() -> Self {
        Self::new()
            .with_tool(Arc::new(HashtagTool))
            .with_tool(Arc::new(PostingTimeTool))
    }

    /// Register a tool, replacing any tool with the same name.
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
        self
    }

    /// Declarations of every registered tool, in registration order.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    /// Whether a tool is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// Route `input` to the tool called `name`.
    pub fn dispatch(&self, name: &str, input: Value) -> ToolInvocation {
        let result = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
            .and_then(|tool| tool.call(&input));

        match result {
            Ok(output) => ToolInvocation {
                name: name.to_string(),
                input,
                output,
                error: None,
            },
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool dispatch failed");
                ToolInvocation {
                    name: name.to_string(),
                    input,
                    output: Value::Null,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Read an optional string field from a tool input object.
pub(crate) fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
