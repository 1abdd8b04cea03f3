//! Tool registry and generation pipeline for postcraft.
//!
//! This crate turns a validated [`GenerationRequest`](postcraft_core::GenerationRequest)
//! into [`GeneratedContent`](postcraft_core::GeneratedContent):
//!
//! - [`tools`]: the hashtag and posting-time tools plus the name-based dispatcher
//! - [`prompt`]: deterministic prompt construction
//! - [`model`]: the [`LanguageModel`] seam and its event stream
//! - [`openai`]: a streaming client for OpenAI-compatible chat completions
//! - [`retry`]: the bounded retry policy used to establish model streams
//! - [`pipeline`]: plain, sequential and interleaved generation
//!
//! # Example
//!
//! ```
//! use postcraft_generation::tools::{ToolRegistry, HASHTAGS_TOOL};
//! use serde_json::json;
//!
//! let registry = ToolRegistry::with_default_tools();
//! let invocation = registry.dispatch(
//!     HASHTAGS_TOOL,
//!     json!({ "topic": "Remote work tips", "tone": "Casual", "platform": "twitter" }),
//! );
//! assert!(invocation.error.is_none());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod model;
pub mod openai;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod tools;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{GenerationError, ModelError, ToolError};
pub use model::{LanguageModel, ModelEvent, ModelRequest, ModelStream, Usage};
pub use openai::{OpenAiCompatible, OpenAiConfig, SseLimits};
pub use pipeline::{EventSink, GenerationPipeline, GenerationState, StreamEvent};
pub use retry::RetryPolicy;
pub use tools::{ToolInvocation, ToolRegistry, ToolSpec};
