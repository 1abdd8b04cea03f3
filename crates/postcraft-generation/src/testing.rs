//! Scripted language model for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::error::ModelError;
use crate::model::{LanguageModel, ModelEvent, ModelRequest, ModelStream, Usage};

/// What the scripted model does for one call.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Stream these items, then end.
    Events(Vec<Result<ModelEvent, ModelError>>),
    /// Fail before streaming.
    Reject(ModelError),
    /// Open a stream that never yields.
    Hang,
}

impl Reply {
    /// Content split into deltas, followed by a message end reporting `total_tokens`.
    #[must_use]
    pub fn text(chunks: &[&str], total_tokens: u64) -> Self {
        let mut events: Vec<_> = chunks
            .iter()
            .map(|c| Ok(ModelEvent::ContentDelta((*c).to_string())))
            .collect();
        events.push(Ok(message_end(total_tokens)));
        Self::Events(events)
    }
}

/// A `MessageEnd` event with the given total.
#[must_use]
pub fn message_end(total_tokens: u64) -> ModelEvent {
    ModelEvent::MessageEnd {
        usage: Usage {
            total_tokens,
            ..Usage::default()
        },
    }
}

/// A tool call as a start/complete pair.
#[must_use]
pub fn tool_call(id: &str, name: &str, input: Value) -> [ModelEvent; 2] {
    [
        ModelEvent::ToolCallStart {
            id: id.to_string(),
            name: name.to_string(),
            input,
        },
        ModelEvent::ToolCallComplete { id: id.to_string() },
    ]
}

/// A [`LanguageModel`] that replays queued replies.
///
/// Queued replies are used first, in order; afterwards every call gets the
/// fallback reply if one was set.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    queue: Mutex<VecDeque<Reply>>,
    fallback: Option<Reply>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    /// A model with no replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A model answering every call with `reply`.
    #[must_use]
    pub fn repeating(reply: Reply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::default()
        }
    }

    /// Queue a reply.
    #[must_use]
    pub fn then(self, reply: Reply) -> Self {
        self.push(reply);
        self
    }

    /// Queue a reply on a shared model.
    pub fn push(&self, reply: Reply) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(reply);
        }
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of calls received so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let next = self
            .queue
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .or_else(|| self.fallback.clone());

        match next {
            Some(Reply::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(Reply::Reject(e)) => Err(e),
            Some(Reply::Hang) => Ok(stream::pending().boxed()),
            None => Err(ModelError::InvalidResponse("script exhausted".into())),
        }
    }
}
