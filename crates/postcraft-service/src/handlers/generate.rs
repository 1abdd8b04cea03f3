//! Content generation handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use postcraft_core::{GenerationArtifact, GenerationMode, GenerationRequest};
use postcraft_generation::StreamEvent;

use crate::auth::AuthUser;
use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

/// Generation request body.
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    /// What the post is about (3-200 characters).
    pub topic: String,
    /// Professional, Casual or Inspirational.
    pub tone: String,
    /// Short, Medium or Long.
    pub length: String,
    /// linkedin (default), twitter or facebook.
    #[serde(default)]
    pub platform: Option<String>,
    /// plain or sequential (default). Ignored by the streaming route.
    #[serde(default)]
    pub mode: Option<String>,
}

impl GenerateBody {
    fn request(&self) -> Result<GenerationRequest, ApiError> {
        Ok(GenerationRequest::parse(
            &self.topic,
            &self.tone,
            &self.length,
            self.platform.as_deref(),
        )?)
    }

    fn mode(&self) -> Result<GenerationMode, ApiError> {
        let mode = match self.mode.as_deref() {
            None => GenerationMode::Sequential,
            Some(raw) => raw.parse()?,
        };
        if mode == GenerationMode::Interleaved {
            return Err(ApiError::BadRequest(
                "interleaved generation is only available on /v1/generate/stream".into(),
            ));
        }
        Ok(mode)
    }
}

/// Generation response, on success and on failure.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// Whether an artifact was produced and billed.
    pub success: bool,
    /// The billed artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<GenerationArtifact>,
    /// Balance after the call, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_balance: Option<i64>,
    /// What went wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Generate, store and bill one post.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<GenerateBody>,
) -> Result<Response, ApiError> {
    let request = body.request()?;
    let mode = body.mode()?;

    tracing::info!(
        account_id = %auth.account_id,
        platform = %request.platform,
        mode = mode.as_str(),
        "Generation requested"
    );

    let response = match state
        .orchestrator
        .generate_content(&auth.account_id, &request, mode)
        .await
    {
        Ok(receipt) => Json(GenerateResponse {
            success: true,
            artifact: Some(receipt.artifact),
            remaining_balance: Some(receipt.remaining_balance),
            error: None,
        })
        .into_response(),
        Err(failure) => {
            let remaining_balance = failure.remaining_balance;
            let error = ApiError::from(failure);
            (
                error.status(),
                Json(GenerateResponse {
                    success: false,
                    artifact: None,
                    remaining_balance,
                    error: Some(error.body()),
                }),
            )
                .into_response()
        }
    };
    Ok(response)
}

/// Stream an interleaved generation as server-sent events.
///
/// Each event is framed as `data: <json>\n\n`. Balance and validation failures are
/// reported as ordinary JSON errors before the stream opens.
pub async fn generate_stream(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<GenerateBody>,
) -> Result<Response, ApiError> {
    let request = body.request()?;

    tracing::info!(
        account_id = %auth.account_id,
        platform = %request.platform,
        "Streaming generation requested"
    );

    let rx = state
        .orchestrator
        .stream_content(auth.account_id, request)?;

    Ok((
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(sse_events(rx)).keep_alive(KeepAlive::default()),
    )
        .into_response())
}

fn sse_events(
    rx: mpsc::Receiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let frame = Event::default().json_data(&event).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to encode stream event");
            Event::default().data(r#"{"type":"error","message":"encoding failed"}"#)
        });
        Some((Ok(frame), rx))
    })
}
