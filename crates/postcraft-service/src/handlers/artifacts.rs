//! Artifact lookup.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use postcraft_core::{ArtifactId, GenerationArtifact};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Fetch one of the caller's artifacts.
///
/// Artifacts owned by other accounts are reported as not found.
pub async fn get_artifact(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<GenerationArtifact>, ApiError> {
    let artifact_id: ArtifactId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid artifact id: {id}")))?;

    state
        .orchestrator
        .artifact(&auth.account_id, &artifact_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Artifact not found".into()))
}
