//! Generation orchestration: check the balance, generate, persist, bill.
//!
//! Billing happens after the artifact is stored. When the debit fails the artifact
//! is deleted again; if that delete fails too the inconsistency is logged for
//! reconciliation. Nothing here holds a storage lock across the model call.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};

use postcraft_core::{
    AccountId, ArtifactId, GeneratedContent, GenerationArtifact, GenerationMode,
    GenerationRequest, Metadata, TransactionId,
};
use postcraft_generation::{EventSink, GenerationError, GenerationPipeline, StreamEvent};
use postcraft_store::ArtifactStore;

use crate::ledger::{LedgerError, LedgerService};

/// Events buffered between a running stream and its HTTP consumer.
pub const STREAM_BUFFER: usize = 64;

/// Streams allowed to run at once unless configured otherwise.
pub const DEFAULT_MAX_OPEN_STREAMS: usize = 20;

/// Why a generation did not produce a billed artifact.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestrationError {
    /// The account does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// The balance does not cover the generation.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Cost of the generation.
        required: i64,
    },

    /// The model failed, timed out or returned nothing.
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// The artifact could not be stored; nothing was charged.
    #[error("failed to store generated content: {0}")]
    Persistence(String),

    /// The debit failed after the artifact was stored; the artifact was rolled back.
    #[error("billing failed: {0}")]
    Billing(LedgerError),

    /// The ledger could not be read.
    #[error("storage error: {0}")]
    Storage(String),

    /// Every stream slot is taken.
    #[error("too many open generation streams")]
    StreamsExhausted,
}

impl From<LedgerError> for OrchestrationError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(id) => Self::AccountNotFound(id),
            LedgerError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            other => Self::Storage(other.to_string()),
        }
    }
}

/// A failed generation together with the balance the caller should show.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct GenerationFailure {
    /// What went wrong.
    pub error: OrchestrationError,
    /// Balance after the failure, when it could be read.
    pub remaining_balance: Option<i64>,
}

/// A billed generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReceipt {
    /// The stored artifact.
    pub artifact: GenerationArtifact,
    /// Balance after the debit.
    pub remaining_balance: i64,
    /// The debit transaction.
    pub transaction_id: TransactionId,
}

/// Coordinates the ledger, the pipeline and artifact storage.
#[derive(Clone)]
pub struct Orchestrator {
    ledger: LedgerService,
    artifacts: Arc<dyn ArtifactStore>,
    pipeline: Arc<GenerationPipeline>,
    stream_slots: Arc<Semaphore>,
}

impl Orchestrator {
    /// Wire the collaborators together.
    #[must_use]
    pub fn new(
        ledger: LedgerService,
        artifacts: Arc<dyn ArtifactStore>,
        pipeline: Arc<GenerationPipeline>,
    ) -> Self {
        Self {
            ledger,
            artifacts,
            pipeline,
            stream_slots: Arc::new(Semaphore::new(DEFAULT_MAX_OPEN_STREAMS)),
        }
    }

    /// Cap the number of streams running at once.
    #[must_use]
    pub fn with_max_open_streams(mut self, max: usize) -> Self {
        self.stream_slots = Arc::new(Semaphore::new(max));
        self
    }

    /// Generate, store and bill one post.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationFailure`]; no credits are consumed unless an
    /// artifact was stored and kept.
    pub async fn generate_content(
        &self,
        account_id: &AccountId,
        request: &GenerationRequest,
        mode: GenerationMode,
    ) -> Result<GenerationReceipt, GenerationFailure> {
        let balance = self.precheck(account_id, mode)?;

        let content = match self.pipeline.generate(request, mode).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(
                    account_id = %account_id,
                    mode = mode.as_str(),
                    error = %e,
                    "Generation failed, nothing charged"
                );
                return Err(GenerationFailure {
                    error: e.into(),
                    remaining_balance: self.ledger.balance(account_id).ok().or(Some(balance)),
                });
            }
        };

        self.bill(account_id, content, mode)
    }

    /// Start an interleaved streaming generation.
    ///
    /// The balance is checked before anything is streamed; the run itself happens on
    /// a spawned task feeding the returned receiver.
    ///
    /// # Errors
    ///
    /// Returns a [`GenerationFailure`] if the account is missing or cannot afford
    /// the generation.
    pub fn stream_content(
        &self,
        account_id: AccountId,
        request: GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, GenerationFailure> {
        let balance = self.precheck(&account_id, GenerationMode::Interleaved)?;
        let slot = self.stream_slots.clone().try_acquire_owned().map_err(|_| {
            tracing::warn!(account_id = %account_id, "Stream refused: no free stream slot");
            GenerationFailure {
                error: OrchestrationError::StreamsExhausted,
                remaining_balance: Some(balance),
            }
        })?;

        let (sink, rx) = EventSink::channel(STREAM_BUFFER);
        let this = self.clone();
        tokio::spawn(async move {
            // Held until the run reaches its terminal event.
            let _slot = slot;
            this.run_stream(&account_id, &request, sink).await;
        });
        Ok(rx)
    }

    /// Drive one streaming generation to its terminal event.
    ///
    /// Exactly one `end` or `error` event is emitted. When the consumer has gone
    /// away before the end, the content is neither stored nor billed.
    pub async fn run_stream(
        &self,
        account_id: &AccountId,
        request: &GenerationRequest,
        mut sink: EventSink,
    ) {
        let mode = GenerationMode::Interleaved;
        sink.emit(StreamEvent::Start {
            topic: request.topic.clone(),
            platform: request.platform,
            cost: mode.cost(),
        })
        .await;

        let content = match self.pipeline.run_interleaved(request, &mut sink).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(account_id = %account_id, error = %e, "Streaming generation failed");
                sink.emit(StreamEvent::Error {
                    message: e.to_string(),
                    remaining_balance: self.ledger.balance(account_id).ok(),
                })
                .await;
                return;
            }
        };

        if !sink.is_connected() {
            tracing::info!(
                account_id = %account_id,
                "Client disconnected before the end, skipping persistence and debit"
            );
            return;
        }

        let terminal = match self.bill(account_id, content, mode) {
            Ok(receipt) => StreamEvent::End {
                result: Box::new(receipt.artifact.content),
                artifact_id: Some(receipt.artifact.id),
                remaining_balance: Some(receipt.remaining_balance),
            },
            Err(failure) => StreamEvent::Error {
                message: failure.error.to_string(),
                remaining_balance: failure.remaining_balance,
            },
        };
        sink.emit(terminal).await;
    }

    /// Fetch an artifact owned by `account_id`.
    ///
    /// Artifacts of other accounts are reported as absent.
    ///
    /// # Errors
    ///
    /// Returns `OrchestrationError::Storage` if the store fails.
    pub fn artifact(
        &self,
        account_id: &AccountId,
        artifact_id: &ArtifactId,
    ) -> Result<Option<GenerationArtifact>, OrchestrationError> {
        let artifact = self
            .artifacts
            .get_artifact(artifact_id)
            .map_err(|e| OrchestrationError::Storage(e.to_string()))?;
        Ok(artifact.filter(|a| &a.account_id == account_id))
    }

    fn precheck(&self, account_id: &AccountId, mode: GenerationMode) -> Result<i64, GenerationFailure> {
        let required = mode.cost();
        let balance = self.ledger.balance(account_id).map_err(|e| GenerationFailure {
            error: e.into(),
            remaining_balance: None,
        })?;
        if balance < required {
            tracing::info!(
                account_id = %account_id,
                balance,
                required,
                "Generation refused: insufficient balance"
            );
            return Err(GenerationFailure {
                error: OrchestrationError::InsufficientBalance { balance, required },
                remaining_balance: Some(balance),
            });
        }
        Ok(balance)
    }

    fn bill(
        &self,
        account_id: &AccountId,
        content: GeneratedContent,
        mode: GenerationMode,
    ) -> Result<GenerationReceipt, GenerationFailure> {
        let artifact = GenerationArtifact::new(account_id.clone(), content, mode);

        if let Err(e) = self.artifacts.put_artifact(&artifact) {
            tracing::warn!(account_id = %account_id, error = %e, "Failed to store artifact");
            return Err(GenerationFailure {
                error: OrchestrationError::Persistence(e.to_string()),
                remaining_balance: self.ledger.balance(account_id).ok(),
            });
        }

        let mut metadata = Metadata::new();
        metadata.insert("artifactId".into(), artifact.id.to_string().into());
        metadata.insert("mode".into(), mode.as_str().into());
        let description = format!(
            "Generated {} post",
            artifact.content.metadata.platform.display_name()
        );

        match self.ledger.debit_with_metadata(
            account_id,
            artifact.credits_charged,
            &description,
            metadata,
        ) {
            Ok(posting) => {
                tracing::info!(
                    account_id = %account_id,
                    artifact_id = %artifact.id,
                    mode = mode.as_str(),
                    credits = artifact.credits_charged,
                    remaining_balance = posting.new_balance,
                    tokens = artifact.content.total_tokens_used,
                    "Generation billed"
                );
                Ok(GenerationReceipt {
                    remaining_balance: posting.new_balance,
                    transaction_id: posting.transaction_id,
                    artifact,
                })
            }
            Err(e) => {
                self.roll_back(&artifact.id, account_id, &e);
                let remaining_balance = match &e {
                    LedgerError::InsufficientBalance { balance, .. } => Some(*balance),
                    _ => self.ledger.balance(account_id).ok(),
                };
                Err(GenerationFailure {
                    error: OrchestrationError::Billing(e),
                    remaining_balance,
                })
            }
        }
    }

    fn roll_back(&self, artifact_id: &ArtifactId, account_id: &AccountId, cause: &LedgerError) {
        match self.artifacts.delete_artifact(artifact_id) {
            Ok(_) => tracing::warn!(
                account_id = %account_id,
                artifact_id = %artifact_id,
                error = %cause,
                "Debit failed, artifact rolled back"
            ),
            Err(delete_error) => tracing::error!(
                account_id = %account_id,
                artifact_id = %artifact_id,
                error = %cause,
                delete_error = %delete_error,
                reconciliation_needed = true,
                "Debit failed and the artifact could not be deleted"
            ),
        }
    }
}
