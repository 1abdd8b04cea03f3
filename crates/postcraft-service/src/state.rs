//! Application state.

use std::sync::Arc;

use postcraft_generation::{GenerationPipeline, LanguageModel};
use postcraft_store::{ArtifactStore, Store};

use crate::config::ServiceConfig;
use crate::ledger::LedgerService;
use crate::orchestrator::Orchestrator;
use crate::reconciliation::ReconciliationService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The credit ledger.
    pub ledger: LedgerService,

    /// Payment event reconciliation.
    pub reconciliation: ReconciliationService,

    /// Generation orchestration.
    pub orchestrator: Orchestrator,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Build the services over one store and one model.
    #[must_use]
    pub fn new<S>(store: Arc<S>, model: Arc<dyn LanguageModel>, config: ServiceConfig) -> Self
    where
        S: Store + ArtifactStore + 'static,
    {
        let pipeline = GenerationPipeline::new(model)
            .with_retry(config.retry_policy())
            .with_timeout(config.llm_timeout());
        Self::with_pipeline(store, pipeline, config)
    }

    /// Build the services around an already configured pipeline.
    #[must_use]
    pub fn with_pipeline<S>(store: Arc<S>, pipeline: GenerationPipeline, config: ServiceConfig) -> Self
    where
        S: Store + ArtifactStore + 'static,
    {
        if config.stripe_webhook_secret.is_none() {
            tracing::warn!("Stripe webhook secret not configured - webhook deliveries will be refused");
        }
        if config.auth_jwt_secret.is_none() {
            tracing::warn!("AUTH_JWT_SECRET not configured - bearer tokens will be rejected");
        }

        let ledger = LedgerService::new(store.clone(), config.starting_grant);
        let reconciliation = ReconciliationService::new(store.clone());
        let orchestrator = Orchestrator::new(ledger.clone(), store, Arc::new(pipeline))
            .with_max_open_streams(config.max_open_streams);

        Self {
            ledger,
            reconciliation,
            orchestrator,
            config,
        }
    }
}
