//! Common test utilities for postcraft integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

use postcraft_generation::testing::{Reply, ScriptedModel};
use postcraft_generation::{GenerationPipeline, RetryPolicy};
use postcraft_service::auth::JwtClaims;
use postcraft_service::crypto::sign_stripe_payload;
use postcraft_service::{create_router, AppState, ServiceConfig};
use postcraft_store::MemoryStore;

/// Secret used to mint user tokens.
pub const JWT_SECRET: &str = "test-jwt-secret";

/// Secret used to sign webhook deliveries.
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The backing store, for assertions that bypass the API.
    pub store: Arc<MemoryStore>,
    /// The scripted model behind the pipeline.
    pub model: Arc<ScriptedModel>,
    /// A test user for authenticated requests.
    pub test_user_id: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh store and a model that always
    /// answers with the same post.
    pub fn new() -> Self {
        Self::with_model(default_model())
    }

    /// Create a harness around a specific scripted model.
    pub fn with_model(model: ScriptedModel) -> Self {
        Self::build(model, |_| {})
    }

    /// Create a harness with the default model and adjusted configuration.
    pub fn with_config(configure: impl FnOnce(&mut ServiceConfig)) -> Self {
        Self::build(default_model(), configure)
    }

    fn build(model: ScriptedModel, configure: impl FnOnce(&mut ServiceConfig)) -> Self {
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(model);

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_jwt_secret: Some(JWT_SECRET.into()),
            stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
            ..ServiceConfig::default()
        };
        configure(&mut config);

        let pipeline = GenerationPipeline::new(model.clone())
            .with_retry(RetryPolicy::none())
            .with_timeout(config.llm_timeout());
        let state = AppState::with_pipeline(store.clone(), pipeline, config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            model,
            test_user_id: "user_integration".into(),
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        auth_header_for(&self.test_user_id)
    }

    /// Get a different user's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        auth_header_for("user_other")
    }

    /// Open the test user's account.
    pub async fn open_account(&self) {
        self.server
            .post("/v1/accounts")
            .add_header("authorization", self.user_auth_header())
            .await;
    }

    /// Deliver a correctly signed Stripe webhook.
    pub async fn deliver_webhook(&self, event: &serde_json::Value) -> axum_test::TestResponse {
        let payload = event.to_string();
        let signature =
            sign_stripe_payload(&payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp());
        self.server
            .post("/webhooks/stripe")
            .add_header("stripe-signature", signature)
            .text(payload)
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn default_model() -> ScriptedModel {
    ScriptedModel::repeating(Reply::text(
        &["Remote work is here to stay. ", "Build teams that trust."],
        42,
    ))
}

/// Bearer header carrying a valid token for `account_id`.
pub fn auth_header_for(account_id: &str) -> String {
    let claims = JwtClaims {
        sub: account_id.into(),
        aud: Some(serde_json::json!("postcraft")),
        exp: chrono::Utc::now().timestamp() + 3600,
        iat: Some(chrono::Utc::now().timestamp()),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token");
    format!("Bearer {token}")
}
