pub mod commit;
pub mod config;
pub mod github;
pub mod merge;
pub mod pipeline;
pub mod readiness;
pub mod reconciliation;
pub mod recording;
pub mod webhook;

use std::sync::Arc;

use axum::{response::Json, routing::get, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use github::{GitHubApi, GitHubClient, InMemoryGitHub, RepoId};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use recording::RecordingLogger;

use webhook::webhook_router;

pub struct AppState {
    pub github: Arc<dyn GitHubApi>,
    pub webhook_secret: String,
    pub pipeline: Pipeline,
    pub recording_logger: Option<RecordingLogger>,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "fixup",
        "version": fixup_core::get_bot_version(),
    }))
}

async fn help_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": "fixup",
        "version": fixup_core::get_bot_version(),
        "description": "Applies review suggestions to pull requests and merges them",
        "endpoints": [
            {
                "path": "/health",
                "method": "GET",
                "description": "Health check endpoint",
                "authentication": "None"
            },
            {
                "path": "/webhook",
                "method": "POST",
                "description": "GitHub webhook receiver for issue_comment and pull_request events",
                "authentication": "GitHub webhook signature (X-Hub-Signature-256)"
            },
            {
                "path": "/help",
                "method": "GET",
                "description": "API documentation and service information",
                "authentication": "None"
            }
        ],
        "policy_file": fixup_core::POLICY_PATH,
        "configuration": {
            "required_env_vars": [
                "GITHUB_TOKEN",
                "GITHUB_WEBHOOK_SECRET"
            ],
            "optional_env_vars": [
                "GITHUB_API_URL (default: https://api.github.com)",
                "WEBHOOK_CALLBACK_URL (required for reconciliation)",
                "RECONCILE_ACCOUNT (enables the reconciliation loop)",
                "RECONCILE_INTERVAL_SECS (default: 3600)",
                "PORT (default: 3000)",
                "COMMIT_AUTHOR_NAME (default: fixup[bot])",
                "COMMIT_AUTHOR_EMAIL (default: fixup-bot@users.noreply.github.com)",
                "READINESS_MAX_ATTEMPTS (default: 10)",
                "READINESS_INTERVAL_SECS (default: 5)",
                "RECORDING_ENABLED (default: false)",
                "RECORDING_LOG_PATH (default: recordings.jsonl)"
            ]
        }
    }))
}

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/help", get(help_handler))
        .merge(webhook_router(state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
