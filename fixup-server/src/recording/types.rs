use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One line of the recording log.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordedEvent {
    /// RFC 3339.
    pub timestamp: String,
    /// Groups the webhook, the GitHub calls and the outcome of one run.
    pub correlation_id: String,
    pub event_type: EventType,
    pub direction: Direction,
    /// e.g. "issue_comment", "GET /repos/octo/app/pulls/7", "pipeline".
    pub operation: String,
    pub data: serde_json::Value,
    pub metadata: HashMap<String, String>,
}

impl RecordedEvent {
    pub fn new(
        correlation_id: &str,
        event_type: EventType,
        direction: Direction,
        operation: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.to_string(),
            event_type,
            direction,
            operation: operation.into(),
            data,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum EventType {
    WebhookReceived,
    GitHubApiCall,
    PipelineOutcome,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
    Internal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

tokio::task_local! {
    static CURRENT_CORRELATION_ID: CorrelationId;
}

/// Run `future` with `id` visible to [`current_correlation_id`].
pub async fn with_correlation_id<F: Future>(id: CorrelationId, future: F) -> F::Output {
    CURRENT_CORRELATION_ID.scope(id, future).await
}

pub fn current_correlation_id() -> Option<String> {
    CURRENT_CORRELATION_ID.try_with(|id| id.0.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_correlation_id_is_scoped() {
        assert_eq!(current_correlation_id(), None);

        let seen = with_correlation_id(CorrelationId("run-1".to_string()), async {
            current_correlation_id()
        })
        .await;

        assert_eq!(seen.as_deref(), Some("run-1"));
        assert_eq!(current_correlation_id(), None);
    }

    #[test]
    fn test_event_serializes_with_metadata() {
        let event = RecordedEvent::new(
            "abc",
            EventType::PipelineOutcome,
            Direction::Internal,
            "pipeline",
            serde_json::json!({ "outcome": "merged" }),
        )
        .with_metadata("pr_number", 7);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "PipelineOutcome");
        assert_eq!(value["metadata"]["pr_number"], "7");
        assert_eq!(value["data"]["outcome"], "merged");
    }
}
