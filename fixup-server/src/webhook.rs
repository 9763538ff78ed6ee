use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use fixup_core::verify_signature;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::github::RepoId;
use crate::pipeline::load_policy;
use crate::recording::{
    with_correlation_id, CorrelationId, Direction, EventType, RecordedEvent, Sanitizer,
};
use crate::AppState;

pub const HEADER_EVENT: &str = "x-github-event";
pub const HEADER_DELIVERY: &str = "x-github-delivery";
pub const HEADER_SIGNATURE: &str = "x-hub-signature-256";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("missing signature")]
    MissingSignature,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("failed to read request body")]
    UnreadableBody,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            WebhookError::MissingSignature | WebhookError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            WebhookError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            WebhookError::UnreadableBody => StatusCode::BAD_REQUEST,
        };

        (
            status,
            Json(WebhookResponse {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

fn respond(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<WebhookResponse>) {
    (
        status,
        Json(WebhookResponse {
            message: message.into(),
        }),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    IssueComment,
    PullRequest,
}

/// A delivery that may warrant a remediation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub kind: EventKind,
    pub action: String,
    pub repository: RepoId,
    pub number: u64,
}

/// Decide whether a delivery is a candidate for processing.
///
/// Comments count only when they are on a pull request. Everything not
/// recognised, `ping` included, is `None`.
pub fn classify_event(kind: &str, payload: &serde_json::Value) -> Option<WebhookEvent> {
    let action = payload.get("action")?.as_str()?;

    let (kind, number) = match (kind, action) {
        ("issue_comment", "created") => {
            let issue = payload.get("issue")?;
            if issue.get("pull_request").map_or(true, |pr| pr.is_null()) {
                return None;
            }
            (EventKind::IssueComment, issue.get("number")?.as_u64()?)
        }
        ("pull_request", "opened" | "synchronize") => (
            EventKind::PullRequest,
            payload.get("pull_request")?.get("number")?.as_u64()?,
        ),
        _ => return None,
    };

    let repository = payload.get("repository")?;
    let owner = repository.get("owner")?.get("login")?.as_str()?;
    let name = repository.get("name")?.as_str()?;

    Some(WebhookEvent {
        kind,
        action: action.to_string(),
        repository: RepoId::new(owner, name),
        number,
    })
}

fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(WebhookError::MissingHeader(name))
}

fn headers_to_hashmap(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

/// Rejects deliveries without the GitHub headers or with a bad signature,
/// then tags the request with a fresh correlation ID.
async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, WebhookError> {
    let (parts, body) = request.into_parts();

    get_header(&parts.headers, HEADER_EVENT)?;
    get_header(&parts.headers, HEADER_DELIVERY)?;
    let signature = get_header(&parts.headers, HEADER_SIGNATURE).map_err(|_| {
        error!("Missing {} header", HEADER_SIGNATURE);
        WebhookError::MissingSignature
    })?;

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| WebhookError::UnreadableBody)?;

    if !verify_signature(&state.webhook_secret, &bytes, &signature) {
        error!("Invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    let correlation_id = CorrelationId::generate();

    if let Some(ref logger) = state.recording_logger {
        let event_kind = parts
            .headers
            .get(HEADER_EVENT)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let body = serde_json::from_slice::<serde_json::Value>(&bytes)
            .map(|value| Sanitizer::sanitize_json(&value))
            .unwrap_or(serde_json::Value::Null);

        logger.record(RecordedEvent::new(
            &correlation_id.0,
            EventType::WebhookReceived,
            Direction::Request,
            event_kind,
            serde_json::json!({
                "headers": Sanitizer::sanitize_headers(&headers_to_hashmap(&parts.headers)),
                "body": body,
            }),
        ));
    }

    let mut request = Request::from_parts(parts, axum::body::Body::from(bytes));
    request.extensions_mut().insert(correlation_id);

    Ok(next.run(request).await)
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), WebhookError> {
    let event_kind = get_header(&headers, HEADER_EVENT)?;
    let delivery_id = get_header(&headers, HEADER_DELIVERY)?;

    info!(
        "Received {} webhook (delivery {}, correlation {})",
        event_kind, delivery_id, correlation_id.0
    );

    let payload: serde_json::Value = serde_json::from_slice(&body)?;

    let Some(event) = classify_event(&event_kind, &payload) else {
        info!("Ignoring {} webhook (delivery {})", event_kind, delivery_id);
        return Ok(respond(StatusCode::OK, "ignored"));
    };

    let gate = with_correlation_id(correlation_id.clone(), check_gates(&state, &event)).await;
    let policy = match gate {
        Ok(policy) => policy,
        Err(reason) => {
            info!(
                "Not processing #{} in {}: {}",
                event.number, event.repository, reason
            );
            return Ok(respond(StatusCode::OK, reason));
        }
    };

    info!(
        "Dispatching remediation for #{} in {} ({:?} {})",
        event.number, event.repository, event.kind, event.action
    );

    let pipeline = state.pipeline.clone();
    tokio::spawn(with_correlation_id(correlation_id, async move {
        // Errors are logged and recorded by the pipeline itself.
        let _ = pipeline
            .run(&event.repository, event.number, &policy)
            .await;
    }));

    Ok(respond(StatusCode::ACCEPTED, "dispatched"))
}

/// The repository must opt in and the pull request must be open and ready
/// for review. `Err` carries the reason for skipping.
async fn check_gates(
    state: &AppState,
    event: &WebhookEvent,
) -> Result<fixup_core::RepositoryPolicy, String> {
    let github = state.github.as_ref();
    let repo = &event.repository;

    let policy = match load_policy(github, repo).await {
        Ok(Some(policy)) => policy,
        Ok(None) => return Err("no policy".to_string()),
        Err(e) => {
            warn!("Treating {} as disabled: {:#}", repo, e);
            return Err("policy unavailable".to_string());
        }
    };
    if !policy.automatic_processing {
        return Err("automatic processing disabled".to_string());
    }

    let pr = match github.get_pull_request(repo, event.number).await {
        Ok(pr) => pr,
        Err(e) => {
            warn!("Failed to fetch #{} in {}: {}", event.number, repo, e);
            return Err("pull request unavailable".to_string());
        }
    };
    if !pr.open {
        return Err("pull request not open".to_string());
    }
    if pr.draft {
        return Err("pull request is a draft".to_string());
    }

    Ok(policy)
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Layered on the method route so non-POST requests still get a plain 405.
    Router::new().route(
        "/webhook",
        post(github_webhook_handler).route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repository() -> serde_json::Value {
        json!({ "name": "app", "owner": { "login": "octo" } })
    }

    fn comment_payload(action: &str, on_pull_request: bool) -> serde_json::Value {
        let mut issue = json!({ "number": 17 });
        if on_pull_request {
            issue["pull_request"] = json!({ "url": "https://api.github.com/repos/octo/app/pulls/17" });
        }
        json!({
            "action": action,
            "issue": issue,
            "comment": { "id": 1, "body": "hi", "user": { "login": "someone" } },
            "repository": repository(),
        })
    }

    fn pull_request_payload(action: &str) -> serde_json::Value {
        json!({
            "action": action,
            "pull_request": { "number": 23 },
            "repository": repository(),
        })
    }

    #[test]
    fn test_comment_on_pull_request_is_candidate() {
        let event = classify_event("issue_comment", &comment_payload("created", true)).unwrap();
        assert_eq!(
            event,
            WebhookEvent {
                kind: EventKind::IssueComment,
                action: "created".to_string(),
                repository: RepoId::new("octo", "app"),
                number: 17,
            }
        );
    }

    #[test]
    fn test_comment_on_plain_issue_is_ignored() {
        assert_eq!(classify_event("issue_comment", &comment_payload("created", false)), None);

        let mut null_link = comment_payload("created", true);
        null_link["issue"]["pull_request"] = serde_json::Value::Null;
        assert_eq!(classify_event("issue_comment", &null_link), None);
    }

    #[test]
    fn test_edited_comment_is_ignored() {
        assert_eq!(classify_event("issue_comment", &comment_payload("edited", true)), None);
    }

    #[test]
    fn test_pull_request_actions() {
        for action in ["opened", "synchronize"] {
            let event = classify_event("pull_request", &pull_request_payload(action)).unwrap();
            assert_eq!(event.kind, EventKind::PullRequest);
            assert_eq!(event.number, 23);
        }
        for action in ["closed", "reopened", "edited", "labeled"] {
            assert_eq!(classify_event("pull_request", &pull_request_payload(action)), None);
        }
    }

    #[test]
    fn test_other_events_are_ignored() {
        assert_eq!(classify_event("ping", &json!({ "zen": "Keep it logically awesome." })), None);
        assert_eq!(classify_event("push", &pull_request_payload("opened")), None);
    }

    #[test]
    fn test_missing_repository_is_ignored() {
        let payload = json!({ "action": "opened", "pull_request": { "number": 1 } });
        assert_eq!(classify_event("pull_request", &payload), None);
    }

    #[test]
    fn test_get_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_EVENT, "pull_request".parse().unwrap());

        assert_eq!(get_header(&headers, HEADER_EVENT).unwrap(), "pull_request");
        assert!(matches!(
            get_header(&headers, HEADER_DELIVERY),
            Err(WebhookError::MissingHeader(HEADER_DELIVERY))
        ));
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(
            WebhookError::MissingHeader(HEADER_EVENT).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebhookError::MissingSignature.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WebhookError::InvalidSignature.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            WebhookError::InvalidJson(json_error).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
