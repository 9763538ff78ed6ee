use std::collections::HashMap;

use axum::http;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use serde::Serialize;

use super::sanitizer::Sanitizer;
use super::types::{CorrelationId, CORRELATION_ID_HEADER};
use super::{Direction, EventType, RecordedEvent, RecordingLogger};

/// Bodies larger than this are recorded by size only.
const MAX_RECORDED_BODY: usize = 10_000;

/// Records every outbound GitHub request and its response.
pub struct RecordingMiddleware {
    logger: RecordingLogger,
}

impl RecordingMiddleware {
    pub fn new(logger: RecordingLogger) -> Self {
        Self { logger }
    }
}

#[derive(Debug, Serialize)]
struct RequestData {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ResponseData {
    status_code: u16,
    headers: HashMap<String, String>,
    body_size: u64,
}

#[async_trait::async_trait]
impl Middleware for RecordingMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| extensions.get::<CorrelationId>().map(|id| id.0.clone()))
            .unwrap_or_else(|| CorrelationId::generate().0);

        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            if let Ok(value) = correlation_id.parse() {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        let request_data = request_data(&req);
        let operation = format!("{} {}", request_data.method, extract_path(&request_data.url));
        self.logger.record(RecordedEvent::new(
            &correlation_id,
            EventType::GitHubApiCall,
            Direction::Request,
            operation.clone(),
            serde_json::to_value(&request_data).unwrap_or(serde_json::Value::Null),
        ));

        let response = next.run(req, extensions).await;

        let (data, status) = match &response {
            Ok(resp) => {
                let data = response_data(resp);
                let status = data.status_code.to_string();
                (
                    serde_json::to_value(&data).unwrap_or(serde_json::Value::Null),
                    status,
                )
            }
            Err(err) => (
                serde_json::json!({ "error": err.to_string() }),
                "error".to_string(),
            ),
        };
        self.logger.record(
            RecordedEvent::new(
                &correlation_id,
                EventType::GitHubApiCall,
                Direction::Response,
                operation,
                data,
            )
            .with_metadata("status", status),
        );

        response
    }
}

fn header_map(headers: &http::HeaderMap) -> HashMap<String, String> {
    let raw = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();
    Sanitizer::sanitize_headers(&raw)
}

fn request_data(request: &Request) -> RequestData {
    let body = match request.body().map(|b| b.as_bytes()) {
        None => serde_json::Value::Null,
        Some(None) => serde_json::Value::String("[STREAM_BODY]".to_string()),
        Some(Some(bytes)) if bytes.len() > MAX_RECORDED_BODY => {
            serde_json::Value::String(format!("[LARGE_BODY_{}b]", bytes.len()))
        }
        Some(Some(bytes)) => match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(json) => Sanitizer::sanitize_json(&json),
            Err(_) => serde_json::Value::String(format!("[NON_JSON_BODY_{}b]", bytes.len())),
        },
    };

    RequestData {
        method: request.method().to_string(),
        url: request.url().to_string(),
        headers: header_map(request.headers()),
        body,
    }
}

fn response_data(response: &Response) -> ResponseData {
    ResponseData {
        status_code: response.status().as_u16(),
        headers: header_map(response.headers()),
        body_size: response.content_length().unwrap_or(0),
    }
}

fn extract_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}
