//! Optional JSONL recording of webhooks, GitHub traffic and pipeline outcomes.

mod logger;
mod middleware;
mod sanitizer;
mod types;

pub use logger::RecordingLogger;
pub use middleware::RecordingMiddleware;
pub use sanitizer::{Sanitizer, SENSITIVE_HEADERS, SENSITIVE_KEYS};
pub use types::{
    current_correlation_id, with_correlation_id, CorrelationId, Direction, EventType,
    RecordedEvent, CORRELATION_ID_HEADER,
};
