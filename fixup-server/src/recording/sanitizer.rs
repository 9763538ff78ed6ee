use std::collections::HashMap;

use serde_json::Value;

/// Headers whose values never reach the recording log.
pub const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "x-hub-signature-256"];

/// JSON keys whose values never reach the recording log, at any depth.
pub const SENSITIVE_KEYS: &[&str] = &["secret", "token"];

const REDACTED: &str = "[REDACTED]";

pub struct Sanitizer;

impl Sanitizer {
    pub fn is_sensitive_header(name: &str) -> bool {
        SENSITIVE_HEADERS.contains(&name.to_ascii_lowercase().as_str())
    }

    pub fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                let value = if Self::is_sensitive_header(name) {
                    REDACTED.to_string()
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect()
    }

    pub fn sanitize_json(value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, val)| {
                        let val = if SENSITIVE_KEYS.contains(&key.as_str()) {
                            Value::String(REDACTED.to_string())
                        } else {
                            Self::sanitize_json(val)
                        };
                        (key.clone(), val)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(Self::sanitize_json).collect()),
            _ => value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_sensitive_headers_are_redacted() {
        let headers = HashMap::from([
            ("Authorization".to_string(), "Bearer abc".to_string()),
            ("X-Hub-Signature-256".to_string(), "sha256=00".to_string()),
            ("x-github-event".to_string(), "ping".to_string()),
        ]);

        let sanitized = Sanitizer::sanitize_headers(&headers);
        assert_eq!(sanitized["Authorization"], "[REDACTED]");
        assert_eq!(sanitized["X-Hub-Signature-256"], "[REDACTED]");
        assert_eq!(sanitized["x-github-event"], "ping");
    }

    #[test]
    fn test_nested_secrets_are_redacted() {
        let body = json!({
            "name": "web",
            "config": { "url": "https://bot.example.com/webhook", "secret": "s3cr3t" },
            "items": [{ "token": "t" }]
        });

        assert_eq!(
            Sanitizer::sanitize_json(&body),
            json!({
                "name": "web",
                "config": { "url": "https://bot.example.com/webhook", "secret": "[REDACTED]" },
                "items": [{ "token": "[REDACTED]" }]
            })
        );
    }

    fn nest(depth: usize, key: &str, secret: &str) -> Value {
        let mut value = json!({ key: secret, "event": "push" });
        for level in 0..depth {
            value = if level % 2 == 0 {
                json!({ "payload": value })
            } else {
                json!([value, "filler"])
            };
        }
        value
    }

    proptest! {
        #[test]
        fn secrets_never_survive_at_any_depth(
            depth in 0usize..8,
            key_index in 0usize..SENSITIVE_KEYS.len(),
            secret in "[a-zA-Z0-9]{12,24}",
        ) {
            let body = nest(depth, SENSITIVE_KEYS[key_index], &secret);

            let sanitized = Sanitizer::sanitize_json(&body).to_string();

            prop_assert!(!sanitized.contains(&secret));
            prop_assert!(sanitized.contains("push"));
        }
    }
}
