use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::github::{CommitAuthor, DEFAULT_API_URL};
use crate::readiness::{ReadinessSettings, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_COMMIT_AUTHOR_NAME: &str = "fixup[bot]";
pub const DEFAULT_COMMIT_AUTHOR_EMAIL: &str = "fixup-bot@users.noreply.github.com";

#[derive(Clone, Debug)]
pub struct Config {
    pub github_token: String,
    pub github_webhook_secret: String,
    pub github_api_url: String,
    /// Where GitHub should deliver webhooks. Required for reconciliation.
    pub webhook_callback_url: Option<String>,
    /// Account swept by the reconciliation loop; the loop is off when unset.
    pub reconcile_account: Option<String>,
    pub reconcile_interval: Duration,
    pub port: u16,
    pub commit_author: CommitAuthor,
    pub readiness: ReadinessSettings,
    pub recording_enabled: bool,
    pub recording_log_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let github_token =
            var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable is required")?;

        let github_webhook_secret = var("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let github_api_url =
            var("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let port = match var("PORT") {
            Some(port) => port.parse::<u16>().context("PORT must be a valid number")?,
            None => DEFAULT_PORT,
        };

        let reconcile_interval = match var("RECONCILE_INTERVAL_SECS") {
            Some(secs) => Duration::from_secs(
                secs.parse::<u64>()
                    .context("RECONCILE_INTERVAL_SECS must be a valid number")?,
            ),
            None => DEFAULT_RECONCILE_INTERVAL,
        };
        if reconcile_interval.is_zero() {
            anyhow::bail!("RECONCILE_INTERVAL_SECS must be greater than zero");
        }

        let max_attempts = match var("READINESS_MAX_ATTEMPTS") {
            Some(n) => n
                .parse::<u32>()
                .context("READINESS_MAX_ATTEMPTS must be a valid number")?,
            None => DEFAULT_MAX_ATTEMPTS,
        };

        let interval = match var("READINESS_INTERVAL_SECS") {
            Some(secs) => Duration::from_secs(
                secs.parse::<u64>()
                    .context("READINESS_INTERVAL_SECS must be a valid number")?,
            ),
            None => DEFAULT_POLL_INTERVAL,
        };

        let recording_enabled = var("RECORDING_ENABLED")
            .and_then(|value| value.parse::<bool>().ok())
            .unwrap_or(false);

        Ok(Config {
            github_token,
            github_webhook_secret,
            github_api_url,
            webhook_callback_url: var("WEBHOOK_CALLBACK_URL"),
            reconcile_account: var("RECONCILE_ACCOUNT"),
            reconcile_interval,
            port,
            commit_author: CommitAuthor {
                name: var("COMMIT_AUTHOR_NAME")
                    .unwrap_or_else(|| DEFAULT_COMMIT_AUTHOR_NAME.to_string()),
                email: var("COMMIT_AUTHOR_EMAIL")
                    .unwrap_or_else(|| DEFAULT_COMMIT_AUTHOR_EMAIL.to_string()),
            },
            readiness: ReadinessSettings {
                max_attempts,
                interval,
            },
            recording_enabled,
            recording_log_path: var("RECORDING_LOG_PATH")
                .unwrap_or_else(|| "recordings.jsonl".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("GITHUB_TOKEN", "ghp_test"),
        ("GITHUB_WEBHOOK_SECRET", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = config(&REQUIRED).unwrap();

        assert_eq!(config.github_api_url, "https://api.github.com");
        assert_eq!(config.port, 3000);
        assert_eq!(config.reconcile_interval, Duration::from_secs(3600));
        assert_eq!(config.reconcile_account, None);
        assert_eq!(config.webhook_callback_url, None);
        assert_eq!(config.commit_author.name, "fixup[bot]");
        assert_eq!(config.commit_author.email, "fixup-bot@users.noreply.github.com");
        assert_eq!(config.readiness, ReadinessSettings::default());
        assert!(!config.recording_enabled);
        assert_eq!(config.recording_log_path, "recordings.jsonl");
    }

    #[test]
    fn test_required_variables() {
        let err = config(&[("GITHUB_TOKEN", "ghp_test")]).unwrap_err();
        assert!(err.to_string().contains("GITHUB_WEBHOOK_SECRET"));

        let err = config(&[("GITHUB_TOKEN", "  "), ("GITHUB_WEBHOOK_SECRET", "s")]).unwrap_err();
        assert!(err.to_string().contains("GITHUB_TOKEN"));
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("PORT", "8080"),
            ("RECONCILE_ACCOUNT", "octo"),
            ("RECONCILE_INTERVAL_SECS", "60"),
            ("WEBHOOK_CALLBACK_URL", "https://bot.example.com/webhook"),
            ("READINESS_MAX_ATTEMPTS", "3"),
            ("READINESS_INTERVAL_SECS", "1"),
            ("RECORDING_ENABLED", "true"),
        ]);
        let config = config(&vars).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.reconcile_account.as_deref(), Some("octo"));
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
        assert_eq!(
            config.webhook_callback_url.as_deref(),
            Some("https://bot.example.com/webhook")
        );
        assert_eq!(config.readiness.max_attempts, 3);
        assert_eq!(config.readiness.interval, Duration::from_secs(1));
        assert!(config.recording_enabled);
    }

    #[test]
    fn test_invalid_numbers() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("PORT", "not-a-port"));
        assert!(config(&vars).is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("RECONCILE_INTERVAL_SECS", "0"));
        assert!(config(&vars).is_err());
    }
}
