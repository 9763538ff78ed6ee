//! Per-repository policy stored in the repository itself.
//!
//! The document lives at [`POLICY_PATH`] and uses camelCase JSON keys.
//! Missing keys take their defaults and unknown keys are ignored, so an
//! empty object is a valid (disabled) policy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Location of the policy document inside each repository.
pub const POLICY_PATH: &str = ".github/fixup.json";

/// Account whose comments are trusted to carry suggestions when the policy
/// does not name one.
pub const DEFAULT_BOT_IDENTITY: &str = "fixup-reviewer[bot]";

pub const DEFAULT_PRIMARY_BRANCH: &str = "main";

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy document is not valid JSON: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepositoryPolicy {
    /// Master switch. Nothing is applied or merged unless this is set.
    pub automatic_processing: bool,
    pub bot_identity: String,
    /// Accounts trusted in addition to `bot_identity`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trusted_identities: Vec<String>,
    pub primary_branch: String,
    // Read by the reviewing bot, not by this service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

impl Default for RepositoryPolicy {
    fn default() -> Self {
        Self {
            automatic_processing: false,
            bot_identity: DEFAULT_BOT_IDENTITY.to_string(),
            trusted_identities: Vec::new(),
            primary_branch: DEFAULT_PRIMARY_BRANCH.to_string(),
            model: None,
            prompt: None,
            ignore: Vec::new(),
        }
    }
}

impl RepositoryPolicy {
    pub fn from_json(text: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The document written into repositories that have no policy yet.
    ///
    /// Only the switch is written so that every other field keeps tracking
    /// the defaults.
    pub fn baseline_document() -> String {
        let mut doc = serde_json::to_string_pretty(&serde_json::json!({
            "automaticProcessing": false
        }))
        .unwrap_or_else(|_| "{\"automaticProcessing\": false}".to_string());
        doc.push('\n');
        doc
    }

    pub fn trusted_identities(&self) -> TrustedIdentities {
        let mut logins = vec![self.bot_identity.clone()];
        logins.extend(self.trusted_identities.iter().cloned());
        TrustedIdentities(logins)
    }
}

/// The set of accounts whose comments may carry suggestions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedIdentities(Vec<String>);

impl TrustedIdentities {
    /// GitHub logins are case-insensitive.
    pub fn permits(&self, login: &str) -> bool {
        self.0
            .iter()
            .any(|trusted| !trusted.is_empty() && trusted.eq_ignore_ascii_case(login))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_disabled_with_defaults() {
        let policy = RepositoryPolicy::from_json("{}").unwrap();
        assert_eq!(policy, RepositoryPolicy::default());
        assert!(!policy.automatic_processing);
        assert_eq!(policy.primary_branch, "main");
        assert_eq!(policy.bot_identity, DEFAULT_BOT_IDENTITY);
    }

    #[test]
    fn test_camel_case_fields() {
        let policy = RepositoryPolicy::from_json(
            r#"{
                "automaticProcessing": true,
                "botIdentity": "review-bot[bot]",
                "primaryBranch": "develop",
                "model": "large",
                "ignore": ["vendor/**"],
                "somethingNew": 3
            }"#,
        )
        .unwrap();

        assert!(policy.automatic_processing);
        assert_eq!(policy.bot_identity, "review-bot[bot]");
        assert_eq!(policy.primary_branch, "develop");
        assert_eq!(policy.model.as_deref(), Some("large"));
        assert_eq!(policy.ignore, vec!["vendor/**"]);
    }

    #[test]
    fn test_invalid_document() {
        assert!(RepositoryPolicy::from_json("automaticProcessing: true").is_err());
    }

    #[test]
    fn test_baseline_document_round_trips_to_disabled_default() {
        let doc = RepositoryPolicy::baseline_document();
        let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(parsed, serde_json::json!({ "automaticProcessing": false }));
        assert_eq!(
            RepositoryPolicy::from_json(&doc).unwrap(),
            RepositoryPolicy::default()
        );
    }

    #[test]
    fn test_trusted_identities() {
        let policy = RepositoryPolicy {
            bot_identity: "Review-Bot[bot]".to_string(),
            trusted_identities: vec!["helper".to_string(), String::new()],
            ..Default::default()
        };
        let trusted = policy.trusted_identities();

        assert!(trusted.permits("review-bot[bot]"));
        assert!(trusted.permits("HELPER"));
        assert!(!trusted.permits("someone-else"));
        assert!(!trusted.permits(""));
    }
}
