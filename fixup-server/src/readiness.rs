//! Waiting for GitHub to catch up with a freshly pushed head.
//!
//! Mergeability is computed asynchronously after every push, so the merge
//! step polls the pull request until it reports the expected head with a
//! settled `mergeable` flag, or the attempts run out.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::github::{GitHubApi, RepoId};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessSettings {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Poll until the pull request reports `expected_head` with a known
/// mergeable state.
///
/// Returns `false` when the attempts run out. Fetch errors only cost an
/// attempt.
pub async fn wait_for_readiness(
    github: &dyn GitHubApi,
    sleeper: &dyn Sleeper,
    settings: &ReadinessSettings,
    repo: &RepoId,
    number: u64,
    expected_head: &str,
) -> bool {
    for attempt in 1..=settings.max_attempts {
        match github.get_pull_request(repo, number).await {
            Ok(pr) if pr.head_sha == expected_head && pr.mergeable.is_some() => {
                info!(
                    "#{} in {} ready after {} attempt(s) (mergeable: {:?})",
                    number, repo, attempt, pr.mergeable
                );
                return true;
            }
            Ok(pr) => {
                debug!(
                    "#{} in {} not ready (head {}, mergeable {:?}), attempt {}/{}",
                    number, repo, pr.head_sha, pr.mergeable, attempt, settings.max_attempts
                );
            }
            Err(e) => {
                warn!(
                    "Failed to fetch #{} in {} (attempt {}/{}): {}",
                    number, repo, attempt, settings.max_attempts, e
                );
            }
        }

        if attempt < settings.max_attempts {
            sleeper.sleep(settings.interval).await;
        }
    }

    warn!(
        "#{} in {} still not ready after {} attempt(s)",
        number, repo, settings.max_attempts
    );
    false
}
