//! Periodic reconciliation of every repository under an account.
//!
//! Each sweep makes sure every repository delivers webhooks to this service
//! and carries a policy document. Repositories that already have a policy
//! are never touched; new ones get a disabled baseline so that owners opt
//! in explicitly.

use std::sync::Arc;
use std::time::Duration;

use fixup_core::{RepositoryPolicy, POLICY_PATH};
use serde::Serialize;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::github::{FileWrite, GitHubApi, GitHubError, NewWebhook, RepoId};

pub const WEBHOOK_EVENTS: [&str; 2] = ["issue_comment", "pull_request"];
pub const POLICY_COMMIT_MESSAGE: &str = "Add fixup policy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub account: String,
    pub callback_url: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub repositories: usize,
    pub webhooks_created: usize,
    pub policies_created: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ensured {
    AlreadyPresent,
    Created,
    Failed,
}

pub async fn reconcile_account(github: &dyn GitHubApi, settings: &ReconcileSettings) -> ReconcileReport {
    let account = settings.account.as_str();
    info!("Reconciling repositories of {}", account);

    let mut report = ReconcileReport::default();

    let repos = match list_account_repositories(github, account).await {
        Ok(repos) => repos,
        Err(e) => {
            error!("Failed to list repositories of {}: {}. Sweep aborted.", account, e);
            report.errors += 1;
            return report;
        }
    };
    report.repositories = repos.len();

    for repo in &repos {
        match ensure_webhook(github, repo, settings).await {
            Ensured::Created => report.webhooks_created += 1,
            Ensured::Failed => report.errors += 1,
            Ensured::AlreadyPresent => {}
        }

        match ensure_policy(github, repo).await {
            Ensured::Created => report.policies_created += 1,
            Ensured::Failed => report.errors += 1,
            Ensured::AlreadyPresent => {}
        }
    }

    info!(
        "Reconciled {} repositories of {}: {} webhook(s) and {} policy file(s) created, {} error(s)",
        report.repositories, account, report.webhooks_created, report.policies_created, report.errors
    );
    report
}

async fn list_account_repositories(
    github: &dyn GitHubApi,
    account: &str,
) -> Result<Vec<RepoId>, GitHubError> {
    let kind = github.get_account_kind(account).await?;
    github.list_repositories(account, kind).await
}

async fn ensure_webhook(github: &dyn GitHubApi, repo: &RepoId, settings: &ReconcileSettings) -> Ensured {
    let hooks = match github.list_webhooks(repo).await {
        Ok(hooks) => hooks,
        // No access to hook listing; creating is still worth a try.
        Err(GitHubError::NotFound(_)) => Vec::new(),
        Err(e) => {
            warn!("Skipping webhook check for {}: {}", repo, e);
            return Ensured::Failed;
        }
    };

    if hooks
        .iter()
        .any(|hook| hook.url.as_deref() == Some(settings.callback_url.as_str()))
    {
        return Ensured::AlreadyPresent;
    }

    let hook = NewWebhook {
        url: settings.callback_url.clone(),
        secret: settings.webhook_secret.clone(),
        events: WEBHOOK_EVENTS.iter().map(|e| e.to_string()).collect(),
    };
    match github.create_webhook(repo, &hook).await {
        Ok(()) => {
            info!("Created webhook in {}", repo);
            Ensured::Created
        }
        Err(e) => {
            error!("Failed to create webhook in {}: {}", repo, e);
            Ensured::Failed
        }
    }
}

async fn ensure_policy(github: &dyn GitHubApi, repo: &RepoId) -> Ensured {
    match github.get_file(repo, POLICY_PATH, None).await {
        Ok(_) => return Ensured::AlreadyPresent,
        Err(GitHubError::NotFound(_)) => {}
        Err(e) => {
            warn!("Skipping policy check for {}: {}", repo, e);
            return Ensured::Failed;
        }
    }

    let write = FileWrite {
        path: POLICY_PATH.to_string(),
        content: RepositoryPolicy::baseline_document(),
        message: POLICY_COMMIT_MESSAGE.to_string(),
        branch: None,
        sha: None,
    };
    match github.put_file(repo, &write).await {
        Ok(()) => {
            info!("Created {} in {}", POLICY_PATH, repo);
            Ensured::Created
        }
        Err(e) => {
            error!("Failed to create {} in {}: {}", POLICY_PATH, repo, e);
            Ensured::Failed
        }
    }
}

/// Sweep `settings.account` every `period`, starting immediately.
pub async fn reconciliation_loop(
    github: Arc<dyn GitHubApi>,
    settings: ReconcileSettings,
    period: Duration,
) {
    let mut interval = interval(period);

    loop {
        interval.tick().await;
        reconcile_account(github.as_ref(), &settings).await;
    }
}
