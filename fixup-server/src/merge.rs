//! Squash-merging a ready pull request and carrying the result into the
//! primary branch when the pull request targeted some other branch.

use anyhow::{Context, Result};
use fixup_core::RepositoryPolicy;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::github::{BranchMergeResult, GitHubApi, MergeMethod, MergeRequest, RepoId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    AlreadyMerged,
    Merged {
        sha: String,
        integration: IntegrationOutcome,
    },
    Unmergeable,
    MergeFailed {
        reason: String,
    },
}

/// What happened when the merged base branch was folded into the primary branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IntegrationOutcome {
    NotNeeded,
    Merged { sha: String },
    UpToDate,
    Failed { reason: String },
}

pub async fn merge_pull_request(
    github: &dyn GitHubApi,
    repo: &RepoId,
    number: u64,
    policy: &RepositoryPolicy,
) -> Result<MergeOutcome> {
    let pr = github
        .get_pull_request(repo, number)
        .await
        .with_context(|| format!("Failed to fetch #{number} in {repo} before merging"))?;

    if pr.merged {
        info!("#{} in {} is already merged", number, repo);
        return Ok(MergeOutcome::AlreadyMerged);
    }

    if pr.mergeable != Some(true) {
        info!(
            "#{} in {} is not mergeable (mergeable: {:?})",
            number, repo, pr.mergeable
        );
        return Ok(MergeOutcome::Unmergeable);
    }

    let request = MergeRequest {
        method: MergeMethod::Squash,
        expected_head_sha: Some(pr.head_sha.clone()),
    };
    let result = github
        .merge_pull_request(repo, number, &request)
        .await
        .with_context(|| format!("Failed to merge #{number} in {repo}"))?;

    if !result.merged {
        warn!("GitHub did not merge #{} in {}: {}", number, repo, result.message);
        return Ok(MergeOutcome::MergeFailed {
            reason: result.message,
        });
    }

    let sha = result.sha.unwrap_or_default();
    info!("Merged #{} into {} in {} as {}", number, pr.base_ref, repo, sha);

    let integration = integrate(github, repo, &pr.base_ref, &policy.primary_branch).await;

    Ok(MergeOutcome::Merged { sha, integration })
}

/// Merge `base_ref` into `primary_branch`. Failures are reported, never raised.
async fn integrate(
    github: &dyn GitHubApi,
    repo: &RepoId,
    base_ref: &str,
    primary_branch: &str,
) -> IntegrationOutcome {
    if base_ref == primary_branch {
        return IntegrationOutcome::NotNeeded;
    }

    let message = format!("Merge {base_ref} into {primary_branch}");
    match github
        .merge_branches(repo, primary_branch, base_ref, &message)
        .await
    {
        Ok(BranchMergeResult::Merged { sha }) => {
            info!("Merged {} into {} in {} as {}", base_ref, primary_branch, repo, sha);
            IntegrationOutcome::Merged { sha }
        }
        Ok(BranchMergeResult::UpToDate) => {
            info!("{} in {} already contains {}", primary_branch, repo, base_ref);
            IntegrationOutcome::UpToDate
        }
        Ok(BranchMergeResult::Conflict { message }) => {
            error!(
                "Cannot merge {} into {} in {}: {}",
                base_ref, primary_branch, repo, message
            );
            IntegrationOutcome::Failed { reason: message }
        }
        Err(e) => {
            error!(
                "Failed to merge {} into {} in {}: {}",
                base_ref, primary_branch, repo, e
            );
            IntegrationOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{InMemoryGitHub, MergeResult, PullRequestSnapshot};

    fn repo() -> RepoId {
        RepoId::new("octo", "app")
    }

    fn pr(base_ref: &str) -> PullRequestSnapshot {
        PullRequestSnapshot {
            repo: repo(),
            number: 12,
            open: true,
            draft: false,
            merged: false,
            mergeable: Some(true),
            head_ref: "feature".to_string(),
            head_sha: "abc".to_string(),
            base_ref: base_ref.to_string(),
        }
    }

    fn policy() -> RepositoryPolicy {
        RepositoryPolicy {
            automatic_processing: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_already_merged_is_idempotent() {
        let github = InMemoryGitHub::new();
        github.add_pull_request(PullRequestSnapshot {
            merged: true,
            open: false,
            ..pr("develop")
        });

        let first = merge_pull_request(&github, &repo(), 12, &policy()).await.unwrap();
        let second = merge_pull_request(&github, &repo(), 12, &policy()).await.unwrap();

        assert_eq!(first, MergeOutcome::AlreadyMerged);
        assert_eq!(second, MergeOutcome::AlreadyMerged);
        assert!(github.calls_for("merge_pull_request").is_empty());
        assert!(github.calls_for("merge_branches").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_mergeability_is_unmergeable() {
        let github = InMemoryGitHub::new();
        github.add_pull_request(PullRequestSnapshot {
            mergeable: None,
            ..pr("main")
        });

        let outcome = merge_pull_request(&github, &repo(), 12, &policy()).await.unwrap();

        assert_eq!(outcome, MergeOutcome::Unmergeable);
        assert!(github.calls_for("merge_pull_request").is_empty());
    }

    #[tokio::test]
    async fn test_merge_into_primary_needs_no_integration() {
        let github = InMemoryGitHub::new();
        github.add_pull_request(pr("main"));

        let outcome = merge_pull_request(&github, &repo(), 12, &policy()).await.unwrap();

        assert!(matches!(
            outcome,
            MergeOutcome::Merged {
                integration: IntegrationOutcome::NotNeeded,
                ..
            }
        ));
        assert_eq!(github.calls_for("merge_pull_request")[0].detail, "octo/app#12 Squash");
        assert!(github.calls_for("merge_branches").is_empty());
        assert!(github.pull_request(&repo(), 12).unwrap().merged);
    }

    #[tokio::test]
    async fn test_merge_into_other_base_integrates() {
        let github = InMemoryGitHub::new();
        github.add_pull_request(pr("develop"));

        let outcome = merge_pull_request(&github, &repo(), 12, &policy()).await.unwrap();

        let MergeOutcome::Merged { integration, .. } = outcome else {
            panic!("expected a merge, got {outcome:?}");
        };
        assert!(matches!(integration, IntegrationOutcome::Merged { .. }));
        assert_eq!(
            github.calls_for("merge_branches")[0].detail,
            "octo/app develop->main"
        );
    }

    #[tokio::test]
    async fn test_integration_failure_keeps_merged_outcome() {
        let github = InMemoryGitHub::new();
        github.add_pull_request(pr("develop"));
        github.set_branch_merge_result(BranchMergeResult::Conflict {
            message: "Merge conflict".to_string(),
        });

        let outcome = merge_pull_request(&github, &repo(), 12, &policy()).await.unwrap();

        assert!(matches!(
            outcome,
            MergeOutcome::Merged {
                integration: IntegrationOutcome::Failed { .. },
                ..
            }
        ));

        let github = InMemoryGitHub::new();
        github.add_pull_request(pr("develop"));
        github.fail_next("merge_branches", 500);
        let outcome = merge_pull_request(&github, &repo(), 12, &policy()).await.unwrap();
        assert!(matches!(
            outcome,
            MergeOutcome::Merged {
                integration: IntegrationOutcome::Failed { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_up_to_date_primary() {
        let github = InMemoryGitHub::new();
        github.add_pull_request(pr("develop"));
        github.set_branch_merge_result(BranchMergeResult::UpToDate);

        let outcome = merge_pull_request(&github, &repo(), 12, &policy()).await.unwrap();

        assert!(matches!(
            outcome,
            MergeOutcome::Merged {
                integration: IntegrationOutcome::UpToDate,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_refused_merge_is_merge_failed() {
        let github = InMemoryGitHub::new();
        github.add_pull_request(pr("develop"));
        github.set_merge_result(
            &repo(),
            12,
            MergeResult {
                merged: false,
                sha: None,
                message: "Head branch was modified".to_string(),
            },
        );

        let outcome = merge_pull_request(&github, &repo(), 12, &policy()).await.unwrap();

        assert_eq!(
            outcome,
            MergeOutcome::MergeFailed {
                reason: "Head branch was modified".to_string()
            }
        );
        assert!(github.calls_for("merge_branches").is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_an_error() {
        let github = InMemoryGitHub::new();
        assert!(merge_pull_request(&github, &repo(), 12, &policy()).await.is_err());
    }
}
