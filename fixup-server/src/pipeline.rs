//! One remediation run for one pull request:
//! trusted comments → suggestions → commit → readiness → merge.

use std::sync::Arc;

use anyhow::{Context, Result};
use fixup_core::{parse_suggestions, RepositoryPolicy, SuggestionEdit, POLICY_PATH};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::commit::{build_commit, BuildError, CommitOutcome};
use crate::github::{CommitAuthor, GitHubApi, GitHubError, IssueComment, RepoId};
use crate::merge::{merge_pull_request, MergeOutcome};
use crate::readiness::{wait_for_readiness, ReadinessSettings, Sleeper};
use crate::recording::{current_correlation_id, Direction, EventType, RecordedEvent, RecordingLogger};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Completed {
        commit: CommitOutcome,
        /// Whether GitHub settled before the merge attempt.
        ready: bool,
        merge: MergeOutcome,
    },
    /// The suggestion batch could not be applied; the pull request was left untouched.
    Aborted { reason: String },
}

/// Everything a run needs besides the pull request itself.
#[derive(Clone)]
pub struct Pipeline {
    pub github: Arc<dyn GitHubApi>,
    pub sleeper: Arc<dyn Sleeper>,
    pub readiness: ReadinessSettings,
    pub author: CommitAuthor,
    pub recording_logger: Option<RecordingLogger>,
}

/// Fetch the repository's policy from its default branch.
///
/// `Ok(None)` when the repository has no policy document.
pub async fn load_policy(github: &dyn GitHubApi, repo: &RepoId) -> Result<Option<RepositoryPolicy>> {
    let file = match github.get_file(repo, POLICY_PATH, None).await {
        Ok(file) => file,
        Err(GitHubError::NotFound(_)) => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {POLICY_PATH} in {repo}"))
        }
    };

    let policy = RepositoryPolicy::from_json(&file.content)
        .with_context(|| format!("Invalid {POLICY_PATH} in {repo}"))?;
    Ok(Some(policy))
}

/// Suggestions from trusted comments, in comment order then document order.
pub fn collect_suggestions(comments: &[IssueComment], policy: &RepositoryPolicy) -> Vec<SuggestionEdit> {
    let trusted = policy.trusted_identities();
    comments
        .iter()
        .filter(|comment| trusted.permits(&comment.author))
        .flat_map(|comment| parse_suggestions(&comment.body))
        .collect()
}

impl Pipeline {
    pub async fn run(
        &self,
        repo: &RepoId,
        number: u64,
        policy: &RepositoryPolicy,
    ) -> Result<PipelineOutcome> {
        let outcome = self.process(repo, number, policy).await;

        match &outcome {
            Ok(outcome) => {
                info!("Pipeline for #{} in {} finished: {:?}", number, repo, outcome);
                self.record_outcome(
                    repo,
                    number,
                    serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null),
                );
            }
            Err(e) => {
                error!("Pipeline for #{} in {} failed: {:#}", number, repo, e);
                self.record_outcome(
                    repo,
                    number,
                    serde_json::json!({ "status": "error", "error": format!("{e:#}") }),
                );
            }
        }

        outcome
    }

    async fn process(
        &self,
        repo: &RepoId,
        number: u64,
        policy: &RepositoryPolicy,
    ) -> Result<PipelineOutcome> {
        let github = self.github.as_ref();

        let pr = github
            .get_pull_request(repo, number)
            .await
            .with_context(|| format!("Failed to fetch #{number} in {repo}"))?;

        let comments = github
            .list_issue_comments(repo, number)
            .await
            .with_context(|| format!("Failed to list comments on #{number} in {repo}"))?;

        let edits = collect_suggestions(&comments, policy);
        info!(
            "Found {} suggestion(s) in {} comment(s) on #{} in {}",
            edits.len(),
            comments.len(),
            number,
            repo
        );

        let commit = match build_commit(github, &pr, &edits, &self.author).await {
            Ok(commit) => commit,
            Err(BuildError::GitHub(e)) => {
                return Err(e).with_context(|| format!("Failed to commit suggestions to #{number} in {repo}"))
            }
            Err(e) => {
                warn!("Abandoning suggestions for #{} in {}: {}", number, repo, e);
                return Ok(PipelineOutcome::Aborted {
                    reason: e.to_string(),
                });
            }
        };

        let expected_head = match &commit {
            CommitOutcome::Committed { sha, .. } => sha.as_str(),
            CommitOutcome::NoChanges => pr.head_sha.as_str(),
        };

        let ready = wait_for_readiness(
            github,
            self.sleeper.as_ref(),
            &self.readiness,
            repo,
            number,
            expected_head,
        )
        .await;

        let merge = merge_pull_request(github, repo, number, policy).await?;

        Ok(PipelineOutcome::Completed {
            commit,
            ready,
            merge,
        })
    }

    fn record_outcome(&self, repo: &RepoId, number: u64, data: serde_json::Value) {
        let Some(logger) = &self.recording_logger else {
            return;
        };

        let correlation_id = current_correlation_id().unwrap_or_default();
        logger.record(
            RecordedEvent::new(
                &correlation_id,
                EventType::PipelineOutcome,
                Direction::Internal,
                "pipeline",
                data,
            )
            .with_metadata("repo", repo)
            .with_metadata("pr_number", number),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{InMemoryGitHub, PullRequestSnapshot};
    use crate::merge::IntegrationOutcome;
    use crate::readiness::tests::RecordingSleeper;
    use fixup_core::DEFAULT_BOT_IDENTITY;
    use std::time::Duration;

    const HEAD: &str = "1111111111111111111111111111111111111111";

    fn repo() -> RepoId {
        RepoId::new("octo", "app")
    }

    fn pr() -> PullRequestSnapshot {
        PullRequestSnapshot {
            repo: repo(),
            number: 5,
            open: true,
            draft: false,
            merged: false,
            mergeable: Some(true),
            head_ref: "feature".to_string(),
            head_sha: HEAD.to_string(),
            base_ref: "main".to_string(),
        }
    }

    fn policy() -> RepositoryPolicy {
        RepositoryPolicy {
            automatic_processing: true,
            ..Default::default()
        }
    }

    fn pipeline(github: Arc<InMemoryGitHub>) -> Pipeline {
        Pipeline {
            github,
            sleeper: Arc::new(RecordingSleeper::default()),
            readiness: ReadinessSettings {
                max_attempts: 3,
                interval: Duration::from_secs(5),
            },
            author: CommitAuthor {
                name: "fixup[bot]".to_string(),
                email: "fixup-bot@users.noreply.github.com".to_string(),
            },
            recording_logger: None,
        }
    }

    fn suggestion(path: &str, body: &str) -> String {
        format!("Consider this:\n\n```diff\n--- a/{path}\n+++ b/{path}\n{body}\n```\n")
    }

    #[test]
    fn test_only_trusted_comments_are_collected() {
        let comments = vec![
            IssueComment {
                id: 1,
                author: "mallory".to_string(),
                body: suggestion("a.txt", "@@ -1 +1 @@\n-a\n+evil"),
            },
            IssueComment {
                id: 2,
                author: DEFAULT_BOT_IDENTITY.to_uppercase(),
                body: suggestion("a.txt", "@@ -1 +1 @@\n-a\n+b"),
            },
        ];

        let edits = collect_suggestions(&comments, &policy());

        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].diff_body, "@@ -1 +1 @@\n-a\n+b");
    }

    #[tokio::test]
    async fn test_suggestions_are_committed_and_merged() {
        let github = Arc::new(InMemoryGitHub::new());
        github.add_pull_request(pr());
        github.add_file(&repo(), "a.txt", "a\n");
        github.add_comment(&repo(), 5, DEFAULT_BOT_IDENTITY, &suggestion("a.txt", "@@ -1 +1 @@\n-a\n+b"));

        let outcome = pipeline(github.clone()).run(&repo(), 5, &policy()).await.unwrap();

        let PipelineOutcome::Completed { commit, ready, merge } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        let CommitOutcome::Committed { sha, files } = commit else {
            panic!("expected a commit");
        };
        assert_eq!(files, vec!["a.txt"]);
        assert!(ready);
        assert!(matches!(
            merge,
            MergeOutcome::Merged {
                integration: IntegrationOutcome::NotNeeded,
                ..
            }
        ));
        assert_eq!(github.branch_head(&repo(), "feature"), Some(sha));
    }

    #[tokio::test]
    async fn test_untrusted_suggestions_still_merge_without_commit() {
        let github = Arc::new(InMemoryGitHub::new());
        github.add_pull_request(pr());
        github.add_file(&repo(), "a.txt", "a\n");
        github.add_comment(&repo(), 5, "mallory", &suggestion("a.txt", "@@ -1 +1 @@\n-a\n+evil"));

        let outcome = pipeline(github.clone()).run(&repo(), 5, &policy()).await.unwrap();

        assert!(matches!(
            outcome,
            PipelineOutcome::Completed {
                commit: CommitOutcome::NoChanges,
                ready: true,
                merge: MergeOutcome::Merged { .. },
            }
        ));
        assert!(github.calls_for("get_file").is_empty());
        assert!(github.calls_for("create_commit").is_empty());
    }

    #[tokio::test]
    async fn test_rejected_suggestion_aborts_without_merge() {
        let github = Arc::new(InMemoryGitHub::new());
        github.add_pull_request(pr());
        github.add_file(&repo(), "a.txt", "a\n");
        github.add_comment(&repo(), 5, DEFAULT_BOT_IDENTITY, &suggestion("a.txt", "@@ -1 +1 @@\n-zzz\n+b"));

        let outcome = pipeline(github.clone()).run(&repo(), 5, &policy()).await.unwrap();

        assert!(matches!(outcome, PipelineOutcome::Aborted { .. }));
        assert!(github.calls_for("merge_pull_request").is_empty());
        assert!(github.calls_for("update_branch").is_empty());
    }

    #[tokio::test]
    async fn test_platform_failure_is_an_error() {
        let github = Arc::new(InMemoryGitHub::new());
        github.add_pull_request(pr());
        github.fail_next("list_issue_comments", 500);

        assert!(pipeline(github.clone()).run(&repo(), 5, &policy()).await.is_err());
        assert!(github.calls_for("merge_pull_request").is_empty());
    }

    #[tokio::test]
    async fn test_load_policy() {
        let github = InMemoryGitHub::new();
        assert_eq!(load_policy(&github, &repo()).await.unwrap(), None);

        github.add_file(&repo(), POLICY_PATH, r#"{"automaticProcessing": true}"#);
        let policy = load_policy(&github, &repo()).await.unwrap().unwrap();
        assert!(policy.automatic_processing);

        github.add_file(&repo(), POLICY_PATH, "not json");
        assert!(load_policy(&github, &repo()).await.is_err());

        github.fail_next("get_file", 500);
        assert!(load_policy(&github, &repo()).await.is_err());
    }

    #[test]
    fn test_recorded_outcome_shape() {
        let outcome = PipelineOutcome::Completed {
            commit: CommitOutcome::Committed {
                sha: "abc".to_string(),
                files: vec!["src/lib.rs".to_string()],
            },
            ready: true,
            merge: MergeOutcome::Merged {
                sha: "def".to_string(),
                integration: IntegrationOutcome::UpToDate,
            },
        };

        insta::assert_snapshot!(serde_json::to_string_pretty(&outcome).unwrap(), @r#"
        {
          "status": "completed",
          "commit": {
            "status": "committed",
            "sha": "abc",
            "files": [
              "src/lib.rs"
            ]
          },
          "ready": true,
          "merge": {
            "status": "merged",
            "sha": "def",
            "integration": {
              "status": "up_to_date"
            }
          }
        }
        "#);
    }
}
