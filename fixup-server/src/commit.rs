//! Turning a batch of suggestion edits into a single commit.
//!
//! The batch is all-or-nothing: every edit is fetched and applied before
//! anything is written, and the branch ref is only moved once the commit
//! exists and the branch is confirmed to still be where it was.

use std::collections::HashMap;

use fixup_core::{apply_edit, ChangeSet, PatchError, SuggestionEdit};
use futures_util::future::try_join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::github::{
    CommitAuthor, GitHubApi, GitHubError, NewCommit, PullRequestSnapshot, TreeEntry,
};

pub const DEFAULT_COMMIT_MESSAGE: &str = "Apply review suggestions";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed { sha: String, files: Vec<String> },
    /// Nothing to apply; the branch was not touched.
    NoChanges,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("cannot read {path} at the pull request head: {source}")]
    FileUnavailable {
        path: String,
        #[source]
        source: GitHubError,
    },

    #[error(transparent)]
    PatchRejected(#[from] PatchError),

    #[error("{branch} moved from {expected} to {actual} while the commit was being built")]
    StaleHead {
        branch: String,
        expected: String,
        actual: String,
    },

    #[error("GitHub call failed while building the commit: {0}")]
    GitHub(#[source] GitHubError),
}

/// Apply each of `edits` to its file as it is at `pr.head_sha`.
///
/// Edits never see each other's output: a later edit to the same path
/// replaces the earlier result. Fails on the first file that cannot be read
/// or patched.
pub async fn apply_edits(
    github: &dyn GitHubApi,
    pr: &PullRequestSnapshot,
    edits: &[SuggestionEdit],
) -> Result<ChangeSet, BuildError> {
    let mut originals: HashMap<&str, String> = HashMap::new();
    let mut changes = ChangeSet::new();

    for edit in edits {
        let path = edit.file_path.as_str();
        if !originals.contains_key(path) {
            let file = github
                .get_file(&pr.repo, path, Some(&pr.head_sha))
                .await
                .map_err(|source| BuildError::FileUnavailable {
                    path: edit.file_path.clone(),
                    source,
                })?;
            originals.insert(path, file.content);
        }

        let patched = apply_edit(&originals[path], edit)?;
        changes.record(edit.file_path.clone(), patched);
    }

    Ok(changes)
}

/// Commit `edits` onto the head branch of `pr`.
pub async fn build_commit(
    github: &dyn GitHubApi,
    pr: &PullRequestSnapshot,
    edits: &[SuggestionEdit],
    author: &CommitAuthor,
) -> Result<CommitOutcome, BuildError> {
    let changes = apply_edits(github, pr, edits).await?;
    if changes.is_empty() {
        return Ok(CommitOutcome::NoChanges);
    }

    let repo = &pr.repo;
    let base_tree = github
        .get_commit_tree(repo, &pr.head_sha)
        .await
        .map_err(BuildError::GitHub)?;
    let modes = github
        .get_file_modes(repo, &base_tree)
        .await
        .map_err(BuildError::GitHub)?;

    let blob_shas = try_join_all(
        changes
            .iter()
            .map(|(_, content)| github.create_blob(repo, content)),
    )
    .await
    .map_err(BuildError::GitHub)?;

    let entries: Vec<TreeEntry> = changes
        .paths()
        .zip(blob_shas)
        .map(|(path, blob_sha)| TreeEntry {
            path: path.to_string(),
            mode: modes.get(path).copied().unwrap_or_default(),
            blob_sha,
        })
        .collect();

    let tree_sha = github
        .create_tree(repo, &base_tree, &entries)
        .await
        .map_err(BuildError::GitHub)?;

    let commit_sha = github
        .create_commit(
            repo,
            &NewCommit {
                message: DEFAULT_COMMIT_MESSAGE.to_string(),
                tree_sha,
                parents: vec![pr.head_sha.clone()],
                author: author.clone(),
            },
        )
        .await
        .map_err(BuildError::GitHub)?;

    let current_head = github
        .get_branch_head(repo, &pr.head_ref)
        .await
        .map_err(BuildError::GitHub)?;
    if current_head != pr.head_sha {
        warn!(
            "Not updating {} in {}: head moved from {} to {}",
            pr.head_ref, repo, pr.head_sha, current_head
        );
        return Err(BuildError::StaleHead {
            branch: pr.head_ref.clone(),
            expected: pr.head_sha.clone(),
            actual: current_head,
        });
    }

    github
        .update_branch(repo, &pr.head_ref, &commit_sha)
        .await
        .map_err(BuildError::GitHub)?;

    let files: Vec<String> = changes.paths().map(str::to_string).collect();
    info!(
        "Committed {} suggested change(s) to {} in {} as {}",
        files.len(),
        pr.head_ref,
        repo,
        commit_sha
    );

    Ok(CommitOutcome::Committed {
        sha: commit_sha,
        files,
    })
}
