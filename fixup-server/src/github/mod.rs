//! The slice of the GitHub REST API the bot depends on.
//!
//! Everything the pipeline and the reconciliation loop do to GitHub goes
//! through [`GitHubApi`], so the whole flow can run against
//! [`InMemoryGitHub`] in tests and against [`GitHubClient`] in production.

mod client;
mod memory;

pub use client::{create_github_client, GitHubClient, DEFAULT_API_URL};
pub use memory::{Call, InMemoryGitHub};

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Owner and name of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A freshly fetched view of a pull request.
///
/// Snapshots are never updated in place; re-fetch when freshness matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestSnapshot {
    pub repo: RepoId,
    pub number: u64,
    pub open: bool,
    pub draft: bool,
    pub merged: bool,
    /// `None` while GitHub is still computing mergeability.
    pub mergeable: Option<bool>,
    pub head_ref: String,
    pub head_sha: String,
    pub base_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueComment {
    pub id: u64,
    pub author: String,
    pub body: String,
}

/// Decoded content of a regular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    /// Blob SHA, needed to update the file in place.
    pub sha: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
    pub message: String,
    /// Target branch; the default branch when `None`.
    pub branch: Option<String>,
    /// Existing blob SHA when replacing a file.
    pub sha: Option<String>,
}

/// Git file mode of a blob entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileMode {
    #[default]
    Regular,
    Executable,
}

impl FileMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FileMode::Regular => "100644",
            FileMode::Executable => "100755",
        }
    }

    /// `None` for modes that are not plain blobs (symlinks, submodules, trees).
    pub fn from_git(mode: &str) -> Option<Self> {
        match mode {
            "100644" => Some(FileMode::Regular),
            "100755" => Some(FileMode::Executable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub mode: FileMode,
    pub blob_sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommit {
    pub message: String,
    pub tree_sha: String,
    pub parents: Vec<String>,
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub method: MergeMethod,
    /// Only merge if the head is still at this SHA.
    pub expected_head_sha: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub merged: bool,
    pub sha: Option<String>,
    pub message: String,
}

/// Result of merging one branch into another (`POST /merges`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchMergeResult {
    Merged { sha: String },
    /// The base already contains the head.
    UpToDate,
    Conflict { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
    pub id: u64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWebhook {
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    User,
    Organization,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GitHubError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{path} is not a regular file")]
    NotAFile { path: String },

    #[error("GitHub API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request to GitHub failed: {0}")]
    Transport(String),

    #[error("unexpected response from GitHub: {0}")]
    Decode(String),
}

impl GitHubError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GitHubError::NotFound(_))
    }
}

#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Read a file at `git_ref` (the default branch when `None`).
    async fn get_file(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<RepoFile, GitHubError>;

    /// Create or update a file with a single commit.
    async fn put_file(&self, repo: &RepoId, write: &FileWrite) -> Result<(), GitHubError>;

    /// All comments on an issue or pull request, oldest first.
    async fn list_issue_comments(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<Vec<IssueComment>, GitHubError>;

    async fn get_pull_request(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<PullRequestSnapshot, GitHubError>;

    /// Merge a pull request. A refusal (not mergeable, head moved) is an
    /// `Ok` result with `merged == false`.
    async fn merge_pull_request(
        &self,
        repo: &RepoId,
        number: u64,
        request: &MergeRequest,
    ) -> Result<MergeResult, GitHubError>;

    /// Tree SHA of a commit.
    async fn get_commit_tree(&self, repo: &RepoId, commit_sha: &str) -> Result<String, GitHubError>;

    /// Mode of every blob under `tree_sha`, keyed by path.
    async fn get_file_modes(
        &self,
        repo: &RepoId,
        tree_sha: &str,
    ) -> Result<HashMap<String, FileMode>, GitHubError>;

    async fn create_blob(&self, repo: &RepoId, content: &str) -> Result<String, GitHubError>;

    async fn create_tree(
        &self,
        repo: &RepoId,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, GitHubError>;

    async fn create_commit(&self, repo: &RepoId, commit: &NewCommit) -> Result<String, GitHubError>;

    async fn get_branch_head(&self, repo: &RepoId, branch: &str) -> Result<String, GitHubError>;

    /// Fast-forward `branch` to `sha`. Never forced.
    async fn update_branch(&self, repo: &RepoId, branch: &str, sha: &str)
        -> Result<(), GitHubError>;

    /// Merge `head` into `base`.
    async fn merge_branches(
        &self,
        repo: &RepoId,
        base: &str,
        head: &str,
        message: &str,
    ) -> Result<BranchMergeResult, GitHubError>;

    async fn list_webhooks(&self, repo: &RepoId) -> Result<Vec<Webhook>, GitHubError>;

    async fn create_webhook(&self, repo: &RepoId, hook: &NewWebhook) -> Result<(), GitHubError>;

    async fn get_account_kind(&self, account: &str) -> Result<AccountKind, GitHubError>;

    /// Every repository owned by `account`, across all pages.
    async fn list_repositories(
        &self,
        account: &str,
        kind: AccountKind,
    ) -> Result<Vec<RepoId>, GitHubError>;
}
