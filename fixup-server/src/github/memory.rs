//! In-memory implementation of [`GitHubApi`].
//!
//! Holds just enough repository state to drive the pipeline and the
//! reconciliation sweep end to end, and records every call so tests can
//! assert on what was (and was not) sent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{
    AccountKind, BranchMergeResult, FileMode, FileWrite, GitHubApi, GitHubError, IssueComment,
    MergeRequest, MergeResult, NewCommit, NewWebhook, PullRequestSnapshot, RepoFile, RepoId,
    TreeEntry, Webhook,
};

/// One recorded call against the double.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub detail: String,
}

#[derive(Default)]
struct State {
    /// (repo, path) -> content at every ref.
    files: HashMap<(RepoId, String), String>,
    directories: HashSet<(RepoId, String)>,
    executables: HashSet<(RepoId, String)>,
    comments: HashMap<(RepoId, u64), Vec<IssueComment>>,
    pulls: HashMap<(RepoId, u64), PullRequestSnapshot>,
    /// Snapshots served before falling back to `pulls`.
    scripted_pulls: HashMap<(RepoId, u64), VecDeque<PullRequestSnapshot>>,
    merge_results: HashMap<(RepoId, u64), MergeResult>,
    branch_heads: HashMap<(RepoId, String), String>,
    /// Heads reported by the next `get_branch_head`, simulating a concurrent push.
    moved_heads: HashMap<(RepoId, String), String>,
    branch_merge_result: Option<BranchMergeResult>,
    hooks: HashMap<RepoId, Vec<Webhook>>,
    accounts: HashMap<String, AccountKind>,
    repositories: HashMap<String, Vec<RepoId>>,
    failures: HashMap<&'static str, VecDeque<u16>>,
    blobs: HashMap<String, String>,
    trees: HashMap<String, Vec<TreeEntry>>,
    commits: HashMap<String, NewCommit>,
    calls: Vec<Call>,
    next_id: u64,
}

impl State {
    fn fresh_sha(&mut self) -> String {
        self.next_id += 1;
        format!("{:040x}", self.next_id)
    }

    fn record(&mut self, op: &'static str, detail: String) -> Result<(), GitHubError> {
        self.calls.push(Call { op, detail });

        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(404) => Err(GitHubError::NotFound(op.to_string())),
            Some(status) => Err(GitHubError::Api {
                status,
                message: format!("injected failure for {op}"),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryGitHub {
    state: Mutex<State>,
}

impl InMemoryGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test already panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_file(&self, repo: &RepoId, path: &str, content: &str) {
        self.state()
            .files
            .insert((repo.clone(), path.to_string()), content.to_string());
    }

    pub fn mark_executable(&self, repo: &RepoId, path: &str) {
        self.state()
            .executables
            .insert((repo.clone(), path.to_string()));
    }

    pub fn add_directory(&self, repo: &RepoId, path: &str) {
        self.state()
            .directories
            .insert((repo.clone(), path.to_string()));
    }

    pub fn file(&self, repo: &RepoId, path: &str) -> Option<String> {
        self.state()
            .files
            .get(&(repo.clone(), path.to_string()))
            .cloned()
    }

    pub fn add_comment(&self, repo: &RepoId, number: u64, author: &str, body: &str) {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state
            .comments
            .entry((repo.clone(), number))
            .or_default()
            .push(IssueComment {
                id,
                author: author.to_string(),
                body: body.to_string(),
            });
    }

    /// Register a pull request and point its head branch at `head_sha`.
    pub fn add_pull_request(&self, pr: PullRequestSnapshot) {
        let mut state = self.state();
        state
            .branch_heads
            .insert((pr.repo.clone(), pr.head_ref.clone()), pr.head_sha.clone());
        state.pulls.insert((pr.repo.clone(), pr.number), pr);
    }

    /// Serve `snapshots` in order from `get_pull_request` before falling
    /// back to the registered pull request.
    pub fn script_pull_request(&self, snapshots: Vec<PullRequestSnapshot>) {
        let mut state = self.state();
        for snapshot in snapshots {
            state
                .scripted_pulls
                .entry((snapshot.repo.clone(), snapshot.number))
                .or_default()
                .push_back(snapshot);
        }
    }

    pub fn pull_request(&self, repo: &RepoId, number: u64) -> Option<PullRequestSnapshot> {
        self.state().pulls.get(&(repo.clone(), number)).cloned()
    }

    /// Override what the next merge of `number` returns.
    pub fn set_merge_result(&self, repo: &RepoId, number: u64, result: MergeResult) {
        self.state()
            .merge_results
            .insert((repo.clone(), number), result);
    }

    pub fn set_branch_head(&self, repo: &RepoId, branch: &str, sha: &str) {
        self.state()
            .branch_heads
            .insert((repo.clone(), branch.to_string()), sha.to_string());
    }

    /// Make the branch appear to move after the pull request was fetched.
    pub fn move_branch_head(&self, repo: &RepoId, branch: &str, sha: &str) {
        self.state()
            .moved_heads
            .insert((repo.clone(), branch.to_string()), sha.to_string());
    }

    pub fn branch_head(&self, repo: &RepoId, branch: &str) -> Option<String> {
        self.state()
            .branch_heads
            .get(&(repo.clone(), branch.to_string()))
            .cloned()
    }

    pub fn set_branch_merge_result(&self, result: BranchMergeResult) {
        self.state().branch_merge_result = Some(result);
    }

    pub fn add_webhook(&self, repo: &RepoId, url: &str) {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state.hooks.entry(repo.clone()).or_default().push(Webhook {
            id,
            url: Some(url.to_string()),
        });
    }

    pub fn webhooks(&self, repo: &RepoId) -> Vec<Webhook> {
        self.state().hooks.get(repo).cloned().unwrap_or_default()
    }

    pub fn add_account(&self, account: &str, kind: AccountKind, repos: Vec<RepoId>) {
        let mut state = self.state();
        state.accounts.insert(account.to_string(), kind);
        state.repositories.insert(account.to_string(), repos);
    }

    /// Fail the next call to `op` with `status` (404 becomes `NotFound`).
    pub fn fail_next(&self, op: &'static str, status: u16) {
        self.state()
            .failures
            .entry(op)
            .or_default()
            .push_back(status);
    }

    pub fn blob(&self, sha: &str) -> Option<String> {
        self.state().blobs.get(sha).cloned()
    }

    pub fn tree(&self, sha: &str) -> Option<Vec<TreeEntry>> {
        self.state().trees.get(sha).cloned()
    }

    pub fn commit(&self, sha: &str) -> Option<NewCommit> {
        self.state().commits.get(sha).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GitHubApi for InMemoryGitHub {
    async fn get_file(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<RepoFile, GitHubError> {
        let mut state = self.state();
        state.record(
            "get_file",
            format!("{repo}:{path}@{}", git_ref.unwrap_or("default")),
        )?;

        let key = (repo.clone(), path.to_string());
        if state.directories.contains(&key) {
            return Err(GitHubError::NotAFile {
                path: path.to_string(),
            });
        }
        match state.files.get(&key) {
            Some(content) => Ok(RepoFile {
                sha: format!("blob-{path}"),
                content: content.clone(),
            }),
            None => Err(GitHubError::NotFound(format!("{repo}:{path}"))),
        }
    }

    async fn put_file(&self, repo: &RepoId, write: &FileWrite) -> Result<(), GitHubError> {
        let mut state = self.state();
        state.record("put_file", format!("{repo}:{}", write.path))?;
        state
            .files
            .insert((repo.clone(), write.path.clone()), write.content.clone());
        Ok(())
    }

    async fn list_issue_comments(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<Vec<IssueComment>, GitHubError> {
        let mut state = self.state();
        state.record("list_issue_comments", format!("{repo}#{number}"))?;
        Ok(state
            .comments
            .get(&(repo.clone(), number))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_pull_request(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<PullRequestSnapshot, GitHubError> {
        let mut state = self.state();
        state.record("get_pull_request", format!("{repo}#{number}"))?;

        let key = (repo.clone(), number);
        if let Some(snapshot) = state
            .scripted_pulls
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            return Ok(snapshot);
        }
        state
            .pulls
            .get(&key)
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(format!("{repo}#{number}")))
    }

    async fn merge_pull_request(
        &self,
        repo: &RepoId,
        number: u64,
        request: &MergeRequest,
    ) -> Result<MergeResult, GitHubError> {
        let mut state = self.state();
        state.record(
            "merge_pull_request",
            format!("{repo}#{number} {:?}", request.method),
        )?;

        let key = (repo.clone(), number);
        let result = match state.merge_results.remove(&key) {
            Some(result) => result,
            None => {
                let sha = state.fresh_sha();
                MergeResult {
                    merged: true,
                    sha: Some(sha),
                    message: "Pull Request successfully merged".to_string(),
                }
            }
        };

        if result.merged {
            if let Some(pr) = state.pulls.get_mut(&key) {
                pr.merged = true;
                pr.open = false;
            }
        }
        Ok(result)
    }

    async fn get_commit_tree(&self, repo: &RepoId, commit_sha: &str) -> Result<String, GitHubError> {
        let mut state = self.state();
        state.record("get_commit_tree", format!("{repo}@{commit_sha}"))?;
        Ok(format!("tree-{commit_sha}"))
    }

    async fn get_file_modes(
        &self,
        repo: &RepoId,
        tree_sha: &str,
    ) -> Result<HashMap<String, FileMode>, GitHubError> {
        let mut state = self.state();
        state.record("get_file_modes", format!("{repo}@{tree_sha}"))?;

        let modes = state
            .files
            .keys()
            .filter(|(file_repo, _)| file_repo == repo)
            .map(|key| {
                let mode = if state.executables.contains(key) {
                    FileMode::Executable
                } else {
                    FileMode::Regular
                };
                (key.1.clone(), mode)
            })
            .collect();
        Ok(modes)
    }

    async fn create_blob(&self, repo: &RepoId, content: &str) -> Result<String, GitHubError> {
        let mut state = self.state();
        state.record("create_blob", format!("{repo}"))?;
        let sha = state.fresh_sha();
        state.blobs.insert(sha.clone(), content.to_string());
        Ok(sha)
    }

    async fn create_tree(
        &self,
        repo: &RepoId,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, GitHubError> {
        let mut state = self.state();
        state.record("create_tree", format!("{repo} base={base_tree}"))?;
        let sha = state.fresh_sha();
        state.trees.insert(sha.clone(), entries.to_vec());
        Ok(sha)
    }

    async fn create_commit(&self, repo: &RepoId, commit: &NewCommit) -> Result<String, GitHubError> {
        let mut state = self.state();
        state.record("create_commit", format!("{repo} tree={}", commit.tree_sha))?;
        let sha = state.fresh_sha();
        state.commits.insert(sha.clone(), commit.clone());
        Ok(sha)
    }

    async fn get_branch_head(&self, repo: &RepoId, branch: &str) -> Result<String, GitHubError> {
        let mut state = self.state();
        state.record("get_branch_head", format!("{repo}:{branch}"))?;

        let key = (repo.clone(), branch.to_string());
        if let Some(moved) = state.moved_heads.remove(&key) {
            state.branch_heads.insert(key.clone(), moved);
        }
        state
            .branch_heads
            .get(&key)
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(format!("{repo}:{branch}")))
    }

    async fn update_branch(
        &self,
        repo: &RepoId,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitHubError> {
        let mut state = self.state();
        state.record("update_branch", format!("{repo}:{branch}={sha}"))?;
        state
            .branch_heads
            .insert((repo.clone(), branch.to_string()), sha.to_string());

        for pr in state.pulls.values_mut() {
            if &pr.repo == repo && pr.head_ref == branch {
                pr.head_sha = sha.to_string();
            }
        }
        Ok(())
    }

    async fn merge_branches(
        &self,
        repo: &RepoId,
        base: &str,
        head: &str,
        _message: &str,
    ) -> Result<BranchMergeResult, GitHubError> {
        let mut state = self.state();
        state.record("merge_branches", format!("{repo} {head}->{base}"))?;

        if let Some(result) = state.branch_merge_result.clone() {
            return Ok(result);
        }
        let sha = state.fresh_sha();
        state
            .branch_heads
            .insert((repo.clone(), base.to_string()), sha.clone());
        Ok(BranchMergeResult::Merged { sha })
    }

    async fn list_webhooks(&self, repo: &RepoId) -> Result<Vec<Webhook>, GitHubError> {
        let mut state = self.state();
        state.record("list_webhooks", format!("{repo}"))?;
        Ok(state.hooks.get(repo).cloned().unwrap_or_default())
    }

    async fn create_webhook(&self, repo: &RepoId, hook: &NewWebhook) -> Result<(), GitHubError> {
        let mut state = self.state();
        state.record("create_webhook", format!("{repo} {}", hook.url))?;
        state.next_id += 1;
        let id = state.next_id;
        state.hooks.entry(repo.clone()).or_default().push(Webhook {
            id,
            url: Some(hook.url.clone()),
        });
        Ok(())
    }

    async fn get_account_kind(&self, account: &str) -> Result<AccountKind, GitHubError> {
        let mut state = self.state();
        state.record("get_account_kind", account.to_string())?;
        state
            .accounts
            .get(account)
            .copied()
            .ok_or_else(|| GitHubError::NotFound(account.to_string()))
    }

    async fn list_repositories(
        &self,
        account: &str,
        kind: AccountKind,
    ) -> Result<Vec<RepoId>, GitHubError> {
        let mut state = self.state();
        state.record("list_repositories", format!("{account} {kind:?}"))?;
        Ok(state
            .repositories
            .get(account)
            .cloned()
            .unwrap_or_default())
    }
}
