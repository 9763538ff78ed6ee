use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, Method, StatusCode};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use url::Url;

use super::{
    AccountKind, BranchMergeResult, FileMode, FileWrite, GitHubApi, GitHubError, IssueComment,
    MergeRequest, MergeResult, NewCommit, NewWebhook, PullRequestSnapshot, RepoFile, RepoId,
    TreeEntry, Webhook,
};
use crate::recording::{current_correlation_id, RecordingLogger, RecordingMiddleware, CORRELATION_ID_HEADER};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Page size for every paginated listing; a shorter page is the last one.
const PER_PAGE: usize = 100;

#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    base_url: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    state: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    merged: bool,
    mergeable: Option<bool>,
    head: PullRequestRefResponse,
    base: PullRequestRefResponse,
}

#[derive(Debug, Deserialize)]
struct PullRequestRefResponse {
    sha: String,
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct TreeListing {
    tree: Vec<TreeListingEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeListingEntry {
    path: String,
    mode: String,
    #[serde(rename = "type")]
    kind: String,
}

fn blob_modes(listing: TreeListing) -> HashMap<String, FileMode> {
    listing
        .tree
        .into_iter()
        .filter(|entry| entry.kind == "blob")
        .filter_map(|entry| FileMode::from_git(&entry.mode).map(|mode| (entry.path, mode)))
        .collect()
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaResponse,
}

#[derive(Debug, Deserialize)]
struct HookResponse {
    id: u64,
    #[serde(default)]
    config: HookConfigResponse,
}

#[derive(Debug, Default, Deserialize)]
struct HookConfigResponse {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    name: String,
    owner: UserResponse,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: String,
}

impl GitHubClient {
    pub fn new(base_url: &str, token: String) -> anyhow::Result<Self> {
        Self::new_with_recording(base_url, token, None)
    }

    pub fn new_with_recording(
        base_url: &str,
        token: String,
        recording_logger: Option<RecordingLogger>,
    ) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: create_github_client(recording_logger)?,
            base_url,
            token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GitHubError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| GitHubError::Transport("base URL cannot be a base".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                // Multi-segment values (file paths, branch names) keep their slashes.
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    fn repo_endpoint(&self, repo: &RepoId, segments: &[&str]) -> Result<Url, GitHubError> {
        let mut all = vec!["repos", repo.owner.as_str(), repo.name.as_str()];
        all.extend_from_slice(segments);
        self.endpoint(&all)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        if let Some(cid) = current_correlation_id() {
            builder = builder.header(CORRELATION_ID_HEADER, cid);
        }

        builder
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, GitHubError> {
        let response = builder
            .send()
            .await
            .map_err(|e| GitHubError::Transport(format!("{what}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(GitHubError::NotFound(what.to_string()));
        }

        let message = serde_json::from_str::<ErrorResponse>(&error_text)
            .map(|e| e.message)
            .unwrap_or(error_text);
        error!("GitHub API error {}: {} - {}", what, status, message);
        Err(GitHubError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, GitHubError> {
        response
            .json()
            .await
            .map_err(|e| GitHubError::Decode(format!("{what}: {e}")))
    }

    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        url: Url,
        what: &str,
    ) -> Result<Vec<T>, GitHubError> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());

            let response = self.send(self.request(Method::GET, page_url), what).await?;
            let items: Vec<T> = Self::decode(response, what).await?;
            let count = items.len();
            all.extend(items);

            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all)
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn get_file(
        &self,
        repo: &RepoId,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<RepoFile, GitHubError> {
        let mut url = self.repo_endpoint(repo, &["contents", path])?;
        if let Some(git_ref) = git_ref {
            url.query_pairs_mut().append_pair("ref", git_ref);
        }

        info!("Fetching {} at {} in {}", path, git_ref.unwrap_or("default branch"), repo);

        let what = format!("contents of {path}");
        let response = self.send(self.request(Method::GET, url), &what).await?;
        let value: serde_json::Value = Self::decode(response, &what).await?;

        // Directories come back as an array of entries.
        if value.is_array() {
            return Err(GitHubError::NotAFile {
                path: path.to_string(),
            });
        }
        let contents: ContentsResponse =
            serde_json::from_value(value).map_err(|e| GitHubError::Decode(e.to_string()))?;
        if contents.kind != "file" {
            return Err(GitHubError::NotAFile {
                path: path.to_string(),
            });
        }

        let decoded = general_purpose::STANDARD
            .decode(contents.content.replace('\n', ""))
            .map_err(|e| GitHubError::Decode(format!("base64 content of {path}: {e}")))?;
        let content = String::from_utf8(decoded)
            .map_err(|_| GitHubError::Decode(format!("{path} is not valid UTF-8")))?;

        Ok(RepoFile {
            sha: contents.sha,
            content,
        })
    }

    async fn put_file(&self, repo: &RepoId, write: &FileWrite) -> Result<(), GitHubError> {
        let url = self.repo_endpoint(repo, &["contents", &write.path])?;

        let mut body = json!({
            "message": write.message,
            "content": general_purpose::STANDARD.encode(write.content.as_bytes()),
        });
        if let Some(branch) = &write.branch {
            body["branch"] = json!(branch);
        }
        if let Some(sha) = &write.sha {
            body["sha"] = json!(sha);
        }

        info!("Writing {} in {}", write.path, repo);
        self.send(
            self.request(Method::PUT, url).json(&body),
            &format!("write {}", write.path),
        )
        .await?;
        Ok(())
    }

    async fn list_issue_comments(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<Vec<IssueComment>, GitHubError> {
        let url = self.repo_endpoint(repo, &["issues", &number.to_string(), "comments"])?;
        let comments: Vec<CommentResponse> = self
            .get_all_pages(url, &format!("comments on #{number}"))
            .await?;

        info!("Found {} comments on #{} in {}", comments.len(), number, repo);

        Ok(comments
            .into_iter()
            .map(|c| IssueComment {
                id: c.id,
                author: c.user.login,
                body: c.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn get_pull_request(
        &self,
        repo: &RepoId,
        number: u64,
    ) -> Result<PullRequestSnapshot, GitHubError> {
        let url = self.repo_endpoint(repo, &["pulls", &number.to_string()])?;
        let what = format!("pull request #{number}");
        let response = self.send(self.request(Method::GET, url), &what).await?;
        let pr: PullRequestResponse = Self::decode(response, &what).await?;

        Ok(PullRequestSnapshot {
            repo: repo.clone(),
            number: pr.number,
            open: pr.state == "open",
            draft: pr.draft,
            merged: pr.merged,
            mergeable: pr.mergeable,
            head_ref: pr.head.ref_name,
            head_sha: pr.head.sha,
            base_ref: pr.base.ref_name,
        })
    }

    async fn merge_pull_request(
        &self,
        repo: &RepoId,
        number: u64,
        request: &MergeRequest,
    ) -> Result<MergeResult, GitHubError> {
        let url = self.repo_endpoint(repo, &["pulls", &number.to_string(), "merge"])?;
        let mut body = json!({ "merge_method": request.method });
        if let Some(sha) = &request.expected_head_sha {
            body["sha"] = json!(sha);
        }

        let what = format!("merge of #{number}");
        match self.send(self.request(Method::PUT, url).json(&body), &what).await {
            Ok(response) => {
                let merge: MergeResponse = Self::decode(response, &what).await?;
                Ok(MergeResult {
                    merged: merge.merged,
                    sha: merge.sha,
                    message: merge.message,
                })
            }
            // 405: not mergeable, 409: head moved under us.
            Err(GitHubError::Api { status, message }) if status == 405 || status == 409 => {
                warn!("GitHub refused merge of #{} in {}: {}", number, repo, message);
                Ok(MergeResult {
                    merged: false,
                    sha: None,
                    message,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn get_commit_tree(&self, repo: &RepoId, commit_sha: &str) -> Result<String, GitHubError> {
        let url = self.repo_endpoint(repo, &["git", "commits", commit_sha])?;
        let what = format!("commit {commit_sha}");
        let response = self.send(self.request(Method::GET, url), &what).await?;
        let commit: CommitResponse = Self::decode(response, &what).await?;
        Ok(commit.tree.sha)
    }

    async fn get_file_modes(
        &self,
        repo: &RepoId,
        tree_sha: &str,
    ) -> Result<HashMap<String, FileMode>, GitHubError> {
        let mut url = self.repo_endpoint(repo, &["git", "trees", tree_sha])?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let what = format!("tree {tree_sha}");
        let response = self.send(self.request(Method::GET, url), &what).await?;
        let listing: TreeListing = Self::decode(response, &what).await?;
        if listing.truncated {
            warn!(
                "Tree {} in {} is too large to list in full; unlisted files keep mode {}",
                tree_sha,
                repo,
                FileMode::Regular.as_str()
            );
        }
        Ok(blob_modes(listing))
    }

    async fn create_blob(&self, repo: &RepoId, content: &str) -> Result<String, GitHubError> {
        let url = self.repo_endpoint(repo, &["git", "blobs"])?;
        let body = json!({ "content": content, "encoding": "utf-8" });
        let response = self
            .send(self.request(Method::POST, url).json(&body), "create blob")
            .await?;
        let blob: ShaResponse = Self::decode(response, "create blob").await?;
        Ok(blob.sha)
    }

    async fn create_tree(
        &self,
        repo: &RepoId,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> Result<String, GitHubError> {
        let url = self.repo_endpoint(repo, &["git", "trees"])?;
        let tree: Vec<_> = entries
            .iter()
            .map(|entry| {
                json!({
                    "path": entry.path,
                    "mode": entry.mode.as_str(),
                    "type": "blob",
                    "sha": entry.blob_sha,
                })
            })
            .collect();
        let body = json!({ "base_tree": base_tree, "tree": tree });

        let response = self
            .send(self.request(Method::POST, url).json(&body), "create tree")
            .await?;
        let tree: ShaResponse = Self::decode(response, "create tree").await?;
        Ok(tree.sha)
    }

    async fn create_commit(&self, repo: &RepoId, commit: &NewCommit) -> Result<String, GitHubError> {
        let url = self.repo_endpoint(repo, &["git", "commits"])?;
        let body = json!({
            "message": commit.message,
            "tree": commit.tree_sha,
            "parents": commit.parents,
            "author": commit.author,
            "committer": commit.author,
        });

        let response = self
            .send(self.request(Method::POST, url).json(&body), "create commit")
            .await?;
        let created: ShaResponse = Self::decode(response, "create commit").await?;
        info!("Created commit {} in {}", created.sha, repo);
        Ok(created.sha)
    }

    async fn get_branch_head(&self, repo: &RepoId, branch: &str) -> Result<String, GitHubError> {
        let url = self.repo_endpoint(repo, &["git", "ref", "heads", branch])?;
        let what = format!("branch {branch}");
        let response = self.send(self.request(Method::GET, url), &what).await?;
        let reference: RefResponse = Self::decode(response, &what).await?;
        Ok(reference.object.sha)
    }

    async fn update_branch(
        &self,
        repo: &RepoId,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitHubError> {
        let url = self.repo_endpoint(repo, &["git", "refs", "heads", branch])?;
        let body = json!({ "sha": sha, "force": false });

        self.send(
            self.request(Method::PATCH, url).json(&body),
            &format!("update branch {branch}"),
        )
        .await?;
        info!("Moved {} in {} to {}", branch, repo, sha);
        Ok(())
    }

    async fn merge_branches(
        &self,
        repo: &RepoId,
        base: &str,
        head: &str,
        message: &str,
    ) -> Result<BranchMergeResult, GitHubError> {
        let url = self.repo_endpoint(repo, &["merges"])?;
        let body = json!({ "base": base, "head": head, "commit_message": message });
        let what = format!("merge {head} into {base}");

        match self.send(self.request(Method::POST, url).json(&body), &what).await {
            Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                Ok(BranchMergeResult::UpToDate)
            }
            Ok(response) => {
                let merge: ShaResponse = Self::decode(response, &what).await?;
                Ok(BranchMergeResult::Merged { sha: merge.sha })
            }
            Err(GitHubError::Api { status: 409, message }) => {
                Ok(BranchMergeResult::Conflict { message })
            }
            Err(e) => Err(e),
        }
    }

    async fn list_webhooks(&self, repo: &RepoId) -> Result<Vec<Webhook>, GitHubError> {
        let url = self.repo_endpoint(repo, &["hooks"])?;
        let hooks: Vec<HookResponse> = self.get_all_pages(url, "list webhooks").await?;
        Ok(hooks
            .into_iter()
            .map(|h| Webhook {
                id: h.id,
                url: h.config.url,
            })
            .collect())
    }

    async fn create_webhook(&self, repo: &RepoId, hook: &NewWebhook) -> Result<(), GitHubError> {
        let url = self.repo_endpoint(repo, &["hooks"])?;
        let body = json!({
            "name": "web",
            "active": true,
            "events": hook.events,
            "config": {
                "url": hook.url,
                "content_type": "json",
                "secret": hook.secret,
                "insecure_ssl": "0",
            },
        });

        self.send(self.request(Method::POST, url).json(&body), "create webhook")
            .await?;
        info!("Created webhook for {} in {}", hook.url, repo);
        Ok(())
    }

    async fn get_account_kind(&self, account: &str) -> Result<AccountKind, GitHubError> {
        let url = self.endpoint(&["users", account])?;
        let what = format!("account {account}");
        let response = self.send(self.request(Method::GET, url), &what).await?;
        let user: UserResponse = Self::decode(response, &what).await?;

        match user.kind.as_deref() {
            Some("Organization") => Ok(AccountKind::Organization),
            _ => Ok(AccountKind::User),
        }
    }

    async fn list_repositories(
        &self,
        account: &str,
        kind: AccountKind,
    ) -> Result<Vec<RepoId>, GitHubError> {
        let url = match kind {
            AccountKind::Organization => self.endpoint(&["orgs", account, "repos"])?,
            AccountKind::User => self.endpoint(&["users", account, "repos"])?,
        };
        let repos: Vec<RepositoryResponse> = self
            .get_all_pages(url, &format!("repositories of {account}"))
            .await?;

        Ok(repos
            .into_iter()
            .map(|r| RepoId::new(r.owner.login, r.name))
            .collect())
    }
}

pub fn create_github_client(
    recording_logger: Option<RecordingLogger>,
) -> anyhow::Result<ClientWithMiddleware> {
    use reqwest_middleware::ClientBuilder;

    let client = Client::builder()
        .user_agent(format!("fixup/{}", fixup_core::get_bot_version()))
        .build()?;

    let mut builder = ClientBuilder::new(client);

    if let Some(logger) = recording_logger {
        builder = builder.with(RecordingMiddleware::new(logger));
    }

    Ok(builder.build())
}
