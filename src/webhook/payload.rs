use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::RepoConfig;
use crate::pr::packages::map_files_to_packages;
use crate::pr::{ChangeKind, FileChange, PrState, PullRequestData};

/// Actions that (re)trigger an analysis.
pub const ANALYZED_ACTIONS: [&str; 4] = ["opened", "reopened", "synchronize", "ready_for_review"];

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequestPayload,
    pub repository: RepositoryPayload,
}

impl PullRequestEvent {
    pub fn should_analyze(&self) -> bool {
        ANALYZED_ACTIONS.contains(&self.action.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct RepositoryPayload {
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct UserPayload {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct HeadPayload {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct LabelPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub head: HeadPayload,
    pub user: UserPayload,
    #[serde(default)]
    pub draft: bool,
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub labels: Vec<LabelPayload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not part of GitHub's payload; present when the sender inlines the file list.
    #[serde(default)]
    pub files: Vec<FilePayload>,
}

#[derive(Debug, Deserialize)]
pub struct FilePayload {
    pub filename: String,
    pub status: String,
    pub previous_filename: Option<String>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

impl PullRequestEvent {
    /// Build the immutable snapshot the pipeline analyses.
    pub fn normalize(self, config: &RepoConfig) -> PullRequestData {
        let pr = self.pull_request;
        let state = if pr.merged {
            PrState::Merged
        } else if pr.state == "closed" {
            PrState::Closed
        } else {
            PrState::Open
        };

        let files: Vec<FileChange> = pr
            .files
            .into_iter()
            .map(|f| FileChange {
                kind: ChangeKind::from_github(&f.status),
                path: f.filename,
                previous_path: f.previous_filename,
                additions: f.additions,
                deletions: f.deletions,
            })
            .collect();

        let packages_touched = if config.is_monorepo {
            let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
            map_files_to_packages(&paths, &config.monorepo)
        } else {
            Vec::new()
        };

        PullRequestData {
            repo_full_name: self.repository.full_name,
            number: pr.number,
            head_sha: pr.head.sha,
            author: pr.user.login,
            state,
            is_draft: pr.draft,
            title: pr.title,
            body: pr.body,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            created_at: pr.created_at,
            updated_at: pr.updated_at,
            files,
            packages_touched,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueCommentEvent {
    pub action: String,
    pub issue: IssuePayload,
    pub comment: CommentPayload,
    pub repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
pub struct IssuePayload {
    pub number: u64,
    /// Present only when the issue is a pull request.
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CommentPayload {
    pub id: i64,
    pub body: String,
    pub user: UserPayload,
}

impl IssueCommentEvent {
    /// New comments on pull requests; edits and plain issues are ignored.
    pub fn is_new_pr_comment(&self) -> bool {
        self.action == "created" && self.issue.pull_request.is_some()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub fn pull_request_event(action: &str) -> serde_json::Value {
        serde_json::json!({
            "action": action,
            "repository": { "full_name": "org/monorepo" },
            "pull_request": {
                "number": 42,
                "title": "Fix login redirect",
                "body": null,
                "head": { "sha": "abc123" },
                "user": { "login": "alice" },
                "draft": false,
                "state": "open",
                "labels": [{ "name": "bug" }],
                "created_at": "2024-05-01T12:00:00Z",
                "updated_at": "2024-05-02T08:30:00Z",
                "files": [
                    { "filename": "apps/web/src/login.ts", "status": "modified", "additions": 4, "deletions": 2 },
                    { "filename": "apps/web/src/auth.ts", "status": "renamed", "previous_filename": "apps/web/src/session.ts" },
                    { "filename": "README.md", "status": "added", "additions": 1 }
                ]
            }
        })
    }

    pub fn issue_comment_event(body: &str, on_pr: bool) -> serde_json::Value {
        let mut issue = serde_json::json!({ "number": 42 });
        if on_pr {
            issue["pull_request"] = serde_json::json!({ "url": "https://api.github.com/repos/org/monorepo/pulls/42" });
        }
        serde_json::json!({
            "action": "created",
            "repository": { "full_name": "org/monorepo" },
            "issue": issue,
            "comment": { "id": 9001, "body": body, "user": { "login": "maintainer" } }
        })
    }
}
