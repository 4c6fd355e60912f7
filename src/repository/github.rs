use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::repository::{
    DocumentReader, DocumentWriter, RepositoryError, RepositoryResult, StoredDocument,
};

const GITHUB_API_URL: &str = "https://api.github.com";

/// Document store backed by the GitHub contents API.
pub struct GitHubRepository {
    client: reqwest::Client,
    base_url: String,
    token: String,
    repo: String,
    branch: String,
    path: String,
}

impl GitHubRepository {
    pub fn new(
        token: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        path: impl Into<String>,
    ) -> RepositoryResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("paperwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RepositoryError::Build(e.to_string()))?;

        Ok(Self {
            client,
            base_url: GITHUB_API_URL.to_string(),
            token: token.into(),
            repo: repo.into(),
            branch: branch.into(),
            path: path.into(),
        })
    }

    /// Points the client at a different endpoint (GitHub Enterprise, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn contents_url(&self) -> String {
        format!("{}/repos/{}/contents/{}", self.base_url, self.repo, self.path)
    }
}

#[derive(Deserialize)]
struct ContentsResponse {
    content: String,
    sha: String,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct UpdateResponse {
    commit: CommitInfo,
}

#[derive(Deserialize)]
struct CommitInfo {
    sha: String,
}

#[async_trait]
impl DocumentReader for GitHubRepository {
    async fn read_document(&self) -> RepositoryResult<Option<StoredDocument>> {
        let response = self
            .client
            .get(self.contents_url())
            .query(&[("ref", self.branch.as_str())])
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| RepositoryError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RepositoryError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ContentsResponse = response
            .json()
            .await
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        // The contents API wraps base64 payloads with newlines.
        let stripped: String = parsed
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = BASE64
            .decode(stripped)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let content =
            String::from_utf8(bytes).map_err(|e| RepositoryError::Decode(e.to_string()))?;

        Ok(Some(StoredDocument {
            content,
            sha: parsed.sha,
        }))
    }
}

#[async_trait]
impl DocumentWriter for GitHubRepository {
    async fn commit_document(
        &self,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> RepositoryResult<String> {
        let request = UpdateRequest {
            message,
            content: BASE64.encode(content),
            branch: &self.branch,
            sha,
        };

        let response = self
            .client
            .put(self.contents_url())
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RepositoryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RepositoryError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: UpdateResponse = response
            .json()
            .await
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        Ok(parsed.commit.sha)
    }
}
