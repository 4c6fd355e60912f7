use async_trait::async_trait;
use thiserror::Error;

pub mod github;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("failed to build repository client: {0}")]
    Build(String),
    #[error("repository request failed: {0}")]
    Network(String),
    #[error("repository API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode repository content: {0}")]
    Decode(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A file fetched from the document store, together with the blob sha
/// needed to replace it atomically.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub content: String,
    pub sha: String,
}

#[async_trait]
pub trait DocumentReader: Send + Sync {
    /// Returns the current document, or `None` when it does not exist yet.
    async fn read_document(&self) -> RepositoryResult<Option<StoredDocument>>;
}

#[async_trait]
pub trait DocumentWriter: Send + Sync {
    /// Writes `content` as a new commit, replacing blob `sha` when present.
    /// Returns the commit sha. Never retried internally: a failure here
    /// means the run did not durably update anything.
    async fn commit_document(
        &self,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> RepositoryResult<String>;
}
