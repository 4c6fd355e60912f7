use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::paper::{FetchWindow, Paper};

pub mod arxiv;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to build feed client: {0}")]
    Build(String),
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse feed response: {0}")]
    Parse(String),
    #[error("every category failed to fetch")]
    AllCategoriesFailed,
}

pub type FeedResult<T> = Result<T, FeedError>;

/// Caps enforced while fetching. Both truncate the result rather than fail.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub max_total: usize,
    pub max_per_category: usize,
}

/// An abstraction over paginated paper catalogs.
#[async_trait]
pub trait PaperFeed: Send + Sync {
    /// Fetches every paper in `window` across `categories`, subject to
    /// `limits`. A failure on one category is logged and skipped; the call
    /// fails only when no category could be fetched at all.
    async fn fetch(
        &self,
        categories: &[&str],
        window: &FetchWindow,
        limits: FetchLimits,
    ) -> FeedResult<Vec<Paper>>;
}

/// Shared client with the timeout and user agent applied to every feed call.
pub(crate) fn build_reqwest_client() -> FeedResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("paperwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| FeedError::Build(e.to_string()))
}
