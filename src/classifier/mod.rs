use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::paper::Paper;

pub mod openai;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("failed to build classifier client: {0}")]
    Build(String),
    #[error("classification request failed: {0}")]
    Network(String),
    #[error("classification API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("failed to parse classification response: {0}")]
    Parse(String),
}

impl ClassifierError {
    /// Whether the failure is worth retrying: rate limits, server errors,
    /// timeouts and connection failures.
    pub fn is_transient(&self) -> bool {
        match self {
            ClassifierError::Network(_) => true,
            ClassifierError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A single classification verdict before retry handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    Relevant,
    NotRelevant,
}

/// The per-paper outcome of the classification stage for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Relevant,
    NotRelevant,
    /// Retries exhausted or a permanent API error. The paper is excluded
    /// from this run and stays eligible for the next one.
    Failed(String),
}

/// An abstraction over external relevance classifiers.
#[async_trait]
pub trait RelevanceClassifier: Send + Sync {
    /// Judges a single paper from its title and abstract. The verdict must
    /// not depend on any other in-flight classification.
    async fn classify(&self, paper: &Paper) -> Result<Relevance, ClassifierError>;
}

/// Exponential backoff policy for transient classification failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based): base doubled
    /// per attempt, capped so the shift cannot overflow.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1).min(16))
    }
}

/// Runs one classification with retries. Transient failures back off and
/// retry up to the policy's attempt cap; exhaustion and permanent errors
/// demote to [`Decision::Failed`] without affecting sibling requests.
pub async fn classify_with_retry<C>(classifier: &C, policy: RetryPolicy, paper: &Paper) -> Decision
where
    C: RelevanceClassifier + ?Sized,
{
    let mut attempt = 1;
    loop {
        match classifier.classify(paper).await {
            Ok(Relevance::Relevant) => return Decision::Relevant,
            Ok(Relevance::NotRelevant) => return Decision::NotRelevant,
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay(attempt);
                log::warn!(
                    "Transient classification failure for {} (attempt {attempt}/{}): {e}; retrying in {delay:?}",
                    paper.id,
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                log::error!("Classification failed for {}: {e}", paper.id);
                return Decision::Failed(e.to_string());
            }
        }
    }
}
