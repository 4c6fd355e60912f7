//! The fetch-filter-publish pipeline for a single run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::classifier::{Decision, RelevanceClassifier, RetryPolicy, classify_with_retry};
use crate::document::{DedupIndex, Document, DocumentError};
use crate::domain::paper::{FetchMode, Paper};
use crate::feed::{FeedError, FetchLimits, PaperFeed};
use crate::models::config::AppConfig;
use crate::repository::{DocumentReader, DocumentWriter, RepositoryError};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The existing listing could not be parsed. Proceeding would risk
    /// duplicate entries, so the run aborts before touching anything.
    #[error("failed to parse the existing listing: {0}")]
    Listing(#[from] DocumentError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Counters reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub fetched: usize,
    pub in_window: usize,
    pub duplicates_skipped: usize,
    pub relevant: usize,
    pub not_relevant: usize,
    pub classification_failures: usize,
    pub merged: usize,
    pub commit: Option<String>,
}

/// Runs the whole pipeline once: load listing, fetch, window-filter, dedup,
/// classify, dedup again, merge, publish. The document is written at most
/// once, at the very end; every earlier failure leaves it untouched.
pub async fn run_pipeline<F, C, R>(
    feed: &F,
    classifier: &C,
    repo: &R,
    config: &AppConfig,
) -> Result<RunStats, PipelineError>
where
    F: PaperFeed + ?Sized,
    C: RelevanceClassifier + ?Sized,
    R: DocumentReader + DocumentWriter,
{
    let mut stats = RunStats::default();
    let now = Utc::now();
    let window = config.window(now);

    let stored = repo.read_document().await?;
    let (mut document, blob_sha) = match &stored {
        Some(stored) => (Document::parse(&stored.content)?, Some(stored.sha.as_str())),
        None => {
            log::info!("No existing listing found; starting a fresh document");
            (Document::empty(), None)
        }
    };
    let mut dedup = DedupIndex::from_document(&document);
    log::info!("Dedup index holds {} published ids", dedup.len());

    let limits = FetchLimits {
        max_total: config.max_total(),
        max_per_category: config.max_papers_per_category,
    };
    let papers = feed.fetch(crate::CS_CATEGORIES, &window, limits).await?;
    stats.fetched = papers.len();

    // The candidate set is fixed here, before any classification starts.
    let mut candidates = Vec::new();
    for paper in papers {
        if !window.matches(&paper) {
            continue;
        }
        stats.in_window += 1;
        if dedup.contains(&paper.id) {
            stats.duplicates_skipped += 1;
            continue;
        }
        candidates.push(paper);
    }
    log::info!(
        "Classifying {} candidates ({} in window, {} already published)",
        candidates.len(),
        stats.in_window,
        stats.duplicates_skipped
    );

    let policy = RetryPolicy::default();
    let decisions = if config.use_parallel {
        classify_parallel(classifier, policy, candidates, config.max_concurrent).await
    } else {
        classify_sequential(classifier, policy, candidates).await
    };

    let mut approved = Vec::new();
    for (paper, decision) in decisions {
        match decision {
            Decision::Relevant => {
                // Safety net against concurrent runs racing this one.
                if !dedup.insert(paper.id.clone()) {
                    stats.duplicates_skipped += 1;
                    continue;
                }
                stats.relevant += 1;
                log::info!("Relevant: {} ({})", paper.title, paper.id);
                approved.push(paper);
            }
            Decision::NotRelevant => {
                stats.not_relevant += 1;
                log::debug!("Not relevant: {} ({})", paper.title, paper.id);
            }
            Decision::Failed(reason) => {
                stats.classification_failures += 1;
                log::warn!("Excluded after retries: {} ({reason})", paper.id);
            }
        }
    }

    if approved.is_empty() {
        log::info!("No new relevant papers; nothing to publish");
    } else {
        stats.merged = approved.len();
        document.merge(&approved);
        let message = commit_message(approved.len(), config.mode, now);
        let commit = repo
            .commit_document(&document.render(), &message, blob_sha)
            .await?;
        log::info!("Published {} new entries in commit {commit}", approved.len());
        stats.commit = Some(commit);
    }

    log::info!(
        "Run complete: {} fetched, {} in window, {} duplicates skipped, {} relevant, {} not relevant, {} classification failures, {} merged",
        stats.fetched,
        stats.in_window,
        stats.duplicates_skipped,
        stats.relevant,
        stats.not_relevant,
        stats.classification_failures,
        stats.merged
    );
    Ok(stats)
}

/// Classifies every candidate with bounded parallelism. Results are
/// collected only after all tasks finished, so the merge never sees a
/// partial fan-out.
async fn classify_parallel<C>(
    classifier: &C,
    policy: RetryPolicy,
    papers: Vec<Paper>,
    concurrency: usize,
) -> Vec<(Paper, Decision)>
where
    C: RelevanceClassifier + ?Sized,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let tasks = papers.into_iter().map(|paper| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let decision = match semaphore.acquire().await {
                Ok(_permit) => classify_with_retry(classifier, policy, &paper).await,
                Err(e) => Decision::Failed(e.to_string()),
            };
            (paper, decision)
        }
    });
    future::join_all(tasks).await
}

/// Sequential fallback with identical per-record logic, used to validate
/// that results do not depend on the fan-out.
async fn classify_sequential<C>(
    classifier: &C,
    policy: RetryPolicy,
    papers: Vec<Paper>,
) -> Vec<(Paper, Decision)>
where
    C: RelevanceClassifier + ?Sized,
{
    let mut decisions = Vec::with_capacity(papers.len());
    for paper in papers {
        let decision = classify_with_retry(classifier, policy, &paper).await;
        decisions.push((paper, decision));
    }
    decisions
}

fn commit_message(count: usize, mode: FetchMode, now: DateTime<Utc>) -> String {
    format!(
        "Add {count} new paper{} ({mode} run, {})",
        if count == 1 { "" } else { "s" },
        now.format("%Y-%m-%d")
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::classifier::{ClassifierError, Relevance};
    use crate::document::{SECTION_BEGIN, SECTION_END};
    use crate::domain::paper::FetchWindow;
    use crate::feed::FeedResult;
    use crate::repository::{RepositoryResult, StoredDocument};

    fn test_config(use_parallel: bool) -> AppConfig {
        AppConfig {
            mode: FetchMode::Daily,
            fetch_days: 1,
            historical_years: 2,
            max_historical_papers: 5000,
            max_papers_per_category: 1000,
            use_parallel,
            max_concurrent: 4,
            openai_api_key: "unused".to_string(),
            github_token: "unused".to_string(),
            target_repo: "owner/papers".to_string(),
            target_branch: "main".to_string(),
            target_path: "README.md".to_string(),
        }
    }

    fn paper(id: &str, title: &str, age_hours: i64) -> Paper {
        Paper {
            id: id.to_string(),
            title: title.to_string(),
            abstract_text: "An abstract.".to_string(),
            categories: vec!["cs.AI".to_string()],
            published: Utc::now() - Duration::hours(age_hours),
            updated: None,
            url: format!("https://arxiv.org/abs/{id}"),
        }
    }

    struct FakeFeed {
        papers: Vec<Paper>,
        fail: bool,
    }

    #[async_trait]
    impl PaperFeed for FakeFeed {
        async fn fetch(
            &self,
            _categories: &[&str],
            _window: &FetchWindow,
            _limits: FetchLimits,
        ) -> FeedResult<Vec<Paper>> {
            if self.fail {
                return Err(FeedError::AllCategoriesFailed);
            }
            Ok(self.papers.clone())
        }
    }

    /// Classifier with a fixed per-id verdict and a call log.
    struct FakeClassifier {
        verdicts: HashMap<String, Result<Relevance, u16>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeClassifier {
        fn new(verdicts: &[(&str, Result<Relevance, u16>)]) -> Self {
            Self {
                verdicts: verdicts
                    .iter()
                    .map(|(id, verdict)| (id.to_string(), verdict.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl RelevanceClassifier for FakeClassifier {
        async fn classify(&self, paper: &Paper) -> Result<Relevance, ClassifierError> {
            self.calls
                .lock()
                .expect("calls mutex poisoned")
                .push(paper.id.clone());
            match self.verdicts.get(&paper.id) {
                Some(Ok(verdict)) => Ok(*verdict),
                Some(Err(status)) => Err(ClassifierError::Api {
                    status: *status,
                    message: "injected".to_string(),
                }),
                None => Ok(Relevance::NotRelevant),
            }
        }
    }

    /// In-memory document store with a commit log.
    struct FakeRepo {
        state: Mutex<FakeRepoState>,
        fail_commit: bool,
    }

    #[derive(Default)]
    struct FakeRepoState {
        document: Option<StoredDocument>,
        commits: Vec<String>,
    }

    impl FakeRepo {
        fn empty() -> Self {
            Self {
                state: Mutex::new(FakeRepoState::default()),
                fail_commit: false,
            }
        }

        fn with_content(content: &str) -> Self {
            Self {
                state: Mutex::new(FakeRepoState {
                    document: Some(StoredDocument {
                        content: content.to_string(),
                        sha: "sha-0".to_string(),
                    }),
                    commits: Vec::new(),
                }),
                fail_commit: false,
            }
        }

        fn failing_commits(content: &str) -> Self {
            let mut repo = Self::with_content(content);
            repo.fail_commit = true;
            repo
        }

        fn content(&self) -> Option<String> {
            let state = self.state.lock().expect("state mutex poisoned");
            state.document.as_ref().map(|d| d.content.clone())
        }

        fn commits(&self) -> Vec<String> {
            let state = self.state.lock().expect("state mutex poisoned");
            state.commits.clone()
        }
    }

    #[async_trait]
    impl DocumentReader for FakeRepo {
        async fn read_document(&self) -> RepositoryResult<Option<StoredDocument>> {
            let state = self.state.lock().expect("state mutex poisoned");
            Ok(state.document.clone())
        }
    }

    #[async_trait]
    impl DocumentWriter for FakeRepo {
        async fn commit_document(
            &self,
            content: &str,
            message: &str,
            _sha: Option<&str>,
        ) -> RepositoryResult<String> {
            if self.fail_commit {
                return Err(RepositoryError::Api {
                    status: 409,
                    message: "injected".to_string(),
                });
            }
            let mut state = self.state.lock().expect("state mutex poisoned");
            let sha = format!("sha-{}", state.commits.len() + 1);
            state.document = Some(StoredDocument {
                content: content.to_string(),
                sha: sha.clone(),
            });
            state.commits.push(message.to_string());
            Ok(sha)
        }
    }

    fn empty_listing() -> String {
        format!("# Papers\n\n{SECTION_BEGIN}\n{SECTION_END}\n")
    }

    #[tokio::test]
    async fn relevant_papers_end_up_in_the_listing_newest_first() {
        let feed = FakeFeed {
            papers: vec![
                paper("2401.00001v1", "Bias study", 3),
                paper("2401.00002v1", "Tea catalog", 2),
                paper("2401.00003v1", "Fairness probe", 1),
            ],
            fail: false,
        };
        let classifier = FakeClassifier::new(&[
            ("2401.00001v1", Ok(Relevance::Relevant)),
            ("2401.00002v1", Ok(Relevance::NotRelevant)),
            ("2401.00003v1", Ok(Relevance::Relevant)),
        ]);
        let repo = FakeRepo::with_content(&empty_listing());

        let stats = run_pipeline(&feed, &classifier, &repo, &test_config(true))
            .await
            .unwrap();

        assert_eq!(stats.fetched, 3);
        assert_eq!(stats.relevant, 2);
        assert_eq!(stats.not_relevant, 1);
        assert_eq!(stats.merged, 2);
        assert_eq!(stats.commit.as_deref(), Some("sha-1"));

        let content = repo.content().unwrap();
        let document = Document::parse(&content).unwrap();
        let ids: Vec<&str> = document.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["2401.00003v1", "2401.00001v1"]);
        assert_eq!(repo.commits().len(), 1);
        assert!(repo.commits()[0].starts_with("Add 2 new papers (daily run"));
    }

    #[tokio::test]
    async fn a_second_identical_run_publishes_nothing() {
        let feed = FakeFeed {
            papers: vec![paper("2401.00001v1", "Bias study", 3)],
            fail: false,
        };
        let classifier = FakeClassifier::new(&[("2401.00001v1", Ok(Relevance::Relevant))]);
        let repo = FakeRepo::with_content(&empty_listing());
        let config = test_config(true);

        let first = run_pipeline(&feed, &classifier, &repo, &config)
            .await
            .unwrap();
        assert_eq!(first.merged, 1);

        let second = run_pipeline(&feed, &classifier, &repo, &config)
            .await
            .unwrap();
        assert_eq!(second.merged, 0);
        assert_eq!(second.duplicates_skipped, 1);
        assert_eq!(second.commit, None);
        assert_eq!(repo.commits().len(), 1);
    }

    #[tokio::test]
    async fn already_published_papers_are_never_reclassified() {
        let listing = format!(
            "{SECTION_BEGIN}\n- [Old](https://arxiv.org/abs/2401.00001v1) (2024-01-08): seen.\n{SECTION_END}\n"
        );
        let feed = FakeFeed {
            papers: vec![
                paper("2401.00001v1", "Old", 3),
                paper("2401.00002v1", "New", 2),
            ],
            fail: false,
        };
        let classifier = FakeClassifier::new(&[
            ("2401.00001v1", Ok(Relevance::Relevant)),
            ("2401.00002v1", Ok(Relevance::Relevant)),
        ]);
        let repo = FakeRepo::with_content(&listing);

        let stats = run_pipeline(&feed, &classifier, &repo, &test_config(true))
            .await
            .unwrap();

        assert_eq!(stats.duplicates_skipped, 1);
        assert_eq!(classifier.calls(), vec!["2401.00002v1".to_string()]);
    }

    #[tokio::test]
    async fn permanent_classification_failures_do_not_abort_the_run() {
        let feed = FakeFeed {
            papers: vec![
                paper("2401.00001v1", "Keeps failing", 3),
                paper("2401.00002v1", "Fine", 2),
            ],
            fail: false,
        };
        let classifier = FakeClassifier::new(&[
            ("2401.00001v1", Err(400)),
            ("2401.00002v1", Ok(Relevance::Relevant)),
        ]);
        let repo = FakeRepo::with_content(&empty_listing());

        let stats = run_pipeline(&feed, &classifier, &repo, &test_config(true))
            .await
            .unwrap();

        assert_eq!(stats.classification_failures, 1);
        assert_eq!(stats.merged, 1);

        let content = repo.content().unwrap();
        assert!(content.contains("2401.00002v1"));
        assert!(!content.contains("2401.00001v1"));
    }

    #[tokio::test]
    async fn parallel_and_sequential_paths_agree() {
        let papers = vec![
            paper("2401.00001v1", "Relevant one", 5),
            paper("2401.00002v1", "Not relevant", 4),
            paper("2401.00003v1", "Relevant two", 3),
            paper("2401.00004v1", "Broken", 2),
        ];
        let verdicts: &[(&str, Result<Relevance, u16>)] = &[
            ("2401.00001v1", Ok(Relevance::Relevant)),
            ("2401.00002v1", Ok(Relevance::NotRelevant)),
            ("2401.00003v1", Ok(Relevance::Relevant)),
            ("2401.00004v1", Err(400)),
        ];

        let mut outcomes = Vec::new();
        for use_parallel in [true, false] {
            let feed = FakeFeed {
                papers: papers.clone(),
                fail: false,
            };
            let classifier = FakeClassifier::new(verdicts);
            let repo = FakeRepo::with_content(&empty_listing());

            let stats = run_pipeline(&feed, &classifier, &repo, &test_config(use_parallel))
                .await
                .unwrap();
            let content = repo.content().unwrap();
            let document = Document::parse(&content).unwrap();
            let ids: Vec<String> = document.entries().iter().map(|e| e.id.clone()).collect();
            outcomes.push((stats, ids));
        }

        assert_eq!(outcomes[0].0, outcomes[1].0);
        assert_eq!(outcomes[0].1, outcomes[1].1);
    }

    #[tokio::test]
    async fn papers_outside_the_window_are_dropped_before_classification() {
        let feed = FakeFeed {
            // 1-day window; this paper is three days old.
            papers: vec![paper("2401.00001v1", "Stale", 72)],
            fail: false,
        };
        let classifier = FakeClassifier::new(&[("2401.00001v1", Ok(Relevance::Relevant))]);
        let repo = FakeRepo::with_content(&empty_listing());

        let stats = run_pipeline(&feed, &classifier, &repo, &test_config(true))
            .await
            .unwrap();

        assert_eq!(stats.fetched, 1);
        assert_eq!(stats.in_window, 0);
        assert!(classifier.calls().is_empty());
    }

    #[tokio::test]
    async fn a_malformed_listing_aborts_the_run() {
        let feed = FakeFeed {
            papers: vec![paper("2401.00001v1", "Bias study", 3)],
            fail: false,
        };
        let classifier = FakeClassifier::new(&[]);
        let repo = FakeRepo::with_content(&format!(
            "{SECTION_BEGIN}\nthis is not an entry\n{SECTION_END}\n"
        ));

        let result = run_pipeline(&feed, &classifier, &repo, &test_config(true)).await;

        assert!(matches!(result, Err(PipelineError::Listing(_))));
        assert!(classifier.calls().is_empty());
        assert!(repo.commits().is_empty());
    }

    #[tokio::test]
    async fn a_total_feed_failure_aborts_the_run() {
        let feed = FakeFeed {
            papers: Vec::new(),
            fail: true,
        };
        let classifier = FakeClassifier::new(&[]);
        let repo = FakeRepo::with_content(&empty_listing());

        let result = run_pipeline(&feed, &classifier, &repo, &test_config(true)).await;

        assert!(matches!(
            result,
            Err(PipelineError::Feed(FeedError::AllCategoriesFailed))
        ));
        assert!(repo.commits().is_empty());
    }

    #[tokio::test]
    async fn a_failed_publish_surfaces_as_an_error() {
        let feed = FakeFeed {
            papers: vec![paper("2401.00001v1", "Bias study", 3)],
            fail: false,
        };
        let classifier = FakeClassifier::new(&[("2401.00001v1", Ok(Relevance::Relevant))]);
        let repo = FakeRepo::failing_commits(&empty_listing());

        let result = run_pipeline(&feed, &classifier, &repo, &test_config(true)).await;

        assert!(matches!(result, Err(PipelineError::Repository(_))));
    }

    #[tokio::test]
    async fn a_missing_document_is_created_on_first_publish() {
        let feed = FakeFeed {
            papers: vec![paper("2401.00001v1", "Bias study", 3)],
            fail: false,
        };
        let classifier = FakeClassifier::new(&[("2401.00001v1", Ok(Relevance::Relevant))]);
        let repo = FakeRepo::empty();

        let stats = run_pipeline(&feed, &classifier, &repo, &test_config(true))
            .await
            .unwrap();

        assert_eq!(stats.merged, 1);
        let content = repo.content().unwrap();
        let document = Document::parse(&content).unwrap();
        assert_eq!(document.entries().len(), 1);
    }
}
