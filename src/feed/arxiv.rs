use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use feed_rs::model::Entry;
use futures::future;
use tokio::sync::Semaphore;
use url::Url;

use crate::domain::paper::{FetchWindow, Paper};
use crate::feed::{FeedError, FeedResult, FetchLimits, PaperFeed, build_reqwest_client};

const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";
const PAGE_SIZE: usize = 100;

/// Client for the arXiv query API which limits concurrent HTTP requests
/// using a [`Semaphore`]. Results come back as Atom; the API sorts them by
/// submission date descending, which lets pagination stop early once a page
/// crosses the window start.
pub struct ArxivFeed {
    base_url: Url,
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    page_size: usize,
}

impl ArxivFeed {
    /// Creates a new feed client with the given concurrency limit.
    pub fn new(concurrency: usize) -> FeedResult<Self> {
        Ok(Self {
            base_url: Url::parse(ARXIV_API_URL).map_err(|e| FeedError::Build(e.to_string()))?,
            client: build_reqwest_client()?,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            page_size: PAGE_SIZE,
        })
    }

    /// Points the client at a different endpoint.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Fetches one page of results for a category. A permit from the
    /// internal [`Semaphore`] is acquired before issuing the request.
    async fn fetch_page(
        &self,
        category: &str,
        start: usize,
        max_results: usize,
    ) -> FeedResult<Vec<Paper>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| FeedError::Build(e.to_string()))?;

        let query = format!("cat:{category}");
        let response = self
            .client
            .get(self.base_url.clone())
            .query(&[
                ("search_query", query.as_str()),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
                ("start", start.to_string().as_str()),
                ("max_results", max_results.to_string().as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        parse_atom(&body)
    }

    /// Pages through one category until the window start is crossed, the
    /// per-category cap is reached or the server runs out of results.
    async fn fetch_category(
        &self,
        category: &str,
        window: &FetchWindow,
        cap: usize,
    ) -> FeedResult<Vec<Paper>> {
        let mut papers: Vec<Paper> = Vec::new();
        let mut start = 0;

        while papers.len() < cap {
            let batch = self.page_size.min(cap - papers.len());
            let page = self.fetch_page(category, start, batch).await?;
            if page.is_empty() {
                break;
            }

            let fetched = page.len();
            let mut crossed_window_start = false;
            for paper in page {
                if let Some(window_start) = window.start
                    && paper.effective_date() < window_start
                {
                    // Date-sorted descending: nothing further back can match.
                    crossed_window_start = true;
                    break;
                }
                if window.matches(&paper) {
                    papers.push(paper);
                    if papers.len() == cap {
                        break;
                    }
                }
            }

            if crossed_window_start || fetched < batch {
                break;
            }
            start += fetched;
        }

        Ok(papers)
    }
}

#[async_trait]
impl PaperFeed for ArxivFeed {
    async fn fetch(
        &self,
        categories: &[&str],
        window: &FetchWindow,
        limits: FetchLimits,
    ) -> FeedResult<Vec<Paper>> {
        let tasks = categories.iter().map(|category| async move {
            (
                *category,
                self.fetch_category(category, window, limits.max_per_category)
                    .await,
            )
        });

        let mut papers = Vec::new();
        let mut failures = 0;
        for (category, result) in future::join_all(tasks).await {
            match result {
                Ok(batch) => {
                    log::info!("Fetched {} papers for category {category}", batch.len());
                    papers.extend(batch);
                }
                Err(e) => {
                    failures += 1;
                    log::error!("Failed to fetch category {category}: {e}");
                }
            }
        }

        if !categories.is_empty() && failures == categories.len() {
            return Err(FeedError::AllCategoriesFailed);
        }

        // A paper tagged with several categories comes back once per
        // category; keep the first occurrence.
        let mut seen = HashSet::new();
        papers.retain(|p| seen.insert(p.id.clone()));

        papers.sort_by(|a, b| b.effective_date().cmp(&a.effective_date()));
        papers.truncate(limits.max_total);
        Ok(papers)
    }
}

fn parse_atom(body: &str) -> FeedResult<Vec<Paper>> {
    let feed =
        feed_rs::parser::parse(body.as_bytes()).map_err(|e| FeedError::Parse(e.to_string()))?;

    let mut papers = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        match entry_to_paper(entry) {
            Some(paper) => papers.push(paper),
            None => log::warn!("Skipping feed entry with missing fields"),
        }
    }
    Ok(papers)
}

/// Converts an Atom entry into a [`Paper`]. Entries missing an id, title,
/// abstract or submission date are dropped.
fn entry_to_paper(entry: Entry) -> Option<Paper> {
    // Entry ids look like `http://arxiv.org/abs/2401.12345v1`.
    let id = entry.id.rsplit('/').next()?.to_string();
    if id.is_empty() {
        return None;
    }

    let title = squash_whitespace(&entry.title?.content);
    let abstract_text = squash_whitespace(&entry.summary?.content);
    let published = entry.published?;

    let url = entry
        .links
        .iter()
        .find(|link| link.rel.as_deref() == Some("alternate"))
        .or_else(|| entry.links.first())
        .map(|link| link.href.clone())
        .unwrap_or_else(|| format!("https://arxiv.org/abs/{id}"));

    Some(Paper {
        id,
        title,
        abstract_text,
        categories: entry.categories.iter().map(|c| c.term.clone()).collect(),
        published,
        updated: entry.updated,
        url,
    })
}

/// Collapses runs of whitespace (arXiv wraps titles and abstracts with
/// hard newlines).
fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
