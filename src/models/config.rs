//! Run configuration loaded from the environment.

use std::env;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::paper::{FetchMode, FetchWindow};

/// Global cap applied to daily runs. Historical runs are capped by
/// `MAX_HISTORICAL_PAPERS` instead.
const DAILY_MAX_PAPERS: usize = 1000;

const DAILY_DEFAULT_CONCURRENCY: usize = 5;
const HISTORICAL_DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for environment variable {0}")]
    Invalid(&'static str),
}

/// Everything a single run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: FetchMode,
    pub fetch_days: i64,
    /// Lower bound for historical runs in years; `0` means unbounded.
    pub historical_years: i64,
    pub max_historical_papers: usize,
    pub max_papers_per_category: usize,
    pub use_parallel: bool,
    pub max_concurrent: usize,
    pub openai_api_key: String,
    pub github_token: String,
    pub target_repo: String,
    pub target_branch: String,
    pub target_path: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = match env::var("FETCH_MODE") {
            Ok(value) => value
                .parse::<FetchMode>()
                .map_err(|_| ConfigError::Invalid("FETCH_MODE"))?,
            Err(_) => FetchMode::Daily,
        };

        let max_concurrent = match env::var("MAX_CONCURRENT") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid("MAX_CONCURRENT"))?,
            Err(_) => default_concurrency(mode),
        };

        Ok(Self {
            mode,
            fetch_days: parse_or("FETCH_DAYS", 1)?,
            historical_years: parse_or("HISTORICAL_YEARS", 2)?,
            max_historical_papers: parse_or("MAX_HISTORICAL_PAPERS", 5000)?,
            max_papers_per_category: parse_or("MAX_PAPERS_PER_CATEGORY", 1000)?,
            use_parallel: match env::var("USE_PARALLEL") {
                Ok(value) => parse_bool(&value).ok_or(ConfigError::Invalid("USE_PARALLEL"))?,
                Err(_) => true,
            },
            max_concurrent,
            openai_api_key: require("OPENAI_API_KEY")?,
            github_token: require("TARGET_REPO_TOKEN")?,
            target_repo: require("TARGET_REPO_NAME")?,
            target_branch: env::var("TARGET_REPO_BRANCH").unwrap_or_else(|_| "main".to_string()),
            target_path: env::var("TARGET_REPO_PATH").unwrap_or_else(|_| "README.md".to_string()),
        })
    }

    /// The fetch window for this run, anchored at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> FetchWindow {
        match self.mode {
            FetchMode::Daily => FetchWindow::daily(self.fetch_days, now),
            FetchMode::Historical => FetchWindow::historical(self.historical_years, now),
        }
    }

    /// Global cap on the number of papers fetched per run.
    pub fn max_total(&self) -> usize {
        match self.mode {
            FetchMode::Daily => DAILY_MAX_PAPERS,
            FetchMode::Historical => self.max_historical_papers,
        }
    }
}

fn default_concurrency(mode: FetchMode) -> usize {
    match mode {
        FetchMode::Daily => DAILY_DEFAULT_CONCURRENCY,
        FetchMode::Historical => HISTORICAL_DEFAULT_CONCURRENCY,
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
