use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

/// A paper fetched from the arXiv catalog. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Paper {
    /// Stable arXiv identifier including the version suffix, e.g. `2401.12345v2`.
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub categories: Vec<String>,
    pub published: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
    pub url: String,
}

impl Paper {
    /// The timestamp used for windowing and listing order: the update time
    /// when present, the submission time otherwise. A revised older paper can
    /// therefore still surface under daily semantics.
    pub fn effective_date(&self) -> DateTime<Utc> {
        self.updated.unwrap_or(self.published)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Daily,
    Historical,
}

impl FromStr for FetchMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(FetchMode::Daily),
            "historical" => Ok(FetchMode::Historical),
            _ => Err(()),
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Daily => write!(f, "daily"),
            FetchMode::Historical => write!(f, "historical"),
        }
    }
}

/// The date range a single run is interested in. Created per run and
/// discarded afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchWindow {
    pub mode: FetchMode,
    /// Lower bound; `None` means unbounded (historical runs only).
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// Window covering the last `days` days up to `now`.
    pub fn daily(days: i64, now: DateTime<Utc>) -> Self {
        Self {
            mode: FetchMode::Daily,
            start: Some(now - Duration::days(days)),
            end: now,
        }
    }

    /// Window covering the last `years` years up to `now`. `years == 0`
    /// means unbounded below.
    pub fn historical(years: i64, now: DateTime<Utc>) -> Self {
        let start = (years > 0).then(|| now - Duration::days(years * 365));
        Self {
            mode: FetchMode::Historical,
            start,
            end: now,
        }
    }

    /// Whether a paper's effective date falls inside the window. Both
    /// boundaries are inclusive.
    pub fn matches(&self, paper: &Paper) -> bool {
        let date = paper.effective_date();
        date <= self.end && self.start.is_none_or(|start| date >= start)
    }
}
