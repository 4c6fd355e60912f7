//! The persisted markdown listing: strict parsing, deduplication and the
//! reverse-chronological merge.
//!
//! Entries live between two marker comments so the rest of the README stays
//! untouched:
//!
//! ```text
//! <!-- papers:begin -->
//! - [Title](https://arxiv.org/abs/2401.12345v1) (2024-01-15): short description
//! <!-- papers:end -->
//! ```
//!
//! The entry line is a wire contract: identifier extraction for dedup relies
//! on it, so it must stay stable across runs.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;

use crate::domain::paper::Paper;

pub const SECTION_BEGIN: &str = "<!-- papers:begin -->";
pub const SECTION_END: &str = "<!-- papers:end -->";

/// Rendered descriptions are cut to this many characters.
const DESCRIPTION_LIMIT: usize = 200;

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^- \[(?P<title>.+)\]\((?P<url>https?://arxiv\.org/abs/(?P<id>[^)\s]+))\) \((?P<date>\d{4}-\d{2}-\d{2})\): (?P<description>.*)$",
    )
    .expect("entry regex is valid")
});

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed listing entry at line {line}: {text:?}")]
    MalformedEntry { line: usize, text: String },
    #[error("listing section is opened but never closed")]
    UnterminatedSection,
    #[error("listing section end marker appears without a begin marker")]
    UnexpectedEndMarker,
}

/// One rendered line of the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEntry {
    pub id: String,
    pub title: String,
    pub url: String,
    pub description: String,
    /// Day granularity: the granularity the listing renders, and therefore
    /// the granularity the merge orders by.
    pub date: NaiveDate,
}

impl PublishedEntry {
    pub fn from_paper(paper: &Paper) -> Self {
        Self {
            id: paper.id.clone(),
            title: single_line(&paper.title),
            url: paper.url.clone(),
            description: truncate(&single_line(&paper.abstract_text), DESCRIPTION_LIMIT),
            date: paper.effective_date().date_naive(),
        }
    }

    fn render(&self) -> String {
        format!(
            "- [{}]({}) ({}): {}",
            self.title,
            self.url,
            self.date.format("%Y-%m-%d"),
            self.description
        )
    }
}

/// The whole persisted document: everything around the listing section is
/// preserved verbatim.
#[derive(Debug, Clone)]
pub struct Document {
    preamble: String,
    entries: Vec<PublishedEntry>,
    postamble: String,
    has_section: bool,
}

impl Document {
    /// A document that does not exist yet.
    pub fn empty() -> Self {
        Self {
            preamble: String::new(),
            entries: Vec::new(),
            postamble: String::new(),
            has_section: false,
        }
    }

    /// Parses the persisted document. A document without markers simply has
    /// no listing yet; a marked section containing anything but entry lines
    /// and blank lines is an error, because a silently misparsed listing
    /// would wipe the dedup index and re-publish everything.
    pub fn parse(content: &str) -> Result<Self, DocumentError> {
        let Some(begin) = content.find(SECTION_BEGIN) else {
            if content.contains(SECTION_END) {
                return Err(DocumentError::UnexpectedEndMarker);
            }
            return Ok(Self {
                preamble: content.to_string(),
                entries: Vec::new(),
                postamble: String::new(),
                has_section: false,
            });
        };

        let after_begin = &content[begin + SECTION_BEGIN.len()..];
        let end = after_begin
            .find(SECTION_END)
            .ok_or(DocumentError::UnterminatedSection)?;

        let preamble = content[..begin].to_string();
        let body = &after_begin[..end];
        let postamble = after_begin[end + SECTION_END.len()..].to_string();

        // Lines inside the section are numbered relative to the whole file.
        let base_line = preamble.lines().count() + 1;
        let mut entries = Vec::new();
        for (offset, line) in body.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_entry(line).ok_or_else(|| DocumentError::MalformedEntry {
                line: base_line + offset,
                text: line.to_string(),
            })?);
        }

        Ok(Self {
            preamble,
            entries,
            postamble,
            has_section: true,
        })
    }

    pub fn entries(&self) -> &[PublishedEntry] {
        &self.entries
    }

    /// Inserts approved papers while preserving the newest-first invariant.
    /// Incoming papers are ordered by (date desc, id desc); at equal dates
    /// existing entries keep precedence over new ones.
    pub fn merge(&mut self, papers: &[Paper]) {
        let mut incoming: Vec<PublishedEntry> =
            papers.iter().map(PublishedEntry::from_paper).collect();
        incoming.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)));

        let existing = std::mem::take(&mut self.entries);
        let mut merged = Vec::with_capacity(existing.len() + incoming.len());
        let mut incoming = incoming.into_iter().peekable();

        for entry in existing {
            while incoming
                .peek()
                .is_some_and(|candidate| candidate.date > entry.date)
            {
                merged.extend(incoming.next());
            }
            merged.push(entry);
        }
        merged.extend(incoming);

        self.entries = merged;
    }

    /// Re-renders the document. When the file never contained a listing
    /// section one is appended at the end, under its own heading.
    pub fn render(&self) -> String {
        if !self.has_section && self.entries.is_empty() {
            return self.preamble.clone();
        }

        let mut out = String::new();
        out.push_str(&self.preamble);

        if !self.has_section {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("## Papers\n\n");
        }

        out.push_str(SECTION_BEGIN);
        out.push('\n');
        for entry in &self.entries {
            out.push_str(&entry.render());
            out.push('\n');
        }
        out.push_str(SECTION_END);

        if self.has_section {
            out.push_str(&self.postamble);
        } else {
            out.push('\n');
        }
        out
    }
}

/// Identifiers already present in the listing. Built once per run, grows as
/// entries are accepted, never shrinks.
#[derive(Debug, Default)]
pub struct DedupIndex {
    ids: HashSet<String>,
}

impl DedupIndex {
    pub fn from_document(document: &Document) -> Self {
        Self {
            ids: document
                .entries()
                .iter()
                .map(|entry| entry.id.clone())
                .collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false when the id was already present.
    pub fn insert(&mut self, id: String) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn parse_entry(line: &str) -> Option<PublishedEntry> {
    let caps = ENTRY_RE.captures(line.trim_end())?;
    let date = NaiveDate::parse_from_str(&caps["date"], "%Y-%m-%d").ok()?;
    Some(PublishedEntry {
        id: caps["id"].to_string(),
        title: caps["title"].to_string(),
        url: caps["url"].to_string(),
        description: caps["description"].to_string(),
        date,
    })
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.push_str("...");
    cut
}
