use std::path::PathBuf;

use harvest_model::Category;

use crate::fetch::{PoliteDelay, RetryPolicy};
use crate::stackoverflow::DEFAULT_BASE_URL;

/// Settings for one scrape run.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub category: Category,
    /// First listing page to fetch (one-based).
    pub start_page: u32,
    /// Listing pages to walk from `start_page`.
    pub pages: u32,
    /// Stop once this many records were collected.
    pub max_records: Option<usize>,
    /// Questions per listing page.
    pub page_size: u32,
    /// Answers kept per question.
    pub max_answers: usize,
    /// Site root; overridden in tests to point at a local server.
    pub base_url: String,
    /// Where the JSON array is written.
    pub output_path: PathBuf,
    /// When set, every fetched page is also saved here as raw HTML.
    pub cache_dir: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub polite: PoliteDelay,
}

impl ScrapeConfig {
    /// Defaults for a category: its page limit and output path from the category table.
    pub fn for_category(category: Category) -> Self {
        Self {
            category,
            start_page: 1,
            pages: category.default_pages(),
            max_records: None,
            page_size: 50,
            max_answers: 3,
            base_url: DEFAULT_BASE_URL.to_string(),
            output_path: PathBuf::from(category.output_path()),
            cache_dir: None,
            retry: RetryPolicy::default(),
            polite: PoliteDelay::default(),
        }
    }
}

/// Why a listing entry did not become a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The listing link could not be resolved.
    BadListingEntry(String),
    /// The question page is gone (404/410).
    NotFound(u64),
    /// The question page lacked required elements.
    Unparseable(u64),
    /// No answer met the score threshold.
    NoAnswers(u64),
    /// The question page's tags do not include the category tag.
    TagMismatch(u64),
    /// The question was already collected from an earlier listing entry.
    Duplicate(u64),
}

/// Why pagination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PageLimit,
    RecordLimit,
    EmptyPage,
}

/// Counters for one run, logged at the end and returned to the caller.
#[derive(Debug, Clone)]
pub struct ScrapeSummary {
    pub category: Category,
    pub records: usize,
    pub pages_fetched: u32,
    pub skipped: Vec<SkipReason>,
    pub stop: StopReason,
    pub output_path: PathBuf,
}
