//! Acquisition of tagged Stack Overflow questions.
//!
//! `scrape` is the entry point: it pages through a tag listing through a
//! [`fetch::PageFetcher`], extracts records with the selectors in
//! [`stackoverflow`], and writes the category file via [`output`].

pub mod fetch;
pub mod output;
pub mod scrape;
pub mod stackoverflow;
pub mod types;

pub use fetch::{FetchError, HttpFetcher, PageFetcher, PoliteDelay, RetryPolicy};
pub use scrape::{scrape, Harvester};
pub use types::{ScrapeConfig, ScrapeSummary, SkipReason, StopReason};
