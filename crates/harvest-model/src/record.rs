use serde::{Deserialize, Serialize};

/// One scraped Stack Overflow question with its top answers.
///
/// Records are created once during a scrape run and never mutated; a
/// category file is a JSON array of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionRecord {
    /// Stack Overflow question id, taken from the `/questions/<id>/...` link.
    pub id: u64,
    /// Absolute URL of the question page.
    pub url: String,
    /// Site tag the record was scraped under (e.g., "data-science").
    pub tag: String,
    /// Question title as shown in the listing.
    pub title: String,
    /// Tags listed on the question page.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Question vote count, if the page showed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    /// Number of answers present on the question page.
    #[serde(default)]
    pub answer_count: usize,
    /// Outer HTML of the question body.
    pub question: String,
    /// Outer HTML of the selected answers, highest voted first.
    pub answers: Vec<String>,
}

impl QuestionRecord {
    /// Whether the page's tag list (when present) includes `tag`.
    ///
    /// Records scraped from pages that did not expose a tag list are
    /// assumed to match the tag they were listed under.
    pub fn carries_tag(&self, tag: &str) -> bool {
        self.tags.is_empty() || self.tags.iter().any(|t| t == tag)
    }
}

/// Parse a category file (a JSON array of records).
pub fn records_from_json(json: &str) -> serde_json::Result<Vec<QuestionRecord>> {
    serde_json::from_str(json)
}

/// Serialise records as a pretty-printed JSON array.
pub fn records_to_json(records: &[QuestionRecord]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(records)
}
