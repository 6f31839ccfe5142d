use anyhow::{Context, Result};
use harvest_model::QuestionRecord;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use url::Url;

use crate::fetch::{HttpFetcher, PageFetcher};
use crate::output;
use crate::stackoverflow::{self, ListingEntry};
use crate::types::{ScrapeConfig, ScrapeSummary, SkipReason, StopReason};

/// Scrape one category and write its output file.
///
/// Walks the tag's listing pages in vote order, fetches every listed
/// question, and writes the collected records as a JSON array to
/// `config.output_path`, replacing prior contents. A fetch failure that
/// survives retries aborts the run before anything is written.
pub async fn scrape(config: &ScrapeConfig) -> Result<ScrapeSummary> {
    let fetcher = HttpFetcher::new(config.retry.clone(), config.polite.clone())?;
    let harvester = Harvester::new(fetcher, config)?;

    let progress = ProgressBar::new(u64::from(config.pages));
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:.bold} [{bar:30.cyan/dim}] {pos}/{len} pages {msg}")?
            .progress_chars("=>-"),
    );
    progress.set_prefix(config.category.tag());

    let (records, mut summary) = harvester.collect(&progress).await?;
    progress.finish_and_clear();

    output::write_records(&records, &config.output_path)?;
    summary.output_path = config.output_path.clone();

    tracing::info!(
        tag = config.category.tag(),
        records = summary.records,
        pages = summary.pages_fetched,
        skipped = summary.skipped.len(),
        stop = ?summary.stop,
        path = %config.output_path.display(),
        "Scrape complete"
    );

    Ok(summary)
}

/// The fetch-parse-aggregate loop, independent of the HTTP client.
pub struct Harvester<'a, F> {
    fetcher: F,
    config: &'a ScrapeConfig,
    base: Url,
}

impl<'a, F: PageFetcher> Harvester<'a, F> {
    pub fn new(fetcher: F, config: &'a ScrapeConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base URL: {}", config.base_url))?;
        Ok(Self {
            fetcher,
            config,
            base,
        })
    }

    /// Collect records until the page limit, the record limit, or an empty page.
    pub async fn collect(
        &self,
        progress: &ProgressBar,
    ) -> Result<(Vec<QuestionRecord>, ScrapeSummary)> {
        let tag = self.config.category.tag();
        let mut records: Vec<QuestionRecord> = Vec::new();
        let mut skipped = Vec::new();
        // ids already taken from an earlier listing entry
        let mut seen = HashSet::new();
        let mut pages_fetched = 0;
        let mut stop = StopReason::PageLimit;

        let first = self.config.start_page.max(1);
        let end = first.saturating_add(self.config.pages);

        'pages: for page in first..end {
            let url = stackoverflow::listing_url(&self.base, tag, self.config.page_size, page);
            tracing::info!(url = %url, page, "Fetching listing page");

            let html = self
                .fetcher
                .fetch(&url)
                .await
                .with_context(|| format!("Failed to fetch listing page {page}"))?;
            pages_fetched += 1;
            self.cache(&format!("listing_{tag}_{page}.html"), &html)?;

            let listing = match stackoverflow::parse_listing(&html, &self.base) {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::warn!(page, error = %e, "Listing page has no questions container");
                    stop = StopReason::EmptyPage;
                    break;
                }
            };
            for rejected in listing.rejected {
                tracing::warn!(page, error = %rejected, "Skipping listing entry");
                skipped.push(SkipReason::BadListingEntry(rejected.to_string()));
            }
            if listing.entries.is_empty() {
                tracing::info!(page, "Empty listing page, stopping");
                stop = StopReason::EmptyPage;
                break;
            }
            tracing::debug!(page, entries = listing.entries.len(), "Parsed listing page");

            for entry in &listing.entries {
                if self.record_limit_reached(records.len()) {
                    stop = StopReason::RecordLimit;
                    break 'pages;
                }
                if !seen.insert(entry.id) {
                    tracing::debug!(id = entry.id, page, "Question already listed, skipping");
                    skipped.push(SkipReason::Duplicate(entry.id));
                    continue;
                }
                match self.fetch_record(entry).await? {
                    Ok(record) => records.push(record),
                    Err(reason) => skipped.push(reason),
                }
            }

            progress.set_message(format!("{} records", records.len()));
            progress.inc(1);

            if self.record_limit_reached(records.len()) {
                stop = StopReason::RecordLimit;
                break;
            }
        }

        let summary = ScrapeSummary {
            category: self.config.category,
            records: records.len(),
            pages_fetched,
            skipped,
            stop,
            output_path: self.config.output_path.clone(),
        };
        Ok((records, summary))
    }

    fn record_limit_reached(&self, count: usize) -> bool {
        self.config.max_records.is_some_and(|max| count >= max)
    }

    /// Fetch and parse one question.
    ///
    /// The outer `Result` is fatal (the run aborts); the inner one is a
    /// skip that the run survives.
    async fn fetch_record(&self, entry: &ListingEntry) -> Result<Result<QuestionRecord, SkipReason>> {
        let tag = self.config.category.tag();

        let html = match self.fetcher.fetch(&entry.url).await {
            Ok(html) => html,
            Err(e) if e.is_not_found() => {
                tracing::warn!(id = entry.id, url = %entry.url, "Question page gone, skipping");
                return Ok(Err(SkipReason::NotFound(entry.id)));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to fetch question {}", entry.id));
            }
        };
        self.cache(&format!("question_{}.html", entry.id), &html)?;

        let page = match stackoverflow::parse_question_page(&html, self.config.max_answers) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(id = entry.id, error = %e, "Could not parse question page, skipping");
                return Ok(Err(SkipReason::Unparseable(entry.id)));
            }
        };

        if page.answers.is_empty() {
            tracing::debug!(id = entry.id, answers = page.answer_count, "No positively scored answers, skipping");
            return Ok(Err(SkipReason::NoAnswers(entry.id)));
        }

        let record = QuestionRecord {
            id: entry.id,
            url: entry.url.clone(),
            tag: tag.to_string(),
            title: entry.title.clone(),
            tags: page.tags,
            score: page.score,
            answer_count: page.answer_count,
            question: page.body,
            answers: page.answers,
        };

        if !record.carries_tag(tag) {
            tracing::warn!(id = entry.id, tags = ?record.tags, tag, "Question no longer carries the tag, skipping");
            return Ok(Err(SkipReason::TagMismatch(entry.id)));
        }

        tracing::debug!(id = record.id, answers = record.answers.len(), "Collected question");
        Ok(Ok(record))
    }

    fn cache(&self, filename: &str, html: &str) -> Result<()> {
        match &self.config.cache_dir {
            Some(dir) => output::cache_html(dir, filename, html),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchError, PoliteDelay, RetryPolicy};
    use async_trait::async_trait;
    use harvest_model::Category;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const BASE: &str = "https://stackoverflow.com";

    /// Serves canned pages and records every URL requested.
    struct FakeFetcher {
        pages: HashMap<String, Result<String, FetchError>>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn new() -> Self {
            Self {
                pages: HashMap::new(),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn page(mut self, url: &str, html: String) -> Self {
            self.pages.insert(url.to_string(), Ok(html));
            self
        }

        fn failing(mut self, url: &str, status: u16) -> Self {
            self.pages.insert(
                url.to_string(),
                Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                    retry_after: None,
                }),
            );
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages.get(url).cloned().unwrap_or_else(|| {
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                    retry_after: None,
                })
            })
        }
    }

    #[async_trait]
    impl<T: PageFetcher> PageFetcher for &T {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            (**self).fetch(url).await
        }
    }

    fn listing_page_url(tag: &str, page: u32) -> String {
        format!("{BASE}/questions/tagged/{tag}?tab=votes&pagesize=50&page={page}")
    }

    fn listing(ids: &[u64]) -> String {
        let mut html = String::from(r#"<html><body><div id="questions">"#);
        for id in ids {
            html.push_str(&format!(
                r#"<h3><a class="s-link" href="/questions/{id}/q-{id}">Question {id}</a></h3>"#
            ));
        }
        html.push_str("</div></body></html>");
        html
    }

    fn question(tags: &[&str], answer_scores: &[i64]) -> String {
        let mut html = String::from(
            r#"<html><body><div id="question"><div class="js-vote-count">3</div>
            <div class="s-prose js-post-body"><p>Body</p></div><div class="post-taglist">"#,
        );
        for t in tags {
            html.push_str(&format!(r#"<a class="post-tag">{t}</a>"#));
        }
        html.push_str("</div></div>");
        for s in answer_scores {
            html.push_str(&format!(
                r#"<div class="js-answer"><div class="js-vote-count">{s}</div>
                <div class="s-prose js-post-body"><p>Answer {s}</p></div></div>"#
            ));
        }
        html.push_str("</body></html>");
        html
    }

    fn question_url(id: u64) -> String {
        format!("{BASE}/questions/{id}/q-{id}")
    }

    fn config(category: Category, pages: u32) -> ScrapeConfig {
        let mut config = ScrapeConfig::for_category(category);
        config.pages = pages;
        config.retry = RetryPolicy::immediate(1);
        config.polite = PoliteDelay::none();
        config
    }

    #[tokio::test]
    async fn test_collects_until_empty_page() {
        let fetcher = FakeFetcher::new()
            .page(&listing_page_url("data-science", 1), listing(&[1, 2]))
            .page(&listing_page_url("data-science", 2), listing(&[]))
            .page(&question_url(1), question(&["data-science"], &[10, 4]))
            .page(&question_url(2), question(&["data-science", "python"], &[2]));

        let config = config(Category::DataScience, 5);
        let harvester = Harvester::new(&fetcher, &config).unwrap();
        let (records, summary) = harvester.collect(&ProgressBar::hidden()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.tag == "data-science"));
        assert_eq!(records[0].answers.len(), 2);
        assert_eq!(records[0].title, "Question 1");
        assert_eq!(records[0].score, Some(3));
        assert_eq!(summary.pages_fetched, 2);
        assert_eq!(summary.stop, StopReason::EmptyPage);
        assert!(!fetcher.requested().contains(&listing_page_url("data-science", 3)));
    }

    #[tokio::test]
    async fn test_stops_at_page_limit() {
        let fetcher = FakeFetcher::new()
            .page(&listing_page_url("machine-learning", 1), listing(&[1]))
            .page(&listing_page_url("machine-learning", 2), listing(&[2]))
            .page(&question_url(1), question(&[], &[1]))
            .page(&question_url(2), question(&[], &[1]));

        let config = config(Category::MachineLearning, 1);
        let harvester = Harvester::new(&fetcher, &config).unwrap();
        let (records, summary) = harvester.collect(&ProgressBar::hidden()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(summary.stop, StopReason::PageLimit);
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn test_stops_at_record_limit() {
        let fetcher = FakeFetcher::new()
            .page(&listing_page_url("artificial-intelligence", 1), listing(&[1, 2, 3]))
            .page(&question_url(1), question(&[], &[1]))
            .page(&question_url(2), question(&[], &[1]))
            .page(&question_url(3), question(&[], &[1]));

        let mut config = config(Category::ArtificialIntelligence, 8);
        config.max_records = Some(2);
        let harvester = Harvester::new(&fetcher, &config).unwrap();
        let (records, summary) = harvester.collect(&ProgressBar::hidden()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(summary.stop, StopReason::RecordLimit);
        assert!(!fetcher.requested().contains(&question_url(3)));
    }

    #[tokio::test]
    async fn test_skips_deleted_unanswered_and_mistagged() {
        let fetcher = FakeFetcher::new()
            .page(&listing_page_url("data-science", 1), listing(&[1, 2, 3, 4, 5]))
            .failing(&question_url(1), 404)
            .page(&question_url(2), question(&["data-science"], &[0]))
            .page(&question_url(3), question(&["statistics"], &[5]))
            .page(&question_url(4), "<html><body>captcha</body></html>".to_string())
            .page(&question_url(5), question(&["data-science"], &[5]));

        let config = config(Category::DataScience, 1);
        let harvester = Harvester::new(&fetcher, &config).unwrap();
        let (records, summary) = harvester.collect(&ProgressBar::hidden()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 5);
        assert_eq!(
            summary.skipped,
            vec![
                SkipReason::NotFound(1),
                SkipReason::NoAnswers(2),
                SkipReason::TagMismatch(3),
                SkipReason::Unparseable(4),
            ]
        );
    }

    #[tokio::test]
    async fn test_question_listed_twice_is_collected_once() {
        let fetcher = FakeFetcher::new()
            .page(&listing_page_url("data-science", 1), listing(&[1, 2]))
            .page(&listing_page_url("data-science", 2), listing(&[2, 3]))
            .page(&question_url(1), question(&["data-science"], &[4]))
            .page(&question_url(2), question(&["data-science"], &[4]))
            .page(&question_url(3), question(&["data-science"], &[4]));

        let config = config(Category::DataScience, 2);
        let harvester = Harvester::new(&fetcher, &config).unwrap();
        let (records, summary) = harvester.collect(&ProgressBar::hidden()).await.unwrap();

        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(summary.skipped, vec![SkipReason::Duplicate(2)]);
        let fetched_twice = fetcher
            .requested()
            .iter()
            .filter(|u| **u == question_url(2))
            .count();
        assert_eq!(fetched_twice, 1);
    }

    #[tokio::test]
    async fn test_start_page_offsets_listing() {
        let fetcher = FakeFetcher::new()
            .page(&listing_page_url("machine-learning", 3), listing(&[30]))
            .page(&listing_page_url("machine-learning", 4), listing(&[40]))
            .page(&question_url(30), question(&[], &[1]))
            .page(&question_url(40), question(&[], &[1]));

        let mut config = config(Category::MachineLearning, 2);
        config.start_page = 3;
        let harvester = Harvester::new(&fetcher, &config).unwrap();
        let (records, summary) = harvester.collect(&ProgressBar::hidden()).await.unwrap();

        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![30, 40]);
        assert_eq!(summary.stop, StopReason::PageLimit);
        assert!(!fetcher.requested().contains(&listing_page_url("machine-learning", 1)));
    }

    #[tokio::test]
    async fn test_zero_pages_fetches_nothing() {
        let fetcher = FakeFetcher::new();
        let config = config(Category::DataScience, 0);
        let harvester = Harvester::new(&fetcher, &config).unwrap();
        let (records, summary) = harvester.collect(&ProgressBar::hidden()).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(summary.pages_fetched, 0);
        assert!(fetcher.requested().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_fetch_error_aborts() {
        let fetcher = FakeFetcher::new()
            .page(&listing_page_url("data-science", 1), listing(&[1, 2]))
            .failing(&question_url(1), 503)
            .page(&question_url(2), question(&[], &[1]));

        let config = config(Category::DataScience, 1);
        let harvester = Harvester::new(&fetcher, &config).unwrap();
        let err = harvester.collect(&ProgressBar::hidden()).await.unwrap_err();

        assert!(err.to_string().contains("Failed to fetch question 1"));
        assert!(!fetcher.requested().contains(&question_url(2)));
    }

    #[tokio::test]
    async fn test_listing_without_container_ends_run() {
        let fetcher = FakeFetcher::new().page(
            &listing_page_url("data-science", 1),
            "<html><body>rate limited</body></html>".to_string(),
        );

        let config = config(Category::DataScience, 5);
        let harvester = Harvester::new(&fetcher, &config).unwrap();
        let (records, summary) = harvester.collect(&ProgressBar::hidden()).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(summary.stop, StopReason::EmptyPage);
    }

    #[tokio::test]
    async fn test_cache_dir_receives_pages() {
        let temp = tempfile::TempDir::new().unwrap();
        let fetcher = FakeFetcher::new()
            .page(&listing_page_url("data-science", 1), listing(&[7]))
            .page(&question_url(7), question(&[], &[1]));

        let mut config = config(Category::DataScience, 1);
        config.cache_dir = Some(temp.path().to_path_buf());
        let harvester = Harvester::new(&fetcher, &config).unwrap();
        harvester.collect(&ProgressBar::hidden()).await.unwrap();

        assert!(temp.path().join("listing_data-science_1.html").exists());
        assert!(temp.path().join("question_7.html").exists());
    }

    #[tokio::test]
    async fn test_scrape_writes_output_against_local_server() {
        let mut server = mockito::Server::new_async().await;
        let _listing = server
            .mock(
                "GET",
                mockito::Matcher::Regex(r"^/questions/tagged/data-science".to_string()),
            )
            .with_status(200)
            .with_body(listing(&[42]))
            .create_async()
            .await;
        let _question = server
            .mock("GET", "/questions/42/q-42")
            .with_status(200)
            .with_body(question(&["data-science"], &[8]))
            .create_async()
            .await;

        let temp = tempfile::TempDir::new().unwrap();
        let mut config = config(Category::DataScience, 1);
        config.base_url = server.url();
        config.output_path = temp.path().join("data").join("data_science.json");

        let summary = scrape(&config).await.unwrap();
        assert_eq!(summary.records, 1);

        let json = std::fs::read_to_string(&config.output_path).unwrap();
        let records = harvest_model::records_from_json(&json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 42);
        assert_eq!(records[0].url, format!("{}/questions/42/q-42", server.url()));
    }

    #[tokio::test]
    async fn test_scrape_failure_writes_nothing() {
        let mut server = mockito::Server::new_async().await;
        let _listing = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let temp = tempfile::TempDir::new().unwrap();
        let mut config = config(Category::MachineLearning, 2);
        config.retry = RetryPolicy::immediate(2);
        config.base_url = server.url();
        config.output_path = temp.path().join("machine_learning.json");

        assert!(scrape(&config).await.is_err());
        assert!(!config.output_path.exists());
    }
}
