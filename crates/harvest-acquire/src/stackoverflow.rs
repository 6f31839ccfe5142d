use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://stackoverflow.com";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("page has no {0} element")]
    MissingElement(&'static str),

    #[error("listing entry '{0}' has no href")]
    MissingHref(String),

    #[error("'{0}' is not a question link")]
    BadQuestionLink(String),
}

/// One question link from a tag listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub id: u64,
    pub url: String,
    pub title: String,
}

/// The usable entries of a listing page plus the ones that could not be read.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub entries: Vec<ListingEntry>,
    pub rejected: Vec<ParseError>,
}

/// Everything taken from a single question page.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionPage {
    pub body: String,
    pub tags: Vec<String>,
    pub score: Option<i64>,
    pub answer_count: usize,
    pub answers: Vec<String>,
}

/// Build the URL of one listing page, sorted by votes.
///
/// `page` is one-based, as the site expects. A path on `base` is kept as
/// a prefix, so mirrors mounted below the root work too.
pub fn listing_url(base: &Url, tag: &str, page_size: u32, page: u32) -> String {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}/questions/tagged/{tag}"));
    url.query_pairs_mut()
        .clear()
        .append_pair("tab", "votes")
        .append_pair("pagesize", &page_size.to_string())
        .append_pair("page", &page.to_string());
    url.to_string()
}

/// Extract the question id from a `/questions/<id>/<slug>` URL.
pub fn question_id(url: &Url) -> Option<u64> {
    let mut segments = url.path_segments()?;
    segments.find(|s| *s == "questions")?;
    segments.next()?.parse().ok()
}

/// Parse a tag listing page.
///
/// Returns `MissingElement("#questions")` when the page has no listing at
/// all (past the last page, or a captcha/interstitial page). Individual
/// links that cannot be resolved are collected in `rejected`.
pub fn parse_listing(html: &str, base: &Url) -> Result<ListingPage, ParseError> {
    let document = Html::parse_document(html);

    let container_sel = Selector::parse("#questions").expect("valid selector");
    let link_sel = Selector::parse(".s-link").expect("valid selector");

    let container = document
        .select(&container_sel)
        .next()
        .ok_or(ParseError::MissingElement("#questions"))?;

    let mut page = ListingPage::default();

    for link in container.select(&link_sel) {
        let title = collapse_text(link);
        match resolve_entry(link, &title, base) {
            Ok(entry) => page.entries.push(entry),
            Err(e) => page.rejected.push(e),
        }
    }

    Ok(page)
}

fn resolve_entry(link: ElementRef, title: &str, base: &Url) -> Result<ListingEntry, ParseError> {
    let href = link
        .value()
        .attr("href")
        .ok_or_else(|| ParseError::MissingHref(title.to_string()))?;

    let url = base
        .join(href)
        .map_err(|_| ParseError::BadQuestionLink(href.to_string()))?;
    let id = question_id(&url).ok_or_else(|| ParseError::BadQuestionLink(href.to_string()))?;

    Ok(ListingEntry {
        id,
        url: url.to_string(),
        title: title.to_string(),
    })
}

/// Parse a question page, selecting up to `max_answers` answers.
///
/// Answers are taken in page order (the site sorts by score) and selection
/// stops at the first answer whose score is missing or not positive.
pub fn parse_question_page(html: &str, max_answers: usize) -> Result<QuestionPage, ParseError> {
    let document = Html::parse_document(html);

    let question_sel = Selector::parse("#question").expect("valid selector");
    let body_sel = Selector::parse(".js-post-body").expect("valid selector");
    let tag_sel = Selector::parse(".post-tag").expect("valid selector");
    let answer_sel = Selector::parse(".js-answer").expect("valid selector");

    let question = document
        .select(&question_sel)
        .next()
        .ok_or(ParseError::MissingElement("#question"))?;
    let body = question
        .select(&body_sel)
        .next()
        .ok_or(ParseError::MissingElement("#question .js-post-body"))?;

    let mut tags: Vec<String> = Vec::new();
    for tag in question.select(&tag_sel) {
        let name = collapse_text(tag);
        if !name.is_empty() && !tags.contains(&name) {
            tags.push(name);
        }
    }

    let all_answers: Vec<ElementRef> = document.select(&answer_sel).collect();
    let mut answers = Vec::new();

    for answer in &all_answers {
        if answers.len() >= max_answers {
            break;
        }
        match vote_score(*answer) {
            Some(score) if score > 0 => {}
            _ => break,
        }
        match answer.select(&body_sel).next() {
            Some(answer_body) => answers.push(answer_body.html()),
            None => tracing::debug!("Answer without a post body, skipping"),
        }
    }

    Ok(QuestionPage {
        body: body.html(),
        tags,
        score: vote_score(question),
        answer_count: all_answers.len(),
        answers,
    })
}

/// Read the vote count of a post. Newer markup uses `.js-vote-count`,
/// older markup `.fs-subheading`.
fn vote_score(post: ElementRef) -> Option<i64> {
    ["js-vote-count", "fs-subheading"].iter().find_map(|class| {
        let sel = Selector::parse(&format!(".{class}")).expect("valid selector");
        let element = post.select(&sel).next()?;
        collapse_text(element).parse().ok()
    })
}

/// Text content of an element with whitespace runs collapsed.
fn collapse_text(element: ElementRef) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse(DEFAULT_BASE_URL).unwrap()
    }

    const LISTING: &str = r#"
    <html><body>
    <div id="questions">
        <div class="s-post-summary">
            <h3><a href="/questions/11/how-to-split-data" class="s-link">How to
                split   data?</a></h3>
        </div>
        <div class="s-post-summary">
            <h3><a href="/questions/22/what-is-overfitting" class="s-link">What is overfitting?</a></h3>
        </div>
        <div class="s-post-summary">
            <h3><a class="s-link">No link</a></h3>
        </div>
        <div class="s-post-summary">
            <h3><a href="/users/5/someone" class="s-link">A user</a></h3>
        </div>
    </div>
    </body></html>
    "#;

    fn question_page(answers: &[(Option<i64>, &str)]) -> String {
        let mut html = String::from(
            r#"<html><body>
            <div id="question" class="question js-question">
                <div class="js-vote-count">17</div>
                <div class="s-prose js-post-body"><p>How do I split data?</p></div>
                <div class="post-taglist">
                    <a class="post-tag">python</a>
                    <a class="post-tag">data-science</a>
                    <a class="post-tag">python</a>
                </div>
            </div>
            <div id="answers">"#,
        );
        for (score, text) in answers {
            html.push_str(r#"<div class="answer js-answer">"#);
            if let Some(s) = score {
                html.push_str(&format!(r#"<div class="js-vote-count">{s}</div>"#));
            }
            html.push_str(&format!(
                r#"<div class="s-prose js-post-body"><p>{text}</p></div></div>"#
            ));
        }
        html.push_str("</div></body></html>");
        html
    }

    #[test]
    fn test_listing_url() {
        let url = listing_url(&base(), "data-science", 50, 3);
        assert_eq!(
            url,
            "https://stackoverflow.com/questions/tagged/data-science?tab=votes&pagesize=50&page=3"
        );
    }

    #[test]
    fn test_listing_url_keeps_base_host() {
        let base = Url::parse("http://127.0.0.1:1234").unwrap();
        let url = listing_url(&base, "machine-learning", 10, 1);
        assert_eq!(
            url,
            "http://127.0.0.1:1234/questions/tagged/machine-learning?tab=votes&pagesize=10&page=1"
        );
    }

    #[test]
    fn test_listing_url_keeps_base_path() {
        for base in ["http://127.0.0.1:1234/mirror", "http://127.0.0.1:1234/mirror/"] {
            let url = listing_url(&Url::parse(base).unwrap(), "data-science", 50, 2);
            assert_eq!(
                url,
                "http://127.0.0.1:1234/mirror/questions/tagged/data-science?tab=votes&pagesize=50&page=2"
            );
        }
    }

    #[test]
    fn test_question_id() {
        let url = Url::parse("https://stackoverflow.com/questions/4047935/a-slug").unwrap();
        assert_eq!(question_id(&url), Some(4047935));
        let url = Url::parse("https://stackoverflow.com/users/12/x").unwrap();
        assert_eq!(question_id(&url), None);
    }

    #[test]
    fn test_parse_listing() {
        let page = parse_listing(LISTING, &base()).unwrap();

        assert_eq!(page.entries.len(), 2);
        assert_eq!(
            page.entries[0],
            ListingEntry {
                id: 11,
                url: "https://stackoverflow.com/questions/11/how-to-split-data".into(),
                title: "How to split data?".into(),
            }
        );
        assert_eq!(page.entries[1].id, 22);

        assert_eq!(page.rejected.len(), 2);
        assert!(page.rejected.contains(&ParseError::MissingHref("No link".into())));
        assert!(page
            .rejected
            .contains(&ParseError::BadQuestionLink("/users/5/someone".into())));
    }

    #[test]
    fn test_parse_listing_without_container() {
        let err = parse_listing("<html><body><p>nothing</p></body></html>", &base()).unwrap_err();
        assert_eq!(err, ParseError::MissingElement("#questions"));
    }

    #[test]
    fn test_parse_listing_empty_container() {
        let page = parse_listing(r#"<div id="questions"></div>"#, &base()).unwrap();
        assert!(page.entries.is_empty());
        assert!(page.rejected.is_empty());
    }

    #[test]
    fn test_parse_question_page() {
        let html = question_page(&[(Some(30), "First"), (Some(12), "Second")]);
        let page = parse_question_page(&html, 3).unwrap();

        assert!(page.body.contains("How do I split data?"));
        assert!(page.body.starts_with("<div"));
        assert_eq!(page.tags, vec!["python", "data-science"]);
        assert_eq!(page.score, Some(17));
        assert_eq!(page.answer_count, 2);
        assert_eq!(page.answers.len(), 2);
        assert!(page.answers[0].contains("First"));
    }

    #[test]
    fn test_answers_stop_at_non_positive_score() {
        let html = question_page(&[(Some(5), "Good"), (Some(0), "Meh"), (Some(3), "Late")]);
        let page = parse_question_page(&html, 3).unwrap();
        assert_eq!(page.answers.len(), 1);
        assert_eq!(page.answer_count, 3);
    }

    #[test]
    fn test_answers_stop_at_missing_score() {
        let html = question_page(&[(None, "No score"), (Some(9), "After")]);
        let page = parse_question_page(&html, 3).unwrap();
        assert!(page.answers.is_empty());
    }

    #[test]
    fn test_answers_capped_at_max() {
        let html = question_page(&[
            (Some(40), "a"),
            (Some(30), "b"),
            (Some(20), "c"),
            (Some(10), "d"),
        ]);
        let page = parse_question_page(&html, 3).unwrap();
        assert_eq!(page.answers.len(), 3);
        assert!(page.answers[2].contains("<p>c</p>"));
    }

    #[test]
    fn test_legacy_score_class() {
        let html = r#"
        <div id="question"><div class="s-prose js-post-body"><p>Q</p></div></div>
        <div class="js-answer"><span class="fs-subheading"> 4 </span>
            <div class="s-prose js-post-body"><p>A</p></div></div>
        "#;
        let page = parse_question_page(html, 3).unwrap();
        assert_eq!(page.answers.len(), 1);
        assert_eq!(page.score, None);
    }

    #[test]
    fn test_question_without_body() {
        let html = r#"<div id="question"><p>no body</p></div>"#;
        let err = parse_question_page(html, 3).unwrap_err();
        assert_eq!(err, ParseError::MissingElement("#question .js-post-body"));
    }
}
