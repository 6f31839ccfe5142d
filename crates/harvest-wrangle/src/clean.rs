use ego_tree::NodeRef;
use regex::Regex;
use scraper::{Html, Node};
use std::ops::Deref;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Tags that survive cleaning; everything else is unwrapped to its children.
const KEPT_TAGS: [&str; 3] = ["p", "code", "a"];

/// Site banners ("Closed", "Locked", bounty notices) carry this class.
const NOTICE_CLASS: &str = "js-post-notice";

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Reduce a post body to the markup that matters for training text.
///
/// - drops post notices entirely
/// - keeps only `<p>`, `<code>` and `<a>`, unwrapping every other tag
/// - strips all attributes except `href` on links
/// - collapses whitespace runs to a single space
pub fn clean_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());

    for child in fragment.root_element().children() {
        write_node(child, &mut out);
    }

    collapse_whitespace(&out)
}

/// De-duplication key for a post: its cleaned text, NFC-normalised,
/// whitespace-collapsed and lower-cased.
pub fn question_key(html: &str) -> String {
    let cleaned = clean_html(html);
    let fragment = Html::parse_fragment(&cleaned);
    let text: String = fragment.root_element().text().collect();
    let nfc: String = text.nfc().collect();
    collapse_whitespace(&nfc).to_lowercase()
}

pub(crate) fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

fn write_node(node: NodeRef<Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => escape_text(text.deref(), out),
        Node::Element(elem) => {
            if elem.classes().any(|c| c == NOTICE_CLASS) {
                return;
            }

            let tag = elem.name();
            if !KEPT_TAGS.contains(&tag) {
                for child in node.children() {
                    write_node(child, out);
                }
                return;
            }

            out.push('<');
            out.push_str(tag);
            if tag == "a" {
                if let Some(href) = elem.attr("href") {
                    out.push_str(" href=\"");
                    escape_attr(href, out);
                    out.push('"');
                }
            }
            out.push('>');
            for child in node.children() {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        _ => {}
    }
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}
