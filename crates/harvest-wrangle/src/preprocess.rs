//! Bag-of-words features from the combined corpus.
//!
//! Every question and answer is split into code blocks and prose, each
//! normalised separately, then counted against two vocabularies fitted
//! over the whole corpus: one for code tokens, one for words.

use anyhow::{Context, Result};
use ego_tree::NodeRef;
use regex::Regex;
use scraper::{Html, Node, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use harvest_model::{records_from_json, QuestionRecord};

use crate::clean::collapse_whitespace;

pub const DEFAULT_PREPROCESSED_DIR: &str = "data/preprocessed";
pub const DEFAULT_MAX_VOCAB_SIZE: usize = 50_000;
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

pub const BAG_OF_WORDS_FILE: &str = "bag_of_words.json";
pub const CODE_VOCABULARY_FILE: &str = "code_vocabulary.json";
pub const TEXT_VOCABULARY_FILE: &str = "text_vocabulary.json";
pub const SAMPLES_FILE: &str = "processed_samples.json";

static CODE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("code").expect("valid selector"));
static PROSE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p, a").expect("valid selector"));

static LINE_COMMENT_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)#.*$").expect("valid regex"));
static LINE_COMMENT_SLASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)//.*$").expect("valid regex"));
static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"));
static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\w\s])").expect("valid regex"));
static NOT_WORDISH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s.]").expect("valid regex"));

static CODE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|\S+").expect("valid regex"));
static WORD_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("valid regex"));

/// Literal escape sequences left behind by earlier JSON round-trips, in replacement order.
const ESCAPES: [(&str, &str); 6] = [
    ("\\\"", "\""),
    ("\\n", " "),
    ("\\t", " "),
    ("\\r", " "),
    ("\\\\", "\\"),
    ("\\/", "/"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessConfig {
    /// Most frequent terms kept per vocabulary.
    pub max_vocab_size: usize,
    /// Processed entries written out for inspection.
    pub sample_size: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_vocab_size: DEFAULT_MAX_VOCAB_SIZE,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

/// Normalised code and prose blocks of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEntry {
    pub id: u64,
    pub question_code: Vec<String>,
    pub question_text: Vec<String>,
    pub answer_code: Vec<String>,
    pub answer_text: Vec<String>,
}

/// Term counts of one record, keyed by vocabulary index. Absent indices are zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BagOfWords {
    pub id: u64,
    pub question_code: BTreeMap<usize, u32>,
    pub question_text: BTreeMap<usize, u32>,
    pub answer_code: BTreeMap<usize, u32>,
    pub answer_text: BTreeMap<usize, u32>,
}

/// How a block is split into terms before counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analyzer {
    /// Identifiers, or any other run of non-space characters.
    Code,
    /// Words of two or more word characters.
    Text,
}

impl Analyzer {
    pub fn terms(self, block: &str) -> Vec<String> {
        let lowered = block.to_lowercase();
        let pattern = match self {
            Analyzer::Code => &*CODE_TOKEN,
            Analyzer::Text => &*WORD_TOKEN,
        };
        pattern
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// Term to index map. Indices follow alphabetical term order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocabulary {
    index: BTreeMap<String, usize>,
}

impl Vocabulary {
    /// Keep the `max_size` most frequent terms across `blocks`.
    ///
    /// Frequency ties are broken alphabetically.
    pub fn fit<'a>(
        blocks: impl IntoIterator<Item = &'a str>,
        analyzer: Analyzer,
        max_size: usize,
    ) -> Self {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for block in blocks {
            for term in analyzer.terms(block) {
                *counts.entry(term).or_default() += 1;
            }
        }

        let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_size);

        let mut terms: Vec<String> = ranked.into_iter().map(|(term, _)| term).collect();
        terms.sort();
        let index = terms.into_iter().enumerate().map(|(i, term)| (term, i)).collect();
        Self { index }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, term: &str) -> Option<usize> {
        self.index.get(term).copied()
    }

    /// Summed term counts over `blocks`, ignoring terms outside the vocabulary.
    pub fn count(&self, blocks: &[String], analyzer: Analyzer) -> BTreeMap<usize, u32> {
        let mut counts = BTreeMap::new();
        for block in blocks {
            for term in analyzer.terms(block) {
                if let Some(i) = self.get(&term) {
                    *counts.entry(i).or_default() += 1;
                }
            }
        }
        counts
    }
}

/// Everything derived from one corpus.
#[derive(Debug, Clone, Default)]
pub struct Preprocessed {
    pub entries: Vec<ProcessedEntry>,
    pub code_vocabulary: Vocabulary,
    pub text_vocabulary: Vocabulary,
    pub bags: Vec<BagOfWords>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessStats {
    pub entries: usize,
    pub code_terms: usize,
    pub text_terms: usize,
    pub output_dir: PathBuf,
}

/// Undo literal JSON escape sequences; escaped line breaks and tabs become spaces.
pub fn unescape_json(text: &str) -> String {
    ESCAPES
        .iter()
        .fold(text.to_string(), |acc, &(escaped, plain)| acc.replace(escaped, plain))
}

/// Unescape and collapse whitespace. Entities are decoded later by the HTML parser.
pub fn clean_text(text: &str) -> String {
    collapse_whitespace(&unescape_json(text))
}

/// Split post HTML into code blocks and prose blocks.
///
/// Code blocks are the trimmed text of each non-empty `<code>`. Prose blocks
/// are the text of every `<p>` and `<a>` with code left out, so a link inside
/// a paragraph appears in both.
pub fn extract_code_and_text(html: &str) -> (Vec<String>, Vec<String>) {
    let fragment = Html::parse_fragment(html);

    let code = fragment
        .select(&CODE)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let text = fragment
        .select(&PROSE)
        .filter_map(|el| {
            let mut parts = Vec::new();
            text_outside_code(*el, &mut parts);
            (!parts.is_empty()).then(|| parts.join(" "))
        })
        .collect();

    (code, text)
}

fn text_outside_code(node: NodeRef<Node>, parts: &mut Vec<String>) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    parts.push(text.to_string());
                }
            }
            Node::Element(elem) if elem.name() == "code" => {}
            Node::Element(_) => text_outside_code(child, parts),
            _ => {}
        }
    }
}

/// Strip `#`, `//` and `/* */` comments and space out punctuation.
pub fn preprocess_code(code: &str) -> String {
    let code = unescape_json(code);
    let code = LINE_COMMENT_HASH.replace_all(&code, "");
    let code = LINE_COMMENT_SLASH.replace_all(&code, "");
    let code = BLOCK_COMMENT.replace_all(&code, "");
    let code = PUNCTUATION.replace_all(&code, " $1 ");
    collapse_whitespace(&code)
}

/// Lowercase and keep only ASCII letters, digits and periods.
pub fn preprocess_text(text: &str) -> String {
    let text = unescape_json(text).to_lowercase();
    collapse_whitespace(&NOT_WORDISH.replace_all(&text, " "))
}

pub fn process_record(record: &QuestionRecord) -> ProcessedEntry {
    let mut entry = ProcessedEntry {
        id: record.id,
        ..ProcessedEntry::default()
    };

    let (code, text) = extract_code_and_text(&clean_text(&record.question));
    entry.question_code = code.iter().map(|c| preprocess_code(c)).collect();
    entry.question_text = text.iter().map(|t| preprocess_text(t)).collect();

    for answer in &record.answers {
        let (code, text) = extract_code_and_text(&clean_text(answer));
        entry.answer_code.extend(code.iter().map(|c| preprocess_code(c)));
        entry.answer_text.extend(text.iter().map(|t| preprocess_text(t)));
    }

    entry
}

/// Process records, fit both vocabularies, and count every entry against them.
pub fn preprocess_records(records: &[QuestionRecord], config: &PreprocessConfig) -> Preprocessed {
    let entries: Vec<ProcessedEntry> = records.iter().map(process_record).collect();

    let code_vocabulary = Vocabulary::fit(
        entries
            .iter()
            .flat_map(|e| e.question_code.iter().chain(&e.answer_code))
            .map(String::as_str),
        Analyzer::Code,
        config.max_vocab_size,
    );
    let text_vocabulary = Vocabulary::fit(
        entries
            .iter()
            .flat_map(|e| e.question_text.iter().chain(&e.answer_text))
            .map(String::as_str),
        Analyzer::Text,
        config.max_vocab_size,
    );

    let bags = entries
        .iter()
        .map(|e| BagOfWords {
            id: e.id,
            question_code: code_vocabulary.count(&e.question_code, Analyzer::Code),
            question_text: text_vocabulary.count(&e.question_text, Analyzer::Text),
            answer_code: code_vocabulary.count(&e.answer_code, Analyzer::Code),
            answer_text: text_vocabulary.count(&e.answer_text, Analyzer::Text),
        })
        .collect();

    Preprocessed {
        entries,
        code_vocabulary,
        text_vocabulary,
        bags,
    }
}

/// Read the combined corpus and write bag-of-words features, both
/// vocabularies and a few processed samples into `output_dir`.
pub fn preprocess(
    input_file: &str,
    output_dir: &Path,
    config: &PreprocessConfig,
) -> Result<PreprocessStats> {
    let text = fs::read_to_string(input_file)
        .with_context(|| format!("Failed to read {input_file}"))?;
    let records = records_from_json(&text)
        .with_context(|| format!("Failed to parse {input_file}"))?;
    tracing::info!(path = %input_file, records = records.len(), "Loaded corpus");

    let processed = preprocess_records(&records, config);

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let samples = &processed.entries[..processed.entries.len().min(config.sample_size)];
    write_json(&output_dir.join(BAG_OF_WORDS_FILE), &processed.bags)?;
    write_json(&output_dir.join(CODE_VOCABULARY_FILE), &processed.code_vocabulary)?;
    write_json(&output_dir.join(TEXT_VOCABULARY_FILE), &processed.text_vocabulary)?;
    write_json(&output_dir.join(SAMPLES_FILE), samples)?;

    let stats = PreprocessStats {
        entries: processed.entries.len(),
        code_terms: processed.code_vocabulary.len(),
        text_terms: processed.text_vocabulary.len(),
        output_dir: output_dir.to_path_buf(),
    };
    tracing::info!(
        dir = %output_dir.display(),
        entries = stats.entries,
        code_terms = stats.code_terms,
        text_terms = stats.text_terms,
        "Wrote bag-of-words features"
    );
    Ok(stats)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
