use anyhow::{Context, Result};
use harvest_model::{records_from_json, Category, QuestionRecord};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("record {id} has tag '{found}', expected '{expected}'")]
    TagMismatch {
        id: u64,
        found: String,
        expected: String,
    },

    #[error("record {id} lists tags {tags:?} which do not include '{expected}'")]
    PageTagsMismatch {
        id: u64,
        tags: Vec<String>,
        expected: String,
    },

    #[error("duplicate record id: {0}")]
    DuplicateId(u64),

    #[error("record {0} has an empty question body")]
    EmptyQuestion(u64),

    #[error("record {0} has no answers")]
    NoAnswers(u64),
}

/// Validate a scraped category file.
///
/// Fails if the file cannot be read or parsed as a record array, or if any
/// record breaks a rule checked by [`validate_records`].
pub fn validate_file(file_path: &str, category: Category) -> Result<()> {
    let contents =
        std::fs::read_to_string(file_path).with_context(|| format!("Failed to read {file_path}"))?;
    let records = records_from_json(&contents)
        .with_context(|| format!("{file_path} is not a JSON array of question records"))?;

    let errors = validate_records(&records, category);
    if !errors.is_empty() {
        anyhow::bail!("{} validation errors in {file_path}", errors.len());
    }

    tracing::info!(path = %file_path, records = records.len(), tag = category.tag(), "Category file is valid");
    Ok(())
}

/// Check records against the rules for `category`.
///
/// Every record must carry the category's tag (both the scrape tag and,
/// when present, the page's own tag list), ids must be unique, and each
/// record needs a question body and at least one answer.
pub fn validate_records(records: &[QuestionRecord], category: Category) -> Vec<ValidationError> {
    let expected = category.tag();
    let mut errors = Vec::new();
    let mut seen_ids = HashSet::new();

    for record in records {
        if record.tag != expected {
            errors.push(ValidationError::TagMismatch {
                id: record.id,
                found: record.tag.clone(),
                expected: expected.to_string(),
            });
        } else if !record.carries_tag(expected) {
            errors.push(ValidationError::PageTagsMismatch {
                id: record.id,
                tags: record.tags.clone(),
                expected: expected.to_string(),
            });
        }

        if !seen_ids.insert(record.id) {
            errors.push(ValidationError::DuplicateId(record.id));
        }
        if record.question.trim().is_empty() {
            errors.push(ValidationError::EmptyQuestion(record.id));
        }
        if record.answers.is_empty() {
            errors.push(ValidationError::NoAnswers(record.id));
        }
    }

    for e in &errors {
        tracing::warn!("{e}");
    }

    errors
}
