use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use harvest_model::{records_from_json, records_to_json, QuestionRecord};

pub mod clean;
pub mod preprocess;

pub use clean::{clean_html, question_key};
pub use preprocess::{preprocess, PreprocessConfig, PreprocessStats};

pub const DEFAULT_COMBINED_PATH: &str = "data/combined_data.json";

/// Where a record sat in its input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub index: usize,
}

/// Records sharing one question key: the one kept and the ones dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub kept: Location,
    pub dropped: Vec<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCounts {
    pub file: String,
    pub read: usize,
    pub kept: usize,
}

/// Outcome of combining category files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombineStats {
    pub files: Vec<FileCounts>,
    pub total_read: usize,
    pub unique: usize,
    pub duplicates_removed: usize,
    pub duplicate_groups: Vec<DuplicateGroup>,
}

/// Combine category files into one de-duplicated, cleaned corpus.
///
/// Reads each input (a JSON array of records), cleans question and answer
/// HTML, keeps the first record for every question key across all files,
/// and writes the combined array to `output_file`.
pub fn combine(input_files: &[String], output_file: &str) -> Result<CombineStats> {
    let mut inputs = Vec::with_capacity(input_files.len());
    for file in input_files {
        let text = fs::read_to_string(file).with_context(|| format!("Failed to read {file}"))?;
        let records = records_from_json(&text).with_context(|| format!("Failed to parse {file}"))?;
        tracing::info!(path = %file, records = records.len(), "Loaded category file");
        inputs.push((file.clone(), records));
    }

    let (combined, stats) = combine_records(inputs);

    let output = Path::new(output_file);
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = records_to_json(&combined)?;
    fs::write(output, &json).with_context(|| format!("Failed to write {output_file}"))?;
    tracing::info!(
        path = %output_file,
        unique = stats.unique,
        duplicates = stats.duplicates_removed,
        "Wrote combined corpus"
    );

    Ok(stats)
}

/// Clean and de-duplicate already-loaded records, preserving input order.
pub fn combine_records(
    inputs: Vec<(String, Vec<QuestionRecord>)>,
) -> (Vec<QuestionRecord>, CombineStats) {
    let mut combined = Vec::new();
    let mut stats = CombineStats::default();
    // question key -> location of the record that was kept
    let mut seen: HashMap<String, Location> = HashMap::new();
    // question key -> index into stats.duplicate_groups
    let mut groups: HashMap<String, usize> = HashMap::new();

    for (file, records) in inputs {
        let mut counts = FileCounts {
            file: file.clone(),
            read: records.len(),
            kept: 0,
        };

        for (index, record) in records.into_iter().enumerate() {
            let record = clean_record(record);
            let key = question_key(&record.question);
            let here = Location {
                file: file.clone(),
                index,
            };

            match seen.get(&key) {
                Some(first) => {
                    tracing::debug!(file = %file, index, id = record.id, "Duplicate question");
                    let group = *groups.entry(key).or_insert_with(|| {
                        stats.duplicate_groups.push(DuplicateGroup {
                            kept: first.clone(),
                            dropped: Vec::new(),
                        });
                        stats.duplicate_groups.len() - 1
                    });
                    stats.duplicate_groups[group].dropped.push(here);
                }
                None => {
                    seen.insert(key, here);
                    combined.push(record);
                    counts.kept += 1;
                }
            }
        }

        stats.total_read += counts.read;
        stats.files.push(counts);
    }

    stats.unique = combined.len();
    stats.duplicates_removed = stats.total_read - stats.unique;
    (combined, stats)
}

fn clean_record(mut record: QuestionRecord) -> QuestionRecord {
    record.question = clean_html(&record.question);
    record.answers = record.answers.iter().map(|a| clean_html(a)).collect();
    record
}

impl CombineStats {
    /// Human-readable duplicate removal report.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Duplicate Removal Report ===");
        let _ = writeln!(out);
        let _ = writeln!(out, "Records per file (read / kept):");
        for f in &self.files {
            let _ = writeln!(out, "  {}: {} / {}", file_name(&f.file), f.read, f.kept);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Total records read: {}", self.total_read);
        let _ = writeln!(out, "Unique records: {}", self.unique);
        let _ = writeln!(out, "Duplicates removed: {}", self.duplicates_removed);

        if !self.duplicate_groups.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Duplicate question groups:");
            for group in &self.duplicate_groups {
                let _ = writeln!(
                    out,
                    "  kept index {} in {}",
                    group.kept.index,
                    file_name(&group.kept.file)
                );
                for d in &group.dropped {
                    let _ = writeln!(out, "    - dropped index {} in {}", d.index, file_name(&d.file));
                }
            }
        }
        out
    }
}

fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}
