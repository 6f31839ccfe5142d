use anyhow::{Context, Result};
use harvest_model::{records_to_json, QuestionRecord};
use std::fs;
use std::path::Path;

/// Write the records of a run as a JSON array, replacing any previous file.
///
/// The array is written to a sibling `.tmp` file first and renamed into
/// place, so readers never observe a half-written file and a failed run
/// leaves the previous contents untouched. Creates the parent directory
/// if it doesn't exist.
pub fn write_records(records: &[QuestionRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let json = records_to_json(records)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);

    fs::write(tmp, &json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;

    tracing::info!(path = %path.display(), records = records.len(), bytes = json.len(), "Wrote records JSON");
    Ok(())
}

/// Cache raw HTML to a directory for archival/debugging.
///
/// Lets a page be re-examined (or a parser fixed) without re-fetching.
pub fn cache_html(dir: &Path, filename: &str, html: &str) -> Result<()> {
    fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    fs::write(&path, html)?;
    tracing::debug!(path = %path.display(), bytes = html.len(), "Cached raw HTML");
    Ok(())
}
