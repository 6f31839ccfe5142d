use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::InferenceError;

/// Path of the archive for a bundle name given without extension.
pub fn archive_path(workdir: &Path, name: &str) -> PathBuf {
    let file = if name.ends_with(".zip") {
        name.to_string()
    } else {
        format!("{name}.zip")
    };
    workdir.join(file)
}

/// Unpack an uploaded adapter bundle into `workdir/<name>` and return that directory.
///
/// Uses the system `unzip`; existing files are overwritten so re-running
/// with a fresh upload replaces the previous weights.
pub fn extract_archive(workdir: &Path, name: &str) -> Result<PathBuf> {
    let archive = archive_path(workdir, name);
    if !archive.is_file() {
        return Err(InferenceError::ArchiveNotFound(archive).into());
    }

    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let dest = workdir.join(stem);
    fs::create_dir_all(&dest).with_context(|| format!("Failed to create {}", dest.display()))?;

    tracing::info!(archive = %archive.display(), dest = %dest.display(), "Extracting adapter bundle");
    let output = Command::new("unzip")
        .arg("-o")
        .arg("-q")
        .arg(&archive)
        .arg("-d")
        .arg(&dest)
        .output()
        .map_err(|e| InferenceError::ExtractionFailed {
            archive: archive.clone(),
            message: format!("could not run unzip: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(InferenceError::ExtractionFailed {
            archive,
            message: format!("unzip exited with {}: {stderr}", output.status),
        }
        .into());
    }

    Ok(dest)
}

/// Find `file` in `dir` or one of its immediate subdirectories.
///
/// Bundles are usually zipped as a folder, so the weights end up one level down.
pub fn locate(dir: &Path, file: &'static str) -> Result<PathBuf> {
    let direct = dir.join(file);
    if direct.is_file() {
        return Ok(direct);
    }

    let mut subdirs: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();

    subdirs
        .into_iter()
        .map(|d| d.join(file))
        .find(|p| p.is_file())
        .ok_or_else(|| {
            InferenceError::MissingModelFile {
                dir: dir.to_path_buf(),
                file,
            }
            .into()
        })
}
