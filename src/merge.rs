//! Reassemble a blob from the segment files written by the locator.
//!
//! Segment files are ordered by comparing their names as plain strings, so
//! `ifs10.ifs` sorts before `ifs2.bin`. The locator's numbering only round
//! trips for blobs with fewer than ten containers.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{IfsError, Result};

/// `ifs<digits>.bin` or `ifs<digits>.ifs`.
pub fn is_segment_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("ifs") else { return false };
    let Some((digits, ext)) = rest.split_once('.') else { return false };
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (ext == "bin" || ext == "ifs")
}

/// Segment files in `dir`, in merge order.
pub fn collect_segments(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_segment_name(name) {
                names.push(name.to_owned());
            }
        }
    }
    names.sort();
    Ok(names.into_iter().map(|n| dir.join(n)).collect())
}

/// Concatenate `paths` in the given order.
pub fn merge_segments(paths: &[PathBuf]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    debug!("{:<16}{:>14}{:>14}", "file", "offset", "size");
    for path in paths {
        let data = std::fs::read(path)?;
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        debug!("{:<16}{:>14}{:>14}", name, out.len(), data.len());
        out.extend_from_slice(&data);
    }
    Ok(out)
}

/// Merge the segment files in `dir` into `output`, returning the merged size.
pub fn merge_dir(dir: &Path, output: &Path) -> Result<usize> {
    let paths = collect_segments(dir)?;
    if paths.is_empty() {
        return Err(IfsError::NoSegmentsFound(dir.display().to_string()));
    }
    let merged = merge_segments(&paths)?;
    std::fs::write(output, &merged)?;
    info!("merged {} segments into {} ({} bytes)", paths.len(), output.display(), merged.len());
    Ok(merged.len())
}
