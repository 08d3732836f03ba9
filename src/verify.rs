//! Read-only checksum report for a blob that holds an IFS container.
//!
//! The container is found by scanning 4-byte aligned offsets for the
//! signature. Unlike compression, which knows where its block stream ends,
//! the image checksum word is located from the end of the container: it sits
//! four bytes before the last `0x11` byte, scanning backward from the byte
//! preceding the overall checksum.

use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::checksum::{evaluate, ChecksumField, ChecksumSet, IMAGE_TRAILER_SENTINEL};
use crate::error::{IfsError, Result};
use crate::header::{HeaderError, StartupHeader, HEADER_LEN, SIGNATURE};

#[derive(Debug, Clone, Serialize)]
pub struct ChecksumReport {
    /// Offset of the container inside the blob.
    pub offset:    usize,
    /// Length of the span the checksums were computed over.
    pub len:       usize,
    pub header:    StartupHeader,
    pub checksums: ChecksumSet,
}

/// First 4-byte aligned offset carrying the signature, with at least a full
/// header's worth of bytes behind it.
pub fn find_aligned_signature(blob: &[u8]) -> Option<usize> {
    (0..)
        .step_by(4)
        .take_while(|&offset| offset + HEADER_LEN < blob.len())
        .find(|&offset| blob[offset..offset + 4] == SIGNATURE.to_le_bytes())
}

/// Offset of the image checksum word in `container`.
pub fn locate_image_checksum(container: &[u8]) -> Option<usize> {
    let search_end = container.len().checked_sub(4)?;
    let sentinel = container[..search_end]
        .iter()
        .rposition(|&b| b == IMAGE_TRAILER_SENTINEL)?;
    sentinel.checked_sub(4)
}

/// Evaluate all three checksums of the first container in `blob`.
pub fn verify_blob(blob: &[u8]) -> Result<ChecksumReport> {
    let offset = find_aligned_signature(blob).ok_or(IfsError::NoContainersFound)?;
    let header = StartupHeader::read_from(blob, offset)?;
    debug!("container at {offset:#x}, stored size {}", header.stored_size);

    let available = blob.len() - offset;
    let stored = header.stored_size as usize;
    let len = if stored <= available {
        stored
    } else {
        warn!("stored_size {stored} runs past the end of the blob; checking {available} bytes");
        available
    };
    let container = &blob[offset..offset + len];

    let startup_size = header.startup_size as usize;
    if startup_size < 4 || startup_size > len {
        return Err(HeaderError::Implausible {
            offset,
            reason: format!("startup_size {startup_size} does not fit a {len}-byte container"),
        }
        .into());
    }

    let startup = evaluate(container, &ChecksumField::startup(startup_size))?;
    let image = match locate_image_checksum(container) {
        Some(at) if at >= startup_size => {
            Some(evaluate(container, &ChecksumField::image(startup_size, at, len))?)
        }
        _ => {
            warn!("no image trailer found; image checksum not checked");
            None
        }
    };
    let overall = evaluate(container, &ChecksumField::overall(len))?;

    let checksums = ChecksumSet { startup, image, overall };
    for outcome in checksums.iter() {
        let verdict = if outcome.valid { "match" } else { "MISMATCH" };
        info!(
            "{:?} checksum {:#010x} at {:#x}: {verdict} (expected {:#010x})",
            outcome.kind,
            outcome.stored,
            offset + outcome.stored_at,
            outcome.corrected,
        );
    }

    Ok(ChecksumReport { offset, len, header, checksums })
}

pub fn verify_file(path: &Path) -> Result<ChecksumReport> {
    let blob = std::fs::read(path)?;
    verify_blob(&blob)
}
