//! Locate IFS containers inside a larger firmware blob and split it into
//! ordered segments.
//!
//! Every occurrence of the signature is a candidate. A candidate becomes a
//! container when a header's worth of bytes follows it, its header decodes,
//! and its `stored_size` fits in the rest of the blob. Candidates that start
//! inside an accepted container are ignored.
//!
//! # Segment files
//!
//! | Segment                                  | File          |
//! |------------------------------------------|---------------|
//! | bytes before the first container         | `ifs0.bin`    |
//! | container `k` (1-based)                  | `ifs{k}.ifs`  |
//! | gap or footer following container `k`    | `ifs{k+1}.bin`|
//!
//! Sorting these names as plain strings reproduces blob order as long as
//! there are fewer than ten containers.

use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{IfsError, Result};
use crate::header::{StartupHeader, HEADER_LEN, SIGNATURE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Leading,
    Container,
    Gap,
    Footer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind:  SegmentKind,
    /// Number used in the file name.
    pub index: usize,
    pub range: Range<usize>,
}

impl Segment {
    pub fn file_name(&self) -> String {
        match self.kind {
            SegmentKind::Container => format!("ifs{}.ifs", self.index),
            _                      => format!("ifs{}.bin", self.index),
        }
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Every offset where the little-endian signature occurs, overlapping
/// matches included.
pub fn find_signatures(blob: &[u8]) -> Vec<usize> {
    let needle = SIGNATURE.to_le_bytes();
    blob.windows(needle.len())
        .enumerate()
        .filter(|(_, w)| **w == needle)
        .map(|(i, _)| i)
        .collect()
}

/// Validate the candidate at `offset`, returning its span.
fn accept_candidate(blob: &[u8], offset: usize) -> Option<Range<usize>> {
    let available = blob.len() - offset;
    if available < HEADER_LEN {
        debug!("candidate at {offset:#x}: only {available} bytes left, skipped");
        return None;
    }
    let header = match StartupHeader::read_from(blob, offset) {
        Ok(h) => h,
        Err(e) => {
            debug!("candidate at {offset:#x}: {e}");
            return None;
        }
    };
    if let Err(e) = header.validate(offset, available) {
        debug!("candidate at {offset:#x}: {e}");
        return None;
    }
    Some(offset..offset + header.stored_size as usize)
}

/// Spans of all accepted containers in ascending order.
pub fn locate_containers(blob: &[u8]) -> Vec<Range<usize>> {
    let mut containers: Vec<Range<usize>> = Vec::new();
    for offset in find_signatures(blob) {
        debug!("possible IFS offset {offset:#x}");
        if containers.last().is_some_and(|c| offset < c.end) {
            debug!("candidate at {offset:#x} lies inside the previous container, skipped");
            continue;
        }
        if let Some(span) = accept_candidate(blob, offset) {
            debug!("container at {:#x}, {} bytes", span.start, span.len());
            containers.push(span);
        }
    }
    containers
}

/// Partition `blob` into ordered segments.
pub fn plan_segments(blob: &[u8]) -> Result<Vec<Segment>> {
    let containers = locate_containers(blob);
    let first = containers.first().ok_or(IfsError::NoContainersFound)?;

    let mut segments = Vec::with_capacity(containers.len() * 2 + 1);
    if first.start > 0 {
        segments.push(Segment { kind: SegmentKind::Leading, index: 0, range: 0..first.start });
    }
    for (i, span) in containers.iter().enumerate() {
        let k = i + 1;
        segments.push(Segment { kind: SegmentKind::Container, index: k, range: span.clone() });

        let (kind, end) = match containers.get(k) {
            Some(next) => (SegmentKind::Gap, next.start),
            None       => (SegmentKind::Footer, blob.len()),
        };
        if span.end < end {
            segments.push(Segment { kind, index: k + 1, range: span.end..end });
        }
    }
    Ok(segments)
}

/// Split `blob` into segment files under `out_dir`.
///
/// All segments are planned before the first file is written; nothing is
/// written when no container is found.
pub fn split_blob(blob: &[u8], out_dir: &Path) -> Result<Vec<(Segment, PathBuf)>> {
    let segments = plan_segments(blob)?;
    std::fs::create_dir_all(out_dir)?;

    let mut written = Vec::with_capacity(segments.len());
    for segment in segments {
        let path = out_dir.join(segment.file_name());
        debug!("dumping {:?} {:#x}..{:#x} to {}", segment.kind, segment.range.start, segment.range.end, path.display());
        std::fs::write(&path, &blob[segment.range.clone()])?;
        written.push((segment, path));
    }
    info!("split into {} segment files", written.len());
    Ok(written)
}

pub fn split_file(input: &Path, out_dir: &Path) -> Result<Vec<(Segment, PathBuf)>> {
    let blob = std::fs::read(input)?;
    split_blob(&blob, out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(stored: usize, fill: u8) -> Vec<u8> {
        let mut h = StartupHeader::new();
        h.startup_size = HEADER_LEN as u32;
        h.stored_size = stored as u32;
        let mut bytes = h.to_bytes().unwrap();
        bytes.resize(stored, fill);
        bytes
    }

    #[test]
    fn finds_overlapping_signatures() {
        let blob = [0xEB, 0x7E, 0xFF, 0x00, 0xEB, 0x7E, 0xFF, 0x00, 0x00];
        assert_eq!(find_signatures(&blob), vec![0, 4]);
        assert!(find_signatures(&[0xEB, 0x7E, 0xFF]).is_empty());
    }

    #[test]
    fn lead_in_containers_gaps_and_footer() {
        let mut blob = vec![1u8; 10];
        blob.extend(container(300, 2));
        blob.extend(vec![3u8; 5]);
        blob.extend(container(400, 4));
        blob.extend(vec![5u8; 7]);

        let segments = plan_segments(&blob).unwrap();
        let names: Vec<String> = segments.iter().map(Segment::file_name).collect();
        assert_eq!(names, ["ifs0.bin", "ifs1.ifs", "ifs2.bin", "ifs2.ifs", "ifs3.bin"]);
        assert_eq!(segments[0].range, 0..10);
        assert_eq!(segments[1].range, 10..310);
        assert_eq!(segments[2].range, 310..315);
        assert_eq!(segments[2].kind, SegmentKind::Gap);
        assert_eq!(segments[3].range, 315..715);
        assert_eq!(segments[4].range, 715..722);
        assert_eq!(segments[4].kind, SegmentKind::Footer);
    }

    #[test]
    fn adjacent_containers_have_no_gap() {
        let mut blob = container(300, 0);
        blob.extend(container(300, 0));
        let segments = plan_segments(&blob).unwrap();
        let names: Vec<String> = segments.iter().map(Segment::file_name).collect();
        assert_eq!(names, ["ifs1.ifs", "ifs2.ifs"]);
    }

    #[test]
    fn signature_inside_a_container_is_ignored() {
        let mut blob = container(600, 0);
        let inner = container(300, 0);
        blob[280..280 + inner.len()].copy_from_slice(&inner);
        let segments = plan_segments(&blob).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].range, 0..600);
    }

    #[test]
    fn oversized_stored_size_is_a_false_positive() {
        let mut blob = vec![0u8; 16];
        let mut bogus = container(300, 0);
        bogus[36..40].copy_from_slice(&10_000u32.to_le_bytes());
        blob.extend(bogus);
        blob.extend(container(300, 9));
        let segments = plan_segments(&blob).unwrap();
        assert_eq!(segments[0].range, 0..316);
        assert_eq!(segments[1].range, 316..616);
    }

    #[test]
    fn signature_too_close_to_the_end_is_skipped() {
        let mut blob = vec![0u8; 100];
        blob[50..54].copy_from_slice(&SIGNATURE.to_le_bytes());
        assert!(matches!(plan_segments(&blob), Err(IfsError::NoContainersFound)));
    }

    #[test]
    fn no_signature_means_no_containers() {
        assert!(matches!(plan_segments(&[0u8; 1024]), Err(IfsError::NoContainersFound)));
    }
}
