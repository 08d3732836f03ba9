//! The additive checksum used by IFS containers.
//!
//! A checksum is the wrapping sum of every complete little-endian `u32` in a
//! byte range. A stored checksum is valid when `computed + stored == 0`,
//! i.e. the stored word is the two's-complement negation of the sum.
//! Trailing bytes that do not form a whole word are ignored.
//!
//! When the stored word lies inside its own range it is left out of
//! `computed`. If it does not start on a summed-word boundary its bytes are
//! split over two summed words, so it adds `stored.rotate_left(8 * lane)`
//! rather than `stored`, where `lane` is its offset from the range start
//! modulo 4. The corrected value is rotated right by the same amount.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use std::ops::Range;
use tracing::{debug, warn};

use crate::error::{IfsError, Result};

/// Distance from the end of the block stream back to the image checksum word.
pub const IMAGE_CHECKSUM_BACKOFF: usize = 7;
/// Byte that marks the structure trailing the image checksum word.
pub const IMAGE_TRAILER_SENTINEL: u8 = 0x11;

pub fn checksum(bytes: &[u8]) -> u32 {
    bytes
        .chunks_exact(4)
        .fold(0u32, |sum, word| sum.wrapping_add(LittleEndian::read_u32(word)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChecksumKind {
    Startup,
    Image,
    Overall,
}

/// Where a checksum is computed and where its value is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumField {
    pub kind: ChecksumKind,
    pub range: Range<usize>,
    pub stored_at: usize,
}

impl ChecksumField {
    /// `[0, startup_size - 4)`, stored at `startup_size - 4`.
    pub fn startup(startup_size: usize) -> Self {
        let stored_at = startup_size.saturating_sub(4);
        Self { kind: ChecksumKind::Startup, range: 0..stored_at, stored_at }
    }

    /// `[startup_size, total_len - 4)`, stored at `stored_at`.
    ///
    /// The stored word normally lies inside the range; its own value is
    /// excluded from the sum.
    pub fn image(startup_size: usize, stored_at: usize, total_len: usize) -> Self {
        let end = total_len.saturating_sub(4).max(startup_size);
        Self { kind: ChecksumKind::Image, range: startup_size..end, stored_at }
    }

    /// `[0, total_len - 4)`, stored in the last word.
    pub fn overall(total_len: usize) -> Self {
        let stored_at = total_len.saturating_sub(4);
        Self { kind: ChecksumKind::Overall, range: 0..stored_at, stored_at }
    }

    fn check_bounds(&self, len: usize) -> Result<()> {
        if self.stored_at + 4 > len || self.range.end > len {
            return Err(IfsError::ChecksumOutOfBounds {
                kind: self.kind,
                offset: self.stored_at,
                len,
            });
        }
        Ok(())
    }

    fn covers_stored_word(&self) -> bool {
        self.range.contains(&self.stored_at)
    }

    /// Byte lane the stored word starts in, counted from the start of the
    /// range. Zero for words outside the range.
    fn lane(&self) -> u32 {
        if self.covers_stored_word() {
            ((self.stored_at - self.range.start) % 4) as u32
        } else {
            0
        }
    }

    /// What the stored word `value` adds to the range sum.
    ///
    /// A word outside the range counts as itself. A word inside it adds each
    /// byte in its lane of the summed word holding it, which for a word fully
    /// inside the summed words is `value.rotate_left(8 * lane)`. Bytes in the
    /// ignored tail add nothing.
    fn contribution(&self, value: u32) -> u32 {
        if !self.covers_stored_word() {
            return value;
        }
        let summed_end = self.range.start + self.range.len() / 4 * 4;
        value
            .to_le_bytes()
            .iter()
            .enumerate()
            .map(|(i, &b)| (self.stored_at + i, b))
            .filter(|&(at, _)| at < summed_end)
            .fold(0u32, |sum, (at, b)| {
                sum.wrapping_add(u32::from(b) << (8 * ((at - self.range.start) % 4)))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChecksumOutcome {
    pub kind: ChecksumKind,
    pub stored_at: usize,
    pub stored: u32,
    /// Sum over the range with the stored word's own bytes left out.
    pub computed: u32,
    pub valid: bool,
    /// The value that makes the field valid.
    pub corrected: u32,
    pub patched: bool,
}

/// Compute and compare without touching `buf`.
pub fn evaluate(buf: &[u8], field: &ChecksumField) -> Result<ChecksumOutcome> {
    field.check_bounds(buf.len())?;
    let stored = LittleEndian::read_u32(&buf[field.stored_at..field.stored_at + 4]);
    let mut computed = checksum(&buf[field.range.clone()]);
    if field.covers_stored_word() {
        computed = computed.wrapping_sub(field.contribution(stored));
    }
    let target = 0u32.wrapping_sub(computed);
    let outcome = ChecksumOutcome {
        kind: field.kind,
        stored_at: field.stored_at,
        stored,
        computed,
        valid: field.contribution(stored) == target,
        corrected: target.rotate_right(8 * field.lane()),
        patched: false,
    };
    debug!(
        "{:?} checksum read {:#010x} at {:#x}, calculated {:#010x} ({})",
        field.kind,
        stored,
        field.stored_at,
        outcome.corrected,
        if outcome.valid { "match" } else { "mismatch" },
    );
    Ok(outcome)
}

/// Evaluate `field` and, when it does not match, overwrite the stored word
/// with the corrected value.
///
/// `valid` in the outcome describes the buffer before patching. A word that
/// runs past the last whole summed word cannot always be corrected; that case
/// is logged at warn level.
pub fn verify_and_patch(buf: &mut [u8], field: &ChecksumField) -> Result<ChecksumOutcome> {
    let mut outcome = evaluate(buf, field)?;
    if !outcome.valid {
        LittleEndian::write_u32(&mut buf[field.stored_at..field.stored_at + 4], outcome.corrected);
        outcome.patched = true;
        if field.contribution(outcome.corrected) == 0u32.wrapping_sub(outcome.computed) {
            debug!("{:?} checksum written: {:#010x}", field.kind, outcome.corrected);
        } else {
            warn!("{:?} checksum word at {:#x} straddles the end of the summed range", field.kind, field.stored_at);
        }
    }
    Ok(outcome)
}

/// The three checksums of one container. The image checksum may be absent
/// when its location cannot be determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumSet {
    pub startup: ChecksumOutcome,
    pub image: Option<ChecksumOutcome>,
    pub overall: ChecksumOutcome,
}

impl ChecksumSet {
    pub fn all_valid(&self) -> bool {
        self.startup.valid && self.image.map_or(true, |i| i.valid) && self.overall.valid
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChecksumOutcome> {
        std::iter::once(&self.startup)
            .chain(self.image.as_ref())
            .chain(std::iter::once(&self.overall))
    }
}
