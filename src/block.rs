//! Length-prefixed block stream.
//!
//! ```text
//! [len: u16 BE][len bytes] [len: u16 BE][len bytes] ... [0x0000]
//! ```
//!
//! The stream starts at `startup_size`. A zero length ends it; writers never
//! emit that terminator themselves and rely on the zero-filled tail of the
//! `stored_size` buffer instead.

use byteorder::{BigEndian, ByteOrder};
use tracing::{trace, warn};

use crate::codec::{BlockCodec, CodecError};
use crate::error::{IfsError, Result};

/// Largest uncompressed block the loader accepts.
pub const MAX_BLOCK_SIZE: usize = 65536;
/// Size of the big-endian length in front of every frame.
pub const FRAME_PREFIX_LEN: usize = 2;

/// Number of frames `payload_len` bytes are cut into.
pub fn frame_count(payload_len: usize, block_size: usize) -> usize {
    payload_len.div_ceil(block_size)
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Appends frames into a pre-sized output buffer.
pub struct FrameWriter<'a> {
    out:    &'a mut [u8],
    pos:    usize,
    frames: usize,
}

impl<'a> FrameWriter<'a> {
    pub fn new(out: &'a mut [u8], start: usize) -> Self {
        Self { out, pos: start, frames: 0 }
    }

    pub fn push(&mut self, payload: &[u8]) -> Result<()> {
        let len = u16::try_from(payload.len()).map_err(|_| CodecError::FrameTooLarge {
            block: self.frames,
            len:   payload.len(),
        })?;
        let end = self.pos + FRAME_PREFIX_LEN + payload.len();
        if end > self.out.len() {
            return Err(IfsError::StoredSizeExceeded { needed: end, stored_size: self.out.len() });
        }
        BigEndian::write_u16(&mut self.out[self.pos..self.pos + FRAME_PREFIX_LEN], len);
        self.out[self.pos + FRAME_PREFIX_LEN..end].copy_from_slice(payload);
        trace!("frame {} at {:#x}: {} bytes", self.frames, self.pos, payload.len());
        self.pos = end;
        self.frames += 1;
        Ok(())
    }

    /// Offset just past the last frame written.
    pub fn position(&self) -> usize { self.pos }

    pub fn frames(&self) -> usize { self.frames }
}

// ── Reader ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Offset of the length prefix.
    pub offset:  usize,
    pub payload: &'a [u8],
}

/// Iterates the frames of a block stream up to the zero terminator.
pub struct FrameReader<'a> {
    buf:  &'a [u8],
    pos:  usize,
    done: bool,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8], start: usize) -> Self {
        Self { buf, pos: start, done: false }
    }

    /// Offset of the next length prefix, or of the terminator once the
    /// iterator is exhausted.
    pub fn position(&self) -> usize { self.pos }

    fn truncated(&mut self, offset: usize, needed: usize) -> Option<Result<Frame<'a>>> {
        self.done = true;
        Some(Err(IfsError::TruncatedStream {
            offset,
            needed,
            available: self.buf.len().saturating_sub(offset),
        }))
    }
}

impl<'a> Iterator for FrameReader<'a> {
    type Item = Result<Frame<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let offset = self.pos;
        if offset + FRAME_PREFIX_LEN > self.buf.len() {
            return self.truncated(offset, FRAME_PREFIX_LEN);
        }
        let len = BigEndian::read_u16(&self.buf[offset..offset + FRAME_PREFIX_LEN]) as usize;
        if len == 0 {
            self.done = true;
            return None;
        }
        let start = offset + FRAME_PREFIX_LEN;
        if start + len > self.buf.len() {
            return self.truncated(offset, FRAME_PREFIX_LEN + len);
        }
        self.pos = start + len;
        Some(Ok(Frame { offset, payload: &self.buf[start..start + len] }))
    }
}

// ── Block compression ────────────────────────────────────────────────────────

fn compress_one<C: BlockCodec + ?Sized>(
    index:    usize,
    chunk:    &[u8],
    codec:    &C,
    optimize: bool,
) -> std::result::Result<Vec<u8>, CodecError> {
    let packed = codec
        .compress(chunk)
        .map_err(|reason| CodecError::Compression { block: index, reason })?;
    if optimize && !codec.optimize(&packed, chunk) {
        warn!("optimize pass failed for block {index}");
    }
    trace!("block {index}: {} -> {} bytes", chunk.len(), packed.len());
    Ok(packed)
}

/// Compress `payload` in `block_size` pieces, returning one compressed block
/// per piece in source order.
///
/// With the `parallel` feature the pieces are compressed on the Rayon pool;
/// the first failing block aborts the whole call either way.
pub fn compress_blocks<C: BlockCodec + ?Sized>(
    payload:    &[u8],
    block_size: usize,
    codec:      &C,
    optimize:   bool,
) -> std::result::Result<Vec<Vec<u8>>, CodecError> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        let chunks: Vec<&[u8]> = payload.chunks(block_size).collect();
        chunks
            .par_iter()
            .enumerate()
            .map(|(i, chunk)| compress_one(i, chunk, codec, optimize))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        payload
            .chunks(block_size)
            .enumerate()
            .map(|(i, chunk)| compress_one(i, chunk, codec, optimize))
            .collect()
    }
}
