//! Block codec boundary.
//!
//! The transcoder never compresses anything itself: every block goes through
//! a [`BlockCodec`]. Blocks are independent of each other, so a codec must be
//! usable from several threads at once (see the `parallel` feature).

use thiserror::Error;

use crate::header::CompressionKind;

pub mod lzo;

pub use lzo::LzoCodec;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression failure in block {block}: {reason}")]
    Compression { block: usize, reason: String },
    #[error("decompression failure in block {block}: {reason}")]
    Decompression { block: usize, reason: String },
    #[error("block {block} compressed to {len} bytes, which does not fit a 16-bit frame length")]
    FrameTooLarge { block: usize, len: usize },
}

pub trait BlockCodec: Send + Sync {
    fn kind(&self) -> CompressionKind;

    /// Compress one block of at most the configured block size.
    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, String>;

    /// Decompress one frame payload. The result must not exceed
    /// `expected_len` bytes.
    fn decompress(&self, block: &[u8], expected_len: usize) -> Result<Vec<u8>, String>;

    /// Best-effort post-pass over a compressed block. `false` means the pass
    /// failed; the block is still usable.
    fn optimize(&self, _compressed: &[u8], _original: &[u8]) -> bool {
        true
    }
}
