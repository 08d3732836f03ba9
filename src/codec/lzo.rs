//! LZO1X block codec backed by the `rust-lzo` port.

use rust_lzo::{LZOContext, LZOError};
use tracing::trace;

use super::BlockCodec;
use crate::header::CompressionKind;

/// Block size the IFS loader decompresses into.
pub const LZO_BLOCK_SIZE: usize = 65536;

#[derive(Debug, Clone)]
pub struct LzoCodec {
    block_size: usize,
}

impl LzoCodec {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    /// Worst-case LZO1X output for `len` input bytes.
    fn worst_case(len: usize) -> usize {
        len + len / 16 + 64 + 3
    }

    /// Output size beyond which the compressor is considered broken.
    fn sanity_limit(len: usize) -> usize {
        len + len / 64 + 16 + 3
    }
}

impl Default for LzoCodec {
    fn default() -> Self {
        Self::new(LZO_BLOCK_SIZE)
    }
}

fn error_name(err: LZOError) -> &'static str {
    match err {
        LZOError::OK => "OK",
        LZOError::ERROR => "ERROR",
        LZOError::OUT_OF_MEMORY => "OUT_OF_MEMORY",
        LZOError::NOT_COMPRESSIBLE => "NOT_COMPRESSIBLE",
        LZOError::INPUT_OVERRUN => "INPUT_OVERRUN",
        LZOError::OUTPUT_OVERRUN => "OUTPUT_OVERRUN",
        LZOError::LOOKBEHIND_OVERRUN => "LOOKBEHIND_OVERRUN",
        LZOError::EOF_NOT_FOUND => "EOF_NOT_FOUND",
        LZOError::INPUT_NOT_CONSUMED => "INPUT_NOT_CONSUMED",
        LZOError::NOT_YET_IMPLEMENTED => "NOT_YET_IMPLEMENTED",
        LZOError::INVALID_ARGUMENT => "INVALID_ARGUMENT",
    }
}

impl BlockCodec for LzoCodec {
    fn kind(&self) -> CompressionKind {
        CompressionKind::Lzo
    }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, String> {
        if block.len() > self.block_size {
            return Err(format!(
                "block of {} bytes exceeds the {}-byte block size",
                block.len(),
                self.block_size
            ));
        }
        let mut ctx = LZOContext::new();
        let mut out = Vec::with_capacity(Self::worst_case(block.len()));
        let result = ctx.compress(block, &mut out);
        if result != LZOError::OK {
            return Err(format!("LZO error {}", error_name(result)));
        }
        if out.len() > Self::sanity_limit(block.len()) {
            return Err(format!(
                "LZO produced {} bytes for a {}-byte block",
                out.len(),
                block.len()
            ));
        }
        trace!("LZO compressed {} -> {} bytes", block.len(), out.len());
        Ok(out)
    }

    fn decompress(&self, block: &[u8], expected_len: usize) -> Result<Vec<u8>, String> {
        let mut out = vec![0u8; expected_len];
        let (written, result) = LZOContext::decompress_to_slice(block, &mut out);
        let written = written.len();
        if result != LZOError::OK {
            return Err(format!("LZO error {}", error_name(result)));
        }
        out.truncate(written);
        Ok(out)
    }

    /// The port has no `lzo1x_optimize`; the pass only checks that the block
    /// decodes back to `original`.
    fn optimize(&self, compressed: &[u8], original: &[u8]) -> bool {
        match self.decompress(compressed, original.len()) {
            Ok(round_trip) => round_trip == original,
            Err(_) => false,
        }
    }
}
