//! Compress and decompress whole IFS containers.
//!
//! # Compress
//! The startup stub `[0, startup_size)` is copied (header re-encoded), the
//! rest of the input is cut into blocks of at most 64 KiB, each block is run
//! through the [`BlockCodec`] and written as a length-prefixed frame. The
//! output buffer is exactly `stored_size` bytes and zero-filled, so the
//! unused tail reads as the stream terminator. Finally the startup, image
//! and overall checksums are patched, in that order.
//!
//! # Decompress
//! The stub is copied and frames are decoded until a zero length prefix,
//! filling a buffer of `startup_size + imagefs_size` bytes.

use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::block::{compress_blocks, FrameReader, FrameWriter, FRAME_PREFIX_LEN, MAX_BLOCK_SIZE};
use crate::checksum::{
    checksum, verify_and_patch, ChecksumField, ChecksumSet, IMAGE_CHECKSUM_BACKOFF,
};
use crate::codec::{BlockCodec, CodecError};
use crate::error::{IfsError, Result};
use crate::header::{HeaderError, StartupHeader};

/// Options for [`compress_image`] and [`decompress_image`].
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    /// Run the codec's optimize pass on every compressed block.
    pub optimize:   bool,
    /// Uncompressed bytes per frame, at most [`MAX_BLOCK_SIZE`].
    pub block_size: usize,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self { optimize: false, block_size: MAX_BLOCK_SIZE }
    }
}

impl TranscodeOptions {
    fn effective_block_size(&self) -> usize {
        self.block_size.clamp(1, MAX_BLOCK_SIZE)
    }
}

/// Result of [`compress_image`].
#[derive(Debug, Clone)]
pub struct CompressedImage {
    /// The container, exactly `stored_size` bytes.
    pub bytes:      Vec<u8>,
    pub frames:     usize,
    /// Offset just past the last frame.
    pub stream_end: usize,
    pub checksums:  ChecksumSet,
}

/// Result of [`decompress_image`].
#[derive(Debug, Clone)]
pub struct DecompressedImage {
    /// The container, exactly `startup_size + imagefs_size` bytes.
    pub bytes:    Vec<u8>,
    pub frames:   usize,
    /// Bytes actually produced by the frames, stub included.
    pub filled:   usize,
}

/// Header parse for whole-file operations: a buffer shorter than the header
/// is `InputTooShort`.
fn parse_header(input: &[u8]) -> Result<StartupHeader> {
    let header = StartupHeader::read_from(input, 0).map_err(|e| match e {
        HeaderError::TooShort { needed, .. } => IfsError::InputTooShort { len: input.len(), needed },
        other => other.into(),
    })?;
    debug!(
        "signature {:#010x} version {} compression {} stored size {} (uncompressed {})",
        header.signature,
        header.version,
        header.compression().name(),
        header.stored_size,
        header.imagefs_size,
    );
    Ok(header)
}

fn check_startup(header: &StartupHeader, input_len: usize) -> Result<usize> {
    header.check_startup_size(0)?;
    let startup = header.startup_size as usize;
    if startup > input_len {
        return Err(IfsError::InputTooShort { len: input_len, needed: startup });
    }
    Ok(startup)
}

/// Re-encode the container in `input` as an LZO-style block stream.
///
/// `progress` is called after every framed block with
/// `(input bytes consumed, input length)`.
pub fn compress_image<C, F>(
    input:        &[u8],
    codec:        &C,
    opts:         &TranscodeOptions,
    mut progress: Option<&mut F>,
) -> Result<CompressedImage>
where
    C: BlockCodec + ?Sized,
    F: FnMut(usize, usize),
{
    let header = parse_header(input)?;
    let startup = check_startup(&header, input.len())?;
    let stored_size = header.stored_size as usize;
    if startup > stored_size {
        return Err(IfsError::StoredSizeExceeded { needed: startup, stored_size });
    }

    let mut out = vec![0u8; stored_size];
    header.write_at(&mut out, 0)?;
    let header_len = header.encoded_len();
    out[header_len..startup].copy_from_slice(&input[header_len..startup]);

    let block_size = opts.effective_block_size();
    let payload = &input[startup..];
    let blocks = compress_blocks(payload, block_size, codec, opts.optimize)?;

    let (stream_end, frames) = {
        let mut writer = FrameWriter::new(&mut out, startup);
        let mut consumed = startup;
        for (block, chunk) in blocks.iter().zip(payload.chunks(block_size)) {
            writer.push(block)?;
            consumed += chunk.len();
            if let Some(ref mut cb) = progress {
                cb(consumed, input.len());
            }
        }
        (writer.position(), writer.frames())
    };

    // Room for the implicit terminator and the overall checksum trailer.
    let needed = stream_end + FRAME_PREFIX_LEN + 4;
    if needed > stored_size {
        return Err(IfsError::StoredSizeExceeded { needed, stored_size });
    }
    info!(
        "compressed {} payload bytes into {} frames ({} of {} bytes used)",
        payload.len(),
        frames,
        stream_end,
        stored_size
    );

    let startup_sum = verify_and_patch(&mut out, &ChecksumField::startup(startup))?;
    let image_sum = match stream_end.checked_sub(IMAGE_CHECKSUM_BACKOFF) {
        Some(at) if at >= startup => {
            Some(verify_and_patch(&mut out, &ChecksumField::image(startup, at, stored_size))?)
        }
        _ => {
            warn!("block stream too short to carry an image checksum; left untouched");
            None
        }
    };
    let overall_sum = verify_and_patch(&mut out, &ChecksumField::overall(stored_size))?;

    Ok(CompressedImage {
        bytes: out,
        frames,
        stream_end,
        checksums: ChecksumSet { startup: startup_sum, image: image_sum, overall: overall_sum },
    })
}

/// Decode the block stream of the container in `input`.
///
/// `progress` is called after every decoded frame with
/// `(output bytes filled, output length)`.
pub fn decompress_image<C, F>(
    input:        &[u8],
    codec:        &C,
    opts:         &TranscodeOptions,
    mut progress: Option<&mut F>,
) -> Result<DecompressedImage>
where
    C: BlockCodec + ?Sized,
    F: FnMut(usize, usize),
{
    let header = parse_header(input)?;
    let startup = check_startup(&header, input.len())?;
    if header.compression() != codec.kind() {
        warn!(
            "header declares {} compression, decoding with {}",
            header.compression().name(),
            codec.kind().name()
        );
    }

    // Informational only: the word right after the header and the sum over
    // the rest of the stored image.
    let header_size = header.header_size as usize;
    if header_size + 4 <= input.len() {
        let stored = LittleEndian::read_u32(&input[header_size..header_size + 4]);
        let end = (header.stored_size as usize).clamp(header_size, input.len());
        let calculated = checksum(&input[header_size..end]);
        debug!("startup checksum {stored:#010x} (calculated {calculated:#010x})");
    }

    let capacity = startup + header.imagefs_size as usize;
    let mut out = vec![0u8; capacity];
    out[..startup].copy_from_slice(&input[..startup]);

    let block_size = opts.effective_block_size();
    let mut pos = startup;
    let mut frames = 0usize;
    for frame in FrameReader::new(input, startup) {
        let frame = frame?;
        let expected = block_size.min(capacity - pos);
        if expected == 0 {
            return Err(IfsError::ImageSizeExceeded { block: frames, capacity });
        }
        let block = codec
            .decompress(frame.payload, expected)
            .map_err(|reason| CodecError::Decompression { block: frames, reason })?;
        if block.len() > capacity - pos {
            return Err(IfsError::ImageSizeExceeded { block: frames, capacity });
        }
        out[pos..pos + block.len()].copy_from_slice(&block);
        pos += block.len();
        frames += 1;
        if let Some(ref mut cb) = progress {
            cb(pos, capacity);
        }
    }

    if pos < capacity {
        warn!("block stream produced {} of {} image bytes; rest left zeroed", pos - startup, capacity - startup);
    }
    info!("decompressed {frames} frames into {} image bytes", pos - startup);

    Ok(DecompressedImage { bytes: out, frames, filled: pos })
}

/// Compress the container at `input` and write it to `output`.
///
/// Nothing is written if any block fails.
pub fn compress_file<C, F>(
    input:    &Path,
    output:   &Path,
    codec:    &C,
    opts:     &TranscodeOptions,
    progress: Option<&mut F>,
) -> Result<CompressedImage>
where
    C: BlockCodec + ?Sized,
    F: FnMut(usize, usize),
{
    let data = std::fs::read(input)?;
    let image = compress_image(&data, codec, opts, progress)?;
    std::fs::write(output, &image.bytes)?;
    Ok(image)
}

/// Decompress the container at `input` and write it to `output`.
pub fn decompress_file<C, F>(
    input:    &Path,
    output:   &Path,
    codec:    &C,
    opts:     &TranscodeOptions,
    progress: Option<&mut F>,
) -> Result<DecompressedImage>
where
    C: BlockCodec + ?Sized,
    F: FnMut(usize, usize),
{
    let data = std::fs::read(input)?;
    let image = decompress_image(&data, codec, opts, progress)?;
    std::fs::write(output, &image.bytes)?;
    Ok(image)
}
