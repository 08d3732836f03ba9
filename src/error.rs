use std::io;
use thiserror::Error;

use crate::checksum::ChecksumKind;
use crate::codec::CodecError;
use crate::header::HeaderError;

#[derive(Error, Debug)]
pub enum IfsError {
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("input too short: {len} bytes, header needs {needed}")]
    InputTooShort { len: usize, needed: usize },
    #[error("truncated block stream: frame at offset {offset:#x} needs {needed} bytes, {available} available")]
    TruncatedStream { offset: usize, needed: usize, available: usize },
    #[error("compressed stream needs {needed} bytes but stored_size is {stored_size}")]
    StoredSizeExceeded { needed: usize, stored_size: usize },
    #[error("decompressed data overruns the {capacity}-byte image at block {block}")]
    ImageSizeExceeded { block: usize, capacity: usize },
    #[error("{kind:?} checksum field at {offset:#x} lies outside the {len}-byte buffer")]
    ChecksumOutOfBounds { kind: ChecksumKind, offset: usize, len: usize },
    #[error("no IFS containers found")]
    NoContainersFound,
    #[error("no ifs segment files found in {0}")]
    NoSegmentsFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, IfsError>;
