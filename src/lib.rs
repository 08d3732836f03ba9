pub mod header;
pub mod checksum;
pub mod codec;
pub mod block;
pub mod transcode;
pub mod verify;
pub mod locator;
pub mod merge;
pub mod error;

pub use header::{CompressionKind, StartupHeader, SIGNATURE};
pub use checksum::{checksum, ChecksumKind, ChecksumOutcome, ChecksumSet};
pub use codec::{BlockCodec, CodecError, LzoCodec};
pub use error::{IfsError, Result};
pub use transcode::{compress_image, decompress_image, CompressedImage, DecompressedImage, TranscodeOptions};
pub use verify::{verify_blob, ChecksumReport};
pub use locator::{plan_segments, split_blob, Segment, SegmentKind};
pub use merge::merge_dir;
