//! Startup header of an IFS container.
//!
//! # On-disk layout (all fields little-endian, packed)
//!
//! | Offset | Size | Field           |
//! |--------|------|-----------------|
//! |   0    |  4   | signature       |
//! |   4    |  2   | version         |
//! |   6    |  1   | flags1          |
//! |   7    |  1   | flags2          |
//! |   8    |  2   | header_size     |
//! |  10    |  2   | machine         |
//! |  12    |  4   | startup_vaddr   |
//! |  16    |  4   | paddr_bias      |
//! |  20    |  4   | image_paddr     |
//! |  24    |  4   | ram_paddr       |
//! |  28    |  4   | ram_size        |
//! |  32    |  4   | startup_size    |
//! |  36    |  4   | stored_size     |
//! |  40    |  4   | imagefs_paddr   |
//! |  44    |  4   | imagefs_size    |
//! |  48    |  2   | preboot_size    |
//! |  50    |  ..  | reserved (up to `header_size`) |
//!
//! The reserved tail is carried as raw bytes so a decoded header re-encodes
//! byte-for-byte.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Cursor, Write};
use thiserror::Error;

/// Container signature, `EB 7E FF 00` on disk.
pub const SIGNATURE: u32 = 0x00FF_7EEB;
/// Bytes occupied by the typed fields, i.e. the offset of the reserved region.
pub const HEADER_FIXED_LEN: usize = 50;
/// Conventional header size; also the plausibility window used by scanners.
pub const HEADER_LEN: usize = 256;

pub const FLAGS1_VIRTUAL: u8 = 0x01;
pub const FLAGS1_BIGENDIAN: u8 = 0x02;
pub const FLAGS1_COMPRESS_MASK: u8 = 0x1c;
pub const FLAGS1_COMPRESS_SHIFT: u8 = 2;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("malformed header at offset {offset:#x}: need {needed} bytes, {available} available")]
    TooShort { offset: usize, needed: usize, available: usize },
    #[error("malformed header at offset {offset:#x}: bad signature {found:#010x}")]
    BadSignature { offset: usize, found: u32 },
    #[error("malformed header at offset {offset:#x}: {reason}")]
    Implausible { offset: usize, reason: String },
}

/// Payload compression selected by bits 2..4 of `flags1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompressionKind {
    None,
    Zlib,
    Lzo,
    Ucl,
    Unknown(u8),
}

impl CompressionKind {
    pub fn from_flags1(flags1: u8) -> Self {
        match (flags1 & FLAGS1_COMPRESS_MASK) >> FLAGS1_COMPRESS_SHIFT {
            0 => CompressionKind::None,
            1 => CompressionKind::Zlib,
            2 => CompressionKind::Lzo,
            3 => CompressionKind::Ucl,
            other => CompressionKind::Unknown(other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::None       => "none",
            CompressionKind::Zlib       => "zlib",
            CompressionKind::Lzo        => "lzo",
            CompressionKind::Ucl        => "ucl",
            CompressionKind::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupHeader {
    pub signature: u32,
    pub version: u16,
    pub flags1: u8,
    pub flags2: u8,
    pub header_size: u16,
    pub machine: u16,
    pub startup_vaddr: u32,
    pub paddr_bias: u32,
    pub image_paddr: u32,
    pub ram_paddr: u32,
    pub ram_size: u32,
    pub startup_size: u32,
    pub stored_size: u32,
    pub imagefs_paddr: u32,
    pub imagefs_size: u32,
    pub preboot_size: u16,
    /// Bytes `[HEADER_FIXED_LEN, header_size)`, never interpreted.
    #[serde(skip)]
    pub reserved: Vec<u8>,
}

impl StartupHeader {
    /// A blank header of the conventional 256-byte size with the signature set.
    pub fn new() -> Self {
        Self {
            signature: SIGNATURE,
            version: 1,
            flags1: 0,
            flags2: 0,
            header_size: HEADER_LEN as u16,
            machine: 0,
            startup_vaddr: 0,
            paddr_bias: 0,
            image_paddr: 0,
            ram_paddr: 0,
            ram_size: 0,
            startup_size: HEADER_LEN as u32,
            stored_size: HEADER_LEN as u32,
            imagefs_paddr: 0,
            imagefs_size: 0,
            preboot_size: 0,
            reserved: vec![0; HEADER_LEN - HEADER_FIXED_LEN],
        }
    }

    /// Decode the header found at `offset` in `buf`.
    ///
    /// Fails when the signature is wrong, when `header_size` is smaller than
    /// the typed field block, or when fewer than `header_size` bytes remain.
    pub fn read_from(buf: &[u8], offset: usize) -> Result<Self, HeaderError> {
        let available = buf.len().saturating_sub(offset);
        if available < HEADER_FIXED_LEN {
            return Err(HeaderError::TooShort { offset, needed: HEADER_FIXED_LEN, available });
        }
        let mut r = Cursor::new(&buf[offset..]);
        let header = Self::read_fields(&mut r).map_err(|_| HeaderError::TooShort {
            offset,
            needed: HEADER_FIXED_LEN,
            available,
        })?;

        if header.signature != SIGNATURE {
            return Err(HeaderError::BadSignature { offset, found: header.signature });
        }
        let header_size = header.header_size as usize;
        if header_size < HEADER_FIXED_LEN {
            return Err(HeaderError::Implausible {
                offset,
                reason: format!("header_size {header_size} is below {HEADER_FIXED_LEN}"),
            });
        }
        if available < header_size {
            return Err(HeaderError::TooShort { offset, needed: header_size, available });
        }

        let start = offset + HEADER_FIXED_LEN;
        Ok(Self {
            reserved: buf[start..offset + header_size].to_vec(),
            ..header
        })
    }

    fn read_fields(r: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            signature: r.read_u32::<LittleEndian>()?,
            version: r.read_u16::<LittleEndian>()?,
            flags1: r.read_u8()?,
            flags2: r.read_u8()?,
            header_size: r.read_u16::<LittleEndian>()?,
            machine: r.read_u16::<LittleEndian>()?,
            startup_vaddr: r.read_u32::<LittleEndian>()?,
            paddr_bias: r.read_u32::<LittleEndian>()?,
            image_paddr: r.read_u32::<LittleEndian>()?,
            ram_paddr: r.read_u32::<LittleEndian>()?,
            ram_size: r.read_u32::<LittleEndian>()?,
            startup_size: r.read_u32::<LittleEndian>()?,
            stored_size: r.read_u32::<LittleEndian>()?,
            imagefs_paddr: r.read_u32::<LittleEndian>()?,
            imagefs_size: r.read_u32::<LittleEndian>()?,
            preboot_size: r.read_u16::<LittleEndian>()?,
            reserved: Vec::new(),
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.signature)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u8(self.flags1)?;
        writer.write_u8(self.flags2)?;
        writer.write_u16::<LittleEndian>(self.header_size)?;
        writer.write_u16::<LittleEndian>(self.machine)?;
        writer.write_u32::<LittleEndian>(self.startup_vaddr)?;
        writer.write_u32::<LittleEndian>(self.paddr_bias)?;
        writer.write_u32::<LittleEndian>(self.image_paddr)?;
        writer.write_u32::<LittleEndian>(self.ram_paddr)?;
        writer.write_u32::<LittleEndian>(self.ram_size)?;
        writer.write_u32::<LittleEndian>(self.startup_size)?;
        writer.write_u32::<LittleEndian>(self.stored_size)?;
        writer.write_u32::<LittleEndian>(self.imagefs_paddr)?;
        writer.write_u32::<LittleEndian>(self.imagefs_size)?;
        writer.write_u16::<LittleEndian>(self.preboot_size)?;
        writer.write_all(&self.reserved)?;
        Ok(())
    }

    /// Encoded form; its length is `HEADER_FIXED_LEN + reserved.len()`.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write(&mut out)?;
        Ok(out)
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_FIXED_LEN + self.reserved.len()
    }

    /// Re-encode into `out[offset..offset + encoded_len()]`.
    pub fn write_at(&self, out: &mut [u8], offset: usize) -> Result<(), HeaderError> {
        let len = self.encoded_len();
        let available = out.len().saturating_sub(offset);
        if available < len {
            return Err(HeaderError::TooShort { offset, needed: len, available });
        }
        self.write(&mut out[offset..offset + len])
            .map_err(|_| HeaderError::TooShort { offset, needed: len, available })
    }

    pub fn compression(&self) -> CompressionKind {
        CompressionKind::from_flags1(self.flags1)
    }

    pub fn is_virtual(&self) -> bool {
        self.flags1 & FLAGS1_VIRTUAL != 0
    }

    pub fn is_big_endian(&self) -> bool {
        self.flags1 & FLAGS1_BIGENDIAN != 0
    }

    /// The startup stub must hold the whole header and its own checksum word.
    pub fn check_startup_size(&self, offset: usize) -> Result<(), HeaderError> {
        let startup = self.startup_size as usize;
        if startup < self.header_size as usize || startup < 4 {
            return Err(HeaderError::Implausible {
                offset,
                reason: format!(
                    "startup_size {startup} is smaller than header_size {}",
                    self.header_size
                ),
            });
        }
        Ok(())
    }

    /// Check the size relations a container must satisfy when `available`
    /// bytes follow the header's offset.
    pub fn validate(&self, offset: usize, available: usize) -> Result<(), HeaderError> {
        self.check_startup_size(offset)?;
        let startup = self.startup_size as usize;
        let stored = self.stored_size as usize;
        let implausible = |reason: String| HeaderError::Implausible { offset, reason };

        if startup > stored {
            return Err(implausible(format!("startup_size {startup} exceeds stored_size {stored}")));
        }
        if stored > available {
            return Err(implausible(format!(
                "stored_size {stored} exceeds the {available} bytes available"
            )));
        }
        Ok(())
    }
}

impl Default for StartupHeader {
    fn default() -> Self {
        Self::new()
    }
}
