//! Binary framing for durable queue files.
//!
//! All data is serialized with:
//! - JSON for data (compatible with existing serde attributes)
//! - Length-prefixed format for framing
//! - CRC32 checksum for corruption detection
//! - Version byte for forward compatibility

use std::io::{self, ErrorKind, Read, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes to identify watchpost queue files.
pub const MAGIC: [u8; 4] = *b"WPQF";

/// Largest frame body accepted on read.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Why a frame could not be decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Clean end of input before a frame started.
    #[error("end of input")]
    End,

    /// Input ended inside a frame (torn write).
    #[error("truncated frame")]
    Truncated,

    #[error("unsupported codec version: {found} (expected {CODEC_VERSION})")]
    UnsupportedVersion { found: u8 },

    #[error("frame size {size} exceeds maximum {max}")]
    Oversized { size: usize, max: usize },

    #[error("CRC mismatch: stored={stored:08x}, computed={computed:08x} (data corrupted)")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("deserialization failed: {0}")]
    Deserialize(serde_json::Error),

    #[error("serialization failed: {0}")]
    Serialize(serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// True when the whole frame was consumed, so the reader is positioned
    /// at the next frame and can keep going.
    #[must_use]
    pub const fn frame_intact(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. } | Self::Deserialize(_))
    }
}

/// Serializes a value to one frame.
///
/// Format:
/// ```text
/// [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
/// ```
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let data = serde_json::to_vec(value).map_err(CodecError::Serialize)?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(CodecError::Oversized {
            size: data.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let len = data.len() as u32;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

/// Deserializes one frame, verifying its checksum.
///
/// # Errors
/// - `End` if the reader is exhausted before the frame starts
/// - `Truncated` if it is exhausted mid-frame
/// - `ChecksumMismatch` / `Deserialize` leave the reader after the frame
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T, CodecError> {
    let mut version = [0u8; 1];
    match reader.read_exact(&mut version) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(CodecError::End),
        Err(e) => return Err(e.into()),
    }

    if version[0] != CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion { found: version[0] });
    }

    let mut len_bytes = [0u8; 4];
    read_body(reader, &mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(CodecError::Oversized {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut data = vec![0u8; len];
    read_body(reader, &mut data)?;

    let mut crc_bytes = [0u8; 4];
    read_body(reader, &mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed = hasher.finalize();

    if stored != computed {
        return Err(CodecError::ChecksumMismatch { stored, computed });
    }

    serde_json::from_slice(&data).map_err(CodecError::Deserialize)
}

fn read_body(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), CodecError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Io(e)
        }
    })
}

/// Write the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    Ok(())
}

/// Read and validate the file header.
pub fn read_header(reader: &mut impl Read) -> io::Result<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;

    if magic != MAGIC {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;

    Ok(version[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip_simple() {
        let value = "hello, world!".to_string();
        let encoded = encode(&value).unwrap();

        let mut cursor = Cursor::new(encoded);
        let decoded: String = decode(&mut cursor).unwrap();

        assert_eq!(value, decoded);
        assert!(matches!(decode::<String>(&mut cursor), Err(CodecError::End)));
    }

    #[test]
    fn test_corrupt_frame_is_skippable() {
        let mut buf = encode(&"first".to_string()).unwrap();
        // Flip a byte inside the first frame's JSON body.
        buf[6] ^= 0xFF;
        buf.extend(encode(&"second".to_string()).unwrap());

        let mut cursor = Cursor::new(buf);
        let err = decode::<String>(&mut cursor).unwrap_err();
        assert!(err.frame_intact(), "unexpected error: {err}");

        let next: String = decode(&mut cursor).unwrap();
        assert_eq!(next, "second");
    }

    #[test]
    fn test_truncated_frame() {
        let mut buf = encode(&"torn".to_string()).unwrap();
        buf.truncate(buf.len() - 2);

        let err = decode::<String>(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, CodecError::Truncated));
        assert!(!err.frame_intact());
    }

    #[test]
    fn test_rejects_oversized_entry() {
        // Craft a header claiming a huge size
        let mut bad_data = vec![CODEC_VERSION];
        bad_data.extend_from_slice(&(200_000_000u32).to_le_bytes());

        let err = decode::<String>(&mut Cursor::new(bad_data)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();

        let version = read_header(&mut Cursor::new(buf)).unwrap();
        assert_eq!(version, CODEC_VERSION);
    }

    #[test]
    fn test_header_rejects_foreign_file() {
        let err = read_header(&mut Cursor::new(b"XXXX\x01".to_vec())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
