//! Compressed payload frames.
//!
//! A compressed payload is laid out as:
//!
//! ```text
//! [checksum: 16 bytes][method: u8][compressed_size: u32 LE][decompressed_size: u32 LE][data]
//! ```
//!
//! `compressed_size` counts the 9 header bytes after the checksum plus `data`. Only the
//! pass-through and LZ4 methods are decoded; anything else is rejected. The checksum is
//! carried but not verified.
use thiserror::Error;

/// Size of the checksum preceding the header.
pub const CHECKSUM_SIZE: usize = 16;

/// Method byte, compressed size and decompressed size.
pub const HEADER_SIZE: usize = 9;

/// Largest payload we are willing to inflate.
pub const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Lz4,
    Zstd,
}

impl CompressionMethod {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x02 => Some(Self::None),
            0x82 => Some(Self::Lz4),
            0x90 => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::None => 0x02,
            Self::Lz4 => 0x82,
            Self::Zstd => 0x90,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("truncated frame: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame declares {declared} compressed bytes but carries {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("decompressed size {size} exceeds {MAX_DECOMPRESSED_SIZE}")]
    TooLarge { size: usize },

    #[error("unknown compression method 0x{0:02x}")]
    UnknownMethod(u8),

    #[error("unsupported compression method {0:?}")]
    Unsupported(CompressionMethod),

    #[error("LZ4 decompression failed: {0}")]
    Lz4(#[from] lz4_flex::block::DecompressError),
}

fn read_u32(buf: &[u8], at: usize) -> usize {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]) as usize
}

/// Inflate a single compressed frame.
pub fn decompress(frame: &[u8]) -> Result<Vec<u8>, CompressionError> {
    if frame.len() < CHECKSUM_SIZE + HEADER_SIZE {
        return Err(CompressionError::Truncated {
            expected: CHECKSUM_SIZE + HEADER_SIZE,
            actual: frame.len(),
        });
    }

    let header = &frame[CHECKSUM_SIZE..];
    let method =
        CompressionMethod::from_byte(header[0]).ok_or(CompressionError::UnknownMethod(header[0]))?;
    let compressed_size = read_u32(header, 1);
    let decompressed_size = read_u32(header, 5);

    if compressed_size != header.len() {
        return Err(CompressionError::SizeMismatch {
            declared: compressed_size,
            actual: header.len(),
        });
    }
    if decompressed_size > MAX_DECOMPRESSED_SIZE {
        return Err(CompressionError::TooLarge {
            size: decompressed_size,
        });
    }

    let data = &header[HEADER_SIZE..];
    match method {
        CompressionMethod::None => {
            if data.len() != decompressed_size {
                return Err(CompressionError::SizeMismatch {
                    declared: decompressed_size,
                    actual: data.len(),
                });
            }
            Ok(data.to_vec())
        }
        CompressionMethod::Lz4 => Ok(lz4_flex::block::decompress(data, decompressed_size)?),
        other => Err(CompressionError::Unsupported(other)),
    }
}

/// Build a frame around `data`. The checksum is left zeroed.
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>, CompressionError> {
    let body = match method {
        CompressionMethod::None => data.to_vec(),
        CompressionMethod::Lz4 => lz4_flex::block::compress(data),
        other => return Err(CompressionError::Unsupported(other)),
    };

    let mut frame = vec![0u8; CHECKSUM_SIZE];
    frame.push(method.as_byte());
    frame.extend_from_slice(&((HEADER_SIZE + body.len()) as u32).to_le_bytes());
    frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_frame_inflates() {
        let query = "SELECT number FROM system.numbers LIMIT 10".repeat(8);
        let frame = compress(query.as_bytes(), CompressionMethod::Lz4).unwrap();
        assert_eq!(frame[CHECKSUM_SIZE], 0x82);
        assert_eq!(decompress(&frame).unwrap(), query.as_bytes());
    }

    #[test]
    fn uncompressed_frame_passes_through() {
        let frame = compress(b"SELECT 1", CompressionMethod::None).unwrap();
        assert_eq!(frame.len(), CHECKSUM_SIZE + HEADER_SIZE + 8);
        assert_eq!(decompress(&frame).unwrap(), b"SELECT 1");
    }

    #[test]
    fn empty_frame_is_truncated() {
        assert!(matches!(
            decompress(&[]),
            Err(CompressionError::Truncated { actual: 0, .. })
        ));
    }

    #[test]
    fn zstd_is_rejected() {
        let mut frame = compress(b"x", CompressionMethod::None).unwrap();
        frame[CHECKSUM_SIZE] = CompressionMethod::Zstd.as_byte();
        assert!(matches!(
            decompress(&frame),
            Err(CompressionError::Unsupported(CompressionMethod::Zstd))
        ));
    }

    #[test]
    fn unknown_method_is_rejected() {
        let mut frame = compress(b"x", CompressionMethod::None).unwrap();
        frame[CHECKSUM_SIZE] = 0x42;
        assert!(matches!(
            decompress(&frame),
            Err(CompressionError::UnknownMethod(0x42))
        ));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut frame = compress(b"SELECT 1", CompressionMethod::None).unwrap();
        frame.pop();
        assert!(matches!(
            decompress(&frame),
            Err(CompressionError::SizeMismatch { .. })
        ));
    }
}
