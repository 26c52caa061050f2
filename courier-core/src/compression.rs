//! Per-message compression.
//!
//! gRPC-Web compresses individual data frames (flag `0x01`), negotiated with
//! the `grpc-encoding` and `grpc-accept-encoding` headers.

use bytes::Bytes;

#[cfg(feature = "compression-gzip")]
use std::io::{Read, Write};

#[cfg(feature = "compression-gzip")]
use flate2::{Compression, read::GzDecoder, write::GzEncoder};

use crate::error::FrameError;

/// Supported message compression encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionEncoding {
    #[default]
    Identity,
    #[cfg(feature = "compression-gzip")]
    Gzip,
}

impl CompressionEncoding {
    /// Parse a `grpc-encoding` header value.
    /// Returns None for encodings this build cannot handle.
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("identity") | Some("") => Some(Self::Identity),
            #[cfg(feature = "compression-gzip")]
            Some("gzip") => Some(Self::Gzip),
            _ => None,
        }
    }

    /// Get the header value string for this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => "gzip",
        }
    }

    /// Returns true if this encoding is identity (no compression).
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Compress a message payload. Identity returns the input unchanged.
    pub fn compress(&self, data: Bytes) -> Result<Bytes, FrameError> {
        match self {
            Self::Identity => Ok(data),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(&data)
                    .map_err(|e| FrameError::Compression(e.to_string()))?;
                encoder
                    .finish()
                    .map(Bytes::from)
                    .map_err(|e| FrameError::Compression(e.to_string()))
            }
        }
    }

    /// Decompress a message payload.
    ///
    /// `limit` caps the decompressed size so a small compressed frame cannot
    /// expand past the configured maximum message size.
    #[cfg_attr(not(feature = "compression-gzip"), allow(unused_variables))]
    pub fn decompress(&self, data: Bytes, limit: usize) -> Result<Bytes, FrameError> {
        match self {
            Self::Identity => Err(FrameError::Decompression(
                "compressed frame received but no grpc-encoding was negotiated".into(),
            )),
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => {
                let mut out = Vec::new();
                GzDecoder::new(&data[..])
                    .take(limit as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(|e| FrameError::Decompression(e.to_string()))?;
                if out.len() > limit {
                    return Err(FrameError::TooLarge {
                        length: out.len(),
                        limit,
                    });
                }
                Ok(Bytes::from(out))
            }
        }
    }
}

/// Value for `grpc-accept-encoding` listing every encoding this build supports.
pub fn accept_encoding_header() -> &'static str {
    #[cfg(feature = "compression-gzip")]
    {
        "gzip,identity"
    }
    #[cfg(not(feature = "compression-gzip"))]
    {
        "identity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_header() {
        assert_eq!(
            CompressionEncoding::from_header(None),
            Some(CompressionEncoding::Identity)
        );
        assert_eq!(
            CompressionEncoding::from_header(Some("identity")),
            Some(CompressionEncoding::Identity)
        );
        assert_eq!(CompressionEncoding::from_header(Some("snappy")), None);
    }

    #[test]
    fn test_identity_rejects_compressed_frames() {
        let err = CompressionEncoding::Identity
            .decompress(Bytes::from_static(b"x"), 16)
            .unwrap_err();
        assert!(matches!(err, FrameError::Decompression(_)));
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_roundtrip() {
        let payload = Bytes::from(vec![b'a'; 4096]);
        let compressed = CompressionEncoding::Gzip.compress(payload.clone()).unwrap();
        assert!(compressed.len() < payload.len());
        let restored = CompressionEncoding::Gzip
            .decompress(compressed, 1 << 20)
            .unwrap();
        assert_eq!(restored, payload);
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_decompress_limit() {
        let payload = Bytes::from(vec![0u8; 10_000]);
        let compressed = CompressionEncoding::Gzip.compress(payload).unwrap();
        let err = CompressionEncoding::Gzip
            .decompress(compressed, 1_000)
            .unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
    }
}
