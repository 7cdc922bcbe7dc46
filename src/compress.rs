//! Pluggable payload compression.
//!
//! The frame codec streams the application payload (plus any bulk-data
//! regions, when compression is on) through whichever algorithm is
//! negotiated for the session. `estimate` sizes the output buffer up front
//! so the encoder never has to grow it mid-stream.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Selects the payload compression algorithm for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Deflate,
    Gzip,
    Lz4,
}

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("compression I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("lz4 decompression failed: {0}")]
    Lz4(#[from] lz4_flex::block::DecompressError),
}

impl CompressionAlgorithm {
    pub fn is_enabled(self) -> bool {
        !matches!(self, CompressionAlgorithm::None)
    }

    /// Upper-bound estimate of the compressed size of `total` input bytes,
    /// used to pre-size the result buffer. Per §9's open question, this is
    /// a worst-case bound, not a statistical estimate of the achieved ratio;
    /// the throttler's bandwidth accounting uses a separately tracked
    /// realized compression ratio for that purpose (see [`crate::throttler`]).
    pub fn estimate(self, total: usize) -> usize {
        match self {
            CompressionAlgorithm::None => total,
            CompressionAlgorithm::Deflate | CompressionAlgorithm::Gzip => total + total / 1000 + 128,
            CompressionAlgorithm::Lz4 => lz4_flex::block::get_maximum_output_size(total),
        }
    }

    /// Compress `data` into a freshly allocated buffer sized via [`estimate`](Self::estimate).
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Deflate => {
                let mut encoder = flate2::write::DeflateEncoder::new(
                    Vec::with_capacity(self.estimate(data.len())),
                    flate2::Compression::default(),
                );
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            CompressionAlgorithm::Gzip => {
                let mut encoder = flate2::write::GzEncoder::new(
                    Vec::with_capacity(self.estimate(data.len())),
                    flate2::Compression::default(),
                );
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            CompressionAlgorithm::Lz4 => Ok(lz4_flex::block::compress(data)),
        }
    }

    /// Decompress `data`, which was produced by [`compress`](Self::compress)
    /// with the same algorithm. `expected_len` sizes the output buffer for
    /// the block-based LZ4 path, which (unlike the stream formats) carries
    /// no embedded length prefix in our framing.
    pub fn decompress(self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, CompressionError> {
        match self {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Deflate => {
                let mut decoder = flate2::read::DeflateDecoder::new(data);
                let mut out = Vec::with_capacity(expected_len);
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            CompressionAlgorithm::Gzip => {
                let mut decoder = flate2::read::GzDecoder::new(data);
                let mut out = Vec::with_capacity(expected_len);
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            CompressionAlgorithm::Lz4 => {
                Ok(lz4_flex::block::decompress(data, expected_len)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CompressionAlgorithm; 4] = [
        CompressionAlgorithm::None,
        CompressionAlgorithm::Deflate,
        CompressionAlgorithm::Gzip,
        CompressionAlgorithm::Lz4,
    ];

    #[test]
    fn round_trips_for_every_algorithm() {
        let payload = b"the quick brown fox jumps over the lazy dog ".repeat(50);
        for algo in ALL {
            let compressed = algo.compress(&payload).unwrap();
            let decompressed = algo.decompress(&compressed, payload.len()).unwrap();
            assert_eq!(decompressed, payload, "{algo:?} round-trip mismatch");
        }
    }

    #[test]
    fn empty_payload_round_trips() {
        for algo in ALL {
            let compressed = algo.compress(&[]).unwrap();
            let decompressed = algo.decompress(&compressed, 0).unwrap();
            assert!(decompressed.is_empty(), "{algo:?} empty round-trip mismatch");
        }
    }

    #[test]
    fn estimate_never_underestimates_none() {
        assert_eq!(CompressionAlgorithm::None.estimate(1234), 1234);
    }
}
