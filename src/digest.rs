//! Pluggable frame/payload/header digests.
//!
//! Three algorithms are supported: no digest at all, CRC-32 (IEEE
//! polynomial, via `crc32fast`), and Adler-32 (via the `adler` crate). Each
//! digest is a 4-byte little-endian value on the wire regardless of
//! algorithm, so the frame codec can size optional digest slots without
//! knowing which algorithm is in effect.

use serde::{Deserialize, Serialize};

/// Width in bytes of every digest value on the wire, independent of algorithm.
pub const DIGEST_SIZE: usize = 4;

/// Selects which digest algorithm covers a given region of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DigestAlgorithm {
    #[default]
    None,
    Crc32,
    Adler32,
}

impl DigestAlgorithm {
    /// Whether this algorithm contributes a digest slot to the frame at all.
    pub fn is_enabled(self) -> bool {
        !matches!(self, DigestAlgorithm::None)
    }

    /// Compute the digest of `data`, or `0` for [`DigestAlgorithm::None`]
    /// (callers must gate writing the field on [`is_enabled`](Self::is_enabled);
    /// `0` is never itself meaningful as a checksum).
    pub fn compute(self, data: &[u8]) -> u32 {
        match self {
            DigestAlgorithm::None => 0,
            DigestAlgorithm::Crc32 => crc32fast::hash(data),
            DigestAlgorithm::Adler32 => adler::adler32_slice(data),
        }
    }

    /// Incremental hasher for streaming digest computation (used when a
    /// region is built up from multiple disjoint slices, e.g. bulk data).
    pub fn hasher(self) -> DigestHasher {
        match self {
            DigestAlgorithm::None => DigestHasher::None,
            DigestAlgorithm::Crc32 => DigestHasher::Crc32(crc32fast::Hasher::new()),
            DigestAlgorithm::Adler32 => DigestHasher::Adler32(adler::Adler32::new()),
        }
    }
}

/// Streaming counterpart to [`DigestAlgorithm::compute`].
pub enum DigestHasher {
    None,
    Crc32(crc32fast::Hasher),
    Adler32(adler::Adler32),
}

impl DigestHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            DigestHasher::None => {}
            DigestHasher::Crc32(h) => h.update(data),
            DigestHasher::Adler32(h) => h.write_slice(data),
        }
    }

    pub fn finalize(self) -> u32 {
        match self {
            DigestHasher::None => 0,
            DigestHasher::Crc32(h) => h.finalize(),
            DigestHasher::Adler32(h) => h.checksum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_disabled_others_enabled() {
        assert!(!DigestAlgorithm::None.is_enabled());
        assert!(DigestAlgorithm::Crc32.is_enabled());
        assert!(DigestAlgorithm::Adler32.is_enabled());
    }

    #[test]
    fn crc32_matches_known_vector() {
        // CRC-32/ISO-HDLC of "123456789" is 0xCBF43926.
        let digest = DigestAlgorithm::Crc32.compute(b"123456789");
        assert_eq!(digest, 0xCBF4_3926);
    }

    #[test]
    fn hasher_matches_one_shot_compute() {
        let data = b"the quick brown fox jumps over the lazy dog";
        for algo in [DigestAlgorithm::Crc32, DigestAlgorithm::Adler32] {
            let one_shot = algo.compute(data);
            let mut hasher = algo.hasher();
            hasher.update(&data[..10]);
            hasher.update(&data[10..]);
            assert_eq!(one_shot, hasher.finalize(), "{algo:?} incremental mismatch");
        }
    }

    #[test]
    fn flipping_a_bit_changes_every_digest() {
        let mut data = b"frame payload contents".to_vec();
        for algo in [DigestAlgorithm::Crc32, DigestAlgorithm::Adler32] {
            let before = algo.compute(&data);
            data[0] ^= 0x01;
            let after = algo.compute(&data);
            assert_ne!(before, after, "{algo:?} failed to detect bit flip");
            data[0] ^= 0x01;
        }
    }
}
