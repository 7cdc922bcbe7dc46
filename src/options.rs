//! Session configuration surface.
//!
//! Collects the options enumerated in §6 into one struct, with defaults
//! matching the behavior implied throughout the rest of the specification
//! (no digests, no compression, round-robin scheduling, async dispatch, no
//! bandwidth cap). The `clap` derive mirrors the same field names for the
//! reference binary.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::compress::CompressionAlgorithm;
use crate::digest::DigestAlgorithm;

/// `XPORT_SCHEDULER` selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchedulerPolicy {
    RoundRobin,
    LeastQueue,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// Wire-level digest algorithm choice, exposed to `clap` by name. Distinct
/// from [`DigestAlgorithm`] only so the CLI can derive `ValueEnum` without
/// that type picking up a `clap` dependency it doesn't otherwise need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DigestChoice {
    None,
    Crc32,
    Adler32,
}

impl From<DigestChoice> for DigestAlgorithm {
    fn from(c: DigestChoice) -> Self {
        match c {
            DigestChoice::None => DigestAlgorithm::None,
            DigestChoice::Crc32 => DigestAlgorithm::Crc32,
            DigestChoice::Adler32 => DigestAlgorithm::Adler32,
        }
    }
}

/// Wire-level compression algorithm choice, exposed to `clap` by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompressionChoice {
    None,
    Deflate,
    Gzip,
    Lz4,
}

impl From<CompressionChoice> for CompressionAlgorithm {
    fn from(c: CompressionChoice) -> Self {
        match c {
            CompressionChoice::None => CompressionAlgorithm::None,
            CompressionChoice::Deflate => CompressionAlgorithm::Deflate,
            CompressionChoice::Gzip => CompressionAlgorithm::Gzip,
            CompressionChoice::Lz4 => CompressionAlgorithm::Lz4,
        }
    }
}

/// The full option set from §6, collected into one struct and constructible
/// either programmatically (`SessionOptions::default()` plus field writes)
/// or via `clap` for the reference binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "concord", about = "DSP session protocol reference node")]
pub struct SessionOptions {
    /// `FORE_QUEUE_DEPTH`: max concurrently ACTIVE commands on the fore channel.
    #[arg(long, default_value_t = 32)]
    pub fore_queue_depth: usize,

    /// `BACK_QUEUE_DEPTH`: max concurrently ACTIVE commands on the back channel.
    #[arg(long, default_value_t = 32)]
    pub back_queue_depth: usize,

    /// `FORE_MAX_REQUEST`: largest request the fore channel will encode, in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub fore_max_request: usize,

    /// `BACK_MAX_REQUEST`: largest request the back channel will encode, in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub back_max_request: usize,

    /// `FORE_MAX_RESPONSE`: largest response the fore channel will accept, in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub fore_max_response: usize,

    /// `BACK_MAX_RESPONSE`: largest response the back channel will accept, in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub back_max_response: usize,

    /// `HEADER_DIGEST`.
    #[arg(long, value_enum, default_value_t = DigestChoice::None)]
    pub header_digest: DigestChoice,

    /// `FRAME_DIGEST`.
    #[arg(long, value_enum, default_value_t = DigestChoice::None)]
    pub frame_digest: DigestChoice,

    /// `PAYLOAD_DIGEST`.
    #[arg(long, value_enum, default_value_t = DigestChoice::None)]
    pub payload_digest: DigestChoice,

    /// `DIGEST_DATA`: whether the payload digest also covers bulk-data
    /// regions when compression is off.
    #[arg(long, default_value_t = false)]
    pub digest_data: bool,

    /// `PAYLOAD_COMPRESS`.
    #[arg(long, value_enum, default_value_t = CompressionChoice::None)]
    pub payload_compress: CompressionChoice,

    /// `XPORT_SCHEDULER`.
    #[arg(long, value_enum, default_value_t = SchedulerPolicy::RoundRobin)]
    pub xport_scheduler: SchedulerPolicy,

    /// `SYNC_DISPATCH`: park the caller's context while PENDING instead of
    /// returning a future immediately.
    #[arg(long, default_value_t = false)]
    pub sync_dispatch: bool,

    /// `BANDWIDTH_LIMIT`: throttler cap in bytes/sec, `0` disables throttling.
    #[arg(long, default_value_t = 0)]
    pub bandwidth_limit: u64,

    /// `LOGOUT_TIMEOUT`, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub logout_timeout_ms: u64,

    /// `RECOVERY_INTERVAL`, in milliseconds: spacing between restart-task sweeps.
    #[arg(long, default_value_t = 250)]
    pub recovery_interval_ms: u64,

    /// `RECOVERY_TIMEOUT`, in milliseconds: how long the stale set waits for
    /// server reconciliation before giving up.
    #[arg(long, default_value_t = 30_000)]
    pub recovery_timeout_ms: u64,

    /// `SOCKET_SEND_BUFFER`, in bytes.
    #[arg(long, default_value_t = 256 * 1024)]
    pub socket_send_buffer: usize,

    /// `SOCKET_RECEIVE_BUFFER`, in bytes.
    #[arg(long, default_value_t = 256 * 1024)]
    pub socket_receive_buffer: usize,

    /// `MAX_TRANSPORTS`: cap on simultaneously attached transports per session.
    #[arg(long, default_value_t = 4)]
    pub max_transports: usize,

    /// `MIN_KEEPALIVE_TIME`, in milliseconds: lower bound between PING frames
    /// on an otherwise idle transport.
    #[arg(long, default_value_t = 15_000)]
    pub min_keepalive_time_ms: u64,

    /// TCP bind address for the reference binary's listener.
    #[arg(long, default_value = "127.0.0.1:7272")]
    pub bind: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        // clap's `Parser::parse_from` with no args applies every `default_value`;
        // this keeps the programmatic and CLI defaults from drifting apart.
        Self::parse_from(std::iter::empty::<String>())
    }
}

impl SessionOptions {
    /// Derive the per-transport frame codec configuration from the
    /// negotiated digest/compression options (§6). Kept as a conversion
    /// rather than folding `FrameCodecOptions` directly into `SessionOptions`
    /// so the wire-level knobs stay `Copy` and independent of `clap`.
    pub fn frame_codec_options(&self) -> crate::frame::FrameCodecOptions {
        crate::frame::FrameCodecOptions {
            header_digest: self.header_digest.into(),
            frame_digest: self.frame_digest.into(),
            payload_digest: self.payload_digest.into(),
            digest_data: self.digest_data,
            compression: self.payload_compress.into(),
        }
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_millis(self.logout_timeout_ms)
    }

    pub fn min_keepalive_time(&self) -> Duration {
        Duration::from_millis(self.min_keepalive_time_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_implied_values() {
        let opts = SessionOptions::default();
        assert_eq!(opts.header_digest, DigestChoice::None);
        assert_eq!(opts.payload_compress, CompressionChoice::None);
        assert_eq!(opts.xport_scheduler, SchedulerPolicy::RoundRobin);
        assert!(!opts.sync_dispatch);
        assert_eq!(opts.bandwidth_limit, 0);
    }
}
