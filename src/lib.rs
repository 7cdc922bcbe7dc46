//! concord — a bidirectional, multi-connection session protocol (DSP) core.
//!
//! A session ([`session::Nexus`]) multiplexes application-level
//! request/response exchanges ("commands") between a client and a server
//! over one or more [`transport`] connections. Each session carries two
//! independent [`channel::Channel`]s (fore: client→server, back:
//! server→client); each channel owns a [`slot`] table for at-most-once
//! execution, drives commands through the [`command`] state machine, and
//! coordinates the [`taskmgmt`] abort protocol against in-flight dispatch
//! and retry. A [`scheduler::TransportScheduler`] distributes exchanges
//! across the session's transports and absorbs individual transport
//! failures without surfacing them to the caller.
//!
//! What's out of scope here — SASL/TLS login negotiation, user databases,
//! TUI/CLI glue beyond the reference binary, cluster coordination — is left
//! to collaborators named in [`session::NexusListener`] and
//! [`codec::ServiceCodec`]. The core moves bytes; an application plugs in
//! what they mean.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use concord::options::SessionOptions;
//! use concord::session::Nexus;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let options = SessionOptions::default();
//!     let codec_options = options.frame_codec_options();
//!     let nexus = Nexus::with_default_listener(options, codec_options);
//!
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:7272").await?;
//!     nexus.attach_transport(stream).await;
//!
//!     let response = nexus.fore.execute(b"hello".to_vec(), true).await;
//!     println!("{response:?}");
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod codec;
pub mod command;
pub mod compress;
pub mod digest;
pub mod error;
pub mod frame;
pub mod options;
pub mod scheduler;
pub mod serial;
pub mod server;
pub mod session;
pub mod slot;
pub mod taskmgmt;
pub mod throttler;
pub mod transport;

pub use channel::{Channel, CommandHandle};
pub use error::ChannelError;
pub use frame::{Frame, FrameCodec, FrameCodecOptions, FrameError, FrameType, ProtocolVersion};
pub use options::SessionOptions;
pub use session::{Nexus, NexusListener};

/// Crate version, exposed for diagnostics and the `PING`/`NEGOTIATE`
/// collaborator surface (neither of which the core implements itself).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fixed protocol identifier carried at the start of every frame (§4.1).
pub const PROTOCOL_NAME: &str = "DSP";
