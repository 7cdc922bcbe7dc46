//! `concordd` — reference DSP listener binary.
//!
//! Parses [`SessionOptions`] from the command line, wires them into a
//! [`Server`] running the bundled echo [`RequestHandler`], and serves until
//! interrupted. Exists to make the crate runnable end-to-end without an
//! application plugging in its own transport/codec; production deployments
//! are expected to embed [`concord::session::Nexus`] directly instead of
//! shelling out to this binary.

use std::sync::Arc;

use clap::Parser;
use concord::options::SessionOptions;
use concord::server::{EchoHandler, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = SessionOptions::parse();
    let bind = options
        .bind
        .parse()
        .unwrap_or_else(|err| panic!("invalid --bind address {:?}: {err}", options.bind));
    let codec_options = options.frame_codec_options();

    let config = ServerConfig { bind, max_connections: 256, session_options: options, codec_options };
    let server = Server::new(config, Arc::new(EchoHandler));

    tracing::info!(version = concord::VERSION, "starting concordd");
    server.run().await
}
