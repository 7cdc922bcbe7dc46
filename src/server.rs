//! Reference DSP listener/responder — a collaborator, not core (§1).
//!
//! A minimal TCP listener that accepts connections and, for each, runs a
//! demo responder loop that answers `COMMAND_REQ`/`TASKMGMT_REQ`/`PING_REQ`
//! frames long enough to exercise a [`crate::channel::Channel`] end-to-end
//! in tests and the `concordd` reference binary. It does not implement the
//! server-side slot table or duplicate detection described in §4.2 ("a
//! symmetric component not expanded here") — every inbound exchange is
//! answered as a fresh execution, which is sound for a reference responder
//! that never re-delivers an already-answered frame.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{CommandStatus, TaskMgmtStatus};
use crate::frame::{Frame, FrameCodecOptions, FrameError, FrameType};
use crate::options::SessionOptions;
use crate::transport::{FramedTransport, TransportIdAllocator};

/// Application hook for answering an inbound command. `Ok` carries the
/// response payload; `Err` carries an application-level exception payload
/// (distinct from a protocol-level `CommandStatus` failure).
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &[u8]) -> Result<Vec<u8>, Vec<u8>>;
}

impl<F> RequestHandler for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, Vec<u8>> + Send + Sync + 'static,
{
    fn handle(&self, request: &[u8]) -> Result<Vec<u8>, Vec<u8>> {
        self(request)
    }
}

/// An echo responder: returns the request bytes unchanged. Useful as a
/// smoke-test handler for `concordd` and integration tests.
pub struct EchoHandler;
impl RequestHandler for EchoHandler {
    fn handle(&self, request: &[u8]) -> Result<Vec<u8>, Vec<u8>> {
        Ok(request.to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub max_connections: usize,
    pub session_options: SessionOptions,
    pub codec_options: FrameCodecOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7272".parse().unwrap(),
            max_connections: 256,
            session_options: SessionOptions::default(),
            codec_options: FrameCodecOptions::default(),
        }
    }
}

/// A minimal DSP listener: one responder loop per inbound TCP connection.
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn RequestHandler>,
    shutdown: broadcast::Sender<()>,
}

impl Server {
    pub fn new(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self { config, handler, shutdown }
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind).await?;
        info!(bind = %self.config.bind, "DSP reference server listening");
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    info!(%peer, "connection accepted");
                    let handler = self.handler.clone();
                    let codec_options = self.config.codec_options;
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(stream, codec_options, handler).await {
                            warn!(%peer, error = %err, "connection ended with a frame error");
                        }
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("server shutdown requested");
                    return Ok(());
                }
            }
        }
    }
}

/// Run the reference responder loop over an arbitrary duplex stream. `Server`
/// calls this per accepted TCP connection; exposed directly so tests and
/// embedders can drive it over an in-memory stream without a real listener.
pub async fn serve_connection<S>(stream: S, codec_options: FrameCodecOptions, handler: Arc<dyn RequestHandler>) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ids = TransportIdAllocator::new();
    let id = ids.alloc();
    let mut transport = FramedTransport::new(id, stream, codec_options);

    while let Some(frame) = transport.recv().await {
        let frame = frame?;
        let response = match frame.frame_type {
            FrameType::CommandReq => Some(answer_command(&frame, handler.as_ref())),
            FrameType::TaskmgmtReq => {
                let mut resp = Frame::new(FrameType::TaskmgmtResp, Vec::new()).with_exchange(frame.exchange_id);
                resp.status = TaskMgmtStatus::AlreadyCompleted as u16;
                Some(resp)
            }
            FrameType::PingReq => Some(Frame::new(FrameType::PingResp, Vec::new()).with_exchange(frame.exchange_id)),
            other => {
                tracing::debug!(?other, "reference server does not answer this frame type (login/negotiate collaborator surface)");
                None
            }
        };
        if let Some(response) = response {
            transport.send(response).await?;
        }
    }
    Ok(())
}

fn answer_command(frame: &Frame, handler: &dyn RequestHandler) -> Frame {
    match handler.handle(&frame.payload) {
        Ok(payload) => {
            let mut resp = Frame::new(FrameType::CommandResp, payload).with_exchange(frame.exchange_id).with_slot(frame.slot_id, frame.slot_sn);
            resp.status = CommandStatus::Success as u16;
            resp
        }
        Err(exception_payload) => {
            // No application-exception slot on the wire frame in this core;
            // surface it the same way a slot-protocol failure would and let
            // the payload carry the exception bytes for the codec to decode.
            let mut resp = Frame::new(FrameType::CommandResp, exception_payload).with_exchange(frame.exchange_id).with_slot(frame.slot_id, frame.slot_sn);
            resp.status = CommandStatus::SlotIdInvalid as u16;
            resp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::serial::ExchangeIdAllocator;
    use std::sync::atomic::AtomicU32;
    use tokio::io::duplex;

    #[tokio::test]
    async fn echo_handler_round_trips_through_a_real_channel() {
        let (client_io, server_io) = duplex(64 * 1024);
        let codec_options = FrameCodecOptions::default();

        tokio::spawn(serve_connection(server_io, codec_options, Arc::new(EchoHandler)));

        let options = Arc::new(SessionOptions::default());
        let xid_alloc = Arc::new(ExchangeIdAllocator::new());
        let channel = Channel::new(options.clone(), options.fore_queue_depth, xid_alloc, Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0)));

        let transport_id = crate::transport::TransportIdAllocator::new().alloc();
        let mut transport = FramedTransport::new(transport_id, client_io, codec_options);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        channel.attach(transport_id, tx).await;

        // One task pumps outbound frames from the channel onto the wire;
        // since `FramedTransport` isn't `Clone`, it also owns reading
        // responses back off the same stream and feeding them to the
        // channel, matching the single reader/writer loop `Nexus::attach_transport`
        // runs in production.
        let channel_for_reader = channel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = rx.recv() => {
                        match outbound {
                            Some(frame) => {
                                if transport.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    inbound = transport.recv() => {
                        match inbound {
                            Some(Ok(frame)) => channel_for_reader.handle_inbound(frame).await,
                            _ => break,
                        }
                    }
                }
            }
        });

        let result = channel.execute(b"ping".to_vec(), true).await.unwrap();
        assert_eq!(result, b"ping".to_vec());
    }
}
