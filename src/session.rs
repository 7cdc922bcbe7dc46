//! Session (nexus): owns the fore and back channels, the transport set, and
//! the login/logout lifecycle (§3, §4.4 "Connectivity", §6's `NexusListener`).
//!
//! Responder-side command processing — decoding an inbound `COMMAND_REQ`
//! and invoking an application handler to produce a `COMMAND_RESP` — is a
//! collaborator surface this core does not implement (§1 scopes everything
//! but the five listed components out); a `NexusListener` only observes
//! session-level lifecycle events. Both `fore` and `back` here are
//! dispatchers (the command-issuing side); a true duplex peer runs a
//! second `Nexus`, with its own listener, on the other end of the wire.
//!
//! Login (`CONNECT → ENCRYPT? → AUTHENTICATE → NEGOTIATE`) is named in §6
//! as a collaborator and is out of core scope; this module exposes only the
//! lifecycle events an application observes around it (`nexus_established`
//! et al.), not the handshake itself.

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::channel::Channel;
use crate::frame::{Frame, FrameCodecOptions, FrameType};
use crate::options::SessionOptions;
use crate::serial::ExchangeIdAllocator;
use crate::transport::{FramedTransport, TransportId, TransportIdAllocator};

/// Session-level lifecycle callbacks (§6). Default no-ops so an application
/// overrides only the events it cares about.
pub trait NexusListener: Send + Sync + 'static {
    fn nexus_established(&self) {}
    fn nexus_closed(&self) {}
    fn nexus_restored(&self) {}
    fn nexus_lost(&self) {}
    fn nexus_reinstated(&self) {}
    fn nexus_logout(&self) {}
}

/// A listener that observes nothing; the default for sessions that don't
/// need lifecycle callbacks.
pub struct NoopListener;
impl NexusListener for NoopListener {}

struct TransportRecord {
    outbound: mpsc::UnboundedSender<Frame>,
}

/// The long-lived logical pairing between a client and a server
/// (§GLOSSARY "Nexus / Session"). Owns both directions' [`Channel`]s, the
/// live transport set, and routes inbound frames to the channel that
/// issued the exchange they respond to.
pub struct Nexus {
    pub options: Arc<SessionOptions>,
    pub fore: Arc<Channel>,
    pub back: Arc<Channel>,
    transports: Mutex<HashMap<TransportId, TransportRecord>>,
    transport_ids: TransportIdAllocator,
    codec_options: FrameCodecOptions,
    listener: Arc<dyn NexusListener>,
}

impl Nexus {
    pub fn new(options: SessionOptions, codec_options: FrameCodecOptions, listener: Arc<dyn NexusListener>) -> Arc<Self> {
        let options = Arc::new(options);
        let xid_alloc = Arc::new(ExchangeIdAllocator::new());
        // Each channel advertises, in its own outbound frames, the
        // *sibling* direction's next expected `commandSN` (§3's cross-channel
        // invariant): `fore`'s frames carry `back`'s counter and vice versa.
        // Each channel owns and advances its own counter as its commands
        // activate; the pair of `Arc`s below is how the two sides share it.
        let fore_expected = Arc::new(AtomicU32::new(0));
        let back_expected = Arc::new(AtomicU32::new(0));

        let fore = Channel::new(options.clone(), options.fore_queue_depth, xid_alloc.clone(), back_expected.clone(), fore_expected.clone());
        let back = Channel::new(options.clone(), options.back_queue_depth, xid_alloc, fore_expected, back_expected);

        Arc::new(Self {
            options,
            fore,
            back,
            transports: Mutex::new(HashMap::new()),
            transport_ids: TransportIdAllocator::new(),
            codec_options,
            listener,
        })
    }

    pub fn with_default_listener(options: SessionOptions, codec_options: FrameCodecOptions) -> Arc<Self> {
        Self::new(options, codec_options, Arc::new(NoopListener))
    }

    /// Attach a new transport stream and spawn its read/write loop. Both
    /// channels see every attached transport; exchange ids are
    /// process-global (one allocator shared by `fore` and `back`), so
    /// routing a response to both and letting the wrong one no-op on an
    /// unrecognized id is simpler than threading channel identity through
    /// the wire format, at the cost of one wasted hash lookup per frame.
    pub async fn attach_transport<S>(self: &Arc<Self>, stream: S) -> TransportId
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.transport_ids.alloc();
        let mut transport = FramedTransport::new(id, stream, self.codec_options);
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

        let is_first = {
            let mut transports = self.transports.lock().await;
            let is_first = transports.is_empty();
            transports.insert(id, TransportRecord { outbound: tx.clone() });
            is_first
        };
        self.fore.attach(id, tx.clone()).await;
        self.back.attach(id, tx).await;

        info!(transport_id = id.0, first = is_first, "transport attached");
        if is_first {
            self.listener.nexus_established();
        } else {
            self.listener.nexus_restored();
        }

        let nexus = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = rx.recv() => {
                        match outbound {
                            Some(frame) => {
                                if let Err(err) = transport.send(frame).await {
                                    warn!(transport_id = id.0, error = %err, "frame send failed, detaching transport");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    inbound = transport.recv() => {
                        match inbound {
                            Some(Ok(frame)) => nexus.route(frame).await,
                            Some(Err(err)) => {
                                warn!(transport_id = id.0, error = %err, "frame decode error, detaching transport");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            nexus.detach_transport(id).await;
        });

        id
    }

    /// Remove a transport (peer disconnect, I/O error, or explicit close).
    /// A no-op if `id` is already gone, so both the reader loop's cleanup
    /// and an explicit caller-initiated detach can race harmlessly.
    pub async fn detach_transport(self: &Arc<Self>, id: TransportId) {
        let remaining = {
            let mut transports = self.transports.lock().await;
            if transports.remove(&id).is_none() {
                return;
            }
            transports.len()
        };

        self.fore.detach(id).await;
        self.back.detach(id).await;

        warn!(transport_id = id.0, remaining, "transport detached");
        if remaining == 0 {
            self.listener.nexus_lost();
        }
    }

    /// Route an inbound frame to the channel(s) that might own the exchange
    /// it responds to. Collaborator frame types (login, negotiate, ping)
    /// are outside the core and only logged here.
    async fn route(self: &Arc<Self>, frame: Frame) {
        match frame.frame_type {
            FrameType::CommandResp | FrameType::TaskmgmtResp => {
                self.fore.handle_inbound(frame.clone()).await;
                self.back.handle_inbound(frame).await;
            }
            FrameType::LogoutReq => {
                info!("peer initiated logout");
                self.listener.nexus_logout();
            }
            other => {
                tracing::debug!(?other, "frame type not routed by the core (login/negotiate/ping collaborator surface)");
            }
        }
    }

    /// Quiesce both channels and drop every attached transport with
    /// nexus-reset semantics (§4.4's `shutdown`).
    pub async fn shutdown(self: &Arc<Self>) {
        self.fore.shutdown().await;
        self.back.shutdown().await;
        self.transports.lock().await.clear();
        self.listener.nexus_closed();
    }

    pub async fn transport_count(&self) -> usize {
        self.transports.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::duplex;

    #[derive(Default)]
    struct CountingListener {
        established: AtomicUsize,
        lost: AtomicUsize,
    }

    impl NexusListener for CountingListener {
        fn nexus_established(&self) {
            self.established.fetch_add(1, Ordering::SeqCst);
        }
        fn nexus_lost(&self) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn attaching_first_transport_fires_established() {
        let listener = Arc::new(CountingListener::default());
        let nexus = Nexus::new(SessionOptions::default(), FrameCodecOptions::default(), listener.clone());
        let (client, _server) = duplex(4096);
        nexus.attach_transport(client).await;
        tokio::task::yield_now().await;
        assert_eq!(listener.established.load(Ordering::SeqCst), 1);
        assert_eq!(nexus.transport_count().await, 1);
    }

    #[tokio::test]
    async fn detaching_last_transport_fires_lost() {
        let listener = Arc::new(CountingListener::default());
        let nexus = Nexus::new(SessionOptions::default(), FrameCodecOptions::default(), listener.clone());
        let (client, server) = duplex(4096);
        let id = nexus.attach_transport(client).await;
        drop(server);
        // Give the reader loop a chance to observe EOF and self-detach.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        nexus.detach_transport(id).await;
        assert_eq!(nexus.transport_count().await, 0);
        assert!(listener.lost.load(Ordering::SeqCst) >= 1);
    }
}
