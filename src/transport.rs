//! A single ordered, reliable, bidirectional byte-stream connection.
//!
//! The core treats a transport as an opaque framed duplex stream plus a
//! stable identity; actual socket types (TCP, Unix domain, named pipe) are
//! collaborators that implement [`tokio::io::AsyncRead`] +
//! [`tokio::io::AsyncWrite`] and get wrapped in [`FramedTransport`].

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::frame::{Frame, FrameCodec, FrameCodecOptions};

/// Stable per-session identity for one transport, assigned at `attach` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u32);

#[derive(Debug, Default)]
pub struct TransportIdAllocator {
    next: AtomicU32,
}

impl TransportIdAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU32::new(1) }
    }

    pub fn alloc(&self) -> TransportId {
        TransportId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// A transport wraps an underlying byte stream with the session frame
/// codec. Frame decode runs on the inbound I/O context; frame encode runs
/// on whichever context calls [`FramedTransport::send`] (the dispatching
/// command's own task, per §5).
pub struct FramedTransport<S> {
    pub id: TransportId,
    inner: Framed<S, FrameCodec>,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: TransportId, stream: S, options: FrameCodecOptions) -> Self {
        Self { id, inner: Framed::new(stream, FrameCodec::new(options)) }
    }

    pub async fn send(&mut self, frame: Frame) -> Result<(), crate::frame::FrameError> {
        use futures_util::SinkExt;
        self.inner.send(frame).await
    }

    pub async fn recv(&mut self) -> Option<Result<Frame, crate::frame::FrameError>> {
        use futures_util::StreamExt;
        self.inner.next().await
    }
}
