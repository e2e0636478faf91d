//! Transport adapter boundary.
//!
//! The manager never touches a radio directly. An adapter (RFCOMM on a
//! device, TCP in `btlink-tcp`, [`mock::MockTransport`] in tests) is injected
//! at construction and provides listening, dialing and discovery.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{PeerAddr, PeerInfo, TransportError};

/// Full-duplex byte stream returned by a transport.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> ByteStream for T {}

/// An established stream plus the peer on the other end.
///
/// Owned by exactly one worker at a time. Dropping it closes the stream.
pub struct StreamHandle {
    peer: PeerAddr,
    io: Box<dyn ByteStream>,
}

impl StreamHandle {
    pub fn new(peer: PeerAddr, io: impl ByteStream) -> Self {
        Self {
            peer,
            io: Box::new(io),
        }
    }

    pub fn peer(&self) -> PeerAddr {
        self.peer
    }

    /// Shut down the write side and release the stream.
    pub async fn close(mut self) {
        if let Err(e) = self.io.shutdown().await {
            tracing::debug!(peer = %self.peer, "close of stream failed: {e}");
        }
    }

    pub(crate) fn into_parts(self) -> (PeerAddr, Box<dyn ByteStream>) {
        (self.peer, self.io)
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Events a transport pushes while a discovery scan runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Started,
    Found(PeerInfo),
    Finished,
}

/// An open listening endpoint. Dropping it closes the endpoint.
#[async_trait::async_trait]
pub trait Listener: Send {
    /// Wait for the next inbound stream.
    async fn accept(&mut self) -> Result<StreamHandle, TransportError>;
}

/// Capabilities the manager consumes from the underlying radio.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Peers already bonded with this device.
    fn saved_peers(&self) -> Vec<PeerInfo>;

    /// Open a listening endpoint advertising the given service record.
    ///
    /// Must not block: it registers the record and returns.
    fn listen(
        &self,
        service_name: &str,
        service_uuid: Uuid,
    ) -> Result<Box<dyn Listener>, TransportError>;

    /// Open an outbound stream to `peer` for the given service.
    async fn connect(
        &self,
        peer: &PeerAddr,
        service_uuid: Uuid,
    ) -> Result<StreamHandle, TransportError>;

    /// Secondary connection method, tried once after `connect` fails.
    async fn connect_fallback(&self, peer: &PeerAddr) -> Result<StreamHandle, TransportError> {
        let _ = peer;
        Err(TransportError::FallbackUnsupported)
    }

    /// Begin a discovery scan, pushing results into `events`.
    fn start_discovery(&self, events: mpsc::Sender<DiscoveryEvent>)
        -> Result<(), TransportError>;

    /// Stop any running scan. Dialing requires the radio to be free.
    fn cancel_discovery(&self);

    fn is_discovering(&self) -> bool;
}

// ── MockTransport (tests) ───────────────────────────────────────────
