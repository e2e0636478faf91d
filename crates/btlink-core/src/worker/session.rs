use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::event::EventSender;
use crate::transport::ByteStream;
use crate::{LinkEvent, LinkStats, PeerAddr};

use super::WorkerContext;

/// Write side of the active session, shared with callers of
/// [`LinkManager::write`](crate::LinkManager::write).
pub(crate) struct SessionWriter {
    peer: PeerAddr,
    io: Mutex<WriteHalf<Box<dyn ByteStream>>>,
    token: CancellationToken,
    events: EventSender,
    stats: Arc<LinkStats>,
}

impl SessionWriter {
    pub fn new(
        peer: PeerAddr,
        io: WriteHalf<Box<dyn ByteStream>>,
        token: CancellationToken,
        events: EventSender,
        stats: Arc<LinkStats>,
    ) -> Self {
        Self {
            peer,
            io: Mutex::new(io),
            token,
            events,
            stats,
        }
    }

    /// Write all of `bytes`. Failures are reported as [`LinkEvent::WriteFailed`].
    pub async fn write(&self, bytes: &[u8]) {
        if self.token.is_cancelled() {
            return;
        }
        let mut io = self.io.lock().await;
        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => return,
            result = async {
                io.write_all(bytes).await?;
                io.flush().await
            } => result,
        };

        match result {
            Ok(()) => self.stats.bytes_sent.add(bytes.len() as u64),
            Err(e) => {
                tracing::warn!(peer = %self.peer, "write failed: {e}");
                self.events.notify(LinkEvent::WriteFailed {
                    peer: self.peer,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn close(&self) {
        let mut io = self.io.lock().await;
        if let Err(e) = io.shutdown().await {
            tracing::trace!(peer = %self.peer, "shutdown failed: {e}");
        }
    }
}

/// Pump inbound bytes until the stream fails or the session is cancelled.
///
/// A failure (including a clean close by the peer) is reported to the
/// manager as a lost connection. Cancellation exits silently.
pub(crate) async fn run(
    ctx: WorkerContext,
    peer: PeerAddr,
    mut reader: ReadHalf<Box<dyn ByteStream>>,
    writer: Arc<SessionWriter>,
    events: EventSender,
    read_buffer: usize,
) {
    let stats = ctx.stats.clone();
    let _live = stats.live_workers.track();
    let _session = stats.live_sessions.track();
    tracing::debug!(id = ctx.id, %peer, "session started");

    let mut buf = vec![0u8; read_buffer];
    let lost: Option<String> = loop {
        let read = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => break None,
            result = reader.read(&mut buf) => result,
        };

        match read {
            Ok(0) => break Some("stream closed by peer".to_string()),
            Ok(n) => {
                stats.bytes_received.add(n as u64);
                let data = Bytes::copy_from_slice(&buf[..n]);
                tokio::select! {
                    biased;
                    _ = ctx.token.cancelled() => break None,
                    _ = events.deliver(peer, data) => {}
                }
            }
            Err(e) => break Some(e.to_string()),
        }
    };

    writer.close().await;
    drop(reader);

    match lost {
        None => tracing::debug!(id = ctx.id, %peer, "session cancelled"),
        Some(reason) => {
            tracing::warn!(%peer, "connection lost: {reason}");
            if let Some(manager) = ctx.manager.upgrade() {
                manager.session_lost(ctx.id, peer);
            }
        }
    }
}
