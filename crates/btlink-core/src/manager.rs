//! The link state machine.
//!
//! One lock guards the state and the worker table. It is held only while
//! swapping handles and flipping state: never across an `.await`, never
//! across a join. Workers re-enter through [`Inner::promote`] and the
//! failure callbacks, which take the same lock and check that the caller is
//! still the current worker of its kind before acting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;

use crate::transport::{Listener, StreamHandle, Transport};
use crate::event::{event_queue, EventSender};
use crate::worker::session::SessionWriter;
use crate::worker::{self, WorkerHandle, WorkerKind};
use crate::{
    LinkConfig, LinkError, LinkEvent, LinkEvents, LinkState, LinkStats, PeerAddr, PeerInfo,
    TransportError,
};

/// Who is asking for a stream to be promoted.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Origin {
    Listen(u64),
    Dial(u64),
    /// A direct call to [`LinkManager::connected`].
    External,
}

struct SessionSlot {
    handle: WorkerHandle,
    peer: PeerAddr,
    writer: Arc<SessionWriter>,
}

struct Table {
    state: LinkState,
    listen: Option<WorkerHandle>,
    dial: Option<WorkerHandle>,
    session: Option<SessionSlot>,
}

impl Table {
    fn set_state(&mut self, next: LinkState) {
        if self.state != next {
            tracing::debug!("state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn cancel_listen(&mut self) {
        if let Some(handle) = self.listen.take() {
            handle.cancel();
        }
    }

    fn cancel_dial(&mut self) {
        if let Some(handle) = self.dial.take() {
            handle.cancel();
        }
    }

    fn cancel_session(&mut self) {
        if let Some(slot) = self.session.take() {
            slot.handle.cancel();
        }
    }

    fn accepts(&self, origin: Origin) -> bool {
        match origin {
            Origin::External => true,
            Origin::Listen(id) => {
                matches!(self.state, LinkState::Listening | LinkState::Connecting)
                    && self.listen.as_ref().is_some_and(|h| h.is_live(id))
            }
            Origin::Dial(id) => self.dial.as_ref().is_some_and(|h| h.is_live(id)),
        }
    }
}

pub(crate) struct Inner {
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    runtime: Handle,
    table: Mutex<Table>,
    events: EventSender,
    stats: Arc<LinkStats>,
    next_worker: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, kind: WorkerKind) -> WorkerHandle {
        WorkerHandle::new(self.next_worker.fetch_add(1, Ordering::Relaxed), kind)
    }

    fn emit(&self, event: LinkEvent) {
        self.events.notify(event);
    }

    fn start_locked(self: &Arc<Self>, table: &mut Table) -> Result<(), TransportError> {
        table.cancel_dial();
        table.cancel_session();

        // A listener that has cancelled itself is on its way out.
        if !table.listen.as_ref().is_some_and(|h| !h.token.is_cancelled()) {
            table.cancel_listen();
            let listener = match self
                .transport
                .listen(&self.config.service_name, self.config.service_uuid)
            {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!("listen() failed: {e}");
                    table.set_state(LinkState::Idle);
                    return Err(e);
                }
            };
            table.listen = Some(self.spawn_listen(listener));
        }

        table.set_state(LinkState::Listening);
        Ok(())
    }

    /// Restart listening after a failure, reporting rather than returning errors.
    fn restart_locked(self: &Arc<Self>, table: &mut Table) {
        if let Err(e) = self.start_locked(table) {
            self.emit(LinkEvent::ListenFailed {
                reason: e.to_string(),
            });
        }
    }

    fn spawn_listen(self: &Arc<Self>, listener: Box<dyn Listener>) -> WorkerHandle {
        let handle = self.handle(WorkerKind::Listen);
        let ctx = handle.context(Arc::downgrade(self), self.stats.clone());
        self.runtime.spawn(worker::listen::run(ctx, listener));
        handle
    }

    fn spawn_dial(self: &Arc<Self>, peer: PeerAddr) -> WorkerHandle {
        let handle = self.handle(WorkerKind::Dial);
        let ctx = handle.context(Arc::downgrade(self), self.stats.clone());
        self.runtime.spawn(worker::dial::run(
            ctx,
            self.transport.clone(),
            peer,
            self.config.service_uuid,
        ));
        handle
    }

    fn spawn_session(self: &Arc<Self>, stream: StreamHandle) -> SessionSlot {
        let handle = self.handle(WorkerKind::Session);
        let ctx = handle.context(Arc::downgrade(self), self.stats.clone());
        let (peer, io) = stream.into_parts();
        let (reader, writer) = tokio::io::split(io);
        let writer = Arc::new(SessionWriter::new(
            peer,
            writer,
            handle.token.clone(),
            self.events.clone(),
            self.stats.clone(),
        ));
        self.runtime.spawn(worker::session::run(
            ctx,
            peer,
            reader,
            writer.clone(),
            self.events.clone(),
            self.config.read_buffer,
        ));
        SessionSlot {
            handle,
            peer,
            writer,
        }
    }

    /// Close a stream that lost the rendezvous.
    fn discard(&self, stream: StreamHandle) {
        tracing::debug!(peer = %stream.peer(), "closing surplus stream");
        self.stats.surplus_closed.inc();
        self.runtime.spawn(stream.close());
    }

    /// Make `stream` the single active session, unless `origin` is stale.
    pub(crate) fn promote(self: &Arc<Self>, stream: StreamHandle, origin: Origin) -> bool {
        let mut table = self.lock();
        if !table.accepts(origin) {
            drop(table);
            tracing::debug!(?origin, "promotion refused");
            self.discard(stream);
            return false;
        }

        table.cancel_dial();
        table.cancel_session();
        table.cancel_listen();

        let peer = stream.peer();
        // Queued ahead of anything the new session reads.
        self.emit(LinkEvent::PeerConnected { peer });
        table.session = Some(self.spawn_session(stream));
        table.set_state(LinkState::Connected);
        self.stats.promotions.inc();
        tracing::info!(%peer, ?origin, "connected");
        true
    }

    pub(crate) fn dial_failed(self: &Arc<Self>, id: u64, peer: PeerAddr, error: TransportError) {
        let mut table = self.lock();
        if !table.dial.as_ref().is_some_and(|h| h.is_live(id)) {
            tracing::debug!(%peer, "stale dial failure ignored");
            return;
        }
        table.dial = None;

        self.stats.connect_failures.inc();
        tracing::warn!(%peer, "connection failed: {error}");
        self.emit(LinkEvent::ConnectFailed { peer });
        self.restart_locked(&mut table);
    }

    pub(crate) fn session_lost(self: &Arc<Self>, id: u64, peer: PeerAddr) {
        let mut table = self.lock();
        if !table.session.as_ref().is_some_and(|s| s.handle.is_live(id)) {
            return;
        }
        table.cancel_session();

        self.stats.connections_lost.inc();
        self.emit(LinkEvent::ConnectionLost { peer });
        self.restart_locked(&mut table);
    }

    pub(crate) fn listen_ended(&self, id: u64, failure: Option<TransportError>) {
        let mut table = self.lock();
        if !table.listen.as_ref().is_some_and(|h| h.id == id) {
            return;
        }
        table.listen = None;
        if let Some(e) = failure {
            self.emit(LinkEvent::ListenFailed {
                reason: e.to_string(),
            });
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let table = self.table.get_mut().unwrap_or_else(PoisonError::into_inner);
        table.cancel_dial();
        table.cancel_session();
        table.cancel_listen();
    }
}

/// Single-session link over an injected [`Transport`].
///
/// Cheap to clone; all clones drive the same state machine. Dropping the
/// last clone cancels every worker.
#[derive(Clone)]
pub struct LinkManager {
    inner: Arc<Inner>,
}

impl LinkManager {
    /// Create an idle manager on the current tokio runtime.
    ///
    /// Returns the manager and the receiver for its [`LinkEvent`]s.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: LinkConfig,
    ) -> Result<(Self, LinkEvents), LinkError> {
        let runtime = Handle::try_current().map_err(|_| LinkError::NoRuntime)?;
        Self::with_runtime(transport, config, runtime)
    }

    /// Create an idle manager whose workers run on `runtime`.
    pub fn with_runtime(
        transport: Arc<dyn Transport>,
        config: LinkConfig,
        runtime: Handle,
    ) -> Result<(Self, LinkEvents), LinkError> {
        config.validate()?;
        let (events, events_rx) = event_queue(config.event_buffer);
        let inner = Arc::new(Inner {
            transport,
            config,
            runtime,
            table: Mutex::new(Table {
                state: LinkState::Idle,
                listen: None,
                dial: None,
                session: None,
            }),
            events,
            stats: Arc::new(LinkStats::default()),
            next_worker: AtomicU64::new(1),
        });
        Ok((Self { inner }, events_rx))
    }

    /// Enter listening mode.
    ///
    /// Cancels any dial and any session, then makes sure exactly one
    /// listening endpoint is open. Calling it again while listening opens
    /// nothing new.
    pub fn start(&self) -> Result<(), LinkError> {
        let mut table = self.inner.lock();
        self.inner.start_locked(&mut table)?;
        Ok(())
    }

    /// Cancel every worker and go idle.
    ///
    /// Returns without waiting for the tasks to exit; none of them can
    /// promote a stream afterwards.
    pub fn stop(&self) {
        let mut table = self.inner.lock();
        table.cancel_dial();
        table.cancel_session();
        table.cancel_listen();
        table.set_state(LinkState::Idle);
    }

    /// Dial `peer`, replacing any attempt in flight.
    ///
    /// An active listener keeps running; whichever stream arrives first wins.
    pub fn connect(&self, peer: PeerAddr) {
        let mut table = self.inner.lock();
        table.cancel_dial();
        table.cancel_session();
        table.dial = Some(self.inner.spawn_dial(peer));
        table.set_state(LinkState::Connecting);
    }

    /// Promote `stream` to the active session, superseding anything else.
    pub fn connected(&self, stream: StreamHandle) {
        self.inner.promote(stream, Origin::External);
    }

    /// Send bytes on the active session.
    ///
    /// Dropped silently when not connected. The lock is released before
    /// the transfer starts.
    pub async fn write(&self, bytes: &[u8]) {
        let writer = {
            let table = self.inner.lock();
            match (table.state, &table.session) {
                (LinkState::Connected, Some(slot)) => slot.writer.clone(),
                (state, _) => {
                    tracing::debug!(len = bytes.len(), %state, "write dropped: not connected");
                    return;
                }
            }
        };
        writer.write(bytes).await;
    }

    pub fn state(&self) -> LinkState {
        self.inner.lock().state
    }

    /// Peer of the active session, if any.
    pub fn connected_peer(&self) -> Option<PeerAddr> {
        self.inner.lock().session.as_ref().map(|s| s.peer)
    }

    /// Bonded peers known to the transport.
    pub fn saved_peers(&self) -> Vec<PeerInfo> {
        self.inner.transport.saved_peers()
    }

    pub fn stats(&self) -> Arc<LinkStats> {
        self.inner.stats.clone()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.lock();
        f.debug_struct("LinkManager")
            .field("state", &table.state)
            .field("listening", &table.listen.is_some())
            .field("dialing", &table.dial.is_some())
            .field("peer", &table.session.as_ref().map(|s| s.peer))
            .finish()
    }
}
