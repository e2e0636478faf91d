use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btlink_core::{
    DiscoveryEvent, Listener, PeerAddr, PeerInfo, StreamHandle, Transport, TransportError, Uuid,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::handshake;
use crate::{PeerEntry, PeerTable, TcpError};

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// [`Transport`] over TCP, with a [`PeerTable`] standing in for the radio's
/// neighbourhood.
///
/// The listening socket is shared by every open endpoint, so a restart never
/// races the previous endpoint's teardown for the port. It is closed when the
/// last endpoint goes away: while no endpoint is open, dials are refused
/// rather than parked in the kernel backlog.
pub struct TcpTransport {
    local: PeerAddr,
    bind: SocketAddr,
    runtime: Handle,
    table: Mutex<PeerTable>,
    bound: Arc<Mutex<Bound>>,
    scan: Mutex<Option<CancellationToken>>,
    scan_interval: Duration,
}

impl TcpTransport {
    /// Must be called from within a tokio runtime.
    pub fn new(local: PeerAddr, bind: SocketAddr, table: PeerTable) -> Result<Self, TcpError> {
        let runtime = Handle::try_current().map_err(|_| TcpError::NoRuntime)?;
        Ok(Self {
            local,
            bind,
            runtime,
            table: Mutex::new(table),
            bound: Arc::default(),
            scan: Mutex::new(None),
            scan_interval: DEFAULT_SCAN_INTERVAL,
        })
    }

    /// Delay between successive `Found` events during a scan.
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn local_addr(&self) -> PeerAddr {
        self.local
    }

    /// The socket address endpoints listen on, resolving port 0 with a
    /// throwaway bind if no endpoint has been opened yet.
    pub fn bound_addr(&self) -> Result<SocketAddr, TcpError> {
        let mut bound = lock(&self.bound);
        if let Some(addr) = bound.resolved {
            return Ok(addr);
        }
        let (_, addr) = self.bind_std(&mut bound)?;
        Ok(addr)
    }

    /// True while at least one endpoint holds the listening socket open.
    pub fn is_listening(&self) -> bool {
        lock(&self.bound).endpoints > 0
    }

    pub fn add_peer(&self, entry: PeerEntry) {
        self.table().upsert(entry);
    }

    pub fn peers(&self) -> Vec<PeerEntry> {
        self.table().peers.clone()
    }

    fn table(&self) -> MutexGuard<'_, PeerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, peer: &PeerAddr) -> Result<PeerEntry, TransportError> {
        self.table()
            .get(peer)
            .cloned()
            .ok_or(TransportError::UnknownPeer(*peer))
    }

    /// Bind the configured address, or the one resolved by an earlier bind
    /// so that port 0 keeps the port it was first given.
    fn bind_std(
        &self,
        bound: &mut Bound,
    ) -> Result<(std::net::TcpListener, SocketAddr), TcpError> {
        let addr = bound.resolved.unwrap_or(self.bind);
        let bind_err = |source| TcpError::Bind { addr, source };
        let std_listener = std::net::TcpListener::bind(addr).map_err(bind_err)?;
        let resolved = std_listener.local_addr().map_err(bind_err)?;
        bound.resolved = Some(resolved);
        Ok((std_listener, resolved))
    }

    /// Take a share of the listening socket, binding it if nobody holds it.
    fn acquire(&self) -> Result<Arc<TcpListener>, TcpError> {
        let mut bound = lock(&self.bound);
        let socket = match bound.socket.clone() {
            Some(socket) => socket,
            None => {
                let (std_listener, addr) = self.bind_std(&mut bound)?;
                let bind_err = |source| TcpError::Bind { addr, source };
                std_listener.set_nonblocking(true).map_err(bind_err)?;
                let socket = {
                    let _guard = self.runtime.enter();
                    Arc::new(TcpListener::from_std(std_listener).map_err(bind_err)?)
                };
                tracing::info!(%addr, "listening socket bound");
                bound.socket = Some(socket.clone());
                socket
            }
        };
        bound.endpoints += 1;
        Ok(socket)
    }

    async fn dial(
        &self,
        peer: PeerAddr,
        addr: SocketAddr,
        service: Uuid,
    ) -> Result<StreamHandle, TransportError> {
        tracing::debug!(%peer, %addr, "dialing");
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tokio::time::timeout(
            handshake::TIMEOUT,
            handshake::offer(&mut stream, service, self.local),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "handshake timed out"))??;
        Ok(StreamHandle::new(peer, stream))
    }

    fn swap_scan(&self, next: Option<CancellationToken>) -> Option<CancellationToken> {
        let mut slot = self.scan.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, next)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn saved_peers(&self) -> Vec<PeerInfo> {
        self.table().bonded().map(PeerEntry::info).collect()
    }

    fn listen(
        &self,
        service_name: &str,
        service_uuid: Uuid,
    ) -> Result<Box<dyn Listener>, TransportError> {
        let socket = self
            .acquire()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        tracing::debug!(service = service_name, %service_uuid, "endpoint opened");
        Ok(Box::new(TcpEndpoint {
            socket,
            service: service_uuid,
            bound: self.bound.clone(),
        }))
    }

    async fn connect(
        &self,
        peer: &PeerAddr,
        service_uuid: Uuid,
    ) -> Result<StreamHandle, TransportError> {
        let entry = self.entry(peer)?;
        self.dial(*peer, entry.primary, service_uuid).await
    }

    async fn connect_fallback(&self, peer: &PeerAddr) -> Result<StreamHandle, TransportError> {
        let entry = self.entry(peer)?;
        let addr = entry.fallback.ok_or(TransportError::FallbackUnsupported)?;
        // No service lookup on the fallback path.
        self.dial(*peer, addr, Uuid::nil()).await
    }

    fn start_discovery(
        &self,
        events: mpsc::Sender<DiscoveryEvent>,
    ) -> Result<(), TransportError> {
        let token = CancellationToken::new();
        if let Some(previous) = self.swap_scan(Some(token.clone())) {
            previous.cancel();
        }
        let found: Vec<PeerInfo> = self.table().peers.iter().map(PeerEntry::info).collect();
        self.runtime
            .spawn(scan(found, events, token, self.scan_interval));
        Ok(())
    }

    fn cancel_discovery(&self) {
        if let Some(token) = self.swap_scan(None) {
            token.cancel();
        }
    }

    fn is_discovering(&self) -> bool {
        let slot = self.scan.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().is_some_and(|t| !t.is_cancelled())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.cancel_discovery();
    }
}

#[derive(Default)]
struct Bound {
    resolved: Option<SocketAddr>,
    socket: Option<Arc<TcpListener>>,
    endpoints: usize,
}

fn lock(bound: &Mutex<Bound>) -> MutexGuard<'_, Bound> {
    bound.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One listening endpoint over the shared socket.
struct TcpEndpoint {
    socket: Arc<TcpListener>,
    service: Uuid,
    bound: Arc<Mutex<Bound>>,
}

impl Drop for TcpEndpoint {
    fn drop(&mut self) {
        let mut bound = lock(&self.bound);
        bound.endpoints = bound.endpoints.saturating_sub(1);
        if bound.endpoints == 0 {
            // The socket closes with this endpoint's share, resetting
            // anything still queued in the backlog.
            bound.socket = None;
            tracing::debug!("listening socket released");
        }
    }
}

#[async_trait]
impl Listener for TcpEndpoint {
    async fn accept(&mut self) -> Result<StreamHandle, TransportError> {
        loop {
            let (mut stream, remote) = self.socket.accept().await?;
            let answered =
                tokio::time::timeout(handshake::TIMEOUT, handshake::answer(&mut stream, self.service))
                    .await;
            match answered {
                Ok(Ok(peer)) => {
                    stream.set_nodelay(true)?;
                    tracing::debug!(%peer, %remote, "inbound stream");
                    return Ok(StreamHandle::new(peer, stream));
                }
                // A bad preamble costs that connection only.
                Ok(Err(e)) => tracing::warn!(%remote, "handshake failed: {e}"),
                Err(_) => tracing::warn!(%remote, "handshake timed out"),
            }
        }
    }
}

async fn scan(
    found: Vec<PeerInfo>,
    events: mpsc::Sender<DiscoveryEvent>,
    token: CancellationToken,
    interval: Duration,
) {
    if events.send(DiscoveryEvent::Started).await.is_ok() {
        for info in found {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if events.send(DiscoveryEvent::Found(info)).await.is_err() {
                break;
            }
        }
    }
    token.cancel();
    let _ = events.send(DiscoveryEvent::Finished).await;
}
