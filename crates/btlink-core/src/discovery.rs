//! Discovery scan boundary.
//!
//! Runs independently of the [`LinkManager`](crate::LinkManager); the two
//! only meet at [`Transport::cancel_discovery`], which every dial calls
//! before connecting.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::{DiscoveryEvent, Transport};
use crate::{LinkError, PeerAddr};

/// Raw events buffered between the transport and the forwarding task.
const RAW_BUFFER: usize = 64;

/// Starts and stops scans and forwards newly found, unbonded peers.
pub struct DiscoveryScanner {
    transport: Arc<dyn Transport>,
    runtime: Handle,
    events: mpsc::Sender<DiscoveryEvent>,
    forwarder: Mutex<Option<CancellationToken>>,
}

impl DiscoveryScanner {
    pub fn new(
        transport: Arc<dyn Transport>,
        buffer: usize,
    ) -> Result<(Self, mpsc::Receiver<DiscoveryEvent>), LinkError> {
        let runtime = Handle::try_current().map_err(|_| LinkError::NoRuntime)?;
        let (events, events_rx) = mpsc::channel(buffer.max(1));
        Ok((
            Self {
                transport,
                runtime,
                events,
                forwarder: Mutex::new(None),
            },
            events_rx,
        ))
    }

    /// Start a fresh scan, cancelling one already in progress.
    pub fn start(&self) -> Result<(), LinkError> {
        if self.transport.is_discovering() {
            self.transport.cancel_discovery();
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.swap_forwarder(Some(token.clone())) {
            previous.cancel();
        }

        let (raw_tx, raw_rx) = mpsc::channel(RAW_BUFFER);
        self.runtime
            .spawn(forward(raw_rx, self.events.clone(), token.clone()));

        if let Err(e) = self.transport.start_discovery(raw_tx) {
            token.cancel();
            return Err(e.into());
        }
        tracing::debug!("discovery started");
        Ok(())
    }

    /// Stop the scan. The transport reports `Finished` if it was running.
    pub fn stop(&self) {
        self.transport.cancel_discovery();
        tracing::debug!("discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        self.transport.is_discovering()
    }

    fn swap_forwarder(&self, next: Option<CancellationToken>) -> Option<CancellationToken> {
        let mut slot = self.forwarder.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, next)
    }
}

impl Drop for DiscoveryScanner {
    fn drop(&mut self) {
        if let Some(token) = self.swap_forwarder(None) {
            token.cancel();
        }
    }
}

/// Relay one scan's events, dropping bonded peers and repeats.
async fn forward(
    mut raw: mpsc::Receiver<DiscoveryEvent>,
    events: mpsc::Sender<DiscoveryEvent>,
    token: CancellationToken,
) {
    let mut seen: HashSet<PeerAddr> = HashSet::new();
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = raw.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let finished = event == DiscoveryEvent::Finished;
        match &event {
            DiscoveryEvent::Found(info) if info.bonded => continue,
            DiscoveryEvent::Found(info) if !seen.insert(info.addr) => continue,
            DiscoveryEvent::Found(info) => tracing::debug!(peer = %info.addr, "found {}", info.label()),
            _ => {}
        }
        if events.send(event).await.is_err() || finished {
            break;
        }
    }
}
