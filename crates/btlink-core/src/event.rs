use std::sync::Arc;

use bytes::Bytes;
use btlink_metrics::{Counter, Gauge};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

use crate::PeerAddr;

/// Connection state of a [`LinkManager`](crate::LinkManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    /// Nothing running.
    Idle,
    /// Waiting for an inbound connection.
    Listening,
    /// An outbound attempt is in flight (a listener may be racing it).
    Connecting,
    /// A session is live.
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Idle => write!(f, "IDLE"),
            LinkState::Listening => write!(f, "LISTENING"),
            LinkState::Connecting => write!(f, "CONNECTING"),
            LinkState::Connected => write!(f, "CONNECTED"),
        }
    }
}

/// Notifications delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A stream was promoted to the active session.
    PeerConnected { peer: PeerAddr },
    /// Bytes read from the active session, as received (no framing).
    BytesReceived { peer: PeerAddr, data: Bytes },
    /// The active session failed or the peer closed it. Listening resumes.
    ConnectionLost { peer: PeerAddr },
    /// An outbound attempt failed, fallback included. Listening resumes.
    ConnectFailed { peer: PeerAddr },
    /// A write on the active session failed. Not retried.
    WriteFailed { peer: PeerAddr, reason: String },
    /// The listening endpoint stopped accepting or could not be reopened.
    ListenFailed { reason: String },
}

/// Live counters for one manager. Serializes to a flat JSON object.
#[derive(Debug, Default, serde::Serialize)]
pub struct LinkStats {
    pub promotions: Counter,
    /// Streams that lost the rendezvous and were closed unpromoted.
    pub surplus_closed: Counter,
    pub connect_failures: Counter,
    pub connections_lost: Counter,
    pub bytes_received: Counter,
    pub bytes_sent: Counter,
    /// Listen, dial and session tasks that have not exited yet.
    pub live_workers: Gauge,
    pub live_sessions: Gauge,
}

/// An event in the queue. Inbound bytes hold a credit until received.
struct Queued {
    event: LinkEvent,
    _credit: Option<OwnedSemaphorePermit>,
}

/// Build the event queue. At most `byte_credits` [`LinkEvent::BytesReceived`]
/// wait in it at once; lifecycle events are never held back or dropped.
pub(crate) fn event_queue(byte_credits: usize) -> (EventSender, LinkEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = EventSender {
        tx,
        credits: Arc::new(Semaphore::new(byte_credits)),
    };
    (sender, LinkEvents { rx })
}

#[derive(Clone)]
pub(crate) struct EventSender {
    tx: mpsc::UnboundedSender<Queued>,
    credits: Arc<Semaphore>,
}

impl EventSender {
    /// Queue a lifecycle event. Only fails when the receiver is gone.
    pub fn notify(&self, event: LinkEvent) {
        let queued = Queued {
            event,
            _credit: None,
        };
        if self.tx.send(queued).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }

    /// Queue inbound bytes, waiting while the application is behind.
    pub async fn deliver(&self, peer: PeerAddr, data: Bytes) {
        if self.tx.is_closed() {
            return;
        }
        let Ok(credit) = self.credits.clone().acquire_owned().await else {
            return;
        };
        let queued = Queued {
            event: LinkEvent::BytesReceived { peer, data },
            _credit: Some(credit),
        };
        if self.tx.send(queued).is_err() {
            tracing::trace!(%peer, "event receiver dropped");
        }
    }
}

/// Receiving end of a manager's [`LinkEvent`]s, in the order they happened.
pub struct LinkEvents {
    rx: mpsc::UnboundedReceiver<Queued>,
}

impl LinkEvents {
    /// Next event, or `None` once the manager and all its workers are gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.rx.recv().await.map(|q| q.event)
    }

    pub fn try_recv(&mut self) -> Result<LinkEvent, TryRecvError> {
        self.rx.try_recv().map(|q| q.event)
    }
}

impl std::fmt::Debug for LinkEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkEvents").finish_non_exhaustive()
    }
}
