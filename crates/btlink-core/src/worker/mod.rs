//! Background tasks owned by the [`LinkManager`](crate::LinkManager).
//!
//! Each worker runs on its own tokio task and talks back to the manager
//! through a `Weak` reference, so a dropped manager lets them wind down.
//! Cancellation is a [`CancellationToken`] that the manager fires while
//! holding its lock; workers observe it in a biased `select!` and never
//! block the canceller.

pub(crate) mod dial;
pub(crate) mod listen;
pub(crate) mod session;

use std::fmt;
use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use crate::manager::Inner;
use crate::LinkStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerKind {
    Listen,
    Dial,
    Session,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Listen => write!(f, "listen"),
            WorkerKind::Dial => write!(f, "dial"),
            WorkerKind::Session => write!(f, "session"),
        }
    }
}

/// The manager's reference to a running worker.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    pub id: u64,
    pub kind: WorkerKind,
    pub token: CancellationToken,
}

impl WorkerHandle {
    pub fn new(id: u64, kind: WorkerKind) -> Self {
        Self {
            id,
            kind,
            token: CancellationToken::new(),
        }
    }

    /// True while this handle is the manager's current worker.
    pub fn is_live(&self, id: u64) -> bool {
        self.id == id && !self.token.is_cancelled()
    }

    /// Fire-and-forget: signals the task and returns immediately.
    pub fn cancel(self) {
        tracing::trace!(id = self.id, "cancel {} worker", self.kind);
        self.token.cancel();
    }

    pub fn context(&self, manager: Weak<Inner>, stats: Arc<LinkStats>) -> WorkerContext {
        WorkerContext {
            manager,
            id: self.id,
            token: self.token.clone(),
            stats,
        }
    }
}

/// What a worker task carries: who to report to and how to notice cancellation.
pub(crate) struct WorkerContext {
    pub manager: Weak<Inner>,
    pub id: u64,
    pub token: CancellationToken,
    pub stats: Arc<LinkStats>,
}
