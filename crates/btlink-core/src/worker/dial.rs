use std::sync::Arc;

use uuid::Uuid;

use crate::manager::Origin;
use crate::transport::{StreamHandle, Transport};
use crate::{PeerAddr, TransportError};

use super::WorkerContext;

/// One outbound attempt: primary method, then the fallback once, no retry.
pub(crate) async fn run(
    ctx: WorkerContext,
    transport: Arc<dyn Transport>,
    peer: PeerAddr,
    service_uuid: Uuid,
) {
    let stats = ctx.stats.clone();
    let _live = stats.live_workers.track();
    tracing::debug!(id = ctx.id, %peer, "dial worker started");

    // Discovery and an outbound connect cannot share the radio.
    transport.cancel_discovery();

    let outcome = tokio::select! {
        biased;
        _ = ctx.token.cancelled() => {
            // Dropping the attempt closes the half-open socket.
            tracing::debug!(%peer, "dial cancelled");
            return;
        }
        result = attempt(transport.as_ref(), &peer, service_uuid) => result,
    };

    let Some(manager) = ctx.manager.upgrade() else {
        if let Ok(stream) = outcome {
            stream.close().await;
        }
        return;
    };

    match outcome {
        Ok(stream) => {
            manager.promote(stream, Origin::Dial(ctx.id));
        }
        Err(e) => manager.dial_failed(ctx.id, peer, e),
    }
}

async fn attempt(
    transport: &dyn Transport,
    peer: &PeerAddr,
    service_uuid: Uuid,
) -> Result<StreamHandle, TransportError> {
    let primary = match transport.connect(peer, service_uuid).await {
        Ok(stream) => return Ok(stream),
        Err(e) => e,
    };
    tracing::debug!(%peer, "connect failed ({primary}), trying fallback");

    match transport.connect_fallback(peer).await {
        Ok(stream) => Ok(stream),
        Err(TransportError::FallbackUnsupported) => Err(primary),
        Err(e) => {
            tracing::debug!(%peer, "fallback failed: {e}");
            Err(e)
        }
    }
}
