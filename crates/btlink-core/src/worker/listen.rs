use crate::manager::Origin;
use crate::transport::Listener;
use crate::TransportError;

use super::WorkerContext;

/// Accept inbound streams until cancelled or the endpoint fails.
///
/// Every accepted stream is offered to the manager; the manager decides
/// whether it wins the rendezvous or is surplus. An accept error ends the
/// loop without reopening the endpoint.
pub(crate) async fn run(ctx: WorkerContext, mut listener: Box<dyn Listener>) {
    let stats = ctx.stats.clone();
    let _live = stats.live_workers.track();
    tracing::debug!(id = ctx.id, "listen worker started");

    let failure: Option<TransportError> = loop {
        let accepted = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => break None,
            result = listener.accept() => result,
        };

        match accepted {
            Ok(stream) => {
                let peer = stream.peer();
                let Some(manager) = ctx.manager.upgrade() else {
                    stream.close().await;
                    break None;
                };
                tracing::debug!(%peer, "inbound stream accepted");
                manager.promote(stream, Origin::Listen(ctx.id));
            }
            Err(e) => {
                if ctx.token.is_cancelled() {
                    break None;
                }
                tracing::warn!("accept failed: {e}");
                ctx.token.cancel();
                break Some(e);
            }
        }
    };

    drop(listener);
    if let Some(manager) = ctx.manager.upgrade() {
        manager.listen_ended(ctx.id, failure);
    }
    tracing::debug!(id = ctx.id, "listen worker stopped");
}
