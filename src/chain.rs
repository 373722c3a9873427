use crate::context::FlowContext;
use crate::error::{PipelineError, Result};
use crate::logic::Next;
use crate::slots::Slot;
use crate::stage::StageKind;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One queued downstream push
///
/// `item` yields the value to push (it may still be running); `slot` is held
/// until downstream has accepted the value.
struct Delivery<T> {
    item: BoxFuture<'static, Result<T>>,
    slot: Option<Slot>,
}

/// Serializes a stage's downstream pushes through a single consumer task
///
/// Stages that return readiness before their item has gone downstream (buffer,
/// parallel maps) submit deliveries here instead of pushing directly. The
/// consumer owns `next`, awaits each delivery in submission order and pushes it,
/// so downstream never sees two pushes in flight at once. The first failure is
/// reported to the run's fault signal and stops the chain.
pub(crate) struct PushChain<T> {
    kind: StageKind,
    deliveries: mpsc::UnboundedSender<Delivery<T>>,
    ctx: FlowContext,
}

impl<T> Clone for PushChain<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            deliveries: self.deliveries.clone(),
            ctx: self.ctx.clone(),
        }
    }
}

impl<T: Send + 'static> PushChain<T> {
    pub(crate) fn spawn(kind: StageKind, mut next: Next<T>, ctx: &FlowContext) -> Self {
        let (deliveries, mut pending) = mpsc::unbounded_channel::<Delivery<T>>();

        let task_ctx = ctx.clone();
        let task_kind = kind.clone();
        ctx.spawn(async move {
            match drain(&mut next, &mut pending).await {
                Ok(()) => debug!(stage = %task_kind, "push chain closed"),
                Err(err) => task_ctx.report(err),
            }
        });

        Self {
            kind,
            deliveries,
            ctx: ctx.clone(),
        }
    }

    /// Queue a delivery behind every previously submitted one
    pub(crate) fn submit(
        &self,
        item: BoxFuture<'static, Result<T>>,
        slot: Option<Slot>,
    ) -> Result<()> {
        self.deliveries
            .send(Delivery { item, slot })
            .map_err(|_| self.stopped())
    }

    fn stopped(&self) -> PipelineError {
        self.ctx.fault().unwrap_or_else(|| {
            PipelineError::ShutdownError(format!("{} push chain stopped", self.kind))
        })
    }
}

async fn drain<T: Send + 'static>(
    next: &mut Next<T>,
    pending: &mut mpsc::UnboundedReceiver<Delivery<T>>,
) -> Result<()> {
    next.initial_ready().await?;
    while let Some(Delivery { item, slot }) = pending.recv().await {
        let item = item.await?;
        next.push(item).await?;
        trace!(slot = ?slot.as_ref().map(Slot::index), "delivered downstream");
        drop(slot);
    }
    Ok(())
}
