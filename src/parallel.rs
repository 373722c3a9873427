//! Bounded-concurrency mapping: `mapAsync` and `mapAsyncUnordered`.
//!
//! Both variants start `f(item)` on its own task as soon as the item arrives and
//! hold one slot per started call until its result has been pushed downstream.
//! Readiness resolves immediately while a slot is free and otherwise waits for
//! the next slot to be released. They differ only in when a result joins the
//! push chain:
//!
//! - [`OutputOrder::Input`] queues the pending result at submission time, so the
//!   chain delivers in input order and a slow early item holds back faster later
//!   ones (head-of-line blocking).
//! - [`OutputOrder::Completion`] queues the result when `f` finishes, so the chain
//!   delivers in completion order.

use crate::chain::PushChain;
use crate::context::FlowContext;
use crate::error::{PipelineError, Result};
use crate::logic::{ready_now, InitialReady, Logic, Next};
use crate::slots::Slots;
use crate::stage::StageKind;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// When a parallel map hands results downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputOrder {
    /// Submission order
    Input,
    /// Completion order
    Completion,
}

pub(crate) struct ParallelMapLogic<T, F> {
    kind: StageKind,
    order: OutputOrder,
    f: Arc<F>,
    slots: Slots,
    chain: PushChain<T>,
    ctx: FlowContext,
}

impl<T: Send + 'static, F> ParallelMapLogic<T, F> {
    pub(crate) fn new(
        kind: StageKind,
        order: OutputOrder,
        parallelism: usize,
        f: Arc<F>,
        next: Next<T>,
        ctx: &FlowContext,
    ) -> Self {
        debug!(stage = %kind, "building parallel map");
        Self {
            chain: PushChain::spawn(kind.clone(), next, ctx),
            kind,
            order,
            f,
            slots: Slots::new(parallelism),
            ctx: ctx.clone(),
        }
    }
}

#[async_trait]
impl<R, T, F, Fut> Logic<R> for ParallelMapLogic<T, F>
where
    R: Send + 'static,
    T: Send + 'static,
    F: Fn(R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    async fn on_push(&mut self, item: R) -> Result<()> {
        let slot = self.slots.claim()?;
        trace!(
            stage = %self.kind,
            slot = slot.index(),
            in_use = self.slots.in_use(),
            capacity = self.slots.capacity(),
            "starting call"
        );
        let call = (self.f)(item);

        match self.order {
            OutputOrder::Input => {
                let ctx = self.ctx.clone();
                let task = tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => {
                            Err(PipelineError::ShutdownError("run cancelled".into()))
                        }
                        result = call => result,
                    }
                });
                let kind = self.kind.clone();
                self.chain.submit(
                    async move {
                        task.await.unwrap_or_else(|err| {
                            Err(PipelineError::ShutdownError(format!(
                                "{kind} call did not finish: {err}"
                            )))
                        })
                    }
                    .boxed(),
                    Some(slot),
                )?;
            }
            OutputOrder::Completion => {
                let chain = self.chain.clone();
                self.ctx.spawn(async move {
                    let result = call.await;
                    // A stopped chain already carries the run's fault
                    let _ = chain.submit(futures::future::ready(result).boxed(), Some(slot));
                });
            }
        }

        if !self.slots.has_free() {
            self.ctx.metrics().record_block();
            self.slots.wait_free().await?;
        }
        Ok(())
    }

    fn initial_ready(&self) -> InitialReady {
        ready_now()
    }
}
