//! The `alsoTo` side branch.
//!
//! The branch runs as its own pushable pipeline with its own context: it is
//! cancelled together with the main run, but its failures only end the branch.
//! The main path never waits on it. An item reaching the stage while the branch
//! is still busy with an earlier one is skipped on the branch and still passed
//! downstream on the main path.

use crate::context::FlowContext;
use crate::error::Result;
use crate::logic::{InitialReady, Logic, Next};
use crate::partial::PartialPipeline;
use crate::pipeline;
use crate::source::{PushHandle, Pushable};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct AlsoToLogic<T> {
    branch: PushHandle<T>,
    busy: Arc<AtomicBool>,
    next: Next<T>,
    ctx: FlowContext,
}

impl<T: Clone + Send + 'static> AlsoToLogic<T> {
    pub(crate) fn spawn<S: Send + 'static>(
        branch: &PartialPipeline<T, S>,
        next: Next<T>,
        ctx: &FlowContext,
    ) -> Result<Self> {
        let branch_ctx = ctx.branch();
        let head = branch.build(Next::discard(), &branch_ctx)?;
        let (handle, completion) = pipeline::launch(Pushable::new(), head, branch_ctx);

        let stages = branch.describe();
        ctx.spawn(async move {
            match completion.await {
                Ok(()) => debug!(%stages, "side branch stopped"),
                Err(err) => warn!(%stages, %err, "side branch failed; main path continues"),
            }
        });

        Ok(Self {
            branch: handle,
            busy: Arc::new(AtomicBool::new(false)),
            next,
            ctx: ctx.clone(),
        })
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Logic<T> for AlsoToLogic<T> {
    async fn on_push(&mut self, item: T) -> Result<()> {
        if self.branch.is_ready() && !self.busy.swap(true, Ordering::AcqRel) {
            let branch = self.branch.clone();
            let busy = Arc::clone(&self.busy);
            let copy = item.clone();
            self.ctx.spawn(async move {
                if let Err(err) = branch.push(copy).await {
                    debug!(%err, "side branch push rejected");
                }
                busy.store(false, Ordering::Release);
            });
        } else {
            self.ctx.metrics().record_dropped();
            debug!("side branch busy; item skipped on branch");
        }
        self.next.push(item).await
    }

    fn initial_ready(&self) -> InitialReady {
        self.next.initial_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::SinkLogic;
    use crate::partial::FlowOps;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn collect(seen: &Arc<Mutex<Vec<u32>>>, ctx: &FlowContext) -> Next<u32> {
        let seen = Arc::clone(seen);
        Next::new(SinkLogic::new(
            move |n: u32| {
                seen.lock().push(n);
                async { Ok(()) }
            },
            ctx.metrics().clone(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_branch_does_not_hold_back_main_path() {
        let ctx = FlowContext::new();
        let main = Arc::new(Mutex::new(Vec::new()));
        let side = Arc::new(Mutex::new(Vec::new()));

        let side_seen = Arc::clone(&side);
        let branch = PartialPipeline::new().map_async(1, move |n: u32| {
            let side = Arc::clone(&side_seen);
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                side.lock().push(n);
                Ok(n)
            }
        });
        let mut logic = AlsoToLogic::spawn(&branch, collect(&main, &ctx), &ctx).unwrap();
        // Let the branch driver observe its initial readiness
        tokio::time::sleep(Duration::from_millis(1)).await;

        for n in 0..5 {
            logic.on_push(n).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*main.lock(), vec![0, 1, 2, 3, 4]);
        let side = side.lock().clone();
        assert!(side.contains(&0));
        assert!(side.len() < 5, "branch saw {side:?}");
        assert!(side.windows(2).all(|w| w[0] < w[1]));
        assert!(ctx.metrics().total_dropped() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_branch_failure_stays_in_branch() {
        let ctx = FlowContext::new();
        let main = Arc::new(Mutex::new(Vec::new()));
        let branch = PartialPipeline::new().map(|_: u32| -> Result<u32> {
            Err(crate::error::PipelineError::stage("branch down"))
        });
        let mut logic = AlsoToLogic::spawn(&branch, collect(&main, &ctx), &ctx).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        for n in 0..3 {
            logic.on_push(n).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(*main.lock(), vec![0, 1, 2]);
        assert!(ctx.fault().is_none());
        assert!(!ctx.is_cancelled());
    }
}
