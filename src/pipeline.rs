use crate::context::FlowContext;
use crate::error::{PipelineError, Result};
use crate::logic::{Next, SinkLogic};
use crate::metrics::FlowMetrics;
use crate::partial::{FlowOps, PartialPipeline};
use crate::source::{Pushable, PushHandle, Repeat, Source, Tick};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Completion of one run, shareable between any number of waiters
pub(crate) type Completion = Shared<BoxFuture<'static, Result<()>>>;

/// A source plus a sequence of stages
///
/// A Pipeline is an immutable description; every call to [`Pipeline::run`] builds a
/// fresh set of Logics, so the same Pipeline can back any number of concurrent runs.
pub struct Pipeline<Src: Source, T> {
    source: Src,
    flow: PartialPipeline<Src::Item, T>,
}

impl<Src: Source, T> Clone for Pipeline<Src, T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            flow: self.flow.clone(),
        }
    }
}

impl<Src: Source, T: Send + 'static> Pipeline<Src, T> {
    /// Stage names joined by arrows
    pub fn describe(&self) -> String {
        self.flow.describe()
    }

    pub fn len(&self) -> usize {
        self.flow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flow.is_empty()
    }

    /// Start a run delivering every output item to `sink`
    ///
    /// The sink's returned future is awaited before the next item is delivered, so
    /// a slow sink holds back the whole pipeline. Invalid stage or source
    /// parameters are rejected here, before anything is spawned.
    pub fn run<F, Fut>(&self, sink: F) -> Result<RunningPipeline<Src::Control>>
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.flow
            .kinds()
            .iter()
            .try_for_each(|kind| kind.validate())?;
        self.source.validate()?;

        let ctx = FlowContext::new();
        let tail = Next::new(SinkLogic::new(sink, ctx.metrics().clone()));
        let head = match self.flow.build(tail, &ctx) {
            Ok(head) => head,
            Err(err) => {
                // Stops whatever the stages built so far already spawned
                ctx.cancel();
                return Err(err);
            }
        };

        info!(stages = %self.describe(), "starting pipeline run");
        let (control, completion) = launch(self.source.clone(), head, ctx.clone());
        Ok(RunningPipeline {
            control,
            completion,
            ctx,
        })
    }

    /// Start a run whose output items are dropped
    pub fn run_and_discard(&self) -> Result<RunningPipeline<Src::Control>> {
        self.run(|_| futures::future::ready(Ok(())))
    }
}

impl<Src: Source, T: Send + 'static> FlowOps<T> for Pipeline<Src, T> {
    type Then<S: Send + 'static> = Pipeline<Src, S>;

    fn connect_to<S: Send + 'static>(self, rest: &PartialPipeline<T, S>) -> Pipeline<Src, S> {
        Pipeline {
            source: self.source,
            flow: self.flow.append(rest),
        }
    }
}

impl<Src: Source> Pipeline<Src, Src::Item> {
    /// A pipeline with no stages yet
    pub fn from_source(source: Src) -> Self {
        Self {
            source,
            flow: PartialPipeline::new(),
        }
    }
}

/// Emit `value` every `interval`; ticks that fall due while a push is outstanding are skipped
pub fn tick<T: Clone + Send + Sync + 'static>(
    interval: Duration,
    value: T,
) -> Pipeline<Tick<T>, T> {
    Pipeline::from_source(Tick::new(interval, value))
}

/// Emit `value` as fast as the pipeline accepts it
pub fn repeat<T: Clone + Send + Sync + 'static>(value: T) -> Pipeline<Repeat<T>, T> {
    Pipeline::from_source(Repeat::new(value))
}

/// Items are pushed by the caller through [`RunningPipeline::input`]
pub fn pushable<T: Send + 'static>() -> Pipeline<Pushable<T>, T> {
    Pipeline::from_source(Pushable::new())
}

/// Start `source` driving `head` on its own task
///
/// The run token is cancelled once the driver finishes, whatever the outcome, so
/// every detached task of the run winds down with it.
pub(crate) fn launch<Src: Source>(
    source: Src,
    head: Next<Src::Item>,
    ctx: FlowContext,
) -> (Src::Control, Completion) {
    let (control, driver) = source.launch(head, ctx.clone());
    let task = tokio::spawn(async move {
        let result = driver.await;
        match &result {
            Ok(()) => info!(
                emitted = ctx.metrics().total_emitted(),
                delivered = ctx.metrics().total_delivered(),
                "pipeline completed"
            ),
            Err(err) => warn!(%err, "pipeline failed"),
        }
        ctx.cancel();
        result
    });

    let completion = async move {
        task.await.unwrap_or_else(|err| {
            Err(PipelineError::ShutdownError(format!(
                "source driver did not finish: {err}"
            )))
        })
    }
    .boxed()
    .shared();
    (control, completion)
}

/// Handle to one run of a [`Pipeline`]
pub struct RunningPipeline<C> {
    control: C,
    completion: Completion,
    ctx: FlowContext,
}

impl<C> RunningPipeline<C> {
    /// Resolves when the run stops: `Ok` after cancellation, `Err` with the first failure
    pub async fn completion(&self) -> Result<()> {
        self.completion.clone().await
    }

    /// Stop the run and wait until it has wound down
    ///
    /// Idempotent; the run's completion settles with `Ok` unless it had already failed.
    pub async fn cancel(&self) {
        self.ctx.cancel();
        let _ = self.completion.clone().await;
    }

    /// Whether the run has stopped or been asked to stop
    pub fn is_stopped(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// Counters and latencies for this run
    pub fn metrics(&self) -> &FlowMetrics {
        self.ctx.metrics()
    }

    /// The source's control surface
    pub fn control(&self) -> &C {
        &self.control
    }
}

impl<T> RunningPipeline<PushHandle<T>> {
    /// Input of a pushable run
    pub fn input(&self) -> &PushHandle<T> {
        &self.control
    }
}
