use crate::branch::AlsoToLogic;
use crate::buffer::BufferLogic;
use crate::context::FlowContext;
use crate::error::{PipelineError, Result};
use crate::logic::{InitialReady, Logic, Next};
use crate::parallel::{OutputOrder, ParallelMapLogic};
use crate::partial::PartialPipeline;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Builds the Logic for one run: given downstream, returns the handle upstream pushes into
pub(crate) type BuildFn<R, T> =
    Arc<dyn Fn(Next<T>, &FlowContext) -> Result<Next<R>> + Send + Sync>;

/// What a stage does, with the parameters that shape its backpressure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    Map,
    Filter,
    FlatMap,
    Reduce,
    Buffer { size: usize },
    MapAsync { parallelism: usize },
    MapAsyncUnordered { parallelism: usize },
    Via,
    AlsoTo { branch: Vec<StageKind> },
}

impl StageKind {
    /// Check construction parameters before anything is spawned
    pub fn validate(&self) -> Result<()> {
        match self {
            StageKind::Buffer { size: 0 } => Err(PipelineError::ConfigError(
                "buffer size must be at least 1".into(),
            )),
            StageKind::MapAsync { parallelism: 0 }
            | StageKind::MapAsyncUnordered { parallelism: 0 } => Err(PipelineError::ConfigError(
                format!("{self} needs a parallelism of at least 1"),
            )),
            StageKind::AlsoTo { branch } => branch.iter().try_for_each(StageKind::validate),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Map => write!(f, "map"),
            StageKind::Filter => write!(f, "filter"),
            StageKind::FlatMap => write!(f, "flatMap"),
            StageKind::Reduce => write!(f, "reduce"),
            StageKind::Buffer { size } => write!(f, "buffer({size})"),
            StageKind::MapAsync { parallelism } => write!(f, "mapAsync({parallelism})"),
            StageKind::MapAsyncUnordered { parallelism } => {
                write!(f, "mapAsyncUnordered({parallelism})")
            }
            StageKind::Via => write!(f, "via"),
            StageKind::AlsoTo { branch } => {
                write!(f, "alsoTo[")?;
                for (i, kind) in branch.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{kind}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Immutable description of a transformation from `R` items to `T` items
///
/// A Stage holds only its construction parameters; every run builds a fresh
/// Logic from it, so one Stage can back any number of independent runs.
pub struct Stage<R, T> {
    pub(crate) kind: StageKind,
    pub(crate) build: BuildFn<R, T>,
}

impl<R, T> Clone for Stage<R, T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            build: Arc::clone(&self.build),
        }
    }
}

impl<R, T> fmt::Debug for Stage<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("kind", &self.kind).finish()
    }
}

impl<R: Send + 'static, T: Send + 'static> Stage<R, T> {
    fn new<B>(kind: StageKind, build: B) -> Self
    where
        B: Fn(Next<T>, &FlowContext) -> Result<Next<R>> + Send + Sync + 'static,
    {
        Self {
            kind,
            build: Arc::new(build),
        }
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    /// Transform each item; readiness is downstream's readiness
    pub fn map<F>(f: F) -> Self
    where
        F: Fn(R) -> Result<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(StageKind::Map, move |next, _| {
            Ok(Next::new(MapLogic {
                f: Arc::clone(&f),
                next,
            }))
        })
    }

    /// Expand each item into zero or more items, pushed one at a time
    pub fn flat_map<F>(f: F) -> Self
    where
        F: Fn(R) -> Result<Vec<T>> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(StageKind::FlatMap, move |next, _| {
            Ok(Next::new(FlatMapLogic {
                f: Arc::clone(&f),
                next,
            }))
        })
    }

    /// Running scan: emits `f(agg, item)` for every item and keeps it as the new aggregate
    pub fn reduce<F>(f: F, initial: T) -> Self
    where
        F: Fn(&T, R) -> Result<T> + Send + Sync + 'static,
        T: Clone + Sync,
    {
        let f = Arc::new(f);
        Self::new(StageKind::Reduce, move |next, _| {
            Ok(Next::new(ReduceLogic {
                f: Arc::clone(&f),
                agg: initial.clone(),
                next,
            }))
        })
    }

    /// Up to `parallelism` calls of `f` overlap; output keeps input order
    ///
    /// A call holds its slot until its result has been pushed downstream, so once
    /// all slots are taken readiness follows the sink rather than `f` alone.
    pub fn map_async<F, Fut>(parallelism: usize, f: F) -> Self
    where
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::parallel(
            StageKind::MapAsync { parallelism },
            OutputOrder::Input,
            parallelism,
            f,
        )
    }

    /// Up to `parallelism` calls of `f` overlap; output follows completion order
    pub fn map_async_unordered<F, Fut>(parallelism: usize, f: F) -> Self
    where
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::parallel(
            StageKind::MapAsyncUnordered { parallelism },
            OutputOrder::Completion,
            parallelism,
            f,
        )
    }

    fn parallel<F, Fut>(kind: StageKind, order: OutputOrder, parallelism: usize, f: F) -> Self
    where
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let f = Arc::new(f);
        let logic_kind = kind.clone();
        Self::new(kind, move |next, ctx| {
            logic_kind.validate()?;
            Ok(Next::new(ParallelMapLogic::new(
                logic_kind.clone(),
                order,
                parallelism,
                Arc::clone(&f),
                next,
                ctx,
            )))
        })
    }

    /// Escape hatch: the caller builds the Logic directly from the downstream handle
    pub fn via<F, L>(factory: F) -> Self
    where
        F: Fn(Next<T>) -> L + Send + Sync + 'static,
        L: Logic<R> + 'static,
    {
        Self::new(StageKind::Via, move |next, _| Ok(Next::new(factory(next))))
    }
}

impl<T: Send + 'static> Stage<T, T> {
    /// Forward only the items matching `pred`
    pub fn filter<F>(pred: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let pred = Arc::new(pred);
        Self::new(StageKind::Filter, move |next, _| {
            Ok(Next::new(FilterLogic {
                pred: Arc::clone(&pred),
                next,
            }))
        })
    }

    /// Absorb bursts of up to `size` items before holding back upstream
    pub fn buffer(size: usize) -> Self {
        let kind = StageKind::Buffer { size };
        Self::new(kind.clone(), move |next, ctx| {
            kind.validate()?;
            Ok(Next::new(BufferLogic::new(size, next, ctx)))
        })
    }

    /// Feed a copy of every item into a side branch that never slows this path down
    ///
    /// The branch runs as its own pipeline; items that arrive while it is busy are
    /// skipped on the branch only. An empty branch is a pass-through.
    pub fn also_to<S: Send + 'static>(branch: &PartialPipeline<T, S>) -> Self
    where
        T: Clone,
    {
        let kind = StageKind::AlsoTo {
            branch: branch.kinds().to_vec(),
        };
        if branch.is_empty() {
            return Self::new(kind, |next, _| Ok(next));
        }

        let branch = branch.clone();
        Self::new(kind, move |next, ctx| {
            Ok(Next::new(AlsoToLogic::spawn(&branch, next, ctx)?))
        })
    }
}

struct MapLogic<T, F> {
    f: Arc<F>,
    next: Next<T>,
}

#[async_trait]
impl<R, T, F> Logic<R> for MapLogic<T, F>
where
    R: Send + 'static,
    T: Send + 'static,
    F: Fn(R) -> Result<T> + Send + Sync + 'static,
{
    async fn on_push(&mut self, item: R) -> Result<()> {
        let out = (self.f)(item)?;
        self.next.push(out).await
    }

    fn initial_ready(&self) -> InitialReady {
        self.next.initial_ready()
    }
}

struct FilterLogic<T, F> {
    pred: Arc<F>,
    next: Next<T>,
}

#[async_trait]
impl<T, F> Logic<T> for FilterLogic<T, F>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    async fn on_push(&mut self, item: T) -> Result<()> {
        if (self.pred)(&item) {
            self.next.push(item).await
        } else {
            Ok(())
        }
    }

    fn initial_ready(&self) -> InitialReady {
        self.next.initial_ready()
    }
}

struct FlatMapLogic<T, F> {
    f: Arc<F>,
    next: Next<T>,
}

#[async_trait]
impl<R, T, F> Logic<R> for FlatMapLogic<T, F>
where
    R: Send + 'static,
    T: Send + 'static,
    F: Fn(R) -> Result<Vec<T>> + Send + Sync + 'static,
{
    async fn on_push(&mut self, item: R) -> Result<()> {
        let outputs = (self.f)(item)?;
        debug!(count = outputs.len(), "flatMap expanded item");
        for out in outputs {
            self.next.push(out).await?;
        }
        Ok(())
    }

    fn initial_ready(&self) -> InitialReady {
        self.next.initial_ready()
    }
}

struct ReduceLogic<T, F> {
    f: Arc<F>,
    agg: T,
    next: Next<T>,
}

#[async_trait]
impl<R, T, F> Logic<R> for ReduceLogic<T, F>
where
    R: Send + 'static,
    T: Clone + Send + 'static,
    F: Fn(&T, R) -> Result<T> + Send + Sync + 'static,
{
    async fn on_push(&mut self, item: R) -> Result<()> {
        let agg = (self.f)(&self.agg, item)?;
        self.agg = agg.clone();
        self.next.push(agg).await
    }

    fn initial_ready(&self) -> InitialReady {
        self.next.initial_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::SinkLogic;
    use crate::metrics::FlowMetrics;
    use parking_lot::Mutex;

    fn collect<T: Send + 'static>(seen: &Arc<Mutex<Vec<T>>>) -> Next<T> {
        let seen = Arc::clone(seen);
        Next::new(SinkLogic::new(
            move |item: T| {
                seen.lock().push(item);
                async { Ok(()) }
            },
            FlowMetrics::new(),
        ))
    }

    async fn run_stage<R, T>(stage: &Stage<R, T>, items: Vec<R>) -> Result<Vec<T>>
    where
        R: Send + 'static,
        T: Send + 'static,
    {
        let ctx = FlowContext::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut head = (stage.build)(collect(&seen), &ctx)?;
        head.initial_ready().await?;
        for item in items {
            head.push(item).await?;
        }
        let out = std::mem::take(&mut *seen.lock());
        Ok(out)
    }

    #[tokio::test]
    async fn test_map_stage() {
        let stage = Stage::map(|n: u32| Ok(n * 2));
        assert_eq!(run_stage(&stage, vec![1, 2, 3]).await.unwrap(), vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn test_filter_stage() {
        let stage = Stage::filter(|n: &u32| n % 2 == 0);
        assert_eq!(run_stage(&stage, (0..5).collect()).await.unwrap(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_flat_map_stage() {
        let stage = Stage::flat_map(|n: u32| Ok((0..n).collect::<Vec<_>>()));
        assert_eq!(run_stage(&stage, vec![0, 3, 1]).await.unwrap(), vec![0, 1, 2, 0]);
    }

    #[tokio::test]
    async fn test_reduce_emits_running_aggregate() {
        let stage = Stage::reduce(|agg: &u32, n: u32| Ok(agg + n), 1);
        assert_eq!(
            run_stage(&stage, (0..5).collect()).await.unwrap(),
            vec![1, 2, 4, 7, 11]
        );
    }

    #[tokio::test]
    async fn test_stage_reused_for_independent_runs() {
        let stage = Stage::reduce(|agg: &u32, n: u32| Ok(agg + n), 0);
        assert_eq!(run_stage(&stage, vec![1, 1]).await.unwrap(), vec![1, 2]);
        assert_eq!(run_stage(&stage, vec![1, 1]).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_map_error_propagates_to_pusher() {
        let stage = Stage::map(|_: u32| -> Result<u32> { Err(PipelineError::stage("test")) });
        assert_eq!(
            run_stage(&stage, vec![1]).await,
            Err(PipelineError::stage("test"))
        );
    }

    #[test]
    fn test_kind_validation() {
        assert!(StageKind::Buffer { size: 0 }.validate().is_err());
        assert!(StageKind::MapAsync { parallelism: 0 }.validate().is_err());
        assert!(StageKind::AlsoTo {
            branch: vec![StageKind::Map, StageKind::MapAsyncUnordered { parallelism: 0 }]
        }
        .validate()
        .is_err());
        assert!(StageKind::Buffer { size: 1 }.validate().is_ok());
    }

    #[test]
    fn test_kind_display() {
        let kind = StageKind::AlsoTo {
            branch: vec![StageKind::Map, StageKind::MapAsync { parallelism: 2 }],
        };
        assert_eq!(kind.to_string(), "alsoTo[map -> mapAsync(2)]");
    }
}
