//! Reusable, source-less stage sequences.

use crate::context::FlowContext;
use crate::error::Result;
use crate::logic::{Logic, Next};
use crate::stage::{BuildFn, Stage, StageKind};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// An ordered sequence of stages from `Init` items to `T` items, without a source
///
/// Connecting it to a source or to another partial pipeline never alters it; it can
/// be attached any number of times and every attachment builds fresh Logics.
pub struct PartialPipeline<Init, T> {
    kinds: Vec<StageKind>,
    build: BuildFn<Init, T>,
}

impl<Init, T> Clone for PartialPipeline<Init, T> {
    fn clone(&self) -> Self {
        Self {
            kinds: self.kinds.clone(),
            build: Arc::clone(&self.build),
        }
    }
}

impl<Init, T> fmt::Debug for PartialPipeline<Init, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialPipeline")
            .field("stages", &self.kinds)
            .finish()
    }
}

impl<T: Send + 'static> PartialPipeline<T, T> {
    /// The empty sequence; items pass through unchanged
    pub fn new() -> Self {
        Self {
            kinds: Vec::new(),
            build: Arc::new(|next, _| Ok(next)),
        }
    }
}

impl<T: Send + 'static> Default for PartialPipeline<T, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Init: Send + 'static, T: Send + 'static> PartialPipeline<Init, T> {
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn kinds(&self) -> &[StageKind] {
        &self.kinds
    }

    /// Stage names joined by arrows, e.g. `map -> buffer(4)`
    pub fn describe(&self) -> String {
        self.kinds
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Build this run's Logics back to front; returns the head
    pub(crate) fn build(&self, next: Next<T>, ctx: &FlowContext) -> Result<Next<Init>> {
        (self.build)(next, ctx)
    }

    /// Sequence `rest` after this one
    pub(crate) fn append<S: Send + 'static>(
        &self,
        rest: &PartialPipeline<T, S>,
    ) -> PartialPipeline<Init, S> {
        let mut kinds = self.kinds.clone();
        kinds.extend(rest.kinds.iter().cloned());
        let head = Arc::clone(&self.build);
        let tail = Arc::clone(&rest.build);
        PartialPipeline {
            kinds,
            build: Arc::new(move |next, ctx| {
                let middle = tail(next, ctx)?;
                head(middle, ctx)
            }),
        }
    }
}

impl<R: Send + 'static, T: Send + 'static> From<Stage<R, T>> for PartialPipeline<R, T> {
    fn from(stage: Stage<R, T>) -> Self {
        Self {
            kinds: vec![stage.kind],
            build: stage.build,
        }
    }
}

/// Chainable stage combinators shared by [`PartialPipeline`] and
/// [`Pipeline`](crate::Pipeline)
///
/// Every combinator returns a new value and leaves its receiver untouched
/// (receivers are cheap to clone).
pub trait FlowOps<T: Send + 'static>: Sized {
    /// The same kind of pipeline, now producing `S` items
    type Then<S: Send + 'static>;

    /// Append every stage of `rest`
    fn connect_to<S: Send + 'static>(self, rest: &PartialPipeline<T, S>) -> Self::Then<S>;

    /// Append a single stage
    fn then<S: Send + 'static>(self, stage: Stage<T, S>) -> Self::Then<S> {
        self.connect_to(&PartialPipeline::from(stage))
    }

    fn map<S, F>(self, f: F) -> Self::Then<S>
    where
        S: Send + 'static,
        F: Fn(T) -> Result<S> + Send + Sync + 'static,
    {
        self.then(Stage::map(f))
    }

    fn filter<F>(self, pred: F) -> Self::Then<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.then(Stage::filter(pred))
    }

    fn flat_map<S, F>(self, f: F) -> Self::Then<S>
    where
        S: Send + 'static,
        F: Fn(T) -> Result<Vec<S>> + Send + Sync + 'static,
    {
        self.then(Stage::flat_map(f))
    }

    fn reduce<S, F>(self, f: F, initial: S) -> Self::Then<S>
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(&S, T) -> Result<S> + Send + Sync + 'static,
    {
        self.then(Stage::reduce(f, initial))
    }

    fn buffer(self, size: usize) -> Self::Then<T> {
        self.then(Stage::buffer(size))
    }

    fn map_async<S, F, Fut>(self, parallelism: usize, f: F) -> Self::Then<S>
    where
        S: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S>> + Send + 'static,
    {
        self.then(Stage::map_async(parallelism, f))
    }

    fn map_async_unordered<S, F, Fut>(self, parallelism: usize, f: F) -> Self::Then<S>
    where
        S: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S>> + Send + 'static,
    {
        self.then(Stage::map_async_unordered(parallelism, f))
    }

    fn via<S, F, L>(self, factory: F) -> Self::Then<S>
    where
        S: Send + 'static,
        F: Fn(Next<S>) -> L + Send + Sync + 'static,
        L: Logic<T> + 'static,
    {
        self.then(Stage::via(factory))
    }

    fn also_to<S: Send + 'static>(self, branch: &PartialPipeline<T, S>) -> Self::Then<T>
    where
        T: Clone,
    {
        self.then(Stage::also_to(branch))
    }
}

impl<Init: Send + 'static, T: Send + 'static> FlowOps<T> for PartialPipeline<Init, T> {
    type Then<S: Send + 'static> = PartialPipeline<Init, S>;

    fn connect_to<S: Send + 'static>(
        self,
        rest: &PartialPipeline<T, S>,
    ) -> PartialPipeline<Init, S> {
        self.append(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::SinkLogic;
    use crate::metrics::FlowMetrics;
    use parking_lot::Mutex;

    async fn run_partial<T: Send + 'static>(
        partial: &PartialPipeline<u32, T>,
        items: Vec<u32>,
    ) -> Vec<T> {
        let ctx = FlowContext::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink = Next::new(SinkLogic::new(
            move |item: T| {
                sink_seen.lock().push(item);
                async { Ok(()) }
            },
            FlowMetrics::new(),
        ));
        let mut head = partial.build(sink, &ctx).unwrap();
        head.initial_ready().await.unwrap();
        for item in items {
            head.push(item).await.unwrap();
        }
        let out = std::mem::take(&mut *seen.lock());
        out
    }

    #[tokio::test]
    async fn test_empty_partial_passes_through() {
        let partial = PartialPipeline::<u32, u32>::new();
        assert!(partial.is_empty());
        assert_eq!(run_partial(&partial, vec![3, 1]).await, vec![3, 1]);
    }

    #[tokio::test]
    async fn test_stages_apply_in_order() {
        let partial = PartialPipeline::new()
            .map(|n: u32| Ok(n + 1))
            .filter(|n: &u32| n % 2 == 0)
            .map(|n: u32| Ok(n.to_string()));
        assert_eq!(partial.len(), 3);
        assert_eq!(partial.describe(), "map -> filter -> map");
        assert_eq!(run_partial(&partial, (0..5).collect()).await, vec!["2", "4"]);
    }

    #[tokio::test]
    async fn test_connect_to_leaves_operands_unchanged() {
        let doubled = PartialPipeline::new().map(|n: u32| Ok(n * 2));
        let labelled = PartialPipeline::new().map(|n: u32| Ok(format!("#{n}")));

        let joined = doubled.clone().connect_to(&labelled);
        assert_eq!(joined.len(), 2);
        assert_eq!(doubled.len(), 1);
        assert_eq!(labelled.len(), 1);

        assert_eq!(run_partial(&joined, vec![1, 2]).await, vec!["#2", "#4"]);
        assert_eq!(run_partial(&doubled, vec![1, 2]).await, vec![2, 4]);
    }

    #[test]
    fn test_from_stage() {
        let partial: PartialPipeline<u8, u8> = Stage::buffer(4).into();
        assert_eq!(partial.describe(), "buffer(4)");
    }
}
