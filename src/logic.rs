//! The readiness/push handshake shared by every stage.
//!
//! A [`Logic`] is the live, stateful instance of a stage for one run. Upstream
//! hands it one item at a time through [`Logic::on_push`]; the returned future
//! resolves when the Logic can take its next item. Because the future borrows
//! the Logic mutably, an upstream can only push again after that readiness has
//! settled, which keeps every downstream single-writer.

use crate::error::Result;
use crate::metrics::FlowMetrics;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::time::Instant;

/// Resolves when a Logic is ready for its very first item
pub type InitialReady = Shared<BoxFuture<'static, Result<()>>>;

/// An [`InitialReady`] that has already resolved
pub fn ready_now() -> InitialReady {
    futures::future::ready(Ok(())).boxed().shared()
}

/// Runtime instance of a stage
#[async_trait]
pub trait Logic<R>: Send {
    /// Accept one item; resolves when this Logic can accept another one
    async fn on_push(&mut self, item: R) -> Result<()>;

    /// Resolves when this Logic can accept its first item
    fn initial_ready(&self) -> InitialReady;
}

/// Handle to whatever sits downstream of a stage
pub struct Next<T> {
    logic: Box<dyn Logic<T>>,
}

impl<T: Send + 'static> Next<T> {
    pub fn new<L: Logic<T> + 'static>(logic: L) -> Self {
        Self {
            logic: Box::new(logic),
        }
    }

    /// A terminal that accepts and drops every item
    pub fn discard() -> Self {
        Self::new(Discard)
    }

    /// Push one item downstream; resolves with downstream's readiness
    pub async fn push(&mut self, item: T) -> Result<()> {
        self.logic.on_push(item).await
    }

    pub fn initial_ready(&self) -> InitialReady {
        self.logic.initial_ready()
    }
}

#[async_trait]
impl<T: Send + 'static> Logic<T> for Next<T> {
    async fn on_push(&mut self, item: T) -> Result<()> {
        self.logic.on_push(item).await
    }

    fn initial_ready(&self) -> InitialReady {
        self.logic.initial_ready()
    }
}

struct Discard;

#[async_trait]
impl<T: Send + 'static> Logic<T> for Discard {
    async fn on_push(&mut self, _item: T) -> Result<()> {
        Ok(())
    }

    fn initial_ready(&self) -> InitialReady {
        ready_now()
    }
}

/// Terminal Logic wrapping the caller's sink callback
pub(crate) struct SinkLogic<F> {
    sink: F,
    metrics: FlowMetrics,
}

impl<F> SinkLogic<F> {
    pub(crate) fn new(sink: F, metrics: FlowMetrics) -> Self {
        Self { sink, metrics }
    }
}

#[async_trait]
impl<T, F, Fut> Logic<T> for SinkLogic<F>
where
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_push(&mut self, item: T) -> Result<()> {
        let started = Instant::now();
        (self.sink)(item).await?;
        self.metrics.record_delivered(started.elapsed());
        Ok(())
    }

    fn initial_ready(&self) -> InitialReady {
        ready_now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sink_logic_records_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let metrics = FlowMetrics::new();
        let sink_seen = Arc::clone(&seen);
        let mut next = Next::new(SinkLogic::new(
            move |n: u32| {
                let seen = Arc::clone(&sink_seen);
                async move {
                    seen.lock().push(n);
                    Ok(())
                }
            },
            metrics.clone(),
        ));

        next.initial_ready().await.unwrap();
        next.push(1).await.unwrap();
        next.push(2).await.unwrap();

        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(metrics.total_delivered(), 2);
    }

    #[tokio::test]
    async fn test_sink_error_is_returned_to_pusher() {
        let metrics = FlowMetrics::new();
        let mut next = Next::new(SinkLogic::new(
            |_: u32| async { Err(PipelineError::stage("sink down")) },
            metrics.clone(),
        ));

        assert_eq!(next.push(7).await, Err(PipelineError::stage("sink down")));
        assert_eq!(metrics.total_delivered(), 0);
    }

    #[tokio::test]
    async fn test_discard_accepts_everything() {
        let mut next = Next::<String>::discard();
        assert!(next.initial_ready().await.is_ok());
        assert!(next.push("dropped".to_string()).await.is_ok());
    }
}
