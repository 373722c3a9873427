//! Source drivers: Tick, Repeat and Pushable.
//!
//! A driver owns the head of the Logic chain and the top-level lifecycle of a
//! run. Each one awaits the head's initial readiness, then pushes one item at a
//! time, awaiting the returned readiness before producing the next. Cancellation
//! and faults reported by detached push chains are checked at every suspension
//! point; the driver's result settles the run's completion.

use crate::context::FlowContext;
use crate::error::{PipelineError, Result};
use crate::logic::{InitialReady, Next};
use futures::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Something that originates items and drives a run
pub trait Source: Clone + Send + 'static {
    /// Items pushed into the first stage
    type Item: Send + 'static;

    /// Control surface handed to the caller alongside the running pipeline
    type Control: Send + Sync + 'static;

    /// Check construction parameters before a run is built
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Start driving `head`; returns the control surface and the driver future
    fn launch(
        self,
        head: Next<Self::Item>,
        ctx: FlowContext,
    ) -> (Self::Control, BoxFuture<'static, Result<()>>);
}

/// Emits `value` every `interval`, skipping ticks while a push is outstanding
#[derive(Debug, Clone)]
pub struct Tick<T> {
    interval: Duration,
    value: T,
}

impl<T> Tick<T> {
    pub fn new(interval: Duration, value: T) -> Self {
        Self { interval, value }
    }
}

impl<T: Clone + Send + Sync + 'static> Source for Tick<T> {
    type Item = T;
    type Control = ();

    fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(PipelineError::ConfigError(
                "tick interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    fn launch(self, mut head: Next<T>, ctx: FlowContext) -> ((), BoxFuture<'static, Result<()>>) {
        let driver = async move {
            if !started(head.initial_ready(), &ctx).await? {
                return Ok(());
            }

            let mut deadline = Instant::now();
            loop {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return Ok(()),
                    err = ctx.failed() => return Err(err),
                    _ = time::sleep_until(deadline) => {}
                }

                if !pump(&mut head, self.value.clone(), &ctx).await? {
                    return Ok(());
                }

                let (next, skipped) = next_deadline(deadline, Instant::now(), self.interval);
                deadline = next;
                if skipped > 0 {
                    trace!(skipped, "tick skipped while downstream was busy");
                }
            }
        };
        ((), driver.boxed())
    }
}

/// First tick after `deadline` that is still in the future, and how many were skipped
///
/// Ticks that fell due while the push was outstanding are skipped.
fn next_deadline(deadline: Instant, now: Instant, interval: Duration) -> (Instant, u128) {
    let next = deadline + interval;
    if next > now {
        return (next, 0);
    }
    let behind = now.duration_since(next).as_nanos();
    let step = interval.as_nanos();
    // The remainder is below one interval
    let into_interval = Duration::from_nanos(u64::try_from(behind % step).unwrap_or(0));
    (now + (interval - into_interval), behind / step + 1)
}

/// Pushes `value` as fast as downstream readiness allows
#[derive(Debug, Clone)]
pub struct Repeat<T> {
    value: T,
}

impl<T> Repeat<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Clone + Send + Sync + 'static> Source for Repeat<T> {
    type Item = T;
    type Control = ();

    fn launch(self, mut head: Next<T>, ctx: FlowContext) -> ((), BoxFuture<'static, Result<()>>) {
        let driver = async move {
            if !started(head.initial_ready(), &ctx).await? {
                return Ok(());
            }
            loop {
                if !pump(&mut head, self.value.clone(), &ctx).await? {
                    return Ok(());
                }
                // A chain of immediately-ready stages would otherwise never yield
                tokio::task::yield_now().await;
            }
        };
        ((), driver.boxed())
    }
}

/// Items are pushed by the caller through a [`PushHandle`]
#[derive(Debug)]
pub struct Pushable<T> {
    _item: std::marker::PhantomData<fn() -> T>,
}

impl<T> Pushable<T> {
    pub fn new() -> Self {
        Self {
            _item: std::marker::PhantomData,
        }
    }
}

impl<T> Default for Pushable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Pushable<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Source for Pushable<T> {
    type Item = T;
    type Control = PushHandle<T>;

    fn launch(
        self,
        mut head: Next<T>,
        ctx: FlowContext,
    ) -> (PushHandle<T>, BoxFuture<'static, Result<()>>) {
        let (requests, mut incoming) = mpsc::channel::<PushRequest<T>>(1);
        let initial = head.initial_ready();
        let handle = PushHandle {
            requests,
            initial: initial.clone(),
            outstanding: Arc::new(AtomicBool::new(false)),
            cancel: ctx.token().clone(),
        };

        let driver = async move {
            if !started(initial, &ctx).await? {
                return Ok(());
            }
            loop {
                let request = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => return Ok(()),
                    err = ctx.failed() => return Err(err),
                    request = incoming.recv() => request,
                };
                let Some(PushRequest { item, reply }) = request else {
                    debug!("every push handle dropped; stopping source");
                    return Ok(());
                };

                match pump(&mut head, item, &ctx).await {
                    Ok(true) => {
                        let _ = reply.send(Ok(()));
                    }
                    Ok(false) => {
                        let _ = reply.send(Err(PipelineError::PushRejected(
                            "pipeline was cancelled".into(),
                        )));
                        return Ok(());
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err.clone()));
                        return Err(err);
                    }
                }
            }
        };
        (handle, driver.boxed())
    }
}

struct PushRequest<T> {
    item: T,
    reply: oneshot::Sender<Result<()>>,
}

/// Caller-facing input of a pushable pipeline
///
/// At most one push may be outstanding at a time; pushes before the pipeline is
/// ready, while another push is pending, or after the run has stopped are
/// rejected without affecting the run's completion.
pub struct PushHandle<T> {
    requests: mpsc::Sender<PushRequest<T>>,
    initial: InitialReady,
    outstanding: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl<T> Clone for PushHandle<T> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            initial: self.initial.clone(),
            outstanding: Arc::clone(&self.outstanding),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: Send + 'static> PushHandle<T> {
    /// Resolves when the pipeline accepts its first item
    pub async fn initial_ready(&self) -> Result<()> {
        self.initial.clone().await
    }

    /// Whether the pipeline has signalled initial readiness
    pub fn is_ready(&self) -> bool {
        matches!(self.initial.peek(), Some(Ok(())))
    }

    /// Push one item; resolves with the pipeline's readiness for the next one
    pub async fn push(&self, item: T) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(rejected("pipeline is no longer running"));
        }
        if !self.is_ready() {
            return Err(rejected("pipeline is not ready yet"));
        }
        if self.outstanding.swap(true, Ordering::AcqRel) {
            return Err(rejected("another push is still outstanding"));
        }
        let _outstanding = Outstanding(&self.outstanding);

        let (reply, response) = oneshot::channel();
        self.requests
            .send(PushRequest { item, reply })
            .await
            .map_err(|_| rejected("pipeline is no longer running"))?;
        response
            .await
            .map_err(|_| rejected("pipeline stopped before the push settled"))?
    }
}

struct Outstanding<'a>(&'a AtomicBool);

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn rejected(reason: &str) -> PipelineError {
    PipelineError::PushRejected(reason.into())
}

/// Wait for the head's initial readiness; `false` if cancelled first
async fn started(initial: InitialReady, ctx: &FlowContext) -> Result<bool> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Ok(false),
        err = ctx.failed() => Err(err),
        ready = initial => ready.map(|()| true),
    }
}

/// Push one item and await readiness; `false` if cancelled first
async fn pump<T: Send + 'static>(head: &mut Next<T>, item: T, ctx: &FlowContext) -> Result<bool> {
    ctx.metrics().record_emitted();
    trace!("source push");
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Ok(false),
        err = ctx.failed() => Err(err),
        pushed = head.push(item) => pushed.map(|()| true),
    }
}
