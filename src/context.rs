use crate::error::PipelineError;
use crate::metrics::FlowMetrics;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Run-scoped state shared by the source driver and every Logic of one run
///
/// Holds the cancellation token that stops background tasks, the fault signal
/// that carries the first failure observed off the push path, and the run's metrics.
#[derive(Debug, Clone)]
pub struct FlowContext {
    cancel: CancellationToken,
    faults: Arc<watch::Sender<Option<PipelineError>>>,
    metrics: FlowMetrics,
}

impl FlowContext {
    pub fn new() -> Self {
        let (faults, _) = watch::channel(None);
        Self {
            cancel: CancellationToken::new(),
            faults: Arc::new(faults),
            metrics: FlowMetrics::new(),
        }
    }

    /// Context for a side branch
    ///
    /// The branch is cancelled together with this run, but its faults and metrics
    /// are its own: a failing branch never settles the parent's completion.
    pub fn branch(&self) -> Self {
        let (faults, _) = watch::channel(None);
        Self {
            cancel: self.cancel.child_token(),
            faults: Arc::new(faults),
            metrics: FlowMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &FlowMetrics {
        &self.metrics
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves once the run is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Record a failure raised outside the driver's own push path
    ///
    /// Only the first report is kept; later ones are ignored.
    pub fn report(&self, err: PipelineError) {
        let first = self.faults.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(err.clone());
                true
            } else {
                false
            }
        });
        if first {
            error!(%err, "pipeline fault reported");
        }
    }

    /// The first reported fault, if any
    pub fn fault(&self) -> Option<PipelineError> {
        self.faults.borrow().clone()
    }

    /// Resolves with the first reported fault; pending forever if none is reported
    pub async fn failed(&self) -> PipelineError {
        let mut faults = self.faults.subscribe();
        loop {
            let current = faults.borrow_and_update().clone();
            if let Some(err) = current {
                return err;
            }
            if faults.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Spawn a background task that is dropped when the run is cancelled
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = task => {}
            }
        });
    }
}

impl Default for FlowContext {
    fn default() -> Self {
        Self::new()
    }
}
