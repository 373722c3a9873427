use crate::chain::PushChain;
use crate::context::FlowContext;
use crate::error::{PipelineError, Result};
use crate::logic::{InitialReady, Logic, Next};
use crate::slots::Slots;
use crate::stage::StageKind;
use async_trait::async_trait;
use crossbeam::queue::ArrayQueue;
use futures::FutureExt;
use std::sync::Arc;
use tracing::trace;

/// A lock-free FIFO using crossbeam's ArrayQueue
#[derive(Debug)]
pub struct RingBuffer<T> {
    queue: Arc<ArrayQueue<T>>,
}

impl<T> Clone for RingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T> RingBuffer<T> {
    /// Create a ring buffer holding at most `capacity` items (`capacity` must be non-zero)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity)),
        }
    }

    /// Append an item; hands it back if the buffer is full
    pub fn push(&self, item: T) -> std::result::Result<(), T> {
        self.queue.push(item)
    }

    /// Remove the oldest item
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Fill level as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.capacity()).min(100) as u32
    }
}

/// Logic of the Buffer stage
///
/// Every push enqueues the item and appends a "dequeue the oldest and push it"
/// step to the push chain. Upstream is only held back once `size` items are
/// waiting; a slot frees as soon as the chain dequeues an item.
pub(crate) struct BufferLogic<T> {
    queue: RingBuffer<T>,
    slots: Slots,
    chain: PushChain<T>,
    initial: InitialReady,
    ctx: FlowContext,
}

impl<T: Send + 'static> BufferLogic<T> {
    pub(crate) fn new(size: usize, next: Next<T>, ctx: &FlowContext) -> Self {
        let initial = next.initial_ready();
        Self {
            queue: RingBuffer::new(size),
            slots: Slots::new(size),
            chain: PushChain::spawn(StageKind::Buffer { size }, next, ctx),
            initial,
            ctx: ctx.clone(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Logic<T> for BufferLogic<T> {
    async fn on_push(&mut self, item: T) -> Result<()> {
        let slot = self.slots.claim()?;
        if self.queue.push(item).is_err() {
            return Err(PipelineError::InvariantViolation(
                "buffer queue is full".into(),
            ));
        }

        let queue = self.queue.clone();
        self.chain.submit(
            async move {
                let item = queue.pop().ok_or_else(|| {
                    PipelineError::InvariantViolation("drained an empty buffer".into())
                })?;
                drop(slot);
                Ok(item)
            }
            .boxed(),
            None,
        )?;
        trace!(
            queued = self.queue.len(),
            utilization = self.queue.utilization(),
            "buffered item"
        );

        if !self.slots.has_free() {
            self.ctx.metrics().record_block();
            self.slots.wait_free().await?;
        }
        Ok(())
    }

    fn initial_ready(&self) -> InitialReady {
        self.initial.clone()
    }
}
