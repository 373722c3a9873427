use crate::error::{PipelineError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A fixed table of numbered slots bounding how much work a stage holds at once
///
/// Claiming never waits: a stage claims only after its readiness said a slot is
/// free, so a failed claim means the readiness accounting was broken.
#[derive(Debug, Clone)]
pub struct Slots {
    occupied: Arc<Mutex<Vec<bool>>>,
    permits: Arc<Semaphore>,
}

impl Slots {
    pub fn new(capacity: usize) -> Self {
        Self {
            occupied: Arc::new(Mutex::new(vec![false; capacity])),
            permits: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.occupied.lock().len()
    }

    pub fn in_use(&self) -> usize {
        self.occupied.lock().iter().filter(|taken| **taken).count()
    }

    pub fn has_free(&self) -> bool {
        self.permits.available_permits() > 0
    }

    /// Claim the lowest-numbered free slot
    pub fn claim(&self) -> Result<Slot> {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| PipelineError::InvariantViolation("no free slot".into()))?;

        let mut occupied = self.occupied.lock();
        let index = occupied
            .iter()
            .position(|taken| !taken)
            .ok_or_else(|| PipelineError::InvariantViolation("slot table out of sync".into()))?;
        occupied[index] = true;

        Ok(Slot {
            index,
            occupied: Arc::clone(&self.occupied),
            _permit: permit,
        })
    }

    /// Resolves as soon as any slot is free
    pub async fn wait_free(&self) -> Result<()> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PipelineError::ShutdownError("slot table closed".into()))?;
        drop(permit);
        Ok(())
    }
}

/// A claimed slot; released when dropped
#[derive(Debug)]
pub struct Slot {
    index: usize,
    occupied: Arc<Mutex<Vec<bool>>>,
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        // Runs before the permit is returned, so a woken waiter sees the table entry free
        self.occupied.lock()[self.index] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_claims_lowest_free_index() {
        let slots = Slots::new(3);
        let a = slots.claim().unwrap();
        let b = slots.claim().unwrap();
        let c = slots.claim().unwrap();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));

        drop(b);
        assert_eq!(slots.in_use(), 2);
        let again = slots.claim().unwrap();
        assert_eq!(again.index(), 1);
        drop((a, c, again));
    }

    #[test]
    fn test_claim_past_capacity_is_invariant_violation() {
        let slots = Slots::new(1);
        let _held = slots.claim().unwrap();
        assert!(!slots.has_free());
        assert!(matches!(
            slots.claim(),
            Err(PipelineError::InvariantViolation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_free_resolves_on_release() {
        let slots = Slots::new(1);
        let held = slots.claim().unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(held);
        });

        let started = tokio::time::Instant::now();
        slots.wait_free().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert!(slots.has_free());
        assert_eq!(slots.capacity(), 1);
    }
}
