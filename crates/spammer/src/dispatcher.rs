//! Bounded submission dispatcher.
//!
//! Every submission path goes through a [`Dispatcher`] holding a fixed
//! number of permits. Workers take a permit without waiting and skip the
//! tick when none is free; request handlers wait for one. Spawned
//! submissions are tracked so the broker can drain them after a run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Errors acquiring a dispatch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatcher is at capacity")]
    Full,

    #[error("Dispatcher is closed")]
    Closed,
}

/// One reserved in-flight slot. Released on drop.
#[derive(Debug)]
pub struct DispatchPermit(OwnedSemaphorePermit);

/// Caps the number of submissions in flight.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    capacity: usize,
}

impl Dispatcher {
    /// Create a dispatcher with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            tasks: TaskTracker::new(),
            capacity,
        }
    }

    /// Reserve a slot without waiting.
    pub fn try_acquire(&self) -> Result<DispatchPermit, DispatchError> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => Ok(DispatchPermit(permit)),
            Err(TryAcquireError::NoPermits) => Err(DispatchError::Full),
            Err(TryAcquireError::Closed) => Err(DispatchError::Closed),
        }
    }

    /// Wait until a slot is free.
    pub async fn acquire(&self) -> Result<DispatchPermit, DispatchError> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map(DispatchPermit)
            .map_err(|_| DispatchError::Closed)
    }

    /// Run `task` in the background, holding `permit` until it completes.
    pub fn spawn<F>(&self, permit: DispatchPermit, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(async move {
            task.await;
            drop(permit);
        });
    }

    /// Slots currently taken.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Total slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse new slots and wait up to `timeout` for spawned tasks to finish.
    ///
    /// Returns `true` if everything finished in time. Stragglers keep
    /// running but are no longer waited for.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.permits.close();
        self.tasks.close();
        let pending = self.tasks.len();
        if pending == 0 {
            return true;
        }
        debug!(pending, ?timeout, "Draining in-flight submissions");
        match tokio::time::timeout(timeout, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    remaining = self.tasks.len(),
                    "In-flight submissions did not finish before drain timeout"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_try_acquire_respects_capacity() {
        let dispatcher = Dispatcher::new(2);
        let a = dispatcher.try_acquire().unwrap();
        let _b = dispatcher.try_acquire().unwrap();
        assert_eq!(dispatcher.in_flight(), 2);
        assert_eq!(dispatcher.try_acquire().unwrap_err(), DispatchError::Full);

        drop(a);
        assert_eq!(dispatcher.in_flight(), 1);
        assert!(dispatcher.try_acquire().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        assert_eq!(Dispatcher::new(0).capacity(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_capacity() {
        let dispatcher = Dispatcher::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut spawned = 0;
        for _ in 0..20 {
            let permit = dispatcher.acquire().await.unwrap();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            dispatcher.spawn(permit, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
            spawned += 1;
        }

        assert!(dispatcher.drain(Duration::from_secs(1)).await);
        assert_eq!(spawned, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_on_stuck_task() {
        let dispatcher = Dispatcher::new(1);
        let permit = dispatcher.try_acquire().unwrap();
        dispatcher.spawn(permit, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        assert!(!dispatcher.drain(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_closed_after_drain() {
        let dispatcher = Dispatcher::new(1);
        assert!(dispatcher.drain(Duration::from_millis(1)).await);
        assert_eq!(dispatcher.try_acquire().unwrap_err(), DispatchError::Closed);
        assert_eq!(dispatcher.acquire().await.unwrap_err(), DispatchError::Closed);
    }

    #[tokio::test]
    async fn test_dropped_permit_frees_slot() {
        let dispatcher = Dispatcher::new(1);
        let permit = dispatcher.acquire().await.unwrap();
        assert_eq!(dispatcher.in_flight(), 1);
        drop(permit);
        assert_eq!(dispatcher.in_flight(), 0);
    }
}
