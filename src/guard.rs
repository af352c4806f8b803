//! Bounded concurrency for expensive operations.
//!
//! A [`PermitPool`] hands out at most `capacity` permits at a time. Permits
//! are released when dropped, so a holder that errors, panics or is cancelled
//! gives its slot back without extra bookkeeping.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GuardError {
    #[error("Permit acquisition cancelled")]
    Cancelled,

    #[error("Requested {requested} permits but capacity is {capacity}")]
    ExceedsCapacity { requested: u32, capacity: u32 },

    #[error("Permit pool closed")]
    Closed,
}

/// Fixed-capacity pool of permits
#[derive(Debug, Clone)]
pub struct PermitPool {
    semaphore: Arc<Semaphore>,
    capacity: u32,
}

impl PermitPool {
    /// A pool of `capacity` permits; zero is raised to one
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            warn!("Permit pool capacity 0 would block every caller, using 1");
        }
        let capacity = capacity.clamp(1, u32::MAX as usize) as u32;
        Self {
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Wait for one permit, or until `cancel` fires
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, GuardError> {
        self.acquire_many(1, cancel).await
    }

    /// Wait for `n` permits at once, or until `cancel` fires
    pub async fn acquire_many(&self, n: u32, cancel: &CancellationToken) -> Result<Permit, GuardError> {
        if n > self.capacity {
            return Err(GuardError::ExceedsCapacity {
                requested: n,
                capacity: self.capacity,
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GuardError::Cancelled),
            permit = self.semaphore.clone().acquire_many_owned(n) => {
                permit.map(|inner| Permit { inner }).map_err(|_| GuardError::Closed)
            }
        }
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Slot held in a [`PermitPool`]; released on drop
#[derive(Debug)]
#[must_use = "the permit is released as soon as it is dropped"]
pub struct Permit {
    inner: OwnedSemaphorePermit,
}

impl Permit {
    pub fn release(self) {
        drop(self.inner);
    }

    pub fn count(&self) -> usize {
        self.inner.num_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_release() {
        let pool = PermitPool::new(3);
        let cancel = CancellationToken::new();

        let a = pool.acquire(&cancel).await.unwrap();
        let b = pool.acquire(&cancel).await.unwrap();
        assert_eq!(pool.available(), 1);

        a.release();
        assert_eq!(pool.available(), 2);
        drop(b);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn test_waits_for_capacity() {
        let pool = PermitPool::new(1);
        let cancel = CancellationToken::new();
        let held = pool.acquire(&cancel).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire(&cancel).await.map(|p| p.count()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), Ok(1));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let pool = PermitPool::new(1);
        let cancel = CancellationToken::new();
        let _held = pool.acquire(&cancel).await.unwrap();

        let waiter_cancel = CancellationToken::new();
        let waiter = {
            let pool = pool.clone();
            let token = waiter_cancel.clone();
            tokio::spawn(async move { pool.acquire(&token).await.map(|p| p.count()) })
        };

        waiter_cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Err(GuardError::Cancelled));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let pool = PermitPool::new(0);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_exceeds_capacity() {
        let pool = PermitPool::new(3);
        let cancel = CancellationToken::new();
        assert_eq!(
            pool.acquire_many(4, &cancel).await.unwrap_err(),
            GuardError::ExceedsCapacity { requested: 4, capacity: 3 }
        );
        let all = pool.acquire_many(3, &cancel).await.unwrap();
        assert_eq!(all.count(), 3);
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn test_released_on_panic() {
        let pool = PermitPool::new(1);
        let task = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _permit = pool.acquire(&CancellationToken::new()).await.unwrap();
                panic!("holder failed");
            })
        };
        assert!(task.await.is_err());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_capacity() {
        let pool = PermitPool::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let pool = pool.clone();
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _permit = pool.acquire(&CancellationToken::new()).await.unwrap();
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.available(), 3);
    }
}
