//! Concurrency Limiter
//!
//! Counting admission gate in front of the warehouse. A slot is an owned
//! semaphore permit, so it is returned exactly once when the slot is dropped,
//! whether the call succeeded, failed, or was cancelled.

use crate::error::{GuardError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
    admission_timeout: Option<Duration>,
}

/// Permit held while a statement is in flight.
#[derive(Debug)]
pub struct ConcurrencySlot {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    /// `admission_timeout` of `None` waits indefinitely for a slot.
    pub fn new(limit: usize, admission_timeout: Option<Duration>) -> Result<Self> {
        if limit == 0 {
            return Err(GuardError::Config(
                "max_concurrent_queries must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            admission_timeout,
        })
    }

    pub async fn acquire(&self) -> Result<ConcurrencySlot> {
        let wait = self.semaphore.clone().acquire_owned();
        let permit = match self.admission_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(limit = self.limit, "Admission timed out waiting for a query slot");
                    return Err(GuardError::TooManyConcurrentQueries { limit: self.limit });
                }
            },
            None => wait.await,
        };

        // The semaphore is never closed, but a closed gate admits nothing.
        let permit = permit.map_err(|_| GuardError::TooManyConcurrentQueries { limit: self.limit })?;
        Ok(ConcurrencySlot { _permit: permit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.limit - self.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_slots_rejected() {
        assert!(matches!(ConcurrencyLimiter::new(0, None), Err(GuardError::Config(_))));
    }

    #[tokio::test]
    async fn test_slot_released_on_drop() {
        let limiter = ConcurrencyLimiter::new(2, None).unwrap();
        let first = limiter.acquire().await.unwrap();
        let second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 2);
        drop(first);
        assert_eq!(limiter.available(), 1);
        drop(second);
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test]
    async fn test_admission_timeout_reports_too_many() {
        let limiter = ConcurrencyLimiter::new(1, Some(Duration::from_millis(20))).unwrap();
        let _held = limiter.acquire().await.unwrap();
        let err = limiter.acquire().await.unwrap_err();
        assert_eq!(err, GuardError::TooManyConcurrentQueries { limit: 1 });
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_waiter_admitted_after_release() {
        let limiter = ConcurrencyLimiter::new(1, Some(Duration::from_secs(5))).unwrap();
        let held = limiter.acquire().await.unwrap();
        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(held);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(limiter.available(), 1);
    }
}
