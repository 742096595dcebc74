//! Shared read/write throughput budget for the checkpoint backend.

use crate::error::{CheckpointError, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Request-unit budget shared by every conversation key.
///
/// An exhausted budget queues the caller instead of failing, so a noisy
/// conversation shows up as latency, not errors. A wait longer than the
/// ceiling fails with a capacity error. No per-conversation priority.
#[derive(Clone)]
pub struct ThroughputBudget {
    read: Arc<DirectLimiter>,
    write: Arc<DirectLimiter>,
    wait_ceiling: Duration,
}

impl ThroughputBudget {
    /// `read_units` / `write_units` are operations per second; zero is
    /// clamped to one.
    pub fn new(read_units: u32, write_units: u32, wait_ceiling: Duration) -> Self {
        let read = NonZeroU32::new(read_units).unwrap_or(NonZeroU32::MIN);
        let write = NonZeroU32::new(write_units).unwrap_or(NonZeroU32::MIN);

        Self {
            read: Arc::new(RateLimiter::direct(Quota::per_second(read))),
            write: Arc::new(RateLimiter::direct(Quota::per_second(write))),
            wait_ceiling,
        }
    }

    pub async fn acquire_read(&self) -> Result<()> {
        self.acquire(&self.read, "read").await
    }

    pub async fn acquire_write(&self) -> Result<()> {
        self.acquire(&self.write, "write").await
    }

    async fn acquire(&self, limiter: &DirectLimiter, operation: &'static str) -> Result<()> {
        tokio::time::timeout(self.wait_ceiling, limiter.until_ready())
            .await
            .map_err(|_| {
                CheckpointError::CapacityExceeded {
                    operation,
                    waited_ms: self.wait_ceiling.as_millis() as u64,
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn burst_within_budget_does_not_wait() {
        let budget = ThroughputBudget::new(10, 10, Duration::from_millis(10));

        for _ in 0..10 {
            budget.acquire_read().await.expect("burst should fit");
        }
    }

    #[tokio::test]
    async fn exhausted_budget_fails_past_the_wait_ceiling() {
        let budget = ThroughputBudget::new(1, 1, Duration::from_millis(20));

        budget.acquire_write().await.expect("first unit fits");
        let error = budget
            .acquire_write()
            .await
            .expect_err("second unit exceeds the ceiling");

        assert!(matches!(
            error,
            Error::Checkpoint(CheckpointError::CapacityExceeded { operation: "write", .. })
        ));
    }

    #[tokio::test]
    async fn read_and_write_budgets_are_independent() {
        let budget = ThroughputBudget::new(1, 1, Duration::from_millis(20));

        budget.acquire_read().await.expect("read fits");
        budget.acquire_write().await.expect("write fits");
    }
}
