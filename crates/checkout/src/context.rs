//! Caller-supplied deadline for a single operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, error::Elapsed};

/// Bounds how long a commit or rollback may run.
///
/// Every lock wait and store call of an operation is raced against the
/// same deadline, so an operation never suspends past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context without a deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context expiring at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true if the deadline has passed.
    ///
    /// A bounded future is polled once before its deadline is checked, so
    /// callers test this before starting work that must not begin late.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Runs `fut` to completion or until the deadline, whichever is first.
    pub async fn bound<F: Future>(&self, fut: F) -> Result<F::Output, Elapsed> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut).await,
            None => Ok(fut.await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bound_without_deadline_always_completes() {
        let ctx = OpContext::background();
        let result = ctx
            .bound(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                7
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert!(!ctx.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn bound_cuts_off_at_deadline() {
        let ctx = OpContext::with_timeout(Duration::from_millis(100));
        let result = ctx
            .bound(tokio::time::sleep(Duration::from_secs(1)))
            .await;
        assert!(result.is_err());
        assert!(ctx.is_expired());
    }
}
