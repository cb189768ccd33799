//! Per-request deadline and cancellation.
//!
//! Every store call takes a `RequestContext`. When the deadline passes or the
//! token is cancelled, the in-flight future is dropped; an open sqlx
//! transaction dropped without commit rolls back.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// No deadline, never cancelled unless `cancel_token()` is triggered.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a context sharing this one's cancellation, with a deadline no
    /// later than `timeout` from now.
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fail fast before starting work that cannot finish in time.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(DispatchError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Remaining time budget, if a deadline is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Drive `fut` until it completes, the deadline passes, or the token is
    /// cancelled. Must be awaited inside a runtime with the time driver.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let guarded = async {
            tokio::select! {
                res = fut => res,
                _ = self.cancel.cancelled() => Err(DispatchError::Cancelled),
            }
        };
        match self.deadline {
            Some(deadline) => {
                tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), guarded)
                    .await
                    .map_err(|_| DispatchError::DeadlineExceeded)?
            }
            None => guarded.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_deadline_fails_check() {
        let ctx = RequestContext::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(ctx.check(), Err(DispatchError::DeadlineExceeded)));
    }

    #[test]
    fn test_cancelled_fails_check() {
        let ctx = RequestContext::background();
        ctx.cancel();
        assert!(matches!(ctx.check(), Err(DispatchError::Cancelled)));
    }

    #[test]
    fn test_child_keeps_earlier_deadline() {
        let parent = RequestContext::with_timeout(Duration::from_millis(50));
        let child = parent.child(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        parent.cancel();
        assert!(child.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(20));
        let res: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(DispatchError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_run_passes_through_result() {
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        let res = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(res, 7);
    }
}
