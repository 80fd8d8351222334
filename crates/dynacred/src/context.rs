//! Per-request cancellation and deadlines

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a request stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The caller cancelled the request
    Cancelled,
    /// The request deadline passed
    DeadlineExceeded,
}

impl std::fmt::Display for Interrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "request cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

impl From<Interrupted> for dynacred_rdbc::Error {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Cancelled => Self::cancelled(value.to_string()),
            Interrupted::DeadlineExceeded => Self::timeout(value.to_string()),
        }
    }
}

/// Cancellation token plus optional deadline carried by every lifecycle call
///
/// Cloning shares the token, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context with no deadline and a fresh token
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Set an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The cancellation token
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel the request
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check for cancellation or an expired deadline without waiting
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the request is cancelled or times out.
    ///
    /// On interruption `fut` is dropped at its current await point.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = deadline => Err(Interrupted::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_run_observes_cancellation() {
        let ctx = RequestContext::new();
        let clone = ctx.clone();
        let pending = tokio::spawn(async move { clone.run(std::future::pending::<()>()).await });

        ctx.cancel();
        assert_eq!(pending.await.unwrap(), Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn test_run_already_cancelled() {
        let ctx = RequestContext::new();
        ctx.cancel();
        assert_eq!(ctx.run(async { 1 }).await, Err(Interrupted::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_observes_deadline() {
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(5));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
    }

    #[test]
    fn test_interrupted_into_rdbc_error() {
        let err: dynacred_rdbc::Error = Interrupted::Cancelled.into();
        assert!(err.is_interrupted());
        let err: dynacred_rdbc::Error = Interrupted::DeadlineExceeded.into();
        assert_eq!(err.category(), dynacred_rdbc::error::ErrorCategory::Timeout);
    }
}
