//! Per-pass call context: caller-supplied deadline and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CloudError;

/// Deadline and cancellation for one reconcile pass.
///
/// Cheap to clone; clones share the cancellation token.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// A context without a deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the deadline.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Replace the cancellation token, e.g. with a child of a controller-wide token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a cloud call, aborting it if the deadline passes or the context is
    /// cancelled first.
    pub async fn run<T, F>(&self, call: F) -> Result<T, CloudError>
    where
        F: Future<Output = Result<T, CloudError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(CloudError::Cancelled);
        }

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(CloudError::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => Err(CloudError::DeadlineExceeded),
                    result = call => result,
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(CloudError::Cancelled),
                    result = call => result,
                }
            }
        }
    }

    /// Sleep, subject to the same deadline and cancellation as [`run`](Self::run).
    pub async fn sleep(&self, duration: Duration) -> Result<(), CloudError> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
