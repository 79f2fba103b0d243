use std::sync::mpsc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::Cancelled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    Cancelled,
    Panicked,
    /// The task was dropped without producing a result (pool shut down).
    Abandoned,
}

impl From<Cancelled> for TaskError {
    fn from(_: Cancelled) -> Self {
        TaskError::Cancelled
    }
}

/// A handle to one unit of blocking background work.
///
/// Joining is synchronous; callers that must stay responsive use
/// [`BackgroundTask::join_timeout`].
pub struct BackgroundTask<T> {
    token: CancellationToken,
    rx: mpsc::Receiver<Result<T, TaskError>>,
}

impl<T> BackgroundTask<T> {
    pub(crate) fn new(
        token: CancellationToken,
        rx: mpsc::Receiver<Result<T, TaskError>>,
    ) -> Self {
        Self { token, rx }
    }

    /// Requests cooperative cancellation; the task observes it at its next
    /// yield point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn join(self) -> Result<T, TaskError> {
        self.rx.recv().unwrap_or(Err(TaskError::Abandoned))
    }

    /// Blocks up to `timeout` for the result. On timeout the task keeps
    /// running and the handle stays usable.
    pub fn join_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(TaskError::Abandoned)),
        }
    }
}
