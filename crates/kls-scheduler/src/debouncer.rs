use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::Scheduler;

struct PendingRun {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Trailing-edge debouncer: each `schedule` supersedes the previous pending
/// run and restarts the delay. The fired closure runs on the scheduler's
/// background pool.
pub struct Debouncer {
    scheduler: Scheduler,
    delay: Duration,
    pending: Mutex<Option<PendingRun>>,
}

impl Debouncer {
    pub fn new(scheduler: Scheduler, delay: Duration) -> Self {
        Self {
            scheduler,
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule<F>(&self, f: F)
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let token = CancellationToken::new();
        let token_for_task = token.clone();
        let scheduler = self.scheduler.clone();
        let delay = self.delay;

        let handle = self.scheduler.io_handle().spawn(async move {
            tokio::select! {
                _ = token_for_task.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let task = scheduler.spawn_background_with_token(
                        token_for_task.clone(),
                        move |token| {
                            f(token);
                            Ok(())
                        },
                    );
                    drop(task);
                }
            }
        });

        let previous = self.pending.lock().replace(PendingRun { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
            previous.handle.abort();
        }
    }

    /// Bypasses the delay; does not disturb a pending debounced run.
    pub fn submit_immediately<F>(&self, f: F)
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let task = self.scheduler.spawn_background(move |token| {
            f(token);
            Ok(())
        });
        drop(task);
    }

    /// Cancels the pending run, losing its tick.
    pub fn close(&self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.token.cancel();
            pending.handle.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.close();
    }
}
