use std::sync::mpsc;
use std::sync::Arc;

use rayon::ThreadPool;
use tokio::runtime::Runtime;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{Cancelled, ProgressSender};
use crate::task::{BackgroundTask, TaskError};

fn build_rayon_pool(name_prefix: &'static str, threads: usize) -> ThreadPool {
    // Thread creation can fail in constrained CI/sandbox environments (e.g.
    // low RLIMIT_NPROC); degrade instead of crashing during startup.
    let requested = threads.max(1);
    let mut desired = requested;
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(desired)
            .thread_name(move |idx| format!("{name_prefix}-{idx}"))
            .build()
        {
            Ok(pool) => return pool,
            Err(_err) if desired > 1 => {
                desired /= 2;
                continue;
            }
            Err(err) => panic!(
                "failed to build {name_prefix} pool (requested {requested} thread(s)): {err}"
            ),
        }
    }
}

fn build_io_runtime(threads: usize) -> Runtime {
    let requested = threads.max(1);
    let mut desired = requested;
    loop {
        match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(desired)
            .enable_time()
            .thread_name("kls-io")
            .build()
        {
            Ok(runtime) => return runtime,
            Err(_err) if desired > 1 => {
                desired /= 2;
                continue;
            }
            Err(err) => {
                panic!("failed to build IO runtime (requested {requested} thread(s)): {err}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub background_threads: usize,
    pub io_threads: usize,
    pub progress_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            background_threads: available.clamp(1, 4),
            io_threads: 1,
            progress_channel_capacity: 1024,
        }
    }
}

/// Shared scheduling substrate: one named background pool for blocking work
/// and one small tokio runtime for timers.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    background_pool: ThreadPool,
    io_runtime: Option<Runtime>,
    io_handle: tokio::runtime::Handle,
    progress: ProgressSender,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let background_pool = build_rayon_pool("kls-background", config.background_threads);
        let io_runtime = build_io_runtime(config.io_threads);
        let io_handle = io_runtime.handle().clone();

        let (progress_tx, _) = broadcast::channel(config.progress_channel_capacity.max(1));
        let progress = ProgressSender::new(progress_tx);

        Self {
            inner: Arc::new(SchedulerInner {
                background_pool,
                io_runtime: Some(io_runtime),
                io_handle,
                progress,
            }),
        }
    }

    pub fn progress(&self) -> ProgressSender {
        self.inner.progress.clone()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<crate::ProgressEvent> {
        self.inner.progress.subscribe()
    }

    pub fn io_handle(&self) -> tokio::runtime::Handle {
        self.inner.io_handle.clone()
    }

    /// Spawns blocking work on the background pool.
    ///
    /// The result is delivered through the returned handle; panics surface as
    /// [`TaskError::Panicked`] rather than poisoning the pool.
    pub fn spawn_background<T, F>(&self, f: F) -> BackgroundTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        self.spawn_background_with_token(CancellationToken::new(), f)
    }

    pub fn spawn_background_with_token<T, F>(
        &self,
        token: CancellationToken,
        f: F,
    ) -> BackgroundTask<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Result<T, Cancelled> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        if token.is_cancelled() {
            let _ = tx.send(Err(TaskError::Cancelled));
            return BackgroundTask::new(token, rx);
        }

        let token_for_job = token.clone();
        self.inner.background_pool.spawn(move || {
            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(token_for_job)))
                    .map_err(|_| TaskError::Panicked)
                    .and_then(|result| result.map_err(TaskError::from));
            let _ = tx.send(result);
        });

        BackgroundTask::new(token, rx)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.io_runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn background_work_delivers_result() {
        let scheduler = Scheduler::default();
        let task = scheduler.spawn_background(|_token| Ok(40 + 2));
        assert_eq!(task.join(), Ok(42));
    }

    #[test]
    fn pre_cancelled_token_short_circuits() {
        let scheduler = Scheduler::default();
        let token = CancellationToken::new();
        token.cancel();
        let task = scheduler.spawn_background_with_token(token, |_token| Ok(1));
        assert_eq!(task.join(), Err(TaskError::Cancelled));
    }

    #[test]
    fn join_timeout_leaves_slow_tasks_running() {
        let scheduler = Scheduler::default();
        let task = scheduler.spawn_background(|_token| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(7)
        });
        assert!(task.join_timeout(Duration::from_millis(10)).is_none());
        assert_eq!(task.join(), Ok(7));
    }

    #[test]
    fn panics_surface_as_task_errors() {
        let scheduler = Scheduler::default();
        let task: BackgroundTask<()> = scheduler.spawn_background(|_token| panic!("boom"));
        assert_eq!(task.join(), Err(TaskError::Panicked));
    }
}
