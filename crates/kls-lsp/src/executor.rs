use std::collections::HashMap;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Grace period before shutdown gives up on in-flight requests.
pub const SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Definition,
    Hover,
    Completion,
    References,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Definition,
        OperationKind::Hover,
        OperationKind::Completion,
        OperationKind::References,
    ];

    fn thread_name(self) -> &'static str {
        match self {
            OperationKind::Definition => "kls-definition",
            OperationKind::Hover => "kls-hover",
            OperationKind::Completion => "kls-completion",
            OperationKind::References => "kls-references",
        }
    }
}

type Job = Box<dyn FnOnce() + Send>;

struct Worker {
    tx: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

/// The response to a submitted operation.
pub struct PendingResponse<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> PendingResponse<T> {
    /// Blocks for the result; `None` when the pool shut down underneath the
    /// request.
    pub fn wait(self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// One single-thread executor per operation kind.
///
/// Serial ordering within a kind keeps responses in submission order;
/// distinct kinds run concurrently so a slow reference search cannot queue
/// behind a burst of hovers. Threads are named `kls-<kind>`.
pub struct LspExecutorPool {
    workers: Mutex<HashMap<OperationKind, Worker>>,
}

impl LspExecutorPool {
    pub fn new() -> Self {
        let mut workers = HashMap::new();
        for kind in OperationKind::ALL {
            workers.insert(kind, Self::spawn_worker(kind));
        }
        Self {
            workers: Mutex::new(workers),
        }
    }

    fn spawn_worker(kind: OperationKind) -> Worker {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name(kind.thread_name().to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .expect("failed to spawn LSP operation thread");
        Worker { tx, handle }
    }

    /// Enqueues `task` on the kind's executor. Tasks for the same kind run
    /// in submission order.
    pub fn submit<T, F>(&self, kind: OperationKind, task: F) -> PendingResponse<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            let _ = result_tx.send(task());
        });

        let workers = self.workers.lock();
        match workers.get(&kind) {
            Some(worker) => {
                if worker.tx.send(job).is_err() {
                    tracing::warn!(
                        target = "kls.executor",
                        kind = kind.thread_name(),
                        "executor already shut down; dropping request"
                    );
                }
            }
            None => {
                tracing::warn!(
                    target = "kls.executor",
                    kind = kind.thread_name(),
                    "executor pool closed; dropping request"
                );
            }
        }
        PendingResponse { rx: result_rx }
    }

    /// Shuts the pool down: stops accepting work, then waits up to
    /// [`SHUTDOWN_TIMEOUT_SECONDS`] for in-flight requests before giving up
    /// (worker threads are daemonic and die with the process).
    pub fn close(&self) {
        let workers: Vec<Worker> = {
            let mut map = self.workers.lock();
            OperationKind::ALL
                .iter()
                .filter_map(|kind| map.remove(kind))
                .collect()
        };

        let deadline = Instant::now() + Duration::from_secs(SHUTDOWN_TIMEOUT_SECONDS);
        for worker in workers {
            // Dropping the sender ends the worker's receive loop.
            drop(worker.tx);
            while !worker.handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if worker.handle.is_finished() {
                let _ = worker.handle.join();
            } else {
                tracing::warn!(
                    target = "kls.executor",
                    "executor did not drain within the shutdown grace period"
                );
            }
        }
    }
}

impl Default for LspExecutorPool {
    fn default() -> Self {
        Self::new()
    }
}
