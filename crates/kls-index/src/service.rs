use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use url::Url;

use kls_compiler::{Declaration, ModuleScope};

use crate::index::{RefreshParams, SymbolIndex};

/// Lazily computes a file's declarations.
///
/// The closure contract keeps a disabled index free: providers are invoked
/// only when indexing is enabled, so callers may capture whole trees without
/// paying traversal cost up front.
pub type DeclarationsProvider = Box<dyn FnOnce() -> Vec<Declaration> + Send>;

pub struct DeclarationDelta {
    pub uri: Url,
    pub old: DeclarationsProvider,
    pub new: DeclarationsProvider,
}

struct DeltaJob {
    module_id: Option<String>,
    deltas: Vec<DeclarationDelta>,
}

/// Async wrapper over [`SymbolIndex`] driven by the source path.
///
/// Deltas drain through one worker thread so updates for the same file apply
/// in submission order. When disabled, every method is a no-op and never
/// calls a provider.
pub struct IndexingService {
    index: Arc<SymbolIndex>,
    enabled: AtomicBool,
    tx: Mutex<Option<mpsc::Sender<DeltaJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IndexingService {
    pub fn new(index: Arc<SymbolIndex>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<DeltaJob>();

        let worker_index = Arc::clone(&index);
        let worker = std::thread::Builder::new()
            .name("kls-indexing".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    for delta in job.deltas {
                        let uri = delta.uri;
                        let providers = std::panic::catch_unwind(
                            std::panic::AssertUnwindSafe(|| ((delta.old)(), (delta.new)())),
                        );
                        let Ok((old, new)) = providers else {
                            tracing::warn!(
                                target = "kls.index",
                                uri = %uri,
                                "declaration provider panicked; skipping delta"
                            );
                            continue;
                        };
                        if let Err(err) = worker_index.apply_file_delta(
                            job.module_id.as_deref(),
                            &uri,
                            &old,
                            &new,
                        ) {
                            tracing::warn!(
                                target = "kls.index",
                                uri = %uri,
                                error = %err,
                                "failed to apply index delta"
                            );
                        }
                    }
                }
            })
            .expect("failed to spawn indexing worker");

        Arc::new(Self {
            index,
            enabled: AtomicBool::new(true),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn index(&self) -> &Arc<SymbolIndex> {
        &self.index
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Queues per-file deltas for background application, preserving
    /// submission order.
    pub fn update_indexes(&self, module_id: Option<String>, deltas: Vec<DeclarationDelta>) {
        if !self.is_enabled() || deltas.is_empty() {
            return;
        }
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(DeltaJob { module_id, deltas });
        }
    }

    /// Kicks a full rebuild unless disabled.
    pub fn refresh_index(&self, scope: Arc<dyn ModuleScope>, params: RefreshParams) {
        if !self.is_enabled() {
            return;
        }
        let task = self.index.refresh(scope, params);
        drop(task);
    }

    /// Stops the worker after draining queued deltas.
    pub fn close(&self) {
        self.tx.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for IndexingService {
    fn drop(&mut self) {
        self.tx.lock().take();
    }
}
