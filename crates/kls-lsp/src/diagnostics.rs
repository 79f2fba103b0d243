use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use url::Url;

use kls_compiler::Diagnostic;
use kls_scheduler::{CancellationToken, Debouncer, Scheduler};

use crate::config::DiagnosticsConfiguration;

/// Where published diagnostics go (the LSP client, in production).
pub trait DiagnosticsClient: Send + Sync {
    fn publish_diagnostics(&self, uri: &Url, diagnostics: Vec<Diagnostic>);
}

pub type LintAction = dyn Fn(Vec<Url>, CancellationToken) + Send + Sync;

/// Debounced lint scheduler.
///
/// Editor events insert into a pending set; the debouncer coalesces bursts
/// into one lint run. Runs are suppressed while the classpath is not READY
/// so degraded mode never reports false errors.
pub struct DiagnosticsManager {
    pending: Mutex<HashSet<Url>>,
    debouncer: Mutex<Debouncer>,
    scheduler: Scheduler,
    client: RwLock<Option<Arc<dyn DiagnosticsClient>>>,
    lint_action: RwLock<Option<Arc<LintAction>>>,
    classpath_ready: Box<dyn Fn() -> bool + Send + Sync>,
    config: RwLock<DiagnosticsConfiguration>,
    closed: AtomicBool,
}

impl DiagnosticsManager {
    pub fn new(
        scheduler: Scheduler,
        classpath_ready: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Arc<Self> {
        let config = DiagnosticsConfiguration::default();
        let debouncer = Debouncer::new(
            scheduler.clone(),
            Duration::from_millis(config.debounce_time),
        );
        Arc::new(Self {
            pending: Mutex::new(HashSet::new()),
            debouncer: Mutex::new(debouncer),
            scheduler,
            client: RwLock::new(None),
            lint_action: RwLock::new(None),
            classpath_ready: Box::new(classpath_ready),
            config: RwLock::new(config),
            closed: AtomicBool::new(false),
        })
    }

    pub fn connect(&self, client: Arc<dyn DiagnosticsClient>) {
        *self.client.write() = Some(client);
    }

    pub fn set_lint_action(&self, action: impl Fn(Vec<Url>, CancellationToken) + Send + Sync + 'static) {
        *self.lint_action.write() = Some(Arc::new(action));
    }

    pub fn set_config(&self, config: DiagnosticsConfiguration) {
        let debounce_changed = {
            let mut current = self.config.write();
            let changed = current.debounce_time != config.debounce_time;
            *current = config;
            changed
        };
        if debounce_changed {
            let debounce_time = self.config.read().debounce_time;
            self.update_debounce_time(debounce_time);
        }
    }

    pub fn config(&self) -> DiagnosticsConfiguration {
        self.config.read().clone()
    }

    /// Swaps the debouncer; a pending tick on the old one is lost.
    pub fn update_debounce_time(&self, millis: u64) {
        let next = Debouncer::new(self.scheduler.clone(), Duration::from_millis(millis));
        *self.debouncer.lock() = next;
    }

    pub fn schedule_lint(self: &Arc<Self>, uri: &Url) {
        if self.closed.load(Ordering::SeqCst) || !self.config.read().enabled {
            return;
        }
        self.pending.lock().insert(uri.clone());

        let manager = Arc::clone(self);
        self.debouncer
            .lock()
            .schedule(move |token| manager.run_lint(token));
    }

    pub fn lint_immediately(self: &Arc<Self>, uri: &Url) {
        if self.closed.load(Ordering::SeqCst) || !self.config.read().enabled {
            return;
        }
        self.pending.lock().insert(uri.clone());

        let manager = Arc::clone(self);
        self.debouncer
            .lock()
            .submit_immediately(move |token| manager.run_lint(token));
    }

    /// Atomically drains and returns the pending set.
    pub fn clear_pending(&self) -> HashSet<Url> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn run_lint(&self, token: CancellationToken) {
        if self.closed.load(Ordering::SeqCst) || token.is_cancelled() {
            return;
        }
        if !(self.classpath_ready)() {
            // Degraded mode: leave the pending set intact; the READY
            // transition re-lints open files.
            tracing::debug!(target = "kls.diagnostics", "classpath not ready; skipping lint");
            return;
        }

        let mut files: Vec<Url> = self.clear_pending().into_iter().collect();
        if files.is_empty() {
            return;
        }
        files.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        let action = self.lint_action.read().clone();
        if let Some(action) = action {
            action(files, token);
        }
    }

    /// Publishes `diagnostics` grouped by file.
    ///
    /// Only open files receive publications; an open file with nothing to
    /// report gets an explicit empty list so stale squiggles clear.
    pub fn publish(&self, diagnostics: Vec<Diagnostic>, open_files: &[Url]) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let config = self.config.read().clone();
        if !config.enabled {
            return;
        }
        let Some(client) = self.client.read().clone() else {
            return;
        };

        let min_severity = config.min_severity();
        let mut by_file: HashMap<Url, Vec<Diagnostic>> = HashMap::new();
        for diagnostic in diagnostics {
            if diagnostic.severity < min_severity {
                continue;
            }
            by_file
                .entry(diagnostic.uri.clone())
                .or_default()
                .push(diagnostic);
        }

        for uri in open_files {
            let file_diagnostics = by_file.remove(uri).unwrap_or_default();
            client.publish_diagnostics(uri, file_diagnostics);
        }
        // Whatever remains belongs to files that are not open; swallow it.
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.debouncer.lock().close();
    }
}
