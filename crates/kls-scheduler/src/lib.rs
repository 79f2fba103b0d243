//! Thread pools, cancellation and debouncing for background work.
//!
//! Blocking compiler calls may run minutes while UI-path requests must stay
//! sub-second, so background work runs on named rayon pools and is joined
//! synchronously with a timeout. Cancellation is cooperative via
//! [`CancellationToken`]; tokens are polled at batch and package boundaries.

mod debouncer;
mod progress;
mod scheduler;
mod task;

pub use debouncer::Debouncer;
pub use progress::{Progress, ProgressEvent, ProgressId, ProgressReceiver, ProgressSender};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use task::{BackgroundTask, TaskError};

pub use tokio_util::sync::CancellationToken;

/// Marker returned by cancelled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;
