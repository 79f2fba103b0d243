//! The KLS request layer: caches, executors, diagnostics scheduling, and
//! the positional query providers, wired together by [`KlsState`].
//!
//! Wire framing and JSON-RPC transport live outside this crate; the state's
//! methods map one-to-one onto LSP requests and notifications, with
//! [`to_lsp`] converting results at the boundary. Custom endpoints live in
//! [`extensions`] under the `kotlin/*` namespace.

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod executor;
pub mod extensions;
pub mod queries;
pub mod state;
pub mod to_lsp;

pub use cache::{CacheKey, LspCacheManager, LspResponseCache, DEFAULT_CACHE_CAPACITY};
pub use config::Configuration;
pub use diagnostics::{DiagnosticsClient, DiagnosticsManager};
pub use executor::{LspExecutorPool, OperationKind, SHUTDOWN_TIMEOUT_SECONDS};
pub use queries::definition::Decompiler;
pub use queries::Recompile;
pub use state::{KlsState, StateError};
