//! Persistent symbol index and its lazy async wrapper.

mod index;
mod jar_scanner;
mod service;
mod symbol;

pub use index::{
    RefreshParams, SymbolIndex, DEFAULT_BATCH_SIZE, INDEX_QUERY_TIMEOUT_MS,
    PROGRESS_UPDATE_INTERVAL_MS,
};
pub use jar_scanner::ZipClassfileScanner;
pub use service::{DeclarationDelta, DeclarationsProvider, IndexingService};
pub use symbol::{Symbol, SymbolIndexMetadata};
