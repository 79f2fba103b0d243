//! Shared, dependency-minimized core types used across KLS.

pub mod archive;
pub mod kls_uri;
pub mod path;
pub mod text;

pub use archive::ArchiveDetector;
pub use kls_uri::{KlsUri, KlsUriError};
pub use path::{file_uri_to_path, normalize_path, path_to_file_uri, UriToPathError};
pub use text::{Location, Position, Range};

/// The current KLS version.
///
/// Used for on-disk compatibility checks alongside the database schema
/// version.
pub const KLS_VERSION: &str = env!("CARGO_PKG_VERSION");
