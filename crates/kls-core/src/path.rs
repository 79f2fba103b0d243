use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum UriToPathError {
    #[error("not a file URI: {0}")]
    NotFile(Url),
    #[error("URI has no usable path: {0}")]
    NoPath(Url),
}

/// Converts a `file:` URI into a filesystem path.
pub fn file_uri_to_path(uri: &Url) -> Result<PathBuf, UriToPathError> {
    if uri.scheme() != "file" {
        return Err(UriToPathError::NotFile(uri.clone()));
    }
    uri.to_file_path()
        .map_err(|_| UriToPathError::NoPath(uri.clone()))
}

/// Converts a filesystem path into a `file:` URI.
///
/// Relative paths are resolved against the current working directory first;
/// the resulting URI is always absolute.
pub fn path_to_file_uri(path: &Path) -> Option<Url> {
    let absolute = if path.is_absolute() {
        normalize_path(path)
    } else {
        let cwd = std::env::current_dir().ok()?;
        normalize_path(&cwd.join(path))
    };
    Url::from_file_path(absolute).ok()
}

/// Lexically normalizes a path: resolves `.` and `..` components without
/// touching the filesystem.
///
/// Symlinks are deliberately not resolved so that containment checks compare
/// the same view of the tree the editor uses.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
