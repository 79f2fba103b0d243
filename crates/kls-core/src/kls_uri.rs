use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::path::file_uri_to_path;

#[derive(Debug, Error)]
pub enum KlsUriError {
    #[error("not a kls URI: {0}")]
    WrongScheme(String),
    #[error("kls URI has no `!/` archive separator: {0}")]
    MissingSeparator(String),
    #[error("kls URI wraps an invalid inner URI: {0}")]
    InvalidInner(String),
}

/// A URI pointing at one entry inside an archive, e.g.
/// `kls:file:///deps/foo.jar!/com/example/Foo.class`.
///
/// Used to hand out locations for external-library sources without
/// materializing temp files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KlsUri {
    archive: PathBuf,
    entry: String,
}

impl KlsUri {
    pub fn new(archive: impl Into<PathBuf>, entry: impl Into<String>) -> Self {
        let entry = entry.into();
        Self {
            archive: archive.into(),
            entry: entry.trim_start_matches('/').to_string(),
        }
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// The archive-relative entry path, without a leading slash.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn parse(raw: &str) -> Result<Self, KlsUriError> {
        let inner = raw
            .strip_prefix("kls:")
            .ok_or_else(|| KlsUriError::WrongScheme(raw.to_string()))?;
        let (archive, entry) = inner
            .split_once("!/")
            .ok_or_else(|| KlsUriError::MissingSeparator(raw.to_string()))?;

        let archive_url =
            Url::parse(archive).map_err(|_| KlsUriError::InvalidInner(archive.to_string()))?;
        let archive = file_uri_to_path(&archive_url)
            .map_err(|_| KlsUriError::InvalidInner(archive.to_string()))?;

        Ok(Self::new(archive, entry))
    }

    pub fn to_url(&self) -> Option<Url> {
        Url::parse(&self.to_string()).ok()
    }
}

impl fmt::Display for KlsUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let archive = Url::from_file_path(&self.archive).map_err(|()| fmt::Error)?;
        write!(f, "kls:{archive}!/{}", self.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_through_display() {
        let uri = KlsUri::new("/deps/foo.jar", "com/example/Foo.class");
        let raw = uri.to_string();
        assert_eq!(raw, "kls:file:///deps/foo.jar!/com/example/Foo.class");
        assert_eq!(KlsUri::parse(&raw).unwrap(), uri);
    }

    #[test]
    fn strips_leading_slash_from_entry() {
        let uri = KlsUri::new("/deps/foo.jar", "/com/Foo.class");
        assert_eq!(uri.entry(), "com/Foo.class");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(
            KlsUri::parse("kls:file:///deps/foo.jar"),
            Err(KlsUriError::MissingSeparator(_))
        ));
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(matches!(
            KlsUri::parse("file:///deps/foo.jar!/com/Foo.class"),
            Err(KlsUriError::WrongScheme(_))
        ));
    }
}
