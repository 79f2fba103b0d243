use kls_core::Range;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Hint,
    Information,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub uri: Url,
    pub range: Range,
    pub severity: Severity,
    /// Stable front-end code, e.g. `UNRESOLVED_REFERENCE`.
    pub code: Option<String>,
    pub message: String,
}
