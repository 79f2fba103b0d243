use kls_compiler::Severity;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_debounce_time() -> u64 {
    250
}

fn default_batch_size() -> usize {
    50
}

fn default_level() -> String {
    "hint".to_string()
}

fn default_jvm_target() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagnosticsConfiguration {
    pub enabled: bool,
    /// Minimum severity emitted: `error`, `warning`, `information`, `hint`.
    pub level: String,
    /// Debounce period in milliseconds.
    pub debounce_time: u64,
}

impl Default for DiagnosticsConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_level(),
            debounce_time: default_debounce_time(),
        }
    }
}

impl DiagnosticsConfiguration {
    pub fn min_severity(&self) -> Severity {
        match self.level.as_str() {
            "error" => Severity::Error,
            "warning" => Severity::Warning,
            "information" => Severity::Information,
            _ => Severity::Hint,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexingConfiguration {
    pub enabled: bool,
    /// Packages per insert transaction during a full rebuild.
    pub batch_size: usize,
}

impl Default for IndexingConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SnippetsConfiguration {
    pub enabled: bool,
}

impl Default for SnippetsConfiguration {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionConfiguration {
    pub snippets: SnippetsConfiguration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExternalSourcesConfiguration {
    /// Return `kls:` URIs instead of materialized temp files.
    pub use_kls_scheme: bool,
    /// Route decompiled Java through a second conversion stage.
    pub auto_convert_to_kotlin: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptsConfiguration {
    pub enabled: bool,
    pub build_scripts_enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct InlayHintsConfiguration {
    #[serde(rename = "type")]
    pub type_hints: bool,
    #[serde(rename = "parameter")]
    pub parameter_hints: bool,
    #[serde(rename = "chained")]
    pub chained_hints: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct JvmConfiguration {
    /// Target bytecode level; `"default"` follows the build toolchain.
    pub target: String,
}

impl Default for JvmConfiguration {
    fn default() -> Self {
        Self {
            target: default_jvm_target(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfiguration {
    pub jvm: JvmConfiguration,
}

/// The recognized configuration tree, as sent via
/// `workspace/didChangeConfiguration`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    pub diagnostics: DiagnosticsConfiguration,
    pub indexing: IndexingConfiguration,
    pub completion: CompletionConfiguration,
    pub external_sources: ExternalSourcesConfiguration,
    pub scripts: ScriptsConfiguration,
    pub inlay_hints: InlayHintsConfiguration,
    pub compiler: CompilerConfiguration,
}
