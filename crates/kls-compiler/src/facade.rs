use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::Url;

use crate::binding::BindingContext;
use crate::diagnostics::Diagnostic;
use crate::scope::ModuleHandle;
use crate::tree::ParsedTree;

/// How a batch of files is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompilationKind {
    Default,
    BuildScript,
}

#[derive(Debug)]
pub struct CompileOutput {
    pub trees: Vec<ParsedTree>,
    pub binding: BindingContext,
    pub diagnostics: Vec<Diagnostic>,
    pub module: ModuleHandle,
}

/// The path sets a compiler instance is constructed over.
///
/// Snapshots are plain copies; the owning [`CompilerClassPath`] hands them
/// out under its read lock and never shares live collections.
///
/// [`CompilerClassPath`]: https://example.invalid/kls-classpath
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerSnapshot {
    pub classpath: BTreeSet<PathBuf>,
    pub build_script_classpath: BTreeSet<PathBuf>,
    pub java_source_path: BTreeSet<PathBuf>,
    pub output_directory: Option<PathBuf>,
    /// `"default"` means follow the build toolchain.
    pub jvm_target: String,
}

/// The opaque front-end the core drives.
///
/// Instances are expensive (a JVM-equivalent environment); the classpath
/// layer bounds how many exist at once and closes evicted ones.
pub trait Compiler: Send + Sync {
    /// Parses `text` in project context.
    fn parse(&self, uri: &Url, text: &str) -> ParsedTree;

    /// Parses a standalone file with no project context. Used by the
    /// source-directory text-search fallback in goto-definition.
    fn create_syntax_tree(&self, uri: &Url, text: &str) -> ParsedTree;

    /// Compiles `sources` as one unit and produces the binding context,
    /// diagnostics and module descriptor.
    fn compile(&self, sources: &[ParsedTree], kind: CompilationKind) -> CompileOutput;

    /// Emits generated code for a compiled tree into `output_directory`.
    fn generate_code(&self, tree: &ParsedTree, binding: &BindingContext, output_directory: &Path);

    /// Retracts whatever [`Compiler::generate_code`] emitted for `tree`.
    fn remove_generated_code(&self, tree: &ParsedTree, output_directory: &Path);

    /// Releases the instance's resources. Idempotent.
    fn close(&self);
}

/// Constructs compiler instances from path-set snapshots.
///
/// The classpath layer calls this once for the shared compiler and once per
/// cached module compiler.
pub trait CompilerProvider: Send + Sync {
    fn create_compiler(&self, module_id: Option<&str>, snapshot: &CompilerSnapshot)
        -> Arc<dyn Compiler>;
}
