//! The compiler façade the KLS core consumes.
//!
//! The real Kotlin front-end lives behind the [`Compiler`] trait; the core
//! only depends on parsed trees, binding contexts and diagnostics. The
//! [`test_support`] module ships a small line-oriented fake used by the
//! workspace's tests.

mod binding;
mod diagnostics;
mod facade;
mod scope;
mod tree;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use binding::{BindingContext, CallInfo, ResolvedDeclaration};
pub use diagnostics::{Diagnostic, Severity};
pub use facade::{
    CompilationKind, Compiler, CompilerProvider, CompilerSnapshot, CompileOutput,
};
pub use scope::{CompositeModuleScope, JarClassScanner, ModuleHandle, ModuleScope};
pub use tree::{Declaration, ImportDirective, ParsedTree, SymbolKind, Visibility};
