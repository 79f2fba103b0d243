//! Positional query providers over compiled files.

pub mod completion;
pub mod decorations;
pub mod definition;
pub mod hover;
pub mod references;
pub mod symbols;

use kls_core::{Position, Range};

/// How much staleness a query path tolerates in the compiled tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recompile {
    /// Serve from the latest compiled version, however old.
    Never,
    /// Recompile only when the cursor sits after a `.` (member access needs
    /// fresh bindings).
    AfterDot,
    /// Always bring the compiled tree up to the current content first.
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hover {
    /// Markdown contents.
    pub contents: String,
    pub range: Option<Range>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionItemKind {
    Class,
    Interface,
    Object,
    Function,
    Variable,
    Keyword,
    Snippet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    pub label: String,
    pub kind: CompletionItemKind,
    pub detail: Option<String>,
    /// Insert text; snippet syntax when `is_snippet`.
    pub insert_text: Option<String>,
    pub is_snippet: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHelp {
    pub label: String,
    pub active_parameter: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSymbol {
    pub name: String,
    pub kind: kls_compiler::SymbolKind,
    pub range: Range,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticTokenKind {
    Class,
    Interface,
    Function,
    Variable,
    TypeAlias,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticToken {
    pub range: Range,
    pub kind: SemanticTokenKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlayHintKind {
    Type,
    Parameter,
    Chained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlayHint {
    pub position: Position,
    pub label: String,
    pub kind: InlayHintKind,
}

/// The text of line `line`, counting the empty line after a trailing
/// newline (which `str::lines` does not yield) so a cursor there still
/// resolves.
pub(crate) fn line_text(text: &str, line: u32) -> Option<&str> {
    let line = line as usize;
    if let Some(found) = text.lines().nth(line) {
        return Some(found);
    }
    let line_count = text.lines().count();
    (line == line_count && (text.is_empty() || text.ends_with('\n'))).then_some("")
}
