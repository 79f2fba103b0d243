use std::sync::Arc;

use kls_core::{Location, Position, Range};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    Class,
    Interface,
    Object,
    Function,
    Variable,
    Constructor,
    TypeAlias,
    EnumEntry,
    Unknown,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Class => "CLASS",
            SymbolKind::Interface => "INTERFACE",
            SymbolKind::Object => "OBJECT",
            SymbolKind::Function => "FUNCTION",
            SymbolKind::Variable => "VARIABLE",
            SymbolKind::Constructor => "CONSTRUCTOR",
            SymbolKind::TypeAlias => "TYPE_ALIAS",
            SymbolKind::EnumEntry => "ENUM_ENTRY",
            SymbolKind::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(text: &str) -> Self {
        match text {
            "CLASS" => SymbolKind::Class,
            "INTERFACE" => SymbolKind::Interface,
            "OBJECT" => SymbolKind::Object,
            "FUNCTION" => SymbolKind::Function,
            "VARIABLE" => SymbolKind::Variable,
            "CONSTRUCTOR" => SymbolKind::Constructor,
            "TYPE_ALIAS" => SymbolKind::TypeAlias,
            "ENUM_ENTRY" => SymbolKind::EnumEntry,
            _ => SymbolKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Protected,
    Internal,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Protected => "PROTECTED",
            Visibility::Internal => "INTERNAL",
            Visibility::Private => "PRIVATE",
        }
    }

    pub fn parse(text: &str) -> Self {
        match text {
            "PROTECTED" => Visibility::Protected,
            "INTERNAL" => Visibility::Internal,
            "PRIVATE" => Visibility::Private,
            _ => Visibility::Public,
        }
    }
}

/// A declaration as the core sees it: enough identity for indexing and
/// navigation, nothing about bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub fq_name: String,
    pub short_name: String,
    pub kind: SymbolKind,
    pub visibility: Visibility,
    /// Receiver type rendering for extension callables.
    pub extension_receiver: Option<String>,
    /// Declared supertype names, as written.
    pub supertypes: Vec<String>,
    /// Name-identifier location; absent for synthesized declarations.
    pub location: Option<Location>,
    /// Human-readable signature used for hover/signature help.
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDirective {
    pub fq_name: String,
    pub range: Range,
}

/// An immutable parse result for one file.
///
/// `text` is the exact input the tree was produced from; `SourcePath` uses
/// that to detect stale trees.
#[derive(Debug, Clone)]
pub struct ParsedTree {
    uri: Url,
    text: Arc<String>,
    package: Option<String>,
    declarations: Vec<Declaration>,
    imports: Vec<ImportDirective>,
}

impl ParsedTree {
    pub fn new(
        uri: Url,
        text: Arc<String>,
        package: Option<String>,
        declarations: Vec<Declaration>,
        imports: Vec<ImportDirective>,
    ) -> Self {
        Self {
            uri,
            text,
            package,
            declarations,
            imports,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn text_arc(&self) -> Arc<String> {
        Arc::clone(&self.text)
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// Top-level declarations in source order.
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn imports(&self) -> &[ImportDirective] {
        &self.imports
    }

    pub fn import_at(&self, position: Position) -> Option<&ImportDirective> {
        self.imports.iter().find(|i| i.range.contains(position))
    }

    pub fn declaration_at(&self, position: Position) -> Option<&Declaration> {
        self.declarations.iter().find(|d| {
            d.location
                .as_ref()
                .is_some_and(|loc| loc.range.contains(position))
        })
    }

    /// Walks a dotted declaration path (`Outer.inner`) by short name.
    ///
    /// The façade only exposes top-level declarations, so only the first
    /// segment can match; a real front-end descends nested declarations.
    pub fn find_declaration(&self, path: &[&str]) -> Option<&Declaration> {
        let first = path.first()?;
        self.declarations.iter().find(|d| d.short_name == *first)
    }
}
