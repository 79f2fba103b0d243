//! Conversions from core types to `lsp_types` at the protocol boundary.

use kls_compiler::{Diagnostic, Severity, SymbolKind};
use kls_core::{Location, Position, Range};

use crate::queries::{
    CompletionItem, CompletionItemKind, DocumentSymbol, Hover, SemanticToken, SemanticTokenKind,
    SignatureHelp,
};

pub fn position(value: Position) -> lsp_types::Position {
    lsp_types::Position::new(value.line, value.character)
}

pub fn range(value: Range) -> lsp_types::Range {
    lsp_types::Range::new(position(value.start), position(value.end))
}

pub fn location(value: &Location) -> lsp_types::Location {
    lsp_types::Location::new(value.uri.clone(), range(value.range))
}

pub fn diagnostic(value: &Diagnostic) -> lsp_types::Diagnostic {
    lsp_types::Diagnostic {
        range: range(value.range),
        severity: Some(match value.severity {
            Severity::Error => lsp_types::DiagnosticSeverity::ERROR,
            Severity::Warning => lsp_types::DiagnosticSeverity::WARNING,
            Severity::Information => lsp_types::DiagnosticSeverity::INFORMATION,
            Severity::Hint => lsp_types::DiagnosticSeverity::HINT,
        }),
        code: value
            .code
            .clone()
            .map(lsp_types::NumberOrString::String),
        source: Some("kotlin".to_string()),
        message: value.message.clone(),
        ..lsp_types::Diagnostic::default()
    }
}

pub fn hover(value: &Hover) -> lsp_types::Hover {
    lsp_types::Hover {
        contents: lsp_types::HoverContents::Markup(lsp_types::MarkupContent {
            kind: lsp_types::MarkupKind::Markdown,
            value: value.contents.clone(),
        }),
        range: value.range.map(range),
    }
}

pub fn completion_item(value: &CompletionItem) -> lsp_types::CompletionItem {
    lsp_types::CompletionItem {
        label: value.label.clone(),
        kind: Some(match value.kind {
            CompletionItemKind::Class => lsp_types::CompletionItemKind::CLASS,
            CompletionItemKind::Interface => lsp_types::CompletionItemKind::INTERFACE,
            CompletionItemKind::Object => lsp_types::CompletionItemKind::MODULE,
            CompletionItemKind::Function => lsp_types::CompletionItemKind::FUNCTION,
            CompletionItemKind::Variable => lsp_types::CompletionItemKind::VARIABLE,
            CompletionItemKind::Keyword => lsp_types::CompletionItemKind::KEYWORD,
            CompletionItemKind::Snippet => lsp_types::CompletionItemKind::SNIPPET,
        }),
        detail: value.detail.clone(),
        insert_text: value.insert_text.clone(),
        insert_text_format: value
            .is_snippet
            .then_some(lsp_types::InsertTextFormat::SNIPPET),
        ..lsp_types::CompletionItem::default()
    }
}

pub fn symbol_kind(value: SymbolKind) -> lsp_types::SymbolKind {
    match value {
        SymbolKind::Class => lsp_types::SymbolKind::CLASS,
        SymbolKind::Interface => lsp_types::SymbolKind::INTERFACE,
        SymbolKind::Object => lsp_types::SymbolKind::OBJECT,
        SymbolKind::Function => lsp_types::SymbolKind::FUNCTION,
        SymbolKind::Variable => lsp_types::SymbolKind::VARIABLE,
        SymbolKind::Constructor => lsp_types::SymbolKind::CONSTRUCTOR,
        SymbolKind::TypeAlias => lsp_types::SymbolKind::TYPE_PARAMETER,
        SymbolKind::EnumEntry => lsp_types::SymbolKind::ENUM_MEMBER,
        SymbolKind::Unknown => lsp_types::SymbolKind::NULL,
    }
}

#[allow(deprecated)]
pub fn document_symbol(value: &DocumentSymbol) -> lsp_types::DocumentSymbol {
    lsp_types::DocumentSymbol {
        name: value.name.clone(),
        detail: value.detail.clone(),
        kind: symbol_kind(value.kind),
        tags: None,
        deprecated: None,
        range: range(value.range),
        selection_range: range(value.range),
        children: None,
    }
}

#[allow(deprecated)]
pub fn workspace_symbol(value: &kls_index::Symbol) -> Option<lsp_types::SymbolInformation> {
    let location = value.location.as_ref()?;
    Some(lsp_types::SymbolInformation {
        name: value.short_name.clone(),
        kind: symbol_kind(value.kind),
        tags: None,
        deprecated: None,
        location: lsp_types::Location::new(location.uri.clone(), range(location.range)),
        container_name: value
            .fq_name
            .rsplit_once('.')
            .map(|(container, _)| container.to_string()),
    })
}

pub fn signature_help(value: &SignatureHelp) -> lsp_types::SignatureHelp {
    lsp_types::SignatureHelp {
        signatures: vec![lsp_types::SignatureInformation {
            label: value.label.clone(),
            documentation: None,
            parameters: None,
            active_parameter: Some(value.active_parameter),
        }],
        active_signature: Some(0),
        active_parameter: Some(value.active_parameter),
    }
}

/// The token-type legend for [`semantic_tokens`] encoding.
pub const SEMANTIC_TOKEN_LEGEND: [&str; 5] =
    ["class", "interface", "function", "variable", "type"];

fn token_type_index(kind: SemanticTokenKind) -> u32 {
    match kind {
        SemanticTokenKind::Class => 0,
        SemanticTokenKind::Interface => 1,
        SemanticTokenKind::Function => 2,
        SemanticTokenKind::Variable => 3,
        SemanticTokenKind::TypeAlias => 4,
    }
}

/// Encodes tokens into the LSP relative (delta) format. Tokens must span a
/// single line each and arrive sorted by start position.
pub fn semantic_tokens(tokens: &[SemanticToken]) -> lsp_types::SemanticTokens {
    let mut data = Vec::with_capacity(tokens.len());
    let mut prev_line = 0u32;
    let mut prev_start = 0u32;

    for token in tokens {
        let line = token.range.start.line;
        let start = token.range.start.character;
        let delta_line = line - prev_line;
        let delta_start = if delta_line == 0 {
            start - prev_start
        } else {
            start
        };
        let length = token
            .range
            .end
            .character
            .saturating_sub(token.range.start.character);

        data.push(lsp_types::SemanticToken {
            delta_line,
            delta_start,
            length,
            token_type: token_type_index(token.kind),
            token_modifiers_bitset: 0,
        });
        prev_line = line;
        prev_start = start;
    }

    lsp_types::SemanticTokens {
        result_id: None,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn semantic_token_deltas_are_relative() {
        let tokens = [
            SemanticToken {
                range: Range::new(Position::new(0, 4), Position::new(0, 8)),
                kind: SemanticTokenKind::Class,
            },
            SemanticToken {
                range: Range::new(Position::new(0, 12), Position::new(0, 15)),
                kind: SemanticTokenKind::Function,
            },
            SemanticToken {
                range: Range::new(Position::new(2, 2), Position::new(2, 5)),
                kind: SemanticTokenKind::Variable,
            },
        ];

        let encoded = semantic_tokens(&tokens);
        let triples: Vec<(u32, u32, u32, u32)> = encoded
            .data
            .iter()
            .map(|t| (t.delta_line, t.delta_start, t.length, t.token_type))
            .collect();
        assert_eq!(
            triples,
            vec![(0, 4, 4, 0), (0, 8, 3, 2), (2, 2, 3, 3)]
        );
    }
}
