use kls_core::{Position, Range};
use kls_source::CompiledFile;

use kls_compiler::SymbolKind;

use crate::config::InlayHintsConfiguration;

use super::{InlayHint, InlayHintKind, SemanticToken, SemanticTokenKind};

fn is_preceded_by_dot(text: &str, position: Position) -> bool {
    let Some(line) = super::line_text(text, position.line) else {
        return false;
    };
    let mut col = (position.character as usize).min(line.len());
    while col > 0 && !line.is_char_boundary(col) {
        col -= 1;
    }
    line[..col].trim_end().ends_with('.')
}

fn token_kind(kind: SymbolKind) -> SemanticTokenKind {
    match kind {
        SymbolKind::Interface => SemanticTokenKind::Interface,
        SymbolKind::Function | SymbolKind::Constructor => SemanticTokenKind::Function,
        SymbolKind::Variable | SymbolKind::EnumEntry => SemanticTokenKind::Variable,
        SymbolKind::TypeAlias => SemanticTokenKind::TypeAlias,
        SymbolKind::Class | SymbolKind::Object | SymbolKind::Unknown => SemanticTokenKind::Class,
    }
}

/// Classification pass over declarations and resolved reference sites.
pub fn semantic_tokens_full(file: &CompiledFile) -> Vec<SemanticToken> {
    let mut out: Vec<SemanticToken> = Vec::new();

    for decl in file.parsed.declarations() {
        if let Some(location) = &decl.location {
            out.push(SemanticToken {
                range: location.range,
                kind: token_kind(decl.kind),
            });
        }
    }

    for (range, resolved) in file.binding.resolutions_in(&file.uri) {
        out.push(SemanticToken {
            range: *range,
            kind: token_kind(resolved.kind),
        });
    }

    out.sort_by_key(|token| token.range.start);
    out.dedup();
    out
}

/// The range variant filters the full pass.
//
// TODO(perf): cut the pass at the requested range instead of filtering
// afterwards once the full pass shows up in profiles.
pub fn semantic_tokens_range(file: &CompiledFile, range: Range) -> Vec<SemanticToken> {
    semantic_tokens_full(file)
        .into_iter()
        .filter(|token| token.range.start >= range.start && token.range.end <= range.end)
        .collect()
}

/// Inlay hints from the binding context, honouring the per-kind toggles.
pub fn inlay_hints(
    file: &CompiledFile,
    config: &InlayHintsConfiguration,
    range: Option<Range>,
) -> Vec<InlayHint> {
    let mut out: Vec<InlayHint> = Vec::new();
    let in_range = |position: Position| range.map_or(true, |r| r.contains(position));

    if config.parameter_hints || config.chained_hints {
        for (call_range, call) in file
            .binding
            .resolutions_in(&file.uri)
            .filter_map(|(range, _)| {
                file.binding
                    .call_at(&file.uri, range.start)
                    .map(|call| (*range, call))
            })
        {
            if !in_range(call_range.start) {
                continue;
            }
            let chained = is_preceded_by_dot(&file.content, call_range.start);
            if chained && config.chained_hints {
                out.push(InlayHint {
                    position: call_range.end,
                    label: call.callee.short_name.clone(),
                    kind: InlayHintKind::Chained,
                });
            } else if !chained && config.parameter_hints {
                out.push(InlayHint {
                    position: call_range.end,
                    label: call.callee.short_name.clone(),
                    kind: InlayHintKind::Parameter,
                });
            }
        }
    }

    if config.type_hints {
        for decl in file.parsed.declarations() {
            if decl.kind != SymbolKind::Variable {
                continue;
            }
            let Some(location) = &decl.location else { continue };
            if !in_range(location.range.start) {
                continue;
            }
            // Only when the declaration does not already spell a type.
            let has_explicit_type = decl
                .signature
                .as_deref()
                .is_some_and(|sig| sig.contains(':'));
            if has_explicit_type {
                continue;
            }
            // Infer from a constructor-like initializer on the same line.
            let inferred = file
                .binding
                .resolutions_in(&file.uri)
                .filter(|(range, _)| {
                    range.start.line == location.range.start.line
                        && range.start >= location.range.end
                })
                .find(|(_, resolved)| {
                    matches!(resolved.kind, SymbolKind::Class | SymbolKind::Object)
                })
                .map(|(_, resolved)| resolved.short_name.clone());
            if let Some(type_name) = inferred {
                out.push(InlayHint {
                    position: location.range.end,
                    label: format!(": {type_name}"),
                    kind: InlayHintKind::Type,
                });
            }
        }
    }

    out.sort_by_key(|hint| hint.position);
    out.dedup();
    out
}
