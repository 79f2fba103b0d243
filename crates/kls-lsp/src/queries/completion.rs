use std::collections::BTreeMap;

use kls_core::Position;
use kls_index::SymbolIndex;
use kls_source::CompiledFile;

use kls_compiler::{SymbolKind, Visibility};

use crate::config::Configuration;

use super::{CompletionItem, CompletionItemKind};

const MAX_COMPLETIONS: usize = 50;

fn kind_of(kind: SymbolKind) -> CompletionItemKind {
    match kind {
        SymbolKind::Class | SymbolKind::EnumEntry | SymbolKind::Constructor => {
            CompletionItemKind::Class
        }
        SymbolKind::Interface => CompletionItemKind::Interface,
        SymbolKind::Object => CompletionItemKind::Object,
        SymbolKind::Function => CompletionItemKind::Function,
        SymbolKind::Variable | SymbolKind::TypeAlias | SymbolKind::Unknown => {
            CompletionItemKind::Variable
        }
    }
}

/// The identifier prefix being typed at `position` and whether it follows a
/// dot (member access).
fn prefix_at(text: &str, position: Position) -> (String, bool) {
    let Some(line) = super::line_text(text, position.line) else {
        return (String::new(), false);
    };
    let mut col = (position.character as usize).min(line.len());
    while col > 0 && !line.is_char_boundary(col) {
        col -= 1;
    }
    let head = &line[..col];

    let start = head
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
        .last()
        .map_or(col, |(idx, _)| idx);
    let prefix = head[start..].to_string();
    let after_dot = head[..start].trim_end().ends_with('.');
    (prefix, after_dot)
}

pub fn is_after_dot(text: &str, position: Position) -> bool {
    prefix_at(text, position).1
}

/// Merges lexically visible declarations with index hits, plus snippet
/// items when enabled.
pub fn completions(
    file: &CompiledFile,
    index: &SymbolIndex,
    position: Position,
    config: &Configuration,
) -> Vec<CompletionItem> {
    let (prefix, after_dot) = prefix_at(&file.content, position);

    // Label → item; BTreeMap keeps the result ordered and deduplicated.
    let mut items: BTreeMap<String, CompletionItem> = BTreeMap::new();

    for decl in file.parsed.declarations() {
        if !decl.short_name.starts_with(prefix.as_str()) {
            continue;
        }
        items.insert(
            decl.short_name.clone(),
            CompletionItem {
                label: decl.short_name.clone(),
                kind: kind_of(decl.kind),
                detail: decl.signature.clone(),
                insert_text: None,
                is_snippet: false,
            },
        );
    }

    if !prefix.is_empty() {
        let module_id = file.module.as_ref().and_then(|m| m.name().map(str::to_string));
        for symbol in index.query(&prefix, None, 20, "%", module_id.as_deref()) {
            if symbol.visibility == Visibility::Private {
                continue;
            }
            items.entry(symbol.short_name.clone()).or_insert(CompletionItem {
                label: symbol.short_name.clone(),
                kind: kind_of(symbol.kind),
                detail: Some(symbol.fq_name.clone()),
                insert_text: None,
                is_snippet: false,
            });
        }
    }

    let mut out: Vec<CompletionItem> = items.into_values().take(MAX_COMPLETIONS).collect();

    if config.completion.snippets.enabled && !after_dot {
        for (label, insert) in [
            ("fun", "fun ${1:name}(${2}) {\n    ${0}\n}"),
            ("class", "class ${1:Name} {\n    ${0}\n}"),
            ("val", "val ${1:name} = ${0}"),
        ] {
            if label.starts_with(prefix.as_str()) {
                out.push(CompletionItem {
                    label: label.to_string(),
                    kind: CompletionItemKind::Snippet,
                    detail: None,
                    insert_text: Some(insert.to_string()),
                    is_snippet: true,
                });
            }
        }
    }

    out
}
