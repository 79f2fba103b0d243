use kls_core::Position;
use kls_source::CompiledFile;

use super::{Hover, SignatureHelp};

/// Renders the declaration under the cursor as markdown.
pub fn hover(file: &CompiledFile, position: Position) -> Option<Hover> {
    if let Some(resolved) = file.binding.resolve_at(&file.uri, position) {
        let signature = resolved
            .signature
            .clone()
            .unwrap_or_else(|| resolved.fq_name.clone());
        let mut contents = format!("```kotlin\n{signature}\n```");
        if let Some(docs) = &resolved.documentation {
            contents.push_str("\n\n");
            contents.push_str(docs);
        }
        return Some(Hover {
            contents,
            range: file.binding.reference_range_at(&file.uri, position),
        });
    }

    // The cursor may sit on a declaration identifier rather than a reference.
    let decl = file.parsed.declaration_at(position)?;
    let signature = decl.signature.clone().unwrap_or_else(|| decl.fq_name.clone());
    Some(Hover {
        contents: format!("```kotlin\n{signature}\n```"),
        range: decl.location.as_ref().map(|loc| loc.range),
    })
}

/// Signature help for the call surrounding the cursor.
pub fn signature_help(file: &CompiledFile, position: Position) -> Option<SignatureHelp> {
    let call = file.binding.call_at(&file.uri, position)?;
    let label = call
        .callee
        .signature
        .clone()
        .unwrap_or_else(|| format!("{}()", call.callee.short_name));
    Some(SignatureHelp {
        label,
        active_parameter: call.active_parameter,
    })
}
