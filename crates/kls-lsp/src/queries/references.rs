use kls_core::{Location, Position, Range};
use kls_source::{CompiledFile, SourcePath};

/// Resolves the symbol under the cursor to its fully-qualified name: a
/// reference first, the declaration identifier itself second.
fn target_fq_name(file: &CompiledFile, position: Position) -> Option<String> {
    if let Some(resolved) = file.binding.resolve_at(&file.uri, position) {
        return Some(resolved.fq_name.clone());
    }
    file.parsed
        .declaration_at(position)
        .map(|decl| decl.fq_name.clone())
}

/// Whole-workspace reference scan.
///
/// Deliberately O(workspace): every file is brought to its current compiled
/// version and its binding context queried. Same-kind serialisation through
/// the executor pool is the cost cap.
pub fn find_references(
    source_path: &SourcePath,
    file: &CompiledFile,
    position: Position,
    include_declaration: bool,
) -> Vec<Location> {
    let Some(fq_name) = target_fq_name(file, position) else {
        return Vec::new();
    };

    let mut out: Vec<Location> = Vec::new();
    for uri in source_path.all() {
        let Some(compiled) = source_path.current_compiled(&uri) else {
            continue;
        };
        // Partition bindings overlap across context files; keep only the
        // sites that belong to this file.
        out.extend(
            compiled
                .binding
                .references_to(&fq_name)
                .into_iter()
                .filter(|location| location.uri == uri),
        );

        if include_declaration {
            out.extend(
                compiled
                    .parsed
                    .declarations()
                    .iter()
                    .filter(|decl| decl.fq_name == fq_name)
                    .filter_map(|decl| decl.location.clone()),
            );
        }
    }

    out.sort_by(|a, b| {
        (a.uri.as_str(), a.range.start).cmp(&(b.uri.as_str(), b.range.start))
    });
    out.dedup();
    out
}

/// Same-file occurrences of the symbol under the cursor.
pub fn document_highlight(file: &CompiledFile, position: Position) -> Vec<Range> {
    let Some(fq_name) = target_fq_name(file, position) else {
        return Vec::new();
    };

    let mut out: Vec<Range> = file
        .binding
        .resolutions_in(&file.uri)
        .filter(|(_, resolved)| resolved.fq_name == fq_name)
        .map(|(range, _)| *range)
        .collect();

    out.extend(
        file.parsed
            .declarations()
            .iter()
            .filter(|decl| decl.fq_name == fq_name)
            .filter_map(|decl| decl.location.as_ref().map(|loc| loc.range)),
    );

    out.sort_by_key(|range| range.start);
    out.dedup();
    out
}
