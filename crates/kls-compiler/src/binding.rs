use kls_core::{Location, Position, Range};
use url::Url;

use crate::tree::SymbolKind;

/// A resolved declaration handle as produced by the front-end.
///
/// Unlike [`crate::Declaration`] this may point outside the workspace (into a
/// dependency archive or the JDK); navigation decides how to surface it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDeclaration {
    pub fq_name: String,
    pub short_name: String,
    pub kind: SymbolKind,
    pub location: Option<Location>,
    pub container_fq_name: Option<String>,
    pub signature: Option<String>,
    pub documentation: Option<String>,
}

/// An active call surrounding a cursor position, for signature help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub callee: ResolvedDeclaration,
    pub active_parameter: u32,
}

/// The compiler-produced side table mapping reference sites to resolved
/// declarations.
///
/// Contexts compose: whole-project queries merge the per-partition contexts
/// returned by `compileFiles`.
#[derive(Debug, Clone, Default)]
pub struct BindingContext {
    resolutions: Vec<(Url, Range, ResolvedDeclaration)>,
    calls: Vec<(Url, Range, CallInfo)>,
}

impl BindingContext {
    pub fn new(
        resolutions: Vec<(Url, Range, ResolvedDeclaration)>,
        calls: Vec<(Url, Range, CallInfo)>,
    ) -> Self {
        Self { resolutions, calls }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty() && self.calls.is_empty()
    }

    /// Resolves the reference expression covering `position`, innermost match
    /// first.
    pub fn resolve_at(&self, uri: &Url, position: Position) -> Option<&ResolvedDeclaration> {
        self.resolutions
            .iter()
            .filter(|(u, range, _)| u == uri && range.contains(position))
            .min_by_key(|(_, range, _)| (range.end, std::cmp::Reverse(range.start)))
            .map(|(_, _, decl)| decl)
    }

    /// The reference site range covering `position`, if any.
    pub fn reference_range_at(&self, uri: &Url, position: Position) -> Option<Range> {
        self.resolutions
            .iter()
            .filter(|(u, range, _)| u == uri && range.contains(position))
            .min_by_key(|(_, range, _)| (range.end, std::cmp::Reverse(range.start)))
            .map(|(_, range, _)| *range)
    }

    /// All reference sites resolving to `fq_name`.
    pub fn references_to(&self, fq_name: &str) -> Vec<Location> {
        self.resolutions
            .iter()
            .filter(|(_, _, decl)| decl.fq_name == fq_name)
            .map(|(uri, range, _)| Location::new(uri.clone(), *range))
            .collect()
    }

    pub fn resolutions_in<'a>(
        &'a self,
        uri: &'a Url,
    ) -> impl Iterator<Item = (&'a Range, &'a ResolvedDeclaration)> + 'a {
        self.resolutions
            .iter()
            .filter(move |(u, _, _)| u == uri)
            .map(|(_, range, decl)| (range, decl))
    }

    pub fn call_at(&self, uri: &Url, position: Position) -> Option<&CallInfo> {
        self.calls
            .iter()
            .filter(|(u, range, _)| u == uri && range.contains(position))
            .min_by_key(|(_, range, _)| (range.end, std::cmp::Reverse(range.start)))
            .map(|(_, _, call)| call)
    }

    /// Merges `other` into `self`; later entries win only by shadowing order
    /// in [`Self::resolve_at`], so merge order is not significant.
    pub fn merge(&mut self, other: BindingContext) {
        self.resolutions.extend(other.resolutions);
        self.calls.extend(other.calls);
    }

    pub fn merged(contexts: impl IntoIterator<Item = BindingContext>) -> Self {
        let mut out = BindingContext::empty();
        for ctx in contexts {
            out.merge(ctx);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kls_core::Position;

    fn decl(fq: &str) -> ResolvedDeclaration {
        ResolvedDeclaration {
            fq_name: fq.to_string(),
            short_name: fq.rsplit('.').next().unwrap_or(fq).to_string(),
            kind: SymbolKind::Function,
            location: None,
            container_fq_name: None,
            signature: None,
            documentation: None,
        }
    }

    #[test]
    fn innermost_resolution_wins() {
        let uri = Url::parse("file:///a.kt").unwrap();
        let outer = Range::new(Position::new(0, 0), Position::new(0, 20));
        let inner = Range::new(Position::new(0, 5), Position::new(0, 10));
        let ctx = BindingContext::new(
            vec![
                (uri.clone(), outer, decl("a.outer")),
                (uri.clone(), inner, decl("a.inner")),
            ],
            Vec::new(),
        );

        let hit = ctx.resolve_at(&uri, Position::new(0, 7)).unwrap();
        assert_eq!(hit.fq_name, "a.inner");

        let hit = ctx.resolve_at(&uri, Position::new(0, 15)).unwrap();
        assert_eq!(hit.fq_name, "a.outer");
    }

    #[test]
    fn merged_contexts_answer_for_all_files() {
        let a = Url::parse("file:///a.kt").unwrap();
        let b = Url::parse("file:///b.kt").unwrap();
        let range = Range::new(Position::new(0, 0), Position::new(0, 3));
        let merged = BindingContext::merged(vec![
            BindingContext::new(vec![(a.clone(), range, decl("m.a"))], Vec::new()),
            BindingContext::new(vec![(b.clone(), range, decl("m.b"))], Vec::new()),
        ]);

        assert_eq!(merged.resolve_at(&a, Position::new(0, 1)).unwrap().fq_name, "m.a");
        assert_eq!(merged.resolve_at(&b, Position::new(0, 1)).unwrap().fq_name, "m.b");
        assert_eq!(merged.references_to("m.a").len(), 1);
    }
}
