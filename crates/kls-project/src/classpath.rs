use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// One dependency on the compilation classpath.
///
/// The compiled archive is required; the paired source archive is
/// best-effort and fetched off the critical path. Identity (equality,
/// ordering, hashing) is by `compiled_jar` only, so merging a
/// sources-included resolution over a plain one updates entries in place.
#[derive(Debug, Clone)]
pub struct ClassPathEntry {
    pub compiled_jar: PathBuf,
    pub source_jar: Option<PathBuf>,
}

impl ClassPathEntry {
    pub fn new(compiled_jar: impl Into<PathBuf>) -> Self {
        Self {
            compiled_jar: compiled_jar.into(),
            source_jar: None,
        }
    }

    pub fn with_source_jar(mut self, source_jar: impl Into<PathBuf>) -> Self {
        self.source_jar = Some(source_jar.into());
        self
    }
}

impl PartialEq for ClassPathEntry {
    fn eq(&self, other: &Self) -> bool {
        self.compiled_jar == other.compiled_jar
    }
}

impl Eq for ClassPathEntry {}

impl PartialOrd for ClassPathEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClassPathEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.compiled_jar.cmp(&other.compiled_jar)
    }
}

impl Hash for ClassPathEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.compiled_jar.hash(state);
    }
}

/// The delta between two classpath snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassPathDiff {
    pub added: BTreeSet<ClassPathEntry>,
    pub removed: BTreeSet<ClassPathEntry>,
}

impl ClassPathDiff {
    pub fn compute(
        current: &BTreeSet<ClassPathEntry>,
        next: &BTreeSet<ClassPathEntry>,
    ) -> Self {
        Self {
            added: next.difference(current).cloned().collect(),
            removed: current.difference(next).cloned().collect(),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn equality_ignores_source_jar() {
        let plain = ClassPathEntry::new("/deps/a.jar");
        let with_sources = ClassPathEntry::new("/deps/a.jar").with_source_jar("/deps/a-sources.jar");
        assert_eq!(plain, with_sources);

        let mut set = BTreeSet::new();
        set.insert(plain);
        assert!(set.contains(&ClassPathEntry::new("/deps/a.jar")));
    }

    #[test]
    fn diff_detects_added_and_removed() {
        let current: BTreeSet<_> = [
            ClassPathEntry::new("/deps/a.jar"),
            ClassPathEntry::new("/deps/b.jar"),
        ]
        .into_iter()
        .collect();
        let next: BTreeSet<_> = [
            ClassPathEntry::new("/deps/b.jar"),
            ClassPathEntry::new("/deps/c.jar"),
        ]
        .into_iter()
        .collect();

        let diff = ClassPathDiff::compute(&current, &next);
        assert!(diff.has_changes());
        assert_eq!(diff.added.len(), 1);
        assert!(diff.added.contains(&ClassPathEntry::new("/deps/c.jar")));
        assert_eq!(diff.removed.len(), 1);
        assert!(diff.removed.contains(&ClassPathEntry::new("/deps/a.jar")));

        assert!(!ClassPathDiff::compute(&next, &next).has_changes());
    }
}
