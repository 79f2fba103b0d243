use std::path::Path;
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

const BUILD_FILE_NAMES: &[&str] = &[
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "settings.gradle",
    "settings.gradle.kts",
];

pub fn is_build_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| BUILD_FILE_NAMES.contains(&name))
}

/// Derives the index staleness epoch: the max modification timestamp
/// (epoch millis) over all recognised build files under `roots`.
///
/// Returns 0 when no build file exists, which callers treat as "no build
/// configuration to be stale against".
pub fn build_file_version(roots: impl IntoIterator<Item = impl AsRef<Path>>) -> i64 {
    let mut version = 0i64;
    for root in roots {
        for entry in WalkDir::new(root.as_ref())
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() || !is_build_file(entry.path()) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let Ok(elapsed) = modified.duration_since(UNIX_EPOCH) else {
                continue;
            };
            version = version.max(elapsed.as_millis() as i64);
        }
    }
    version
}
