//! Custom `kotlin/*` endpoints.

use std::io::Read;

use serde::{Deserialize, Serialize};
use url::Url;

use kls_core::{KlsUri, Range};
use kls_index::{Symbol, SymbolIndex};
use kls_source::CompiledFile;

use kls_compiler::SymbolKind;

use crate::queries::definition::Decompiler;

pub const JAR_CLASS_CONTENTS_METHOD: &str = "kotlin/jarClassContents";
pub const BUILD_OUTPUT_LOCATION_METHOD: &str = "kotlin/buildOutputLocation";
pub const MAIN_CLASS_METHOD: &str = "kotlin/mainClass";
pub const OVERRIDE_MEMBER_METHOD: &str = "kotlin/overrideMember";

/// `kotlin/jarClassContents`: the text of one archive entry.
///
/// `.class` entries go through the decompiler façade; plain text entries
/// (source archives) are read directly.
pub fn jar_class_contents(uri: &Url, decompiler: Option<&dyn Decompiler>) -> Option<String> {
    let kls = KlsUri::parse(uri.as_str()).ok()?;

    if kls.entry().ends_with(".class") {
        return decompiler?.decompile(&kls);
    }

    let file = std::fs::File::open(kls.archive()).ok()?;
    let mut archive = zip::ZipArchive::new(file).ok()?;
    let mut entry = archive.by_name(kls.entry()).ok()?;
    let mut contents = String::new();
    entry.read_to_string(&mut contents).ok()?;
    Some(contents)
}

/// `kotlin/mainClass` response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainClassInfo {
    /// JVM entry-point class name, e.g. `com.example.MainKt`.
    pub name: String,
    pub range: Range,
}

/// `kotlin/mainClass`: the file's `main` entry point, if any.
pub fn main_class(file: &CompiledFile) -> Option<MainClassInfo> {
    let main = file
        .parsed
        .declarations()
        .iter()
        .find(|decl| decl.kind == SymbolKind::Function && decl.short_name == "main")?;

    let file_stem = file
        .uri
        .path_segments()
        .and_then(|segments| segments.last())
        .and_then(|name| name.strip_suffix(".kt"))
        .unwrap_or("Main");
    let mut class_name = String::new();
    let mut chars = file_stem.chars();
    if let Some(first) = chars.next() {
        class_name.extend(first.to_uppercase());
        class_name.push_str(chars.as_str());
    }
    class_name.push_str("Kt");

    let name = match file.parsed.package() {
        Some(pkg) if !pkg.is_empty() => format!("{pkg}.{class_name}"),
        _ => class_name,
    };

    Some(MainClassInfo {
        name,
        range: main
            .location
            .as_ref()
            .map_or(Range::default(), |loc| loc.range),
    })
}

/// `kotlin/overrideMember`: members of the supertypes of the class under the
/// cursor, as candidates for an override.
pub fn override_members(
    file: &CompiledFile,
    index: &SymbolIndex,
    position: kls_core::Position,
) -> Vec<Symbol> {
    let Some(decl) = file.parsed.declaration_at(position) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for supertype in &decl.supertypes {
        // Resolve the supertype's fully-qualified name through the index,
        // then list everything declared under it.
        let supertype_fq = index
            .query(supertype, None, 10, "%", None)
            .into_iter()
            .find(|symbol| {
                matches!(symbol.kind, SymbolKind::Class | SymbolKind::Interface)
                    && symbol.short_name == *supertype
            })
            .map(|symbol| symbol.fq_name);
        if let Some(fq) = supertype_fq {
            out.extend(index.members_of(&fq, 50));
        }
    }
    out
}
