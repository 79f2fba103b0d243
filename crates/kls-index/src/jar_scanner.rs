use std::fs::File;
use std::path::Path;

use kls_compiler::JarClassScanner;

/// Probes a JAR's classfile table by entry name.
#[derive(Debug, Default)]
pub struct ZipClassfileScanner;

impl JarClassScanner for ZipClassfileScanner {
    fn contains_class(&self, jar: &Path, fq_name: &str) -> bool {
        let entry = format!("{}.class", fq_name.replace('.', "/"));
        let Ok(file) = File::open(jar) else {
            return false;
        };
        let Ok(mut archive) = zip::ZipArchive::new(file) else {
            return false;
        };
        let found = archive.by_name(&entry).is_ok();
        found
    }
}
