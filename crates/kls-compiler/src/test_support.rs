//! A deterministic, line-oriented fake front-end for workspace tests.
//!
//! The grammar is a toy subset: `package a.b`, `import a.b.Foo`, and
//! top-level declarations (`class`/`interface`/`object`/`fun`/`val`/`var`/
//! `typealias`) with an optional visibility modifier. References are plain
//! identifier occurrences of declared short names. A `// error: <msg>` line
//! comment produces an error diagnostic on that line, and two `fun`
//! declarations with the same short name inside one compile batch produce an
//! `OVERLOAD_RESOLUTION_AMBIGUITY` at every reference site.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kls_core::{Location, Position, Range};
use url::Url;

use crate::binding::{BindingContext, CallInfo, ResolvedDeclaration};
use crate::diagnostics::{Diagnostic, Severity};
use crate::facade::{
    CompilationKind, Compiler, CompilerProvider, CompilerSnapshot, CompileOutput,
};
use crate::scope::{JarClassScanner, ModuleHandle, ModuleScope};
use crate::tree::{Declaration, ImportDirective, ParsedTree, SymbolKind, Visibility};

/// A [`ModuleScope`] over a fixed package → declarations map.
#[derive(Debug, Default, Clone)]
pub struct StaticModuleScope {
    packages: BTreeMap<String, Vec<Declaration>>,
}

impl StaticModuleScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, package: &str, declarations: Vec<Declaration>) -> Self {
        self.packages.insert(package.to_string(), declarations);
        self
    }

    pub fn insert(&mut self, package: String, declarations: Vec<Declaration>) {
        self.packages.entry(package).or_default().extend(declarations);
    }

    fn known_packages(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        for key in self.packages.keys() {
            let mut prefix_end = key.len();
            loop {
                out.insert(&key[..prefix_end]);
                match key[..prefix_end].rfind('.') {
                    Some(dot) => prefix_end = dot,
                    None => break,
                }
            }
        }
        out
    }
}

impl ModuleScope for StaticModuleScope {
    fn top_level_packages(&self) -> Vec<String> {
        self.known_packages()
            .into_iter()
            .filter(|pkg| !pkg.contains('.'))
            .map(str::to_string)
            .collect()
    }

    fn sub_packages(&self, package: &str) -> Vec<String> {
        let prefix = format!("{package}.");
        self.known_packages()
            .into_iter()
            .filter(|pkg| {
                pkg.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('.'))
            })
            .map(str::to_string)
            .collect()
    }

    fn declarations_in_package(&self, package: &str) -> Vec<Declaration> {
        self.packages.get(package).cloned().unwrap_or_default()
    }
}

/// A [`JarClassScanner`] over a fixed jar → classes map.
#[derive(Debug, Default)]
pub struct StaticJarScanner {
    classes: HashMap<PathBuf, BTreeSet<String>>,
}

impl StaticJarScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jar(mut self, jar: impl Into<PathBuf>, classes: &[&str]) -> Self {
        self.classes
            .insert(jar.into(), classes.iter().map(|c| c.to_string()).collect());
        self
    }
}

impl JarClassScanner for StaticJarScanner {
    fn contains_class(&self, jar: &Path, fq_name: &str) -> bool {
        self.classes
            .get(jar)
            .is_some_and(|classes| classes.contains(fq_name))
    }
}

pub struct FakeCompiler {
    module_id: Option<String>,
    snapshot: CompilerSnapshot,
    dependencies: Vec<ResolvedDeclaration>,
    closed: AtomicBool,
    compile_count: AtomicUsize,
}

impl FakeCompiler {
    pub fn new(module_id: Option<&str>) -> Self {
        Self::with_snapshot(module_id, CompilerSnapshot::default())
    }

    pub fn with_snapshot(module_id: Option<&str>, snapshot: CompilerSnapshot) -> Self {
        Self {
            module_id: module_id.map(str::to_string),
            snapshot,
            dependencies: Vec::new(),
            closed: AtomicBool::new(false),
            compile_count: AtomicUsize::new(0),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ResolvedDeclaration>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn compile_count(&self) -> usize {
        self.compile_count.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> &CompilerSnapshot {
        &self.snapshot
    }

    fn parse_impl(&self, uri: &Url, text: &str) -> ParsedTree {
        let mut package = None;
        let mut declarations = Vec::new();
        let mut imports = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let trimmed = line.trim_start();
            let indent = (line.len() - trimmed.len()) as u32;
            let line_no = line_no as u32;

            if let Some(rest) = trimmed.strip_prefix("package ") {
                package = Some(rest.trim().to_string());
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("import ") {
                let fq_name = rest.trim().trim_end_matches(';').to_string();
                imports.push(ImportDirective {
                    fq_name,
                    range: Range::new(
                        Position::new(line_no, 0),
                        Position::new(line_no, line.len() as u32),
                    ),
                });
                continue;
            }

            if let Some(decl) =
                parse_declaration(trimmed, indent, line_no, uri, package.as_deref())
            {
                declarations.push(decl);
            }
        }

        ParsedTree::new(
            uri.clone(),
            Arc::new(text.to_string()),
            package,
            declarations,
            imports,
        )
    }
}

fn parse_declaration(
    trimmed: &str,
    indent: u32,
    line_no: u32,
    uri: &Url,
    package: Option<&str>,
) -> Option<Declaration> {
    let mut rest = trimmed;
    let mut visibility = Visibility::Public;
    for (modifier, parsed) in [
        ("private ", Visibility::Private),
        ("internal ", Visibility::Internal),
        ("protected ", Visibility::Protected),
        ("public ", Visibility::Public),
    ] {
        if let Some(stripped) = rest.strip_prefix(modifier) {
            visibility = parsed;
            rest = stripped;
            break;
        }
    }

    let (keyword, tail, kind) = [
        ("class ", SymbolKind::Class),
        ("interface ", SymbolKind::Interface),
        ("object ", SymbolKind::Object),
        ("fun ", SymbolKind::Function),
        ("val ", SymbolKind::Variable),
        ("var ", SymbolKind::Variable),
        ("typealias ", SymbolKind::TypeAlias),
    ]
    .into_iter()
    .find_map(|(kw, kind)| rest.strip_prefix(kw).map(|tail| (kw, tail, kind)))?;

    let ident: String = tail
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
        .collect();
    if ident.is_empty() {
        return None;
    }

    // `fun Receiver.name(...)` declares an extension on `Receiver`.
    let (extension_receiver, short_name) = match (kind, ident.rsplit_once('.')) {
        (SymbolKind::Function, Some((receiver, name))) => {
            (Some(receiver.to_string()), name.to_string())
        }
        _ => (None, ident.clone()),
    };

    let name_col = indent + (trimmed.len() - rest.len()) as u32 + keyword.len() as u32;
    let name_start = name_col + ident.len() as u32 - short_name.len() as u32;
    let location = Location::new(
        uri.clone(),
        Range::new(
            Position::new(line_no, name_start),
            Position::new(line_no, name_start + short_name.len() as u32),
        ),
    );

    let fq_name = match package {
        Some(pkg) => format!("{pkg}.{short_name}"),
        None => short_name.clone(),
    };

    // `class Foo : Bar, Baz` declares supertypes.
    let supertypes = if matches!(
        kind,
        SymbolKind::Class | SymbolKind::Interface | SymbolKind::Object
    ) {
        tail[ident.len()..]
            .trim_start()
            .strip_prefix(':')
            .map(|supers| {
                supers
                    .split(',')
                    .map(|s| s.trim().trim_end_matches("()").to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    Some(Declaration {
        fq_name,
        short_name,
        kind,
        visibility,
        extension_receiver,
        supertypes,
        location: Some(location),
        signature: Some(rest.trim_end().to_string()),
    })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl Compiler for FakeCompiler {
    fn parse(&self, uri: &Url, text: &str) -> ParsedTree {
        self.parse_impl(uri, text)
    }

    fn create_syntax_tree(&self, uri: &Url, text: &str) -> ParsedTree {
        self.parse_impl(uri, text)
    }

    fn compile(&self, sources: &[ParsedTree], _kind: CompilationKind) -> CompileOutput {
        self.compile_count.fetch_add(1, Ordering::SeqCst);

        let mut by_short_name: HashMap<&str, Vec<&Declaration>> = HashMap::new();
        for tree in sources {
            for decl in tree.declarations() {
                by_short_name.entry(&decl.short_name).or_default().push(decl);
            }
        }

        let mut resolutions = Vec::new();
        let mut calls = Vec::new();
        let mut diagnostics = Vec::new();
        let mut scope = StaticModuleScope::new();

        for tree in sources {
            let pkg = tree.package().unwrap_or("").to_string();
            scope.insert(pkg, tree.declarations().to_vec());

            for (line_no, line) in tree.text().lines().enumerate() {
                let trimmed = line.trim_start();
                if trimmed.starts_with("package ") || trimmed.starts_with("import ") {
                    continue;
                }
                if let Some(message) = trimmed.strip_prefix("// error: ") {
                    diagnostics.push(Diagnostic {
                        uri: tree.uri().clone(),
                        range: Range::new(
                            Position::new(line_no as u32, 0),
                            Position::new(line_no as u32, line.len() as u32),
                        ),
                        severity: Severity::Error,
                        code: Some("FAKE_ERROR".to_string()),
                        message: message.to_string(),
                    });
                    continue;
                }

                self.resolve_line(
                    tree,
                    line,
                    line_no as u32,
                    &by_short_name,
                    &mut resolutions,
                    &mut calls,
                    &mut diagnostics,
                );
            }
        }

        CompileOutput {
            trees: sources.to_vec(),
            binding: BindingContext::new(resolutions, calls),
            diagnostics,
            module: ModuleHandle::new(self.module_id.clone(), Arc::new(scope)),
        }
    }

    fn generate_code(&self, tree: &ParsedTree, _binding: &BindingContext, output_directory: &Path) {
        for decl in tree.declarations() {
            let path = output_directory.join(format!("{}.class", decl.fq_name));
            let _ = std::fs::write(path, decl.short_name.as_bytes());
        }
    }

    fn remove_generated_code(&self, tree: &ParsedTree, output_directory: &Path) {
        for decl in tree.declarations() {
            let _ = std::fs::remove_file(output_directory.join(format!("{}.class", decl.fq_name)));
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl FakeCompiler {
    #[allow(clippy::too_many_arguments)]
    fn resolve_line(
        &self,
        tree: &ParsedTree,
        line: &str,
        line_no: u32,
        by_short_name: &HashMap<&str, Vec<&Declaration>>,
        resolutions: &mut Vec<(Url, Range, ResolvedDeclaration)>,
        calls: &mut Vec<(Url, Range, CallInfo)>,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let mut chars = line.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            if !is_ident_char(c) || c.is_ascii_digit() {
                continue;
            }
            let mut end = start + c.len_utf8();
            while let Some(&(idx, next)) = chars.peek() {
                if is_ident_char(next) {
                    end = idx + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }

            let word = &line[start..end];
            let range = Range::new(
                Position::new(line_no, start as u32),
                Position::new(line_no, end as u32),
            );

            let local = by_short_name.get(word);
            let resolved = match local {
                Some(candidates) => {
                    // A declaration's own name identifier is not a reference.
                    let is_self = candidates.iter().any(|decl| {
                        decl.location
                            .as_ref()
                            .is_some_and(|loc| loc.uri == *tree.uri() && loc.range == range)
                    });
                    if is_self {
                        continue;
                    }

                    let functions: Vec<_> = candidates
                        .iter()
                        .filter(|d| d.kind == SymbolKind::Function)
                        .collect();
                    if functions.len() > 1 {
                        diagnostics.push(Diagnostic {
                            uri: tree.uri().clone(),
                            range,
                            severity: Severity::Error,
                            code: Some("OVERLOAD_RESOLUTION_AMBIGUITY".to_string()),
                            message: format!("overload resolution ambiguity for `{word}`"),
                        });
                    }

                    let decl = candidates[0];
                    ResolvedDeclaration {
                        fq_name: decl.fq_name.clone(),
                        short_name: decl.short_name.clone(),
                        kind: decl.kind,
                        location: decl.location.clone(),
                        container_fq_name: decl
                            .fq_name
                            .rsplit_once('.')
                            .map(|(container, _)| container.to_string()),
                        signature: decl.signature.clone(),
                        documentation: None,
                    }
                }
                None => {
                    match self
                        .dependencies
                        .iter()
                        .find(|dep| dep.short_name == word)
                    {
                        Some(dep) => dep.clone(),
                        None => continue,
                    }
                }
            };

            if line[end..].starts_with('(') {
                let call_end = line[end..]
                    .find(')')
                    .map_or(line.len(), |off| end + off + 1);
                calls.push((
                    tree.uri().clone(),
                    Range::new(
                        Position::new(line_no, start as u32),
                        Position::new(line_no, call_end as u32),
                    ),
                    CallInfo {
                        callee: resolved.clone(),
                        active_parameter: 0,
                    },
                ));
            }

            resolutions.push((tree.uri().clone(), range, resolved));
        }
    }
}

/// A [`CompilerProvider`] that records every instance it creates.
#[derive(Default)]
pub struct FakeCompilerProvider {
    dependencies: Vec<ResolvedDeclaration>,
    created: Mutex<Vec<(Option<String>, Arc<FakeCompiler>)>>,
}

impl FakeCompilerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ResolvedDeclaration>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn created(&self) -> Vec<(Option<String>, Arc<FakeCompiler>)> {
        self.created.lock().expect("created mutex poisoned").clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().expect("created mutex poisoned").len()
    }
}

impl CompilerProvider for FakeCompilerProvider {
    fn create_compiler(
        &self,
        module_id: Option<&str>,
        snapshot: &CompilerSnapshot,
    ) -> Arc<dyn Compiler> {
        let compiler = Arc::new(
            FakeCompiler::with_snapshot(module_id, snapshot.clone())
                .with_dependencies(self.dependencies.clone()),
        );
        self.created
            .lock()
            .expect("created mutex poisoned")
            .push((module_id.map(str::to_string), Arc::clone(&compiler)));
        compiler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn uri(name: &str) -> Url {
        Url::parse(&format!("file:///{name}")).unwrap()
    }

    #[test]
    fn parses_packages_imports_and_declarations() {
        let compiler = FakeCompiler::new(None);
        let tree = compiler.parse(
            &uri("a.kt"),
            "package com.example\nimport other.Dep\nclass Foo\nprivate fun bar()\nfun String.baz()\n",
        );

        assert_eq!(tree.package(), Some("com.example"));
        assert_eq!(tree.imports().len(), 1);
        assert_eq!(tree.imports()[0].fq_name, "other.Dep");

        let decls = tree.declarations();
        assert_eq!(decls.len(), 3);
        assert_eq!(decls[0].fq_name, "com.example.Foo");
        assert_eq!(decls[0].kind, SymbolKind::Class);
        assert_eq!(decls[1].visibility, Visibility::Private);
        assert_eq!(decls[2].extension_receiver.as_deref(), Some("String"));
        assert_eq!(decls[2].short_name, "baz");
    }

    #[test]
    fn resolves_references_across_files() {
        let compiler = FakeCompiler::new(Some("m"));
        let a = compiler.parse(&uri("a.kt"), "package p\nfun helper()\n");
        let b = compiler.parse(&uri("b.kt"), "package p\nfun caller()\nval x = helper()\n");

        let output = compiler.compile(&[a, b], CompilationKind::Default);
        let hit = output
            .binding
            .resolve_at(&uri("b.kt"), Position::new(2, 10))
            .unwrap();
        assert_eq!(hit.fq_name, "p.helper");
        assert_eq!(output.module.name(), Some("m"));
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn duplicate_functions_in_one_batch_are_ambiguous() {
        let compiler = FakeCompiler::new(None);
        let a = compiler.parse(&uri("a.kt"), "package p\nfun helper()\n");
        let b = compiler.parse(&uri("b.kt"), "package q\nfun helper()\nval x = helper()\n");

        let output = compiler.compile(&[a, b], CompilationKind::Default);
        assert!(output
            .diagnostics
            .iter()
            .any(|d| d.code.as_deref() == Some("OVERLOAD_RESOLUTION_AMBIGUITY")));
    }

    #[test]
    fn static_scope_walks_packages() {
        let scope = StaticModuleScope::new()
            .with_package("com.example", vec![])
            .with_package("com.example.util", vec![])
            .with_package("org.other", vec![]);

        assert_eq!(scope.top_level_packages(), vec!["com", "org"]);
        assert_eq!(scope.sub_packages("com"), vec!["com.example"]);
        assert_eq!(scope.sub_packages("com.example"), vec!["com.example.util"]);
        assert!(scope.sub_packages("org.other").is_empty());
    }

    #[test]
    fn composite_scope_unions_its_members() {
        let compiler = FakeCompiler::new(None);
        let a = compiler.parse(&uri("a.kt"), "package shared\nclass FromA\n");
        let b = compiler.parse(&uri("b.kt"), "package shared\nclass FromB\nfun only()\n");

        let mut scope_a = StaticModuleScope::new();
        scope_a.insert("shared".to_string(), a.declarations().to_vec());
        let mut scope_b = StaticModuleScope::new();
        scope_b.insert("shared".to_string(), b.declarations().to_vec());
        scope_b.insert("shared.deep".to_string(), Vec::new());

        let composite =
            crate::CompositeModuleScope::new(vec![Arc::new(scope_a), Arc::new(scope_b)]);

        assert_eq!(composite.top_level_packages(), vec!["shared"]);
        assert_eq!(composite.sub_packages("shared"), vec!["shared.deep"]);
        let names: Vec<String> = composite
            .declarations_in_package("shared")
            .into_iter()
            .map(|d| d.short_name)
            .collect();
        assert_eq!(names, vec!["FromA", "FromB", "only"]);
    }
}
