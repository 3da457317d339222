// Multi-file resolver: a primary file plus auxiliaries into one ordered unit

pub mod references;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FlowError, InputError, ResolutionError, UnresolvedReference};
use crate::grammar::Language;
use references::{file_stem, parent_dir, Fallback, Reference};

/// A file as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInput {
    pub path: String,
    pub content: String,
}

impl FileInput {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// The raw input to one analysis: language, primary file and auxiliaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSet {
    pub language: Language,
    pub primary_file: FileInput,
    #[serde(default)]
    pub auxiliary_files: Vec<FileInput>,
}

impl CodeSet {
    pub fn new(language: Language, primary_file: FileInput, auxiliary_files: Vec<FileInput>) -> Self {
        Self {
            language,
            primary_file,
            auxiliary_files,
        }
    }

    pub fn files(&self) -> impl Iterator<Item = &FileInput> {
        std::iter::once(&self.primary_file).chain(self.auxiliary_files.iter())
    }
}

/// Size limits applied before any scanning or parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputLimits {
    pub max_file_bytes: usize,
    pub max_files: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 10_000,
            max_files: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    #[serde(skip_serializing, default)]
    pub content: String,
    pub language: Language,
}

/// A cycle-free, topologically ordered set of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationUnit {
    pub language: Language,
    /// Normalized path of the primary file.
    pub primary: String,
    /// Dependencies before dependents; ties in path order.
    pub files: Vec<SourceFile>,
    /// File -> files it references. Every file has an entry.
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    pub unresolved: Vec<UnresolvedReference>,
    /// blake3 over the language and the ordered file contents.
    pub fingerprint: String,
}

impl CompilationUnit {
    pub fn file(&self, path: &str) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }

    pub fn depends_on(&self, from: &str, to: &str) -> bool {
        self.dependencies.get(from).is_some_and(|deps| deps.contains(to))
    }
}

/// Resolve with the default input limits.
pub fn resolve(
    primary: FileInput,
    auxiliary: Vec<FileInput>,
    language: Language,
) -> Result<CompilationUnit, FlowError> {
    Resolver::default().resolve(&CodeSet::new(language, primary, auxiliary))
}

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    limits: InputLimits,
}

impl Resolver {
    pub fn new(limits: InputLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &InputLimits {
        &self.limits
    }

    pub fn resolve(&self, code_set: &CodeSet) -> Result<CompilationUnit, FlowError> {
        let language = code_set.language;
        let files = self.validate(code_set)?;
        let primary = files[0].path.clone();
        let paths: BTreeSet<&str> = files.iter().map(|f| f.path.as_str()).collect();

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut unresolved = Vec::new();

        for file in &files {
            let deps = dependencies.entry(file.path.clone()).or_default();
            for reference in references::scan(language, &file.path, &file.content) {
                let targets = lookup(&reference, &file.path, &paths);
                if targets.is_empty() {
                    debug!("Unresolved reference `{}` in {}:{}", reference.text, file.path, reference.line);
                    unresolved.push(UnresolvedReference {
                        reference: reference.text,
                        referencing_file: file.path.clone(),
                        line: reference.line,
                    });
                }
                deps.extend(targets);
            }
        }

        if let Some(cycle) = find_cycle(&dependencies) {
            info!("Rejecting unit: cycle {}", cycle.join(" -> "));
            return Err(ResolutionError::CyclicDependency { cycle }.into());
        }

        let order = topological_order(&dependencies);
        let mut by_path: BTreeMap<String, SourceFile> = files.into_iter().map(|f| (f.path.clone(), f)).collect();
        let files: Vec<SourceFile> = order.iter().filter_map(|path| by_path.remove(path)).collect();

        let fingerprint = fingerprint(language, &files);
        debug!(
            "Resolved {} files ({} unresolved references), order: {}",
            files.len(),
            unresolved.len(),
            order.join(", ")
        );

        Ok(CompilationUnit {
            language,
            primary,
            files,
            dependencies,
            unresolved,
            fingerprint,
        })
    }

    /// Reject malformed file sets before anything looks at their contents.
    fn validate(&self, code_set: &CodeSet) -> Result<Vec<SourceFile>, InputError> {
        let count = 1 + code_set.auxiliary_files.len();
        if count > self.limits.max_files {
            return Err(InputError::TooManyFiles {
                count,
                limit: self.limits.max_files,
            });
        }

        let mut seen = BTreeSet::new();
        let mut files = Vec::with_capacity(count);
        for input in code_set.files() {
            let path = normalize_path(&input.path)?;
            if input.content.len() > self.limits.max_file_bytes {
                return Err(InputError::FileTooLarge {
                    path,
                    size: input.content.len(),
                    limit: self.limits.max_file_bytes,
                });
            }
            if !seen.insert(path.clone()) {
                return Err(InputError::DuplicatePath(path));
            }
            files.push(SourceFile {
                path,
                content: input.content.clone(),
                language: code_set.language,
            });
        }
        Ok(files)
    }
}

/// Canonical relative form: forward slashes, no `.` segments, no `..`.
pub fn normalize_path(path: &str) -> Result<String, InputError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(InputError::EmptyPath);
    }
    let unified = trimmed.replace('\\', "/");
    let has_drive = unified.as_bytes().get(1) == Some(&b':');
    if unified.starts_with('/') || has_drive {
        return Err(InputError::InvalidPath(path.to_string()));
    }

    let mut parts = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(InputError::InvalidPath(path.to_string())),
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return Err(InputError::EmptyPath);
    }
    Ok(parts.join("/"))
}

/// Files a reference points at, never including the referencing file.
fn lookup(reference: &Reference, from: &str, paths: &BTreeSet<&str>) -> Vec<String> {
    if let Some(hit) = reference
        .candidates
        .iter()
        .find(|c| c.as_str() != from && paths.contains(c.as_str()))
    {
        return vec![hit.clone()];
    }

    let unique = |matches: Vec<&&str>| match matches.as_slice() {
        [only] => vec![only.to_string()],
        _ => Vec::new(),
    };
    match &reference.fallback {
        Fallback::None => Vec::new(),
        Fallback::Stem(stem) => unique(
            paths
                .iter()
                .filter(|p| **p != from && file_stem(p) == stem)
                .collect(),
        ),
        Fallback::FileName(name) => unique(
            paths
                .iter()
                .filter(|p| **p != from && p.rsplit('/').next() == Some(name.as_str()))
                .collect(),
        ),
        Fallback::Package(dir) => paths
            .iter()
            .filter(|p| **p != from && parent_dir(p) == dir)
            .map(|p| p.to_string())
            .collect(),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Depth-first search with visiting/visited coloring. Returns the first cycle
/// found in path order, closed (`[a, b, a]`).
fn find_cycle(graph: &BTreeMap<String, BTreeSet<String>>) -> Option<Vec<String>> {
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'g>(
        node: &'g str,
        graph: &'g BTreeMap<String, BTreeSet<String>>,
        marks: &mut BTreeMap<&'g str, Mark>,
        stack: &mut Vec<&'g str>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Visited) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        stack.push(node);
        if let Some(deps) = graph.get(node) {
            for dep in deps {
                if let Some(cycle) = visit(dep, graph, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(node, Mark::Visited);
        None
    }

    for node in graph.keys() {
        if let Some(cycle) = visit(node, graph, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// Kahn's algorithm over an acyclic graph. Ready files are taken in path
/// order, so the result depends only on the graph.
fn topological_order(graph: &BTreeMap<String, BTreeSet<String>>) -> Vec<String> {
    let mut pending: BTreeMap<&str, usize> = graph.iter().map(|(f, deps)| (f.as_str(), deps.len())).collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (file, deps) in graph {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(file.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = pending.iter().filter(|(_, n)| **n == 0).map(|(f, _)| *f).collect();
    let mut order = Vec::with_capacity(graph.len());
    while let Some(next) = ready.pop_first() {
        order.push(next.to_string());
        for dependent in dependents.get(next).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }
    order
}

fn fingerprint(language: Language, files: &[SourceFile]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(language.as_str().as_bytes());
    for file in files {
        hasher.update(&[0]);
        hasher.update(file.path.as_bytes());
        hasher.update(&[0]);
        hasher.update(file.content.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn py(path: &str, content: &str) -> FileInput {
        FileInput::new(path, content)
    }

    #[test]
    fn test_dependency_before_dependent() {
        let unit = resolve(
            py("main.py", "import utils\nutils.helper()\n"),
            vec![py("utils.py", "def helper():\n    pass\n")],
            Language::Python,
        )
        .unwrap();

        let order: Vec<_> = unit.paths().collect();
        assert_eq!(order, vec!["utils.py", "main.py"]);
        assert_eq!(unit.primary, "main.py");
        assert!(unit.depends_on("main.py", "utils.py"));
        assert!(unit.unresolved.is_empty());
    }

    #[test]
    fn test_extensionless_paths_resolve() {
        let unit = resolve(
            py("main", "from utils import helper\n"),
            vec![py("utils", "def helper(): pass\n")],
            Language::Python,
        )
        .unwrap();
        assert!(unit.depends_on("main", "utils"));
    }

    #[test]
    fn test_unresolved_is_collected_not_fatal() {
        let unit = resolve(py("main.py", "import os\n\nimport numpy\n"), vec![], Language::Python).unwrap();
        assert_eq!(unit.unresolved.len(), 2);
        assert_eq!(unit.unresolved[1].reference, "numpy");
        assert_eq!(unit.unresolved[1].line, 3);
        assert_eq!(unit.files.len(), 1);
    }

    #[test]
    fn test_cycle_is_fatal() {
        let err = resolve(
            py("a.py", "import b\n"),
            vec![py("b.py", "import a\n")],
            Language::Python,
        )
        .unwrap_err();
        match err {
            FlowError::Resolution(ResolutionError::CyclicDependency { cycle }) => {
                assert_eq!(cycle, vec!["a.py", "b.py", "a.py"]);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_ties_break_lexicographically() {
        let unit = resolve(
            py("z.py", "x = 1\n"),
            vec![py("m.py", ""), py("b.py", ""), py("a/c.py", "")],
            Language::Python,
        )
        .unwrap();
        let order: Vec<_> = unit.paths().collect();
        assert_eq!(order, vec!["a/c.py", "b.py", "m.py", "z.py"]);
        assert_eq!(unit.primary, "z.py");
    }

    #[test]
    fn test_c_header_resolution() {
        let unit = resolve(
            FileInput::new("main.c", "#include <stdio.h>\n#include \"utils.h\"\nint main(void) { return helper(); }\n"),
            vec![
                FileInput::new("utils.h", "int helper(void);\n"),
                FileInput::new("utils.c", "#include \"utils.h\"\nint helper(void) { return 1; }\n"),
            ],
            Language::C,
        )
        .unwrap();
        assert!(unit.depends_on("main.c", "utils.h"));
        assert!(unit.depends_on("utils.c", "utils.h"));
        assert_eq!(unit.files[0].path, "utils.h");
        assert_eq!(unit.unresolved.len(), 1);
    }

    #[test]
    fn test_input_validation() {
        let resolver = Resolver::new(InputLimits {
            max_file_bytes: 8,
            max_files: 2,
        });
        let too_big = CodeSet::new(Language::Python, py("a.py", "x = 123456789"), vec![]);
        assert!(matches!(
            resolver.resolve(&too_big),
            Err(FlowError::Input(InputError::FileTooLarge { .. }))
        ));

        let dup = CodeSet::new(Language::Python, py("a.py", ""), vec![py("./a.py", "")]);
        assert!(matches!(
            resolver.resolve(&dup),
            Err(FlowError::Input(InputError::DuplicatePath(_)))
        ));

        let many = CodeSet::new(Language::Python, py("a.py", ""), vec![py("b.py", ""), py("c.py", "")]);
        assert!(matches!(
            resolver.resolve(&many),
            Err(FlowError::Input(InputError::TooManyFiles { count: 3, limit: 2 }))
        ));

        assert!(matches!(normalize_path("../x.py"), Err(InputError::InvalidPath(_))));
        assert!(matches!(normalize_path("  "), Err(InputError::EmptyPath)));
        assert_eq!(normalize_path(".\\pkg\\m.py").unwrap(), "pkg/m.py");
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = resolve(py("m.py", "x = 1\n"), vec![], Language::Python).unwrap();
        let b = resolve(py("m.py", "x = 2\n"), vec![], Language::Python).unwrap();
        let c = resolve(py("m.py", "x = 1\n"), vec![], Language::Python).unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint, c.fingerprint);
    }

    proptest! {
        #[test]
        fn prop_resolution_is_deterministic(
            names in proptest::collection::btree_set("[a-e]{1,3}", 1..6),
            seed in 0usize..64,
        ) {
            // Each file imports the next one in sorted order: always acyclic.
            let names: Vec<String> = names.into_iter().collect();
            let mut inputs: Vec<FileInput> = names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let body = names.get(i + 1).map(|n| format!("import {}\n", n)).unwrap_or_default();
                    py(&format!("{}.py", name), &body)
                })
                .collect();
            let len = inputs.len();
            inputs.rotate_left(seed % len);
            let primary = inputs.remove(0);

            let first = resolve(primary.clone(), inputs.clone(), Language::Python).unwrap();
            inputs.reverse();
            let second = resolve(primary, inputs, Language::Python).unwrap();

            let a: Vec<_> = first.paths().collect();
            let b: Vec<_> = second.paths().collect();
            prop_assert_eq!(a, b);
            prop_assert_eq!(first.fingerprint, second.fingerprint);
        }
    }
}
