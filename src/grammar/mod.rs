// Grammar registry: language tags to tree-sitter parsers

pub mod ast;
pub mod symbols;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tree_sitter::Parser as TreeParser;

use crate::error::{FlowError, InputError, ParseError};
use crate::resolver::CompilationUnit;

pub use ast::{Ast, AstKind, AstNode, Span};

/// Languages the pipeline understands. Adding a language means adding a
/// variant here and a lowering pass in the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    C,
    Cpp,
    Rust,
    Java,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::C,
        Language::Cpp,
        Language::Rust,
        Language::Java,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Rust => "rust",
            Language::Java => "java",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::C => "C",
            Language::Cpp => "C++",
            Language::Rust => "Rust",
            Language::Java => "Java",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py"],
            Language::C => &["c", "h"],
            Language::Cpp => &["cpp", "cc", "cxx", "hpp", "hh", "hxx", "h"],
            Language::Rust => &["rs"],
            Language::Java => &["java"],
        }
    }

    /// Infer a language from a file extension. `.h` maps to C.
    pub fn from_path(path: &str) -> Option<Language> {
        let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
        Language::ALL
            .iter()
            .copied()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }

    /// Separator used when joining scope segments into a qualified name.
    pub fn scope_separator(&self) -> &'static str {
        match self {
            Language::Python | Language::Java => ".",
            Language::C | Language::Cpp | Language::Rust => "::",
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Language::Python),
            "c" => Ok(Language::C),
            "cpp" | "c++" | "cxx" | "cc" => Ok(Language::Cpp),
            "rust" | "rs" => Ok(Language::Rust),
            "java" => Ok(Language::Java),
            _ => Err(InputError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Every file of a compilation unit parsed, with per-file error lists.
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    /// One tree per file, in the unit's file order. Files with syntax errors
    /// still get their partial tree.
    pub asts: Vec<Ast>,
    pub errors: BTreeMap<String, Vec<ParseError>>,
}

impl ParsedUnit {
    pub fn ast(&self, path: &str) -> Option<&Ast> {
        self.asts.iter().find(|ast| ast.path == path)
    }

    pub fn has_errors(&self) -> bool {
        self.errors.values().any(|errors| !errors.is_empty())
    }

    pub fn all_errors(&self) -> Vec<ParseError> {
        self.errors.values().flatten().cloned().collect()
    }
}

/// Maps a [`Language`] to a parser producing a language-neutral [`Ast`].
///
/// Stateless apart from the enabled-language filter, so a shared reference can
/// parse concurrently; each call builds its own tree-sitter parser.
#[derive(Debug, Clone)]
pub struct GrammarRegistry {
    enabled: Vec<Language>,
}

impl Default for GrammarRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GrammarRegistry {
    pub fn new() -> Self {
        Self {
            enabled: Language::ALL.to_vec(),
        }
    }

    pub fn with_languages(enabled: Vec<Language>) -> Self {
        Self { enabled }
    }

    pub fn supports(&self, language: Language) -> bool {
        self.enabled.contains(&language)
    }

    pub fn languages(&self) -> &[Language] {
        &self.enabled
    }

    /// Parse one file. Fails on the first syntax error.
    pub fn parse(&self, language: Language, path: &str, text: &str) -> Result<Ast, FlowError> {
        let (ast, mut errors) = self.parse_lenient(language, path, text)?;
        if errors.is_empty() {
            Ok(ast)
        } else {
            Err(errors.swap_remove(0).into())
        }
    }

    /// Parse one file, keeping the partial tree and every error span.
    pub fn parse_lenient(
        &self,
        language: Language,
        path: &str,
        text: &str,
    ) -> Result<(Ast, Vec<ParseError>), FlowError> {
        if !self.supports(language) {
            return Err(InputError::UnsupportedLanguage(language.to_string()).into());
        }
        Ok(parse_source(language, path, text))
    }

    /// Parse every file of a unit. A syntax error in one file does not stop
    /// its siblings from being parsed.
    pub fn parse_unit(&self, unit: &CompilationUnit) -> Result<ParsedUnit, FlowError> {
        let mut asts = Vec::with_capacity(unit.files.len());
        let mut errors = BTreeMap::new();

        for file in &unit.files {
            let (ast, file_errors) = self.parse_lenient(unit.language, &file.path, &file.content)?;
            debug!(
                "Parsed {} ({} nodes, {} errors)",
                file.path,
                ast.node_count(),
                file_errors.len()
            );
            if !file_errors.is_empty() {
                errors.insert(file.path.clone(), file_errors);
            }
            asts.push(ast);
        }

        Ok(ParsedUnit { asts, errors })
    }
}

/// Parse without the registry's language filter. Used for source fragments
/// synthesized during lowering.
pub(crate) fn parse_source(language: Language, path: &str, text: &str) -> (Ast, Vec<ParseError>) {
    let mut parser = TreeParser::new();
    let tree = parser
        .set_language(&language.grammar())
        .ok()
        .and_then(|_| parser.parse(text, None));

    match tree {
        Some(tree) => ast::build(language, path, text, &tree),
        None => {
            let span = Span {
                start: 0,
                end: text.len(),
                line: 1,
                column: 1,
            };
            let error = ParseError {
                file: path.to_string(),
                span,
                message: format!("{} parser could not process this file", language.display_name()),
            };
            (Ast::empty(language, path, text), vec![error])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_aliases() {
        assert_eq!("Python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("c++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("rs".parse::<Language>().unwrap(), Language::Rust);
        assert!(matches!(
            "cobol".parse::<Language>(),
            Err(InputError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_language_from_path() {
        assert_eq!(Language::from_path("src/main.rs"), Some(Language::Rust));
        assert_eq!(Language::from_path("util.h"), Some(Language::C));
        assert_eq!(Language::from_path("Main.java"), Some(Language::Java));
        assert_eq!(Language::from_path("README"), None);
    }

    #[test]
    fn test_parse_all_languages() {
        let registry = GrammarRegistry::new();
        let sources = [
            (Language::Python, "def f():\n    return 1\n"),
            (Language::C, "int f(void) { return 1; }\n"),
            (Language::Cpp, "int f() { return 1; }\n"),
            (Language::Rust, "fn f() -> i32 { 1 }\n"),
            (Language::Java, "class A { static int f() { return 1; } }\n"),
        ];
        for (language, source) in sources {
            let ast = registry.parse(language, "f", source).unwrap();
            assert_eq!(ast.root.kind, AstKind::Module, "{}", language);
        }
    }

    #[test]
    fn test_parse_error_has_span() {
        let registry = GrammarRegistry::new();
        let err = registry
            .parse(Language::Python, "bad.py", "x = 1\ndef (:\n")
            .unwrap_err();
        match err {
            FlowError::Parse(e) => {
                assert_eq!(e.file, "bad.py");
                assert_eq!(e.span.line, 2);
                assert!(e.span.end >= e.span.start);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_disabled_language_is_unsupported() {
        let registry = GrammarRegistry::with_languages(vec![Language::Python]);
        let err = registry.parse(Language::Java, "A.java", "class A {}").unwrap_err();
        assert!(matches!(err, FlowError::Input(InputError::UnsupportedLanguage(_))));
    }
}
