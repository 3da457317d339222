// Language-neutral syntax tree built from tree-sitter output

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Tree, TreeCursor};

use super::Language;
use crate::error::ParseError;

/// Subtrees nested deeper than this are cut off and reported as an error, so
/// every recursive pass over the tree has a fixed depth bound.
pub const MAX_NESTING: usize = 256;

/// Tokens that carry no meaning once the tree exists.
const PUNCTUATION: &[&str] = &["(", ")", "{", "}", "[", "]", ";", ",", ":"];

/// Normalized node category shared by all grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AstKind {
    Module,
    FunctionDefinition,
    /// Class, impl block, namespace or module: contributes a scope segment.
    ScopeDefinition,
    CallExpression,
    Assignment,
    Identifier,
    Literal,
    Import,
    Branch,
    Loop,
    Return,
    Block,
    Other,
}

/// Byte range plus 1-based start position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: AstKind,
    /// The grammar's own node kind; for anonymous tokens this is the token.
    pub raw_kind: &'static str,
    /// Field name of this node within its parent.
    pub field: Option<&'static str>,
    pub named: bool,
    pub span: Span,
    pub children: Vec<AstNode>,
}

impl AstNode {
    pub fn is(&self, raw_kind: &str) -> bool {
        self.raw_kind == raw_kind
    }

    pub fn line(&self) -> u32 {
        self.span.line
    }

    /// First child stored under `field`.
    pub fn child(&self, field: &str) -> Option<&AstNode> {
        self.children.iter().find(|c| c.field == Some(field))
    }

    pub fn children_by_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a AstNode> + 'a {
        self.children.iter().filter(move |c| c.field == Some(field))
    }

    pub fn named_children(&self) -> impl Iterator<Item = &AstNode> {
        self.children.iter().filter(|c| c.named)
    }

    pub fn first_named(&self) -> Option<&AstNode> {
        self.named_children().next()
    }

    pub fn child_of_kind(&self, raw_kind: &str) -> Option<&AstNode> {
        self.children.iter().find(|c| c.raw_kind == raw_kind)
    }

    /// Whether an anonymous token such as `else` or `..=` is a direct child.
    pub fn has_token(&self, token: &str) -> bool {
        self.children.iter().any(|c| !c.named && c.raw_kind == token)
    }

    /// The operator token: the `operator` field if the grammar has one,
    /// otherwise the first anonymous child.
    pub fn operator(&self) -> Option<&'static str> {
        self.child("operator")
            .or_else(|| self.children.iter().find(|c| !c.named))
            .map(|c| c.raw_kind)
    }

    /// Pre-order walk in document order.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a AstNode)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

/// A parsed file: its root node plus the text spans point into.
#[derive(Debug, Clone)]
pub struct Ast {
    pub path: String,
    pub language: Language,
    pub source: String,
    pub root: AstNode,
}

impl Ast {
    pub(crate) fn empty(language: Language, path: &str, source: &str) -> Self {
        Self {
            path: path.to_string(),
            language,
            source: source.to_string(),
            root: AstNode {
                kind: AstKind::Module,
                raw_kind: "module",
                field: None,
                named: true,
                span: Span {
                    start: 0,
                    end: source.len(),
                    line: 1,
                    column: 1,
                },
                children: Vec::new(),
            },
        }
    }

    pub fn text(&self, node: &AstNode) -> &str {
        self.source.get(node.span.start..node.span.end).unwrap_or("")
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.root.visit(&mut |_| count += 1);
        count
    }
}

struct Builder<'s> {
    language: Language,
    path: &'s str,
    source: &'s str,
    errors: Vec<ParseError>,
}

pub(crate) fn build(language: Language, path: &str, source: &str, tree: &Tree) -> (Ast, Vec<ParseError>) {
    let mut builder = Builder {
        language,
        path,
        source,
        errors: Vec::new(),
    };
    let mut cursor = tree.walk();
    builder.check(cursor.node());
    let mut root = builder.convert(&mut cursor, 0);
    root.kind = AstKind::Module;

    let ast = Ast {
        path: path.to_string(),
        language,
        source: source.to_string(),
        root,
    };
    (ast, builder.errors)
}

impl Builder<'_> {
    fn convert(&mut self, cursor: &mut TreeCursor, depth: usize) -> AstNode {
        let node = cursor.node();
        let field = cursor.field_name();
        let mut children = Vec::new();

        if depth >= MAX_NESTING {
            self.error(node, "nesting too deep to analyze".to_string());
        } else if cursor.goto_first_child() {
            loop {
                let child = cursor.node();
                self.check(child);
                if keep(child) {
                    children.push(self.convert(cursor, depth + 1));
                }
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
            cursor.goto_parent();
        }

        AstNode {
            kind: classify(self.language, node.kind()),
            raw_kind: node.kind(),
            field,
            named: node.is_named(),
            span: span_of(node),
            children,
        }
    }

    fn check(&mut self, node: Node) {
        if node.is_error() {
            let snippet: String = self
                .source
                .get(node.byte_range())
                .unwrap_or("")
                .lines()
                .next()
                .unwrap_or("")
                .chars()
                .take(24)
                .collect();
            self.error(node, format!("syntax error near `{}`", snippet.trim()));
        } else if node.is_missing() {
            self.error(node, format!("missing `{}`", node.kind()));
        }
    }

    fn error(&mut self, node: Node, message: String) {
        self.errors.push(ParseError {
            file: self.path.to_string(),
            span: span_of(node),
            message,
        });
    }
}

fn keep(node: Node) -> bool {
    if node.is_extra() && !node.is_error() {
        return false;
    }
    node.is_named() || !PUNCTUATION.contains(&node.kind())
}

fn span_of(node: Node) -> Span {
    let start = node.start_position();
    Span {
        start: node.start_byte(),
        end: node.end_byte(),
        line: start.row as u32 + 1,
        column: start.column as u32 + 1,
    }
}

/// Map a grammar node kind onto the shared categories.
pub fn classify(language: Language, raw: &str) -> AstKind {
    use AstKind::*;
    match (language, raw) {
        (_, "module" | "translation_unit" | "source_file" | "program") => Module,

        (Language::Python, "function_definition")
        | (Language::C | Language::Cpp, "function_definition")
        | (Language::Rust, "function_item")
        | (Language::Java, "method_declaration" | "constructor_declaration") => FunctionDefinition,

        (Language::Python, "class_definition")
        | (Language::Cpp, "class_specifier" | "struct_specifier" | "namespace_definition")
        | (Language::Rust, "impl_item" | "trait_item" | "mod_item")
        | (Language::Java, "class_declaration" | "interface_declaration" | "enum_declaration") => {
            ScopeDefinition
        }

        (Language::Python, "call")
        | (Language::C | Language::Cpp | Language::Rust, "call_expression")
        | (Language::Java, "method_invocation") => CallExpression,

        (Language::Python, "assignment" | "augmented_assignment")
        | (Language::C | Language::Cpp, "assignment_expression" | "init_declarator")
        | (Language::Rust, "let_declaration" | "assignment_expression" | "compound_assignment_expr")
        | (Language::Java, "assignment_expression" | "variable_declarator") => Assignment,

        (_, "identifier") => Identifier,

        (Language::Python, "integer" | "float" | "string" | "concatenated_string" | "true" | "false" | "none")
        | (
            Language::C | Language::Cpp,
            "number_literal" | "string_literal" | "raw_string_literal" | "char_literal"
            | "concatenated_string" | "true" | "false" | "null" | "nullptr",
        )
        | (
            Language::Rust,
            "integer_literal" | "float_literal" | "string_literal" | "raw_string_literal"
            | "char_literal" | "boolean_literal",
        )
        | (
            Language::Java,
            "decimal_integer_literal" | "hex_integer_literal" | "octal_integer_literal"
            | "binary_integer_literal" | "decimal_floating_point_literal"
            | "hex_floating_point_literal" | "string_literal" | "character_literal" | "true"
            | "false" | "null_literal" | "text_block",
        ) => Literal,

        (Language::Python, "import_statement" | "import_from_statement")
        | (Language::C | Language::Cpp, "preproc_include")
        | (Language::Rust, "use_declaration")
        | (Language::Java, "import_declaration") => Import,

        (Language::Rust, "if_expression" | "match_expression")
        | (_, "if_statement" | "switch_statement" | "switch_expression") => Branch,

        (Language::Rust, "for_expression" | "while_expression" | "loop_expression")
        | (_, "for_statement" | "while_statement" | "do_statement" | "for_range_loop" | "enhanced_for_statement") => {
            Loop
        }

        (Language::Rust, "return_expression") | (_, "return_statement") => Return,

        (Language::Python, "block")
        | (Language::C | Language::Cpp, "compound_statement")
        | (Language::Rust | Language::Java, "block") => Block,

        _ => Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarRegistry;

    #[test]
    fn test_kinds_are_normalized() {
        let registry = GrammarRegistry::new();
        let ast = registry
            .parse(Language::Python, "m.py", "import os\n\ndef f(a):\n    b = a\n    g(b)\n")
            .unwrap();

        let mut kinds = Vec::new();
        ast.root.visit(&mut |n| kinds.push(n.kind));
        assert!(kinds.contains(&AstKind::Import));
        assert!(kinds.contains(&AstKind::FunctionDefinition));
        assert!(kinds.contains(&AstKind::Assignment));
        assert!(kinds.contains(&AstKind::CallExpression));
    }

    #[test]
    fn test_fields_and_text() {
        let registry = GrammarRegistry::new();
        let ast = registry.parse(Language::Rust, "lib.rs", "fn add(a: i32) -> i32 { a + 1 }").unwrap();
        let function = ast.root.first_named().unwrap();
        assert_eq!(function.kind, AstKind::FunctionDefinition);
        assert_eq!(ast.text(function.child("name").unwrap()), "add");
        assert_eq!(function.span.line, 1);
    }

    #[test]
    fn test_punctuation_and_comments_dropped() {
        let registry = GrammarRegistry::new();
        let ast = registry
            .parse(Language::C, "a.c", "// note\nint x = (1 + 2);\n")
            .unwrap();
        let mut raw = Vec::new();
        ast.root.visit(&mut |n| raw.push(n.raw_kind));
        assert!(!raw.contains(&"comment"));
        assert!(!raw.contains(&";"));
        assert!(raw.contains(&"+"));
    }
}
