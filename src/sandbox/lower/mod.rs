// Lowering: per-language syntax trees to the shared statement IR

mod clike;
mod java;
mod python;
mod rust;

use tracing::debug;

use super::ir::{Expr, Program, Stmt, StmtKind, Target, TypeHint};
use super::value::Value;
use crate::error::TraceError;
use crate::grammar::{parse_source, Ast, AstNode, Language};
use crate::resolver::CompilationUnit;

/// Lower every file of `unit`. Any syntax error rejects the unit: a
/// program that does not parse is never executed.
pub fn lower_unit(unit: &CompilationUnit) -> Result<Program, TraceError> {
    let mut program = Program::default();
    for file in &unit.files {
        let (ast, errors) = parse_source(unit.language, &file.path, &file.content);
        if let Some(error) = errors.first() {
            return Err(TraceError::Rejected(error.to_string()));
        }
        let lowered = lower_ast(&ast);
        debug!(
            "Lowered {}: {} functions, {} classes",
            file.path,
            lowered.functions.len(),
            lowered.classes.len()
        );
        program.merge(lowered);
    }
    Ok(program)
}

/// Lower one parsed file.
pub fn lower_ast(ast: &Ast) -> Program {
    match ast.language {
        Language::Python => python::lower(ast),
        Language::C | Language::Cpp => clike::lower(ast),
        Language::Java => java::lower(ast),
        Language::Rust => rust::lower(ast),
    }
}

/// Source access for a lowering pass. Fragments parsed out of macro
/// bodies carry the line offset of the text they came from.
#[derive(Clone, Copy)]
pub(super) struct Cx<'a> {
    pub ast: &'a Ast,
    line_offset: u32,
}

impl<'a> Cx<'a> {
    pub fn new(ast: &'a Ast) -> Self {
        Self { ast, line_offset: 0 }
    }

    pub fn fragment(ast: &'a Ast, line: u32) -> Self {
        Self {
            ast,
            line_offset: line.saturating_sub(1),
        }
    }

    pub fn language(&self) -> Language {
        self.ast.language
    }

    pub fn file(&self) -> String {
        self.ast.path.clone()
    }

    pub fn text(&self, node: &AstNode) -> &'a str {
        self.ast.text(node)
    }

    pub fn line(&self, node: &AstNode) -> u32 {
        node.line() + self.line_offset
    }

    /// Line of the node's last character.
    pub fn end_line(&self, node: &AstNode) -> u32 {
        let end = node.span.end.saturating_sub(1).max(node.span.start);
        let before = self.ast.source.get(..end).unwrap_or("");
        before.matches('\n').count() as u32 + 1 + self.line_offset
    }

    pub fn stmt(&self, node: &AstNode, kind: StmtKind) -> Stmt {
        Stmt::new(self.line(node), kind)
    }

    /// First line of the node's text, for unsupported-construct messages.
    pub fn snippet(&self, node: &AstNode) -> String {
        let text = self.text(node);
        let first = text.lines().next().unwrap_or("").trim();
        if first.len() > 40 {
            let cut = first.char_indices().nth(40).map_or(first.len(), |(i, _)| i);
            format!("{}...", &first[..cut])
        } else {
            first.to_string()
        }
    }

    pub fn unsupported(&self, node: &AstNode) -> Expr {
        Expr::Unsupported(self.snippet(node))
    }

    /// Place the named children of `node` into `count` slots separated by
    /// `sep` tokens, which the syntax tree does not keep (`a[1:]`, `a[::2]`).
    pub fn slots<'n>(&self, node: &'n AstNode, sep: char, count: usize) -> Vec<Option<&'n AstNode>> {
        let mut slots = vec![None; count];
        let mut slot = 0;
        let mut cursor = node.span.start;
        let source = &self.ast.source;
        for child in node.named_children() {
            let gap = source.get(cursor..child.span.start).unwrap_or("");
            slot += gap.matches(sep).count();
            if slot >= count {
                break;
            }
            slots[slot] = Some(child);
            cursor = child.span.end;
        }
        slots
    }
}

pub(super) fn var(name: impl Into<String>) -> Expr {
    Expr::Var(name.into())
}

pub(super) fn int(value: i64) -> Expr {
    Expr::Literal(Value::Int(value))
}

pub(super) fn string(text: impl Into<String>) -> Expr {
    Expr::Literal(Value::Str(text.into()))
}

pub(super) fn call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Call {
        name: name.into(),
        qualifier: None,
        args,
        kwargs: Vec::new(),
    }
}

pub(super) fn qualified_call(qualifier: impl Into<String>, name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Call {
        name: name.into(),
        qualifier: Some(qualifier.into()),
        args,
        kwargs: Vec::new(),
    }
}

pub(super) fn method(receiver: Expr, name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Method {
        receiver: Box::new(receiver),
        name: name.into(),
        args,
        kwargs: Vec::new(),
    }
}

pub(super) fn assign(target: Target, value: Expr) -> Expr {
    Expr::Assign {
        target: Box::new(target),
        op: None,
        value: Box::new(value),
    }
}

pub(super) fn not(expr: Expr) -> Expr {
    Expr::Unary {
        op: super::ir::UnaryOp::Not,
        operand: Box::new(expr),
    }
}

/// The assignable place an expression names.
pub(super) fn to_target(expr: Expr) -> Option<Target> {
    Some(match expr {
        Expr::Var(name) => Target::Var(name),
        Expr::Index { target, index } => Target::Index {
            base: Box::new(to_target(*target)?),
            index: *index,
        },
        Expr::Field { target, name } => Target::Field {
            base: Box::new(to_target(*target)?),
            name,
        },
        Expr::Deref(inner) => Target::Deref(*inner),
        Expr::Tuple(items) | Expr::List(items) => {
            Target::Tuple(items.into_iter().map(to_target).collect::<Option<Vec<_>>>()?)
        }
        _ => return None,
    })
}

/// Assignment statement, or an unsupported marker when the left side is
/// not a place.
pub(super) fn assign_expr(left: Expr, op: Option<super::ir::BinOp>, value: Expr, text: &str) -> Expr {
    match to_target(left) {
        Some(target) => Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        },
        None => Expr::Unsupported(text.to_string()),
    }
}

/// Integer literal in any supported spelling: digit separators, radix
/// prefixes and type suffixes. `c_octal` reads a leading zero as octal.
pub(super) fn int_literal(text: &str, c_octal: bool) -> Option<i64> {
    let cleaned: String = text.chars().filter(|c| *c != '_' && *c != '\'').collect();
    let lower = cleaned.to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else if c_octal && lower.len() > 1 && lower.starts_with('0') && lower[1..].starts_with(|c: char| c.is_ascii_digit()) {
        (&lower[1..], 8)
    } else {
        (lower.as_str(), 10)
    };
    let end = digits.find(|c: char| !c.is_digit(radix)).unwrap_or(digits.len());
    let digits = &digits[..end];
    if digits.is_empty() {
        return None;
    }
    i64::from_str_radix(digits, radix)
        .ok()
        .or_else(|| u64::from_str_radix(digits, radix).ok().map(|v| v as i64))
}

pub(super) fn float_literal(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != '_' && *c != '\'').collect();
    let trimmed = cleaned
        .trim_end_matches("f64")
        .trim_end_matches("f32")
        .trim_end_matches(['f', 'F', 'd', 'D', 'l', 'L']);
    trimmed.parse::<f64>().ok()
}

/// Whether a C-family number literal denotes a floating-point value.
pub(super) fn is_float_literal(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    if lower.starts_with("0x") {
        return lower.contains('.') || lower.contains('p');
    }
    lower.contains('.') || lower.contains('e') || lower.ends_with('f') || lower.ends_with("f64") || lower.ends_with("f32")
}

/// Resolve backslash escapes.
pub(super) fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{7}'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            'e' => out.push('\u{1b}'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '?' => out.push('?'),
            // line continuation
            '\n' => {
                while chars.peek().is_some_and(|c| *c == ' ' || *c == '\t') {
                    chars.next();
                }
            }
            'x' => {
                let mut hex = String::new();
                while hex.len() < 2 && chars.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                    hex.extend(chars.next());
                }
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => out.push(c),
                    None => out.push_str("\\x"),
                }
            }
            'u' | 'U' => {
                let braced = chars.peek() == Some(&'{');
                if braced {
                    chars.next();
                }
                let width = if next == 'U' { 8 } else { 4 };
                let mut hex = String::new();
                while chars.peek().is_some_and(|c| c.is_ascii_hexdigit()) && (braced || hex.len() < width) {
                    hex.extend(chars.next());
                }
                if braced && chars.peek() == Some(&'}') {
                    chars.next();
                }
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => out.push(c),
                    None => out.push('\u{fffd}'),
                }
            }
            '0'..='7' => {
                let mut octal = next.to_string();
                while octal.len() < 3 && chars.peek().is_some_and(|c| ('0'..='7').contains(c)) {
                    octal.extend(chars.next());
                }
                match u32::from_str_radix(&octal, 8).ok().and_then(char::from_u32) {
                    Some(c) => out.push(c),
                    None => out.push('\0'),
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

/// Text of a quoted string literal: prefixes, raw forms and triple quotes
/// handled.
pub(super) fn string_literal(text: &str) -> String {
    let prefix_end = text.find(['"', '\'']).unwrap_or(0);
    let prefix = &text[..prefix_end];
    let rest = &text[prefix_end..];

    // c++ R"delim(...)delim"
    if prefix.ends_with('R') && rest.starts_with('"') && !prefix.contains('#') {
        let quoted = &rest[1..];
        if let Some(open) = quoted.find('(') {
            let closing = format!("){}\"", &quoted[..open]);
            let body = &quoted[open + 1..];
            return body.strip_suffix(closing.as_str()).unwrap_or(body).to_string();
        }
    }

    let hashes = prefix.matches('#').count();
    let quote = &rest[..rest.len().min(1)];
    let triple = quote.repeat(3);
    let (open, close) = if rest.len() >= 6 && rest.starts_with(triple.as_str()) {
        (3, 3)
    } else {
        (1, 1 + hashes)
    };
    let body = rest.get(open..rest.len().saturating_sub(close)).unwrap_or("");
    if prefix.contains(['r', 'R']) {
        body.to_string()
    } else {
        unescape(body)
    }
}

/// Value of a character literal (`'a'`, `'\n'`, `b'x'`).
pub(super) fn char_literal(text: &str) -> Value {
    let start = text.find('\'').map_or(0, |i| i + 1);
    let end = text.rfind('\'').filter(|e| *e >= start).unwrap_or(text.len());
    let body = unescape(&text[start..end]);
    let mut chars = body.chars();
    match (chars.next(), text.starts_with('b')) {
        (Some(c), true) => Value::Int(c as i64),
        (Some(c), false) => Value::Char(c),
        (None, _) => Value::Char('\0'),
    }
}

/// Split `text` on `sep` outside brackets, quotes and character literals.
pub(super) fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut i = 0;
    while i < chars.len() {
        let (at, c) = chars[i];
        match c {
            '"' => {
                i += 1;
                while i < chars.len() && chars[i].1 != '"' {
                    if chars[i].1 == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            // 'x' and '\n', but not lifetimes
            '\'' => {
                let escaped = chars.get(i + 1).is_some_and(|(_, c)| *c == '\\');
                let close = if escaped { i + 3 } else { i + 2 };
                if chars.get(close).is_some_and(|(_, c)| *c == '\'') {
                    i = close;
                }
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..at]);
                start = at + c.len_utf8();
            }
            _ => {}
        }
        i += 1;
    }
    let tail = &text[start..];
    if !tail.trim().is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Declared type text reduced to the hint evaluation uses.
pub(super) fn type_hint(text: &str, language: Language) -> TypeHint {
    if language == Language::Python {
        return TypeHint::Auto;
    }
    let mut text = text.trim();
    for prefix in ["const ", "static ", "final ", "volatile ", "struct ", "enum ", "class ", "union ", "mut "] {
        while let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start();
        }
    }
    if language == Language::Rust {
        text = text.trim_start_matches('&').trim_start();
        text = text.strip_prefix("mut ").unwrap_or(text).trim_start();
        if text.starts_with('[') {
            return TypeHint::List;
        }
    }
    let text = text.trim_end_matches('&').trim();
    if let Some(pointee) = text.strip_suffix('*') {
        let pointee = pointee.trim().trim_start_matches("const ").trim();
        return if pointee == "char" {
            TypeHint::Str
        } else {
            TypeHint::Auto
        };
    }
    if text.ends_with("[]") {
        return TypeHint::List;
    }
    let base = text.split('<').next().unwrap_or(text).trim();
    let base = base.rsplit("::").next().unwrap_or(base);
    let base = base.rsplit('.').next().unwrap_or(base).trim();

    let words: Vec<&str> = base.split_whitespace().collect();
    if words.len() > 1 {
        if words.contains(&"double") || words.contains(&"float") {
            return TypeHint::Float;
        }
        if words
            .iter()
            .any(|w| matches!(*w, "int" | "long" | "short" | "unsigned" | "signed" | "char"))
        {
            return TypeHint::Int;
        }
    }
    match base {
        "int" | "long" | "short" | "unsigned" | "signed" | "size_t" | "ssize_t" | "int8_t" | "int16_t" | "int32_t"
        | "int64_t" | "uint8_t" | "uint16_t" | "uint32_t" | "uint64_t" | "byte" | "Integer" | "Long" | "Short"
        | "Byte" | "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64" | "u128"
        | "usize" => TypeHint::Int,
        "float" | "double" | "Float" | "Double" | "f32" | "f64" => TypeHint::Float,
        "bool" | "boolean" | "Boolean" => TypeHint::Bool,
        "char" | "Character" | "wchar_t" => TypeHint::Char,
        "string" | "String" | "str" => TypeHint::Str,
        "vector" | "Vec" | "VecDeque" | "deque" | "list" | "array" => TypeHint::List,
        "auto" | "var" | "_" | "void" | "T" | "Self" | "" => TypeHint::Auto,
        other if other.starts_with(|c: char| c.is_alphabetic() || c == '_') => TypeHint::Struct(other.to_string()),
        _ => TypeHint::Auto,
    }
}

/// Generic arguments stripped from a type or path: `Vec<i32>` -> `Vec`,
/// `HashMap::<K, V>::new` -> `HashMap::new`.
pub(super) fn strip_generics(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0;
    for c in text.chars() {
        match c {
            '<' => depth += 1,
            '>' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.replace("::::", "::").trim_end_matches("::").trim().to_string()
}

/// Last path segment of a type name.
pub(super) fn base_type(text: &str) -> String {
    let stripped = strip_generics(text);
    let mut stripped = stripped.trim();
    for prefix in ["const ", "struct ", "class ", "enum ", "union "] {
        stripped = stripped.strip_prefix(prefix).unwrap_or(stripped).trim_start();
    }
    let stripped = stripped.trim_end_matches(['&', '*', ' ']);
    let last = stripped.rsplit("::").next().unwrap_or(stripped);
    last.rsplit('.').next().unwrap_or(last).trim().to_string()
}

/// Text between the outer delimiters of a macro token tree or bracket
/// group.
pub(super) fn inner_text(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.len() >= 2 && trimmed.starts_with(['(', '[', '{']) {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}

/// Statement wrapping an expression.
pub(super) fn expr_stmt(line: u32, expr: Expr) -> Stmt {
    Stmt::new(line, StmtKind::Expr(expr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{resolve, FileInput};

    #[test]
    fn test_int_literals() {
        assert_eq!(int_literal("1_000", false), Some(1000));
        assert_eq!(int_literal("0xFF", false), Some(255));
        assert_eq!(int_literal("0b101", false), Some(5));
        assert_eq!(int_literal("0o17", false), Some(15));
        assert_eq!(int_literal("017", true), Some(15));
        assert_eq!(int_literal("017", false), Some(17));
        assert_eq!(int_literal("42u32", false), Some(42));
        assert_eq!(int_literal("10LL", true), Some(10));
        assert_eq!(int_literal("0", true), Some(0));
    }

    #[test]
    fn test_float_literals() {
        assert_eq!(float_literal("2.5f"), Some(2.5));
        assert_eq!(float_literal("1e3"), Some(1000.0));
        assert_eq!(float_literal("3.0_f64"), Some(3.0));
        assert!(is_float_literal("1.5"));
        assert!(is_float_literal("2e10"));
        assert!(!is_float_literal("0xE"));
        assert!(!is_float_literal("12"));
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(string_literal(r#""a\tb""#), "a\tb");
        assert_eq!(string_literal(r#"r"C:\dir""#), r"C:\dir");
        assert_eq!(string_literal(r##"r#"say "hi""#"##), r#"say "hi""#);
        assert_eq!(string_literal("'''x'''"), "x");
        assert_eq!(string_literal(r#"R"(raw\n)""#), r"raw\n");
        assert_eq!(string_literal(r#""\x41\u{1F600}""#), "A\u{1F600}");
    }

    #[test]
    fn test_char_literals() {
        assert!(matches!(char_literal("'a'"), Value::Char('a')));
        assert!(matches!(char_literal(r"'\n'"), Value::Char('\n')));
        assert!(matches!(char_literal("b'A'"), Value::Int(65)));
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(split_top_level(r#""{}, {}", f(a, b), c"#, ','), vec![r#""{}, {}""#, " f(a, b)", " c"]);
        assert!(split_top_level("  ", ',').is_empty());
    }

    #[test]
    fn test_type_hints() {
        assert_eq!(type_hint("const int", Language::C), TypeHint::Int);
        assert_eq!(type_hint("unsigned long long", Language::C), TypeHint::Int);
        assert_eq!(type_hint("long double", Language::Cpp), TypeHint::Float);
        assert_eq!(type_hint("const char*", Language::C), TypeHint::Str);
        assert_eq!(type_hint("std::vector<int>", Language::Cpp), TypeHint::List);
        assert_eq!(type_hint("int[]", Language::Java), TypeHint::List);
        assert_eq!(type_hint("&mut Vec<i32>", Language::Rust), TypeHint::List);
        assert_eq!(type_hint("&str", Language::Rust), TypeHint::Str);
        assert_eq!(type_hint("HashMap<String, i32>", Language::Rust), TypeHint::Struct("HashMap".into()));
        assert_eq!(type_hint("int", Language::Python), TypeHint::Auto);
    }

    #[test]
    fn test_strip_generics() {
        assert_eq!(strip_generics("Vec::<i32>::new"), "Vec::new");
        assert_eq!(strip_generics("HashMap<String, Vec<i32>>"), "HashMap");
        assert_eq!(base_type("std::vector<int>&"), "vector");
        assert_eq!(base_type("struct Node *"), "Node");
    }

    #[test]
    fn test_syntax_error_rejects_unit() {
        let unit = resolve(FileInput::new("main.py", "def f(:\n"), vec![], Language::Python).unwrap();
        assert!(matches!(lower_unit(&unit), Err(TraceError::Rejected(_))));
    }
}
