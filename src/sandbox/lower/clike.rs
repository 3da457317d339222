// C and C++ lowering

use std::collections::HashSet;

use super::{
    assign, assign_expr, base_type, call, char_literal, expr_stmt, float_literal, int, int_literal, is_float_literal,
    method, qualified_call, string, string_literal, strip_generics, type_hint, var, Cx,
};
use crate::grammar::symbols;
use crate::grammar::{parse_source, Ast, AstNode, Language};
use crate::sandbox::ir::{
    BinOp, Block, Case, ClassDef, Expr, FieldDef, Function, Handler, ModuleCode, Param, Program, Stmt, StmtKind,
    Target, TypeHint, UnaryOp,
};
use crate::sandbox::value::Value;

pub(super) fn lower(ast: &Ast) -> Program {
    let mut classes = HashSet::new();
    ast.root.visit(&mut |node| {
        let named = match node.raw_kind {
            "struct_specifier" | "class_specifier" | "union_specifier" if node.child("body").is_some() => node.child("name"),
            "type_definition" => node.child("declarator"),
            _ => None,
        };
        if let Some(name) = named {
            classes.insert(ast.text(name).to_string());
        }
    });

    let mut lowerer = ClikeLowerer {
        cx: Cx::new(ast),
        program: Program::default(),
        classes,
        return_text: String::new(),
        alloc_depth: 0,
    };
    let mut body = Vec::new();
    lowerer.top_level(&ast.root, &mut body);
    lowerer.program.modules.push(ModuleCode {
        file: ast.path.clone(),
        body,
    });
    lowerer.program
}

/// Standard containers that need an explicit initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Seq,
    Map,
    Set,
    Stack,
    Heap,
    Pair,
}

fn container_kind(type_text: &str) -> Option<Container> {
    Some(match base_type(type_text).as_str() {
        "vector" | "deque" | "list" | "queue" | "array" | "forward_list" => Container::Seq,
        "map" | "unordered_map" | "multimap" => Container::Map,
        "set" | "unordered_set" | "multiset" => Container::Set,
        "stack" => Container::Stack,
        "priority_queue" => Container::Heap,
        "pair" | "tuple" => Container::Pair,
        _ => return None,
    })
}

/// First template argument: `vector<vector<int>>` -> `vector<int>`.
fn element_type(type_text: &str) -> Option<&str> {
    let open = type_text.find('<')?;
    let close = type_text.rfind('>')?;
    let inner = type_text.get(open + 1..close)?;
    template_args(inner).into_iter().next().map(str::trim)
}

/// Byte size of a scalar type, for `sizeof`.
fn type_size(type_text: &str) -> i64 {
    let text = type_text.trim();
    if text.ends_with('*') {
        return 8;
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.contains(&"double") || words.iter().filter(|w| **w == "long").count() >= 1 {
        return 8;
    }
    match words.last().copied().unwrap_or("") {
        "char" | "bool" | "int8_t" | "uint8_t" => 1,
        "short" | "int16_t" | "uint16_t" => 2,
        "int" | "float" | "unsigned" | "int32_t" | "uint32_t" => 4,
        _ => 8,
    }
}

struct ClikeLowerer<'a> {
    cx: Cx<'a>,
    program: Program,
    /// Struct, class and typedef names declared in this file.
    classes: HashSet<String>,
    /// Declared return type of the function being lowered.
    return_text: String,
    /// Nesting depth inside `malloc`-family arguments, where `sizeof`
    /// counts elements rather than bytes.
    alloc_depth: usize,
}

impl<'a> ClikeLowerer<'a> {
    fn cpp(&self) -> bool {
        self.cx.language() == Language::Cpp
    }

    // top level

    fn top_level(&mut self, node: &AstNode, body: &mut Block) {
        for item in node.named_children() {
            match item.raw_kind {
                "function_definition" => {
                    if let Some(function) = self.function(item, None, None) {
                        self.program.functions.push(function);
                    }
                }
                "declaration" => {
                    if symbols::function_declarator(item).is_some() && item.child("declarator").is_some_and(|d| !d.is("init_declarator")) {
                        continue;
                    }
                    self.type_definitions(item, body);
                    self.declaration(item, body);
                }
                "struct_specifier" | "class_specifier" | "union_specifier" => self.class(item, None),
                "enum_specifier" => self.enumeration(item, None, body),
                "type_definition" => self.type_definitions(item, body),
                "preproc_def" => self.define(item, body),
                "preproc_function_def" => self.macro_function(item),
                "namespace_definition" | "linkage_specification" => {
                    if let Some(inner) = item.child("body") {
                        self.top_level(inner, body);
                    }
                }
                "template_declaration" | "preproc_ifdef" | "preproc_if" | "preproc_else" | "declaration_list" => {
                    self.top_level(item, body)
                }
                "expression_statement" => {
                    // `struct Point { ... };` at the top level parses as a
                    // specifier followed by an empty statement
                    if let Some(inner) = item.first_named() {
                        if matches!(inner.raw_kind, "struct_specifier" | "class_specifier") {
                            self.class(inner, None);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Struct, class and enum bodies appearing inside a declaration or a
    /// typedef.
    fn type_definitions(&mut self, node: &AstNode, body: &mut Block) {
        let Some(ty) = node.child("type") else {
            return;
        };
        let alias = node
            .is("type_definition")
            .then(|| node.child("declarator").map(|d| self.cx.text(d).to_string()))
            .flatten();
        match ty.raw_kind {
            "struct_specifier" | "class_specifier" | "union_specifier" if ty.child("body").is_some() => {
                self.class(ty, alias.as_deref())
            }
            "enum_specifier" if ty.child("body").is_some() => self.enumeration(ty, alias.as_deref(), body),
            _ => {}
        }
    }

    /// `#define N 100` becomes a global.
    fn define(&mut self, node: &AstNode, body: &mut Block) {
        let (Some(name), Some(value)) = (node.child("name"), node.child("value")) else {
            return;
        };
        let text = self.cx.text(value).trim();
        let Some(expr) = self.fragment_expr(text, self.cx.line(node)) else {
            return;
        };
        body.push(self.cx.stmt(
            node,
            StmtKind::Declare {
                name: self.cx.text(name).to_string(),
                hint: TypeHint::Auto,
                value: Some(expr),
                copy: false,
            },
        ));
    }

    /// `#define MAX(a, b) ((a) > (b) ? (a) : (b))` becomes a function.
    fn macro_function(&mut self, node: &AstNode) {
        let (Some(name), Some(params), Some(value)) = (node.child("name"), node.child("parameters"), node.child("value"))
        else {
            return;
        };
        let line = self.cx.line(node);
        let Some(expr) = self.fragment_expr(self.cx.text(value).trim(), line) else {
            return;
        };
        let name = self.cx.text(name).to_string();
        self.program.functions.push(Function {
            qualified: name.clone(),
            name,
            owner: None,
            file: self.cx.file(),
            line,
            end_line: line,
            params: params
                .named_children()
                .map(|p| Param {
                    name: self.cx.text(p).to_string(),
                    hint: TypeHint::Auto,
                    default: None,
                    by_ref: false,
                    copy: false,
                })
                .collect(),
            takes_self: false,
            is_static: false,
            body: vec![Stmt::new(line, StmtKind::Return(Some(expr)))],
            tail: None,
            return_hint: TypeHint::Auto,
        });
    }

    /// Parse macro replacement text as an initializer expression.
    fn fragment_expr(&mut self, text: &str, line: u32) -> Option<Expr> {
        if text.is_empty() {
            return None;
        }
        let source = format!("long __v = {};\n", text);
        let (ast, errors) = parse_source(self.cx.language(), &self.cx.ast.path, &source);
        if !errors.is_empty() {
            return Some(Expr::Unsupported(text.to_string()));
        }
        let value = find_init_value(&ast.root)?;
        let mut fragment = ClikeLowerer {
            cx: Cx::fragment(&ast, line),
            program: Program::default(),
            classes: self.classes.clone(),
            return_text: String::new(),
            alloc_depth: 0,
        };
        Some(fragment.expr(value))
    }

    fn enumeration(&mut self, node: &AstNode, alias: Option<&str>, body: &mut Block) {
        let Some(list) = node.child("body") else {
            return;
        };
        let name = node
            .child("name")
            .map(|n| self.cx.text(n).to_string())
            .or_else(|| alias.map(str::to_string));
        let scoped = node.has_token("class") || node.has_token("struct");
        let mut variants = Vec::new();
        let mut next: Expr = int(0);
        for enumerator in list.named_children().filter(|e| e.is("enumerator")) {
            let Some(variant) = enumerator.child("name").map(|n| self.cx.text(n).to_string()) else {
                continue;
            };
            let value = match enumerator.child("value") {
                Some(value) => self.expr(value),
                None => next.clone(),
            };
            next = Expr::Binary {
                op: BinOp::Add,
                left: Box::new(var(variant.clone())),
                right: Box::new(int(1)),
            };
            if scoped {
                variants.push(variant);
            } else {
                body.push(self.cx.stmt(
                    enumerator,
                    StmtKind::Declare {
                        name: variant,
                        hint: TypeHint::Int,
                        value: Some(value),
                        copy: false,
                    },
                ));
            }
        }
        if let (true, Some(name)) = (scoped, name) {
            self.program.classes.push(ClassDef {
                name,
                base: None,
                fields: Vec::new(),
                variants,
            });
        }
    }

    fn class(&mut self, node: &AstNode, alias: Option<&str>) {
        let name = node
            .child("name")
            .map(|n| strip_generics(self.cx.text(n)))
            .or_else(|| alias.map(str::to_string));
        let Some(name) = name else {
            return;
        };
        let base = node
            .named_children()
            .find(|c| c.is("base_class_clause"))
            .and_then(|clause| {
                clause
                    .named_children()
                    .find(|c| matches!(c.raw_kind, "type_identifier" | "qualified_identifier" | "template_type"))
            })
            .map(|b| base_type(self.cx.text(b)));

        let mut fields = Vec::new();
        if let Some(body) = node.child("body") {
            self.members(body, &name, base.as_deref(), &mut fields);
        }
        let def = ClassDef {
            name: name.clone(),
            base,
            fields,
            variants: Vec::new(),
        };
        if let Some(alias) = alias.filter(|a| *a != name) {
            let mut aliased = def.clone();
            aliased.name = alias.to_string();
            self.program.classes.push(aliased);
        }
        self.program.classes.push(def);
    }

    fn members(&mut self, body: &AstNode, class: &str, base: Option<&str>, fields: &mut Vec<FieldDef>) {
        for member in body.named_children() {
            match member.raw_kind {
                "field_declaration" => {
                    if symbols::function_declarator(member).is_some() {
                        continue;
                    }
                    if let Some(ty) = member.child("type") {
                        if matches!(ty.raw_kind, "struct_specifier" | "class_specifier") && ty.child("body").is_some() {
                            self.class(ty, None);
                        }
                    }
                    self.fields(member, fields);
                }
                "function_definition" => {
                    if let Some(function) = self.function(member, Some(class), base) {
                        self.program.functions.push(function);
                    }
                }
                "template_declaration" | "declaration_list" => self.members(member, class, base, fields),
                "declaration" => {
                    // in-class constructor prototypes and static members
                    if symbols::function_declarator(member).is_none() {
                        self.fields(member, fields);
                    }
                }
                _ => {}
            }
        }
    }

    fn fields(&mut self, member: &AstNode, fields: &mut Vec<FieldDef>) {
        let type_text = member.child("type").map(|t| self.cx.text(t).to_string()).unwrap_or_default();
        for declarator in member.children_by_field("declarator") {
            let Some(name) = symbols::declarator_name(self.cx.ast, declarator) else {
                continue;
            };
            let shape = DeclShape::of(declarator);
            let hint = shape.hint(&type_text, self.cx.language());
            let default = member
                .child("default_value")
                .or_else(|| declarator.child("value"));
            let init = match default {
                Some(value) => Some(self.initial_value(&type_text, &shape, Some(value))),
                None if !shape.dims.is_empty() => Some(self.array(&shape, &type_text, None)),
                None if shape.pointer => None,
                None => self.default_value(&type_text),
            };
            fields.push(FieldDef {
                name: name.to_string(),
                hint,
                init,
            });
        }
    }

    // functions

    fn function(&mut self, node: &AstNode, class: Option<&str>, base: Option<&str>) -> Option<Function> {
        let declarator = symbols::function_declarator(node)?;
        let name_node = declarator.child("declarator")?;
        if name_node.is("destructor_name") {
            return None;
        }
        let (owner, name) = match name_node.raw_kind {
            "qualified_identifier" => {
                let scope = name_node.child("scope").map(|s| strip_generics(self.cx.text(s)));
                let name = name_node.child("name").map(|n| self.cx.text(n).to_string())?;
                if name.starts_with('~') {
                    return None;
                }
                (scope.or_else(|| class.map(str::to_string)), name)
            }
            _ => (class.map(str::to_string), self.cx.text(name_node).to_string()),
        };
        let base = base.map(str::to_string).or_else(|| {
            owner
                .as_deref()
                .and_then(|o| self.program.class(o))
                .and_then(|c| c.base.clone())
        });

        let type_text = node.child("type").map(|t| self.cx.text(t).to_string()).unwrap_or_default();
        let pointer_return = node.child("declarator").is_some_and(|d| d.is("pointer_declarator"));
        let return_hint = if pointer_return {
            type_hint(&format!("{}*", type_text), self.cx.language())
        } else {
            type_hint(&type_text, self.cx.language())
        };
        let is_static = node
            .children
            .iter()
            .any(|c| c.is("storage_class_specifier") && self.cx.text(c) == "static")
            && owner.is_some();

        let params = self.params(declarator);
        let saved = std::mem::replace(&mut self.return_text, type_text);
        let mut body = Vec::new();
        if let Some(initializers) = node.child_of_kind("field_initializer_list") {
            for initializer in initializers.named_children() {
                if let Some(stmt) = self.field_initializer(initializer, base.as_deref()) {
                    body.push(stmt);
                }
            }
        }
        if let Some(block) = node.child("body") {
            body.extend(self.block(block));
        }
        self.return_text = saved;

        let qualified = match &owner {
            Some(owner) => format!("{}::{}", owner, name),
            None => name.clone(),
        };
        Some(Function {
            name,
            qualified,
            owner,
            file: self.cx.file(),
            line: self.cx.line(node),
            end_line: self.cx.end_line(node),
            params,
            takes_self: false,
            is_static,
            body,
            tail: None,
            return_hint,
        })
    }

    fn params(&mut self, declarator: &AstNode) -> Vec<Param> {
        let Some(list) = declarator.child("parameters") else {
            return Vec::new();
        };
        let mut params = Vec::new();
        for param in list.named_children() {
            if !matches!(param.raw_kind, "parameter_declaration" | "optional_parameter_declaration") {
                continue;
            }
            let Some(decl) = param.child("declarator") else {
                continue;
            };
            let Some(name) = symbols::declarator_name(self.cx.ast, decl) else {
                continue;
            };
            let shape = DeclShape::of(decl);
            let type_text = param.child("type").map(|t| self.cx.text(t).to_string()).unwrap_or_default();
            let by_ref = shape.reference;
            params.push(Param {
                name: name.to_string(),
                hint: shape.hint(&type_text, self.cx.language()),
                default: param.child("default_value").map(|d| self.expr(d)),
                by_ref,
                copy: self.cpp() && !by_ref && !shape.pointer && shape.dims.is_empty(),
            });
        }
        params
    }

    /// `: x(x), Base(y)` in a constructor.
    fn field_initializer(&mut self, node: &AstNode, base: Option<&str>) -> Option<Stmt> {
        let target = node.named_children().next()?;
        let args_node = node.named_children().nth(1)?;
        let mut args: Vec<Expr> = args_node.named_children().map(|a| self.expr(a)).collect();
        let name = base_type(self.cx.text(target));
        let line = self.cx.line(node);
        if base == Some(name.as_str()) {
            return Some(expr_stmt(line, qualified_call("super", name, args)));
        }
        let value = match args.len() {
            0 => Expr::Literal(Value::None),
            1 => args.remove(0),
            _ => Expr::Tuple(args),
        };
        let field = Target::Field {
            base: Box::new(Target::Var("this".to_string())),
            name,
        };
        Some(expr_stmt(line, assign(field, value)))
    }

    // statements

    fn block(&mut self, node: &AstNode) -> Block {
        let mut out = Vec::new();
        for child in node.named_children() {
            self.stmt(child, &mut out);
        }
        out
    }

    /// Body of a control statement: a compound statement's contents or a
    /// single statement.
    fn body(&mut self, node: Option<&AstNode>) -> Block {
        match node {
            Some(node) if node.is("compound_statement") => self.block(node),
            Some(node) => {
                let mut out = Vec::new();
                self.stmt(node, &mut out);
                out
            }
            None => Vec::new(),
        }
    }

    fn stmt(&mut self, node: &AstNode, out: &mut Block) {
        let cx = self.cx;
        let kind = match node.raw_kind {
            "expression_statement" => match node.first_named() {
                Some(inner) if matches!(inner.raw_kind, "comma_expression") => {
                    for expr in self.comma_list(inner) {
                        out.push(expr_stmt(cx.line(node), expr));
                    }
                    return;
                }
                Some(inner) => StmtKind::Expr(self.expr(inner)),
                None => return,
            },
            "declaration" => {
                self.type_definitions(node, out);
                self.declaration(node, out);
                return;
            }
            "compound_statement" => StmtKind::Block(self.block(node)),
            "if_statement" => {
                let cond = self.condition(node.child("condition"));
                let then = self.body(node.child("consequence"));
                let otherwise = node.child("alternative").map(|alt| {
                    let inner = if alt.is("else_clause") { alt.first_named() } else { Some(alt) };
                    self.body(inner)
                });
                StmtKind::If { cond, then, otherwise }
            }
            "while_statement" => StmtKind::While {
                cond: self.condition(node.child("condition")),
                body: self.body(node.child("body")),
            },
            "do_statement" => StmtKind::DoWhile {
                body: self.body(node.child("body")),
                cond: self.condition(node.child("condition")),
            },
            "for_statement" => {
                let mut init = Vec::new();
                for initializer in node.children_by_field("initializer") {
                    match initializer.raw_kind {
                        "declaration" => self.declaration(initializer, &mut init),
                        "comma_expression" => {
                            for expr in self.comma_list(initializer) {
                                init.push(expr_stmt(cx.line(initializer), expr));
                            }
                        }
                        _ => init.push(expr_stmt(cx.line(initializer), self.expr(initializer))),
                    }
                }
                let cond = node.child("condition").map(|c| self.expr(c));
                let update = match node.child("update") {
                    Some(update) if update.is("comma_expression") => self.comma_list(update),
                    Some(update) => vec![self.expr(update)],
                    None => Vec::new(),
                };
                let body = self.body(node.child("body"));
                StmtKind::For { init, cond, update, body }
            }
            "for_range_loop" => {
                let target = match node.child("declarator") {
                    Some(d) if d.is("structured_binding_declarator") => Target::Tuple(
                        d.named_children().map(|n| Target::Var(cx.text(n).to_string())).collect(),
                    ),
                    Some(d) => match symbols::declarator_name(cx.ast, d) {
                        Some(name) => Target::Var(name.to_string()),
                        None => {
                            out.push(cx.stmt(node, StmtKind::Unsupported(cx.snippet(node))));
                            return;
                        }
                    },
                    None => Target::Var("_".to_string()),
                };
                let iter = match node.child("right") {
                    Some(right) => self.expr(right),
                    None => cx.unsupported(node),
                };
                StmtKind::ForEach {
                    target,
                    iter,
                    body: self.body(node.child("body")),
                }
            }
            "return_statement" => StmtKind::Return(node.first_named().map(|value| {
                if value.is("initializer_list") {
                    let items = value.named_children().map(|i| self.expr(i)).collect();
                    if container_kind(&self.return_text) == Some(Container::Pair) {
                        Expr::Tuple(items)
                    } else {
                        Expr::List(items)
                    }
                } else {
                    self.expr(value)
                }
            })),
            "break_statement" => StmtKind::Break,
            "continue_statement" => StmtKind::Continue,
            "switch_statement" => {
                let value = self.condition(node.child("condition"));
                let mut cases = Vec::new();
                if let Some(body) = node.child("body") {
                    for case in body.named_children().filter(|c| c.is("case_statement")) {
                        let label = case.child("value");
                        let labels = label.map(|l| self.expr(l)).into_iter().collect();
                        let mut stmts = Vec::new();
                        for child in case.named_children() {
                            if label.is_some_and(|l| std::ptr::eq(l, child)) {
                                continue;
                            }
                            self.stmt(child, &mut stmts);
                        }
                        cases.push(Case { labels, body: stmts });
                    }
                }
                StmtKind::Switch {
                    value,
                    cases,
                    fallthrough: true,
                }
            }
            "try_statement" => {
                let body = self.body(node.child("body"));
                let handlers = node
                    .named_children()
                    .filter(|c| c.is("catch_clause"))
                    .map(|clause| self.handler(clause))
                    .collect();
                StmtKind::Try {
                    body,
                    handlers,
                    orelse: Vec::new(),
                    finally: Vec::new(),
                }
            }
            "throw_statement" => StmtKind::Raise(node.first_named().map(|v| self.expr(v))),
            "function_definition" => {
                if let Some(function) = self.function(node, None, None) {
                    self.program.functions.push(function);
                }
                return;
            }
            "struct_specifier" | "class_specifier" => {
                self.class(node, None);
                return;
            }
            "type_definition" => {
                self.type_definitions(node, out);
                return;
            }
            "using_declaration" | "alias_declaration" | "namespace_alias_definition" | "static_assert_declaration" => {
                return
            }
            _ => StmtKind::Unsupported(cx.snippet(node)),
        };
        out.push(cx.stmt(node, kind));
    }

    fn condition(&mut self, node: Option<&AstNode>) -> Expr {
        let Some(node) = node else {
            return Expr::Literal(Value::Bool(true));
        };
        match node.raw_kind {
            "condition_clause" => match node.child("value").or_else(|| node.named_children().last()) {
                Some(value) if value.is("declaration") => self.cx.unsupported(value),
                Some(value) => self.expr(value),
                None => self.cx.unsupported(node),
            },
            "parenthesized_expression" => match node.first_named() {
                Some(inner) => self.expr(inner),
                None => self.cx.unsupported(node),
            },
            _ => self.expr(node),
        }
    }

    fn handler(&mut self, clause: &AstNode) -> Handler {
        let param = clause
            .child("parameters")
            .and_then(|p| p.named_children().find(|c| c.is("parameter_declaration")));
        let kinds = param
            .and_then(|p| p.child("type"))
            .map(|t| vec![base_type(self.cx.text(t))])
            .unwrap_or_default();
        let binding = param
            .and_then(|p| p.child("declarator"))
            .and_then(|d| symbols::declarator_name(self.cx.ast, d))
            .map(str::to_string);
        Handler {
            kinds,
            binding,
            body: self.body(clause.child("body")),
        }
    }

    fn comma_list(&mut self, node: &AstNode) -> Vec<Expr> {
        let mut exprs = Vec::new();
        for side in [node.child("left"), node.child("right")].into_iter().flatten() {
            if side.is("comma_expression") {
                exprs.extend(self.comma_list(side));
            } else {
                exprs.push(self.expr(side));
            }
        }
        exprs
    }

    // declarations

    fn declaration(&mut self, node: &AstNode, out: &mut Block) {
        let type_text = node.child("type").map(|t| self.cx.text(t).to_string()).unwrap_or_default();
        for declarator in node.children_by_field("declarator") {
            let (decl, value) = if declarator.is("init_declarator") {
                (declarator.child("declarator"), declarator.child("value"))
            } else {
                (Some(declarator), None)
            };
            let Some(decl) = decl else {
                continue;
            };
            if decl.is("function_declarator") {
                continue;
            }
            let Some(name) = symbols::declarator_name(self.cx.ast, decl) else {
                continue;
            };
            let shape = DeclShape::of(decl);
            let hint = shape.hint(&type_text, self.cx.language());
            let line = self.cx.line(declarator);
            let value = match value {
                Some(value) => Some(self.initial_value(&type_text, &shape, Some(value))),
                None if !shape.dims.is_empty() => Some(self.array(&shape, &type_text, None)),
                None if shape.pointer || shape.reference => None,
                None => self.default_value(&type_text),
            };
            let copy = self.cpp() && !shape.pointer && !shape.reference;
            if let Some(lambda @ Expr::Lambda { .. }) = value {
                // declared before the closure is built so it can recurse
                out.push(Stmt::new(
                    line,
                    StmtKind::Declare {
                        name: name.to_string(),
                        hint: TypeHint::Auto,
                        value: None,
                        copy: false,
                    },
                ));
                out.push(expr_stmt(line, assign(Target::Var(name.to_string()), lambda)));
                continue;
            }
            out.push(Stmt::new(
                line,
                StmtKind::Declare {
                    name: name.to_string(),
                    hint,
                    value,
                    copy,
                },
            ));
        }
    }

    /// Value of a declaration with no initializer, where zero-filling by
    /// type is not enough.
    fn default_value(&mut self, type_text: &str) -> Option<Expr> {
        match container_kind(type_text) {
            Some(Container::Seq) => Some(Expr::List(Vec::new())),
            Some(Container::Map) => Some(Expr::Dict(Vec::new())),
            Some(Container::Set) => Some(Expr::New {
                class: "set".to_string(),
                args: Vec::new(),
            }),
            Some(Container::Stack) => Some(Expr::New {
                class: "stack".to_string(),
                args: Vec::new(),
            }),
            Some(Container::Heap) => Some(self.heap(type_text, Vec::new())),
            Some(Container::Pair) => {
                let parts = element_types(type_text);
                Some(Expr::Tuple(parts.iter().map(|t| zero_value(t, self.cx.language())).collect()))
            }
            None => {
                let class = base_type(type_text);
                (self.cpp() && self.classes.contains(&class)).then_some(Expr::New { class, args: Vec::new() })
            }
        }
    }

    fn heap(&mut self, type_text: &str, mut args: Vec<Expr>) -> Expr {
        if type_text.contains("greater") {
            args.insert(0, call("greater", Vec::new()));
        }
        Expr::New {
            class: "priority_queue".to_string(),
            args,
        }
    }

    fn initial_value(&mut self, type_text: &str, shape: &DeclShape, value: Option<&AstNode>) -> Expr {
        let Some(value) = value else {
            return Expr::Literal(Value::None);
        };
        if !shape.dims.is_empty() {
            if value.is("string_literal") || value.is("concatenated_string") {
                return self.expr(value);
            }
            return self.array(shape, type_text, Some(value));
        }
        // `T *p = 0` is the null pointer
        if shape.pointer && value.is("number_literal") && self.cx.text(value).trim_end_matches(['l', 'L', 'u', 'U']) == "0" {
            return Expr::Literal(Value::None);
        }
        match value.raw_kind {
            "argument_list" => {
                let args: Vec<Expr> = value.named_children().map(|a| self.expr(a)).collect();
                self.constructed(type_text, args)
            }
            "initializer_list" => {
                let items: Vec<&AstNode> = value.named_children().collect();
                match container_kind(type_text) {
                    Some(Container::Map) => {
                        let mut entries = Vec::new();
                        for item in items {
                            let mut parts = item.named_children();
                            match (parts.next(), parts.next()) {
                                (Some(key), Some(value)) => entries.push((self.expr(key), self.expr(value))),
                                _ => return self.cx.unsupported(item),
                            }
                        }
                        Expr::Dict(entries)
                    }
                    Some(Container::Pair) => Expr::Tuple(items.iter().map(|i| self.expr(i)).collect()),
                    Some(Container::Seq) => Expr::List(items.iter().map(|i| self.expr(i)).collect()),
                    Some(kind @ (Container::Set | Container::Stack)) => Expr::New {
                        class: if kind == Container::Set { "set" } else { "stack" }.to_string(),
                        args: vec![Expr::List(items.iter().map(|i| self.expr(i)).collect())],
                    },
                    Some(Container::Heap) => {
                        let list = Expr::List(items.iter().map(|i| self.expr(i)).collect());
                        self.heap(type_text, vec![list])
                    }
                    None => {
                        let class = base_type(type_text);
                        let args: Vec<Expr> = items.iter().map(|i| self.expr(i)).collect();
                        if self.classes.contains(&class) {
                            Expr::New { class, args }
                        } else {
                            match args.len() {
                                0 => zero_value(type_text, self.cx.language()),
                                1 => args.into_iter().next().unwrap_or(Expr::Literal(Value::None)),
                                _ => Expr::List(args),
                            }
                        }
                    }
                }
            }
            _ => self.expr(value),
        }
    }

    /// `vector<int> v(n, 0)`, `Point p(1, 2)`.
    fn constructed(&mut self, type_text: &str, args: Vec<Expr>) -> Expr {
        match container_kind(type_text) {
            Some(Container::Seq) => match args.as_slice() {
                [Expr::Method { receiver: a, name: begin, .. }, Expr::Method { name: end, .. }]
                    if begin == "begin" && end == "end" =>
                {
                    Expr::Slice {
                        target: a.clone(),
                        start: None,
                        end: None,
                        step: None,
                    }
                }
                [count] => Expr::Repeat {
                    value: Box::new(element_type(type_text).map_or(int(0), |t| zero_value(t, self.cx.language()))),
                    count: Box::new(count.clone()),
                },
                [count, value] => Expr::Repeat {
                    value: Box::new(value.clone()),
                    count: Box::new(count.clone()),
                },
                _ => Expr::List(Vec::new()),
            },
            Some(Container::Heap) => self.heap(type_text, args),
            Some(Container::Pair) => Expr::Tuple(args),
            Some(_) => Expr::New {
                class: base_type(type_text),
                args,
            },
            None => {
                let class = base_type(type_text);
                if self.classes.contains(&class) || class.starts_with(char::is_uppercase) {
                    Expr::New { class, args }
                } else {
                    args.into_iter().next().unwrap_or(Expr::Literal(Value::None))
                }
            }
        }
    }

    fn array(&mut self, shape: &DeclShape, type_text: &str, init: Option<&AstNode>) -> Expr {
        let dims = shape
            .dims
            .iter()
            .map(|d| match d {
                Some(size) => self.expr(size),
                None => int(0),
            })
            .collect();
        Expr::Array {
            dims,
            hint: type_hint(type_text, self.cx.language()),
            init: init.map(|i| Box::new(self.expr(i))),
        }
    }

    // expressions

    fn expr(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        match node.raw_kind {
            "identifier" | "field_identifier" | "namespace_identifier" | "type_identifier" => var(cx.text(node)),
            "this" => var("this"),
            "number_literal" => {
                let text = cx.text(node);
                if is_float_literal(text) {
                    float_literal(text).map_or_else(|| cx.unsupported(node), |f| Expr::Literal(Value::Float(f)))
                } else {
                    int_literal(text, true).map_or_else(|| cx.unsupported(node), |i| Expr::Literal(Value::Int(i)))
                }
            }
            "string_literal" | "raw_string_literal" => Expr::Literal(Value::Str(string_literal(cx.text(node)))),
            "concatenated_string" => {
                let joined: String = node
                    .named_children()
                    .map(|part| string_literal(cx.text(part)))
                    .collect();
                Expr::Literal(Value::Str(joined))
            }
            "char_literal" => Expr::Literal(char_literal(cx.text(node))),
            "true" => Expr::Literal(Value::Bool(true)),
            "false" => Expr::Literal(Value::Bool(false)),
            "null" | "nullptr" => Expr::Literal(Value::None),
            "parenthesized_expression" => match node.first_named() {
                Some(inner) if inner.is("comma_expression") => self.comma_value(inner),
                Some(inner) => self.expr(inner),
                None => cx.unsupported(node),
            },
            "comma_expression" => self.comma_value(node),
            "binary_expression" => self.binary(node),
            "unary_expression" => {
                let op = match node.child("operator").map(|o| cx.text(o)) {
                    Some("!") => UnaryOp::Not,
                    Some("-") => UnaryOp::Neg,
                    Some("+") => UnaryOp::Plus,
                    Some("~") => UnaryOp::BitNot,
                    _ => return cx.unsupported(node),
                };
                match node.child("argument") {
                    Some(argument) => Expr::Unary {
                        op,
                        operand: Box::new(self.expr(argument)),
                    },
                    None => cx.unsupported(node),
                }
            }
            "update_expression" => {
                let Some(argument) = node.child("argument") else {
                    return cx.unsupported(node);
                };
                let operator = node.child("operator").map(|o| cx.text(o)).unwrap_or("++");
                let prefix = node.children.first().is_some_and(|c| !c.named);
                let operand = self.expr(argument);
                match super::to_target(operand) {
                    Some(target) => Expr::Update {
                        target: Box::new(target),
                        delta: if operator == "--" { -1 } else { 1 },
                        prefix,
                    },
                    None => cx.unsupported(node),
                }
            }
            "assignment_expression" => {
                let (Some(left), Some(right)) = (node.child("left"), node.child("right")) else {
                    return cx.unsupported(node);
                };
                let operator = node.child("operator").map(|o| cx.text(o)).unwrap_or("=");
                let op = if operator == "=" { None } else { BinOp::from_token(operator) };
                let value = if right.is("initializer_list") {
                    Expr::List(right.named_children().map(|i| self.expr(i)).collect())
                } else {
                    self.expr(right)
                };
                assign_expr(self.expr(left), op, value, cx.text(node))
            }
            "pointer_expression" => {
                let Some(argument) = node.child("argument") else {
                    return cx.unsupported(node);
                };
                let operand = Box::new(self.expr(argument));
                match node.child("operator").map(|o| cx.text(o)) {
                    Some("&") => Expr::AddrOf(operand),
                    _ => Expr::Deref(operand),
                }
            }
            "field_expression" => match (node.child("argument"), node.child("field")) {
                (Some(argument), Some(field)) => Expr::Field {
                    target: Box::new(self.expr(argument)),
                    name: cx.text(field).to_string(),
                },
                _ => cx.unsupported(node),
            },
            "subscript_expression" => {
                let index = node
                    .child("index")
                    .or_else(|| node.child("indices").and_then(|i| i.first_named()));
                match (node.child("argument"), index) {
                    (Some(argument), Some(index)) => Expr::Index {
                        target: Box::new(self.expr(argument)),
                        index: Box::new(self.expr(index)),
                    },
                    _ => cx.unsupported(node),
                }
            }
            "conditional_expression" => {
                match (node.child("condition"), node.child("consequence"), node.child("alternative")) {
                    (Some(cond), Some(then), Some(otherwise)) => Expr::Cond {
                        cond: Box::new(self.expr(cond)),
                        then: Box::new(self.expr(then)),
                        otherwise: Box::new(self.expr(otherwise)),
                    },
                    _ => cx.unsupported(node),
                }
            }
            "cast_expression" => {
                let hint = node
                    .child("type")
                    .map(|t| type_hint(cx.text(t), cx.language()))
                    .unwrap_or(TypeHint::Auto);
                match node.child("value") {
                    Some(value) => Expr::Cast {
                        hint,
                        value: Box::new(self.expr(value)),
                    },
                    None => cx.unsupported(node),
                }
            }
            "sizeof_expression" => self.size_of(node),
            "call_expression" => self.call(node),
            "initializer_list" => Expr::List(node.named_children().map(|i| self.expr(i)).collect()),
            "initializer_pair" => node.child("value").map_or_else(|| cx.unsupported(node), |v| self.expr(v)),
            "compound_literal_expression" => {
                let class = node.child("type").map(|t| base_type(cx.text(t))).unwrap_or_default();
                let args = node
                    .child("value")
                    .map(|v| v.named_children().map(|i| self.expr(i)).collect())
                    .unwrap_or_default();
                Expr::New { class, args }
            }
            "qualified_identifier" => self.qualified_value(node),
            "lambda_expression" => {
                let params = node
                    .child("declarator")
                    .and_then(|d| d.child("parameters"))
                    .map(|list| {
                        list.named_children()
                            .filter_map(|p| p.child("declarator"))
                            .filter_map(|d| symbols::declarator_name(cx.ast, d))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let body = node.child("body").map(|b| self.block(b)).unwrap_or_default();
                Expr::Lambda {
                    params,
                    body: Box::new(Expr::Block { body, tail: None }),
                }
            }
            "new_expression" => self.new_expr(node),
            "delete_expression" => Expr::Literal(Value::None),
            "template_function" => match node.child("name") {
                Some(name) => var(cx.text(name)),
                None => cx.unsupported(node),
            },
            _ => cx.unsupported(node),
        }
    }

    /// `(a, b)` evaluates both and yields the last.
    fn comma_value(&mut self, node: &AstNode) -> Expr {
        let mut exprs = self.comma_list(node);
        let line = self.cx.line(node);
        let tail = exprs.pop().unwrap_or(Expr::Literal(Value::None));
        Expr::Block {
            body: exprs.into_iter().map(|e| expr_stmt(line, e)).collect(),
            tail: Some(Box::new(tail)),
        }
    }

    fn binary(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let operator = node.child("operator").map(|o| cx.text(o)).unwrap_or("");
        let (Some(left), Some(right)) = (node.child("left"), node.child("right")) else {
            return cx.unsupported(node);
        };
        if self.cpp() && operator == "<<" {
            if let Some(args) = self.stream_chain(node, "<<", &["cout", "cerr", "clog"]) {
                return call("__cout", args);
            }
        }
        if self.cpp() && operator == ">>" && self.stream_chain(node, ">>", &["cin"]).is_some() {
            return call("__cin", Vec::new());
        }
        if operator == "/" && left.is("sizeof_expression") {
            if let Some(operand) = self.sizeof_operand(left) {
                return method(operand, "size", Vec::new());
            }
        }
        match operator {
            "&&" | "||" | "and" | "or" => Expr::Logical {
                and: matches!(operator, "&&" | "and"),
                left: Box::new(self.expr(left)),
                right: Box::new(self.expr(right)),
            },
            _ => match BinOp::from_token(operator) {
                Some(op) => Expr::Binary {
                    op,
                    left: Box::new(self.expr(left)),
                    right: Box::new(self.expr(right)),
                },
                None => cx.unsupported(node),
            },
        }
    }

    /// Operands of a `<<`/`>>` chain rooted at a standard stream, with
    /// stream manipulators turned into `__manip` markers.
    fn stream_chain(&mut self, node: &AstNode, operator: &str, streams: &[&str]) -> Option<Vec<Expr>> {
        let mut operands = Vec::new();
        let mut current = node;
        while current.is("binary_expression") && current.child("operator").is_some_and(|o| self.cx.text(o) == operator) {
            operands.push(current.child("right")?);
            current = current.child("left")?;
        }
        let root = self.cx.text(current);
        if !streams.contains(&symbols::simple_name(root)) {
            return None;
        }
        operands.reverse();
        let mut args = Vec::with_capacity(operands.len());
        for operand in operands {
            let text = symbols::simple_name(self.cx.text(operand));
            if text == "fixed" {
                args.push(call("__manip", vec![string("fixed")]));
                continue;
            }
            if operand.is("call_expression") {
                let callee = operand.child("function").map(|f| symbols::simple_name(self.cx.text(f)));
                if callee == Some("setprecision") {
                    let mut manip = vec![string("setprecision")];
                    if let Some(arg) = operand.child("arguments").and_then(|a| a.first_named()) {
                        manip.push(self.expr(arg));
                    }
                    args.push(call("__manip", manip));
                    continue;
                }
                if matches!(callee, Some("setw" | "setfill")) {
                    continue;
                }
            }
            args.push(self.expr(operand));
        }
        Some(args)
    }

    /// The array in `sizeof(a)`. A lone name in parentheses may parse as a
    /// type, so both forms are accepted.
    fn sizeof_operand(&mut self, node: &AstNode) -> Option<Expr> {
        if let Some(value) = node.child("value") {
            let inner = match value.raw_kind {
                "parenthesized_expression" => value.first_named()?,
                _ => value,
            };
            return Some(self.expr(inner));
        }
        let text = self.cx.text(node.child("type")?).trim();
        let is_name = text.chars().all(|c| c.is_alphanumeric() || c == '_');
        let is_type = self.classes.contains(text) || !matches!(type_hint(text, Language::C), TypeHint::Struct(_));
        (is_name && !is_type).then(|| var(text))
    }

    /// Type named by `sizeof(T)` or `sizeof(struct T)`.
    fn sizeof_type(&self, node: &AstNode) -> Option<&'a str> {
        let operand = match node.child("type") {
            Some(ty) => ty,
            None => {
                let value = node.child("value")?;
                match value.raw_kind {
                    "parenthesized_expression" => value.first_named()?,
                    _ => value,
                }
            }
        };
        Some(self.cx.text(operand).trim())
    }

    fn size_of(&mut self, node: &AstNode) -> Expr {
        if self.alloc_depth > 0 {
            return int(1);
        }
        match self.sizeof_type(node) {
            Some(text) if self.classes.contains(&base_type(text)) && !text.contains('*') => int(8),
            Some(text) if node.child("type").is_some() => int(type_size(text)),
            _ => int(4),
        }
    }

    /// `std::endl`, `Color::Red`, `Shape::count`.
    fn qualified_value(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let scope = node.child("scope").map(|s| strip_generics(cx.text(s))).unwrap_or_default();
        let Some(name) = node.child("name") else {
            return cx.unsupported(node);
        };
        if name.is("qualified_identifier") {
            // a::b::c
            let inner = self.qualified_value(name);
            return match inner {
                Expr::Path { qualifier, name } => Expr::Path {
                    qualifier: format!("{}::{}", scope, qualifier),
                    name,
                },
                other => other,
            };
        }
        let name = strip_generics(cx.text(name));
        if scope == "std" || scope.is_empty() {
            return var(name);
        }
        Expr::Path { qualifier: scope, name }
    }

    fn call(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let Some(function) = node.child("function") else {
            return cx.unsupported(node);
        };
        let callee_text = cx.text(function);
        let simple = symbols::simple_name(callee_text.split('<').next().unwrap_or(callee_text)).to_string();

        if callee_text.starts_with("numeric_limits") || callee_text.starts_with("std::numeric_limits") {
            return self.numeric_limit(callee_text).unwrap_or_else(|| cx.unsupported(node));
        }

        let arg_nodes: Vec<&AstNode> = node
            .child("arguments")
            .map(|a| a.named_children().collect())
            .unwrap_or_default();

        if matches!(simple.as_str(), "malloc" | "calloc" | "realloc") {
            if let Some(class) = self.allocated_struct(&arg_nodes) {
                return Expr::New { class, args: Vec::new() };
            }
            self.alloc_depth += 1;
            let args = arg_nodes.iter().map(|a| self.expr(a)).collect();
            self.alloc_depth -= 1;
            return call(simple, args);
        }

        let mut args: Vec<Expr> = arg_nodes
            .iter()
            .map(|a| {
                if a.is("initializer_list") {
                    Expr::Tuple(a.named_children().map(|i| self.expr(i)).collect())
                } else {
                    self.expr(a)
                }
            })
            .collect();

        match simple.as_str() {
            "strcpy" | "strncpy" if args.len() >= 2 => {
                let source = args.swap_remove(1);
                return assign_expr(args.swap_remove(0), None, source, cx.text(node));
            }
            "strcat" | "strncat" if args.len() >= 2 => {
                let source = args.swap_remove(1);
                return assign_expr(args.swap_remove(0), Some(BinOp::Add), source, cx.text(node));
            }
            // sort(a, a + n) over a plain array
            "sort" | "reverse" | "fill" | "accumulate" | "count" | "max_element" | "min_element" if args.len() >= 2 => {
                let array = match (&args[0], &args[1]) {
                    (Expr::Var(first), Expr::Binary { op: BinOp::Add, left, .. })
                        if matches!(left.as_ref(), Expr::Var(second) if second == first) =>
                    {
                        Some(first.clone())
                    }
                    _ => None,
                };
                if let Some(array) = array {
                    args[0] = method(var(array.clone()), "begin", Vec::new());
                    args[1] = method(var(array), "end", Vec::new());
                }
            }
            _ => {}
        }

        match function.raw_kind {
            "identifier" => call(simple, args),
            "field_expression" => match (function.child("argument"), function.child("field")) {
                (Some(receiver), Some(field)) => Expr::Method {
                    receiver: Box::new(self.expr(receiver)),
                    name: strip_generics(cx.text(field)),
                    args,
                    kwargs: Vec::new(),
                },
                _ => cx.unsupported(node),
            },
            "qualified_identifier" => {
                let scope = function.child("scope").map(|s| strip_generics(cx.text(s))).unwrap_or_default();
                let owner = base_type(&scope);
                if scope == "std" {
                    qualified_call("std", simple, args)
                } else if self.classes.contains(&owner) || owner.starts_with(char::is_uppercase) {
                    qualified_call(owner, simple, args)
                } else {
                    // namespace-qualified free function
                    call(simple, args)
                }
            }
            "template_function" => {
                let text = strip_generics(callee_text);
                let base = base_type(callee_text);
                if container_kind(&base).is_some() {
                    return self.constructed(callee_text, args);
                }
                if text.contains("::") && !text.starts_with("std::") {
                    let owner = text.rsplit_once("::").map(|(q, _)| base_type(q)).unwrap_or_default();
                    return qualified_call(owner, base, args);
                }
                call(base, args)
            }
            _ => cx.unsupported(node),
        }
    }

    /// `malloc(sizeof(struct Node))` allocates one struct.
    fn allocated_struct(&self, args: &[&AstNode]) -> Option<String> {
        let size = args.last()?;
        if !size.is("sizeof_expression") {
            return None;
        }
        let text = self.sizeof_type(size)?;
        let class = base_type(text);
        (self.classes.contains(&class) && !text.contains('*')).then_some(class)
    }

    fn numeric_limit(&self, callee: &str) -> Option<Expr> {
        let open = callee.find('<')?;
        let close = callee.rfind('>')?;
        let ty = callee.get(open + 1..close)?.trim();
        let max = callee.ends_with("max");
        let lowest = callee.ends_with("lowest");
        Some(match type_hint(ty, Language::Cpp) {
            TypeHint::Float => Expr::Literal(Value::Float(if max {
                f64::MAX
            } else if lowest {
                f64::MIN
            } else {
                f64::MIN_POSITIVE
            })),
            _ => {
                let (lo, hi) = match ty {
                    "long" | "long long" | "int64_t" | "long int" => (i64::MIN, i64::MAX),
                    "unsigned" | "unsigned int" | "uint32_t" => (0, u32::MAX as i64),
                    "short" => (i16::MIN as i64, i16::MAX as i64),
                    "char" => (i8::MIN as i64, i8::MAX as i64),
                    _ => (i32::MIN as i64, i32::MAX as i64),
                };
                int(if max { hi } else { lo })
            }
        })
    }

    fn new_expr(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let type_text = node.child("type").map(|t| cx.text(t)).unwrap_or("");
        if let Some(declarator) = node.child("declarator").filter(|d| d.is("new_declarator")) {
            let mut dims = Vec::new();
            let mut current = Some(declarator);
            while let Some(d) = current {
                if let Some(size) = d.named_children().find(|c| !c.is("new_declarator")) {
                    dims.push(self.expr(size));
                }
                current = d.named_children().find(|c| c.is("new_declarator"));
            }
            return Expr::Array {
                dims,
                hint: type_hint(type_text, cx.language()),
                init: None,
            };
        }
        let args: Vec<Expr> = node
            .child("arguments")
            .map(|a| a.named_children().map(|i| self.expr(i)).collect())
            .unwrap_or_default();
        let class = base_type(type_text);
        if self.classes.contains(&class) || class.starts_with(char::is_uppercase) {
            return Expr::New { class, args };
        }
        if container_kind(type_text).is_some() {
            return self.constructed(type_text, args);
        }
        // new int(5)
        args.into_iter()
            .next()
            .unwrap_or_else(|| zero_value(type_text, cx.language()))
    }
}

/// The declarator wrapped around a declared name.
struct DeclShape<'n> {
    pointer: bool,
    reference: bool,
    /// Array dimensions, outermost first; `None` for `[]`.
    dims: Vec<Option<&'n AstNode>>,
}

impl<'n> DeclShape<'n> {
    fn of(declarator: &'n AstNode) -> Self {
        let mut shape = DeclShape {
            pointer: false,
            reference: false,
            dims: Vec::new(),
        };
        let mut current = Some(declarator);
        while let Some(node) = current {
            match node.raw_kind {
                "pointer_declarator" | "abstract_pointer_declarator" => shape.pointer = true,
                "reference_declarator" => shape.reference = true,
                "array_declarator" => shape.dims.push(node.child("size")),
                "identifier" | "field_identifier" | "qualified_identifier" => break,
                _ => {}
            }
            current = node.child("declarator").or_else(|| node.first_named());
        }
        shape.dims.reverse();
        shape
    }

    fn hint(&self, type_text: &str, language: Language) -> TypeHint {
        if !self.dims.is_empty() {
            if type_text.trim_start_matches("const ").trim() == "char" && self.dims.len() == 1 {
                return TypeHint::Str;
            }
            return TypeHint::List;
        }
        if self.pointer {
            return type_hint(&format!("{}*", type_text), language);
        }
        type_hint(type_text, language)
    }
}

/// Zero value of a scalar or container type, as an expression.
fn zero_value(type_text: &str, language: Language) -> Expr {
    if let Some(kind) = container_kind(type_text) {
        return match kind {
            Container::Map => Expr::Dict(Vec::new()),
            Container::Pair => Expr::Tuple(element_types(type_text).iter().map(|t| zero_value(t, language)).collect()),
            _ => Expr::List(Vec::new()),
        };
    }
    Expr::Literal(match type_hint(type_text, language) {
        TypeHint::Int => Value::Int(0),
        TypeHint::Float => Value::Float(0.0),
        TypeHint::Bool => Value::Bool(false),
        TypeHint::Char => Value::Char('\0'),
        TypeHint::Str => Value::Str(String::new()),
        TypeHint::List => return Expr::List(Vec::new()),
        _ => Value::None,
    })
}

/// All template arguments of a type.
fn element_types(type_text: &str) -> Vec<&str> {
    let (Some(open), Some(close)) = (type_text.find('<'), type_text.rfind('>')) else {
        return Vec::new();
    };
    match type_text.get(open + 1..close) {
        Some(inner) => template_args(inner).into_iter().map(str::trim).collect(),
        None => Vec::new(),
    }
}

/// Split template arguments at top-level commas.
fn template_args(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '<' | '(' => depth += 1,
            '>' | ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn find_init_value(node: &AstNode) -> Option<&AstNode> {
    if node.is("init_declarator") {
        return node.child("value");
    }
    node.children.iter().find_map(find_init_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower_source(language: Language, source: &str) -> Program {
        let (ast, errors) = parse_source(language, "main.cpp", source);
        assert!(errors.is_empty(), "{:?}", errors);
        lower(&ast)
    }

    fn main_body(program: &Program) -> &Block {
        &program.functions.iter().find(|f| f.name == "main").unwrap().body
    }

    #[test]
    fn test_cout_chain_becomes_stream_call() {
        let program = lower_source(
            Language::Cpp,
            "#include <iostream>\nusing namespace std;\nint main() {\n    cout << fixed << setprecision(2) << 1.5 << endl;\n    return 0;\n}\n",
        );
        let StmtKind::Expr(Expr::Call { name, args, .. }) = &main_body(&program)[0].kind else {
            panic!("expected call");
        };
        assert_eq!(name, "__cout");
        assert_eq!(args.len(), 4);
        assert!(matches!(&args[0], Expr::Call { name, .. } if name == "__manip"));
        assert!(matches!(&args[1], Expr::Call { name, args, .. } if name == "__manip" && args.len() == 2));
    }

    #[test]
    fn test_vector_constructor_forms() {
        let program = lower_source(
            Language::Cpp,
            "#include <vector>\nint main() {\n    std::vector<int> a(5);\n    std::vector<int> b(3, 7);\n    std::vector<int> c = {1, 2};\n    return 0;\n}\n",
        );
        let body = main_body(&program);
        let values: Vec<&Expr> = body
            .iter()
            .filter_map(|s| match &s.kind {
                StmtKind::Declare { value: Some(v), copy, .. } => {
                    assert!(*copy);
                    Some(v)
                }
                _ => None,
            })
            .collect();
        assert!(matches!(values[0], Expr::Repeat { value, .. } if matches!(value.as_ref(), Expr::Literal(Value::Int(0)))));
        assert!(matches!(values[1], Expr::Repeat { value, .. } if matches!(value.as_ref(), Expr::Literal(Value::Int(7)))));
        assert!(matches!(values[2], Expr::List(items) if items.len() == 2));
    }

    #[test]
    fn test_struct_and_array_declarations() {
        let program = lower_source(
            Language::C,
            "struct Point { int x; int y; };\nint main(void) {\n    int grid[3][4];\n    struct Point p = {1, 2};\n    return 0;\n}\n",
        );
        let point = program.class("Point").unwrap();
        assert_eq!(point.fields.len(), 2);
        let body = main_body(&program);
        assert!(matches!(
            &body[0].kind,
            StmtKind::Declare { value: Some(Expr::Array { dims, .. }), hint: TypeHint::List, copy: false, .. } if dims.len() == 2
        ));
        assert!(matches!(
            &body[1].kind,
            StmtKind::Declare { value: Some(Expr::New { class, args }), .. } if class == "Point" && args.len() == 2
        ));
    }

    #[test]
    fn test_class_members_and_constructor() {
        let program = lower_source(
            Language::Cpp,
            "class Counter {\npublic:\n    Counter(int start) : value(start) {}\n    void bump() { value++; }\nprivate:\n    int value;\n};\n",
        );
        assert_eq!(program.class("Counter").unwrap().fields.len(), 1);
        let constructor = program.functions.iter().find(|f| f.name == "Counter").unwrap();
        assert_eq!(constructor.owner.as_deref(), Some("Counter"));
        assert!(matches!(&constructor.body[0].kind, StmtKind::Expr(Expr::Assign { .. })));
        let bump = program.functions.iter().find(|f| f.name == "bump").unwrap();
        assert!(!bump.takes_self);
        assert!(matches!(&bump.body[0].kind, StmtKind::Expr(Expr::Update { delta: 1, prefix: false, .. })));
    }

    #[test]
    fn test_reference_params_bind_by_ref() {
        let program = lower_source(Language::Cpp, "void inc(int& x, int y) { x += y; }\n");
        let inc = &program.functions[0];
        assert!(inc.params[0].by_ref);
        assert!(!inc.params[1].by_ref && inc.params[1].copy);
    }

    #[test]
    fn test_define_becomes_global() {
        let program = lower_source(Language::C, "#define SIZE 10\nint main(void) { return SIZE; }\n");
        assert!(matches!(
            &program.modules[0].body[0].kind,
            StmtKind::Declare { name, value: Some(Expr::Literal(Value::Int(10))), .. } if name == "SIZE"
        ));
    }

    #[test]
    fn test_sizeof_ratio_is_length() {
        let program = lower_source(
            Language::C,
            "int main(void) {\n    int a[] = {1, 2, 3};\n    int n = sizeof(a) / sizeof(a[0]);\n    return n;\n}\n",
        );
        let StmtKind::Declare { value: Some(value), .. } = &main_body(&program)[1].kind else {
            panic!("expected declaration");
        };
        assert!(matches!(value, Expr::Method { name, .. } if name == "size"));
    }

    #[test]
    fn test_malloc_struct_allocates_object() {
        let program = lower_source(
            Language::C,
            "#include <stdlib.h>\ntypedef struct Node { int v; struct Node* next; } Node;\nint main(void) {\n    Node* n = (Node*)malloc(sizeof(Node));\n    return 0;\n}\n",
        );
        let StmtKind::Declare { value: Some(Expr::Cast { value, .. }), .. } = &main_body(&program)[0].kind else {
            panic!("expected cast");
        };
        assert!(matches!(value.as_ref(), Expr::New { class, .. } if class == "Node"));
    }
}
