// Java lowering

use std::collections::{HashMap, HashSet};

use super::{
    assign_expr, base_type, call, char_literal, expr_stmt, float_literal, int_literal, method, not, qualified_call,
    string_literal, type_hint, var, Cx,
};
use crate::grammar::{Ast, AstNode, Language};
use crate::sandbox::ir::{
    BinOp, Block, Case, ClassDef, Expr, FieldDef, Function, Handler, MatchArm, ModuleCode, Param, Pattern, Program,
    Stmt, StmtKind, Target, TypeHint, UnaryOp,
};
use crate::sandbox::value::Value;

/// Library classes whose method references name static methods.
const STATIC_CLASSES: &[&str] = &[
    "Math", "Integer", "Long", "Double", "Character", "Arrays", "Collections", "Objects", "Boolean",
];

pub(super) fn lower(ast: &Ast) -> Program {
    let mut statics: HashMap<String, HashSet<String>> = HashMap::new();
    let mut static_methods: HashMap<String, HashSet<String>> = HashMap::new();
    ast.root.visit(&mut |node| {
        if !matches!(
            node.raw_kind,
            "class_declaration" | "enum_declaration" | "record_declaration" | "interface_declaration"
        ) {
            return;
        }
        let (Some(name), Some(body)) = (node.child("name"), node.child("body")) else {
            return;
        };
        let class = ast.text(name).to_string();
        let members = body
            .named_children()
            .flat_map(|m| if m.is("enum_body_declarations") { m.named_children().collect::<Vec<_>>() } else { vec![m] });
        for member in members {
            if !is_static(member) {
                continue;
            }
            match member.raw_kind {
                "field_declaration" => {
                    for declarator in member.children_by_field("declarator") {
                        if let Some(field) = declarator.child("name") {
                            statics.entry(class.clone()).or_default().insert(ast.text(field).to_string());
                        }
                    }
                }
                "method_declaration" => {
                    if let Some(method) = member.child("name") {
                        static_methods.entry(class.clone()).or_default().insert(ast.text(method).to_string());
                    }
                }
                _ => {}
            }
        }
    });

    let mut lowerer = JavaLowerer {
        cx: Cx::new(ast),
        program: Program::default(),
        statics,
        static_methods,
        class: None,
        base: None,
    };
    let mut body = Vec::new();
    for item in ast.root.named_children() {
        if matches!(item.raw_kind, "class_declaration" | "enum_declaration" | "record_declaration") {
            lowerer.class_like(item, &mut body);
        }
    }
    lowerer.program.modules.push(ModuleCode {
        file: ast.path.clone(),
        body,
    });
    lowerer.program
}

fn is_static(node: &AstNode) -> bool {
    node.child_of_kind("modifiers").is_some_and(|m| m.has_token("static"))
}

struct JavaLowerer<'a> {
    cx: Cx<'a>,
    program: Program,
    /// Static fields per class; these live in the global table.
    statics: HashMap<String, HashSet<String>>,
    static_methods: HashMap<String, HashSet<String>>,
    class: Option<String>,
    base: Option<String>,
}

impl<'a> JavaLowerer<'a> {
    // declarations

    fn class_like(&mut self, node: &AstNode, module: &mut Block) {
        let Some(name) = node.child("name").map(|n| self.cx.text(n).to_string()) else {
            return;
        };
        let base = node
            .child("superclass")
            .and_then(|s| s.first_named())
            .map(|b| base_type(self.cx.text(b)));
        let saved_class = self.class.replace(name.clone());
        let saved_base = std::mem::replace(&mut self.base, base.clone());

        let mut fields = Vec::new();
        let mut variants = Vec::new();
        if node.is("record_declaration") {
            for param in self.params(node) {
                let accessor = self.accessor(node, &name, &param.name);
                self.program.functions.push(accessor);
                fields.push(FieldDef {
                    name: param.name,
                    hint: param.hint,
                    init: None,
                });
            }
        }
        if let Some(body) = node.child("body") {
            for member in body.named_children() {
                match member.raw_kind {
                    "enum_constant" => {
                        if let Some(constant) = member.child("name") {
                            variants.push(self.cx.text(constant).to_string());
                        }
                    }
                    "enum_body_declarations" => self.members(member, &mut fields, module),
                    _ => {}
                }
            }
            self.members(body, &mut fields, module);
        }

        self.program.classes.push(ClassDef {
            name,
            base,
            fields,
            variants,
        });
        self.class = saved_class;
        self.base = saved_base;
    }

    /// Record component accessor: `p.x()`.
    fn accessor(&self, node: &AstNode, class: &str, field: &str) -> Function {
        let line = self.cx.line(node);
        let this_field = Expr::Field {
            target: Box::new(var("this")),
            name: field.to_string(),
        };
        Function {
            name: field.to_string(),
            qualified: format!("{}.{}", class, field),
            owner: Some(class.to_string()),
            file: self.cx.file(),
            line,
            end_line: line,
            params: Vec::new(),
            takes_self: false,
            is_static: false,
            body: vec![Stmt::new(line, StmtKind::Return(Some(this_field)))],
            tail: None,
            return_hint: TypeHint::Auto,
        }
    }

    fn members(&mut self, body: &AstNode, fields: &mut Vec<FieldDef>, module: &mut Block) {
        for member in body.named_children() {
            match member.raw_kind {
                "field_declaration" => {
                    let type_text = member.child("type").map(|t| self.cx.text(t)).unwrap_or("");
                    let shared = is_static(member);
                    for declarator in member.children_by_field("declarator") {
                        let Some(name) = declarator.child("name").map(|n| self.cx.text(n).to_string()) else {
                            continue;
                        };
                        let hint = self.declared_hint(type_text, declarator);
                        let value = declarator.child("value").map(|v| self.expr(v));
                        if shared {
                            module.push(self.cx.stmt(
                                declarator,
                                StmtKind::Declare {
                                    name,
                                    hint,
                                    value,
                                    copy: false,
                                },
                            ));
                        } else {
                            fields.push(FieldDef { name, hint, init: value });
                        }
                    }
                }
                "method_declaration" => {
                    if let Some(function) = self.method(member, false) {
                        self.program.functions.push(function);
                    }
                }
                "constructor_declaration" | "compact_constructor_declaration" => {
                    if let Some(function) = self.method(member, true) {
                        self.program.functions.push(function);
                    }
                }
                "class_declaration" | "enum_declaration" | "record_declaration" => self.class_like(member, module),
                "static_initializer" => {
                    if let Some(block) = member.first_named() {
                        module.extend(self.block(block));
                    }
                }
                _ => {}
            }
        }
    }

    fn declared_hint(&self, type_text: &str, declarator: &AstNode) -> TypeHint {
        if declarator.child("dimensions").is_some() {
            TypeHint::List
        } else {
            type_hint(type_text, Language::Java)
        }
    }

    fn params(&mut self, node: &AstNode) -> Vec<Param> {
        let Some(list) = node.child("parameters") else {
            return Vec::new();
        };
        let mut params = Vec::new();
        for param in list.named_children() {
            let name = match param.raw_kind {
                "formal_parameter" => param.child("name"),
                "spread_parameter" => param
                    .named_children()
                    .find(|c| c.is("variable_declarator"))
                    .and_then(|d| d.child("name")),
                _ => None,
            };
            let Some(name) = name else {
                continue;
            };
            let type_text = param.child("type").map(|t| self.cx.text(t)).unwrap_or("");
            let hint = if param.is("spread_parameter") || param.child("dimensions").is_some() {
                TypeHint::List
            } else {
                type_hint(type_text, Language::Java)
            };
            params.push(Param {
                name: self.cx.text(name).to_string(),
                hint,
                default: None,
                by_ref: false,
                copy: false,
            });
        }
        params
    }

    fn method(&mut self, node: &AstNode, constructor: bool) -> Option<Function> {
        let class = self.class.clone()?;
        let name = if constructor {
            class.clone()
        } else {
            self.cx.text(node.child("name")?).to_string()
        };
        let params = self.params(node);
        let body = node.child("body").map(|b| self.block(b)).unwrap_or_default();
        let return_hint = match node.child("type").map(|t| self.cx.text(t)) {
            Some(text) => type_hint(text, Language::Java),
            None => TypeHint::Auto,
        };
        Some(Function {
            qualified: format!("{}.{}", class, name),
            name,
            owner: Some(class),
            file: self.cx.file(),
            line: self.cx.line(node),
            end_line: self.cx.end_line(node),
            params,
            takes_self: false,
            is_static: is_static(node),
            body,
            tail: None,
            return_hint,
        })
    }

    // statements

    fn block(&mut self, node: &AstNode) -> Block {
        let mut out = Vec::new();
        for child in node.named_children() {
            self.stmt(child, &mut out);
        }
        out
    }

    fn body(&mut self, node: Option<&AstNode>) -> Block {
        match node {
            Some(node) if node.is("block") => self.block(node),
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
            "local_variable_declaration" => {
                self.local(node, out);
                return;
            }
            "expression_statement" => match node.first_named() {
                Some(inner) if inner.is("switch_expression") => self.switch_stmt(inner),
                Some(inner) => StmtKind::Expr(self.expr(inner)),
                None => return,
            },
            "explicit_constructor_invocation" => {
                let args = self.args(node);
                let target = node.child("constructor").map(|c| cx.text(c)).unwrap_or("super");
                let call = match (target, &self.base, &self.class) {
                    ("this", _, Some(class)) => qualified_call("this", class.clone(), args),
                    (_, Some(base), _) => qualified_call("super", base.clone(), args),
                    _ => return,
                };
                StmtKind::Expr(call)
            }
            "block" => StmtKind::Block(self.block(node)),
            "if_statement" => StmtKind::If {
                cond: self.condition(node.child("condition")),
                then: self.body(node.child("consequence")),
                otherwise: node.child("alternative").map(|alt| self.body(Some(alt))),
            },
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
                for part in node.children_by_field("init") {
                    if part.is("local_variable_declaration") {
                        self.local(part, &mut init);
                    } else {
                        init.push(expr_stmt(cx.line(part), self.expr(part)));
                    }
                }
                let cond = node.child("condition").map(|c| self.expr(c));
                let update = node.children_by_field("update").map(|u| self.expr(u)).collect();
                StmtKind::For {
                    init,
                    cond,
                    update,
                    body: self.body(node.child("body")),
                }
            }
            "enhanced_for_statement" => {
                let Some(name) = node.child("name") else {
                    out.push(cx.stmt(node, StmtKind::Unsupported(cx.snippet(node))));
                    return;
                };
                let iter = match node.child("value") {
                    Some(value) => self.expr(value),
                    None => cx.unsupported(node),
                };
                StmtKind::ForEach {
                    target: Target::Var(cx.text(name).to_string()),
                    iter,
                    body: self.body(node.child("body")),
                }
            }
            "return_statement" => StmtKind::Return(node.first_named().map(|v| self.expr(v))),
            "break_statement" => StmtKind::Break,
            "continue_statement" => StmtKind::Continue,
            "throw_statement" => StmtKind::Raise(node.first_named().map(|v| self.expr(v))),
            "switch_expression" | "switch_statement" => self.switch_stmt(node),
            "try_statement" | "try_with_resources_statement" => {
                let body = self.body(node.child("body"));
                let mut handlers = Vec::new();
                let mut finally = Vec::new();
                for clause in node.named_children() {
                    match clause.raw_kind {
                        "catch_clause" => handlers.push(self.handler(clause)),
                        "finally_clause" => {
                            if let Some(block) = clause.first_named() {
                                finally = self.block(block);
                            }
                        }
                        _ => {}
                    }
                }
                StmtKind::Try {
                    body,
                    handlers,
                    orelse: Vec::new(),
                    finally,
                }
            }
            "assert_statement" => {
                let mut parts = node.named_children();
                let cond = parts.next().map(|c| self.expr(c)).unwrap_or(Expr::Literal(Value::Bool(true)));
                let args = parts.next().map(|m| self.expr(m)).into_iter().collect();
                StmtKind::If {
                    cond: not(cond),
                    then: vec![cx.stmt(node, StmtKind::Raise(Some(call("AssertionError", args))))],
                    otherwise: None,
                }
            }
            "local_class_declaration" | "class_declaration" | "record_declaration" | "enum_declaration" => {
                let inner = if node.is("local_class_declaration") { node.first_named() } else { Some(node) };
                if let Some(inner) = inner {
                    self.class_like(inner, out);
                }
                return;
            }
            _ => StmtKind::Unsupported(cx.snippet(node)),
        };
        out.push(cx.stmt(node, kind));
    }

    fn local(&mut self, node: &AstNode, out: &mut Block) {
        let type_text = node.child("type").map(|t| self.cx.text(t)).unwrap_or("");
        for declarator in node.children_by_field("declarator") {
            let Some(name) = declarator.child("name").map(|n| self.cx.text(n).to_string()) else {
                continue;
            };
            let hint = self.declared_hint(type_text, declarator);
            let value = declarator.child("value").map(|v| self.expr(v));
            out.push(self.cx.stmt(
                declarator,
                StmtKind::Declare {
                    name,
                    hint,
                    value,
                    copy: false,
                },
            ));
        }
    }

    fn condition(&mut self, node: Option<&AstNode>) -> Expr {
        match node {
            Some(node) if node.is("parenthesized_expression") => match node.first_named() {
                Some(inner) => self.expr(inner),
                None => self.cx.unsupported(node),
            },
            Some(node) => self.expr(node),
            None => Expr::Literal(Value::Bool(true)),
        }
    }

    fn handler(&mut self, clause: &AstNode) -> Handler {
        let param = clause.named_children().find(|c| c.is("catch_formal_parameter"));
        let kinds = param
            .and_then(|p| p.named_children().find(|c| c.is("catch_type")))
            .map(|types| types.named_children().map(|t| base_type(self.cx.text(t))).collect())
            .unwrap_or_default();
        let binding = param.and_then(|p| p.child("name")).map(|n| self.cx.text(n).to_string());
        Handler {
            kinds,
            binding,
            body: self.body(clause.child("body")),
        }
    }

    /// Statement switch: classic groups fall through, arrow rules do not.
    fn switch_stmt(&mut self, node: &AstNode) -> StmtKind {
        let value = self.condition(node.child("condition"));
        let mut cases = Vec::new();
        let mut fallthrough = true;
        if let Some(block) = node.child("body") {
            for entry in block.named_children() {
                match entry.raw_kind {
                    "switch_block_statement_group" => {
                        let mut labels = Vec::new();
                        let mut is_default = false;
                        let mut body = Vec::new();
                        for child in entry.named_children() {
                            if child.is("switch_label") {
                                is_default |= child.first_named().is_none();
                                labels.extend(child.named_children().map(|l| self.expr(l)));
                            } else {
                                self.stmt(child, &mut body);
                            }
                        }
                        if is_default {
                            labels.clear();
                        }
                        cases.push(Case { labels, body });
                    }
                    "switch_rule" => {
                        fallthrough = false;
                        let mut labels = Vec::new();
                        let mut body = Vec::new();
                        for child in entry.named_children() {
                            if child.is("switch_label") {
                                labels.extend(child.named_children().map(|l| self.expr(l)));
                            } else if child.is("block") {
                                body.extend(self.block(child));
                            } else {
                                self.stmt(child, &mut body);
                            }
                        }
                        cases.push(Case { labels, body });
                    }
                    _ => {}
                }
            }
        }
        StmtKind::Switch {
            value,
            cases,
            fallthrough,
        }
    }

    /// Switch in expression position: arrow rules become match arms.
    fn switch_expr(&mut self, node: &AstNode) -> Expr {
        let value = self.condition(node.child("condition"));
        let mut arms = Vec::new();
        let Some(block) = node.child("body") else {
            return self.cx.unsupported(node);
        };
        for entry in block.named_children() {
            if !entry.is("switch_rule") {
                return self.cx.unsupported(entry);
            }
            let mut patterns = Vec::new();
            let mut body = None;
            for child in entry.named_children() {
                match child.raw_kind {
                    "switch_label" => {
                        if child.first_named().is_none() {
                            patterns.push(Pattern::Wildcard);
                        }
                        for label in child.named_children() {
                            patterns.push(self.label_pattern(label));
                        }
                    }
                    "expression_statement" => body = child.first_named().map(|e| self.expr(e)),
                    "block" => body = Some(self.yielding_block(child)),
                    "throw_statement" => {
                        let mut stmts = Vec::new();
                        self.stmt(child, &mut stmts);
                        body = Some(Expr::Block { body: stmts, tail: None });
                    }
                    _ => body = Some(self.expr(child)),
                }
            }
            arms.push(MatchArm {
                patterns,
                guard: None,
                body: body.unwrap_or(Expr::Literal(Value::None)),
            });
        }
        Expr::Match {
            value: Box::new(value),
            arms,
        }
    }

    fn label_pattern(&mut self, label: &AstNode) -> Pattern {
        match self.expr(label) {
            Expr::Literal(value) => Pattern::Literal(value),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => match *operand {
                Expr::Literal(Value::Int(i)) => Pattern::Literal(Value::Int(-i)),
                Expr::Literal(Value::Float(f)) => Pattern::Literal(Value::Float(-f)),
                _ => Pattern::Wildcard,
            },
            _ => Pattern::Variant {
                name: base_type(self.cx.text(label)),
                inner: Vec::new(),
            },
        }
    }

    /// `{ ...; yield v; }` in a switch rule.
    fn yielding_block(&mut self, node: &AstNode) -> Expr {
        let mut body = Vec::new();
        let mut tail = None;
        for child in node.named_children() {
            if child.is("yield_statement") {
                tail = child.first_named().map(|v| Box::new(self.expr(v)));
                break;
            }
            self.stmt(child, &mut body);
        }
        Expr::Block { body, tail }
    }

    // expressions

    fn args(&mut self, node: &AstNode) -> Vec<Expr> {
        node.child("arguments")
            .map(|a| a.named_children().map(|arg| self.expr(arg)).collect())
            .unwrap_or_default()
    }

    fn expr(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        match node.raw_kind {
            "identifier" => var(cx.text(node)),
            "this" | "super" => var("this"),
            "decimal_integer_literal" | "hex_integer_literal" | "octal_integer_literal" | "binary_integer_literal" => {
                match int_literal(cx.text(node), true) {
                    Some(i) => Expr::Literal(Value::Int(i)),
                    None => cx.unsupported(node),
                }
            }
            "decimal_floating_point_literal" | "hex_floating_point_literal" => match float_literal(cx.text(node)) {
                Some(f) => Expr::Literal(Value::Float(f)),
                None => cx.unsupported(node),
            },
            "true" => Expr::Literal(Value::Bool(true)),
            "false" => Expr::Literal(Value::Bool(false)),
            "null_literal" => Expr::Literal(Value::None),
            "character_literal" => Expr::Literal(char_literal(cx.text(node))),
            "string_literal" => {
                let text = cx.text(node);
                let value = string_literal(text);
                // text blocks drop the newline after the opening quotes
                let value = match text.starts_with("\"\"\"") {
                    true => value.strip_prefix('\n').map(str::to_string).unwrap_or(value),
                    false => value,
                };
                Expr::Literal(Value::Str(value))
            }
            "text_block" => {
                let value = string_literal(cx.text(node));
                Expr::Literal(Value::Str(value.strip_prefix('\n').map(str::to_string).unwrap_or(value)))
            }
            "parenthesized_expression" => match node.first_named() {
                Some(inner) => self.expr(inner),
                None => cx.unsupported(node),
            },
            "binary_expression" => {
                let operator = node.child("operator").map(|o| cx.text(o)).unwrap_or("");
                let (Some(left), Some(right)) = (node.child("left"), node.child("right")) else {
                    return cx.unsupported(node);
                };
                match operator {
                    "&&" | "||" => Expr::Logical {
                        and: operator == "&&",
                        left: Box::new(self.expr(left)),
                        right: Box::new(self.expr(right)),
                    },
                    // unsigned shift behaves like `>>` on the non-negative
                    // values programs use it with
                    ">>>" => Expr::Binary {
                        op: BinOp::Shr,
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
            "unary_expression" => {
                let op = match node.child("operator").map(|o| cx.text(o)) {
                    Some("!") => UnaryOp::Not,
                    Some("-") => UnaryOp::Neg,
                    Some("+") => UnaryOp::Plus,
                    Some("~") => UnaryOp::BitNot,
                    _ => return cx.unsupported(node),
                };
                match node.child("operand") {
                    Some(operand) => Expr::Unary {
                        op,
                        operand: Box::new(self.expr(operand)),
                    },
                    None => cx.unsupported(node),
                }
            }
            "update_expression" => {
                let Some(operand) = node.first_named() else {
                    return cx.unsupported(node);
                };
                let prefix = node.children.first().is_some_and(|c| !c.named);
                let delta = if node.has_token("--") { -1 } else { 1 };
                match super::to_target(self.expr(operand)) {
                    Some(target) => Expr::Update {
                        target: Box::new(target),
                        delta,
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
                let op = match operator {
                    "=" => None,
                    ">>>=" => Some(BinOp::Shr),
                    other => BinOp::from_token(other),
                };
                let value = self.expr(right);
                assign_expr(self.expr(left), op, value, cx.text(node))
            }
            "ternary_expression" => {
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
                    .map(|t| type_hint(cx.text(t), Language::Java))
                    .unwrap_or(TypeHint::Auto);
                match node.child("value") {
                    Some(value) => Expr::Cast {
                        hint,
                        value: Box::new(self.expr(value)),
                    },
                    None => cx.unsupported(node),
                }
            }
            "method_invocation" => self.invocation(node),
            "field_access" => self.field_access(node),
            "array_access" => match (node.child("array"), node.child("index")) {
                (Some(array), Some(index)) => Expr::Index {
                    target: Box::new(self.expr(array)),
                    index: Box::new(self.expr(index)),
                },
                _ => cx.unsupported(node),
            },
            "object_creation_expression" => {
                if node.child_of_kind("class_body").is_some() {
                    return cx.unsupported(node);
                }
                let class = node.child("type").map(|t| base_type(cx.text(t))).unwrap_or_default();
                let args = self.args(node);
                Expr::New { class, args }
            }
            "array_creation_expression" => {
                let dims = node
                    .named_children()
                    .filter(|c| c.is("dimensions_expr"))
                    .filter_map(|d| d.first_named())
                    .map(|d| self.expr(d))
                    .collect::<Vec<_>>();
                let init = node.child("value").map(|v| Box::new(self.expr(v)));
                if dims.is_empty() {
                    if let Some(init) = init {
                        return *init;
                    }
                }
                let hint = node
                    .child("type")
                    .map(|t| type_hint(cx.text(t), Language::Java))
                    .unwrap_or(TypeHint::Auto);
                Expr::Array { dims, hint, init }
            }
            "array_initializer" => Expr::List(node.named_children().map(|i| self.expr(i)).collect()),
            "lambda_expression" => self.lambda(node),
            "method_reference" => self.method_reference(node),
            "switch_expression" => self.switch_expr(node),
            _ => cx.unsupported(node),
        }
    }

    fn invocation(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let Some(name) = node.child("name").map(|n| cx.text(n).to_string()) else {
            return cx.unsupported(node);
        };
        let args = self.args(node);
        match node.child("object") {
            None => call(name, args),
            Some(object) if object.is("super") => qualified_call("super", name, args),
            Some(object) => Expr::Method {
                receiver: Box::new(self.expr(object)),
                name,
                args,
                kwargs: Vec::new(),
            },
        }
    }

    fn field_access(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let (Some(object), Some(field)) = (node.child("object"), node.child("field")) else {
            return cx.unsupported(node);
        };
        let field = cx.text(field).to_string();
        if object.is("identifier") {
            let owner = cx.text(object);
            if self.statics.get(owner).is_some_and(|fields| fields.contains(&field)) {
                return var(field);
            }
        }
        Expr::Field {
            target: Box::new(self.expr(object)),
            name: field,
        }
    }

    fn lambda(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let params = match node.child("parameters") {
            Some(p) if p.is("identifier") => vec![cx.text(p).to_string()],
            Some(p) => p
                .named_children()
                .filter_map(|param| match param.raw_kind {
                    "identifier" => Some(cx.text(param).to_string()),
                    _ => param.child("name").map(|n| cx.text(n).to_string()),
                })
                .collect(),
            None => Vec::new(),
        };
        let body = match node.child("body") {
            Some(body) if body.is("block") => Expr::Block {
                body: self.block(body),
                tail: None,
            },
            Some(body) => self.expr(body),
            None => return cx.unsupported(node),
        };
        Expr::Lambda {
            params,
            body: Box::new(body),
        }
    }

    /// `Integer::compare`, `String::length`, `System.out::println`,
    /// `ArrayList::new`.
    fn method_reference(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let parts: Vec<&AstNode> = node.named_children().collect();
        let Some(target) = parts.first() else {
            return cx.unsupported(node);
        };
        let (a, b) = (var("__a"), var("__b"));
        let params = vec!["__a".to_string(), "__b".to_string()];
        let lambda = |body: Expr| Expr::Lambda {
            params: params.clone(),
            body: Box::new(body),
        };

        if node.has_token("new") {
            let class = base_type(cx.text(target));
            return lambda(Expr::New { class, args: Vec::new() });
        }
        let Some(name) = parts.get(1).map(|n| cx.text(n).to_string()) else {
            return cx.unsupported(node);
        };

        let target_text = cx.text(target);
        let is_type = matches!(target.raw_kind, "type_identifier" | "generic_type" | "scoped_type_identifier")
            || (target.is("identifier") && target_text.starts_with(char::is_uppercase));
        if !is_type {
            let receiver = self.expr(target);
            return lambda(method(receiver, name, vec![a]));
        }

        let class = base_type(target_text);
        let binary = matches!(name.as_str(), "sum" | "max" | "min" | "compare");
        let user_static = self.static_methods.get(&class).is_some_and(|m| m.contains(&name));
        let library_static = STATIC_CLASSES.contains(&class.as_str())
            || (class == "String" && matches!(name.as_str(), "valueOf" | "join" | "format"));
        if user_static || library_static {
            let args = if binary { vec![a, b] } else { vec![a] };
            return lambda(qualified_call(class, name, args));
        }
        // unbound instance method: the first argument is the receiver
        let args = match name.as_str() {
            "compareTo" | "compareToIgnoreCase" | "equals" | "concat" => vec![b],
            _ => Vec::new(),
        };
        lambda(method(a, name, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_source;

    fn lower_source(source: &str) -> Program {
        let (ast, errors) = parse_source(Language::Java, "Main.java", source);
        assert!(errors.is_empty(), "{:?}", errors);
        lower(&ast)
    }

    #[test]
    fn test_static_fields_become_globals() {
        let program = lower_source(
            "public class Main {\n    static int count = 0;\n    int id;\n    public static void main(String[] args) {\n        Main.count++;\n    }\n}\n",
        );
        let class = program.class("Main").unwrap();
        assert_eq!(class.fields.len(), 1);
        assert!(matches!(&program.modules[0].body[0].kind, StmtKind::Declare { name, .. } if name == "count"));
        let main = program.functions.iter().find(|f| f.name == "main").unwrap();
        assert!(main.is_static && main.is_entry());
        assert!(matches!(
            &main.body[0].kind,
            StmtKind::Expr(Expr::Update { target, .. }) if matches!(target.as_ref(), Target::Var(n) if n == "count")
        ));
    }

    #[test]
    fn test_constructor_and_super_call() {
        let program = lower_source(
            "class Animal {\n    String name;\n    Animal(String name) { this.name = name; }\n}\nclass Dog extends Animal {\n    Dog(String name) { super(name); }\n}\n",
        );
        assert_eq!(program.class("Dog").unwrap().base.as_deref(), Some("Animal"));
        let dog = program
            .functions
            .iter()
            .find(|f| f.name == "Dog" && f.owner.as_deref() == Some("Dog"))
            .unwrap();
        assert!(matches!(
            &dog.body[0].kind,
            StmtKind::Expr(Expr::Call { name, qualifier: Some(q), .. }) if name == "Animal" && q == "super"
        ));
    }

    #[test]
    fn test_switch_styles() {
        let program = lower_source(
            "class Main {\n    static int f(int x) {\n        switch (x) {\n            case 1: return 10;\n            default: return 0;\n        }\n    }\n    static int g(int x) {\n        switch (x) {\n            case 1 -> { return 1; }\n            default -> { return 2; }\n        }\n    }\n}\n",
        );
        let f = program.functions.iter().find(|f| f.name == "f").unwrap();
        assert!(matches!(&f.body[0].kind, StmtKind::Switch { fallthrough: true, cases, .. } if cases.len() == 2 && cases[1].labels.is_empty()));
        let g = program.functions.iter().find(|f| f.name == "g").unwrap();
        assert!(matches!(&g.body[0].kind, StmtKind::Switch { fallthrough: false, .. }));
    }

    #[test]
    fn test_enum_variants() {
        let program = lower_source("enum Color { RED, GREEN, BLUE }\n");
        assert_eq!(program.class("Color").unwrap().variants, vec!["RED", "GREEN", "BLUE"]);
    }

    #[test]
    fn test_method_reference_forms() {
        let program = lower_source(
            "import java.util.*;\nclass Main {\n    static void run(List<Integer> xs) {\n        xs.stream().reduce(0, Integer::sum);\n        xs.forEach(System.out::println);\n    }\n}\n",
        );
        let run = &program.functions[0];
        let StmtKind::Expr(Expr::Method { args, .. }) = &run.body[0].kind else {
            panic!("expected method call");
        };
        let Expr::Lambda { body, .. } = &args[1] else {
            panic!("expected lambda");
        };
        assert!(matches!(body.as_ref(), Expr::Call { name, qualifier: Some(q), args, .. } if name == "sum" && q == "Integer" && args.len() == 2));
        let StmtKind::Expr(Expr::Method { args, .. }) = &run.body[1].kind else {
            panic!("expected method call");
        };
        assert!(matches!(&args[0], Expr::Lambda { body, .. } if matches!(body.as_ref(), Expr::Method { name, .. } if name == "println")));
    }

    #[test]
    fn test_array_creation() {
        let program = lower_source(
            "class Main {\n    static void f() {\n        int[][] grid = new int[3][4];\n        int[] xs = {1, 2};\n    }\n}\n",
        );
        let f = &program.functions[0];
        assert!(matches!(
            &f.body[0].kind,
            StmtKind::Declare { hint: TypeHint::List, value: Some(Expr::Array { dims, hint: TypeHint::Int, .. }), .. } if dims.len() == 2
        ));
        assert!(matches!(&f.body[1].kind, StmtKind::Declare { value: Some(Expr::List(items)), .. } if items.len() == 2));
    }
}
