// Python lowering

use super::{assign, call, float_literal, int_literal, method, not, string_literal, to_target, unescape, var, Cx};
use crate::grammar::symbols;
use crate::grammar::{Ast, AstNode};
use crate::sandbox::ir::{
    BinOp, Block, ClassDef, CompClause, Expr, FieldDef, FormatPart, Function, Handler, ModuleCode, Param, Program,
    Stmt, StmtKind, Target, TypeHint, UnaryOp,
};
use crate::sandbox::value::Value;

pub(super) fn lower(ast: &Ast) -> Program {
    let mut lowerer = PyLowerer {
        cx: Cx::new(ast),
        program: Program::default(),
    };
    let mut body = Vec::new();
    for node in ast.root.named_children() {
        match node.raw_kind {
            "function_definition" => {
                let function = lowerer.function(node, None, &[]);
                lowerer.program.functions.push(function);
            }
            "decorated_definition" => lowerer.decorated(node, None),
            "class_definition" => lowerer.class(node),
            _ => lowerer.stmt(node, &mut body),
        }
    }
    lowerer.program.modules.push(ModuleCode {
        file: ast.path.clone(),
        body,
    });
    lowerer.program
}

struct PyLowerer<'a> {
    cx: Cx<'a>,
    program: Program,
}

impl<'a> PyLowerer<'a> {
    // definitions

    fn decorated(&mut self, node: &AstNode, owner: Option<&str>) {
        let decorators: Vec<&str> = node
            .children
            .iter()
            .filter(|c| c.is("decorator"))
            .map(|c| self.cx.text(c).trim_start_matches('@').trim())
            .collect();
        let Some(definition) = node.child("definition") else {
            return;
        };
        match definition.raw_kind {
            "function_definition" => {
                let function = self.function(definition, owner, &decorators);
                self.program.functions.push(function);
            }
            "class_definition" => self.class(definition),
            _ => {}
        }
    }

    fn function(&mut self, node: &AstNode, owner: Option<&str>, decorators: &[&str]) -> Function {
        let name = node.child("name").map(|n| self.cx.text(n)).unwrap_or("<anonymous>").to_string();
        let is_static = decorators.iter().any(|d| matches!(*d, "staticmethod" | "classmethod"));
        let binds_receiver = owner.is_some() && !decorators.contains(&"staticmethod");

        let mut sites = symbols::parameters(self.cx.ast, node);
        if binds_receiver && !sites.is_empty() {
            sites.remove(0);
        }
        let params = sites
            .into_iter()
            .map(|site| Param {
                name: site.name,
                hint: TypeHint::Auto,
                default: site.default.map(|d| self.expr(d)),
                by_ref: false,
                copy: false,
            })
            .collect();

        let body = node.child("body").map(|b| self.block(b)).unwrap_or_default();
        Function {
            qualified: match owner {
                Some(owner) => format!("{}.{}", owner, name),
                None => name.clone(),
            },
            name,
            owner: owner.map(str::to_string),
            file: self.cx.file(),
            line: self.cx.line(node),
            end_line: self.cx.end_line(node),
            params,
            takes_self: owner.is_some() && !is_static,
            is_static,
            body,
            tail: None,
            return_hint: TypeHint::Auto,
        }
    }

    fn class(&mut self, node: &AstNode) {
        let Some(name) = node.child("name").map(|n| self.cx.text(n).to_string()) else {
            return;
        };
        let base = node
            .child("superclasses")
            .and_then(|list| list.named_children().find(|c| c.is("identifier") || c.is("attribute")))
            .map(|b| symbols::simple_name(self.cx.text(b)).to_string())
            .filter(|b| b != "object");

        let mut fields = Vec::new();
        if let Some(body) = node.child("body") {
            for member in body.named_children() {
                match member.raw_kind {
                    "function_definition" => {
                        let function = self.function(member, Some(&name), &[]);
                        self.program.functions.push(function);
                    }
                    "decorated_definition" => self.decorated(member, Some(&name)),
                    "class_definition" => self.class(member),
                    "expression_statement" => {
                        let Some(assignment) = member.first_named().filter(|n| n.is("assignment")) else {
                            continue;
                        };
                        let Some(left) = assignment.child("left").filter(|l| l.is("identifier")) else {
                            continue;
                        };
                        fields.push(FieldDef {
                            name: self.cx.text(left).to_string(),
                            hint: TypeHint::Auto,
                            init: assignment.child("right").map(|r| self.expr(r)),
                        });
                    }
                    _ => {}
                }
            }
        }
        self.program.classes.push(ClassDef {
            name,
            base,
            fields,
            variants: Vec::new(),
        });
    }

    // statements

    fn block(&mut self, node: &AstNode) -> Block {
        let mut out = Vec::new();
        for child in node.named_children() {
            self.stmt(child, &mut out);
        }
        out
    }

    fn stmt(&mut self, node: &AstNode, out: &mut Block) {
        let cx = self.cx;
        let kind = match node.raw_kind {
            "expression_statement" => {
                let children: Vec<&AstNode> = node.named_children().collect();
                let expr = match children.as_slice() {
                    [single] if single.is("assignment") => match self.assignment(single) {
                        Some(expr) => expr,
                        None => return,
                    },
                    [single] if single.is("augmented_assignment") => self.augmented(single),
                    [single] => self.expr(single),
                    many => Expr::Tuple(many.iter().map(|c| self.expr(c)).collect()),
                };
                StmtKind::Expr(expr)
            }
            "return_statement" => StmtKind::Return(node.first_named().map(|v| self.expr(v))),
            "if_statement" => self.if_stmt(node),
            "while_statement" => {
                let cond = self.child_expr(node, "condition");
                let body = self.child_block(node, "body");
                if let Some(alternative) = node.child("alternative") {
                    out.push(cx.stmt(node, StmtKind::While { cond, body }));
                    out.push(cx.stmt(alternative, StmtKind::Unsupported("while ... else".to_string())));
                    return;
                }
                StmtKind::While { cond, body }
            }
            "for_statement" => {
                let target = node
                    .child("left")
                    .and_then(|l| self.target(l))
                    .unwrap_or_else(|| Target::Var("_".to_string()));
                let iter = self.child_expr(node, "right");
                let body = self.child_block(node, "body");
                if let Some(alternative) = node.child("alternative") {
                    out.push(cx.stmt(node, StmtKind::ForEach { target, iter, body }));
                    out.push(cx.stmt(alternative, StmtKind::Unsupported("for ... else".to_string())));
                    return;
                }
                StmtKind::ForEach { target, iter, body }
            }
            "try_statement" => self.try_stmt(node),
            "raise_statement" => {
                let raised = node.named_children().find(|c| c.field != Some("cause"));
                StmtKind::Raise(raised.map(|r| self.expr(r)))
            }
            "pass_statement" => StmtKind::Pass,
            "break_statement" => StmtKind::Break,
            "continue_statement" => StmtKind::Continue,
            "global_statement" => StmtKind::Global(
                node.named_children()
                    .filter(|c| c.is("identifier"))
                    .map(|c| cx.text(c).to_string())
                    .collect(),
            ),
            "nonlocal_statement" | "import_statement" | "import_from_statement" | "future_import_statement" => return,
            "assert_statement" => {
                let mut parts = node.named_children();
                let cond = parts.next().map(|c| self.expr(c)).unwrap_or(Expr::Literal(Value::Bool(true)));
                let args: Vec<Expr> = parts.next().map(|m| self.expr(m)).into_iter().collect();
                let raise = cx.stmt(node, StmtKind::Raise(Some(call("AssertionError", args))));
                StmtKind::If {
                    cond: not(cond),
                    then: vec![raise],
                    otherwise: None,
                }
            }
            "delete_statement" => {
                let Some(targets) = node.first_named() else {
                    return;
                };
                let targets: Vec<&AstNode> = if targets.is("expression_list") {
                    targets.named_children().collect()
                } else {
                    vec![targets]
                };
                for target in targets {
                    if let (true, Some(value), Some(index)) =
                        (target.is("subscript"), target.child("value"), target.child("subscript"))
                    {
                        let expr = method(self.expr(value), "pop", vec![self.expr(index)]);
                        out.push(cx.stmt(target, StmtKind::Expr(expr)));
                    }
                }
                return;
            }
            "function_definition" => {
                self.nested_function(node, out);
                return;
            }
            "decorated_definition" => {
                match node.child("definition") {
                    Some(def) if def.is("function_definition") => self.nested_function(def, out),
                    Some(def) if def.is("class_definition") => self.class(def),
                    _ => {}
                }
                return;
            }
            "class_definition" => {
                self.class(node);
                return;
            }
            "block" => {
                for child in node.named_children() {
                    self.stmt(child, out);
                }
                return;
            }
            _ => StmtKind::Unsupported(cx.snippet(node)),
        };
        out.push(cx.stmt(node, kind));
    }

    /// A `def` inside a function becomes a closure bound to its name. The
    /// name is declared first so the body can call itself.
    fn nested_function(&mut self, node: &AstNode, out: &mut Block) {
        let function = self.function(node, None, &[]);
        let line = self.cx.line(node);
        out.push(Stmt::new(
            line,
            StmtKind::Declare {
                name: function.name.clone(),
                hint: TypeHint::Auto,
                value: None,
                copy: false,
            },
        ));
        let lambda = Expr::Lambda {
            params: function.params.iter().map(|p| p.name.clone()).collect(),
            body: Box::new(Expr::Block {
                body: function.body,
                tail: None,
            }),
        };
        out.push(Stmt::new(line, StmtKind::Expr(assign(Target::Var(function.name), lambda))));
    }

    fn if_stmt(&mut self, node: &AstNode) -> StmtKind {
        let cond = self.child_expr(node, "condition");
        let then = self.child_block(node, "consequence");
        let alternatives: Vec<&AstNode> = node.children_by_field("alternative").collect();
        let mut otherwise: Option<Block> = None;
        for alternative in alternatives.into_iter().rev() {
            otherwise = match alternative.raw_kind {
                "else_clause" => Some(self.child_block(alternative, "body")),
                "elif_clause" => {
                    let cond = self.child_expr(alternative, "condition");
                    let then = self.child_block(alternative, "consequence");
                    Some(vec![self.cx.stmt(
                        alternative,
                        StmtKind::If {
                            cond,
                            then,
                            otherwise: otherwise.take(),
                        },
                    )])
                }
                _ => otherwise,
            };
        }
        StmtKind::If { cond, then, otherwise }
    }

    fn try_stmt(&mut self, node: &AstNode) -> StmtKind {
        let body = self.child_block(node, "body");
        let mut handlers = Vec::new();
        let mut orelse = Vec::new();
        let mut finally = Vec::new();
        for clause in node.named_children() {
            match clause.raw_kind {
                "except_clause" => handlers.push(self.handler(clause)),
                "else_clause" => orelse = self.child_block(clause, "body"),
                "finally_clause" => {
                    if let Some(block) = clause.named_children().find(|c| c.is("block")) {
                        finally = self.block(block);
                    }
                }
                _ => {}
            }
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finally,
        }
    }

    fn handler(&mut self, clause: &AstNode) -> Handler {
        let parts: Vec<&AstNode> = clause.named_children().filter(|c| !c.is("block")).collect();
        let (kind_node, binding) = match parts.as_slice() {
            [pattern] if pattern.is("as_pattern") => {
                let value = pattern.first_named();
                let alias = pattern
                    .child("alias")
                    .or_else(|| pattern.named_children().nth(1))
                    .map(|a| self.cx.text(a).to_string());
                (value, alias)
            }
            [value, alias, ..] => (Some(*value), Some(self.cx.text(alias).to_string())),
            [value] => (Some(*value), None),
            [] => (None, None),
        };
        let kinds = match kind_node {
            Some(kinds) if kinds.is("tuple") || kinds.is("parenthesized_expression") => kinds
                .named_children()
                .map(|k| symbols::simple_name(self.cx.text(k)).to_string())
                .collect(),
            Some(kind) => vec![symbols::simple_name(self.cx.text(kind)).to_string()],
            None => Vec::new(),
        };
        let body = clause
            .named_children()
            .find(|c| c.is("block"))
            .map(|b| self.block(b))
            .unwrap_or_default();
        Handler { kinds, binding, body }
    }

    fn assignment(&mut self, node: &AstNode) -> Option<Expr> {
        let left = node.child("left")?;
        let right = node.child("right")?;
        let value = match right.raw_kind {
            "assignment" => self.assignment(right)?,
            "augmented_assignment" => self.augmented(right),
            _ => self.expr(right),
        };
        Some(match self.target(left) {
            Some(target) => assign(target, value),
            None => self.cx.unsupported(node),
        })
    }

    fn augmented(&mut self, node: &AstNode) -> Expr {
        let op = node.child("operator").and_then(|o| BinOp::from_token(self.cx.text(o)));
        let (Some(left), Some(right), Some(op)) = (node.child("left"), node.child("right"), op) else {
            return self.cx.unsupported(node);
        };
        let value = self.expr(right);
        match self.target(left) {
            Some(target) => Expr::Assign {
                target: Box::new(target),
                op: Some(op),
                value: Box::new(value),
            },
            None => self.cx.unsupported(node),
        }
    }

    fn target(&mut self, node: &AstNode) -> Option<Target> {
        to_target(self.expr(node))
    }

    fn child_expr(&mut self, node: &AstNode, field: &str) -> Expr {
        match node.child(field) {
            Some(child) => self.expr(child),
            None => self.cx.unsupported(node),
        }
    }

    fn child_block(&mut self, node: &AstNode, field: &str) -> Block {
        node.child(field).map(|b| self.block(b)).unwrap_or_default()
    }

    // expressions

    fn expr(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        match node.raw_kind {
            "identifier" => var(cx.text(node)),
            "integer" => {
                let text = cx.text(node);
                if text.ends_with(['j', 'J']) {
                    return cx.unsupported(node);
                }
                match int_literal(text, false) {
                    Some(i) => Expr::Literal(Value::Int(i)),
                    None => match float_literal(text) {
                        Some(f) => Expr::Literal(Value::Float(f)),
                        None => cx.unsupported(node),
                    },
                }
            }
            "float" => match float_literal(cx.text(node)) {
                Some(f) => Expr::Literal(Value::Float(f)),
                None => cx.unsupported(node),
            },
            "true" => Expr::Literal(Value::Bool(true)),
            "false" => Expr::Literal(Value::Bool(false)),
            "none" | "ellipsis" => Expr::Literal(Value::None),
            "string" => self.string(node),
            "concatenated_string" => self.concatenated(node),
            "parenthesized_expression" => match node.first_named() {
                Some(inner) => self.expr(inner),
                None => Expr::Tuple(Vec::new()),
            },
            "list" | "list_pattern" => Expr::List(self.exprs(node)),
            "tuple" | "expression_list" | "pattern_list" | "tuple_pattern" => Expr::Tuple(self.exprs(node)),
            "set" => call("set", vec![Expr::List(self.exprs(node))]),
            "dictionary" => {
                let mut entries = Vec::new();
                for pair in node.named_children() {
                    match (pair.child("key"), pair.child("value")) {
                        (Some(key), Some(value)) => entries.push((self.expr(key), self.expr(value))),
                        _ => return cx.unsupported(pair),
                    }
                }
                Expr::Dict(entries)
            }
            "binary_operator" => {
                let op = node.child("operator").and_then(|o| BinOp::from_token(cx.text(o)));
                match (op, node.child("left"), node.child("right")) {
                    (Some(op), Some(left), Some(right)) => Expr::Binary {
                        op,
                        left: Box::new(self.expr(left)),
                        right: Box::new(self.expr(right)),
                    },
                    _ => cx.unsupported(node),
                }
            }
            "boolean_operator" => {
                let and = node.child("operator").is_some_and(|o| cx.text(o) == "and");
                match (node.child("left"), node.child("right")) {
                    (Some(left), Some(right)) => Expr::Logical {
                        and,
                        left: Box::new(self.expr(left)),
                        right: Box::new(self.expr(right)),
                    },
                    _ => cx.unsupported(node),
                }
            }
            "not_operator" => match node.child("argument") {
                Some(argument) => not(self.expr(argument)),
                None => cx.unsupported(node),
            },
            "unary_operator" => {
                let op = match node.child("operator").map(|o| cx.text(o)) {
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
            "comparison_operator" => self.comparison(node),
            "conditional_expression" => {
                let parts: Vec<&AstNode> = node.named_children().collect();
                match parts.as_slice() {
                    [then, cond, otherwise] => Expr::Cond {
                        cond: Box::new(self.expr(cond)),
                        then: Box::new(self.expr(then)),
                        otherwise: Box::new(self.expr(otherwise)),
                    },
                    _ => cx.unsupported(node),
                }
            }
            "call" => self.call(node),
            "attribute" => match (node.child("object"), node.child("attribute")) {
                (Some(object), Some(attribute)) => Expr::Field {
                    target: Box::new(self.expr(object)),
                    name: cx.text(attribute).to_string(),
                },
                _ => cx.unsupported(node),
            },
            "subscript" => self.subscript(node),
            "lambda" => {
                let params = node
                    .child("parameters")
                    .map(|p| {
                        p.named_children()
                            .filter_map(|param| match param.raw_kind {
                                "identifier" => Some(cx.text(param).to_string()),
                                _ => param.child("name").map(|n| cx.text(n).to_string()),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                match node.child("body") {
                    Some(body) => Expr::Lambda {
                        params,
                        body: Box::new(self.expr(body)),
                    },
                    None => cx.unsupported(node),
                }
            }
            "list_comprehension" | "generator_expression" => self.comprehension(node, false),
            "set_comprehension" => call("set", vec![self.comprehension(node, false)]),
            "dictionary_comprehension" => self.comprehension(node, true),
            "named_expression" => match (node.child("name"), node.child("value")) {
                (Some(name), Some(value)) => assign(Target::Var(cx.text(name).to_string()), self.expr(value)),
                _ => cx.unsupported(node),
            },
            "keyword_argument" => node.child("value").map_or_else(|| cx.unsupported(node), |v| self.expr(v)),
            _ => cx.unsupported(node),
        }
    }

    fn exprs(&mut self, node: &AstNode) -> Vec<Expr> {
        node.named_children().map(|c| self.expr(c)).collect()
    }

    /// `a < b <= c` compares pairwise and joins with `and`.
    fn comparison(&mut self, node: &AstNode) -> Expr {
        let mut operands = Vec::new();
        let mut ops = Vec::new();
        for child in &node.children {
            if child.field == Some("operators") {
                let token = self.cx.text(child).split_whitespace().collect::<Vec<_>>().join(" ");
                match BinOp::from_token(&token) {
                    Some(op) => ops.push(op),
                    None => return self.cx.unsupported(node),
                }
            } else if child.named {
                operands.push(self.expr(child));
            }
        }
        if operands.len() != ops.len() + 1 || ops.is_empty() {
            return self.cx.unsupported(node);
        }
        let mut result: Option<Expr> = None;
        for (i, op) in ops.into_iter().enumerate() {
            let pair = Expr::Binary {
                op,
                left: Box::new(operands[i].clone()),
                right: Box::new(operands[i + 1].clone()),
            };
            result = Some(match result {
                None => pair,
                Some(previous) => Expr::Logical {
                    and: true,
                    left: Box::new(previous),
                    right: Box::new(pair),
                },
            });
        }
        result.unwrap_or_else(|| self.cx.unsupported(node))
    }

    fn call(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if let Some(arguments) = node.child("arguments") {
            if arguments.is("generator_expression") {
                args.push(self.expr(arguments));
            } else {
                for argument in arguments.named_children() {
                    match argument.raw_kind {
                        "keyword_argument" => {
                            if let (Some(name), Some(value)) = (argument.child("name"), argument.child("value")) {
                                kwargs.push((cx.text(name).to_string(), self.expr(value)));
                            }
                        }
                        "list_splat" | "dictionary_splat" => args.push(cx.unsupported(argument)),
                        _ => args.push(self.expr(argument)),
                    }
                }
            }
        }

        let Some(function) = node.child("function") else {
            return cx.unsupported(node);
        };
        match function.raw_kind {
            "identifier" => Expr::Call {
                name: cx.text(function).to_string(),
                qualifier: None,
                args,
                kwargs,
            },
            "attribute" => {
                let (Some(object), Some(attribute)) = (function.child("object"), function.child("attribute")) else {
                    return cx.unsupported(node);
                };
                let name = cx.text(attribute).to_string();
                // super().method(...) dispatches to the base class
                let is_super = object.is("call")
                    && object.child("function").is_some_and(|f| cx.text(f) == "super");
                if is_super {
                    return Expr::Call {
                        name,
                        qualifier: Some("super".to_string()),
                        args,
                        kwargs,
                    };
                }
                Expr::Method {
                    receiver: Box::new(self.expr(object)),
                    name,
                    args,
                    kwargs,
                }
            }
            _ => cx.unsupported(node),
        }
    }

    fn subscript(&mut self, node: &AstNode) -> Expr {
        let Some(value) = node.child("value") else {
            return self.cx.unsupported(node);
        };
        let target = Box::new(self.expr(value));
        let subscripts: Vec<&AstNode> = node.children_by_field("subscript").collect();
        match subscripts.as_slice() {
            [slice] if slice.is("slice") => {
                let slots = self.cx.slots(slice, ':', 3);
                let mut part = |i: usize| slots[i].map(|n| Box::new(self.expr(n)));
                let (start, end, step) = (part(0), part(1), part(2));
                Expr::Slice {
                    target,
                    start,
                    end,
                    step,
                }
            }
            [index] => Expr::Index {
                target,
                index: Box::new(self.expr(index)),
            },
            many => Expr::Index {
                target,
                index: Box::new(Expr::Tuple(many.iter().map(|i| self.expr(i)).collect())),
            },
        }
    }

    fn comprehension(&mut self, node: &AstNode, dict: bool) -> Expr {
        let mut clauses = Vec::new();
        for child in node.named_children() {
            match child.raw_kind {
                "for_in_clause" => {
                    let target = child.child("left").and_then(|l| self.target(l));
                    let iter = child.child("right").map(|r| self.expr(r));
                    match (target, iter) {
                        (Some(target), Some(iter)) => clauses.push(CompClause::For { target, iter }),
                        _ => return self.cx.unsupported(child),
                    }
                }
                "if_clause" => {
                    if let Some(cond) = child.first_named() {
                        clauses.push(CompClause::If(self.expr(cond)));
                    }
                }
                _ => {}
            }
        }
        let Some(body) = node.child("body") else {
            return self.cx.unsupported(node);
        };
        if dict {
            let (Some(key), Some(value)) = (body.child("key"), body.child("value")) else {
                return self.cx.unsupported(body);
            };
            Expr::Comprehension {
                element: Box::new(self.expr(value)),
                key: Some(Box::new(self.expr(key))),
                clauses,
            }
        } else {
            Expr::Comprehension {
                element: Box::new(self.expr(body)),
                key: None,
                clauses,
            }
        }
    }

    // strings

    fn string(&mut self, node: &AstNode) -> Expr {
        let text = self.cx.text(node);
        let prefix = &text[..text.find(['"', '\'']).unwrap_or(0)];
        if !prefix.contains(['f', 'F']) {
            return Expr::Literal(Value::Str(string_literal(text)));
        }
        let parts = self.format_parts(node, prefix.contains(['r', 'R']));
        Expr::Format(parts)
    }

    fn format_parts(&mut self, node: &AstNode, raw: bool) -> Vec<FormatPart> {
        let mut parts = Vec::new();
        for child in &node.children {
            match child.raw_kind {
                "string_content" => {
                    let text = self.cx.text(child);
                    let text = if raw { text.to_string() } else { unescape(text) };
                    parts.push(FormatPart::Text(text.replace("{{", "{").replace("}}", "}")));
                }
                "escape_sequence" => parts.push(FormatPart::Text(unescape(self.cx.text(child)))),
                "escape_interpolation" => {
                    let text = self.cx.text(child);
                    parts.push(FormatPart::Text(text.replace("{{", "{").replace("}}", "}")));
                }
                "interpolation" => {
                    let Some(expression) = child.child("expression").or_else(|| child.first_named()) else {
                        continue;
                    };
                    let repr = child
                        .child("type_conversion")
                        .is_some_and(|c| self.cx.text(c).trim_start_matches('!') == "r");
                    let spec = child
                        .child("format_specifier")
                        .map(|s| self.cx.text(s).trim_start_matches(':').to_string())
                        .unwrap_or_default();
                    parts.push(FormatPart::Value {
                        expr: self.expr(expression),
                        repr,
                        spec,
                    });
                }
                _ => {}
            }
        }
        parts
    }

    fn concatenated(&mut self, node: &AstNode) -> Expr {
        let mut parts = Vec::new();
        let mut formatted = false;
        for piece in node.named_children() {
            match self.string(piece) {
                Expr::Format(inner) => {
                    formatted = true;
                    parts.extend(inner);
                }
                Expr::Literal(Value::Str(text)) => parts.push(FormatPart::Text(text)),
                other => return other,
            }
        }
        if formatted {
            return Expr::Format(parts);
        }
        let joined: String = parts
            .into_iter()
            .map(|p| match p {
                FormatPart::Text(text) => text,
                FormatPart::Value { .. } => String::new(),
            })
            .collect();
        Expr::Literal(Value::Str(joined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{parse_source, Language};

    fn lower_source(source: &str) -> Program {
        let (ast, errors) = parse_source(Language::Python, "main.py", source);
        assert!(errors.is_empty(), "{:?}", errors);
        lower(&ast)
    }

    #[test]
    fn test_methods_drop_self() {
        let program = lower_source(
            "class Counter:\n    total = 0\n    def add(self, n=1):\n        self.total += n\n    @staticmethod\n    def zero():\n        return 0\n",
        );
        let class = program.class("Counter").unwrap();
        assert_eq!(class.fields.len(), 1);
        let add = program.functions.iter().find(|f| f.name == "add").unwrap();
        assert_eq!(add.params.len(), 1);
        assert!(add.takes_self);
        assert!(add.params[0].default.is_some());
        assert_eq!(add.qualified, "Counter.add");
        let zero = program.functions.iter().find(|f| f.name == "zero").unwrap();
        assert!(zero.is_static && !zero.takes_self);
    }

    #[test]
    fn test_module_code_keeps_top_level_statements() {
        let program = lower_source("import math\nx = 1\ndef f():\n    return x\nprint(f())\n");
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.modules[0].body.len(), 2);
        assert_eq!(program.modules[0].body[0].line, 2);
    }

    #[test]
    fn test_fstring_parts() {
        let program = lower_source("name = 'x'\ns = f\"hi {name!r} {3.14159:.2f}\"\n");
        let StmtKind::Expr(Expr::Assign { value, .. }) = &program.modules[0].body[1].kind else {
            panic!("expected assignment");
        };
        let Expr::Format(parts) = value.as_ref() else {
            panic!("expected format");
        };
        assert!(matches!(&parts[0], FormatPart::Text(t) if t == "hi "));
        assert!(matches!(&parts[1], FormatPart::Value { repr: true, .. }));
        assert!(matches!(&parts[3], FormatPart::Value { spec, .. } if spec == ".2f"));
    }

    #[test]
    fn test_slice_slots() {
        let program = lower_source("a = [1, 2, 3]\nb = a[::2]\nc = a[1:]\n");
        let body = &program.modules[0].body;
        let StmtKind::Expr(Expr::Assign { value, .. }) = &body[1].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.as_ref(), Expr::Slice { start: None, end: None, step: Some(_), .. }));
        let StmtKind::Expr(Expr::Assign { value, .. }) = &body[2].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.as_ref(), Expr::Slice { start: Some(_), end: None, step: None, .. }));
    }

    #[test]
    fn test_elif_chain_nests() {
        let program = lower_source("x = 2\nif x == 1:\n    y = 1\nelif x == 2:\n    y = 2\nelse:\n    y = 3\n");
        let StmtKind::If { otherwise: Some(otherwise), .. } = &program.modules[0].body[1].kind else {
            panic!("expected if");
        };
        assert!(matches!(&otherwise[0].kind, StmtKind::If { otherwise: Some(_), .. }));
        assert_eq!(otherwise[0].line, 4);
    }

    #[test]
    fn test_nested_function_becomes_closure() {
        let program = lower_source("def outer():\n    def inner(k):\n        return k\n    return inner(2)\n");
        assert_eq!(program.functions.len(), 1);
        let body = &program.functions[0].body;
        assert!(matches!(&body[0].kind, StmtKind::Declare { name, .. } if name == "inner"));
        assert!(matches!(&body[1].kind, StmtKind::Expr(Expr::Assign { value, .. }) if matches!(value.as_ref(), Expr::Lambda { .. })));
    }

    #[test]
    fn test_super_call_is_qualified() {
        let program = lower_source(
            "class A:\n    def __init__(self):\n        self.x = 1\nclass B(A):\n    def __init__(self):\n        super().__init__()\n",
        );
        assert_eq!(program.class("B").unwrap().base.as_deref(), Some("A"));
        let init = program.functions.iter().find(|f| f.owner.as_deref() == Some("B")).unwrap();
        assert!(matches!(
            &init.body[0].kind,
            StmtKind::Expr(Expr::Call { qualifier: Some(q), .. }) if q == "super"
        ));
    }
}
