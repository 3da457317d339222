// Rust lowering

use std::collections::{HashMap, HashSet};

use super::{
    assign, assign_expr, base_type, call, char_literal, float_literal, inner_text, int_literal, qualified_call,
    split_top_level, string, string_literal, strip_generics, type_hint, var, Cx,
};
use crate::grammar::{parse_source, Ast, AstNode, Language};
use crate::sandbox::ir::{
    BinOp, Block, ClassDef, Expr, FieldDef, Function, MatchArm, ModuleCode, Param, Pattern, Program, Stmt, StmtKind,
    Target, TypeHint, UnaryOp,
};
use crate::sandbox::value::Value;

/// Smart-pointer constructors that evaluate to the value they wrap.
const WRAPPERS: &[&str] = &["Box", "Rc", "Arc", "RefCell", "Cell", "Mutex", "RwLock"];

/// Methods whose result type comes from the annotation on the binding.
const TYPED_METHODS: &[&str] = &["parse", "collect", "sum", "product", "into"];

const STATEMENT_KINDS: &[&str] = &[
    "let_declaration",
    "expression_statement",
    "empty_statement",
    "function_item",
    "struct_item",
    "enum_item",
    "impl_item",
    "trait_item",
    "const_item",
    "static_item",
    "use_declaration",
    "attribute_item",
    "type_item",
    "mod_item",
    "macro_definition",
];

pub(super) fn lower(ast: &Ast) -> Program {
    let mut traits: HashMap<String, Vec<&AstNode>> = HashMap::new();
    ast.root.visit(&mut |node| {
        if !node.is("trait_item") {
            return;
        }
        let (Some(name), Some(body)) = (node.child("name"), node.child("body")) else {
            return;
        };
        let defaults = body
            .named_children()
            .filter(|m| m.is("function_item") && m.child("body").is_some())
            .collect();
        traits.insert(ast.text(name).to_string(), defaults);
    });

    let mut lowerer = RustLowerer {
        cx: Cx::new(ast),
        program: Program::default(),
        owner: None,
        by_ref: HashSet::new(),
        traits,
        temps: 0,
    };
    let mut body = Vec::new();
    lowerer.items(&ast.root, &mut body);
    lowerer.program.modules.push(ModuleCode {
        file: ast.path.clone(),
        body,
    });
    lowerer.program
}

struct RustLowerer<'a> {
    cx: Cx<'a>,
    program: Program,
    /// Type of the enclosing `impl`.
    owner: Option<String>,
    /// `&mut` parameters of the function being lowered; `*x` on them
    /// reads the aliased variable.
    by_ref: HashSet<String>,
    /// Trait name to its provided methods.
    traits: HashMap<String, Vec<&'a AstNode>>,
    temps: usize,
}

impl<'a> RustLowerer<'a> {
    fn temp(&mut self) -> String {
        self.temps += 1;
        format!("__t{}", self.temps)
    }

    // items

    fn items(&mut self, node: &AstNode, module: &mut Block) {
        for item in node.named_children() {
            self.item(item, module);
        }
    }

    fn item(&mut self, item: &AstNode, module: &mut Block) {
        match item.raw_kind {
            "function_item" => {
                if let Some(function) = self.function(item) {
                    self.program.functions.push(function);
                }
            }
            "impl_item" => self.impl_block(item, module),
            "struct_item" => self.structure(item),
            "enum_item" => self.enumeration(item),
            "const_item" | "static_item" => {
                if let Some(declare) = self.constant(item) {
                    module.push(declare);
                }
            }
            "mod_item" => {
                if let Some(body) = item.child("body") {
                    self.items(body, module);
                }
            }
            _ => {}
        }
    }

    fn constant(&mut self, node: &AstNode) -> Option<Stmt> {
        let name = self.cx.text(node.child("name")?).to_string();
        let hint = node
            .child("type")
            .map(|t| type_hint(self.cx.text(t), Language::Rust))
            .unwrap_or(TypeHint::Auto);
        let value = node.child("value").map(|v| self.expr(v));
        Some(self.cx.stmt(
            node,
            StmtKind::Declare {
                name,
                hint,
                value,
                copy: false,
            },
        ))
    }

    fn structure(&mut self, node: &AstNode) {
        let Some(name) = node.child("name").map(|n| self.cx.text(n).to_string()) else {
            return;
        };
        let mut fields = Vec::new();
        if let Some(body) = node.child("body") {
            match body.raw_kind {
                "field_declaration_list" => {
                    for field in body.named_children().filter(|f| f.is("field_declaration")) {
                        let Some(field_name) = field.child("name") else {
                            continue;
                        };
                        fields.push(FieldDef {
                            name: self.cx.text(field_name).to_string(),
                            hint: self.hint_of(field.child("type")),
                            init: None,
                        });
                    }
                }
                "ordered_field_declaration_list" => {
                    for (i, ty) in body.children_by_field("type").enumerate() {
                        fields.push(FieldDef {
                            name: i.to_string(),
                            hint: type_hint(self.cx.text(ty), Language::Rust),
                            init: None,
                        });
                    }
                }
                _ => {}
            }
        }
        self.program.classes.push(ClassDef {
            name,
            base: None,
            fields,
            variants: Vec::new(),
        });
    }

    fn enumeration(&mut self, node: &AstNode) {
        let Some(name) = node.child("name").map(|n| self.cx.text(n).to_string()) else {
            return;
        };
        let variants = node
            .child("body")
            .map(|body| {
                body.named_children()
                    .filter(|v| v.is("enum_variant"))
                    .filter_map(|v| v.child("name"))
                    .map(|v| self.cx.text(v).to_string())
                    .collect()
            })
            .unwrap_or_default();
        self.program.classes.push(ClassDef {
            name,
            base: None,
            fields: Vec::new(),
            variants,
        });
    }

    fn impl_block(&mut self, node: &AstNode, module: &mut Block) {
        let Some(owner) = node.child("type").map(|t| base_type(self.cx.text(t))) else {
            return;
        };
        let saved = self.owner.replace(owner);
        let mut defined = HashSet::new();
        if let Some(body) = node.child("body") {
            for member in body.named_children() {
                match member.raw_kind {
                    "function_item" => {
                        if let Some(function) = self.function(member) {
                            defined.insert(function.name.clone());
                            self.program.functions.push(function);
                        }
                    }
                    "const_item" => {
                        if let Some(declare) = self.constant(member) {
                            module.push(declare);
                        }
                    }
                    _ => {}
                }
            }
        }
        // provided trait methods the impl does not override
        let provided = node
            .child("trait")
            .map(|t| base_type(self.cx.text(t)))
            .and_then(|t| self.traits.get(&t).cloned())
            .unwrap_or_default();
        for method in provided {
            let name = method.child("name").map(|n| self.cx.text(n));
            if name.is_some_and(|n| defined.contains(n)) {
                continue;
            }
            if let Some(function) = self.function(method) {
                self.program.functions.push(function);
            }
        }
        self.owner = saved;
    }

    fn hint_of(&self, node: Option<&AstNode>) -> TypeHint {
        node.map(|t| type_hint(self.cx.text(t), Language::Rust))
            .unwrap_or(TypeHint::Auto)
    }

    fn function(&mut self, node: &AstNode) -> Option<Function> {
        let name = self.cx.text(node.child("name")?).to_string();
        let mut params = Vec::new();
        let mut takes_self = false;
        let mut prologue = Vec::new();
        let mut by_ref = HashSet::new();

        if let Some(list) = node.child("parameters") {
            for param in list.named_children() {
                match param.raw_kind {
                    "self_parameter" => takes_self = true,
                    "parameter" => {
                        let type_text = param.child("type").map(|t| self.cx.text(t)).unwrap_or("");
                        let reference = type_text.trim_start().starts_with("&mut");
                        let Some(pattern) = param.child("pattern") else {
                            continue;
                        };
                        let name = match simple_name(self.cx, pattern) {
                            Some(name) => name,
                            None => {
                                let temp = self.temp();
                                self.destructure(pattern, var(temp.clone()), &mut prologue);
                                temp
                            }
                        };
                        if reference {
                            by_ref.insert(name.clone());
                        }
                        params.push(Param {
                            name,
                            hint: type_hint(type_text, Language::Rust),
                            default: None,
                            by_ref: reference,
                            copy: false,
                        });
                    }
                    _ => {}
                }
            }
        }

        let saved = std::mem::replace(&mut self.by_ref, by_ref);
        let (mut body, tail) = match node.child("body") {
            Some(block) => self.block(block),
            None => (Vec::new(), None),
        };
        self.by_ref = saved;
        if !prologue.is_empty() {
            prologue.append(&mut body);
            body = prologue;
        }

        let owner = self.owner.clone();
        let qualified = match &owner {
            Some(owner) => format!("{}::{}", owner, name),
            None => name.clone(),
        };
        Some(Function {
            is_static: owner.is_some() && !takes_self,
            name,
            qualified,
            owner,
            file: self.cx.file(),
            line: self.cx.line(node),
            end_line: self.cx.end_line(node),
            params,
            takes_self,
            body,
            tail,
            return_hint: self.hint_of(node.child("return_type")),
        })
    }

    // statements

    /// Statements of a block plus its tail expression.
    fn block(&mut self, node: &AstNode) -> (Block, Option<Expr>) {
        let children: Vec<&AstNode> = node.named_children().collect();
        let mut out = Vec::new();
        let mut tail = None;
        for (i, child) in children.iter().enumerate() {
            let last = i + 1 == children.len();
            if last {
                if !STATEMENT_KINDS.contains(&child.raw_kind) {
                    tail = Some(self.expr(child));
                    break;
                }
                if child.is("expression_statement") && !self.cx.text(child).trim_end().ends_with(';') {
                    if let Some(inner) = child.first_named() {
                        tail = Some(self.expr(inner));
                        break;
                    }
                }
            }
            self.stmt(child, &mut out);
        }
        (out, tail)
    }

    fn block_expr(&mut self, node: &AstNode) -> Expr {
        let (body, tail) = self.block(node);
        Expr::Block {
            body,
            tail: tail.map(Box::new),
        }
    }

    /// Block in statement position: a tail value is discarded.
    fn block_stmts(&mut self, node: &AstNode) -> Block {
        let mut out = Vec::new();
        for child in node.named_children() {
            self.stmt(child, &mut out);
        }
        out
    }

    fn stmt(&mut self, node: &AstNode, out: &mut Block) {
        let cx = self.cx;
        let kind = match node.raw_kind {
            "let_declaration" => {
                self.let_declaration(node, out);
                return;
            }
            "expression_statement" => match node.first_named() {
                Some(inner) => match self.control(inner) {
                    Some(kind) => kind,
                    None => StmtKind::Expr(self.expr(inner)),
                },
                None => return,
            },
            "function_item" => {
                let saved = self.owner.take();
                if let Some(function) = self.function(node) {
                    self.program.functions.push(function);
                }
                self.owner = saved;
                return;
            }
            "const_item" | "static_item" => {
                if let Some(declare) = self.constant(node) {
                    out.push(declare);
                }
                return;
            }
            "struct_item" | "enum_item" | "impl_item" => {
                self.item(node, out);
                return;
            }
            "empty_statement" | "use_declaration" | "attribute_item" | "type_item" | "trait_item"
            | "macro_definition" | "mod_item" => return,
            _ => match self.control(node) {
                Some(kind) => kind,
                None => StmtKind::Expr(self.expr(node)),
            },
        };
        out.push(cx.stmt(node, kind));
    }

    /// Control-flow expressions used as statements.
    fn control(&mut self, node: &AstNode) -> Option<StmtKind> {
        Some(match node.raw_kind {
            "if_expression" => {
                let condition = node.child("condition")?;
                if condition.is("let_condition") {
                    return Some(StmtKind::Expr(self.if_let(node, condition)));
                }
                StmtKind::If {
                    cond: self.expr(condition),
                    then: node.child("consequence").map(|b| self.block_stmts(b)).unwrap_or_default(),
                    otherwise: node.child("alternative").map(|alt| self.else_stmts(alt)),
                }
            }
            "while_expression" => {
                let condition = node.child("condition")?;
                let body = node.child("body").map(|b| self.block_stmts(b)).unwrap_or_default();
                if condition.is("let_condition") {
                    return Some(self.while_let(node, condition, body));
                }
                StmtKind::While {
                    cond: self.expr(condition),
                    body,
                }
            }
            "loop_expression" => StmtKind::While {
                cond: Expr::Literal(Value::Bool(true)),
                body: node.child("body").map(|b| self.block_stmts(b)).unwrap_or_default(),
            },
            "for_expression" => StmtKind::ForEach {
                target: node.child("pattern").map(|p| self.target(p)).unwrap_or(Target::Var("_".into())),
                iter: match node.child("value") {
                    Some(value) => self.expr(value),
                    None => self.cx.unsupported(node),
                },
                body: node.child("body").map(|b| self.block_stmts(b)).unwrap_or_default(),
            },
            "block" | "unsafe_block" => StmtKind::Block(self.block_stmts(node)),
            "return_expression" => StmtKind::Return(node.first_named().map(|v| self.expr(v))),
            "break_expression" => StmtKind::Break,
            "continue_expression" => StmtKind::Continue,
            _ => return None,
        })
    }

    fn else_stmts(&mut self, clause: &AstNode) -> Block {
        match clause.first_named() {
            Some(inner) if inner.is("block") => self.block_stmts(inner),
            Some(inner) => {
                let mut out = Vec::new();
                self.stmt(inner, &mut out);
                out
            }
            None => Vec::new(),
        }
    }

    /// `while let P = e { .. }` loops until the pattern stops matching.
    fn while_let(&mut self, node: &AstNode, condition: &AstNode, body: Block) -> StmtKind {
        let value = match condition.child("value") {
            Some(value) => self.expr(value),
            None => self.cx.unsupported(condition),
        };
        let patterns = match condition.child("pattern") {
            Some(pattern) => self.alternatives(pattern),
            None => vec![Pattern::Wildcard],
        };
        let line = self.cx.line(node);
        let step = Expr::Match {
            value: Box::new(value),
            arms: vec![
                MatchArm {
                    patterns,
                    guard: None,
                    body: Expr::Block { body, tail: None },
                },
                MatchArm {
                    patterns: vec![Pattern::Wildcard],
                    guard: None,
                    body: Expr::Block {
                        body: vec![Stmt::new(line, StmtKind::Break)],
                        tail: None,
                    },
                },
            ],
        };
        StmtKind::While {
            cond: Expr::Literal(Value::Bool(true)),
            body: vec![Stmt::new(line, StmtKind::Expr(step))],
        }
    }

    fn let_declaration(&mut self, node: &AstNode, out: &mut Block) {
        let cx = self.cx;
        let type_text = node.child("type").map(|t| cx.text(t));
        let hint = type_text
            .map(|t| type_hint(t, Language::Rust))
            .unwrap_or(TypeHint::Auto);
        let mut value = node.child("value").map(|v| self.expr(v));
        if let (Some(value), Some(ty)) = (value.as_mut(), type_text) {
            attach_type(value, ty);
        }
        let pattern = node.child("pattern");

        if let Some(name) = pattern.and_then(|p| simple_name(cx, p)) {
            if node.child("alternative").is_none() {
                out.push(cx.stmt(
                    node,
                    StmtKind::Declare {
                        name,
                        hint,
                        value,
                        copy: false,
                    },
                ));
                return;
            }
        }
        let Some(value) = value else {
            out.push(cx.stmt(node, StmtKind::Unsupported(cx.snippet(node))));
            return;
        };
        match pattern {
            None => out.push(cx.stmt(node, StmtKind::Expr(value))),
            Some(pattern) if pattern.is("tuple_pattern") && node.child("alternative").is_none() => {
                self.destructure(pattern, value, out);
            }
            Some(pattern) => {
                let (pattern, names) = rename_binds(self.pattern(pattern));
                for name in &names {
                    out.push(cx.stmt(
                        node,
                        StmtKind::Declare {
                            name: name.clone(),
                            hint: TypeHint::Auto,
                            value: None,
                            copy: false,
                        },
                    ));
                }
                let line = cx.line(node);
                let binds = names
                    .iter()
                    .map(|n| Stmt::new(line, StmtKind::Expr(assign(Target::Var(n.clone()), var(format!("__{}", n))))))
                    .collect();
                let otherwise = match node.child("alternative") {
                    Some(block) => Expr::Block {
                        body: self.block_stmts(block),
                        tail: None,
                    },
                    None => Expr::Literal(Value::None),
                };
                let matched = Expr::Match {
                    value: Box::new(value),
                    arms: vec![
                        MatchArm {
                            patterns: vec![pattern],
                            guard: None,
                            body: Expr::Block { body: binds, tail: None },
                        },
                        MatchArm {
                            patterns: vec![Pattern::Wildcard],
                            guard: None,
                            body: otherwise,
                        },
                    ],
                };
                out.push(cx.stmt(node, StmtKind::Expr(matched)));
            }
        }
    }

    /// Bind the names of a tuple-like pattern from `value`.
    fn destructure(&mut self, pattern: &AstNode, value: Expr, out: &mut Block) {
        let target = self.target(pattern);
        let line = self.cx.line(pattern);
        let mut names = Vec::new();
        target_names(&target, &mut names);
        for name in names {
            out.push(Stmt::new(
                line,
                StmtKind::Declare {
                    name,
                    hint: TypeHint::Auto,
                    value: None,
                    copy: false,
                },
            ));
        }
        out.push(Stmt::new(line, StmtKind::Expr(assign(target, value))));
    }

    fn target(&mut self, pattern: &AstNode) -> Target {
        match pattern.raw_kind {
            "tuple_pattern" | "slice_pattern" => {
                Target::Tuple(pattern_children(pattern).map(|p| self.target(p)).collect())
            }
            "reference_pattern" | "ref_pattern" | "mut_pattern" => match pattern.first_named() {
                Some(inner) => self.target(inner),
                None => Target::Var("_".into()),
            },
            _ if !pattern.named => Target::Var("_".into()),
            _ => Target::Var(self.cx.text(pattern).to_string()),
        }
    }

    // patterns

    /// Top-level `A | B` patterns become separate alternatives.
    fn alternatives(&mut self, node: &AstNode) -> Vec<Pattern> {
        if node.is("or_pattern") {
            return pattern_children(node).flat_map(|p| self.alternatives(p)).collect();
        }
        vec![self.pattern(node)]
    }

    fn pattern(&mut self, node: &AstNode) -> Pattern {
        let cx = self.cx;
        if !node.named {
            return Pattern::Wildcard;
        }
        match node.raw_kind {
            "identifier" => {
                let name = cx.text(node);
                if name.starts_with(char::is_uppercase) {
                    Pattern::Variant {
                        name: name.to_string(),
                        inner: Vec::new(),
                    }
                } else {
                    Pattern::Bind(name.to_string())
                }
            }
            "integer_literal" | "float_literal" | "string_literal" | "raw_string_literal" | "char_literal"
            | "boolean_literal" => match self.expr(node) {
                Expr::Literal(value) => Pattern::Literal(value),
                _ => Pattern::Wildcard,
            },
            "negative_literal" => match node.first_named().map(|n| self.expr(n)) {
                Some(Expr::Literal(Value::Int(i))) => Pattern::Literal(Value::Int(-i)),
                Some(Expr::Literal(Value::Float(f))) => Pattern::Literal(Value::Float(-f)),
                _ => Pattern::Wildcard,
            },
            "range_pattern" => {
                let mut bounds = node.named_children().map(|b| match self.pattern(b) {
                    Pattern::Literal(value) => value,
                    _ => Value::None,
                });
                let start = bounds.next().unwrap_or(Value::Int(i64::MIN));
                let end = bounds.next().unwrap_or(Value::Int(i64::MAX));
                Pattern::Range {
                    start,
                    end,
                    inclusive: node.has_token("..=") || node.has_token("..."),
                }
            }
            "tuple_pattern" | "slice_pattern" => Pattern::Tuple(pattern_children(node).map(|p| self.pattern(p)).collect()),
            "tuple_struct_pattern" => {
                let name = node.child("type").map(|t| base_type(cx.text(t))).unwrap_or_default();
                let inner = pattern_children(node)
                    .filter(|p| p.field != Some("type"))
                    .map(|p| self.pattern(p))
                    .collect();
                Pattern::Variant { name, inner }
            }
            "struct_pattern" => {
                let name = node.child("type").map(|t| base_type(cx.text(t))).unwrap_or_default();
                let inner = node
                    .named_children()
                    .filter(|f| f.is("field_pattern"))
                    .map(|field| match field.child("pattern") {
                        Some(pattern) => self.pattern(pattern),
                        None => field
                            .child("name")
                            .map(|n| Pattern::Bind(cx.text(n).to_string()))
                            .unwrap_or(Pattern::Wildcard),
                    })
                    .collect();
                Pattern::Variant { name, inner }
            }
            "scoped_identifier" => {
                let name = node.child("name").map(|n| cx.text(n)).unwrap_or("");
                let path = node.child("path").map(|p| cx.text(p)).unwrap_or("");
                if path.ends_with("Ordering") {
                    let order = match name {
                        "Less" => -1,
                        "Greater" => 1,
                        _ => 0,
                    };
                    return Pattern::Literal(Value::Int(order));
                }
                Pattern::Variant {
                    name: name.to_string(),
                    inner: Vec::new(),
                }
            }
            "reference_pattern" | "ref_pattern" | "mut_pattern" => match node.first_named() {
                Some(inner) => self.pattern(inner),
                None => Pattern::Wildcard,
            },
            "captured_pattern" => match node.named_children().nth(1) {
                Some(inner) => self.pattern(inner),
                None => Pattern::Wildcard,
            },
            "or_pattern" => match pattern_children(node).next() {
                Some(first) => self.pattern(first),
                None => Pattern::Wildcard,
            },
            _ => Pattern::Wildcard,
        }
    }

    // expressions

    fn expr(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        match node.raw_kind {
            "integer_literal" => {
                let text = cx.text(node);
                if text.ends_with("f64") || text.ends_with("f32") {
                    return float_literal(text).map_or_else(|| cx.unsupported(node), |f| Expr::Literal(Value::Float(f)));
                }
                match int_literal(text, false) {
                    Some(i) => Expr::Literal(Value::Int(i)),
                    None => cx.unsupported(node),
                }
            }
            "float_literal" => match float_literal(cx.text(node)) {
                Some(f) => Expr::Literal(Value::Float(f)),
                None => cx.unsupported(node),
            },
            "boolean_literal" => Expr::Literal(Value::Bool(cx.text(node) == "true")),
            "string_literal" | "raw_string_literal" => string(string_literal(cx.text(node))),
            "char_literal" => Expr::Literal(char_literal(cx.text(node))),
            "identifier" => match cx.text(node) {
                "None" => Expr::Literal(Value::None),
                name => var(name),
            },
            "self" => var("self"),
            "unit_expression" => Expr::Literal(Value::None),
            "parenthesized_expression" => match node.first_named() {
                Some(inner) => self.expr(inner),
                None => Expr::Literal(Value::None),
            },
            "tuple_expression" => Expr::Tuple(node.named_children().map(|i| self.expr(i)).collect()),
            "array_expression" => match node.child("length") {
                Some(length) => {
                    let value = node
                        .named_children()
                        .find(|c| c.field != Some("length"))
                        .map(|v| self.expr(v))
                        .unwrap_or(Expr::Literal(Value::None));
                    Expr::Repeat {
                        value: Box::new(value),
                        count: Box::new(self.expr(length)),
                    }
                }
                None => Expr::List(node.named_children().map(|i| self.expr(i)).collect()),
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
                let Some(operand) = node.first_named() else {
                    return cx.unsupported(node);
                };
                let op = match node.operator() {
                    Some("-") => UnaryOp::Neg,
                    Some("!") => UnaryOp::BitNot,
                    Some("*") => return self.deref(operand),
                    _ => return cx.unsupported(node),
                };
                Expr::Unary {
                    op,
                    operand: Box::new(self.expr(operand)),
                }
            }
            "reference_expression" => {
                let Some(value) = node.child("value") else {
                    return cx.unsupported(node);
                };
                let inner = self.expr(value);
                if node.child_of_kind("mutable_specifier").is_some() {
                    Expr::AddrOf(Box::new(inner))
                } else {
                    inner
                }
            }
            "assignment_expression" => match (node.child("left"), node.child("right")) {
                (Some(left), Some(right)) => {
                    let value = self.expr(right);
                    assign_expr(self.expr(left), None, value, cx.text(node))
                }
                _ => cx.unsupported(node),
            },
            "compound_assignment_expr" => {
                let (Some(left), Some(right)) = (node.child("left"), node.child("right")) else {
                    return cx.unsupported(node);
                };
                let op = node.child("operator").and_then(|o| BinOp::from_token(cx.text(o)));
                let value = self.expr(right);
                assign_expr(self.expr(left), op, value, cx.text(node))
            }
            "type_cast_expression" => match node.child("value") {
                Some(value) => Expr::Cast {
                    hint: self.hint_of(node.child("type")),
                    value: Box::new(self.expr(value)),
                },
                None => cx.unsupported(node),
            },
            "try_expression" => match node.first_named() {
                Some(inner) => Expr::Try(Box::new(self.expr(inner))),
                None => cx.unsupported(node),
            },
            "field_expression" => match (node.child("value"), node.child("field")) {
                (Some(value), Some(field)) => Expr::Field {
                    target: Box::new(self.expr(value)),
                    name: cx.text(field).to_string(),
                },
                _ => cx.unsupported(node),
            },
            "index_expression" => {
                let mut parts = node.named_children();
                let (Some(target), Some(index)) = (parts.next(), parts.next()) else {
                    return cx.unsupported(node);
                };
                let target = Box::new(self.expr(target));
                match self.expr(index) {
                    Expr::Range { start, end, inclusive } => Expr::Slice {
                        target,
                        start,
                        end: match (end, inclusive) {
                            (Some(end), true) => Some(Box::new(Expr::Binary {
                                op: BinOp::Add,
                                left: end,
                                right: Box::new(Expr::Literal(Value::Int(1))),
                            })),
                            (end, _) => end,
                        },
                        step: None,
                    },
                    index => Expr::Index {
                        target,
                        index: Box::new(index),
                    },
                }
            }
            "range_expression" => {
                let bounds: Vec<&AstNode> = node.named_children().collect();
                let leading = node.children.first().is_some_and(|c| !c.named);
                let (start, end) = match (bounds.as_slice(), leading) {
                    ([start, end], _) => (Some(*start), Some(*end)),
                    ([end], true) => (None, Some(*end)),
                    ([start], false) => (Some(*start), None),
                    _ => (None, None),
                };
                Expr::Range {
                    start: start.map(|s| Box::new(self.expr(s))),
                    end: end.map(|e| Box::new(self.expr(e))),
                    inclusive: node.has_token("..="),
                }
            }
            "call_expression" => self.call(node),
            "macro_invocation" => self.macro_call(node),
            "struct_expression" => {
                let mut class = node.child("name").map(|n| base_type(cx.text(n))).unwrap_or_default();
                if class == "Self" {
                    class = self.owner.clone().unwrap_or(class);
                }
                let mut fields = Vec::new();
                if let Some(body) = node.child("body") {
                    for init in body.named_children() {
                        match init.raw_kind {
                            "field_initializer" => {
                                if let (Some(field), Some(value)) = (init.child("field"), init.child("value")) {
                                    fields.push((cx.text(field).to_string(), self.expr(value)));
                                }
                            }
                            "shorthand_field_initializer" => {
                                if let Some(name) = init.first_named() {
                                    let name = cx.text(name).to_string();
                                    fields.push((name.clone(), var(name)));
                                }
                            }
                            _ => {}
                        }
                    }
                }
                Expr::StructLit { class, fields }
            }
            "scoped_identifier" => {
                let name = node.child("name").map(|n| cx.text(n)).unwrap_or("");
                let qualifier = node.child("path").map(|p| strip_generics(cx.text(p))).unwrap_or_default();
                if name == "None" {
                    return Expr::Literal(Value::None);
                }
                Expr::Path {
                    qualifier,
                    name: name.to_string(),
                }
            }
            "generic_function" => match node.child("function") {
                Some(function) => self.expr(function),
                None => cx.unsupported(node),
            },
            "closure_expression" => self.closure(node),
            "if_expression" => {
                let Some(condition) = node.child("condition") else {
                    return cx.unsupported(node);
                };
                if condition.is("let_condition") {
                    return self.if_let(node, condition);
                }
                let then = match node.child("consequence") {
                    Some(block) => self.block_expr(block),
                    None => Expr::Literal(Value::None),
                };
                Expr::IfElse {
                    cond: Box::new(self.expr(condition)),
                    then: Box::new(then),
                    otherwise: node.child("alternative").map(|alt| Box::new(self.else_expr(alt))),
                }
            }
            "match_expression" => self.match_expr(node),
            "block" | "unsafe_block" => self.block_expr(node),
            "loop_expression" | "while_expression" | "for_expression" | "return_expression" | "break_expression"
            | "continue_expression" => match self.control(node) {
                Some(kind) => Expr::Block {
                    body: vec![cx.stmt(node, kind)],
                    tail: None,
                },
                None => cx.unsupported(node),
            },
            _ => cx.unsupported(node),
        }
    }

    /// `*x`: a `&mut` parameter reads through to the caller's variable.
    fn deref(&mut self, operand: &AstNode) -> Expr {
        if operand.is("identifier") && self.by_ref.contains(self.cx.text(operand)) {
            return var(self.cx.text(operand));
        }
        let inner = self.expr(operand);
        if matches!(&inner, Expr::Var(name) if name == "self") {
            return inner;
        }
        Expr::Deref(Box::new(inner))
    }

    fn else_expr(&mut self, clause: &AstNode) -> Expr {
        match clause.first_named() {
            Some(inner) if inner.is("block") => self.block_expr(inner),
            Some(inner) => self.expr(inner),
            None => Expr::Literal(Value::None),
        }
    }

    /// `if let P = e { a } else { b }` as a two-arm match.
    fn if_let(&mut self, node: &AstNode, condition: &AstNode) -> Expr {
        let value = match condition.child("value") {
            Some(value) => self.expr(value),
            None => return self.cx.unsupported(condition),
        };
        let patterns = match condition.child("pattern") {
            Some(pattern) => self.alternatives(pattern),
            None => vec![Pattern::Wildcard],
        };
        let then = match node.child("consequence") {
            Some(block) => self.block_expr(block),
            None => Expr::Literal(Value::None),
        };
        let otherwise = match node.child("alternative") {
            Some(alt) => self.else_expr(alt),
            None => Expr::Literal(Value::None),
        };
        Expr::Match {
            value: Box::new(value),
            arms: vec![
                MatchArm {
                    patterns,
                    guard: None,
                    body: then,
                },
                MatchArm {
                    patterns: vec![Pattern::Wildcard],
                    guard: None,
                    body: otherwise,
                },
            ],
        }
    }

    fn match_expr(&mut self, node: &AstNode) -> Expr {
        let value = match node.child("value") {
            Some(value) => self.expr(value),
            None => return self.cx.unsupported(node),
        };
        let mut arms = Vec::new();
        if let Some(block) = node.child("body") {
            for arm in block.named_children() {
                if !matches!(arm.raw_kind, "match_arm" | "last_match_arm") {
                    continue;
                }
                let Some(head) = arm.child("pattern") else {
                    continue;
                };
                let pattern = head
                    .children
                    .iter()
                    .find(|c| c.field != Some("condition") && (c.named || c.raw_kind == "_"));
                let patterns = match pattern {
                    Some(pattern) => self.alternatives(pattern),
                    None => vec![Pattern::Wildcard],
                };
                let guard = head.child("condition").map(|c| self.expr(c));
                let body = match arm.child("value") {
                    Some(value) => self.expr(value),
                    None => Expr::Literal(Value::None),
                };
                arms.push(MatchArm { patterns, guard, body });
            }
        }
        Expr::Match {
            value: Box::new(value),
            arms,
        }
    }

    fn closure(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let mut params = Vec::new();
        let mut prologue = Vec::new();
        if let Some(list) = node.child("parameters") {
            for param in pattern_children(list) {
                let pattern = match param.raw_kind {
                    "parameter" => param.child("pattern").unwrap_or(param),
                    _ => param,
                };
                match simple_name(cx, pattern) {
                    Some(name) => params.push(name),
                    None => {
                        let temp = self.temp();
                        self.destructure(pattern, var(temp.clone()), &mut prologue);
                        params.push(temp);
                    }
                }
            }
        }
        let body = match node.child("body") {
            Some(body) => self.expr(body),
            None => return cx.unsupported(node),
        };
        let body = if prologue.is_empty() {
            body
        } else {
            Expr::Block {
                body: prologue,
                tail: Some(Box::new(body)),
            }
        };
        Expr::Lambda {
            params,
            body: Box::new(body),
        }
    }

    fn call(&mut self, node: &AstNode) -> Expr {
        let args: Vec<Expr> = node
            .child("arguments")
            .map(|a| a.named_children().map(|arg| self.expr(arg)).collect())
            .unwrap_or_default();
        match node.child("function") {
            Some(function) => self.callee(function, args),
            None => self.cx.unsupported(node),
        }
    }

    fn callee(&mut self, function: &AstNode, mut args: Vec<Expr>) -> Expr {
        let cx = self.cx;
        match function.raw_kind {
            "identifier" => call(cx.text(function), args),
            "scoped_identifier" => {
                let name = function.child("name").map(|n| cx.text(n)).unwrap_or("");
                let path = function.child("path").map(|p| strip_generics(cx.text(p))).unwrap_or_default();
                let owner = path.rsplit("::").next().unwrap_or(&path);
                if WRAPPERS.contains(&owner) && matches!(name, "new" | "clone" | "from") && args.len() == 1 {
                    return args.remove(0);
                }
                qualified_call(path.clone(), name, args)
            }
            "field_expression" => match (function.child("value"), function.child("field")) {
                (Some(value), Some(field)) => Expr::Method {
                    receiver: Box::new(self.expr(value)),
                    name: cx.text(field).to_string(),
                    args,
                    kwargs: Vec::new(),
                },
                _ => cx.unsupported(function),
            },
            "generic_function" => {
                let Some(inner) = function.child("function") else {
                    return cx.unsupported(function);
                };
                let mut lowered = self.callee(inner, args);
                if let Some(types) = function.child("type_arguments") {
                    let text = cx.text(types).trim();
                    let ty = text
                        .strip_prefix('<')
                        .and_then(|t| t.strip_suffix('>'))
                        .unwrap_or(text);
                    if let Expr::Method { kwargs, .. } | Expr::Call { kwargs, .. } = &mut lowered {
                        kwargs.push(("__type".to_string(), string(ty.trim())));
                    }
                }
                lowered
            }
            _ => cx.unsupported(function),
        }
    }

    // macros

    fn macro_call(&mut self, node: &AstNode) -> Expr {
        let cx = self.cx;
        let name = node.child("macro").map(|m| cx.text(m)).unwrap_or("");
        let name = name.rsplit("::").next().unwrap_or(name);
        let Some(tree) = node.child_of_kind("token_tree") else {
            return call(format!("{}!", name), Vec::new());
        };
        let inner = inner_text(cx.text(tree));
        let line = cx.line(tree);
        let lowered = match name {
            "vec" => self
                .fragment(&format!("fn __f() {{ __m([{}]); }}", inner), line, first_call_args)
                .and_then(|mut args| (!args.is_empty()).then(|| args.remove(0))),
            "matches" => {
                let parts = split_top_level(inner, ',');
                let Some((value, pattern)) = parts.split_first() else {
                    return cx.unsupported(node);
                };
                let source = format!(
                    "fn __f() {{ match ({}) {{ {} => true, _ => false }}; }}",
                    value,
                    pattern.join(",")
                );
                self.fragment(&source, line, first_match)
                    .and_then(|mut exprs| exprs.pop())
            }
            _ => self
                .fragment(&format!("fn __f() {{ __m({}); }}", inner), line, first_call_args)
                .map(|args| call(format!("{}!", name), args)),
        };
        lowered.unwrap_or_else(|| cx.unsupported(node))
    }

    /// Parse macro input as ordinary code and lower the node `find` picks
    /// out of it (its named children, for an argument list).
    fn fragment(&mut self, source: &str, line: u32, find: fn(&AstNode) -> Option<&AstNode>) -> Option<Vec<Expr>> {
        let (ast, errors) = parse_source(Language::Rust, &self.cx.ast.path, source);
        if !errors.is_empty() {
            return None;
        }
        let target = find(&ast.root)?;
        let mut sub = RustLowerer {
            cx: Cx::fragment(&ast, line),
            program: Program::default(),
            owner: self.owner.clone(),
            by_ref: self.by_ref.clone(),
            traits: HashMap::new(),
            temps: self.temps,
        };
        let exprs = if target.is("arguments") {
            target.named_children().map(|arg| sub.expr(arg)).collect()
        } else {
            vec![sub.expr(target)]
        };
        self.temps = sub.temps;
        self.program.merge(sub.program);
        Some(exprs)
    }
}

fn first_call_args(node: &AstNode) -> Option<&AstNode> {
    if node.is("call_expression") {
        return node.child("arguments");
    }
    node.children.iter().find_map(first_call_args)
}

fn first_match(node: &AstNode) -> Option<&AstNode> {
    if node.is("match_expression") {
        return Some(node);
    }
    node.children.iter().find_map(first_match)
}

/// Sub-patterns of a tuple-like pattern, `_` included.
fn pattern_children(node: &AstNode) -> impl Iterator<Item = &AstNode> {
    node.children.iter().filter(|c| c.named || c.raw_kind == "_")
}

/// Name bound by an identifier pattern, looking through `mut` and `&`.
fn simple_name(cx: Cx<'_>, pattern: &AstNode) -> Option<String> {
    match pattern.raw_kind {
        "identifier" => Some(cx.text(pattern).to_string()),
        "mut_pattern" | "reference_pattern" | "ref_pattern" => simple_name(cx, pattern.first_named()?),
        "self" => Some("self".to_string()),
        "_" => Some("_".to_string()),
        _ => None,
    }
}

fn target_names(target: &Target, names: &mut Vec<String>) {
    match target {
        Target::Var(name) if name != "_" => names.push(name.clone()),
        Target::Tuple(items) => items.iter().for_each(|t| target_names(t, names)),
        _ => {}
    }
}

/// Prefix every binding so a match arm can copy them out to the
/// enclosing scope.
fn rename_binds(pattern: Pattern) -> (Pattern, Vec<String>) {
    fn walk(pattern: Pattern, names: &mut Vec<String>) -> Pattern {
        match pattern {
            Pattern::Bind(name) => {
                let renamed = format!("__{}", name);
                names.push(name);
                Pattern::Bind(renamed)
            }
            Pattern::Tuple(items) => Pattern::Tuple(items.into_iter().map(|p| walk(p, names)).collect()),
            Pattern::Variant { name, inner } => Pattern::Variant {
                name,
                inner: inner.into_iter().map(|p| walk(p, names)).collect(),
            },
            other => other,
        }
    }
    let mut names = Vec::new();
    let pattern = walk(pattern, &mut names);
    (pattern, names)
}

/// Carry a `let` annotation into the call that produces the value:
/// `let n: i64 = s.parse().unwrap();`.
fn attach_type(expr: &mut Expr, ty: &str) {
    match expr {
        Expr::Method { name, kwargs, .. } if TYPED_METHODS.contains(&name.as_str()) => {
            if !kwargs.iter().any(|(k, _)| k == "__type") {
                kwargs.push(("__type".to_string(), string(ty)));
            }
        }
        Expr::Method { name, receiver, .. }
            if matches!(
                name.as_str(),
                "unwrap" | "expect" | "unwrap_or" | "unwrap_or_default" | "unwrap_or_else"
            ) =>
        {
            attach_type(receiver, ty)
        }
        Expr::Try(inner) => attach_type(inner, ty),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower_source(source: &str) -> Program {
        let (ast, errors) = parse_source(Language::Rust, "main.rs", source);
        assert!(errors.is_empty(), "{:?}", errors);
        lower(&ast)
    }

    fn function<'p>(program: &'p Program, name: &str) -> &'p Function {
        program.functions.iter().find(|f| f.name == name).unwrap()
    }

    #[test]
    fn test_impl_methods() {
        let program = lower_source(
            "struct Point { x: i32, y: i32 }\nimpl Point {\n    fn new(x: i32, y: i32) -> Self { Point { x, y } }\n    fn sum(&self) -> i32 { self.x + self.y }\n}\nfn main() {}\n",
        );
        let class = program.class("Point").unwrap();
        assert_eq!(class.fields.len(), 2);
        let new = function(&program, "new");
        assert!(new.is_static && !new.takes_self);
        assert_eq!(new.qualified, "Point::new");
        assert!(matches!(&new.tail, Some(Expr::StructLit { class, fields }) if class == "Point" && fields.len() == 2));
        let sum = function(&program, "sum");
        assert!(sum.takes_self && !sum.is_static);
        assert!(sum.body.is_empty());
        assert!(matches!(&sum.tail, Some(Expr::Binary { op: BinOp::Add, .. })));
        assert!(function(&program, "main").is_entry());
    }

    #[test]
    fn test_mut_ref_param_aliases() {
        let program = lower_source("fn bump(x: &mut i32) {\n    *x += 1;\n}\n");
        let bump = function(&program, "bump");
        assert!(bump.params[0].by_ref);
        assert!(matches!(
            &bump.body[0].kind,
            StmtKind::Expr(Expr::Assign { target, op: Some(BinOp::Add), .. }) if matches!(target.as_ref(), Target::Var(n) if n == "x")
        ));
    }

    #[test]
    fn test_if_let_becomes_match() {
        let program = lower_source(
            "fn main() {\n    let v: Option<i32> = Some(3);\n    if let Some(n) = v {\n        println!(\"{}\", n);\n    } else {\n        println!(\"none\");\n    }\n    let done = true;\n}\n",
        );
        let main = function(&program, "main");
        let StmtKind::Expr(Expr::Match { arms, .. }) = &main.body[1].kind else {
            panic!("expected match, got {:?}", main.body[1].kind);
        };
        assert_eq!(arms.len(), 2);
        assert!(matches!(&arms[0].patterns[0], Pattern::Variant { name, inner } if name == "Some" && inner.len() == 1));
        assert!(matches!(arms[1].patterns[0], Pattern::Wildcard));
    }

    #[test]
    fn test_macro_arguments() {
        let program = lower_source(
            "fn main() {\n    let n = 4;\n    let v = vec![0; n];\n    println!(\"{} {}\", n + 1, v.len());\n}\n",
        );
        let main = function(&program, "main");
        assert!(matches!(&main.body[1].kind, StmtKind::Declare { value: Some(Expr::Repeat { .. }), .. }));
        assert!(matches!(
            &main.body[2].kind,
            StmtKind::Expr(Expr::Call { name, args, .. }) if name == "println!" && args.len() == 3
        ));
        assert_eq!(main.body[2].line, 4);
    }

    #[test]
    fn test_match_arms() {
        let program = lower_source(
            "fn classify(n: i32) -> &'static str {\n    match n {\n        0 | 1 => \"small\",\n        x if x < 0 => \"negative\",\n        2..=9 => \"digit\",\n        _ => \"big\",\n    }\n}\n",
        );
        let classify = function(&program, "classify");
        let Some(Expr::Match { arms, .. }) = &classify.tail else {
            panic!("expected match tail");
        };
        assert_eq!(arms.len(), 4);
        assert_eq!(arms[0].patterns.len(), 2);
        assert!(arms[1].guard.is_some());
        assert!(matches!(arms[2].patterns[0], Pattern::Range { inclusive: true, .. }));
        assert!(matches!(arms[3].patterns[0], Pattern::Wildcard));
    }

    #[test]
    fn test_enum_and_trait_defaults() {
        let program = lower_source(
            "enum Shape { Circle(f64), Square(f64) }\ntrait Named {\n    fn name(&self) -> String { String::from(\"shape\") }\n}\nimpl Named for Shape {}\n",
        );
        assert_eq!(program.class("Shape").unwrap().variants, vec!["Circle", "Square"]);
        let name = function(&program, "name");
        assert_eq!(name.owner.as_deref(), Some("Shape"));
    }

    #[test]
    fn test_typed_let_reaches_parse() {
        let program = lower_source("fn main() {\n    let n: i64 = \"42\".trim().parse().unwrap();\n}\n");
        let main = function(&program, "main");
        let StmtKind::Declare { value: Some(Expr::Method { receiver, .. }), .. } = &main.body[0].kind else {
            panic!("expected declaration");
        };
        assert!(matches!(
            receiver.as_ref(),
            Expr::Method { name, kwargs, .. } if name == "parse" && kwargs[0].0 == "__type"
        ));
    }
}
