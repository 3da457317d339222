// Statement/expression IR shared by every language's lowering pass

use super::value::Value;

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(line: u32, kind: StmtKind) -> Self {
        Self { line, kind }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    /// `int x = 1;`, `let x = 1;`. `copy` forces a deep copy of the
    /// initializer (c++ value semantics for containers).
    Declare {
        name: String,
        hint: TypeHint,
        value: Option<Expr>,
        copy: bool,
    },
    If {
        cond: Expr,
        then: Block,
        otherwise: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    DoWhile {
        body: Block,
        cond: Expr,
    },
    For {
        init: Block,
        cond: Option<Expr>,
        update: Vec<Expr>,
        body: Block,
    },
    ForEach {
        target: Target,
        iter: Expr,
        body: Block,
    },
    /// `fallthrough` is c-style: execution continues into the next case
    /// until a `break`.
    Switch {
        value: Expr,
        cases: Vec<Case>,
        fallthrough: bool,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Pass,
    /// `None` re-raises the exception being handled.
    Raise(Option<Expr>),
    Try {
        body: Block,
        handlers: Vec<Handler>,
        orelse: Block,
        finally: Block,
    },
    Global(Vec<String>),
    Block(Block),
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct Case {
    /// Empty for `default`.
    pub labels: Vec<Expr>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct Handler {
    /// Exception kinds caught; empty catches everything.
    pub kinds: Vec<String>,
    pub binding: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    /// `[v; n]`, `vec![v; n]`
    Repeat {
        value: Box<Expr>,
        count: Box<Expr>,
    },
    /// Fixed-size arrays: `int a[3][4]`, `new int[n]`.
    Array {
        dims: Vec<Expr>,
        hint: TypeHint,
        init: Option<Box<Expr>>,
    },
    Range {
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        inclusive: bool,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Logical {
        and: bool,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cond {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        name: String,
        qualifier: Option<String>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Method {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    /// `new Point(1, 2)`
    New {
        class: String,
        args: Vec<Expr>,
    },
    /// `Point { x: 1, y: 2 }`
    StructLit {
        class: String,
        fields: Vec<(String, Expr)>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Field {
        target: Box<Expr>,
        name: String,
    },
    /// Qualified value path: `i32::MAX`, `Color::Red`, `Math.PI`.
    Path {
        qualifier: String,
        name: String,
    },
    /// rust `?`
    Try(Box<Expr>),
    Cast {
        hint: TypeHint,
        value: Box<Expr>,
    },
    AddrOf(Box<Expr>),
    Deref(Box<Expr>),
    Assign {
        target: Box<Target>,
        op: Option<BinOp>,
        value: Box<Expr>,
    },
    /// `++`/`--`
    Update {
        target: Box<Target>,
        delta: i64,
        prefix: bool,
    },
    /// Block expression with an optional tail value.
    Block {
        body: Block,
        tail: Option<Box<Expr>>,
    },
    /// Expression-position `if` (rust).
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    Match {
        value: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
    Comprehension {
        element: Box<Expr>,
        /// Present for dict comprehensions.
        key: Option<Box<Expr>>,
        clauses: Vec<CompClause>,
    },
    /// f-strings
    Format(Vec<FormatPart>),
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub enum Target {
    Var(String),
    Index { base: Box<Target>, index: Expr },
    Field { base: Box<Target>, name: String },
    Deref(Expr),
    Tuple(Vec<Target>),
}

impl Target {
    /// The variable an assignment through this target changes.
    pub fn root(&self) -> Option<&str> {
        match self {
            Target::Var(name) => Some(name.as_str()),
            Target::Index { base, .. } | Target::Field { base, .. } => base.root(),
            Target::Deref(Expr::Var(name)) => Some(name.as_str()),
            Target::Deref(_) | Target::Tuple(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub patterns: Vec<Pattern>,
    pub guard: Option<Expr>,
    pub body: Expr,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Wildcard,
    Literal(Value),
    Range {
        start: Value,
        end: Value,
        inclusive: bool,
    },
    Bind(String),
    /// `Some(x)`, `Shape::Circle(r)`, `Color::Red`
    Variant {
        name: String,
        inner: Vec<Pattern>,
    },
    Tuple(Vec<Pattern>),
}

#[derive(Debug, Clone)]
pub enum CompClause {
    For { target: Target, iter: Expr },
    If(Expr),
}

#[derive(Debug, Clone)]
pub enum FormatPart {
    Text(String),
    Value {
        expr: Expr,
        /// `!r`
        repr: bool,
        spec: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl BinOp {
    /// Arithmetic operator from its token, including the compound
    /// assignment forms (`+=`).
    pub fn from_token(token: &str) -> Option<BinOp> {
        let op = token.strip_suffix('=').filter(|t| !t.is_empty() && !matches!(*t, "=" | "!" | "<" | ">"));
        let token = op.unwrap_or(token);
        Some(match token {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "//" => BinOp::FloorDiv,
            "%" => BinOp::Mod,
            "**" => BinOp::Pow,
            "&" => BinOp::BitAnd,
            "|" => BinOp::BitOr,
            "^" => BinOp::BitXor,
            "<<" => BinOp::Shl,
            ">>" => BinOp::Shr,
            "==" => BinOp::Eq,
            "!=" | "<>" => BinOp::Ne,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            ">" => BinOp::Gt,
            ">=" => BinOp::Ge,
            "in" => BinOp::In,
            "not in" => BinOp::NotIn,
            "is" => BinOp::Is,
            "is not" => BinOp::IsNot,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

/// Declared type, as far as evaluation cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeHint {
    Int,
    Float,
    Bool,
    Str,
    Char,
    List,
    Struct(String),
    Auto,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub hint: TypeHint,
    pub default: Option<Expr>,
    /// c++ `T&`: binds to the caller's variable.
    pub by_ref: bool,
    /// c++ containers passed by value are copied.
    pub copy: bool,
}

#[derive(Debug, Clone)]
pub struct Function {
    /// Simple name used for lookup.
    pub name: String,
    /// Name reported in trace steps.
    pub qualified: String,
    /// Class, struct or impl the function belongs to.
    pub owner: Option<String>,
    pub file: String,
    pub line: u32,
    pub end_line: u32,
    pub params: Vec<Param>,
    /// rust `&self` methods and python methods bind the receiver to `self`.
    pub takes_self: bool,
    pub is_static: bool,
    pub body: Block,
    /// Rust tail expression.
    pub tail: Option<Expr>,
    pub return_hint: TypeHint,
}

impl Function {
    /// `main` as a free function, or java's static `main`.
    pub fn is_entry(&self) -> bool {
        self.name == "main" && (self.owner.is_none() || self.is_static)
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub hint: TypeHint,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub base: Option<String>,
    pub fields: Vec<FieldDef>,
    /// Enum variants (rust, java).
    pub variants: Vec<String>,
}

/// Top-level code of one file: python module statements, or global and
/// static initializers elsewhere.
#[derive(Debug, Clone)]
pub struct ModuleCode {
    pub file: String,
    pub body: Block,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub functions: Vec<Function>,
    pub classes: Vec<ClassDef>,
    pub modules: Vec<ModuleCode>,
}

impl Program {
    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// The enum declaring `variant`, if any.
    pub fn variant_owner(&self, variant: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|c| c.variants.iter().any(|v| v == variant))
    }

    pub fn merge(&mut self, other: Program) {
        self.functions.extend(other.functions);
        self.classes.extend(other.classes);
        self.modules.extend(other.modules);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_tokens() {
        assert_eq!(BinOp::from_token("+="), Some(BinOp::Add));
        assert_eq!(BinOp::from_token("<<="), Some(BinOp::Shl));
        assert_eq!(BinOp::from_token("<="), Some(BinOp::Le));
        assert_eq!(BinOp::from_token("=="), Some(BinOp::Eq));
        assert_eq!(BinOp::from_token("!="), Some(BinOp::Ne));
        assert_eq!(BinOp::from_token("//="), Some(BinOp::FloorDiv));
        assert_eq!(BinOp::from_token("not in"), Some(BinOp::NotIn));
        assert_eq!(BinOp::from_token("&&"), None);
    }

    #[test]
    fn test_target_root() {
        let target = Target::Index {
            base: Box::new(Target::Field {
                base: Box::new(Target::Var("grid".into())),
                name: "cells".into(),
            }),
            index: Expr::Literal(Value::Int(0)),
        };
        assert_eq!(target.root(), Some("grid"));
    }
}
