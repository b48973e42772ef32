//! AST node definitions and source spans for Osprey.
//!
//! This crate defines the abstract syntax tree handed to the compiler core by
//! the external front end. Every node carries a [`Span`] for source location
//! tracking. All nodes are serde-serializable so a front end in another
//! process can ship a program as JSON.
//!
//! Arithmetic arrives pre-wrapped: the AST builder turns every arithmetic
//! binary expression into an [`ExprKind::Result`] node (see [`build::arith`]).

use serde::{Deserialize, Serialize};

pub mod build;

/// Identifies a source file in the compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

/// A byte offset range within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub file: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file: FileId, start: u32, end: u32) -> Self {
        Self { file, start, end }
    }

    /// Create a span that covers both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        debug_assert_eq!(
            self.file, other.file,
            "cannot merge spans from different files"
        );
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// A synthetic span for compiler-generated nodes.
    pub fn synthetic() -> Self {
        Self {
            file: FileId(u32::MAX),
            start: 0,
            end: 0,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.file == FileId(u32::MAX)
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::synthetic()
    }
}

/// A value paired with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    #[serde(default)]
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

// ---------------------------------------------------------------------------
// Literal values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Unit,
}

// ---------------------------------------------------------------------------
// Type expressions
// ---------------------------------------------------------------------------

/// A type as written in source: `Int`, `Result<Int, String>`, `fn(Int) -> Int`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeExpr {
    Named(String),
    Generic(String, Vec<TypeExpr>),
    Function(Vec<TypeExpr>, Box<TypeExpr>),
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Named(name.into())
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Literal value.
    Lit(Lit),

    /// Variable, function or extern reference.
    Var(String),

    /// Binary operator. Arithmetic operators are normally found inside a
    /// [`ExprKind::Result`] wrapper produced by the AST builder.
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Unary operator: `-x`, `!x`.
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// Function application with positional or named arguments.
    Call { func: Box<Expr>, args: Vec<Argument> },

    /// Lambda: `fn(x, y: Int) -> Int => body`.
    Lambda {
        params: Vec<Param>,
        return_annotation: Option<TypeExpr>,
        body: Box<Expr>,
    },

    /// Match expression: `match scrutinee { arms }`.
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },

    /// `Result` wrapper. `error_type` is `None` for the builder's generic
    /// arithmetic success wrapper.
    Result {
        success: bool,
        value: Box<Expr>,
        error_type: Option<String>,
    },

    /// Field access: `expr.field`.
    FieldAccess { expr: Box<Expr>, field: String },

    /// Record or variant construction: `Point { x: 1, y: 2 }`.
    Construct {
        type_name: String,
        fields: Vec<(String, Expr)>,
    },

    /// Non-destructive record update: `point { x: 5 }`.
    Update {
        target: Box<Expr>,
        fields: Vec<(String, Expr)>,
    },

    /// Block: statements followed by an optional result expression.
    Block {
        statements: Vec<Stmt>,
        result: Option<Box<Expr>>,
    },

    /// List literal: `[a, b, c]`.
    List(Vec<Expr>),

    /// List element access: `list[index]`.
    Index { list: Box<Expr>, index: Box<Expr> },

    /// String interpolation: `"hello ${name}"`.
    Interpolated(Vec<InterpolatedPart>),

    /// Effect operation: `perform Logger.log("x")`.
    Perform {
        effect: String,
        operation: String,
        args: Vec<Expr>,
    },

    /// Effect handler: `handle Logger log msg => body in expr`.
    Handle {
        effect: String,
        arms: Vec<HandlerArm>,
        body: Box<Expr>,
    },

    /// `spawn expr`.
    Spawn(Box<Expr>),

    /// `await fiber`.
    Await(Box<Expr>),

    /// `yield` or `yield value`.
    Yield(Option<Box<Expr>>),

    /// `Channel<T>(capacity)`.
    ChannelCreate {
        element: Option<TypeExpr>,
        capacity: Option<Box<Expr>>,
    },

    /// `send(channel, value)`.
    Send { channel: Box<Expr>, value: Box<Expr> },

    /// `recv(channel)`.
    Recv(Box<Expr>),

    /// `select { pattern => op => body, _ => default }`.
    Select(Vec<SelectArm>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Expr,
}

impl Argument {
    pub fn positional(value: Expr) -> Self {
        Self { name: None, value }
    }

    pub fn named(name: impl Into<String>, value: Expr) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub annotation: Option<TypeExpr>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerArm {
    pub operation: String,
    pub params: Vec<String>,
    pub body: Expr,
    #[serde(default)]
    pub span: Span,
}

/// One `select` arm. `operation` is `None` for the wildcard default arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectArm {
    pub pattern: Pattern,
    pub operation: Option<Expr>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InterpolatedPart {
    Text(String),
    Expr(Expr),
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

pub type Pattern = Spanned<PatternKind>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternKind {
    /// `_`
    Wildcard,
    /// Binds the whole value: `x`.
    Var(String),
    /// Literal: `0`, `"a"`, `true`.
    Lit(Lit),
    /// Constructor with field destructuring: `Success { value }`.
    Constructor {
        name: String,
        fields: Vec<FieldPattern>,
    },
}

/// `field` binds the field under its own name; `field: pattern` nests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPattern {
    pub field: String,
    pub pattern: Option<Pattern>,
}

// ---------------------------------------------------------------------------
// Statements and declarations
// ---------------------------------------------------------------------------

pub type Stmt = Spanned<StmtKind>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Let {
        name: String,
        mutable: bool,
        annotation: Option<TypeExpr>,
        value: Expr,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Fn(FnDecl),
    Extern(ExternDecl),
    Type(TypeDecl),
    Effect(EffectDecl),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FnDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_annotation: Option<TypeExpr>,
    /// Declared effects: `fn f() -> Int !Logger`.
    #[serde(default)]
    pub effects: Vec<String>,
    pub body: Expr,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternDecl {
    pub name: String,
    pub params: Vec<(String, TypeExpr)>,
    pub return_annotation: Option<TypeExpr>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub type_params: Vec<String>,
    pub variants: Vec<VariantDecl>,
    #[serde(default)]
    pub span: Span,
}

impl TypeDecl {
    /// A declaration with a single variant named after the type is a record.
    pub fn is_record(&self) -> bool {
        self.variants.len() == 1 && self.variants[0].name == self.name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDecl {
    pub name: String,
    pub operations: Vec<OperationDecl>,
    #[serde(default)]
    pub span: Span,
}

/// `op: fn(A, B) -> R` inside an effect declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDecl {
    pub name: String,
    pub params: Vec<TypeExpr>,
    pub ret: TypeExpr,
}

/// A whole compilation unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_detection_uses_single_self_named_variant() {
        let record = TypeDecl {
            name: "Point".into(),
            type_params: vec![],
            variants: vec![VariantDecl {
                name: "Point".into(),
                fields: vec![],
            }],
            span: Span::synthetic(),
        };
        assert!(record.is_record());

        let union = TypeDecl {
            name: "Shape".into(),
            type_params: vec![],
            variants: vec![VariantDecl {
                name: "Circle".into(),
                fields: vec![],
            }],
            span: Span::synthetic(),
        };
        assert!(!union.is_record());
    }

    #[test]
    fn program_json_round_trip_defaults_missing_spans() {
        let json = r#"{
            "statements": [
                { "node": { "Expr": { "node": { "Lit": { "Int": 7 } } } } }
            ]
        }"#;
        let program: Program = serde_json::from_str(json).expect("program should parse");
        assert_eq!(program.statements.len(), 1);
        assert!(program.statements[0].span.is_synthetic());
        let StmtKind::Expr(expr) = &program.statements[0].node else {
            panic!("expected expression statement");
        };
        assert_eq!(expr.node, ExprKind::Lit(Lit::Int(7)));
    }

    #[test]
    fn span_merge_covers_both() {
        let a = Span::new(FileId(0), 4, 8);
        let b = Span::new(FileId(0), 1, 5);
        assert_eq!(a.merge(b), Span::new(FileId(0), 1, 8));
    }
}
