//! Guarded IR: the rewritten program handed from the policy transformer to
//! the compiler.
//!
//! Every attribute read, item read, write target and operator operand is a
//! dedicated node here. There is no node for an unguarded attribute access,
//! and every `Target::Name` is checked by the name guard when it binds.

use serde::{Deserialize, Serialize};

use crate::syntax::ast::{BinaryOp, BoolOp, CompareOp, Constant, UnaryOp};
use crate::syntax::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct GuardedModule {
    pub functions: Vec<GuardedFunction>,
}

impl GuardedModule {
    pub fn function(&self, name: &str) -> Option<&GuardedFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardedFunction {
    pub name: String,
    pub params: Vec<GuardedParam>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardedParam {
    pub name: String,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        target: Target,
        value: Expr,
    },
    Delete(DeleteTarget),
    Return(Option<Expr>),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    /// Single-resource `with`; the optional target is name-guarded like any
    /// other binding.
    With {
        context: Expr,
        target: Option<Target>,
        body: Vec<Stmt>,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Pass,
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    pub kind: Option<Expr>,
    /// Bound through the name guard when the handler matches.
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// A binding site.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    /// `object` is always an [`ExprKind::WriteGuard`].
    Attr { object: Expr, name: String },
    /// `object` is always an [`ExprKind::WriteGuard`].
    Item { object: Expr, index: Expr },
    Unpack(Vec<Target>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    Attr { object: Expr, name: String },
    Item { object: Expr, index: Expr },
}

/// Which write the write guard is admitting the object for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOp {
    SetAttr,
    DelAttr,
    SetItem,
    DelItem,
}

/// The four operator guard families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperandCheck {
    Unary,
    Binary,
    Bool,
    Compare,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Wrap `self` in an operand check of the given family.
    pub fn checked(self, check: OperandCheck) -> Self {
        let span = self.span;
        Self::new(
            ExprKind::Check {
                check,
                operand: Box::new(self),
            },
            span,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(Constant),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    GetAttr {
        object: Box<Expr>,
        name: String,
    },
    GetItem {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    WriteGuard {
        object: Box<Expr>,
        op: WriteOp,
    },
    Check {
        check: OperandCheck,
        operand: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CompareOp>,
        comparators: Vec<Expr>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<(String, Expr)>,
    },
}
