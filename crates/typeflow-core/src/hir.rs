//! Bound intermediate representation consumed by the analyzer
//!
//! The binder hands the analyzer one [`HirRoutine`] per routine. Trees are
//! treated as immutable once [`HirRoutine::new`] has numbered their
//! expressions: the [`ExprId`] assigned there is the stable identity under
//! which the solver caches per-expression type masks.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub type Symbol = String;

/// Source range of a node, in byte offsets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

/// Stable identity of an expression node within its routine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Null,
    /// A constant kind passed through by the binder that has no value-kind
    /// mapping in the type lattice.
    Unknown(String),
}

impl Literal {
    pub fn kind_name(&self) -> &str {
        match self {
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::String(_) => "string",
            Literal::Bytes(_) => "bytes",
            Literal::Bool(_) => "bool",
            Literal::Null => "null",
            Literal::Unknown(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Xor,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    CastInt,
    CastFloat,
    CastString,
    CastBool,
    CastArray,
}

/// Type hint written on a parameter or routine signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclaredType {
    Int,
    Float,
    String,
    Bool,
    Array,
    Callable,
    Mixed,
    Void,
    Class(Symbol),
    Nullable(Box<DeclaredType>),
    Union(Vec<DeclaredType>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirExpr {
    pub id: ExprId,
    pub span: Span,
    pub kind: HirExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HirExprKind {
    Literal(Literal),
    Var(Symbol),
    Binary {
        op: BinOp,
        left: Box<HirExpr>,
        right: Box<HirExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<HirExpr>,
    },
    Conditional {
        condition: Box<HirExpr>,
        then_expr: Box<HirExpr>,
        else_expr: Box<HirExpr>,
    },
    /// Call through a name resolved by the symbol table
    Call { func: Symbol, args: Vec<HirExpr> },
    /// Call through a computed callee (`$f(...)`)
    DynamicCall { callee: Box<HirExpr>, args: Vec<HirExpr> },
    New { class: Symbol, args: Vec<HirExpr> },
    Array(Vec<ArrayItem>),
    Index { base: Box<HirExpr>, index: Box<HirExpr> },
    /// Closure value; names the routine holding the closure body
    Lambda { routine: Symbol },
    InstanceOf { value: Box<HirExpr>, class: Symbol },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayItem {
    pub key: Option<HirExpr>,
    pub value: HirExpr,
}

impl HirExpr {
    /// Create an unnumbered expression; ids are assigned by [`HirRoutine::new`].
    pub fn new(kind: HirExprKind) -> Self {
        Self {
            id: ExprId::default(),
            span: Span::default(),
            kind,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn int(value: i64) -> Self {
        Self::new(HirExprKind::Literal(Literal::Int(value)))
    }

    pub fn float(value: f64) -> Self {
        Self::new(HirExprKind::Literal(Literal::Float(value)))
    }

    pub fn string(value: &str) -> Self {
        Self::new(HirExprKind::Literal(Literal::String(value.to_string())))
    }

    pub fn bool(value: bool) -> Self {
        Self::new(HirExprKind::Literal(Literal::Bool(value)))
    }

    pub fn null() -> Self {
        Self::new(HirExprKind::Literal(Literal::Null))
    }

    pub fn literal(lit: Literal) -> Self {
        Self::new(HirExprKind::Literal(lit))
    }

    pub fn var(name: &str) -> Self {
        Self::new(HirExprKind::Var(name.to_string()))
    }

    pub fn binary(op: BinOp, left: HirExpr, right: HirExpr) -> Self {
        Self::new(HirExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(op: UnaryOp, operand: HirExpr) -> Self {
        Self::new(HirExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn conditional(condition: HirExpr, then_expr: HirExpr, else_expr: HirExpr) -> Self {
        Self::new(HirExprKind::Conditional {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    pub fn call(func: &str, args: Vec<HirExpr>) -> Self {
        Self::new(HirExprKind::Call {
            func: func.to_string(),
            args,
        })
    }

    pub fn dynamic_call(callee: HirExpr, args: Vec<HirExpr>) -> Self {
        Self::new(HirExprKind::DynamicCall {
            callee: Box::new(callee),
            args,
        })
    }

    pub fn new_object(class: &str, args: Vec<HirExpr>) -> Self {
        Self::new(HirExprKind::New {
            class: class.to_string(),
            args,
        })
    }

    pub fn array(items: Vec<(Option<HirExpr>, HirExpr)>) -> Self {
        Self::new(HirExprKind::Array(
            items
                .into_iter()
                .map(|(key, value)| ArrayItem { key, value })
                .collect(),
        ))
    }

    pub fn index(base: HirExpr, index: HirExpr) -> Self {
        Self::new(HirExprKind::Index {
            base: Box::new(base),
            index: Box::new(index),
        })
    }

    pub fn lambda(routine: &str) -> Self {
        Self::new(HirExprKind::Lambda {
            routine: routine.to_string(),
        })
    }

    pub fn instance_of(value: HirExpr, class: &str) -> Self {
        Self::new(HirExprKind::InstanceOf {
            value: Box::new(value),
            class: class.to_string(),
        })
    }

    /// The literal value of this expression, if it is one
    pub fn as_literal(&self) -> Option<&Literal> {
        match &self.kind {
            HirExprKind::Literal(lit) => Some(lit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    Var(Symbol),
    /// `$base[index] = value`; `None` is the append form `$base[] = value`
    Index { base: Symbol, index: Option<HirExpr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HirStmt {
    Assign {
        target: AssignTarget,
        value: HirExpr,
    },
    Expr(HirExpr),
    Return(Option<HirExpr>),
    If {
        condition: HirExpr,
        then_body: Vec<HirStmt>,
        else_body: Option<Vec<HirStmt>>,
    },
    While {
        condition: HirExpr,
        body: Vec<HirStmt>,
    },
    Foreach {
        iter: HirExpr,
        key: Option<Symbol>,
        value: Symbol,
        body: Vec<HirStmt>,
    },
    Break,
    Continue,
    Try {
        body: Vec<HirStmt>,
        catches: Vec<CatchClause>,
        finally: Option<Vec<HirStmt>>,
    },
    Throw(HirExpr),
    Unset(Symbol),
}

impl HirStmt {
    pub fn assign(name: &str, value: HirExpr) -> Self {
        HirStmt::Assign {
            target: AssignTarget::Var(name.to_string()),
            value,
        }
    }

    pub fn assign_index(base: &str, index: Option<HirExpr>, value: HirExpr) -> Self {
        HirStmt::Assign {
            target: AssignTarget::Index {
                base: base.to_string(),
                index,
            },
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub class: Symbol,
    pub var: Symbol,
    pub body: Vec<HirStmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirParam {
    pub name: Symbol,
    pub declared: Option<DeclaredType>,
    pub default: Option<HirExpr>,
}

impl HirParam {
    pub fn new(name: &str, declared: DeclaredType) -> Self {
        Self {
            name: name.to_string(),
            declared: Some(declared),
            default: None,
        }
    }

    pub fn untyped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            declared: None,
            default: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirRoutine {
    pub name: Symbol,
    pub params: SmallVec<[HirParam; 4]>,
    pub return_type: Option<DeclaredType>,
    pub body: Vec<HirStmt>,
    pub span: Span,
    expr_count: u32,
}

impl HirRoutine {
    /// Create a routine and number every expression in its body.
    pub fn new(name: &str, params: Vec<HirParam>, mut body: Vec<HirStmt>) -> Self {
        let mut params: SmallVec<[HirParam; 4]> = SmallVec::from_vec(params);
        let mut next = 0;
        for param in params.iter_mut() {
            if let Some(default) = &mut param.default {
                number_expr(default, &mut next);
            }
        }
        number_stmts(&mut body, &mut next);

        Self {
            name: name.to_string(),
            params,
            return_type: None,
            body,
            span: Span::default(),
            expr_count: next,
        }
    }

    pub fn with_return_type(mut self, ty: DeclaredType) -> Self {
        self.return_type = Some(ty);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Number of distinct expression ids handed out
    pub fn expr_count(&self) -> u32 {
        self.expr_count
    }
}

fn number_stmts(stmts: &mut [HirStmt], next: &mut u32) {
    for stmt in stmts {
        match stmt {
            HirStmt::Assign { target, value } => {
                if let AssignTarget::Index { index: Some(index), .. } = target {
                    number_expr(index, next);
                }
                number_expr(value, next);
            }
            HirStmt::Expr(expr) | HirStmt::Throw(expr) | HirStmt::Return(Some(expr)) => {
                number_expr(expr, next)
            }
            HirStmt::If {
                condition,
                then_body,
                else_body,
            } => {
                number_expr(condition, next);
                number_stmts(then_body, next);
                if let Some(else_body) = else_body {
                    number_stmts(else_body, next);
                }
            }
            HirStmt::While { condition, body } => {
                number_expr(condition, next);
                number_stmts(body, next);
            }
            HirStmt::Foreach { iter, body, .. } => {
                number_expr(iter, next);
                number_stmts(body, next);
            }
            HirStmt::Try {
                body,
                catches,
                finally,
            } => {
                number_stmts(body, next);
                for catch in catches {
                    number_stmts(&mut catch.body, next);
                }
                if let Some(finally) = finally {
                    number_stmts(finally, next);
                }
            }
            HirStmt::Return(None) | HirStmt::Break | HirStmt::Continue | HirStmt::Unset(_) => {}
        }
    }
}

fn number_expr(expr: &mut HirExpr, next: &mut u32) {
    expr.id = ExprId(*next);
    *next += 1;
    match &mut expr.kind {
        HirExprKind::Literal(_) | HirExprKind::Var(_) | HirExprKind::Lambda { .. } => {}
        HirExprKind::Binary { left, right, .. } => {
            number_expr(left, next);
            number_expr(right, next);
        }
        HirExprKind::Unary { operand, .. } => number_expr(operand, next),
        HirExprKind::Conditional {
            condition,
            then_expr,
            else_expr,
        } => {
            number_expr(condition, next);
            number_expr(then_expr, next);
            number_expr(else_expr, next);
        }
        HirExprKind::Call { args, .. } | HirExprKind::New { args, .. } => {
            for arg in args {
                number_expr(arg, next);
            }
        }
        HirExprKind::DynamicCall { callee, args } => {
            number_expr(callee, next);
            for arg in args {
                number_expr(arg, next);
            }
        }
        HirExprKind::Array(items) => {
            for item in items {
                if let Some(key) = &mut item.key {
                    number_expr(key, next);
                }
                number_expr(&mut item.value, next);
            }
        }
        HirExprKind::Index { base, index } => {
            number_expr(base, next);
            number_expr(index, next);
        }
        HirExprKind::InstanceOf { value, .. } => number_expr(value, next),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HirClass {
    pub name: Symbol,
    pub parent: Option<Symbol>,
}

/// Routine with no body available to the analyzer (library code)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRoutine {
    pub name: Symbol,
    pub return_type: Option<DeclaredType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HirModule {
    pub routines: Vec<HirRoutine>,
    pub classes: Vec<HirClass>,
    pub externals: Vec<ExternalRoutine>,
}
