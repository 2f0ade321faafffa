use std::sync::Arc;

use crate::pos::Pos;

#[derive(Clone, Debug)]
pub struct Program {
    pub module: Option<ModuleHeader>,
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct ModuleHeader {
    pub name: String,
    pub pos: Pos,
}

#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Let {
        name: String,
        value: Expr,
        constant: bool,
        exported: bool,
    },
    Fn {
        def: Arc<FunctionDef>,
        exported: bool,
    },
    Assign {
        target: AssignTarget,
        value: Expr,
    },
    Expr(Expr),
    Block(Vec<Stmt>),
    Return(Option<Expr>),
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    For {
        first: String,
        second: Option<String>,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
}

impl StmtKind {
    /// Name bound by an `export` statement, if any.
    pub fn exported_name(&self) -> Option<&str> {
        match self {
            StmtKind::Let {
                name,
                exported: true,
                ..
            } => Some(name),
            StmtKind::Fn {
                def,
                exported: true,
            } => def.name.as_deref(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AssignTarget {
    pub root: String,
    pub path: Vec<PathSegment>,
}

#[derive(Clone, Debug)]
pub enum PathSegment {
    Field(String),
    Index(Expr),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Coalesce,
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

#[derive(Clone, Debug)]
pub enum DictKey {
    Static(String),
    Computed(Expr),
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Expr>),
    Dict(Vec<(DictKey, Expr)>),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Function(Arc<FunctionDef>),
}
