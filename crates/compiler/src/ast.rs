//! Abstract syntax tree.
//!
//! One node per grammar production. Chain productions (declaration lists,
//! compound statements, expressions, terms, parameter and argument lists)
//! are ordered sequences whose elements carry the per-step discriminant
//! (add-op, mul-op, relation); iteration order is source order. The tree
//! holds forward links only; the back reference from an identifier to its
//! resolved symbol entry is an index handle filled in by the analyzer.

use crate::symtab::{ScopeId, SymId};

/// Identifier kind as recorded by the parser, before symbol installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentKind {
    /// Not yet classified (a plain use).
    Init,
    IntVar,
    UintVar,
    CharVar,
    IntConst,
    UintConst,
    CharConst,
    IntArray,
    UintArray,
    CharArray,
    IntByVal,
    UintByVal,
    CharByVal,
    IntByRef,
    UintByRef,
    CharByRef,
    IntFunc,
    UintFunc,
    CharFunc,
    Proc,
    /// The synthetic main-program entry.
    Entry,
}

/// An identifier occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub kind: IdentKind,
    /// Constant value, for constant declarations.
    pub value: i64,
    /// Array length, for array declarations.
    pub length: u32,
    pub line: usize,
    /// Resolved symbol entry, filled by semantic analysis.
    pub symbol: Option<SymId>,
}

impl Ident {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Ident {
            name: name.into(),
            kind: IdentKind::Init,
            value: 0,
            length: 0,
            line,
            symbol: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Synthetic `_start` entry identifier.
    pub entry: Ident,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub consts: Vec<ConstDef>,
    pub vars: Vec<VarDef>,
    pub subprogs: Vec<SubDecl>,
    pub body: Option<CompStmt>,
}

/// `ident = constant` — the value and kind live on the identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstDef {
    pub ident: Ident,
}

/// `a, b, c : type` — every identifier carries the resolved kind.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDef {
    pub idents: Vec<Ident>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubDecl {
    Proc(ProcDef),
    Func(FuncDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcDef {
    pub head: ProcHead,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcHead {
    pub ident: Ident,
    pub params: Vec<ParamDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub head: FuncHead,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncHead {
    pub ident: Ident,
    pub params: Vec<ParamDef>,
}

/// `[var] a, b : type` — by-reference and type are encoded in the kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub idents: Vec<Ident>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompStmt {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign(AssignStmt),
    If(Box<IfStmt>),
    Repeat(Box<RepeatStmt>),
    For(Box<ForStmt>),
    Call(CallStmt),
    Compound(CompStmt),
    Read(ReadStmt),
    Write(WriteStmt),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignStmt {
    pub ident: Ident,
    /// Present for an array-element assignment.
    pub index: Option<Expr>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub cond: Cond,
    pub then_branch: Stmt,
    pub else_branch: Option<Stmt>,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepeatStmt {
    pub body: Stmt,
    pub cond: Cond,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForDir {
    To,
    Downto,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub dir: ForDir,
    pub ident: Ident,
    pub from: Expr,
    pub to: Expr,
    pub body: Stmt,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallStmt {
    pub ident: Ident,
    pub args: Vec<Arg>,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadStmt {
    pub idents: Vec<Ident>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteStmt {
    Str { text: String, scope: Option<ScopeId> },
    Expr { expr: Expr, scope: Option<ScopeId> },
    StrExpr {
        text: String,
        expr: Expr,
        scope: Option<ScopeId>,
    },
}

/// A call-site argument. The analyzer records the matching formal
/// parameter and, for by-reference parameters, the referenced target.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub expr: Expr,
    pub param: Option<SymId>,
    pub target: Option<SymId>,
}

impl Arg {
    pub fn new(expr: Expr) -> Self {
        Arg {
            expr,
            param: None,
            target: None,
        }
    }
}

/// Sign or additive operator attached to one term of an expression chain.
/// The first element carries the leading sign (`Nop` when absent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOp {
    Nop,
    Add,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub terms: Vec<ExprTerm>,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExprTerm {
    pub op: AddOp,
    pub term: Term,
}

/// Multiplicative operator attached to one factor of a term chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulOp {
    Nop,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub factors: Vec<TermFactor>,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermFactor {
    pub op: MulOp,
    pub factor: Factor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    pub kind: FactorKind,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FactorKind {
    Ident(Ident),
    ArrayElem { ident: Ident, index: Box<Expr> },
    Unsigned(i64),
    CharLit(i64),
    Paren(Box<Expr>),
    Call(FuncCall),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncCall {
    pub ident: Ident,
    pub args: Vec<Arg>,
    pub scope: Option<ScopeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Equ,
    Neq,
    Gtt,
    Geq,
    Lst,
    Leq,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cond {
    pub rel: RelOp,
    pub lhs: Expr,
    pub rhs: Expr,
}
