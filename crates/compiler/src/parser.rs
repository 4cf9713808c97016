//! Recursive-descent parser.
//!
//! One function per grammar production, driven by the scanner's token
//! stream with a single token of look-ahead. After consuming an identifier
//! the statement and factor parsers decide between call, array access and
//! assignment from the next token, which is why identifier nodes can be
//! built from either the current or the previous token.

use std::io::BufRead;

use crate::ast::*;
use crate::error::{CompileError, Diagnostics, ErrorKind};
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};
use crate::MAIN_FUNC;

/// Which token an identifier node is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    Curr,
    Prev,
}

pub struct Parser<'d, R: BufRead> {
    scanner: Scanner<R>,
    curr: Token,
    prev: Token,
    diag: &'d mut Diagnostics,
}

impl<'d, R: BufRead> Parser<'d, R> {
    pub fn new(mut scanner: Scanner<R>, diag: &'d mut Diagnostics) -> Result<Self, CompileError> {
        let curr = scanner.next_token()?;
        Ok(Parser {
            scanner,
            curr,
            prev: Token::new(TokenKind::Endfile, "", 0),
            diag,
        })
    }

    /// Parse a whole program. The scanner (and with it the source stream)
    /// is dropped whether parsing succeeds or fails.
    pub fn parse(mut self) -> Result<Program, CompileError> {
        let mut entry = Ident::new(MAIN_FUNC, 0);
        entry.kind = IdentKind::Entry;

        let block = self.block()?;
        self.expect(TokenKind::Dot)?;

        Ok(Program { entry, block })
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.curr.kind == kind
    }

    fn at_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.curr.kind)
    }

    /// First set of an expression.
    fn at_expr_start(&self) -> bool {
        self.at_any(&[
            TokenKind::Ident,
            TokenKind::CharLit,
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Unsigned,
            TokenKind::Lparen,
        ])
    }

    fn unexpected(&self) -> CompileError {
        CompileError::new(
            ErrorKind::BadToken,
            self.curr.line,
            format!("unexpected token [{}]", self.curr.lexeme),
        )
    }

    /// Consume the expected token, remembering it as the previous one.
    fn expect(&mut self, expected: TokenKind) -> Result<(), CompileError> {
        if self.curr.kind != expected {
            return Err(self.unexpected());
        }
        let next = self.scanner.next_token()?;
        self.prev = std::mem::replace(&mut self.curr, next);
        Ok(())
    }

    fn ident(&mut self, mode: ReadMode) -> Result<Ident, CompileError> {
        match mode {
            ReadMode::Curr => {
                let id = Ident::new(self.curr.lexeme.clone(), self.curr.line);
                self.expect(TokenKind::Ident)?;
                Ok(id)
            }
            ReadMode::Prev => Ok(Ident::new(self.prev.lexeme.clone(), self.prev.line)),
        }
    }

    /// block = [constdec] [vardec] [pfdeclist] [compstmt]
    fn block(&mut self) -> Result<Block, CompileError> {
        let mut block = Block {
            consts: Vec::new(),
            vars: Vec::new(),
            subprogs: Vec::new(),
            body: None,
        };

        if self.at(TokenKind::KwConst) {
            block.consts = self.const_dec()?;
        }
        if self.at(TokenKind::KwVar) {
            block.vars = self.var_dec()?;
        }
        while self.at_any(&[TokenKind::KwProcedure, TokenKind::KwFunction]) {
            if self.at(TokenKind::KwProcedure) {
                while self.at(TokenKind::KwProcedure) {
                    let def = self.proc_def()?;
                    self.expect(TokenKind::Semi)?;
                    block.subprogs.push(SubDecl::Proc(def));
                }
            } else {
                while self.at(TokenKind::KwFunction) {
                    let def = self.func_def()?;
                    self.expect(TokenKind::Semi)?;
                    block.subprogs.push(SubDecl::Func(def));
                }
            }
        }
        if self.at(TokenKind::KwBegin) {
            block.body = Some(self.comp_stmt()?);
        }

        Ok(block)
    }

    /// constdec = "const" constdef {"," constdef} ";"
    fn const_dec(&mut self) -> Result<Vec<ConstDef>, CompileError> {
        self.expect(TokenKind::KwConst)?;
        let mut defs = vec![self.const_def()?];
        while self.at(TokenKind::Comma) {
            self.expect(TokenKind::Comma)?;
            defs.push(self.const_def()?);
        }
        self.expect(TokenKind::Semi)?;
        Ok(defs)
    }

    /// constdef = ident "=" ("+"? unsigned | "-" unsigned | char)
    fn const_def(&mut self) -> Result<ConstDef, CompileError> {
        let mut ident = self.ident(ReadMode::Curr)?;
        self.expect(TokenKind::Equ)?;

        match self.curr.kind {
            TokenKind::Plus => {
                self.expect(TokenKind::Plus)?;
                ident.kind = IdentKind::UintConst;
                ident.value = self.unsigned_value()?;
            }
            TokenKind::Minus => {
                self.expect(TokenKind::Minus)?;
                ident.kind = IdentKind::IntConst;
                ident.value = -self.unsigned_value()?;
            }
            TokenKind::Unsigned => {
                ident.kind = IdentKind::IntConst;
                ident.value = self.unsigned_value()?;
            }
            TokenKind::CharLit => {
                ident.kind = IdentKind::CharConst;
                ident.value = i64::from(self.curr.lexeme.bytes().next().unwrap_or(0));
                self.expect(TokenKind::CharLit)?;
            }
            _ => return Err(self.unexpected()),
        }

        Ok(ConstDef { ident })
    }

    fn unsigned_value(&mut self) -> Result<i64, CompileError> {
        let value = self
            .curr
            .lexeme
            .parse::<i64>()
            .map_err(|_| self.unexpected())?;
        self.expect(TokenKind::Unsigned)?;
        Ok(value)
    }

    /// vardec = "var" vardef ";" {vardef ";"}
    fn var_dec(&mut self) -> Result<Vec<VarDef>, CompileError> {
        self.expect(TokenKind::KwVar)?;
        let mut defs = vec![self.var_def()?];
        self.expect(TokenKind::Semi)?;
        while self.at(TokenKind::Ident) {
            defs.push(self.var_def()?);
            self.expect(TokenKind::Semi)?;
        }
        Ok(defs)
    }

    /// vardef = ident {"," ident} ":" (basictype | array "[" n "]" of basictype)
    fn var_def(&mut self) -> Result<VarDef, CompileError> {
        let mut idents = vec![self.ident(ReadMode::Curr)?];
        while self.at(TokenKind::Comma) {
            self.expect(TokenKind::Comma)?;
            idents.push(self.ident(ReadMode::Curr)?);
        }
        self.expect(TokenKind::Colon)?;

        match self.curr.kind {
            TokenKind::KwInteger => {
                self.expect(TokenKind::KwInteger)?;
                for id in &mut idents {
                    id.kind = IdentKind::IntVar;
                }
            }
            TokenKind::KwUinteger => {
                self.expect(TokenKind::KwUinteger)?;
                for id in &mut idents {
                    id.kind = IdentKind::UintVar;
                }
            }
            TokenKind::KwChar => {
                self.expect(TokenKind::KwChar)?;
                for id in &mut idents {
                    id.kind = IdentKind::CharVar;
                }
            }
            TokenKind::KwArray => {
                self.expect(TokenKind::KwArray)?;
                self.expect(TokenKind::Lbracket)?;
                let length = if self.at(TokenKind::Unsigned) {
                    self.unsigned_value()? as u32
                } else {
                    return Err(self.unexpected());
                };
                self.expect(TokenKind::Rbracket)?;
                self.expect(TokenKind::KwOf)?;
                let kind = match self.curr.kind {
                    TokenKind::KwInteger => IdentKind::IntArray,
                    TokenKind::KwUinteger => IdentKind::UintArray,
                    TokenKind::KwChar => IdentKind::CharArray,
                    _ => return Err(self.unexpected()),
                };
                self.expect(self.curr.kind)?;
                for id in &mut idents {
                    id.kind = kind;
                    id.length = length;
                }
            }
            _ => return Err(self.unexpected()),
        }

        Ok(VarDef { idents })
    }

    /// procdef = "procedure" ident "(" [paralist] ")" ";" block
    fn proc_def(&mut self) -> Result<ProcDef, CompileError> {
        self.expect(TokenKind::KwProcedure)?;
        let mut ident = self.ident(ReadMode::Curr)?;
        ident.kind = IdentKind::Proc;

        self.expect(TokenKind::Lparen)?;
        let params = if self.at_any(&[TokenKind::KwVar, TokenKind::Ident]) {
            self.para_list()?
        } else {
            Vec::new()
        };
        self.expect(TokenKind::Rparen)?;
        self.expect(TokenKind::Semi)?;

        let block = self.block()?;
        Ok(ProcDef {
            head: ProcHead { ident, params },
            block,
        })
    }

    /// fundef = "function" ident "(" [paralist] ")" ":" basictype ";" block
    fn func_def(&mut self) -> Result<FuncDef, CompileError> {
        self.expect(TokenKind::KwFunction)?;
        let mut ident = self.ident(ReadMode::Curr)?;

        self.expect(TokenKind::Lparen)?;
        let params = if self.at_any(&[TokenKind::KwVar, TokenKind::Ident]) {
            self.para_list()?
        } else {
            Vec::new()
        };
        self.expect(TokenKind::Rparen)?;
        self.expect(TokenKind::Colon)?;

        ident.kind = match self.curr.kind {
            TokenKind::KwInteger => IdentKind::IntFunc,
            TokenKind::KwUinteger => IdentKind::UintFunc,
            TokenKind::KwChar => IdentKind::CharFunc,
            _ => return Err(self.unexpected()),
        };
        self.expect(self.curr.kind)?;
        self.expect(TokenKind::Semi)?;

        let block = self.block()?;
        Ok(FuncDef {
            head: FuncHead { ident, params },
            block,
        })
    }

    /// paralist = paradef {";" paradef}
    fn para_list(&mut self) -> Result<Vec<ParamDef>, CompileError> {
        let mut defs = vec![self.para_def()?];
        while self.at(TokenKind::Semi) {
            self.expect(TokenKind::Semi)?;
            defs.push(self.para_def()?);
        }
        Ok(defs)
    }

    /// paradef = ["var"] ident {"," ident} ":" basictype
    fn para_def(&mut self) -> Result<ParamDef, CompileError> {
        let by_ref = if self.at(TokenKind::KwVar) {
            self.expect(TokenKind::KwVar)?;
            true
        } else {
            false
        };

        let mut idents = vec![self.ident(ReadMode::Curr)?];
        while self.at(TokenKind::Comma) {
            self.expect(TokenKind::Comma)?;
            idents.push(self.ident(ReadMode::Curr)?);
        }
        self.expect(TokenKind::Colon)?;

        let kind = match (self.curr.kind, by_ref) {
            (TokenKind::KwInteger, false) => IdentKind::IntByVal,
            (TokenKind::KwInteger, true) => IdentKind::IntByRef,
            (TokenKind::KwUinteger, false) => IdentKind::UintByVal,
            (TokenKind::KwUinteger, true) => IdentKind::UintByRef,
            (TokenKind::KwChar, false) => IdentKind::CharByVal,
            (TokenKind::KwChar, true) => IdentKind::CharByRef,
            _ => return Err(self.unexpected()),
        };
        self.expect(self.curr.kind)?;
        for id in &mut idents {
            id.kind = kind;
        }

        Ok(ParamDef { idents })
    }

    fn stmt(&mut self) -> Result<Stmt, CompileError> {
        match self.curr.kind {
            TokenKind::KwIf => Ok(Stmt::If(Box::new(self.if_stmt()?))),
            TokenKind::KwRepeat => Ok(Stmt::Repeat(Box::new(self.repeat_stmt()?))),
            TokenKind::KwBegin => Ok(Stmt::Compound(self.comp_stmt()?)),
            TokenKind::KwRead => Ok(Stmt::Read(self.read_stmt()?)),
            TokenKind::KwWrite => Ok(Stmt::Write(self.write_stmt()?)),
            TokenKind::KwFor => Ok(Stmt::For(Box::new(self.for_stmt()?))),
            TokenKind::Ident => {
                self.expect(TokenKind::Ident)?;
                if self.at(TokenKind::Lparen) {
                    Ok(Stmt::Call(self.pcall_stmt()?))
                } else if self.at_any(&[TokenKind::Assign, TokenKind::Lbracket]) {
                    Ok(Stmt::Assign(self.assign_stmt()?))
                } else if self.at(TokenKind::Equ) {
                    // common slip, recover as an assignment
                    self.diag.report(CompileError::new(
                        ErrorKind::BadToken,
                        self.curr.line,
                        "bad token, = may be :=",
                    ));
                    Ok(Stmt::Assign(self.assign_stmt()?))
                } else {
                    Err(self.unexpected())
                }
            }
            _ => Ok(Stmt::Null),
        }
    }

    /// The identifier and the token deciding the assignment form have
    /// already been read when this is entered.
    fn assign_stmt(&mut self) -> Result<AssignStmt, CompileError> {
        match self.curr.kind {
            TokenKind::Assign => {
                let ident = self.ident(ReadMode::Prev)?;
                self.expect(TokenKind::Assign)?;
                Ok(AssignStmt {
                    ident,
                    index: None,
                    value: self.expr()?,
                })
            }
            TokenKind::Lbracket => {
                let ident = self.ident(ReadMode::Prev)?;
                self.expect(TokenKind::Lbracket)?;
                let index = self.expr()?;
                self.expect(TokenKind::Rbracket)?;
                self.expect(TokenKind::Assign)?;
                Ok(AssignStmt {
                    ident,
                    index: Some(index),
                    value: self.expr()?,
                })
            }
            TokenKind::Equ => {
                let ident = self.ident(ReadMode::Prev)?;
                self.expect(TokenKind::Equ)?;
                Ok(AssignStmt {
                    ident,
                    index: None,
                    value: self.expr()?,
                })
            }
            _ => Err(self.unexpected()),
        }
    }

    /// ifstmt = "if" cond "then" stmt ["else" stmt]
    fn if_stmt(&mut self) -> Result<IfStmt, CompileError> {
        self.expect(TokenKind::KwIf)?;
        let cond = self.cond()?;
        self.expect(TokenKind::KwThen)?;
        let then_branch = self.stmt()?;
        let else_branch = if self.at(TokenKind::KwElse) {
            self.expect(TokenKind::KwElse)?;
            Some(self.stmt()?)
        } else {
            None
        };
        Ok(IfStmt {
            cond,
            then_branch,
            else_branch,
            scope: None,
        })
    }

    /// repeatstmt = "repeat" stmt "until" cond
    fn repeat_stmt(&mut self) -> Result<RepeatStmt, CompileError> {
        self.expect(TokenKind::KwRepeat)?;
        let body = self.stmt()?;
        self.expect(TokenKind::KwUntil)?;
        let cond = self.cond()?;
        Ok(RepeatStmt {
            body,
            cond,
            scope: None,
        })
    }

    /// forstmt = "for" ident ":=" expr ("to"|"downto") expr "do" stmt
    fn for_stmt(&mut self) -> Result<ForStmt, CompileError> {
        self.expect(TokenKind::KwFor)?;
        let ident = self.ident(ReadMode::Curr)?;
        self.expect(TokenKind::Assign)?;
        let from = self.expr()?;

        let dir = match self.curr.kind {
            TokenKind::KwTo => ForDir::To,
            TokenKind::KwDownto => ForDir::Downto,
            _ => return Err(self.unexpected()),
        };
        self.expect(self.curr.kind)?;

        let to = self.expr()?;
        self.expect(TokenKind::KwDo)?;
        let body = self.stmt()?;

        Ok(ForStmt {
            dir,
            ident,
            from,
            to,
            body,
            scope: None,
        })
    }

    /// pcallstmt = ident "(" [arglist] ")", identifier already consumed.
    fn pcall_stmt(&mut self) -> Result<CallStmt, CompileError> {
        let ident = self.ident(ReadMode::Prev)?;
        self.expect(TokenKind::Lparen)?;
        let args = if self.at_expr_start() {
            self.arg_list()?
        } else {
            Vec::new()
        };
        self.expect(TokenKind::Rparen)?;
        Ok(CallStmt {
            ident,
            args,
            scope: None,
        })
    }

    /// fcallstmt = ident "(" [arglist] ")", identifier already consumed.
    fn fcall_stmt(&mut self) -> Result<FuncCall, CompileError> {
        let ident = self.ident(ReadMode::Prev)?;
        self.expect(TokenKind::Lparen)?;
        let args = if self.at_expr_start() {
            self.arg_list()?
        } else {
            Vec::new()
        };
        self.expect(TokenKind::Rparen)?;
        Ok(FuncCall {
            ident,
            args,
            scope: None,
        })
    }

    /// compstmt = "begin" stmt {";" stmt} "end"
    fn comp_stmt(&mut self) -> Result<CompStmt, CompileError> {
        self.expect(TokenKind::KwBegin)?;
        let mut stmts = vec![self.stmt()?];
        while self.at(TokenKind::Semi) {
            self.expect(TokenKind::Semi)?;
            stmts.push(self.stmt()?);
        }
        self.expect(TokenKind::KwEnd)?;
        Ok(CompStmt { stmts })
    }

    /// readstmt = "read" "(" ident {"," ident} ")"
    fn read_stmt(&mut self) -> Result<ReadStmt, CompileError> {
        self.expect(TokenKind::KwRead)?;
        self.expect(TokenKind::Lparen)?;
        let mut idents = vec![self.ident(ReadMode::Curr)?];
        while self.at(TokenKind::Comma) {
            self.expect(TokenKind::Comma)?;
            idents.push(self.ident(ReadMode::Curr)?);
        }
        self.expect(TokenKind::Rparen)?;
        Ok(ReadStmt { idents })
    }

    /// writestmt = "write" "(" (string ["," expr] | expr) ")"
    fn write_stmt(&mut self) -> Result<WriteStmt, CompileError> {
        self.expect(TokenKind::KwWrite)?;
        self.expect(TokenKind::Lparen)?;

        let stmt = if self.at(TokenKind::StringLit) {
            let text = self.curr.lexeme.clone();
            self.expect(TokenKind::StringLit)?;
            if self.at(TokenKind::Comma) {
                self.expect(TokenKind::Comma)?;
                WriteStmt::StrExpr {
                    text,
                    expr: self.expr()?,
                    scope: None,
                }
            } else {
                WriteStmt::Str { text, scope: None }
            }
        } else if self.at_expr_start() {
            WriteStmt::Expr {
                expr: self.expr()?,
                scope: None,
            }
        } else {
            return Err(self.unexpected());
        };

        self.expect(TokenKind::Rparen)?;
        Ok(stmt)
    }

    /// expr = ["+"|"-"] term {("+"|"-") term}
    fn expr(&mut self) -> Result<Expr, CompileError> {
        let lead = match self.curr.kind {
            TokenKind::Plus => {
                self.expect(TokenKind::Plus)?;
                AddOp::Add
            }
            TokenKind::Minus => {
                self.expect(TokenKind::Minus)?;
                AddOp::Neg
            }
            TokenKind::Ident | TokenKind::CharLit | TokenKind::Unsigned | TokenKind::Lparen => {
                AddOp::Nop
            }
            _ => return Err(self.unexpected()),
        };

        let mut terms = vec![ExprTerm {
            op: lead,
            term: self.term()?,
        }];

        while self.at_any(&[TokenKind::Plus, TokenKind::Minus]) {
            let op = if self.at(TokenKind::Plus) {
                AddOp::Add
            } else {
                AddOp::Neg
            };
            self.expect(self.curr.kind)?;
            terms.push(ExprTerm {
                op,
                term: self.term()?,
            });
        }

        Ok(Expr { terms, scope: None })
    }

    /// term = factor {("*"|"/") factor}
    fn term(&mut self) -> Result<Term, CompileError> {
        let mut factors = vec![TermFactor {
            op: MulOp::Nop,
            factor: self.factor()?,
        }];

        while self.at_any(&[TokenKind::Star, TokenKind::Slash]) {
            let op = if self.at(TokenKind::Star) {
                MulOp::Mul
            } else {
                MulOp::Div
            };
            self.expect(self.curr.kind)?;
            factors.push(TermFactor {
                op,
                factor: self.factor()?,
            });
        }

        Ok(Term {
            factors,
            scope: None,
        })
    }

    /// factor = ident | ident "[" expr "]" | ident "(" [arglist] ")"
    ///        | unsigned | char | "(" expr ")"
    fn factor(&mut self) -> Result<Factor, CompileError> {
        let kind = match self.curr.kind {
            TokenKind::Unsigned => {
                let value = self.unsigned_value()?;
                FactorKind::Unsigned(value)
            }
            TokenKind::CharLit => {
                let value = i64::from(self.curr.lexeme.bytes().next().unwrap_or(0));
                self.expect(TokenKind::CharLit)?;
                FactorKind::CharLit(value)
            }
            TokenKind::Lparen => {
                self.expect(TokenKind::Lparen)?;
                let inner = self.expr()?;
                self.expect(TokenKind::Rparen)?;
                FactorKind::Paren(Box::new(inner))
            }
            TokenKind::Ident => {
                self.expect(TokenKind::Ident)?;
                if self.at(TokenKind::Lbracket) {
                    let ident = self.ident(ReadMode::Prev)?;
                    self.expect(TokenKind::Lbracket)?;
                    let index = self.expr()?;
                    self.expect(TokenKind::Rbracket)?;
                    FactorKind::ArrayElem {
                        ident,
                        index: Box::new(index),
                    }
                } else if self.at(TokenKind::Lparen) {
                    FactorKind::Call(self.fcall_stmt()?)
                } else {
                    FactorKind::Ident(self.ident(ReadMode::Prev)?)
                }
            }
            _ => return Err(self.unexpected()),
        };

        Ok(Factor { kind, scope: None })
    }

    /// cond = expr relop expr
    fn cond(&mut self) -> Result<Cond, CompileError> {
        let lhs = self.expr()?;
        let rel = match self.curr.kind {
            TokenKind::Equ => RelOp::Equ,
            TokenKind::Neq => RelOp::Neq,
            TokenKind::Gtt => RelOp::Gtt,
            TokenKind::Geq => RelOp::Geq,
            TokenKind::Lst => RelOp::Lst,
            TokenKind::Leq => RelOp::Leq,
            _ => return Err(self.unexpected()),
        };
        self.expect(self.curr.kind)?;
        let rhs = self.expr()?;
        Ok(Cond { rel, lhs, rhs })
    }

    /// arglist = expr {"," expr}
    fn arg_list(&mut self) -> Result<Vec<Arg>, CompileError> {
        let mut args = vec![Arg::new(self.expr()?)];
        while self.at(TokenKind::Comma) {
            self.expect(TokenKind::Comma)?;
            args.push(Arg::new(self.expr()?));
        }
        Ok(args)
    }
}
