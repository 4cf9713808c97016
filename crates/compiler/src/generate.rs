//! AST to IR lowering.
//!
//! Nested subprograms are emitted before their parent, so the linear
//! stream is a sequence of complete functions with the main program last.
//! Expressions left-fold into fresh temporaries; call arguments are pushed
//! in reverse declared order and popped one per argument after the call.

use crate::ast::*;
use crate::error::CompileError;
use crate::internal;
use crate::ir::{IrList, Op};
use crate::symtab::{ScopeId, SymCat, SymId, SymTab, ValType};

/// Lower the analyzed program to a linear instruction list.
pub fn generate(tab: &mut SymTab, pgm: &Program) -> Result<IrList, CompileError> {
    let mut gen = IrGen {
        tab,
        ir: IrList::new(),
    };
    gen.program(pgm)?;
    Ok(gen.ir)
}

struct IrGen<'a> {
    tab: &'a mut SymTab,
    ir: IrList,
}

impl<'a> IrGen<'a> {
    fn program(&mut self, pgm: &Program) -> Result<(), CompileError> {
        self.sub_decls(&pgm.block.subprogs)?;

        let entry = symbol_of(&pgm.entry)?;
        self.ir.emit1(Op::FnStart, Some(entry));
        if let Some(body) = &pgm.block.body {
            self.comp_stmt(body)?;
        }
        self.ir.emit1(Op::FnEnd, Some(entry));
        Ok(())
    }

    fn sub_decls(&mut self, decls: &[SubDecl]) -> Result<(), CompileError> {
        for decl in decls {
            match decl {
                SubDecl::Proc(def) => {
                    self.sub_decls(&def.block.subprogs)?;
                    let sym = symbol_of(&def.head.ident)?;
                    self.ir.emit1(Op::FnStart, Some(sym));
                    if let Some(body) = &def.block.body {
                        self.comp_stmt(body)?;
                    }
                    self.ir.emit1(Op::FnEnd, Some(sym));
                }
                SubDecl::Func(def) => {
                    self.sub_decls(&def.block.subprogs)?;
                    let sym = symbol_of(&def.head.ident)?;
                    self.ir.emit1(Op::FnStart, Some(sym));
                    if let Some(body) = &def.block.body {
                        self.comp_stmt(body)?;
                    }
                    self.ir.emit1(Op::FnEnd, Some(sym));
                }
            }
        }
        Ok(())
    }

    fn comp_stmt(&mut self, cs: &CompStmt) -> Result<(), CompileError> {
        for stmt in &cs.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Assign(a) => self.assign_stmt(a),
            Stmt::If(i) => self.if_stmt(i),
            Stmt::Repeat(r) => self.repeat_stmt(r),
            Stmt::For(f) => self.for_stmt(f),
            Stmt::Call(c) => self.pcall_stmt(c),
            Stmt::Compound(c) => self.comp_stmt(c),
            Stmt::Read(r) => self.read_stmt(r),
            Stmt::Write(w) => self.write_stmt(w),
            Stmt::Null => Ok(()),
        }
    }

    fn assign_stmt(&mut self, stmt: &AssignStmt) -> Result<(), CompileError> {
        let d = symbol_of(&stmt.ident)?;
        match &stmt.index {
            Some(index) => {
                let s = self.expr(index)?;
                let r = self.expr(&stmt.value)?;
                self.ir.emit3(Op::StoreArray, Some(d), Some(r), Some(s));
            }
            None => {
                let r = self.expr(&stmt.value)?;
                self.ir.emit2(Op::StoreVar, Some(d), Some(r));
            }
        }
        Ok(())
    }

    fn if_stmt(&mut self, stmt: &IfStmt) -> Result<(), CompileError> {
        let scope = scope_of(stmt.scope)?;
        let ifthen = self.tab.alloc(scope, "@ifthen", SymCat::Label, ValType::Void)?;
        let ifdone = self.tab.alloc(scope, "@ifdone", SymCat::Label, ValType::Void)?;

        self.cond(&stmt.cond, ifthen)?;
        if let Some(els) = &stmt.else_branch {
            self.stmt(els)?;
        }
        self.ir.emit1(Op::Jump, Some(ifdone));
        self.ir.emit1(Op::Label, Some(ifthen));
        self.stmt(&stmt.then_branch)?;
        self.ir.emit1(Op::Label, Some(ifdone));
        Ok(())
    }

    fn repeat_stmt(&mut self, stmt: &RepeatStmt) -> Result<(), CompileError> {
        let scope = scope_of(stmt.scope)?;
        let loopstart = self
            .tab
            .alloc(scope, "@loopstart", SymCat::Label, ValType::Void)?;
        let loopdone = self
            .tab
            .alloc(scope, "@loopdone", SymCat::Label, ValType::Void)?;

        self.ir.emit1(Op::Label, Some(loopstart));
        self.stmt(&stmt.body)?;
        self.cond(&stmt.cond, loopdone)?;
        self.ir.emit1(Op::Jump, Some(loopstart));
        self.ir.emit1(Op::Label, Some(loopdone));
        Ok(())
    }

    fn for_stmt(&mut self, stmt: &ForStmt) -> Result<(), CompileError> {
        let scope = scope_of(stmt.scope)?;
        let beg = self.expr(&stmt.from)?;
        let end = self.expr(&stmt.to)?;

        let forstart = self
            .tab
            .alloc(scope, "@forstart", SymCat::Label, ValType::Void)?;
        let fordone = self
            .tab
            .alloc(scope, "@fordone", SymCat::Label, ValType::Void)?;

        let d = symbol_of(&stmt.ident)?;
        self.ir.emit2(Op::StoreVar, Some(d), Some(beg));
        self.ir.emit1(Op::Label, Some(forstart));
        match stmt.dir {
            ForDir::To => {
                self.ir
                    .emit3(Op::BranchGtt, Some(fordone), Some(d), Some(end));
                self.stmt(&stmt.body)?;
                self.ir.emit1(Op::Inc, Some(d));
                self.ir.emit1(Op::Jump, Some(forstart));
                self.ir.emit1(Op::Label, Some(fordone));
                // the induction variable ends at the bound, not past it
                self.ir.emit1(Op::Dec, Some(d));
            }
            ForDir::Downto => {
                self.ir
                    .emit3(Op::BranchLst, Some(fordone), Some(d), Some(end));
                self.stmt(&stmt.body)?;
                self.ir.emit1(Op::Dec, Some(d));
                self.ir.emit1(Op::Jump, Some(forstart));
                self.ir.emit1(Op::Label, Some(fordone));
                self.ir.emit1(Op::Inc, Some(d));
            }
        }
        Ok(())
    }

    fn pcall_stmt(&mut self, stmt: &CallStmt) -> Result<(), CompileError> {
        self.arg_list(&stmt.args)?;
        let callee = symbol_of(&stmt.ident)?;
        self.ir.emit2(Op::Call, None, Some(callee));
        for _ in &stmt.args {
            self.ir.emit1(Op::Pop, None);
        }
        Ok(())
    }

    fn fcall_stmt(&mut self, call: &FuncCall) -> Result<SymId, CompileError> {
        let scope = scope_of(call.scope)?;
        let callee = symbol_of(&call.ident)?;
        let ret_typ = self.tab.sym(callee).typ;
        let d = self.tab.alloc(scope, "@fcall/ret", SymCat::Temp, ret_typ)?;

        self.arg_list(&call.args)?;
        self.ir.emit2(Op::Call, Some(d), Some(callee));
        for _ in &call.args {
            self.ir.emit1(Op::Pop, None);
        }
        Ok(d)
    }

    fn read_stmt(&mut self, stmt: &ReadStmt) -> Result<(), CompileError> {
        for ident in &stmt.idents {
            let d = symbol_of(ident)?;
            match self.tab.sym(d).typ {
                ValType::Char => {
                    self.ir.emit1(Op::ReadChar, Some(d));
                }
                ValType::Int => {
                    self.ir.emit1(Op::ReadInt, Some(d));
                }
                ValType::Uint => {
                    self.ir.emit1(Op::ReadUint, Some(d));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn write_stmt(&mut self, stmt: &WriteStmt) -> Result<(), CompileError> {
        match stmt {
            WriteStmt::Str { text, scope } => {
                self.write_string(scope_of(*scope)?, text)?;
            }
            WriteStmt::Expr { expr, .. } => {
                let d = self.expr(expr)?;
                self.write_value(d)?;
            }
            WriteStmt::StrExpr { text, expr, scope } => {
                self.write_string(scope_of(*scope)?, text)?;
                let d = self.expr(expr)?;
                self.write_value(d)?;
            }
        }
        Ok(())
    }

    fn write_string(&mut self, scope: ScopeId, text: &str) -> Result<(), CompileError> {
        let d = self
            .tab
            .alloc(scope, "@write/str", SymCat::Str, ValType::Str)?;
        self.tab.sym_mut(d).text = text.to_string();
        self.ir.emit1(Op::WriteString, Some(d));
        Ok(())
    }

    fn write_value(&mut self, d: SymId) -> Result<(), CompileError> {
        match self.tab.sym(d).typ {
            ValType::Char => {
                self.ir.emit1(Op::WriteChar, Some(d));
            }
            ValType::Int | ValType::Literal => {
                self.ir.emit1(Op::WriteInt, Some(d));
            }
            ValType::Uint => {
                self.ir.emit1(Op::WriteUint, Some(d));
            }
            other => return Err(internal!("write of {:?} value", other)),
        }
        Ok(())
    }

    /// Left-fold of sum-of-terms. The first term handles the leading sign:
    /// a pure literal is folded at lowering time, everything else goes
    /// through `NEG` into a fresh temporary.
    fn expr(&mut self, expr: &Expr) -> Result<SymId, CompileError> {
        let scope = scope_of(expr.scope)?;
        let mut acc: Option<SymId> = None;

        for t in &expr.terms {
            let r = self.term(&t.term)?;
            acc = Some(match acc {
                None => match t.op {
                    AddOp::Neg => {
                        let (r_typ, r_val) = {
                            let e = self.tab.sym(r);
                            (e.typ, e.value)
                        };
                        if r_typ == ValType::Literal {
                            let n =
                                self.tab
                                    .alloc(scope, "@expr/neg", SymCat::Number, ValType::Literal)?;
                            self.tab.sym_mut(n).value = -r_val;
                            n
                        } else {
                            let n = self.tab.alloc(scope, "@expr/neg", SymCat::Temp, r_typ)?;
                            self.ir.emit2(Op::Neg, Some(n), Some(r));
                            n
                        }
                    }
                    AddOp::Nop | AddOp::Add => r,
                },
                Some(lhs) => {
                    let typ = self.tab.sym(lhs).typ;
                    let (name, op) = match t.op {
                        AddOp::Nop | AddOp::Add => ("@expr/add", Op::Add),
                        AddOp::Neg => ("@expr/sub", Op::Sub),
                    };
                    let n = self.tab.alloc(scope, name, SymCat::Temp, typ)?;
                    self.ir.emit3(op, Some(n), Some(lhs), Some(r));
                    n
                }
            });
        }

        acc.ok_or_else(|| internal!("empty expression chain"))
    }

    fn term(&mut self, term: &Term) -> Result<SymId, CompileError> {
        let scope = scope_of(term.scope)?;
        let mut acc: Option<SymId> = None;

        for f in &term.factors {
            let r = self.factor(&f.factor)?;
            acc = Some(match acc {
                None => {
                    if f.op != MulOp::Nop {
                        return Err(internal!("term chain starts with {:?}", f.op));
                    }
                    r
                }
                Some(lhs) => {
                    let typ = self.tab.sym(lhs).typ;
                    let (name, op) = match f.op {
                        MulOp::Nop | MulOp::Mul => ("@term/mul", Op::Mul),
                        MulOp::Div => ("@term/div", Op::Div),
                    };
                    let n = self.tab.alloc(scope, name, SymCat::Temp, typ)?;
                    self.ir.emit3(op, Some(n), Some(lhs), Some(r));
                    n
                }
            });
        }

        acc.ok_or_else(|| internal!("empty term chain"))
    }

    fn factor(&mut self, factor: &Factor) -> Result<SymId, CompileError> {
        let scope = scope_of(factor.scope)?;
        match &factor.kind {
            FactorKind::Ident(ident) => symbol_of(ident),
            FactorKind::ArrayElem { ident, index } => {
                let r = symbol_of(ident)?;
                let e = self.expr(index)?;
                let elem_typ = self.tab.sym(r).typ;
                let d = self
                    .tab
                    .alloc(scope, "@factor/array", SymCat::Temp, elem_typ)?;
                self.ir.emit3(Op::LoadArray, Some(d), Some(r), Some(e));
                Ok(d)
            }
            FactorKind::Unsigned(value) => {
                let d = self
                    .tab
                    .alloc(scope, "@factor/usi", SymCat::Number, ValType::Literal)?;
                self.tab.sym_mut(d).value = *value;
                Ok(d)
            }
            FactorKind::CharLit(value) => {
                let d = self
                    .tab
                    .alloc(scope, "@factor/char", SymCat::Number, ValType::Char)?;
                self.tab.sym_mut(d).value = *value;
                Ok(d)
            }
            FactorKind::Paren(inner) => self.expr(inner),
            FactorKind::Call(call) => self.fcall_stmt(call),
        }
    }

    fn cond(&mut self, cond: &Cond, label: SymId) -> Result<(), CompileError> {
        let r = self.expr(&cond.lhs)?;
        let s = self.expr(&cond.rhs)?;
        let op = match cond.rel {
            RelOp::Equ => Op::BranchEqu,
            RelOp::Neq => Op::BranchNeq,
            RelOp::Gtt => Op::BranchGtt,
            RelOp::Geq => Op::BranchGeq,
            RelOp::Lst => Op::BranchLst,
            RelOp::Leq => Op::BranchLeq,
        };
        self.ir.emit3(op, Some(label), Some(r), Some(s));
        Ok(())
    }

    /// Arguments are pushed in reverse declared order; by-reference
    /// arguments push the target's address, with the index value for an
    /// array element.
    fn arg_list(&mut self, args: &[Arg]) -> Result<(), CompileError> {
        for arg in args.iter().rev() {
            let param = arg
                .param
                .ok_or_else(|| internal!("argument without matched parameter"))?;
            match self.tab.sym(param).cate {
                SymCat::ByValue => {
                    let d = self.expr(&arg.expr)?;
                    self.ir.emit1(Op::PushVal, Some(d));
                }
                SymCat::ByRef => {
                    let d = arg
                        .target
                        .ok_or_else(|| internal!("reference argument without target"))?;
                    match self.tab.sym(d).cate {
                        SymCat::Var => {
                            self.ir.emit2(Op::PushAddr, Some(d), None);
                        }
                        SymCat::Array => {
                            let index = match &arg.expr.terms[0].term.factors[0].factor.kind {
                                FactorKind::ArrayElem { index, .. } => index,
                                other => {
                                    return Err(internal!(
                                        "array reference argument shaped as {:?}",
                                        other
                                    ))
                                }
                            };
                            let r = self.expr(index)?;
                            self.ir.emit2(Op::PushAddr, Some(d), Some(r));
                        }
                        other => return Err(internal!("reference target category {:?}", other)),
                    }
                }
                other => return Err(internal!("parameter category {:?}", other)),
            }
        }
        Ok(())
    }
}

fn symbol_of(ident: &Ident) -> Result<SymId, CompileError> {
    ident
        .symbol
        .ok_or_else(|| internal!("unresolved identifier {}", ident.name))
}

fn scope_of(scope: Option<ScopeId>) -> Result<ScopeId, CompileError> {
    scope.ok_or_else(|| internal!("node missing its analysis scope"))
}
