//! Semantic analysis.
//!
//! Walks the tree in source order, entering one scope per program or
//! subprogram. Constants and variables are installed first, then nested
//! subprograms, then the compound statement is resolved. Callables are
//! installed in the parent scope under their mangled key (source name plus
//! one two-character type suffix per formal parameter); their parameters
//! are also installed in the callable's own scope so bodies can refer to
//! them.
//!
//! Call sites are resolved twice when needed: literal arguments are first
//! keyed as unsigned, and if no callable matches, retried as signed. This
//! is the overload tiebreak for numeric literals.

use crate::ast::*;
use crate::error::{CompileError, Diagnostics, ErrorKind};
use crate::internal;
use crate::symtab::{SymCat, SymId, SymTab, ValType};

/// Run semantic analysis over the whole program, filling symbol back
/// references on every identifier node.
pub fn analyze(
    tab: &mut SymTab,
    diag: &mut Diagnostics,
    pgm: &mut Program,
) -> Result<(), CompileError> {
    Analyzer { tab, diag }.program(pgm)
}

/// Mangled lookup key for a callable with the given formal parameters.
pub fn mangle(tab: &SymTab, name: &str, params: &[SymId]) -> String {
    let mut key = name.to_string();
    for p in params {
        key.push_str(tab.sym(*p).typ.suffix());
    }
    key
}

struct Analyzer<'a> {
    tab: &'a mut SymTab,
    diag: &'a mut Diagnostics,
}

impl<'a> Analyzer<'a> {
    fn program(&mut self, pgm: &mut Program) -> Result<(), CompileError> {
        let scope = self.tab.enter_scope(&pgm.entry.name);
        let entry = self.tab.insert(&pgm.entry)?;
        pgm.entry.symbol = Some(entry);
        self.tab.sym_mut(entry).scope = Some(scope);
        self.tab.scope_mut(scope).func = Some(entry);

        self.block(&mut pgm.block)?;

        self.tab.exit_scope()?;
        Ok(())
    }

    fn block(&mut self, block: &mut Block) -> Result<(), CompileError> {
        self.const_defs(&mut block.consts)?;
        self.var_defs(&mut block.vars)?;
        self.sub_decls(&mut block.subprogs)?;
        if let Some(body) = &mut block.body {
            self.comp_stmt(body)?;
        }
        Ok(())
    }

    fn const_defs(&mut self, defs: &mut [ConstDef]) -> Result<(), CompileError> {
        for def in defs {
            let ident = &mut def.ident;
            let sym = match self.tab.lookup_local(&ident.name) {
                Some(existing) => {
                    self.diag.report(CompileError::new(
                        ErrorKind::DuplicateSymbol,
                        ident.line,
                        format!("const {} already declared", ident.name),
                    ));
                    existing
                }
                None => self.tab.insert(ident)?,
            };
            ident.symbol = Some(sym);
        }
        Ok(())
    }

    fn var_defs(&mut self, defs: &mut [VarDef]) -> Result<(), CompileError> {
        for def in defs {
            for ident in &mut def.idents {
                let sym = match self.tab.lookup_local(&ident.name) {
                    Some(existing) => {
                        self.diag.report(CompileError::new(
                            ErrorKind::DuplicateSymbol,
                            ident.line,
                            format!("variable {} already declared", ident.name),
                        ));
                        existing
                    }
                    None => self.tab.insert(ident)?,
                };
                ident.symbol = Some(sym);
            }
        }
        Ok(())
    }

    fn sub_decls(&mut self, decls: &mut [SubDecl]) -> Result<(), CompileError> {
        for decl in decls {
            match decl {
                SubDecl::Proc(def) => {
                    self.proc_head(&mut def.head)?;
                    self.block(&mut def.block)?;
                    self.tab.exit_scope()?;
                }
                SubDecl::Func(def) => {
                    self.func_head(&mut def.head)?;
                    self.block(&mut def.block)?;
                    self.tab.exit_scope()?;
                }
            }
        }
        Ok(())
    }

    /// Install a callable under its mangled key in `parent`, leaving its
    /// own scope entered for the body that follows.
    fn install_callable(
        &mut self,
        ident: &mut Ident,
        params: &mut [ParamDef],
        what: &str,
    ) -> Result<(), CompileError> {
        let parent = self.tab.top()?;
        let scope = self.tab.enter_scope(&ident.name);

        let param_syms = self.param_list(params)?;
        let key = mangle(self.tab, &ident.name, &param_syms);

        let sym = match self.tab.lookup_in(parent, &key) {
            Some(existing) => {
                self.diag.report(CompileError::new(
                    ErrorKind::DuplicateSymbol,
                    ident.line,
                    format!("{} {} already declared", what, ident.name),
                ));
                existing
            }
            None => self.tab.insert_in(parent, ident, &key)?,
        };

        self.tab.scope_mut(scope).func = Some(sym);
        let entry = self.tab.sym_mut(sym);
        entry.scope = Some(scope);
        entry.params = param_syms;
        ident.symbol = Some(sym);
        Ok(())
    }

    fn proc_head(&mut self, head: &mut ProcHead) -> Result<(), CompileError> {
        self.install_callable(&mut head.ident, &mut head.params, "procedure")
    }

    fn func_head(&mut self, head: &mut FuncHead) -> Result<(), CompileError> {
        self.install_callable(&mut head.ident, &mut head.params, "function")
    }

    fn param_list(&mut self, defs: &mut [ParamDef]) -> Result<Vec<SymId>, CompileError> {
        let mut syms = Vec::new();
        for def in defs {
            for ident in &mut def.idents {
                let sym = match self.tab.lookup_local(&ident.name) {
                    Some(existing) => {
                        self.diag.report(CompileError::new(
                            ErrorKind::DuplicateSymbol,
                            ident.line,
                            format!("parameter {} already declared", ident.name),
                        ));
                        existing
                    }
                    None => self.tab.insert(ident)?,
                };
                ident.symbol = Some(sym);
                syms.push(sym);
            }
        }
        Ok(syms)
    }

    fn comp_stmt(&mut self, cs: &mut CompStmt) -> Result<(), CompileError> {
        for stmt in &mut cs.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &mut Stmt) -> Result<(), CompileError> {
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

    fn assign_stmt(&mut self, stmt: &mut AssignStmt) -> Result<(), CompileError> {
        let top = self.tab.top()?;
        let sym = if stmt.ident.name == self.tab.scope(top).nspace {
            // writing the enclosing function's return slot
            self.tab
                .scope(top)
                .func
                .ok_or_else(|| internal!("scope {} has no owning callable", top.0))?
        } else {
            self.resolve(&stmt.ident)?
        };
        stmt.ident.symbol = Some(sym);

        if let Some(index) = &mut stmt.index {
            self.expr(index)?;
        }
        self.expr(&mut stmt.value)
    }

    fn if_stmt(&mut self, stmt: &mut IfStmt) -> Result<(), CompileError> {
        stmt.scope = Some(self.tab.top()?);
        self.cond(&mut stmt.cond)?;
        if let Some(els) = &mut stmt.else_branch {
            self.stmt(els)?;
        }
        self.stmt(&mut stmt.then_branch)
    }

    fn repeat_stmt(&mut self, stmt: &mut RepeatStmt) -> Result<(), CompileError> {
        stmt.scope = Some(self.tab.top()?);
        self.stmt(&mut stmt.body)?;
        self.cond(&mut stmt.cond)
    }

    fn for_stmt(&mut self, stmt: &mut ForStmt) -> Result<(), CompileError> {
        stmt.scope = Some(self.tab.top()?);
        self.expr(&mut stmt.from)?;
        self.expr(&mut stmt.to)?;

        let sym = self.resolve(&stmt.ident)?;
        stmt.ident.symbol = Some(sym);

        self.stmt(&mut stmt.body)
    }

    fn pcall_stmt(&mut self, stmt: &mut CallStmt) -> Result<(), CompileError> {
        stmt.scope = Some(self.tab.top()?);
        let sym = self.resolve_callable(&stmt.ident, &stmt.args)?;

        if self.tab.sym(sym).cate != SymCat::Proc {
            return Err(CompileError::new(
                ErrorKind::MissingSymbol,
                stmt.ident.line,
                format!("procedure {} not found", stmt.ident.name),
            ));
        }
        stmt.ident.symbol = Some(sym);

        if !stmt.args.is_empty() {
            self.arg_list(sym, &mut stmt.args)?;
        }
        Ok(())
    }

    fn fcall_stmt(&mut self, call: &mut FuncCall) -> Result<(), CompileError> {
        call.scope = Some(self.tab.top()?);
        let sym = self.resolve_callable(&call.ident, &call.args)?;

        if self.tab.sym(sym).cate != SymCat::Func {
            return Err(CompileError::new(
                ErrorKind::WrongType,
                call.ident.line,
                format!("symbol {} is not a function", call.ident.name),
            ));
        }
        call.ident.symbol = Some(sym);

        if !call.args.is_empty() {
            self.arg_list(sym, &mut call.args)?;
        }
        Ok(())
    }

    /// Two-pass callable lookup: literals keyed as unsigned first, then as
    /// signed.
    fn resolve_callable(&self, ident: &Ident, args: &[Arg]) -> Result<SymId, CompileError> {
        let key = self.call_key(&ident.name, args, false)?;
        if let Some(sym) = self.tab.lookup(&key) {
            return Ok(sym);
        }
        let key = self.call_key(&ident.name, args, true)?;
        if let Some(sym) = self.tab.lookup(&key) {
            return Ok(sym);
        }
        Err(CompileError::new(
            ErrorKind::MissingSymbol,
            ident.line,
            format!("symbol {} not found", ident.name),
        ))
    }

    fn read_stmt(&mut self, stmt: &mut ReadStmt) -> Result<(), CompileError> {
        for ident in &mut stmt.idents {
            let sym = self.resolve(ident)?;
            ident.symbol = Some(sym);
        }
        Ok(())
    }

    fn write_stmt(&mut self, stmt: &mut WriteStmt) -> Result<(), CompileError> {
        let top = self.tab.top()?;
        match stmt {
            WriteStmt::Str { scope, .. } => {
                *scope = Some(top);
                Ok(())
            }
            WriteStmt::Expr { expr, scope } => {
                *scope = Some(top);
                self.expr(expr)
            }
            WriteStmt::StrExpr { expr, scope, .. } => {
                *scope = Some(top);
                self.expr(expr)
            }
        }
    }

    fn cond(&mut self, cond: &mut Cond) -> Result<(), CompileError> {
        self.expr(&mut cond.lhs)?;
        self.expr(&mut cond.rhs)
    }

    fn expr(&mut self, expr: &mut Expr) -> Result<(), CompileError> {
        expr.scope = Some(self.tab.top()?);
        for t in &mut expr.terms {
            self.term(&mut t.term)?;
        }
        Ok(())
    }

    fn term(&mut self, term: &mut Term) -> Result<(), CompileError> {
        term.scope = Some(self.tab.top()?);
        for f in &mut term.factors {
            self.factor(&mut f.factor)?;
        }
        Ok(())
    }

    fn factor(&mut self, factor: &mut Factor) -> Result<(), CompileError> {
        factor.scope = Some(self.tab.top()?);
        match &mut factor.kind {
            FactorKind::Ident(ident) => {
                let sym = self.resolve(ident)?;
                match self.tab.sym(sym).cate {
                    SymCat::Const
                    | SymCat::Var
                    | SymCat::Temp
                    | SymCat::ByValue
                    | SymCat::ByRef => {}
                    _ => {
                        return Err(CompileError::new(
                            ErrorKind::BadCategory,
                            ident.line,
                            format!("symbol {} category is bad", ident.name),
                        ));
                    }
                }
                ident.symbol = Some(sym);
                Ok(())
            }
            FactorKind::ArrayElem { ident, index } => {
                let sym = self.resolve(ident)?;
                if self.tab.sym(sym).cate != SymCat::Array {
                    return Err(CompileError::new(
                        ErrorKind::WrongType,
                        ident.line,
                        format!("symbol {} is not an array", ident.name),
                    ));
                }
                ident.symbol = Some(sym);
                self.expr(index)
            }
            FactorKind::Unsigned(_) | FactorKind::CharLit(_) => Ok(()),
            FactorKind::Paren(inner) => self.expr(inner),
            FactorKind::Call(call) => self.fcall_stmt(call),
        }
    }

    /// Check every call-site argument against its formal parameter.
    fn arg_list(&mut self, callee: SymId, args: &mut [Arg]) -> Result<(), CompileError> {
        let params = self.tab.sym(callee).params.clone();
        let callee_name = self.tab.sym(callee).name.clone();
        let callee_line = self.tab.sym(callee).line;

        for (pos, (arg, param)) in args.iter_mut().zip(params.iter()).enumerate() {
            let pos = pos + 1;
            match self.tab.sym(*param).cate {
                SymCat::ByValue => {
                    self.expr(&mut arg.expr)?;
                    arg.param = Some(*param);
                }
                SymCat::ByRef => {
                    // the argument must be a bare variable or an indexed
                    // array element
                    let shaped = arg.expr.terms.len() == 1
                        && arg.expr.terms[0].op == AddOp::Nop
                        && arg.expr.terms[0].term.factors.len() == 1
                        && arg.expr.terms[0].term.factors[0].op == MulOp::Nop
                        && matches!(
                            arg.expr.terms[0].term.factors[0].factor.kind,
                            FactorKind::Ident(_) | FactorKind::ArrayElem { .. }
                        );
                    if !shaped {
                        return Err(CompileError::new(
                            ErrorKind::BadReference,
                            callee_line,
                            format!("{}() arg{} has bad reference", callee_name, pos),
                        ));
                    }

                    let factor = &mut arg.expr.terms[0].term.factors[0].factor;
                    self.factor(factor)?;

                    let (ident_name, ident_line, is_array_ref) = match &factor.kind {
                        FactorKind::Ident(id) => (id.name.clone(), id.line, false),
                        FactorKind::ArrayElem { ident, .. } => (ident.name.clone(), ident.line, true),
                        _ => return Err(internal!("reference argument shape changed")),
                    };
                    let target = self.tab.lookup(&ident_name).ok_or_else(|| {
                        CompileError::new(
                            ErrorKind::MissingSymbol,
                            ident_line,
                            format!("symbol {} not found", ident_name),
                        )
                    })?;
                    let target_cate = self.tab.sym(target).cate;
                    if !is_array_ref && target_cate != SymCat::Var {
                        return Err(CompileError::new(
                            ErrorKind::NotReferable,
                            ident_line,
                            format!("{}() arg{} is not a variable object", ident_name, pos),
                        ));
                    }
                    if is_array_ref && target_cate != SymCat::Array {
                        return Err(CompileError::new(
                            ErrorKind::NotReferable,
                            ident_line,
                            format!("{}() arg{} is not an array object", ident_name, pos),
                        ));
                    }

                    match &mut factor.kind {
                        FactorKind::Ident(id) => id.symbol = Some(target),
                        FactorKind::ArrayElem { ident, .. } => ident.symbol = Some(target),
                        _ => {}
                    }
                    arg.target = Some(target);
                    arg.param = Some(*param);
                }
                other => return Err(internal!("parameter with category {:?}", other)),
            }
        }

        if args.len() != params.len() {
            return Err(CompileError::new(
                ErrorKind::ArgumentCount,
                callee_line,
                format!(
                    "{}(...) arguments and parameters length not equal",
                    callee_name
                ),
            ));
        }
        Ok(())
    }

    fn resolve(&self, ident: &Ident) -> Result<SymId, CompileError> {
        self.tab.lookup(&ident.name).ok_or_else(|| {
            CompileError::new(
                ErrorKind::MissingSymbol,
                ident.line,
                format!("symbol {} not found", ident.name),
            )
        })
    }

    /// Mangled key for a call site. `lit_as_int` selects the signed
    /// interpretation of unsigned literal arguments.
    fn call_key(&self, name: &str, args: &[Arg], lit_as_int: bool) -> Result<String, CompileError> {
        let mut key = name.to_string();
        for arg in args {
            let mut typ = self.infer_expr(&arg.expr)?;
            if typ == ValType::Literal {
                typ = if arg.expr.terms[0].op == AddOp::Neg || lit_as_int {
                    ValType::Int
                } else {
                    ValType::Uint
                };
            }
            key.push_str(typ.suffix());
        }
        Ok(key)
    }

    fn infer_expr(&self, expr: &Expr) -> Result<ValType, CompileError> {
        let mut lhs = self.infer_term(&expr.terms[0].term)?;
        for t in &expr.terms[1..] {
            let rhs = self.infer_term(&t.term)?;
            lhs = join(lhs, rhs);
        }
        Ok(lhs)
    }

    fn infer_term(&self, term: &Term) -> Result<ValType, CompileError> {
        let mut lhs = self.infer_factor(&term.factors[0].factor)?;
        for f in &term.factors[1..] {
            let rhs = self.infer_factor(&f.factor)?;
            lhs = join(lhs, rhs);
        }
        Ok(lhs)
    }

    fn infer_factor(&self, factor: &Factor) -> Result<ValType, CompileError> {
        match &factor.kind {
            FactorKind::Ident(ident) => Ok(self.tab.sym(self.resolve(ident)?).typ),
            FactorKind::ArrayElem { ident, .. } => {
                let sym = self.resolve(ident)?;
                if self.tab.sym(sym).cate != SymCat::Array {
                    return Err(CompileError::new(
                        ErrorKind::WrongType,
                        ident.line,
                        format!("symbol {} is not an array", ident.name),
                    ));
                }
                Ok(self.tab.sym(sym).typ)
            }
            FactorKind::Unsigned(_) => Ok(ValType::Literal),
            FactorKind::CharLit(_) => Ok(ValType::Char),
            FactorKind::Paren(inner) => self.infer_expr(inner),
            FactorKind::Call(_) => Err(internal!("function call factor in type inference")),
        }
    }
}

/// Two-operand type join: equal scalar types keep themselves, anything
/// else propagates the left-hand type.
fn join(lhs: ValType, rhs: ValType) -> ValType {
    match (lhs, rhs) {
        (ValType::Char, ValType::Char) => ValType::Char,
        (ValType::Int, ValType::Int) => ValType::Int,
        (ValType::Uint, ValType::Uint) => ValType::Uint,
        (ValType::Literal, ValType::Literal) => ValType::Literal,
        _ => lhs,
    }
}
