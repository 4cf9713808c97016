//! Symbol entries and the nested scope stack.
//!
//! Entries and scopes live in two arenas owned by [`SymTab`]; everything
//! else refers to them through [`SymId`] / [`ScopeId`] handles, so the
//! whole compilation's symbol graph drops in one place. Each scope hashes
//! its names into a small bucket array and additionally remembers insertion
//! order, which the assembler's per-function tables depend on.

use serde::Serialize;
use tracing::debug;

use crate::ast::{Ident, IdentKind};
use crate::error::CompileError;
use crate::internal;

pub const MAX_BUCKETS: usize = 16;
pub const MAX_SYM_ENTRIES: usize = 1024;

const HASH_SIZE: u32 = 211;
const HASH_SHIFT: u32 = 4;

/// Handle of a symbol entry; the numeric value is the entry's sid (>= 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SymId(pub u32);

/// Handle of a scope; the numeric value is the scope's tid (>= 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ScopeId(pub u32);

/// Symbol category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymCat {
    Nop,
    Const,
    Var,
    Proc,
    Func,
    Array,
    ByValue,
    ByRef,
    Temp,
    Label,
    Number,
    Str,
}

impl SymCat {
    /// Three-letter label prefix for this category.
    pub fn label_prefix(self) -> &'static str {
        match self {
            SymCat::Nop | SymCat::Const => "CNS",
            SymCat::Var => "VBL",
            SymCat::Proc | SymCat::Func => "FUN",
            SymCat::ByValue | SymCat::ByRef => "VAL",
            SymCat::Array => "ARR",
            SymCat::Temp | SymCat::Str => "TMP",
            SymCat::Number => "LIT",
            SymCat::Label => "LBL",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SymCat::Nop => "NOP",
            SymCat::Const => "CONST",
            SymCat::Var => "VARIABLE",
            SymCat::Proc => "PROCEDURE",
            SymCat::Func => "FUNCTION",
            SymCat::Array => "ARRAY",
            SymCat::ByValue => "BY_VALUE",
            SymCat::ByRef => "BY_REFERENCE",
            SymCat::Temp => "TEMP",
            SymCat::Label => "LABEL",
            SymCat::Number => "NUMBER",
            SymCat::Str => "STRING",
        }
    }
}

/// Value type of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValType {
    Void,
    Int,
    Uint,
    Char,
    Str,
    Literal,
}

impl ValType {
    /// Two-character name-mangling suffix.
    pub fn suffix(self) -> &'static str {
        match self {
            ValType::Void => "_V",
            ValType::Int => "_I",
            ValType::Uint => "_U",
            ValType::Char => "_C",
            ValType::Str => "_S",
            ValType::Literal => "_L",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValType::Void => "VOID",
            ValType::Int => "INT",
            ValType::Uint => "UINT",
            ValType::Char => "CHAR",
            ValType::Str => "STRING",
            ValType::Literal => "LITERAL",
        }
    }
}

/// One symbol entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SymEntry {
    pub sid: u32,
    /// Mangled key for callables, source name otherwise.
    pub name: String,
    pub cate: SymCat,
    pub typ: ValType,
    /// Constant or literal value.
    pub value: i64,
    pub arrlen: u32,
    /// Contents of a string literal.
    pub text: String,
    /// Formal parameters, in declaration order (callables only).
    pub params: Vec<SymId>,
    /// Owned nested scope (callables only).
    pub scope: Option<ScopeId>,
    /// Stable textual label: three-letter prefix + zero-padded sid.
    pub label: String,
    /// Stack offset inside the owning scope.
    pub off: i32,
    pub line: usize,
    /// The scope this entry is installed in.
    pub owner: ScopeId,
}

/// One scope frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub tid: u32,
    pub depth: u32,
    pub nspace: String,
    pub outer: Option<ScopeId>,
    pub inner: Option<ScopeId>,
    /// The callable that owns this scope.
    pub func: Option<SymId>,
    pub argoff: i32,
    pub varoff: i32,
    pub tmpoff: i32,
    buckets: [Vec<SymId>; MAX_BUCKETS],
    /// Installed entries in insertion order.
    pub entries: Vec<SymId>,
}

fn hash(key: &str) -> usize {
    let mut h: u32 = 0;
    for b in key.bytes() {
        h = ((h << HASH_SHIFT).wrapping_add(u32::from(b))) % HASH_SIZE;
    }
    (h as usize) % MAX_BUCKETS
}

/// Arena of scopes and symbol entries plus the live scope stack.
#[derive(Debug, Default)]
pub struct SymTab {
    syms: Vec<SymEntry>,
    scopes: Vec<Scope>,
    top: Option<ScopeId>,
    depth: u32,
    entered: usize,
    exited: usize,
}

impl SymTab {
    pub fn new() -> Self {
        SymTab::default()
    }

    pub fn sym(&self, id: SymId) -> &SymEntry {
        &self.syms[(id.0 - 1) as usize]
    }

    pub fn sym_mut(&mut self, id: SymId) -> &mut SymEntry {
        &mut self.syms[(id.0 - 1) as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[(id.0 - 1) as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[(id.0 - 1) as usize]
    }

    pub fn sym_count(&self) -> usize {
        self.syms.len()
    }

    /// Number of scope entries minus exits; zero once analysis is done.
    pub fn stack_balance(&self) -> isize {
        self.entered as isize - self.exited as isize
    }

    /// Push a fresh scope named `nspace`.
    pub fn enter_scope(&mut self, nspace: &str) -> ScopeId {
        let tid = self.scopes.len() as u32 + 1;
        self.depth += 1;
        let id = ScopeId(tid);
        let scope = Scope {
            tid,
            depth: self.depth,
            nspace: nspace.to_string(),
            outer: self.top,
            inner: None,
            func: None,
            argoff: 0,
            // slot 0 is reserved for a function return value
            varoff: 1,
            tmpoff: 0,
            buckets: Default::default(),
            entries: Vec::new(),
        };
        self.scopes.push(scope);
        if let Some(outer) = self.top {
            self.scope_mut(outer).inner = Some(id);
        }
        self.top = Some(id);
        self.entered += 1;
        debug!(depth = self.depth, tid, nspace, "scope push");
        id
    }

    /// Pop the current scope. The frame itself stays in the arena.
    pub fn exit_scope(&mut self) -> Result<ScopeId, CompileError> {
        let top = self.top.ok_or_else(|| internal!("scope stack underflow"))?;
        let outer = self.scope(top).outer;
        self.top = outer;
        if let Some(o) = outer {
            self.scope_mut(o).inner = None;
        }
        self.depth -= 1;
        self.exited += 1;
        debug!(tid = top.0, nspace = %self.scope(top).nspace, "scope pop");
        Ok(top)
    }

    pub fn top(&self) -> Result<ScopeId, CompileError> {
        self.top.ok_or_else(|| internal!("no active scope"))
    }

    fn get_in(&self, scope: ScopeId, name: &str) -> Option<SymId> {
        let bucket = &self.scope(scope).buckets[hash(name)];
        bucket
            .iter()
            .rev()
            .copied()
            .find(|id| self.sym(*id).name == name)
    }

    /// Search the current scope only.
    pub fn lookup_local(&self, name: &str) -> Option<SymId> {
        self.top.and_then(|t| self.get_in(t, name))
    }

    /// Search a specific scope only.
    pub fn lookup_in(&self, scope: ScopeId, name: &str) -> Option<SymId> {
        self.get_in(scope, name)
    }

    /// Walk the scope chain outward until found.
    pub fn lookup(&self, name: &str) -> Option<SymId> {
        let mut cursor = self.top;
        while let Some(scope) = cursor {
            if let Some(found) = self.get_in(scope, name) {
                return Some(found);
            }
            cursor = self.scope(scope).outer;
        }
        None
    }

    fn put(&mut self, scope: ScopeId, entry: SymEntry) -> Result<SymId, CompileError> {
        if self.syms.len() >= MAX_SYM_ENTRIES {
            return Err(internal!("symbol table exhausted ({MAX_SYM_ENTRIES} entries)"));
        }
        let id = SymId(entry.sid);
        self.syms.push(entry);
        let name = self.sym(id).name.clone();
        let s = self.scope_mut(scope);
        s.buckets[hash(&name)].push(id);
        s.entries.push(id);
        debug!(tid = scope.0, sym = %name, sid = id.0, "symbol installed");
        Ok(id)
    }

    /// Install a declared identifier into the current scope.
    pub fn insert(&mut self, ident: &Ident) -> Result<SymId, CompileError> {
        let top = self.top()?;
        self.insert_in(top, ident, &ident.name.clone())
    }

    /// Install a declared identifier into `scope` under `key` (the mangled
    /// name for callables). Assigns category, value type, label and offset.
    pub fn insert_in(
        &mut self,
        scope: ScopeId,
        ident: &Ident,
        key: &str,
    ) -> Result<SymId, CompileError> {
        let sid = self.syms.len() as u32 + 1;
        let cate = category_of(ident.kind);
        let typ = type_of(ident.kind);

        let mut off = 0;
        {
            let s = self.scope_mut(scope);
            match cate {
                SymCat::Nop | SymCat::Const => {}
                SymCat::Var => {
                    off = s.varoff;
                    s.varoff += 1;
                }
                SymCat::Proc | SymCat::Func => {
                    // the program entry reserves no slot in its own scope
                    if ident.kind != IdentKind::Entry {
                        off = s.varoff;
                        s.varoff += 1;
                    }
                }
                SymCat::ByValue | SymCat::ByRef => {
                    off = s.argoff;
                    s.argoff += 1;
                }
                SymCat::Array => {
                    off = s.varoff;
                    s.varoff += ident.length as i32;
                }
                _ => return Err(internal!("bad declared category {:?}", cate)),
            }
        }

        let entry = SymEntry {
            sid,
            name: key.to_string(),
            cate,
            typ,
            value: ident.value,
            arrlen: ident.length,
            text: String::new(),
            params: Vec::new(),
            scope: None,
            label: format!("{}{:03}", cate.label_prefix(), sid),
            off,
            line: ident.line,
            owner: scope,
        };
        self.put(scope, entry)
    }

    /// Create a synthetic entry (number, temporary, label, string) in
    /// `scope`.
    pub fn alloc(
        &mut self,
        scope: ScopeId,
        name: &str,
        cate: SymCat,
        typ: ValType,
    ) -> Result<SymId, CompileError> {
        let sid = self.syms.len() as u32 + 1;
        let mut off = 0;
        match cate {
            SymCat::Number | SymCat::Label | SymCat::Str => {}
            SymCat::Temp => {
                // locals are fixed by now, temporaries stack above them
                let s = self.scope_mut(scope);
                off = s.varoff + s.tmpoff;
                s.tmpoff += 1;
            }
            _ => return Err(internal!("bad synthetic category {:?}", cate)),
        }

        let entry = SymEntry {
            sid,
            name: name.to_string(),
            cate,
            typ,
            value: 0,
            arrlen: 0,
            text: String::new(),
            params: Vec::new(),
            scope: None,
            label: format!("{}{:03}", cate.label_prefix(), sid),
            off,
            line: 0,
            owner: scope,
        };
        self.put(scope, entry)
    }

    /// Debug rendering of the scope arena, innermost first.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for scope in self.scopes.iter().rev() {
            let indent = "  ".repeat(scope.depth as usize);
            out.push_str(&format!(
                "{}scope(tid={}): depth={}, nspace={}\n",
                indent, scope.tid, scope.depth, scope.nspace
            ));
            for id in &scope.entries {
                let e = self.sym(*id);
                out.push_str(&format!(
                    "{}  sid={}, name={}, cate={}, type={}, value={}, label={}, off={}\n",
                    indent,
                    e.sid,
                    e.name,
                    e.cate.name(),
                    e.typ.name(),
                    e.value,
                    e.label,
                    e.off
                ));
            }
            out.push_str(&format!(
                "{}  argoff: {}, varoff: {}, tmpoff: {}\n",
                indent, scope.argoff, scope.varoff, scope.tmpoff
            ));
        }
        out
    }
}

fn category_of(kind: IdentKind) -> SymCat {
    match kind {
        IdentKind::Proc => SymCat::Proc,
        IdentKind::IntFunc | IdentKind::UintFunc | IdentKind::CharFunc | IdentKind::Entry => {
            SymCat::Func
        }
        IdentKind::IntConst | IdentKind::UintConst | IdentKind::CharConst => SymCat::Const,
        IdentKind::IntVar | IdentKind::UintVar | IdentKind::CharVar => SymCat::Var,
        IdentKind::IntArray | IdentKind::UintArray | IdentKind::CharArray => SymCat::Array,
        IdentKind::IntByVal | IdentKind::UintByVal | IdentKind::CharByVal => SymCat::ByValue,
        IdentKind::IntByRef | IdentKind::UintByRef | IdentKind::CharByRef => SymCat::ByRef,
        IdentKind::Init => SymCat::Nop,
    }
}

fn type_of(kind: IdentKind) -> ValType {
    match kind {
        IdentKind::IntFunc
        | IdentKind::IntConst
        | IdentKind::IntVar
        | IdentKind::IntArray
        | IdentKind::IntByVal
        | IdentKind::IntByRef => ValType::Int,
        IdentKind::UintFunc
        | IdentKind::UintConst
        | IdentKind::UintVar
        | IdentKind::UintArray
        | IdentKind::UintByVal
        | IdentKind::UintByRef => ValType::Uint,
        IdentKind::CharFunc
        | IdentKind::CharConst
        | IdentKind::CharVar
        | IdentKind::CharArray
        | IdentKind::CharByVal
        | IdentKind::CharByRef => ValType::Char,
        IdentKind::Proc | IdentKind::Init | IdentKind::Entry => ValType::Void,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str, kind: IdentKind) -> Ident {
        let mut id = Ident::new(name, 1);
        id.kind = kind;
        id
    }

    #[test]
    fn test_label_format_per_category() {
        let mut tab = SymTab::new();
        let scope = tab.enter_scope("main");
        let c = tab.insert(&ident("one", IdentKind::IntConst)).unwrap();
        let v = tab.insert(&ident("x", IdentKind::IntVar)).unwrap();
        let t = tab.alloc(scope, "@expr/add", SymCat::Temp, ValType::Int).unwrap();
        let l = tab.alloc(scope, "@ifthen", SymCat::Label, ValType::Void).unwrap();
        assert_eq!(tab.sym(c).label, "CNS001");
        assert_eq!(tab.sym(v).label, "VBL002");
        assert_eq!(tab.sym(t).label, "TMP003");
        assert_eq!(tab.sym(l).label, "LBL004");
    }

    #[test]
    fn test_variable_offsets_start_after_return_slot() {
        let mut tab = SymTab::new();
        let scope = tab.enter_scope("main");
        let a = tab.insert(&ident("a", IdentKind::IntVar)).unwrap();
        let b = tab.insert(&ident("b", IdentKind::IntVar)).unwrap();
        assert_eq!(tab.sym(a).off, 1);
        assert_eq!(tab.sym(b).off, 2);
        assert_eq!(tab.scope(scope).varoff, 3);
    }

    #[test]
    fn test_array_consumes_length_slots() {
        let mut tab = SymTab::new();
        let scope = tab.enter_scope("main");
        let mut arr = ident("buf", IdentKind::IntArray);
        arr.length = 10;
        let a = tab.insert(&arr).unwrap();
        let v = tab.insert(&ident("y", IdentKind::IntVar)).unwrap();
        assert_eq!(tab.sym(a).off, 1);
        assert_eq!(tab.sym(v).off, 11);
        assert_eq!(tab.scope(scope).varoff, 12);
    }

    #[test]
    fn test_parameters_use_argument_offsets() {
        let mut tab = SymTab::new();
        tab.enter_scope("f");
        let p = tab.insert(&ident("x", IdentKind::IntByVal)).unwrap();
        let q = tab.insert(&ident("y", IdentKind::CharByRef)).unwrap();
        assert_eq!(tab.sym(p).off, 0);
        assert_eq!(tab.sym(q).off, 1);
        assert_eq!(tab.sym(p).label, "VAL001");
        assert_eq!(tab.sym(q).label, "VAL002");
    }

    #[test]
    fn test_temp_offsets_stack_above_variables() {
        let mut tab = SymTab::new();
        let scope = tab.enter_scope("main");
        tab.insert(&ident("a", IdentKind::IntVar)).unwrap();
        let t1 = tab.alloc(scope, "@t", SymCat::Temp, ValType::Int).unwrap();
        let t2 = tab.alloc(scope, "@t", SymCat::Temp, ValType::Int).unwrap();
        assert_eq!(tab.sym(t1).off, 2);
        assert_eq!(tab.sym(t2).off, 3);
    }

    #[test]
    fn test_lookup_walks_scope_chain() {
        let mut tab = SymTab::new();
        tab.enter_scope("main");
        let outer = tab.insert(&ident("x", IdentKind::IntVar)).unwrap();
        tab.enter_scope("p");
        assert_eq!(tab.lookup_local("x"), None);
        assert_eq!(tab.lookup("x"), Some(outer));
        let shadow = tab.insert(&ident("x", IdentKind::CharVar)).unwrap();
        assert_eq!(tab.lookup("x"), Some(shadow));
        tab.exit_scope().unwrap();
        assert_eq!(tab.lookup("x"), Some(outer));
    }

    #[test]
    fn test_scope_stack_balance() {
        let mut tab = SymTab::new();
        tab.enter_scope("main");
        tab.enter_scope("p");
        tab.exit_scope().unwrap();
        tab.exit_scope().unwrap();
        assert_eq!(tab.stack_balance(), 0);
        assert!(tab.exit_scope().is_err());
    }

    #[test]
    fn test_entry_symbol_reserves_no_variable_slot() {
        let mut tab = SymTab::new();
        let scope = tab.enter_scope("_start");
        tab.insert(&ident("_start", IdentKind::Entry)).unwrap();
        let x = tab.insert(&ident("x", IdentKind::IntVar)).unwrap();
        assert_eq!(tab.sym(x).off, 1);
        assert_eq!(tab.scope(scope).varoff, 2);
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut tab = SymTab::new();
        let scope = tab.enter_scope("main");
        for name in ["delta", "alpha", "omega", "beta"] {
            tab.insert(&ident(name, IdentKind::IntVar)).unwrap();
        }
        let names: Vec<&str> = tab
            .scope(scope)
            .entries
            .iter()
            .map(|id| tab.sym(*id).name.as_str())
            .collect();
        assert_eq!(names, vec!["delta", "alpha", "omega", "beta"]);
    }
}
