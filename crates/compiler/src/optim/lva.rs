//! Live-variable analysis and dead-store elimination.
//!
//! Only symbols whose category is variable, temporary, by-value or
//! by-reference participate; the sets are bit vectors keyed by symbol id.
//! USE and DEF come from one forward scan per block (used-before-defined /
//! defined-before-used), the IN/OUT solution from the usual backward
//! fixpoint. Each block's analyzed stream is the DAG-regenerated form when
//! the block was eligible, the generator's form otherwise.
//!
//! Dead stores are removed by walking each block backwards with the
//! liveness seeded from OUT: a `STORE_VAR` into a variable or temporary
//! that is dead at that point is dropped, everything else survives.

use tracing::debug;

use crate::ir::{Inst, Op};
use crate::optim::flow::FlowFun;
use crate::symtab::{SymCat, SymId, SymTab};

/// Word-array bit vector keyed by symbol id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    /// An empty set able to hold ids `0..n`.
    pub fn new(n: usize) -> Self {
        BitSet {
            words: vec![0; n / 64 + 1],
        }
    }

    pub fn insert(&mut self, id: SymId) {
        let i = id.0 as usize;
        if i / 64 >= self.words.len() {
            self.words.resize(i / 64 + 1, 0);
        }
        self.words[i / 64] |= 1 << (i % 64);
    }

    pub fn remove(&mut self, id: SymId) {
        let i = id.0 as usize;
        if i / 64 < self.words.len() {
            self.words[i / 64] &= !(1 << (i % 64));
        }
    }

    pub fn contains(&self, id: SymId) -> bool {
        let i = id.0 as usize;
        i / 64 < self.words.len() && self.words[i / 64] & (1 << (i % 64)) != 0
    }

    /// `self = self ∪ other`.
    pub fn union_with(&mut self, other: &BitSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
    }

    /// `self ∖ other` as a new set.
    pub fn minus(&self, other: &BitSet) -> BitSet {
        let mut out = self.clone();
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w &= !o;
        }
        out
    }

    /// Equality ignoring trailing zero words.
    pub fn same(&self, other: &BitSet) -> bool {
        let longest = self.words.len().max(other.words.len());
        (0..longest).all(|i| {
            self.words.get(i).copied().unwrap_or(0) == other.words.get(i).copied().unwrap_or(0)
        })
    }
}

/// Render a set as a 0/1 string over the function's variables, in
/// ascending symbol-id order.
pub fn bitmap(fun: &FlowFun, set: &BitSet) -> String {
    fun.vars
        .iter()
        .map(|v| if set.contains(*v) { '1' } else { '0' })
        .collect()
}

/// Render a set as a comma-separated list of member labels.
pub fn vector(tab: &SymTab, fun: &FlowFun, set: &BitSet) -> String {
    let mut out = String::new();
    for v in &fun.vars {
        if !set.contains(*v) {
            continue;
        }
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(&tab.sym(*v).label);
    }
    out
}

/// Whether a symbol participates in liveness.
pub fn is_var(tab: &SymTab, sym: SymId) -> bool {
    matches!(
        tab.sym(sym).cate,
        SymCat::Var | SymCat::Temp | SymCat::ByValue | SymCat::ByRef
    )
}

/// Operand roles of one instruction: (used symbols, defined symbol).
fn roles(inst: &Inst) -> (Vec<SymId>, Option<SymId>) {
    match inst.op {
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::LoadArray | Op::StoreArray => (
            inst.r.into_iter().chain(inst.s).collect(),
            inst.d,
        ),
        Op::Inc | Op::Dec => (inst.d.into_iter().collect(), inst.d),
        Op::Neg | Op::StoreVar => (inst.r.into_iter().collect(), inst.d),
        op if op.is_branch() => (inst.r.into_iter().chain(inst.s).collect(), None),
        Op::Jump | Op::Call | Op::FnStart | Op::FnEnd | Op::Label | Op::Pop => (Vec::new(), None),
        Op::PushVal => (inst.d.into_iter().collect(), None),
        Op::PushAddr => (inst.d.into_iter().chain(inst.r).collect(), None),
        Op::ReadInt | Op::ReadUint | Op::ReadChar => (Vec::new(), inst.d),
        Op::WriteString | Op::WriteInt | Op::WriteUint | Op::WriteChar => {
            (inst.d.into_iter().collect(), None)
        }
        _ => (Vec::new(), None),
    }
}

/// Run the analysis and dead-store elimination over one function.
pub fn analyze(tab: &SymTab, fun: &mut FlowFun) {
    let nbits = tab.sym_count() + 1;

    // participating variables, for dumps and tests
    let mut vars: Vec<SymId> = Vec::new();
    for block in &fun.blocks {
        for inst in block.stream() {
            for sym in inst.d.iter().chain(inst.r.iter()).chain(inst.s.iter()) {
                if is_var(tab, *sym) && !vars.contains(sym) {
                    vars.push(*sym);
                }
            }
        }
    }
    vars.sort_unstable();
    fun.vars = vars;

    // USE/DEF per block
    for block in &mut fun.blocks {
        let mut use_set = BitSet::new(nbits);
        let mut def_set = BitSet::new(nbits);
        for inst in block.stream() {
            let (uses, def) = roles(inst);
            for sym in uses {
                if is_var(tab, sym) && !def_set.contains(sym) {
                    use_set.insert(sym);
                }
            }
            if let Some(sym) = def {
                if is_var(tab, sym) && !use_set.contains(sym) {
                    def_set.insert(sym);
                }
            }
        }
        block.use_set = use_set;
        block.def_set = def_set;
        block.in_set = BitSet::new(nbits);
        block.out_set = BitSet::new(nbits);
    }

    // backward fixpoint
    let mut epoch = 0;
    loop {
        epoch += 1;
        let mut changed = false;
        for i in 0..fun.blocks.len() {
            let mut out = fun.blocks[i].out_set.clone();
            for succ in fun.blocks[i].succ.clone() {
                out.union_with(&fun.blocks[succ].in_set);
            }

            let mut in_new = out.minus(&fun.blocks[i].def_set);
            in_new.union_with(&fun.blocks[i].use_set);

            if !in_new.same(&fun.blocks[i].in_set) {
                changed = true;
            }
            fun.blocks[i].out_set = out;
            fun.blocks[i].in_set = in_new;
        }
        if !changed {
            break;
        }
    }
    debug!(fun = fun.sym.0, epochs = epoch, "liveness fixpoint");
    for block in &fun.blocks {
        debug!(
            bid = block.id,
            use_ = %bitmap(fun, &block.use_set),
            def = %bitmap(fun, &block.def_set),
            in_ = %vector(tab, fun, &block.in_set),
            out = %vector(tab, fun, &block.out_set),
            "liveness sets"
        );
    }

    // dead-store elimination, block-local backward walk seeded from OUT
    for block in &mut fun.blocks {
        let mut live = block.out_set.clone();
        let mut survivors: Vec<Inst> = Vec::new();
        for inst in block.stream().iter().rev() {
            let (uses, def) = roles(inst);
            let dead_store = inst.op == Op::StoreVar
                && inst
                    .d
                    .map(|d| {
                        matches!(tab.sym(d).cate, SymCat::Var | SymCat::Temp)
                            && !live.contains(d)
                    })
                    .unwrap_or(false);
            if dead_store {
                debug!(inst = inst.id, "dead store eliminated");
                continue;
            }
            if let Some(sym) = def {
                if is_var(tab, sym) {
                    live.remove(sym);
                }
            }
            for sym in uses {
                if is_var(tab, sym) {
                    live.insert(sym);
                }
            }
            survivors.push(*inst);
        }
        survivors.reverse();
        block.live_insts = survivors;
    }
}
