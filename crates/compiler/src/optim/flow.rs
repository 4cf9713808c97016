//! Function partition and control-flow graph construction.
//!
//! The linear stream is split at `FN_START`/`FN_END` into functions, and
//! each function into basic blocks. A leader is the function's first
//! instruction, any `LABEL`, or the instruction immediately after a
//! branch, jump, call or `FN_END`; a block runs from a leader up to the
//! instruction before the next one.

use std::collections::HashMap;

use tracing::debug;

use crate::error::CompileError;
use crate::internal;
use crate::ir::{Inst, IrList, Op};
use crate::optim::lva::BitSet;
use crate::symtab::SymId;

/// Fixed bound on successor edges per block.
pub const MAX_BB_SUCC: usize = 32;

/// A maximal straight-line run of instructions.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: u32,
    /// Instructions as generated.
    pub insts: Vec<Inst>,
    /// DAG-regenerated form, present iff the block was DAG-eligible.
    pub dag_insts: Option<Vec<Inst>>,
    /// Instructions surviving live-variable analysis.
    pub live_insts: Vec<Inst>,
    /// Successor block indices within the owning function.
    pub succ: Vec<usize>,
    pub use_set: BitSet,
    pub def_set: BitSet,
    pub in_set: BitSet,
    pub out_set: BitSet,
}

impl BasicBlock {
    fn new(id: u32, insts: Vec<Inst>) -> Self {
        BasicBlock {
            id,
            insts,
            dag_insts: None,
            live_insts: Vec::new(),
            succ: Vec::new(),
            use_set: BitSet::new(0),
            def_set: BitSet::new(0),
            in_set: BitSet::new(0),
            out_set: BitSet::new(0),
        }
    }

    /// The instruction stream later passes should read: the DAG-optimized
    /// form when the block was eligible, the original otherwise.
    pub fn stream(&self) -> &[Inst] {
        match &self.dag_insts {
            Some(insts) => insts,
            None => &self.insts,
        }
    }
}

/// One function's flow graph.
#[derive(Debug, Clone)]
pub struct FlowFun {
    /// The callable's symbol entry.
    pub sym: SymId,
    pub blocks: Vec<BasicBlock>,
    /// Symbols participating in liveness, ascending by id.
    pub vars: Vec<SymId>,
}

/// All functions of a compilation, in stream order.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    pub funs: Vec<FlowFun>,
}

fn ends_block(op: Op) -> bool {
    op.is_branch() || matches!(op, Op::Jump | Op::Call | Op::FnEnd)
}

/// Split the stream into functions and those into basic blocks, then link
/// successor edges.
pub fn partition(ir: &IrList) -> Result<Vec<FlowFun>, CompileError> {
    let mut funs = Vec::new();
    let mut current: Option<(SymId, Vec<Inst>)> = None;

    for inst in ir.iter() {
        match inst.op {
            Op::FnStart => {
                if current.is_some() {
                    return Err(internal!("nested FN_START in instruction stream"));
                }
                let sym = inst.d.ok_or_else(|| internal!("FN_START without symbol"))?;
                current = Some((sym, vec![*inst]));
            }
            Op::FnEnd => {
                let (sym, mut insts) = current
                    .take()
                    .ok_or_else(|| internal!("FN_END without FN_START"))?;
                insts.push(*inst);
                funs.push((sym, insts));
            }
            _ => match &mut current {
                Some((_, insts)) => insts.push(*inst),
                None => return Err(internal!("instruction outside any function")),
            },
        }
    }
    if current.is_some() {
        return Err(internal!("unterminated function in instruction stream"));
    }

    let mut bid = 0;
    let mut flow = Vec::new();
    for (sym, insts) in funs {
        let blocks = split_blocks(&insts, &mut bid)?;
        flow.push(FlowFun {
            sym,
            blocks,
            vars: Vec::new(),
        });
    }
    Ok(flow)
}

fn split_blocks(insts: &[Inst], bid: &mut u32) -> Result<Vec<BasicBlock>, CompileError> {
    let mut leaders = vec![false; insts.len()];
    leaders[0] = true;
    for (i, inst) in insts.iter().enumerate() {
        if inst.op == Op::Label {
            leaders[i] = true;
        }
        if ends_block(inst.op) && i + 1 < insts.len() {
            leaders[i + 1] = true;
        }
    }

    let mut blocks = Vec::new();
    let mut start = 0;
    for i in 1..=insts.len() {
        if i == insts.len() || leaders[i] {
            *bid += 1;
            blocks.push(BasicBlock::new(*bid, insts[start..i].to_vec()));
            start = i;
        }
    }

    link_successors(&mut blocks)?;
    for block in &blocks {
        debug!(
            bid = block.id,
            len = block.insts.len(),
            succ = ?block.succ,
            "basic block"
        );
    }
    Ok(blocks)
}

fn link_successors(blocks: &mut [BasicBlock]) -> Result<(), CompileError> {
    let mut label_block: HashMap<SymId, usize> = HashMap::new();
    for (i, block) in blocks.iter().enumerate() {
        if let Some(first) = block.insts.first() {
            if first.op == Op::Label {
                let label = first.d.ok_or_else(|| internal!("LABEL without symbol"))?;
                label_block.insert(label, i);
            }
        }
    }

    for i in 0..blocks.len() {
        let last = *blocks[i]
            .insts
            .last()
            .ok_or_else(|| internal!("empty basic block"))?;
        let mut succ = Vec::new();

        if last.op.is_branch() || last.op == Op::Jump {
            let target = last.d.ok_or_else(|| internal!("branch without target"))?;
            let target_block = *label_block
                .get(&target)
                .ok_or_else(|| internal!("branch to unknown label"))?;
            if last.op.is_branch() && i + 1 < blocks.len() {
                succ.push(i + 1);
            }
            succ.push(target_block);
        } else if last.op != Op::FnEnd && i + 1 < blocks.len() {
            succ.push(i + 1);
        }

        if succ.len() > MAX_BB_SUCC {
            return Err(internal!("block {} exceeds successor bound", blocks[i].id));
        }
        blocks[i].succ = succ;
    }
    Ok(())
}
