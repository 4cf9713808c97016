//! Optimizer: basic-block partition, control-flow graph, per-block DAG
//! value numbering and live-variable analysis.
//!
//! The passes run in a fixed order. Partitioning and the CFG come first;
//! DAG regeneration rewrites each eligible block's stream; LVA then reads
//! exactly that stream (the original one for ineligible blocks), computes
//! the dataflow solution and drops dead stores. The generator's linear
//! list is never modified, so the assembler's output is unaffected.

pub mod dag;
pub mod flow;
pub mod lva;

pub use flow::{BasicBlock, FlowFun, FlowGraph, MAX_BB_SUCC};
pub use lva::BitSet;

use crate::error::CompileError;
use crate::ir::IrList;
use crate::symtab::SymTab;

/// Run the whole optimizer over the generated instruction list.
pub fn optimize(tab: &SymTab, ir: &mut IrList) -> Result<FlowGraph, CompileError> {
    let mut funs = flow::partition(ir)?;

    for fun in &mut funs {
        for block in &mut fun.blocks {
            if dag::eligible(block) {
                block.dag_insts = Some(dag::optimize_block(ir, block)?);
            }
        }
    }

    for fun in &mut funs {
        lva::analyze(tab, fun);
    }

    Ok(FlowGraph { funs })
}
