//! Per-block value-number DAG and instruction regeneration.
//!
//! Symbol leaves are shared by symbol id; operation nodes are hash-consed
//! on (opcode, left child, right child), which is what collapses common
//! subexpressions. `STORE_VAR` does not create a node: it remaps the
//! destination symbol onto the source's node.
//!
//! Regeneration walks the nodes in creation order (children always precede
//! parents), emitting each operation once. The destination is the symbol
//! last stored into the node when that binding is still current and no
//! later node still reads the symbol's previous value; otherwise the
//! node's defining symbol. Remaining current bindings are materialized
//! with `STORE_VAR` at the end of the block, ahead of any trailing branch.

use std::collections::HashMap;

use tracing::debug;

use crate::error::CompileError;
use crate::internal;
use crate::ir::{Inst, IrList, Op};
use crate::optim::flow::BasicBlock;
use crate::symtab::SymId;

/// A block qualifies for DAG optimization when it has no array store, no
/// stack traffic, no call and no I/O.
pub fn eligible(block: &BasicBlock) -> bool {
    block.insts.iter().all(|inst| {
        !matches!(
            inst.op,
            Op::StoreArray | Op::PushVal | Op::PushAddr | Op::Pop | Op::Call
        ) && !inst.op.is_io()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Leaf(SymId),
    Oper(Op, Option<usize>, Option<usize>),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    /// Symbols stored into this node, in store order.
    stored: Vec<SymId>,
}

#[derive(Debug, Default)]
struct Dag {
    nodes: Vec<Node>,
    /// Current binding of each symbol.
    symmap: HashMap<SymId, usize>,
    /// Leaf node of each symbol, when one was created.
    leaves: HashMap<SymId, usize>,
}

impl Dag {
    fn node_of(&mut self, sym: SymId) -> usize {
        if let Some(&idx) = self.symmap.get(&sym) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            kind: NodeKind::Leaf(sym),
            stored: Vec::new(),
        });
        self.symmap.insert(sym, idx);
        self.leaves.insert(sym, idx);
        idx
    }

    fn find_oper(&mut self, op: Op, lhs: Option<usize>, rhs: Option<usize>) -> usize {
        let kind = NodeKind::Oper(op, lhs, rhs);
        if let Some(idx) = self.nodes.iter().position(|n| n.kind == kind) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            kind,
            stored: Vec::new(),
        });
        idx
    }

    fn bind(&mut self, sym: SymId, idx: usize) {
        self.symmap.insert(sym, idx);
        if self.nodes[idx].stored.last() != Some(&sym) {
            self.nodes[idx].stored.push(sym);
        }
    }

    /// True while `sym` still maps to `idx` at the end of the block.
    fn current(&self, sym: SymId, idx: usize) -> bool {
        self.symmap.get(&sym) == Some(&idx)
    }

    /// True when some node after `idx` reads `sym`'s previous value
    /// through its leaf, so `sym` cannot serve as `idx`'s destination.
    fn clobbers_later_read(&self, sym: SymId, idx: usize) -> bool {
        let Some(&leaf) = self.leaves.get(&sym) else {
            return false;
        };
        self.nodes[idx + 1..].iter().any(|n| match n.kind {
            NodeKind::Oper(_, lhs, rhs) => lhs == Some(leaf) || rhs == Some(leaf),
            NodeKind::Leaf(_) => false,
        })
    }
}

/// Build the block's DAG and regenerate its instruction stream. The
/// surrounding `FN_START`/`LABEL` prefix and branch/`JUMP`/`FN_END`
/// suffix are preserved around the regenerated middle.
pub fn optimize_block(ir: &mut IrList, block: &BasicBlock) -> Result<Vec<Inst>, CompileError> {
    let mut prefix = Vec::new();
    let mut body = Vec::new();
    let mut suffix = Vec::new();

    for inst in &block.insts {
        match inst.op {
            Op::FnStart | Op::Label if body.is_empty() && suffix.is_empty() => {
                prefix.push(*inst)
            }
            Op::Jump | Op::FnEnd => suffix.push(*inst),
            op if op.is_branch() => suffix.push(*inst),
            _ => body.push(*inst),
        }
    }

    let dag = construct(&body)?;
    debug!(bid = block.id, nodes = dag.nodes.len(), "DAG built");

    let mut out = prefix;
    out.extend(regenerate(ir, &dag)?);
    out.extend(suffix);
    Ok(out)
}

fn construct(body: &[Inst]) -> Result<Dag, CompileError> {
    let mut dag = Dag::default();
    for inst in body {
        let d = inst.d.ok_or_else(|| internal!("DAG instruction without destination"))?;
        match inst.op {
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::LoadArray => {
                let r = inst.r.ok_or_else(|| internal!("missing first source"))?;
                let s = inst.s.ok_or_else(|| internal!("missing second source"))?;
                let lhs = dag.node_of(r);
                let rhs = dag.node_of(s);
                let out = dag.find_oper(inst.op, Some(lhs), Some(rhs));
                dag.bind(d, out);
            }
            Op::Inc | Op::Dec => {
                let lhs = dag.node_of(d);
                let out = dag.find_oper(inst.op, Some(lhs), None);
                dag.bind(d, out);
            }
            Op::Neg => {
                let r = inst.r.ok_or_else(|| internal!("missing NEG source"))?;
                let lhs = dag.node_of(r);
                let out = dag.find_oper(inst.op, Some(lhs), None);
                dag.bind(d, out);
            }
            Op::StoreVar => {
                let r = inst.r.ok_or_else(|| internal!("missing STORE_VAR source"))?;
                let src = dag.node_of(r);
                dag.bind(d, src);
            }
            other => return Err(internal!("{:?} inside a DAG-eligible block", other)),
        }
    }
    Ok(dag)
}

fn regenerate(ir: &mut IrList, dag: &Dag) -> Result<Vec<Inst>, CompileError> {
    // destination per operation node
    let mut dest: Vec<Option<SymId>> = vec![None; dag.nodes.len()];
    for (idx, node) in dag.nodes.iter().enumerate() {
        let NodeKind::Oper(op, _, _) = node.kind else {
            continue;
        };
        let defining = *node
            .stored
            .first()
            .ok_or_else(|| internal!("operation node never stored"))?;
        dest[idx] = Some(if matches!(op, Op::Inc | Op::Dec) {
            // in-place update, the operand is the destination
            defining
        } else {
            node.stored
                .iter()
                .rev()
                .copied()
                .find(|sym| {
                    dag.current(*sym, idx)
                        && (*sym == defining || !dag.clobbers_later_read(*sym, idx))
                })
                .unwrap_or(defining)
        });
    }

    let rep = |idx: usize| -> Result<SymId, CompileError> {
        match dag.nodes[idx].kind {
            NodeKind::Leaf(sym) => Ok(sym),
            NodeKind::Oper(..) => {
                dest[idx].ok_or_else(|| internal!("operation node without destination"))
            }
        }
    };

    let mut out = Vec::new();
    for (idx, node) in dag.nodes.iter().enumerate() {
        if let NodeKind::Oper(op, lhs, rhs) = node.kind {
            let r = match lhs {
                Some(l) => Some(rep(l)?),
                None => None,
            };
            let s = match rhs {
                Some(r) => Some(rep(r)?),
                None => None,
            };
            out.push(ir.duplicate(op, dest[idx], r, s));
        }
    }

    // materialize the bindings still current at block end
    for (idx, node) in dag.nodes.iter().enumerate() {
        let source = rep(idx)?;
        for sym in &node.stored {
            if *sym == source || !dag.current(*sym, idx) {
                continue;
            }
            out.push(ir.duplicate(Op::StoreVar, Some(*sym), Some(source), None));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::error::Diagnostics;
    use crate::generate::generate;
    use crate::optim::flow::partition;
    use crate::parser::Parser;
    use crate::scanner::Scanner;
    use crate::symtab::{SymCat, SymTab};
    use std::io::Cursor;

    fn optimized(src: &str) -> (SymTab, Vec<crate::optim::flow::FlowFun>) {
        let mut diag = Diagnostics::new().quiet(true);
        let scanner = Scanner::new(Cursor::new(src.to_string()));
        let mut pgm = Parser::new(scanner, &mut diag).unwrap().parse().unwrap();
        let mut tab = SymTab::new();
        analyze(&mut tab, &mut diag, &mut pgm).unwrap();
        let mut ir = generate(&mut tab, &pgm).unwrap();
        let mut funs = partition(&ir).unwrap();
        for fun in &mut funs {
            for block in &mut fun.blocks {
                if eligible(block) {
                    block.dag_insts = Some(optimize_block(&mut ir, block).unwrap());
                }
            }
        }
        (tab, funs)
    }

    #[test]
    fn test_io_blocks_are_not_eligible() {
        let (_, funs) = optimized("var x: integer;\nbegin x := 1; write(x) end.");
        assert!(funs[0].blocks.iter().all(|b| b.dag_insts.is_none()));
    }

    #[test]
    fn test_common_subexpression_is_evaluated_once() {
        let (tab, funs) = optimized(
            "function g(a, b: integer): integer;\n\
             begin g := (a + b) + (a + b) end;\n\
             begin end.",
        );
        let block = &funs[0].blocks[0];
        let stream = block.dag_insts.as_ref().unwrap();

        let adds: Vec<&Inst> = stream.iter().filter(|x| x.op == Op::Add).collect();
        assert_eq!(adds.len(), 2, "a+b folded into one node");

        // base sum computed from the parameters once
        let base = adds[0];
        assert_eq!(tab.sym(base.r.unwrap()).name, "a");
        assert_eq!(tab.sym(base.s.unwrap()).name, "b");
        let t = base.d.unwrap();
        assert_eq!(tab.sym(t).cate, SymCat::Temp);

        // outer sum lands straight in the return slot: ADD out T T
        let outer = adds[1];
        assert_eq!(outer.r, Some(t));
        assert_eq!(outer.s, Some(t));
        assert_eq!(tab.sym(outer.d.unwrap()).cate, SymCat::Func);
    }

    #[test]
    fn test_store_of_literal_survives_regeneration() {
        let (tab, funs) = optimized("var x: integer;\nbegin x := 1 end.");
        let stream = funs[0].blocks[0].dag_insts.as_ref().unwrap();
        let store = stream.iter().find(|x| x.op == Op::StoreVar).unwrap();
        assert_eq!(tab.sym(store.d.unwrap()).name, "x");
        assert_eq!(tab.sym(store.r.unwrap()).value, 1);
    }

    #[test]
    fn test_prefix_and_suffix_are_preserved() {
        let (_, funs) = optimized(
            "var i: integer;\nbegin for i := 1 to 2 do i := i end.",
        );
        for block in &funs[0].blocks {
            let Some(stream) = &block.dag_insts else { continue };
            let orig_first = block.insts.first().unwrap().op;
            let orig_last = block.insts.last().unwrap().op;
            if matches!(orig_first, Op::Label | Op::FnStart) {
                assert_eq!(stream.first().unwrap().op, orig_first);
            }
            if orig_last.is_branch() || matches!(orig_last, Op::Jump | Op::FnEnd) {
                assert_eq!(stream.last().unwrap().op, orig_last);
            }
        }
    }

    #[test]
    fn test_stale_variable_read_keeps_temporary_destination() {
        // t2 reads the original x, so x+1 may not regenerate into x
        let (tab, funs) = optimized(
            "var x, y, z: integer;\n\
             begin y := x + 1; z := x * 2; x := y end.",
        );
        let stream = funs[0].blocks[0].dag_insts.as_ref().unwrap();
        let add = stream.iter().find(|i| i.op == Op::Add).unwrap();
        let mul = stream.iter().find(|i| i.op == Op::Mul).unwrap();
        // the multiply still reads the original x
        assert_eq!(tab.sym(mul.r.unwrap()).name, "x");
        let add_pos = stream.iter().position(|i| i == add).unwrap();
        let mul_pos = stream.iter().position(|i| i == mul).unwrap();
        assert!(add_pos < mul_pos);
        // so the add must not have targeted x directly
        assert_ne!(tab.sym(add.d.unwrap()).name, "x");
        // x's new value is materialized by a later store
        let store_x = stream
            .iter()
            .skip(mul_pos)
            .find(|i| i.op == Op::StoreVar && tab.sym(i.d.unwrap()).name == "x");
        assert!(store_x.is_some());
    }

    #[test]
    fn test_increment_stays_in_place() {
        let (tab, funs) = optimized(
            "var i: integer;\nbegin for i := 1 to 3 do i := i end.",
        );
        let inc_block = funs[0]
            .blocks
            .iter()
            .find(|b| b.insts.iter().any(|x| x.op == Op::Inc))
            .unwrap();
        let stream = inc_block.dag_insts.as_ref().unwrap();
        let inc = stream.iter().find(|x| x.op == Op::Inc).unwrap();
        assert_eq!(tab.sym(inc.d.unwrap()).name, "i");
    }
}
