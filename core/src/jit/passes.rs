//! IR passes. Each optimization level runs a superset of the level below;
//! none of them changes observable behavior.
//!
//! - O0: lowering output as is.
//! - O1: jump threading, block merging, unreachable-block removal.
//! - O2: O1 plus dead-value elision and constant-branch folding.
//! - O3: O2 repeated until nothing changes.

use serde::Serialize;

use super::ir::{Block, BlockId, Function, Op, Term};
use super::options::OptLevel;
use crate::code::CodeUnit;
use crate::op::native_truth;

const MAX_ROUNDS: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub rounds: usize,
    pub threaded_jumps: usize,
    pub merged_blocks: usize,
    pub removed_blocks: usize,
    pub elided_values: usize,
    pub folded_branches: usize,
}

pub fn optimize(func: &mut Function, code: &CodeUnit, level: OptLevel) -> PassStats {
    let mut stats = PassStats::default();
    match level {
        OptLevel::O0 => {}
        OptLevel::O1 => {
            round(func, code, false, &mut stats);
        }
        OptLevel::O2 => {
            round(func, code, true, &mut stats);
        }
        OptLevel::O3 => {
            for _ in 0..MAX_ROUNDS {
                if !round(func, code, true, &mut stats) {
                    break;
                }
            }
        }
    }
    stats
}

fn round(func: &mut Function, code: &CodeUnit, peephole: bool, stats: &mut PassStats) -> bool {
    let mut changed = false;
    if peephole {
        changed |= elide_dead_values(func, stats);
        changed |= fold_constant_branches(func, code, stats);
    }
    changed |= thread_jumps(func, stats);
    changed |= merge_blocks(func, stats);
    changed |= remove_unreachable(func, stats);
    stats.rounds += 1;
    changed
}

fn retarget_block(block: &mut Block, mut f: impl FnMut(BlockId) -> BlockId) {
    block.term.retarget(&mut f);
    block.term_unwind = block.term_unwind.map(&mut f);
    for instr in &mut block.instrs {
        instr.unwind = instr.unwind.map(&mut f);
    }
}

/// A value produced and immediately released is never materialized. A local
/// load dropped this way still has to check that the local is bound.
fn elide_dead_values(func: &mut Function, stats: &mut PassStats) -> bool {
    let mut changed = false;
    for block in &mut func.blocks {
        let mut out = Vec::with_capacity(block.instrs.len());
        let mut iter = block.instrs.drain(..).peekable();
        while let Some(mut instr) = iter.next() {
            let released = match iter.peek() {
                Some(next) => match next.op {
                    Op::Release { reg } => instr.op.dst() == Some(reg),
                    _ => false,
                },
                None => false,
            };
            if !released {
                out.push(instr);
                continue;
            }
            match instr.op {
                Op::LoadConst { .. } | Op::Copy { .. } => {
                    iter.next();
                }
                Op::LoadLocal { idx, .. } => {
                    iter.next();
                    instr.op = Op::CheckLocal { idx };
                    out.push(instr);
                }
                _ => {
                    out.push(instr);
                    continue;
                }
            }
            stats.elided_values += 1;
            changed = true;
        }
        drop(iter);
        block.instrs = out;
    }
    changed
}

/// Branches on a constant loaded right before them become plain jumps.
fn fold_constant_branches(func: &mut Function, code: &CodeUnit, stats: &mut PassStats) -> bool {
    let mut changed = false;
    for block in &mut func.blocks {
        let Term::Branch {
            cond,
            keep: false,
            if_true,
            if_false,
        } = block.term
        else {
            continue;
        };
        let Some(last) = block.instrs.last() else {
            continue;
        };
        let Op::LoadConst { dst, idx } = last.op else {
            continue;
        };
        if dst != cond {
            continue;
        }
        let Some(value) = code.consts.get(idx as usize) else {
            continue;
        };
        let target = if native_truth(value) { if_true } else { if_false };
        block.instrs.pop();
        block.term = Term::Jump(target);
        block.term_unwind = None;
        stats.folded_branches += 1;
        changed = true;
    }
    changed
}

/// Edges into an empty block that only jumps on go straight to its target.
fn thread_jumps(func: &mut Function, stats: &mut PassStats) -> bool {
    let n = func.blocks.len();
    let forward: Vec<Option<BlockId>> = func
        .blocks
        .iter()
        .enumerate()
        .map(|(i, block)| match block.term {
            Term::Jump(target) if block.instrs.is_empty() && target.index() != i => Some(target),
            _ => None,
        })
        .collect();
    let resolve = |mut id: BlockId| {
        for _ in 0..n {
            match forward[id.index()] {
                Some(next) => id = next,
                None => break,
            }
        }
        id
    };
    let mut threaded = 0;
    for block in &mut func.blocks {
        retarget_block(block, |id| {
            let to = resolve(id);
            if to != id {
                threaded += 1;
            }
            to
        });
    }
    func.entry = resolve(func.entry);
    stats.threaded_jumps += threaded;
    threaded > 0
}

/// Appends a block to its only predecessor when that predecessor jumps to it.
fn merge_blocks(func: &mut Function, stats: &mut PassStats) -> bool {
    let mut preds = func.predecessor_counts();
    let mut changed = false;
    for a in 0..func.blocks.len() {
        while let Term::Jump(b) = func.blocks[a].term {
            if b.index() == a || b == func.entry || preds[b.index()] != 1 {
                break;
            }
            let absorbed = std::mem::replace(&mut func.blocks[b.index()], Block::new(Term::Unwind, 0));
            preds[b.index()] = 0;
            let block = &mut func.blocks[a];
            block.instrs.extend(absorbed.instrs);
            block.term = absorbed.term;
            block.term_offset = absorbed.term_offset;
            block.term_unwind = absorbed.term_unwind;
            stats.merged_blocks += 1;
            changed = true;
        }
    }
    changed
}

fn remove_unreachable(func: &mut Function, stats: &mut PassStats) -> bool {
    let n = func.blocks.len();
    let mut reachable = vec![false; n];
    let mut stack = vec![func.entry];
    while let Some(id) = stack.pop() {
        if std::mem::replace(&mut reachable[id.index()], true) {
            continue;
        }
        stack.extend(func.blocks[id.index()].all_successors());
    }
    let live = reachable.iter().filter(|r| **r).count();
    if live == n {
        return false;
    }
    let mut remap = vec![BlockId(0); n];
    let mut next = 0u32;
    for (i, keep) in reachable.iter().enumerate() {
        if *keep {
            remap[i] = BlockId(next);
            next += 1;
        }
    }
    let old = std::mem::take(&mut func.blocks);
    func.blocks = old
        .into_iter()
        .zip(&reachable)
        .filter_map(|(block, keep)| keep.then_some(block))
        .collect();
    for block in &mut func.blocks {
        retarget_block(block, |id| remap[id.index()]);
    }
    func.entry = remap[func.entry.index()];
    stats.removed_blocks += n - live;
    true
}
