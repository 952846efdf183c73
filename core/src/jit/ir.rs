//! Register IR produced by lowering and consumed by the passes, the
//! executor and the renderer.
//!
//! Ownership is explicit. An operation consumes every register it reads
//! unless the register is listed as borrowed on the variant (values that
//! stay on the operand stack: the map of `StoreMap`, the list of
//! `ListAppend`, the iterator of `ForIter`). Duplication is a `Copy`,
//! dropping a value is a `Release`. The IR only refers to pools by index so
//! an artifact can be shared across threads.

use std::fmt;

use crate::op::{BinaryOp, CompareOp, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u32);

impl Reg {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%r{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    LoadConst { dst: Reg, idx: u32 },
    LoadLocal { dst: Reg, idx: u32 },
    /// Raises if the local is unbound; what a load whose result is
    /// immediately dropped reduces to.
    CheckLocal { idx: u32 },
    StoreLocal { idx: u32, src: Reg },
    DeleteLocal { idx: u32 },
    LoadGlobal { dst: Reg, name: u32 },
    StoreGlobal { name: u32, src: Reg },
    DeleteGlobal { name: u32 },
    LoadDeref { dst: Reg, idx: u32 },
    StoreDeref { idx: u32, src: Reg },
    LoadClosure { dst: Reg, idx: u32 },
    LoadAttr { dst: Reg, obj: Reg, name: u32 },
    StoreAttr { obj: Reg, name: u32, value: Reg },
    DeleteAttr { obj: Reg, name: u32 },
    /// New reference to the value in `src`; `src` stays live.
    Copy { dst: Reg, src: Reg },
    /// Transfers the reference from `src` to `dst`.
    Move { dst: Reg, src: Reg },
    Release { reg: Reg },
    Binary { dst: Reg, op: BinaryOp, lhs: Reg, rhs: Reg },
    InPlace { dst: Reg, op: BinaryOp, lhs: Reg, rhs: Reg },
    Unary { dst: Reg, op: UnaryOp, operand: Reg },
    Compare { dst: Reg, op: CompareOp, lhs: Reg, rhs: Reg },
    GetItem { dst: Reg, container: Reg, key: Reg },
    SetItem { container: Reg, key: Reg, value: Reg },
    DelItem { container: Reg, key: Reg },
    GetSlice { dst: Reg, obj: Reg, start: Option<Reg>, stop: Option<Reg> },
    SetSlice { obj: Reg, start: Option<Reg>, stop: Option<Reg>, value: Reg },
    DelSlice { obj: Reg, start: Option<Reg>, stop: Option<Reg> },
    GetIter { dst: Reg, src: Reg },
    BuildTuple { dst: Reg, items: Vec<Reg> },
    BuildList { dst: Reg, items: Vec<Reg> },
    BuildMap { dst: Reg },
    BuildSlice { dst: Reg, start: Reg, stop: Reg, step: Option<Reg> },
    /// `map` is borrowed.
    StoreMap { map: Reg, key: Reg, value: Reg },
    /// `list` is borrowed.
    ListAppend { list: Reg, item: Reg },
    /// `dsts` receive the items in sequence order.
    Unpack { dsts: Vec<Reg>, src: Reg },
    Call {
        dst: Reg,
        func: Reg,
        args: Vec<Reg>,
        kwargs: Vec<(Reg, Reg)>,
        star: Option<Reg>,
        starstar: Option<Reg>,
    },
    MakeFunction { dst: Reg, code: Reg, defaults: Vec<Reg>, closure: Option<Reg> },
    /// Landing-pad entry: materializes the pending exception as the
    /// `(traceback, value, type)` triple an `except` clause finds.
    Catch { tb: Reg, val: Reg, ty: Reg },
}

impl Op {
    /// Whether the operation can raise and therefore needs an unwind edge.
    pub fn may_raise(&self) -> bool {
        !matches!(
            self,
            Op::LoadConst { .. }
                | Op::StoreLocal { .. }
                | Op::StoreGlobal { .. }
                | Op::LoadClosure { .. }
                | Op::Copy { .. }
                | Op::Move { .. }
                | Op::Release { .. }
                | Op::BuildTuple { .. }
                | Op::BuildList { .. }
                | Op::BuildMap { .. }
                | Op::BuildSlice { .. }
                | Op::Catch { .. }
        )
    }

    /// Register written by the operation, if it has exactly one.
    pub fn dst(&self) -> Option<Reg> {
        match self {
            Op::LoadConst { dst, .. }
            | Op::LoadLocal { dst, .. }
            | Op::LoadGlobal { dst, .. }
            | Op::LoadDeref { dst, .. }
            | Op::LoadClosure { dst, .. }
            | Op::LoadAttr { dst, .. }
            | Op::Copy { dst, .. }
            | Op::Move { dst, .. }
            | Op::Binary { dst, .. }
            | Op::InPlace { dst, .. }
            | Op::Unary { dst, .. }
            | Op::Compare { dst, .. }
            | Op::GetItem { dst, .. }
            | Op::GetSlice { dst, .. }
            | Op::GetIter { dst, .. }
            | Op::BuildTuple { dst, .. }
            | Op::BuildList { dst, .. }
            | Op::BuildMap { dst }
            | Op::BuildSlice { dst, .. }
            | Op::Call { dst, .. }
            | Op::MakeFunction { dst, .. } => Some(*dst),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub op: Op,
    /// Bytecode offset the operation was lowered from; used for tracebacks.
    pub offset: usize,
    /// Landing pad taken when the operation raises.
    pub unwind: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Jump(BlockId),
    /// Truth test of `cond`. The register is consumed unless `keep` is set.
    Branch {
        cond: Reg,
        keep: bool,
        if_true: BlockId,
        if_false: BlockId,
    },
    /// Advances the borrowed `iter`. On exhaustion the iterator is released
    /// and control goes to `exit`.
    ForIter {
        iter: Reg,
        dst: Reg,
        body: BlockId,
        exit: BlockId,
    },
    Return(Reg),
    /// `raise` with up to three operands in stack order.
    Raise { args: Vec<Reg> },
    /// Re-raises an exception triple left by an `except` clause.
    Reraise { ty: Reg, val: Reg, tb: Reg },
    /// Propagates the pending exception out of the frame.
    Unwind,
}

impl Term {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Term::Jump(target) => vec![*target],
            Term::Branch { if_true, if_false, .. } => vec![*if_true, *if_false],
            Term::ForIter { body, exit, .. } => vec![*body, *exit],
            Term::Return(_) | Term::Raise { .. } | Term::Reraise { .. } | Term::Unwind => Vec::new(),
        }
    }

    pub fn may_raise(&self) -> bool {
        matches!(
            self,
            Term::Branch { .. } | Term::ForIter { .. } | Term::Raise { .. } | Term::Reraise { .. }
        )
    }

    pub(crate) fn retarget(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            Term::Jump(target) => *target = f(*target),
            Term::Branch { if_true, if_false, .. } => {
                *if_true = f(*if_true);
                *if_false = f(*if_false);
            }
            Term::ForIter { body, exit, .. } => {
                *body = f(*body);
                *exit = f(*exit);
            }
            Term::Return(_) | Term::Raise { .. } | Term::Reraise { .. } | Term::Unwind => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub instrs: Vec<Instr>,
    pub term: Term,
    pub term_offset: usize,
    /// Landing pad for a raising terminator.
    pub term_unwind: Option<BlockId>,
}

impl Block {
    pub fn new(term: Term, term_offset: usize) -> Self {
        Self {
            instrs: Vec::new(),
            term,
            term_offset,
            term_unwind: None,
        }
    }

    /// Every block this one can transfer control to, landing pads included.
    pub fn all_successors(&self) -> Vec<BlockId> {
        let mut out = self.term.successors();
        out.extend(self.term_unwind);
        out.extend(self.instrs.iter().filter_map(|i| i.unwind));
        out
    }
}

/// A lowered code unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub blocks: Vec<Block>,
    pub entry: BlockId,
    pub nregs: u32,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instrs.len()).sum()
    }

    /// Number of references to each block from terminators, unwind edges and
    /// the entry point.
    pub fn predecessor_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.blocks.len()];
        counts[self.entry.index()] += 1;
        for block in &self.blocks {
            for succ in block.all_successors() {
                counts[succ.index()] += 1;
            }
        }
        counts
    }
}
