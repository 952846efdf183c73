//! Lowering from stack bytecode to the register IR. Every operand stack slot
//! becomes a virtual register and the block stack is tracked statically.

use std::collections::VecDeque;

use super::error::CompileError;
use super::ir::{Block, BlockId, Function, Instr, Op, Reg, Term};
use crate::code::{CodeUnit, Decoded, DecodeError, Instr as Bytecode, Opcode};
use crate::op::CompareOp;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};

type LowerResult<T> = Result<T, CompileError>;

/// What is known statically about a stack slot. Handler entry pushes an
/// exception triple; `END_FINALLY` can only be compiled when it is handed
/// that same triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Plain,
    ExcTraceback,
    ExcValue,
    ExcType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupKind {
    Loop,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Setup {
    kind: SetupKind,
    /// Instruction index of the handler or loop exit.
    handler: usize,
    level: usize,
}

#[derive(Debug, Clone, Default)]
struct State {
    stack: Vec<(Reg, Tag)>,
    setups: Vec<Setup>,
}

impl State {
    fn regs(&self) -> Vec<Reg> {
        self.stack.iter().map(|(reg, _)| *reg).collect()
    }
}

struct Entry {
    block: BlockId,
    state: State,
}

enum Step {
    Next,
    End(Term, Option<BlockId>),
}

/// Lowers `code` to an IR function without running any pass.
pub fn lower(code: &CodeUnit) -> LowerResult<Function> {
    let decoded = code.decoded()?;
    let mut lowerer = Lowerer::new(code, decoded);
    lowerer.run()
}

struct Lowerer<'a> {
    code: &'a CodeUnit,
    decoded: &'a Decoded,
    blocks: Vec<Option<Block>>,
    entries: FastHashMap<usize, Entry>,
    worklist: VecDeque<usize>,
    pads: FastHashMap<(Option<usize>, Vec<Reg>), BlockId>,
    nregs: u32,
}

impl<'a> Lowerer<'a> {
    fn new(code: &'a CodeUnit, decoded: &'a Decoded) -> Self {
        Self {
            code,
            decoded,
            blocks: Vec::new(),
            entries: fast_hash_map_new(),
            worklist: VecDeque::new(),
            pads: fast_hash_map_new(),
            nregs: 0,
        }
    }

    fn run(&mut self) -> LowerResult<Function> {
        let entry = self.new_block();
        self.entries.insert(
            0,
            Entry {
                block: entry,
                state: State::default(),
            },
        );
        self.worklist.push_back(0);
        while let Some(start) = self.worklist.pop_front() {
            self.lower_block(start)?;
        }
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.drain(..) {
            blocks.push(block.ok_or(CompileError::InconsistentHandler { offset: 0 })?);
        }
        Ok(Function {
            name: self.code.name.clone(),
            blocks,
            entry,
            nregs: self.nregs,
        })
    }

    fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(None);
        id
    }

    fn finish(&mut self, id: BlockId, block: Block) {
        self.blocks[id.index()] = Some(block);
    }

    fn fresh(&mut self) -> Reg {
        let reg = Reg(self.nregs);
        self.nregs += 1;
        reg
    }

    fn lower_block(&mut self, start: usize) -> LowerResult<()> {
        let (id, mut state) = match self.entries.get(&start) {
            Some(entry) => (entry.block, entry.state.clone()),
            None => return Err(CompileError::InconsistentHandler { offset: 0 }),
        };
        let range = self.decoded.block_range(start);
        let mut instrs = Vec::new();
        let mut last_offset = 0;
        for idx in range.clone() {
            let bytecode = self.decoded.instrs[idx];
            last_offset = bytecode.offset;
            if let Step::End(term, term_unwind) = self.lower_instr(&bytecode, idx, &mut state, &mut instrs)? {
                let mut block = Block::new(term, bytecode.offset);
                block.instrs = instrs;
                block.term_unwind = term_unwind;
                self.finish(id, block);
                return Ok(());
            }
        }
        if range.end >= self.decoded.len() {
            return Err(DecodeError::FallsOffEnd { offset: last_offset }.into());
        }
        let next = self.edge(range.end, state, Vec::new(), last_offset)?;
        let mut block = Block::new(Term::Jump(next), last_offset);
        block.instrs = instrs;
        self.finish(id, block);
        Ok(())
    }

    /// Returns the block to transfer to when leaving with `state` for the
    /// bytecode block at `target`. `prefix` runs first on the edge.
    fn edge(&mut self, target: usize, state: State, prefix: Vec<Instr>, offset: usize) -> LowerResult<BlockId> {
        let mut instrs = prefix;
        let target_block = match self.entries.get(&target) {
            Some(entry) => {
                let target_offset = self.decoded.instrs.get(target).map_or(0, |i| i.offset);
                if entry.state.stack.len() != state.stack.len() {
                    return Err(CompileError::StackMismatch {
                        offset: target_offset,
                        expected: entry.state.stack.len(),
                        found: state.stack.len(),
                    });
                }
                let tags_match = entry
                    .state
                    .stack
                    .iter()
                    .zip(&state.stack)
                    .all(|((_, a), (_, b))| a == b);
                if entry.state.setups != state.setups || !tags_match {
                    return Err(CompileError::InconsistentHandler { offset: target_offset });
                }
                let pairs: Vec<(Reg, Reg)> = state
                    .regs()
                    .into_iter()
                    .zip(entry.state.regs())
                    .filter(|(src, dst)| src != dst)
                    .collect();
                let block = entry.block;
                self.parallel_moves(&mut instrs, &pairs, offset);
                block
            }
            None => {
                let block = self.new_block();
                self.entries.insert(target, Entry { block, state });
                self.worklist.push_back(target);
                block
            }
        };
        if instrs.is_empty() {
            return Ok(target_block);
        }
        let id = self.new_block();
        let mut block = Block::new(Term::Jump(target_block), offset);
        block.instrs = instrs;
        self.finish(id, block);
        Ok(id)
    }

    fn parallel_moves(&mut self, instrs: &mut Vec<Instr>, pairs: &[(Reg, Reg)], offset: usize) {
        let overlapping = pairs.iter().any(|(_, dst)| pairs.iter().any(|(src, _)| src == dst));
        if !overlapping {
            for &(src, dst) in pairs {
                instrs.push(plain(Op::Move { dst, src }, offset));
            }
            return;
        }
        let temps: Vec<Reg> = pairs.iter().map(|_| self.fresh()).collect();
        for (&(src, _), &tmp) in pairs.iter().zip(&temps) {
            instrs.push(plain(Op::Move { dst: tmp, src }, offset));
        }
        for (&(_, dst), &tmp) in pairs.iter().zip(&temps) {
            instrs.push(plain(Op::Move { dst, src: tmp }, offset));
        }
    }

    /// The landing pad for an operation raising while `state` is live.
    fn landing_pad(&mut self, state: &State, offset: usize) -> LowerResult<BlockId> {
        let handler = state.setups.iter().rposition(|s| s.kind == SetupKind::Except);
        let key = (handler.map(|i| state.setups[i].handler), state.regs());
        if let Some(&pad) = self.pads.get(&key) {
            return Ok(pad);
        }
        let pad = match handler {
            None => {
                let id = self.new_block();
                let mut block = Block::new(Term::Unwind, offset);
                block.instrs = releases(state.stack.iter().rev().map(|(r, _)| *r), offset);
                self.finish(id, block);
                id
            }
            Some(i) => {
                let setup = state.setups[i];
                if setup.level > state.stack.len() {
                    return Err(CompileError::InconsistentHandler { offset });
                }
                let mut prefix = releases(state.stack[setup.level..].iter().rev().map(|(r, _)| *r), offset);
                let (tb, val, ty) = (self.fresh(), self.fresh(), self.fresh());
                prefix.push(plain(Op::Catch { tb, val, ty }, offset));
                let mut stack = state.stack[..setup.level].to_vec();
                stack.extend([(tb, Tag::ExcTraceback), (val, Tag::ExcValue), (ty, Tag::ExcType)]);
                let target = State {
                    stack,
                    setups: state.setups[..i].to_vec(),
                };
                self.edge(setup.handler, target, prefix, offset)?
            }
        };
        self.pads.insert(key, pad);
        Ok(pad)
    }

    fn emit(&mut self, instrs: &mut Vec<Instr>, op: Op, offset: usize, state: &State) -> LowerResult<()> {
        let unwind = if op.may_raise() {
            Some(self.landing_pad(state, offset)?)
        } else {
            None
        };
        instrs.push(Instr { op, offset, unwind });
        Ok(())
    }

    /// Emits `op` producing a fresh register and pushes it.
    fn emit_push(
        &mut self,
        instrs: &mut Vec<Instr>,
        state: &mut State,
        offset: usize,
        make: impl FnOnce(Reg) -> Op,
    ) -> LowerResult<()> {
        let dst = self.fresh();
        self.emit(instrs, make(dst), offset, state)?;
        state.stack.push((dst, Tag::Plain));
        Ok(())
    }

    fn release_above(&mut self, instrs: &mut Vec<Instr>, state: &mut State, level: usize, offset: usize) -> LowerResult<()> {
        if level > state.stack.len() {
            return Err(CompileError::InconsistentHandler { offset });
        }
        let dropped: Vec<Reg> = state.stack.drain(level..).rev().map(|(r, _)| r).collect();
        instrs.extend(releases(dropped, offset));
        Ok(())
    }

    fn lower_instr(&mut self, bc: &Bytecode, idx: usize, state: &mut State, instrs: &mut Vec<Instr>) -> LowerResult<Step> {
        let off = bc.offset;
        let arg = bc.arg;
        let op = bc.opcode;
        let unsupported = || CompileError::Unsupported { opcode: op, offset: off };

        if let Some(bin) = op.binary_op() {
            let rhs = pop(state, off)?;
            let lhs = pop(state, off)?;
            self.emit_push(instrs, state, off, |dst| Op::Binary { dst, op: bin, lhs, rhs })?;
            return Ok(Step::Next);
        }
        if let Some(bin) = op.inplace_op() {
            let rhs = pop(state, off)?;
            let lhs = pop(state, off)?;
            self.emit_push(instrs, state, off, |dst| Op::InPlace { dst, op: bin, lhs, rhs })?;
            return Ok(Step::Next);
        }
        if let Some(un) = op.unary_op() {
            let operand = pop(state, off)?;
            self.emit_push(instrs, state, off, |dst| Op::Unary { dst, op: un, operand })?;
            return Ok(Step::Next);
        }
        if let Some((has_start, has_stop)) = op.slice_bounds() {
            let stop = if has_stop { Some(pop(state, off)?) } else { None };
            let start = if has_start { Some(pop(state, off)?) } else { None };
            let obj = pop(state, off)?;
            match op {
                Opcode::Slice0 | Opcode::Slice1 | Opcode::Slice2 | Opcode::Slice3 => {
                    self.emit_push(instrs, state, off, |dst| Op::GetSlice { dst, obj, start, stop })?;
                }
                Opcode::StoreSlice0 | Opcode::StoreSlice1 | Opcode::StoreSlice2 | Opcode::StoreSlice3 => {
                    let value = pop(state, off)?;
                    self.emit(instrs, Op::SetSlice { obj, start, stop, value }, off, state)?;
                }
                _ => self.emit(instrs, Op::DelSlice { obj, start, stop }, off, state)?,
            }
            return Ok(Step::Next);
        }

        match op {
            Opcode::Nop => {}
            Opcode::PopTop => {
                let reg = pop(state, off)?;
                instrs.push(plain(Op::Release { reg }, off));
            }
            Opcode::RotTwo | Opcode::RotThree | Opcode::RotFour => {
                let depth = match op {
                    Opcode::RotTwo => 2,
                    Opcode::RotThree => 3,
                    _ => 4,
                };
                let n = state.stack.len();
                if n < depth {
                    return Err(CompileError::StackUnderflow { offset: off });
                }
                state.stack[n - depth..].rotate_right(1);
            }
            Opcode::DupTop | Opcode::DupTopx => {
                let count = if op == Opcode::DupTop { 1 } else { arg as usize };
                let n = state.stack.len();
                if n < count {
                    return Err(CompileError::StackUnderflow { offset: off });
                }
                let sources: Vec<Reg> = state.stack[n - count..].iter().map(|(r, _)| *r).collect();
                for src in sources {
                    let dst = self.fresh();
                    instrs.push(plain(Op::Copy { dst, src }, off));
                    state.stack.push((dst, Tag::Plain));
                }
            }
            Opcode::LoadConst => self.emit_push(instrs, state, off, |dst| Op::LoadConst { dst, idx: arg })?,
            Opcode::LoadFast => self.emit_push(instrs, state, off, |dst| Op::LoadLocal { dst, idx: arg })?,
            Opcode::StoreFast => {
                let src = pop(state, off)?;
                self.emit(instrs, Op::StoreLocal { idx: arg, src }, off, state)?;
            }
            Opcode::DeleteFast => self.emit(instrs, Op::DeleteLocal { idx: arg }, off, state)?,
            Opcode::LoadGlobal => self.emit_push(instrs, state, off, |dst| Op::LoadGlobal { dst, name: arg })?,
            Opcode::StoreGlobal => {
                let src = pop(state, off)?;
                self.emit(instrs, Op::StoreGlobal { name: arg, src }, off, state)?;
            }
            Opcode::DeleteGlobal => self.emit(instrs, Op::DeleteGlobal { name: arg }, off, state)?,
            Opcode::LoadClosure => self.emit_push(instrs, state, off, |dst| Op::LoadClosure { dst, idx: arg })?,
            Opcode::LoadDeref => self.emit_push(instrs, state, off, |dst| Op::LoadDeref { dst, idx: arg })?,
            Opcode::StoreDeref => {
                let src = pop(state, off)?;
                self.emit(instrs, Op::StoreDeref { idx: arg, src }, off, state)?;
            }
            Opcode::LoadAttr => {
                let obj = pop(state, off)?;
                self.emit_push(instrs, state, off, |dst| Op::LoadAttr { dst, obj, name: arg })?;
            }
            Opcode::StoreAttr => {
                let obj = pop(state, off)?;
                let value = pop(state, off)?;
                self.emit(instrs, Op::StoreAttr { obj, name: arg, value }, off, state)?;
            }
            Opcode::DeleteAttr => {
                let obj = pop(state, off)?;
                self.emit(instrs, Op::DeleteAttr { obj, name: arg }, off, state)?;
            }
            Opcode::BinarySubscr => {
                let key = pop(state, off)?;
                let container = pop(state, off)?;
                self.emit_push(instrs, state, off, |dst| Op::GetItem { dst, container, key })?;
            }
            Opcode::StoreSubscr => {
                let key = pop(state, off)?;
                let container = pop(state, off)?;
                let value = pop(state, off)?;
                self.emit(instrs, Op::SetItem { container, key, value }, off, state)?;
            }
            Opcode::DeleteSubscr => {
                let key = pop(state, off)?;
                let container = pop(state, off)?;
                self.emit(instrs, Op::DelItem { container, key }, off, state)?;
            }
            Opcode::CompareOp => {
                let cmp = CompareOp::from_arg(arg).ok_or_else(unsupported)?;
                let rhs = pop(state, off)?;
                let lhs = pop(state, off)?;
                self.emit_push(instrs, state, off, |dst| Op::Compare { dst, op: cmp, lhs, rhs })?;
            }
            Opcode::BuildTuple | Opcode::BuildList => {
                let items = popn(state, arg as usize, off)?;
                if op == Opcode::BuildTuple {
                    self.emit_push(instrs, state, off, |dst| Op::BuildTuple { dst, items })?;
                } else {
                    self.emit_push(instrs, state, off, |dst| Op::BuildList { dst, items })?;
                }
            }
            Opcode::BuildMap => self.emit_push(instrs, state, off, |dst| Op::BuildMap { dst })?,
            Opcode::StoreMap | Opcode::MapAdd => {
                let key = pop(state, off)?;
                let value = pop(state, off)?;
                let depth = if op == Opcode::StoreMap { 1 } else { arg as usize };
                let map = peek(state, depth, off)?;
                self.emit(instrs, Op::StoreMap { map, key, value }, off, state)?;
            }
            Opcode::ListAppend => {
                let item = pop(state, off)?;
                let list = peek(state, arg as usize, off)?;
                self.emit(instrs, Op::ListAppend { list, item }, off, state)?;
            }
            Opcode::BuildSlice => {
                let step = if arg == 3 { Some(pop(state, off)?) } else { None };
                let stop = pop(state, off)?;
                let start = pop(state, off)?;
                self.emit_push(instrs, state, off, |dst| Op::BuildSlice { dst, start, stop, step })?;
            }
            Opcode::UnpackSequence => {
                let src = pop(state, off)?;
                let dsts: Vec<Reg> = (0..arg).map(|_| self.fresh()).collect();
                self.emit(instrs, Op::Unpack { dsts: dsts.clone(), src }, off, state)?;
                state.stack.extend(dsts.into_iter().rev().map(|r| (r, Tag::Plain)));
            }
            Opcode::GetIter => {
                let src = pop(state, off)?;
                self.emit_push(instrs, state, off, |dst| Op::GetIter { dst, src })?;
            }
            Opcode::ForIter => {
                let target = bc.target.ok_or_else(unsupported)?;
                let iter = peek(state, 1, off)?;
                let dst = self.fresh();
                let unwind = self.landing_pad(state, off)?;
                let mut body_state = state.clone();
                body_state.stack.push((dst, Tag::Plain));
                let body = self.edge(idx + 1, body_state, Vec::new(), off)?;
                let mut exit_state = state.clone();
                exit_state.stack.pop();
                let exit = self.edge(target, exit_state, Vec::new(), off)?;
                return Ok(Step::End(Term::ForIter { iter, dst, body, exit }, Some(unwind)));
            }
            Opcode::JumpForward | Opcode::JumpAbsolute => {
                let target = bc.target.ok_or_else(unsupported)?;
                let block = self.edge(target, state.clone(), Vec::new(), off)?;
                return Ok(Step::End(Term::Jump(block), None));
            }
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let target = bc.target.ok_or_else(unsupported)?;
                let cond = pop(state, off)?;
                let unwind = self.landing_pad(state, off)?;
                let jump = self.edge(target, state.clone(), Vec::new(), off)?;
                let fall = self.edge(idx + 1, state.clone(), Vec::new(), off)?;
                let (if_true, if_false) = if op == Opcode::PopJumpIfTrue { (jump, fall) } else { (fall, jump) };
                let term = Term::Branch {
                    cond,
                    keep: false,
                    if_true,
                    if_false,
                };
                return Ok(Step::End(term, Some(unwind)));
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                let target = bc.target.ok_or_else(unsupported)?;
                let cond = peek(state, 1, off)?;
                let unwind = self.landing_pad(state, off)?;
                let jump = self.edge(target, state.clone(), Vec::new(), off)?;
                let mut popped = state.clone();
                popped.stack.pop();
                let fall = self.edge(idx + 1, popped, releases([cond], off), off)?;
                let (if_true, if_false) = if op == Opcode::JumpIfTrueOrPop { (jump, fall) } else { (fall, jump) };
                let term = Term::Branch {
                    cond,
                    keep: true,
                    if_true,
                    if_false,
                };
                return Ok(Step::End(term, Some(unwind)));
            }
            Opcode::SetupLoop | Opcode::SetupExcept => {
                let handler = bc.target.ok_or_else(unsupported)?;
                let kind = if op == Opcode::SetupLoop { SetupKind::Loop } else { SetupKind::Except };
                state.setups.push(Setup {
                    kind,
                    handler,
                    level: state.stack.len(),
                });
            }
            Opcode::PopBlock => {
                let setup = state
                    .setups
                    .pop()
                    .ok_or(CompileError::InconsistentHandler { offset: off })?;
                self.release_above(instrs, state, setup.level, off)?;
            }
            Opcode::BreakLoop => loop {
                let setup = state
                    .setups
                    .pop()
                    .ok_or(CompileError::InconsistentHandler { offset: off })?;
                self.release_above(instrs, state, setup.level, off)?;
                if setup.kind == SetupKind::Loop {
                    let block = self.edge(setup.handler, state.clone(), Vec::new(), off)?;
                    return Ok(Step::End(Term::Jump(block), None));
                }
            },
            Opcode::ContinueLoop => {
                let target = bc.target.ok_or_else(unsupported)?;
                while let Some(setup) = state.setups.last().copied() {
                    if setup.kind == SetupKind::Loop {
                        break;
                    }
                    state.setups.pop();
                    self.release_above(instrs, state, setup.level, off)?;
                }
                if state.setups.is_empty() {
                    return Err(CompileError::InconsistentHandler { offset: off });
                }
                let block = self.edge(target, state.clone(), Vec::new(), off)?;
                return Ok(Step::End(Term::Jump(block), None));
            }
            Opcode::ReturnValue => {
                let value = pop(state, off)?;
                self.release_above(instrs, state, 0, off)?;
                return Ok(Step::End(Term::Return(value), None));
            }
            Opcode::RaiseVarargs => {
                let args = popn(state, arg as usize, off)?;
                let unwind = self.landing_pad(state, off)?;
                return Ok(Step::End(Term::Raise { args }, Some(unwind)));
            }
            Opcode::EndFinally => {
                let n = state.stack.len();
                let is_triple = n >= 3
                    && state.stack[n - 3..].iter().map(|(_, t)| *t).eq([Tag::ExcTraceback, Tag::ExcValue, Tag::ExcType]);
                if !is_triple {
                    return Err(unsupported());
                }
                let ty = pop(state, off)?;
                let val = pop(state, off)?;
                let tb = pop(state, off)?;
                let unwind = self.landing_pad(state, off)?;
                return Ok(Step::End(Term::Reraise { ty, val, tb }, Some(unwind)));
            }
            Opcode::CallFunction | Opcode::CallFunctionVar | Opcode::CallFunctionKw | Opcode::CallFunctionVarKw => {
                let npos = (arg & 0xff) as usize;
                let nkw = ((arg >> 8) & 0xff) as usize;
                let starstar = if matches!(op, Opcode::CallFunctionKw | Opcode::CallFunctionVarKw) {
                    Some(pop(state, off)?)
                } else {
                    None
                };
                let star = if matches!(op, Opcode::CallFunctionVar | Opcode::CallFunctionVarKw) {
                    Some(pop(state, off)?)
                } else {
                    None
                };
                let flat = popn(state, nkw * 2, off)?;
                let kwargs: Vec<(Reg, Reg)> = flat.chunks(2).map(|pair| (pair[0], pair[1])).collect();
                let args = popn(state, npos, off)?;
                let func = pop(state, off)?;
                self.emit_push(instrs, state, off, |dst| Op::Call {
                    dst,
                    func,
                    args,
                    kwargs,
                    star,
                    starstar,
                })?;
            }
            Opcode::MakeFunction | Opcode::MakeClosure => {
                let code = pop(state, off)?;
                let closure = if op == Opcode::MakeClosure { Some(pop(state, off)?) } else { None };
                let defaults = popn(state, arg as usize, off)?;
                self.emit_push(instrs, state, off, |dst| Op::MakeFunction {
                    dst,
                    code,
                    defaults,
                    closure,
                })?;
            }
            _ => return Err(unsupported()),
        }
        Ok(Step::Next)
    }
}

fn plain(op: Op, offset: usize) -> Instr {
    Instr { op, offset, unwind: None }
}

fn releases(regs: impl IntoIterator<Item = Reg>, offset: usize) -> Vec<Instr> {
    regs.into_iter().map(|reg| plain(Op::Release { reg }, offset)).collect()
}

fn pop(state: &mut State, offset: usize) -> LowerResult<Reg> {
    state
        .stack
        .pop()
        .map(|(reg, _)| reg)
        .ok_or(CompileError::StackUnderflow { offset })
}

/// Pops `n` registers, returned in stack order (deepest first).
fn popn(state: &mut State, n: usize, offset: usize) -> LowerResult<Vec<Reg>> {
    if state.stack.len() < n {
        return Err(CompileError::StackUnderflow { offset });
    }
    let split = state.stack.len() - n;
    Ok(state.stack.split_off(split).into_iter().map(|(reg, _)| reg).collect())
}

/// Register `depth` slots below the top, counting the top as 1.
fn peek(state: &State, depth: usize, offset: usize) -> LowerResult<Reg> {
    state
        .stack
        .len()
        .checked_sub(depth)
        .and_then(|idx| state.stack.get(idx))
        .map(|(reg, _)| *reg)
        .ok_or(CompileError::StackUnderflow { offset })
}
