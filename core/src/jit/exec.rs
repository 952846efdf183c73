//! Runs a compiled artifact against a frame.

use crate::code::CodeUnit;
use crate::exc::{ExceptionState, RtResult, system_error};
use crate::jit::bridge::{self, Raised};
use crate::jit::ir::{BlockId, Function, Op, Reg, Term};
use crate::op::{self, IterStep};
use crate::val::{Dict, Object, Value};
use crate::vm::{Frame, Vm};

/// Failure inside a compiled frame.
enum Fault {
    /// A language-level exception, routed to the operation's landing pad.
    Raise(ExceptionState),
    /// Compiled code broke its own register discipline. Never reaches a handler.
    Invariant(ExceptionState),
}

impl From<ExceptionState> for Fault {
    fn from(state: ExceptionState) -> Self {
        Fault::Raise(state)
    }
}

impl From<Fault> for ExceptionState {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Raise(state) | Fault::Invariant(state) => state,
        }
    }
}

fn invariant(message: impl Into<String>) -> Fault {
    let message = message.into();
    tracing::error!("compiled code invariant violated: {message}");
    if cfg!(debug_assertions) {
        panic!("compiled code invariant violated: {message}");
    }
    Fault::Invariant(system_error(message))
}

struct Registers {
    slots: Vec<Option<Value>>,
}

impl Registers {
    fn new(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    fn take(&mut self, reg: Reg) -> Result<Value, Fault> {
        self.slots
            .get_mut(reg.index())
            .and_then(Option::take)
            .ok_or_else(|| invariant(format!("register {reg} read while empty")))
    }

    fn take_opt(&mut self, reg: Option<Reg>) -> Result<Option<Value>, Fault> {
        reg.map(|r| self.take(r)).transpose()
    }

    fn take_all(&mut self, regs: &[Reg]) -> Result<Vec<Value>, Fault> {
        regs.iter().map(|r| self.take(*r)).collect()
    }

    fn get(&self, reg: Reg) -> Result<&Value, Fault> {
        self.slots
            .get(reg.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| invariant(format!("register {reg} read while empty")))
    }

    fn set(&mut self, reg: Reg, value: Value) -> Result<(), Fault> {
        match self.slots.get_mut(reg.index()) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(invariant(format!("register {reg} out of range"))),
        }
    }

    fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// Every register must be empty when a compiled frame exits.
fn check_released(regs: &mut Registers, code: &CodeUnit) {
    let live = regs.live();
    if live > 0 {
        tracing::error!(code = %code.name, live, "compiled frame exited with live registers");
        debug_assert!(live == 0, "{} exited with {live} live registers", code.name);
        regs.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

fn const_at(code: &CodeUnit, idx: u32) -> Result<Value, Fault> {
    code.consts
        .get(idx as usize)
        .cloned()
        .ok_or_else(|| invariant(format!("constant {idx} out of range")))
}

fn name_at(code: &CodeUnit, idx: u32) -> Result<&str, Fault> {
    code.names
        .get(idx as usize)
        .map(String::as_str)
        .ok_or_else(|| invariant(format!("name {idx} out of range")))
}

/// Runs `func` (lowered from `frame.code`) to completion.
pub(crate) fn execute(vm: &mut Vm, frame: &mut Frame, func: &Function) -> RtResult<Value> {
    let code = frame.code.clone();
    let mut regs = Registers::new(func.nregs as usize);
    let mut pending: Option<Raised> = None;
    let mut current = func.entry;

    // Records the traceback entry and picks the landing pad. A raising
    // operation without a pad leaves the frame directly.
    let divert = |pending: &mut Option<Raised>,
                  regs: &mut Registers,
                  mut raised: Raised,
                  offset: usize,
                  unwind: Option<BlockId>|
     -> Result<BlockId, ExceptionState> {
        bridge::record_frame(&mut raised, &code, offset);
        match unwind {
            Some(pad) => {
                *pending = Some(raised);
                Ok(pad)
            }
            None => {
                check_released(regs, &code);
                Err(raised.state)
            }
        }
    };

    loop {
        let block = func.block(current);
        let mut diverted = None;
        for instr in &block.instrs {
            if let Err(fault) = exec_op(vm, frame, &code, &mut regs, &mut pending, &instr.op) {
                let state = match fault {
                    Fault::Raise(state) => state,
                    Fault::Invariant(state) => {
                        check_released(&mut regs, &code);
                        return Err(state);
                    }
                };
                diverted = Some(divert(
                    &mut pending,
                    &mut regs,
                    Raised::fresh(state),
                    instr.offset,
                    instr.unwind,
                )?);
                break;
            }
        }
        if let Some(pad) = diverted {
            current = pad;
            continue;
        }

        let offset = block.term_offset;
        let unwind = block.term_unwind;
        current = match &block.term {
            Term::Jump(target) => *target,
            Term::Branch {
                cond,
                keep,
                if_true,
                if_false,
            } => {
                let value = if *keep { regs.get(*cond)?.clone() } else { regs.take(*cond)? };
                match op::is_true(vm, &value) {
                    Ok(true) => *if_true,
                    Ok(false) => *if_false,
                    Err(state) => divert(&mut pending, &mut regs, Raised::fresh(state), offset, unwind)?,
                }
            }
            Term::ForIter { iter, dst, body, exit } => {
                let it = regs.get(*iter)?.clone();
                match op::iter_next(vm, &it) {
                    Ok(IterStep::Yielded(value)) => {
                        regs.set(*dst, value)?;
                        *body
                    }
                    Ok(IterStep::Exhausted) => {
                        regs.take(*iter)?;
                        *exit
                    }
                    Err(state) => divert(&mut pending, &mut regs, Raised::fresh(state), offset, unwind)?,
                }
            }
            Term::Return(reg) => {
                let value = regs.take(*reg)?;
                check_released(&mut regs, &code);
                return Ok(value);
            }
            Term::Raise { args } => {
                let args = regs.take_all(args)?;
                let raised = bridge::do_raise(vm, args);
                divert(&mut pending, &mut regs, raised, offset, unwind)?
            }
            Term::Reraise { ty, val, tb } => {
                regs.take(*ty)?;
                let value = regs.take(*val)?;
                let traceback = regs.take(*tb)?;
                let raised = bridge::reraise_triple(value, traceback);
                divert(&mut pending, &mut regs, raised, offset, unwind)?
            }
            Term::Unwind => {
                let raised = pending
                    .take()
                    .ok_or_else(|| invariant("unwinding without a pending exception"))?;
                check_released(&mut regs, &code);
                return Err(raised.state);
            }
        };
    }
}

fn exec_op(
    vm: &mut Vm,
    frame: &mut Frame,
    code: &CodeUnit,
    regs: &mut Registers,
    pending: &mut Option<Raised>,
    op: &Op,
) -> Result<(), Fault> {
    match op {
        Op::LoadConst { dst, idx } => regs.set(*dst, const_at(code, *idx)?)?,
        Op::LoadLocal { dst, idx } => regs.set(*dst, frame.local(*idx as usize)?)?,
        Op::CheckLocal { idx } => {
            frame.local(*idx as usize)?;
        }
        Op::StoreLocal { idx, src } => {
            let value = regs.take(*src)?;
            match frame.locals.get_mut(*idx as usize) {
                Some(slot) => *slot = Some(value),
                None => return Err(invariant(format!("local index {idx} out of range"))),
            }
        }
        Op::DeleteLocal { idx } => frame.delete_local(*idx as usize)?,
        Op::LoadGlobal { dst, name } => {
            let value = op::load_global(&frame.globals, vm.builtins(), name_at(code, *name)?)?;
            regs.set(*dst, value)?;
        }
        Op::StoreGlobal { name, src } => {
            let value = regs.take(*src)?;
            frame.globals.set(name_at(code, *name)?, value);
        }
        Op::DeleteGlobal { name } => {
            let name = name_at(code, *name)?;
            if frame.globals.remove(name).is_none() {
                return Err(op::global_not_defined(name).into());
            }
        }
        Op::LoadDeref { dst, idx } => regs.set(*dst, frame.load_deref(*idx as usize)?)?,
        Op::StoreDeref { idx, src } => {
            let value = regs.take(*src)?;
            frame.store_deref(*idx as usize, value)?;
        }
        Op::LoadClosure { dst, idx } => {
            let cell = frame.cell(*idx as usize)?.clone();
            regs.set(*dst, cell)?;
        }
        Op::LoadAttr { dst, obj, name } => {
            let obj = regs.take(*obj)?;
            let value = op::get_attr(vm, &obj, name_at(code, *name)?)?;
            regs.set(*dst, value)?;
        }
        Op::StoreAttr { obj, name, value } => {
            let obj = regs.take(*obj)?;
            let value = regs.take(*value)?;
            op::set_attr(vm, &obj, name_at(code, *name)?, &value)?;
        }
        Op::DeleteAttr { obj, name } => {
            let obj = regs.take(*obj)?;
            op::del_attr(vm, &obj, name_at(code, *name)?)?;
        }
        Op::Copy { dst, src } => {
            let value = regs.get(*src)?.clone();
            regs.set(*dst, value)?;
        }
        Op::Move { dst, src } => {
            let value = regs.take(*src)?;
            regs.set(*dst, value)?;
        }
        Op::Release { reg } => {
            regs.take(*reg)?;
        }
        Op::Binary { dst, op: bin, lhs, rhs } => {
            let rhs = regs.take(*rhs)?;
            let lhs = regs.take(*lhs)?;
            regs.set(*dst, op::binary_op(vm, *bin, &lhs, &rhs)?)?;
        }
        Op::InPlace { dst, op: bin, lhs, rhs } => {
            let rhs = regs.take(*rhs)?;
            let lhs = regs.take(*lhs)?;
            regs.set(*dst, op::inplace_op(vm, *bin, &lhs, &rhs)?)?;
        }
        Op::Unary { dst, op: un, operand } => {
            let operand = regs.take(*operand)?;
            regs.set(*dst, op::unary_op(vm, *un, &operand)?)?;
        }
        Op::Compare { dst, op: cmp, lhs, rhs } => {
            let rhs = regs.take(*rhs)?;
            let lhs = regs.take(*lhs)?;
            regs.set(*dst, op::compare_op(vm, *cmp, &lhs, &rhs)?)?;
        }
        Op::GetItem { dst, container, key } => {
            let key = regs.take(*key)?;
            let container = regs.take(*container)?;
            regs.set(*dst, op::get_item(vm, &container, &key)?)?;
        }
        Op::SetItem { container, key, value } => {
            let key = regs.take(*key)?;
            let container = regs.take(*container)?;
            let value = regs.take(*value)?;
            op::set_item(vm, &container, &key, &value)?;
        }
        Op::DelItem { container, key } => {
            let key = regs.take(*key)?;
            let container = regs.take(*container)?;
            op::del_item(vm, &container, &key)?;
        }
        Op::GetSlice { dst, obj, start, stop } => {
            let stop = regs.take_opt(*stop)?;
            let start = regs.take_opt(*start)?;
            let obj = regs.take(*obj)?;
            regs.set(*dst, op::get_slice(vm, &obj, start.as_ref(), stop.as_ref())?)?;
        }
        Op::SetSlice { obj, start, stop, value } => {
            let stop = regs.take_opt(*stop)?;
            let start = regs.take_opt(*start)?;
            let obj = regs.take(*obj)?;
            let value = regs.take(*value)?;
            op::set_slice(vm, &obj, start.as_ref(), stop.as_ref(), &value)?;
        }
        Op::DelSlice { obj, start, stop } => {
            let stop = regs.take_opt(*stop)?;
            let start = regs.take_opt(*start)?;
            let obj = regs.take(*obj)?;
            op::del_slice(vm, &obj, start.as_ref(), stop.as_ref())?;
        }
        Op::GetIter { dst, src } => {
            let src = regs.take(*src)?;
            regs.set(*dst, op::get_iter(vm, &src)?)?;
        }
        Op::BuildTuple { dst, items } => {
            let items = regs.take_all(items)?;
            regs.set(*dst, Value::tuple(items))?;
        }
        Op::BuildList { dst, items } => {
            let items = regs.take_all(items)?;
            regs.set(*dst, Value::list(items))?;
        }
        Op::BuildMap { dst } => regs.set(*dst, Value::dict(Dict::new()))?,
        Op::BuildSlice { dst, start, stop, step } => {
            let step = regs.take_opt(*step)?.unwrap_or_else(Value::none);
            let stop = regs.take(*stop)?;
            let start = regs.take(*start)?;
            regs.set(*dst, Value::slice(start, stop, step))?;
        }
        Op::StoreMap { map, key, value } => {
            let key = regs.take(*key)?;
            let value = regs.take(*value)?;
            match regs.get(*map)?.obj() {
                Object::Dict(dict) => dict.borrow_mut().insert(key, value)?,
                _ => return Err(system_error("STORE_MAP target is not a dict").into()),
            }
        }
        Op::ListAppend { list, item } => {
            let item = regs.take(*item)?;
            match regs.get(*list)?.obj() {
                Object::List(items) => items.borrow_mut().push(item),
                _ => return Err(system_error("LIST_APPEND target is not a list").into()),
            }
        }
        Op::Unpack { dsts, src } => {
            let seq = regs.take(*src)?;
            let items = op::unpack_iterable(vm, &seq, dsts.len())?;
            for (dst, item) in dsts.iter().zip(items) {
                regs.set(*dst, item)?;
            }
        }
        Op::Call {
            dst,
            func,
            args,
            kwargs,
            star,
            starstar,
        } => {
            let starstar = regs.take_opt(*starstar)?;
            let star = regs.take_opt(*star)?;
            let mut pairs = Vec::with_capacity(kwargs.len());
            for (key, value) in kwargs {
                pairs.push((regs.take(*key)?, regs.take(*value)?));
            }
            let args = regs.take_all(args)?;
            let callable = regs.take(*func)?;
            let result = if star.is_none() && starstar.is_none() {
                op::call_value(vm, &callable, args, pairs)?
            } else {
                op::call_with_star(vm, &callable, args, pairs, star.as_ref(), starstar.as_ref())?
            };
            regs.set(*dst, result)?;
        }
        Op::MakeFunction {
            dst,
            code: code_reg,
            defaults,
            closure,
        } => {
            let code_value = regs.take(*code_reg)?;
            let closure = match regs.take_opt(*closure)? {
                Some(cells) => match cells.obj() {
                    Object::Tuple(cells) => cells.clone(),
                    _ => return Err(system_error("MAKE_CLOSURE expects a tuple of cells").into()),
                },
                None => Vec::new(),
            };
            let defaults = regs.take_all(defaults)?;
            let Object::Code(nested) = code_value.obj() else {
                return Err(system_error("MAKE_FUNCTION expects a code object").into());
            };
            let func = Vm::make_function(nested.clone(), frame.globals.clone(), defaults, closure);
            regs.set(*dst, func)?;
        }
        Op::Catch { tb, val, ty } => {
            let raised = pending
                .take()
                .ok_or_else(|| invariant("landing pad reached without a pending exception"))?;
            let [traceback, value, kind] = bridge::enter_handler(vm, &raised.state, true);
            regs.set(*tb, traceback)?;
            regs.set(*val, value)?;
            regs.set(*ty, kind)?;
        }
    }
    Ok(())
}
