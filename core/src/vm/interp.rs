use std::rc::Rc;

use super::{Frame, Vm};
use crate::code::{CodeUnit, Decoded, Instr, Opcode};
use crate::exc::{ExcKind, ExceptionState, RtResult, system_error};
use crate::jit::bridge::{self, Raised};
use crate::op::{self, CompareOp, IterStep};
use crate::val::{Dict, Object, TypeObject, Value};

pub(crate) const WHY_RETURN: i64 = 0x08;
pub(crate) const WHY_BREAK: i64 = 0x10;
pub(crate) const WHY_CONTINUE: i64 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Loop,
    Except,
    Finally,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    kind: BlockKind,
    /// Instruction index of the handler or loop exit.
    handler: usize,
    level: usize,
}

/// Why the normal instruction flow was interrupted.
enum Why {
    Exception(Raised),
    Return(Value),
    Break,
    /// Byte offset of the loop head to continue at.
    Continue(usize),
}

enum Flow {
    Next,
    Jump(usize),
    Why(Why),
}

enum Exit {
    Resume(usize),
    Return(Value),
}

fn pop(stack: &mut Vec<Value>) -> RtResult<Value> {
    stack.pop().ok_or_else(|| system_error("operand stack underflow"))
}

fn popn(stack: &mut Vec<Value>, n: usize) -> RtResult<Vec<Value>> {
    if stack.len() < n {
        return Err(system_error("operand stack underflow"));
    }
    Ok(stack.split_off(stack.len() - n))
}

fn top(stack: &[Value]) -> RtResult<&Value> {
    stack.last().ok_or_else(|| system_error("operand stack underflow"))
}

/// Runs `frame` to completion.
pub(crate) fn run(vm: &mut Vm, frame: &mut Frame) -> RtResult<Value> {
    let code = frame.code.clone();
    let decoded = code
        .decoded()
        .map_err(|err| system_error(format!("cannot execute {}: {err}", code.name)))?;
    let mut blocks: Vec<Block> = Vec::new();
    let mut pc = 0usize;
    loop {
        let Some(&instr) = decoded.instrs.get(pc) else {
            return Err(system_error(format!("{} ran past the end of its code", code.name)));
        };
        let why = match step(vm, frame, &code, &instr, &mut blocks) {
            Ok(Flow::Next) => {
                pc += 1;
                continue;
            }
            Ok(Flow::Jump(target)) => {
                pc = target;
                continue;
            }
            Ok(Flow::Why(why)) => why,
            Err(state) => Why::Exception(Raised::fresh(state)),
        };
        let why = match why {
            Why::Exception(mut raised) => {
                bridge::record_frame(&mut raised, &code, instr.offset);
                Why::Exception(raised)
            }
            other => other,
        };
        match unwind(vm, frame, decoded, &mut blocks, why)? {
            Exit::Resume(target) => pc = target,
            Exit::Return(value) => return Ok(value),
        }
    }
}

fn unwind(vm: &mut Vm, frame: &mut Frame, decoded: &Decoded, blocks: &mut Vec<Block>, mut why: Why) -> RtResult<Exit> {
    loop {
        let Some(block) = blocks.pop() else {
            return match why {
                Why::Return(value) => Ok(Exit::Return(value)),
                Why::Exception(raised) => Err(raised.state),
                Why::Break | Why::Continue(_) => Err(system_error("'break' or 'continue' outside loop")),
            };
        };
        if block.kind == BlockKind::Loop
            && let Why::Continue(offset) = why
        {
            blocks.push(block);
            let target = decoded
                .index_of(offset)
                .ok_or_else(|| system_error(format!("continue to bad offset {offset}")))?;
            return Ok(Exit::Resume(target));
        }
        frame.stack.truncate(block.level);
        why = match (block.kind, why) {
            (BlockKind::Loop, Why::Break) => return Ok(Exit::Resume(block.handler)),
            (BlockKind::Except | BlockKind::Finally, Why::Exception(raised)) => {
                let triple = bridge::enter_handler(vm, &raised.state, block.kind == BlockKind::Except);
                frame.stack.extend(triple);
                return Ok(Exit::Resume(block.handler));
            }
            (BlockKind::Finally, Why::Return(value)) => {
                frame.stack.push(value);
                frame.stack.push(Value::int(WHY_RETURN));
                return Ok(Exit::Resume(block.handler));
            }
            (BlockKind::Finally, Why::Continue(offset)) => {
                frame.stack.push(Value::int(offset as i64));
                frame.stack.push(Value::int(WHY_CONTINUE));
                return Ok(Exit::Resume(block.handler));
            }
            (BlockKind::Finally, Why::Break) => {
                frame.stack.push(Value::int(WHY_BREAK));
                return Ok(Exit::Resume(block.handler));
            }
            (_, other) => other,
        };
    }
}

fn target_of(instr: &Instr) -> RtResult<usize> {
    instr
        .target
        .ok_or_else(|| system_error(format!("{} without a target", instr.opcode)))
}

fn step(vm: &mut Vm, frame: &mut Frame, code: &Rc<CodeUnit>, instr: &Instr, blocks: &mut Vec<Block>) -> RtResult<Flow> {
    let arg = instr.arg as usize;
    let op = instr.opcode;

    if let Some(bin) = op.binary_op() {
        let rhs = pop(&mut frame.stack)?;
        let lhs = pop(&mut frame.stack)?;
        frame.stack.push(op::binary_op(vm, bin, &lhs, &rhs)?);
        return Ok(Flow::Next);
    }
    if let Some(bin) = op.inplace_op() {
        let rhs = pop(&mut frame.stack)?;
        let lhs = pop(&mut frame.stack)?;
        frame.stack.push(op::inplace_op(vm, bin, &lhs, &rhs)?);
        return Ok(Flow::Next);
    }
    if let Some(un) = op.unary_op() {
        let operand = pop(&mut frame.stack)?;
        frame.stack.push(op::unary_op(vm, un, &operand)?);
        return Ok(Flow::Next);
    }
    if let Some((has_start, has_stop)) = op.slice_bounds() {
        let stop = if has_stop { Some(pop(&mut frame.stack)?) } else { None };
        let start = if has_start { Some(pop(&mut frame.stack)?) } else { None };
        let obj = pop(&mut frame.stack)?;
        match op {
            Opcode::Slice0 | Opcode::Slice1 | Opcode::Slice2 | Opcode::Slice3 => {
                frame
                    .stack
                    .push(op::get_slice(vm, &obj, start.as_ref(), stop.as_ref())?);
            }
            Opcode::StoreSlice0 | Opcode::StoreSlice1 | Opcode::StoreSlice2 | Opcode::StoreSlice3 => {
                let value = pop(&mut frame.stack)?;
                op::set_slice(vm, &obj, start.as_ref(), stop.as_ref(), &value)?;
            }
            _ => op::del_slice(vm, &obj, start.as_ref(), stop.as_ref())?,
        }
        return Ok(Flow::Next);
    }

    let stack = &mut frame.stack;
    match op {
        Opcode::Nop => {}
        Opcode::PopTop => {
            pop(stack)?;
        }
        Opcode::RotTwo => {
            let n = stack.len();
            if n < 2 {
                return Err(system_error("operand stack underflow"));
            }
            stack.swap(n - 1, n - 2);
        }
        Opcode::RotThree | Opcode::RotFour => {
            let depth = if op == Opcode::RotThree { 3 } else { 4 };
            let n = stack.len();
            if n < depth {
                return Err(system_error("operand stack underflow"));
            }
            stack[n - depth..].rotate_right(1);
        }
        Opcode::DupTop => {
            let v = top(stack)?.clone();
            stack.push(v);
        }
        Opcode::DupTopx => {
            if stack.len() < arg {
                return Err(system_error("operand stack underflow"));
            }
            let copies: Vec<Value> = stack[stack.len() - arg..].to_vec();
            stack.extend(copies);
        }
        Opcode::LoadConst => stack.push(code.consts[arg].clone()),
        Opcode::LoadFast => {
            let v = frame.local(arg)?;
            frame.stack.push(v);
        }
        Opcode::StoreFast => {
            let v = pop(stack)?;
            frame.locals[arg] = Some(v);
        }
        Opcode::DeleteFast => frame.delete_local(arg)?,
        Opcode::LoadGlobal => {
            let v = op::load_global(&frame.globals, vm.builtins(), &code.names[arg])?;
            frame.stack.push(v);
        }
        Opcode::StoreGlobal => {
            let v = pop(stack)?;
            frame.globals.set(&code.names[arg], v);
        }
        Opcode::DeleteGlobal => {
            let name = &code.names[arg];
            if frame.globals.remove(name).is_none() {
                return Err(op::global_not_defined(name));
            }
        }
        Opcode::LoadName => {
            let v = frame.load_name(vm.builtins(), &code.names[arg])?;
            frame.stack.push(v);
        }
        Opcode::StoreName => {
            let v = pop(stack)?;
            frame.names()?.set(&code.names[arg], v);
        }
        Opcode::DeleteName => {
            let name = &code.names[arg];
            if frame.names()?.remove(name).is_none() {
                return Err(op::name_not_defined(name));
            }
        }
        Opcode::LoadClosure => {
            let cell = frame.cell(arg)?.clone();
            frame.stack.push(cell);
        }
        Opcode::LoadDeref => {
            let v = frame.load_deref(arg)?;
            frame.stack.push(v);
        }
        Opcode::StoreDeref => {
            let v = pop(stack)?;
            frame.store_deref(arg, v)?;
        }
        Opcode::LoadLocals => {
            let dict = frame.names()?.to_dict()?;
            frame.stack.push(Value::dict(dict));
        }
        Opcode::LoadAttr => {
            let obj = pop(stack)?;
            let v = op::get_attr(vm, &obj, &code.names[arg])?;
            frame.stack.push(v);
        }
        Opcode::StoreAttr => {
            let obj = pop(stack)?;
            let value = pop(stack)?;
            op::set_attr(vm, &obj, &code.names[arg], &value)?;
        }
        Opcode::DeleteAttr => {
            let obj = pop(stack)?;
            op::del_attr(vm, &obj, &code.names[arg])?;
        }
        Opcode::BinarySubscr => {
            let key = pop(stack)?;
            let container = pop(stack)?;
            let v = op::get_item(vm, &container, &key)?;
            frame.stack.push(v);
        }
        Opcode::StoreSubscr => {
            let key = pop(stack)?;
            let container = pop(stack)?;
            let value = pop(stack)?;
            op::set_item(vm, &container, &key, &value)?;
        }
        Opcode::DeleteSubscr => {
            let key = pop(stack)?;
            let container = pop(stack)?;
            op::del_item(vm, &container, &key)?;
        }
        Opcode::CompareOp => {
            let rhs = pop(stack)?;
            let lhs = pop(stack)?;
            let cmp = CompareOp::from_arg(instr.arg).ok_or_else(|| system_error("bad comparison operator"))?;
            let v = op::compare_op(vm, cmp, &lhs, &rhs)?;
            frame.stack.push(v);
        }
        Opcode::BuildTuple => {
            let items = popn(stack, arg)?;
            stack.push(Value::tuple(items));
        }
        Opcode::BuildList => {
            let items = popn(stack, arg)?;
            stack.push(Value::list(items));
        }
        Opcode::BuildMap => stack.push(Value::dict(Dict::new())),
        Opcode::StoreMap => {
            let key = pop(stack)?;
            let value = pop(stack)?;
            let map = top(stack)?;
            store_map(map, key, value)?;
        }
        Opcode::MapAdd => {
            let key = pop(stack)?;
            let value = pop(stack)?;
            let map = peek(stack, arg)?;
            store_map(map, key, value)?;
        }
        Opcode::ListAppend => {
            let item = pop(stack)?;
            match peek(stack, arg)?.obj() {
                Object::List(items) => items.borrow_mut().push(item),
                _ => return Err(system_error("LIST_APPEND target is not a list")),
            }
        }
        Opcode::BuildSlice => {
            let step = if arg == 3 { pop(stack)? } else { Value::none() };
            let stop = pop(stack)?;
            let start = pop(stack)?;
            stack.push(Value::slice(start, stop, step));
        }
        Opcode::UnpackSequence => {
            let seq = pop(stack)?;
            let items = op::unpack_iterable(vm, &seq, arg)?;
            frame.stack.extend(items.into_iter().rev());
        }
        Opcode::GetIter => {
            let v = pop(stack)?;
            let it = op::get_iter(vm, &v)?;
            frame.stack.push(it);
        }
        Opcode::ForIter => {
            let it = top(stack)?.clone();
            match op::iter_next(vm, &it)? {
                IterStep::Yielded(v) => frame.stack.push(v),
                IterStep::Exhausted => {
                    pop(&mut frame.stack)?;
                    return Ok(Flow::Jump(target_of(instr)?));
                }
            }
        }
        Opcode::JumpForward | Opcode::JumpAbsolute => return Ok(Flow::Jump(target_of(instr)?)),
        Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
            let cond = pop(stack)?;
            let truth = op::is_true(vm, &cond)?;
            if truth == (op == Opcode::PopJumpIfTrue) {
                return Ok(Flow::Jump(target_of(instr)?));
            }
        }
        Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
            let cond = top(stack)?.clone();
            let truth = op::is_true(vm, &cond)?;
            if truth == (op == Opcode::JumpIfTrueOrPop) {
                return Ok(Flow::Jump(target_of(instr)?));
            }
            pop(&mut frame.stack)?;
        }
        Opcode::SetupLoop | Opcode::SetupExcept | Opcode::SetupFinally => {
            let kind = match op {
                Opcode::SetupLoop => BlockKind::Loop,
                Opcode::SetupExcept => BlockKind::Except,
                _ => BlockKind::Finally,
            };
            blocks.push(Block {
                kind,
                handler: target_of(instr)?,
                level: stack.len(),
            });
        }
        Opcode::PopBlock => {
            let block = blocks.pop().ok_or_else(|| system_error("block stack underflow"))?;
            stack.truncate(block.level);
        }
        Opcode::BreakLoop => return Ok(Flow::Why(Why::Break)),
        Opcode::ContinueLoop => return Ok(Flow::Why(Why::Continue(instr.arg as usize))),
        Opcode::ReturnValue => return Ok(Flow::Why(Why::Return(pop(stack)?))),
        Opcode::RaiseVarargs => {
            let args = popn(stack, arg)?;
            return Ok(Flow::Why(Why::Exception(bridge::do_raise(vm, args))));
        }
        Opcode::EndFinally => return end_finally(stack),
        Opcode::CallFunction | Opcode::CallFunctionVar | Opcode::CallFunctionKw | Opcode::CallFunctionVarKw => {
            let result = call_from_stack(vm, &mut frame.stack, op, instr.arg)?;
            frame.stack.push(result);
        }
        Opcode::MakeFunction | Opcode::MakeClosure => {
            let code_value = pop(stack)?;
            let closure = if op == Opcode::MakeClosure {
                match pop(stack)?.obj() {
                    Object::Tuple(cells) => cells.clone(),
                    _ => return Err(system_error("MAKE_CLOSURE expects a tuple of cells")),
                }
            } else {
                Vec::new()
            };
            let defaults = popn(stack, arg)?;
            let Object::Code(nested) = code_value.obj() else {
                return Err(system_error("MAKE_FUNCTION expects a code object"));
            };
            let func = Vm::make_function(nested.clone(), frame.globals.clone(), defaults, closure);
            frame.stack.push(func);
        }
        Opcode::BuildClass => {
            let methods = pop(stack)?;
            let bases = pop(stack)?;
            let name = pop(stack)?;
            let class = build_class(&name, &bases, &methods)?;
            frame.stack.push(class);
        }
        Opcode::ExtendedArg => return Err(system_error("unexpected EXTENDED_ARG")),
        other => return Err(system_error(format!("unhandled opcode {other}"))),
    }
    Ok(Flow::Next)
}

/// Item `depth` positions below the top, counting the top as 1.
fn peek(stack: &[Value], depth: usize) -> RtResult<&Value> {
    stack
        .len()
        .checked_sub(depth)
        .and_then(|idx| stack.get(idx))
        .ok_or_else(|| system_error("operand stack underflow"))
}

fn store_map(map: &Value, key: Value, value: Value) -> RtResult<()> {
    match map.obj() {
        Object::Dict(dict) => dict.borrow_mut().insert(key, value),
        _ => Err(system_error("STORE_MAP target is not a dict")),
    }
}

fn end_finally(stack: &mut Vec<Value>) -> RtResult<Flow> {
    let marker = pop(stack)?;
    match marker.obj() {
        Object::None => Ok(Flow::Next),
        Object::Int(why) => match *why {
            WHY_RETURN => Ok(Flow::Why(Why::Return(pop(stack)?))),
            WHY_CONTINUE => {
                let offset = pop(stack)?
                    .as_int()
                    .ok_or_else(|| system_error("bad continue target"))?;
                Ok(Flow::Why(Why::Continue(offset as usize)))
            }
            WHY_BREAK => Ok(Flow::Why(Why::Break)),
            _ => Err(system_error("'finally' pops bad why code")),
        },
        Object::Type(_) => {
            let value = pop(stack)?;
            let traceback = pop(stack)?;
            Ok(Flow::Why(Why::Exception(bridge::reraise_triple(value, traceback))))
        }
        _ => Err(system_error("'finally' pops bad exception")),
    }
}

/// Pops a call site's operands (`callable, positional..., key, value...,
/// [*args], [**kwargs]`) and performs the call.
pub(crate) fn call_from_stack(vm: &mut Vm, stack: &mut Vec<Value>, op: Opcode, arg: u32) -> RtResult<Value> {
    let npos = (arg & 0xff) as usize;
    let nkw = ((arg >> 8) & 0xff) as usize;
    let starstar = if matches!(op, Opcode::CallFunctionKw | Opcode::CallFunctionVarKw) {
        Some(pop(stack)?)
    } else {
        None
    };
    let star = if matches!(op, Opcode::CallFunctionVar | Opcode::CallFunctionVarKw) {
        Some(pop(stack)?)
    } else {
        None
    };
    let flat_kwargs = popn(stack, nkw * 2)?;
    let args = popn(stack, npos)?;
    let callable = pop(stack)?;
    let mut kwargs = Vec::with_capacity(nkw);
    let mut flat = flat_kwargs.into_iter();
    while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
        kwargs.push((key, value));
    }
    if star.is_none() && starstar.is_none() {
        op::call_value(vm, &callable, args, kwargs)
    } else {
        op::call_with_star(vm, &callable, args, kwargs, star.as_ref(), starstar.as_ref())
    }
}

/// `BUILD_CLASS`: a heap type from a name, a tuple of bases and the class
/// body's namespace.
fn build_class(name: &Value, bases: &Value, methods: &Value) -> RtResult<Value> {
    let name = name
        .as_str()
        .ok_or_else(|| ExceptionState::new(ExcKind::TypeError, "class name must be a string"))?;
    let base = match bases.obj() {
        Object::Tuple(items) => match items.as_slice() {
            [] => None,
            [single] => Some(
                single
                    .as_type()
                    .cloned()
                    .ok_or_else(|| ExceptionState::new(ExcKind::TypeError, "class bases must be types"))?,
            ),
            _ => {
                return Err(ExceptionState::new(
                    ExcKind::TypeError,
                    "multiple inheritance is not supported",
                ));
            }
        },
        _ => return Err(ExceptionState::new(ExcKind::TypeError, "class bases must be a tuple")),
    };
    let ty = TypeObject::new_heap(name, base);
    if let Object::Dict(dict) = methods.obj() {
        for (key, value) in dict.borrow().iter() {
            if let Some(attr) = key.as_str() {
                ty.set_attr(attr, value.clone());
            }
        }
    }
    Ok(Value::type_object(ty))
}
