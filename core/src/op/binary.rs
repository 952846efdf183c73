use std::rc::Rc;

use super::{BinaryOp, UnaryOp, call_binary_slot, call_slot, collect_iterable, is_true, repr};
use crate::exc::{ExcKind, ExceptionState, RtResult};
use crate::val::{Object, Slot, SlotVariant, Value};
use crate::vm::Vm;

/// `lhs <op> rhs`: the left operand's forward slot, then the right operand's
/// reflected slot, then `TypeError`. A right operand whose type is a proper
/// subtype of the left's and overrides the reflected slot goes first.
pub fn binary_op(vm: &mut Vm, op: BinaryOp, lhs: &Value, rhs: &Value) -> RtResult<Value> {
    match binary_dispatch(vm, op, lhs, rhs)? {
        Some(v) => Ok(v),
        None => Err(binary_type_error(op.symbol(), lhs, rhs)),
    }
}

/// `lhs <op>= rhs`: the left operand's in-place slot first, then the same
/// resolution as [`binary_op`].
pub fn inplace_op(vm: &mut Vm, op: BinaryOp, lhs: &Value, rhs: &Value) -> RtResult<Value> {
    if let Some(v) = call_binary_slot(vm, lhs, Slot::Binary(op, SlotVariant::InPlace), rhs)? {
        return Ok(v);
    }
    if let Object::List(items) = lhs.obj() {
        match op {
            BinaryOp::Add => {
                let extra = collect_iterable(vm, rhs)?;
                items.borrow_mut().extend(extra);
                return Ok(lhs.clone());
            }
            BinaryOp::Mul => {
                if let Some(n) = rhs.as_int() {
                    let mut items = items.borrow_mut();
                    let repeated = repeat(&items, n)?;
                    *items = repeated;
                    return Ok(lhs.clone());
                }
            }
            _ => {}
        }
    }
    match binary_dispatch(vm, op, lhs, rhs)? {
        Some(v) => Ok(v),
        None => Err(binary_type_error(op.inplace_symbol(), lhs, rhs)),
    }
}

fn binary_dispatch(vm: &mut Vm, op: BinaryOp, lhs: &Value, rhs: &Value) -> RtResult<Option<Value>> {
    let forward = Slot::Binary(op, SlotVariant::Forward);
    let reflected = Slot::Binary(op, SlotVariant::Reflected);
    let lty = lhs.type_of();
    let rty = rhs.type_of();
    let same_type = Rc::ptr_eq(&lty, &rty);

    let reflected_first = !same_type && rty.is_subtype_of(&lty) && rty.is_heap() && rty.defines_slot(reflected);
    if reflected_first && let Some(v) = call_binary_slot(vm, rhs, reflected, lhs)? {
        return Ok(Some(v));
    }

    let forward_result = if lhs.heap_type().is_some() {
        call_binary_slot(vm, lhs, forward, rhs)?
    } else {
        native_binary(op, lhs, rhs)?
    };
    if forward_result.is_some() {
        return Ok(forward_result);
    }

    if !same_type && !reflected_first {
        if rhs.heap_type().is_some() {
            return call_binary_slot(vm, rhs, reflected, lhs);
        }
        return native_binary_reflected(op, lhs, rhs);
    }
    Ok(None)
}

pub(crate) fn binary_type_error(symbol: &str, lhs: &Value, rhs: &Value) -> ExceptionState {
    ExceptionState::new(
        ExcKind::TypeError,
        format!(
            "unsupported operand type(s) for {symbol}: '{}' and '{}'",
            lhs.type_name(),
            rhs.type_name()
        ),
    )
}

/// Numeric view of a value. `bool` participates as an integer.
#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
    Complex(f64, f64),
}

impl Num {
    fn of(v: &Value) -> Option<Num> {
        match v.obj() {
            Object::Bool(b) => Some(Num::Int(*b as i64)),
            Object::Int(i) => Some(Num::Int(*i)),
            Object::Float(f) => Some(Num::Float(*f)),
            Object::Complex(re, im) => Some(Num::Complex(*re, *im)),
            _ => None,
        }
    }

    fn as_float(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
            Num::Complex(re, _) => re,
        }
    }

    fn as_complex(self) -> (f64, f64) {
        match self {
            Num::Complex(re, im) => (re, im),
            other => (other.as_float(), 0.0),
        }
    }
}

fn overflow() -> ExceptionState {
    ExceptionState::new(ExcKind::OverflowError, "integer overflow")
}

fn zero_div(message: &str) -> ExceptionState {
    ExceptionState::new(ExcKind::ZeroDivisionError, message)
}

/// Built-in implementations for built-in operand types. `Ok(None)` means the
/// combination is not supported natively.
fn native_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> RtResult<Option<Value>> {
    if let (Some(a), Some(b)) = (Num::of(lhs), Num::of(rhs)) {
        if let (Object::Bool(x), Object::Bool(y)) = (lhs.obj(), rhs.obj()) {
            match op {
                BinaryOp::And => return Ok(Some(Value::bool(*x & *y))),
                BinaryOp::Or => return Ok(Some(Value::bool(*x | *y))),
                BinaryOp::Xor => return Ok(Some(Value::bool(*x ^ *y))),
                _ => {}
            }
        }
        return numeric(op, a, b);
    }
    sequence(op, lhs, rhs)
}

/// Reflected built-in implementations: only sequence repetition has a
/// built-in right-hand form (`3 * [x]` with a non-native left operand).
fn native_binary_reflected(op: BinaryOp, lhs: &Value, rhs: &Value) -> RtResult<Option<Value>> {
    if lhs.heap_type().is_some() {
        return Ok(None);
    }
    match op {
        BinaryOp::Mul if lhs.as_int().is_some() => sequence(op, rhs, lhs),
        _ => Ok(None),
    }
}

fn numeric(op: BinaryOp, a: Num, b: Num) -> RtResult<Option<Value>> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => int_op(op, x, y),
        (Num::Complex(..), _) | (_, Num::Complex(..)) => complex_op(op, a.as_complex(), b.as_complex()),
        _ => float_op(op, a.as_float(), b.as_float()),
    }
}

fn int_op(op: BinaryOp, x: i64, y: i64) -> RtResult<Option<Value>> {
    let result = match op {
        BinaryOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinaryOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        BinaryOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
        BinaryOp::Div | BinaryOp::FloorDiv => {
            if y == 0 {
                return Err(zero_div("integer division or modulo by zero"));
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q }
        }
        BinaryOp::Mod => {
            if y == 0 {
                return Err(zero_div("integer division or modulo by zero"));
            }
            let r = x.checked_rem(y).unwrap_or(0);
            if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }
        }
        BinaryOp::TrueDiv => {
            if y == 0 {
                return Err(zero_div("integer division or modulo by zero"));
            }
            return Ok(Some(Value::float(x as f64 / y as f64)));
        }
        BinaryOp::Pow => {
            if y < 0 {
                return float_op(op, x as f64, y as f64);
            }
            let exp = u32::try_from(y).map_err(|_| overflow())?;
            x.checked_pow(exp).ok_or_else(overflow)?
        }
        BinaryOp::LShift => {
            if y < 0 {
                return Err(ExceptionState::new(ExcKind::ValueError, "negative shift count"));
            }
            if x == 0 {
                0
            } else {
                if y >= 63 {
                    return Err(overflow());
                }
                let shifted = x << y;
                if shifted >> y != x {
                    return Err(overflow());
                }
                shifted
            }
        }
        BinaryOp::RShift => {
            if y < 0 {
                return Err(ExceptionState::new(ExcKind::ValueError, "negative shift count"));
            }
            if y >= 64 { if x < 0 { -1 } else { 0 } } else { x >> y }
        }
        BinaryOp::And => x & y,
        BinaryOp::Or => x | y,
        BinaryOp::Xor => x ^ y,
    };
    Ok(Some(Value::int(result)))
}

fn float_op(op: BinaryOp, x: f64, y: f64) -> RtResult<Option<Value>> {
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::TrueDiv => {
            if y == 0.0 {
                return Err(zero_div("float division by zero"));
            }
            x / y
        }
        BinaryOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_div("float divmod()"));
            }
            (x / y).floor()
        }
        BinaryOp::Mod => {
            if y == 0.0 {
                return Err(zero_div("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }
        }
        BinaryOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_div("0.0 cannot be raised to a negative power"));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(ExceptionState::new(
                    ExcKind::ValueError,
                    "negative number cannot be raised to a fractional power",
                ));
            }
            x.powf(y)
        }
        _ => return Ok(None),
    };
    Ok(Some(Value::float(result)))
}

fn complex_op(op: BinaryOp, (a, b): (f64, f64), (c, d): (f64, f64)) -> RtResult<Option<Value>> {
    let (re, im) = match op {
        BinaryOp::Add => (a + c, b + d),
        BinaryOp::Sub => (a - c, b - d),
        BinaryOp::Mul => (a * c - b * d, a * d + b * c),
        BinaryOp::Div | BinaryOp::TrueDiv => {
            let denom = c * c + d * d;
            if denom == 0.0 {
                return Err(zero_div("complex division by zero"));
            }
            ((a * c + b * d) / denom, (b * c - a * d) / denom)
        }
        BinaryOp::Pow => {
            if c == 0.0 && d == 0.0 {
                (1.0, 0.0)
            } else if a == 0.0 && b == 0.0 {
                if d != 0.0 || c < 0.0 {
                    return Err(zero_div("0.0 to a negative or complex power"));
                }
                (0.0, 0.0)
            } else {
                let modulus = a.hypot(b);
                let arg = b.atan2(a);
                let len = modulus.powf(c) * (-d * arg).exp();
                let phase = arg * c + d * modulus.ln();
                (len * phase.cos(), len * phase.sin())
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(Value::complex(re, im)))
}

fn no_memory() -> ExceptionState {
    ExceptionState::with_args(ExcKind::MemoryError, Vec::new())
}

/// Length of `len` items repeated `n` times, or `None` past `isize::MAX`.
fn repeated_len(len: usize, n: i64) -> Option<usize> {
    let n = usize::try_from(n).ok()?;
    len.checked_mul(n).filter(|total| *total <= isize::MAX as usize)
}

fn repeat(items: &[Value], n: i64) -> RtResult<Vec<Value>> {
    if n <= 0 || items.is_empty() {
        return Ok(Vec::new());
    }
    let total = repeated_len(items.len(), n).ok_or_else(no_memory)?;
    let mut out = Vec::new();
    out.try_reserve_exact(total).map_err(|_| no_memory())?;
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

fn repeat_str(s: &str, n: i64) -> RtResult<String> {
    if n <= 0 || s.is_empty() {
        return Ok(String::new());
    }
    let total = repeated_len(s.len(), n)
        .ok_or_else(|| ExceptionState::new(ExcKind::OverflowError, "repeated string is too long"))?;
    let mut out = String::new();
    out.try_reserve_exact(total).map_err(|_| no_memory())?;
    for _ in 0..n {
        out.push_str(s);
    }
    Ok(out)
}

fn sequence(op: BinaryOp, lhs: &Value, rhs: &Value) -> RtResult<Option<Value>> {
    let result = match (op, lhs.obj(), rhs.obj()) {
        (BinaryOp::Add, Object::Str(a), Object::Str(b)) => Value::str(format!("{a}{b}")),
        (BinaryOp::Add, Object::List(a), Object::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Value::list(items)
        }
        (BinaryOp::Add, Object::Tuple(a), Object::Tuple(b)) => {
            let mut items = a.clone();
            items.extend(b.iter().cloned());
            Value::tuple(items)
        }
        (BinaryOp::Mul, Object::Str(s), _) if rhs.as_int().is_some() => {
            Value::str(repeat_str(s, rhs.as_int().unwrap_or(0))?)
        }
        (BinaryOp::Mul, Object::List(items), _) if rhs.as_int().is_some() => {
            Value::list(repeat(&items.borrow(), rhs.as_int().unwrap_or(0))?)
        }
        (BinaryOp::Mul, Object::Tuple(items), _) if rhs.as_int().is_some() => {
            Value::tuple(repeat(items, rhs.as_int().unwrap_or(0))?)
        }
        (BinaryOp::Mul, _, Object::Str(_) | Object::List(_) | Object::Tuple(_)) if lhs.as_int().is_some() => {
            return sequence(op, rhs, lhs);
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

/// `-x`, `+x`, `~x`, `not x` and `` `x` ``. Each maps onto one slot; there is
/// no fallback to another slot.
pub fn unary_op(vm: &mut Vm, op: UnaryOp, operand: &Value) -> RtResult<Value> {
    let slot = match op {
        UnaryOp::Not => return Ok(Value::bool(!is_true(vm, operand)?)),
        UnaryOp::Convert => return Ok(Value::str(repr(vm, operand)?)),
        UnaryOp::Negative => Slot::Neg,
        UnaryOp::Positive => Slot::Pos,
        UnaryOp::Invert => Slot::Invert,
    };
    if operand.heap_type().is_some() {
        return match call_slot(vm, operand, slot, &[])? {
            Some(v) => Ok(v),
            None => Err(unary_type_error(op, operand)),
        };
    }
    let result = match (op, operand.obj()) {
        (UnaryOp::Negative, Object::Bool(b)) => Value::int(-(*b as i64)),
        (UnaryOp::Negative, Object::Int(i)) => Value::int(i.checked_neg().ok_or_else(overflow)?),
        (UnaryOp::Negative, Object::Float(f)) => Value::float(-f),
        (UnaryOp::Negative, Object::Complex(re, im)) => Value::complex(-re, -im),
        (UnaryOp::Positive, Object::Bool(b)) => Value::int(*b as i64),
        (UnaryOp::Positive, Object::Int(_) | Object::Float(_) | Object::Complex(..)) => operand.clone(),
        (UnaryOp::Invert, Object::Bool(b)) => Value::int(!(*b as i64)),
        (UnaryOp::Invert, Object::Int(i)) => Value::int(!i),
        _ => return Err(unary_type_error(op, operand)),
    };
    Ok(result)
}

fn unary_type_error(op: UnaryOp, operand: &Value) -> ExceptionState {
    ExceptionState::new(
        ExcKind::TypeError,
        format!("bad operand type for unary {}: '{}'", op.symbol(), operand.type_name()),
    )
}
