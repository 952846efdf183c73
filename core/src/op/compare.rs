use std::cmp::Ordering;
use std::rc::Rc;

use super::{CompareOp, IterStep, call_binary_slot, call_slot, get_iter, is_true, iter_next};
use crate::exc::{ExcKind, ExceptionState, RtResult};
use crate::val::{Object, Slot, Value};
use crate::vm::Vm;

/// Executes a `COMPARE_OP`.
pub fn compare_op(vm: &mut Vm, op: CompareOp, lhs: &Value, rhs: &Value) -> RtResult<Value> {
    match op {
        CompareOp::Is => Ok(Value::bool(lhs.is(rhs))),
        CompareOp::IsNot => Ok(Value::bool(!lhs.is(rhs))),
        CompareOp::In => Ok(Value::bool(contains(vm, rhs, lhs)?)),
        CompareOp::NotIn => Ok(Value::bool(!contains(vm, rhs, lhs)?)),
        CompareOp::ExcMatch => Ok(Value::bool(exception_matches(lhs, rhs))),
        _ => rich_compare(vm, op, lhs, rhs),
    }
}

/// `<`, `<=`, `==`, `!=`, `>`, `>=`.
///
/// Tries the left operand's slot, then the right operand's mirrored slot
/// (`a > b` retried as `b < a`), then the built-in comparison. Equality falls
/// back to identity; ordering raises `TypeError`.
pub fn rich_compare(vm: &mut Vm, op: CompareOp, lhs: &Value, rhs: &Value) -> RtResult<Value> {
    let (Some(slot), Some(mirrored)) = (op.slot(), op.mirrored().slot()) else {
        return compare_op(vm, op, lhs, rhs);
    };

    let lty = lhs.type_of();
    let rty = rhs.type_of();
    let mirrored_first =
        !Rc::ptr_eq(&lty, &rty) && rty.is_heap() && rty.is_subtype_of(&lty) && rty.defines_slot(mirrored);
    if mirrored_first && let Some(v) = call_binary_slot(vm, rhs, mirrored, lhs)? {
        return Ok(v);
    }
    if let Some(v) = call_binary_slot(vm, lhs, slot, rhs)? {
        return Ok(v);
    }
    if !mirrored_first && let Some(v) = call_binary_slot(vm, rhs, mirrored, lhs)? {
        return Ok(v);
    }
    if let Some(outcome) = native_compare(vm, op, lhs, rhs)? {
        return Ok(Value::bool(outcome));
    }
    match op {
        CompareOp::Eq => Ok(Value::bool(lhs.is(rhs))),
        CompareOp::Ne => Ok(Value::bool(!lhs.is(rhs))),
        _ => Err(ExceptionState::new(
            ExcKind::TypeError,
            format!(
                "unorderable types: {}() {} {}()",
                lhs.type_name(),
                op.symbol(),
                rhs.type_name()
            ),
        )),
    }
}

/// `a == b` as a boolean, short-circuiting on identity.
pub fn values_equal(vm: &mut Vm, a: &Value, b: &Value) -> RtResult<bool> {
    if a.is(b) {
        return Ok(true);
    }
    let outcome = rich_compare(vm, CompareOp::Eq, a, b)?;
    is_true(vm, &outcome)
}

fn apply(op: CompareOp, ord: Ordering) -> bool {
    match op {
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
        _ => false,
    }
}

fn native_compare(vm: &mut Vm, op: CompareOp, lhs: &Value, rhs: &Value) -> RtResult<Option<bool>> {
    if lhs.heap_type().is_some() || rhs.heap_type().is_some() {
        return Ok(None);
    }
    let ordering_op = !matches!(op, CompareOp::Eq | CompareOp::Ne);
    let outcome = match (lhs.obj(), rhs.obj()) {
        (Object::Complex(..), _) | (_, Object::Complex(..)) if is_number(lhs) && is_number(rhs) => {
            if ordering_op {
                return Err(ExceptionState::new(
                    ExcKind::TypeError,
                    "no ordering relation is defined for complex numbers",
                ));
            }
            let (a, b) = (complex_parts(lhs), complex_parts(rhs));
            apply(op, if a == b { Ordering::Equal } else { Ordering::Less })
        }
        _ if lhs.as_int().is_some() && rhs.as_int().is_some() => {
            apply(op, lhs.as_int().cmp(&rhs.as_int()))
        }
        _ if is_number(lhs) && is_number(rhs) => {
            let (a, b) = (complex_parts(lhs).0, complex_parts(rhs).0);
            match a.partial_cmp(&b) {
                Some(ord) => apply(op, ord),
                None => op == CompareOp::Ne,
            }
        }
        (Object::Str(a), Object::Str(b)) => apply(op, a.as_bytes().cmp(b.as_bytes())),
        (Object::Tuple(a), Object::Tuple(b)) => {
            let (a, b) = (a.clone(), b.clone());
            return compare_sequences(vm, op, &a, &b).map(Some);
        }
        (Object::List(a), Object::List(b)) => {
            let (a, b) = (a.borrow().clone(), b.borrow().clone());
            return compare_sequences(vm, op, &a, &b).map(Some);
        }
        (Object::Dict(_), Object::Dict(_)) if !ordering_op => {
            let equal = dicts_equal(vm, lhs, rhs)?;
            if op == CompareOp::Eq { equal } else { !equal }
        }
        (Object::None, Object::None) if !ordering_op => op == CompareOp::Eq,
        _ => return Ok(None),
    };
    Ok(Some(outcome))
}

fn is_number(v: &Value) -> bool {
    matches!(
        v.obj(),
        Object::Bool(_) | Object::Int(_) | Object::Float(_) | Object::Complex(..)
    )
}

fn complex_parts(v: &Value) -> (f64, f64) {
    match v.obj() {
        Object::Bool(b) => (*b as i64 as f64, 0.0),
        Object::Int(i) => (*i as f64, 0.0),
        Object::Float(f) => (*f, 0.0),
        Object::Complex(re, im) => (*re, *im),
        _ => (0.0, 0.0),
    }
}

fn compare_sequences(vm: &mut Vm, op: CompareOp, a: &[Value], b: &[Value]) -> RtResult<bool> {
    for (x, y) in a.iter().zip(b.iter()) {
        if !values_equal(vm, x, y)? {
            return match op {
                CompareOp::Eq => Ok(false),
                CompareOp::Ne => Ok(true),
                _ => {
                    let outcome = rich_compare(vm, op, x, y)?;
                    is_true(vm, &outcome)
                }
            };
        }
    }
    Ok(apply(op, a.len().cmp(&b.len())))
}

fn dicts_equal(vm: &mut Vm, lhs: &Value, rhs: &Value) -> RtResult<bool> {
    let (Object::Dict(a), Object::Dict(b)) = (lhs.obj(), rhs.obj()) else {
        return Ok(false);
    };
    if a.borrow().len() != b.borrow().len() {
        return Ok(false);
    }
    let entries: Vec<(Value, Value)> = a.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    for (key, value) in entries {
        let other = b.borrow().get(&key)?;
        match other {
            Some(other) if values_equal(vm, &value, &other)? => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// `item in container`: the membership slot if present, otherwise iteration.
/// Errors raised along the way propagate unchanged.
pub fn contains(vm: &mut Vm, container: &Value, item: &Value) -> RtResult<bool> {
    if let Some(ty) = container.heap_type() {
        if let Some(result) = call_slot(vm, container, Slot::Contains, std::slice::from_ref(item))? {
            return is_true(vm, &result);
        }
        if ty.lookup_slot(Slot::Iter).is_some() {
            return contains_by_iteration(vm, container, item);
        }
        return Err(not_iterable_argument(container));
    }
    match container.obj() {
        Object::Str(haystack) => match item.as_str() {
            Some(needle) => Ok(haystack.contains(needle)),
            None => Err(ExceptionState::new(
                ExcKind::TypeError,
                format!("'in <string>' requires string as left operand, not {}", item.type_name()),
            )),
        },
        Object::Tuple(items) => {
            let items = items.clone();
            contains_in(vm, &items, item)
        }
        Object::List(items) => {
            let items = items.borrow().clone();
            contains_in(vm, &items, item)
        }
        Object::Dict(dict) => dict.borrow().contains(item),
        Object::Iter(_) => contains_by_iteration(vm, container, item),
        _ => Err(not_iterable_argument(container)),
    }
}

fn contains_in(vm: &mut Vm, items: &[Value], item: &Value) -> RtResult<bool> {
    for candidate in items {
        if values_equal(vm, candidate, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn contains_by_iteration(vm: &mut Vm, container: &Value, item: &Value) -> RtResult<bool> {
    let iter = get_iter(vm, container)?;
    loop {
        match iter_next(vm, &iter)? {
            IterStep::Yielded(candidate) => {
                if values_equal(vm, &candidate, item)? {
                    return Ok(true);
                }
            }
            IterStep::Exhausted => return Ok(false),
        }
    }
}

fn not_iterable_argument(container: &Value) -> ExceptionState {
    ExceptionState::new(
        ExcKind::TypeError,
        format!("argument of type '{}' is not iterable", container.type_name()),
    )
}

/// Whether the exception (or exception class) `given` is matched by the
/// `except` clause target `against`: a class or a tuple of them.
pub fn exception_matches(given: &Value, against: &Value) -> bool {
    if let Object::Tuple(items) = against.obj() {
        return items.iter().any(|item| exception_matches(given, item));
    }
    let Some(target) = against.as_type() else {
        return given.is(against);
    };
    match given.as_type() {
        Some(ty) => ty.is_subtype_of(target),
        None => given.is_instance_of(target),
    }
}
