use super::call_slot;
use crate::exc::{ExcKind, ExceptionState, RtResult};
use crate::val::{Object, ReprGuard, Slot, Value};
use crate::vm::Vm;

/// Truthiness through the `__nonzero__` slot. Types without it are true.
pub fn is_true(vm: &mut Vm, v: &Value) -> RtResult<bool> {
    if v.heap_type().is_some() {
        return match call_slot(vm, v, Slot::Nonzero, &[])? {
            None => Ok(true),
            Some(result) => match result.obj() {
                Object::Bool(b) => Ok(*b),
                Object::Int(i) => Ok(*i != 0),
                _ => Err(ExceptionState::new(
                    ExcKind::TypeError,
                    format!("__nonzero__ should return bool or int, returned {}", result.type_name()),
                )),
            },
        };
    }
    Ok(native_truth(v))
}

/// Truthiness of a built-in value; never consults slots.
pub(crate) fn native_truth(v: &Value) -> bool {
    match v.obj() {
        Object::None => false,
        Object::Bool(b) => *b,
        Object::Int(i) => *i != 0,
        Object::Float(f) => *f != 0.0,
        Object::Complex(re, im) => *re != 0.0 || *im != 0.0,
        Object::Str(s) => !s.is_empty(),
        Object::Tuple(items) => !items.is_empty(),
        Object::List(items) => !items.borrow().is_empty(),
        Object::Dict(dict) => !dict.borrow().is_empty(),
        _ => true,
    }
}

/// `repr(v)`.
pub fn repr(vm: &mut Vm, v: &Value) -> RtResult<String> {
    if v.heap_type().is_some() {
        if let Some(result) = call_slot(vm, v, Slot::Repr, &[])? {
            return match result.as_str() {
                Some(s) => Ok(s.to_string()),
                None => Err(ExceptionState::new(
                    ExcKind::TypeError,
                    format!("__repr__ returned non-string (type {})", result.type_name()),
                )),
            };
        }
        return Ok(v.debug_repr());
    }
    match v.obj() {
        Object::Tuple(items) => {
            let Some(_guard) = ReprGuard::enter(v) else {
                return Ok("(...)".to_string());
            };
            let parts = repr_all(vm, items)?;
            Ok(if parts.len() == 1 {
                format!("({},)", parts[0])
            } else {
                format!("({})", parts.join(", "))
            })
        }
        Object::List(items) => {
            let Some(_guard) = ReprGuard::enter(v) else {
                return Ok("[...]".to_string());
            };
            let items = items.borrow().clone();
            Ok(format!("[{}]", repr_all(vm, &items)?.join(", ")))
        }
        Object::Dict(dict) => {
            let Some(_guard) = ReprGuard::enter(v) else {
                return Ok("{...}".to_string());
            };
            let entries: Vec<(Value, Value)> = dict.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let mut parts = Vec::with_capacity(entries.len());
            for (key, value) in &entries {
                parts.push(format!("{}: {}", repr(vm, key)?, repr(vm, value)?));
            }
            Ok(format!("{{{}}}", parts.join(", ")))
        }
        _ => Ok(v.debug_repr()),
    }
}

fn repr_all(vm: &mut Vm, items: &[Value]) -> RtResult<Vec<String>> {
    items.iter().map(|item| repr(vm, item)).collect()
}

/// `str(v)`.
pub fn to_str(vm: &mut Vm, v: &Value) -> RtResult<String> {
    match v.obj() {
        Object::Str(s) => return Ok(s.clone()),
        Object::Exception(_) if v.heap_type().is_none() => {
            return Ok(ExceptionState::from_value(v.clone()).message());
        }
        _ => {}
    }
    if v.heap_type().is_some() {
        if let Some(result) = call_slot(vm, v, Slot::Str, &[])? {
            return match result.as_str() {
                Some(s) => Ok(s.to_string()),
                None => Err(ExceptionState::new(
                    ExcKind::TypeError,
                    format!("__str__ returned non-string (type {})", result.type_name()),
                )),
            };
        }
        if v.is_exception_instance() {
            return Ok(ExceptionState::from_value(v.clone()).message());
        }
    }
    repr(vm, v)
}
