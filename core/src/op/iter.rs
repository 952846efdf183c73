use super::call_slot;
use crate::exc::{ExcKind, ExceptionState, RtResult};
use crate::val::{DictKeyIter, Object, SeqIter, Slot, Value};
use crate::vm::Vm;

/// Outcome of advancing an iterator. Exhaustion is a normal result, not an
/// error.
#[derive(Debug)]
pub enum IterStep {
    Yielded(Value),
    Exhausted,
}

/// `iter(v)`.
pub fn get_iter(vm: &mut Vm, v: &Value) -> RtResult<Value> {
    if v.heap_type().is_some() {
        return match call_slot(vm, v, Slot::Iter, &[])? {
            Some(it) if is_iterator(&it) => Ok(it),
            Some(it) => Err(ExceptionState::new(
                ExcKind::TypeError,
                format!("iter() returned non-iterator of type '{}'", it.type_name()),
            )),
            None => Err(not_iterable(v)),
        };
    }
    match v.obj() {
        Object::List(_) | Object::Tuple(_) | Object::Str(_) => Ok(Value::iter(SeqIter::new(v.clone()))),
        Object::Dict(dict) => {
            let len = dict.borrow().len();
            Ok(Value::iter(DictKeyIter::new(v.clone(), len)))
        }
        Object::Iter(_) => Ok(v.clone()),
        _ => Err(not_iterable(v)),
    }
}

fn is_iterator(v: &Value) -> bool {
    match v.obj() {
        Object::Iter(_) => true,
        _ => v.heap_type().is_some_and(|ty| ty.lookup_slot(Slot::Next).is_some()),
    }
}

pub(crate) fn not_iterable(v: &Value) -> ExceptionState {
    ExceptionState::new(ExcKind::TypeError, format!("'{}' object is not iterable", v.type_name()))
}

/// Advances `it`. A `StopIteration` raised by a user `next` slot reads as
/// [`IterStep::Exhausted`]; every other error propagates.
pub fn iter_next(vm: &mut Vm, it: &Value) -> RtResult<IterStep> {
    if let Object::Iter(state) = it.obj() {
        return Ok(match state.next()? {
            Some(v) => IterStep::Yielded(v),
            None => IterStep::Exhausted,
        });
    }
    if it.heap_type().is_some() {
        return match call_slot(vm, it, Slot::Next, &[]) {
            Ok(Some(v)) => Ok(IterStep::Yielded(v)),
            Ok(None) => Err(not_an_iterator(it)),
            Err(exc) if exc.matches(ExcKind::StopIteration) => Ok(IterStep::Exhausted),
            Err(exc) => Err(exc),
        };
    }
    Err(not_an_iterator(it))
}

fn not_an_iterator(it: &Value) -> ExceptionState {
    ExceptionState::new(ExcKind::TypeError, format!("'{}' object is not an iterator", it.type_name()))
}

/// Drains any iterable into a vector.
pub fn collect_iterable(vm: &mut Vm, v: &Value) -> RtResult<Vec<Value>> {
    match v.obj() {
        Object::List(items) => return Ok(items.borrow().clone()),
        Object::Tuple(items) => return Ok(items.clone()),
        _ => {}
    }
    let it = get_iter(vm, v)?;
    let mut out = Vec::new();
    loop {
        match iter_next(vm, &it)? {
            IterStep::Yielded(item) => out.push(item),
            IterStep::Exhausted => return Ok(out),
        }
    }
}

/// Unpacks exactly `count` items from an iterable, in order.
pub fn unpack_iterable(vm: &mut Vm, v: &Value, count: usize) -> RtResult<Vec<Value>> {
    let items = match v.obj() {
        Object::Tuple(items) => items.clone(),
        Object::List(items) => items.borrow().clone(),
        _ => {
            let it = get_iter(vm, v)?;
            let mut out = Vec::with_capacity(count);
            while out.len() <= count {
                match iter_next(vm, &it)? {
                    IterStep::Yielded(item) => out.push(item),
                    IterStep::Exhausted => break,
                }
            }
            out
        }
    };
    match items.len() {
        n if n == count => Ok(items),
        n if n < count => Err(ExceptionState::new(
            ExcKind::ValueError,
            format!("need more than {n} value{} to unpack", if n == 1 { "" } else { "s" }),
        )),
        _ => Err(ExceptionState::new(ExcKind::ValueError, "too many values to unpack")),
    }
}
