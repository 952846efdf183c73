use super::{call_slot, collect_iterable};
use crate::exc::{ExcKind, ExceptionState, RtResult};
use crate::val::{Object, Slot, Value};
use crate::vm::Vm;

/// `container[key]`.
pub fn get_item(vm: &mut Vm, container: &Value, key: &Value) -> RtResult<Value> {
    if container.heap_type().is_some() {
        return call_slot(vm, container, Slot::GetItem, std::slice::from_ref(key))?
            .ok_or_else(|| no_attribute(container, "__getitem__"));
    }
    match container.obj() {
        Object::List(items) => {
            let items = items.borrow();
            match key.obj() {
                Object::Slice(slice) => {
                    let (start, _, step, count) = slice.indices(items.len())?;
                    Ok(Value::list(pick(&items, start, step, count)))
                }
                _ => Ok(items[seq_index(key, items.len(), "list")?].clone()),
            }
        }
        Object::Tuple(items) => match key.obj() {
            Object::Slice(slice) => {
                let (start, _, step, count) = slice.indices(items.len())?;
                Ok(Value::tuple(pick(items, start, step, count)))
            }
            _ => Ok(items[seq_index(key, items.len(), "tuple")?].clone()),
        },
        Object::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            match key.obj() {
                Object::Slice(slice) => {
                    let (start, _, step, count) = slice.indices(chars.len())?;
                    let picked: String = (0..count)
                        .map(|k| chars[(start + k as i64 * step) as usize])
                        .collect();
                    Ok(Value::str(picked))
                }
                _ => Ok(Value::str(chars[seq_index(key, chars.len(), "string")?].to_string())),
            }
        }
        Object::Dict(dict) => {
            let found = dict.borrow().get(key)?;
            found.ok_or_else(|| ExceptionState::with_args(ExcKind::KeyError, vec![key.clone()]))
        }
        _ => Err(no_attribute(container, "__getitem__")),
    }
}

/// `container[key] = value`.
pub fn set_item(vm: &mut Vm, container: &Value, key: &Value, value: &Value) -> RtResult<()> {
    if container.heap_type().is_some() {
        return match call_slot(vm, container, Slot::SetItem, &[key.clone(), value.clone()])? {
            Some(_) => Ok(()),
            None => Err(unsupported(container, "does not support item assignment")),
        };
    }
    match container.obj() {
        Object::List(items) => match key.obj() {
            Object::Slice(slice) => {
                let replacement = collect_iterable(vm, value)?;
                let mut items = items.borrow_mut();
                let (start, stop, step, count) = slice.indices(items.len())?;
                if step == 1 {
                    let start = start as usize;
                    let stop = (stop.max(start as i64)) as usize;
                    items.splice(start..stop, replacement);
                    return Ok(());
                }
                if replacement.len() != count {
                    return Err(ExceptionState::new(
                        ExcKind::ValueError,
                        format!(
                            "attempt to assign sequence of size {} to extended slice of size {}",
                            replacement.len(),
                            count
                        ),
                    ));
                }
                for (k, item) in replacement.into_iter().enumerate() {
                    items[(start + k as i64 * step) as usize] = item;
                }
                Ok(())
            }
            _ => {
                let mut items = items.borrow_mut();
                let idx = seq_index(key, items.len(), "list assignment")?;
                items[idx] = value.clone();
                Ok(())
            }
        },
        Object::Dict(dict) => dict.borrow_mut().insert(key.clone(), value.clone()),
        _ => Err(unsupported(container, "does not support item assignment")),
    }
}

/// `del container[key]`.
pub fn del_item(vm: &mut Vm, container: &Value, key: &Value) -> RtResult<()> {
    if container.heap_type().is_some() {
        return match call_slot(vm, container, Slot::DelItem, std::slice::from_ref(key))? {
            Some(_) => Ok(()),
            None => Err(unsupported(container, "doesn't support item deletion")),
        };
    }
    match container.obj() {
        Object::List(items) => {
            let mut items = items.borrow_mut();
            match key.obj() {
                Object::Slice(slice) => {
                    let (start, _, step, count) = slice.indices(items.len())?;
                    let mut doomed: Vec<usize> = (0..count).map(|k| (start + k as i64 * step) as usize).collect();
                    doomed.sort_unstable();
                    for idx in doomed.into_iter().rev() {
                        items.remove(idx);
                    }
                }
                _ => {
                    let idx = seq_index(key, items.len(), "list assignment")?;
                    items.remove(idx);
                }
            }
            Ok(())
        }
        Object::Dict(dict) => match dict.borrow_mut().remove(key)? {
            Some(_) => Ok(()),
            None => Err(ExceptionState::with_args(ExcKind::KeyError, vec![key.clone()])),
        },
        _ => Err(unsupported(container, "doesn't support item deletion")),
    }
}

fn slice_of(start: Option<&Value>, stop: Option<&Value>) -> Value {
    Value::slice(
        start.cloned().unwrap_or_else(Value::none),
        stop.cloned().unwrap_or_else(Value::none),
        Value::none(),
    )
}

/// `obj[start:stop]` with either bound optional.
pub fn get_slice(vm: &mut Vm, obj: &Value, start: Option<&Value>, stop: Option<&Value>) -> RtResult<Value> {
    get_item(vm, obj, &slice_of(start, stop))
}

pub fn set_slice(
    vm: &mut Vm,
    obj: &Value,
    start: Option<&Value>,
    stop: Option<&Value>,
    value: &Value,
) -> RtResult<()> {
    set_item(vm, obj, &slice_of(start, stop), value)
}

pub fn del_slice(vm: &mut Vm, obj: &Value, start: Option<&Value>, stop: Option<&Value>) -> RtResult<()> {
    del_item(vm, obj, &slice_of(start, stop))
}

fn pick(items: &[Value], start: i64, step: i64, count: usize) -> Vec<Value> {
    (0..count)
        .map(|k| items[(start + k as i64 * step) as usize].clone())
        .collect()
}

/// Normalises an integer index against `len`. `what` names the container in
/// error messages.
fn seq_index(key: &Value, len: usize, what: &str) -> RtResult<usize> {
    let Some(raw) = key.as_int() else {
        let kind = what.split(' ').next().unwrap_or(what);
        return Err(ExceptionState::new(
            ExcKind::TypeError,
            format!("{kind} indices must be integers, not {}", key.type_name()),
        ));
    };
    let idx = if raw < 0 { raw + len as i64 } else { raw };
    if idx < 0 || idx >= len as i64 {
        return Err(ExceptionState::new(ExcKind::IndexError, format!("{what} index out of range")));
    }
    Ok(idx as usize)
}

fn no_attribute(v: &Value, attr: &str) -> ExceptionState {
    ExceptionState::new(
        ExcKind::TypeError,
        format!("'{}' object has no attribute '{attr}'", v.type_name()),
    )
}

fn unsupported(v: &Value, what: &str) -> ExceptionState {
    ExceptionState::new(ExcKind::TypeError, format!("'{}' object {what}", v.type_name()))
}
