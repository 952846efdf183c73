use super::{collect_iterable, values_equal};
use crate::exc::{ExcKind, ExceptionState, RtResult};
use crate::val::{BoundMethod, Object, Value};
use crate::vm::Vm;

/// `obj.name`.
pub fn get_attr(vm: &mut Vm, obj: &Value, name: &str) -> RtResult<Value> {
    let _ = vm;
    match obj.obj() {
        Object::Instance(inst) => {
            if let Some(v) = inst.dict.borrow().get(name) {
                return Ok(v.clone());
            }
            if let Some(v) = inst.ty.lookup_attr(name) {
                return Ok(bind(obj, v));
            }
        }
        Object::Exception(exc) => {
            if let Some(v) = exc.dict.borrow().get(name) {
                return Ok(v.clone());
            }
            match name {
                "args" => return Ok(Value::tuple(exc.args.clone())),
                "message" => {
                    return Ok(match exc.args.as_slice() {
                        [single] => single.clone(),
                        _ => Value::str(""),
                    });
                }
                _ => {}
            }
            if exc.ty.is_heap()
                && let Some(v) = exc.ty.lookup_attr(name)
            {
                return Ok(bind(obj, v));
            }
        }
        Object::Type(ty) => {
            if name == "__name__" {
                return Ok(Value::str(ty.name()));
            }
            return ty.lookup_attr(name).ok_or_else(|| {
                ExceptionState::new(
                    ExcKind::AttributeError,
                    format!("type object '{}' has no attribute '{name}'", ty.name()),
                )
            });
        }
        Object::Function(func) => match name {
            "__name__" | "func_name" => return Ok(Value::str(func.name.as_str())),
            "func_defaults" => {
                return Ok(if func.defaults.is_empty() {
                    Value::none()
                } else {
                    Value::tuple(func.defaults.clone())
                });
            }
            "func_code" | "__code__" => return Ok(Value::code(func.code.clone())),
            _ => {}
        },
        Object::Traceback(tb) => match name {
            "tb_next" => return Ok(tb.next.clone().unwrap_or_else(Value::none)),
            "tb_lasti" => return Ok(Value::int(tb.offset as i64)),
            _ => {}
        },
        Object::Cell(cell) if name == "cell_contents" => {
            return cell
                .borrow()
                .clone()
                .ok_or_else(|| ExceptionState::new(ExcKind::ValueError, "Cell is empty"));
        }
        Object::Slice(slice) => match name {
            "start" => return Ok(slice.start.clone()),
            "stop" => return Ok(slice.stop.clone()),
            "step" => return Ok(slice.step.clone()),
            _ => {}
        },
        _ => {
            if let Some(method) = native_method(obj, name) {
                return Ok(method);
            }
        }
    }
    Err(no_attribute(obj, name))
}

/// `obj.name = value`.
pub fn set_attr(vm: &mut Vm, obj: &Value, name: &str, value: &Value) -> RtResult<()> {
    let _ = vm;
    match obj.obj() {
        Object::Instance(inst) => {
            inst.dict.borrow_mut().insert(name.to_string(), value.clone());
            Ok(())
        }
        Object::Exception(exc) => {
            exc.dict.borrow_mut().insert(name.to_string(), value.clone());
            Ok(())
        }
        Object::Type(ty) if ty.is_heap() => {
            ty.set_attr(name, value.clone());
            Ok(())
        }
        Object::Type(ty) => Err(ExceptionState::new(
            ExcKind::TypeError,
            format!("can't set attributes of built-in/extension type '{}'", ty.name()),
        )),
        _ => Err(no_attribute(obj, name)),
    }
}

/// `del obj.name`.
pub fn del_attr(vm: &mut Vm, obj: &Value, name: &str) -> RtResult<()> {
    let _ = vm;
    let removed = match obj.obj() {
        Object::Instance(inst) => inst.dict.borrow_mut().remove(name).is_some(),
        Object::Exception(exc) => exc.dict.borrow_mut().remove(name).is_some(),
        Object::Type(ty) if ty.is_heap() => ty.remove_attr(name),
        _ => false,
    };
    if removed { Ok(()) } else { Err(no_attribute(obj, name)) }
}

fn no_attribute(obj: &Value, name: &str) -> ExceptionState {
    ExceptionState::new(
        ExcKind::AttributeError,
        format!("'{}' object has no attribute '{name}'", obj.type_name()),
    )
}

/// Functions found on the class bind to the instance.
fn bind(receiver: &Value, attr: Value) -> Value {
    match attr.obj() {
        Object::Function(_) | Object::Native(_) => Value::new(Object::BoundMethod(BoundMethod {
            receiver: receiver.clone(),
            func: attr,
        })),
        _ => attr,
    }
}

fn arity_error(name: &str, expected: &str, given: usize) -> ExceptionState {
    ExceptionState::new(
        ExcKind::TypeError,
        format!("{name}() takes {expected} ({given} given)"),
    )
}

/// Methods of built-in containers, bound to `receiver`.
fn native_method(receiver: &Value, name: &str) -> Option<Value> {
    let this = receiver.clone();
    let method = match (receiver.obj(), name) {
        (Object::List(_), "append") => Value::native("append", move |_vm, args, _kw| {
            let [item] = args else {
                return Err(arity_error("append", "exactly one argument", args.len()));
            };
            if let Object::List(items) = this.obj() {
                items.borrow_mut().push(item.clone());
            }
            Ok(Value::none())
        }),
        (Object::List(_), "extend") => Value::native("extend", move |vm, args, _kw| {
            let [iterable] = args else {
                return Err(arity_error("extend", "exactly one argument", args.len()));
            };
            let extra = collect_iterable(vm, iterable)?;
            if let Object::List(items) = this.obj() {
                items.borrow_mut().extend(extra);
            }
            Ok(Value::none())
        }),
        (Object::List(_), "pop") => Value::native("pop", move |_vm, args, _kw| {
            let Object::List(items) = this.obj() else {
                return Ok(Value::none());
            };
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(ExceptionState::new(ExcKind::IndexError, "pop from empty list"));
            }
            let len = items.len() as i64;
            let idx = match args {
                [] => len - 1,
                [idx] => {
                    let raw = idx.as_int().ok_or_else(|| {
                        ExceptionState::new(ExcKind::TypeError, "an integer is required")
                    })?;
                    if raw < 0 { raw + len } else { raw }
                }
                _ => return Err(arity_error("pop", "at most 1 argument", args.len())),
            };
            if idx < 0 || idx >= len {
                return Err(ExceptionState::new(ExcKind::IndexError, "pop index out of range"));
            }
            Ok(items.remove(idx as usize))
        }),
        (Object::Dict(_), "get") => Value::native("get", move |_vm, args, _kw| match args {
            [key] | [key, _] => {
                let default = args.get(1).cloned().unwrap_or_else(Value::none);
                let Object::Dict(dict) = this.obj() else {
                    return Ok(default);
                };
                let found = dict.borrow().get(key)?;
                Ok(found.unwrap_or(default))
            }
            _ => Err(arity_error("get", "at least 1 argument", args.len())),
        }),
        (Object::Dict(_), "keys" | "values" | "items") => {
            let which = name.to_string();
            Value::native(name, move |_vm, args, _kw| {
                if !args.is_empty() {
                    return Err(arity_error(&which, "no arguments", args.len()));
                }
                let Object::Dict(dict) = this.obj() else {
                    return Ok(Value::list(Vec::new()));
                };
                let dict = dict.borrow();
                let items = dict
                    .iter()
                    .map(|(k, v)| match which.as_str() {
                        "keys" => k.clone(),
                        "values" => v.clone(),
                        _ => Value::tuple(vec![k.clone(), v.clone()]),
                    })
                    .collect();
                Ok(Value::list(items))
            })
        }
        (Object::Str(_), "join") => Value::native("join", move |vm, args, _kw| {
            let [iterable] = args else {
                return Err(arity_error("join", "exactly one argument", args.len()));
            };
            let sep = this.as_str().unwrap_or_default().to_string();
            let mut parts = Vec::new();
            for (i, item) in collect_iterable(vm, iterable)?.into_iter().enumerate() {
                match item.as_str() {
                    Some(s) => parts.push(s.to_string()),
                    None => {
                        return Err(ExceptionState::new(
                            ExcKind::TypeError,
                            format!("sequence item {i}: expected string, {} found", item.type_name()),
                        ));
                    }
                }
            }
            Ok(Value::str(parts.join(&sep)))
        }),
        (Object::List(_) | Object::Tuple(_), "index") => Value::native("index", move |vm, args, _kw| {
            let [needle] = args else {
                return Err(arity_error("index", "exactly one argument", args.len()));
            };
            let items = collect_iterable(vm, &this)?;
            for (i, item) in items.iter().enumerate() {
                if values_equal(vm, item, needle)? {
                    return Ok(Value::int(i as i64));
                }
            }
            Err(ExceptionState::new(ExcKind::ValueError, "x not in list"))
        }),
        _ => return None,
    };
    Some(method)
}
