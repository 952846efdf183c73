use std::rc::Rc;

use super::{call_slot, collect_iterable, get_iter};
use crate::code::CodeUnit;
use crate::exc::{ExcKind, ExceptionState, RtResult};
use crate::val::{Dict, Function, Object, Slot, TypeObject, Value};
use crate::vm::{Vm, builtins};

/// Calls any callable value with positional arguments and keyword pairs.
pub fn call_value(vm: &mut Vm, callable: &Value, args: Vec<Value>, kwargs: Vec<(Value, Value)>) -> RtResult<Value> {
    match callable.obj() {
        Object::Function(func) => vm.invoke_function(func, args, kwargs),
        Object::Native(native) => {
            let func = native.func.clone();
            func(vm, &args, &kwargs)
        }
        Object::BoundMethod(method) => {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(method.receiver.clone());
            full.extend(args);
            call_value(vm, &method.func, full, kwargs)
        }
        Object::Type(ty) => construct(vm, ty, args, kwargs),
        _ => match call_slot_with_kwargs(vm, callable, args, kwargs)? {
            Some(result) => Ok(result),
            None => Err(ExceptionState::new(
                ExcKind::TypeError,
                format!("'{}' object is not callable", callable.type_name()),
            )),
        },
    }
}

fn call_slot_with_kwargs(
    vm: &mut Vm,
    receiver: &Value,
    args: Vec<Value>,
    kwargs: Vec<(Value, Value)>,
) -> RtResult<Option<Value>> {
    if kwargs.is_empty() {
        return call_slot(vm, receiver, Slot::Call, &args);
    }
    let Some(func) = receiver.heap_type().and_then(|ty| ty.lookup_slot(Slot::Call)) else {
        return Ok(None);
    };
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(receiver.clone());
    full.extend(args);
    call_value(vm, &func, full, kwargs).map(Some)
}

/// Instantiates a type object.
fn construct(vm: &mut Vm, ty: &Rc<TypeObject>, args: Vec<Value>, kwargs: Vec<(Value, Value)>) -> RtResult<Value> {
    if ty.is_exception() {
        let init = if ty.is_heap() { ty.lookup_slot(Slot::Init) } else { None };
        let Some(init) = init else {
            if !kwargs.is_empty() {
                return Err(ExceptionState::new(
                    ExcKind::TypeError,
                    format!("{} does not take keyword arguments", ty.name()),
                ));
            }
            return Ok(Value::exception(ty.clone(), args));
        };
        let exc = Value::exception(ty.clone(), args.clone());
        run_init(vm, &init, &exc, args, kwargs)?;
        return Ok(exc);
    }
    if !ty.is_heap() {
        return builtins::construct_native(vm, ty, &args, &kwargs);
    }
    let instance = Value::instance(ty.clone());
    match ty.lookup_slot(Slot::Init) {
        Some(init) => run_init(vm, &init, &instance, args, kwargs)?,
        None if !args.is_empty() || !kwargs.is_empty() => {
            return Err(ExceptionState::new(ExcKind::TypeError, "object() takes no parameters"));
        }
        None => {}
    }
    Ok(instance)
}

fn run_init(vm: &mut Vm, init: &Value, receiver: &Value, args: Vec<Value>, kwargs: Vec<(Value, Value)>) -> RtResult<()> {
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(receiver.clone());
    full.extend(args);
    let result = call_value(vm, init, full, kwargs)?;
    if !result.is_none() {
        return Err(ExceptionState::new(
            ExcKind::TypeError,
            format!("__init__() should return None, not '{}'", result.type_name()),
        ));
    }
    Ok(())
}

/// Name used as the prefix of call-site error messages, e.g. `f()`.
pub fn func_description(callable: &Value) -> String {
    match callable.obj() {
        Object::Function(func) => format!("{}()", func.name),
        Object::Native(native) => format!("{}()", native.name),
        Object::BoundMethod(method) => func_description(&method.func),
        Object::Type(ty) => format!("{}()", ty.name()),
        _ => format!("{} object", callable.type_name()),
    }
}

/// Calls with a trailing `*args` sequence and/or `**kwargs` mapping merged in
/// after the explicit arguments.
pub fn call_with_star(
    vm: &mut Vm,
    callable: &Value,
    mut args: Vec<Value>,
    mut kwargs: Vec<(Value, Value)>,
    star: Option<&Value>,
    starstar: Option<&Value>,
) -> RtResult<Value> {
    if let Some(starstar) = starstar {
        let Object::Dict(extra) = starstar.obj() else {
            return Err(ExceptionState::new(
                ExcKind::TypeError,
                format!(
                    "{} argument after ** must be a mapping, not {}",
                    func_description(callable),
                    starstar.type_name()
                ),
            ));
        };
        let extra: Vec<(Value, Value)> = extra.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (key, value) in extra {
            let Some(name) = key.as_str() else {
                return Err(ExceptionState::new(
                    ExcKind::TypeError,
                    format!("{} keywords must be strings", func_description(callable)),
                ));
            };
            if kwargs.iter().any(|(k, _)| k.as_str() == Some(name)) {
                return Err(ExceptionState::new(
                    ExcKind::TypeError,
                    format!(
                        "{} got multiple values for keyword argument '{name}'",
                        func_description(callable)
                    ),
                ));
            }
            kwargs.push((key, value));
        }
    }
    if let Some(star) = star {
        match star.obj() {
            Object::Tuple(items) => args.extend(items.iter().cloned()),
            Object::List(items) => args.extend(items.borrow().iter().cloned()),
            _ => {
                if let Err(exc) = get_iter(vm, star) {
                    if exc.matches(ExcKind::TypeError) {
                        return Err(ExceptionState::new(
                            ExcKind::TypeError,
                            format!(
                                "{} argument after * must be a sequence, not {}",
                                func_description(callable),
                                star.type_name()
                            ),
                        ));
                    }
                    return Err(exc);
                }
                args.extend(collect_iterable(vm, star)?);
            }
        }
    }
    call_value(vm, callable, args, kwargs)
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Binds call arguments to the fast-local slots of `func`'s code: positional
/// parameters, defaults, then the `*args` tuple and `**kwargs` dict slots.
pub fn bind_arguments(func: &Function, args: Vec<Value>, kwargs: Vec<(Value, Value)>) -> RtResult<Vec<Option<Value>>> {
    let code: &CodeUnit = &func.code;
    let name = code.name.as_str();
    let argcount = code.argcount;
    let defcount = func.defaults.len();
    let given = args.len();
    let kwcount = kwargs.len();
    let mut locals: Vec<Option<Value>> = vec![None; code.varnames.len()];

    if argcount == 0 && !code.has_varargs() && !code.has_varkeywords() && given + kwcount > 0 {
        return Err(ExceptionState::new(
            ExcKind::TypeError,
            format!("{name}() takes no arguments ({} given)", given + kwcount),
        ));
    }

    let mut rest = Vec::new();
    for (i, arg) in args.into_iter().enumerate() {
        if i < argcount {
            locals[i] = Some(arg);
        } else {
            rest.push(arg);
        }
    }
    if !rest.is_empty() && !code.has_varargs() {
        return Err(ExceptionState::new(
            ExcKind::TypeError,
            format!(
                "{name}() takes {} {argcount} argument{} ({} given)",
                if defcount > 0 { "at most" } else { "exactly" },
                plural(argcount),
                given + kwcount
            ),
        ));
    }
    let mut slot = argcount;
    if code.has_varargs() {
        locals[slot] = Some(Value::tuple(rest));
        slot += 1;
    }
    let mut kwdict = code.has_varkeywords().then(Dict::new);

    for (key, value) in kwargs {
        let Some(kw) = key.as_str() else {
            return Err(ExceptionState::new(
                ExcKind::TypeError,
                format!("{name}() keywords must be strings"),
            ));
        };
        match code.varnames[..argcount].iter().position(|v| v == kw) {
            Some(idx) if locals[idx].is_some() => {
                return Err(ExceptionState::new(
                    ExcKind::TypeError,
                    format!("{name}() got multiple values for keyword argument '{kw}'"),
                ));
            }
            Some(idx) => locals[idx] = Some(value),
            None => match kwdict.as_mut() {
                Some(dict) => dict.insert(key.clone(), value)?,
                None => {
                    return Err(ExceptionState::new(
                        ExcKind::TypeError,
                        format!("{name}() got an unexpected keyword argument '{kw}'"),
                    ));
                }
            },
        }
    }
    if let Some(dict) = kwdict {
        locals[slot] = Some(Value::dict(dict));
    }

    let required = argcount.saturating_sub(defcount);
    if locals[..required].iter().any(Option::is_none) {
        let bound = locals[..argcount].iter().filter(|v| v.is_some()).count();
        return Err(ExceptionState::new(
            ExcKind::TypeError,
            format!(
                "{name}() takes {} {required} argument{} ({bound} given)",
                if code.has_varargs() || defcount > 0 { "at least" } else { "exactly" },
                plural(required)
            ),
        ));
    }
    for (i, default) in func.defaults.iter().enumerate() {
        let idx = required + i;
        if idx < argcount && locals[idx].is_none() {
            locals[idx] = Some(default.clone());
        }
    }
    Ok(locals)
}
