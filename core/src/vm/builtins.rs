use std::rc::Rc;

use crate::exc::{ExcKind, ExceptionState, RtResult, system_error};
use crate::op::{self, IterStep};
use crate::val::{Dict, NativeKind, Object, RangeIter, Slot, TypeKind, TypeObject, Value, native_type};
use crate::vm::Vm;

const TYPE_NAMES: &[NativeKind] = &[
    NativeKind::Object,
    NativeKind::Bool,
    NativeKind::Int,
    NativeKind::Float,
    NativeKind::Complex,
    NativeKind::Str,
    NativeKind::Tuple,
    NativeKind::List,
    NativeKind::Dict,
    NativeKind::Type,
];

fn type_error(msg: impl Into<String>) -> ExceptionState {
    ExceptionState::new(ExcKind::TypeError, msg)
}

fn expect_args(name: &str, args: &[Value], kwargs: &[(Value, Value)], min: usize, max: usize) -> RtResult<()> {
    if !kwargs.is_empty() {
        return Err(type_error(format!("{name}() takes no keyword arguments")));
    }
    let given = args.len();
    if given < min || given > max {
        let expected = if min == max {
            format!("exactly {min} argument{}", if min == 1 { "" } else { "s" })
        } else if given < min {
            format!("at least {min} argument{}", if min == 1 { "" } else { "s" })
        } else {
            format!("at most {max} argument{}", if max == 1 { "" } else { "s" })
        };
        return Err(type_error(format!("{name}() takes {expected} ({given} given)")));
    }
    Ok(())
}

/// Fills `ns` with the builtin functions, types and exception classes.
pub fn install(ns: &crate::val::Namespace) {
    for kind in TYPE_NAMES {
        ns.set(kind.name(), Value::type_object(native_type(*kind)));
    }
    for kind in ExcKind::ALL {
        ns.set(kind.name(), Value::type_object(kind.type_object()));
    }
    ns.set("None", Value::none());
    ns.set("True", Value::bool(true));
    ns.set("False", Value::bool(false));
    ns.set("NotImplemented", Value::not_implemented());

    ns.set(
        "len",
        Value::native("len", |vm, args, kw| {
            expect_args("len", args, kw, 1, 1)?;
            Ok(Value::int(len(vm, &args[0])? as i64))
        }),
    );
    ns.set(
        "iter",
        Value::native("iter", |vm, args, kw| {
            expect_args("iter", args, kw, 1, 1)?;
            op::get_iter(vm, &args[0])
        }),
    );
    ns.set(
        "next",
        Value::native("next", |vm, args, kw| {
            expect_args("next", args, kw, 1, 2)?;
            match op::iter_next(vm, &args[0])? {
                IterStep::Yielded(v) => Ok(v),
                IterStep::Exhausted => match args.get(1) {
                    Some(default) => Ok(default.clone()),
                    None => Err(ExceptionState::with_args(ExcKind::StopIteration, Vec::new())),
                },
            }
        }),
    );
    ns.set(
        "range",
        Value::native("range", |_vm, args, kw| {
            let (start, stop, step) = range_args("range", args, kw)?;
            let mut items = Vec::new();
            let mut it = RangeIter::new(start, stop, step);
            while let Some(v) = crate::val::IterState::next(&mut it)? {
                items.push(v);
            }
            Ok(Value::list(items))
        }),
    );
    ns.set(
        "xrange",
        Value::native("xrange", |_vm, args, kw| {
            let (start, stop, step) = range_args("xrange", args, kw)?;
            Ok(Value::iter(RangeIter::new(start, stop, step)))
        }),
    );
    ns.set(
        "repr",
        Value::native("repr", |vm, args, kw| {
            expect_args("repr", args, kw, 1, 1)?;
            Ok(Value::str(op::repr(vm, &args[0])?))
        }),
    );
    ns.set(
        "isinstance",
        Value::native("isinstance", |_vm, args, kw| {
            expect_args("isinstance", args, kw, 2, 2)?;
            Ok(Value::bool(isinstance(&args[0], &args[1])?))
        }),
    );
    ns.set(
        "getattr",
        Value::native("getattr", |vm, args, kw| {
            expect_args("getattr", args, kw, 2, 3)?;
            let name = args[1]
                .as_str()
                .ok_or_else(|| type_error("getattr(): attribute name must be string"))?;
            match op::get_attr(vm, &args[0], name) {
                Ok(v) => Ok(v),
                Err(exc) if exc.matches(ExcKind::AttributeError) && args.len() == 3 => Ok(args[2].clone()),
                Err(exc) => Err(exc),
            }
        }),
    );
    ns.set(
        "setattr",
        Value::native("setattr", |vm, args, kw| {
            expect_args("setattr", args, kw, 3, 3)?;
            let name = args[1]
                .as_str()
                .ok_or_else(|| type_error("setattr(): attribute name must be string"))?;
            op::set_attr(vm, &args[0], name, &args[2])?;
            Ok(Value::none())
        }),
    );
    ns.set(
        "hasattr",
        Value::native("hasattr", |vm, args, kw| {
            expect_args("hasattr", args, kw, 2, 2)?;
            let name = args[1]
                .as_str()
                .ok_or_else(|| type_error("hasattr(): attribute name must be string"))?;
            Ok(Value::bool(op::get_attr(vm, &args[0], name).is_ok()))
        }),
    );
}

/// `len(v)`.
pub fn len(vm: &mut Vm, v: &Value) -> RtResult<usize> {
    if v.heap_type().is_some() {
        if let Some(result) = op::call_slot(vm, v, Slot::Len, &[])? {
            let n = result
                .as_int()
                .ok_or_else(|| type_error("an integer is required"))?;
            if n < 0 {
                return Err(ExceptionState::new(ExcKind::ValueError, "__len__() should return >= 0"));
            }
            return Ok(n as usize);
        }
    }
    match v.obj() {
        Object::Str(s) => Ok(s.chars().count()),
        Object::Tuple(items) => Ok(items.len()),
        Object::List(items) => Ok(items.borrow().len()),
        Object::Dict(dict) => Ok(dict.borrow().len()),
        _ => Err(type_error(format!("object of type '{}' has no len()", v.type_name()))),
    }
}

fn range_args(name: &str, args: &[Value], kw: &[(Value, Value)]) -> RtResult<(i64, i64, i64)> {
    expect_args(name, args, kw, 1, 3)?;
    let ints = args
        .iter()
        .map(|a| match a.obj() {
            Object::Int(_) | Object::Bool(_) => Ok(a.as_int().unwrap_or_default()),
            _ => Err(type_error(format!(
                "{name}() integer end argument expected, got {}.",
                a.type_name()
            ))),
        })
        .collect::<RtResult<Vec<i64>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(system_error("range arity")),
    };
    if step == 0 {
        return Err(ExceptionState::new(
            ExcKind::ValueError,
            format!("{name}() step argument must not be zero"),
        ));
    }
    Ok((start, stop, step))
}

fn isinstance(v: &Value, class: &Value) -> RtResult<bool> {
    match class.obj() {
        Object::Type(ty) => Ok(v.is_instance_of(ty)),
        Object::Tuple(items) => {
            for item in items {
                if isinstance(v, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(type_error(
            "isinstance() arg 2 must be a class, type, or tuple of classes and types",
        )),
    }
}

/// Calling one of the built-in type objects.
pub(crate) fn construct_native(
    vm: &mut Vm,
    ty: &Rc<TypeObject>,
    args: &[Value],
    kwargs: &[(Value, Value)],
) -> RtResult<Value> {
    let TypeKind::Native(kind) = ty.kind() else {
        return Err(type_error(format!("cannot create '{}' instances", ty.name())));
    };
    let name = kind.name();
    match kind {
        NativeKind::Object => {
            expect_args(name, args, kwargs, 0, 0).map_err(|_| type_error("object() takes no parameters"))?;
            Ok(Value::instance(ty.clone()))
        }
        NativeKind::Bool => {
            expect_args(name, args, kwargs, 0, 1)?;
            match args.first() {
                Some(v) => Ok(Value::bool(op::is_true(vm, v)?)),
                None => Ok(Value::bool(false)),
            }
        }
        NativeKind::Int => {
            expect_args(name, args, kwargs, 0, 1)?;
            args.first().map_or(Ok(Value::int(0)), to_int)
        }
        NativeKind::Float => {
            expect_args(name, args, kwargs, 0, 1)?;
            args.first().map_or(Ok(Value::float(0.0)), to_float)
        }
        NativeKind::Complex => {
            expect_args(name, args, kwargs, 0, 2)?;
            let part = |v: Option<&Value>| -> RtResult<f64> {
                match v {
                    None => Ok(0.0),
                    Some(v) => match to_float(v)?.obj() {
                        Object::Float(f) => Ok(*f),
                        _ => Ok(0.0),
                    },
                }
            };
            Ok(Value::complex(part(args.first())?, part(args.get(1))?))
        }
        NativeKind::Str => {
            expect_args(name, args, kwargs, 0, 1)?;
            match args.first() {
                Some(v) => Ok(Value::str(op::to_str(vm, v)?)),
                None => Ok(Value::str("")),
            }
        }
        NativeKind::Tuple => {
            expect_args(name, args, kwargs, 0, 1)?;
            match args.first() {
                Some(v) if matches!(v.obj(), Object::Tuple(_)) => Ok(v.clone()),
                Some(v) => Ok(Value::tuple(op::collect_iterable(vm, v)?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        NativeKind::List => {
            expect_args(name, args, kwargs, 0, 1)?;
            match args.first() {
                Some(v) => Ok(Value::list(op::collect_iterable(vm, v)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        NativeKind::Dict => {
            if args.len() > 1 {
                return Err(type_error(format!(
                    "dict expected at most 1 arguments, got {}",
                    args.len()
                )));
            }
            let mut dict = Dict::new();
            if let Some(source) = args.first() {
                match source.obj() {
                    Object::Dict(other) => {
                        for (k, v) in other.borrow().iter() {
                            dict.insert(k.clone(), v.clone())?;
                        }
                    }
                    _ => {
                        for (i, pair) in op::collect_iterable(vm, source)?.into_iter().enumerate() {
                            let kv = op::collect_iterable(vm, &pair)?;
                            let [k, v] = <[Value; 2]>::try_from(kv).map_err(|kv| {
                                ExceptionState::new(
                                    ExcKind::ValueError,
                                    format!(
                                        "dictionary update sequence element #{i} has length {}; 2 is required",
                                        kv.len()
                                    ),
                                )
                            })?;
                            dict.insert(k, v)?;
                        }
                    }
                }
            }
            for (k, v) in kwargs {
                dict.insert(k.clone(), v.clone())?;
            }
            Ok(Value::dict(dict))
        }
        NativeKind::Type => {
            expect_args(name, args, kwargs, 1, 1)?;
            Ok(Value::type_object(args[0].type_of()))
        }
        _ => Err(type_error(format!("cannot create '{name}' instances"))),
    }
}

fn to_int(v: &Value) -> RtResult<Value> {
    match v.obj() {
        Object::Int(_) => Ok(v.clone()),
        Object::Bool(b) => Ok(Value::int(*b as i64)),
        Object::Float(f) => {
            if !f.is_finite() {
                let kind = if f.is_nan() { ExcKind::ValueError } else { ExcKind::OverflowError };
                let what = if f.is_nan() { "NaN" } else { "float infinity" };
                return Err(ExceptionState::new(kind, format!("cannot convert {what} to integer")));
            }
            let t = f.trunc();
            if t < i64::MIN as f64 || t >= i64::MAX as f64 {
                return Err(ExceptionState::new(ExcKind::OverflowError, "integer overflow"));
            }
            Ok(Value::int(t as i64))
        }
        Object::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::int)
            .map_err(|_| {
                ExceptionState::new(
                    ExcKind::ValueError,
                    format!("invalid literal for int() with base 10: {}", v.debug_repr()),
                )
            }),
        _ => Err(type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            v.type_name()
        ))),
    }
}

fn to_float(v: &Value) -> RtResult<Value> {
    match v.obj() {
        Object::Float(_) => Ok(v.clone()),
        Object::Int(i) => Ok(Value::float(*i as f64)),
        Object::Bool(b) => Ok(Value::float(*b as i64 as f64)),
        Object::Str(s) => s.trim().parse::<f64>().map(Value::float).map_err(|_| {
            ExceptionState::new(
                ExcKind::ValueError,
                format!("could not convert string to float: {s}"),
            )
        }),
        _ => Err(type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            v.type_name()
        ))),
    }
}
