use crate::code::CodeUnit;
use crate::exc::{ExcKind, ExceptionState};
use crate::op::call_value;
use crate::val::{Object, Value};
use crate::vm::Vm;

/// An exception on its way out of an instruction.
#[derive(Debug, Clone)]
pub(crate) struct Raised {
    pub state: ExceptionState,
    /// Set for a bare `raise` and for `END_FINALLY` re-raising: the
    /// traceback already names this frame and gets no new entry.
    pub reraise: bool,
}

impl Raised {
    pub fn fresh(state: ExceptionState) -> Self {
        Self { state, reraise: false }
    }

    pub fn reraised(state: ExceptionState) -> Self {
        Self { state, reraise: true }
    }
}

impl From<ExceptionState> for Raised {
    fn from(state: ExceptionState) -> Self {
        Raised::fresh(state)
    }
}

/// Adds the traceback entry for `code` at `offset` unless this is a re-raise.
pub(crate) fn record_frame(raised: &mut Raised, code: &CodeUnit, offset: usize) {
    if !raised.reraise {
        raised.state.push_frame(&code.name, offset);
    }
    raised.reraise = false;
}

/// Values a handler finds on the stack, in push order: traceback, value,
/// type. Entering an `except` clause also makes the exception the handled
/// one.
pub(crate) fn enter_handler(vm: &mut Vm, state: &ExceptionState, except: bool) -> [Value; 3] {
    if except {
        vm.handled = Some(state.clone());
    }
    [
        state.traceback_value(),
        state.value().clone(),
        Value::type_object(state.type_object()),
    ]
}

/// `END_FINALLY` with an exception triple on the stack.
pub(crate) fn reraise_triple(value: Value, traceback: Value) -> Raised {
    let tb = (!traceback.is_none()).then_some(traceback);
    Raised::reraised(ExceptionState::with_traceback(value, tb))
}

fn bad_exception(kind: &Value) -> ExceptionState {
    ExceptionState::new(
        ExcKind::TypeError,
        format!(
            "exceptions must be old-style classes or derived from BaseException, not {}",
            kind.type_name()
        ),
    )
}

/// `RAISE_VARARGS` with its operands in stack order (`type, value, tb`).
pub(crate) fn do_raise(vm: &mut Vm, mut args: Vec<Value>) -> Raised {
    if args.is_empty() {
        return match vm.handled.clone() {
            Some(state) => Raised::reraised(state),
            None => Raised::fresh(bad_exception(&Value::none())),
        };
    }
    let traceback = if args.len() == 3 { args.pop() } else { None };
    let value = if args.len() == 2 { args.pop() } else { None };
    let kind = args.remove(0);

    let traceback = match traceback {
        Some(tb) if tb.is_none() => None,
        Some(tb) if matches!(tb.obj(), Object::Traceback(_)) => Some(tb),
        Some(_) => {
            return Raised::fresh(ExceptionState::new(
                ExcKind::TypeError,
                "raise: arg 3 must be a traceback or None",
            ));
        }
        None => None,
    };
    let value = value.filter(|v| !v.is_none());

    let instance = match kind.obj() {
        Object::Type(ty) if ty.is_exception() => match value {
            Some(v) if v.is_instance_of(ty) => v,
            other => {
                let ctor_args = match other {
                    None => Vec::new(),
                    Some(v) => match v.obj() {
                        Object::Tuple(items) => items.clone(),
                        _ => vec![v],
                    },
                };
                match call_value(vm, &kind, ctor_args, Vec::new()) {
                    Ok(instance) => instance,
                    Err(state) => return Raised::fresh(state),
                }
            }
        },
        Object::Exception(_) => {
            if value.is_some() {
                return Raised::fresh(ExceptionState::new(
                    ExcKind::TypeError,
                    "instance exception may not have a separate value",
                ));
            }
            kind
        }
        _ => return Raised::fresh(bad_exception(&kind)),
    };
    if !instance.is_exception_instance() {
        return Raised::fresh(bad_exception(&instance));
    }
    Raised::fresh(ExceptionState::with_traceback(instance, traceback))
}
