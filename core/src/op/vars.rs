use crate::exc::{ExcKind, ExceptionState, RtResult};
use crate::val::{Namespace, Value};

pub fn unbound_local(name: &str) -> ExceptionState {
    ExceptionState::new(
        ExcKind::UnboundLocalError,
        format!("local variable '{name}' referenced before assignment"),
    )
}

pub fn global_not_defined(name: &str) -> ExceptionState {
    ExceptionState::new(ExcKind::NameError, format!("global name '{name}' is not defined"))
}

pub fn name_not_defined(name: &str) -> ExceptionState {
    ExceptionState::new(ExcKind::NameError, format!("name '{name}' is not defined"))
}

pub fn unbound_free(name: &str) -> ExceptionState {
    ExceptionState::new(
        ExcKind::NameError,
        format!("free variable '{name}' referenced before assignment in enclosing scope"),
    )
}

/// Globals first, then builtins.
pub fn load_global(globals: &Namespace, builtins: &Namespace, name: &str) -> RtResult<Value> {
    globals
        .get(name)
        .or_else(|| builtins.get(name))
        .ok_or_else(|| global_not_defined(name))
}
