use std::rc::Rc;
use std::sync::Arc;

pub(super) use crate::code::asm::assemble;
pub(super) use crate::config::JitConfig;
pub(super) use crate::exc::{ExcKind, ExceptionState, RtResult};
pub(super) use crate::jit::ArtifactCache;
pub(super) use crate::op;
pub(super) use crate::val::{Namespace, Value};
pub(super) use crate::vm::Vm;

/// A VM that never compiles, with a private cache.
pub(super) fn interp_vm() -> Vm {
    let config = JitConfig {
        enabled: false,
        ..JitConfig::default()
    };
    Vm::with_cache(config, Arc::new(ArtifactCache::new(16)))
}

pub(super) fn load(vm: &mut Vm, src: &str) -> Rc<Namespace> {
    let program = assemble(src).unwrap();
    vm.load_program(&program).unwrap()
}

pub(super) fn call(vm: &mut Vm, globals: &Namespace, name: &str, args: Vec<Value>) -> RtResult<Value> {
    let func = globals.get(name).unwrap_or_else(|| panic!("{name} is not bound"));
    vm.call(&func, args, Vec::new())
}

/// Loads `src` into a fresh interpreter VM and returns `repr(name(*args))`.
pub(super) fn run_repr(src: &str, name: &str, args: Vec<Value>) -> String {
    let mut vm = interp_vm();
    let globals = load(&mut vm, src);
    let out = call(&mut vm, &globals, name, args).unwrap();
    op::repr(&mut vm, &out).unwrap()
}

pub(super) fn run_err(src: &str, name: &str, args: Vec<Value>) -> ExceptionState {
    let mut vm = interp_vm();
    let globals = load(&mut vm, src);
    call(&mut vm, &globals, name, args).unwrap_err()
}

mod control_flow;
mod functions;
mod semantics;
