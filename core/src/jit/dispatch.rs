use serde::Serialize;

use super::cache::Lookup;
use super::error::CompileError;
use super::exec;
use super::options::OptLevel;
use crate::code::TierState;
use crate::exc::RtResult;
use crate::val::Value;
use crate::vm::{Frame, Vm, interpret};

/// Counters kept per VM and printed by `--stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JitStats {
    pub interpreted_calls: u64,
    pub compiled_calls: u64,
    pub compiles: u64,
    pub cache_hits: u64,
    pub compile_failures: u64,
    pub fallbacks: u64,
}

/// Runs `frame` in the tier its code unit currently selects.
///
/// Compilation is requested when the JIT is enabled and the unit opted in
/// (or `compile_all` is set). A unit that fails to compile at a level runs
/// in the interpreter at that level from then on.
pub fn run_frame(vm: &mut Vm, frame: &mut Frame) -> RtResult<Value> {
    let code = frame.code.clone();
    let config = vm.config();
    if !config.enabled || !(code.use_jit() || config.compile_all) {
        vm.stats.interpreted_calls += 1;
        return interpret(vm, frame);
    }

    let requested = code.resolve_optimization(config.default_level);
    let level = config.clamp_level(requested);
    if code.has_failed(level) {
        code.set_tier_state(TierState::Failed(level));
        vm.stats.fallbacks += 1;
        vm.stats.interpreted_calls += 1;
        return interpret(vm, frame);
    }
    if code.tier_state() != TierState::Compiled(level) {
        code.set_tier_state(TierState::CompileRequested(level));
    }

    let cache = vm.cache().clone();
    let (result, lookup) = cache.get_or_compile(&code, level);
    match lookup {
        Lookup::Hit => vm.stats.cache_hits += 1,
        Lookup::Compiled => vm.stats.compiles += 1,
    }
    match result {
        Ok(artifact) => {
            code.set_tier_state(TierState::Compiled(level));
            vm.stats.compiled_calls += 1;
            exec::execute(vm, frame, &artifact.function)
        }
        Err(err) => {
            if lookup == Lookup::Compiled {
                vm.stats.compile_failures += 1;
                report_compile_failure(&code.name, level, &err);
            }
            code.set_tier_state(TierState::Failed(level));
            vm.stats.fallbacks += 1;
            vm.stats.interpreted_calls += 1;
            interpret(vm, frame)
        }
    }
}

/// Unsupported constructs are an expected fallback. A broken stack
/// discipline is a bug: logged at error level, and fatal in debug builds.
fn report_compile_failure(name: &str, level: OptLevel, err: &CompileError) {
    if err.is_invariant_violation() {
        tracing::error!(code = %name, %level, reason = err.kind(), "compiler invariant violated: {err}");
        if cfg!(debug_assertions) {
            panic!("compiler invariant violated in {name} at {level}: {err}");
        }
    } else {
        tracing::warn!(
            code = %name,
            %level,
            reason = err.kind(),
            "compilation failed, falling back to the interpreter: {err}"
        );
    }
}
