use std::rc::Rc;
use std::sync::Arc;

use super::ir::{Op, Term};
use super::*;
use crate::code::asm::{Program, assemble};
use crate::code::{CodeUnit, Opcode, TierState};
use crate::config::JitConfig;
use crate::val::Value;
use crate::vm::Vm;

const ARITH: &str = "
def arith(a, b):
    LOAD_FAST a
    LOAD_FAST b
    BINARY_ADD
    LOAD_CONST 5
    BINARY_MODULO
    RETURN_VALUE
";

const SAFE_DIV: &str = "
def safe_div(a, b):
    SETUP_EXCEPT handler
    LOAD_FAST a
    LOAD_FAST b
    BINARY_DIVIDE
    STORE_FAST r
    POP_BLOCK
    JUMP_FORWARD done
 handler:
    DUP_TOP
    LOAD_GLOBAL ZeroDivisionError
    COMPARE_OP exception match
    POP_JUMP_IF_FALSE reraise
    POP_TOP
    POP_TOP
    POP_TOP
    LOAD_CONST -1
    STORE_FAST r
    JUMP_FORWARD done
 reraise:
    END_FINALLY
 done:
    LOAD_FAST r
    RETURN_VALUE
";

const TOTAL: &str = "
def total(n):
    LOAD_CONST 0
    STORE_FAST acc
    SETUP_LOOP out
    LOAD_GLOBAL range
    LOAD_FAST n
    CALL_FUNCTION 1
    GET_ITER
 top:
    FOR_ITER end
    STORE_FAST i
    LOAD_FAST acc
    LOAD_FAST i
    INPLACE_ADD
    STORE_FAST acc
    JUMP_ABSOLUTE top
 end:
    POP_BLOCK
 out:
    LOAD_FAST acc
    RETURN_VALUE
";

const GUARDED: &str = "
def guarded(x):
    SETUP_FINALLY fin
    LOAD_FAST x
    STORE_FAST y
    POP_BLOCK
    LOAD_CONST None
 fin:
    END_FINALLY
    LOAD_FAST y
    RETURN_VALUE
";

fn unit(src: &str, name: &str) -> Rc<CodeUnit> {
    let program = assemble(src).expect("assembles");
    program.get(name).expect("unit exists").code.clone()
}

fn terms(func: &ir::Function) -> Vec<&Term> {
    func.blocks.iter().map(|b| &b.term).collect()
}

fn all_ops(func: &ir::Function) -> Vec<&Op> {
    func.blocks.iter().flat_map(|b| b.instrs.iter().map(|i| &i.op)).collect()
}

fn vm_with(config: JitConfig) -> Vm {
    Vm::with_cache(config, Arc::new(ArtifactCache::new(64)))
}

fn compiled_vm(level: OptLevel) -> Vm {
    vm_with(JitConfig {
        compile_all: true,
        default_level: level,
        ..JitConfig::default()
    })
}

fn call(vm: &mut Vm, program: &Program, name: &str, args: Vec<Value>) -> Value {
    let globals = vm.load_program(program).expect("program loads");
    let func = globals.get(name).expect("function bound");
    vm.call(&func, args, Vec::new()).expect("call succeeds")
}

#[test]
fn straight_line_code_lowers_to_one_returning_block() {
    let code = unit(ARITH, "arith");
    let func = lower(&code).expect("lowers");
    let entry = func.block(func.entry);
    assert!(matches!(entry.term, Term::Return(_)));
    assert!(entry.instrs.iter().any(|i| matches!(i.op, Op::Binary { .. })));
    for block in &func.blocks {
        if block.term == Term::Unwind {
            assert!(block.instrs.iter().all(|i| matches!(i.op, Op::Release { .. })));
        }
    }
}

#[test]
fn raising_ops_carry_landing_pads_and_pure_ops_do_not() {
    let code = unit(ARITH, "arith");
    let func = lower(&code).expect("lowers");
    for instr in func.blocks.iter().flat_map(|b| &b.instrs) {
        assert_eq!(instr.unwind.is_some(), instr.op.may_raise(), "{:?}", instr.op);
    }
}

#[test]
fn landing_pads_are_shared_for_identical_stacks() {
    let code = unit(
        "def touch():
            LOAD_GLOBAL a
            POP_TOP
            LOAD_GLOBAL b
            POP_TOP
            LOAD_CONST None
            RETURN_VALUE",
        "touch",
    );
    let func = lower(&code).expect("lowers");
    let unwinds = terms(&func).into_iter().filter(|t| **t == Term::Unwind).count();
    assert_eq!(unwinds, 1);
}

#[test]
fn except_handler_is_entered_through_catch() {
    let code = unit(SAFE_DIV, "safe_div");
    let func = lower(&code).expect("lowers");
    // One pad with `a` still on the stack, one with an empty stack.
    let catches = all_ops(&func).into_iter().filter(|op| matches!(op, Op::Catch { .. })).count();
    assert_eq!(catches, 2);
    assert!(terms(&func).iter().any(|t| matches!(t, Term::Reraise { .. })));

    let divide = func
        .blocks
        .iter()
        .flat_map(|b| &b.instrs)
        .find(|i| matches!(i.op, Op::Binary { .. }))
        .expect("division lowered");
    let pad = func.block(divide.unwind.expect("division can raise"));
    let reaches_catch = pad.instrs.iter().any(|i| matches!(i.op, Op::Catch { .. }))
        || pad
            .term
            .successors()
            .iter()
            .any(|s| func.block(*s).instrs.iter().any(|i| matches!(i.op, Op::Catch { .. })));
    assert!(reaches_catch);
}

#[test]
fn loops_lower_to_for_iter_with_a_back_edge() {
    let code = unit(TOTAL, "total");
    let func = lower(&code).expect("lowers");
    let for_iters = terms(&func)
        .into_iter()
        .filter(|t| matches!(t, Term::ForIter { .. }))
        .count();
    assert_eq!(for_iters, 1);
}

#[test]
fn unsupported_constructs_are_compile_errors() {
    let err = lower(&unit(GUARDED, "guarded")).unwrap_err();
    assert_eq!(
        err,
        CompileError::Unsupported {
            opcode: Opcode::SetupFinally,
            offset: 0
        }
    );
    assert_eq!(err.kind(), "unsupported");

    let body = unit(
        "body main:
            LOAD_CONST 1
            STORE_NAME x
            LOAD_CONST None
            RETURN_VALUE",
        "main",
    );
    assert!(matches!(
        lower(&body),
        Err(CompileError::Unsupported {
            opcode: Opcode::StoreName,
            ..
        })
    ));
}

#[test]
fn mismatched_stack_depths_are_rejected() {
    let code = unit(
        "def lopsided(x):
            LOAD_FAST x
            POP_JUMP_IF_FALSE join
            LOAD_CONST 1
         join:
            LOAD_CONST 2
            RETURN_VALUE",
        "lopsided",
    );
    assert_eq!(
        lower(&code).unwrap_err(),
        CompileError::StackMismatch {
            offset: 9,
            expected: 0,
            found: 1
        }
    );
}

#[test]
fn stack_underflow_is_rejected() {
    let code = unit(
        "def empty():
            POP_TOP
            LOAD_CONST None
            RETURN_VALUE",
        "empty",
    );
    assert_eq!(lower(&code).unwrap_err(), CompileError::StackUnderflow { offset: 0 });
}

#[test]
fn only_stack_discipline_errors_are_invariant_violations() {
    assert!(CompileError::StackUnderflow { offset: 0 }.is_invariant_violation());
    assert!(
        CompileError::StackMismatch {
            offset: 9,
            expected: 0,
            found: 1
        }
        .is_invariant_violation()
    );
    let unsupported = lower(&unit(GUARDED, "guarded")).unwrap_err();
    assert!(!unsupported.is_invariant_violation());
}

#[derive(Clone, Default)]
struct LevelLog(Arc<std::sync::Mutex<Vec<tracing::Level>>>);

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LevelLog {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.0.lock().expect("level log").push(*event.metadata().level());
    }
}

#[test]
fn broken_stack_discipline_is_reported_as_an_error() {
    use tracing_subscriber::layer::SubscriberExt;

    let program = assemble(
        "def empty():
            POP_TOP
            LOAD_CONST None
            RETURN_VALUE",
    )
    .expect("assembles");
    let log = LevelLog::default();
    let subscriber = tracing_subscriber::registry().with(log.clone());

    let outcome = tracing::subscriber::with_default(subscriber, || {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut vm = compiled_vm(OptLevel::O2);
            let globals = vm.load_program(&program).expect("loads");
            let func = globals.get("empty").expect("bound");
            vm.call(&func, Vec::new(), Vec::new())
        }))
    });

    let levels = log.0.lock().expect("level log").clone();
    assert!(levels.contains(&tracing::Level::ERROR), "levels: {levels:?}");
    assert!(!levels.contains(&tracing::Level::WARN), "levels: {levels:?}");
    assert_eq!(outcome.is_err(), cfg!(debug_assertions));
    if let Ok(result) = outcome {
        let err = result.unwrap_err();
        assert_eq!(err.type_name(), "SystemError");
        assert_eq!(err.message(), "operand stack underflow");
    }
}

#[test]
fn unsupported_code_falls_back_with_a_warning() {
    use tracing_subscriber::layer::SubscriberExt;

    let program = assemble(GUARDED).expect("assembles");
    let log = LevelLog::default();
    let subscriber = tracing_subscriber::registry().with(log.clone());
    let out = tracing::subscriber::with_default(subscriber, || {
        let mut vm = compiled_vm(OptLevel::O1);
        call(&mut vm, &program, "guarded", vec![Value::int(3)])
    });
    assert_eq!(out.as_int(), Some(3));
    let levels = log.0.lock().expect("level log").clone();
    assert!(levels.contains(&tracing::Level::WARN), "levels: {levels:?}");
    assert!(!levels.contains(&tracing::Level::ERROR), "levels: {levels:?}");
}

#[test]
fn decode_errors_surface_as_compile_errors() {
    let mut builder = crate::code::CodeBuilder::new("broken");
    builder.code = vec![0xff];
    let code = builder.build();
    let err = compile(&code, OptLevel::O2).unwrap_err();
    assert_eq!(err.kind(), "decode");
}

#[test]
fn o0_runs_no_passes() {
    let code = unit(TOTAL, "total");
    let artifact = compile(&code, OptLevel::O0).expect("compiles");
    assert_eq!(artifact.function, lower(&code).expect("lowers"));
    assert_eq!(artifact.passes, PassStats::default());
}

#[test]
fn higher_levels_never_grow_the_function() {
    let code = unit(SAFE_DIV, "safe_div");
    let sizes: Vec<usize> = OptLevel::ALL
        .iter()
        .map(|level| compile(&code, *level).expect("compiles").function.blocks.len())
        .collect();
    assert!(sizes.windows(2).all(|w| w[1] <= w[0]), "{sizes:?}");

    let o1 = compile(&code, OptLevel::O1).expect("compiles");
    assert_eq!(o1.passes.rounds, 1);
    assert!(o1.passes.threaded_jumps + o1.passes.merged_blocks > 0);
}

#[test]
fn dead_values_are_elided_at_o2() {
    let code = unit(
        "def touch(x):
            LOAD_FAST x
            POP_TOP
            LOAD_CONST 1
            POP_TOP
            LOAD_CONST None
            RETURN_VALUE",
        "touch",
    );
    let o1 = compile(&code, OptLevel::O1).expect("compiles");
    assert!(!all_ops(&o1.function).iter().any(|op| matches!(op, Op::CheckLocal { .. })));

    let o2 = compile(&code, OptLevel::O2).expect("compiles");
    assert_eq!(o2.passes.elided_values, 2);
    let ops = all_ops(&o2.function);
    assert!(ops.iter().any(|op| matches!(op, Op::CheckLocal { idx: 0 })));
    assert!(!ops.iter().any(|op| matches!(op, Op::Release { .. })));
}

#[test]
fn constant_branches_fold_at_o2() {
    let code = unit(
        "def folded():
            LOAD_CONST True
            POP_JUMP_IF_FALSE no
            LOAD_CONST 1
            RETURN_VALUE
         no:
            LOAD_CONST 2
            RETURN_VALUE",
        "folded",
    );
    let artifact = compile(&code, OptLevel::O2).expect("compiles");
    assert_eq!(artifact.passes.folded_branches, 1);
    let func = &artifact.function;
    assert!(!terms(func).iter().any(|t| matches!(t, Term::Branch { .. })));
    assert_eq!(terms(func).iter().filter(|t| matches!(t, Term::Return(_))).count(), 1);

    let o3 = compile(&code, OptLevel::O3).expect("compiles");
    assert!(o3.passes.rounds >= 2);
}

#[test]
fn rendering_shows_helpers_and_unwind_edges() {
    let code = unit(ARITH, "arith");
    let artifact = compile(&code, OptLevel::O2).expect("compiles");
    let text = artifact.render(&code);
    assert!(text.starts_with("; ModuleID = 'swallow.arith'"));
    assert!(text.contains(&format!("define i64 @\"sw_jit.arith.{}\"()", code.id().get())));
    assert!(text.contains("declare i64 @sw_rt_binary(i32, i64, i64)"));
    assert!(text.contains("invoke i64 @sw_rt_binary"));
    assert!(text.contains("unwind label %bb"));
    assert!(text.contains("; entry"));
    assert!(text.contains("ret i64"));

    let summary = artifact.summary();
    assert_eq!(summary.name, "arith");
    assert_eq!(summary.level, OptLevel::O2);
    assert_eq!(summary.blocks, artifact.function.blocks.len());
}

#[test]
fn cache_compiles_once_per_level() {
    let cache = Arc::new(ArtifactCache::new(8));
    let code = unit(ARITH, "arith");
    let (first, lookup) = cache.get_or_compile(&code, OptLevel::O2);
    assert_eq!(lookup, Lookup::Compiled);
    let (second, lookup) = cache.get_or_compile(&code, OptLevel::O2);
    assert_eq!(lookup, Lookup::Hit);
    assert!(Arc::ptr_eq(&first.expect("compiles"), &second.expect("compiles")));

    let (_, lookup) = cache.get_or_compile(&code, OptLevel::O0);
    assert_eq!(lookup, Lookup::Compiled);
    assert_eq!(cache.len(), 2);
    assert!(cache.contains(code.id(), OptLevel::O0));
    assert!(!cache.contains(code.id(), OptLevel::O3));
}

#[test]
fn cache_keeps_failures() {
    let cache = Arc::new(ArtifactCache::new(8));
    let code = unit(GUARDED, "guarded");
    let (result, lookup) = cache.get_or_compile(&code, OptLevel::O1);
    assert!(result.is_err());
    assert_eq!(lookup, Lookup::Compiled);
    let (_, lookup) = cache.get_or_compile(&code, OptLevel::O1);
    assert_eq!(lookup, Lookup::Hit);
    assert!(matches!(cache.get(code.id(), OptLevel::O1), Some(Err(_))));
}

#[test]
fn cache_evicts_oldest_first() {
    let cache = Arc::new(ArtifactCache::new(2));
    let a = unit(ARITH, "arith");
    let b = unit(TOTAL, "total");
    let c = unit(SAFE_DIV, "safe_div");
    for code in [&a, &b, &c] {
        let (result, _) = cache.get_or_compile(code, OptLevel::O2);
        assert!(result.is_ok());
    }
    assert_eq!(cache.len(), 2);
    assert!(!cache.contains(a.id(), OptLevel::O2));
    assert!(cache.contains(b.id(), OptLevel::O2));
    assert!(cache.contains(c.id(), OptLevel::O2));

    let (_, lookup) = cache.get_or_compile(&a, OptLevel::O2);
    assert_eq!(lookup, Lookup::Compiled);
}

#[test]
fn dropping_a_code_unit_invalidates_its_artifacts() {
    let cache = Arc::new(ArtifactCache::new(8));
    let code = unit(ARITH, "arith");
    let id = code.id();
    for level in OptLevel::ALL {
        let (result, _) = cache.get_or_compile(&code, level);
        assert!(result.is_ok());
    }
    assert_eq!(cache.len(), 4);
    drop(code);
    assert!(cache.is_empty());
    assert!(cache.get(id, OptLevel::O2).is_none());
}

#[test]
fn cache_clear_and_invalidate() {
    let cache = Arc::new(ArtifactCache::new(8));
    let a = unit(ARITH, "arith");
    let b = unit(TOTAL, "total");
    let _ = cache.get_or_compile(&a, OptLevel::O2);
    let _ = cache.get_or_compile(&b, OptLevel::O2);
    cache.invalidate(a.id());
    assert_eq!(cache.len(), 1);
    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.capacity(), 8);
}

#[test]
fn dispatch_compiles_on_first_call_and_hits_after() {
    let program = assemble(ARITH).expect("assembles");
    let code = program.get("arith").expect("unit").code.clone();
    let mut vm = compiled_vm(OptLevel::O2);
    let globals = vm.load_program(&program).expect("loads");
    let func = globals.get("arith").expect("bound");

    let out = vm.call(&func, vec![Value::int(3), Value::int(4)], Vec::new()).expect("runs");
    assert_eq!(out.as_int(), Some(2));
    assert_eq!(code.tier_state(), TierState::Compiled(OptLevel::O2));
    let out = vm.call(&func, vec![Value::int(9), Value::int(9)], Vec::new()).expect("runs");
    assert_eq!(out.as_int(), Some(3));

    let stats = *vm.stats();
    assert_eq!(stats.compiles, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.compiled_calls, 2);
    assert_eq!(stats.interpreted_calls, 0);
}

#[test]
fn dispatch_falls_back_after_a_failed_compile() {
    let program = assemble(GUARDED).expect("assembles");
    let code = program.get("guarded").expect("unit").code.clone();
    let mut vm = compiled_vm(OptLevel::O2);
    let globals = vm.load_program(&program).expect("loads");
    let func = globals.get("guarded").expect("bound");

    for _ in 0..2 {
        let out = vm.call(&func, vec![Value::int(7)], Vec::new()).expect("runs");
        assert_eq!(out.as_int(), Some(7));
        assert_eq!(code.tier_state(), TierState::Failed(OptLevel::O2));
    }
    let stats = *vm.stats();
    assert_eq!(stats.compile_failures, 1);
    assert_eq!(stats.fallbacks, 2);
    assert_eq!(stats.interpreted_calls, 2);
    assert_eq!(stats.compiled_calls, 0);
}

#[test]
fn disabled_jit_always_interprets() {
    let program = assemble(ARITH).expect("assembles");
    let code = program.get("arith").expect("unit").code.clone();
    code.set_use_jit(true);
    let mut vm = vm_with(JitConfig {
        enabled: false,
        compile_all: true,
        ..JitConfig::default()
    });
    let out = call(&mut vm, &program, "arith", vec![Value::int(1), Value::int(2)]);
    assert_eq!(out.as_int(), Some(3));
    assert_eq!(code.tier_state(), TierState::Interpreted);
    assert_eq!(vm.stats().interpreted_calls, 1);
    assert!(vm.cache().is_empty());
}

#[test]
fn only_opted_in_units_compile_without_compile_all() {
    let program = assemble(&format!("{ARITH}\n{TOTAL}")).expect("assembles");
    let arith = program.get("arith").expect("unit").code.clone();
    let total = program.get("total").expect("unit").code.clone();
    total.set_use_jit(true);
    total.set_optimization(Some(OptLevel::O1));

    let mut vm = vm_with(JitConfig::default());
    let globals = vm.load_program(&program).expect("loads");
    let arith_fn = globals.get("arith").expect("bound");
    let total_fn = globals.get("total").expect("bound");
    vm.call(&arith_fn, vec![Value::int(1), Value::int(1)], Vec::new())
        .expect("runs");
    let out = vm.call(&total_fn, vec![Value::int(5)], Vec::new()).expect("runs");
    assert_eq!(out.as_int(), Some(10));

    assert_eq!(arith.tier_state(), TierState::Interpreted);
    assert_eq!(total.tier_state(), TierState::Compiled(OptLevel::O1));
}

#[test]
fn requested_levels_are_clamped() {
    let program = assemble(ARITH).expect("assembles");
    let code = program.get("arith").expect("unit").code.clone();
    let mut vm = vm_with(JitConfig {
        compile_all: true,
        default_level: OptLevel::O3,
        max_level: OptLevel::O1,
        ..JitConfig::default()
    });
    call(&mut vm, &program, "arith", vec![Value::int(1), Value::int(1)]);
    assert_eq!(code.optimization(), Some(OptLevel::O3));
    assert_eq!(code.tier_state(), TierState::Compiled(OptLevel::O1));
    assert!(vm.cache().contains(code.id(), OptLevel::O1));
}

#[test]
fn opt_levels_parse_from_flags_and_digits() {
    assert_eq!("2".parse::<OptLevel>(), Ok(OptLevel::O2));
    assert_eq!("-O3".parse::<OptLevel>(), Ok(OptLevel::O3));
    assert_eq!("o1".parse::<OptLevel>(), Ok(OptLevel::O1));
    assert!("O4".parse::<OptLevel>().is_err());
    assert_eq!(OptLevel::O0.as_flag(), "-O0");
    assert_eq!(OptLevel::default(), OptLevel::O2);
}
