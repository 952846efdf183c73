use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use swallow_core::code::asm::assemble;
use swallow_core::{ArtifactCache, JitConfig, OptLevel, Value, Vm};

const PROGRAM: &str = "
def fib(n):
    LOAD_FAST n
    LOAD_CONST 2
    COMPARE_OP <
    POP_JUMP_IF_FALSE recurse
    LOAD_FAST n
    RETURN_VALUE
 recurse:
    LOAD_GLOBAL fib
    LOAD_FAST n
    LOAD_CONST 1
    BINARY_SUBTRACT
    CALL_FUNCTION 1
    LOAD_GLOBAL fib
    LOAD_FAST n
    LOAD_CONST 2
    BINARY_SUBTRACT
    CALL_FUNCTION 1
    BINARY_ADD
    RETURN_VALUE

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

fn tier_vm(level: Option<OptLevel>) -> Vm {
    let config = match level {
        None => JitConfig {
            enabled: false,
            ..JitConfig::default()
        },
        Some(level) => JitConfig {
            compile_all: true,
            default_level: level,
            ..JitConfig::default()
        },
    };
    Vm::with_cache(config, Arc::new(ArtifactCache::new(64)))
}

fn bench_tiers(c: &mut Criterion) {
    let tiers = [("interp", None), ("o0", Some(OptLevel::O0)), ("o2", Some(OptLevel::O2))];
    for (entry, arg) in [("fib", 15), ("total", 2000)] {
        let mut group = c.benchmark_group(format!("tier_{entry}"));
        for (label, level) in tiers {
            let mut vm = tier_vm(level);
            let program = assemble(PROGRAM).expect("bench program assembles");
            let globals = vm.load_program(&program).expect("bench program loads");
            let func = globals.get(entry).expect("entry bound");
            // First call compiles; measure steady state.
            vm.call(&func, vec![Value::int(arg)], Vec::new()).expect("warm-up call");
            group.bench_function(label, |b| {
                b.iter(|| {
                    let out = vm.call(&func, vec![Value::int(black_box(arg))], Vec::new());
                    black_box(out.expect("call succeeds"))
                })
            });
        }
        group.finish();
    }
}

fn bench_compile(c: &mut Criterion) {
    let program = assemble(PROGRAM).expect("bench program assembles");
    let code = program.get("total").expect("unit").code.clone();
    c.bench_function("compile_total_o3", |b| {
        b.iter(|| black_box(swallow_core::jit::compile(&code, OptLevel::O3).expect("compiles")))
    });
}

criterion_group!(benches, bench_tiers, bench_compile);
criterion_main!(benches);
