use super::*;
use crate::val::Dict;

const PACK: &str = "
def pack(a, b=2, *rest, **kw):
    LOAD_FAST a
    LOAD_FAST b
    LOAD_FAST rest
    LOAD_FAST kw
    BUILD_TUPLE 4
    RETURN_VALUE

def call_kw():
    LOAD_GLOBAL pack
    LOAD_CONST 1
    LOAD_CONST 'b'
    LOAD_CONST 7
    CALL_FUNCTION 1, 1
    RETURN_VALUE

def apply(f, args, kw):
    LOAD_FAST f
    LOAD_FAST args
    LOAD_FAST kw
    CALL_FUNCTION_VAR_KW 0
    RETURN_VALUE
";

#[test]
fn defaults_varargs_and_keywords_bind() {
    let mut vm = interp_vm();
    let globals = load(&mut vm, PACK);
    let pack = globals.get("pack").unwrap();

    let out = vm.call(&pack, vec![Value::int(1)], Vec::new()).unwrap();
    assert_eq!(out.debug_repr(), "(1, 2, (), {})");

    let out = vm
        .call(
            &pack,
            vec![Value::int(1), Value::int(2), Value::int(3)],
            vec![(Value::str("z"), Value::int(9))],
        )
        .unwrap();
    assert_eq!(out.debug_repr(), "(1, 2, (3,), {'z': 9})");

    let out = call(&mut vm, &globals, "call_kw", vec![]).unwrap();
    assert_eq!(out.debug_repr(), "(1, 7, (), {})");
}

#[test]
fn star_call_spreads_sequences_and_mappings() {
    let mut vm = interp_vm();
    let globals = load(&mut vm, PACK);
    let pack = globals.get("pack").unwrap();
    let mut kw = Dict::new();
    kw.insert(Value::str("b"), Value::int(5)).unwrap();
    kw.insert(Value::str("extra"), Value::str("x")).unwrap();
    let args = Value::tuple(vec![Value::int(0)]);

    let out = call(&mut vm, &globals, "apply", vec![pack, args, Value::dict(kw)]).unwrap();
    assert_eq!(out.debug_repr(), "(0, 5, (), {'extra': 'x'})");
}

#[test]
fn argument_errors_name_the_function() {
    let mut vm = interp_vm();
    let globals = load(&mut vm, PACK);
    let pack = globals.get("pack").unwrap();

    let err = vm.call(&pack, Vec::new(), Vec::new()).unwrap_err();
    assert!(err.matches(ExcKind::TypeError));
    assert_eq!(err.message(), "pack() takes at least 1 argument (0 given)");

    let err = vm
        .call(&pack, vec![Value::int(1)], vec![(Value::str("a"), Value::int(2))])
        .unwrap_err();
    assert_eq!(err.message(), "pack() got multiple values for keyword argument 'a'");

    let err = call(&mut vm, &globals, "call_kw", vec![Value::int(1)]).unwrap_err();
    assert_eq!(err.message(), "call_kw() takes no arguments (1 given)");
}

#[test]
fn closures_share_cells_with_their_maker() {
    let src = "
def make_adder(n):
    .cellvars n
    LOAD_CLOSURE n
    BUILD_TUPLE 1
    LOAD_CONST @adder
    MAKE_CLOSURE 0
    RETURN_VALUE

def adder(x):
    .freevars n
    LOAD_FAST x
    LOAD_DEREF n
    BINARY_ADD
    RETURN_VALUE
";
    let mut vm = interp_vm();
    let globals = load(&mut vm, src);
    let add10 = call(&mut vm, &globals, "make_adder", vec![Value::int(10)]).unwrap();
    let out = vm.call(&add10, vec![Value::int(5)], Vec::new()).unwrap();
    assert_eq!(out.as_int(), Some(15));
}

#[test]
fn make_function_takes_defaults_from_the_stack() {
    let src = "
def maker():
    LOAD_CONST 4
    LOAD_CONST @twice
    MAKE_FUNCTION 1
    RETURN_VALUE

def twice(v):
    LOAD_FAST v
    LOAD_CONST 2
    BINARY_MULTIPLY
    RETURN_VALUE
";
    let mut vm = interp_vm();
    let globals = load(&mut vm, src);
    let twice = call(&mut vm, &globals, "maker", vec![]).unwrap();
    assert_eq!(vm.call(&twice, Vec::new(), Vec::new()).unwrap().as_int(), Some(8));
    assert_eq!(vm.call(&twice, vec![Value::int(21)], Vec::new()).unwrap().as_int(), Some(42));
}

#[test]
fn recursion_is_bounded() {
    let src = "
def forever(n):
    LOAD_GLOBAL forever
    LOAD_FAST n
    CALL_FUNCTION 1
    RETURN_VALUE
";
    let mut vm = interp_vm();
    vm.config_mut().recursion_limit = 50;
    let globals = load(&mut vm, src);
    let err = call(&mut vm, &globals, "forever", vec![Value::int(0)]).unwrap_err();
    assert!(err.matches(ExcKind::RuntimeError));
    assert_eq!(err.message(), "maximum recursion depth exceeded");
    assert_eq!(vm.call_stack_depth(), 0);
}

#[test]
fn recursive_fib() {
    let src = "
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
";
    assert_eq!(run_repr(src, "fib", vec![Value::int(15)]), "610");
}

#[test]
fn module_bodies_run_at_load_against_globals() {
    let src = "
def answer():
    LOAD_CONST 42
    RETURN_VALUE

body main:
    LOAD_NAME answer
    CALL_FUNCTION 0
    STORE_NAME result
    LOAD_CONST None
    RETURN_VALUE
";
    let mut vm = interp_vm();
    let globals = load(&mut vm, src);
    assert_eq!(globals.get("result").and_then(|v| v.as_int()), Some(42));
}

#[test]
fn natives_are_callable_like_functions() {
    let mut vm = interp_vm();
    let len = vm.builtins().get("len").unwrap();
    let out = vm.call(&len, vec![Value::str("abc")], Vec::new()).unwrap();
    assert_eq!(out.as_int(), Some(3));

    let range = vm.builtins().get("range").unwrap();
    let err = vm.call(&range, vec![Value::int(0), Value::int(5), Value::int(0)], Vec::new()).unwrap_err();
    assert!(err.matches(ExcKind::ValueError));
}
