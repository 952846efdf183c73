use super::*;
use crate::val::TypeObject;

#[path = "../../../tests/common/mod.rs"]
mod common;

use common::BOX;

#[test]
fn unbound_local_names_the_variable() {
    let src = "
def unbound(flag):
    LOAD_FAST flag
    POP_JUMP_IF_FALSE skip
    LOAD_CONST 1
    STORE_FAST x
 skip:
    LOAD_FAST x
    RETURN_VALUE
";
    assert_eq!(run_repr(src, "unbound", vec![Value::bool(true)]), "1");
    let err = run_err(src, "unbound", vec![Value::bool(false)]);
    assert!(err.matches(ExcKind::UnboundLocalError));
    assert!(err.matches(ExcKind::NameError));
    assert_eq!(err.message(), "local variable 'x' referenced before assignment");
}

#[test]
fn missing_global_is_a_name_error() {
    let src = "
def lookup():
    LOAD_GLOBAL nope
    RETURN_VALUE
";
    let err = run_err(src, "lookup", vec![]);
    assert!(err.matches(ExcKind::NameError));
    assert_eq!(err.message(), "global name 'nope' is not defined");
}

#[test]
fn integer_overflow_raises() {
    let src = "
def grow(x):
    LOAD_FAST x
    LOAD_CONST 1
    BINARY_ADD
    RETURN_VALUE
";
    assert_eq!(run_repr(src, "grow", vec![Value::int(41)]), "42");
    let err = run_err(src, "grow", vec![Value::int(i64::MAX)]);
    assert!(err.matches(ExcKind::OverflowError));
}

#[test]
fn mixed_type_ordering_is_a_type_error() {
    let src = "
def less(a, b):
    LOAD_FAST a
    LOAD_FAST b
    COMPARE_OP <
    RETURN_VALUE
";
    assert_eq!(run_repr(src, "less", vec![Value::int(1), Value::float(1.5)]), "True");
    let err = run_err(src, "less", vec![Value::int(1), Value::str("a")]);
    assert!(err.matches(ExcKind::TypeError));
    assert_eq!(err.message(), "unorderable types: int() < str()");
    assert_eq!(run_repr(src, "less", vec![Value::str("a"), Value::str("b")]), "True");
}

#[test]
fn simple_slices_read_write_and_delete() {
    let src = "
def middle(seq):
    LOAD_FAST seq
    LOAD_CONST 1
    LOAD_CONST 3
    SLICE+3
    RETURN_VALUE

def splice(seq):
    LOAD_CONST 'x'
    BUILD_LIST 1
    LOAD_FAST seq
    LOAD_CONST 2
    STORE_SLICE+1
    LOAD_FAST seq
    LOAD_CONST 1
    DELETE_SLICE+2
    LOAD_FAST seq
    RETURN_VALUE
";
    let items = || Value::list((1..=4).map(Value::int).collect());
    assert_eq!(run_repr(src, "middle", vec![items()]), "[2, 3]");
    assert_eq!(run_repr(src, "middle", vec![Value::str("abcd")]), "'bc'");
    assert_eq!(run_repr(src, "splice", vec![items()]), "[2, 'x']");
}

#[test]
fn unpacking_checks_the_length() {
    let src = "
def swap(pair):
    LOAD_FAST pair
    UNPACK_SEQUENCE 2
    STORE_FAST a
    STORE_FAST b
    LOAD_FAST b
    LOAD_FAST a
    BUILD_TUPLE 2
    RETURN_VALUE
";
    let pair = Value::tuple(vec![Value::int(1), Value::int(2)]);
    assert_eq!(run_repr(src, "swap", vec![pair]), "(2, 1)");
    let err = run_err(src, "swap", vec![Value::list(vec![Value::int(1)])]);
    assert!(err.matches(ExcKind::ValueError));
    assert_eq!(err.message(), "need more than 1 value to unpack");
}

#[test]
fn mapping_literals_reject_unhashable_keys() {
    let src = "
def mapping(k):
    BUILD_MAP 1
    LOAD_CONST 1
    LOAD_FAST k
    STORE_MAP
    RETURN_VALUE
";
    assert_eq!(run_repr(src, "mapping", vec![Value::str("a")]), "{'a': 1}");
    let err = run_err(src, "mapping", vec![Value::list(Vec::new())]);
    assert!(err.matches(ExcKind::TypeError));
    assert_eq!(err.message(), "unhashable type: 'list'");
}

#[test]
fn truthiness_uses_nonzero_slot() {
    let src = "
def truth(v):
    LOAD_FAST v
    POP_JUMP_IF_FALSE no
    LOAD_CONST 'yes'
    RETURN_VALUE
 no:
    LOAD_CONST 'no'
    RETURN_VALUE

def never(self):
    LOAD_CONST False
    RETURN_VALUE
";
    let mut vm = interp_vm();
    let globals = load(&mut vm, src);
    let falsy = TypeObject::new_heap("Falsy", None);
    falsy.set_attr("__nonzero__", globals.get("never").unwrap());
    let plain = TypeObject::new_heap("Plain", None);

    let mut truth = |v: Value| {
        let out = call(&mut vm, &globals, "truth", vec![v]).unwrap();
        out.as_str().map(str::to_string)
    };
    assert_eq!(truth(Value::instance(falsy)).as_deref(), Some("no"));
    assert_eq!(truth(Value::instance(plain)).as_deref(), Some("yes"));
    assert_eq!(truth(Value::list(Vec::new())).as_deref(), Some("no"));
    assert_eq!(truth(Value::float(0.5)).as_deref(), Some("yes"));
}

#[test]
fn augmented_subscript_calls_getitem_op_then_setitem() {
    let mut vm = interp_vm();
    let globals = load(&mut vm, BOX);
    let log = Value::list(Vec::new());
    globals.set("log", log.clone());

    let boxed = TypeObject::new_heap("Box", None);
    boxed.set_attr("__getitem__", globals.get("box_getitem").unwrap());
    boxed.set_attr("__setitem__", globals.get("box_setitem").unwrap());
    let instance = Value::instance(boxed);
    let data = Value::list(vec![Value::int(10), Value::int(20)]);
    op::set_attr(&mut vm, &instance, "data", &data).unwrap();

    let out = call(&mut vm, &globals, "bump", vec![instance, Value::int(1)]).unwrap();
    assert_eq!(out.as_int(), Some(25));
    assert_eq!(log.debug_repr(), "['getitem', 'setitem', 'getitem']");
    assert_eq!(data.debug_repr(), "[10, 25]");
}

#[test]
fn external_iterator_ends_on_stop_iteration() {
    let src = "
def drain(it):
    LOAD_CONST 0
    STORE_FAST n
    SETUP_LOOP out
    LOAD_FAST it
    GET_ITER
 top:
    FOR_ITER done
    POP_TOP
    LOAD_FAST n
    LOAD_CONST 1
    INPLACE_ADD
    STORE_FAST n
    JUMP_ABSOLUTE top
 done:
    POP_BLOCK
 out:
    LOAD_FAST n
    RETURN_VALUE
";
    let mut vm = interp_vm();
    let globals = load(&mut vm, src);
    let items = Value::list((0..4).map(Value::int).collect());
    let it = op::get_iter(&mut vm, &items).unwrap();

    let out = call(&mut vm, &globals, "drain", vec![it.clone()]).unwrap();
    assert_eq!(out.as_int(), Some(4));
    let crate::val::Object::Iter(state) = it.obj() else {
        panic!("expected a native iterator");
    };
    assert!(state.is_exhausted());

    let next = vm.builtins().get("next").unwrap();
    let err = vm.call(&next, vec![it], Vec::new()).unwrap_err();
    assert!(err.matches(ExcKind::StopIteration));
}

#[test]
fn refcounts_balance_across_calls() {
    let src = "
def churn(items):
    LOAD_FAST items
    DUP_TOP
    POP_TOP
    LOAD_GLOBAL len
    ROT_TWO
    CALL_FUNCTION 1
    RETURN_VALUE
";
    let mut vm = interp_vm();
    let globals = load(&mut vm, src);
    let items = Value::list((0..3).map(Value::int).collect());
    let before = items.refcount();
    let out = call(&mut vm, &globals, "churn", vec![items.clone()]).unwrap();
    assert_eq!(out.as_int(), Some(3));
    assert_eq!(items.refcount(), before);
}
