use super::*;

const FIRST_OVER: &str = "
def first_over(items, limit):
    SETUP_LOOP out
    LOAD_FAST items
    GET_ITER
 top:
    FOR_ITER done
    STORE_FAST x
    LOAD_FAST x
    LOAD_FAST limit
    COMPARE_OP >
    POP_JUMP_IF_FALSE top
    LOAD_FAST x
    STORE_FAST found
    BREAK_LOOP
 done:
    POP_BLOCK
    LOAD_CONST None
    STORE_FAST found
 out:
    LOAD_FAST found
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

const SKIP_ERRORS: &str = "
def skip_errors(items):
    LOAD_CONST 0
    STORE_FAST acc
    SETUP_LOOP out
    LOAD_FAST items
    GET_ITER
 top:
    FOR_ITER done
    STORE_FAST x
    SETUP_EXCEPT handler
    LOAD_FAST acc
    LOAD_CONST 12
    LOAD_FAST x
    BINARY_DIVIDE
    INPLACE_ADD
    STORE_FAST acc
    POP_BLOCK
    JUMP_ABSOLUTE top
 handler:
    POP_TOP
    POP_TOP
    POP_TOP
    CONTINUE_LOOP top
 done:
    POP_BLOCK
 out:
    LOAD_FAST acc
    RETURN_VALUE
";

fn ints(values: &[i64]) -> Value {
    Value::list(values.iter().map(|v| Value::int(*v)).collect())
}

#[test]
fn for_loop_with_break() {
    assert_eq!(run_repr(FIRST_OVER, "first_over", vec![ints(&[1, 5, 9]), Value::int(4)]), "5");
    assert_eq!(run_repr(FIRST_OVER, "first_over", vec![ints(&[1, 2]), Value::int(4)]), "None");
}

#[test]
fn except_clause_matches_by_type() {
    assert_eq!(run_repr(SAFE_DIV, "safe_div", vec![Value::int(7), Value::int(2)]), "3");
    assert_eq!(run_repr(SAFE_DIV, "safe_div", vec![Value::int(1), Value::int(0)]), "-1");

    let err = run_err(SAFE_DIV, "safe_div", vec![Value::str("a"), Value::int(1)]);
    assert!(err.matches(ExcKind::TypeError));
    assert_eq!(err.message(), "unsupported operand type(s) for /: 'str' and 'int'");
}

#[test]
fn continue_from_inside_a_handler() {
    let out = run_repr(SKIP_ERRORS, "skip_errors", vec![ints(&[1, 0, 2, 0, 4])]);
    assert_eq!(out, "21");
}

#[test]
fn short_circuit_jumps_keep_the_deciding_operand() {
    let src = "
def either(a, b):
    LOAD_FAST a
    JUMP_IF_TRUE_OR_POP end
    LOAD_FAST b
 end:
    RETURN_VALUE

def both(a, b):
    LOAD_FAST a
    JUMP_IF_FALSE_OR_POP end
    LOAD_FAST b
 end:
    RETURN_VALUE
";
    assert_eq!(run_repr(src, "either", vec![Value::int(0), Value::int(7)]), "7");
    assert_eq!(run_repr(src, "either", vec![Value::int(3), Value::int(7)]), "3");
    assert_eq!(run_repr(src, "both", vec![Value::str(""), Value::int(7)]), "''");
    assert_eq!(run_repr(src, "both", vec![Value::int(1), Value::int(7)]), "7");
}

#[test]
fn uncaught_exceptions_carry_every_frame() {
    let src = "
def inner(x):
    LOAD_GLOBAL ValueError
    LOAD_CONST 'bad'
    CALL_FUNCTION 1
    RAISE_VARARGS 1

def outer(x):
    LOAD_GLOBAL inner
    LOAD_FAST x
    CALL_FUNCTION 1
    RETURN_VALUE
";
    let mut vm = interp_vm();
    let globals = load(&mut vm, src);
    let err = call(&mut vm, &globals, "outer", vec![Value::none()]).unwrap_err();
    assert_eq!(err.type_name(), "ValueError");
    assert_eq!(err.message(), "bad");
    let frames: Vec<String> = err.traceback_entries().into_iter().map(|(name, _)| name).collect();
    assert_eq!(frames, vec!["outer", "inner"]);
    assert!(err.render().starts_with("Traceback (most recent call last):"));
    assert_eq!(vm.call_stack_depth(), 0);
}

#[test]
fn bare_raise_rethrows_the_handled_exception() {
    let src = "
def rethrow():
    SETUP_EXCEPT handler
    LOAD_GLOBAL KeyError
    LOAD_CONST 'k'
    CALL_FUNCTION 1
    RAISE_VARARGS 1
 handler:
    POP_TOP
    POP_TOP
    POP_TOP
    RAISE_VARARGS 0
";
    let err = run_err(src, "rethrow", vec![]);
    assert!(err.matches(ExcKind::KeyError));
    assert!(err.matches(ExcKind::LookupError));
    assert_eq!(err.message(), "'k'");
}

#[test]
fn raise_with_type_and_value() {
    let src = "
def two():
    LOAD_GLOBAL IndexError
    LOAD_CONST 'out of range'
    RAISE_VARARGS 2
";
    let err = run_err(src, "two", vec![]);
    assert_eq!(err.to_string(), "IndexError: out of range");
}

#[test]
fn handled_exception_does_not_leak_out_of_the_call() {
    let mut vm = interp_vm();
    let globals = load(&mut vm, SAFE_DIV);
    let out = call(&mut vm, &globals, "safe_div", vec![Value::int(1), Value::int(0)]).unwrap();
    assert_eq!(out.as_int(), Some(-1));
    assert!(vm.handled_exception().is_none());
}
