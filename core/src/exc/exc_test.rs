use super::*;

#[test]
fn hierarchy_lists_parents_first() {
    for (pos, kind) in ExcKind::ALL.iter().enumerate() {
        assert_eq!(*kind as usize, pos);
        if let Some(parent) = kind.parent() {
            assert!((parent as usize) < pos, "{kind:?} precedes {parent:?}");
        }
    }
    assert_eq!(ExcKind::BaseException.parent(), None);
    assert_eq!(ExcKind::StopIteration.parent(), Some(ExcKind::Exception));
}

#[test]
fn builtin_exception_types_are_subtypes_of_their_parents() {
    let zero = ExcKind::ZeroDivisionError.type_object();
    assert_eq!(zero.name(), "ZeroDivisionError");
    assert!(zero.is_subtype_of(&ExcKind::ArithmeticError.type_object()));
    assert!(zero.is_subtype_of(&ExcKind::BaseException.type_object()));
    assert!(!zero.is_subtype_of(&ExcKind::LookupError.type_object()));
    assert_eq!(zero.exception_kind(), Some(ExcKind::ZeroDivisionError));
    assert!(Rc::ptr_eq(&zero, &ExcKind::ZeroDivisionError.type_object()));
}

#[test]
fn matches_walks_the_hierarchy() {
    let err = ExceptionState::new(ExcKind::UnboundLocalError, "local variable 'x' referenced before assignment");
    assert!(err.matches(ExcKind::UnboundLocalError));
    assert!(err.matches(ExcKind::NameError));
    assert!(err.matches(ExcKind::StandardError));
    assert!(!err.matches(ExcKind::TypeError));
    assert_eq!(err.type_name(), "UnboundLocalError");
}

#[test]
fn message_follows_the_argument_count() {
    assert_eq!(ExceptionState::with_args(ExcKind::ValueError, Vec::new()).message(), "");
    assert_eq!(ExceptionState::new(ExcKind::ValueError, "bad").message(), "bad");
    assert_eq!(ExceptionState::with_args(ExcKind::ValueError, vec![Value::int(3)]).message(), "3");
    assert_eq!(ExceptionState::new(ExcKind::KeyError, "k").message(), "'k'");
    let pair = ExceptionState::with_args(ExcKind::ValueError, vec![Value::int(1), Value::str("a")]);
    assert_eq!(pair.message(), "(1, 'a')");
}

#[test]
fn display_omits_an_empty_message() {
    let bare = ExceptionState::with_args(ExcKind::StopIteration, Vec::new());
    assert_eq!(bare.to_string(), "StopIteration");
    assert_eq!(bare.render(), "StopIteration");
    assert_eq!(ExceptionState::new(ExcKind::TypeError, "nope").to_string(), "TypeError: nope");
}

#[test]
fn frames_are_pushed_innermost_first() {
    let mut err = ExceptionState::new(ExcKind::ValueError, "bad");
    assert!(err.traceback().is_none());
    assert!(err.traceback_value().is_none());
    err.push_frame("inner", 12);
    err.push_frame("outer", 4);

    assert_eq!(
        err.traceback_entries(),
        vec![("outer".to_string(), 4), ("inner".to_string(), 12)]
    );
    assert_eq!(
        err.render(),
        "Traceback (most recent call last):\n  in outer at offset 4\n  in inner at offset 12\nValueError: bad"
    );
}

#[test]
fn traceback_identity_survives_a_reraise() {
    let mut err = ExceptionState::new(ExcKind::KeyError, "k");
    err.push_frame("f", 0);
    let tb = err.traceback_value();
    let again = ExceptionState::with_traceback(err.value().clone(), Some(tb.clone()));
    assert!(again.traceback().is_some_and(|t| t.is(&tb)));
    assert!(again.value().is(err.value()));

    let dropped = ExceptionState::with_traceback(err.value().clone(), Some(Value::int(1)));
    assert!(dropped.traceback().is_none());
}

#[test]
fn system_errors_are_standard_errors() {
    let err = system_error("stack underflow");
    assert!(err.matches(ExcKind::SystemError));
    assert!(err.matches(ExcKind::StandardError));
    assert_eq!(err.message(), "stack underflow");
}
