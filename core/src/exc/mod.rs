use std::fmt;
use std::rc::Rc;

use crate::val::{Object, TypeKind, TypeObject, Value};

#[cfg(test)]
mod exc_test;

/// Result of any operation that can raise.
pub type RtResult<T> = Result<T, ExceptionState>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    BaseException,
    Exception,
    StandardError,
    ArithmeticError,
    LookupError,
    AssertionError,
    AttributeError,
    IndexError,
    KeyError,
    NameError,
    UnboundLocalError,
    OverflowError,
    RuntimeError,
    StopIteration,
    SystemError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    MemoryError,
}

impl ExcKind {
    /// Parents precede children.
    pub const ALL: [ExcKind; 19] = [
        ExcKind::BaseException,
        ExcKind::Exception,
        ExcKind::StandardError,
        ExcKind::ArithmeticError,
        ExcKind::LookupError,
        ExcKind::AssertionError,
        ExcKind::AttributeError,
        ExcKind::IndexError,
        ExcKind::KeyError,
        ExcKind::NameError,
        ExcKind::UnboundLocalError,
        ExcKind::OverflowError,
        ExcKind::RuntimeError,
        ExcKind::StopIteration,
        ExcKind::SystemError,
        ExcKind::TypeError,
        ExcKind::ValueError,
        ExcKind::ZeroDivisionError,
        ExcKind::MemoryError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcKind::BaseException => "BaseException",
            ExcKind::Exception => "Exception",
            ExcKind::StandardError => "StandardError",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::LookupError => "LookupError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::NameError => "NameError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::StopIteration => "StopIteration",
            ExcKind::SystemError => "SystemError",
            ExcKind::TypeError => "TypeError",
            ExcKind::ValueError => "ValueError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::MemoryError => "MemoryError",
        }
    }

    pub fn parent(self) -> Option<ExcKind> {
        match self {
            ExcKind::BaseException => None,
            ExcKind::Exception => Some(ExcKind::BaseException),
            ExcKind::StandardError | ExcKind::StopIteration => Some(ExcKind::Exception),
            ExcKind::ArithmeticError
            | ExcKind::LookupError
            | ExcKind::AssertionError
            | ExcKind::AttributeError
            | ExcKind::NameError
            | ExcKind::RuntimeError
            | ExcKind::SystemError
            | ExcKind::TypeError
            | ExcKind::ValueError
            | ExcKind::MemoryError => Some(ExcKind::StandardError),
            ExcKind::IndexError | ExcKind::KeyError => Some(ExcKind::LookupError),
            ExcKind::UnboundLocalError => Some(ExcKind::NameError),
            ExcKind::OverflowError | ExcKind::ZeroDivisionError => Some(ExcKind::ArithmeticError),
        }
    }

    pub fn type_object(self) -> Rc<TypeObject> {
        EXC_TYPES.with(|types| types[self as usize].clone())
    }
}

thread_local! {
    static EXC_TYPES: Vec<Rc<TypeObject>> = {
        let mut types: Vec<Rc<TypeObject>> = Vec::with_capacity(ExcKind::ALL.len());
        for kind in ExcKind::ALL {
            let base = match kind.parent() {
                Some(parent) => types[parent as usize].clone(),
                None => crate::val::native_type(crate::val::NativeKind::Object),
            };
            types.push(TypeObject::builtin(kind.name(), Some(base), TypeKind::Exception(kind)));
        }
        types
    };
}

/// One traceback entry. The head of a chain is the outermost frame the
/// exception has passed through; `next` points towards where it was raised.
/// Entries are values so that re-raising keeps their identity.
#[derive(Debug)]
pub struct Traceback {
    pub name: String,
    pub offset: usize,
    pub next: Option<Value>,
}

impl Traceback {
    pub fn next(&self) -> Option<&Traceback> {
        self.next.as_ref().and_then(|v| match v.obj() {
            Object::Traceback(tb) => Some(tb),
            _ => None,
        })
    }

    /// `(frame name, instruction offset)` pairs from the head.
    pub fn entries(&self) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        let mut cur = Some(self);
        while let Some(tb) = cur {
            out.push((tb.name.clone(), tb.offset));
            cur = tb.next();
        }
        out
    }
}

/// An exception in flight: the exception object plus its traceback chain.
#[derive(Clone)]
pub struct ExceptionState {
    value: Value,
    traceback: Option<Value>,
}

impl ExceptionState {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self::with_args(kind, vec![Value::str(message)])
    }

    pub fn with_args(kind: ExcKind, args: Vec<Value>) -> Self {
        Self::from_value(Value::exception(kind.type_object(), args))
    }

    pub fn from_value(value: Value) -> Self {
        Self { value, traceback: None }
    }

    /// `traceback` must be a traceback object; anything else is dropped.
    pub fn with_traceback(value: Value, traceback: Option<Value>) -> Self {
        let traceback = traceback.filter(|tb| matches!(tb.obj(), Object::Traceback(_)));
        Self { value, traceback }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Head of the traceback chain.
    pub fn traceback(&self) -> Option<&Value> {
        self.traceback.as_ref()
    }

    /// Head of the traceback chain, or `None` as a value.
    pub fn traceback_value(&self) -> Value {
        self.traceback.clone().unwrap_or_else(Value::none)
    }

    fn traceback_head(&self) -> Option<&Traceback> {
        self.traceback.as_ref().and_then(|v| match v.obj() {
            Object::Traceback(tb) => Some(tb),
            _ => None,
        })
    }

    /// Records that the exception passed through frame `name` at `offset`.
    pub fn push_frame(&mut self, name: &str, offset: usize) {
        let next = self.traceback.take();
        self.traceback = Some(Value::new(Object::Traceback(Traceback {
            name: name.to_string(),
            offset,
            next,
        })));
    }

    pub fn type_object(&self) -> Rc<TypeObject> {
        self.value.type_of()
    }

    pub fn type_name(&self) -> String {
        self.value.type_name()
    }

    pub fn matches(&self, kind: ExcKind) -> bool {
        self.value.is_instance_of_kind(kind)
    }

    pub fn args(&self) -> &[Value] {
        match self.value.obj() {
            Object::Exception(exc) => &exc.args,
            _ => &[],
        }
    }

    /// `str(exception)`.
    pub fn message(&self) -> String {
        let args = self.args();
        match args {
            [] => String::new(),
            [single] if !self.matches(ExcKind::KeyError) => match single.as_str() {
                Some(s) => s.to_string(),
                None => single.debug_repr(),
            },
            [single] => single.debug_repr(),
            many => Value::tuple(many.to_vec()).debug_repr(),
        }
    }

    /// `(frame name, offset)` pairs from the outermost frame inwards.
    pub fn traceback_entries(&self) -> Vec<(String, usize)> {
        self.traceback_head().map(|tb| tb.entries()).unwrap_or_default()
    }

    /// Multi-line report in the usual "most recent call last" layout.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.traceback.is_some() {
            out.push_str("Traceback (most recent call last):\n");
            for (name, offset) in self.traceback_entries() {
                out.push_str(&format!("  in {name} at offset {offset}\n"));
            }
        }
        out.push_str(&self.to_string());
        out
    }
}

impl fmt::Display for ExceptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message();
        if message.is_empty() {
            write!(f, "{}", self.type_name())
        } else {
            write!(f, "{}: {}", self.type_name(), message)
        }
    }
}

impl fmt::Debug for ExceptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")?;
        if let Some(tb) = self.traceback_head() {
            write!(f, " {:?}", tb.entries())?;
        }
        Ok(())
    }
}

/// Builds the exception for a failed stack-level invariant inside the VM.
pub(crate) fn system_error(message: impl Into<String>) -> ExceptionState {
    ExceptionState::new(ExcKind::SystemError, message)
}
