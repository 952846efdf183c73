use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::code::CodeUnit;
use crate::exc::{ExcKind, ExceptionState, RtResult, Traceback};
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::util::fmt::{format_complex, format_float, format_int, quote_str};
use crate::vm::Vm;

mod dict;
mod iter;
mod namespace;
mod types;

pub use dict::{Dict, HashKey};
pub use iter::{DictKeyIter, IterState, IterValue, RangeIter, SeqIter};
pub use namespace::Namespace;
pub use types::{NativeKind, Slot, SlotVariant, TypeKind, TypeObject, native_type};


/// Host function signature: positional arguments and keyword pairs.
pub type NativeCallable = dyn Fn(&mut Vm, &[Value], &[(Value, Value)]) -> RtResult<Value>;

/// Reference-counted handle. Cloning is an incref and `is` compares pointers.
#[derive(Clone)]
pub struct Value(Rc<Object>);

pub enum Object {
    None,
    NotImplemented,
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Str(String),
    Tuple(Vec<Value>),
    List(RefCell<Vec<Value>>),
    Dict(RefCell<Dict>),
    Slice(Slice),
    Cell(RefCell<Option<Value>>),
    Function(Function),
    Native(NativeFn),
    BoundMethod(BoundMethod),
    Code(Rc<CodeUnit>),
    Iter(IterValue),
    Type(Rc<TypeObject>),
    Instance(Instance),
    Exception(ExcObject),
    Traceback(Traceback),
}

pub struct Slice {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

pub struct Function {
    pub name: String,
    pub code: Rc<CodeUnit>,
    pub globals: Rc<Namespace>,
    pub defaults: Vec<Value>,
    /// Cells for the code's free variables, in `freevars` order.
    pub closure: Vec<Value>,
}

pub struct NativeFn {
    pub name: String,
    pub func: Rc<NativeCallable>,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub func: Value,
}

pub struct Instance {
    pub ty: Rc<TypeObject>,
    pub dict: RefCell<FastHashMap<String, Value>>,
}

pub struct ExcObject {
    pub ty: Rc<TypeObject>,
    pub args: Vec<Value>,
    pub dict: RefCell<FastHashMap<String, Value>>,
}

struct Singletons {
    none: Value,
    not_implemented: Value,
    true_: Value,
    false_: Value,
}

thread_local! {
    static SINGLETONS: Singletons = Singletons {
        none: Value(Rc::new(Object::None)),
        not_implemented: Value(Rc::new(Object::NotImplemented)),
        true_: Value(Rc::new(Object::Bool(true))),
        false_: Value(Rc::new(Object::Bool(false))),
    };
}

thread_local! {
    static REPR_ACTIVE: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a container as being rendered by `repr` until dropped.
pub struct ReprGuard(usize);

impl ReprGuard {
    /// `None` when `v` is already being rendered further up the stack.
    pub fn enter(v: &Value) -> Option<ReprGuard> {
        let id = v.id();
        REPR_ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&id) {
                return None;
            }
            active.push(id);
            Some(ReprGuard(id))
        })
    }
}

impl Drop for ReprGuard {
    fn drop(&mut self) {
        REPR_ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|id| *id == self.0) {
                active.remove(pos);
            }
        });
    }
}

impl Value {
    pub fn new(obj: Object) -> Self {
        Value(Rc::new(obj))
    }

    pub fn none() -> Self {
        SINGLETONS.with(|s| s.none.clone())
    }

    pub fn not_implemented() -> Self {
        SINGLETONS.with(|s| s.not_implemented.clone())
    }

    pub fn bool(b: bool) -> Self {
        SINGLETONS.with(|s| if b { s.true_.clone() } else { s.false_.clone() })
    }

    pub fn int(i: i64) -> Self {
        Value::new(Object::Int(i))
    }

    pub fn float(f: f64) -> Self {
        Value::new(Object::Float(f))
    }

    pub fn complex(re: f64, im: f64) -> Self {
        Value::new(Object::Complex(re, im))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::new(Object::Str(s.into()))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::new(Object::Tuple(items))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::new(Object::List(RefCell::new(items)))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::new(Object::Dict(RefCell::new(dict)))
    }

    pub fn slice(start: Value, stop: Value, step: Value) -> Self {
        Value::new(Object::Slice(Slice { start, stop, step }))
    }

    pub fn cell(content: Option<Value>) -> Self {
        Value::new(Object::Cell(RefCell::new(content)))
    }

    pub fn code(code: Rc<CodeUnit>) -> Self {
        Value::new(Object::Code(code))
    }

    pub fn type_object(ty: Rc<TypeObject>) -> Self {
        Value::new(Object::Type(ty))
    }

    pub fn iter(state: impl IterState) -> Self {
        Value::new(Object::Iter(IterValue::new(state)))
    }

    pub fn native<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Vm, &[Value], &[(Value, Value)]) -> RtResult<Value> + 'static,
    {
        Value::new(Object::Native(NativeFn {
            name: name.into(),
            func: Rc::new(func),
        }))
    }

    pub fn instance(ty: Rc<TypeObject>) -> Self {
        Value::new(Object::Instance(Instance {
            ty,
            dict: RefCell::new(fast_hash_map_new()),
        }))
    }

    pub fn exception(ty: Rc<TypeObject>, args: Vec<Value>) -> Self {
        Value::new(Object::Exception(ExcObject {
            ty,
            args,
            dict: RefCell::new(fast_hash_map_new()),
        }))
    }

    #[inline]
    pub fn obj(&self) -> &Object {
        &self.0
    }

    /// Pointer identity, the `is` operator.
    #[inline]
    pub fn is(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// Current strong reference count of the underlying object.
    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn is_none(&self) -> bool {
        matches!(self.obj(), Object::None)
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self.obj(), Object::NotImplemented)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.obj() {
            Object::Int(i) => Some(*i),
            Object::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.obj() {
            Object::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Rc<TypeObject>> {
        match self.obj() {
            Object::Type(ty) => Some(ty),
            _ => None,
        }
    }

    /// Type of the value. Built-in kinds resolve to the per-thread singleton
    /// type objects.
    pub fn type_of(&self) -> Rc<TypeObject> {
        match self.obj() {
            Object::Instance(inst) => inst.ty.clone(),
            Object::Exception(exc) => exc.ty.clone(),
            other => native_type(NativeKind::of(other)),
        }
    }

    /// Type of the value when it is defined by a class statement or the host,
    /// i.e. when its protocol goes through the slot table.
    pub fn heap_type(&self) -> Option<&Rc<TypeObject>> {
        match self.obj() {
            Object::Instance(inst) => Some(&inst.ty),
            Object::Exception(exc) if exc.ty.is_heap() => Some(&exc.ty),
            _ => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self.obj() {
            Object::Instance(inst) => inst.ty.name().to_string(),
            Object::Exception(exc) => exc.ty.name().to_string(),
            other => NativeKind::of(other).name().to_string(),
        }
    }

    pub fn is_exception_instance(&self) -> bool {
        matches!(self.obj(), Object::Exception(_))
    }

    /// Whether this value is an instance of `ty` (or a subtype).
    pub fn is_instance_of(&self, ty: &TypeObject) -> bool {
        self.type_of().is_subtype_of(ty)
    }

    pub fn is_instance_of_kind(&self, kind: ExcKind) -> bool {
        self.is_instance_of(&kind.type_object())
    }

    /// `repr` for values whose text does not depend on user slots.
    /// Instances print their default form.
    pub fn debug_repr(&self) -> String {
        match self.obj() {
            Object::None => "None".to_string(),
            Object::NotImplemented => "NotImplemented".to_string(),
            Object::Bool(true) => "True".to_string(),
            Object::Bool(false) => "False".to_string(),
            Object::Int(i) => format_int(*i),
            Object::Float(f) => format_float(*f),
            Object::Complex(re, im) => format_complex(*re, *im),
            Object::Str(s) => quote_str(s),
            Object::Tuple(items) => {
                let Some(_guard) = ReprGuard::enter(self) else {
                    return "(...)".to_string();
                };
                let parts: Vec<String> = items.iter().map(Value::debug_repr).collect();
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Object::List(items) => {
                let Some(_guard) = ReprGuard::enter(self) else {
                    return "[...]".to_string();
                };
                let parts: Vec<String> = items.borrow().iter().map(Value::debug_repr).collect();
                format!("[{}]", parts.join(", "))
            }
            Object::Dict(dict) => {
                let Some(_guard) = ReprGuard::enter(self) else {
                    return "{...}".to_string();
                };
                let parts: Vec<String> = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.debug_repr(), v.debug_repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Object::Exception(exc) => {
                let args: Vec<String> = exc.args.iter().map(Value::debug_repr).collect();
                let trailing = if args.len() == 1 { "," } else { "" };
                format!("{}({}{})", exc.ty.name(), args.join(", "), trailing)
            }
            other => self.default_repr(other),
        }
    }

    fn default_repr(&self, obj: &Object) -> String {
        match obj {
            Object::Slice(s) => format!(
                "slice({}, {}, {})",
                s.start.debug_repr(),
                s.stop.debug_repr(),
                s.step.debug_repr()
            ),
            Object::Function(f) => format!("<function {} at {:#x}>", f.name, self.id()),
            Object::Native(n) => format!("<built-in function {}>", n.name),
            Object::BoundMethod(m) => format!("<bound method of {}>", m.receiver.debug_repr()),
            Object::Code(code) => format!("<code object {} at {:#x}>", code.name, self.id()),
            Object::Type(ty) => format!("<type '{}'>", ty.name()),
            Object::Instance(inst) => format!("<{} object at {:#x}>", inst.ty.name(), self.id()),
            Object::Cell(_) => format!("<cell at {:#x}>", self.id()),
            Object::Traceback(_) => format!("<traceback object at {:#x}>", self.id()),
            _ => format!("<{} object at {:#x}>", self.type_name(), self.id()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_repr())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl Slice {
    /// Resolves the slice against a sequence of `len` items, returning
    /// `(start, stop, step, count)` with Python's clamping rules.
    pub fn indices(&self, len: usize) -> RtResult<(i64, i64, i64, usize)> {
        let len = len as i64;
        let step = match slice_index(&self.step)? {
            None => 1,
            Some(0) => return Err(ExceptionState::new(ExcKind::ValueError, "slice step cannot be zero")),
            // Keeps `-step` representable.
            Some(step) => step.max(-i64::MAX),
        };
        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let clamp = |raw: Option<i64>, default: i64| -> i64 {
            match raw {
                None => default,
                Some(i) if i < 0 => (i + len).max(lower),
                Some(i) => i.min(upper),
            }
        };
        let start = clamp(slice_index(&self.start)?, if step < 0 { upper } else { lower });
        let stop = clamp(slice_index(&self.stop)?, if step < 0 { lower } else { upper });
        let count = if step > 0 {
            if stop > start { (stop - start - 1) / step + 1 } else { 0 }
        } else if start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        Ok((start, stop, step, count as usize))
    }
}

fn slice_index(v: &Value) -> RtResult<Option<i64>> {
    if v.is_none() {
        return Ok(None);
    }
    v.as_int().map(Some).ok_or_else(|| {
        ExceptionState::new(
            ExcKind::TypeError,
            "slice indices must be integers or None or have an __index__ method",
        )
    })
}
