use std::cell::RefCell;
use std::rc::Rc;

use super::{Object, Value};
use crate::exc::ExcKind;
use crate::op::BinaryOp;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};

/// Which operand position a binary slot serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotVariant {
    Forward,
    Reflected,
    InPlace,
}

/// The fixed protocol surface a type can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Binary(BinaryOp, SlotVariant),
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    Contains,
    Iter,
    Next,
    GetItem,
    SetItem,
    DelItem,
    Nonzero,
    Len,
    Neg,
    Pos,
    Invert,
    Repr,
    Str,
    Call,
    Init,
}

const SIMPLE_SLOTS: &[(Slot, &str)] = &[
    (Slot::Lt, "__lt__"),
    (Slot::Le, "__le__"),
    (Slot::Eq, "__eq__"),
    (Slot::Ne, "__ne__"),
    (Slot::Gt, "__gt__"),
    (Slot::Ge, "__ge__"),
    (Slot::Contains, "__contains__"),
    (Slot::Iter, "__iter__"),
    (Slot::Next, "next"),
    (Slot::GetItem, "__getitem__"),
    (Slot::SetItem, "__setitem__"),
    (Slot::DelItem, "__delitem__"),
    (Slot::Nonzero, "__nonzero__"),
    (Slot::Len, "__len__"),
    (Slot::Neg, "__neg__"),
    (Slot::Pos, "__pos__"),
    (Slot::Invert, "__invert__"),
    (Slot::Repr, "__repr__"),
    (Slot::Str, "__str__"),
    (Slot::Call, "__call__"),
    (Slot::Init, "__init__"),
];

impl Slot {
    /// Attribute name a class body uses to fill this slot.
    pub fn dunder(self) -> String {
        match self {
            Slot::Binary(op, variant) => {
                let prefix = match variant {
                    SlotVariant::Forward => "",
                    SlotVariant::Reflected => "r",
                    SlotVariant::InPlace => "i",
                };
                format!("__{prefix}{}__", op.slot_stem())
            }
            other => SIMPLE_SLOTS
                .iter()
                .find(|(slot, _)| *slot == other)
                .map(|(_, name)| (*name).to_string())
                .unwrap_or_default(),
        }
    }

    pub fn from_dunder(name: &str) -> Option<Slot> {
        if let Some((slot, _)) = SIMPLE_SLOTS.iter().find(|(_, n)| *n == name) {
            return Some(*slot);
        }
        let stem = name.strip_prefix("__")?.strip_suffix("__")?;
        for op in BinaryOp::ALL {
            let op_stem = op.slot_stem();
            if stem == op_stem {
                return Some(Slot::Binary(op, SlotVariant::Forward));
            }
            if stem.strip_prefix('r') == Some(op_stem) {
                return Some(Slot::Binary(op, SlotVariant::Reflected));
            }
            if stem.strip_prefix('i') == Some(op_stem) {
                return Some(Slot::Binary(op, SlotVariant::InPlace));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeKind {
    Object,
    NoneType,
    NotImplementedType,
    Bool,
    Int,
    Float,
    Complex,
    Str,
    Tuple,
    List,
    Dict,
    Slice,
    Cell,
    Function,
    BuiltinFunction,
    Method,
    Code,
    Iterator,
    Type,
    Traceback,
}

impl NativeKind {
    const ALL: [NativeKind; 20] = [
        NativeKind::Object,
        NativeKind::NoneType,
        NativeKind::NotImplementedType,
        NativeKind::Bool,
        NativeKind::Int,
        NativeKind::Float,
        NativeKind::Complex,
        NativeKind::Str,
        NativeKind::Tuple,
        NativeKind::List,
        NativeKind::Dict,
        NativeKind::Slice,
        NativeKind::Cell,
        NativeKind::Function,
        NativeKind::BuiltinFunction,
        NativeKind::Method,
        NativeKind::Code,
        NativeKind::Iterator,
        NativeKind::Type,
        NativeKind::Traceback,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NativeKind::Object => "object",
            NativeKind::NoneType => "NoneType",
            NativeKind::NotImplementedType => "NotImplementedType",
            NativeKind::Bool => "bool",
            NativeKind::Int => "int",
            NativeKind::Float => "float",
            NativeKind::Complex => "complex",
            NativeKind::Str => "str",
            NativeKind::Tuple => "tuple",
            NativeKind::List => "list",
            NativeKind::Dict => "dict",
            NativeKind::Slice => "slice",
            NativeKind::Cell => "cell",
            NativeKind::Function => "function",
            NativeKind::BuiltinFunction => "builtin_function_or_method",
            NativeKind::Method => "instancemethod",
            NativeKind::Code => "code",
            NativeKind::Iterator => "iterator",
            NativeKind::Type => "type",
            NativeKind::Traceback => "traceback",
        }
    }

    pub fn of(obj: &Object) -> NativeKind {
        match obj {
            Object::None => NativeKind::NoneType,
            Object::NotImplemented => NativeKind::NotImplementedType,
            Object::Bool(_) => NativeKind::Bool,
            Object::Int(_) => NativeKind::Int,
            Object::Float(_) => NativeKind::Float,
            Object::Complex(..) => NativeKind::Complex,
            Object::Str(_) => NativeKind::Str,
            Object::Tuple(_) => NativeKind::Tuple,
            Object::List(_) => NativeKind::List,
            Object::Dict(_) => NativeKind::Dict,
            Object::Slice(_) => NativeKind::Slice,
            Object::Cell(_) => NativeKind::Cell,
            Object::Function(_) => NativeKind::Function,
            Object::Native(_) => NativeKind::BuiltinFunction,
            Object::BoundMethod(_) => NativeKind::Method,
            Object::Code(_) => NativeKind::Code,
            Object::Iter(_) => NativeKind::Iterator,
            Object::Type(_) => NativeKind::Type,
            Object::Traceback(_) => NativeKind::Traceback,
            Object::Instance(_) | Object::Exception(_) => NativeKind::Object,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Native(NativeKind),
    Exception(ExcKind),
    /// Created by a class statement or by the host.
    Heap,
}

pub struct TypeObject {
    name: String,
    base: Option<Rc<TypeObject>>,
    kind: TypeKind,
    slots: RefCell<FastHashMap<Slot, Value>>,
    attrs: RefCell<FastHashMap<String, Value>>,
}

impl TypeObject {
    pub(crate) fn builtin(name: &str, base: Option<Rc<TypeObject>>, kind: TypeKind) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            base,
            kind,
            slots: RefCell::new(fast_hash_map_new()),
            attrs: RefCell::new(fast_hash_map_new()),
        })
    }

    /// A new heap type deriving from `base` (or `object`).
    pub fn new_heap(name: impl Into<String>, base: Option<Rc<TypeObject>>) -> Rc<Self> {
        let base = base.unwrap_or_else(|| native_type(NativeKind::Object));
        Rc::new(Self {
            name: name.into(),
            base: Some(base),
            kind: TypeKind::Heap,
            slots: RefCell::new(fast_hash_map_new()),
            attrs: RefCell::new(fast_hash_map_new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<&Rc<TypeObject>> {
        self.base.as_ref()
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_heap(&self) -> bool {
        self.kind == TypeKind::Heap
    }

    pub fn is_subtype_of(&self, other: &TypeObject) -> bool {
        let mut cur = Some(self);
        while let Some(ty) = cur {
            if std::ptr::eq(ty, other) {
                return true;
            }
            cur = ty.base.as_deref();
        }
        false
    }

    pub fn is_exception(&self) -> bool {
        self.is_subtype_of(&ExcKind::BaseException.type_object())
    }

    /// Nearest built-in exception kind in the base chain.
    pub fn exception_kind(&self) -> Option<ExcKind> {
        let mut cur = Some(self);
        while let Some(ty) = cur {
            if let TypeKind::Exception(kind) = ty.kind {
                return Some(kind);
            }
            cur = ty.base.as_deref();
        }
        None
    }

    pub fn set_slot(&self, slot: Slot, func: Value) {
        self.slots.borrow_mut().insert(slot, func);
    }

    /// Finds a slot implementation along the base chain.
    pub fn lookup_slot(&self, slot: Slot) -> Option<Value> {
        let mut cur = Some(self);
        while let Some(ty) = cur {
            if let Some(found) = ty.slots.borrow().get(&slot) {
                return Some(found.clone());
            }
            cur = ty.base.as_deref();
        }
        None
    }

    /// Whether this exact type (not a base) defines `slot`.
    pub fn defines_slot(&self, slot: Slot) -> bool {
        self.slots.borrow().contains_key(&slot)
    }

    /// Stores a class attribute; dunder names fill the matching slot.
    pub fn set_attr(&self, name: &str, value: Value) {
        match Slot::from_dunder(name) {
            Some(slot) => self.set_slot(slot, value),
            None => {
                self.attrs.borrow_mut().insert(name.to_string(), value);
            }
        }
    }

    pub fn lookup_attr(&self, name: &str) -> Option<Value> {
        if let Some(slot) = Slot::from_dunder(name) {
            return self.lookup_slot(slot);
        }
        let mut cur = Some(self);
        while let Some(ty) = cur {
            if let Some(found) = ty.attrs.borrow().get(name) {
                return Some(found.clone());
            }
            cur = ty.base.as_deref();
        }
        None
    }

    pub fn remove_attr(&self, name: &str) -> bool {
        match Slot::from_dunder(name) {
            Some(slot) => self.slots.borrow_mut().remove(&slot).is_some(),
            None => self.attrs.borrow_mut().remove(name).is_some(),
        }
    }
}

struct NativeTypes {
    types: Vec<Rc<TypeObject>>,
}

thread_local! {
    static NATIVE_TYPES: NativeTypes = {
        let object = TypeObject::builtin("object", None, TypeKind::Native(NativeKind::Object));
        let int = TypeObject::builtin("int", Some(object.clone()), TypeKind::Native(NativeKind::Int));
        let types = NativeKind::ALL
            .iter()
            .map(|kind| match kind {
                NativeKind::Object => object.clone(),
                NativeKind::Int => int.clone(),
                NativeKind::Bool => TypeObject::builtin("bool", Some(int.clone()), TypeKind::Native(NativeKind::Bool)),
                other => TypeObject::builtin(other.name(), Some(object.clone()), TypeKind::Native(*other)),
            })
            .collect::<Vec<_>>();
        NativeTypes { types }
    };
}

/// Per-thread singleton type object for a built-in kind.
pub fn native_type(kind: NativeKind) -> Rc<TypeObject> {
    NATIVE_TYPES.with(|t| t.types[kind.index()].clone())
}
