use std::fmt;

use crate::exc::RtResult;
use crate::val::{Slot, Value};
use crate::vm::Vm;

mod attr;
mod binary;
mod call;
mod compare;
mod convert;
mod iter;
mod subscr;
mod vars;

pub use attr::{del_attr, get_attr, set_attr};
pub use binary::{binary_op, inplace_op, unary_op};
pub use call::{bind_arguments, call_value, call_with_star, func_description};
pub use compare::{compare_op, contains, exception_matches, rich_compare, values_equal};
pub use convert::{is_true, repr, to_str};
pub(crate) use convert::native_truth;
pub use iter::{IterStep, collect_iterable, get_iter, iter_next, unpack_iterable};
pub use subscr::{del_item, del_slice, get_item, get_slice, set_item, set_slice};
pub use vars::{global_not_defined, load_global, name_not_defined, unbound_free, unbound_local};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 13] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::TrueDiv,
        BinaryOp::FloorDiv,
        BinaryOp::Mod,
        BinaryOp::Pow,
        BinaryOp::LShift,
        BinaryOp::RShift,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Xor,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div | BinaryOp::TrueDiv => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "** or pow()",
            BinaryOp::LShift => "<<",
            BinaryOp::RShift => ">>",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
        }
    }

    pub fn inplace_symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+=",
            BinaryOp::Sub => "-=",
            BinaryOp::Mul => "*=",
            BinaryOp::Div | BinaryOp::TrueDiv => "/=",
            BinaryOp::FloorDiv => "//=",
            BinaryOp::Mod => "%=",
            BinaryOp::Pow => "**=",
            BinaryOp::LShift => "<<=",
            BinaryOp::RShift => ">>=",
            BinaryOp::And => "&=",
            BinaryOp::Or => "|=",
            BinaryOp::Xor => "^=",
        }
    }

    /// Name between the underscores of the slot attributes, e.g. `add` for
    /// `__add__`, `__radd__` and `__iadd__`.
    pub fn slot_stem(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::TrueDiv => "truediv",
            BinaryOp::FloorDiv => "floordiv",
            BinaryOp::Mod => "mod",
            BinaryOp::Pow => "pow",
            BinaryOp::LShift => "lshift",
            BinaryOp::RShift => "rshift",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slot_stem())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
    /// Backquote conversion, i.e. `repr`.
    Convert,
    Invert,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Positive => "+",
            UnaryOp::Negative => "-",
            UnaryOp::Not => "not",
            UnaryOp::Convert => "repr",
            UnaryOp::Invert => "~",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Positive => "pos",
            UnaryOp::Negative => "neg",
            UnaryOp::Not => "not",
            UnaryOp::Convert => "convert",
            UnaryOp::Invert => "invert",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
    ExcMatch,
}

impl CompareOp {
    /// Decodes a `COMPARE_OP` argument.
    pub fn from_arg(arg: u32) -> Option<CompareOp> {
        Some(match arg {
            0 => CompareOp::Lt,
            1 => CompareOp::Le,
            2 => CompareOp::Eq,
            3 => CompareOp::Ne,
            4 => CompareOp::Gt,
            5 => CompareOp::Ge,
            6 => CompareOp::In,
            7 => CompareOp::NotIn,
            8 => CompareOp::Is,
            9 => CompareOp::IsNot,
            10 => CompareOp::ExcMatch,
            _ => return None,
        })
    }

    pub fn as_arg(self) -> u32 {
        self as u32
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
            CompareOp::ExcMatch => "exception match",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<CompareOp> {
        (0..=10)
            .filter_map(CompareOp::from_arg)
            .find(|op| op.symbol() == symbol)
    }

    /// Operator to retry with swapped operands: `a < b` becomes `b > a`.
    pub fn mirrored(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            other => other,
        }
    }

    pub fn is_rich(self) -> bool {
        matches!(
            self,
            CompareOp::Lt | CompareOp::Le | CompareOp::Eq | CompareOp::Ne | CompareOp::Gt | CompareOp::Ge
        )
    }

    pub(crate) fn slot(self) -> Option<Slot> {
        Some(match self {
            CompareOp::Lt => Slot::Lt,
            CompareOp::Le => Slot::Le,
            CompareOp::Eq => Slot::Eq,
            CompareOp::Ne => Slot::Ne,
            CompareOp::Gt => Slot::Gt,
            CompareOp::Ge => Slot::Ge,
            _ => return None,
        })
    }
}

/// Calls `slot` on `receiver`'s heap type with `receiver` prepended to
/// `args`. `Ok(None)` when the type does not implement the slot.
pub(crate) fn call_slot(vm: &mut Vm, receiver: &Value, slot: Slot, args: &[Value]) -> RtResult<Option<Value>> {
    let Some(func) = receiver.heap_type().and_then(|ty| ty.lookup_slot(slot)) else {
        return Ok(None);
    };
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(receiver.clone());
    full.extend_from_slice(args);
    call_value(vm, &func, full, Vec::new()).map(Some)
}

/// Like [`call_slot`], but a `NotImplemented` result also reads as absent.
pub(crate) fn call_binary_slot(
    vm: &mut Vm,
    receiver: &Value,
    slot: Slot,
    other: &Value,
) -> RtResult<Option<Value>> {
    Ok(call_slot(vm, receiver, slot, std::slice::from_ref(other))?.filter(|v| !v.is_not_implemented()))
}
