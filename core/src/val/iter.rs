use std::cell::RefCell;
use std::fmt;

use super::{Object, Value};
use crate::exc::{ExcKind, ExceptionState, RtResult};

/// State machine behind a built-in iterator object.
pub trait IterState: 'static {
    /// Advance and return the next item; `None` once exhausted.
    fn next(&mut self) -> RtResult<Option<Value>>;

    /// Human readable identifier used for diagnostics.
    fn debug_name(&self) -> &'static str {
        "iterator"
    }
}

/// Runtime handle for built-in iterators. After the first `None` the state is
/// dropped, which releases the underlying sequence, and every later call
/// reports exhaustion again.
pub struct IterValue {
    state: RefCell<Option<Box<dyn IterState>>>,
}

impl fmt::Debug for IterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.state.borrow().as_ref().map(|s| s.debug_name()).unwrap_or("exhausted");
        f.debug_struct("IterValue").field("state", &name).finish()
    }
}

impl IterValue {
    pub fn new<S: IterState>(state: S) -> Self {
        Self {
            state: RefCell::new(Some(Box::new(state))),
        }
    }

    pub fn next(&self) -> RtResult<Option<Value>> {
        let mut guard = self.state.borrow_mut();
        let Some(state) = guard.as_mut() else {
            return Ok(None);
        };
        let item = state.next()?;
        if item.is_none() {
            *guard = None;
        }
        Ok(item)
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.borrow().is_none()
    }
}

/// Walks a list, tuple or string by index, re-reading the length on every
/// step so that appends during iteration are observed.
pub struct SeqIter {
    seq: Value,
    index: usize,
}

impl SeqIter {
    pub fn new(seq: Value) -> Self {
        Self { seq, index: 0 }
    }
}

impl IterState for SeqIter {
    fn next(&mut self) -> RtResult<Option<Value>> {
        let item = match self.seq.obj() {
            Object::List(items) => items.borrow().get(self.index).cloned(),
            Object::Tuple(items) => items.get(self.index).cloned(),
            Object::Str(s) => s.chars().nth(self.index).map(|c| Value::str(c.to_string())),
            Object::Dict(dict) => {
                let dict = dict.borrow();
                match dict.entry_at(self.index) {
                    Some((key, _)) => Some(key.clone()),
                    None => None,
                }
            }
            _ => None,
        };
        if item.is_some() {
            self.index += 1;
        }
        Ok(item)
    }

    fn debug_name(&self) -> &'static str {
        match self.seq.obj() {
            Object::List(_) => "listiterator",
            Object::Tuple(_) => "tupleiterator",
            Object::Dict(_) => "dictionary-keyiterator",
            _ => "iterator",
        }
    }
}

/// Keys of a dict, failing if the dict changes size underneath.
pub struct DictKeyIter {
    inner: SeqIter,
    len: usize,
}

impl DictKeyIter {
    pub fn new(dict: Value, len: usize) -> Self {
        Self {
            inner: SeqIter::new(dict),
            len,
        }
    }
}

impl IterState for DictKeyIter {
    fn next(&mut self) -> RtResult<Option<Value>> {
        if let Object::Dict(dict) = self.inner.seq.obj()
            && dict.borrow().len() != self.len
        {
            return Err(ExceptionState::new(
                ExcKind::RuntimeError,
                "dictionary changed size during iteration",
            ));
        }
        self.inner.next()
    }

    fn debug_name(&self) -> &'static str {
        "dictionary-keyiterator"
    }
}

pub struct RangeIter {
    next: i64,
    stop: i64,
    step: i64,
}

impl RangeIter {
    pub fn new(start: i64, stop: i64, step: i64) -> Self {
        Self { next: start, stop, step }
    }
}

impl IterState for RangeIter {
    fn next(&mut self) -> RtResult<Option<Value>> {
        let more = if self.step > 0 { self.next < self.stop } else { self.next > self.stop };
        if !more {
            return Ok(None);
        }
        let current = self.next;
        self.next = self.next.saturating_add(self.step);
        Ok(Some(Value::int(current)))
    }

    fn debug_name(&self) -> &'static str {
        "rangeiterator"
    }
}
