use std::cell::RefCell;

use super::{Dict, Value};
use crate::exc::RtResult;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};

/// A string-keyed variable table: module globals, builtins, or the locals of
/// a class body.
#[derive(Default)]
pub struct Namespace {
    vars: RefCell<FastHashMap<String, Value>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self {
            vars: RefCell::new(fast_hash_map_new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.borrow().is_empty()
    }

    /// Snapshot as a dict with string keys, sorted by name.
    pub fn to_dict(&self) -> RtResult<Dict> {
        let vars = self.vars.borrow();
        let mut names: Vec<&String> = vars.keys().collect();
        names.sort();
        let mut dict = Dict::new();
        for name in names {
            dict.insert(Value::str(name.as_str()), vars[name].clone())?;
        }
        Ok(dict)
    }
}
