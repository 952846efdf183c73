use std::rc::Rc;

use crate::code::CodeUnit;
use crate::exc::{RtResult, system_error};
use crate::op::{name_not_defined, unbound_free, unbound_local};
use crate::val::{Namespace, Object, Value};

/// Activation record of one call. The interpreter works on `stack`; compiled
/// code keeps its operands in a register file of its own and only shares the
/// variable storage.
pub struct Frame {
    pub code: Rc<CodeUnit>,
    pub globals: Rc<Namespace>,
    /// Name table for non-optimized code (module and class bodies).
    pub names: Option<Rc<Namespace>>,
    pub locals: Vec<Option<Value>>,
    /// Cells for `cellvars` followed by the closure's cells for `freevars`.
    pub cells: Vec<Value>,
    pub stack: Vec<Value>,
}

impl Frame {
    pub fn new(
        code: Rc<CodeUnit>,
        globals: Rc<Namespace>,
        names: Option<Rc<Namespace>>,
        mut locals: Vec<Option<Value>>,
        closure: &[Value],
    ) -> RtResult<Self> {
        if closure.len() != code.freevars.len() {
            return Err(system_error(format!(
                "{} requires closure of length {}, not {}",
                code.name,
                code.freevars.len(),
                closure.len()
            )));
        }
        locals.resize(code.varnames.len(), None);
        let mut cells = Vec::with_capacity(code.cellvars.len() + closure.len());
        for name in &code.cellvars {
            // A cell shadowing a parameter starts out holding the argument.
            let initial = code
                .varnames
                .iter()
                .position(|v| v == name)
                .and_then(|idx| locals[idx].clone());
            cells.push(Value::cell(initial));
        }
        cells.extend(closure.iter().cloned());
        Ok(Self {
            code,
            globals,
            names,
            locals,
            cells,
            stack: Vec::new(),
        })
    }

    pub fn local(&self, idx: usize) -> RtResult<Value> {
        match self.locals.get(idx) {
            Some(Some(v)) => Ok(v.clone()),
            Some(None) => Err(unbound_local(&self.code.varnames[idx])),
            None => Err(system_error(format!("local index {idx} out of range"))),
        }
    }

    pub fn delete_local(&mut self, idx: usize) -> RtResult<()> {
        match self.locals.get_mut(idx) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            Some(None) => Err(unbound_local(&self.code.varnames[idx])),
            None => Err(system_error(format!("local index {idx} out of range"))),
        }
    }

    pub fn cell(&self, idx: usize) -> RtResult<&Value> {
        self.cells
            .get(idx)
            .ok_or_else(|| system_error(format!("cell index {idx} out of range")))
    }

    pub fn load_deref(&self, idx: usize) -> RtResult<Value> {
        let cell = self.cell(idx)?;
        let content = match cell.obj() {
            Object::Cell(content) => content.borrow().clone(),
            _ => return Err(system_error("closure slot does not hold a cell")),
        };
        content.ok_or_else(|| {
            let name = self.code.deref_name(idx).unwrap_or("?");
            if idx < self.code.cellvars.len() {
                unbound_local(name)
            } else {
                unbound_free(name)
            }
        })
    }

    pub fn store_deref(&self, idx: usize, value: Value) -> RtResult<()> {
        match self.cell(idx)?.obj() {
            Object::Cell(content) => {
                *content.borrow_mut() = Some(value);
                Ok(())
            }
            _ => Err(system_error("closure slot does not hold a cell")),
        }
    }

    /// `LOAD_NAME` lookup: local names, globals, then builtins.
    pub fn load_name(&self, builtins: &Namespace, name: &str) -> RtResult<Value> {
        self.names
            .as_ref()
            .and_then(|ns| ns.get(name))
            .or_else(|| self.globals.get(name))
            .or_else(|| builtins.get(name))
            .ok_or_else(|| name_not_defined(name))
    }

    pub fn names(&self) -> RtResult<&Rc<Namespace>> {
        self.names
            .as_ref()
            .ok_or_else(|| system_error("no locals found when accessing names"))
    }
}
