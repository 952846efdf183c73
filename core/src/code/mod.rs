use std::cell::{OnceCell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::Serialize;

use crate::jit::{ArtifactCache, OptLevel};
use crate::val::{Object, Value};

pub mod asm;
mod decode;
pub mod opcode;

pub use decode::{DecodeError, Decoded, Disassembly, Instr, decode};
pub use opcode::{ArgKind, HAVE_ARGUMENT, Opcode};

#[cfg(test)]
mod tests;

pub const CO_OPTIMIZED: u32 = 0x1;
pub const CO_NEWLOCALS: u32 = 0x2;
pub const CO_VARARGS: u32 = 0x4;
pub const CO_VARKEYWORDS: u32 = 0x8;

/// Process-unique identity of a code unit; the artifact cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CodeId(u64);

impl CodeId {
    fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CodeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a code unit currently executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TierState {
    Interpreted,
    CompileRequested(OptLevel),
    Compiled(OptLevel),
    /// The last compile at this level failed; calls stay interpreted.
    Failed(OptLevel),
}

#[derive(Debug)]
struct Tier {
    use_jit: bool,
    optimization: Option<OptLevel>,
    state: TierState,
    failed: BTreeSet<OptLevel>,
}

pub struct CodeUnit {
    id: CodeId,
    pub name: String,
    pub argcount: usize,
    pub flags: u32,
    pub code: Vec<u8>,
    pub consts: Vec<Value>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    decoded: OnceCell<Result<Decoded, DecodeError>>,
    tier: RefCell<Tier>,
    caches: RefCell<Vec<Weak<ArtifactCache>>>,
}

impl CodeUnit {
    pub fn id(&self) -> CodeId {
        self.id
    }

    pub fn is_optimized(&self) -> bool {
        self.flags & CO_OPTIMIZED != 0
    }

    pub fn has_varargs(&self) -> bool {
        self.flags & CO_VARARGS != 0
    }

    pub fn has_varkeywords(&self) -> bool {
        self.flags & CO_VARKEYWORDS != 0
    }

    /// Name of a cell or free slot, cellvars first.
    pub fn deref_name(&self, idx: usize) -> Option<&str> {
        match self.cellvars.get(idx) {
            Some(name) => Some(name),
            None => self.freevars.get(idx - self.cellvars.len()).map(String::as_str),
        }
    }

    /// Decodes once and keeps the result for both tiers.
    pub fn decoded(&self) -> Result<&Decoded, DecodeError> {
        self.decoded
            .get_or_init(|| decode(self))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn disassemble(&self) -> Result<String, DecodeError> {
        let decoded = self.decoded()?;
        Ok(Disassembly { code: self, decoded }.to_string())
    }

    /// Nested code units referenced from the constant pool.
    pub fn nested(&self) -> impl Iterator<Item = &std::rc::Rc<CodeUnit>> {
        self.consts.iter().filter_map(|c| match c.obj() {
            Object::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn use_jit(&self) -> bool {
        self.tier.borrow().use_jit
    }

    pub fn set_use_jit(&self, enabled: bool) {
        self.tier.borrow_mut().use_jit = enabled;
    }

    /// Requested level; `None` means "use the configured default".
    pub fn optimization(&self) -> Option<OptLevel> {
        self.tier.borrow().optimization
    }

    pub fn set_optimization(&self, level: Option<OptLevel>) {
        self.tier.borrow_mut().optimization = level;
    }

    /// Fixes an automatic level to `default` and returns the effective level.
    pub(crate) fn resolve_optimization(&self, default: OptLevel) -> OptLevel {
        let mut tier = self.tier.borrow_mut();
        *tier.optimization.get_or_insert(default)
    }

    pub fn tier_state(&self) -> TierState {
        self.tier.borrow().state
    }

    pub(crate) fn set_tier_state(&self, state: TierState) {
        let mut tier = self.tier.borrow_mut();
        if let TierState::Failed(level) = state {
            tier.failed.insert(level);
        }
        tier.state = state;
    }

    pub fn has_failed(&self, level: OptLevel) -> bool {
        self.tier.borrow().failed.contains(&level)
    }

    /// Remembers a cache holding artifacts for this unit so they can be
    /// evicted when the unit is dropped.
    pub(crate) fn register_cache(&self, cache: &Arc<ArtifactCache>) {
        let mut caches = self.caches.borrow_mut();
        if !caches
            .iter()
            .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(cache)))
        {
            caches.push(Arc::downgrade(cache));
        }
    }
}

impl Drop for CodeUnit {
    fn drop(&mut self) {
        for cache in self.caches.get_mut().drain(..) {
            if let Some(cache) = cache.upgrade() {
                cache.invalidate(self.id);
            }
        }
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("argcount", &self.argcount)
            .field("flags", &self.flags)
            .field("len", &self.code.len())
            .finish()
    }
}

/// Mutable description of a code unit under construction.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    pub name: String,
    pub argcount: usize,
    pub flags: u32,
    pub code: Vec<u8>,
    pub consts: Vec<Value>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
}

fn same_const(a: &Value, b: &Value) -> bool {
    match (a.obj(), b.obj()) {
        (Object::None, Object::None) => true,
        (Object::Bool(x), Object::Bool(y)) => x == y,
        (Object::Int(x), Object::Int(y)) => x == y,
        (Object::Float(x), Object::Float(y)) => x.to_bits() == y.to_bits(),
        (Object::Complex(a1, b1), Object::Complex(a2, b2)) => {
            a1.to_bits() == a2.to_bits() && b1.to_bits() == b2.to_bits()
        }
        (Object::Str(x), Object::Str(y)) => x == y,
        (Object::Tuple(xs), Object::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_const(x, y))
        }
        _ => false,
    }
}

fn intern(table: &mut Vec<String>, name: &str) -> u32 {
    match table.iter().position(|n| n == name) {
        Some(idx) => idx as u32,
        None => {
            table.push(name.to_string());
            (table.len() - 1) as u32
        }
    }
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: CO_OPTIMIZED | CO_NEWLOCALS,
            ..Self::default()
        }
    }

    /// Adds a constant, reusing an existing slot holding the same value of
    /// the same type. Code objects are never shared.
    pub fn add_const(&mut self, value: Value) -> u32 {
        if let Some(idx) = self.consts.iter().position(|c| same_const(c, &value)) {
            return idx as u32;
        }
        self.consts.push(value);
        (self.consts.len() - 1) as u32
    }

    pub fn add_name(&mut self, name: &str) -> u32 {
        intern(&mut self.names, name)
    }

    pub fn add_local(&mut self, name: &str) -> u32 {
        intern(&mut self.varnames, name)
    }

    /// Appends one instruction, emitting `EXTENDED_ARG` when the argument
    /// needs more than 16 bits.
    pub fn emit(&mut self, op: Opcode, arg: u32) {
        if op.has_arg() {
            if arg > 0xffff {
                let high = arg >> 16;
                self.code.push(Opcode::ExtendedArg.byte());
                self.code.extend_from_slice(&(high as u16).to_le_bytes());
            }
            self.code.push(op.byte());
            self.code.extend_from_slice(&(arg as u16).to_le_bytes());
        } else {
            self.code.push(op.byte());
        }
    }

    pub fn build(self) -> std::rc::Rc<CodeUnit> {
        std::rc::Rc::new(CodeUnit {
            id: CodeId::fresh(),
            name: self.name,
            argcount: self.argcount,
            flags: self.flags,
            code: self.code,
            consts: self.consts,
            names: self.names,
            varnames: self.varnames,
            cellvars: self.cellvars,
            freevars: self.freevars,
            decoded: OnceCell::new(),
            tier: RefCell::new(Tier {
                use_jit: false,
                optimization: None,
                state: TierState::Interpreted,
                failed: BTreeSet::new(),
            }),
            caches: RefCell::new(Vec::new()),
        })
    }
}
