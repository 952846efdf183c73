use std::rc::Rc;
use std::sync::Arc;

use crate::code::CodeUnit;
use crate::code::asm::Program;
use crate::config::JitConfig;
use crate::exc::{ExcKind, ExceptionState, RtResult};
use crate::jit::{self, ArtifactCache, JitStats};
use crate::op::{bind_arguments, call_value};
use crate::val::{Function, Namespace, Object, Value};

pub mod builtins;
mod frame;
mod interp;

pub use frame::Frame;
pub(crate) use interp::run as interpret;

#[cfg(test)]
mod vm_test;

/// Call-stack entry kept for recursion limits and diagnostics.
#[derive(Debug, Clone)]
pub struct CallFrameInfo {
    pub function_name: String,
    pub depth: usize,
}

pub struct Vm {
    config: JitConfig,
    builtins: Rc<Namespace>,
    call_stack: Vec<CallFrameInfo>,
    /// The exception currently being handled, as `sys.exc_info()` sees it.
    pub(crate) handled: Option<ExceptionState>,
    cache: Arc<ArtifactCache>,
    pub(crate) stats: JitStats,
}

impl Vm {
    /// A VM sharing the process-wide artifact cache.
    pub fn new(config: JitConfig) -> Self {
        Self::with_cache(config, ArtifactCache::global())
    }

    pub fn with_cache(config: JitConfig, cache: Arc<ArtifactCache>) -> Self {
        let builtins = Rc::new(Namespace::new());
        builtins::install(&builtins);
        Self {
            config,
            builtins,
            call_stack: Vec::new(),
            handled: None,
            cache,
            stats: JitStats::default(),
        }
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut JitConfig {
        &mut self.config
    }

    pub fn builtins(&self) -> &Rc<Namespace> {
        &self.builtins
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn stats(&self) -> &JitStats {
        &self.stats
    }

    #[inline]
    pub fn call_stack_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn call_stack(&self) -> &[CallFrameInfo] {
        &self.call_stack
    }

    /// The exception being handled by the innermost active `except` clause.
    pub fn handled_exception(&self) -> Option<&ExceptionState> {
        self.handled.as_ref()
    }

    /// Calls any callable. This is the single entry for both tiers.
    pub fn call(&mut self, callable: &Value, args: Vec<Value>, kwargs: Vec<(Value, Value)>) -> RtResult<Value> {
        call_value(self, callable, args, kwargs)
    }

    /// Creates a function object over `code`.
    pub fn make_function(code: Rc<CodeUnit>, globals: Rc<Namespace>, defaults: Vec<Value>, closure: Vec<Value>) -> Value {
        Value::new(Object::Function(Function {
            name: code.name.clone(),
            code,
            globals,
            defaults,
            closure,
        }))
    }

    /// Binds every `def` of `program` into a fresh global namespace, then
    /// runs its `body` units in order against that namespace.
    pub fn load_program(&mut self, program: &Program) -> RtResult<Rc<Namespace>> {
        let globals = Rc::new(Namespace::new());
        for unit in program.defs() {
            let func = Self::make_function(unit.code.clone(), globals.clone(), unit.defaults.clone(), Vec::new());
            globals.set(&unit.code.name, func);
        }
        for unit in program.bodies() {
            self.run_module(unit.code.clone(), globals.clone())?;
        }
        Ok(globals)
    }

    /// Runs module-level code with `globals` as its name table.
    pub fn run_module(&mut self, code: Rc<CodeUnit>, globals: Rc<Namespace>) -> RtResult<Value> {
        let frame = Frame::new(code, globals.clone(), Some(globals), Vec::new(), &[])?;
        self.execute(frame)
    }

    pub(crate) fn invoke_function(
        &mut self,
        func: &Function,
        args: Vec<Value>,
        kwargs: Vec<(Value, Value)>,
    ) -> RtResult<Value> {
        let locals = bind_arguments(func, args, kwargs)?;
        let names = (!func.code.is_optimized()).then(|| Rc::new(Namespace::new()));
        let frame = Frame::new(func.code.clone(), func.globals.clone(), names, locals, &func.closure)?;
        self.execute(frame)
    }

    /// Pushes a call-stack entry and hands the frame to the dispatcher.
    fn execute(&mut self, mut frame: Frame) -> RtResult<Value> {
        let depth = self.call_stack.len();
        if depth >= self.config.recursion_limit {
            return Err(ExceptionState::new(
                ExcKind::RuntimeError,
                "maximum recursion depth exceeded",
            ));
        }
        self.call_stack.push(CallFrameInfo {
            function_name: frame.code.name.clone(),
            depth,
        });
        let saved = self.handled.clone();
        let result = jit::run_frame(self, &mut frame);
        self.handled = saved;
        self.call_stack.pop();
        result
    }
}
