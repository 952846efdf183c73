pub mod code;
pub mod config;
pub mod exc;
pub mod jit;
pub mod op;
pub mod util;
pub mod val;
pub mod vm;

pub use code::{CodeBuilder, CodeUnit, Opcode, TierState};
pub use config::JitConfig;
pub use exc::{ExcKind, ExceptionState, RtResult};
pub use jit::{ArtifactCache, CompileError, OptLevel};
pub use val::Value;
pub use vm::Vm;
