mod artifact;
pub(crate) mod bridge;
mod cache;
mod dispatch;
mod error;
mod exec;
pub mod ir;
mod lower;
mod options;
mod passes;
mod render;

#[cfg(test)]
mod tests;

pub use artifact::{ArtifactSummary, CompiledArtifact, compile};
pub use cache::{ArtifactCache, DEFAULT_CAPACITY, Lookup};
pub use dispatch::{JitStats, run_frame};
pub use error::CompileError;
pub use lower::lower;
pub use options::OptLevel;
pub use passes::{PassStats, optimize};
