use serde::Serialize;

use super::error::CompileError;
use super::ir::Function;
use super::options::OptLevel;
use super::passes::{self, PassStats};
use super::{lower, render};
use crate::code::{CodeId, CodeUnit};

/// Executable form of one code unit at one optimization level.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    pub code_id: CodeId,
    pub name: String,
    pub level: OptLevel,
    pub function: Function,
    pub passes: PassStats,
}

/// Size figures reported by `--stats`.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub name: String,
    pub level: OptLevel,
    pub blocks: usize,
    pub instrs: usize,
    pub registers: u32,
    pub passes: PassStats,
}

impl CompiledArtifact {
    /// Textual form of the artifact. `code` must be the unit it was compiled
    /// from; it supplies constant and name annotations.
    pub fn render(&self, code: &CodeUnit) -> String {
        render::render(self, code)
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            name: self.name.clone(),
            level: self.level,
            blocks: self.function.blocks.len(),
            instrs: self.function.instr_count(),
            registers: self.function.nregs,
            passes: self.passes,
        }
    }
}

/// Lowers `code` and runs the passes selected by `level`.
pub fn compile(code: &CodeUnit, level: OptLevel) -> Result<CompiledArtifact, CompileError> {
    let mut function = lower::lower(code)?;
    let lowered_blocks = function.blocks.len();
    let stats = passes::optimize(&mut function, code, level);
    tracing::debug!(
        code = %code.name,
        id = %code.id(),
        %level,
        lowered_blocks,
        blocks = function.blocks.len(),
        "compiled code unit"
    );
    Ok(CompiledArtifact {
        code_id: code.id(),
        name: code.name.clone(),
        level,
        function,
        passes: stats,
    })
}
