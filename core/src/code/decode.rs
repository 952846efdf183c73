use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use super::CodeUnit;
use super::opcode::{ArgKind, HAVE_ARGUMENT, Opcode};
use crate::op::CompareOp;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty instruction stream")]
    Empty,
    #[error("unknown opcode {byte} at offset {offset}")]
    UnknownOpcode { offset: usize, byte: u8 },
    #[error("truncated argument at offset {offset}")]
    TruncatedArgument { offset: usize },
    #[error("{opcode} at offset {offset}: operand {arg} out of range (table has {len})")]
    OperandOutOfRange {
        offset: usize,
        opcode: Opcode,
        arg: u32,
        len: usize,
    },
    #[error("jump at offset {offset} to {target} does not land on an instruction")]
    BadJumpTarget { offset: usize, target: usize },
    #[error("EXTENDED_ARG at offset {offset} is not followed by an opcode with an argument")]
    OrphanExtendedArg { offset: usize },
    #[error("bad comparison operator {arg} at offset {offset}")]
    BadCompareOp { offset: usize, arg: u32 },
    #[error("{opcode} at offset {offset}: bad count {arg}")]
    BadCount { offset: usize, opcode: Opcode, arg: u32 },
    #[error("control falls off the end of the code after offset {offset}")]
    FallsOffEnd { offset: usize },
}

/// One decoded instruction. `EXTENDED_ARG` prefixes are folded into the
/// instruction they extend, whose `offset` is that of the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub offset: usize,
    pub opcode: Opcode,
    pub arg: u32,
    /// Byte offset of the following instruction.
    pub next_offset: usize,
    /// Instruction index a jump or block setup refers to.
    pub target: Option<usize>,
}

/// A validated instruction stream with its basic-block entry points.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub instrs: Vec<Instr>,
    /// Instruction indices that begin a basic block.
    pub block_starts: BTreeSet<usize>,
    index_of: FastHashMap<usize, usize>,
}

impl Decoded {
    /// Instruction index for a byte offset, if one starts there.
    pub fn index_of(&self, offset: usize) -> Option<usize> {
        self.index_of.get(&offset).copied()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Instruction index range of the block starting at `start`.
    pub fn block_range(&self, start: usize) -> std::ops::Range<usize> {
        let end = self
            .block_starts
            .range(start + 1..)
            .next()
            .copied()
            .unwrap_or(self.instrs.len());
        start..end
    }
}

fn read_arg(bytes: &[u8], at: usize) -> Option<u32> {
    let lo = *bytes.get(at)? as u32;
    let hi = *bytes.get(at + 1)? as u32;
    Some(lo | (hi << 8))
}

/// Validates and decodes a code unit's instruction stream.
pub fn decode(code: &CodeUnit) -> Result<Decoded, DecodeError> {
    let bytes = &code.code;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut instrs = Vec::new();
    let mut index_of = fast_hash_map_new();
    let mut pc = 0;
    while pc < bytes.len() {
        let start = pc;
        let mut extended: u32 = 0;
        let mut byte = bytes[pc];
        while byte == Opcode::ExtendedArg.byte() {
            let arg = read_arg(bytes, pc + 1).ok_or(DecodeError::TruncatedArgument { offset: pc })?;
            extended = (extended << 16) | arg;
            pc += 3;
            byte = *bytes.get(pc).ok_or(DecodeError::OrphanExtendedArg { offset: start })?;
            if byte < HAVE_ARGUMENT {
                return Err(DecodeError::OrphanExtendedArg { offset: start });
            }
        }
        let opcode = Opcode::from_byte(byte).ok_or(DecodeError::UnknownOpcode { offset: pc, byte })?;
        let arg = if opcode.has_arg() {
            let low = read_arg(bytes, pc + 1).ok_or(DecodeError::TruncatedArgument { offset: pc })?;
            pc += 3;
            (extended << 16) | low
        } else {
            pc += 1;
            0
        };
        index_of.insert(start, instrs.len());
        instrs.push(Instr {
            offset: start,
            opcode,
            arg,
            next_offset: pc,
            target: None,
        });
    }

    let ncells = code.cellvars.len() + code.freevars.len();
    for instr in &mut instrs {
        let Instr { offset, opcode, arg, .. } = *instr;
        let bounded = |len: usize| {
            if (arg as usize) < len {
                Ok(())
            } else {
                Err(DecodeError::OperandOutOfRange { offset, opcode, arg, len })
            }
        };
        match opcode.arg_kind() {
            ArgKind::None | ArgKind::Count => {}
            ArgKind::Const => bounded(code.consts.len())?,
            ArgKind::Name => bounded(code.names.len())?,
            ArgKind::Local => bounded(code.varnames.len())?,
            ArgKind::Free => bounded(ncells)?,
            ArgKind::Compare => {
                if CompareOp::from_arg(arg).is_none() {
                    return Err(DecodeError::BadCompareOp { offset, arg });
                }
            }
            ArgKind::JRel | ArgKind::JAbs => {
                let target = if opcode.arg_kind() == ArgKind::JRel {
                    instr.next_offset + arg as usize
                } else {
                    arg as usize
                };
                let idx = index_of
                    .get(&target)
                    .copied()
                    .ok_or(DecodeError::BadJumpTarget { offset, target })?;
                instr.target = Some(idx);
            }
        }
        let bad_count = match opcode {
            Opcode::BuildSlice => !(2..=3).contains(&arg),
            Opcode::RaiseVarargs => arg > 3,
            Opcode::DupTopx => !(1..=5).contains(&arg),
            Opcode::ListAppend | Opcode::MapAdd => arg == 0,
            _ => false,
        };
        if bad_count {
            return Err(DecodeError::BadCount { offset, opcode, arg });
        }
    }

    if let Some(last) = instrs.last()
        && !last.opcode.is_terminator()
    {
        return Err(DecodeError::FallsOffEnd { offset: last.offset });
    }

    let mut block_starts = BTreeSet::new();
    block_starts.insert(0);
    for (i, instr) in instrs.iter().enumerate() {
        if let Some(target) = instr.target {
            block_starts.insert(target);
        }
        let ends_block = instr.opcode.is_terminator()
            || instr.opcode.is_jump()
            || matches!(instr.opcode, Opcode::EndFinally | Opcode::PopBlock);
        if ends_block && i + 1 < instrs.len() {
            block_starts.insert(i + 1);
        }
    }

    Ok(Decoded {
        instrs,
        block_starts,
        index_of,
    })
}

/// `dis`-style listing of a code unit.
pub struct Disassembly<'a> {
    pub(super) code: &'a CodeUnit,
    pub(super) decoded: &'a Decoded,
}

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code;
        writeln!(f, "code {} (argcount={}, locals={})", code.name, code.argcount, code.varnames.len())?;
        for (i, instr) in self.decoded.instrs.iter().enumerate() {
            let marker = if self.decoded.block_starts.contains(&i) { ">>" } else { "  " };
            write!(f, "{marker} {:>5} {:<22}", instr.offset, instr.opcode.name())?;
            if instr.opcode.has_arg() {
                write!(f, " {:>5}", instr.arg)?;
                let note = match instr.opcode.arg_kind() {
                    ArgKind::Const => Some(code.consts[instr.arg as usize].debug_repr()),
                    ArgKind::Name => Some(code.names[instr.arg as usize].clone()),
                    ArgKind::Local => Some(code.varnames[instr.arg as usize].clone()),
                    ArgKind::Free => code.deref_name(instr.arg as usize).map(str::to_string),
                    ArgKind::Compare => CompareOp::from_arg(instr.arg).map(|op| op.symbol().to_string()),
                    ArgKind::JRel | ArgKind::JAbs => instr
                        .target
                        .map(|t| format!("to {}", self.decoded.instrs[t].offset)),
                    ArgKind::None | ArgKind::Count => None,
                };
                if let Some(note) = note {
                    write!(f, " ({note})")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
