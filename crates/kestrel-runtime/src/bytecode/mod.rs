//! Bytecode artifact and instruction encoding
//!
//! A compiled unit is an instruction byte stream plus a constant pool.
//! Function bodies live in the pool as [`CompiledFunction`] constants with
//! their own instruction blocks.

pub mod disasm;
mod opcode;

pub use disasm::{assemble, decode, disassemble, DecodeError, Instruction};
pub use opcode::{Opcode, NO_TARGET};

use crate::span::Span;
use crate::value::{CompiledFunction, Value};

/// Debug information for bytecode
///
/// Maps instruction offsets to source spans for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugSpan {
    /// Byte offset of instruction in its block
    pub instruction_offset: usize,
    /// Source span for this instruction
    pub span: Span,
}

/// Bytecode container
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    /// Top-level instruction bytes
    pub instructions: Vec<u8>,
    /// Constant pool (referenced by u16 index)
    pub constants: Vec<Value>,
    /// Debug information for the top-level block
    pub debug_info: Vec<DebugSpan>,
}

impl Bytecode {
    /// Create a new empty bytecode container
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the top-level block as the function run by the main frame
    pub fn main_function(&self) -> CompiledFunction {
        CompiledFunction {
            name: Some("<main>".to_string()),
            instructions: self.instructions.clone(),
            num_locals: 0,
            num_parameters: 0,
            debug_info: self.debug_info.clone(),
        }
    }

    /// Instruction blocks of every compiled function in the pool
    pub fn functions(&self) -> impl Iterator<Item = &CompiledFunction> {
        self.constants.iter().filter_map(|c| match c {
            Value::CompiledFunction(f) => Some(f.as_ref()),
            _ => None,
        })
    }
}

/// Encode one instruction
///
/// Operands wider than their slot are truncated to the slot width; the
/// compiler checks limits before encoding.
pub fn make(opcode: Opcode, operands: &[usize]) -> Vec<u8> {
    let widths = opcode.operand_widths();
    debug_assert_eq!(widths.len(), operands.len(), "operand count for {:?}", opcode);

    let mut out = Vec::with_capacity(opcode.instruction_len());
    out.push(opcode as u8);
    for (operand, width) in operands.iter().zip(widths) {
        match width {
            2 => out.extend_from_slice(&(*operand as u16).to_be_bytes()),
            _ => out.push(*operand as u8),
        }
    }
    out
}

/// Decode the operands following an opcode
///
/// `bytes` starts right after the opcode byte. Returns the operands and the
/// number of bytes consumed, or `None` if the stream is truncated.
pub fn read_operands(opcode: Opcode, bytes: &[u8]) -> Option<(Vec<usize>, usize)> {
    let mut operands = Vec::with_capacity(opcode.operand_widths().len());
    let mut offset = 0;
    for width in opcode.operand_widths() {
        let operand = match width {
            2 => read_u16(bytes, offset)? as usize,
            _ => *bytes.get(offset)? as usize,
        };
        operands.push(operand);
        offset += width;
    }
    Some((operands, offset))
}

/// Read a big-endian u16
pub fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let hi = *bytes.get(offset)?;
    let lo = *bytes.get(offset + 1)?;
    Some(u16::from_be_bytes([hi, lo]))
}
