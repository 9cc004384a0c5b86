//! Bytecode disassembler
//!
//! Converts bytecode back to structured instructions or a human-readable
//! listing, and re-encodes structured instructions byte for byte.

use super::{make, read_operands, Bytecode, Opcode, NO_TARGET};
use crate::value::Value;
use std::fmt::Write;
use thiserror::Error;

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: Opcode,
    pub operands: Vec<usize>,
}

impl Instruction {
    /// Absolute jump targets carried by this instruction
    pub fn jump_targets(&self) -> Vec<usize> {
        self.opcode
            .jump_operands()
            .iter()
            .map(|&i| self.operands[i])
            .filter(|&t| t != NO_TARGET)
            .collect()
    }

    /// Offset of the following instruction
    pub fn next_offset(&self) -> usize {
        self.offset + self.opcode.instruction_len()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown opcode {byte:#04x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("truncated {opcode:?} at offset {offset}")]
    Truncated { opcode: Opcode, offset: usize },
}

/// Decode an instruction block
pub fn decode(instructions: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < instructions.len() {
        let byte = instructions[offset];
        let opcode =
            Opcode::try_from(byte).map_err(|_| DecodeError::UnknownOpcode { byte, offset })?;
        let (operands, read) = read_operands(opcode, &instructions[offset + 1..])
            .ok_or(DecodeError::Truncated { opcode, offset })?;
        out.push(Instruction {
            offset,
            opcode,
            operands,
        });
        offset += 1 + read;
    }
    Ok(out)
}

/// Re-encode decoded instructions
pub fn assemble(instructions: &[Instruction]) -> Vec<u8> {
    instructions
        .iter()
        .flat_map(|ins| make(ins.opcode, &ins.operands))
        .collect()
}

/// Disassemble bytecode to human-readable format
///
/// # Format
/// ```text
/// === Constants ===
/// 0: 42
/// 1: "hello"
///
/// === Instructions ===
/// 0000  Constant 0
/// 0003  Add
/// 0004  Halt
/// ```
///
/// Compiled functions in the pool are listed after the top-level block.
pub fn disassemble(bytecode: &Bytecode) -> String {
    let mut output = String::new();

    if !bytecode.constants.is_empty() {
        let _ = writeln!(output, "=== Constants ===");
        for (idx, constant) in bytecode.constants.iter().enumerate() {
            let _ = writeln!(output, "{}: {}", idx, format_value(constant));
        }
        let _ = writeln!(output);
    }

    let _ = writeln!(output, "=== Instructions ===");
    write_block(&mut output, &bytecode.instructions);

    for (idx, constant) in bytecode.constants.iter().enumerate() {
        if let Value::CompiledFunction(func) = constant {
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "=== fn {} (constant {}, {} locals, {} params) ===",
                func.display_name(),
                idx,
                func.num_locals,
                func.num_parameters
            );
            write_block(&mut output, &func.instructions);
        }
    }

    output
}

fn write_block(output: &mut String, instructions: &[u8]) {
    match decode(instructions) {
        Ok(decoded) => {
            for ins in &decoded {
                let _ = writeln!(output, "{}", format_instruction(ins));
            }
        }
        Err(err) => {
            let _ = writeln!(output, "<{}>", err);
        }
    }
}

fn format_instruction(ins: &Instruction) -> String {
    let mut line = format!("{:04}  {:?}", ins.offset, ins.opcode);
    for operand in &ins.operands {
        if *operand == NO_TARGET && !ins.opcode.jump_operands().is_empty() {
            line.push_str(" -");
        } else {
            let _ = write!(line, " {}", operand);
        }
    }
    line
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s.as_ref()),
        Value::CompiledFunction(f) => format!("<fn {}>", f.display_name()),
        Value::Class(c) => match &c.parent_name {
            Some(parent) => format!("<class {} extends {}>", c.name, parent),
            None => format!("<class {}>", c.name),
        },
        other => other.to_string(),
    }
}
