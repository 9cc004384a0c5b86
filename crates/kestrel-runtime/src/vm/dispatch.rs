//! Optimized instruction dispatch for the VM
//!
//! Uses a static lookup table for O(1) opcode decoding instead of
//! match-based dispatch, reducing branch mispredictions in the hot loop.

use crate::bytecode::Opcode;

/// Static dispatch table mapping byte values to optional Opcodes.
/// Indexed by the raw u8 opcode byte for O(1) lookup.
static OPCODE_TABLE: [Option<Opcode>; 256] = {
    let mut table: [Option<Opcode>; 256] = [None; 256];

    // Constants (0x01-0x04)
    table[0x01] = Some(Opcode::Constant);
    table[0x02] = Some(Opcode::Null);
    table[0x03] = Some(Opcode::True);
    table[0x04] = Some(Opcode::False);

    // Variables (0x10-0x1A)
    table[0x10] = Some(Opcode::GetLocal);
    table[0x11] = Some(Opcode::SetLocal);
    table[0x12] = Some(Opcode::GetGlobal);
    table[0x13] = Some(Opcode::SetGlobal);
    table[0x14] = Some(Opcode::GetFree);
    table[0x15] = Some(Opcode::SetFree);
    table[0x16] = Some(Opcode::GetBuiltin);
    table[0x17] = Some(Opcode::CurrentClosure);
    table[0x18] = Some(Opcode::CaptureLocal);
    table[0x19] = Some(Opcode::CaptureFree);
    table[0x1A] = Some(Opcode::CaptureSelf);

    // Arithmetic (0x20-0x25)
    table[0x20] = Some(Opcode::Add);
    table[0x21] = Some(Opcode::Sub);
    table[0x22] = Some(Opcode::Mul);
    table[0x23] = Some(Opcode::Div);
    table[0x24] = Some(Opcode::Mod);
    table[0x25] = Some(Opcode::Negate);

    // Comparison (0x30-0x33)
    table[0x30] = Some(Opcode::Equal);
    table[0x31] = Some(Opcode::NotEqual);
    table[0x32] = Some(Opcode::Greater);
    table[0x33] = Some(Opcode::GreaterEqual);

    // Logical
    table[0x40] = Some(Opcode::Not);

    // Control flow (0x50-0x51)
    table[0x50] = Some(Opcode::Jump);
    table[0x51] = Some(Opcode::JumpIfFalse);

    // Functions (0x60-0x63)
    table[0x60] = Some(Opcode::Call);
    table[0x61] = Some(Opcode::ReturnValue);
    table[0x62] = Some(Opcode::Return);
    table[0x63] = Some(Opcode::Closure);

    // Collections (0x70-0x74)
    table[0x70] = Some(Opcode::Array);
    table[0x71] = Some(Opcode::Hash);
    table[0x72] = Some(Opcode::OrderedMap);
    table[0x73] = Some(Opcode::GetIndex);
    table[0x74] = Some(Opcode::SetIndex);

    // Stack manipulation (0x80-0x81)
    table[0x80] = Some(Opcode::Pop);
    table[0x81] = Some(Opcode::Dup);

    // Classes (0x90-0x93)
    table[0x90] = Some(Opcode::GetProperty);
    table[0x91] = Some(Opcode::SetProperty);
    table[0x92] = Some(Opcode::Invoke);
    table[0x93] = Some(Opcode::InvokeSuper);

    // Exceptions (0xA0-0xA3)
    table[0xA0] = Some(Opcode::TryEnter);
    table[0xA1] = Some(Opcode::FinallyEnd);
    table[0xA2] = Some(Opcode::Throw);
    table[0xA3] = Some(Opcode::Rethrow);

    // Concurrency (0xB0-0xB3)
    table[0xB0] = Some(Opcode::Spawn);
    table[0xB1] = Some(Opcode::Channel);
    table[0xB2] = Some(Opcode::Send);
    table[0xB3] = Some(Opcode::Receive);

    // Special
    table[0xFF] = Some(Opcode::Halt);

    table
};

/// Decode an opcode byte using the static lookup table.
/// Returns None for invalid opcode bytes.
#[inline(always)]
pub fn decode_opcode(byte: u8) -> Option<Opcode> {
    // SAFETY: the table has 256 entries, one per possible byte
    unsafe { *OPCODE_TABLE.get_unchecked(byte as usize) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_agrees_with_try_from() {
        for byte in 0..=u8::MAX {
            assert_eq!(decode_opcode(byte), Opcode::try_from(byte).ok(), "byte 0x{:02X}", byte);
        }
    }

    #[test]
    fn test_round_trip_byte_value() {
        for byte in 0..=u8::MAX {
            if let Some(opcode) = decode_opcode(byte) {
                assert_eq!(opcode as u8, byte);
            }
        }
    }
}
