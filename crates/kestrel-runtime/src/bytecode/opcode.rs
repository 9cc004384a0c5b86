//! Bytecode instruction set
//!
//! Each instruction is one opcode byte followed by zero to two fixed-width
//! operands (1 or 2 bytes, big-endian). The width table below is the single
//! source of truth for encoding, decoding and jump patching.

/// Operand value marking an absent try target
pub const NO_TARGET: usize = 0xFFFF;

/// Bytecode opcode
///
/// Stack-based VM with explicit byte values grouped by category.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Constants (0x01-0x0F) =====
    /// Push constant from pool [u16 index]
    Constant = 0x01,
    /// Push null
    Null = 0x02,
    /// Push true
    True = 0x03,
    /// Push false
    False = 0x04,

    // ===== Variables (0x10-0x1F) =====
    /// Push local slot [u8 index]
    GetLocal = 0x10,
    /// Store top of stack into local slot, leaving it on the stack [u8 index]
    SetLocal = 0x11,
    /// Push global [u16 index]
    GetGlobal = 0x12,
    /// Store top of stack into global, leaving it on the stack [u16 index]
    SetGlobal = 0x13,
    /// Push captured value of the running closure [u8 index]
    GetFree = 0x14,
    /// Store into captured cell, leaving the value on the stack [u8 index]
    SetFree = 0x15,
    /// Push native function from the builtin table [u8 index]
    GetBuiltin = 0x16,
    /// Push the running closure (self-recursion)
    CurrentClosure = 0x17,
    /// Queue the shared cell of a local for the next `Closure` [u8 index]
    CaptureLocal = 0x18,
    /// Queue a captured cell of the running closure for the next `Closure` [u8 index]
    CaptureFree = 0x19,
    /// Queue a cell holding the running closure for the next `Closure`
    CaptureSelf = 0x1A,

    // ===== Arithmetic (0x20-0x2F) =====
    /// Pop b, pop a, push a + b
    Add = 0x20,
    /// Pop b, pop a, push a - b
    Sub = 0x21,
    /// Pop b, pop a, push a * b
    Mul = 0x22,
    /// Pop b, pop a, push a / b
    Div = 0x23,
    /// Pop b, pop a, push a % b
    Mod = 0x24,
    /// Pop a, push -a
    Negate = 0x25,

    // ===== Comparison (0x30-0x3F) =====
    /// Pop b, pop a, push a == b
    Equal = 0x30,
    /// Pop b, pop a, push a != b
    NotEqual = 0x31,
    /// Pop b, pop a, push a > b (`<` compiles to this with swapped operands)
    Greater = 0x32,
    /// Pop b, pop a, push a >= b
    GreaterEqual = 0x33,

    // ===== Logical (0x40-0x4F) =====
    /// Pop a, push !a
    Not = 0x40,

    // ===== Control flow (0x50-0x5F) =====
    /// Unconditional jump [u16 absolute target]
    Jump = 0x50,
    /// Pop condition, jump if falsy [u16 absolute target]
    JumpIfFalse = 0x51,

    // ===== Functions (0x60-0x6F) =====
    /// Call callee below N arguments [u8 arg_count]
    Call = 0x60,
    /// Return top of stack to the caller
    ReturnValue = 0x61,
    /// Return null to the caller
    Return = 0x62,
    /// Build closure from compiled function and the last N queued cells [u16 const, u8 free_count]
    Closure = 0x63,

    // ===== Collections (0x70-0x7F) =====
    /// Build array from N stack values [u16 count]
    Array = 0x70,
    /// Build hash map from N stack values, alternating key/value [u16 count]
    Hash = 0x71,
    /// Build ordered map from N stack values, alternating key/value [u16 count]
    OrderedMap = 0x72,
    /// Pop index, pop target, push target[index]
    GetIndex = 0x73,
    /// Pop value, pop index, pop target, store, push value
    SetIndex = 0x74,

    // ===== Stack manipulation (0x80-0x8F) =====
    /// Pop and discard top of stack
    Pop = 0x80,
    /// Duplicate top of stack
    Dup = 0x81,

    // ===== Classes (0x90-0x9F) =====
    /// Pop instance, push field [u16 name const]
    GetProperty = 0x90,
    /// Pop value, pop instance, store field, push value [u16 name const]
    SetProperty = 0x91,
    /// Call method on receiver below N arguments [u16 name const, u8 arg_count]
    Invoke = 0x92,
    /// Pop class, call its parent's method on receiver [u16 name const, u8 arg_count]
    InvokeSuper = 0x93,

    // ===== Exceptions (0xA0-0xAF) =====
    /// Push handler record [u16 catch target, u16 finally target]
    TryEnter = 0xA0,
    /// Normal exit from a protected region: pop handler, jump [u16 target]
    FinallyEnd = 0xA1,
    /// Pop value and throw it
    Throw = 0xA2,
    /// End of a finally block: pop flag and value, rethrow if flag is true
    Rethrow = 0xA3,

    // ===== Concurrency (0xB0-0xBF) =====
    /// Start a task running callee with N arguments, push its result channel [u8 arg_count]
    Spawn = 0xB0,
    /// Create a channel; with flag 1 the capacity is popped first [u8 has_capacity]
    Channel = 0xB1,
    /// Pop value, pop channel, send, push null
    Send = 0xB2,
    /// Pop channel, push received value
    Receive = 0xB3,

    // ===== Special (0xF0-0xFF) =====
    /// End of program
    Halt = 0xFF,
}

impl Opcode {
    /// Byte width of each operand, in order
    pub const fn operand_widths(self) -> &'static [usize] {
        match self {
            Opcode::Constant
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::Jump
            | Opcode::JumpIfFalse
            | Opcode::Array
            | Opcode::Hash
            | Opcode::OrderedMap
            | Opcode::GetProperty
            | Opcode::SetProperty
            | Opcode::FinallyEnd => &[2],
            Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::GetFree
            | Opcode::SetFree
            | Opcode::GetBuiltin
            | Opcode::CaptureLocal
            | Opcode::CaptureFree
            | Opcode::Call
            | Opcode::Spawn
            | Opcode::Channel => &[1],
            Opcode::Closure | Opcode::Invoke | Opcode::InvokeSuper => &[2, 1],
            Opcode::TryEnter => &[2, 2],
            _ => &[],
        }
    }

    /// Total encoded length of the instruction including the opcode byte
    pub fn instruction_len(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }

    /// Indexes of operands that hold absolute jump targets
    pub const fn jump_operands(self) -> &'static [usize] {
        match self {
            Opcode::Jump | Opcode::JumpIfFalse | Opcode::FinallyEnd => &[0],
            Opcode::TryEnter => &[0, 1],
            _ => &[],
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x01 => Ok(Opcode::Constant),
            0x02 => Ok(Opcode::Null),
            0x03 => Ok(Opcode::True),
            0x04 => Ok(Opcode::False),
            0x10 => Ok(Opcode::GetLocal),
            0x11 => Ok(Opcode::SetLocal),
            0x12 => Ok(Opcode::GetGlobal),
            0x13 => Ok(Opcode::SetGlobal),
            0x14 => Ok(Opcode::GetFree),
            0x15 => Ok(Opcode::SetFree),
            0x16 => Ok(Opcode::GetBuiltin),
            0x17 => Ok(Opcode::CurrentClosure),
            0x18 => Ok(Opcode::CaptureLocal),
            0x19 => Ok(Opcode::CaptureFree),
            0x1A => Ok(Opcode::CaptureSelf),
            0x20 => Ok(Opcode::Add),
            0x21 => Ok(Opcode::Sub),
            0x22 => Ok(Opcode::Mul),
            0x23 => Ok(Opcode::Div),
            0x24 => Ok(Opcode::Mod),
            0x25 => Ok(Opcode::Negate),
            0x30 => Ok(Opcode::Equal),
            0x31 => Ok(Opcode::NotEqual),
            0x32 => Ok(Opcode::Greater),
            0x33 => Ok(Opcode::GreaterEqual),
            0x40 => Ok(Opcode::Not),
            0x50 => Ok(Opcode::Jump),
            0x51 => Ok(Opcode::JumpIfFalse),
            0x60 => Ok(Opcode::Call),
            0x61 => Ok(Opcode::ReturnValue),
            0x62 => Ok(Opcode::Return),
            0x63 => Ok(Opcode::Closure),
            0x70 => Ok(Opcode::Array),
            0x71 => Ok(Opcode::Hash),
            0x72 => Ok(Opcode::OrderedMap),
            0x73 => Ok(Opcode::GetIndex),
            0x74 => Ok(Opcode::SetIndex),
            0x80 => Ok(Opcode::Pop),
            0x81 => Ok(Opcode::Dup),
            0x90 => Ok(Opcode::GetProperty),
            0x91 => Ok(Opcode::SetProperty),
            0x92 => Ok(Opcode::Invoke),
            0x93 => Ok(Opcode::InvokeSuper),
            0xA0 => Ok(Opcode::TryEnter),
            0xA1 => Ok(Opcode::FinallyEnd),
            0xA2 => Ok(Opcode::Throw),
            0xA3 => Ok(Opcode::Rethrow),
            0xB0 => Ok(Opcode::Spawn),
            0xB1 => Ok(Opcode::Channel),
            0xB2 => Ok(Opcode::Send),
            0xB3 => Ok(Opcode::Receive),
            0xFF => Ok(Opcode::Halt),
            _ => Err(()),
        }
    }
}
