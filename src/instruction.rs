//! Decoded instruction records.

use crate::op_code::OpCode;

/// One decoded instruction: the raw opcode byte and its operand payload.
///
/// The opcode is kept as a raw byte so unknown opcodes survive decoding and
/// fault only when dispatched. For the PUSHDATA family the operand holds the
/// payload without its length prefix; [`size`](Self::size) still covers the
/// full on-wire length.
#[derive(Clone, Debug)]
pub struct Instruction {
    /// Raw opcode byte.
    pub opcode: u8,
    /// Operand payload, excluding any length prefix.
    pub operand: Vec<u8>,
    /// Length-prefix width consumed from the wire, 0 for most opcodes.
    pub(crate) prefix_size: usize,
}

impl Instruction {
    /// The synthetic RET yielded when the instruction pointer runs past the
    /// end of the script.
    pub(crate) fn ret() -> Self {
        Self {
            opcode: OpCode::Ret as u8,
            operand: Vec::new(),
            prefix_size: 0,
        }
    }

    /// Total on-wire byte length: opcode, length prefix and operand.
    pub fn size(&self) -> usize {
        1 + self.prefix_size + self.operand.len()
    }

    // The token readers below index into operand bytes whose length the
    // decoder has already validated against the opcode's encoding table, so
    // the conversions cannot fail for any decoded instruction.

    /// First operand byte as a signed integer.
    pub fn token_i8(&self) -> i8 {
        self.operand[0] as i8
    }

    /// Second operand byte as a signed integer.
    pub fn token_i8_1(&self) -> i8 {
        self.operand[1] as i8
    }

    /// First four operand bytes as a little-endian signed integer.
    pub fn token_i32(&self) -> i32 {
        i32::from_le_bytes(self.operand[..4].try_into().unwrap())
    }

    /// Operand bytes 4..8 as a little-endian signed integer.
    pub fn token_i32_1(&self) -> i32 {
        i32::from_le_bytes(self.operand[4..8].try_into().unwrap())
    }

    /// First operand byte.
    pub fn token_u8(&self) -> u8 {
        self.operand[0]
    }

    /// Second operand byte.
    pub fn token_u8_1(&self) -> u8 {
        self.operand[1]
    }

    /// First two operand bytes as a little-endian unsigned integer.
    pub fn token_u16(&self) -> u16 {
        u16::from_le_bytes(self.operand[..2].try_into().unwrap())
    }

    /// First four operand bytes as a little-endian unsigned integer.
    pub fn token_u32(&self) -> u32 {
        u32::from_le_bytes(self.operand[..4].try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counts_prefix_and_operand() {
        let i = Instruction {
            opcode: OpCode::PushData1 as u8,
            operand: vec![1, 2, 3],
            prefix_size: 1,
        };
        assert_eq!(i.size(), 5);
    }

    #[test]
    fn tokens_decode_little_endian() {
        let i = Instruction {
            opcode: OpCode::TryL as u8,
            operand: vec![0x04, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF],
            prefix_size: 0,
        };
        assert_eq!(i.token_i32(), 4);
        assert_eq!(i.token_i32_1(), -1);
    }

    #[test]
    fn synthetic_ret() {
        let i = Instruction::ret();
        assert_eq!(i.opcode, OpCode::Ret as u8);
        assert_eq!(i.size(), 1);
    }
}
