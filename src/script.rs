//! Immutable script bytes and instruction decoding.

use std::rc::Rc;

use crate::error::VMError;
use crate::instruction::Instruction;
use crate::op_code::operand_encoding;

/// An immutable byte sequence of compiled instructions.
///
/// Cloning a script shares the underlying bytes; two scripts compare equal
/// when they share storage or their contents match.
#[derive(Clone, Debug)]
pub struct Script(Rc<[u8]>);

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    /// Length of the script in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decodes the instruction at `offset`.
    ///
    /// An offset at or past the end of the script yields a synthetic RET of
    /// size 1, which is how scripts terminate without an explicit RET. A
    /// truncated operand is a decode error; an unknown opcode byte is not,
    /// and faults only at dispatch.
    pub fn instruction_at(&self, offset: usize) -> Result<Instruction, VMError> {
        if offset >= self.0.len() {
            return Ok(Instruction::ret());
        }
        let opcode = self.0[offset];
        let encoding = operand_encoding(opcode);
        let mut cursor = offset + 1;
        let operand_len = if encoding.prefix_size > 0 {
            let prefix = self.read_exact(cursor, encoding.prefix_size)?;
            cursor += encoding.prefix_size;
            let mut len = 0usize;
            for (i, byte) in prefix.iter().enumerate() {
                len |= (*byte as usize) << (8 * i);
            }
            len
        } else {
            encoding.fixed_size
        };
        let operand = self.read_exact(cursor, operand_len)?.to_vec();
        Ok(Instruction {
            opcode,
            operand,
            prefix_size: encoding.prefix_size,
        })
    }

    /// Returns exactly `count` bytes starting at `start`.
    fn read_exact(&self, start: usize, count: usize) -> Result<&[u8], VMError> {
        let end = start
            .checked_add(count)
            .ok_or(VMError::PointerOverflow { offset: start })?;
        self.0
            .get(start..end)
            .ok_or_else(|| VMError::TruncatedInstruction {
                offset: start,
                requested: count,
                available: self.0.len().saturating_sub(start),
            })
    }
}

impl PartialEq for Script {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for Script {}

impl From<Vec<u8>> for Script {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op_code::OpCode;

    #[test]
    fn decodes_fixed_operand() {
        let script = Script::new(vec![OpCode::PushInt16 as u8, 0x39, 0x05]);
        let i = script.instruction_at(0).unwrap();
        assert_eq!(i.opcode, OpCode::PushInt16 as u8);
        assert_eq!(i.operand, vec![0x39, 0x05]);
        assert_eq!(i.size(), 3);
    }

    #[test]
    fn decodes_length_prefixed_operand() {
        let script = Script::new(vec![OpCode::PushData1 as u8, 3, b'a', b'b', b'c']);
        let i = script.instruction_at(0).unwrap();
        assert_eq!(i.operand, b"abc");
        assert_eq!(i.size(), 5);
    }

    #[test]
    fn truncated_operand_is_a_decode_error() {
        let script = Script::new(vec![OpCode::PushInt32 as u8, 0x01]);
        assert!(matches!(
            script.instruction_at(0),
            Err(VMError::TruncatedInstruction { requested: 4, .. })
        ));
    }

    #[test]
    fn truncated_pushdata_payload_is_a_decode_error() {
        let script = Script::new(vec![OpCode::PushData1 as u8, 10, 1, 2]);
        assert!(matches!(
            script.instruction_at(0),
            Err(VMError::TruncatedInstruction { .. })
        ));
    }

    #[test]
    fn unknown_opcode_decodes_as_single_byte() {
        let script = Script::new(vec![0xFF]);
        let i = script.instruction_at(0).unwrap();
        assert_eq!(i.opcode, 0xFF);
        assert_eq!(i.size(), 1);
    }

    #[test]
    fn past_end_yields_synthetic_ret() {
        let script = Script::new(vec![OpCode::Nop as u8]);
        let i = script.instruction_at(1).unwrap();
        assert_eq!(i.opcode, OpCode::Ret as u8);
        let i = script.instruction_at(100).unwrap();
        assert_eq!(i.opcode, OpCode::Ret as u8);
    }

    #[test]
    fn equality_by_content_or_identity() {
        let a = Script::new(vec![1, 2, 3]);
        let b = a.clone();
        let c = Script::new(vec![1, 2, 3]);
        let d = Script::new(vec![4]);
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, d);
    }
}
