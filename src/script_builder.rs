//! Incremental bytecode emission.
//!
//! Used by tests and embedders to assemble scripts without hand-encoding
//! operands. Integer and data pushes pick the smallest encoding; jump and
//! try emitters widen to the `_L` forms when an offset does not fit a
//! single signed byte.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::op_code::OpCode;
use crate::script::Script;

#[derive(Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current length of the emitted bytecode.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Emits a bare opcode.
    pub fn emit(&mut self, opcode: OpCode) -> &mut Self {
        self.bytes.push(opcode as u8);
        self
    }

    /// Emits an opcode followed by raw operand bytes.
    pub fn emit_with(&mut self, opcode: OpCode, operand: &[u8]) -> &mut Self {
        self.bytes.push(opcode as u8);
        self.bytes.extend_from_slice(operand);
        self
    }

    /// Emits arbitrary bytes verbatim.
    pub fn emit_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Emits the smallest push for an integer value.
    pub fn emit_push_int<T: Into<BigInt>>(&mut self, value: T) -> &mut Self {
        let value: BigInt = value.into();
        if let Some(small) = value.to_i64() {
            if (-1..=16).contains(&small) {
                let base = OpCode::Push0 as u8;
                self.bytes.push((base as i64 + small) as u8);
                return self;
            }
        }
        let bytes = value.to_signed_bytes_le();
        let (opcode, width) = match bytes.len() {
            0..=1 => (OpCode::PushInt8, 1),
            2 => (OpCode::PushInt16, 2),
            3..=4 => (OpCode::PushInt32, 4),
            5..=8 => (OpCode::PushInt64, 8),
            9..=16 => (OpCode::PushInt128, 16),
            _ => (OpCode::PushInt256, 32),
        };
        let padded = sign_extend(&bytes, width);
        self.emit_with(opcode, &padded)
    }

    pub fn emit_push_bool(&mut self, value: bool) -> &mut Self {
        self.emit(if value { OpCode::PushT } else { OpCode::PushF })
    }

    /// Emits PUSHDATA with the smallest length prefix.
    pub fn emit_push_data(&mut self, data: &[u8]) -> &mut Self {
        if data.len() <= u8::MAX as usize {
            self.bytes.push(OpCode::PushData1 as u8);
            self.bytes.push(data.len() as u8);
        } else if data.len() <= u16::MAX as usize {
            self.bytes.push(OpCode::PushData2 as u8);
            self.bytes.extend_from_slice(&(data.len() as u16).to_le_bytes());
        } else {
            self.bytes.push(OpCode::PushData4 as u8);
            self.bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        }
        self.bytes.extend_from_slice(data);
        self
    }

    /// Emits a jump, call or ENDTRY with its offset, widening a short form
    /// whose offset does not fit one signed byte.
    pub fn emit_jump(&mut self, opcode: OpCode, offset: i32) -> &mut Self {
        let (opcode, long) = match long_form(opcode) {
            Some(long_opcode) if i8::try_from(offset).is_err() => (long_opcode, true),
            Some(_) => (opcode, false),
            // already a long form
            None => (opcode, true),
        };
        if long {
            self.emit_with(opcode, &offset.to_le_bytes())
        } else {
            self.emit_with(opcode, &[(offset as i8) as u8])
        }
    }

    /// Emits TRY with its catch and finally offsets, widening to TRY_L when
    /// either does not fit one signed byte.
    pub fn emit_try(&mut self, catch_offset: i32, finally_offset: i32) -> &mut Self {
        if i8::try_from(catch_offset).is_ok() && i8::try_from(finally_offset).is_ok() {
            self.emit_with(
                OpCode::Try,
                &[(catch_offset as i8) as u8, (finally_offset as i8) as u8],
            )
        } else {
            let mut operand = [0u8; 8];
            operand[..4].copy_from_slice(&catch_offset.to_le_bytes());
            operand[4..].copy_from_slice(&finally_offset.to_le_bytes());
            self.emit_with(OpCode::TryL, &operand)
        }
    }

    pub fn emit_syscall(&mut self, id: u32) -> &mut Self {
        self.emit_with(OpCode::Syscall, &id.to_le_bytes())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn to_script(&self) -> Script {
        Script::new(self.bytes.clone())
    }
}

/// Pads a signed little-endian encoding to `width` bytes.
fn sign_extend(bytes: &[u8], width: usize) -> Vec<u8> {
    let fill = if bytes.last().is_some_and(|b| b & 0x80 != 0) {
        0xFF
    } else {
        0x00
    };
    let mut padded = bytes.to_vec();
    padded.resize(width, fill);
    padded
}

/// The 4-byte-offset counterpart of a short-offset opcode.
fn long_form(opcode: OpCode) -> Option<OpCode> {
    Some(match opcode {
        OpCode::Jmp => OpCode::JmpL,
        OpCode::JmpIf => OpCode::JmpIfL,
        OpCode::JmpIfNot => OpCode::JmpIfNotL,
        OpCode::JmpEq => OpCode::JmpEqL,
        OpCode::JmpNe => OpCode::JmpNeL,
        OpCode::JmpGt => OpCode::JmpGtL,
        OpCode::JmpGe => OpCode::JmpGeL,
        OpCode::JmpLt => OpCode::JmpLtL,
        OpCode::JmpLe => OpCode::JmpLeL,
        OpCode::Call => OpCode::CallL,
        OpCode::EndTry => OpCode::EndTryL,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack_item::integer_from_bytes;

    #[test]
    fn small_integers_use_single_byte_pushes() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(-1).emit_push_int(0).emit_push_int(16);
        assert_eq!(
            b.to_bytes(),
            vec![
                OpCode::PushM1 as u8,
                OpCode::Push0 as u8,
                OpCode::Push16 as u8
            ]
        );
    }

    #[test]
    fn wide_integers_sign_extend() {
        let mut b = ScriptBuilder::new();
        b.emit_push_int(-300);
        let bytes = b.to_bytes();
        assert_eq!(bytes[0], OpCode::PushInt16 as u8);
        assert_eq!(integer_from_bytes(&bytes[1..3]), BigInt::from(-300));

        let mut b = ScriptBuilder::new();
        b.emit_push_int(1i64 << 40);
        let bytes = b.to_bytes();
        assert_eq!(bytes[0], OpCode::PushInt64 as u8);
        assert_eq!(integer_from_bytes(&bytes[1..9]), BigInt::from(1i64 << 40));
    }

    #[test]
    fn push_data_picks_smallest_prefix() {
        let mut b = ScriptBuilder::new();
        b.emit_push_data(&[0xAB; 3]);
        assert_eq!(b.to_bytes()[..2], [OpCode::PushData1 as u8, 3]);

        let mut b = ScriptBuilder::new();
        b.emit_push_data(&vec![0; 300]);
        assert_eq!(b.to_bytes()[0], OpCode::PushData2 as u8);
        assert_eq!(b.to_bytes()[1..3], 300u16.to_le_bytes());
    }

    #[test]
    fn jumps_widen_when_needed() {
        let mut b = ScriptBuilder::new();
        b.emit_jump(OpCode::Jmp, 4);
        assert_eq!(b.to_bytes(), vec![OpCode::Jmp as u8, 4]);

        let mut b = ScriptBuilder::new();
        b.emit_jump(OpCode::Jmp, 400);
        assert_eq!(b.to_bytes()[0], OpCode::JmpL as u8);
        assert_eq!(b.to_bytes()[1..5], 400i32.to_le_bytes());
    }
}
