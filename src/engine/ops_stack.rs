//! Constant pushes and Forth-style stack manipulation.

use num_bigint::BigInt;

use crate::engine::{checked_target, ExecutionEngine};
use crate::error::VMError;
use crate::instruction::Instruction;
use crate::stack_item::{integer_from_bytes, StackItem};

impl ExecutionEngine {
    /// PUSHINT8 through PUSHINT256: the operand is the little-endian
    /// two's-complement value at the opcode's width.
    pub(super) fn op_push_int(&mut self, instruction: &Instruction) -> Result<(), VMError> {
        let value = integer_from_bytes(&instruction.operand);
        self.push_integer(value)
    }

    /// PUSHA: a pointer to `ip + offset`, which must lie within the script.
    pub(super) fn op_push_a(&mut self, instruction: &Instruction) -> Result<(), VMError> {
        let frame = self.context()?;
        let position = checked_target(
            frame.instruction_pointer(),
            instruction.token_i32(),
            frame.script().len(),
        )?;
        let script = frame.script().clone();
        self.push(StackItem::Pointer { script, position })
    }

    /// PUSHDATA1/2/4: the decoder stripped the length prefix; the payload
    /// is still subject to the item-size limit.
    pub(super) fn op_push_data(&mut self, instruction: &Instruction) -> Result<(), VMError> {
        self.limits().assert_item_size(instruction.operand.len())?;
        self.push(StackItem::byte_string(instruction.operand.clone()))
    }

    pub(super) fn op_depth(&mut self) -> Result<(), VMError> {
        let depth = self.context()?.evaluation_stack().borrow().len();
        self.push_integer(BigInt::from(depth))
    }

    pub(super) fn op_drop(&mut self) -> Result<(), VMError> {
        self.pop()?;
        Ok(())
    }

    pub(super) fn op_nip(&mut self) -> Result<(), VMError> {
        self.context()?.evaluation_stack().borrow_mut().remove(1)?;
        Ok(())
    }

    pub(super) fn op_xdrop(&mut self) -> Result<(), VMError> {
        let n = self.pop_index("XDROP")?;
        self.context()?.evaluation_stack().borrow_mut().remove(n)?;
        Ok(())
    }

    pub(super) fn op_clear(&mut self) -> Result<(), VMError> {
        self.context()?.evaluation_stack().borrow_mut().clear();
        Ok(())
    }

    pub(super) fn op_dup(&mut self) -> Result<(), VMError> {
        let top = self.peek(0)?;
        self.push(top)
    }

    pub(super) fn op_over(&mut self) -> Result<(), VMError> {
        let item = self.peek(1)?;
        self.push(item)
    }

    pub(super) fn op_pick(&mut self) -> Result<(), VMError> {
        let n = self.pop_index("PICK")?;
        let item = self.peek(n)?;
        self.push(item)
    }

    pub(super) fn op_tuck(&mut self) -> Result<(), VMError> {
        let top = self.peek(0)?;
        self.context()?
            .evaluation_stack()
            .borrow_mut()
            .insert(2, top)
    }

    pub(super) fn op_swap(&mut self) -> Result<(), VMError> {
        let item = self.context()?.evaluation_stack().borrow_mut().remove(1)?;
        self.push(item)
    }

    pub(super) fn op_rot(&mut self) -> Result<(), VMError> {
        let item = self.context()?.evaluation_stack().borrow_mut().remove(2)?;
        self.push(item)
    }

    pub(super) fn op_roll(&mut self) -> Result<(), VMError> {
        let n = self.pop_index("ROLL")?;
        if n == 0 {
            return Ok(());
        }
        let item = self.context()?.evaluation_stack().borrow_mut().remove(n)?;
        self.push(item)
    }

    pub(super) fn op_reverse(&mut self, n: usize) -> Result<(), VMError> {
        self.context()?.evaluation_stack().borrow_mut().reverse(n)
    }

    pub(super) fn op_reverse_n(&mut self) -> Result<(), VMError> {
        let n = self.pop_index("REVERSEN")?;
        self.op_reverse(n)
    }
}
