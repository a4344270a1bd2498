//! Byte-buffer splicing.

use crate::engine::ExecutionEngine;
use crate::error::VMError;
use crate::stack_item::StackItem;

impl ExecutionEngine {
    pub(super) fn op_new_buffer(&mut self) -> Result<(), VMError> {
        let length = self.pop_index("NEWBUFFER")?;
        self.limits().assert_item_size(length)?;
        self.push(StackItem::buffer(vec![0; length]))
    }

    /// MEMCPY: (dst_buffer, dst_index, src_bytes, src_index, count), count
    /// on top. A zero count is a no-op.
    pub(super) fn op_memcpy(&mut self) -> Result<(), VMError> {
        let count = self.pop_index("MEMCPY")?;
        let src_index = self.pop_index("MEMCPY")?;
        let src = self.pop_span()?;
        let dst_index = self.pop_index("MEMCPY")?;
        let dst = self.pop()?;
        let StackItem::Buffer(dst) = dst else {
            return Err(VMError::WrongType {
                op: "MEMCPY",
                expected: "Buffer",
                actual: dst.type_name(),
            });
        };
        let src_end = src_index
            .checked_add(count)
            .filter(|end| *end <= src.len())
            .ok_or(VMError::IndexOutOfRange {
                op: "MEMCPY source",
                index: src_index as i64,
                length: src.len(),
            })?;
        let mut dst = dst.borrow_mut();
        let dst_end = dst_index
            .checked_add(count)
            .filter(|end| *end <= dst.len())
            .ok_or(VMError::IndexOutOfRange {
                op: "MEMCPY destination",
                index: dst_index as i64,
                length: dst.len(),
            })?;
        dst[dst_index..dst_end].copy_from_slice(&src[src_index..src_end]);
        Ok(())
    }

    pub(super) fn op_cat(&mut self) -> Result<(), VMError> {
        let x2 = self.pop_span()?;
        let mut x1 = self.pop_span()?;
        self.limits().assert_item_size(x1.len() + x2.len())?;
        x1.extend_from_slice(&x2);
        self.push(StackItem::buffer(x1))
    }

    pub(super) fn op_substr(&mut self) -> Result<(), VMError> {
        let count = self.pop_index("SUBSTR")?;
        let index = self.pop_index("SUBSTR")?;
        let source = self.pop_span()?;
        let end = index
            .checked_add(count)
            .filter(|end| *end <= source.len())
            .ok_or(VMError::IndexOutOfRange {
                op: "SUBSTR",
                index: index as i64,
                length: source.len(),
            })?;
        self.push(StackItem::buffer(source[index..end].to_vec()))
    }

    pub(super) fn op_left(&mut self) -> Result<(), VMError> {
        let count = self.pop_index("LEFT")?;
        let source = self.pop_span()?;
        if count > source.len() {
            return Err(VMError::IndexOutOfRange {
                op: "LEFT",
                index: count as i64,
                length: source.len(),
            });
        }
        self.push(StackItem::buffer(source[..count].to_vec()))
    }

    pub(super) fn op_right(&mut self) -> Result<(), VMError> {
        let count = self.pop_index("RIGHT")?;
        let source = self.pop_span()?;
        if count > source.len() {
            return Err(VMError::IndexOutOfRange {
                op: "RIGHT",
                index: count as i64,
                length: source.len(),
            });
        }
        self.push(StackItem::buffer(source[source.len() - count..].to_vec()))
    }
}
