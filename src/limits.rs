use crate::error::VMError;

/// Restrictions on the resources a single execution may consume.
///
/// The limits are per-engine values rather than global constants so embedders
/// can tighten them for constrained environments.
#[derive(Debug, Clone)]
pub struct ExecutionEngineLimits {
    /// Largest shift amount accepted by SHL and SHR.
    pub max_shift: u32,
    /// Upper bound on the live items tracked by the reference counter.
    pub max_stack_size: usize,
    /// Largest byte string, buffer or operand payload.
    pub max_item_size: usize,
    /// Deepest invocation stack.
    pub max_invocation_stack_size: usize,
    /// Deepest per-frame try stack.
    pub max_try_nesting_depth: usize,
}

impl Default for ExecutionEngineLimits {
    fn default() -> Self {
        Self {
            max_shift: 256,
            max_stack_size: 2048,
            max_item_size: 1024 * 1024,
            max_invocation_stack_size: 1024,
            max_try_nesting_depth: 16,
        }
    }
}

impl ExecutionEngineLimits {
    /// Validates a byte payload length against [`max_item_size`](Self::max_item_size).
    pub fn assert_item_size(&self, size: usize) -> Result<(), VMError> {
        if size > self.max_item_size {
            return Err(VMError::ItemTooLarge {
                size,
                max: self.max_item_size,
            });
        }
        Ok(())
    }

    /// Validates a shift amount against [`max_shift`](Self::max_shift).
    pub fn assert_shift(&self, shift: i64) -> Result<(), VMError> {
        if shift < 0 || shift > self.max_shift as i64 {
            return Err(VMError::ShiftOutOfRange {
                shift,
                max: self.max_shift,
            });
        }
        Ok(())
    }
}
