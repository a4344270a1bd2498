//! Slot creation and load/store.

use std::rc::Rc;

use crate::engine::ExecutionEngine;
use crate::error::VMError;
use crate::slot::Slot;

impl ExecutionEngine {
    /// INITSSLOT: creates the static-field slot shared by all clone-linked
    /// frames of the current script.
    pub(super) fn op_init_static_slot(&mut self, count: usize) -> Result<(), VMError> {
        if count == 0 {
            return Err(VMError::EmptySlot { op: "INITSSLOT" });
        }
        let counter = self.reference_counter().clone();
        let cell = Rc::clone(self.context()?.static_fields());
        let mut statics = cell.borrow_mut();
        if statics.is_some() {
            return Err(VMError::SlotAlreadyInitialized {
                slot: "static field",
            });
        }
        *statics = Some(Slot::new(count, counter));
        Ok(())
    }

    /// INITSLOT: creates the local slot (null-filled) and the argument slot
    /// (filled by popping, first pop at index 0).
    pub(super) fn op_init_slot(
        &mut self,
        local_count: usize,
        argument_count: usize,
    ) -> Result<(), VMError> {
        {
            let frame = self.context()?;
            if frame.local_variables.is_some() || frame.arguments.is_some() {
                return Err(VMError::SlotAlreadyInitialized {
                    slot: "local variable or argument",
                });
            }
        }
        if local_count == 0 && argument_count == 0 {
            return Err(VMError::EmptySlot { op: "INITSLOT" });
        }
        let counter = self.reference_counter().clone();
        let locals = (local_count > 0).then(|| Slot::new(local_count, counter.clone()));
        let arguments = if argument_count > 0 {
            let mut items = Vec::with_capacity(argument_count);
            for _ in 0..argument_count {
                items.push(self.pop()?);
            }
            Some(Slot::with_items(items, counter))
        } else {
            None
        };
        let frame = self.context_mut()?;
        frame.local_variables = locals;
        frame.arguments = arguments;
        Ok(())
    }

    pub(super) fn op_load_static(&mut self, index: usize) -> Result<(), VMError> {
        let cell = Rc::clone(self.context()?.static_fields());
        let statics = cell.borrow();
        let slot = statics.as_ref().ok_or(VMError::SlotNotInitialized {
            slot: "static field",
        })?;
        let item = slot.get(index)?;
        drop(statics);
        self.push(item)
    }

    pub(super) fn op_store_static(&mut self, index: usize) -> Result<(), VMError> {
        let item = self.pop()?;
        let cell = Rc::clone(self.context()?.static_fields());
        let mut statics = cell.borrow_mut();
        let slot = statics.as_mut().ok_or(VMError::SlotNotInitialized {
            slot: "static field",
        })?;
        slot.set(index, item)
    }

    pub(super) fn op_load_local(&mut self, index: usize) -> Result<(), VMError> {
        let frame = self.context()?;
        let slot = frame
            .local_variables
            .as_ref()
            .ok_or(VMError::SlotNotInitialized {
                slot: "local variable",
            })?;
        let item = slot.get(index)?;
        self.push(item)
    }

    pub(super) fn op_store_local(&mut self, index: usize) -> Result<(), VMError> {
        let item = self.pop()?;
        let frame = self.context_mut()?;
        let slot = frame
            .local_variables
            .as_mut()
            .ok_or(VMError::SlotNotInitialized {
                slot: "local variable",
            })?;
        slot.set(index, item)
    }

    pub(super) fn op_load_argument(&mut self, index: usize) -> Result<(), VMError> {
        let frame = self.context()?;
        let slot = frame
            .arguments
            .as_ref()
            .ok_or(VMError::SlotNotInitialized { slot: "argument" })?;
        let item = slot.get(index)?;
        self.push(item)
    }

    pub(super) fn op_store_argument(&mut self, index: usize) -> Result<(), VMError> {
        let item = self.pop()?;
        let frame = self.context_mut()?;
        let slot = frame
            .arguments
            .as_mut()
            .ok_or(VMError::SlotNotInitialized { slot: "argument" })?;
        slot.set(index, item)
    }
}
