//! Call frames.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::VMError;
use crate::evaluation_stack::EvaluationStack;
use crate::exception_handling::ExceptionHandlingContext;
use crate::instruction::Instruction;
use crate::reference_counter::ReferenceCounter;
use crate::script::Script;
use crate::slot::Slot;

/// One frame on the invocation stack.
///
/// A frame created by [`clone_at`](Self::clone_at) (the CALL family) shares
/// the parent's script, evaluation stack and static-field cell, and starts
/// with no locals, no arguments and an empty try stack. Frames created by
/// `new` (script loading) get a fresh evaluation stack and static-field
/// cell.
pub struct ExecutionContext {
    script: Script,
    instruction_pointer: usize,
    evaluation_stack: Rc<RefCell<EvaluationStack>>,
    static_fields: Rc<RefCell<Option<Slot>>>,
    pub(crate) local_variables: Option<Slot>,
    pub(crate) arguments: Option<Slot>,
    pub(crate) try_stack: Vec<ExceptionHandlingContext>,
}

impl ExecutionContext {
    pub fn new(script: Script, counter: ReferenceCounter) -> Self {
        Self {
            script,
            instruction_pointer: 0,
            evaluation_stack: Rc::new(RefCell::new(EvaluationStack::new(counter))),
            static_fields: Rc::new(RefCell::new(None)),
            local_variables: None,
            arguments: None,
            try_stack: Vec::new(),
        }
    }

    /// Creates the callee frame for a call into `position` of the same
    /// script.
    pub fn clone_at(&self, position: usize) -> Result<Self, VMError> {
        let mut context = Self {
            script: self.script.clone(),
            instruction_pointer: 0,
            evaluation_stack: Rc::clone(&self.evaluation_stack),
            static_fields: Rc::clone(&self.static_fields),
            local_variables: None,
            arguments: None,
            try_stack: Vec::new(),
        };
        context.set_instruction_pointer(position)?;
        Ok(context)
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn instruction_pointer(&self) -> usize {
        self.instruction_pointer
    }

    /// Moves the instruction pointer; the position may be anywhere in
    /// `[0, script_length]`, the end position being the synthetic-RET exit.
    pub fn set_instruction_pointer(&mut self, position: usize) -> Result<(), VMError> {
        if position > self.script.len() {
            return Err(VMError::JumpOutOfRange {
                target: position as isize,
                script_length: self.script.len(),
            });
        }
        self.instruction_pointer = position;
        Ok(())
    }

    pub fn evaluation_stack(&self) -> &Rc<RefCell<EvaluationStack>> {
        &self.evaluation_stack
    }

    pub(crate) fn static_fields(&self) -> &Rc<RefCell<Option<Slot>>> {
        &self.static_fields
    }

    /// Whether this frame observes the same static-field slot as `other`
    /// (clone-linked frames of the same loaded script).
    pub fn shares_static_fields_with(&self, other: &ExecutionContext) -> bool {
        Rc::ptr_eq(&self.static_fields, &other.static_fields)
    }

    /// Whether this frame writes results onto the same evaluation stack as
    /// `other`.
    pub fn shares_evaluation_stack_with(&self, other: &ExecutionContext) -> bool {
        Rc::ptr_eq(&self.evaluation_stack, &other.evaluation_stack)
    }

    /// Decodes the instruction at the current pointer. At or past the end of
    /// the script this is a synthetic RET, which is how scripts terminate
    /// without an explicit RET.
    pub fn current_instruction(&self) -> Result<Instruction, VMError> {
        self.script.instruction_at(self.instruction_pointer)
    }

    /// Advances the pointer over the current instruction.
    pub fn move_next(&mut self) -> Result<(), VMError> {
        let size = self.current_instruction()?.size();
        self.instruction_pointer = self
            .instruction_pointer
            .checked_add(size)
            .ok_or(VMError::PointerOverflow {
                offset: self.instruction_pointer,
            })?;
        Ok(())
    }
}
