//! The dispatch loop, opcode semantics and structured-exception unwinder.

mod host;
mod ops_compound;
mod ops_numeric;
mod ops_slot;
mod ops_splice;
mod ops_stack;

use std::cell::RefCell;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::Signed;

pub use host::{Host, NullHost};

use crate::error::VMError;
use crate::evaluation_stack::EvaluationStack;
use crate::exception_handling::{ExceptionHandlingContext, ExceptionHandlingState};
use crate::execution_context::ExecutionContext;
use crate::instruction::Instruction;
use crate::limits::ExecutionEngineLimits;
use crate::op_code::OpCode;
use crate::reference_counter::ReferenceCounter;
use crate::script::Script;
use crate::stack_item::{index_to_usize, StackItem};
use crate::vm_state::VMState;

/// The virtual machine: invocation-stack management, the dispatch loop and
/// the opcode semantics.
///
/// A host drives the engine by loading one or more scripts and calling
/// [`execute`](Self::execute); syscall implementations reach back in through
/// [`peek`](Self::peek), [`pop`](Self::pop) and [`push`](Self::push). One
/// engine executes one script activation; embedders that need parallelism
/// run independent engines.
pub struct ExecutionEngine {
    state: VMState,
    limits: ExecutionEngineLimits,
    reference_counter: ReferenceCounter,
    invocation_stack: Vec<ExecutionContext>,
    result_stack: Rc<RefCell<EvaluationStack>>,
    uncaught_exception: Option<StackItem>,
    /// Set by every control transfer so the dispatch loop skips the tail
    /// `move_next`.
    jumping: bool,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(ExecutionEngineLimits::default())
    }
}

impl ExecutionEngine {
    pub fn new(limits: ExecutionEngineLimits) -> Self {
        let reference_counter = ReferenceCounter::new();
        Self {
            state: VMState::Break,
            limits,
            reference_counter: reference_counter.clone(),
            invocation_stack: Vec::new(),
            result_stack: Rc::new(RefCell::new(EvaluationStack::new(reference_counter))),
            uncaught_exception: None,
            jumping: false,
        }
    }

    // ==================== Observable state ====================

    pub fn state(&self) -> VMState {
        self.state
    }

    pub fn limits(&self) -> &ExecutionEngineLimits {
        &self.limits
    }

    pub fn reference_counter(&self) -> &ReferenceCounter {
        &self.reference_counter
    }

    /// The call frames, bottom-first; the active frame is last.
    pub fn invocation_stack(&self) -> &[ExecutionContext] {
        &self.invocation_stack
    }

    pub fn current_context(&self) -> Option<&ExecutionContext> {
        self.invocation_stack.last()
    }

    /// The frame loaded first, present until the invocation stack empties.
    pub fn entry_context(&self) -> Option<&ExecutionContext> {
        self.invocation_stack.first()
    }

    /// Items left behind by the entry frame's RET, bottom-first.
    pub fn result_stack(&self) -> &Rc<RefCell<EvaluationStack>> {
        &self.result_stack
    }

    /// The pending exception while the unwinder is searching for a handler,
    /// and the thrown item after an unhandled-exception fault.
    pub fn uncaught_exception(&self) -> Option<&StackItem> {
        self.uncaught_exception.as_ref()
    }

    // ==================== Loading ====================

    /// Pushes a new top-level frame for `script`, starting at
    /// `initial_position`.
    pub fn load_script(&mut self, script: Script, initial_position: usize) -> Result<(), VMError> {
        let mut context = ExecutionContext::new(script, self.reference_counter.clone());
        context.set_instruction_pointer(initial_position)?;
        self.push_context(context)
    }

    /// Pushes a frame created during execution, notifying the host.
    pub fn load_context(
        &mut self,
        host: &mut impl Host,
        context: ExecutionContext,
    ) -> Result<(), VMError> {
        self.push_context(context)?;
        host.context_loaded(self);
        Ok(())
    }

    fn push_context(&mut self, context: ExecutionContext) -> Result<(), VMError> {
        if self.invocation_stack.len() >= self.limits.max_invocation_stack_size {
            return Err(VMError::InvocationStackOverflow {
                count: self.invocation_stack.len() + 1,
                max: self.limits.max_invocation_stack_size,
            });
        }
        tracing::trace!(
            depth = self.invocation_stack.len() + 1,
            position = context.instruction_pointer(),
            "context loaded"
        );
        self.invocation_stack.push(context);
        Ok(())
    }

    /// Releases a popped frame's slot references. Static fields survive
    /// while a clone-linked frame below still shares them.
    fn unload_context(&mut self, host: &mut impl Host, mut context: ExecutionContext) {
        if let Some(slot) = context.local_variables.as_mut() {
            slot.clear_references();
        }
        if let Some(slot) = context.arguments.as_mut() {
            slot.clear_references();
        }
        let shared = self
            .invocation_stack
            .last()
            .is_some_and(|current| context.shares_static_fields_with(current));
        if !shared {
            if let Some(slot) = context.static_fields().borrow_mut().as_mut() {
                slot.clear_references();
            }
        }
        tracing::trace!(depth = self.invocation_stack.len(), "context unloaded");
        host.context_unloaded(self);
    }

    // ==================== Dispatch loop ====================

    /// Runs until the engine halts or faults.
    pub fn execute(&mut self, host: &mut impl Host) -> VMState {
        if self.state == VMState::Break {
            self.set_state(VMState::None, host);
        }
        while self.state != VMState::Halt && self.state != VMState::Fault {
            self.execute_next(host);
        }
        self.state
    }

    /// Executes a single instruction, or halts when no frame is loaded.
    pub fn execute_next(&mut self, host: &mut impl Host) {
        if self.invocation_stack.is_empty() {
            self.set_state(VMState::Halt, host);
            return;
        }
        if let Err(error) = self.step(host) {
            self.fault(host, error);
        }
    }

    fn step(&mut self, host: &mut impl Host) -> Result<(), VMError> {
        let frame_index = self.invocation_stack.len() - 1;
        if let Err(error) = self.fetch_and_execute(host, frame_index) {
            self.route_error(host, error)?;
        }
        // Post-step live-size check; not routed through the unwinder, a
        // script cannot catch its way past the limit.
        let count = self.reference_counter.count();
        if count > self.limits.max_stack_size {
            let count = self.reference_counter.check_zero_referred();
            if count > self.limits.max_stack_size {
                return Err(VMError::StackOverflow {
                    count,
                    max: self.limits.max_stack_size,
                });
            }
        }
        Ok(())
    }

    fn fetch_and_execute(
        &mut self,
        host: &mut impl Host,
        frame_index: usize,
    ) -> Result<(), VMError> {
        let instruction = self.invocation_stack[frame_index].current_instruction()?;
        host.pre_execute_instruction(self, &instruction)?;
        self.jumping = false;
        self.execute_instruction(host, &instruction)?;
        host.post_execute_instruction(self, &instruction)?;
        if !self.jumping {
            // The fetched frame advances past the executed instruction: the
            // caller after a CALL pushed a callee above it, nobody after a
            // RET popped it.
            if let Some(frame) = self.invocation_stack.get_mut(frame_index) {
                frame.move_next()?;
            }
        }
        Ok(())
    }

    /// Converts a catchable error raised by an instruction into a user
    /// exception when a try handler is waiting for it; everything else
    /// propagates to the fault handler unchanged.
    fn route_error(&mut self, host: &mut impl Host, error: VMError) -> Result<(), VMError> {
        if !error.is_catchable() || !self.has_eligible_handler() {
            return Err(error);
        }
        tracing::trace!(%error, "error rethrown as user exception");
        self.uncaught_exception = Some(StackItem::byte_string(error.to_string().into_bytes()));
        self.handle_exception(host)
    }

    fn has_eligible_handler(&self) -> bool {
        self.invocation_stack.iter().any(|frame| {
            frame.try_stack.iter().any(|t| {
                !(t.state == ExceptionHandlingState::Finally
                    || (t.state == ExceptionHandlingState::Catch && !t.has_finally()))
            })
        })
    }

    fn fault(&mut self, host: &mut impl Host, error: VMError) {
        tracing::debug!(%error, "execution fault");
        host.on_fault(&error);
        self.set_state(VMState::Fault, host);
    }

    fn set_state(&mut self, state: VMState, host: &mut impl Host) {
        if self.state != state {
            self.state = state;
            tracing::debug!(state = %state, "state changed");
            host.on_state_changed(state);
        }
    }

    // ==================== Evaluation stack access ====================

    fn context(&self) -> Result<&ExecutionContext, VMError> {
        self.invocation_stack.last().ok_or(VMError::NoContext)
    }

    fn context_mut(&mut self) -> Result<&mut ExecutionContext, VMError> {
        self.invocation_stack.last_mut().ok_or(VMError::NoContext)
    }

    /// Pushes onto the current frame's evaluation stack.
    pub fn push(&mut self, item: StackItem) -> Result<(), VMError> {
        self.context()?.evaluation_stack().borrow_mut().push(item);
        Ok(())
    }

    /// Pops from the current frame's evaluation stack.
    pub fn pop(&mut self) -> Result<StackItem, VMError> {
        self.context()?.evaluation_stack().borrow_mut().pop()
    }

    /// Returns the item `depth` positions from the top of the current
    /// frame's evaluation stack.
    pub fn peek(&self, depth: usize) -> Result<StackItem, VMError> {
        self.context()?.evaluation_stack().borrow().peek(depth)
    }

    /// Pops an integer-coercible item.
    pub fn pop_integer(&mut self) -> Result<BigInt, VMError> {
        self.pop()?.get_integer()
    }

    /// Pops any item and coerces it to a boolean.
    pub fn pop_boolean(&mut self) -> Result<bool, VMError> {
        Ok(self.pop()?.get_boolean())
    }

    /// Pops a byte-span-coercible item.
    pub fn pop_span(&mut self) -> Result<Vec<u8>, VMError> {
        self.pop()?.get_span()
    }

    /// Pops a non-negative integer as an index or count.
    pub(crate) fn pop_index(&mut self, op: &'static str) -> Result<usize, VMError> {
        let value = self.pop_integer()?;
        index_to_usize(op, &value)
    }

    /// Pushes an integer, enforcing the 32-byte item bound.
    pub(crate) fn push_integer(&mut self, value: BigInt) -> Result<(), VMError> {
        crate::stack_item::assert_integer_size(&value)?;
        self.push(StackItem::Integer(value))
    }

    pub(crate) fn push_bool(&mut self, value: bool) -> Result<(), VMError> {
        self.push(StackItem::Boolean(value))
    }

    // ==================== Control flow ====================

    fn op_jump(&mut self, offset: i32) -> Result<(), VMError> {
        let frame = self.context_mut()?;
        let target = checked_target(frame.instruction_pointer(), offset, frame.script().len())?;
        frame.set_instruction_pointer(target)?;
        self.jumping = true;
        Ok(())
    }

    fn op_jump_if(&mut self, when: bool, offset: i32) -> Result<(), VMError> {
        if self.pop_boolean()? == when {
            self.op_jump(offset)?;
        }
        Ok(())
    }

    fn op_jump_compare(
        &mut self,
        offset: i32,
        condition: fn(&BigInt, &BigInt) -> bool,
    ) -> Result<(), VMError> {
        let x2 = self.pop_integer()?;
        let x1 = self.pop_integer()?;
        if condition(&x1, &x2) {
            self.op_jump(offset)?;
        }
        Ok(())
    }

    fn op_call(&mut self, host: &mut impl Host, offset: i32) -> Result<(), VMError> {
        let frame = self.context()?;
        let target = checked_target(frame.instruction_pointer(), offset, frame.script().len())?;
        self.call_position(host, target)
    }

    fn op_call_a(&mut self, host: &mut impl Host) -> Result<(), VMError> {
        let item = self.pop()?;
        let StackItem::Pointer { script, position } = item else {
            return Err(VMError::WrongType {
                op: "CALLA",
                expected: "Pointer",
                actual: item.type_name(),
            });
        };
        if &script != self.context()?.script() {
            return Err(VMError::ScriptMismatch);
        }
        self.call_position(host, position)
    }

    fn call_position(&mut self, host: &mut impl Host, position: usize) -> Result<(), VMError> {
        let callee = self.context()?.clone_at(position)?;
        self.load_context(host, callee)
        // The caller's pointer advances past the CALL through the loop's
        // tail move_next; the callee starts exactly at `position`.
    }

    fn op_ret(&mut self, host: &mut impl Host) -> Result<(), VMError> {
        let context = self.invocation_stack.pop().ok_or(VMError::NoContext)?;
        let destination = match self.invocation_stack.last() {
            Some(caller) => Rc::clone(caller.evaluation_stack()),
            None => Rc::clone(&self.result_stack),
        };
        if !Rc::ptr_eq(context.evaluation_stack(), &destination) {
            context
                .evaluation_stack()
                .borrow_mut()
                .move_all_to(&mut destination.borrow_mut());
        }
        self.unload_context(host, context);
        if self.invocation_stack.is_empty() {
            self.set_state(VMState::Halt, host);
        }
        Ok(())
    }

    fn op_syscall(&mut self, host: &mut impl Host, id: u32) -> Result<(), VMError> {
        host.on_syscall(self, id)
    }

    fn op_call_t(&mut self, host: &mut impl Host, token: u16) -> Result<(), VMError> {
        host.load_token(self, token)
    }

    fn op_abort(&mut self) -> Result<(), VMError> {
        Err(VMError::Aborted {
            reason: "ABORT instruction".to_string(),
        })
    }

    fn op_abort_msg(&mut self) -> Result<(), VMError> {
        let reason = String::from_utf8_lossy(&self.pop_span()?).into_owned();
        Err(VMError::Aborted { reason })
    }

    fn op_assert(&mut self) -> Result<(), VMError> {
        if !self.pop_boolean()? {
            return Err(VMError::AssertionFailed {
                reason: "ASSERT instruction".to_string(),
            });
        }
        Ok(())
    }

    fn op_assert_msg(&mut self) -> Result<(), VMError> {
        let reason = String::from_utf8_lossy(&self.pop_span()?).into_owned();
        if !self.pop_boolean()? {
            return Err(VMError::AssertionFailed { reason });
        }
        Ok(())
    }

    // ==================== Structured exceptions ====================

    fn op_try(&mut self, catch_offset: i32, finally_offset: i32) -> Result<(), VMError> {
        if catch_offset == 0 && finally_offset == 0 {
            return Err(VMError::TryWithoutHandlers);
        }
        let max_depth = self.limits.max_try_nesting_depth;
        let frame = self.context_mut()?;
        if frame.try_stack.len() >= max_depth {
            return Err(VMError::TryNestingTooDeep {
                depth: frame.try_stack.len() + 1,
                max: max_depth,
            });
        }
        let ip = frame.instruction_pointer();
        let script_length = frame.script().len();
        let catch_pointer = match catch_offset {
            0 => None,
            offset => Some(checked_target(ip, offset, script_length)?),
        };
        let finally_pointer = match finally_offset {
            0 => None,
            offset => Some(checked_target(ip, offset, script_length)?),
        };
        frame
            .try_stack
            .push(ExceptionHandlingContext::new(catch_pointer, finally_pointer));
        Ok(())
    }

    fn op_end_try(&mut self, offset: i32) -> Result<(), VMError> {
        let frame = self.context_mut()?;
        let Some(current_try) = frame.try_stack.last() else {
            return Err(VMError::NoTryBlock { op: "ENDTRY" });
        };
        if current_try.state == ExceptionHandlingState::Finally {
            return Err(VMError::EndTryInFinally);
        }
        let end_pointer =
            checked_target(frame.instruction_pointer(), offset, frame.script().len())?;
        if let Some(finally_pointer) = current_try.finally_pointer {
            // last() is also last_mut(); re-borrow mutably to transition.
            if let Some(current_try) = frame.try_stack.last_mut() {
                current_try.state = ExceptionHandlingState::Finally;
                current_try.end_pointer = end_pointer;
            }
            frame.set_instruction_pointer(finally_pointer)?;
        } else {
            frame.try_stack.pop();
            frame.set_instruction_pointer(end_pointer)?;
        }
        self.jumping = true;
        Ok(())
    }

    fn op_end_finally(&mut self, host: &mut impl Host) -> Result<(), VMError> {
        let frame = self.context_mut()?;
        let Some(current_try) = frame.try_stack.pop() else {
            return Err(VMError::NoTryBlock { op: "ENDFINALLY" });
        };
        if self.uncaught_exception.is_none() {
            self.context_mut()?
                .set_instruction_pointer(current_try.end_pointer)?;
            self.jumping = true;
            Ok(())
        } else {
            // The finally block ran while an exception was in flight; keep
            // unwinding toward the next handler.
            self.handle_exception(host)
        }
    }

    fn op_throw(&mut self, host: &mut impl Host) -> Result<(), VMError> {
        let exception = self.pop()?;
        self.throw_item(host, exception)
    }

    /// Invokes the unwinder with `exception` as the pending exception, the
    /// entry point used by syscall implementations.
    pub fn throw(&mut self, host: &mut impl Host, exception: StackItem) -> Result<(), VMError> {
        self.throw_item(host, exception)
    }

    fn throw_item(&mut self, host: &mut impl Host, exception: StackItem) -> Result<(), VMError> {
        self.uncaught_exception = Some(exception);
        self.handle_exception(host)
    }

    /// Walks the invocation stack from the active frame outward looking for
    /// a try frame that still wants the pending exception. A catch handler
    /// consumes it; a finally handler runs with it left pending so the
    /// matching ENDFINALLY re-enters the walk. Frames above the handler are
    /// unloaded.
    fn handle_exception(&mut self, host: &mut impl Host) -> Result<(), VMError> {
        enum Disposition {
            Discard,
            Handle,
        }

        for frame_index in (0..self.invocation_stack.len()).rev() {
            loop {
                let disposition = {
                    let frame = &self.invocation_stack[frame_index];
                    match frame.try_stack.last() {
                        None => break,
                        Some(t)
                            if t.state == ExceptionHandlingState::Finally
                                || (t.state == ExceptionHandlingState::Catch
                                    && !t.has_finally()) =>
                        {
                            // Already had its chance.
                            Disposition::Discard
                        }
                        Some(_) => Disposition::Handle,
                    }
                };
                match disposition {
                    Disposition::Discard => {
                        self.invocation_stack[frame_index].try_stack.pop();
                    }
                    Disposition::Handle => {
                        while self.invocation_stack.len() > frame_index + 1 {
                            if let Some(context) = self.invocation_stack.pop() {
                                self.unload_context(host, context);
                            }
                        }
                        let frame = &mut self.invocation_stack[frame_index];
                        let stack = Rc::clone(frame.evaluation_stack());
                        let Some(current_try) = frame.try_stack.last_mut() else {
                            break;
                        };
                        match (current_try.state, current_try.catch_pointer) {
                            (ExceptionHandlingState::Try, Some(catch_pointer)) => {
                                current_try.state = ExceptionHandlingState::Catch;
                                frame.set_instruction_pointer(catch_pointer)?;
                                if let Some(exception) = self.uncaught_exception.take() {
                                    stack.borrow_mut().push(exception);
                                }
                            }
                            _ => {
                                current_try.state = ExceptionHandlingState::Finally;
                                if let Some(finally_pointer) = current_try.finally_pointer {
                                    frame.set_instruction_pointer(finally_pointer)?;
                                }
                                // uncaught_exception stays set; ENDFINALLY
                                // resumes the walk.
                            }
                        }
                        self.jumping = true;
                        return Ok(());
                    }
                }
            }
        }
        let exception = self
            .uncaught_exception
            .as_ref()
            .map(StackItem::describe)
            .unwrap_or_default();
        Err(VMError::UnhandledException { exception })
    }

    // ==================== Instruction dispatch ====================

    fn execute_instruction(
        &mut self,
        host: &mut impl Host,
        instruction: &Instruction,
    ) -> Result<(), VMError> {
        let opcode = OpCode::try_from(instruction.opcode).map_err(|_| VMError::InvalidOpcode {
            opcode: instruction.opcode,
            offset: self
                .current_context()
                .map(|c| c.instruction_pointer())
                .unwrap_or_default(),
        })?;
        match opcode {
            // Constants
            OpCode::PushInt8
            | OpCode::PushInt16
            | OpCode::PushInt32
            | OpCode::PushInt64
            | OpCode::PushInt128
            | OpCode::PushInt256 => self.op_push_int(instruction),
            OpCode::PushT => self.push_bool(true),
            OpCode::PushF => self.push_bool(false),
            OpCode::PushA => self.op_push_a(instruction),
            OpCode::PushNull => self.push(StackItem::Null),
            OpCode::PushData1 | OpCode::PushData2 | OpCode::PushData4 => {
                self.op_push_data(instruction)
            }
            OpCode::PushM1
            | OpCode::Push0
            | OpCode::Push1
            | OpCode::Push2
            | OpCode::Push3
            | OpCode::Push4
            | OpCode::Push5
            | OpCode::Push6
            | OpCode::Push7
            | OpCode::Push8
            | OpCode::Push9
            | OpCode::Push10
            | OpCode::Push11
            | OpCode::Push12
            | OpCode::Push13
            | OpCode::Push14
            | OpCode::Push15
            | OpCode::Push16 => {
                let value = instruction.opcode as i32 - OpCode::Push0 as u8 as i32;
                self.push_integer(BigInt::from(value))
            }
            // Flow control
            OpCode::Nop => Ok(()),
            OpCode::Jmp => self.op_jump(instruction.token_i8() as i32),
            OpCode::JmpL => self.op_jump(instruction.token_i32()),
            OpCode::JmpIf => self.op_jump_if(true, instruction.token_i8() as i32),
            OpCode::JmpIfL => self.op_jump_if(true, instruction.token_i32()),
            OpCode::JmpIfNot => self.op_jump_if(false, instruction.token_i8() as i32),
            OpCode::JmpIfNotL => self.op_jump_if(false, instruction.token_i32()),
            OpCode::JmpEq => self.op_jump_compare(instruction.token_i8() as i32, |a, b| a == b),
            OpCode::JmpEqL => self.op_jump_compare(instruction.token_i32(), |a, b| a == b),
            OpCode::JmpNe => self.op_jump_compare(instruction.token_i8() as i32, |a, b| a != b),
            OpCode::JmpNeL => self.op_jump_compare(instruction.token_i32(), |a, b| a != b),
            OpCode::JmpGt => self.op_jump_compare(instruction.token_i8() as i32, |a, b| a > b),
            OpCode::JmpGtL => self.op_jump_compare(instruction.token_i32(), |a, b| a > b),
            OpCode::JmpGe => self.op_jump_compare(instruction.token_i8() as i32, |a, b| a >= b),
            OpCode::JmpGeL => self.op_jump_compare(instruction.token_i32(), |a, b| a >= b),
            OpCode::JmpLt => self.op_jump_compare(instruction.token_i8() as i32, |a, b| a < b),
            OpCode::JmpLtL => self.op_jump_compare(instruction.token_i32(), |a, b| a < b),
            OpCode::JmpLe => self.op_jump_compare(instruction.token_i8() as i32, |a, b| a <= b),
            OpCode::JmpLeL => self.op_jump_compare(instruction.token_i32(), |a, b| a <= b),
            OpCode::Call => self.op_call(host, instruction.token_i8() as i32),
            OpCode::CallL => self.op_call(host, instruction.token_i32()),
            OpCode::CallA => self.op_call_a(host),
            OpCode::CallT => self.op_call_t(host, instruction.token_u16()),
            OpCode::Abort => self.op_abort(),
            OpCode::Assert => self.op_assert(),
            OpCode::Throw => self.op_throw(host),
            OpCode::Try => self.op_try(
                instruction.token_i8() as i32,
                instruction.token_i8_1() as i32,
            ),
            OpCode::TryL => self.op_try(instruction.token_i32(), instruction.token_i32_1()),
            OpCode::EndTry => self.op_end_try(instruction.token_i8() as i32),
            OpCode::EndTryL => self.op_end_try(instruction.token_i32()),
            OpCode::EndFinally => self.op_end_finally(host),
            OpCode::Ret => self.op_ret(host),
            OpCode::Syscall => self.op_syscall(host, instruction.token_u32()),
            // Stack
            OpCode::Depth => self.op_depth(),
            OpCode::Drop => self.op_drop(),
            OpCode::Nip => self.op_nip(),
            OpCode::XDrop => self.op_xdrop(),
            OpCode::Clear => self.op_clear(),
            OpCode::Dup => self.op_dup(),
            OpCode::Over => self.op_over(),
            OpCode::Pick => self.op_pick(),
            OpCode::Tuck => self.op_tuck(),
            OpCode::Swap => self.op_swap(),
            OpCode::Rot => self.op_rot(),
            OpCode::Roll => self.op_roll(),
            OpCode::Reverse3 => self.op_reverse(3),
            OpCode::Reverse4 => self.op_reverse(4),
            OpCode::ReverseN => self.op_reverse_n(),
            // Slots
            OpCode::InitSSlot => self.op_init_static_slot(instruction.token_u8() as usize),
            OpCode::InitSlot => self.op_init_slot(
                instruction.token_u8() as usize,
                instruction.token_u8_1() as usize,
            ),
            OpCode::LdSFld0
            | OpCode::LdSFld1
            | OpCode::LdSFld2
            | OpCode::LdSFld3
            | OpCode::LdSFld4
            | OpCode::LdSFld5
            | OpCode::LdSFld6 => {
                self.op_load_static((instruction.opcode - OpCode::LdSFld0 as u8) as usize)
            }
            OpCode::LdSFld => self.op_load_static(instruction.token_u8() as usize),
            OpCode::StSFld0
            | OpCode::StSFld1
            | OpCode::StSFld2
            | OpCode::StSFld3
            | OpCode::StSFld4
            | OpCode::StSFld5
            | OpCode::StSFld6 => {
                self.op_store_static((instruction.opcode - OpCode::StSFld0 as u8) as usize)
            }
            OpCode::StSFld => self.op_store_static(instruction.token_u8() as usize),
            OpCode::LdLoc0
            | OpCode::LdLoc1
            | OpCode::LdLoc2
            | OpCode::LdLoc3
            | OpCode::LdLoc4
            | OpCode::LdLoc5
            | OpCode::LdLoc6 => {
                self.op_load_local((instruction.opcode - OpCode::LdLoc0 as u8) as usize)
            }
            OpCode::LdLoc => self.op_load_local(instruction.token_u8() as usize),
            OpCode::StLoc0
            | OpCode::StLoc1
            | OpCode::StLoc2
            | OpCode::StLoc3
            | OpCode::StLoc4
            | OpCode::StLoc5
            | OpCode::StLoc6 => {
                self.op_store_local((instruction.opcode - OpCode::StLoc0 as u8) as usize)
            }
            OpCode::StLoc => self.op_store_local(instruction.token_u8() as usize),
            OpCode::LdArg0
            | OpCode::LdArg1
            | OpCode::LdArg2
            | OpCode::LdArg3
            | OpCode::LdArg4
            | OpCode::LdArg5
            | OpCode::LdArg6 => {
                self.op_load_argument((instruction.opcode - OpCode::LdArg0 as u8) as usize)
            }
            OpCode::LdArg => self.op_load_argument(instruction.token_u8() as usize),
            OpCode::StArg0
            | OpCode::StArg1
            | OpCode::StArg2
            | OpCode::StArg3
            | OpCode::StArg4
            | OpCode::StArg5
            | OpCode::StArg6 => {
                self.op_store_argument((instruction.opcode - OpCode::StArg0 as u8) as usize)
            }
            OpCode::StArg => self.op_store_argument(instruction.token_u8() as usize),
            // Splice
            OpCode::NewBuffer => self.op_new_buffer(),
            OpCode::MemCpy => self.op_memcpy(),
            OpCode::Cat => self.op_cat(),
            OpCode::SubStr => self.op_substr(),
            OpCode::Left => self.op_left(),
            OpCode::Right => self.op_right(),
            // Bitwise logic
            OpCode::Invert => self.op_invert(),
            OpCode::And => self.op_binary_integer(|a, b| Ok(a & b)),
            OpCode::Or => self.op_binary_integer(|a, b| Ok(a | b)),
            OpCode::Xor => self.op_binary_integer(|a, b| Ok(a ^ b)),
            OpCode::Equal => self.op_equal(true),
            OpCode::NotEqual => self.op_equal(false),
            // Arithmetic
            OpCode::Sign => self.op_sign(),
            OpCode::Abs => self.op_unary_integer(|x| x.abs()),
            OpCode::Negate => self.op_unary_integer(|x| -x),
            OpCode::Inc => self.op_unary_integer(|x| x + 1),
            OpCode::Dec => self.op_unary_integer(|x| x - 1),
            OpCode::Add => self.op_binary_integer(|a, b| Ok(a + b)),
            OpCode::Sub => self.op_binary_integer(|a, b| Ok(a - b)),
            OpCode::Mul => self.op_binary_integer(|a, b| Ok(a * b)),
            OpCode::Div => self.op_div(),
            OpCode::Mod => self.op_mod(),
            OpCode::Pow => self.op_pow(),
            OpCode::Sqrt => self.op_sqrt(),
            OpCode::ModMul => self.op_modmul(),
            OpCode::ModPow => self.op_modpow(),
            OpCode::Shl => self.op_shift(true),
            OpCode::Shr => self.op_shift(false),
            OpCode::Not => self.op_not(),
            OpCode::BoolAnd => self.op_boolean_binary(|a, b| a && b),
            OpCode::BoolOr => self.op_boolean_binary(|a, b| a || b),
            OpCode::Nz => self.op_nz(),
            OpCode::NumEqual => self.op_numeric_equal(true),
            OpCode::NumNotEqual => self.op_numeric_equal(false),
            OpCode::Lt => self.op_compare(|a, b| a < b),
            OpCode::Le => self.op_compare(|a, b| a <= b),
            OpCode::Gt => self.op_compare(|a, b| a > b),
            OpCode::Ge => self.op_compare(|a, b| a >= b),
            OpCode::Min => self.op_binary_integer(|a, b| Ok(a.min(b))),
            OpCode::Max => self.op_binary_integer(|a, b| Ok(a.max(b))),
            OpCode::Within => self.op_within(),
            // Compound types
            OpCode::PackMap => self.op_pack_map(),
            OpCode::PackStruct => self.op_pack_struct(),
            OpCode::Pack => self.op_pack(),
            OpCode::Unpack => self.op_unpack(),
            OpCode::NewArray0 => self.op_new_compound(0, false),
            OpCode::NewArray => {
                let count = self.op_new_compound_count()?;
                self.op_new_compound(count, false)
            }
            OpCode::NewArrayT => self.op_new_array_t(instruction),
            OpCode::NewStruct0 => self.op_new_compound(0, true),
            OpCode::NewStruct => {
                let count = self.op_new_compound_count()?;
                self.op_new_compound(count, true)
            }
            OpCode::NewMap => self.push(StackItem::new_map()),
            OpCode::Size => self.op_size(),
            OpCode::HasKey => self.op_has_key(),
            OpCode::Keys => self.op_keys(),
            OpCode::Values => self.op_values(),
            OpCode::PickItem => self.op_pick_item(),
            OpCode::Append => self.op_append(),
            OpCode::SetItem => self.op_set_item(),
            OpCode::ReverseItems => self.op_reverse_items(),
            OpCode::Remove => self.op_remove(),
            OpCode::ClearItems => self.op_clear_items(),
            OpCode::PopItem => self.op_pop_item(),
            // Types
            OpCode::IsNull => self.op_is_null(),
            OpCode::IsType => self.op_is_type(instruction),
            OpCode::Convert => self.op_convert(instruction),
            OpCode::AbortMsg => self.op_abort_msg(),
            OpCode::AssertMsg => self.op_assert_msg(),
        }
    }
}

/// Computes `ip + offset` with overflow checking and validates it against
/// `[0, script_length]`.
fn checked_target(ip: usize, offset: i32, script_length: usize) -> Result<usize, VMError> {
    let target = ip as i64 + offset as i64;
    if target < 0 || target > script_length as i64 {
        return Err(VMError::JumpOutOfRange {
            target: target as isize,
            script_length,
        });
    }
    Ok(target as usize)
}
