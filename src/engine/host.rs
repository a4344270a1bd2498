//! The embedder interface.

use crate::engine::ExecutionEngine;
use crate::error::VMError;
use crate::instruction::Instruction;
use crate::vm_state::VMState;

/// Extension points consumed by the engine while executing.
///
/// Embedders implement this to add gas accounting (fail from
/// [`pre_execute_instruction`](Self::pre_execute_instruction); the fault
/// handler catches it and scripts cannot), syscall tables, tracing and
/// CALLT token resolution. Every method has a default, so a host
/// implements only what it needs. All hooks run inline on the execution
/// thread.
///
/// Initial script loading happens before a host is in play, so
/// [`context_loaded`](Self::context_loaded) fires only for frames created
/// during execution.
#[allow(unused_variables)]
pub trait Host {
    /// Runs before each instruction executes. An error faults the engine.
    fn pre_execute_instruction(
        &mut self,
        engine: &mut ExecutionEngine,
        instruction: &Instruction,
    ) -> Result<(), VMError> {
        Ok(())
    }

    /// Runs after each instruction executes, before the live-size check.
    fn post_execute_instruction(
        &mut self,
        engine: &mut ExecutionEngine,
        instruction: &Instruction,
    ) -> Result<(), VMError> {
        Ok(())
    }

    /// Resolves a SYSCALL. The host reads arguments from and writes results
    /// to the engine's current evaluation stack.
    fn on_syscall(&mut self, engine: &mut ExecutionEngine, id: u32) -> Result<(), VMError> {
        Err(VMError::UnknownSyscall { id })
    }

    /// Resolves a CALLT method token, typically by loading another script.
    fn load_token(&mut self, engine: &mut ExecutionEngine, token: u16) -> Result<(), VMError> {
        Err(VMError::UnknownToken { token })
    }

    /// Observes every engine state transition.
    fn on_state_changed(&mut self, state: VMState) {}

    /// Observes the error that is about to fault the engine.
    fn on_fault(&mut self, error: &VMError) {}

    /// Runs after a frame is pushed during execution (the CALL family and
    /// host-driven loads).
    fn context_loaded(&mut self, engine: &ExecutionEngine) {}

    /// Runs after a frame is popped and its references are released.
    fn context_unloaded(&mut self, engine: &ExecutionEngine) {}
}

/// A host with no syscalls and no instrumentation.
pub struct NullHost;

impl Host for NullHost {}
