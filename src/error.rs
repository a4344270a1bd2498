use thiserror::Error;

/// Errors that can occur while decoding or executing a script.
#[derive(Debug, Error)]
pub enum VMError {
    /// Opcode byte with no defined instruction, detected at dispatch.
    #[error("invalid opcode 0x{opcode:02X} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },
    /// Script ended in the middle of an instruction operand.
    #[error("truncated instruction at offset {offset}: needs {requested} operand bytes, {available} available")]
    TruncatedInstruction {
        offset: usize,
        requested: usize,
        available: usize,
    },
    /// Jump target or pointer position outside `[0, script_length]`.
    #[error("jump target {target} out of range (script length {script_length})")]
    JumpOutOfRange { target: isize, script_length: usize },
    /// Instruction pointer arithmetic overflowed.
    #[error("instruction pointer overflow at offset {offset}")]
    PointerOverflow { offset: usize },
    /// Operation requires a current execution context but none is loaded.
    #[error("no execution context loaded")]
    NoContext,
    /// Evaluation stack held fewer items than the operation needs.
    #[error("evaluation stack underflow: {op} needs item at depth {index}, stack holds {count}")]
    StackUnderflow {
        op: &'static str,
        index: usize,
        count: usize,
    },
    /// Item popped or peeked has the wrong variant.
    #[error("{op} expected {expected}, got {actual}")]
    WrongType {
        op: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    /// Conversion between stack item types that is not defined.
    #[error("cannot convert {from} to {to}")]
    InvalidConversion {
        from: &'static str,
        to: &'static str,
    },
    /// Byte value of an `ItemType` operand that is not defined.
    #[error("undefined stack item type 0x{value:02X}")]
    UndefinedType { value: u8 },
    /// ISTYPE with the Any type operand.
    #[error("ISTYPE cannot test for the Any type")]
    IsTypeAny,
    /// Index into an array, buffer, slot or span is out of range.
    #[error("{op} index {index} out of range (length {length})")]
    IndexOutOfRange {
        op: &'static str,
        index: i64,
        length: usize,
    },
    /// Count or size operand that must be non-negative was negative.
    #[error("{op} count must be non-negative, got {count}")]
    NegativeCount { op: &'static str, count: i64 },
    /// Operand does not fit the machine-sized range the operation needs.
    #[error("{op} operand out of range: {value}")]
    NumberOutOfRange { op: &'static str, value: String },
    /// Map lookup for a key that is not present.
    #[error("key not found in map")]
    KeyNotFound,
    /// Byte payload longer than MaxItemSize.
    #[error("item size {size} exceeds limit {max}")]
    ItemTooLarge { size: usize, max: usize },
    /// Map key span longer than the key size bound.
    #[error("map key size {size} exceeds limit {max}")]
    KeyTooLarge { size: usize, max: usize },
    /// Live-reference bound exceeded MaxStackSize after a step.
    #[error("stack size {count} exceeds limit {max}")]
    StackOverflow { count: usize, max: usize },
    /// Invocation stack grew past MaxInvocationStackSize.
    #[error("invocation stack size {count} exceeds limit {max}")]
    InvocationStackOverflow { count: usize, max: usize },
    /// Try stack grew past MaxTryNestingDepth.
    #[error("try nesting depth {depth} exceeds limit {max}")]
    TryNestingTooDeep { depth: usize, max: usize },
    /// SHL/SHR shift amount outside `[0, MaxShift]`.
    #[error("shift amount {shift} out of range (max {max})")]
    ShiftOutOfRange { shift: i64, max: u32 },
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// MODPOW with exponent -1 and no modular inverse.
    #[error("value has no modular inverse for the given modulus")]
    NoModularInverse,
    /// Integer wider than 32 bytes, produced or decoded.
    #[error("integer of {size} bytes exceeds the 32-byte bound")]
    IntegerTooLarge { size: usize },
    /// Slot access before INITSLOT/INITSSLOT created the slot.
    #[error("{slot} slot is not initialized")]
    SlotNotInitialized { slot: &'static str },
    /// INITSLOT/INITSSLOT executed twice in a frame.
    #[error("{slot} slot is already initialized")]
    SlotAlreadyInitialized { slot: &'static str },
    /// INITSLOT with both counts zero, or INITSSLOT with count zero.
    #[error("{op} cannot create an empty slot")]
    EmptySlot { op: &'static str },
    /// TRY with both offsets zero.
    #[error("TRY needs a catch or a finally offset")]
    TryWithoutHandlers,
    /// ENDTRY/ENDFINALLY with no try frame on the current context.
    #[error("{op} outside of any try block")]
    NoTryBlock { op: &'static str },
    /// ENDTRY while the top try frame is already in its finally block.
    #[error("ENDTRY inside a finally block")]
    EndTryInFinally,
    /// CALLA pointer into a script other than the calling context's.
    #[error("CALLA target pointer belongs to a different script")]
    ScriptMismatch,
    /// SYSCALL the host does not implement.
    #[error("unknown syscall 0x{id:08X}")]
    UnknownSyscall { id: u32 },
    /// CALLT token the host cannot resolve.
    #[error("unknown call token {token}")]
    UnknownToken { token: u16 },
    /// ABORT or ABORTMSG executed.
    #[error("execution aborted: {reason}")]
    Aborted { reason: String },
    /// ASSERT or ASSERTMSG with a false condition.
    #[error("assertion failed: {reason}")]
    AssertionFailed { reason: String },
    /// A thrown exception unwound past every handler.
    #[error("unhandled exception: {exception}")]
    UnhandledException { exception: String },
    /// Error raised by an embedder hook.
    #[error("host error: {0}")]
    Host(String),
}

impl VMError {
    /// Whether the error may be converted into a user exception and routed
    /// through the structured-exception unwinder when a handler exists.
    ///
    /// ABORT, failed assertions, the unhandled-exception terminal error and
    /// host errors (gas exhaustion, deadlines) always fault the engine
    /// directly; a script must not be able to catch its way past them.
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self,
            VMError::Aborted { .. }
                | VMError::AssertionFailed { .. }
                | VMError::UnhandledException { .. }
                | VMError::Host(_)
        )
    }
}
