//! Instruction set definitions.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! opcode table and invokes a callback macro for code generation, so multiple
//! modules can generate opcode-related code without duplicating definitions.
//!
//! This module generates:
//! - The [`OpCode`] enum with the published numeric values
//! - `TryFrom<u8>` for dispatch-time validation
//! - The operand-encoding table the decoder reads
//!
//! # Bytecode Format
//!
//! Instructions are one opcode byte followed by the opcode's operand:
//! - `none`: no operand
//! - `fixed(n)`: `n` operand bytes (little-endian for multi-byte tokens)
//! - `prefix(n)`: an `n`-byte little-endian unsigned length, then that many
//!   payload bytes (the PUSHDATA family)

use crate::error::VMError;

/// Invokes a callback macro with the complete opcode definition list.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Constants
            // =========================
            /// Pushes a 1-byte signed integer.
            PushInt8 = 0x00, "PUSHINT8" => fixed(1),
            /// Pushes a 2-byte signed integer.
            PushInt16 = 0x01, "PUSHINT16" => fixed(2),
            /// Pushes a 4-byte signed integer.
            PushInt32 = 0x02, "PUSHINT32" => fixed(4),
            /// Pushes an 8-byte signed integer.
            PushInt64 = 0x03, "PUSHINT64" => fixed(8),
            /// Pushes a 16-byte signed integer.
            PushInt128 = 0x04, "PUSHINT128" => fixed(16),
            /// Pushes a 32-byte signed integer.
            PushInt256 = 0x05, "PUSHINT256" => fixed(32),
            /// Pushes the boolean true.
            PushT = 0x08, "PUSHT" => none,
            /// Pushes the boolean false.
            PushF = 0x09, "PUSHF" => none,
            /// Pushes a pointer to `ip + offset` within the current script.
            PushA = 0x0A, "PUSHA" => fixed(4),
            /// Pushes the null item.
            PushNull = 0x0B, "PUSHNULL" => none,
            /// Pushes a byte string with a 1-byte length prefix.
            PushData1 = 0x0C, "PUSHDATA1" => prefix(1),
            /// Pushes a byte string with a 2-byte length prefix.
            PushData2 = 0x0D, "PUSHDATA2" => prefix(2),
            /// Pushes a byte string with a 4-byte length prefix.
            PushData4 = 0x0E, "PUSHDATA4" => prefix(4),
            /// Pushes the integer -1.
            PushM1 = 0x0F, "PUSHM1" => none,
            /// Pushes the integer 0.
            Push0 = 0x10, "PUSH0" => none,
            Push1 = 0x11, "PUSH1" => none,
            Push2 = 0x12, "PUSH2" => none,
            Push3 = 0x13, "PUSH3" => none,
            Push4 = 0x14, "PUSH4" => none,
            Push5 = 0x15, "PUSH5" => none,
            Push6 = 0x16, "PUSH6" => none,
            Push7 = 0x17, "PUSH7" => none,
            Push8 = 0x18, "PUSH8" => none,
            Push9 = 0x19, "PUSH9" => none,
            Push10 = 0x1A, "PUSH10" => none,
            Push11 = 0x1B, "PUSH11" => none,
            Push12 = 0x1C, "PUSH12" => none,
            Push13 = 0x1D, "PUSH13" => none,
            Push14 = 0x1E, "PUSH14" => none,
            Push15 = 0x1F, "PUSH15" => none,
            /// Pushes the integer 16.
            Push16 = 0x20, "PUSH16" => none,
            // =========================
            // Flow control
            // =========================
            /// No operation.
            Nop = 0x21, "NOP" => none,
            /// Unconditional jump, 1-byte signed offset.
            Jmp = 0x22, "JMP" => fixed(1),
            /// Unconditional jump, 4-byte signed offset.
            JmpL = 0x23, "JMP_L" => fixed(4),
            /// Jump if the popped item is true.
            JmpIf = 0x24, "JMPIF" => fixed(1),
            JmpIfL = 0x25, "JMPIF_L" => fixed(4),
            /// Jump if the popped item is false.
            JmpIfNot = 0x26, "JMPIFNOT" => fixed(1),
            JmpIfNotL = 0x27, "JMPIFNOT_L" => fixed(4),
            /// Jump if the two popped integers are equal.
            JmpEq = 0x28, "JMPEQ" => fixed(1),
            JmpEqL = 0x29, "JMPEQ_L" => fixed(4),
            /// Jump if the two popped integers are not equal.
            JmpNe = 0x2A, "JMPNE" => fixed(1),
            JmpNeL = 0x2B, "JMPNE_L" => fixed(4),
            /// Jump if a > b for popped integers a, b (a below b).
            JmpGt = 0x2C, "JMPGT" => fixed(1),
            JmpGtL = 0x2D, "JMPGT_L" => fixed(4),
            JmpGe = 0x2E, "JMPGE" => fixed(1),
            JmpGeL = 0x2F, "JMPGE_L" => fixed(4),
            JmpLt = 0x30, "JMPLT" => fixed(1),
            JmpLtL = 0x31, "JMPLT_L" => fixed(4),
            JmpLe = 0x32, "JMPLE" => fixed(1),
            JmpLeL = 0x33, "JMPLE_L" => fixed(4),
            /// Calls the function at `ip + offset`, 1-byte signed offset.
            Call = 0x34, "CALL" => fixed(1),
            /// Calls the function at `ip + offset`, 4-byte signed offset.
            CallL = 0x35, "CALL_L" => fixed(4),
            /// Calls the function at the popped pointer.
            CallA = 0x36, "CALLA" => none,
            /// Calls the function identified by a host-resolved method token.
            CallT = 0x37, "CALLT" => fixed(2),
            /// Faults unconditionally.
            Abort = 0x38, "ABORT" => none,
            /// Pops a boolean and faults if it is false.
            Assert = 0x39, "ASSERT" => none,
            /// Pops an item and throws it as an exception.
            Throw = 0x3A, "THROW" => none,
            /// Opens a try region; 1-byte catch and finally offsets.
            Try = 0x3B, "TRY" => fixed(2),
            /// Opens a try region; 4-byte catch and finally offsets.
            TryL = 0x3C, "TRY_L" => fixed(8),
            /// Leaves a try or catch block, 1-byte signed end offset.
            EndTry = 0x3D, "ENDTRY" => fixed(1),
            EndTryL = 0x3E, "ENDTRY_L" => fixed(4),
            /// Leaves a finally block, resuming or re-raising.
            EndFinally = 0x3F, "ENDFINALLY" => none,
            /// Returns from the current frame.
            Ret = 0x40, "RET" => none,
            /// Invokes the host with a 4-byte method identifier.
            Syscall = 0x41, "SYSCALL" => fixed(4),
            // =========================
            // Stack
            // =========================
            /// Pushes the number of items on the evaluation stack.
            Depth = 0x43, "DEPTH" => none,
            /// Removes the top item.
            Drop = 0x45, "DROP" => none,
            /// Removes the second-to-top item.
            Nip = 0x46, "NIP" => none,
            /// Pops n, then removes the item n deep.
            XDrop = 0x48, "XDROP" => none,
            /// Removes all items.
            Clear = 0x49, "CLEAR" => none,
            /// Duplicates the top item.
            Dup = 0x4A, "DUP" => none,
            /// Copies the second-to-top item to the top.
            Over = 0x4B, "OVER" => none,
            /// Pops n, then copies the item n deep to the top.
            Pick = 0x4D, "PICK" => none,
            /// Copies the top item below the second item.
            Tuck = 0x4E, "TUCK" => none,
            /// Swaps the top two items.
            Swap = 0x50, "SWAP" => none,
            /// Rotates the top three items.
            Rot = 0x51, "ROT" => none,
            /// Pops n, then moves the item n deep to the top.
            Roll = 0x52, "ROLL" => none,
            /// Reverses the top three items.
            Reverse3 = 0x53, "REVERSE3" => none,
            /// Reverses the top four items.
            Reverse4 = 0x54, "REVERSE4" => none,
            /// Pops n, then reverses the top n items.
            ReverseN = 0x55, "REVERSEN" => none,
            // =========================
            // Slots
            // =========================
            /// Creates the static-field slot for the current script.
            InitSSlot = 0x56, "INITSSLOT" => fixed(1),
            /// Creates the local and argument slots for the current frame.
            InitSlot = 0x57, "INITSLOT" => fixed(2),
            LdSFld0 = 0x58, "LDSFLD0" => none,
            LdSFld1 = 0x59, "LDSFLD1" => none,
            LdSFld2 = 0x5A, "LDSFLD2" => none,
            LdSFld3 = 0x5B, "LDSFLD3" => none,
            LdSFld4 = 0x5C, "LDSFLD4" => none,
            LdSFld5 = 0x5D, "LDSFLD5" => none,
            LdSFld6 = 0x5E, "LDSFLD6" => none,
            /// Loads the static field at the operand index.
            LdSFld = 0x5F, "LDSFLD" => fixed(1),
            StSFld0 = 0x60, "STSFLD0" => none,
            StSFld1 = 0x61, "STSFLD1" => none,
            StSFld2 = 0x62, "STSFLD2" => none,
            StSFld3 = 0x63, "STSFLD3" => none,
            StSFld4 = 0x64, "STSFLD4" => none,
            StSFld5 = 0x65, "STSFLD5" => none,
            StSFld6 = 0x66, "STSFLD6" => none,
            /// Stores the popped item into the static field at the operand index.
            StSFld = 0x67, "STSFLD" => fixed(1),
            LdLoc0 = 0x68, "LDLOC0" => none,
            LdLoc1 = 0x69, "LDLOC1" => none,
            LdLoc2 = 0x6A, "LDLOC2" => none,
            LdLoc3 = 0x6B, "LDLOC3" => none,
            LdLoc4 = 0x6C, "LDLOC4" => none,
            LdLoc5 = 0x6D, "LDLOC5" => none,
            LdLoc6 = 0x6E, "LDLOC6" => none,
            /// Loads the local variable at the operand index.
            LdLoc = 0x6F, "LDLOC" => fixed(1),
            StLoc0 = 0x70, "STLOC0" => none,
            StLoc1 = 0x71, "STLOC1" => none,
            StLoc2 = 0x72, "STLOC2" => none,
            StLoc3 = 0x73, "STLOC3" => none,
            StLoc4 = 0x74, "STLOC4" => none,
            StLoc5 = 0x75, "STLOC5" => none,
            StLoc6 = 0x76, "STLOC6" => none,
            /// Stores the popped item into the local variable at the operand index.
            StLoc = 0x77, "STLOC" => fixed(1),
            LdArg0 = 0x78, "LDARG0" => none,
            LdArg1 = 0x79, "LDARG1" => none,
            LdArg2 = 0x7A, "LDARG2" => none,
            LdArg3 = 0x7B, "LDARG3" => none,
            LdArg4 = 0x7C, "LDARG4" => none,
            LdArg5 = 0x7D, "LDARG5" => none,
            LdArg6 = 0x7E, "LDARG6" => none,
            /// Loads the argument at the operand index.
            LdArg = 0x7F, "LDARG" => fixed(1),
            StArg0 = 0x80, "STARG0" => none,
            StArg1 = 0x81, "STARG1" => none,
            StArg2 = 0x82, "STARG2" => none,
            StArg3 = 0x83, "STARG3" => none,
            StArg4 = 0x84, "STARG4" => none,
            StArg5 = 0x85, "STARG5" => none,
            StArg6 = 0x86, "STARG6" => none,
            /// Stores the popped item into the argument at the operand index.
            StArg = 0x87, "STARG" => fixed(1),
            // =========================
            // Splice
            // =========================
            /// Pops n and pushes a zero-filled buffer of n bytes.
            NewBuffer = 0x88, "NEWBUFFER" => none,
            /// Copies count bytes from a source span into a buffer.
            MemCpy = 0x89, "MEMCPY" => none,
            /// Concatenates two spans into a buffer.
            Cat = 0x8B, "CAT" => none,
            /// Extracts count bytes starting at index into a buffer.
            SubStr = 0x8C, "SUBSTR" => none,
            /// Extracts the leftmost count bytes into a buffer.
            Left = 0x8D, "LEFT" => none,
            /// Extracts the rightmost count bytes into a buffer.
            Right = 0x8E, "RIGHT" => none,
            // =========================
            // Bitwise logic
            // =========================
            /// Bitwise complement of the popped integer.
            Invert = 0x90, "INVERT" => none,
            And = 0x91, "AND" => none,
            Or = 0x92, "OR" => none,
            Xor = 0x93, "XOR" => none,
            /// Item equality (reference identity for compound types).
            Equal = 0x97, "EQUAL" => none,
            NotEqual = 0x98, "NOTEQUAL" => none,
            // =========================
            // Arithmetic
            // =========================
            /// Pushes the sign of the popped integer as -1, 0 or 1.
            Sign = 0x99, "SIGN" => none,
            Abs = 0x9A, "ABS" => none,
            Negate = 0x9B, "NEGATE" => none,
            Inc = 0x9C, "INC" => none,
            Dec = 0x9D, "DEC" => none,
            Add = 0x9E, "ADD" => none,
            Sub = 0x9F, "SUB" => none,
            Mul = 0xA0, "MUL" => none,
            /// Truncating division; faults on zero divisor.
            Div = 0xA1, "DIV" => none,
            /// Remainder with the dividend's sign; faults on zero divisor.
            Mod = 0xA2, "MOD" => none,
            /// Exponentiation with a non-negative 32-bit exponent.
            Pow = 0xA3, "POW" => none,
            /// Integer square root; faults on a negative operand.
            Sqrt = 0xA4, "SQRT" => none,
            /// (a * b) mod m.
            ModMul = 0xA5, "MODMUL" => none,
            /// a^e mod m; e = -1 computes the modular inverse.
            ModPow = 0xA6, "MODPOW" => none,
            /// Left shift; shift must lie in [0, MaxShift].
            Shl = 0xA8, "SHL" => none,
            /// Arithmetic right shift; shift must lie in [0, MaxShift].
            Shr = 0xA9, "SHR" => none,
            /// Boolean negation.
            Not = 0xAA, "NOT" => none,
            BoolAnd = 0xAB, "BOOLAND" => none,
            BoolOr = 0xAC, "BOOLOR" => none,
            /// True if the popped integer is non-zero.
            Nz = 0xB1, "NZ" => none,
            NumEqual = 0xB3, "NUMEQUAL" => none,
            NumNotEqual = 0xB4, "NUMNOTEQUAL" => none,
            Lt = 0xB5, "LT" => none,
            Le = 0xB6, "LE" => none,
            Gt = 0xB7, "GT" => none,
            Ge = 0xB8, "GE" => none,
            Min = 0xB9, "MIN" => none,
            Max = 0xBA, "MAX" => none,
            /// True if a <= x < b for popped b, x, a.
            Within = 0xBB, "WITHIN" => none,
            // =========================
            // Compound types
            // =========================
            /// Pops n, then n key/value pairs into a new map.
            PackMap = 0xBE, "PACKMAP" => none,
            /// Pops n, then n items into a new struct.
            PackStruct = 0xBF, "PACKSTRUCT" => none,
            /// Pops n, then n items into a new array.
            Pack = 0xC0, "PACK" => none,
            /// Pushes a compound's contents followed by its count.
            Unpack = 0xC1, "UNPACK" => none,
            /// Pushes an empty array.
            NewArray0 = 0xC2, "NEWARRAY0" => none,
            /// Pops n and pushes an array of n nulls.
            NewArray = 0xC3, "NEWARRAY" => none,
            /// Pops n and pushes an array of n type-specific defaults.
            NewArrayT = 0xC4, "NEWARRAY_T" => fixed(1),
            /// Pushes an empty struct.
            NewStruct0 = 0xC5, "NEWSTRUCT0" => none,
            /// Pops n and pushes a struct of n nulls.
            NewStruct = 0xC6, "NEWSTRUCT" => none,
            /// Pushes an empty map.
            NewMap = 0xC8, "NEWMAP" => none,
            /// Pushes the element count or byte length of the popped item.
            Size = 0xCA, "SIZE" => none,
            /// True if the popped collection holds the popped key or index.
            HasKey = 0xCB, "HASKEY" => none,
            /// Pushes an array of the popped map's keys.
            Keys = 0xCC, "KEYS" => none,
            /// Pushes an array of the popped collection's values.
            Values = 0xCD, "VALUES" => none,
            /// Pushes the element at the popped key or index.
            PickItem = 0xCE, "PICKITEM" => none,
            /// Appends the popped value to the popped array or struct.
            Append = 0xCF, "APPEND" => none,
            /// Stores the popped value at the popped key or index.
            SetItem = 0xD0, "SETITEM" => none,
            /// Reverses the popped array or buffer in place.
            ReverseItems = 0xD1, "REVERSEITEMS" => none,
            /// Removes the element at the popped key or index.
            Remove = 0xD2, "REMOVE" => none,
            /// Removes all elements from the popped compound.
            ClearItems = 0xD3, "CLEARITEMS" => none,
            /// Removes and pushes the last element of the popped array.
            PopItem = 0xD4, "POPITEM" => none,
            // =========================
            // Types
            // =========================
            /// True if the popped item is null.
            IsNull = 0xD8, "ISNULL" => none,
            /// True if the popped item has the operand type.
            IsType = 0xD9, "ISTYPE" => fixed(1),
            /// Converts the popped item to the operand type.
            Convert = 0xDB, "CONVERT" => fixed(1),
            /// Faults unconditionally with the popped message.
            AbortMsg = 0xE0, "ABORTMSG" => none,
            /// Pops a message, then a boolean; faults with the message if false.
            AssertMsg = 0xE1, "ASSERTMSG" => none,
        }
    };
}

/// Operand layout of an opcode: an optional little-endian length prefix
/// followed by a fixed number of operand bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OperandEncoding {
    /// Length-prefix width in bytes (PUSHDATA family), 0 for none.
    pub prefix_size: usize,
    /// Fixed operand width in bytes, 0 for none.
    pub fixed_size: usize,
}

#[macro_export]
macro_rules! define_op_codes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $value:expr, $mnemonic:literal => $enc:ident $(($encn:literal))?
        ),* $(,)?
    ) => {
        /// Opcode identifiers with their published numeric values.
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $(
                $(#[$doc])*
                $name = $value,
            )*
        }

        impl TryFrom<u8> for OpCode {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok(OpCode::$name), )*
                    _ => Err(VMError::InvalidOpcode {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl OpCode {
            /// Returns the published mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( OpCode::$name => $mnemonic, )*
                }
            }
        }

        /// Returns the operand layout for an opcode byte.
        ///
        /// Unknown bytes carry no operand; they decode as size-1 instructions
        /// and fault at dispatch.
        pub const fn operand_encoding(opcode: u8) -> OperandEncoding {
            match opcode {
                $(
                    $value => OperandEncoding {
                        prefix_size: define_op_codes!(@prefix $enc $(($encn))?),
                        fixed_size: define_op_codes!(@fixed $enc $(($encn))?),
                    },
                )*
                _ => OperandEncoding {
                    prefix_size: 0,
                    fixed_size: 0,
                },
            }
        }
    };

    // ---------- encoding columns ----------
    (@prefix none) => { 0 };
    (@prefix fixed($n:literal)) => { 0 };
    (@prefix prefix($n:literal)) => { $n };
    (@fixed none) => { 0 };
    (@fixed fixed($n:literal)) => { $n };
    (@fixed prefix($n:literal)) => { 0 };
}

for_each_opcode!(define_op_codes);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_from_round_trips_defined_values() {
        assert_eq!(OpCode::try_from(0x00).unwrap(), OpCode::PushInt8);
        assert_eq!(OpCode::try_from(0x40).unwrap(), OpCode::Ret);
        assert_eq!(OpCode::try_from(0x9E).unwrap(), OpCode::Add);
        assert_eq!(OpCode::try_from(0xE1).unwrap(), OpCode::AssertMsg);
    }

    #[test]
    fn try_from_rejects_gaps() {
        for value in [0x06u8, 0x07, 0x42, 0x4F, 0x8A, 0xFF] {
            assert!(matches!(
                OpCode::try_from(value),
                Err(VMError::InvalidOpcode { opcode, .. }) if opcode == value
            ));
        }
    }

    #[test]
    fn operand_table() {
        assert_eq!(
            operand_encoding(OpCode::PushInt256 as u8),
            OperandEncoding {
                prefix_size: 0,
                fixed_size: 32
            }
        );
        assert_eq!(
            operand_encoding(OpCode::PushData2 as u8),
            OperandEncoding {
                prefix_size: 2,
                fixed_size: 0
            }
        );
        assert_eq!(
            operand_encoding(OpCode::TryL as u8),
            OperandEncoding {
                prefix_size: 0,
                fixed_size: 8
            }
        );
        assert_eq!(
            operand_encoding(OpCode::Dup as u8),
            OperandEncoding {
                prefix_size: 0,
                fixed_size: 0
            }
        );
        // Unknown bytes decode as bare single-byte instructions.
        assert_eq!(
            operand_encoding(0xFF),
            OperandEncoding {
                prefix_size: 0,
                fixed_size: 0
            }
        );
    }

    #[test]
    fn mnemonics() {
        assert_eq!(OpCode::JmpIfNotL.mnemonic(), "JMPIFNOT_L");
        assert_eq!(OpCode::NewArrayT.mnemonic(), "NEWARRAY_T");
        assert_eq!(OpCode::StSFld3.mnemonic(), "STSFLD3");
    }
}
