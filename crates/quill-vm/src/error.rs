//! Error types of the reference machine.
//!
//! Two kinds are kept apart:
//!
//! - [`VmError`]: misuse of the host API or an assembly that cannot be
//!   turned into byte code. These are Rust errors.
//! - [`Halt`]: exceptional termination of executed code. A halt is a normal
//!   outcome of execution and is reported through
//!   [`ExecutionOutcome`](crate::ExecutionOutcome), never as an error.

use quill_codegen::Tag;
use thiserror::Error;

use crate::state::Address;

/// Host-side failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// A jump target was referenced but never placed.
    #[error("tag {0} is referenced but never placed")]
    UndefinedTag(Tag),

    /// A code offset does not fit the fixed two-byte push width.
    #[error("program of {size} bytes exceeds the addressable 65535 bytes")]
    ProgramTooLarge {
        /// Size reached when the limit was crossed.
        size: usize,
    },

    /// An embedded assembly id does not exist.
    #[error("assembly has no sub-assembly {0}")]
    UnknownSub(usize),

    /// The host called an address without code.
    #[error("account {0} has no code")]
    NoCode(Address),

    /// The sending account cannot cover the transferred value.
    #[error("account {account} cannot transfer {value} wei")]
    InsufficientBalance {
        /// Sender of the transaction.
        account: Address,
        /// Requested value.
        value: String,
    },

    /// ABI data does not match the requested types.
    #[error("abi decoding failed: {0}")]
    AbiDecode(String),

    /// A type string could not be parsed.
    #[error("invalid abi type `{0}`")]
    AbiType(String),
}

/// Why execution of a frame stopped abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Halt {
    /// `INVALID` or an unassigned opcode.
    #[error("invalid instruction 0x{0:02x}")]
    InvalidInstruction(u8),
    /// Fewer stack words than the instruction consumes.
    #[error("stack underflow")]
    StackUnderflow,
    /// More than 1024 stack words.
    #[error("stack overflow")]
    StackOverflow,
    /// Jump to a position that is not a `JUMPDEST`.
    #[error("invalid jump destination {0}")]
    InvalidJump(usize),
    /// Gas ran out, or memory grew past the machine limit.
    #[error("out of gas")]
    OutOfGas,
    /// State modification inside a static call.
    #[error("state modification in static context")]
    StaticViolation,
    /// `RETURNDATACOPY` past the end of the return data.
    #[error("return data access out of bounds")]
    ReturnDataOutOfBounds,
}
