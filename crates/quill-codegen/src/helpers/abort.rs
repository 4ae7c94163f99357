//! Panic and revert sequences.
//!
//! Both are abort helpers: they are jumped to rather than called, leave the
//! stack alone and never return.

use num_bigint::BigUint;
use quill_core::CompilationError;
use quill_core::hash::{keccak256, to_hex};
use quill_core::num::left_aligned;

use super::code::{lit, mstore, revert};
use crate::asm::Tag;
use crate::context::CompilerContext;
use crate::settings::RevertStrings;

type Result<T> = std::result::Result<T, CompilationError>;

/// Selector of `Panic(uint256)`.
pub const PANIC_SELECTOR: u32 = 0x4e48_7b71;

/// Selector of `Error(string)`.
pub const ERROR_SELECTOR: u32 = 0x08c3_79a0;

/// Panic codes.
pub mod panic_code {
    /// Failed `assert`.
    pub const ASSERT: u8 = 0x01;
    /// Arithmetic overflow or underflow.
    pub const OVERFLOW: u8 = 0x11;
    /// Division or modulo by zero.
    pub const DIVISION_BY_ZERO: u8 = 0x12;
    /// Conversion of an out-of-range value to an enum.
    pub const ENUM_CONVERSION: u8 = 0x21;
    /// Storage byte array with inconsistent length encoding.
    pub const STORAGE_ENCODING: u8 = 0x22;
    /// `pop` on an empty array.
    pub const EMPTY_ARRAY_POP: u8 = 0x31;
    /// Array index out of bounds.
    pub const OUT_OF_BOUNDS: u8 = 0x32;
    /// Allocation of too much memory.
    pub const RESOURCE: u8 = 0x41;
}

/// Selector shifted into the high four bytes of a word.
pub fn selector_word(selector: u32) -> BigUint {
    BigUint::from(selector) << 224
}

impl CompilerContext<'_> {
    /// Entry tag of `panic_error_0x<code>`.
    pub fn panic_helper(&mut self, code: u8) -> Result<Tag> {
        self.abort_helper(&format!("panic_error_0x{code:02x}"), |ctx| {
            ctx.exec(mstore(lit(0u32), lit(selector_word(PANIC_SELECTOR))))?;
            ctx.exec(mstore(lit(4u32), lit(code)))?;
            ctx.exec(revert(lit(0u32), lit(0x24u32)))
        })
    }

    /// Entry tag of a revert with a constant reason. An empty reason, or any
    /// reason when revert strings are stripped, reverts without data.
    pub fn revert_helper(&mut self, reason: &str) -> Result<Tag> {
        let reason = match self.settings().revert_strings {
            RevertStrings::Strip => "",
            RevertStrings::Default | RevertStrings::Debug => reason,
        };
        let name = format!("revert_error_{}", &to_hex(&keccak256(reason.as_bytes()))[..16]);
        let bytes = reason.as_bytes().to_vec();
        self.abort_helper(&name, move |ctx| {
            if bytes.is_empty() {
                return ctx.exec(revert(lit(0u32), lit(0u32)));
            }
            ctx.exec(mstore(lit(0u32), lit(selector_word(ERROR_SELECTOR))))?;
            ctx.exec(mstore(lit(4u32), lit(0x20u32)))?;
            ctx.exec(mstore(lit(0x24u32), lit(bytes.len() as u64)))?;
            for (index, chunk) in bytes.chunks(32).enumerate() {
                ctx.exec(mstore(lit(0x44 + 32 * index as u64), lit(left_aligned(chunk))))?;
            }
            let size = 0x44 + bytes.len().div_ceil(32) as u64 * 32;
            ctx.exec(revert(lit(0u32), lit(size)))
        })
    }

    /// Revert reason of a check the generator inserts on its own; only
    /// present with [`RevertStrings::Debug`].
    pub fn generated_revert(&mut self, reason: &str) -> Result<Tag> {
        match self.settings().revert_strings {
            RevertStrings::Debug => self.revert_helper(reason),
            RevertStrings::Default | RevertStrings::Strip => self.revert_helper(""),
        }
    }
}
