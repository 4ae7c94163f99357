//! Quill Reference Machine
//!
//! Executes the code produced by `quill-codegen` so that generated programs
//! can be checked end to end.
//!
//! ## Architecture
//!
//! - **Assembler**: [`assemble`] lays out an [`Assembly`](quill_codegen::Assembly)
//!   and its sub-assemblies as byte code.
//! - **Interpreter**: [`Vm`] runs byte code against a world state of
//!   accounts, with nested calls and creations that roll back on failure.
//! - **ABI**: [`AbiValue`] builds calldata and decodes results on the host
//!   side.
//!
//! ## Example
//!
//! ```ignore
//! let program = assemble(&compiled.creation)?;
//! let mut vm = Vm::new();
//! let address = vm.deploy(&program.code, &[], 0u32)?.created().unwrap();
//! let outcome = vm.call(address, &AbiValue::calldata("count()", &[]), 0u32)?;
//! ```

pub mod abi;
pub mod assembler;
pub mod error;
pub mod memory;
pub mod state;
pub mod vm;

pub use abi::{AbiType, AbiValue, panic_code, revert_reason};
pub use assembler::{Program, assemble, disassemble};
pub use error::{Halt, VmError};
pub use state::{Address, Log};
pub use vm::{BlockEnv, ExecutionOutcome, Vm};
