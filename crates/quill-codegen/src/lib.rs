//! Quill Code Generator
//!
//! Lowers type-annotated expression trees to symbolic stack-machine
//! assembly.
//!
//! ## Architecture
//!
//! - **Expressions**: [`ExprCompiler`] emits code for one expression tree in
//!   a single pass, tracking the stack height at compile time.
//! - **Helpers**: larger operations are synthesized once per code image as
//!   named helper routines ([`helpers`]).
//! - **Contracts**: [`ContractCompiler`] assembles dispatcher, function
//!   bodies, accessors and constructor into creation and runtime code.
//!
//! ## Modules
//!
//! - [`accessor`]: getters of public state variables
//! - [`asm`]: instruction set and symbolic assembly
//! - [`context`]: per-image compilation state and the stack height model
//! - [`contract`]: contract assembly
//! - [`expr`]: expression code generation
//! - [`function`]: function bodies
//! - [`helpers`]: runtime helper synthesis
//! - [`lvalue`]: assignable locations
//! - [`settings`]: configuration

pub mod accessor;
pub mod asm;
pub mod context;
pub mod contract;
pub mod expr;
pub mod function;
pub mod helpers;
pub mod lvalue;
pub mod settings;

pub use asm::{Assembly, AssemblyItem, Instruction, SubId, Tag};
pub use context::CompilerContext;
pub use contract::{CompiledContract, ContractCompiler};
pub use expr::ExprCompiler;
pub use lvalue::LValue;
pub use settings::{ArithmeticMode, CompilerSettings, RevertStrings};

// Re-export the error type for convenience
pub use quill_core::CompilationError;
