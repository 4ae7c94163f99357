//! Quill Core
//!
//! Type system and declaration model of the Quill contract-language backend.
//!
//! ## Modules
//!
//! - [`ast`]: type-annotated expression tree and its builder
//! - [`env`]: declaration arena with memoized layout side-tables
//! - [`error`]: type, layout and compilation errors
//! - [`hash`]: `TypeHash` identity and keccak-256
//! - [`layout`]: storage slot packing
//! - [`num`]: 256-bit word arithmetic helpers
//! - [`rational`]: literal parsing and constant folding
//! - [`span`]: source locations
//! - [`types`]: the semantic type lattice

pub mod ast;
pub mod env;
pub mod error;
pub mod hash;
pub mod layout;
pub mod num;
pub mod rational;
pub mod span;
pub mod types;

pub use env::{
    ContractId, ContractKind, EnumId, EventId, EventParam, FunctionDef, FunctionId, Param, StructId, TypeEnv,
    TypeIdx, UsingFor, VariableId, Visibility,
};
pub use error::{CompilationError, LayoutError, QuillError, TypeError};
pub use hash::{TypeHash, keccak256, selector};
pub use layout::StorageOffsets;
pub use span::Span;
pub use types::{
    CallOptions, DataLocation, FunctionKind, FunctionType, MagicKind, StateMutability, Type,
};
