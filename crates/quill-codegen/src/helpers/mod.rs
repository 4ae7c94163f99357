//! Runtime helper synthesis.
//!
//! Operations too large to inline (checked arithmetic, ABI coding, storage
//! array maintenance, copies between locations) are emitted once per code
//! image as helper routines and called by tag. Helpers are named after the
//! operation and the identifiers of the types involved, and the registry
//! returns the existing tag for a name it has seen before.
//!
//! Calling convention: the caller pushes a return label and the arguments,
//! first argument deepest, and jumps to the entry tag. The helper leaves its
//! results in order, first result deepest, and jumps back.

pub mod abi;
pub mod abort;
pub mod code;
pub mod convert;
pub mod math;
pub mod memory;
mod registry;
pub mod storage;

pub use registry::{HelperRegistry, RuntimeHelper};
