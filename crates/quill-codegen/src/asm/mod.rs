//! Instruction set and symbolic assembly.

mod assembly;
mod instruction;

pub use assembly::{Assembly, AssemblyItem, SubId, Tag};
pub use instruction::Instruction;
