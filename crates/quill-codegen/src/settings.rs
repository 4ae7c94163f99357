//! Code generator configuration.

use num_bigint::BigUint;
use quill_core::ContractId;
use rustc_hash::FxHashMap;

/// How integer arithmetic treats overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArithmeticMode {
    /// Overflow, underflow and division by zero abort with a panic code.
    #[default]
    Checked,
    /// Results wrap at the type width. Division by zero still panics.
    Wrapping,
}

/// How much revert reason text ends up in the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RevertStrings {
    /// Reasons given in source are kept.
    #[default]
    Default,
    /// All reasons are dropped; reverts carry no data.
    Strip,
    /// Reasons are kept and generated checks get descriptive reasons.
    Debug,
}

/// Options of a compilation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerSettings {
    /// Overflow behaviour of arithmetic.
    pub arithmetic: ArithmeticMode,
    /// Revert reason verbosity.
    pub revert_strings: RevertStrings,
    /// DUP/SWAP reach; values deeper than this are unreachable.
    pub stack_limit: usize,
    /// Deployed addresses of libraries called through `delegatecall`.
    pub library_addresses: FxHashMap<ContractId, BigUint>,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            arithmetic: ArithmeticMode::Checked,
            revert_strings: RevertStrings::Default,
            stack_limit: 16,
            library_addresses: FxHashMap::default(),
        }
    }
}

impl CompilerSettings {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the arithmetic mode.
    pub fn with_arithmetic(mut self, mode: ArithmeticMode) -> Self {
        self.arithmetic = mode;
        self
    }

    /// Set revert reason verbosity.
    pub fn with_revert_strings(mut self, strings: RevertStrings) -> Self {
        self.revert_strings = strings;
        self
    }

    /// Set the DUP/SWAP reach.
    pub fn with_stack_limit(mut self, limit: usize) -> Self {
        self.stack_limit = limit;
        self
    }

    /// Register the deployed address of a library.
    pub fn with_library(mut self, library: ContractId, address: BigUint) -> Self {
        self.library_addresses.insert(library, address);
        self
    }

    /// Whether arithmetic is overflow-checked.
    pub fn checked(&self) -> bool {
        self.arithmetic == ArithmeticMode::Checked
    }
}
