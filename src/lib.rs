//! Quill: code generation backend for a statically typed smart contract
//! language.
//!
//! The workspace is split into three crates, re-exported here:
//!
//! - [`quill_core`]: types, declarations, storage layout and typed trees
//! - [`quill_codegen`]: expression code generation, runtime helpers and
//!   contract assembly
//! - [`quill_vm`]: an assembler and reference machine for running the
//!   generated code
//!
//! [`Unit`] ties them together: it compiles contracts, assembles them and
//! deploys them to a [`Vm`].
//!
//! # Example
//!
//! ```ignore
//! let mut unit = Unit::new(&env, CompilerSettings::default());
//! unit.build(counter, &source)?;
//! let mut vm = Vm::new();
//! let address = unit.deploy(&mut vm, counter, &[], 0u32)?;
//! vm.call(address, &AbiValue::calldata("increment()", &[]), 0u32)?;
//! ```

pub mod unit;

pub use quill_codegen;
pub use quill_core;
pub use quill_vm;

pub use quill_codegen::{ArithmeticMode, CompiledContract, CompilerSettings, ContractCompiler, RevertStrings};
pub use quill_core::{CompilationError, QuillError, Type, TypeEnv};
pub use quill_vm::{AbiType, AbiValue, Address, ExecutionOutcome, Vm, VmError};
pub use unit::{BuildError, Unit};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call more than once. Nothing is installed unless `RUST_LOG` is
/// set, e.g. `RUST_LOG=quill_codegen=debug` or `RUST_LOG=quill_vm=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
