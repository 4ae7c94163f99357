//! Compilation unit API.
//!
//! A [`Unit`] compiles the contracts of one [`TypeEnv`], assembles them into
//! byte code and deploys them. Contracts instantiated with `new` must be
//! built before the contracts that create them.
//!
//! # Example
//!
//! ```ignore
//! let mut unit = Unit::new(&env, CompilerSettings::default());
//! unit.build(token, &token_source)?;
//! unit.build(factory, &factory_source)?;
//!
//! let mut vm = Vm::new();
//! let address = unit.deploy(&mut vm, factory, &[AbiValue::uint(100u32)], 0u32)?;
//! ```

use std::rc::Rc;

use num_bigint::BigUint;
use quill_codegen::{Assembly, CompilerSettings, ContractCompiler};
use quill_core::ast::ContractSource;
use quill_core::{CompilationError, ContractId, QuillError, TypeEnv};
use quill_vm::{AbiValue, Address, Program, Vm, VmError, assemble, panic_code, revert_reason};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// Compiled and assembled contracts of one declaration environment.
pub struct Unit<'env> {
    env: &'env TypeEnv,
    settings: CompilerSettings,
    /// Creation code of every built contract, available to `new`.
    compiled: FxHashMap<ContractId, Rc<Assembly>>,
    /// Creation byte code of every built contract.
    programs: FxHashMap<ContractId, Program>,
}

impl<'env> Unit<'env> {
    /// Create an empty unit.
    pub fn new(env: &'env TypeEnv, settings: CompilerSettings) -> Self {
        Self {
            env,
            settings,
            compiled: FxHashMap::default(),
            programs: FxHashMap::default(),
        }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Compile and assemble `contract`.
    ///
    /// Rebuilding a contract replaces its earlier program. Contracts built
    /// before it keep the creation code they embedded.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn build(&mut self, contract: ContractId, source: &ContractSource<'_>) -> Result<&Program, BuildError> {
        let compiled = ContractCompiler::new(self.env, self.settings.clone(), contract)
            .with_compiled_contracts(self.compiled.clone())
            .compile(source)?;
        if !compiled.is_success() {
            return Err(BuildError::CompilationErrors(compiled.errors));
        }

        let program = assemble(&compiled.creation)?;
        info!(
            contract = %self.env.contract(contract).name,
            bytes = program.code.len(),
            "built contract"
        );
        self.compiled.insert(contract, Rc::new(compiled.creation));
        Ok(self.programs.entry(contract).insert_entry(program).into_mut())
    }

    /// Whether `contract` has been built.
    pub fn is_built(&self, contract: ContractId) -> bool {
        self.programs.contains_key(&contract)
    }

    /// Creation byte code of a built contract.
    pub fn program(&self, contract: ContractId) -> Option<&Program> {
        self.programs.get(&contract)
    }

    /// Deploy a built contract with ABI-encoded constructor `arguments`.
    pub fn deploy(
        &self,
        vm: &mut Vm,
        contract: ContractId,
        arguments: &[AbiValue],
        value: impl Into<BigUint>,
    ) -> Result<Address, BuildError> {
        let program = self.program(contract).ok_or_else(|| BuildError::NotBuilt {
            contract: self.env.contract(contract).name.clone(),
        })?;
        let outcome = vm.deploy(&program.code, &AbiValue::encode(arguments), value)?;
        match outcome.created() {
            Some(address) => {
                debug!(contract = %self.env.contract(contract).name, %address, "deployed contract");
                Ok(address)
            }
            None => {
                let data = outcome.revert_data().unwrap_or_default();
                let reason = revert_reason(data)
                    .or_else(|| panic_code(data).map(|code| format!("panic 0x{code:02x}")))
                    .unwrap_or_else(|| "no reason".to_string());
                Err(BuildError::DeploymentFailed {
                    contract: self.env.contract(contract).name.clone(),
                    reason,
                })
            }
        }
    }

    /// Forget every built contract.
    pub fn clear(&mut self) {
        self.compiled.clear();
        self.programs.clear();
    }
}

/// Errors from building or deploying a unit.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Functions that failed to compile.
    #[error("{} compilation error(s)", .0.len())]
    CompilationErrors(Vec<CompilationError>),

    /// Compilation aborted.
    #[error(transparent)]
    Compilation(#[from] CompilationError),

    /// The assembler or machine rejected the code.
    #[error(transparent)]
    Vm(#[from] VmError),

    /// Deployment of a contract that was never built.
    #[error("contract {contract} has not been built")]
    NotBuilt { contract: String },

    /// The constructor reverted or halted.
    #[error("deployment of {contract} failed: {reason}")]
    DeploymentFailed { contract: String, reason: String },
}

impl BuildError {
    /// The underlying compiler errors, if any.
    pub fn into_errors(self) -> Vec<QuillError> {
        match self {
            BuildError::CompilationErrors(errors) => errors.into_iter().map(QuillError::from).collect(),
            BuildError::Compilation(error) => vec![QuillError::from(error)],
            _ => Vec::new(),
        }
    }
}
