//! Shared setup for end-to-end tests.

use quill::quill_core::ast::ContractSource;
use quill::quill_core::{ContractId, FunctionDef, FunctionId, Param, StateMutability, Type, Visibility};
use quill::{AbiValue, Address, CompilerSettings, ExecutionOutcome, TypeEnv, Unit, Vm};

/// Declare a public, non-payable function of `contract`.
pub fn function(env: &mut TypeEnv, contract: ContractId, name: &str, params: &[Type], returns: &[Type]) -> FunctionId {
    declare(env, contract, name, params, returns, StateMutability::NonPayable)
}

/// Declare a public function of `contract` that accepts value.
pub fn payable(env: &mut TypeEnv, contract: ContractId, name: &str, params: &[Type], returns: &[Type]) -> FunctionId {
    declare(env, contract, name, params, returns, StateMutability::Payable)
}

fn declare(
    env: &mut TypeEnv,
    contract: ContractId,
    name: &str,
    params: &[Type],
    returns: &[Type],
    mutability: StateMutability,
) -> FunctionId {
    env.add_function(FunctionDef {
        name: name.into(),
        contract: Some(contract),
        params: params.iter().enumerate().map(|(i, ty)| Param::new(format!("p{i}"), ty.clone())).collect(),
        returns: returns.iter().map(|ty| Param::new("", ty.clone())).collect(),
        visibility: Visibility::Public,
        mutability,
        is_constructor: false,
    })
}

/// Declare the constructor of `contract`.
pub fn constructor(env: &mut TypeEnv, contract: ContractId, params: &[Type]) -> FunctionId {
    env.add_function(FunctionDef {
        name: String::new(),
        contract: Some(contract),
        params: params.iter().enumerate().map(|(i, ty)| Param::new(format!("p{i}"), ty.clone())).collect(),
        returns: vec![],
        visibility: Visibility::Public,
        mutability: StateMutability::NonPayable,
        is_constructor: true,
    })
}

/// A contract deployed on its own machine.
pub struct Deployed {
    pub vm: Vm,
    pub address: Address,
}

impl Deployed {
    pub fn call(&mut self, signature: &str, args: &[AbiValue]) -> ExecutionOutcome {
        self.vm
            .call(self.address, &AbiValue::calldata(signature, args), 0u32)
            .unwrap_or_else(|e| panic!("{signature}: {e}"))
    }

    /// Call that must succeed, decoding its output as `returns`.
    pub fn query(&mut self, signature: &str, args: &[AbiValue], returns: &[&str]) -> Vec<AbiValue> {
        let outcome = self.call(signature, args);
        assert!(outcome.is_success(), "{signature} failed: {outcome:?}");
        AbiValue::decode_str(returns, outcome.output()).unwrap()
    }

    /// Call returning a single `uint256`.
    pub fn uint(&mut self, signature: &str, args: &[AbiValue]) -> u64 {
        let values = self.query(signature, args, &["uint256"]);
        let value = values[0].as_uint().unwrap();
        u64::try_from(value).unwrap_or_else(|_| panic!("{signature} returned {value}"))
    }
}

/// Build `contract` and deploy it with `arguments` on a fresh machine.
pub fn deploy_with(
    env: &TypeEnv,
    settings: CompilerSettings,
    contract: ContractId,
    source: &ContractSource<'_>,
    arguments: &[AbiValue],
) -> Deployed {
    quill::init_tracing();
    let mut unit = Unit::new(env, settings);
    unit.build(contract, source).unwrap_or_else(|e| panic!("build failed: {e:?}"));
    let mut vm = Vm::new();
    let address = unit.deploy(&mut vm, contract, arguments, 0u32).unwrap();
    Deployed { vm, address }
}

/// A contract to build, with its constructor arguments.
pub type Part<'s, 'a> = (ContractId, &'s ContractSource<'a>, Vec<AbiValue>);

/// Build every contract in order, so later ones may create earlier ones,
/// and deploy each on one machine.
pub fn deploy_all(env: &TypeEnv, contracts: &[Part<'_, '_>]) -> (Vm, Vec<Address>) {
    quill::init_tracing();
    let mut unit = Unit::new(env, CompilerSettings::default());
    for (contract, source, _) in contracts {
        unit.build(*contract, source).unwrap_or_else(|e| panic!("build failed: {e:?}"));
    }
    let mut vm = Vm::new();
    let addresses = contracts
        .iter()
        .map(|(contract, _, arguments)| unit.deploy(&mut vm, *contract, arguments, 0u32).unwrap())
        .collect();
    (vm, addresses)
}

/// Call `address` without value, requiring success, and decode the output.
pub fn query_at(vm: &mut Vm, address: Address, signature: &str, args: &[AbiValue], returns: &[&str]) -> Vec<AbiValue> {
    let outcome = vm
        .call(address, &AbiValue::calldata(signature, args), 0u32)
        .unwrap_or_else(|e| panic!("{signature}: {e}"));
    assert!(outcome.is_success(), "{signature} failed: {outcome:?}");
    AbiValue::decode_str(returns, outcome.output()).unwrap()
}

pub fn deploy(env: &TypeEnv, contract: ContractId, source: &ContractSource<'_>) -> Deployed {
    deploy_with(env, CompilerSettings::default(), contract, source, &[])
}
