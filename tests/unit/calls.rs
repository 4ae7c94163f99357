//! Calls between contracts: creation, recovered calls and the generated
//! accessors of nested state.

use bumpalo::Bump;
use pretty_assertions::assert_eq;
use quill::quill_core::ast::{AssignOp, AstBuilder, BinaryOp, ContractSource, Stmt};
use quill::quill_core::{ContractId, ContractKind, DataLocation, Visibility};
use quill::{AbiValue, Address, Type, TypeEnv, Vm};

use super::harness::{constructor, deploy, deploy_all, function, query_at};

/// A child that only accepts constructor values below 100 and checks
/// against zero.
fn child<'a>(arena: &'a Bump, env: &mut TypeEnv) -> (ContractId, ContractSource<'a>) {
    let c = env.add_contract("Child", ContractKind::Contract, &[]);
    let value = env.add_state_variable(c, "value", Type::uint256(), Visibility::Public, false);
    let init = constructor(env, c, &[Type::uint256()]);
    let check = function(env, c, "check", &[Type::uint256()], &[Type::uint256()]);

    let mut b = AstBuilder::new(arena, env, Some(c));
    let init = b
        .function_body(init, |b, params, _| {
            let require = b.builtin("require")?;
            let initial = b.local(params[0]);
            let limit = b.int(100);
            let condition = b.binary(initial, BinaryOp::Less, limit)?;
            let guard = b.call(require, &[condition])?;
            let target = b.state_variable(value);
            let initial = b.local(params[0]);
            Ok(vec![Stmt::Expr(guard), Stmt::Expr(b.assign(target, AssignOp::Assign, initial)?)])
        })
        .unwrap();
    let check = b
        .function_body(check, |b, params, _| {
            let require = b.builtin("require")?;
            let input = b.local(params[0]);
            let zero = b.int(0);
            let condition = b.binary(input, BinaryOp::NotEqual, zero)?;
            let guard = b.call(require, &[condition])?;
            let input = b.local(params[0]);
            let stored = b.state_variable(value);
            let sum = b.binary(input, BinaryOp::Add, stored)?;
            Ok(vec![Stmt::Expr(guard), Stmt::Return(Some(sum))])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![init, check],
        ..ContractSource::default()
    };
    (c, source)
}

/// Deploys a child, a factory for children and returns their addresses.
fn family(arena: &Bump) -> (Vm, Address, Address) {
    let mut env = TypeEnv::new();
    let (child, child_source) = child(arena, &mut env);
    let factory = env.add_contract("Factory", ContractKind::Contract, &[]);
    let make = function(&mut env, factory, "make", &[Type::uint256()], &[Type::contract(child)]);
    let try_make = function(
        &mut env,
        factory,
        "tryMake",
        &[Type::uint256()],
        &[Type::Bool, Type::contract(child)],
    );
    let attempt = function(
        &mut env,
        factory,
        "attempt",
        &[Type::contract(child), Type::uint256()],
        &[Type::Bool, Type::uint256()],
    );

    let mut b = AstBuilder::new(arena, &mut env, Some(factory));
    let make = b
        .function_body(make, |b, params, _| {
            let creation = b.new_expr(Type::contract(child))?;
            let initial = b.local(params[0]);
            Ok(vec![Stmt::Return(Some(b.call(creation, &[initial])?))])
        })
        .unwrap();
    let try_make = b
        .function_body(try_make, |b, params, _| {
            let creation = b.new_expr(Type::contract(child))?;
            let initial = b.local(params[0]);
            Ok(vec![Stmt::Return(Some(b.try_call(creation, &[initial])?))])
        })
        .unwrap();
    let attempt = b
        .function_body(attempt, |b, params, _| {
            let target = b.local(params[0]);
            let check = b.member(target, "check")?;
            let input = b.local(params[1]);
            Ok(vec![Stmt::Return(Some(b.try_call(check, &[input])?))])
        })
        .unwrap();
    let factory_source = ContractSource {
        functions: vec![make, try_make, attempt],
        ..ContractSource::default()
    };

    let (vm, addresses) = deploy_all(
        &env,
        &[
            (child, &child_source, vec![AbiValue::uint(1u32)]),
            (factory, &factory_source, vec![]),
        ],
    );
    (vm, addresses[0], addresses[1])
}

fn uint(value: u32) -> AbiValue {
    AbiValue::uint(value)
}

#[test]
fn test_new_deploys_a_constructed_child() {
    let arena = Bump::new();
    let (mut vm, _, factory) = family(&arena);

    let created = query_at(&mut vm, factory, "make(uint256)", &[uint(42)], &["address"]);
    let created = created[0].as_address().unwrap();
    assert_ne!(created, Address::default());
    assert_eq!(query_at(&mut vm, created, "value()", &[], &["uint256"]), vec![uint(42)]);

    // A failing constructor fails the creating call.
    let calldata = AbiValue::calldata("make(uint256)", &[uint(100)]);
    assert!(!vm.call(factory, &calldata, 0u32).unwrap().is_success());
}

#[test]
fn test_try_creation_recovers_from_a_failing_constructor() {
    let arena = Bump::new();
    let (mut vm, _, factory) = family(&arena);

    let outcome = query_at(&mut vm, factory, "tryMake(uint256)", &[uint(100)], &["bool", "address"]);
    assert_eq!(outcome, vec![AbiValue::Bool(false), AbiValue::Address(Address::default())]);

    let outcome = query_at(&mut vm, factory, "tryMake(uint256)", &[uint(7)], &["bool", "address"]);
    assert_eq!(outcome[0], AbiValue::Bool(true));
    let created = outcome[1].as_address().unwrap();
    assert_eq!(query_at(&mut vm, created, "value()", &[], &["uint256"]), vec![uint(7)]);
}

#[test]
fn test_try_call_reports_success_and_results() {
    let arena = Bump::new();
    let (mut vm, child, factory) = family(&arena);

    let outcome = query_at(
        &mut vm,
        factory,
        "attempt(address,uint256)",
        &[AbiValue::Address(child), uint(5)],
        &["bool", "uint256"],
    );
    assert_eq!(outcome, vec![AbiValue::Bool(true), uint(6)]);

    // The callee reverts; the caller keeps running with zeroed results.
    let outcome = query_at(
        &mut vm,
        factory,
        "attempt(address,uint256)",
        &[AbiValue::Address(child), uint(0)],
        &["bool", "uint256"],
    );
    assert_eq!(outcome, vec![AbiValue::Bool(false), uint(0)]);
}

#[test]
fn test_nested_mapping_accessor_returns_struct_members() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let c = env.add_contract("Ledger", ContractKind::Contract, &[]);
    let record = env.add_struct(
        "Record",
        Some(c),
        vec![
            ("amount".into(), Type::uint(128)),
            ("active".into(), Type::Bool),
            ("extra".into(), Type::mapping(Type::uint256(), Type::uint256())),
        ],
    );
    let records = env.add_state_variable(
        c,
        "records",
        Type::mapping(
            Type::address(),
            Type::mapping(Type::uint256(), Type::struct_type(record, DataLocation::Storage)),
        ),
        Visibility::Public,
        false,
    );
    let set = function(&mut env, c, "set", &[Type::address(), Type::uint256(), Type::uint(128)], &[]);
    let body = AstBuilder::new(&arena, &mut env, Some(c))
        .function_body(set, |b, params, _| {
            let outer = b.state_variable(records);
            let owner = b.local(params[0]);
            let inner = b.index(outer, owner)?;
            let key = b.local(params[1]);
            let target = b.index(inner, key)?;
            let amount = b.member(target, "amount")?;
            let value = b.local(params[2]);
            let store_amount = b.assign(amount, AssignOp::Assign, value)?;
            let outer = b.state_variable(records);
            let owner = b.local(params[0]);
            let inner = b.index(outer, owner)?;
            let key = b.local(params[1]);
            let target = b.index(inner, key)?;
            let active = b.member(target, "active")?;
            let yes = b.boolean(true);
            let store_active = b.assign(active, AssignOp::Assign, yes)?;
            Ok(vec![Stmt::Expr(store_amount), Stmt::Expr(store_active)])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };

    let mut ledger = deploy(&env, c, &source);
    let owner = AbiValue::Address(ledger.vm.sender());
    let set = ledger.call("set(address,uint256,uint128)", &[owner.clone(), uint(3), uint(900)]);
    assert!(set.is_success(), "{set:?}");

    let returns = ["uint128", "bool"];
    assert_eq!(
        ledger.query("records(address,uint256)", &[owner.clone(), uint(3)], &returns),
        vec![uint(900), AbiValue::Bool(true)]
    );
    assert_eq!(
        ledger.query("records(address,uint256)", &[owner, uint(4)], &returns),
        vec![uint(0), AbiValue::Bool(false)]
    );
}
