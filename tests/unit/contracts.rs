//! Complete contracts run end to end.

use bumpalo::Bump;
use num_bigint::BigUint;
use pretty_assertions::assert_eq;
use quill::quill_core::ast::{AssignOp, AstBuilder, BinaryOp, ContractSource, Stmt};
use quill::quill_core::num::u256_max;
use quill::quill_core::hash::keccak_word;
use quill::quill_core::{ContractId, ContractKind, DataLocation, EventParam, MagicKind, Visibility};
use quill::quill_vm::{panic_code, revert_reason};
use quill::{AbiValue, ArithmeticMode, CompilerSettings, RevertStrings, Type, TypeEnv};

use super::harness::{constructor, deploy, deploy_with, function};

// =============================================================================
// Counter
// =============================================================================

fn counter<'a>(arena: &'a Bump, env: &mut TypeEnv) -> (ContractId, ContractSource<'a>) {
    let c = env.add_contract("Counter", ContractKind::Contract, &[]);
    let count = env.add_state_variable(c, "count", Type::uint256(), Visibility::Public, false);
    let increment = function(env, c, "increment", &[], &[]);
    let add = function(env, c, "add", &[Type::uint256()], &[Type::uint256()]);

    let mut b = AstBuilder::new(arena, env, Some(c));
    let increment = b
        .function_body(increment, |b, _, _| {
            let target = b.state_variable(count);
            let one = b.int(1);
            Ok(vec![Stmt::Expr(b.assign(target, AssignOp::Compound(BinaryOp::Add), one)?)])
        })
        .unwrap();
    let add = b
        .function_body(add, |b, params, _| {
            let target = b.state_variable(count);
            let amount = b.local(params[0]);
            let updated = b.assign(target, AssignOp::Compound(BinaryOp::Add), amount)?;
            Ok(vec![Stmt::Return(Some(updated))])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![increment, add],
        ..ContractSource::default()
    };
    (c, source)
}

#[test]
fn test_counter_increments_storage() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = counter(&arena, &mut env);
    let mut counter = deploy(&env, c, &source);

    assert_eq!(counter.uint("count()", &[]), 0);
    assert!(counter.call("increment()", &[]).is_success());
    assert!(counter.call("increment()", &[]).is_success());
    assert_eq!(counter.uint("count()", &[]), 2);
    assert_eq!(counter.uint("add(uint256)", &[AbiValue::uint(5u32)]), 7);
    assert_eq!(counter.vm.storage_at(counter.address, 0u32), BigUint::from(7u32));
}

#[test]
fn test_unknown_selector_reverts() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = counter(&arena, &mut env);
    let mut counter = deploy(&env, c, &source);

    assert!(!counter.call("decrement()", &[]).is_success());
    assert_eq!(counter.uint("count()", &[]), 0);
}

#[test]
fn test_counter_rejects_value() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = counter(&arena, &mut env);
    let mut counter = deploy(&env, c, &source);

    let calldata = AbiValue::calldata("increment()", &[]);
    let outcome = counter.vm.call(counter.address, &calldata, 1u32).unwrap();
    assert!(!outcome.is_success());
    assert_eq!(counter.vm.balance(counter.address), BigUint::from(0u32));
}

// =============================================================================
// Arithmetic
// =============================================================================

fn incrementer<'a>(arena: &'a Bump, env: &mut TypeEnv) -> (ContractId, ContractSource<'a>) {
    let c = env.add_contract("Incrementer", ContractKind::Contract, &[]);
    let next = function(env, c, "next", &[Type::uint256()], &[Type::uint256()]);
    let body = AstBuilder::new(arena, env, Some(c))
        .function_body(next, |b, params, _| {
            let x = b.local(params[0]);
            let one = b.int(1);
            Ok(vec![Stmt::Return(Some(b.binary(x, BinaryOp::Add, one)?))])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };
    (c, source)
}

#[test]
fn test_checked_addition_panics_on_overflow() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = incrementer(&arena, &mut env);
    let mut contract = deploy(&env, c, &source);

    assert_eq!(contract.uint("next(uint256)", &[AbiValue::uint(41u32)]), 42);
    let outcome = contract.call("next(uint256)", &[AbiValue::Uint(u256_max())]);
    assert!(!outcome.is_success());
    assert_eq!(panic_code(outcome.revert_data().unwrap()), Some(0x11));
}

#[test]
fn test_wrapping_addition_wraps_to_zero() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = incrementer(&arena, &mut env);
    let settings = CompilerSettings::default().with_arithmetic(ArithmeticMode::Wrapping);
    let mut contract = deploy_with(&env, settings, c, &source, &[]);

    assert_eq!(contract.uint("next(uint256)", &[AbiValue::Uint(u256_max())]), 0);
}

fn binary_function<'a>(
    arena: &'a Bump,
    env: &mut TypeEnv,
    name: &str,
    operands: [Type; 2],
    op: BinaryOp,
) -> (ContractId, ContractSource<'a>) {
    let c = env.add_contract("Operator", ContractKind::Contract, &[]);
    let result = operands[0].clone();
    let id = function(env, c, name, &operands, &[result]);
    let body = AstBuilder::new(arena, env, Some(c))
        .function_body(id, |b, params, _| {
            let lhs = b.local(params[0]);
            let rhs = b.local(params[1]);
            Ok(vec![Stmt::Return(Some(b.binary(lhs, op, rhs)?))])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };
    (c, source)
}

#[test]
fn test_checked_exponentiation_panics_past_the_word() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = binary_function(&arena, &mut env, "pow", [Type::uint256(), Type::uint256()], BinaryOp::Exp);
    let mut contract = deploy(&env, c, &source);

    let pow = |exponent: u32| [AbiValue::uint(2u32), AbiValue::uint(exponent)];
    assert_eq!(contract.uint("pow(uint256,uint256)", &pow(10)), 1024);
    assert_eq!(
        contract.query("pow(uint256,uint256)", &pow(255), &["uint256"]),
        vec![AbiValue::Uint(BigUint::from(1u32) << 255u32)]
    );
    let outcome = contract.call("pow(uint256,uint256)", &pow(256));
    assert!(!outcome.is_success());
    assert_eq!(panic_code(outcome.revert_data().unwrap()), Some(0x11));
    assert_eq!(contract.uint("pow(uint256,uint256)", &[AbiValue::uint(0u32), AbiValue::uint(0u32)]), 1);
}

#[test]
fn test_signed_right_shift_rounds_toward_negative_infinity() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = binary_function(&arena, &mut env, "sar", [Type::int(8), Type::uint(8)], BinaryOp::Shr);
    let mut contract = deploy(&env, c, &source);

    let cases = [(-128, 3, -16), (-1, 200, -1), (-7, 1, -4), (100, 2, 25)];
    for (value, shift, expected) in cases {
        let args = [AbiValue::int(value), AbiValue::uint(shift as u32)];
        assert_eq!(
            contract.query("sar(int8,uint8)", &args, &["int8"]),
            vec![AbiValue::int(expected)],
            "{value} >> {shift}"
        );
    }
}

#[test]
fn test_signed_left_shift_truncates_to_the_type() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = binary_function(&arena, &mut env, "shl", [Type::int(8), Type::uint(8)], BinaryOp::Shl);
    let mut contract = deploy(&env, c, &source);

    let cases = [(-1, 7, -128), (1, 7, -128), (3, 1, 6), (1, 8, 0)];
    for (value, shift, expected) in cases {
        let args = [AbiValue::int(value), AbiValue::uint(shift as u32)];
        assert_eq!(
            contract.query("shl(int8,uint8)", &args, &["int8"]),
            vec![AbiValue::int(expected)],
            "{value} << {shift}"
        );
    }
}

// =============================================================================
// Reverts
// =============================================================================

fn vault<'a>(arena: &'a Bump, env: &mut TypeEnv) -> (ContractId, ContractSource<'a>) {
    let c = env.add_contract("Vault", ContractKind::Contract, &[]);
    let withdraw = function(env, c, "withdraw", &[Type::uint256()], &[]);
    let body = AstBuilder::new(arena, env, Some(c))
        .function_body(withdraw, |b, params, _| {
            let require = b.builtin("require")?;
            let amount = b.local(params[0]);
            let limit = b.int(10);
            let condition = b.binary(amount, BinaryOp::LessEqual, limit)?;
            let reason = b.string("amount too large");
            Ok(vec![Stmt::Expr(b.call(require, &[condition, reason])?)])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };
    (c, source)
}

#[test]
fn test_require_reverts_with_reason() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = vault(&arena, &mut env);
    let mut vault = deploy(&env, c, &source);

    assert!(vault.call("withdraw(uint256)", &[AbiValue::uint(10u32)]).is_success());
    let outcome = vault.call("withdraw(uint256)", &[AbiValue::uint(11u32)]);
    assert_eq!(
        revert_reason(outcome.revert_data().unwrap()).as_deref(),
        Some("amount too large")
    );
}

#[test]
fn test_stripped_revert_strings_revert_empty() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = vault(&arena, &mut env);
    let settings = CompilerSettings::default().with_revert_strings(RevertStrings::Strip);
    let mut vault = deploy_with(&env, settings, c, &source, &[]);

    let outcome = vault.call("withdraw(uint256)", &[AbiValue::uint(11u32)]);
    assert_eq!(outcome.revert_data(), Some(&[] as &[u8]));
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_constructor_arguments_and_immutables() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let c = env.add_contract("Owned", ContractKind::Contract, &[]);
    let owner = env.add_state_variable(c, "owner", Type::address(), Visibility::Public, true);
    let limit = env.add_state_variable(c, "limit", Type::uint256(), Visibility::Public, false);
    let init = constructor(&mut env, c, &[Type::uint256()]);

    let mut b = AstBuilder::new(&arena, &mut env, Some(c));
    let msg = b.magic(MagicKind::Message);
    let sender = b.member(msg, "sender").unwrap();
    let initializer_locals = b.take_locals();
    let init = b
        .function_body(init, |b, params, _| {
            let target = b.state_variable(limit);
            let value = b.local(params[0]);
            Ok(vec![Stmt::Expr(b.assign(target, AssignOp::Assign, value)?)])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![init],
        initializers: vec![(owner, sender)],
        initializer_locals,
    };

    let mut owned = deploy_with(&env, CompilerSettings::default(), c, &source, &[AbiValue::uint(42u32)]);
    let sender = owned.vm.sender();
    assert_eq!(owned.query("owner()", &[], &["address"]), vec![AbiValue::Address(sender)]);
    assert_eq!(owned.uint("limit()", &[]), 42);
    // Immutables live in the code, not in storage.
    assert_eq!(owned.vm.storage_at(owned.address, 0u32), BigUint::from(42u32));
}

// =============================================================================
// Mappings and events
// =============================================================================

#[test]
fn test_mapping_accessor_and_events() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let c = env.add_contract("Bank", ContractKind::Contract, &[]);
    let balances = env.add_state_variable(
        c,
        "balances",
        Type::mapping(Type::address(), Type::uint256()),
        Visibility::Public,
        false,
    );
    let deposited = env.add_event(
        c,
        "Deposited",
        vec![
            EventParam {
                name: "from".into(),
                ty: Type::address(),
                indexed: true,
            },
            EventParam {
                name: "amount".into(),
                ty: Type::uint256(),
                indexed: false,
            },
        ],
        false,
    );
    let deposit = function(&mut env, c, "deposit", &[Type::uint256()], &[]);
    let body = AstBuilder::new(&arena, &mut env, Some(c))
        .function_body(deposit, |b, params, _| {
            let mapping = b.state_variable(balances);
            let msg = b.magic(MagicKind::Message);
            let sender = b.member(msg, "sender")?;
            let entry = b.index(mapping, sender)?;
            let amount = b.local(params[0]);
            let update = b.assign(entry, AssignOp::Compound(BinaryOp::Add), amount)?;

            let event = b.event(deposited);
            let msg = b.magic(MagicKind::Message);
            let sender = b.member(msg, "sender")?;
            let amount = b.local(params[0]);
            let emit = b.call(event, &[sender, amount])?;
            Ok(vec![Stmt::Expr(update), Stmt::Expr(emit)])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };

    let mut bank = deploy(&env, c, &source);
    let sender = bank.vm.sender();
    assert!(bank.call("deposit(uint256)", &[AbiValue::uint(3u32)]).is_success());
    assert!(bank.call("deposit(uint256)", &[AbiValue::uint(4u32)]).is_success());
    assert_eq!(bank.uint("balances(address)", &[AbiValue::Address(sender)]), 7);
    assert_eq!(bank.uint("balances(address)", &[AbiValue::Address(bank.address)]), 0);

    let logs = bank.vm.logs();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].address, bank.address);
    assert_eq!(
        logs[0].topics,
        vec![keccak_word(b"Deposited(address,uint256)"), sender.to_word()]
    );
    assert_eq!(logs[1].data, AbiValue::encode(&[AbiValue::uint(4u32)]));
}

#[test]
fn test_indexed_reference_arguments_are_hashed() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let c = env.add_contract("Journal", ContractKind::Contract, &[]);
    let pair = env.add_struct(
        "Pair",
        Some(c),
        vec![("a".into(), Type::uint256()), ("b".into(), Type::uint256())],
    );
    let values = env.add_state_variable(
        c,
        "values",
        Type::array(Type::uint256(), None, DataLocation::Storage),
        Visibility::Internal,
        false,
    );
    let stored_pair = env.add_state_variable(
        c,
        "pair",
        Type::struct_type(pair, DataLocation::Storage),
        Visibility::Internal,
        false,
    );
    let logged = env.add_event(
        c,
        "Logged",
        vec![
            EventParam {
                name: "values".into(),
                ty: Type::array(Type::uint256(), None, DataLocation::Memory),
                indexed: true,
            },
            EventParam {
                name: "pair".into(),
                ty: Type::struct_type(pair, DataLocation::Memory),
                indexed: true,
            },
        ],
        false,
    );
    let fill = function(&mut env, c, "fill", &[], &[]);
    let body = AstBuilder::new(&arena, &mut env, Some(c))
        .function_body(fill, |b, _, _| {
            let mut statements = Vec::new();
            for value in 1..=3 {
                let array = b.state_variable(values);
                let push = b.member(array, "push")?;
                let value = b.int(value);
                statements.push(Stmt::Expr(b.call(push, &[value])?));
            }
            for (member, value) in [("a", 4), ("b", 5)] {
                let base = b.state_variable(stored_pair);
                let target = b.member(base, member)?;
                let value = b.int(value);
                statements.push(Stmt::Expr(b.assign(target, AssignOp::Assign, value)?));
            }
            let event = b.event(logged);
            let array = b.state_variable(values);
            let base = b.state_variable(stored_pair);
            statements.push(Stmt::Expr(b.call(event, &[array, base])?));
            Ok(statements)
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };

    let mut journal = deploy(&env, c, &source);
    let outcome = journal.call("fill()", &[]);
    assert!(outcome.is_success(), "{outcome:?}");

    let words = |values: &[u32]| AbiValue::encode(&values.iter().map(|v| AbiValue::uint(*v)).collect::<Vec<_>>());
    let logs = journal.vm.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(
        logs[0].topics,
        vec![
            keccak_word(b"Logged(uint256[],(uint256,uint256))"),
            keccak_word(&words(&[1, 2, 3])),
            keccak_word(&words(&[4, 5])),
        ]
    );
    assert!(logs[0].data.is_empty());
}

// =============================================================================
// Storage arrays and tuples
// =============================================================================

#[test]
fn test_push_without_argument_appends_an_assignable_slot() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let c = env.add_contract("Queue", ContractKind::Contract, &[]);
    let entry = env.add_struct(
        "Entry",
        Some(c),
        vec![("id".into(), Type::uint256()), ("done".into(), Type::Bool)],
    );
    let items = env.add_state_variable(
        c,
        "items",
        Type::array(Type::uint256(), None, DataLocation::Storage),
        Visibility::Public,
        false,
    );
    let entries = env.add_state_variable(
        c,
        "entries",
        Type::array(Type::struct_type(entry, DataLocation::Storage), None, DataLocation::Storage),
        Visibility::Public,
        false,
    );
    let add = function(&mut env, c, "add", &[Type::uint256()], &[]);
    let body = AstBuilder::new(&arena, &mut env, Some(c))
        .function_body(add, |b, params, _| {
            let array = b.state_variable(items);
            let push = b.member(array, "push")?;
            let slot = b.call(push, &[])?;
            let value = b.local(params[0]);
            let store_item = b.assign(slot, AssignOp::Assign, value)?;

            let array = b.state_variable(entries);
            let push = b.member(array, "push")?;
            let record = b.call(push, &[])?;
            let id = b.member(record, "id")?;
            let value = b.local(params[0]);
            let store_entry = b.assign(id, AssignOp::Assign, value)?;
            Ok(vec![Stmt::Expr(store_item), Stmt::Expr(store_entry)])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };

    let mut queue = deploy(&env, c, &source);
    for value in [11u32, 12] {
        assert!(queue.call("add(uint256)", &[AbiValue::uint(value)]).is_success());
    }
    assert_eq!(queue.vm.storage_at(queue.address, 0u32), BigUint::from(2u32));
    assert_eq!(queue.vm.storage_at(queue.address, 1u32), BigUint::from(2u32));
    assert_eq!(queue.uint("items(uint256)", &[AbiValue::uint(1u32)]), 12);
    assert_eq!(
        queue.query("entries(uint256)", &[AbiValue::uint(0u32)], &["uint256", "bool"]),
        vec![AbiValue::uint(11u32), AbiValue::Bool(false)]
    );
}

#[test]
fn test_tuple_assignment_fills_missing_components() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let c = env.add_contract("Picker", ContractKind::Contract, &[]);
    let pick = function(&mut env, c, "pick", &[], &[Type::uint256(), Type::uint256()]);
    let body = AstBuilder::new(&arena, &mut env, Some(c))
        .function_body(pick, |b, _, returns| {
            // (, second) = (1, 2, 3)
            let second = b.local(returns[1]);
            let targets = b.tuple(&[None, Some(second)]);
            let values: Vec<_> = (1..=3).map(|v| Some(b.int(v))).collect();
            let values = b.tuple(&values);
            let fill_right = b.assign(targets, AssignOp::Assign, values)?;
            // (first, ) = (7, 8, 9)
            let first = b.local(returns[0]);
            let targets = b.tuple(&[Some(first), None]);
            let values: Vec<_> = (7..=9).map(|v| Some(b.int(v))).collect();
            let values = b.tuple(&values);
            let fill_left = b.assign(targets, AssignOp::Assign, values)?;
            let first = b.local(returns[0]);
            let second = b.local(returns[1]);
            let result = b.tuple(&[Some(first), Some(second)]);
            Ok(vec![Stmt::Expr(fill_right), Stmt::Expr(fill_left), Stmt::Return(Some(result))])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };

    let mut picker = deploy(&env, c, &source);
    assert_eq!(
        picker.query("pick()", &[], &["uint256", "uint256"]),
        vec![AbiValue::uint(7u32), AbiValue::uint(3u32)]
    );
}

// =============================================================================
// ABI round trip
// =============================================================================

#[test]
fn test_echo_round_trips_mixed_values() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let c = env.add_contract("Echo", ContractKind::Contract, &[]);
    let types = [Type::Bool, Type::uint256(), Type::string(DataLocation::Memory)];
    let echo = function(&mut env, c, "echo", &types, &types);
    let body = AstBuilder::new(&arena, &mut env, Some(c))
        .function_body(echo, |b, params, _| {
            let values: Vec<_> = params.iter().map(|p| Some(b.local(*p))).collect();
            Ok(vec![Stmt::Return(Some(b.tuple(&values)))])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };

    let mut echo = deploy(&env, c, &source);
    let args = [AbiValue::Bool(true), AbiValue::uint(0x1234u32), AbiValue::string("hi")];
    let outcome = echo.call("echo(bool,uint256,string)", &args);
    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(outcome.output(), AbiValue::encode(&args).as_slice());
    assert_eq!(
        AbiValue::decode_str(&["bool", "uint256", "string"], outcome.output()).unwrap(),
        args.to_vec()
    );
}

fn identity<'a>(arena: &'a Bump, env: &mut TypeEnv, name: &str, ty: Type) -> (ContractId, ContractSource<'a>) {
    let c = env.add_contract("Identity", ContractKind::Contract, &[]);
    let id = function(env, c, name, &[ty.clone()], &[ty]);
    let body = AstBuilder::new(arena, env, Some(c))
        .function_body(id, |b, params, _| Ok(vec![Stmt::Return(Some(b.local(params[0])))]))
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };
    (c, source)
}

#[test]
fn test_dirty_value_arguments_revert() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = identity(&arena, &mut env, "narrow", Type::uint(8));
    let mut narrow = deploy(&env, c, &source);
    assert_eq!(narrow.uint("narrow(uint8)", &[AbiValue::uint(0xffu32)]), 0xff);
    // uint256 encodes the same word a uint8 argument with dirty high bits would
    let outcome = narrow.call("narrow(uint8)", &[AbiValue::uint(0x100u32)]);
    assert_eq!(outcome.revert_data(), Some(&[] as &[u8]));

    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (c, source) = identity(&arena, &mut env, "flag", Type::Bool);
    let mut flag = deploy(&env, c, &source);
    assert_eq!(flag.query("flag(bool)", &[AbiValue::Bool(true)], &["bool"]), vec![AbiValue::Bool(true)]);
    let outcome = flag.call("flag(bool)", &[AbiValue::uint(2u32)]);
    assert_eq!(outcome.revert_data(), Some(&[] as &[u8]));
}

#[test]
fn test_out_of_bounds_offsets_revert() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let c = env.add_contract("Sizer", ContractKind::Contract, &[]);
    let size = function(&mut env, c, "size", &[Type::bytes(DataLocation::Memory)], &[Type::uint256()]);
    let body = AstBuilder::new(&arena, &mut env, Some(c))
        .function_body(size, |b, params, _| {
            let data = b.local(params[0]);
            Ok(vec![Stmt::Return(Some(b.member(data, "length")?))])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![body],
        ..ContractSource::default()
    };
    let mut sizer = deploy(&env, c, &source);

    let mut calldata = AbiValue::calldata("size(bytes)", &[AbiValue::Bytes(vec![1, 2, 3])]);
    let outcome = sizer.vm.call(sizer.address, &calldata, 0u32).unwrap();
    assert_eq!(AbiValue::decode_str(&["uint256"], outcome.output()).unwrap(), vec![AbiValue::uint(3u32)]);

    // Point the offset past the end of the calldata.
    calldata[4..36].fill(0);
    calldata[34..36].copy_from_slice(&[0x10, 0x00]);
    let outcome = sizer.vm.call(sizer.address, &calldata, 0u32).unwrap();
    assert!(!outcome.is_success());
    assert_eq!(outcome.revert_data(), Some(&[] as &[u8]));

    // A length running past the end is caught as well.
    let mut calldata = AbiValue::calldata("size(bytes)", &[AbiValue::Bytes(vec![1, 2, 3])]);
    calldata[66..68].copy_from_slice(&[0x10, 0x00]);
    let outcome = sizer.vm.call(sizer.address, &calldata, 0u32).unwrap();
    assert!(!outcome.is_success());
}
