//! Behaviour the generated code has to agree on with other toolchains:
//! storage packing, literal typing, call options, storage clearing and the
//! byte array encodings.

use bumpalo::Bump;
use num_bigint::BigUint;
use pretty_assertions::assert_eq;
use quill::quill_codegen::{CompilerContext, ExprCompiler};
use quill::quill_core::ast::{AssignOp, AstBuilder, BinaryOp, ContractSource, Stmt, UnaryOp};
use quill::quill_core::hash::keccak_word;
use quill::quill_core::{ContractKind, DataLocation, MagicKind, Visibility};
use quill::{AbiValue, CompilerSettings, Type, TypeEnv};

use super::harness::{deploy, deploy_all, function, payable};

#[test]
fn test_struct_members_pack_into_slots() {
    let mut env = TypeEnv::new();
    let s = env.add_struct(
        "Packed",
        None,
        vec![
            ("a".into(), Type::uint(8)),
            ("b".into(), Type::Bool),
            ("c".into(), Type::uint(8)),
            ("d".into(), Type::uint256()),
        ],
    );
    let layout = env.struct_layout(s).unwrap();
    let offsets: Vec<(u32, u8)> = layout
        .iter()
        .map(|(slot, offset)| (u32::try_from(slot).unwrap(), offset))
        .collect();
    assert_eq!(offsets, vec![(0, 0), (0, 1), (0, 2), (1, 0)]);
    assert_eq!(layout.storage_size(), &BigUint::from(2u32));
}

#[test]
fn test_literals_take_their_narrowest_type() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let mut b = AstBuilder::new(&arena, &mut env, None);
    let literals = [(-129, Type::int(16)), (-128, Type::int(8)), (255, Type::uint(8)), (256, Type::uint(16))];
    for (value, expected) in literals {
        let literal = b.int(value);
        let ty = b.env().ty(literal.ty).clone();
        assert_eq!(ty.mobile_type(b.env()), Some(expected), "literal {value}");
    }
}

#[test]
fn test_call_option_order_is_irrelevant() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let target = env.add_contract("Target", ContractKind::Contract, &[]);
    let received = env.add_state_variable(target, "received", Type::uint256(), Visibility::Internal, false);
    let forwarded = env.add_state_variable(target, "forwarded", Type::uint256(), Visibility::Internal, false);
    let ping = payable(&mut env, target, "ping", &[], &[]);
    let caller = env.add_contract("Caller", ContractKind::Contract, &[]);
    let value_first = payable(&mut env, caller, "valueFirst", &[Type::contract(target)], &[]);
    let gas_first = payable(&mut env, caller, "gasFirst", &[Type::contract(target)], &[]);

    let target_source = {
        let mut b = AstBuilder::new(&arena, &mut env, Some(target));
        let ping = b
            .function_body(ping, |b, _, _| {
                let msg = b.magic(MagicKind::Message);
                let value = b.member(msg, "value")?;
                let slot = b.state_variable(received);
                let store_value = b.assign(slot, AssignOp::Assign, value)?;
                let gasleft = b.builtin("gasleft")?;
                let gas = b.call(gasleft, &[])?;
                let slot = b.state_variable(forwarded);
                let store_gas = b.assign(slot, AssignOp::Assign, gas)?;
                Ok(vec![Stmt::Expr(store_value), Stmt::Expr(store_gas)])
            })
            .unwrap();
        ContractSource {
            functions: vec![ping],
            ..ContractSource::default()
        }
    };
    let caller_source = {
        let mut b = AstBuilder::new(&arena, &mut env, Some(caller));
        let mut body = |function, first: &'static str, second: &'static str| {
            b.function_body(function, |b, params, _| {
                let amount = |name: &str| if name == "value" { 5 } else { 1000 };
                let receiver = b.local(params[0]);
                let callee = b.member(receiver, "ping")?;
                let setter = b.member(callee, first)?;
                let argument = b.int(amount(first));
                let callee = b.call(setter, &[argument])?;
                let setter = b.member(callee, second)?;
                let argument = b.int(amount(second));
                let callee = b.call(setter, &[argument])?;
                Ok(vec![Stmt::Expr(b.call(callee, &[])?)])
            })
            .unwrap()
        };
        let functions = vec![body(value_first, "value", "gas"), body(gas_first, "gas", "value")];
        ContractSource {
            functions,
            ..ContractSource::default()
        }
    };

    let (mut vm, addresses) = deploy_all(&env, &[(target, &target_source, vec![]), (caller, &caller_source, vec![])]);
    let (target_address, caller_address) = (addresses[0], addresses[1]);
    for (round, signature) in ["valueFirst(address)", "gasFirst(address)"].into_iter().enumerate() {
        let calldata = AbiValue::calldata(signature, &[AbiValue::Address(target_address)]);
        let outcome = vm.call(caller_address, &calldata, 5u32).unwrap();
        assert!(outcome.is_success(), "{signature}: {outcome:?}");
        assert_eq!(vm.storage_at(target_address, 0u32), BigUint::from(5u32), "{signature}");
        assert_eq!(vm.balance(target_address), BigUint::from(5 * (round as u32 + 1)), "{signature}");
        // The callee sees at most the requested gas plus the value stipend.
        let gas = vm.storage_at(target_address, 1u32);
        assert!(gas > BigUint::from(0u32) && gas <= BigUint::from(3300u32), "{signature} forwarded {gas}");
    }
}

#[test]
fn test_checked_helpers_are_synthesized_once() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (x, sums) = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let x = b.declare_local("x", Type::uint256());
        let sums: Vec<_> = (0..3)
            .map(|i| {
                let lhs = b.local(x);
                let rhs = b.int(i);
                b.binary(lhs, BinaryOp::Add, rhs).unwrap()
            })
            .collect();
        (x, sums)
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ctx.push(0u32);
    ctx.add_local(x, 0);
    for sum in sums {
        ExprCompiler::new(&mut ctx).compile(sum).unwrap();
    }
    let adders = ctx
        .helpers()
        .iter()
        .filter(|helper| helper.name == "checked_add_t_uint256")
        .count();
    assert_eq!(adders, 1);
}

#[test]
fn test_deleting_a_struct_keeps_nested_mappings() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let c = env.add_contract("Registry", ContractKind::Contract, &[]);
    let record = env.add_struct(
        "Record",
        Some(c),
        vec![
            ("total".into(), Type::uint256()),
            ("entries".into(), Type::mapping(Type::uint256(), Type::uint256())),
        ],
    );
    let state = env.add_state_variable(
        c,
        "record",
        Type::struct_type(record, DataLocation::Storage),
        Visibility::Internal,
        false,
    );
    let set = function(&mut env, c, "set", &[Type::uint256(), Type::uint256()], &[]);
    let clear = function(&mut env, c, "clear", &[], &[]);
    let total = function(&mut env, c, "total", &[], &[Type::uint256()]);
    let entry = function(&mut env, c, "entry", &[Type::uint256()], &[Type::uint256()]);

    let mut b = AstBuilder::new(&arena, &mut env, Some(c));
    let set = b
        .function_body(set, |b, params, _| {
            let base = b.state_variable(state);
            let target = b.member(base, "total")?;
            let value = b.local(params[1]);
            let store_total = b.assign(target, AssignOp::Assign, value)?;
            let base = b.state_variable(state);
            let entries = b.member(base, "entries")?;
            let key = b.local(params[0]);
            let target = b.index(entries, key)?;
            let value = b.local(params[1]);
            let store_entry = b.assign(target, AssignOp::Assign, value)?;
            Ok(vec![Stmt::Expr(store_total), Stmt::Expr(store_entry)])
        })
        .unwrap();
    let clear = b
        .function_body(clear, |b, _, _| {
            let target = b.state_variable(state);
            Ok(vec![Stmt::Expr(b.unary(UnaryOp::Delete, target, true)?)])
        })
        .unwrap();
    let total = b
        .function_body(total, |b, _, _| {
            let base = b.state_variable(state);
            Ok(vec![Stmt::Return(Some(b.member(base, "total")?))])
        })
        .unwrap();
    let entry = b
        .function_body(entry, |b, params, _| {
            let base = b.state_variable(state);
            let entries = b.member(base, "entries")?;
            let key = b.local(params[0]);
            Ok(vec![Stmt::Return(Some(b.index(entries, key)?))])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![set, clear, total, entry],
        ..ContractSource::default()
    };

    let mut registry = deploy(&env, c, &source);
    assert!(registry.call("set(uint256,uint256)", &[AbiValue::uint(1u32), AbiValue::uint(9u32)]).is_success());
    assert_eq!(registry.uint("total()", &[]), 9);

    assert!(registry.call("clear()", &[]).is_success());
    assert_eq!(registry.uint("total()", &[]), 0);
    assert_eq!(registry.uint("entry(uint256)", &[AbiValue::uint(1u32)]), 9);

    // Clearing cleared storage changes nothing.
    assert!(registry.call("clear()", &[]).is_success());
    assert_eq!(registry.uint("total()", &[]), 0);
    assert_eq!(registry.uint("entry(uint256)", &[AbiValue::uint(1u32)]), 9);
}

#[test]
fn test_byte_array_pop_switches_to_short_encoding() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let c = env.add_contract("Buffer", ContractKind::Contract, &[]);
    let data = env.add_state_variable(c, "data", Type::bytes(DataLocation::Storage), Visibility::Public, false);
    let append = function(&mut env, c, "append", &[Type::fixed_bytes(1)], &[]);
    let shrink = function(&mut env, c, "shrink", &[], &[]);

    let mut b = AstBuilder::new(&arena, &mut env, Some(c));
    let append = b
        .function_body(append, |b, params, _| {
            let array = b.state_variable(data);
            let push = b.member(array, "push")?;
            let byte = b.local(params[0]);
            Ok(vec![Stmt::Expr(b.call(push, &[byte])?)])
        })
        .unwrap();
    let shrink = b
        .function_body(shrink, |b, _, _| {
            let array = b.state_variable(data);
            let pop = b.member(array, "pop")?;
            Ok(vec![Stmt::Expr(b.call(pop, &[])?)])
        })
        .unwrap();
    let source = ContractSource {
        functions: vec![append, shrink],
        ..ContractSource::default()
    };

    let mut buffer = deploy(&env, c, &source);
    for _ in 0..32 {
        let outcome = buffer.call("append(bytes1)", &[AbiValue::FixedBytes(vec![0x61])]);
        assert!(outcome.is_success(), "{outcome:?}");
    }
    let data_slot = keccak_word(&[0u8; 32]);
    // Long form: 2 * length + 1 in the slot, contents at keccak(slot).
    assert_eq!(buffer.vm.storage_at(buffer.address, 0u32), BigUint::from(65u32));
    assert_eq!(
        buffer.vm.storage_at(buffer.address, data_slot.clone()),
        BigUint::from_bytes_be(&[0x61; 32])
    );

    assert!(buffer.call("shrink()", &[]).is_success());
    // Short form: contents left-aligned, 2 * length in the lowest byte.
    let mut short = [0x61u8; 32];
    short[31] = 62;
    assert_eq!(buffer.vm.storage_at(buffer.address, 0u32), BigUint::from_bytes_be(&short));
    assert_eq!(buffer.vm.storage_at(buffer.address, data_slot), BigUint::from(0u32));
    assert_eq!(
        buffer.query("data()", &[], &["bytes"]),
        vec![AbiValue::Bytes(vec![0x61; 31])]
    );
}
