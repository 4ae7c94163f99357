use bumpalo::Bump;
use quill_core::ast::{AssignOp, AstBuilder, BinaryOp, UnaryOp};
use quill_core::{CompilationError, ContractId, ContractKind, DataLocation, EventParam, MagicKind, TypeEnv, Visibility};

use super::*;
use crate::asm::Instruction;
use crate::settings::CompilerSettings;

fn token(env: &mut TypeEnv) -> ContractId {
    env.add_contract("Token", ContractKind::Contract, &[])
}

fn has_helper(ctx: &CompilerContext<'_>, prefix: &str) -> bool {
    ctx.helpers().iter().any(|h| h.name.starts_with(prefix))
}

#[test]
fn checked_addition_goes_through_a_helper() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (x, sum) = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let x = b.declare_local("x", Type::uint256());
        let lhs = b.local(x);
        let one = b.int(1);
        (x, b.binary(lhs, BinaryOp::Add, one).unwrap())
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ctx.push(0u32);
    ctx.add_local(x, 0);
    ExprCompiler::new(&mut ctx).compile(sum).unwrap();
    assert_eq!(ctx.stack_height(), 2);
    assert!(ctx.helpers().contains("checked_add_t_uint256"));
}

#[test]
fn logical_and_short_circuits() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let both = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let t = b.boolean(true);
        let f = b.boolean(false);
        b.binary(t, BinaryOp::And, f).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ExprCompiler::new(&mut ctx).compile(both).unwrap();
    assert_eq!(ctx.stack_height(), 1);
    assert_eq!(ctx.assembly().count_op(Instruction::JumpI), 1);
}

#[test]
fn comparison_flips_operands() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (x, y, less) = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let x = b.declare_local("x", Type::int(64));
        let y = b.declare_local("y", Type::int(64));
        let lhs = b.local(x);
        let rhs = b.local(y);
        (x, y, b.binary(lhs, BinaryOp::Less, rhs).unwrap())
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ctx.push(0u32);
    ctx.push(0u32);
    ctx.add_local(x, 0);
    ctx.add_local(y, 1);
    ExprCompiler::new(&mut ctx).compile(less).unwrap();
    assert_eq!(ctx.stack_height(), 3);
    assert_eq!(ctx.assembly().count_op(Instruction::Sgt), 1);
}

#[test]
fn compound_assignment_to_state_variable() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let contract = token(&mut env);
    let supply = env.add_state_variable(contract, "supply", Type::uint(8), Visibility::Internal, false);
    let update = {
        let mut b = AstBuilder::new(&arena, &mut env, Some(contract));
        let target = b.state_variable(supply);
        let one = b.int(1);
        b.assign(target, AssignOp::Compound(BinaryOp::Add), one).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), Some(contract));
    ExprCompiler::new(&mut ctx).compile(update).unwrap();
    assert_eq!(ctx.stack_height(), 1);
    assert!(ctx.helpers().contains("checked_add_t_uint8"));
    assert!(ctx.helpers().contains("update_storage_value_t_uint8"));
}

#[test]
fn postfix_increment_yields_the_old_value() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (i, step) = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let i = b.declare_local("i", Type::uint256());
        let operand = b.local(i);
        (i, b.unary(UnaryOp::Inc, operand, false).unwrap())
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ctx.push(0u32);
    ctx.add_local(i, 0);
    let mut compiler = ExprCompiler::new(&mut ctx);
    compiler.compile_effect(step).unwrap();
    assert_eq!(ctx.stack_height(), 1);
}

#[test]
fn mapping_lookup_by_sender() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let contract = token(&mut env);
    let balances = env.add_state_variable(
        contract,
        "balances",
        Type::mapping(Type::address(), Type::uint256()),
        Visibility::Public,
        false,
    );
    let lookup = {
        let mut b = AstBuilder::new(&arena, &mut env, Some(contract));
        let map = b.state_variable(balances);
        let msg = b.magic(MagicKind::Message);
        let sender = b.member(msg, "sender").unwrap();
        b.index(map, sender).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), Some(contract));
    ExprCompiler::new(&mut ctx).compile(lookup).unwrap();
    assert_eq!(ctx.stack_height(), 1);
    assert_eq!(ctx.assembly().count_op(Instruction::Caller), 1);
    assert!(has_helper(&ctx, "mapping_index_access_"));
    assert!(ctx.helpers().contains("read_from_storage_t_uint256"));
}

#[test]
fn keccak_of_literal_is_folded() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let hash = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let keccak = b.builtin("keccak256").unwrap();
        let text = b.string("abc");
        b.call(keccak, &[text]).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ExprCompiler::new(&mut ctx).compile(hash).unwrap();
    assert_eq!(ctx.stack_height(), 1);
    assert_eq!(ctx.assembly().count_op(Instruction::Keccak256), 0);
}

#[test]
fn require_with_literal_reason_uses_shared_revert() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let check = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let require = b.builtin("require").unwrap();
        let condition = b.boolean(false);
        let reason = b.string("insufficient balance");
        b.call(require, &[condition, reason]).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ExprCompiler::new(&mut ctx).compile(check).unwrap();
    assert_eq!(ctx.stack_height(), 0);
    assert!(has_helper(&ctx, "revert_error_"));
    assert_eq!(ctx.assembly().count_op(Instruction::JumpI), 1);
}

#[test]
fn emit_puts_indexed_arguments_into_topics() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let contract = token(&mut env);
    let event = env.add_event(
        contract,
        "Transfer",
        vec![
            EventParam {
                name: "from".into(),
                ty: Type::address(),
                indexed: true,
            },
            EventParam {
                name: "value".into(),
                ty: Type::uint256(),
                indexed: false,
            },
        ],
        false,
    );
    let emit = {
        let mut b = AstBuilder::new(&arena, &mut env, Some(contract));
        let callee = b.event(event);
        let msg = b.magic(MagicKind::Message);
        let sender = b.member(msg, "sender").unwrap();
        let amount = b.int(10);
        b.call(callee, &[sender, amount]).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), Some(contract));
    ExprCompiler::new(&mut ctx).compile(emit).unwrap();
    assert_eq!(ctx.stack_height(), 0);
    assert_eq!(ctx.assembly().count_op(Instruction::Log2), 1);
    assert!(ctx.helpers().contains("abi_encode_tuple_t_uint256_t_uint256"));
}

#[test]
fn conditional_joins_at_one_word() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let choice = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let condition = b.boolean(true);
        let yes = b.int(1);
        let no = b.int(2);
        b.conditional(condition, yes, no).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ExprCompiler::new(&mut ctx).compile(choice).unwrap();
    assert_eq!(ctx.stack_height(), 1);
    assert_eq!(ctx.assembly().count_op(Instruction::Jump), 1);
}

#[test]
fn storage_array_push_returns_the_new_length() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let contract = token(&mut env);
    let holders = env.add_state_variable(
        contract,
        "holders",
        Type::array(Type::address(), None, DataLocation::Storage),
        Visibility::Internal,
        false,
    );
    let push = {
        let mut b = AstBuilder::new(&arena, &mut env, Some(contract));
        let array = b.state_variable(holders);
        let callee = b.member(array, "push").unwrap();
        let msg = b.magic(MagicKind::Message);
        let sender = b.member(msg, "sender").unwrap();
        b.call(callee, &[sender]).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), Some(contract));
    ExprCompiler::new(&mut ctx).compile(push).unwrap();
    assert_eq!(ctx.stack_height(), 1);
    assert!(has_helper(&ctx, "array_push_"));
}

#[test]
fn tuple_assignment_skips_wildcards() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (a, swap) = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let a = b.declare_local("a", Type::uint256());
        let target_a = b.local(a);
        let targets = b.tuple(&[None, Some(target_a)]);
        let one = b.int(1);
        let two = b.int(2);
        let values = b.tuple(&[Some(one), Some(two)]);
        (a, b.assign(targets, AssignOp::Assign, values).unwrap())
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ctx.push(0u32);
    ctx.add_local(a, 0);
    let mut compiler = ExprCompiler::new(&mut ctx);
    compiler.compile_effect(swap).unwrap();
    assert_eq!(ctx.stack_height(), 1);
}

#[test]
fn delete_clears_storage() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let contract = token(&mut env);
    let owner = env.add_state_variable(contract, "owner", Type::address(), Visibility::Internal, false);
    let clear = {
        let mut b = AstBuilder::new(&arena, &mut env, Some(contract));
        let target = b.state_variable(owner);
        b.unary(UnaryOp::Delete, target, true).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), Some(contract));
    ExprCompiler::new(&mut ctx).compile(clear).unwrap();
    assert_eq!(ctx.stack_height(), 0);
    assert!(has_helper(&ctx, "storage_set_to_zero_"));
}

#[test]
fn fractional_literal_is_unimplemented() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let half = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        b.number("0.5").unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    let err = ExprCompiler::new(&mut ctx).compile(half).unwrap_err();
    assert!(matches!(err, CompilationError::Unimplemented { .. }));
}

#[test]
fn abi_encode_allocates_bytes() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let encoded = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let abi = b.magic(MagicKind::Abi);
        let encode = b.member(abi, "encode").unwrap();
        let value = b.int(7);
        b.call(encode, &[value]).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ExprCompiler::new(&mut ctx).compile(encoded).unwrap();
    assert_eq!(ctx.stack_height(), 1);
    assert!(ctx.helpers().contains("finalize_allocation"));
    assert!(has_helper(&ctx, "abi_encode_tuple_t_uint8"));
}

#[test]
fn tuple_assignment_fills_from_the_right() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (y, assignment) = {
        let mut b = AstBuilder::new(&arena, &mut env, None);
        let y = b.declare_local("y", Type::uint256());
        let target = b.local(y);
        let targets = b.tuple(&[None, Some(target)]);
        let values: Vec<_> = (1..=3).map(|i| Some(b.int(i))).collect();
        let values = b.tuple(&values);
        (y, b.assign(targets, AssignOp::Assign, values).unwrap())
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
    ctx.push(0u32);
    ctx.add_local(y, 0);
    ExprCompiler::new(&mut ctx).compile_effect(assignment).unwrap();
    assert_eq!(ctx.stack_height(), 1);
}

#[test]
fn indexed_array_arguments_are_hashed_in_place() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let contract = token(&mut env);
    let list = Type::array(Type::uint256(), None, DataLocation::Memory);
    let event = env.add_event(
        contract,
        "Listed",
        vec![EventParam {
            name: "values".into(),
            ty: list.clone(),
            indexed: true,
        }],
        false,
    );
    let (values, emit) = {
        let mut b = AstBuilder::new(&arena, &mut env, Some(contract));
        let values = b.declare_local("values", list);
        let callee = b.event(event);
        let argument = b.local(values);
        (values, b.call(callee, &[argument]).unwrap())
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), Some(contract));
    ctx.push(0x80u32);
    ctx.add_local(values, 0);
    ExprCompiler::new(&mut ctx).compile(emit).unwrap();
    assert_eq!(ctx.stack_height(), 1);
    assert_eq!(ctx.assembly().count_op(Instruction::Log2), 1);
    assert!(has_helper(&ctx, "abi_encode_in_place_"));
    assert!(ctx.assembly().count_op(Instruction::Keccak256) >= 1);
}

#[test]
fn push_without_argument_is_assignable() {
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let contract = token(&mut env);
    let holders = env.add_state_variable(
        contract,
        "holders",
        Type::array(Type::address(), None, DataLocation::Storage),
        Visibility::Internal,
        false,
    );
    let assignment = {
        let mut b = AstBuilder::new(&arena, &mut env, Some(contract));
        let array = b.state_variable(holders);
        let callee = b.member(array, "push").unwrap();
        let slot = b.call(callee, &[]).unwrap();
        let msg = b.magic(MagicKind::Message);
        let sender = b.member(msg, "sender").unwrap();
        b.assign(slot, AssignOp::Assign, sender).unwrap()
    };
    let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), Some(contract));
    ExprCompiler::new(&mut ctx).compile_effect(assignment).unwrap();
    assert_eq!(ctx.stack_height(), 0);
    assert!(has_helper(&ctx, "array_push_"));
    assert!(has_helper(&ctx, "storage_array_index_access_"));
}
