//! Performance benchmarks for contract compilation and execution.
//!
//! - Compilation: contracts with growing numbers of functions
//! - Assembly: turning symbolic assembly into byte code
//! - Execution: running generated code on the reference machine
//!
//! Build with the `profiling` feature to get per-phase scopes from the
//! instrumented entry points.

use bumpalo::Bump;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use quill::quill_core::ast::{AssignOp, AstBuilder, BinaryOp, ContractSource, Stmt};
use quill::quill_core::{
    ContractId, ContractKind, FunctionDef, MagicKind, Param, StateMutability, Visibility,
};
use quill::quill_vm::assemble;
use quill::{AbiValue, CompilerSettings, ContractCompiler, Type, TypeEnv, Unit, Vm};
use std::hint::black_box;

/// A ledger with `functions` credit functions over one balance mapping.
fn ledger<'a>(arena: &'a Bump, env: &mut TypeEnv, functions: usize) -> (ContractId, ContractSource<'a>) {
    let c = env.add_contract("Ledger", ContractKind::Contract, &[]);
    let balances = env.add_state_variable(
        c,
        "balances",
        Type::mapping(Type::address(), Type::uint256()),
        Visibility::Public,
        false,
    );
    let ids: Vec<_> = (0..functions)
        .map(|i| {
            env.add_function(FunctionDef {
                name: format!("credit{i}"),
                contract: Some(c),
                params: vec![Param::new("amount", Type::uint256())],
                returns: vec![Param::new("", Type::uint256())],
                visibility: Visibility::Public,
                mutability: StateMutability::NonPayable,
                is_constructor: false,
            })
        })
        .collect();

    let mut b = AstBuilder::new(arena, env, Some(c));
    let bodies = ids
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            b.function_body(id, |b, params, _| {
                let mapping = b.state_variable(balances);
                let msg = b.magic(MagicKind::Message);
                let sender = b.member(msg, "sender")?;
                let entry = b.index(mapping, sender)?;
                let amount = b.local(params[0]);
                let bonus = b.int(i as i128);
                let credit = b.binary(amount, BinaryOp::Mul, bonus)?;
                let updated = b.assign(entry, AssignOp::Compound(BinaryOp::Add), credit)?;
                Ok(vec![Stmt::Return(Some(updated))])
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .expect("ledger builds");
    let source = ContractSource {
        functions: bodies,
        ..ContractSource::default()
    };
    (c, source)
}

fn compilation_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("compilation");
    for functions in [1usize, 8, 32] {
        let arena = Bump::new();
        let mut env = TypeEnv::new();
        let (contract, source) = ledger(&arena, &mut env, functions);
        group.throughput(Throughput::Elements(functions as u64));
        group.bench_with_input(BenchmarkId::new("ledger", functions), &functions, |b, _| {
            b.iter(|| {
                let compiled = ContractCompiler::new(&env, CompilerSettings::default(), contract)
                    .compile(black_box(&source))
                    .expect("ledger compiles");
                black_box(compiled)
            });
        });
    }
    group.finish();
}

fn assembly_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembly");
    for functions in [8usize, 32] {
        let arena = Bump::new();
        let mut env = TypeEnv::new();
        let (contract, source) = ledger(&arena, &mut env, functions);
        let compiled = ContractCompiler::new(&env, CompilerSettings::default(), contract)
            .compile(&source)
            .expect("ledger compiles");
        group.throughput(Throughput::Elements(compiled.creation.len() as u64));
        group.bench_with_input(BenchmarkId::new("ledger", functions), &compiled, |b, compiled| {
            b.iter(|| black_box(assemble(black_box(&compiled.creation)).expect("ledger assembles")));
        });
    }
    group.finish();
}

fn execution_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution");
    let arena = Bump::new();
    let mut env = TypeEnv::new();
    let (contract, source) = ledger(&arena, &mut env, 8);
    let mut unit = Unit::new(&env, CompilerSettings::default());
    unit.build(contract, &source).expect("ledger builds");

    group.bench_function("deploy", |b| {
        b.iter(|| {
            let mut vm = Vm::new();
            black_box(unit.deploy(&mut vm, contract, &[], 0u32).expect("ledger deploys"))
        });
    });

    let mut vm = Vm::new();
    let address = unit.deploy(&mut vm, contract, &[], 0u32).expect("ledger deploys");
    let calldata = AbiValue::calldata("credit7(uint256)", &[AbiValue::uint(3u32)]);
    group.bench_function("credit", |b| {
        b.iter(|| black_box(vm.call(address, black_box(&calldata), 0u32).expect("call runs")));
    });
    group.finish();
}

criterion_group!(benches, compilation_benchmarks, assembly_benchmarks, execution_benchmarks);
criterion_main!(benches);
