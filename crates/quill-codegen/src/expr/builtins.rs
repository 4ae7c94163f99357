//! Builtin functions: hashing and precompiles, block and transaction
//! queries, logs and events, `assert`/`require`/`revert`, the `abi.*`
//! functions and storage array `push`/`pop`.

use quill_core::ast::{CallExpr, Expr, ExprKind};
use quill_core::hash::{keccak_word, selector_value};
use quill_core::types::function::FunctionOrigin;
use quill_core::{CompilationError, DataLocation, FunctionKind, FunctionType, Span, Type, TypeEnv};
use tracing::trace;

use super::{ExprCompiler, Result, keep_only};
use crate::asm::Instruction;
use crate::context::CompilerContext;
use crate::helpers::abi::{abi_decode_tuple, abi_encode_in_place, abi_encode_packed, abi_encode_tuple, in_memory};
use crate::helpers::abort::{ERROR_SELECTOR, panic_code, selector_word};
use crate::helpers::code::*;
use crate::helpers::convert::copy_to_storage;
use crate::helpers::math::left_mask;
use crate::helpers::memory::{allocate_unbounded, finalize_allocation};
use crate::helpers::storage::{array_pop, array_push, array_push_zero, storage_array_index_access};
use crate::lvalue::{LValue, storage_item};
use crate::settings::RevertStrings;

/// Compile a call of a builtin function.
pub fn compile_builtin_call(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    node: &CallExpr<'_>,
    function: &FunctionType,
    want_lvalue: bool,
) -> Result<()> {
    trace!(kind = ?function.kind, args = node.args.len(), "builtin call");
    match function.kind {
        FunctionKind::Keccak256 => compile_keccak(compiler, node),
        FunctionKind::Sha256 | FunctionKind::Ripemd160 => compile_hash_precompile(compiler, node, function.kind),
        FunctionKind::EcRecover => compile_ecrecover(compiler, node, function),
        FunctionKind::GasLeft => {
            compiler.ctx.op(Instruction::Gas);
            Ok(())
        }
        FunctionKind::BlockHash => {
            compiler.compile_args(node.args, &function.params)?;
            compiler.ctx.op(Instruction::BlockHash);
            Ok(())
        }
        FunctionKind::AddMod | FunctionKind::MulMod => compile_modular(compiler, node, function),
        FunctionKind::SelfDestruct => {
            compiler.compile_args(node.args, &function.params)?;
            compiler.ctx.op(Instruction::SelfDestruct);
            Ok(())
        }
        FunctionKind::Log(topics) => compile_log(compiler, node, function, topics),
        FunctionKind::Event => compile_event(compiler, node, function),
        FunctionKind::Assert => {
            compiler.compile_args(node.args, &function.params)?;
            let condition = compiler.ctx.stack_height() - 1;
            compiler.ctx.panic_if(iszero(slot(condition)), panic_code::ASSERT)?;
            compiler.ctx.pop(1);
            Ok(())
        }
        FunctionKind::Require => compile_require(compiler, node),
        FunctionKind::Revert => compile_revert(compiler, node),
        FunctionKind::AbiEncode
        | FunctionKind::AbiEncodePacked
        | FunctionKind::AbiEncodeWithSelector
        | FunctionKind::AbiEncodeWithSignature => compile_abi_encode(compiler, node, function.kind),
        FunctionKind::AbiDecode => compile_abi_decode(compiler, expr, node),
        FunctionKind::ArrayPush | FunctionKind::ByteArrayPush if node.args.is_empty() => {
            compile_push_zero(compiler, expr, node, function, want_lvalue)
        }
        FunctionKind::ArrayPush | FunctionKind::ByteArrayPush => compile_push(compiler, node, function),
        FunctionKind::ArrayPop => compile_pop(compiler, node),
        other => Err(CompilationError::internal(format!("no code generation for builtin {other:?}"))),
    }
}

fn single_arg<'e>(node: &CallExpr<'e>) -> Result<&'e Expr<'e>> {
    match node.args {
        [arg] => Ok(*arg),
        _ => Err(CompilationError::internal("builtin expects exactly one argument")),
    }
}

/// `keccak256(bytes)`; literal arguments are hashed at compile time.
fn compile_keccak(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>) -> Result<()> {
    let arg = single_arg(node)?;
    if let Type::StringLiteral(bytes) = compiler.type_of(arg) {
        compiler.ctx.push(keccak_word(bytes));
        return Ok(());
    }
    compiler.compile_to(arg, &Type::bytes(DataLocation::Memory))?;
    let data = compiler.ctx.stack_height() - 1;
    let ctx = &mut *compiler.ctx;
    let hash = ctx.let_(keccak256(add(slot(data), lit(32u32)), mload(slot(data))))?;
    keep_only(ctx, data, &[hash])
}

/// `sha256` and `ripemd160` through precompiles 2 and 3; the digest is
/// written to scratch space.
fn compile_hash_precompile(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>, kind: FunctionKind) -> Result<()> {
    let arg = single_arg(node)?;
    compiler.compile_to(arg, &Type::bytes(DataLocation::Memory))?;
    let data = compiler.ctx.stack_height() - 1;
    let ctx = &mut *compiler.ctx;
    let precompile = if kind == FunctionKind::Sha256 { 2u32 } else { 3 };
    let success = ctx.let_(op(
        Instruction::StaticCall,
        [
            op(Instruction::Gas, []),
            lit(precompile),
            add(slot(data), lit(32u32)),
            mload(slot(data)),
            lit(0u32),
            lit(32u32),
        ],
    ))?;
    ctx.revert_if(iszero(slot(success)))?;
    let digest = if kind == FunctionKind::Sha256 {
        ctx.let_(mload(lit(0u32)))?
    } else {
        ctx.let_(shl(lit(96u32), mload(lit(0u32))))?
    };
    keep_only(ctx, data, &[digest])
}

/// `ecrecover(hash, v, r, s)` through precompile 1. A failed recovery
/// returns no data and leaves the zeroed scratch word as the result.
fn compile_ecrecover(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>, function: &FunctionType) -> Result<()> {
    let base = compiler.ctx.stack_height();
    compiler.compile_args(node.args, &function.params)?;
    let ctx = &mut *compiler.ctx;
    let pos = ctx.let_(allocate_unbounded())?;
    for index in 0..4 {
        ctx.exec(mstore(add(slot(pos), lit(32 * index as u64)), slot(base + index)))?;
    }
    ctx.exec(mstore(lit(0u32), lit(0u32)))?;
    let success = ctx.let_(op(
        Instruction::StaticCall,
        [op(Instruction::Gas, []), lit(1u32), slot(pos), lit(128u32), lit(0u32), lit(32u32)],
    ))?;
    ctx.revert_if(iszero(slot(success)))?;
    let recovered = ctx.let_(mload(lit(0u32)))?;
    keep_only(ctx, base, &[recovered])
}

/// `addmod(x, y, k)` and `mulmod(x, y, k)` panic when `k` is zero.
fn compile_modular(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>, function: &FunctionType) -> Result<()> {
    let base = compiler.ctx.stack_height();
    compiler.compile_args(node.args, &function.params)?;
    let ctx = &mut *compiler.ctx;
    let (x, y, k) = (base, base + 1, base + 2);
    ctx.panic_if(iszero(slot(k)), panic_code::DIVISION_BY_ZERO)?;
    let instruction = if function.kind == FunctionKind::AddMod {
        Instruction::AddMod
    } else {
        Instruction::MulMod
    };
    let result = ctx.let_(op(instruction, [slot(x), slot(y), slot(k)]))?;
    keep_only(ctx, base, &[result])
}

/// `logN(data, topic1, ..., topicN)`.
fn compile_log(
    compiler: &mut ExprCompiler<'_, '_>,
    node: &CallExpr<'_>,
    function: &FunctionType,
    topics: u8,
) -> Result<()> {
    let instruction = Instruction::log(topics)
        .ok_or_else(|| CompilationError::internal(format!("log{topics} does not exist")))?;
    let base = compiler.ctx.stack_height();
    compiler.compile_args(node.args, &function.params)?;
    let ctx = &mut *compiler.ctx;
    let pos = ctx.let_(allocate_unbounded())?;
    ctx.exec(mstore(slot(pos), slot(base)))?;
    let mut args = vec![slot(pos), lit(32u32)];
    args.extend((1..=usize::from(topics)).map(|topic| slot(base + topic)));
    ctx.exec(op(instruction, args))?;
    keep_only(ctx, base, &[])
}

/// `emit E(args)`: indexed arguments become topics after the signature
/// hash, the others are ABI-encoded into the log data.
fn compile_event(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>, function: &FunctionType) -> Result<()> {
    let env = compiler.env();
    let Some(FunctionOrigin::Event(id)) = function.origin else {
        return Err(CompilationError::internal("event call without an event"));
    };
    let event = env.event(id);
    let base = compiler.ctx.stack_height();
    compiler.compile_args(node.args, &function.params)?;

    // 1. Topics
    let mut topics = Vec::new();
    if !event.anonymous {
        topics.push(lit(keccak_word(event.signature(env).as_bytes())));
    }
    let mut data_values = Vec::new();
    let mut data_types = Vec::new();
    let mut position = base;
    for param in &event.params {
        let size = param.ty.size_on_stack(env);
        if !param.indexed {
            data_values.extend((position..position + size).map(slot));
            data_types.push(param.ty.clone());
        } else if param.ty.is_value_type() {
            topics.push(slot(position));
        } else if param.ty.is_byte_array() && param.ty.data_location() == Some(DataLocation::Memory) {
            topics.push(keccak256(add(slot(position), lit(32u32)), mload(slot(position))));
        } else {
            // bytes and strings hash their contents, arrays and structs their in-place encoding
            let ctx = &mut *compiler.ctx;
            let encoder = if param.ty.is_byte_array() {
                abi_encode_packed(ctx, std::slice::from_ref(&param.ty))?
            } else {
                abi_encode_in_place(ctx, &param.ty)?
            };
            let pos = ctx.let_(allocate_unbounded())?;
            let mut args: Vec<Word> = (position..position + size).map(slot).collect();
            args.push(slot(pos));
            let end = ctx.call_with(encoder, args, 1)?[0];
            let topic = ctx.let_(keccak256(slot(pos), sub(slot(end), slot(pos))))?;
            topics.push(slot(topic));
        }
        position += size;
    }
    let instruction = u8::try_from(topics.len())
        .ok()
        .and_then(Instruction::log)
        .ok_or_else(|| CompilationError::internal(format!("event {} has too many topics", event.name)))?;

    // 2. Data
    let to = encoding_types(env, &data_types, node.callee.span)?;
    let ctx = &mut *compiler.ctx;
    let encode = abi_encode_tuple(ctx, &data_types, &to)?;
    let pos = ctx.let_(allocate_unbounded())?;
    data_values.push(slot(pos));
    let end = ctx.call_with(encode, data_values, 1)?[0];

    // 3. Log
    let mut args = vec![slot(pos), sub(slot(end), slot(pos))];
    args.extend(topics);
    ctx.exec(op(instruction, args))?;
    trace!(event = %event.name, "emit");
    keep_only(ctx, base, &[])
}

fn encoding_types(env: &TypeEnv, types: &[Type], span: Span) -> Result<Vec<Type>> {
    types
        .iter()
        .map(|ty| {
            ty.encoding_type(env)
                .map(|encoded| in_memory(&encoded))
                .ok_or_else(|| CompilationError::unimplemented(format!("ABI encoding of {}", ty.name(env)), span))
        })
        .collect()
}

/// Revert with `Error(string)` built from the memory string at `reason`.
fn revert_with_reason(ctx: &mut CompilerContext<'_>, reason: usize) -> Result<()> {
    if ctx.settings().revert_strings == RevertStrings::Strip {
        return ctx.exec(revert(lit(0u32), lit(0u32)));
    }
    let string = Type::string(DataLocation::Memory);
    let encode = abi_encode_tuple(ctx, std::slice::from_ref(&string), std::slice::from_ref(&string))?;
    let pos = ctx.let_(allocate_unbounded())?;
    ctx.exec(mstore(slot(pos), lit(selector_word(ERROR_SELECTOR))))?;
    let end = ctx.call_with(encode, [slot(reason), add(slot(pos), lit(4u32))], 1)?[0];
    ctx.exec(revert(slot(pos), sub(slot(end), slot(pos))))
}

/// `require(condition)` and `require(condition, reason)`.
fn compile_require(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>) -> Result<()> {
    let (condition, reason) = match node.args {
        [condition] => (*condition, None),
        [condition, reason] => (*condition, Some(*reason)),
        _ => return Err(CompilationError::internal("require with other than one or two arguments")),
    };
    let base = compiler.ctx.stack_height();
    compiler.compile_to(condition, &Type::Bool)?;
    match reason.map(|reason| (reason, compiler.type_of(reason))) {
        None => compiler.ctx.revert_if(iszero(slot(base)))?,
        Some((_, Type::StringLiteral(bytes))) => {
            let revert = compiler.ctx.revert_helper(&String::from_utf8_lossy(bytes))?;
            compiler.ctx.eval(&iszero(slot(base)))?;
            compiler.ctx.jump_if(revert);
        }
        Some((reason, _)) => {
            compiler.compile_to(reason, &Type::string(DataLocation::Memory))?;
            let reason = base + 1;
            compiler
                .ctx
                .if_(iszero(slot(base)), |ctx| revert_with_reason(ctx, reason))?;
        }
    }
    keep_only(compiler.ctx, base, &[])
}

/// `revert()` and `revert(reason)`.
fn compile_revert(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>) -> Result<()> {
    match node.args {
        [] => {
            let revert = compiler.ctx.revert_helper("")?;
            compiler.ctx.jump(revert);
        }
        [reason] => {
            if let Type::StringLiteral(bytes) = compiler.type_of(reason) {
                let revert = compiler.ctx.revert_helper(&String::from_utf8_lossy(bytes))?;
                compiler.ctx.jump(revert);
            } else {
                compiler.compile_to(reason, &Type::string(DataLocation::Memory))?;
                let reason = compiler.ctx.stack_height() - 1;
                revert_with_reason(compiler.ctx, reason)?;
            }
        }
        _ => return Err(CompilationError::internal("revert with more than one argument")),
    }
    Ok(())
}

/// `abi.encode*`: a fresh `bytes memory` holding the optional selector
/// followed by the encoded arguments.
fn compile_abi_encode(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>, kind: FunctionKind) -> Result<()> {
    let env = compiler.env();
    let base = compiler.ctx.stack_height();
    let packed = kind == FunctionKind::AbiEncodePacked;

    // 1. Selector
    let (selector, args) = match (kind, node.args) {
        (FunctionKind::AbiEncodeWithSelector, [selector, rest @ ..]) => {
            compiler.compile_to(selector, &Type::fixed_bytes(4))?;
            (Some(slot(base)), rest)
        }
        (FunctionKind::AbiEncodeWithSignature, [signature, rest @ ..]) => {
            if let Type::StringLiteral(bytes) = compiler.type_of(signature) {
                let value = selector_value(&String::from_utf8_lossy(bytes));
                (Some(lit(selector_word(value))), rest)
            } else {
                compiler.compile_to(signature, &Type::string(DataLocation::Memory))?;
                let hashed = and(
                    keccak256(add(slot(base), lit(32u32)), mload(slot(base))),
                    lit(left_mask(32)),
                );
                (Some(hashed), rest)
            }
        }
        (FunctionKind::AbiEncodeWithSelector | FunctionKind::AbiEncodeWithSignature, []) => {
            return Err(CompilationError::internal("abi encoding without a selector argument"));
        }
        _ => (None, node.args),
    };

    // 2. Arguments at their mobile types
    let first_value = compiler.ctx.stack_height();
    let mut from = Vec::with_capacity(args.len());
    for arg in args {
        let ty = compiler.type_of(arg);
        let target = match ty {
            Type::StringLiteral(_) if packed => ty.clone(),
            _ => ty.mobile_type(env).ok_or_else(|| {
                CompilationError::unimplemented(format!("ABI encoding of {}", ty.name(env)), arg.span)
            })?,
        };
        compiler.compile_to(arg, &target)?;
        from.push(target);
    }
    let values: Vec<Word> = (first_value..compiler.ctx.stack_height()).map(slot).collect();

    // 3. Encode behind the length word
    let encode = if packed {
        abi_encode_packed(compiler.ctx, &from)?
    } else {
        let to = encoding_types(env, &from, node.callee.span)?;
        abi_encode_tuple(compiler.ctx, &from, &to)?
    };
    let ctx = &mut *compiler.ctx;
    let finalize = finalize_allocation(ctx)?;
    let pos = ctx.let_(allocate_unbounded())?;
    let mut data_start = add(slot(pos), lit(32u32));
    if let Some(selector) = selector {
        ctx.exec(mstore(add(slot(pos), lit(32u32)), selector))?;
        data_start = add(slot(pos), lit(36u32));
    }
    let mut encode_args = values;
    encode_args.push(data_start);
    let end = ctx.call_with(encode, encode_args, 1)?[0];
    ctx.exec(mstore(slot(pos), sub(slot(end), add(slot(pos), lit(32u32)))))?;
    ctx.call_with(finalize, [slot(pos), sub(slot(end), slot(pos))], 0)?;
    keep_only(ctx, base, &[pos])
}

/// `abi.decode(data, (T1, T2, ...))`; the type list produces no code.
fn compile_abi_decode(compiler: &mut ExprCompiler<'_, '_>, expr: &Expr<'_>, node: &CallExpr<'_>) -> Result<()> {
    let [data, _types] = node.args else {
        return Err(CompilationError::internal("abi.decode with other than two arguments"));
    };
    let env = compiler.env();
    let result = compiler.type_of(expr);
    let types: Vec<Type> = result.components().into_iter().flatten().collect();
    let total: usize = types.iter().map(|ty| ty.size_on_stack(env)).sum();
    let base = compiler.ctx.stack_height();
    compiler.compile_to(data, &Type::bytes(DataLocation::Memory))?;
    let ctx = &mut *compiler.ctx;
    let decode = abi_decode_tuple(ctx, &types, true)?;
    let start = ctx.let_(add(slot(base), lit(32u32)))?;
    let results = ctx.call_with(decode, [slot(start), add(slot(start), mload(slot(base)))], total)?;
    keep_only(ctx, base, &results)
}

/// Storage array of a `push`/`pop` callee.
fn receiver_array<'env>(compiler: &ExprCompiler<'_, 'env>, node: &CallExpr<'_>) -> Result<&'env Type> {
    match node.callee.kind {
        ExprKind::Member(member) => Ok(compiler.type_of(member.base)),
        _ => Err(CompilationError::internal("array push or pop without a receiver")),
    }
}

/// `array.push(value)`. Value elements are written by the push helper;
/// reference elements are appended zeroed and copied into place.
fn compile_push(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>, function: &FunctionType) -> Result<()> {
    let array_ty = receiver_array(compiler, node)?;
    let element = function
        .params
        .first()
        .ok_or_else(|| CompilationError::internal("push without an element type"))?;
    let [arg] = node.args else {
        return Err(CompilationError::internal("push with more than one argument"));
    };
    let base = compiler.ctx.stack_height();
    compiler.compile(node.callee)?;
    if element.is_value_type() {
        compiler.compile_to(arg, element)?;
        let push = array_push(compiler.ctx, array_ty)?;
        return compiler.ctx.call_helper(push, 2, 1);
    }
    let from = compiler.type_of(arg);
    compiler.compile(arg)?;
    let ctx = &mut *compiler.ctx;
    let push_zero = array_push_zero(ctx, array_ty)?;
    let location = ctx.call_with(push_zero, [slot(base)], 2)?;
    let copy = copy_to_storage(ctx, from, element)?;
    let mut args: Vec<Word> = (base + 1..location[0]).map(slot).collect();
    args.push(slot(location[1]));
    ctx.call_with(copy, args, 0)?;
    keep_only(ctx, base, &[location[0]])
}

/// `array.push()`: append a zero element and yield its location.
fn compile_push_zero(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    node: &CallExpr<'_>,
    function: &FunctionType,
    want_lvalue: bool,
) -> Result<()> {
    let array_ty = receiver_array(compiler, node)?;
    let element = function
        .params
        .first()
        .ok_or_else(|| CompilationError::internal("push without an element type"))?;
    let base = compiler.ctx.stack_height();
    compiler.compile(node.callee)?;
    let ctx = &mut *compiler.ctx;
    if element.is_value_type() {
        let push = array_push(ctx, array_ty)?;
        let access = storage_array_index_access(ctx, array_ty)?;
        let length = ctx.let_(call(push, [slot(base), lit(0u32)]))?;
        let location = ctx.call_with(access, [slot(base), sub(slot(length), lit(1u32))], 2)?;
        keep_only(ctx, base, &location)?;
    } else {
        let push_zero = array_push_zero(ctx, array_ty)?;
        let location = ctx.call_with(push_zero, [slot(base)], 2)?;
        let offset = ctx.let_(lit(0u32))?;
        keep_only(ctx, base, &[location[1], offset])?;
    }
    let lvalue = if array_ty.is_byte_array() {
        LValue::StorageByteArrayElement
    } else {
        storage_item(compiler.type_of(expr))
    };
    compiler.set_location(lvalue, want_lvalue)
}

/// `array.pop()`.
fn compile_pop(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>) -> Result<()> {
    let array_ty = receiver_array(compiler, node)?;
    compiler.compile(node.callee)?;
    let pop = array_pop(compiler.ctx, array_ty)?;
    compiler.ctx.call_helper(pop, 1, 0)
}
