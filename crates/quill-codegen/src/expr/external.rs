//! Message calls, contract creation and value transfers.
//!
//! External function values occupy `address, selector` followed by the
//! option words that were set (`gas`, `value`, in that order) or, for
//! bound library functions, the receiver. Creation functions occupy only
//! their `value` and `salt` options; the init code is embedded as a
//! sub-assembly. Arguments are ABI-encoded at the free memory pointer
//! without claiming the memory, since nothing outlives the call.
//!
//! A failed call forwards the callee's revert data, unless the call was
//! compiled as recoverable: then a success flag precedes the results and
//! the results stay zero when the call failed.

use quill_core::ast::{CallExpr, Expr};
use quill_core::types::function::FunctionOrigin;
use quill_core::{CompilationError, DataLocation, FunctionKind, FunctionType, Span, StateMutability, Type, TypeEnv};
use tracing::trace;

use super::{ExprCompiler, Result, keep_only};
use crate::asm::{AssemblyItem, Instruction, Tag};
use crate::context::{CompilerContext, ZERO_SLOT};
use crate::helpers::abi::{abi_decode_tuple, abi_encode_tuple, in_memory};
use crate::helpers::code::*;
use crate::helpers::memory::{allocate_memory_array, allocate_unbounded, finalize_allocation, zero_value};

/// Compile a call through an external, bare, creation or transfer function.
pub fn compile_external_call(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    node: &CallExpr<'_>,
    function: &FunctionType,
) -> Result<()> {
    match function.kind {
        FunctionKind::External | FunctionKind::DelegateCall => compile_message_call(compiler, expr, node, function),
        FunctionKind::Creation => compile_creation(compiler, node, function),
        FunctionKind::Send | FunctionKind::Transfer => compile_transfer(compiler, node, function),
        _ => compile_bare_call(compiler, node, function),
    }
}

/// Types arguments are written as.
fn encoding_types(env: &TypeEnv, types: &[Type], span: Span) -> Result<Vec<Type>> {
    types
        .iter()
        .map(|ty| {
            ty.encoding_type(env)
                .map(|encoded| in_memory(&encoded))
                .ok_or_else(|| {
                    CompilationError::unimplemented(format!("ABI encoding of {}", ty.name(env)), span)
                })
        })
        .collect()
}

/// Abort helper copying the return data of the last call into the revert data.
pub(super) fn forward_revert(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    ctx.abort_helper("revert_forward", |ctx| {
        ctx.exec(returndatacopy(lit(0u32), lit(0u32), returndatasize()))?;
        ctx.exec(revert(lit(0u32), returndatasize()))
    })
}

/// `extract_returndata() -> memPtr`: the return data as `bytes memory`.
fn extract_returndata(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    let allocate = allocate_memory_array(ctx, &Type::bytes(DataLocation::Memory))?;
    ctx.helper("extract_returndata", 0, 1, move |ctx| {
        let data = ctx.let_(lit(ZERO_SLOT))?;
        ctx.if_(returndatasize(), |ctx| {
            ctx.assign(data, call(allocate, [returndatasize()]))?;
            ctx.exec(returndatacopy(add(slot(data), lit(32u32)), lit(0u32), returndatasize()))
        })?;
        ctx.helper_return(&[data])
    })
}

fn message_call_word(function: &FunctionType, gas: Word, address: Word, value: Word, input: Word, length: Word) -> Word {
    match function.kind {
        FunctionKind::DelegateCall => op(
            Instruction::DelegateCall,
            [gas, address, input, length, lit(0u32), lit(0u32)],
        ),
        _ if matches!(function.mutability, StateMutability::View | StateMutability::Pure) => op(
            Instruction::StaticCall,
            [gas, address, input, length, lit(0u32), lit(0u32)],
        ),
        _ => op(
            Instruction::Call,
            [gas, address, value, input, length, lit(0u32), lit(0u32)],
        ),
    }
}

fn compile_message_call(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    node: &CallExpr<'_>,
    function: &FunctionType,
) -> Result<()> {
    let env = compiler.env();
    let result_size = compiler.type_of(expr).size_on_stack(env);
    let base = compiler.ctx.stack_height();

    // 1. Callee words: address, selector, options or receiver
    compiler.compile(node.callee)?;
    let (address, selector) = (base, base + 1);
    let mut next = base + 2;
    let gas = function.gas_set().then(|| {
        next += 1;
        next - 1
    });
    let value = function.value_set().then(|| {
        next += 1;
        next - 1
    });

    // 2. Arguments; a bound receiver is encoded as the first one
    let first_value = if function.bound() {
        if function.params.first().is_some_and(|p| p.data_location() == Some(DataLocation::Storage)) {
            return Err(CompilationError::unimplemented(
                "storage references passed to external library functions",
                node.callee.span,
            ));
        }
        next
    } else {
        compiler.ctx.stack_height()
    };
    compiler.compile_args(node.args, function.call_params())?;
    let values: Vec<usize> = (first_value..compiler.ctx.stack_height()).collect();
    let from = function.params.clone();
    let to = encoding_types(env, &from, node.callee.span)?;

    let ctx = &mut *compiler.ctx;
    ctx.revert_if(iszero(extcodesize(slot(address))))?;

    // 3. Encode selector and arguments at the free memory pointer
    let encode = abi_encode_tuple(ctx, &from, &to)?;
    let pos = ctx.let_(allocate_unbounded())?;
    ctx.exec(mstore(slot(pos), shl(lit(224u32), slot(selector))))?;
    let mut args: Vec<Word> = values.iter().copied().map(slot).collect();
    args.push(add(slot(pos), lit(4u32)));
    let end = ctx.call_with(encode, args, 1)?[0];

    // 4. Call
    let gas_word = gas.map_or_else(|| op(Instruction::Gas, []), slot);
    let value_word = value.map_or_else(|| lit(0u32), slot);
    let success = ctx.let_(message_call_word(
        function,
        gas_word,
        slot(address),
        value_word,
        slot(pos),
        sub(slot(end), slot(pos)),
    ))?;
    trace!(kind = ?function.kind, recoverable = node.recoverable, "message call");

    // 5. Results
    let returns: Vec<Type> = function
        .returns
        .iter()
        .map(|ty| ty.decoding_type(env).unwrap_or_else(|| in_memory(ty)))
        .collect();
    let sizes: Vec<usize> = returns.iter().map(|ty| ty.size_on_stack(env)).collect();
    let total: usize = sizes.iter().sum();
    let decode = if returns.is_empty() {
        None
    } else {
        Some((abi_decode_tuple(ctx, &returns, true)?, finalize_allocation(ctx)?))
    };

    let mut kept = Vec::with_capacity(total + 1);
    if node.recoverable {
        kept.push(success);
        let mut placeholders = Vec::with_capacity(total);
        for (ty, size) in returns.iter().zip(&sizes) {
            for _ in 0..*size {
                let zero = if *size == 1 { zero_value(ctx, ty)? } else { lit(0u32) };
                placeholders.push(ctx.let_(zero)?);
            }
        }
        if let Some((decode, finalize)) = decode {
            ctx.if_(slot(success), |ctx| {
                let results = decode_returndata(ctx, decode, finalize, total)?;
                for (placeholder, result) in placeholders.iter().zip(results) {
                    ctx.assign(*placeholder, slot(result))?;
                }
                Ok(())
            })?;
        }
        kept.extend(placeholders);
    } else {
        let forward = forward_revert(ctx)?;
        ctx.eval(&iszero(slot(success)))?;
        ctx.jump_if(forward);
        if let Some((decode, finalize)) = decode {
            kept.extend(decode_returndata(ctx, decode, finalize, total)?);
        }
    }
    keep_only(ctx, base, &kept)?;
    debug_assert_eq!(ctx.stack_height(), base + result_size);
    Ok(())
}

/// Copy the return data into memory and decode it; returns the result slots.
fn decode_returndata(ctx: &mut CompilerContext<'_>, decode: Tag, finalize: Tag, total: usize) -> Result<Vec<usize>> {
    let data = ctx.let_(allocate_unbounded())?;
    ctx.exec(returndatacopy(slot(data), lit(0u32), returndatasize()))?;
    ctx.call_with(finalize, [slot(data), returndatasize()], 0)?;
    ctx.call_with(decode, [slot(data), add(slot(data), returndatasize())], total)
}

/// `address.call(data)` and friends: `(bool success, bytes memory returndata)`.
fn compile_bare_call(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>, function: &FunctionType) -> Result<()> {
    let base = compiler.ctx.stack_height();
    compiler.compile(node.callee)?;
    let address = base;
    let mut next = base + 1;
    let gas = function.gas_set().then(|| {
        next += 1;
        next - 1
    });
    let value = function.value_set().then(|| {
        next += 1;
        next - 1
    });
    let [data] = node.args else {
        return Err(CompilationError::internal("low-level call with other than one argument"));
    };
    compiler.compile_to(data, &Type::bytes(DataLocation::Memory))?;
    let ctx = &mut *compiler.ctx;
    let data = ctx.stack_height() - 1;

    let gas_word = gas.map_or_else(|| op(Instruction::Gas, []), slot);
    let value_word = value.map_or_else(|| lit(0u32), slot);
    let input = add(slot(data), lit(32u32));
    let length = mload(slot(data));
    let call_word = match function.kind {
        FunctionKind::BareCall => op(
            Instruction::Call,
            [gas_word, slot(address), value_word, input, length, lit(0u32), lit(0u32)],
        ),
        FunctionKind::BareCallCode => op(
            Instruction::CallCode,
            [gas_word, slot(address), value_word, input, length, lit(0u32), lit(0u32)],
        ),
        FunctionKind::BareDelegateCall => op(
            Instruction::DelegateCall,
            [gas_word, slot(address), input, length, lit(0u32), lit(0u32)],
        ),
        _ => op(
            Instruction::StaticCall,
            [gas_word, slot(address), input, length, lit(0u32), lit(0u32)],
        ),
    };
    let success = ctx.let_(call_word)?;
    let extract = extract_returndata(ctx)?;
    let returndata = ctx.call_with(extract, [], 1)?[0];
    keep_only(ctx, base, &[success, returndata])
}

/// `payable.send(amount)` and `payable.transfer(amount)`. The stipend is
/// only passed for zero-value transfers; the machine adds it otherwise.
fn compile_transfer(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>, function: &FunctionType) -> Result<()> {
    let base = compiler.ctx.stack_height();
    compiler.compile(node.callee)?;
    compiler.compile_args(node.args, &function.params)?;
    let ctx = &mut *compiler.ctx;
    let (address, amount) = (base, base + 1);
    let success = ctx.let_(op(
        Instruction::Call,
        [
            mul(iszero(slot(amount)), lit(2300u32)),
            slot(address),
            slot(amount),
            lit(0u32),
            lit(0u32),
            lit(0u32),
            lit(0u32),
        ],
    ))?;
    if function.kind == FunctionKind::Transfer {
        let forward = forward_revert(ctx)?;
        ctx.eval(&iszero(slot(success)))?;
        ctx.jump_if(forward);
        keep_only(ctx, base, &[])
    } else {
        keep_only(ctx, base, &[success])
    }
}

/// `new C(args)`: copy the embedded init code to memory, append the
/// encoded constructor arguments and `CREATE`/`CREATE2` it.
fn compile_creation(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>, function: &FunctionType) -> Result<()> {
    let env = compiler.env();
    let Some(FunctionOrigin::Constructor(contract)) = function.origin else {
        return Err(CompilationError::internal("creation function without a contract"));
    };
    let creation = compiler.ctx.compiled_contract(contract).ok_or_else(|| {
        CompilationError::unimplemented(
            format!("creation of {} before it is compiled", env.contract(contract).name),
            node.callee.span,
        )
    })?;
    let base = compiler.ctx.stack_height();
    compiler.compile(node.callee)?;
    let mut next = base;
    let value = function.value_set().then(|| {
        next += 1;
        next - 1
    });
    let salt = function.salt_set().then(|| {
        next += 1;
        next - 1
    });
    let first_arg = compiler.ctx.stack_height();
    compiler.compile_args(node.args, &function.params)?;
    let values: Vec<usize> = (first_arg..compiler.ctx.stack_height()).collect();
    let to = encoding_types(env, &function.params, node.callee.span)?;

    let ctx = &mut *compiler.ctx;
    let encode = abi_encode_tuple(ctx, &function.params, &to)?;
    let sub_id = ctx.add_sub(creation);
    let pos = ctx.let_(allocate_unbounded())?;
    ctx.append(AssemblyItem::PushSubSize(sub_id));
    let size = ctx.stack_height() - 1;
    ctx.append(AssemblyItem::PushSub(sub_id));
    let offset = ctx.stack_height() - 1;
    ctx.exec(codecopy(slot(pos), slot(offset), slot(size)))?;
    ctx.pop(1);
    let mut args: Vec<Word> = values.iter().copied().map(slot).collect();
    args.push(add(slot(pos), slot(size)));
    let end = ctx.call_with(encode, args, 1)?[0];

    let value_word = value.map_or_else(|| lit(0u32), slot);
    let length = sub(slot(end), slot(pos));
    let created = match salt {
        Some(salt) => ctx.let_(op(Instruction::Create2, [value_word, slot(pos), length, slot(salt)]))?,
        None => ctx.let_(op(Instruction::Create, [value_word, slot(pos), length]))?,
    };
    trace!(contract = ?contract, salted = salt.is_some(), "contract creation");

    if node.recoverable {
        let success = ctx.let_(iszero(iszero(slot(created))))?;
        keep_only(ctx, base, &[success, created])
    } else {
        let forward = forward_revert(ctx)?;
        ctx.eval(&iszero(slot(created)))?;
        ctx.jump_if(forward);
        keep_only(ctx, base, &[created])
    }
}
