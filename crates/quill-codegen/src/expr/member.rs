//! Member access.
//!
//! What a member produces depends on the category of the base:
//!
//! | base                | member                        | result                      |
//! |---------------------|-------------------------------|-----------------------------|
//! | `msg`/`block`/`tx`  | `sender`, `timestamp`, ...    | environment opcode          |
//! | `type(C)`           | `name`, `creationCode`        | fresh `string`/`bytes`      |
//! | address             | `balance`                     | `BALANCE`                   |
//! | contract            | function or getter            | `address, selector`         |
//! | library             | function                      | `address, selector` or tag  |
//! | enum type           | value                         | value index                 |
//! | array, `bytesN`     | `length`                      | length                      |
//! | struct              | field                         | storage or memory location  |
//! | external function   | `selector`, `address`         | one of the function words   |
//!
//! Members whose type is itself a function (option setters, `push`, bare
//! calls) leave the words of the base for the call to consume.

use quill_core::ast::{Expr, MemberExpr};
use quill_core::types::members::{Member, MemberOrigin};
use quill_core::{CompilationError, DataLocation, FunctionKind, FunctionType, MagicKind, Type};
use tracing::trace;

use super::identifiers::resolve_virtual;
use super::{ExprCompiler, Result, keep_only};
use crate::asm::{AssemblyItem, Instruction};
use crate::helpers::code::*;
use crate::helpers::math::{cleanup, left_mask};
use crate::helpers::memory::{allocate_memory_array, copy_literal_to_memory, memory_array_length};
use crate::helpers::storage::array_length;
use crate::lvalue::{LValue, storage_item};

/// Compile `base.name`.
pub fn compile_member(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    member: &MemberExpr<'_>,
    want_lvalue: bool,
) -> Result<()> {
    let env = compiler.env();
    let base_ty = compiler.type_of(member.base);
    let ty = compiler.type_of(expr);
    let members = env.members(base_ty, compiler.ctx.scope());
    let resolved = members
        .lookup(member.name)
        .find(|m| m.ty == *ty)
        .or_else(|| members.lookup(member.name).next())
        .cloned()
        .ok_or_else(|| {
            CompilationError::internal(format!("{} has no member {}", base_ty.name(env), member.name))
        })?;

    if let Type::Function(function) = ty
        && function.bound()
    {
        return compile_bound_function(compiler, member, function, &resolved);
    }

    match base_ty {
        Type::Magic(kind) => compile_magic_member(compiler, kind, member),
        Type::Address { .. } => {
            compiler.compile(member.base)?;
            if member.name == "balance" {
                compiler.ctx.op(Instruction::Balance);
            }
            Ok(())
        }
        Type::Contract(contract) => {
            compiler.compile(member.base)?;
            match (contract.is_super, resolved.origin) {
                (true, MemberOrigin::Function(function)) => {
                    let tag = compiler.ctx.function_entry_label(function);
                    compiler.ctx.push_tag(tag);
                    Ok(())
                }
                (false, MemberOrigin::Function(_) | MemberOrigin::Getter(_)) => {
                    let Type::Function(function) = &resolved.ty else {
                        return Err(CompilationError::internal("contract member is not a function"));
                    };
                    compiler.ctx.push(function.selector(env));
                    Ok(())
                }
                _ => Err(CompilationError::internal(format!(
                    "unexpected contract member {}",
                    member.name
                ))),
            }
        }
        Type::TypeType(inner) => compile_static_member(compiler, inner, member, &resolved),
        Type::Array(_) | Type::FixedBytes(_) if member.name == "length" => {
            compile_length(compiler, member, base_ty)
        }
        Type::Array(_) => {
            // push and pop keep the array reference for the call
            compiler.compile(member.base)
        }
        Type::Struct(s) => {
            let MemberOrigin::StructField(index) = resolved.origin else {
                return Err(CompilationError::internal("struct member is not a field"));
            };
            compile_struct_field(compiler, member, s.id, s.location, index, &resolved.ty, want_lvalue)
        }
        Type::Function(function) => compile_function_member(compiler, member, function),
        other => Err(CompilationError::internal(format!(
            "member access on {}",
            other.name(env)
        ))),
    }
}

/// `msg.sender`, `block.number`, `type(C).name`, ...
fn compile_magic_member(compiler: &mut ExprCompiler<'_, '_>, kind: &MagicKind, member: &MemberExpr<'_>) -> Result<()> {
    if let MagicKind::MetaType(inner) = kind {
        return compile_meta_member(compiler, inner, member);
    }
    let ctx = &mut *compiler.ctx;
    let instruction = match (kind, member.name) {
        (MagicKind::Block, "coinbase") => Instruction::Coinbase,
        (MagicKind::Block, "timestamp") => Instruction::Timestamp,
        (MagicKind::Block, "number") => Instruction::Number,
        (MagicKind::Block, "difficulty") => Instruction::Difficulty,
        (MagicKind::Block, "gaslimit") => Instruction::GasLimit,
        (MagicKind::Message, "sender") => Instruction::Caller,
        (MagicKind::Message, "gas") => Instruction::Gas,
        (MagicKind::Message, "value") => Instruction::CallValue,
        (MagicKind::Transaction, "origin") => Instruction::Origin,
        (MagicKind::Transaction, "gasprice") => Instruction::GasPrice,
        (MagicKind::Message, "data") => {
            ctx.push(0u32);
            ctx.op(Instruction::CallDataSize);
            return Ok(());
        }
        (MagicKind::Message, "sig") => {
            return ctx.eval(&and(calldataload(lit(0u32)), lit(left_mask(32))));
        }
        // builtin functions are selected by the call
        _ => return Ok(()),
    };
    ctx.op(instruction);
    Ok(())
}

/// `type(C).name` and `type(C).creationCode`.
fn compile_meta_member(compiler: &mut ExprCompiler<'_, '_>, inner: &Type, member: &MemberExpr<'_>) -> Result<()> {
    let env = compiler.env();
    let Type::Contract(contract) = inner else {
        return Err(CompilationError::internal("type information of a non-contract"));
    };
    let ctx = &mut *compiler.ctx;
    match member.name {
        "name" => {
            let name = env.contract(contract.id).name.clone();
            let copy = copy_literal_to_memory(ctx, name.as_bytes())?;
            ctx.call_helper(copy, 0, 1)
        }
        "creationCode" => {
            let sub = ctx.compiled_contract(contract.id).ok_or_else(|| {
                CompilationError::unimplemented(
                    format!("creation code of {} before it is compiled", env.contract(contract.id).name),
                    member.base.span,
                )
            })?;
            let sub = ctx.add_sub(sub);
            let allocate = allocate_memory_array(ctx, &Type::bytes(DataLocation::Memory))?;
            let base = ctx.stack_height();
            ctx.append(AssemblyItem::PushSubSize(sub));
            let ptr = ctx.let_(call(allocate, [slot(base)]))?;
            ctx.append(AssemblyItem::PushSub(sub));
            let offset = ctx.stack_height() - 1;
            ctx.exec(codecopy(add(slot(ptr), lit(32u32)), slot(offset), slot(base)))?;
            keep_only(ctx, base, &[ptr])
        }
        other => Err(CompilationError::unimplemented(format!("type(C).{other}"), member.base.span)),
    }
}

/// Members of a type name: library functions, functions of a base
/// contract, enum values.
fn compile_static_member(
    compiler: &mut ExprCompiler<'_, '_>,
    inner: &Type,
    member: &MemberExpr<'_>,
    resolved: &Member,
) -> Result<()> {
    let env = compiler.env();
    match (inner, resolved.origin, &resolved.ty) {
        (Type::Enum(_), MemberOrigin::EnumValue(index), _) => {
            compiler.ctx.push(index as u64);
            Ok(())
        }
        (Type::Contract(contract), MemberOrigin::Function(_), Type::Function(function))
            if function.kind == FunctionKind::DelegateCall =>
        {
            let address = compiler.ctx.library_address(contract.id).cloned().ok_or_else(|| {
                CompilationError::unimplemented(
                    format!("call of library {} without a linked address", env.contract(contract.id).name),
                    member.base.span,
                )
            })?;
            compiler.ctx.push(address);
            compiler.ctx.push(function.selector(env));
            Ok(())
        }
        (Type::Contract(_), MemberOrigin::Function(function), _) => {
            let tag = compiler.ctx.function_entry_label(function);
            trace!(function = function.0, %tag, "static function reference");
            compiler.ctx.push_tag(tag);
            Ok(())
        }
        // nested struct and enum names
        _ => Ok(()),
    }
}

/// `array.length` and `bytesN.length`.
fn compile_length(compiler: &mut ExprCompiler<'_, '_>, member: &MemberExpr<'_>, base_ty: &Type) -> Result<()> {
    let base = compiler.ctx.stack_height();
    compiler.compile(member.base)?;
    let ctx = &mut *compiler.ctx;
    let length = match base_ty {
        Type::FixedBytes(n) => ctx.let_(lit(*n))?,
        Type::Array(array) => match array.location {
            DataLocation::Storage => {
                let helper = array_length(ctx, base_ty)?;
                ctx.call_with(helper, [slot(base)], 1)?[0]
            }
            DataLocation::Memory => ctx.let_(memory_array_length(array, slot(base)))?,
            DataLocation::CallData => match &array.length {
                Some(length) => ctx.let_(lit(length.clone()))?,
                None => base + 1,
            },
        },
        _ => return Err(CompilationError::internal("length of a non-array")),
    };
    keep_only(ctx, base, &[length])
}

/// Field `index` of a struct.
fn compile_struct_field(
    compiler: &mut ExprCompiler<'_, '_>,
    member: &MemberExpr<'_>,
    id: quill_core::StructId,
    location: DataLocation,
    index: usize,
    field: &Type,
    want_lvalue: bool,
) -> Result<()> {
    let env = compiler.env();
    compiler.compile(member.base)?;
    let base = compiler.ctx.stack_height() - 1;
    // outside storage, fields that only live in storage take no space
    let preceding: Vec<Type> = env
        .struct_def(id)
        .members
        .iter()
        .take(index)
        .filter(|m| m.ty.can_live_outside_storage(env))
        .map(|m| m.ty.with_location_if_reference(location))
        .collect();
    match location {
        DataLocation::Storage => {
            let layout = env.struct_layout(id)?;
            let (slot_offset, byte_offset) = layout
                .offset(index)
                .ok_or_else(|| CompilationError::internal(format!("struct field {index} out of range")))?;
            let ctx = &mut *compiler.ctx;
            let field_slot = ctx.let_(add(slot(base), lit(slot_offset.clone())))?;
            let field_offset = ctx.let_(lit(byte_offset))?;
            keep_only(ctx, base, &[field_slot, field_offset])?;
            compiler.set_location(storage_item(field), want_lvalue)
        }
        DataLocation::Memory => {
            let ctx = &mut *compiler.ctx;
            let address = ctx.let_(add(slot(base), lit(32 * preceding.len() as u64)))?;
            keep_only(ctx, base, &[address])?;
            compiler.set_location(LValue::Memory { ty: field.clone() }, want_lvalue)
        }
        DataLocation::CallData => {
            if !field.is_value_type() {
                return Err(CompilationError::unimplemented(
                    "reference type fields of calldata structs",
                    member.base.span,
                ));
            }
            let offset: u64 = preceding.iter().map(|ty| ty.calldata_encoded_size(env, true)).sum();
            let ctx = &mut *compiler.ctx;
            let value = ctx.let_(cleanup(env, field, calldataload(add(slot(base), lit(offset)))))?;
            keep_only(ctx, base, &[value])
        }
    }
}

/// `f.selector`, `f.address` and the option setters.
fn compile_function_member(
    compiler: &mut ExprCompiler<'_, '_>,
    member: &MemberExpr<'_>,
    function: &FunctionType,
) -> Result<()> {
    let base = compiler.ctx.stack_height();
    compiler.compile(member.base)?;
    let ctx = &mut *compiler.ctx;
    match (function.kind, member.name) {
        (FunctionKind::External, "selector") => {
            let selector = ctx.let_(shl(lit(224u32), slot(base + 1)))?;
            keep_only(ctx, base, &[selector])
        }
        (FunctionKind::External, "address") => keep_only(ctx, base, &[base]),
        // `gas`, `value`, `salt`: the setter call inserts the option
        _ => Ok(()),
    }
}

/// `receiver.f` for a library function attached with `using L for T`: the
/// function words followed by the receiver converted to the first
/// parameter.
fn compile_bound_function(
    compiler: &mut ExprCompiler<'_, '_>,
    member: &MemberExpr<'_>,
    function: &FunctionType,
    resolved: &Member,
) -> Result<()> {
    let env = compiler.env();
    let MemberOrigin::Function(id) = resolved.origin else {
        return Err(CompilationError::internal("bound member without a function"));
    };
    let receiver = function
        .params
        .first()
        .ok_or_else(|| CompilationError::internal("bound function without a receiver"))?;
    compiler.compile_to(member.base, receiver)?;
    let receiver_size = receiver.size_on_stack(env);
    let ctx = &mut *compiler.ctx;
    match function.kind {
        FunctionKind::DelegateCall => {
            let library = env
                .function(id)
                .contract
                .ok_or_else(|| CompilationError::internal("bound function outside of a library"))?;
            let address = ctx.library_address(library).cloned().ok_or_else(|| {
                CompilationError::unimplemented(
                    format!("call of library {} without a linked address", env.contract(library).name),
                    member.base.span,
                )
            })?;
            ctx.push(address);
            ctx.rotate_down(receiver_size)?;
            ctx.push(function.selector(env));
            ctx.rotate_down(receiver_size)
        }
        _ => {
            let target = resolve_virtual(env, ctx.scope(), id);
            let tag = ctx.function_entry_label(target);
            ctx.push_tag(tag);
            ctx.rotate_down(receiver_size)
        }
    }
}
