//! Conversions between types and data locations.
//!
//! Copies into memory produce fresh objects. Copies into storage always go
//! through a memory copy of the source first, so assigning a storage value
//! to an overlapping storage location reads everything before writing.

use quill_core::num::left_aligned;
use quill_core::types::ArrayType;
use quill_core::{CompilationError, DataLocation, Span, Type};

use super::abi::{abi_decode, abi_encode, in_memory, struct_members};
use super::abort::panic_code::ENUM_CONVERSION;
use super::code::*;
use super::math::{cleanup, left_mask};
use super::memory::{
    allocate_memory_array, allocate_memory_struct, copy_literal_to_memory, memory_array_data,
    memory_array_length, read_from_memory, write_to_memory,
};
use super::storage::{
    array_dataslot, array_length, clear_storage_array, read_from_storage, storage_array_index_access,
    update_storage_value,
};
use crate::asm::Tag;
use crate::context::CompilerContext;

type Result<T> = std::result::Result<T, CompilationError>;

// ============================================================================
// Into Memory
// ============================================================================

/// Helper copying a storage or calldata array or struct into a fresh memory
/// object: `(value...) -> memPtr`.
pub fn convert_to_memory(ctx: &mut CompilerContext<'_>, from: &Type) -> Result<Tag> {
    let env = ctx.env();
    let to = in_memory(from);
    let name = match from {
        Type::Array(_) => format!("copy_array_to_memory_{}", from.identifier(env)),
        _ => format!("convert_{}_to_{}", from.identifier(env), to.identifier(env)),
    };
    if let Some(tag) = ctx.helpers().tag_of(&name) {
        return Ok(tag);
    }
    match (from, from.data_location()) {
        (Type::Array(array), Some(DataLocation::Storage)) => storage_array_to_memory(ctx, &name, from, array),
        (Type::Struct(_), Some(DataLocation::Storage)) => storage_struct_to_memory(ctx, &name, from),
        (Type::Array(array), Some(DataLocation::CallData)) => {
            let decode = abi_decode(ctx, &to, false)?;
            if array.is_dynamically_sized() {
                ctx.helper(&name, 2, 1, move |ctx| {
                    let position = 1;
                    let result = ctx.let_(call(decode, [sub(slot(position), lit(32u32)), calldatasize()]))?;
                    ctx.helper_return(&[result])
                })
            } else {
                ctx.helper(&name, 1, 1, move |ctx| {
                    let result = ctx.let_(call(decode, [slot(1), calldatasize()]))?;
                    ctx.helper_return(&[result])
                })
            }
        }
        (Type::Struct(_), Some(DataLocation::CallData)) => {
            let decode = abi_decode(ctx, &to, false)?;
            ctx.helper(&name, 1, 1, move |ctx| {
                let result = ctx.let_(call(decode, [slot(1), calldatasize()]))?;
                ctx.helper_return(&[result])
            })
        }
        _ => Err(CompilationError::internal(format!(
            "no memory copy of {}",
            from.name(env)
        ))),
    }
}

fn storage_array_to_memory(
    ctx: &mut CompilerContext<'_>,
    name: &str,
    from: &Type,
    array: &ArrayType,
) -> Result<Tag> {
    let to = in_memory(from);
    let allocate = allocate_memory_array(ctx, &to)?;
    let length_of = array_length(ctx, from)?;
    if array.is_byte_array() {
        let encode = abi_encode(ctx, from, &to)?;
        return ctx.helper(name, 1, 1, move |ctx| {
            let base = 1;
            let result = ctx.let_(call(allocate, [call(length_of, [slot(base)])]))?;
            ctx.exec(call(encode, [slot(base), slot(result)]))?;
            ctx.helper_return(&[result])
        });
    }
    let access = storage_array_index_access(ctx, from)?;
    let element = if array.base.is_value_type() {
        Element::Value(read_from_storage(ctx, &array.base)?)
    } else {
        Element::Reference(convert_to_memory(ctx, &array.base)?)
    };
    let to_array = to
        .as_array()
        .ok_or_else(|| CompilationError::internal("array converted to a non-array"))?
        .clone();
    let base_type = (*array.base).clone();
    ctx.helper(name, 1, 1, move |ctx| {
        let base = 1;
        let length = ctx.let_(call(length_of, [slot(base)]))?;
        let result = ctx.let_(call(allocate, [slot(length)]))?;
        let i = ctx.let_(lit(0u32))?;
        ctx.while_(lt(slot(i), slot(length)), |ctx| {
            let location = ctx.call_with(access, [slot(base), slot(i)], 2)?;
            let value = match element {
                Element::Value(read) => call(read, [slot(location[0]), slot(location[1])]),
                Element::Reference(convert) => call(convert, [slot(location[0])]),
            };
            let addr = add(memory_array_data(&to_array, slot(result)), mul(slot(i), lit(32u32)));
            let store = write_to_memory(ctx, &base_type, addr, value);
            ctx.exec(store)?;
            ctx.assign(i, add(slot(i), lit(1u32)))
        })?;
        ctx.helper_return(&[result])
    })
}

#[derive(Clone, Copy)]
enum Element {
    Value(Tag),
    Reference(Tag),
}

fn storage_struct_to_memory(ctx: &mut CompilerContext<'_>, name: &str, from: &Type) -> Result<Tag> {
    let env = ctx.env();
    let to = in_memory(from);
    let allocate = allocate_memory_struct(ctx, &to)?;
    let members = struct_members(env, from)?;
    let mut elements = Vec::with_capacity(members.len());
    for member in &members {
        elements.push(if member.from.is_value_type() {
            Element::Value(read_from_storage(ctx, &member.from)?)
        } else {
            Element::Reference(convert_to_memory(ctx, &member.from)?)
        });
    }
    ctx.helper(name, 1, 1, move |ctx| {
        let base = 1;
        let result = ctx.let_(call(allocate, []))?;
        for (member, element) in members.iter().zip(&elements) {
            let member_slot = add(slot(base), lit(member.slot.clone()));
            let value = match element {
                Element::Value(read) => call(*read, [member_slot, lit(member.offset)]),
                Element::Reference(convert) => call(*convert, [member_slot]),
            };
            ctx.exec(mstore(add(slot(result), lit(member.head)), value))?;
        }
        ctx.helper_return(&[result])
    })
}

// ============================================================================
// Into Storage
// ============================================================================

/// `copy_<from>_to_<to>(value..., slot)`: overwrite the storage array or
/// struct at `slot` with a copy of the value.
pub fn copy_to_storage(ctx: &mut CompilerContext<'_>, from: &Type, to: &Type) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("copy_{}_to_{}", from.identifier(env), to.identifier(env));
    if let Some(tag) = ctx.helpers().tag_of(&name) {
        return Ok(tag);
    }
    if let Type::StringLiteral(bytes) = from {
        let literal = copy_literal_to_memory(ctx, bytes)?;
        let copy = copy_to_storage(ctx, &Type::bytes(DataLocation::Memory), to)?;
        return ctx.helper(&name, 1, 0, move |ctx| {
            ctx.call_with(copy, [call(literal, []), slot(1)], 0)?;
            ctx.helper_return(&[])
        });
    }
    match from.data_location() {
        Some(DataLocation::Memory) => {}
        Some(DataLocation::Storage | DataLocation::CallData) => {
            let convert = convert_to_memory(ctx, from)?;
            let copy = copy_to_storage(ctx, &in_memory(from), to)?;
            let size = from.size_on_stack(env);
            return ctx.helper(&name, size + 1, 0, move |ctx| {
                let copied = ctx.let_(call(convert, (1..=size).map(slot)))?;
                ctx.call_with(copy, [slot(copied), slot(size + 1)], 0)?;
                ctx.helper_return(&[])
            });
        }
        None => {
            return Err(CompilationError::internal(format!(
                "{} is not copied into storage",
                from.name(env)
            )));
        }
    }
    match (from, to) {
        (Type::Array(source), Type::Array(target)) if source.is_byte_array() => {
            memory_bytes_to_storage(ctx, &name, to, target)
        }
        (Type::Array(source), Type::Array(target)) => memory_array_to_storage(ctx, &name, to, source, target),
        (Type::Struct(_), Type::Struct(_)) => memory_struct_to_storage(ctx, &name, to),
        _ => Err(CompilationError::internal(format!(
            "cannot copy {} to {}",
            from.name(env),
            to.name(env)
        ))),
    }
}

fn memory_bytes_to_storage(ctx: &mut CompilerContext<'_>, name: &str, to: &Type, target: &ArrayType) -> Result<Tag> {
    if !target.is_byte_array() {
        return Err(CompilationError::internal("bytes copied into a non-byte array"));
    }
    let clear = clear_storage_array(ctx, to)?;
    let dataslot = array_dataslot(ctx, to)?;
    ctx.helper(name, 2, 0, move |ctx| {
        let (value, base) = (1, 2);
        ctx.call_with(clear, [slot(base)], 0)?;
        let length = ctx.let_(mload(slot(value)))?;
        let src = ctx.let_(add(slot(value), lit(32u32)))?;
        ctx.if_else(
            lt(slot(length), lit(32u32)),
            |ctx| {
                let kept = not(shr(mul(slot(length), lit(8u32)), not(lit(0u32))));
                ctx.exec(sstore(
                    slot(base),
                    or(and(mload(slot(src)), kept), mul(slot(length), lit(2u32))),
                ))
            },
            |ctx| {
                ctx.exec(sstore(slot(base), add(mul(slot(length), lit(2u32)), lit(1u32))))?;
                let data = ctx.let_(call(dataslot, [slot(base)]))?;
                let full = ctx.let_(and(slot(length), not(lit(31u32))))?;
                let i = ctx.let_(lit(0u32))?;
                ctx.while_(lt(slot(i), slot(full)), |ctx| {
                    ctx.exec(sstore(
                        add(slot(data), div(slot(i), lit(32u32))),
                        mload(add(slot(src), slot(i))),
                    ))?;
                    ctx.assign(i, add(slot(i), lit(32u32)))
                })?;
                ctx.if_(lt(slot(full), slot(length)), |ctx| {
                    let rest = mul(and(slot(length), lit(31u32)), lit(8u32));
                    ctx.exec(sstore(
                        add(slot(data), div(slot(full), lit(32u32))),
                        and(mload(add(slot(src), slot(full))), not(shr(rest, not(lit(0u32))))),
                    ))
                })
            },
        )?;
        ctx.helper_return(&[])
    })
}

fn memory_array_to_storage(
    ctx: &mut CompilerContext<'_>,
    name: &str,
    to: &Type,
    source: &ArrayType,
    target: &ArrayType,
) -> Result<Tag> {
    let clear = clear_storage_array(ctx, to)?;
    let access = storage_array_index_access(ctx, to)?;
    let element = if target.base.is_value_type() {
        Element::Value(update_storage_value(ctx, &target.base)?)
    } else {
        Element::Reference(copy_to_storage(ctx, &source.base, &target.base)?)
    };
    let dynamic = target.is_dynamically_sized();
    let source = source.clone();
    ctx.helper(name, 2, 0, move |ctx| {
        let (value, base) = (1, 2);
        ctx.call_with(clear, [slot(base)], 0)?;
        let length = ctx.let_(memory_array_length(&source, slot(value)))?;
        if dynamic {
            ctx.exec(sstore(slot(base), slot(length)))?;
        }
        let i = ctx.let_(lit(0u32))?;
        ctx.while_(lt(slot(i), slot(length)), |ctx| {
            let addr = add(memory_array_data(&source, slot(value)), mul(slot(i), lit(32u32)));
            let element_value = read_from_memory(ctx, &source.base, addr);
            let location = ctx.call_with(access, [slot(base), slot(i)], 2)?;
            match element {
                Element::Value(update) => {
                    ctx.call_with(update, [element_value, slot(location[0]), slot(location[1])], 0)?
                }
                Element::Reference(copy) => ctx.call_with(copy, [element_value, slot(location[0])], 0)?,
            };
            ctx.assign(i, add(slot(i), lit(1u32)))
        })?;
        ctx.helper_return(&[])
    })
}

fn memory_struct_to_storage(ctx: &mut CompilerContext<'_>, name: &str, to: &Type) -> Result<Tag> {
    let members = struct_members(ctx.env(), to)?;
    let mut elements = Vec::with_capacity(members.len());
    for member in &members {
        elements.push(if member.from.is_value_type() {
            Element::Value(update_storage_value(ctx, &member.from)?)
        } else {
            Element::Reference(copy_to_storage(ctx, &member.to, &member.from)?)
        });
    }
    ctx.helper(name, 2, 0, move |ctx| {
        let (value, base) = (1, 2);
        for (member, element) in members.iter().zip(&elements) {
            let member_value = read_from_memory(ctx, &member.to, add(slot(value), lit(member.head)));
            let member_slot = add(slot(base), lit(member.slot.clone()));
            match element {
                Element::Value(update) => {
                    ctx.call_with(*update, [member_value, member_slot, lit(member.offset)], 0)?
                }
                Element::Reference(copy) => ctx.call_with(*copy, [member_value, member_slot], 0)?,
            };
        }
        ctx.helper_return(&[])
    })
}

// ============================================================================
// On the Stack
// ============================================================================

fn replace_top(ctx: &mut CompilerContext<'_>, convert: impl FnOnce(Word) -> Word) -> Result<()> {
    let top = ctx
        .stack_height()
        .checked_sub(1)
        .ok_or_else(|| CompilationError::internal("conversion of an empty stack"))?;
    ctx.assign(top, convert(slot(top)))
}

/// Convert the value of type `from` on top of the stack to type `to`, in
/// place. The conversion is assumed to have been allowed by the type checker.
pub fn convert_type(ctx: &mut CompilerContext<'_>, from: &Type, to: &Type) -> Result<()> {
    if from == to {
        return Ok(());
    }
    let env = ctx.env();
    match (from, to) {
        (Type::RationalNumber(_), Type::FixedBytes(n)) => {
            replace_top(ctx, |v| shl(lit(256 - u32::from(*n) * 8), v))
        }
        (Type::RationalNumber(_), Type::Enum(_)) => check_enum(ctx, to),
        (Type::RationalNumber(_), _) => Ok(()),
        (Type::StringLiteral(bytes), Type::FixedBytes(_)) => {
            ctx.push(left_aligned(bytes));
            Ok(())
        }
        (Type::StringLiteral(bytes), Type::Array(_)) => {
            let copy = copy_literal_to_memory(ctx, bytes)?;
            ctx.call_helper(copy, 0, 1)
        }
        (Type::Integer(_), Type::FixedBytes(n)) | (Type::Address { .. }, Type::FixedBytes(n)) => {
            let bits = from.value_bits(env).unwrap_or(256);
            replace_top(ctx, |v| shl(lit(256 - bits), v))?;
            if u32::from(*n) * 8 < bits {
                replace_top(ctx, |v| and(v, lit(left_mask(u32::from(*n) * 8))))?;
            }
            Ok(())
        }
        (Type::FixedBytes(n), Type::Integer(_) | Type::Address { .. }) => {
            replace_top(ctx, |v| cleanup(env, to, shr(lit(256 - u32::from(*n) * 8), v)))
        }
        (Type::FixedBytes(a), Type::FixedBytes(b)) if b < a => {
            replace_top(ctx, |v| and(v, lit(left_mask(u32::from(*b) * 8))))
        }
        (Type::FixedBytes(_), Type::FixedBytes(_)) => Ok(()),
        (Type::Integer(_) | Type::Enum(_), Type::Enum(_)) => check_enum(ctx, to),
        (
            Type::Integer(_) | Type::Address { .. } | Type::Contract(_) | Type::Enum(_),
            Type::Integer(_) | Type::Address { .. } | Type::Contract(_),
        ) => replace_top(ctx, |v| cleanup(env, to, v)),
        (Type::Bool, Type::Bool) => Ok(()),
        (Type::Array(_) | Type::Struct(_), Type::Array(_) | Type::Struct(_)) => convert_reference(ctx, from, to),
        (Type::Tuple(from_components), Type::Tuple(to_components)) => {
            convert_tuple(ctx, from_components, to_components)
        }
        (Type::Function(_), Type::Function(_)) => Ok(()),
        _ => Err(CompilationError::unimplemented(
            format!("conversion from {} to {}", from.name(env), to.name(env)),
            Span::default(),
        )),
    }
}

fn check_enum(ctx: &mut CompilerContext<'_>, to: &Type) -> Result<()> {
    let Type::Enum(id) = to else {
        return Err(CompilationError::internal("enum check on a non-enum"));
    };
    let count = ctx.env().enum_def(*id).values.len() as u64;
    let top = ctx.stack_height() - 1;
    ctx.panic_if(iszero(lt(slot(top), lit(count))), ENUM_CONVERSION)
}

fn convert_reference(ctx: &mut CompilerContext<'_>, from: &Type, to: &Type) -> Result<()> {
    let env = ctx.env();
    match (from.data_location(), to.data_location()) {
        (Some(source), Some(target)) if source == target => Ok(()),
        (Some(DataLocation::Storage | DataLocation::CallData), Some(DataLocation::Memory)) => {
            let convert = convert_to_memory(ctx, from)?;
            ctx.call_helper(convert, from.size_on_stack(env), 1)
        }
        _ => Err(CompilationError::unimplemented(
            format!("conversion from {} to {}", from.name(env), to.name(env)),
            Span::default(),
        )),
    }
}

/// Convert each component of the tuple on top of the stack: copy it up,
/// convert the copy, then drop the originals.
fn convert_tuple(ctx: &mut CompilerContext<'_>, from: &[Option<Type>], to: &[Option<Type>]) -> Result<()> {
    if from.len() != to.len() {
        return Err(CompilationError::internal("tuple conversion between different arities"));
    }
    let env = ctx.env();
    let sizes: Vec<usize> = from
        .iter()
        .map(|component| component.as_ref().map_or(0, |ty| ty.size_on_stack(env)))
        .collect();
    let total: usize = sizes.iter().sum();
    let base = ctx
        .stack_height()
        .checked_sub(total)
        .ok_or_else(|| CompilationError::internal("tuple conversion below the frame"))?;
    let mut offset = base;
    let mut converted = 0;
    for ((source, target), size) in from.iter().zip(to).zip(&sizes) {
        if let (Some(source), Some(target)) = (source, target) {
            for word in 0..*size {
                ctx.dup_slot(offset + word)?;
            }
            convert_type(ctx, source, target)?;
            converted += target.size_on_stack(env);
        }
        offset += size;
    }
    let mut layout = vec![None; total];
    layout.extend((0..converted).map(Some));
    ctx.shuffle(layout)
}
