//! ABI encoding and decoding helpers.
//!
//! Encoders take the values to encode followed by the write position and
//! return the end of what they wrote. Dynamically encoded values are written
//! as an offset in the head and their contents in the tail. Decoders take a
//! source position and the end of the data and revert on malformed input
//! rather than panicking.

use num_bigint::BigUint;
use quill_core::num::{left_aligned, low_mask, padded_len};
use quill_core::types::ArrayType;
use quill_core::{CompilationError, DataLocation, FunctionKind, Span, Type, TypeEnv};

use super::code::*;
use super::math::cleanup;
use super::memory::{
    allocate_memory_array, allocate_memory_struct, copy_memory_to_memory, memory_array_data,
    memory_array_length, read_from_memory, round_up_to_mul_of_32,
};
use super::storage::{
    array_dataslot, array_length, extract_byte_array_length, read_from_storage,
    storage_array_index_access,
};
use crate::asm::Tag;
use crate::context::CompilerContext;

type Result<T> = std::result::Result<T, CompilationError>;

fn type_list(env: &TypeEnv, types: &[Type]) -> String {
    types
        .iter()
        .map(|ty| ty.identifier(env))
        .collect::<Vec<_>>()
        .join("_")
}

fn unimplemented(feature: &str) -> CompilationError {
    CompilationError::unimplemented(feature, Span::default())
}

/// `ty` as a memory pointer when it is a reference type.
pub(crate) fn in_memory(ty: &Type) -> Type {
    if ty.is_reference_type() {
        ty.with_location(DataLocation::Memory, true)
    } else {
        ty.clone()
    }
}

/// Largest offset or length accepted in encoded data.
fn max_offset() -> BigUint {
    low_mask(64)
}

// ============================================================================
// Encoding
// ============================================================================

/// `abi_encode_tuple_<from>_<to>(values..., headStart) -> tail`.
pub fn abi_encode_tuple(ctx: &mut CompilerContext<'_>, from: &[Type], to: &[Type]) -> Result<Tag> {
    if from.len() != to.len() {
        return Err(CompilationError::internal("encoding between tuples of different length"));
    }
    let env = ctx.env();
    let name = format!("abi_encode_tuple_{}_{}", type_list(env, from), type_list(env, to));
    let encoders = from
        .iter()
        .zip(to)
        .map(|(from, to)| abi_encode(ctx, from, to))
        .collect::<Result<Vec<_>>>()?;
    let sizes: Vec<usize> = from.iter().map(|ty| ty.size_on_stack(env)).collect();
    let params = sizes.iter().sum::<usize>() + 1;
    let to = to.to_vec();
    ctx.helper(&name, params, 1, move |ctx| {
        let head_start = params;
        let head_size: u64 = to.iter().map(|ty| ty.calldata_encoded_size(env, true)).sum();
        let tail = ctx.let_(add(slot(head_start), lit(head_size)))?;
        let mut first = 1;
        let mut head = 0u64;
        for ((encoder, size), to) in encoders.iter().zip(&sizes).zip(&to) {
            let mut args: Vec<Word> = (first..first + size).map(slot).collect();
            let head_pos = add(slot(head_start), lit(head));
            if to.is_dynamically_encoded(env) {
                ctx.exec(mstore(head_pos, sub(slot(tail), slot(head_start))))?;
                args.push(slot(tail));
                ctx.assign(tail, call(*encoder, args))?;
            } else {
                args.push(head_pos);
                ctx.exec(call(*encoder, args))?;
            }
            first += size;
            head += to.calldata_encoded_size(env, true);
        }
        ctx.helper_return(&[tail])
    })
}

/// `abi_encode_<from>_to_<to>(value..., pos) -> end`.
pub fn abi_encode(ctx: &mut CompilerContext<'_>, from: &Type, to: &Type) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("abi_encode_{}_to_{}", from.identifier(env), to.identifier(env));
    if let Some(tag) = ctx.helpers().tag_of(&name) {
        return Ok(tag);
    }
    match from {
        Type::StringLiteral(bytes) => encode_literal(ctx, &name, bytes, to),
        Type::Array(array) if array.is_byte_array() => encode_byte_array(ctx, &name, from, array),
        Type::Array(array) => encode_array(ctx, &name, from, array, to),
        Type::Struct(_) => encode_struct(ctx, &name, from),
        Type::Function(f) if f.kind == FunctionKind::External => Err(unimplemented("ABI encoding of external function values")),
        Type::Address { .. }
        | Type::Integer(_)
        | Type::RationalNumber(_)
        | Type::Bool
        | Type::FixedBytes(_)
        | Type::Enum(_)
        | Type::Contract(_) => {
            let from = from.clone();
            ctx.helper(&name, 2, 1, move |ctx| {
                let (value, pos) = (1, 2);
                ctx.exec(mstore(slot(pos), cleanup(env, &from, slot(value))))?;
                let end = ctx.let_(add(slot(pos), lit(32u32)))?;
                ctx.helper_return(&[end])
            })
        }
        _ => Err(CompilationError::internal(format!("type {} cannot be ABI-encoded", from.name(env)))),
    }
}

fn encode_literal(ctx: &mut CompilerContext<'_>, name: &str, bytes: &[u8], to: &Type) -> Result<Tag> {
    let bytes = bytes.to_vec();
    let fixed = matches!(to, Type::FixedBytes(_));
    ctx.helper(name, 1, 1, move |ctx| {
        let pos = 1;
        if fixed {
            ctx.exec(mstore(slot(pos), lit(left_aligned(&bytes))))?;
            let end = ctx.let_(add(slot(pos), lit(32u32)))?;
            return ctx.helper_return(&[end]);
        }
        ctx.exec(mstore(slot(pos), lit(bytes.len() as u64)))?;
        for (index, chunk) in bytes.chunks(32).enumerate() {
            let offset = 32 + 32 * index as u64;
            ctx.exec(mstore(add(slot(pos), lit(offset)), lit(left_aligned(chunk))))?;
        }
        let end = ctx.let_(add(slot(pos), lit(32 + padded_len(bytes.len()) as u64)))?;
        ctx.helper_return(&[end])
    })
}

fn encode_byte_array(ctx: &mut CompilerContext<'_>, name: &str, from: &Type, array: &ArrayType) -> Result<Tag> {
    match array.location {
        DataLocation::Memory => {
            let copy = copy_memory_to_memory(ctx)?;
            ctx.helper(name, 2, 1, move |ctx| {
                let (value, pos) = (1, 2);
                let length = ctx.let_(mload(slot(value)))?;
                ctx.exec(mstore(slot(pos), slot(length)))?;
                ctx.call_with(
                    copy,
                    [add(slot(value), lit(32u32)), add(slot(pos), lit(32u32)), slot(length)],
                    0,
                )?;
                let end = ctx.let_(add(add(slot(pos), lit(32u32)), round_up_to_mul_of_32(slot(length))))?;
                ctx.helper_return(&[end])
            })
        }
        DataLocation::CallData => ctx.helper(name, 3, 1, |ctx| {
            let (offset, length, pos) = (1, 2, 3);
            ctx.exec(mstore(slot(pos), slot(length)))?;
            let data = ctx.let_(add(slot(pos), lit(32u32)))?;
            ctx.exec(calldatacopy(slot(data), slot(offset), slot(length)))?;
            ctx.exec(mstore(add(slot(data), slot(length)), lit(0u32)))?;
            let end = ctx.let_(add(slot(data), round_up_to_mul_of_32(slot(length))))?;
            ctx.helper_return(&[end])
        }),
        DataLocation::Storage => {
            let extract = extract_byte_array_length(ctx)?;
            let dataslot = array_dataslot(ctx, from)?;
            ctx.helper(name, 2, 1, move |ctx| {
                let (value, pos) = (1, 2);
                let data = ctx.let_(sload(slot(value)))?;
                let length = ctx.let_(call(extract, [slot(data)]))?;
                ctx.exec(mstore(slot(pos), slot(length)))?;
                let start = ctx.let_(add(slot(pos), lit(32u32)))?;
                ctx.if_else(
                    and(slot(data), lit(1u32)),
                    |ctx| {
                        let source = ctx.let_(call(dataslot, [slot(value)]))?;
                        let i = ctx.let_(lit(0u32))?;
                        ctx.while_(lt(slot(i), slot(length)), |ctx| {
                            ctx.exec(mstore(add(slot(start), slot(i)), sload(slot(source))))?;
                            ctx.assign(source, add(slot(source), lit(1u32)))?;
                            ctx.assign(i, add(slot(i), lit(32u32)))
                        })
                    },
                    |ctx| ctx.exec(mstore(slot(start), and(slot(data), not(lit(0xffu32))))),
                )?;
                let end = ctx.let_(add(slot(start), round_up_to_mul_of_32(slot(length))))?;
                ctx.helper_return(&[end])
            })
        }
    }
}

/// How the elements of an encoded array are reached.
enum ElementSource {
    Memory(ArrayType),
    Storage { access: Tag, read: Option<Tag> },
    CallData(Type),
}

impl ElementSource {
    /// Words of element `index` of the array whose reference is at `value`.
    fn element(&self, ctx: &mut CompilerContext<'_>, value: usize, index: usize) -> Result<Vec<Word>> {
        match self {
            ElementSource::Memory(array) => {
                let addr = add(memory_array_data(array, slot(value)), mul(slot(index), lit(32u32)));
                Ok(vec![read_from_memory(ctx, &array.base, addr)])
            }
            ElementSource::Storage { access, read } => {
                let location = ctx.call_with(*access, [slot(value), slot(index)], 2)?;
                Ok(vec![match read {
                    Some(read) => call(*read, [slot(location[0]), slot(location[1])]),
                    None => slot(location[0]),
                }])
            }
            ElementSource::CallData(base) => {
                let addr = add(slot(value), mul(slot(index), lit(32u32)));
                Ok(vec![cleanup(ctx.env(), base, calldataload(addr))])
            }
        }
    }
}

/// Element access for an array in any location, plus the storage length
/// helper when the array lives in storage.
fn element_source(ctx: &mut CompilerContext<'_>, from: &Type, array: &ArrayType) -> Result<(ElementSource, Option<Tag>)> {
    Ok(match array.location {
        DataLocation::Memory => (ElementSource::Memory(array.clone()), None),
        DataLocation::Storage => {
            let access = storage_array_index_access(ctx, from)?;
            let read = if array.base.is_value_type() {
                Some(read_from_storage(ctx, &array.base)?)
            } else {
                None
            };
            (ElementSource::Storage { access, read }, Some(array_length(ctx, from)?))
        }
        DataLocation::CallData => {
            if !array.base.is_value_type() {
                return Err(unimplemented("ABI encoding of calldata arrays with reference-type elements"));
            }
            (ElementSource::CallData((*array.base).clone()), None)
        }
    })
}

/// Length of the array whose reference starts at slot `value`. Dynamic
/// calldata arrays carry their length in the following slot.
fn array_length_word(array: &ArrayType, length_of: Option<Tag>, value: usize) -> Word {
    match (&array.location, length_of) {
        (DataLocation::Storage, Some(length_of)) => call(length_of, [slot(value)]),
        (DataLocation::CallData, _) if array.is_dynamically_sized() => slot(value + 1),
        _ => memory_array_length(array, slot(value)),
    }
}

fn encode_array(
    ctx: &mut CompilerContext<'_>,
    name: &str,
    from: &Type,
    array: &ArrayType,
    to: &Type,
) -> Result<Tag> {
    let env = ctx.env();
    let to_array = to
        .as_array()
        .ok_or_else(|| CompilationError::internal("array encoded as a non-array type"))?
        .clone();
    let element_encoder = abi_encode(ctx, &array.base, &to_array.base)?;
    let element_dynamic = to_array.base.is_dynamically_encoded(env);
    let stride = to_array.base.calldata_encoded_size(env, true);
    let dynamic = array.is_dynamically_sized();
    let (source, length_of) = element_source(ctx, from, array)?;
    let from_size = from.size_on_stack(env);
    let array = array.clone();
    ctx.helper(name, from_size + 1, 1, move |ctx| {
        let (value, pos) = (1, from_size + 1);
        let length = ctx.let_(array_length_word(&array, length_of, value))?;
        if dynamic {
            ctx.exec(mstore(slot(pos), slot(length)))?;
            ctx.assign(pos, add(slot(pos), lit(32u32)))?;
        }
        let i = ctx.let_(lit(0u32))?;
        if element_dynamic {
            let tail = ctx.let_(add(slot(pos), mul(slot(length), lit(32u32))))?;
            ctx.while_(lt(slot(i), slot(length)), |ctx| {
                ctx.exec(mstore(add(slot(pos), mul(slot(i), lit(32u32))), sub(slot(tail), slot(pos))))?;
                let mut args = source.element(ctx, value, i)?;
                args.push(slot(tail));
                ctx.assign(tail, call(element_encoder, args))?;
                ctx.assign(i, add(slot(i), lit(1u32)))
            })?;
            ctx.helper_return(&[tail])
        } else {
            ctx.while_(lt(slot(i), slot(length)), |ctx| {
                let mut args = source.element(ctx, value, i)?;
                args.push(add(slot(pos), mul(slot(i), lit(stride))));
                ctx.exec(call(element_encoder, args))?;
                ctx.assign(i, add(slot(i), lit(1u32)))
            })?;
            let end = ctx.let_(add(slot(pos), mul(slot(length), lit(stride))))?;
            ctx.helper_return(&[end])
        }
    })
}

/// A struct member as seen by encoders and copies: where it lives relative
/// to the struct reference and its types on both sides.
pub(crate) struct MemberSlot {
    /// Member type in the source location.
    pub from: Type,
    /// Member type in memory.
    pub to: Type,
    /// Slot offset within a storage struct.
    pub slot: BigUint,
    /// Byte offset within that slot.
    pub offset: u8,
    /// Byte offset within a memory or calldata struct.
    pub head: u64,
}

/// Members of a struct that exist outside storage, in declaration order.
pub(crate) fn struct_members(env: &TypeEnv, ty: &Type) -> Result<Vec<MemberSlot>> {
    let Type::Struct(s) = ty else {
        return Err(CompilationError::internal(format!("struct expected, got {ty:?}")));
    };
    if env.is_recursive_struct(s.id) {
        return Err(unimplemented("recursive structs outside storage"));
    }
    let layout = env.struct_layout(s.id)?;
    let mut members = Vec::new();
    let mut memory_head = 0u64;
    let mut calldata_head = 0u64;
    for (index, (_, member)) in env.struct_member_types(s.id, s.location).into_iter().enumerate() {
        if !member.can_live_outside_storage(env) {
            continue;
        }
        let (slot, offset) = layout
            .offset(index)
            .ok_or_else(|| CompilationError::internal("struct member without a storage offset"))?;
        let to = in_memory(&member);
        let head = if s.location == DataLocation::CallData {
            calldata_head
        } else {
            memory_head
        };
        memory_head += to.memory_head_size(env);
        calldata_head += to.calldata_encoded_size(env, true);
        members.push(MemberSlot {
            from: member,
            to,
            slot: slot.clone(),
            offset,
            head,
        });
    }
    Ok(members)
}

/// Value of `member` of the struct referenced by slot `value`: the member
/// itself for value types, a reference to it otherwise.
fn member_word(ctx: &CompilerContext<'_>, location: DataLocation, member: &MemberSlot, read: Option<Tag>, value: usize) -> Word {
    match location {
        DataLocation::Storage => {
            let member_slot = add(slot(value), lit(member.slot.clone()));
            match read {
                Some(read) => call(read, [member_slot, lit(member.offset)]),
                None => member_slot,
            }
        }
        DataLocation::Memory => read_from_memory(ctx, &member.from, add(slot(value), lit(member.head))),
        DataLocation::CallData => {
            let addr = add(slot(value), lit(member.head));
            if member.from.is_value_type() {
                cleanup(ctx.env(), &member.from, calldataload(addr))
            } else {
                addr
            }
        }
    }
}

fn encode_struct(ctx: &mut CompilerContext<'_>, name: &str, from: &Type) -> Result<Tag> {
    let env = ctx.env();
    let location = from.data_location().unwrap_or(DataLocation::Memory);
    if location == DataLocation::CallData && from.is_dynamically_encoded(env) {
        return Err(unimplemented("ABI encoding of dynamically encoded calldata structs"));
    }
    let members = struct_members(env, from)?;
    let mut steps = Vec::with_capacity(members.len());
    for member in &members {
        let encoder = abi_encode(ctx, &member.from, &member.to)?;
        let read = if location == DataLocation::Storage && member.from.is_value_type() {
            Some(read_from_storage(ctx, &member.from)?)
        } else {
            None
        };
        steps.push((encoder, read));
    }
    let head_size: u64 = members.iter().map(|m| m.to.calldata_encoded_size(env, true)).sum();
    ctx.helper(name, 2, 1, move |ctx| {
        let (value, pos) = (1, 2);
        let tail = ctx.let_(add(slot(pos), lit(head_size)))?;
        let mut head = 0u64;
        for (member, (encoder, read)) in members.iter().zip(&steps) {
            let word = member_word(ctx, location, member, *read, value);
            if member.to.is_dynamically_encoded(env) {
                ctx.exec(mstore(add(slot(pos), lit(head)), sub(slot(tail), slot(pos))))?;
                ctx.assign(tail, call(*encoder, [word, slot(tail)]))?;
            } else {
                ctx.exec(call(*encoder, [word, add(slot(pos), lit(head))]))?;
            }
            head += member.to.calldata_encoded_size(env, true);
        }
        ctx.helper_return(&[tail])
    })
}

/// `abi_encode_in_place_<from>(value..., pos) -> end`: the encoding hashed
/// into topics for indexed arrays and structs. Every value takes whole
/// words, arrays carry no length and nested dynamic values are written
/// where they occur instead of behind an offset.
pub fn abi_encode_in_place(ctx: &mut CompilerContext<'_>, from: &Type) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("abi_encode_in_place_{}", from.identifier(env));
    if let Some(tag) = ctx.helpers().tag_of(&name) {
        return Ok(tag);
    }
    match from {
        Type::Array(array) if array.is_byte_array() => {
            // regular encoding one word early, the length word it overwrites is restored
            let encoder = abi_encode(ctx, from, &in_memory(from))?;
            let size = from.size_on_stack(env);
            ctx.helper(&name, size + 1, 1, move |ctx| {
                let pos = size + 1;
                let length_pos = ctx.let_(sub(slot(pos), lit(32u32)))?;
                let saved = ctx.let_(mload(slot(length_pos)))?;
                let mut args: Vec<Word> = (1..=size).map(slot).collect();
                args.push(slot(length_pos));
                let end = ctx.let_(call(encoder, args))?;
                ctx.exec(mstore(slot(length_pos), slot(saved)))?;
                ctx.helper_return(&[end])
            })
        }
        Type::Array(array) => {
            let element_encoder = abi_encode_in_place(ctx, &array.base)?;
            let (source, length_of) = element_source(ctx, from, array)?;
            let from_size = from.size_on_stack(env);
            let array = array.clone();
            ctx.helper(&name, from_size + 1, 1, move |ctx| {
                let (value, pos) = (1, from_size + 1);
                let length = ctx.let_(array_length_word(&array, length_of, value))?;
                let i = ctx.let_(lit(0u32))?;
                ctx.while_(lt(slot(i), slot(length)), |ctx| {
                    let mut args = source.element(ctx, value, i)?;
                    args.push(slot(pos));
                    ctx.assign(pos, call(element_encoder, args))?;
                    ctx.assign(i, add(slot(i), lit(1u32)))
                })?;
                ctx.helper_return(&[pos])
            })
        }
        Type::Struct(_) => {
            let location = from.data_location().unwrap_or(DataLocation::Memory);
            if location == DataLocation::CallData && from.is_dynamically_encoded(env) {
                return Err(unimplemented("ABI encoding of dynamically encoded calldata structs"));
            }
            let members = struct_members(env, from)?;
            let mut steps = Vec::with_capacity(members.len());
            for member in &members {
                let encoder = abi_encode_in_place(ctx, &member.from)?;
                let read = if location == DataLocation::Storage && member.from.is_value_type() {
                    Some(read_from_storage(ctx, &member.from)?)
                } else {
                    None
                };
                steps.push((encoder, read));
            }
            ctx.helper(&name, 2, 1, move |ctx| {
                let (value, pos) = (1, 2);
                for (member, (encoder, read)) in members.iter().zip(&steps) {
                    let word = member_word(ctx, location, member, *read, value);
                    ctx.assign(pos, call(*encoder, [word, slot(pos)]))?;
                }
                ctx.helper_return(&[pos])
            })
        }
        _ => abi_encode(ctx, from, &in_memory(from)),
    }
}

/// `abi_encode_packed_<from>(values..., pos) -> end`: values without
/// padding, dynamic contents without length.
pub fn abi_encode_packed(ctx: &mut CompilerContext<'_>, from: &[Type]) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("abi_encode_packed_{}", type_list(env, from));
    enum Step {
        Value(Type),
        Literal(Vec<u8>),
        MemoryBytes(Tag),
        CallDataBytes,
        StorageBytes(Tag),
        MemoryArray(ArrayType),
    }
    let mut steps = Vec::with_capacity(from.len());
    for ty in from {
        let step = match ty {
            Type::StringLiteral(bytes) => Step::Literal(bytes.clone()),
            Type::Array(array) if array.is_byte_array() => match array.location {
                DataLocation::Memory => Step::MemoryBytes(copy_memory_to_memory(ctx)?),
                DataLocation::CallData => Step::CallDataBytes,
                DataLocation::Storage => Step::StorageBytes(abi_encode(ctx, ty, &in_memory(ty))?),
            },
            Type::Array(array) if array.location == DataLocation::Memory && array.base.is_value_type() => {
                Step::MemoryArray(array.clone())
            }
            Type::Array(_) | Type::Struct(_) => {
                return Err(unimplemented("packed encoding of arrays outside memory and of structs"));
            }
            Type::Function(f) if f.kind == FunctionKind::External => {
                return Err(unimplemented("packed encoding of external function values"));
            }
            other => Step::Value(other.clone()),
        };
        steps.push(step);
    }
    let params = from.iter().map(|ty| ty.size_on_stack(env)).sum::<usize>() + 1;
    ctx.helper(&name, params, 1, move |ctx| {
        let pos = params;
        let mut first = 1;
        for step in &steps {
            match step {
                Step::Value(ty) => {
                    let bits = ty.value_bits(env).unwrap_or(256);
                    let bytes = if matches!(ty, Type::RationalNumber(_)) { 32 } else { bits / 8 };
                    let word = if ty.is_left_aligned() || bytes == 32 {
                        cleanup(env, ty, slot(first))
                    } else {
                        shl(lit(256 - bytes * 8), cleanup(env, ty, slot(first)))
                    };
                    ctx.exec(mstore(slot(pos), word))?;
                    ctx.assign(pos, add(slot(pos), lit(bytes)))?;
                    first += 1;
                }
                Step::Literal(bytes) => {
                    for (index, chunk) in bytes.chunks(32).enumerate() {
                        ctx.exec(mstore(add(slot(pos), lit(32 * index as u64)), lit(left_aligned(chunk))))?;
                    }
                    ctx.assign(pos, add(slot(pos), lit(bytes.len() as u64)))?;
                }
                Step::MemoryBytes(copy) => {
                    let value = first;
                    ctx.call_with(*copy, [add(slot(value), lit(32u32)), slot(pos), mload(slot(value))], 0)?;
                    ctx.assign(pos, add(slot(pos), mload(slot(value))))?;
                    first += 1;
                }
                Step::CallDataBytes => {
                    let (offset, length) = (first, first + 1);
                    ctx.exec(calldatacopy(slot(pos), slot(offset), slot(length)))?;
                    ctx.assign(pos, add(slot(pos), slot(length)))?;
                    first += 2;
                }
                Step::StorageBytes(encoder) => {
                    // encode with the length word just before `pos`, then restore that word
                    let length_pos = ctx.let_(sub(slot(pos), lit(32u32)))?;
                    let saved = ctx.let_(mload(slot(length_pos)))?;
                    ctx.exec(call(*encoder, [slot(first), slot(length_pos)]))?;
                    let length = ctx.let_(mload(slot(length_pos)))?;
                    ctx.exec(mstore(slot(length_pos), slot(saved)))?;
                    ctx.assign(pos, add(slot(pos), slot(length)))?;
                    ctx.pop(3);
                    first += 1;
                }
                Step::MemoryArray(array) => {
                    let value = first;
                    let length = ctx.let_(memory_array_length(array, slot(value)))?;
                    let i = ctx.let_(lit(0u32))?;
                    ctx.while_(lt(slot(i), slot(length)), |ctx| {
                        let addr = add(memory_array_data(array, slot(value)), mul(slot(i), lit(32u32)));
                        let element = read_from_memory(ctx, &array.base, addr);
                        ctx.exec(mstore(add(slot(pos), mul(slot(i), lit(32u32))), element))?;
                        ctx.assign(i, add(slot(i), lit(1u32)))
                    })?;
                    ctx.assign(pos, add(slot(pos), mul(slot(length), lit(32u32))))?;
                    ctx.pop(2);
                    first += 1;
                }
            }
        }
        ctx.helper_return(&[pos])
    })
}

// ============================================================================
// Decoding
// ============================================================================

fn load(from_memory: bool, at: Word) -> Word {
    if from_memory { mload(at) } else { calldataload(at) }
}

fn source_suffix(from_memory: bool) -> &'static str {
    if from_memory { "_fromMemory" } else { "" }
}

/// `validator_revert_<t>(value)`: revert unless `value` is a clean value of `ty`.
pub fn validator_revert(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("validator_revert_{}", ty.identifier(env));
    let ty = ty.clone();
    ctx.helper(&name, 1, 0, move |ctx| {
        let value = 1;
        match &ty {
            Type::Enum(id) => {
                let count = env.enum_def(*id).values.len() as u64;
                ctx.revert_if(iszero(lt(slot(value), lit(count))))?;
            }
            other => ctx.revert_if(iszero(eq(slot(value), cleanup(env, other, slot(value)))))?,
        }
        ctx.helper_return(&[])
    })
}

/// `abi_decode_tuple_<types>[_fromMemory](headStart, dataEnd) -> values...`.
pub fn abi_decode_tuple(ctx: &mut CompilerContext<'_>, types: &[Type], from_memory: bool) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("abi_decode_tuple_{}{}", type_list(env, types), source_suffix(from_memory));
    let decoders = types
        .iter()
        .map(|ty| abi_decode(ctx, ty, from_memory))
        .collect::<Result<Vec<_>>>()?;
    let sizes: Vec<usize> = types.iter().map(|ty| ty.size_on_stack(env)).collect();
    let returns = sizes.iter().sum();
    let types = types.to_vec();
    ctx.helper(&name, 2, returns, move |ctx| {
        let (start, end) = (1, 2);
        let head_size: u64 = types.iter().map(|ty| ty.calldata_encoded_size(env, true)).sum();
        ctx.revert_if(slt(sub(slot(end), slot(start)), lit(head_size)))?;
        let mut results = Vec::with_capacity(returns);
        let mut head = 0u64;
        for ((ty, decoder), size) in types.iter().zip(&decoders).zip(&sizes) {
            let at = add(slot(start), lit(head));
            let source = if ty.is_dynamically_encoded(env) {
                let offset = ctx.let_(load(from_memory, at))?;
                ctx.revert_if(gt(slot(offset), lit(max_offset())))?;
                add(slot(start), slot(offset))
            } else {
                at
            };
            results.extend(ctx.call_with(*decoder, [source, slot(end)], *size)?);
            head += ty.calldata_encoded_size(env, true);
        }
        ctx.helper_return(&results)
    })
}

/// `abi_decode_<t>[_fromMemory](offset, end) -> value...`.
pub fn abi_decode(ctx: &mut CompilerContext<'_>, ty: &Type, from_memory: bool) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("abi_decode_{}{}", ty.identifier(env), source_suffix(from_memory));
    if let Some(tag) = ctx.helpers().tag_of(&name) {
        return Ok(tag);
    }
    let to_calldata = ty.data_location() == Some(DataLocation::CallData);
    if to_calldata && from_memory {
        return Err(CompilationError::internal("calldata values cannot be decoded from memory"));
    }
    match ty {
        Type::Array(array) if to_calldata => decode_calldata_array(ctx, &name, array),
        Type::Array(array) if array.is_byte_array() => {
            let available = abi_decode_available_length(ctx, ty, from_memory)?;
            ctx.helper(&name, 2, 1, move |ctx| {
                let (offset, end) = (1, 2);
                ctx.revert_if(iszero(slt(add(slot(offset), lit(0x1fu32)), slot(end))))?;
                let length = ctx.let_(load(from_memory, slot(offset)))?;
                let array = ctx.let_(call(
                    available,
                    [add(slot(offset), lit(32u32)), slot(length), slot(end)],
                ))?;
                ctx.helper_return(&[array])
            })
        }
        Type::Array(array) => decode_memory_array(ctx, &name, ty, array, from_memory),
        Type::Struct(_) if to_calldata => {
            if ty.is_dynamically_encoded(env) {
                return Err(unimplemented("dynamically encoded calldata structs"));
            }
            let size = ty.calldata_encoded_size(env, true);
            ctx.helper(&name, 2, 1, move |ctx| {
                let (offset, end) = (1, 2);
                ctx.revert_if(slt(sub(slot(end), slot(offset)), lit(size)))?;
                let result = ctx.let_(slot(offset))?;
                ctx.helper_return(&[result])
            })
        }
        Type::Struct(_) => decode_memory_struct(ctx, &name, ty, from_memory),
        Type::Function(f) if f.kind == FunctionKind::External => Err(unimplemented("ABI decoding of external function values")),
        Type::Address { .. } | Type::Integer(_) | Type::Bool | Type::FixedBytes(_) | Type::Enum(_) | Type::Contract(_) => {
            let validator = validator_revert(ctx, ty)?;
            ctx.helper(&name, 2, 1, move |ctx| {
                let offset = 1;
                let value = ctx.let_(load(from_memory, slot(offset)))?;
                ctx.call_with(validator, [slot(value)], 0)?;
                ctx.helper_return(&[value])
            })
        }
        _ => Err(CompilationError::internal(format!("type {} cannot be ABI-decoded", ty.name(env)))),
    }
}

/// `abi_decode_available_length_<t>[_fromMemory](src, length, end) -> memPtr`
/// for `bytes` and `string`.
pub fn abi_decode_available_length(ctx: &mut CompilerContext<'_>, ty: &Type, from_memory: bool) -> Result<Tag> {
    let memory_type = in_memory(ty);
    let allocate = allocate_memory_array(ctx, &memory_type)?;
    let copy = if from_memory {
        Some(copy_memory_to_memory(ctx)?)
    } else {
        None
    };
    let name = format!(
        "abi_decode_available_length_{}{}",
        memory_type.identifier(ctx.env()),
        source_suffix(from_memory)
    );
    ctx.helper(&name, 3, 1, move |ctx| {
        let (src, length, end) = (1, 2, 3);
        let array = ctx.let_(call(allocate, [slot(length)]))?;
        let data = ctx.let_(add(slot(array), lit(32u32)))?;
        ctx.revert_if(gt(add(slot(src), slot(length)), slot(end)))?;
        match copy {
            Some(copy) => {
                ctx.call_with(copy, [slot(src), slot(data), slot(length)], 0)?;
            }
            None => {
                ctx.exec(calldatacopy(slot(data), slot(src), slot(length)))?;
                ctx.exec(mstore(add(slot(data), slot(length)), lit(0u32)))?;
            }
        }
        ctx.helper_return(&[array])
    })
}

fn decode_calldata_array(ctx: &mut CompilerContext<'_>, name: &str, array: &ArrayType) -> Result<Tag> {
    let env = ctx.env();
    if !array.is_byte_array() && array.base.is_dynamically_encoded(env) {
        return Err(unimplemented("calldata arrays with dynamically encoded elements"));
    }
    let stride = if array.is_byte_array() {
        1
    } else {
        array.base.calldata_encoded_size(env, true)
    };
    if let Some(length) = &array.length {
        let size = length * BigUint::from(stride);
        return ctx.helper(name, 2, 1, move |ctx| {
            let (offset, end) = (1, 2);
            ctx.revert_if(gt(add(slot(offset), lit(size)), slot(end)))?;
            let result = ctx.let_(slot(offset))?;
            ctx.helper_return(&[result])
        });
    }
    ctx.helper(name, 2, 2, move |ctx| {
        let (offset, end) = (1, 2);
        ctx.revert_if(iszero(slt(add(slot(offset), lit(0x1fu32)), slot(end))))?;
        let length = ctx.let_(calldataload(slot(offset)))?;
        ctx.revert_if(gt(slot(length), lit(max_offset())))?;
        let position = ctx.let_(add(slot(offset), lit(32u32)))?;
        ctx.revert_if(gt(add(slot(position), mul(slot(length), lit(stride))), slot(end)))?;
        ctx.helper_return(&[position, length])
    })
}

fn decode_memory_array(
    ctx: &mut CompilerContext<'_>,
    name: &str,
    ty: &Type,
    array: &ArrayType,
    from_memory: bool,
) -> Result<Tag> {
    let env = ctx.env();
    let memory_type = in_memory(ty);
    let allocate = allocate_memory_array(ctx, &memory_type)?;
    let base = in_memory(&array.base);
    let element_decoder = abi_decode(ctx, &base, from_memory)?;
    let element_dynamic = base.is_dynamically_encoded(env);
    let stride = base.calldata_encoded_size(env, true);
    let static_length = array.length.clone();
    ctx.helper(name, 2, 1, move |ctx| {
        let (offset, end) = (1, 2);
        let (length, src) = match &static_length {
            Some(length) => (ctx.let_(lit(length.clone()))?, ctx.let_(slot(offset))?),
            None => {
                ctx.revert_if(iszero(slt(add(slot(offset), lit(0x1fu32)), slot(end))))?;
                let length = ctx.let_(load(from_memory, slot(offset)))?;
                ctx.revert_if(gt(slot(length), lit(max_offset())))?;
                (length, ctx.let_(add(slot(offset), lit(32u32)))?)
            }
        };
        let result = ctx.let_(call(allocate, [slot(length)]))?;
        let dst = ctx.let_(if static_length.is_some() {
            slot(result)
        } else {
            add(slot(result), lit(32u32))
        })?;
        if !element_dynamic {
            ctx.revert_if(gt(add(slot(src), mul(slot(length), lit(stride))), slot(end)))?;
        }
        let i = ctx.let_(lit(0u32))?;
        ctx.while_(lt(slot(i), slot(length)), |ctx| {
            let element = if element_dynamic {
                let element_offset = ctx.let_(load(from_memory, add(slot(src), mul(slot(i), lit(32u32)))))?;
                ctx.revert_if(gt(slot(element_offset), lit(max_offset())))?;
                add(slot(src), slot(element_offset))
            } else {
                add(slot(src), mul(slot(i), lit(stride)))
            };
            ctx.exec(mstore(
                add(slot(dst), mul(slot(i), lit(32u32))),
                call(element_decoder, [element, slot(end)]),
            ))?;
            ctx.assign(i, add(slot(i), lit(1u32)))
        })?;
        ctx.helper_return(&[result])
    })
}

fn decode_memory_struct(ctx: &mut CompilerContext<'_>, name: &str, ty: &Type, from_memory: bool) -> Result<Tag> {
    let env = ctx.env();
    let memory_type = in_memory(ty);
    let allocate = allocate_memory_struct(ctx, &memory_type)?;
    let members = struct_members(env, &memory_type)?;
    let decoders = members
        .iter()
        .map(|member| abi_decode(ctx, &member.to, from_memory))
        .collect::<Result<Vec<_>>>()?;
    let head_size: u64 = members.iter().map(|m| m.to.calldata_encoded_size(env, true)).sum();
    ctx.helper(name, 2, 1, move |ctx| {
        let (offset, end) = (1, 2);
        ctx.revert_if(slt(sub(slot(end), slot(offset)), lit(head_size)))?;
        let result = ctx.let_(call(allocate, []))?;
        let mut head = 0u64;
        for (member, decoder) in members.iter().zip(&decoders) {
            let at = add(slot(offset), lit(head));
            let source = if member.to.is_dynamically_encoded(env) {
                let member_offset = ctx.let_(load(from_memory, at))?;
                ctx.revert_if(gt(slot(member_offset), lit(max_offset())))?;
                add(slot(offset), slot(member_offset))
            } else {
                at
            };
            ctx.exec(mstore(
                add(slot(result), lit(member.head)),
                call(*decoder, [source, slot(end)]),
            ))?;
            head += member.to.calldata_encoded_size(env, true);
        }
        ctx.helper_return(&[result])
    })
}
