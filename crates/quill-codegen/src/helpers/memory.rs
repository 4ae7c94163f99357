//! Memory allocation, zero values and memory array access.
//!
//! Memory objects are referenced by a pointer word. Dynamic arrays start
//! with their length followed by one 32-byte word per element (`bytes` and
//! `string` store raw bytes instead); static arrays and structs have no length
//! word. Reference-typed elements and members hold pointers.

use num_bigint::BigUint;
use num_traits::ToPrimitive;
use quill_core::hash::{keccak256, to_hex};
use quill_core::num::{left_aligned, low_mask};
use quill_core::types::ArrayType;
use quill_core::{CompilationError, DataLocation, Type};

use super::abort::panic_code::{OUT_OF_BOUNDS, RESOURCE};
use super::code::*;
use super::math::cleanup;
use crate::asm::Tag;
use crate::context::{CompilerContext, FREE_MEMORY_POINTER, ZERO_SLOT};

type Result<T> = std::result::Result<T, CompilationError>;

/// `(value + 31) & ~31`.
pub fn round_up_to_mul_of_32(value: Word) -> Word {
    and(add(value, lit(31u32)), not(lit(31u32)))
}

/// Current free memory pointer, without claiming anything.
pub fn allocate_unbounded() -> Word {
    mload(lit(FREE_MEMORY_POINTER))
}

fn array_of(ty: &Type) -> Result<&ArrayType> {
    ty.as_array()
        .ok_or_else(|| CompilationError::internal(format!("array type expected, got {ty:?}")))
}

/// `finalize_allocation(memPtr, size)`: advance the free memory pointer past
/// `size` bytes (rounded up to words) at `memPtr`.
pub fn finalize_allocation(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    ctx.helper("finalize_allocation", 2, 0, |ctx| {
        let (ptr, size) = (1, 2);
        let new_free = ctx.let_(add(slot(ptr), round_up_to_mul_of_32(slot(size))))?;
        ctx.panic_if(
            or(gt(slot(new_free), lit(low_mask(64))), lt(slot(new_free), slot(ptr))),
            RESOURCE,
        )?;
        ctx.exec(mstore(lit(FREE_MEMORY_POINTER), slot(new_free)))?;
        ctx.helper_return(&[])
    })
}

/// `allocate_memory(size) -> memPtr`.
pub fn allocate_memory(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    let finalize = finalize_allocation(ctx)?;
    ctx.helper("allocate_memory", 1, 1, move |ctx| {
        let ptr = ctx.let_(allocate_unbounded())?;
        ctx.call_with(finalize, [slot(ptr), slot(1)], 0)?;
        ctx.helper_return(&[ptr])
    })
}

/// `array_allocation_size_<t>(length) -> size`: bytes a memory array of
/// `length` elements needs, length word included for dynamic arrays.
pub fn array_allocation_size(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let array = array_of(ty)?.clone();
    let env = ctx.env();
    let name = format!("array_allocation_size_{}", ty.identifier(env));
    ctx.helper(&name, 1, 1, move |ctx| {
        let length = 1;
        ctx.panic_if(gt(slot(length), lit(low_mask(64))), RESOURCE)?;
        let size = if array.is_byte_array() {
            ctx.let_(add(round_up_to_mul_of_32(slot(length)), lit(32u32)))?
        } else {
            let data = mul(slot(length), lit(array.base.memory_head_size(env)));
            if array.is_dynamically_sized() {
                ctx.let_(add(data, lit(32u32)))?
            } else {
                ctx.let_(data)?
            }
        };
        ctx.helper_return(&[size])
    })
}

/// `allocate_memory_array_<t>(length) -> memPtr`. Stores the length of
/// dynamic arrays; contents are left as found.
pub fn allocate_memory_array(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let dynamic = array_of(ty)?.is_dynamically_sized();
    let size_of = array_allocation_size(ctx, ty)?;
    let allocate = allocate_memory(ctx)?;
    let name = format!("allocate_memory_array_{}", ty.identifier(ctx.env()));
    ctx.helper(&name, 1, 1, move |ctx| {
        let length = 1;
        let ptr = ctx.let_(call(allocate, [call(size_of, [slot(length)])]))?;
        if dynamic {
            ctx.exec(mstore(slot(ptr), slot(length)))?;
        }
        ctx.helper_return(&[ptr])
    })
}

/// `allocate_memory_struct_<t>() -> memPtr`.
pub fn allocate_memory_struct(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let env = ctx.env();
    let size = ty.memory_data_size(env);
    let allocate = allocate_memory(ctx)?;
    let name = format!("allocate_memory_struct_{}", ty.identifier(env));
    ctx.helper(&name, 0, 1, move |ctx| {
        let ptr = ctx.let_(call(allocate, [lit(size)]))?;
        ctx.helper_return(&[ptr])
    })
}

/// Zero value of `ty` as it lives on the stack in memory context: `0` for
/// value types, the empty array at the zero slot for dynamic memory arrays
/// and a freshly zeroed object for static arrays and structs.
pub fn zero_value(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Word> {
    match ty {
        Type::Array(array) if array.location != DataLocation::Storage => {
            if array.is_dynamically_sized() {
                Ok(lit(ZERO_SLOT))
            } else {
                Ok(call(zero_value_function(ctx, ty)?, []))
            }
        }
        Type::Struct(s) if s.location != DataLocation::Storage => {
            Ok(call(zero_value_function(ctx, ty)?, []))
        }
        _ => Ok(lit(0u32)),
    }
}

/// `zero_value_for_<t>() -> memPtr` for static memory arrays and structs.
pub fn zero_value_function(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("zero_value_for_{}", ty.identifier(env));
    match ty {
        Type::Array(array) => {
            let length = array
                .length
                .as_ref()
                .ok_or_else(|| CompilationError::internal("zero value helper for a dynamic array"))?
                .clone();
            let allocate = allocate_and_zero_memory_array(ctx, ty)?;
            ctx.helper(&name, 0, 1, move |ctx| {
                let ptr = ctx.let_(call(allocate, [lit(length)]))?;
                ctx.helper_return(&[ptr])
            })
        }
        Type::Struct(s) => {
            let allocate = allocate_memory_struct(ctx, ty)?;
            let members = env.struct_memory_members(s.id);
            ctx.helper(&name, 0, 1, move |ctx| {
                let ptr = ctx.let_(call(allocate, []))?;
                let mut offset = 0u64;
                for (_, member) in &members {
                    let value = zero_value(ctx, member)?;
                    ctx.exec(mstore(add(slot(ptr), lit(offset)), value))?;
                    offset += member.memory_head_size(env);
                }
                ctx.helper_return(&[ptr])
            })
        }
        _ => Err(CompilationError::internal(format!("no zero value helper for {ty:?}"))),
    }
}

/// `zero_memory_chunk_<base>(dataStart, dataSize)`: overwrite a memory
/// region with zero values of `base`.
pub fn zero_memory_chunk(ctx: &mut CompilerContext<'_>, base: &Type) -> Result<Tag> {
    let name = format!("zero_memory_chunk_{}", base.identifier(ctx.env()));
    let zero = if base.is_reference_type() {
        Some(base.clone())
    } else {
        None
    };
    ctx.helper(&name, 2, 0, move |ctx| {
        let (start, size) = (1, 2);
        match &zero {
            // calldata beyond its end reads as zeros
            None => ctx.exec(calldatacopy(slot(start), calldatasize(), slot(size)))?,
            Some(base) => {
                let i = ctx.let_(lit(0u32))?;
                ctx.while_(lt(slot(i), slot(size)), |ctx| {
                    let value = zero_value(ctx, base)?;
                    ctx.exec(mstore(add(slot(start), slot(i)), value))?;
                    ctx.assign(i, add(slot(i), lit(32u32)))
                })?;
            }
        }
        ctx.helper_return(&[])
    })
}

/// `allocate_and_zero_memory_array_<t>(length) -> memPtr`.
pub fn allocate_and_zero_memory_array(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let array = array_of(ty)?.clone();
    let allocate = allocate_memory_array(ctx, ty)?;
    let size_of = array_allocation_size(ctx, ty)?;
    let element = if array.is_byte_array() {
        Type::fixed_bytes(1)
    } else {
        (*array.base).clone()
    };
    let zero = zero_memory_chunk(ctx, &element)?;
    let name = format!("allocate_and_zero_memory_array_{}", ty.identifier(ctx.env()));
    ctx.helper(&name, 1, 1, move |ctx| {
        let length = 1;
        let ptr = ctx.let_(call(allocate, [slot(length)]))?;
        let size = call(size_of, [slot(length)]);
        let (start, size) = if array.is_dynamically_sized() {
            (add(slot(ptr), lit(32u32)), sub(size, lit(32u32)))
        } else {
            (slot(ptr), size)
        };
        ctx.call_with(zero, [start, size], 0)?;
        ctx.helper_return(&[ptr])
    })
}

/// `copy_memory_to_memory(src, dst, length)`: copy `length` bytes and zero
/// the word following the copy.
pub fn copy_memory_to_memory(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    ctx.helper("copy_memory_to_memory", 3, 0, |ctx| {
        let (src, dst, length) = (1, 2, 3);
        let i = ctx.let_(lit(0u32))?;
        ctx.while_(lt(slot(i), slot(length)), |ctx| {
            ctx.exec(mstore(add(slot(dst), slot(i)), mload(add(slot(src), slot(i)))))?;
            ctx.assign(i, add(slot(i), lit(32u32)))
        })?;
        ctx.exec(mstore(add(slot(dst), slot(length)), lit(0u32)))?;
        ctx.helper_return(&[])
    })
}

/// Length of a memory array.
pub fn memory_array_length(array: &ArrayType, ptr: Word) -> Word {
    match &array.length {
        Some(length) => lit(length.clone()),
        None => mload(ptr),
    }
}

/// Start of a memory array's data area.
pub fn memory_array_data(array: &ArrayType, ptr: Word) -> Word {
    if array.is_dynamically_sized() {
        add(ptr, lit(32u32))
    } else {
        ptr
    }
}

/// `memory_array_index_access_<t>(baseRef, index) -> addr`, bounds checked.
pub fn memory_array_index_access(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let array = array_of(ty)?.clone();
    let env = ctx.env();
    let stride = if array.is_byte_array() {
        1
    } else {
        array.base.memory_head_size(env)
    };
    let name = format!("memory_array_index_access_{}", ty.identifier(env));
    ctx.helper(&name, 2, 1, move |ctx| {
        let (base, index) = (1, 2);
        ctx.panic_if(
            iszero(lt(slot(index), memory_array_length(&array, slot(base)))),
            OUT_OF_BOUNDS,
        )?;
        let addr = ctx.let_(add(
            memory_array_data(&array, slot(base)),
            mul(slot(index), lit(stride)),
        ))?;
        ctx.helper_return(&[addr])
    })
}

/// Value of `ty` stored at memory address `ptr`.
pub fn read_from_memory(ctx: &CompilerContext<'_>, ty: &Type, ptr: Word) -> Word {
    if ty.is_reference_type() {
        mload(ptr)
    } else {
        cleanup(ctx.env(), ty, mload(ptr))
    }
}

/// Store `value` of `ty` at memory address `ptr`.
pub fn write_to_memory(ctx: &CompilerContext<'_>, ty: &Type, ptr: Word, value: Word) -> Word {
    if ty.is_reference_type() {
        mstore(ptr, value)
    } else {
        mstore(ptr, cleanup(ctx.env(), ty, value))
    }
}

/// `copy_literal_to_memory_<hash>() -> memPtr`: a fresh `bytes memory` with
/// the literal's contents.
pub fn copy_literal_to_memory(ctx: &mut CompilerContext<'_>, bytes: &[u8]) -> Result<Tag> {
    let bytes_type = Type::bytes(DataLocation::Memory);
    let allocate = allocate_memory_array(ctx, &bytes_type)?;
    let name = format!("copy_literal_to_memory_{}", &to_hex(&keccak256(bytes))[..16]);
    let bytes = bytes.to_vec();
    ctx.helper(&name, 0, 1, move |ctx| {
        let ptr = ctx.let_(call(allocate, [lit(bytes.len() as u64)]))?;
        for (index, chunk) in bytes.chunks(32).enumerate() {
            let offset = 32 + 32 * index as u64;
            ctx.exec(mstore(add(slot(ptr), lit(offset)), lit(left_aligned(chunk))))?;
        }
        ctx.helper_return(&[ptr])
    })
}

/// Constant length of a static array type, if it fits a machine word.
pub fn static_length(array: &ArrayType) -> Option<u64> {
    array.length.as_ref().and_then(BigUint::to_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Instruction;
    use crate::settings::CompilerSettings;
    use quill_core::TypeEnv;

    #[test]
    fn allocation_helpers_share_finalize() {
        let env = TypeEnv::new();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        allocate_memory_array(&mut ctx, &Type::bytes(DataLocation::Memory)).unwrap();
        allocate_memory_array(&mut ctx, &Type::array(Type::uint256(), None, DataLocation::Memory))
            .unwrap();
        assert_eq!(
            ctx.helpers()
                .iter()
                .filter(|h| h.name == "finalize_allocation")
                .count(),
            1
        );
        assert!(ctx.helpers().contains("panic_error_0x41"));
    }

    #[test]
    fn dynamic_arrays_share_the_zero_slot() {
        let env = TypeEnv::new();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        let ty = Type::array(Type::uint(8), None, DataLocation::Memory);
        assert_eq!(zero_value(&mut ctx, &ty).unwrap(), lit(ZERO_SLOT));
        assert_eq!(zero_value(&mut ctx, &Type::Bool).unwrap(), lit(0u32));
        assert!(ctx.helpers().is_empty());
    }

    #[test]
    fn static_zero_values_allocate() {
        let env = TypeEnv::new();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        let ty = Type::array(Type::uint256(), Some(3), DataLocation::Memory);
        let word = zero_value(&mut ctx, &ty).unwrap();
        assert!(matches!(word, Word::Call(_, _)));
        let name = format!("zero_value_for_{}", ty.identifier(&env));
        assert!(ctx.helpers().contains(&name));
        let chunk = ctx.helpers().get("zero_memory_chunk_t_uint256").unwrap();
        assert!(chunk.body.contains(&crate::asm::AssemblyItem::Operation(Instruction::CallDataCopy)));
    }

    #[test]
    fn literal_copy_is_keyed_by_contents() {
        let env = TypeEnv::new();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        let a = copy_literal_to_memory(&mut ctx, b"hi").unwrap();
        let b = copy_literal_to_memory(&mut ctx, b"hi").unwrap();
        let c = copy_literal_to_memory(&mut ctx, b"ho").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
