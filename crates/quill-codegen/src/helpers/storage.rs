//! Storage access helpers.
//!
//! A storage location is a `(slot, byte offset)` pair; the offset counts
//! bytes from the low-order end of the slot. Dynamic arrays keep their length
//! in their own slot and data from `keccak256(slot)`. `bytes` and `string`
//! use a dual encoding: up to 31 bytes live in the slot itself with
//! `2 * length` in the lowest byte; longer contents go to the data area and
//! the slot holds `2 * length + 1`.

use num_bigint::BigUint;
use quill_core::num::low_mask;
use quill_core::types::{ArrayType, MappingType, items_per_slot};
use quill_core::{CompilationError, DataLocation, FunctionKind, Type};

use super::abort::panic_code::{EMPTY_ARRAY_POP, OUT_OF_BOUNDS, RESOURCE, STORAGE_ENCODING};
use super::code::*;
use super::math::cleanup;
use crate::asm::Tag;
use crate::context::CompilerContext;

type Result<T> = std::result::Result<T, CompilationError>;

fn storage_array(ty: &Type) -> Result<&ArrayType> {
    match ty {
        Type::Array(array) if array.location == DataLocation::Storage => Ok(array),
        _ => Err(CompilationError::internal(format!("storage array expected, got {ty:?}"))),
    }
}

fn dynamic_storage_array(ty: &Type) -> Result<&ArrayType> {
    let array = storage_array(ty)?;
    if array.is_dynamically_sized() {
        Ok(array)
    } else {
        Err(CompilationError::internal(format!("dynamic storage array expected, got {ty:?}")))
    }
}

// ============================================================================
// Values
// ============================================================================

/// `read_from_storage_<t>(slot, offset) -> value`.
pub fn read_from_storage(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("read_from_storage_{}", ty.identifier(env));
    let ty = ty.clone();
    ctx.helper(&name, 2, 1, move |ctx| {
        let (slot_, offset) = (1, 2);
        let shifted = shr(mul(slot(offset), lit(8u32)), sload(slot(slot_)));
        let extracted = extract_value(ctx, &ty, shifted);
        let value = ctx.let_(extracted)?;
        ctx.helper_return(&[value])
    })
}

/// Convert the low-order bytes of `word` holding a packed value of `ty` to
/// its stack form.
pub fn extract_value(ctx: &CompilerContext<'_>, ty: &Type, word: Word) -> Word {
    let bytes = ty.storage_bytes(ctx.env());
    if bytes >= 32 {
        return word;
    }
    let masked = and(word, lit(low_mask(bytes * 8)));
    match ty {
        Type::FixedBytes(_) => shl(lit(256 - bytes * 8), masked),
        Type::Function(f) if f.kind == FunctionKind::External => shl(lit(64u32), masked),
        Type::Integer(int) if int.signed => signextend(lit(bytes - 1), masked),
        _ => masked,
    }
}

/// Right-aligned, masked form of a stack value of `ty` ready to be packed.
pub fn prepare_store(ctx: &CompilerContext<'_>, ty: &Type, value: Word) -> Word {
    let env = ctx.env();
    let bytes = ty.storage_bytes(env);
    if bytes >= 32 {
        return cleanup(env, ty, value);
    }
    let aligned = match ty {
        Type::FixedBytes(_) => shr(lit(256 - bytes * 8), value),
        Type::Function(f) if f.kind == FunctionKind::External => shr(lit(64u32), value),
        _ => value,
    };
    and(aligned, lit(low_mask(bytes * 8)))
}

/// `update_storage_value_<t>(value, slot, offset)`.
pub fn update_storage_value(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("update_storage_value_{}", ty.identifier(env));
    let ty = ty.clone();
    ctx.helper(&name, 3, 0, move |ctx| {
        let (value, slot_, offset) = (1, 2, 3);
        let bytes = ty.storage_bytes(env);
        let prepared = prepare_store(ctx, &ty, slot(value));
        if bytes >= 32 {
            ctx.exec(sstore(slot(slot_), prepared))?;
        } else {
            let shift = ctx.let_(mul(slot(offset), lit(8u32)))?;
            let mask = ctx.let_(shl(slot(shift), lit(low_mask(bytes * 8))))?;
            ctx.exec(sstore(
                slot(slot_),
                or(
                    and(sload(slot(slot_)), not(slot(mask))),
                    and(shl(slot(shift), prepared), slot(mask)),
                ),
            ))?;
        }
        ctx.helper_return(&[])
    })
}

// ============================================================================
// Arrays
// ============================================================================

/// `extract_byte_array_length(data) -> length`; panics with `0x22` when the
/// encoding flag contradicts the length.
pub fn extract_byte_array_length(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    ctx.helper("extract_byte_array_length", 1, 1, |ctx| {
        let data = 1;
        let length = ctx.let_(shr(lit(1u32), slot(data)))?;
        let out_of_place = ctx.let_(and(slot(data), lit(1u32)))?;
        ctx.if_(iszero(slot(out_of_place)), |ctx| {
            ctx.assign(length, and(slot(length), lit(0x7fu32)))
        })?;
        ctx.panic_if(eq(slot(out_of_place), lt(slot(length), lit(32u32))), STORAGE_ENCODING)?;
        ctx.helper_return(&[length])
    })
}

/// `array_length_<t>(array) -> length` of a storage array.
pub fn array_length(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let array = storage_array(ty)?.clone();
    let extract = if array.is_byte_array() {
        Some(extract_byte_array_length(ctx)?)
    } else {
        None
    };
    let name = format!("array_length_{}", ty.identifier(ctx.env()));
    ctx.helper(&name, 1, 1, move |ctx| {
        let length = match (&array.length, extract) {
            (Some(length), _) => ctx.let_(lit(length.clone()))?,
            (None, Some(extract)) => ctx.let_(call(extract, [sload(slot(1))]))?,
            (None, None) => ctx.let_(sload(slot(1)))?,
        };
        ctx.helper_return(&[length])
    })
}

/// `array_dataslot_<t>(array) -> data`: first slot of a storage array's
/// elements.
pub fn array_dataslot(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let dynamic = storage_array(ty)?.is_dynamically_sized();
    let name = format!("array_dataslot_{}", ty.identifier(ctx.env()));
    ctx.helper(&name, 1, 1, move |ctx| {
        let array = 1;
        let data = if dynamic {
            ctx.exec(mstore(lit(0u32), slot(array)))?;
            ctx.let_(keccak256(lit(0u32), lit(0x20u32)))?
        } else {
            ctx.let_(slot(array))?
        };
        ctx.helper_return(&[data])
    })
}

/// `storage_array_index_access_<t>(array, index) -> (slot, offset)`,
/// bounds checked.
pub fn storage_array_index_access(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let array = storage_array(ty)?.clone();
    let env = ctx.env();
    let length_of = array_length(ctx, ty)?;
    let dataslot = array_dataslot(ctx, ty)?;
    let name = format!("storage_array_index_access_{}", ty.identifier(env));
    if array.is_byte_array() {
        return ctx.helper(&name, 2, 2, move |ctx| {
            let (base, index) = (1, 2);
            ctx.panic_if(
                iszero(lt(slot(index), call(length_of, [slot(base)]))),
                OUT_OF_BOUNDS,
            )?;
            let slot_ = ctx.let_(slot(base))?;
            let offset = ctx.let_(sub(lit(31u32), slot(index)))?;
            ctx.if_(and(sload(slot(base)), lit(1u32)), |ctx| {
                ctx.assign(
                    slot_,
                    add(call(dataslot, [slot(base)]), div(slot(index), lit(32u32))),
                )?;
                ctx.assign(offset, sub(lit(31u32), mod_(slot(index), lit(32u32))))
            })?;
            ctx.helper_return(&[slot_, offset])
        });
    }
    let per_slot = items_per_slot(env, &array.base);
    let element_bytes = array.base.storage_bytes(env);
    let stride = array.base.storage_size(env)?;
    ctx.helper(&name, 2, 2, move |ctx| {
        let (base, index) = (1, 2);
        ctx.panic_if(
            iszero(lt(slot(index), call(length_of, [slot(base)]))),
            OUT_OF_BOUNDS,
        )?;
        let data = ctx.let_(call(dataslot, [slot(base)]))?;
        let (slot_, offset) = if per_slot > 1 {
            let slot_ = ctx.let_(add(slot(data), div(slot(index), lit(per_slot))))?;
            let offset = ctx.let_(mul(mod_(slot(index), lit(per_slot)), lit(element_bytes)))?;
            (slot_, offset)
        } else {
            let slot_ = ctx.let_(add(slot(data), mul(slot(index), lit(stride))))?;
            (slot_, ctx.let_(lit(0u32))?)
        };
        ctx.helper_return(&[slot_, offset])
    })
}

/// Largest length a storage array may grow to.
fn max_array_length() -> BigUint {
    low_mask(64)
}

/// `array_push_<t>(array, value) -> newLength` for value-type elements.
pub fn array_push(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let array = dynamic_storage_array(ty)?.clone();
    if array.is_byte_array() {
        return byte_array_push(ctx, ty);
    }
    let access = storage_array_index_access(ctx, ty)?;
    let update = update_storage_value(ctx, &array.base)?;
    let name = format!("array_push_{}", ty.identifier(ctx.env()));
    ctx.helper(&name, 2, 1, move |ctx| {
        let (base, value) = (1, 2);
        let old_length = ctx.let_(sload(slot(base)))?;
        ctx.panic_if(iszero(lt(slot(old_length), lit(max_array_length()))), RESOURCE)?;
        let new_length = ctx.let_(add(slot(old_length), lit(1u32)))?;
        ctx.exec(sstore(slot(base), slot(new_length)))?;
        let location = ctx.call_with(access, [slot(base), slot(old_length)], 2)?;
        ctx.call_with(update, [slot(value), slot(location[0]), slot(location[1])], 0)?;
        ctx.helper_return(&[new_length])
    })
}

/// `array_push_zero_<t>(array) -> (newLength, slot)`: append a zero element
/// and return where it lives, for elements assigned by copying.
pub fn array_push_zero(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    dynamic_storage_array(ty)?;
    let access = storage_array_index_access(ctx, ty)?;
    let name = format!("array_push_zero_{}", ty.identifier(ctx.env()));
    ctx.helper(&name, 1, 2, move |ctx| {
        let base = 1;
        let old_length = ctx.let_(sload(slot(base)))?;
        ctx.panic_if(iszero(lt(slot(old_length), lit(max_array_length()))), RESOURCE)?;
        let new_length = ctx.let_(add(slot(old_length), lit(1u32)))?;
        ctx.exec(sstore(slot(base), slot(new_length)))?;
        let location = ctx.call_with(access, [slot(base), slot(old_length)], 2)?;
        ctx.helper_return(&[new_length, location[0]])
    })
}

/// `byte_array_push_<t>(array, value) -> newLength`. Appending the 32nd
/// byte moves the contents out of the length slot.
pub fn byte_array_push(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    dynamic_storage_array(ty)?;
    let extract = extract_byte_array_length(ctx)?;
    let dataslot = array_dataslot(ctx, ty)?;
    let update = update_storage_value(ctx, &Type::fixed_bytes(1))?;
    let name = format!("byte_array_push_{}", ty.identifier(ctx.env()));
    ctx.helper(&name, 2, 1, move |ctx| {
        let (base, value) = (1, 2);
        let data = ctx.let_(sload(slot(base)))?;
        let old_length = ctx.let_(call(extract, [slot(data)]))?;
        ctx.panic_if(iszero(lt(slot(old_length), lit(max_array_length()))), RESOURCE)?;
        ctx.if_else(
            lt(slot(old_length), lit(31u32)),
            |ctx| {
                let shift = mul(lit(8u32), sub(lit(31u32), slot(old_length)));
                ctx.exec(sstore(
                    slot(base),
                    add(or(slot(data), shl(shift, byte(lit(0u32), slot(value)))), lit(2u32)),
                ))
            },
            |ctx| {
                ctx.if_else(
                    eq(slot(old_length), lit(31u32)),
                    |ctx| {
                        ctx.exec(sstore(
                            call(dataslot, [slot(base)]),
                            or(and(slot(data), not(lit(0xffu32))), byte(lit(0u32), slot(value))),
                        ))?;
                        ctx.exec(sstore(slot(base), lit(65u32)))
                    },
                    |ctx| {
                        ctx.exec(sstore(slot(base), add(slot(data), lit(2u32))))?;
                        let slot_ = add(call(dataslot, [slot(base)]), div(slot(old_length), lit(32u32)));
                        let offset = sub(lit(31u32), mod_(slot(old_length), lit(32u32)));
                        ctx.call_with(update, [slot(value), slot_, offset], 0)?;
                        Ok(())
                    },
                )
            },
        )?;
        let new_length = ctx.let_(add(slot(old_length), lit(1u32)))?;
        ctx.helper_return(&[new_length])
    })
}

/// `array_pop_<t>(array)`: zero the last element and shorten the array.
pub fn array_pop(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let array = dynamic_storage_array(ty)?.clone();
    if array.is_byte_array() {
        return byte_array_pop(ctx, ty);
    }
    let access = storage_array_index_access(ctx, ty)?;
    let zero = set_to_zero(ctx, &array.base)?;
    let name = format!("array_pop_{}", ty.identifier(ctx.env()));
    ctx.helper(&name, 1, 0, move |ctx| {
        let base = 1;
        let old_length = ctx.let_(sload(slot(base)))?;
        ctx.panic_if(iszero(slot(old_length)), EMPTY_ARRAY_POP)?;
        let new_length = ctx.let_(sub(slot(old_length), lit(1u32)))?;
        let location = ctx.call_with(access, [slot(base), slot(new_length)], 2)?;
        ctx.call_with(zero, [slot(location[0]), slot(location[1])], 0)?;
        ctx.exec(sstore(slot(base), slot(new_length)))?;
        ctx.helper_return(&[])
    })
}

/// `byte_array_pop_<t>(array)`. Removing the 32nd byte moves the remaining
/// contents back into the length slot.
pub fn byte_array_pop(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    dynamic_storage_array(ty)?;
    let extract = extract_byte_array_length(ctx)?;
    let dataslot = array_dataslot(ctx, ty)?;
    let update = update_storage_value(ctx, &Type::fixed_bytes(1))?;
    let name = format!("byte_array_pop_{}", ty.identifier(ctx.env()));
    ctx.helper(&name, 1, 0, move |ctx| {
        let base = 1;
        let data = ctx.let_(sload(slot(base)))?;
        let old_length = ctx.let_(call(extract, [slot(data)]))?;
        ctx.panic_if(iszero(slot(old_length)), EMPTY_ARRAY_POP)?;
        let new_length = ctx.let_(sub(slot(old_length), lit(1u32)))?;
        ctx.if_else(
            eq(slot(old_length), lit(32u32)),
            |ctx| {
                let data_slot = ctx.let_(call(dataslot, [slot(base)]))?;
                let word = ctx.let_(sload(slot(data_slot)))?;
                ctx.exec(sstore(slot(data_slot), lit(0u32)))?;
                ctx.exec(sstore(slot(base), or(and(slot(word), not(lit(0xffu32))), lit(62u32))))
            },
            |ctx| {
                ctx.if_else(
                    lt(slot(old_length), lit(32u32)),
                    |ctx| {
                        let removed = shl(mul(lit(8u32), sub(lit(31u32), slot(new_length))), lit(0xffu32));
                        ctx.exec(sstore(
                            slot(base),
                            or(
                                and(slot(data), not(or(removed, lit(0xffu32)))),
                                mul(slot(new_length), lit(2u32)),
                            ),
                        ))
                    },
                    |ctx| {
                        let slot_ = add(call(dataslot, [slot(base)]), div(slot(new_length), lit(32u32)));
                        let offset = sub(lit(31u32), mod_(slot(new_length), lit(32u32)));
                        ctx.call_with(update, [lit(0u32), slot_, offset], 0)?;
                        ctx.exec(sstore(slot(base), sub(slot(data), lit(2u32))))
                    },
                )
            },
        )?;
        ctx.helper_return(&[])
    })
}

// ============================================================================
// Clearing
// ============================================================================

/// `storage_set_to_zero_<t>(slot, offset)`: reset a storage value to its
/// zero state. Mappings are left alone, including mapping members of structs.
pub fn set_to_zero(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("storage_set_to_zero_{}", ty.identifier(env));
    match ty {
        Type::Mapping(_) => ctx.helper(&name, 2, 0, |ctx| ctx.helper_return(&[])),
        Type::Array(_) => {
            let clear = clear_storage_array(ctx, ty)?;
            ctx.helper(&name, 2, 0, move |ctx| {
                ctx.call_with(clear, [slot(1)], 0)?;
                ctx.helper_return(&[])
            })
        }
        Type::Struct(s) => {
            let layout = env.struct_layout(s.id)?;
            let mut members = Vec::new();
            for (index, (_, member)) in env
                .struct_member_types(s.id, DataLocation::Storage)
                .into_iter()
                .enumerate()
            {
                if matches!(member, Type::Mapping(_)) {
                    continue;
                }
                let (member_slot, offset) = layout
                    .offset(index)
                    .ok_or_else(|| CompilationError::internal("struct member without a storage offset"))?;
                members.push((member_slot.clone(), offset, member));
            }
            ctx.helper(&name, 2, 0, move |ctx| {
                let base = 1;
                for (member_slot, offset, member) in &members {
                    let zero = set_to_zero(ctx, member)?;
                    ctx.call_with(zero, [add(slot(base), lit(member_slot.clone())), lit(*offset)], 0)?;
                }
                ctx.helper_return(&[])
            })
        }
        _ => {
            let update = update_storage_value(ctx, ty)?;
            ctx.helper(&name, 2, 0, move |ctx| {
                ctx.call_with(update, [lit(0u32), slot(1), slot(2)], 0)?;
                ctx.helper_return(&[])
            })
        }
    }
}

/// `clear_storage_range_<base>(start, end)`: zero the elements of `base`
/// stored in slots `start..end`. Value types are cleared a slot at a time.
pub fn clear_storage_range(ctx: &mut CompilerContext<'_>, base: &Type) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("clear_storage_range_{}", base.identifier(env));
    let element = if base.is_value_type() {
        None
    } else {
        Some((set_to_zero(ctx, base)?, base.storage_size(env)?))
    };
    ctx.helper(&name, 2, 0, move |ctx| {
        let (start, end) = (1, 2);
        ctx.while_(lt(slot(start), slot(end)), |ctx| match &element {
            None => {
                ctx.exec(sstore(slot(start), lit(0u32)))?;
                ctx.assign(start, add(slot(start), lit(1u32)))
            }
            Some((zero, stride)) => {
                ctx.call_with(*zero, [slot(start), lit(0u32)], 0)?;
                ctx.assign(start, add(slot(start), lit(stride.clone())))
            }
        })?;
        ctx.helper_return(&[])
    })
}

/// `resize_array_<t>(array, newLength)` for dynamic non-byte arrays. Removed
/// elements are zeroed one by one so that packed neighbours survive.
pub fn resize_array(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let array = dynamic_storage_array(ty)?.clone();
    if array.is_byte_array() {
        return Err(CompilationError::internal("byte arrays are resized by push and pop"));
    }
    let access = storage_array_index_access(ctx, ty)?;
    let zero = set_to_zero(ctx, &array.base)?;
    let name = format!("resize_array_{}", ty.identifier(ctx.env()));
    ctx.helper(&name, 2, 0, move |ctx| {
        let (base, new_length) = (1, 2);
        ctx.panic_if(gt(slot(new_length), lit(max_array_length())), RESOURCE)?;
        let i = ctx.let_(sload(slot(base)))?;
        ctx.while_(gt(slot(i), slot(new_length)), |ctx| {
            ctx.assign(i, sub(slot(i), lit(1u32)))?;
            let location = ctx.call_with(access, [slot(base), slot(i)], 2)?;
            ctx.call_with(zero, [slot(location[0]), slot(location[1])], 0)?;
            Ok(())
        })?;
        ctx.exec(sstore(slot(base), slot(new_length)))?;
        ctx.helper_return(&[])
    })
}

/// `clear_storage_array_<t>(array)`: empty a dynamic array or zero every
/// element of a static one.
pub fn clear_storage_array(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let array = storage_array(ty)?.clone();
    let env = ctx.env();
    let name = format!("clear_storage_array_{}", ty.identifier(env));
    if array.is_byte_array() {
        let extract = extract_byte_array_length(ctx)?;
        let dataslot = array_dataslot(ctx, ty)?;
        let range = clear_storage_range(ctx, &Type::uint256())?;
        return ctx.helper(&name, 1, 0, move |ctx| {
            let base = 1;
            let data = ctx.let_(sload(slot(base)))?;
            ctx.if_(and(slot(data), lit(1u32)), |ctx| {
                let start = ctx.let_(call(dataslot, [slot(base)]))?;
                let words = div(add(call(extract, [slot(data)]), lit(31u32)), lit(32u32));
                ctx.call_with(range, [slot(start), add(slot(start), words)], 0)?;
                Ok(())
            })?;
            ctx.exec(sstore(slot(base), lit(0u32)))?;
            ctx.helper_return(&[])
        });
    }
    if array.is_dynamically_sized() {
        let resize = resize_array(ctx, ty)?;
        return ctx.helper(&name, 1, 0, move |ctx| {
            ctx.call_with(resize, [slot(1), lit(0u32)], 0)?;
            ctx.helper_return(&[])
        });
    }
    let range = clear_storage_range(ctx, &array.base)?;
    let size = ty.storage_size(env)?;
    ctx.helper(&name, 1, 0, move |ctx| {
        let base = 1;
        ctx.call_with(range, [slot(base), add(slot(base), lit(size))], 0)?;
        ctx.helper_return(&[])
    })
}

// ============================================================================
// Mappings
// ============================================================================

/// `mapping_index_access_<t>_of_<key>(slot, key) -> valueSlot`. Value keys
/// are hashed as a cleaned word; `bytes`/`string` keys in memory are hashed
/// as their raw contents.
pub fn mapping_index_access(ctx: &mut CompilerContext<'_>, mapping: &Type, key: &Type) -> Result<Tag> {
    let Type::Mapping(MappingType { key: declared, .. }) = mapping else {
        return Err(CompilationError::internal(format!("mapping expected, got {mapping:?}")));
    };
    let env = ctx.env();
    let name = format!(
        "mapping_index_access_{}_of_{}",
        mapping.identifier(env),
        key.identifier(env)
    );
    let key_type = (**declared).clone();
    let byte_key = key.is_byte_array();
    if byte_key && key.data_location() != Some(DataLocation::Memory) {
        return Err(CompilationError::internal("byte array mapping keys are hashed from memory"));
    }
    ctx.helper(&name, 2, 1, move |ctx| {
        let (slot_, key) = (1, 2);
        let result = if byte_key {
            let length = ctx.let_(mload(slot(key)))?;
            let end = ctx.let_(add(add(slot(key), lit(32u32)), slot(length)))?;
            let saved = ctx.let_(mload(slot(end)))?;
            ctx.exec(mstore(slot(end), slot(slot_)))?;
            let hash = ctx.let_(keccak256(add(slot(key), lit(32u32)), add(slot(length), lit(32u32))))?;
            ctx.exec(mstore(slot(end), slot(saved)))?;
            hash
        } else {
            ctx.exec(mstore(lit(0u32), cleanup(env, &key_type, slot(key))))?;
            ctx.exec(mstore(lit(0x20u32), slot(slot_)))?;
            ctx.let_(keccak256(lit(0u32), lit(0x40u32)))?
        };
        ctx.helper_return(&[result])
    })
}

/// Slot offset of an element in a packed static array known at compile time.
pub fn static_element_position(
    ctx: &CompilerContext<'_>,
    array: &ArrayType,
    index: &BigUint,
) -> Result<(BigUint, u8)> {
    let env = ctx.env();
    let per_slot = items_per_slot(env, &array.base);
    if per_slot > 1 {
        let per_slot = BigUint::from(per_slot);
        let within = (index % &per_slot) * array.base.storage_bytes(env);
        let offset = u8::try_from(within)
            .map_err(|_| CompilationError::internal("packed element offset beyond a slot"))?;
        Ok((index / per_slot, offset))
    } else {
        let stride = array.base.storage_size(env)?;
        Ok((index * stride, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::CompilerSettings;
    use quill_core::TypeEnv;

    fn bytes_storage() -> Type {
        Type::bytes(DataLocation::Storage)
    }

    #[test]
    fn byte_array_push_and_pop_share_helpers() {
        let env = TypeEnv::new();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        array_push(&mut ctx, &bytes_storage()).unwrap();
        array_pop(&mut ctx, &bytes_storage()).unwrap();
        assert!(ctx.helpers().contains("byte_array_push_t_bytes_storage"));
        assert!(ctx.helpers().contains("byte_array_pop_t_bytes_storage"));
        let extracts = ctx
            .helpers()
            .iter()
            .filter(|h| h.name == "extract_byte_array_length")
            .count();
        assert_eq!(extracts, 1);
    }

    #[test]
    fn index_access_packs_small_elements() {
        let env = TypeEnv::new();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        let ty = Type::array(Type::uint(8), None, DataLocation::Storage);
        storage_array_index_access(&mut ctx, &ty).unwrap();
        assert!(ctx.helpers().contains("panic_error_0x32"));
        let array = ty.as_array().unwrap();
        assert_eq!(
            static_element_position(&ctx, array, &BigUint::from(33u32)).unwrap(),
            (BigUint::from(1u32), 1)
        );
    }

    #[test]
    fn struct_zeroing_skips_mappings() {
        let mut env = TypeEnv::new();
        let s = env.add_struct("S", None, vec![]);
        env.set_struct_members(
            s,
            vec![
                ("a".into(), Type::uint256()),
                ("m".into(), Type::mapping(Type::uint256(), Type::uint256())),
            ],
        );
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        set_to_zero(&mut ctx, &Type::struct_type(s, DataLocation::Storage)).unwrap();
        assert!(!ctx.helpers().iter().any(|h| h.name.starts_with("storage_set_to_zero_t_mapping")));
        assert!(ctx.helpers().contains("storage_set_to_zero_t_uint256"));
    }

    #[test]
    fn mapping_keys_are_cleaned() {
        let env = TypeEnv::new();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        let mapping = Type::mapping(Type::uint(8), Type::uint256());
        let a = mapping_index_access(&mut ctx, &mapping, &Type::uint(8)).unwrap();
        let b = mapping_index_access(&mut ctx, &mapping, &Type::uint(8)).unwrap();
        assert_eq!(a, b);
        let key = Type::string(DataLocation::CallData);
        let string_mapping = Type::mapping(Type::string(DataLocation::Memory), Type::uint256());
        assert!(mapping_index_access(&mut ctx, &string_mapping, &key).is_err());
    }
}
