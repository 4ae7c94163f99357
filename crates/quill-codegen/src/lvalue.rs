//! Assignable locations.
//!
//! An [`LValue`] describes where the value of an expression lives so that
//! it can be read, overwritten or reset. Compiling an expression as an
//! lvalue pushes its *reference words* (nothing for stack variables and
//! immutables, a pointer for memory, `slot, offset` for storage) and
//! returns the handle; the handle is consumed by the statement that
//! created it.
//!
//! Stack conventions:
//!
//! ```text
//! retrieve_value:  ref...          -> [ref...] value...
//! store_value:     value... ref... -> [value...]
//! set_to_zero:     ref...          -> [ref...]
//! ```
//!
//! Values of non-storage targets must already have the target's type when
//! stored; storage-located reference targets copy from any location.

use quill_core::types::tuple_alignment;
use quill_core::{CompilationError, DataLocation, Span, Type, VariableId};

use crate::asm::AssemblyItem;
use crate::context::CompilerContext;
use crate::helpers::code::*;
use crate::helpers::convert::copy_to_storage;
use crate::helpers::math::left_mask;
use crate::helpers::memory::{read_from_memory, write_to_memory, zero_value};
use crate::helpers::storage::{read_from_storage, set_to_zero, update_storage_value};

type Result<T> = std::result::Result<T, CompilationError>;

/// An assignable location.
#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    /// Local variable occupying consecutive stack slots from `slot`.
    Stack {
        /// First absolute slot of the variable.
        slot: usize,
        /// Declared type.
        ty: Type,
    },
    /// Value at `(slot, offset)` in storage; reference words `slot, offset`.
    Storage {
        /// Type of the stored value.
        ty: Type,
    },
    /// Word in memory; reference word is its address.
    Memory {
        /// Type of the stored value.
        ty: Type,
    },
    /// Immutable state variable: a memory word during construction, a
    /// constant in the runtime code afterwards.
    Immutable {
        /// The variable.
        variable: VariableId,
        /// Its type.
        ty: Type,
    },
    /// One byte of a storage `bytes` array; reference words `slot, offset`.
    StorageByteArrayElement,
    /// One byte of a memory `bytes` array; reference word is its address.
    MemoryByteArrayElement,
    /// Tuple of locations; absent components discard their value.
    Tuple(Vec<Option<LValue>>),
}

impl LValue {
    /// Words the reference occupies on the stack.
    pub fn reference_size(&self) -> usize {
        match self {
            LValue::Stack { .. } | LValue::Immutable { .. } => 0,
            LValue::Memory { .. } | LValue::MemoryByteArrayElement => 1,
            LValue::Storage { .. } | LValue::StorageByteArrayElement => 2,
            LValue::Tuple(components) => components.iter().flatten().map(LValue::reference_size).sum(),
        }
    }

    /// Type of the value at the location.
    pub fn value_type(&self) -> Type {
        match self {
            LValue::Stack { ty, .. }
            | LValue::Storage { ty }
            | LValue::Memory { ty }
            | LValue::Immutable { ty, .. } => ty.clone(),
            LValue::StorageByteArrayElement | LValue::MemoryByteArrayElement => Type::fixed_bytes(1),
            LValue::Tuple(components) => Type::Tuple(
                components
                    .iter()
                    .map(|c| c.as_ref().map(LValue::value_type))
                    .collect(),
            ),
        }
    }

    /// Whether storing copies the value into storage rather than taking a
    /// value of the target type.
    pub fn copies_into_storage(&self) -> bool {
        matches!(self, LValue::Storage { ty } if ty.is_reference_type())
    }

    fn duplicate_reference(&self, ctx: &mut CompilerContext<'_>) -> Result<()> {
        let size = self.reference_size();
        for _ in 0..size {
            ctx.dup(size)?;
        }
        Ok(())
    }

    // ========================================================================
    // Retrieve
    // ========================================================================

    /// Push the value; the reference is consumed when `remove_reference`.
    pub fn retrieve_value(&self, ctx: &mut CompilerContext<'_>, remove_reference: bool) -> Result<()> {
        if !remove_reference {
            self.duplicate_reference(ctx)?;
        }
        match self {
            LValue::Stack { slot: first, ty } => {
                let size = ty.size_on_stack(ctx.env());
                for i in 0..size {
                    ctx.dup_slot(first + i)?;
                }
                Ok(())
            }
            LValue::Storage { ty } => {
                if !ty.is_value_type() {
                    // storage references are the slot itself
                    ctx.op(crate::asm::Instruction::Pop);
                    return Ok(());
                }
                if ty.size_on_stack(ctx.env()) != 1 {
                    return Err(unimplemented("external function values in storage"));
                }
                let read = read_from_storage(ctx, ty)?;
                ctx.call_helper(read, 2, 1)
            }
            LValue::Memory { ty } => {
                if ty.size_on_stack(ctx.env()) != 1 {
                    return Err(unimplemented("external function values in memory"));
                }
                let h = ctx.stack_height();
                let value = read_from_memory(ctx, ty, slot(h - 1));
                ctx.eval(&value)?;
                ctx.swap(1)?;
                ctx.op(crate::asm::Instruction::Pop);
                Ok(())
            }
            LValue::Immutable { variable, .. } => {
                if ctx.is_creation() {
                    let offset = immutable_offset(ctx, *variable)?;
                    ctx.eval(&mload(lit(offset)))
                } else {
                    ctx.append(AssemblyItem::PushImmutable(*variable));
                    Ok(())
                }
            }
            LValue::StorageByteArrayElement => {
                let h = ctx.stack_height();
                let (slot_, offset) = (h - 2, h - 1);
                let byte_value = and(shr(mul(slot(offset), lit(8u32)), sload(slot(slot_))), lit(0xffu32));
                ctx.eval(&shl(lit(248u32), byte_value))?;
                ctx.shuffle(vec![None, None, Some(0)])
            }
            LValue::MemoryByteArrayElement => {
                let h = ctx.stack_height();
                ctx.eval(&and(mload(slot(h - 1)), lit(left_mask(8))))?;
                ctx.swap(1)?;
                ctx.op(crate::asm::Instruction::Pop);
                Ok(())
            }
            LValue::Tuple(_) => Err(CompilationError::internal("tuples are not retrieved as a whole")),
        }
    }

    // ========================================================================
    // Store
    // ========================================================================

    /// Store the value below the reference. With `move_only` nothing is
    /// left; otherwise the assigned value remains (for storage reference
    /// targets, the target reference).
    pub fn store_value(&self, ctx: &mut CompilerContext<'_>, source: &Type, move_only: bool) -> Result<()> {
        if move_only {
            return self.store_moving(ctx, source);
        }
        if self.copies_into_storage() {
            // value... slot offset -> slot value... slot offset
            let value_size = source.size_on_stack(ctx.env());
            ctx.dup(2)?;
            ctx.rotate_down(value_size + 2)?;
            return self.store_moving(ctx, source);
        }
        let value_size = source.size_on_stack(ctx.env());
        let total = value_size + self.reference_size();
        for _ in 0..total {
            ctx.dup(total)?;
        }
        self.store_moving(ctx, source)?;
        ctx.pop(self.reference_size());
        Ok(())
    }

    fn store_moving(&self, ctx: &mut CompilerContext<'_>, source: &Type) -> Result<()> {
        match self {
            LValue::Stack { slot: first, ty } => {
                let size = ty.size_on_stack(ctx.env());
                for i in (0..size).rev() {
                    ctx.store_slot(first + i)?;
                }
                Ok(())
            }
            LValue::Storage { ty } => {
                if let Type::Mapping(_) = ty {
                    return Err(CompilationError::internal("mappings cannot be assigned to"));
                }
                if ty.is_reference_type() {
                    // value... slot offset -> value... slot
                    ctx.op(crate::asm::Instruction::Pop);
                    let copy = copy_to_storage(ctx, source, ty)?;
                    let params = source.size_on_stack(ctx.env()) + 1;
                    return ctx.call_helper(copy, params, 0);
                }
                if ty.size_on_stack(ctx.env()) != 1 {
                    return Err(unimplemented("external function values in storage"));
                }
                let update = update_storage_value(ctx, ty)?;
                ctx.call_helper(update, 3, 0)
            }
            LValue::Memory { ty } => {
                if ty.size_on_stack(ctx.env()) != 1 {
                    return Err(unimplemented("external function values in memory"));
                }
                let h = ctx.stack_height();
                let write = write_to_memory(ctx, ty, slot(h - 1), slot(h - 2));
                ctx.exec(write)?;
                ctx.pop(2);
                Ok(())
            }
            LValue::Immutable { variable, .. } => {
                if !ctx.is_creation() {
                    return Err(CompilationError::internal(
                        "immutables are only assigned during construction",
                    ));
                }
                let offset = immutable_offset(ctx, *variable)?;
                let h = ctx.stack_height();
                ctx.exec(mstore(lit(offset), slot(h - 1)))?;
                ctx.pop(1);
                Ok(())
            }
            LValue::StorageByteArrayElement => {
                let h = ctx.stack_height();
                let (value, slot_, offset) = (h - 3, h - 2, h - 1);
                let shift = mul(slot(offset), lit(8u32));
                let cleared = and(sload(slot(slot_)), not(shl(shift.clone(), lit(0xffu32))));
                let byte_value = shl(shift, byte(lit(0u32), slot(value)));
                ctx.exec(sstore(slot(slot_), or(cleared, byte_value)))?;
                ctx.pop(3);
                Ok(())
            }
            LValue::MemoryByteArrayElement => {
                let h = ctx.stack_height();
                ctx.exec(mstore8(slot(h - 1), byte(lit(0u32), slot(h - 2))))?;
                ctx.pop(2);
                Ok(())
            }
            LValue::Tuple(components) => store_tuple(ctx, components, source),
        }
    }

    // ========================================================================
    // Zero
    // ========================================================================

    /// Reset the location to the zero value of its type. Structs in
    /// storage keep the entries of their mapping members.
    pub fn set_to_zero(&self, ctx: &mut CompilerContext<'_>, remove_reference: bool) -> Result<()> {
        if !remove_reference {
            self.duplicate_reference(ctx)?;
        }
        match self {
            LValue::Stack { slot: first, ty } => {
                let size = ty.size_on_stack(ctx.env());
                if size == 1 {
                    let zero = zero_value(ctx, ty)?;
                    ctx.eval(&zero)?;
                } else {
                    for _ in 0..size {
                        ctx.push(0u32);
                    }
                }
                for i in (0..size).rev() {
                    ctx.store_slot(first + i)?;
                }
                Ok(())
            }
            LValue::Storage { ty } => {
                let zero = set_to_zero(ctx, ty)?;
                ctx.call_helper(zero, 2, 0)
            }
            LValue::Memory { ty } => {
                let zero = zero_value(ctx, ty)?;
                let h = ctx.stack_height();
                ctx.exec(mstore(slot(h - 1), zero))?;
                ctx.pop(1);
                Ok(())
            }
            LValue::Immutable { .. } => Err(CompilationError::internal("immutables cannot be deleted")),
            LValue::StorageByteArrayElement => {
                let h = ctx.stack_height();
                let (slot_, offset) = (h - 2, h - 1);
                let mask = shl(mul(slot(offset), lit(8u32)), lit(0xffu32));
                ctx.exec(sstore(slot(slot_), and(sload(slot(slot_)), not(mask))))?;
                ctx.pop(2);
                Ok(())
            }
            LValue::MemoryByteArrayElement => {
                let h = ctx.stack_height();
                ctx.exec(mstore8(slot(h - 1), lit(0u32)))?;
                ctx.pop(1);
                Ok(())
            }
            LValue::Tuple(_) => Err(CompilationError::internal("tuples cannot be deleted")),
        }
    }
}

/// `values... refs...`: store every present component, last first, from a
/// copy of its value, then drop the values. A shorter component list is
/// aligned by its empty end and the surplus values are dropped unread.
fn store_tuple(ctx: &mut CompilerContext<'_>, components: &[Option<LValue>], source: &Type) -> Result<()> {
    let env = ctx.env();
    let sources = source.components();
    let present: Vec<bool> = components.iter().map(Option::is_some).collect();
    let alignment = tuple_alignment(&present, sources.len())
        .ok_or_else(|| CompilationError::internal("tuple assignment with mismatched arity"))?;
    let sizes: Vec<usize> = sources
        .iter()
        .map(|s| s.as_ref().map_or(0, |s| s.size_on_stack(env)))
        .collect();
    let value_words: usize = sizes.iter().sum();
    let mut reference_words: usize = components.iter().flatten().map(LValue::reference_size).sum();

    for (component, index) in components.iter().zip(alignment).rev() {
        let (Some(component), Some(index)) = (component, index) else {
            continue;
        };
        let Some(source) = &sources[index] else {
            return Err(CompilationError::internal("tuple component assigned from nothing"));
        };
        let value_size = sizes[index];
        let reference_size = component.reference_size();
        // distance from the top to the first word of this component's value
        let below: usize = sizes[index..].iter().sum();
        let depth = reference_words + below;
        for _ in 0..value_size {
            ctx.dup(depth)?;
        }
        // refs valuecopy -> valuecopy refs
        let mut layout: Vec<Option<usize>> = (0..reference_size).map(|i| Some(value_size + i)).collect();
        layout.extend((0..value_size).map(Some));
        ctx.shuffle(layout)?;
        component.store_moving(ctx, source)?;
        reference_words -= reference_size;
    }
    ctx.pop(value_words);
    Ok(())
}

fn immutable_offset(ctx: &CompilerContext<'_>, variable: VariableId) -> Result<u64> {
    ctx.immutable_offset(variable)
        .ok_or_else(|| CompilationError::internal(format!("immutable {} has no reserved memory", variable.0)))
}

fn unimplemented(feature: &str) -> CompilationError {
    CompilationError::unimplemented(feature, Span::default())
}

/// The lvalue of a storage-located value of `ty` whose `slot, offset` are
/// on the stack.
pub fn storage_item(ty: &Type) -> LValue {
    let ty = match ty.data_location() {
        Some(DataLocation::Storage) => ty.with_location(DataLocation::Storage, false),
        _ => ty.clone(),
    };
    LValue::Storage { ty }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Instruction;
    use crate::settings::CompilerSettings;
    use quill_core::TypeEnv;

    fn ctx(env: &TypeEnv) -> CompilerContext<'_> {
        CompilerContext::new(env, CompilerSettings::default(), None)
    }

    #[test]
    fn storage_value_round_trip_balances() {
        let env = TypeEnv::new();
        let mut ctx = ctx(&env);
        let lvalue = LValue::Storage { ty: Type::uint(8) };
        ctx.push(7u32);
        ctx.push(0u32);
        ctx.push(3u32);
        lvalue.store_value(&mut ctx, &Type::uint(8), false).unwrap();
        assert_eq!(ctx.stack_height(), 1);
        ctx.push(0u32);
        ctx.push(3u32);
        lvalue.retrieve_value(&mut ctx, true).unwrap();
        assert_eq!(ctx.stack_height(), 2);
        assert!(ctx.helpers().contains("update_storage_value_t_uint8"));
        assert!(ctx.helpers().contains("read_from_storage_t_uint8"));
    }

    #[test]
    fn retrieve_can_keep_the_reference() {
        let env = TypeEnv::new();
        let mut ctx = ctx(&env);
        ctx.push(0u32);
        ctx.push(0u32);
        LValue::Storage { ty: Type::uint256() }
            .retrieve_value(&mut ctx, false)
            .unwrap();
        assert_eq!(ctx.stack_height(), 3);
    }

    #[test]
    fn stack_variables_are_overwritten_in_place() {
        let env = TypeEnv::new();
        let mut ctx = ctx(&env);
        ctx.push(0u32);
        let lvalue = LValue::Stack {
            slot: 0,
            ty: Type::uint256(),
        };
        ctx.push(5u32);
        lvalue.store_value(&mut ctx, &Type::uint256(), true).unwrap();
        assert_eq!(ctx.stack_height(), 1);
        lvalue.set_to_zero(&mut ctx, true).unwrap();
        assert_eq!(ctx.stack_height(), 1);
    }

    #[test]
    fn storage_reference_copy_leaves_the_target() {
        let env = TypeEnv::new();
        let mut ctx = ctx(&env);
        let target = storage_item(&Type::bytes(DataLocation::Storage));
        assert!(target.copies_into_storage());
        ctx.push(0x80u32);
        ctx.push(4u32);
        ctx.push(0u32);
        target
            .store_value(&mut ctx, &Type::bytes(DataLocation::Memory), false)
            .unwrap();
        assert_eq!(ctx.stack_height(), 1);
        assert!(ctx.helpers().contains("copy_t_bytes_memory_ptr_to_t_bytes_storage"));
    }

    #[test]
    fn tuple_store_skips_wildcards() {
        let env = TypeEnv::new();
        let mut ctx = ctx(&env);
        ctx.push(0u32);
        let tuple = LValue::Tuple(vec![
            None,
            Some(LValue::Stack {
                slot: 0,
                ty: Type::uint256(),
            }),
        ]);
        ctx.push(1u32);
        ctx.push(2u32);
        tuple
            .store_value(&mut ctx, &Type::tuple(vec![Type::uint256(), Type::uint256()]), true)
            .unwrap();
        assert_eq!(ctx.stack_height(), 1);
    }

    #[test]
    fn byte_element_zeroing_masks_one_byte() {
        let env = TypeEnv::new();
        let mut ctx = ctx(&env);
        ctx.push(0u32);
        ctx.push(31u32);
        LValue::StorageByteArrayElement.set_to_zero(&mut ctx, true).unwrap();
        assert_eq!(ctx.stack_height(), 0);
        assert_eq!(ctx.assembly().count_op(Instruction::SStore), 1);
    }

    #[test]
    fn memory_bytes_are_written_one_byte_at_a_time() {
        let env = TypeEnv::new();
        let mut ctx = ctx(&env);
        ctx.push(0x61u32);
        ctx.push(0x80u32);
        LValue::MemoryByteArrayElement
            .store_value(&mut ctx, &Type::fixed_bytes(1), true)
            .unwrap();
        assert_eq!(ctx.stack_height(), 0);
        assert_eq!(ctx.assembly().count_op(Instruction::MStore8), 1);
        assert_eq!(ctx.assembly().count_op(Instruction::MStore), 0);
    }

    #[test]
    fn immutables_need_construction_context() {
        let env = TypeEnv::new();
        let mut ctx = ctx(&env);
        ctx.reserve_immutable(VariableId(0));
        let lvalue = LValue::Immutable {
            variable: VariableId(0),
            ty: Type::uint256(),
        };
        ctx.push(1u32);
        assert!(lvalue.store_value(&mut ctx, &Type::uint256(), true).is_err());
        ctx.set_creation(true);
        lvalue.store_value(&mut ctx, &Type::uint256(), true).unwrap();
        ctx.set_creation(false);
        lvalue.retrieve_value(&mut ctx, true).unwrap();
        assert!(matches!(
            ctx.assembly().items().last(),
            Some(AssemblyItem::PushImmutable(VariableId(0)))
        ));
    }
}
