//! Index access on mappings, arrays and fixed-size byte arrays.

use quill_core::ast::{Expr, IndexExpr};
use quill_core::{CompilationError, DataLocation, Type};

use super::{ExprCompiler, Result, keep_only};
use crate::helpers::abort::panic_code::OUT_OF_BOUNDS;
use crate::helpers::code::*;
use crate::helpers::math::{cleanup, left_mask};
use crate::helpers::memory::memory_array_index_access;
use crate::helpers::storage::{mapping_index_access, storage_array_index_access};
use crate::lvalue::{LValue, storage_item};

/// Compile `base[index]`.
pub fn compile_index(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    node: &IndexExpr<'_>,
    want_lvalue: bool,
) -> Result<()> {
    let env = compiler.env();
    let base_ty = compiler.type_of(node.base);
    let Some(index) = node.index else {
        // `T[]` as a type name
        return Ok(());
    };
    if let Type::TypeType(_) = base_ty {
        return Ok(());
    }
    let element = compiler.type_of(expr);
    let base = compiler.ctx.stack_height();
    compiler.compile(node.base)?;

    match base_ty {
        Type::Mapping(mapping) => {
            let key = if mapping.key.is_reference_type() {
                mapping.key.with_location(DataLocation::Memory, true)
            } else {
                (*mapping.key).clone()
            };
            compiler.compile_to(index, &key)?;
            let ctx = &mut *compiler.ctx;
            let access = mapping_index_access(ctx, base_ty, &key)?;
            ctx.call_helper(access, 2, 1)?;
            ctx.push(0u32);
            compiler.set_location(storage_item(&mapping.value), want_lvalue)
        }
        Type::Array(array) => {
            compiler.compile_to(index, &Type::uint256())?;
            let ctx = &mut *compiler.ctx;
            match array.location {
                DataLocation::Storage => {
                    let access = storage_array_index_access(ctx, base_ty)?;
                    ctx.call_helper(access, 2, 2)?;
                    let lvalue = if array.is_byte_array() {
                        LValue::StorageByteArrayElement
                    } else {
                        storage_item(element)
                    };
                    compiler.set_location(lvalue, want_lvalue)
                }
                DataLocation::Memory => {
                    let access = memory_array_index_access(ctx, base_ty)?;
                    ctx.call_helper(access, 2, 1)?;
                    let lvalue = if array.is_byte_array() {
                        LValue::MemoryByteArrayElement
                    } else {
                        LValue::Memory { ty: element.clone() }
                    };
                    compiler.set_location(lvalue, want_lvalue)
                }
                DataLocation::CallData => {
                    let index_slot = ctx.stack_height() - 1;
                    let length = match &array.length {
                        Some(length) => lit(length.clone()),
                        None => slot(base + 1),
                    };
                    ctx.panic_if(iszero(lt(slot(index_slot), length)), OUT_OF_BOUNDS)?;
                    let value = if array.is_byte_array() {
                        ctx.let_(and(
                            calldataload(add(slot(base), slot(index_slot))),
                            lit(left_mask(8)),
                        ))?
                    } else if element.is_value_type() {
                        let stride = element.calldata_encoded_size(env, true);
                        ctx.let_(cleanup(
                            env,
                            element,
                            calldataload(add(slot(base), mul(slot(index_slot), lit(stride)))),
                        ))?
                    } else {
                        return Err(CompilationError::unimplemented(
                            "index access to calldata arrays of reference types",
                            node.base.span,
                        ));
                    };
                    keep_only(ctx, base, &[value])
                }
            }
        }
        Type::FixedBytes(length) => {
            compiler.compile_to(index, &Type::uint256())?;
            let ctx = &mut *compiler.ctx;
            let (value, index_slot) = (base, base + 1);
            ctx.panic_if(iszero(lt(slot(index_slot), lit(*length))), OUT_OF_BOUNDS)?;
            let byte_value = ctx.let_(shl(lit(248u32), byte(slot(index_slot), slot(value))))?;
            keep_only(ctx, base, &[byte_value])
        }
        other => Err(CompilationError::internal(format!(
            "index access on {}",
            other.name(env)
        ))),
    }
}
