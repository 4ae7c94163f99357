//! Tuples and inline arrays.
//!
//! A tuple value is its components side by side on the stack; as an
//! assignment target it is a tuple of lvalues. An inline array `[a, b]`
//! is a fresh static memory array.

use quill_core::ast::{Expr, TupleExpr};
use quill_core::{CompilationError, Type};

use super::{ExprCompiler, Result};
use crate::helpers::code::{add, call, lit, slot};
use crate::helpers::memory::{allocate_memory_array, write_to_memory};
use crate::lvalue::LValue;

/// Compile a tuple or inline array expression.
pub fn compile_tuple(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    tuple: &TupleExpr<'_>,
    want_lvalue: bool,
) -> Result<()> {
    if tuple.inline_array {
        return compile_inline_array(compiler, expr, tuple);
    }
    if want_lvalue {
        let mut components = Vec::with_capacity(tuple.components.len());
        for component in tuple.components {
            components.push(match component {
                Some(component) => Some(compiler.compile_lvalue(component)?),
                None => None,
            });
        }
        compiler.current_lvalue = Some(LValue::Tuple(components));
        return Ok(());
    }
    for component in tuple.components.iter().flatten() {
        compiler.compile(component)?;
    }
    Ok(())
}

fn compile_inline_array(compiler: &mut ExprCompiler<'_, '_>, expr: &Expr<'_>, tuple: &TupleExpr<'_>) -> Result<()> {
    let ty = compiler.type_of(expr);
    let Type::Array(array) = ty else {
        return Err(CompilationError::internal("inline array of non-array type"));
    };
    let stride = array.base.memory_head_size(compiler.env());
    let allocate = allocate_memory_array(compiler.ctx, ty)?;
    let ptr = compiler
        .ctx
        .let_(call(allocate, [lit(tuple.components.len() as u64)]))?;
    for (index, element) in tuple.components.iter().enumerate() {
        let Some(element) = element else {
            return Err(CompilationError::internal("inline array with an empty element"));
        };
        compiler.compile_to(element, &array.base)?;
        let value = compiler.ctx.stack_height() - 1;
        let store = write_to_memory(
            compiler.ctx,
            &array.base,
            add(slot(ptr), lit(stride * index as u64)),
            slot(value),
        );
        compiler.ctx.exec(store)?;
        compiler.ctx.pop(1);
    }
    Ok(())
}
