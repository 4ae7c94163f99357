//! Conditional expression compilation.

use quill_core::Type;
use quill_core::ast::{ConditionalExpr, Expr};

use super::{ExprCompiler, Result};
use crate::asm::Instruction;

/// Compile `condition ? then_branch : else_branch`.
///
/// Both branches leave a value of the expression type, so the stack
/// height at the join point is the same whichever branch ran.
pub fn compile_conditional(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    conditional: &ConditionalExpr<'_>,
) -> Result<()> {
    let ty = compiler.type_of(expr);
    let otherwise = compiler.ctx.new_tag();
    let end = compiler.ctx.new_tag();

    // 1. Condition
    compiler.compile_to(conditional.condition, &Type::Bool)?;
    compiler.ctx.op(Instruction::IsZero);
    compiler.ctx.jump_if(otherwise);
    let height = compiler.ctx.stack_height();

    // 2. Then branch
    compiler.compile_to(conditional.then_branch, ty)?;
    let joined = height + ty.size_on_stack(compiler.env());
    if !compiler.ctx.terminated() {
        compiler.ctx.jump(end);
    }

    // 3. Else branch
    compiler.ctx.set_stack_height(height);
    compiler.ctx.place_tag(otherwise);
    compiler.compile_to(conditional.else_branch, ty)?;

    compiler.ctx.place_tag(end);
    compiler.ctx.set_stack_height(joined);
    Ok(())
}
