//! Binary operator compilation.
//!
//! Operands are evaluated left to right and converted to the operation
//! type the checker recorded (`common`), except for shift amounts and
//! exponents, which keep their own type. `&&` and `||` short-circuit.

use quill_core::ast::{BinaryExpr, BinaryOp};
use quill_core::{CompilationError, Span, Type};

use super::{ExprCompiler, Result};
use crate::asm::Instruction;
use crate::helpers::code::slot;
use crate::helpers::math::{
    arithmetic_function, cleanup, exp_function, shift_left_dynamic, shift_right_signed_dynamic,
    shift_right_unsigned_dynamic,
};

/// Compile a binary operation.
pub fn compile_binary(compiler: &mut ExprCompiler<'_, '_>, binary: &BinaryExpr<'_>) -> Result<()> {
    if binary.op.is_boolean() {
        return compile_short_circuit(compiler, binary);
    }
    let env = compiler.env();
    let common = env.ty(binary.common);
    compiler.compile_to(binary.left, common)?;
    let right = match binary.op {
        BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Exp => {
            let right_ty = compiler.type_of(binary.right);
            let mobile = right_ty
                .mobile_type(env)
                .ok_or_else(|| CompilationError::internal("operand without a mobile type"))?;
            compiler.compile_to(binary.right, &mobile)?;
            mobile
        }
        _ => {
            compiler.compile_to(binary.right, common)?;
            common.clone()
        }
    };
    apply_binary(compiler, binary.op, common, &right, binary.right.span)
}

/// `a && b`, `a || b`: the right operand only runs when the left one does
/// not decide the result.
fn compile_short_circuit(compiler: &mut ExprCompiler<'_, '_>, binary: &BinaryExpr<'_>) -> Result<()> {
    let end = compiler.ctx.new_tag();
    compiler.compile_to(binary.left, &Type::Bool)?;
    compiler.ctx.dup(1)?;
    if binary.op == BinaryOp::And {
        compiler.ctx.op(Instruction::IsZero);
    }
    compiler.ctx.jump_if(end);
    compiler.ctx.pop(1);
    compiler.compile_to(binary.right, &Type::Bool)?;
    compiler.ctx.place_tag(end);
    Ok(())
}

/// Apply `op` to the two operands on top of the stack (`left` below
/// `right`), leaving the result. `left` has the operation type `common`;
/// `right` has `common` too, except for shifts and exponentiation.
pub(super) fn apply_binary(
    compiler: &mut ExprCompiler<'_, '_>,
    op: BinaryOp,
    common: &Type,
    right: &Type,
    span: Span,
) -> Result<()> {
    let ctx = &mut *compiler.ctx;
    let signed = common.is_signed();
    match op {
        BinaryOp::Equal | BinaryOp::NotEqual => {
            if common.size_on_stack(ctx.env()) != 1 {
                return Err(CompilationError::unimplemented("comparison of multi-word values", span));
            }
            ctx.op(Instruction::Eq);
            if op == BinaryOp::NotEqual {
                ctx.op(Instruction::IsZero);
            }
        }
        // the right operand is on top, so `l < r` is `r > l`
        BinaryOp::Less => ctx.op(if signed { Instruction::Sgt } else { Instruction::Gt }),
        BinaryOp::Greater => ctx.op(if signed { Instruction::Slt } else { Instruction::Lt }),
        BinaryOp::LessEqual => {
            ctx.op(if signed { Instruction::Slt } else { Instruction::Lt });
            ctx.op(Instruction::IsZero);
        }
        BinaryOp::GreaterEqual => {
            ctx.op(if signed { Instruction::Sgt } else { Instruction::Gt });
            ctx.op(Instruction::IsZero);
        }
        BinaryOp::BitAnd => ctx.op(Instruction::And),
        BinaryOp::BitOr => ctx.op(Instruction::Or),
        BinaryOp::BitXor => ctx.op(Instruction::Xor),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let helper = arithmetic_function(ctx, op, common)?;
            ctx.call_helper(helper, 2, 1)?;
        }
        BinaryOp::Exp => {
            let helper = exp_function(ctx, common, right)?;
            ctx.call_helper(helper, 2, 1)?;
        }
        BinaryOp::Shl | BinaryOp::Shr => {
            if right.is_signed() {
                return Err(CompilationError::unimplemented("shift by a signed amount", span));
            }
            let helper = match op {
                BinaryOp::Shl => shift_left_dynamic(ctx)?,
                _ if signed => shift_right_signed_dynamic(ctx)?,
                _ => shift_right_unsigned_dynamic(ctx)?,
            };
            // helpers take the amount first
            ctx.swap(1)?;
            ctx.call_helper(helper, 2, 1)?;
            let top = ctx.stack_height() - 1;
            let env = ctx.env();
            ctx.assign(top, cleanup(env, common, slot(top)))?;
        }
        BinaryOp::And | BinaryOp::Or => {
            return Err(CompilationError::internal("boolean operators short-circuit"));
        }
    }
    Ok(())
}
