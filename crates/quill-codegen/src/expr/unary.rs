//! Unary operator compilation, including `++`, `--` and `delete`.

use quill_core::ast::{BinaryOp, Expr, UnaryExpr, UnaryOp};
use quill_core::{CompilationError, Type};

use super::{ExprCompiler, Result};
use crate::asm::Instruction;
use crate::helpers::code::slot;
use crate::helpers::math::{arithmetic_function, cleanup};

/// Compile a unary operation.
pub fn compile_unary(compiler: &mut ExprCompiler<'_, '_>, expr: &Expr<'_>, unary: &UnaryExpr<'_>) -> Result<()> {
    let ty = compiler.type_of(expr);
    match unary.op {
        UnaryOp::Not => {
            compiler.compile_to(unary.operand, &Type::Bool)?;
            compiler.ctx.op(Instruction::IsZero);
            Ok(())
        }
        UnaryOp::BitNot => {
            compiler.compile_to(unary.operand, ty)?;
            let ctx = &mut *compiler.ctx;
            ctx.op(Instruction::Not);
            let top = ctx.stack_height() - 1;
            let env = ctx.env();
            ctx.assign(top, cleanup(env, ty, slot(top)))
        }
        UnaryOp::Neg => {
            // 0 - x, so checked arithmetic catches the minimum value
            compiler.compile_to(unary.operand, ty)?;
            let ctx = &mut *compiler.ctx;
            ctx.push(0u32);
            ctx.swap(1)?;
            let sub = arithmetic_function(ctx, BinaryOp::Sub, ty)?;
            ctx.call_helper(sub, 2, 1)
        }
        UnaryOp::Inc | UnaryOp::Dec => compile_step(compiler, unary),
        UnaryOp::Delete => {
            let lvalue = compiler.compile_lvalue(unary.operand)?;
            lvalue.set_to_zero(compiler.ctx, true)
        }
    }
}

/// `++x`, `x++`, `--x`, `x--`.
fn compile_step(compiler: &mut ExprCompiler<'_, '_>, unary: &UnaryExpr<'_>) -> Result<()> {
    let lvalue = compiler.compile_lvalue(unary.operand)?;
    let ty = lvalue.value_type();
    if !matches!(ty, Type::Integer(_)) {
        return Err(CompilationError::internal("increment of a non-integer"));
    }
    let op = if unary.op == UnaryOp::Inc { BinaryOp::Add } else { BinaryOp::Sub };
    let reference = lvalue.reference_size();
    let ctx = &mut *compiler.ctx;
    let helper = arithmetic_function(ctx, op, &ty)?;

    // ref... old
    lvalue.retrieve_value(ctx, false)?;
    if unary.prefix {
        ctx.push(1u32);
        ctx.call_helper(helper, 2, 1)?;
        // ref... new -> new ref...
        let mut layout: Vec<Option<usize>> = (1..=reference).map(Some).collect();
        layout.push(Some(0));
        ctx.shuffle(layout)?;
        lvalue.store_value(ctx, &ty, false)
    } else {
        ctx.dup(1)?;
        ctx.push(1u32);
        ctx.call_helper(helper, 2, 1)?;
        // ref... old new -> old new ref...
        let mut layout: Vec<Option<usize>> = (2..reference + 2).map(Some).collect();
        layout.push(Some(0));
        layout.push(Some(1));
        ctx.shuffle(layout)?;
        lvalue.store_value(ctx, &ty, true)
    }
}
