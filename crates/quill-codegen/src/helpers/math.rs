//! Value cleanup and integer arithmetic helpers.
//!
//! Integer values of fewer than 256 bits live on the stack in their cleaned
//! form: zero-extended when unsigned, sign-extended when signed. Checked
//! helpers re-clean their operands, detect overflow before computing and
//! panic with code `0x11` (`0x12` for division by zero); wrapping helpers
//! compute in 256 bits and clean the result.

use num_bigint::BigUint;
use quill_core::ast::BinaryOp;
use quill_core::num::{low_mask, to_word};
use quill_core::types::IntegerType;
use quill_core::{CompilationError, FunctionKind, Type, TypeEnv};

use super::abort::panic_code::{DIVISION_BY_ZERO, OVERFLOW};
use super::code::*;
use crate::asm::Tag;
use crate::context::CompilerContext;

type Result<T> = std::result::Result<T, CompilationError>;

/// Reduce `value` to the canonical stack form of `ty`.
pub fn cleanup(env: &TypeEnv, ty: &Type, value: Word) -> Word {
    match ty {
        Type::Integer(int) if int.bits < 256 => {
            if int.signed {
                signextend(lit(int.bits / 8 - 1), value)
            } else {
                and(value, lit(low_mask(u32::from(int.bits))))
            }
        }
        Type::Bool => iszero(iszero(value)),
        Type::Address { .. } | Type::Contract(_) => and(value, lit(low_mask(160))),
        Type::FixedBytes(n) if *n < 32 => and(value, lit(left_mask(u32::from(*n) * 8))),
        Type::Enum(_) => and(value, lit(low_mask(ty.storage_bytes(env) * 8))),
        Type::Function(f) if f.kind == FunctionKind::External => and(value, lit(left_mask(192))),
        Type::Function(f) if f.kind == FunctionKind::Internal => and(value, lit(low_mask(64))),
        _ => value,
    }
}

/// Mask of the `bits` most significant bits of a word.
pub fn left_mask(bits: u32) -> BigUint {
    low_mask(bits) << (256 - bits)
}

fn integer(ty: &Type) -> Result<IntegerType> {
    match ty {
        Type::Integer(int) => Ok(*int),
        _ => Err(CompilationError::internal(format!("integer type expected, got {ty:?}"))),
    }
}

/// `(min, max)` of an integer type as stack words.
fn bounds(int: IntegerType) -> (BigUint, BigUint) {
    (to_word(&int.min_value()), to_word(&int.max_value()))
}

/// `cleanup_<t>(value) -> cleaned`.
pub fn cleanup_function(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let env = ctx.env();
    let name = format!("cleanup_{}", ty.identifier(env));
    let ty = ty.clone();
    ctx.helper(&name, 1, 1, move |ctx| {
        let cleaned = ctx.let_(cleanup(env, &ty, slot(1)))?;
        ctx.helper_return(&[cleaned])
    })
}

/// The helper implementing `op` on `ty` under the configured arithmetic
/// mode: `(x, y) -> result`.
pub fn arithmetic_function(ctx: &mut CompilerContext<'_>, op: BinaryOp, ty: &Type) -> Result<Tag> {
    let checked = ctx.settings().checked();
    match (op, checked) {
        (BinaryOp::Add, true) => checked_add(ctx, ty),
        (BinaryOp::Sub, true) => checked_sub(ctx, ty),
        (BinaryOp::Mul, true) => checked_mul(ctx, ty),
        (BinaryOp::Div, true) => checked_div(ctx, ty),
        (BinaryOp::Mod, true) => checked_mod(ctx, ty),
        (BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod, false) => {
            wrapping(ctx, op, ty)
        }
        _ => Err(CompilationError::internal(format!("{op} is not an arithmetic helper"))),
    }
}

/// `checked_add_<t>(x, y) -> sum`.
pub fn checked_add(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let int = integer(ty)?;
    let env = ctx.env();
    let name = format!("checked_add_{}", ty.identifier(env));
    let ty = ty.clone();
    ctx.helper(&name, 2, 1, move |ctx| {
        let x = ctx.let_(cleanup(env, &ty, slot(1)))?;
        let y = ctx.let_(cleanup(env, &ty, slot(2)))?;
        let (min, max) = bounds(int);
        if int.signed {
            // x >= 0 && y > max - x
            ctx.panic_if(
                and(iszero(slt(slot(x), lit(0u32))), sgt(slot(y), sub(lit(max), slot(x)))),
                OVERFLOW,
            )?;
            // x < 0 && y < min - x
            ctx.panic_if(and(slt(slot(x), lit(0u32)), slt(slot(y), sub(lit(min), slot(x)))), OVERFLOW)?;
        } else {
            ctx.panic_if(gt(slot(x), sub(lit(max), slot(y))), OVERFLOW)?;
        }
        let sum = ctx.let_(add(slot(x), slot(y)))?;
        ctx.helper_return(&[sum])
    })
}

/// `checked_sub_<t>(x, y) -> difference`.
pub fn checked_sub(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let int = integer(ty)?;
    let env = ctx.env();
    let name = format!("checked_sub_{}", ty.identifier(env));
    let ty = ty.clone();
    ctx.helper(&name, 2, 1, move |ctx| {
        let x = ctx.let_(cleanup(env, &ty, slot(1)))?;
        let y = ctx.let_(cleanup(env, &ty, slot(2)))?;
        let (min, max) = bounds(int);
        if int.signed {
            // y >= 0 && x < min + y
            ctx.panic_if(
                and(iszero(slt(slot(y), lit(0u32))), slt(slot(x), add(lit(min), slot(y)))),
                OVERFLOW,
            )?;
            // y < 0 && x > max + y
            ctx.panic_if(and(slt(slot(y), lit(0u32)), sgt(slot(x), add(lit(max), slot(y)))), OVERFLOW)?;
        } else {
            ctx.panic_if(lt(slot(x), slot(y)), OVERFLOW)?;
        }
        let difference = ctx.let_(sub(slot(x), slot(y)))?;
        ctx.helper_return(&[difference])
    })
}

/// `checked_mul_<t>(x, y) -> product`.
pub fn checked_mul(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let int = integer(ty)?;
    let env = ctx.env();
    let name = format!("checked_mul_{}", ty.identifier(env));
    let ty = ty.clone();
    ctx.helper(&name, 2, 1, move |ctx| {
        let x = ctx.let_(cleanup(env, &ty, slot(1)))?;
        let y = ctx.let_(cleanup(env, &ty, slot(2)))?;
        let (min, max) = bounds(int);
        let zero = || lit(0u32);
        if int.signed {
            let positive = |s| sgt(slot(s), zero());
            let negative = |s| slt(slot(s), zero());
            ctx.panic_if(
                and(and(positive(x), positive(y)), gt(slot(x), div(lit(max.clone()), slot(y)))),
                OVERFLOW,
            )?;
            ctx.panic_if(
                and(and(positive(x), negative(y)), slt(slot(y), sdiv(lit(min.clone()), slot(x)))),
                OVERFLOW,
            )?;
            ctx.panic_if(
                and(and(negative(x), positive(y)), slt(slot(x), sdiv(lit(min), slot(y)))),
                OVERFLOW,
            )?;
            ctx.panic_if(
                and(and(negative(x), negative(y)), slt(slot(x), sdiv(lit(max), slot(y)))),
                OVERFLOW,
            )?;
        } else {
            ctx.panic_if(and(iszero(iszero(slot(x))), gt(slot(y), div(lit(max), slot(x)))), OVERFLOW)?;
        }
        let product = ctx.let_(mul(slot(x), slot(y)))?;
        ctx.helper_return(&[product])
    })
}

/// `checked_div_<t>(x, y) -> quotient`.
pub fn checked_div(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let int = integer(ty)?;
    let env = ctx.env();
    let name = format!("checked_div_{}", ty.identifier(env));
    let ty = ty.clone();
    ctx.helper(&name, 2, 1, move |ctx| {
        let x = ctx.let_(cleanup(env, &ty, slot(1)))?;
        let y = ctx.let_(cleanup(env, &ty, slot(2)))?;
        ctx.panic_if(iszero(slot(y)), DIVISION_BY_ZERO)?;
        let quotient = if int.signed {
            let (min, _) = bounds(int);
            ctx.panic_if(and(eq(slot(x), lit(min)), eq(slot(y), not(lit(0u32)))), OVERFLOW)?;
            ctx.let_(sdiv(slot(x), slot(y)))?
        } else {
            ctx.let_(div(slot(x), slot(y)))?
        };
        ctx.helper_return(&[quotient])
    })
}

/// `checked_mod_<t>(x, y) -> remainder`.
pub fn checked_mod(ctx: &mut CompilerContext<'_>, ty: &Type) -> Result<Tag> {
    let int = integer(ty)?;
    let env = ctx.env();
    let name = format!("checked_mod_{}", ty.identifier(env));
    let ty = ty.clone();
    ctx.helper(&name, 2, 1, move |ctx| {
        let x = ctx.let_(cleanup(env, &ty, slot(1)))?;
        let y = ctx.let_(cleanup(env, &ty, slot(2)))?;
        ctx.panic_if(iszero(slot(y)), DIVISION_BY_ZERO)?;
        let remainder = if int.signed {
            ctx.let_(smod(slot(x), slot(y)))?
        } else {
            ctx.let_(mod_(slot(x), slot(y)))?
        };
        ctx.helper_return(&[remainder])
    })
}

/// `wrapping_<op>_<t>(x, y) -> result`. Division and modulo by zero still panic.
pub fn wrapping(ctx: &mut CompilerContext<'_>, op: BinaryOp, ty: &Type) -> Result<Tag> {
    let int = integer(ty)?;
    let env = ctx.env();
    let name = format!("wrapping_{}_{}", op.helper_name(), ty.identifier(env));
    let ty = ty.clone();
    ctx.helper(&name, 2, 1, move |ctx| {
        let x = ctx.let_(cleanup(env, &ty, slot(1)))?;
        let y = ctx.let_(cleanup(env, &ty, slot(2)))?;
        let raw = match op {
            BinaryOp::Add => add(slot(x), slot(y)),
            BinaryOp::Sub => sub(slot(x), slot(y)),
            BinaryOp::Mul => mul(slot(x), slot(y)),
            BinaryOp::Div | BinaryOp::Mod => {
                ctx.panic_if(iszero(slot(y)), DIVISION_BY_ZERO)?;
                match (op, int.signed) {
                    (BinaryOp::Div, true) => sdiv(slot(x), slot(y)),
                    (BinaryOp::Div, false) => div(slot(x), slot(y)),
                    (_, true) => smod(slot(x), slot(y)),
                    (_, false) => mod_(slot(x), slot(y)),
                }
            }
            _ => return Err(CompilationError::internal(format!("no wrapping helper for {op}"))),
        };
        let result = ctx.let_(cleanup(env, &ty, raw))?;
        ctx.helper_return(&[result])
    })
}

// ============================================================================
// Exponentiation
// ============================================================================

/// `checked_exp_<base>_<exponent>(base, exponent) -> power`, or its wrapping
/// counterpart.
pub fn exp_function(ctx: &mut CompilerContext<'_>, base: &Type, exponent: &Type) -> Result<Tag> {
    let base_int = integer(base)?;
    if integer(exponent)?.signed {
        return Err(CompilationError::internal("signed exponent reached code generation"));
    }
    let env = ctx.env();
    let checked = ctx.settings().checked();
    let name = format!(
        "{}_exp_{}_{}",
        if checked { "checked" } else { "wrapping" },
        base.identifier(env),
        exponent.identifier(env)
    );
    let (base, exponent) = (base.clone(), exponent.clone());
    ctx.helper(&name, 2, 1, move |ctx| {
        let b = ctx.let_(cleanup(env, &base, slot(1)))?;
        let e = ctx.let_(cleanup(env, &exponent, slot(2)))?;
        let (min, max) = bounds(base_int);
        let power = if !checked {
            ctx.let_(cleanup(env, &base, exp(slot(b), slot(e))))?
        } else if base_int.signed {
            let helper = checked_exp_signed(ctx)?;
            ctx.let_(call(helper, [slot(b), slot(e), lit(min), lit(max)]))?
        } else {
            let helper = checked_exp_unsigned(ctx)?;
            ctx.let_(call(helper, [slot(b), slot(e), lit(max)]))?
        };
        ctx.helper_return(&[power])
    })
}

/// `checked_exp_helper(power, base, exponent, max) -> (power, base)`:
/// square-and-multiply for `exponent > 1`, checking `base * base` before
/// every squaring. `|power| <= base` holds across iterations, so the final
/// `power * base` only needs one more check by the caller.
fn checked_exp_helper(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    ctx.helper("checked_exp_helper", 4, 2, |ctx| {
        let (power, base, exponent, max) = (1, 2, 3, 4);
        ctx.while_(gt(slot(exponent), lit(1u32)), |ctx| {
            ctx.panic_if(gt(slot(base), div(slot(max), slot(base))), OVERFLOW)?;
            ctx.if_(and(slot(exponent), lit(1u32)), |ctx| {
                ctx.assign(power, mul(slot(power), slot(base)))
            })?;
            ctx.assign(base, mul(slot(base), slot(base)))?;
            ctx.assign(exponent, shr(lit(1u32), slot(exponent)))
        })?;
        ctx.helper_return(&[power, base])
    })
}

fn return_constant(ctx: &mut CompilerContext<'_>, value: u32) -> Result<()> {
    let result = ctx.let_(lit(value))?;
    ctx.helper_return(&[result])
}

fn return_checked_power(ctx: &mut CompilerContext<'_>, base: usize, exponent: usize, max: usize) -> Result<()> {
    let power = ctx.let_(exp(slot(base), slot(exponent)))?;
    ctx.panic_if(gt(slot(power), slot(max)), OVERFLOW)?;
    ctx.helper_return(&[power])
}

/// `checked_exp_unsigned(base, exponent, max) -> power`.
fn checked_exp_unsigned(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    let helper = checked_exp_helper(ctx)?;
    ctx.helper("checked_exp_unsigned", 3, 1, move |ctx| {
        let (base, exponent, max) = (1, 2, 3);
        ctx.if_(iszero(slot(exponent)), |ctx| return_constant(ctx, 1))?;
        ctx.if_(iszero(slot(base)), |ctx| return_constant(ctx, 0))?;
        ctx.if_(eq(slot(base), lit(1u32)), |ctx| return_constant(ctx, 1))?;
        ctx.if_(eq(slot(base), lit(2u32)), |ctx| {
            ctx.panic_if(gt(slot(exponent), lit(255u32)), OVERFLOW)?;
            return_checked_power(ctx, base, exponent, max)
        })?;
        // small bases and exponents whose power fits 256 bits
        ctx.if_(
            or(
                and(lt(slot(base), lit(11u32)), lt(slot(exponent), lit(78u32))),
                and(lt(slot(base), lit(307u32)), lt(slot(exponent), lit(32u32))),
            ),
            |ctx| return_checked_power(ctx, base, exponent, max),
        )?;
        let results = ctx.call_with(helper, [lit(1u32), slot(base), slot(exponent), slot(max)], 2)?;
        let (power, squared) = (results[0], results[1]);
        ctx.panic_if(gt(slot(power), div(slot(max), slot(squared))), OVERFLOW)?;
        let result = ctx.let_(mul(slot(power), slot(squared)))?;
        ctx.helper_return(&[result])
    })
}

/// `checked_exp_signed(base, exponent, min, max) -> power`.
fn checked_exp_signed(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    let helper = checked_exp_helper(ctx)?;
    ctx.helper("checked_exp_signed", 4, 1, move |ctx| {
        let (base, exponent, min, max) = (1, 2, 3, 4);
        ctx.if_(iszero(slot(exponent)), |ctx| return_constant(ctx, 1))?;
        ctx.if_(eq(slot(exponent), lit(1u32)), |ctx| ctx.helper_return(&[base]))?;
        ctx.if_(iszero(slot(base)), |ctx| return_constant(ctx, 0))?;
        // (-1) ** e alternates and never overflows
        ctx.if_(eq(slot(base), not(lit(0u32))), |ctx| {
            let result = ctx.let_(lit(1u32))?;
            ctx.if_(and(slot(exponent), lit(1u32)), |ctx| ctx.assign(result, not(lit(0u32))))?;
            ctx.helper_return(&[result])
        })?;
        ctx.if_else(
            sgt(slot(base), lit(0u32)),
            |ctx| ctx.panic_if(gt(slot(base), div(slot(max), slot(base))), OVERFLOW),
            |ctx| ctx.panic_if(slt(slot(base), sdiv(slot(max), slot(base))), OVERFLOW),
        )?;
        let power = ctx.let_(lit(1u32))?;
        ctx.if_(and(slot(exponent), lit(1u32)), |ctx| ctx.assign(power, slot(base)))?;
        ctx.assign(base, mul(slot(base), slot(base)))?;
        ctx.assign(exponent, shr(lit(1u32), slot(exponent)))?;
        let results = ctx.call_with(helper, [slot(power), slot(base), slot(exponent), slot(max)], 2)?;
        let (power, squared) = (results[0], results[1]);
        ctx.panic_if(
            and(sgt(slot(power), lit(0u32)), gt(slot(power), div(slot(max), slot(squared)))),
            OVERFLOW,
        )?;
        ctx.panic_if(
            and(slt(slot(power), lit(0u32)), slt(slot(power), sdiv(slot(min), slot(squared)))),
            OVERFLOW,
        )?;
        let result = ctx.let_(mul(slot(power), slot(squared)))?;
        ctx.helper_return(&[result])
    })
}

// ============================================================================
// Shifts
// ============================================================================

/// `shift_left_dynamic(bits, value) -> shifted`.
pub fn shift_left_dynamic(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    ctx.helper("shift_left_dynamic", 2, 1, |ctx| {
        let result = ctx.let_(shl(slot(1), slot(2)))?;
        ctx.helper_return(&[result])
    })
}

/// `shift_right_unsigned_dynamic(bits, value) -> shifted`.
pub fn shift_right_unsigned_dynamic(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    ctx.helper("shift_right_unsigned_dynamic", 2, 1, |ctx| {
        let result = ctx.let_(shr(slot(1), slot(2)))?;
        ctx.helper_return(&[result])
    })
}

/// `shift_right_signed_dynamic(bits, value) -> shifted`.
pub fn shift_right_signed_dynamic(ctx: &mut CompilerContext<'_>) -> Result<Tag> {
    ctx.helper("shift_right_signed_dynamic", 2, 1, |ctx| {
        let result = ctx.let_(sar(slot(1), slot(2)))?;
        ctx.helper_return(&[result])
    })
}
