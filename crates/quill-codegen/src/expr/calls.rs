//! Call compilation.
//!
//! A call node is dispatched on the callee's type:
//!
//! - type names convert their single argument, struct names construct a
//!   memory struct
//! - internal functions jump to the callee's entry tag and come back to a
//!   fresh return tag
//! - `.gas()`, `.value()` and `.salt()` slot their argument into the
//!   callee's option words
//! - message calls, creations and transfers live in `external`, every other
//!   builtin in `builtins`

use quill_core::ast::{CallExpr, Expr};
use quill_core::{CompilationError, DataLocation, FunctionKind, FunctionType, Type};
use tracing::trace;

use super::{ExprCompiler, Result, builtins, external};
use crate::helpers::code::{add, call, lit, slot};
use crate::helpers::convert::convert_type;
use crate::helpers::memory::{allocate_and_zero_memory_array, allocate_memory_struct, write_to_memory};

/// Compile a call expression. Only `push()` without an argument yields a
/// location when `want_lvalue` is set.
pub fn compile_call(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    node: &CallExpr<'_>,
    want_lvalue: bool,
) -> Result<()> {
    let callee = compiler.type_of(node.callee);
    match callee {
        Type::TypeType(inner) => match &**inner {
            Type::Struct(s) => compile_struct_constructor(compiler, expr, node, s.id),
            _ => compile_conversion(compiler, expr, node),
        },
        Type::Function(function) => match function.kind {
            FunctionKind::Internal => compile_internal_call(compiler, expr, node, function),
            FunctionKind::External
            | FunctionKind::DelegateCall
            | FunctionKind::BareCall
            | FunctionKind::BareCallCode
            | FunctionKind::BareDelegateCall
            | FunctionKind::BareStaticCall
            | FunctionKind::Creation
            | FunctionKind::Send
            | FunctionKind::Transfer => external::compile_external_call(compiler, expr, node, function),
            FunctionKind::SetGas | FunctionKind::SetValue | FunctionKind::SetSalt => {
                compile_option(compiler, node, function)
            }
            FunctionKind::ObjectCreation => compile_new_array(compiler, expr, node),
            _ => builtins::compile_builtin_call(compiler, expr, node, function, want_lvalue),
        },
        other => Err(CompilationError::internal(format!(
            "call of non-callable {}",
            other.name(compiler.env())
        ))),
    }
}

/// `T(x)`.
fn compile_conversion(compiler: &mut ExprCompiler<'_, '_>, expr: &Expr<'_>, node: &CallExpr<'_>) -> Result<()> {
    let [arg] = node.args else {
        return Err(CompilationError::internal("conversion with other than one argument"));
    };
    compiler.compile(arg)?;
    let from = compiler.type_of(arg);
    let to = compiler.type_of(expr);
    convert_type(compiler.ctx, from, to)
}

/// `S(a, b, ...)`: allocate the struct and write every member.
fn compile_struct_constructor(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    node: &CallExpr<'_>,
    id: quill_core::StructId,
) -> Result<()> {
    let env = compiler.env();
    let ty = compiler.type_of(expr);
    let members = env.struct_memory_members(id);
    if members.len() != node.args.len() {
        return Err(CompilationError::internal("struct constructor arity mismatch"));
    }
    let allocate = allocate_memory_struct(compiler.ctx, ty)?;
    let ptr = compiler.ctx.let_(call(allocate, []))?;
    for (index, ((_, member), arg)) in members.iter().zip(node.args).enumerate() {
        let member = member.with_location_if_reference(DataLocation::Memory);
        compiler.compile_to(arg, &member)?;
        let value = compiler.ctx.stack_height() - 1;
        let store = write_to_memory(compiler.ctx, &member, add(slot(ptr), lit(32 * index as u64)), slot(value));
        compiler.ctx.exec(store)?;
        compiler.ctx.pop(1);
    }
    Ok(())
}

/// `new T[](n)`.
fn compile_new_array(compiler: &mut ExprCompiler<'_, '_>, expr: &Expr<'_>, node: &CallExpr<'_>) -> Result<()> {
    let [length] = node.args else {
        return Err(CompilationError::internal("array allocation with other than one argument"));
    };
    let ty = compiler.type_of(expr);
    compiler.compile_to(length, &Type::uint256())?;
    let allocate = allocate_and_zero_memory_array(compiler.ctx, ty)?;
    compiler.ctx.call_helper(allocate, 1, 1)
}

/// Call of an internal function value.
///
/// ```text
/// returnTag  fnTag [receiver...] args...   (rotate fnTag up, JUMP)
/// returnTag [receiver...] args...          (callee returns to returnTag)
/// results...
/// ```
fn compile_internal_call(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    node: &CallExpr<'_>,
    function: &FunctionType,
) -> Result<()> {
    let env = compiler.env();
    let height = compiler.ctx.stack_height();
    let return_tag = compiler.ctx.new_tag();
    compiler.ctx.push_tag(return_tag);

    // 1. Function tag and bound receiver
    compiler.compile(node.callee)?;

    // 2. Arguments
    compiler.compile_args(node.args, function.call_params())?;

    // 3. Jump with the tag on top
    let below = compiler.ctx.stack_height() - height - 2;
    compiler.ctx.rotate_up(below)?;
    compiler.ctx.op(crate::asm::Instruction::Jump);

    // 4. Results replace the frame on return
    let returns = compiler.type_of(expr).size_on_stack(env);
    compiler.ctx.set_stack_height(height + returns);
    compiler.ctx.place_tag(return_tag);
    trace!(%return_tag, returns, "internal call");
    Ok(())
}

/// `f.gas(g)`, `f.value(v)`, `f.salt(s)`: the callee words are already on
/// the stack; insert the option so options stay in gas, value, salt order.
fn compile_option(compiler: &mut ExprCompiler<'_, '_>, node: &CallExpr<'_>, setter: &FunctionType) -> Result<()> {
    let Some(Type::Function(target)) = setter.returns.first() else {
        return Err(CompilationError::internal("call option without a function result"));
    };
    if target.bound() {
        return Err(CompilationError::unimplemented("call options on bound functions", node.callee.span));
    }
    let [arg] = node.args else {
        return Err(CompilationError::internal("call option with other than one argument"));
    };
    compiler.compile(node.callee)?;
    let param = setter
        .params
        .first()
        .ok_or_else(|| CompilationError::internal("call option without a parameter"))?;
    compiler.compile_to(arg, param)?;
    let later = match setter.kind {
        FunctionKind::SetGas => usize::from(target.value_set()) + usize::from(target.salt_set()),
        FunctionKind::SetValue => usize::from(target.salt_set()),
        _ => 0,
    };
    compiler.ctx.rotate_down(later)
}
