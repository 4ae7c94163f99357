//! Identifier compilation.
//!
//! Locals live in fixed stack slots, state variables at their storage
//! position (or in the immutable area), and function names evaluate to the
//! entry tag of the most derived override.

use quill_core::ast::{Decl, Expr};
use quill_core::{CompilationError, ContractId, ContractKind, FunctionId, Type, TypeEnv, VariableId};
use tracing::trace;

use super::{ExprCompiler, Result};
use crate::asm::Instruction;
use crate::lvalue::{LValue, storage_item};

/// Compile a resolved identifier.
pub fn compile_ident(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    decl: Decl,
    want_lvalue: bool,
) -> Result<()> {
    match decl {
        Decl::Local(id) => {
            let slot = compiler.ctx.local_slot(id)?;
            let ty = compiler.type_of(expr).clone();
            compiler.set_location(LValue::Stack { slot, ty }, want_lvalue)
        }
        Decl::StateVariable(variable) => compile_state_variable(compiler, variable, want_lvalue),
        Decl::Function(function) => {
            let target = resolve_virtual(compiler.env(), compiler.ctx.scope(), function);
            let tag = compiler.ctx.function_entry_label(target);
            trace!(function = target.0, %tag, "function reference");
            compiler.ctx.push_tag(tag);
            Ok(())
        }
        Decl::This => {
            compiler.ctx.op(Instruction::Address);
            Ok(())
        }
        // types, events, builtins and `super` only select what a member
        // access or call does
        Decl::Event(_)
        | Decl::Contract(_)
        | Decl::Struct(_)
        | Decl::Enum(_)
        | Decl::Builtin
        | Decl::Super
        | Decl::TypeName => Ok(()),
    }
}

fn compile_state_variable(compiler: &mut ExprCompiler<'_, '_>, variable: VariableId, want_lvalue: bool) -> Result<()> {
    let env = compiler.env();
    let def = env.variable(variable);
    if def.immutable {
        let lvalue = LValue::Immutable {
            variable,
            ty: def.ty.clone(),
        };
        return compiler.set_location(lvalue, want_lvalue);
    }
    let scope = compiler
        .ctx
        .scope()
        .ok_or_else(|| CompilationError::internal(format!("state variable {} outside of a contract", def.name)))?;
    let layout = env.contract_layout(scope)?;
    let position = layout.slot_of(variable).ok_or_else(|| {
        CompilationError::internal(format!(
            "state variable {} is not part of the layout of {}",
            def.name,
            env.contract(scope).name
        ))
    })?;
    compiler.ctx.push(position.slot.clone());
    compiler.ctx.push(position.offset);
    compiler.set_location(storage_item(&def.ty), want_lvalue)
}

/// The function an internal reference to `function` calls from `scope`:
/// the first definition with the same name and parameter types along the
/// linearized bases, most derived first.
pub(crate) fn resolve_virtual(env: &TypeEnv, scope: Option<ContractId>, function: FunctionId) -> FunctionId {
    let def = env.function(function);
    let Some(scope) = scope else {
        return function;
    };
    let in_library = def
        .contract
        .is_some_and(|c| env.contract(c).kind == ContractKind::Library);
    if in_library || def.is_constructor {
        return function;
    }
    let params: Vec<&Type> = def.params.iter().map(|p| &p.ty).collect();
    env.contract(scope)
        .bases
        .iter()
        .flat_map(|base| env.contract(*base).functions.iter().copied())
        .find(|candidate| {
            let other = env.function(*candidate);
            !other.is_constructor
                && other.name == def.name
                && other.params.len() == params.len()
                && other.params.iter().zip(&params).all(|(p, q)| p.ty == **q)
        })
        .unwrap_or(function)
}
