//! Assignment compilation.
//!
//! The right-hand side is evaluated first, then the target location. A
//! plain assignment leaves the assigned value (or, for storage reference
//! targets, the target reference); compound assignments read the old value
//! through the same reference before storing the result.

use quill_core::ast::{AssignExpr, AssignOp, BinaryOp, Decl, Expr, ExprKind};
use quill_core::types::tuple_alignment;
use quill_core::{CompilationError, DataLocation, Type};

use super::binary::apply_binary;
use super::{ExprCompiler, Result};

/// Compile `target = value` or `target op= value`.
pub fn compile_assign(compiler: &mut ExprCompiler<'_, '_>, expr: &Expr<'_>, assign: &AssignExpr<'_>) -> Result<()> {
    match assign.op {
        AssignOp::Assign => compile_plain(compiler, assign),
        AssignOp::Compound(op) => compile_compound(compiler, expr, assign, op),
    }
}

fn compile_plain(compiler: &mut ExprCompiler<'_, '_>, assign: &AssignExpr<'_>) -> Result<()> {
    let value_ty = compiler.type_of(assign.value);
    let stored = stored_type(compiler, assign.target, value_ty);
    compiler.compile_to(assign.value, &stored)?;
    let lvalue = compiler.compile_lvalue(assign.target)?;
    lvalue.store_value(compiler.ctx, &stored, false)?;

    // values without a target were evaluated but are not part of the result
    if let (ExprKind::Tuple(tuple), Type::Tuple(components)) = (assign.target.kind, &stored) {
        let env = compiler.env();
        let targets = aligned_targets(tuple.components, components.len());
        let mut layout = Vec::new();
        let mut kept = 0;
        for (target, component) in targets.iter().zip(components) {
            let size = component.as_ref().map_or(0, |c| c.size_on_stack(env));
            for _ in 0..size {
                if target.is_some() {
                    layout.push(Some(kept));
                    kept += 1;
                } else {
                    layout.push(None);
                }
            }
        }
        compiler.ctx.shuffle(layout)?;
    }
    Ok(())
}

/// The target component receiving each of `source_len` values. A shorter
/// target list is aligned by its empty end.
fn aligned_targets<'a>(components: &[Option<&'a Expr<'a>>], source_len: usize) -> Vec<Option<&'a Expr<'a>>> {
    let present: Vec<bool> = components.iter().map(Option::is_some).collect();
    let mut targets = vec![None; source_len];
    for (dest, source) in tuple_alignment(&present, source_len).into_iter().flatten().enumerate() {
        if let Some(source) = source {
            targets[source] = components[dest];
        }
    }
    targets
}

/// The type the right-hand side is converted to before storing: the
/// target type, except for storage reference targets, which copy from the
/// source as it is. Tuples keep the arity of the source.
fn stored_type(compiler: &ExprCompiler<'_, '_>, target: &Expr<'_>, value: &Type) -> Type {
    let env = compiler.env();
    let target_ty = compiler.type_of(target);
    match (target.kind, value) {
        (ExprKind::Tuple(tuple), Type::Tuple(values)) if !tuple.inline_array => Type::Tuple(
            aligned_targets(tuple.components, values.len())
                .into_iter()
                .zip(values)
                .map(|(component, value)| match (component, value) {
                    (Some(component), Some(value)) => Some(stored_type(compiler, component, value)),
                    (None, value) => value.as_ref().and_then(|v| v.mobile_type(env)),
                    (Some(component), None) => Some(compiler.type_of(component).clone()),
                })
                .collect(),
        ),
        (ExprKind::Ident(Decl::Local(_)), _) => target_ty.clone(),
        _ if target_ty.is_reference_type() && target_ty.data_location() == Some(DataLocation::Storage) => {
            value.mobile_type(env).unwrap_or_else(|| value.clone())
        }
        _ => target_ty.clone(),
    }
}

fn compile_compound(
    compiler: &mut ExprCompiler<'_, '_>,
    expr: &Expr<'_>,
    assign: &AssignExpr<'_>,
    op: BinaryOp,
) -> Result<()> {
    let ty = compiler.type_of(expr);
    let right = if op.is_shift() || op == BinaryOp::Exp {
        compiler
            .type_of(assign.value)
            .mobile_type(compiler.env())
            .ok_or_else(|| CompilationError::internal("operand without a mobile type"))?
    } else {
        ty.clone()
    };
    compiler.compile_to(assign.value, &right)?;
    let lvalue = compiler.compile_lvalue(assign.target)?;
    let reference = lvalue.reference_size();

    // value ref... -> ref... old value
    lvalue.retrieve_value(compiler.ctx, false)?;
    compiler.ctx.rotate_up(reference + 1)?;
    apply_binary(compiler, op, ty, &right, assign.value.span)?;

    // ref... new -> new ref...
    let mut layout: Vec<Option<usize>> = (1..=reference).map(Some).collect();
    layout.push(Some(0));
    compiler.ctx.shuffle(layout)?;
    lvalue.store_value(compiler.ctx, ty, false)
}
