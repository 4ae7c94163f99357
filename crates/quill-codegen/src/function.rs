//! Function bodies.
//!
//! A body is entered with the return label in slot 0 and the parameters
//! above it. Return variables are pushed zero-initialized on entry, local
//! declarations push their initial value, and `return` keeps the result
//! words, drops the frame and jumps back. Falling off the end returns the
//! named return variables.

use quill_core::ast::{Expr, FunctionBody, LocalId, Stmt};
use quill_core::{CompilationError, Type, TypeEnv};

use crate::context::CompilerContext;
use crate::expr::ExprCompiler;
use crate::helpers::convert::convert_type;
use crate::helpers::memory::zero_value;

type Result<T> = std::result::Result<T, CompilationError>;

/// Emit `body` at the current position. The stack must hold the return
/// label and the parameter words.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn compile_body(ctx: &mut CompilerContext<'_>, body: &FunctionBody<'_>) -> Result<()> {
    let env = ctx.env();
    let mut next = 1;
    for param in &body.params {
        ctx.add_local(*param, next);
        next += local_type(env, body, *param)?.size_on_stack(env);
    }
    if ctx.stack_height() != next {
        return Err(CompilationError::internal(format!(
            "function entered at stack height {} with {next} words of parameters",
            ctx.stack_height()
        )));
    }
    for ret in &body.returns {
        declare_zeroed(ctx, *ret, local_type(env, body, *ret)?)?;
    }
    for statement in body.statements {
        compile_statement(ctx, body, statement)?;
        if ctx.terminated() {
            return Ok(());
        }
    }
    return_named(ctx, body)
}

fn compile_statement(ctx: &mut CompilerContext<'_>, body: &FunctionBody<'_>, statement: &Stmt<'_>) -> Result<()> {
    let env = ctx.env();
    match *statement {
        Stmt::Expr(expr) => ExprCompiler::new(ctx).compile_effect(expr),
        Stmt::VarDecl { locals, init: None } => {
            for local in locals.iter().flatten() {
                declare_zeroed(ctx, *local, local_type(env, body, *local)?)?;
            }
            Ok(())
        }
        Stmt::VarDecl {
            locals,
            init: Some(init),
        } => {
            let targets = locals
                .iter()
                .map(|local| local.map(|id| local_type(env, body, id).cloned()).transpose())
                .collect::<Result<Vec<_>>>()?;
            let slots = compile_components(ctx, init, &targets)?;
            for (local, slot) in locals.iter().flatten().zip(slots) {
                ctx.add_local(*local, slot);
            }
            Ok(())
        }
        Stmt::Return(None) => return_named(ctx, body),
        Stmt::Return(Some(value)) => {
            let targets = body
                .returns
                .iter()
                .map(|id| local_type(env, body, *id).cloned().map(Some))
                .collect::<Result<Vec<_>>>()?;
            let starts = compile_components(ctx, value, &targets)?;
            if ctx.terminated() {
                return Ok(());
            }
            let mut results = Vec::new();
            for (start, target) in starts.iter().zip(targets.iter().flatten()) {
                results.extend(*start..*start + target.size_on_stack(env));
            }
            ctx.helper_return(&results)
        }
    }
}

/// Declared type of a local of `body`.
pub(crate) fn local_type<'env>(env: &'env TypeEnv, body: &FunctionBody<'_>, id: LocalId) -> Result<&'env Type> {
    body.locals
        .get(id.index())
        .map(|decl| env.ty(decl.ty))
        .ok_or_else(|| CompilationError::internal(format!("local {} is not declared", id.0)))
}

/// Push the zero value of `ty` as the local `id`.
pub(crate) fn declare_zeroed(ctx: &mut CompilerContext<'_>, id: LocalId, ty: &Type) -> Result<()> {
    let slot = ctx.stack_height();
    match ty.size_on_stack(ctx.env()) {
        1 => {
            let zero = zero_value(ctx, ty)?;
            ctx.eval(&zero)?;
        }
        size => {
            for _ in 0..size {
                ctx.push(0u32);
            }
        }
    }
    ctx.add_local(id, slot);
    Ok(())
}

fn return_named(ctx: &mut CompilerContext<'_>, body: &FunctionBody<'_>) -> Result<()> {
    let env = ctx.env();
    let mut results = Vec::new();
    for ret in &body.returns {
        let slot = ctx.local_slot(*ret)?;
        results.extend(slot..slot + local_type(env, body, *ret)?.size_on_stack(env));
    }
    ctx.helper_return(&results)
}

/// Evaluate `value`, convert each component to its target and keep only
/// the converted words. Returns the first slot of every present target.
fn compile_components(ctx: &mut CompilerContext<'_>, value: &Expr<'_>, targets: &[Option<Type>]) -> Result<Vec<usize>> {
    let env = ctx.env();
    let base = ctx.stack_height();
    let source = env.ty(value.ty);
    if let ([target], false) = (targets, matches!(source, Type::Tuple(_))) {
        let mut compiler = ExprCompiler::new(ctx);
        return match target {
            Some(target) => {
                compiler.compile_to(value, target)?;
                Ok(vec![base])
            }
            None => {
                compiler.compile_effect(value)?;
                Ok(Vec::new())
            }
        };
    }
    let Type::Tuple(components) = source else {
        return Err(CompilationError::internal(format!(
            "{} values expected from a single value",
            targets.len()
        )));
    };
    if components.len() != targets.len() {
        return Err(CompilationError::internal(format!(
            "{} components assigned to {} targets",
            components.len(),
            targets.len()
        )));
    }
    ExprCompiler::new(ctx).compile(value)?;
    if ctx.terminated() {
        return Ok(Vec::new());
    }

    let mut position = base;
    let mut kept = Vec::new();
    let mut starts = Vec::new();
    for (component, target) in components.iter().zip(targets) {
        let size = component.as_ref().map_or(0, |ty| ty.size_on_stack(env));
        match (component, target) {
            (Some(component), Some(target)) => {
                let start = ctx.stack_height();
                for word in 0..size {
                    ctx.dup_slot(position + word)?;
                }
                convert_type(ctx, component, target)?;
                starts.push(base + kept.len());
                kept.extend(start..ctx.stack_height());
            }
            (None, Some(_)) => {
                return Err(CompilationError::internal("empty tuple component assigned to a variable"));
            }
            _ => {}
        }
        position += size;
    }
    let mut layout = vec![None; ctx.stack_height() - base];
    for (index, slot) in kept.iter().enumerate() {
        layout[slot - base] = Some(index);
    }
    ctx.shuffle(layout)?;
    Ok(starts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Instruction;
    use crate::settings::CompilerSettings;
    use bumpalo::Bump;
    use quill_core::ast::{AstBuilder, BinaryOp};
    use quill_core::{ContractKind, FunctionDef, Param, StateMutability, Visibility};

    fn function(env: &mut TypeEnv, params: Vec<Param>, returns: Vec<Param>) -> quill_core::FunctionId {
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        env.add_function(FunctionDef {
            name: "f".into(),
            contract: Some(c),
            params,
            returns,
            visibility: Visibility::Internal,
            mutability: StateMutability::Pure,
            is_constructor: false,
        })
    }

    #[test]
    fn named_returns_are_returned_at_the_end() {
        let arena = Bump::new();
        let mut env = TypeEnv::new();
        let f = function(
            &mut env,
            vec![Param::new("a", Type::uint256())],
            vec![Param::new("r", Type::uint256())],
        );
        let body = AstBuilder::new(&arena, &mut env, None)
            .function_body(f, |b, params, returns| {
                let target = b.local(returns[0]);
                let a = b.local(params[0]);
                let one = b.number("1")?;
                let sum = b.binary(a, BinaryOp::Add, one)?;
                let assign = b.assign(target, quill_core::ast::AssignOp::Assign, sum)?;
                Ok(vec![Stmt::Expr(assign)])
            })
            .unwrap();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        ctx.set_stack_height(2);
        compile_body(&mut ctx, &body).unwrap();
        assert!(ctx.terminated());
        assert!(ctx.helpers().contains("checked_add_t_uint256"));
    }

    #[test]
    fn return_statement_converts_to_the_declared_type() {
        let arena = Bump::new();
        let mut env = TypeEnv::new();
        let f = function(
            &mut env,
            vec![],
            vec![Param::new("", Type::uint(8)), Param::new("", Type::Bool)],
        );
        let body = AstBuilder::new(&arena, &mut env, None)
            .function_body(f, |b, _, _| {
                let seven = b.number("7")?;
                let yes = b.boolean(true);
                let pair = b.tuple(&[Some(seven), Some(yes)]);
                Ok(vec![Stmt::Return(Some(pair))])
            })
            .unwrap();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        ctx.set_stack_height(1);
        compile_body(&mut ctx, &body).unwrap();
        assert!(ctx.terminated());
        assert_eq!(ctx.assembly().count_op(Instruction::Jump), 1);
    }

    #[test]
    fn declarations_bind_tuple_components() {
        let arena = Bump::new();
        let mut env = TypeEnv::new();
        let f = function(&mut env, vec![], vec![Param::new("r", Type::uint256())]);
        let body = AstBuilder::new(&arena, &mut env, None)
            .function_body(f, |b, _, returns| {
                let x = b.declare_local("x", Type::uint256());
                let one = b.number("1")?;
                let two = b.number("2")?;
                let pair = b.tuple(&[Some(one), Some(two)]);
                let locals = b.declared(&[None, Some(x)]);
                let target = b.local(returns[0]);
                let value = b.local(x);
                let assign = b.assign(target, quill_core::ast::AssignOp::Assign, value)?;
                Ok(vec![
                    Stmt::VarDecl {
                        locals,
                        init: Some(pair),
                    },
                    Stmt::Expr(assign),
                ])
            })
            .unwrap();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        ctx.set_stack_height(1);
        compile_body(&mut ctx, &body).unwrap();
        assert!(ctx.terminated());
    }

    #[test]
    fn statements_after_a_return_are_skipped() {
        let arena = Bump::new();
        let mut env = TypeEnv::new();
        let f = function(&mut env, vec![], vec![]);
        let body = AstBuilder::new(&arena, &mut env, None)
            .function_body(f, |b, _, _| {
                let revert = b.builtin("revert")?;
                let call = b.call(revert, &[])?;
                Ok(vec![Stmt::Return(None), Stmt::Expr(call)])
            })
            .unwrap();
        let mut ctx = CompilerContext::new(&env, CompilerSettings::default(), None);
        ctx.set_stack_height(1);
        compile_body(&mut ctx, &body).unwrap();
        assert_eq!(ctx.assembly().count_op(Instruction::Revert), 0);
    }
}
