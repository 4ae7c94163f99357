//! Expression code generation.
//!
//! [`ExprCompiler`] walks a type-annotated expression tree in a single pass
//! and leaves the value of each expression on the stack: exactly
//! [`Type::size_on_stack`] words of the node's type. Nodes that denote a
//! location (identifiers, member and index access) go through an
//! [`LValue`]: reading them pushes the reference and retrieves the value,
//! compiling them as an assignment target leaves the reference and records
//! the handle as the current lvalue for the consuming operation.
//!
//! # Example
//!
//! ```ignore
//! let mut compiler = ExprCompiler::new(&mut ctx);
//! compiler.compile_to(expr, &Type::uint256())?;
//! ```
//!
//! # Modules
//!
//! - `literals`: number, string and boolean literals
//! - `identifiers`: locals, state variables, functions, `this`
//! - `binary`/`unary`: operators, short-circuit logic, `++`/`--`/`delete`
//! - `assignment`: plain and compound assignment
//! - `ternary`: conditional expressions
//! - `tuple`: tuples and inline arrays
//! - `calls`: call dispatch, internal calls, conversions, struct constructors
//! - `external`: message calls, contract creation, low-level calls
//! - `builtins`: hashing, precompiles, logs, events, aborts, ABI functions
//! - `member`/`index`: member and index access per type category

mod assignment;
mod binary;
mod builtins;
mod calls;
mod external;
mod identifiers;
mod index;
mod literals;
mod member;
mod ternary;
mod tuple;
mod unary;

use quill_core::ast::{Expr, ExprKind};
use quill_core::{CompilationError, Type, TypeEnv};

use crate::context::CompilerContext;
use crate::helpers::convert::convert_type;
use crate::lvalue::LValue;

type Result<T> = std::result::Result<T, CompilationError>;

/// Compiles expressions of one function body or initializer.
pub struct ExprCompiler<'a, 'env> {
    ctx: &'a mut CompilerContext<'env>,
    /// Location of the last target compiled for writing; consumed by the
    /// assignment, increment or `delete` that requested it.
    current_lvalue: Option<LValue>,
}

impl<'a, 'env> ExprCompiler<'a, 'env> {
    /// Create an expression compiler emitting into `ctx`.
    pub fn new(ctx: &'a mut CompilerContext<'env>) -> Self {
        Self {
            ctx,
            current_lvalue: None,
        }
    }

    /// Push the value of `expr`.
    pub fn compile(&mut self, expr: &Expr<'_>) -> Result<()> {
        self.visit(expr, false)
    }

    /// Push the value of `expr` converted to `target`.
    pub fn compile_to(&mut self, expr: &Expr<'_>, target: &Type) -> Result<()> {
        self.compile(expr)?;
        let from = self.type_of(expr);
        convert_type(self.ctx, from, target).map_err(|e| e.at(expr.span))
    }

    /// Evaluate `expr` for its effects and drop its value.
    pub fn compile_effect(&mut self, expr: &Expr<'_>) -> Result<()> {
        self.compile(expr)?;
        if !self.ctx.terminated() {
            let size = self.type_of(expr).size_on_stack(self.env());
            self.ctx.pop(size);
        }
        Ok(())
    }

    /// Push the reference words of the location `expr` denotes and return
    /// its handle.
    pub fn compile_lvalue(&mut self, expr: &Expr<'_>) -> Result<LValue> {
        self.visit(expr, true)?;
        self.current_lvalue.take().ok_or_else(|| {
            CompilationError::internal(format!("expression at {} is not assignable", expr.span))
        })
    }

    fn visit(&mut self, expr: &Expr<'_>, want_lvalue: bool) -> Result<()> {
        let before = self.ctx.stack_height();
        let ty = self.type_of(expr);
        let result = match (ty, expr.kind) {
            // folded constants are pushed whatever produced them
            (Type::RationalNumber(_), _) if !want_lvalue => literals::compile_literal(self, expr),
            (_, ExprKind::Literal) => literals::compile_literal(self, expr),
            (_, ExprKind::Bool(value)) => {
                self.ctx.push(u32::from(value));
                Ok(())
            }
            (_, ExprKind::Ident(decl)) => identifiers::compile_ident(self, expr, decl, want_lvalue),
            (_, ExprKind::Binary(binary)) => binary::compile_binary(self, binary),
            (_, ExprKind::Unary(unary)) => unary::compile_unary(self, expr, unary),
            (_, ExprKind::Assign(assign)) => assignment::compile_assign(self, expr, assign),
            (_, ExprKind::Conditional(conditional)) => ternary::compile_conditional(self, expr, conditional),
            (_, ExprKind::Tuple(tuple)) => tuple::compile_tuple(self, expr, tuple, want_lvalue),
            (_, ExprKind::Call(call)) => calls::compile_call(self, expr, call, want_lvalue),
            (_, ExprKind::Member(member)) => member::compile_member(self, expr, member, want_lvalue),
            (_, ExprKind::Index(index)) => index::compile_index(self, expr, index, want_lvalue),
            (_, ExprKind::New) => Ok(()),
        };
        result.map_err(|e| e.at(expr.span))?;
        if self.ctx.terminated() {
            return Ok(());
        }
        let expected = match (&self.current_lvalue, want_lvalue) {
            (Some(lvalue), true) => lvalue.reference_size(),
            _ => ty.size_on_stack(self.env()),
        };
        if self.ctx.stack_height() != before + expected {
            return Err(CompilationError::internal(format!(
                "expression at {} left {} words instead of {expected}",
                expr.span,
                self.ctx.stack_height() as i64 - before as i64
            )));
        }
        Ok(())
    }

    /// Finish a location expression: keep the reference when it is an
    /// assignment target, otherwise read the value.
    fn set_location(&mut self, lvalue: LValue, want_lvalue: bool) -> Result<()> {
        if want_lvalue {
            self.current_lvalue = Some(lvalue);
            Ok(())
        } else {
            lvalue.retrieve_value(self.ctx, true)
        }
    }

    /// Push `args` converted to `params`.
    fn compile_args(&mut self, args: &[&Expr<'_>], params: &[Type]) -> Result<()> {
        if args.len() != params.len() {
            return Err(CompilationError::internal(format!(
                "{} arguments for {} parameters",
                args.len(),
                params.len()
            )));
        }
        for (arg, param) in args.iter().zip(params) {
            self.compile_to(arg, param)?;
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Declarations.
    pub fn env(&self) -> &'env TypeEnv {
        self.ctx.env()
    }

    /// Type of an expression node.
    pub fn type_of(&self, expr: &Expr<'_>) -> &'env Type {
        self.ctx.env().ty(expr.ty)
    }

    /// The underlying context.
    pub fn ctx(&mut self) -> &mut CompilerContext<'env> {
        self.ctx
    }
}

/// Keep the words at `kept` (absolute slots, in order) of everything above
/// `base` and drop the rest.
pub(super) fn keep_only(ctx: &mut CompilerContext<'_>, base: usize, kept: &[usize]) -> Result<()> {
    let mut layout = vec![None; ctx.stack_height() - base];
    for (position, slot) in kept.iter().enumerate() {
        layout[slot - base] = Some(position);
    }
    ctx.shuffle(layout)
}

#[cfg(test)]
mod tests;
