//! Literal compilation.
//!
//! Number constants, including every subexpression the type checker
//! folded, are pushed as a single word in two's complement. String
//! literals occupy no stack slots: their bytes are materialized by the
//! conversion to whatever type they are used as.

use quill_core::ast::Expr;
use quill_core::rational::literal_value;
use quill_core::{CompilationError, Type};

use super::{ExprCompiler, Result};

/// Push the value of a literal or folded constant.
pub fn compile_literal(compiler: &mut ExprCompiler<'_, '_>, expr: &Expr<'_>) -> Result<()> {
    match compiler.type_of(expr) {
        Type::RationalNumber(rational) => {
            let word = literal_value(&rational.value)
                .ok_or_else(|| CompilationError::unimplemented("fixed point literals", expr.span))?;
            compiler.ctx.push(word);
            Ok(())
        }
        Type::StringLiteral(_) => Ok(()),
        other => Err(CompilationError::internal(format!(
            "literal of non-literal type {}",
            other.name(compiler.env())
        ))),
    }
}
