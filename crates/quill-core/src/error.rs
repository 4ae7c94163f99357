//! Error types for the type system and the code generator.
//!
//! ## Error Hierarchy
//!
//! ```text
//! QuillError (top-level wrapper)
//! ├── TypeError         - Conversion/operator rejections, literal folding limits
//! ├── LayoutError       - Storage layout overflow
//! └── CompilationError  - Structural compile errors and internal invariant failures
//! ```
//!
//! Runtime faults of the generated program (overflow, out-of-bounds access,
//! failed `require`) are not represented here: they are emitted as abort
//! sequences in the generated code.
//!
//! [`CompilationError::is_internal`] separates broken upstream assumptions
//! (a bug in a prior phase) from structural errors the user can fix.

use thiserror::Error;

use crate::Span;

// ============================================================================
// Type Errors
// ============================================================================

/// Errors raised by type-level queries: operator typing, conversions and
/// rational literal folding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// A folded rational constant would exceed the precision limit.
    #[error("at {span}: Precision of rational constants is limited to 4096 bits.")]
    PrecisionLimit {
        /// Where the literal expression occurred.
        span: Span,
    },

    /// A binary operator is not defined for the operand types.
    #[error("at {span}: operator {op} not compatible with types {left} and {right}{}", detail_suffix(.detail))]
    BinaryOperator {
        /// Operator token.
        op: String,
        /// Left operand type name.
        left: String,
        /// Right operand type name.
        right: String,
        /// Optional explanation.
        detail: Option<String>,
        /// Where the operation occurred.
        span: Span,
    },

    /// A unary operator is not defined for the operand type.
    #[error("at {span}: unary operator {op} cannot be applied to type {operand}")]
    UnaryOperator {
        /// Operator token.
        op: String,
        /// Operand type name.
        operand: String,
        /// Where the operation occurred.
        span: Span,
    },

    /// A value cannot be converted to the required type.
    #[error("at {span}: type {from} is not {}convertible to expected type {to}", conversion_word(.explicit))]
    NotConvertible {
        /// Source type name.
        from: String,
        /// Target type name.
        to: String,
        /// Whether an explicit conversion was requested.
        explicit: bool,
        /// Where the conversion occurred.
        span: Span,
    },

    /// Member lookup failed.
    #[error("at {span}: member \"{member}\" not found or not visible in {ty}")]
    MemberNotFound {
        /// Requested member name.
        member: String,
        /// Type the member was looked up on.
        ty: String,
        /// Where the access occurred.
        span: Span,
    },

    /// A literal could not be parsed.
    #[error("at {span}: invalid literal: {detail}")]
    InvalidLiteral {
        /// Why the literal is invalid.
        detail: String,
        /// Where the literal occurred.
        span: Span,
    },

    /// Any other type-level rejection.
    #[error("at {span}: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
        /// Where the problem occurred.
        span: Span,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(". {detail}"),
        None => String::new(),
    }
}

fn conversion_word(explicit: &bool) -> &'static str {
    if *explicit { "explicitly " } else { "implicitly " }
}

impl TypeError {
    /// Shorthand for [`TypeError::Invalid`] without a location.
    pub fn invalid(message: impl Into<String>) -> Self {
        TypeError::Invalid {
            message: message.into(),
            span: Span::default(),
        }
    }

    /// Get the span where this error occurred.
    pub fn span(&self) -> Span {
        match self {
            TypeError::PrecisionLimit { span } => *span,
            TypeError::BinaryOperator { span, .. } => *span,
            TypeError::UnaryOperator { span, .. } => *span,
            TypeError::NotConvertible { span, .. } => *span,
            TypeError::MemberNotFound { span, .. } => *span,
            TypeError::InvalidLiteral { span, .. } => *span,
            TypeError::Invalid { span, .. } => *span,
        }
    }

    /// Replace the location of an error raised by a location-free query.
    pub fn with_span(mut self, at: Span) -> Self {
        match &mut self {
            TypeError::PrecisionLimit { span }
            | TypeError::BinaryOperator { span, .. }
            | TypeError::UnaryOperator { span, .. }
            | TypeError::NotConvertible { span, .. }
            | TypeError::MemberNotFound { span, .. }
            | TypeError::InvalidLiteral { span, .. }
            | TypeError::Invalid { span, .. } => *span = at,
        }
        self
    }
}

// ============================================================================
// Layout Errors
// ============================================================================

/// Errors raised while computing storage layouts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// The members need more than 2^256 slots.
    #[error("Object too large for storage.")]
    ObjectTooLarge,

    /// A static array needs more than 2^256 slots.
    #[error("Array too large for storage.")]
    ArrayTooLarge,
}

// ============================================================================
// Compilation Errors
// ============================================================================

/// Errors raised while generating code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    /// A value would have to be reached beyond the DUP/SWAP range.
    #[error("at {span}: Stack too deep{}", detail_suffix(.detail))]
    StackTooDeep {
        /// Which construct ran out of stack reach.
        detail: Option<String>,
        /// Where the error occurred.
        span: Span,
    },

    /// A contract's state variables do not fit into storage.
    #[error("at {span}: {source}")]
    StorageTooLarge {
        /// The underlying layout failure.
        source: LayoutError,
        /// The offending declaration.
        span: Span,
    },

    /// A construct the generator does not lower.
    #[error("at {span}: unimplemented: {feature}")]
    Unimplemented {
        /// The construct that is not supported.
        feature: String,
        /// Where it occurred.
        span: Span,
    },

    /// An upstream phase handed over inconsistent input.
    #[error("internal compiler error: {message}")]
    Internal {
        /// What assumption was broken.
        message: String,
    },

    /// Layout failure without a better location.
    #[error("{0}")]
    Layout(#[from] LayoutError),

    /// Type-level failure surfaced during code generation.
    #[error("{0}")]
    Type(#[from] TypeError),
}

impl CompilationError {
    /// Shorthand for an internal invariant failure.
    pub fn internal(message: impl Into<String>) -> Self {
        CompilationError::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for an unsupported construct.
    pub fn unimplemented(feature: impl Into<String>, span: Span) -> Self {
        CompilationError::Unimplemented {
            feature: feature.into(),
            span,
        }
    }

    /// Shorthand for a stack reach failure.
    pub fn stack_too_deep(detail: impl Into<String>, span: Span) -> Self {
        CompilationError::StackTooDeep {
            detail: Some(detail.into()),
            span,
        }
    }

    /// Whether the error signals a bug in a prior phase rather than a user error.
    pub fn is_internal(&self) -> bool {
        matches!(self, CompilationError::Internal { .. })
    }

    /// Attach a location to an error raised without one.
    pub fn at(self, at: Span) -> Self {
        match self {
            CompilationError::StackTooDeep { detail, span } if span == Span::default() => {
                CompilationError::StackTooDeep { detail, span: at }
            }
            CompilationError::Unimplemented { feature, span } if span == Span::default() => {
                CompilationError::Unimplemented { feature, span: at }
            }
            CompilationError::Layout(source) => CompilationError::StorageTooLarge { source, span: at },
            CompilationError::Type(error) if error.span() == Span::default() => {
                CompilationError::Type(error.with_span(at))
            }
            other => other,
        }
    }

    /// Get the span where this error occurred.
    pub fn span(&self) -> Span {
        match self {
            CompilationError::StackTooDeep { span, .. } => *span,
            CompilationError::StorageTooLarge { span, .. } => *span,
            CompilationError::Unimplemented { span, .. } => *span,
            CompilationError::Internal { .. } => Span::default(),
            CompilationError::Layout(_) => Span::default(),
            CompilationError::Type(error) => error.span(),
        }
    }
}

// ============================================================================
// Unified Error
// ============================================================================

/// Top-level error wrapping every phase-specific error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuillError {
    /// A type-level error.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// A storage layout error.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// A code generation error.
    #[error(transparent)]
    Compilation(#[from] CompilationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_too_deep_message() {
        let err = CompilationError::stack_too_deep("accessor returns too many values", Span::new(3, 9));
        assert_eq!(
            err.to_string(),
            "at #0:3..9: Stack too deep. accessor returns too many values"
        );
        assert!(!err.is_internal());
    }

    #[test]
    fn internal_has_default_span() {
        let err = CompilationError::internal("unexpected category");
        assert!(err.is_internal());
        assert_eq!(err.span(), Span::default());
    }

    #[test]
    fn layout_error_gets_located() {
        let err = CompilationError::from(LayoutError::ObjectTooLarge).at(Span::new(1, 2));
        assert!(matches!(err, CompilationError::StorageTooLarge { .. }));
        assert_eq!(err.span(), Span::new(1, 2));
        assert_eq!(err.to_string(), "at #0:1..2: Object too large for storage.");
    }

    #[test]
    fn binary_operator_detail() {
        let err = TypeError::BinaryOperator {
            op: "+".into(),
            left: "address".into(),
            right: "address".into(),
            detail: Some("Arithmetic operations on addresses are not supported.".into()),
            span: Span::default(),
        };
        assert!(err.to_string().ends_with("Arithmetic operations on addresses are not supported."));
    }

    #[test]
    fn precision_message() {
        let err = TypeError::PrecisionLimit { span: Span::point(7) };
        assert!(
            err.to_string()
                .contains("Precision of rational constants is limited to 4096 bits.")
        );
    }
}
