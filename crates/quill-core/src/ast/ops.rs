//! Operator definitions for typed expressions.
//!
//! Provides enums for binary, unary and assignment operators together with
//! the classification queries the type system and code generator dispatch on.

use std::fmt;

/// Binary operators.
///
/// Organized by precedence from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Logical
    /// `||`
    Or,
    /// `&&`
    And,

    // Bitwise
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `&`
    BitAnd,

    // Equality
    /// `==`
    Equal,
    /// `!=`
    NotEqual,

    // Relational
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,

    // Shift
    /// `<<`
    Shl,
    /// `>>` (arithmetic for signed values, logical for unsigned)
    Shr,

    // Additive
    /// `+`
    Add,
    /// `-`
    Sub,

    // Multiplicative
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,

    /// `**`
    Exp,
}

impl BinaryOp {
    /// Whether this operator compares its operands and yields `bool`.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
        )
    }

    /// `==` or `!=`.
    pub fn is_equality(&self) -> bool {
        matches!(self, BinaryOp::Equal | BinaryOp::NotEqual)
    }

    /// `&&` or `||`.
    pub fn is_boolean(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// `|`, `^` or `&`.
    pub fn is_bit(&self) -> bool {
        matches!(self, BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::BitAnd)
    }

    /// `<<` or `>>`.
    pub fn is_shift(&self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    /// `+ - * / % **`.
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Exp
        )
    }

    /// Short name used inside helper identifiers.
    pub fn helper_name(&self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::BitOr => "bit_or",
            BinaryOp::BitXor => "bit_xor",
            BinaryOp::BitAnd => "bit_and",
            BinaryOp::Equal => "eq",
            BinaryOp::NotEqual => "neq",
            BinaryOp::Less => "lt",
            BinaryOp::LessEqual => "lteq",
            BinaryOp::Greater => "gt",
            BinaryOp::GreaterEqual => "gteq",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::Exp => "exp",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Exp => "**",
        };
        write!(f, "{s}")
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `~`
    BitNot,
    /// `-`
    Neg,
    /// `++` (prefix or postfix)
    Inc,
    /// `--` (prefix or postfix)
    Dec,
    /// `delete`
    Delete,
}

impl UnaryOp {
    /// Whether the operator writes through its operand.
    pub fn modifies_operand(&self) -> bool {
        matches!(self, UnaryOp::Inc | UnaryOp::Dec | UnaryOp::Delete)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::Neg => "-",
            UnaryOp::Inc => "++",
            UnaryOp::Dec => "--",
            UnaryOp::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Assignment operators: plain `=` or a compound form such as `+=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `op=`
    Compound(BinaryOp),
}

impl AssignOp {
    /// The arithmetic/bit operator of a compound assignment.
    pub fn binary(&self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Compound(op) => Some(*op),
        }
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignOp::Assign => write!(f, "="),
            AssignOp::Compound(op) => write!(f, "{op}="),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(BinaryOp::LessEqual.is_comparison());
        assert!(!BinaryOp::Add.is_comparison());
        assert!(BinaryOp::Shr.is_shift());
        assert!(BinaryOp::BitXor.is_bit());
        assert!(BinaryOp::Exp.is_arithmetic());
        assert!(BinaryOp::Or.is_boolean());
    }

    #[test]
    fn display() {
        assert_eq!(BinaryOp::Exp.to_string(), "**");
        assert_eq!(UnaryOp::Delete.to_string(), "delete");
        assert_eq!(AssignOp::Compound(BinaryOp::Shl).to_string(), "<<=");
    }

    #[test]
    fn modifies_operand() {
        assert!(UnaryOp::Inc.modifies_operand());
        assert!(!UnaryOp::BitNot.modifies_operand());
    }
}
