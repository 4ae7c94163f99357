//! Operator typing, common and mobile types.

use crate::ast::{BinaryOp, UnaryOp};
use crate::env::TypeEnv;
use crate::error::TypeError;
use crate::rational::{fold_binary, fold_unary, integer_type, is_fractional};
use crate::types::{DataLocation, FunctionKind, Type};

const ADDRESS_ARITHMETIC: &str =
    "Arithmetic operations on addresses are not supported. Convert to integer first before using them.";

fn binary_error(env: &TypeEnv, op: BinaryOp, left: &Type, right: &Type, detail: Option<&str>) -> TypeError {
    TypeError::BinaryOperator {
        op: op.to_string(),
        left: left.name(env),
        right: right.name(env),
        detail: detail.map(str::to_string),
        span: Default::default(),
    }
}

fn unary_error(env: &TypeEnv, op: UnaryOp, operand: &Type) -> TypeError {
    TypeError::UnaryOperator {
        op: op.to_string(),
        operand: operand.name(env),
        span: Default::default(),
    }
}

fn valid_shift_amount(amount: &Type) -> bool {
    match amount {
        Type::Integer(int) => !int.signed,
        Type::RationalNumber(rational) => {
            !is_fractional(&rational.value) && integer_type(&rational.value).is_some_and(|int| !int.signed)
        }
        _ => false,
    }
}

impl Type {
    /// The type a concrete value of this type takes when it has to be
    /// materialized: literals become their narrowest integer type or
    /// `string memory`, storage references become pointers.
    pub fn mobile_type(&self, env: &TypeEnv) -> Option<Type> {
        match self {
            Type::RationalNumber(rational) => integer_type(&rational.value).map(Type::Integer),
            Type::StringLiteral(_) => Some(Type::string(DataLocation::Memory)),
            Type::Tuple(components) => components
                .iter()
                .map(|c| match c {
                    Some(c) => c.mobile_type(env).map(Some),
                    None => Some(None),
                })
                .collect::<Option<Vec<_>>>()
                .map(Type::Tuple),
            Type::Array(array) => Some(self.with_location(array.location, true)),
            Type::Struct(s) => Some(self.with_location(s.location, true)),
            other => Some(other.clone()),
        }
    }

    /// The more general of two types if one converts implicitly to the
    /// other's mobile type.
    pub fn common_type(env: &TypeEnv, a: &Type, b: &Type) -> Option<Type> {
        if let Some(mobile) = a.mobile_type(env)
            && b.is_implicitly_convertible_to(env, &mobile)
        {
            return Some(mobile);
        }
        if let Some(mobile) = b.mobile_type(env)
            && a.is_implicitly_convertible_to(env, &mobile)
        {
            return Some(mobile);
        }
        None
    }

    /// Result type of a unary operator.
    ///
    /// # Errors
    ///
    /// [`TypeError::UnaryOperator`] when the operator does not apply.
    pub fn unary_operator_result(&self, env: &TypeEnv, op: UnaryOp) -> Result<Type, TypeError> {
        let result = match (self, op) {
            (Type::RationalNumber(rational), _) => {
                fold_unary(op, &rational.value).map(Type::rational)
            }
            (Type::StringLiteral(_) | Type::Magic(_) | Type::TypeType(_) | Type::Tuple(_), _) => None,
            (Type::Contract(contract), UnaryOp::Delete) if contract.is_super => None,
            (Type::Array(_) | Type::Struct(_), UnaryOp::Delete) => match self.data_location() {
                Some(DataLocation::CallData) => None,
                Some(DataLocation::Storage) if self.is_pointer() => None,
                _ => Some(Type::empty_tuple()),
            },
            (Type::Mapping(_), _) => None,
            (_, UnaryOp::Delete) => Some(Type::empty_tuple()),
            (Type::Integer(_), UnaryOp::Neg | UnaryOp::Inc | UnaryOp::Dec | UnaryOp::BitNot) => {
                Some(self.clone())
            }
            (Type::FixedBytes(_), UnaryOp::BitNot) => Some(self.clone()),
            (Type::Bool, UnaryOp::Not) => Some(Type::Bool),
            _ => None,
        };
        result.ok_or_else(|| unary_error(env, op, self))
    }

    /// The type a binary operation is carried out in.
    ///
    /// For comparisons this is the common operand type; the expression
    /// itself has type `bool`. Folding two literals returns the folded
    /// literal type.
    ///
    /// # Errors
    ///
    /// [`TypeError::BinaryOperator`] when the operator does not apply and
    /// [`TypeError::PrecisionLimit`] when folding exceeds 4096 bits.
    pub fn binary_operator_result(&self, env: &TypeEnv, op: BinaryOp, other: &Type) -> Result<Type, TypeError> {
        let fail = |detail: Option<&str>| binary_error(env, op, self, other, detail);
        match self {
            Type::Integer(_) => {
                if !matches!(other, Type::Integer(_) | Type::RationalNumber(_)) {
                    return Err(fail(None));
                }
                if op.is_shift() {
                    return if valid_shift_amount(other) { Ok(self.clone()) } else { Err(fail(None)) };
                }
                if op == BinaryOp::Exp {
                    return match other {
                        Type::Integer(int) if int.signed => Err(fail(Some(
                            "Exponentiation power is not allowed to be a signed integer type.",
                        ))),
                        Type::RationalNumber(_) if !valid_shift_amount(other) => Err(fail(None)),
                        _ => Ok(self.clone()),
                    };
                }
                if op.is_boolean() {
                    return Err(fail(None));
                }
                Type::common_type(env, self, other).ok_or_else(|| fail(None))
            }
            Type::RationalNumber(rational) => match other {
                Type::Integer(_) => {
                    let common = Type::common_type(env, self, other).ok_or_else(|| fail(None))?;
                    if op.is_shift() || op == BinaryOp::Exp {
                        // shifts and powers keep the literal's own mobile type
                        let mobile = self.mobile_type(env).ok_or_else(|| fail(None))?;
                        return mobile.binary_operator_result(env, op, other);
                    }
                    common.binary_operator_result(env, op, other)
                }
                Type::RationalNumber(other_rational) => {
                    if op.is_comparison() {
                        let left = self.mobile_type(env).ok_or_else(|| fail(None))?;
                        let right = other.mobile_type(env).ok_or_else(|| fail(None))?;
                        return left.binary_operator_result(env, op, &right);
                    }
                    match fold_binary(op, &rational.value, &other_rational.value)? {
                        Some(value) => Ok(Type::rational(value)),
                        None => Err(fail(None)),
                    }
                }
                _ => Err(fail(None)),
            },
            Type::FixedBytes(_) => {
                if op.is_shift() {
                    return if valid_shift_amount(other) { Ok(self.clone()) } else { Err(fail(None)) };
                }
                match Type::common_type(env, self, other) {
                    Some(common @ Type::FixedBytes(_)) if op.is_comparison() || op.is_bit() => Ok(common),
                    _ => Err(fail(None)),
                }
            }
            Type::Bool => {
                if matches!(other, Type::Bool)
                    && matches!(op, BinaryOp::Equal | BinaryOp::NotEqual | BinaryOp::And | BinaryOp::Or)
                {
                    Ok(Type::Bool)
                } else {
                    Err(fail(None))
                }
            }
            Type::Address { .. } => {
                if !op.is_comparison() {
                    return Err(fail(Some(ADDRESS_ARITHMETIC)));
                }
                Type::common_type(env, self, other).ok_or_else(|| fail(None))
            }
            Type::Function(f) => match other {
                Type::Function(g)
                    if op.is_equality()
                        && f.kind == FunctionKind::Internal
                        && g.kind == FunctionKind::Internal
                        && f.size_on_stack(env) == 1
                        && g.size_on_stack(env) == 1 =>
                {
                    Type::common_type(env, self, other).ok_or_else(|| fail(None))
                }
                _ => Err(fail(None)),
            },
            Type::Enum(_) | Type::Contract(_) => {
                if op.is_comparison() {
                    Type::common_type(env, self, other).ok_or_else(|| fail(None))
                } else {
                    Err(fail(None))
                }
            }
            _ => Err(fail(None)),
        }
    }
}

/// Pair destination components of a multi-value assignment with source
/// values.
///
/// `destination[i]` is `true` when component `i` names a location and
/// `false` for an empty component. Equal lengths pair up one to one. A
/// shorter destination is aligned to the left when its last component is
/// empty and to the right when its first component is empty; the empty end
/// absorbs the surplus source values. Returns the source index for every
/// destination component (`None` for empty ones), or `None` when the shapes
/// cannot be matched.
pub fn tuple_alignment(destination: &[bool], source_len: usize) -> Option<Vec<Option<usize>>> {
    let dest_len = destination.len();
    if dest_len == source_len {
        return Some(
            destination
                .iter()
                .enumerate()
                .map(|(i, present)| present.then_some(i))
                .collect(),
        );
    }
    if dest_len > source_len || dest_len == 0 {
        return None;
    }
    let fill_left = destination.last() == Some(&false);
    let fill_right = destination.first() == Some(&false);
    if fill_left {
        Some(
            destination
                .iter()
                .enumerate()
                .map(|(i, present)| (*present && i + 1 < dest_len).then_some(i))
                .collect(),
        )
    } else if fill_right {
        let shift = source_len - dest_len;
        Some(
            destination
                .iter()
                .enumerate()
                .map(|(i, present)| (*present && i > 0).then_some(i + shift))
                .collect(),
        )
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;
    use num_rational::BigRational;

    #[test]
    fn literal_mobile_types() {
        let env = TypeEnv::new();
        assert_eq!(Type::rational_int(-129).mobile_type(&env), Some(Type::int(16)));
        assert_eq!(Type::rational_int(255).mobile_type(&env), Some(Type::uint(8)));
        let half = Type::rational(BigRational::new(BigInt::from(1), BigInt::from(2)));
        assert_eq!(half.mobile_type(&env), None);
        assert_eq!(
            Type::string_literal("hi").mobile_type(&env),
            Some(Type::string(DataLocation::Memory))
        );
    }

    #[test]
    fn integer_common_type() {
        let env = TypeEnv::new();
        let result = Type::uint(8)
            .binary_operator_result(&env, BinaryOp::Add, &Type::uint(16))
            .unwrap();
        assert_eq!(result, Type::uint(16));
        let with_literal = Type::uint(8)
            .binary_operator_result(&env, BinaryOp::Add, &Type::rational_int(300))
            .unwrap();
        assert_eq!(with_literal, Type::uint(16));
        assert!(
            Type::int(8)
                .binary_operator_result(&env, BinaryOp::Add, &Type::uint(8))
                .is_err()
        );
    }

    #[test]
    fn shift_keeps_left_type() {
        let env = TypeEnv::new();
        let result = Type::int(8)
            .binary_operator_result(&env, BinaryOp::Shr, &Type::uint256())
            .unwrap();
        assert_eq!(result, Type::int(8));
        assert!(
            Type::uint256()
                .binary_operator_result(&env, BinaryOp::Shl, &Type::int(8))
                .is_err()
        );
    }

    #[test]
    fn signed_exponent_rejected() {
        let env = TypeEnv::new();
        let err = Type::uint256()
            .binary_operator_result(&env, BinaryOp::Exp, &Type::int(8))
            .unwrap_err();
        assert!(err.to_string().contains("signed integer type"));
    }

    #[test]
    fn address_arithmetic_rejected() {
        let env = TypeEnv::new();
        let err = Type::address()
            .binary_operator_result(&env, BinaryOp::Add, &Type::address())
            .unwrap_err();
        assert!(err.to_string().contains("Arithmetic operations on addresses"));
        assert_eq!(
            Type::address()
                .binary_operator_result(&env, BinaryOp::Equal, &Type::address_payable())
                .unwrap(),
            Type::address()
        );
    }

    #[test]
    fn literal_folding() {
        let env = TypeEnv::new();
        let folded = Type::rational_int(2)
            .binary_operator_result(&env, BinaryOp::Exp, &Type::rational_int(10))
            .unwrap();
        assert_eq!(folded, Type::rational_int(1024));
        let err = Type::rational_int(2)
            .binary_operator_result(&env, BinaryOp::Exp, &Type::rational_int(5000))
            .unwrap_err();
        assert!(matches!(err, TypeError::PrecisionLimit { .. }));
    }

    #[test]
    fn unary_rules() {
        let env = TypeEnv::new();
        assert_eq!(
            Type::rational_int(5).unary_operator_result(&env, UnaryOp::Neg).unwrap(),
            Type::rational_int(-5)
        );
        assert!(Type::Bool.unary_operator_result(&env, UnaryOp::BitNot).is_err());
        let pointer = Type::bytes(DataLocation::Storage).with_location(DataLocation::Storage, true);
        assert!(pointer.unary_operator_result(&env, UnaryOp::Delete).is_err());
        assert_eq!(
            Type::bytes(DataLocation::Storage)
                .unary_operator_result(&env, UnaryOp::Delete)
                .unwrap(),
            Type::empty_tuple()
        );
    }

    #[test]
    fn alignment() {
        assert_eq!(
            tuple_alignment(&[true, true], 2),
            Some(vec![Some(0), Some(1)])
        );
        // (a, ) = (1, 2, 3)
        assert_eq!(tuple_alignment(&[true, false], 3), Some(vec![Some(0), None]));
        // (, b) = (1, 2, 3)
        assert_eq!(tuple_alignment(&[false, true], 3), Some(vec![None, Some(2)]));
        assert_eq!(tuple_alignment(&[true, true], 3), None);
        assert_eq!(tuple_alignment(&[true, true, true], 2), None);
    }
}
