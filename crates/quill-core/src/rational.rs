//! Arbitrary-precision literal parsing and constant folding.
//!
//! Number literals carry an exact rational value until they are used in a
//! context that needs a concrete integer type. Every folding step is checked
//! against a 4096-bit precision limit so that expressions like `2**2**2**2**2`
//! cannot blow up compile time.

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::ast::{BinaryOp, UnaryOp};
use crate::error::TypeError;
use crate::num::{bytes_required, to_word, two_pow, u256_max};
use crate::types::IntegerType;

/// Maximum number of bits a folded numerator or denominator may use.
pub const MAX_PRECISION_BITS: u64 = 4096;

/// Unit suffix attached to a number literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubDenomination {
    /// No suffix.
    #[default]
    None,
    /// `wei`
    Wei,
    /// `szabo`
    Szabo,
    /// `finney`
    Finney,
    /// `ether`
    Ether,
    /// `seconds`
    Second,
    /// `minutes`
    Minute,
    /// `hours`
    Hour,
    /// `days`
    Day,
    /// `weeks`
    Week,
    /// `years`
    Year,
}

impl SubDenomination {
    /// Factor the literal value is multiplied by.
    pub fn multiplier(self) -> u64 {
        match self {
            SubDenomination::None | SubDenomination::Wei | SubDenomination::Second => 1,
            SubDenomination::Szabo => 1_000_000_000_000,
            SubDenomination::Finney => 1_000_000_000_000_000,
            SubDenomination::Ether => 1_000_000_000_000_000_000,
            SubDenomination::Minute => 60,
            SubDenomination::Hour => 3_600,
            SubDenomination::Day => 86_400,
            SubDenomination::Week => 604_800,
            SubDenomination::Year => 31_536_000,
        }
    }
}

/// A parsed number literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberLiteral {
    /// Exact value after applying the sub-denomination.
    pub value: BigRational,
    /// For hex literals with an even digit count up to 64: the matching `bytesN` width.
    pub compatible_bytes: Option<u8>,
}

fn invalid(detail: impl Into<String>) -> TypeError {
    TypeError::InvalidLiteral {
        detail: detail.into(),
        span: Default::default(),
    }
}

/// Index of the most significant set bit (zero for zero and one).
fn most_significant_bit(value: &BigInt) -> u64 {
    value.magnitude().bits().saturating_sub(1)
}

/// Whether `base ** exp` fits into the precision limit.
fn fits_precision_exp(base: &BigInt, exp: u32) -> bool {
    if base.is_zero() {
        return true;
    }
    let msb = most_significant_bit(base);
    if msb == 0 {
        return true;
    }
    if msb > MAX_PRECISION_BITS {
        return false;
    }
    u64::from(exp) * (msb + 1) <= MAX_PRECISION_BITS
}

/// Whether `mantissa * X ** exp` fits, with `log2_of_base = log2(X)`.
fn fits_precision_base_x(mantissa: &BigInt, log2_of_base: f64, exp: u32) -> bool {
    if mantissa.is_zero() {
        return true;
    }
    let msb = most_significant_bit(mantissa);
    if msb > MAX_PRECISION_BITS {
        return false;
    }
    let extra = (f64::from(exp) * log2_of_base).floor() as u64;
    msb + extra + 1 <= MAX_PRECISION_BITS
}

fn fits_precision_base10(mantissa: &BigInt, exp: u32) -> bool {
    const LOG2_OF_10_AWAY_FROM_ZERO: f64 = 3.3219280948873624;
    fits_precision_base_x(mantissa, LOG2_OF_10_AWAY_FROM_ZERO, exp)
}

fn fits_precision_base2(mantissa: &BigInt, exp: u32) -> bool {
    fits_precision_base_x(mantissa, 1.0, exp)
}

fn parse_decimal(digits: &str) -> Option<BigInt> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    BigInt::parse_bytes(digits.as_bytes(), 10)
}

/// Parse `123` or `1.25` into an exact rational.
fn parse_rational(text: &str) -> Option<BigRational> {
    match text.split_once('.') {
        Some((integer, fraction)) => {
            let integer = parse_decimal(integer)?;
            if fraction.is_empty() {
                return Some(BigRational::from_integer(integer));
            }
            let numerator = parse_decimal(fraction)?;
            let scale = num_traits::pow(BigInt::from(10), fraction.len());
            Some(BigRational::from_integer(integer) + BigRational::new(numerator, scale))
        }
        None => parse_decimal(text).map(BigRational::from_integer),
    }
}

/// Parse a number literal (decimal, hex, fractional or scientific, with `_`
/// separators) and apply its sub-denomination.
pub fn parse_number(text: &str, sub: SubDenomination) -> Result<NumberLiteral, TypeError> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let mut compatible_bytes = None;

    let mut value = if let Some(hex) = cleaned.strip_prefix("0x") {
        if hex.is_empty() {
            return Err(invalid("hex literal without digits"));
        }
        let parsed = BigInt::parse_bytes(hex.as_bytes(), 16)
            .ok_or_else(|| invalid(format!("malformed hex literal {text}")))?;
        if hex.len() % 2 == 0 && hex.len() / 2 <= 32 {
            compatible_bytes = Some((hex.len() / 2) as u8);
        }
        BigRational::from_integer(parsed)
    } else if let Some(pos) = cleaned.find(['e', 'E']) {
        let mantissa = parse_rational(&cleaned[..pos])
            .ok_or_else(|| invalid(format!("malformed mantissa in {text}")))?;
        if mantissa.is_zero() {
            return Ok(NumberLiteral {
                value: mantissa,
                compatible_bytes: None,
            });
        }
        let exponent: i64 = cleaned[pos + 1..]
            .parse()
            .map_err(|_| invalid(format!("malformed exponent in {text}")))?;
        if exponent > i64::from(i32::MAX) || exponent < i64::from(i32::MIN) {
            return Err(invalid("exponent out of range"));
        }
        let abs_exp = exponent.unsigned_abs() as u32;
        let scale = BigRational::from_integer(num_traits::pow(BigInt::from(10), abs_exp as usize));
        if exponent < 0 {
            if !fits_precision_base10(&mantissa.denom().abs(), abs_exp) {
                return Err(invalid("literal exceeds rational precision"));
            }
            mantissa / scale
        } else {
            if !fits_precision_base10(&mantissa.numer().abs(), abs_exp) {
                return Err(invalid("literal exceeds rational precision"));
            }
            mantissa * scale
        }
    } else {
        parse_rational(&cleaned).ok_or_else(|| invalid(format!("malformed number {text}")))?
    };

    let factor = sub.multiplier();
    if factor != 1 {
        value *= BigRational::from_integer(BigInt::from(factor));
    }
    Ok(NumberLiteral {
        value,
        compatible_bytes,
    })
}

/// Whether the value has a non-trivial denominator.
pub fn is_fractional(value: &BigRational) -> bool {
    !value.denom().is_one()
}

/// The narrowest integer type holding `value`, or `None` for fractions and
/// values beyond 256 bits.
///
/// A negative value needs one extra bit: `-129` maps to `int16`, `-128` to `int8`.
pub fn integer_type(value: &BigRational) -> Option<IntegerType> {
    if is_fractional(value) {
        return None;
    }
    let mut magnitude = value.numer().clone();
    let negative = magnitude.sign() == Sign::Minus;
    if negative {
        magnitude = ((-magnitude) - BigInt::one()) << 1;
    }
    let magnitude = magnitude.to_biguint()?;
    if magnitude > u256_max() {
        return None;
    }
    let bytes = bytes_required(&magnitude).max(1);
    Some(IntegerType::new((bytes * 8) as u16, negative))
}

/// The machine word of an integral constant (two's complement for negatives).
pub fn literal_value(value: &BigRational) -> Option<BigUint> {
    if is_fractional(value) {
        return None;
    }
    let numer = value.numer();
    if numer.sign() == Sign::Minus {
        if *numer < -BigInt::from(two_pow(255)) {
            return None;
        }
        Some(to_word(numer))
    } else {
        let word = numer.to_biguint()?;
        (word <= u256_max()).then_some(word)
    }
}

/// Whether an integral constant fits into `ty`.
pub fn fits_integer(value: &BigRational, ty: IntegerType) -> bool {
    if is_fractional(value) {
        return false;
    }
    let numer = value.numer();
    *numer >= ty.min_value() && *numer <= ty.max_value()
}

/// Fold a unary operator over a constant. `None` when the operator does not apply.
pub fn fold_unary(op: UnaryOp, value: &BigRational) -> Option<BigRational> {
    match op {
        UnaryOp::BitNot => {
            if is_fractional(value) {
                return None;
            }
            Some(BigRational::from_integer(!value.numer().clone()))
        }
        UnaryOp::Neg => Some(-value.clone()),
        _ => None,
    }
}

fn check_precision(value: BigRational) -> Result<BigRational, TypeError> {
    if !value.numer().is_zero()
        && most_significant_bit(value.numer()).max(most_significant_bit(value.denom())) > MAX_PRECISION_BITS
    {
        return Err(TypeError::PrecisionLimit {
            span: Default::default(),
        });
    }
    Ok(value)
}

fn shift_amount(value: &BigRational) -> Option<u32> {
    if value.is_negative() {
        return None;
    }
    value.numer().to_u32()
}

fn optimized_pow(base: &BigInt, exp: u32) -> BigInt {
    if base.is_one() {
        BigInt::one()
    } else if *base == -BigInt::one() {
        BigInt::from(1 - 2 * i32::from(exp & 1 == 1))
    } else {
        num_traits::pow(base.clone(), exp as usize)
    }
}

/// Fold a non-comparison binary operator over two constants.
///
/// Returns `Ok(None)` when the operator does not apply (bit operations on
/// fractions, division by zero, negative shift amounts) and
/// [`TypeError::PrecisionLimit`] when the result would exceed 4096 bits.
pub fn fold_binary(
    op: BinaryOp,
    left: &BigRational,
    right: &BigRational,
) -> Result<Option<BigRational>, TypeError> {
    let fractional = is_fractional(left) || is_fractional(right);
    let value = match op {
        BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::BitAnd => {
            if fractional {
                return Ok(None);
            }
            let (l, r) = (left.numer(), right.numer());
            let folded = match op {
                BinaryOp::BitOr => l | r,
                BinaryOp::BitXor => l ^ r,
                _ => l & r,
            };
            BigRational::from_integer(folded)
        }
        BinaryOp::Add => left + right,
        BinaryOp::Sub => left - right,
        BinaryOp::Mul => left * right,
        BinaryOp::Div => {
            if right.is_zero() {
                return Ok(None);
            }
            left / right
        }
        BinaryOp::Mod => {
            if right.is_zero() {
                return Ok(None);
            }
            if fractional {
                let quotient = left / right;
                let truncated = quotient.numer() / quotient.denom();
                left - BigRational::from_integer(truncated) * right
            } else {
                BigRational::from_integer(left.numer() % right.numer())
            }
        }
        BinaryOp::Exp => {
            if is_fractional(right) {
                return Ok(None);
            }
            let exp = right.numer();
            if exp.is_zero() {
                BigRational::one()
            } else if left.numer().is_zero() || left.is_one() {
                left.clone()
            } else if *left == -BigRational::one() {
                let odd = exp.is_odd();
                BigRational::from_integer(BigInt::from(if odd { -1 } else { 1 }))
            } else {
                let Some(abs_exp) = exp.abs().to_u32() else {
                    return Ok(None);
                };
                if !fits_precision_exp(&left.numer().abs(), abs_exp)
                    || !fits_precision_exp(&left.denom().abs(), abs_exp)
                {
                    return Err(TypeError::PrecisionLimit {
                        span: Default::default(),
                    });
                }
                let numerator = optimized_pow(left.numer(), abs_exp);
                let denominator = optimized_pow(left.denom(), abs_exp);
                if exp.sign() != Sign::Minus {
                    BigRational::new(numerator, denominator)
                } else {
                    BigRational::new(denominator, numerator)
                }
            }
        }
        BinaryOp::Shl => {
            if fractional {
                return Ok(None);
            }
            let Some(amount) = shift_amount(right) else {
                return Ok(None);
            };
            if left.numer().is_zero() {
                BigRational::zero()
            } else {
                if !fits_precision_base2(&left.numer().abs(), amount) {
                    return Ok(None);
                }
                BigRational::from_integer(left.numer() << amount as usize)
            }
        }
        BinaryOp::Shr => {
            if fractional {
                return Ok(None);
            }
            let Some(amount) = shift_amount(right) else {
                return Ok(None);
            };
            let numer = left.numer();
            if numer.is_zero() {
                BigRational::zero()
            } else if u64::from(amount) > most_significant_bit(numer) {
                if numer.is_negative() {
                    -BigRational::one()
                } else {
                    BigRational::zero()
                }
            } else {
                let divisor = BigInt::from(two_pow(amount));
                if numer.is_negative() {
                    // Rounds towards negative infinity, matching the generated SAR.
                    BigRational::from_integer((numer + BigInt::one()) / divisor - BigInt::one())
                } else {
                    BigRational::from_integer(numer / divisor)
                }
            }
        }
        _ => return Ok(None),
    };
    check_precision(value).map(Some)
}

/// Shorten very long decimal renderings for diagnostics.
pub fn readable(value: &BigInt) -> String {
    let s = value.to_string();
    if s.len() > 32 {
        let omitted = s.len() - 8;
        format!("{}...({} digits omitted)...{}", &s[..4], omitted, &s[s.len() - 4..])
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> BigRational {
        BigRational::from_integer(BigInt::from(v))
    }

    fn parse(text: &str) -> BigRational {
        parse_number(text, SubDenomination::None).unwrap().value
    }

    #[test]
    fn minimal_integer_types() {
        assert_eq!(integer_type(&int(255)), Some(IntegerType::new(8, false)));
        assert_eq!(integer_type(&int(256)), Some(IntegerType::new(16, false)));
        assert_eq!(integer_type(&int(-128)), Some(IntegerType::new(8, true)));
        assert_eq!(integer_type(&int(-129)), Some(IntegerType::new(16, true)));
        assert_eq!(integer_type(&int(0)), Some(IntegerType::new(8, false)));
        assert_eq!(integer_type(&parse("1.5")), None);
    }

    #[test]
    fn too_large_has_no_integer_type() {
        let big = BigRational::from_integer(BigInt::from(two_pow(256)));
        assert_eq!(integer_type(&big), None);
        let max = BigRational::from_integer(BigInt::from(u256_max()));
        assert_eq!(integer_type(&max), Some(IntegerType::new(256, false)));
    }

    #[test]
    fn parses_literal_forms() {
        assert_eq!(parse("1_000"), int(1000));
        assert_eq!(parse("2.5"), BigRational::new(BigInt::from(5), BigInt::from(2)));
        assert_eq!(parse("1e3"), int(1000));
        assert_eq!(parse("25e-1"), BigRational::new(BigInt::from(5), BigInt::from(2)));
        assert_eq!(parse("0x1234"), int(0x1234));
        assert!(parse_number("1.2.3", SubDenomination::None).is_err());
        assert!(parse_number("0x", SubDenomination::None).is_err());
    }

    #[test]
    fn hex_literals_record_bytes_width() {
        let lit = parse_number("0x00ff", SubDenomination::None).unwrap();
        assert_eq!(lit.compatible_bytes, Some(2));
        let odd = parse_number("0xfff", SubDenomination::None).unwrap();
        assert_eq!(odd.compatible_bytes, None);
    }

    #[test]
    fn sub_denominations() {
        let ether = parse_number("1", SubDenomination::Ether).unwrap().value;
        assert_eq!(ether, BigRational::from_integer(BigInt::from(10u64.pow(18))));
        let day = parse_number("2", SubDenomination::Day).unwrap().value;
        assert_eq!(day, int(172_800));
    }

    #[test]
    fn folding_arithmetic() {
        assert_eq!(fold_binary(BinaryOp::Add, &int(2), &int(3)).unwrap(), Some(int(5)));
        assert_eq!(fold_binary(BinaryOp::Mod, &int(-7), &int(3)).unwrap(), Some(int(-1)));
        assert_eq!(fold_binary(BinaryOp::Div, &int(1), &int(0)).unwrap(), None);
        assert_eq!(
            fold_binary(BinaryOp::Div, &int(1), &int(4)).unwrap(),
            Some(BigRational::new(BigInt::from(1), BigInt::from(4)))
        );
    }

    #[test]
    fn folding_exponentiation() {
        assert_eq!(fold_binary(BinaryOp::Exp, &int(2), &int(10)).unwrap(), Some(int(1024)));
        assert_eq!(fold_binary(BinaryOp::Exp, &int(-1), &int(7)).unwrap(), Some(int(-1)));
        assert_eq!(
            fold_binary(BinaryOp::Exp, &int(2), &int(-2)).unwrap(),
            Some(BigRational::new(BigInt::from(1), BigInt::from(4)))
        );
        assert!(matches!(
            fold_binary(BinaryOp::Exp, &int(2), &int(5000)),
            Err(TypeError::PrecisionLimit { .. })
        ));
        assert_eq!(
            fold_binary(BinaryOp::Exp, &int(1), &int(1_000_000_000_000)).unwrap(),
            Some(int(1))
        );
    }

    #[test]
    fn folding_shifts() {
        assert_eq!(fold_binary(BinaryOp::Shl, &int(1), &int(8)).unwrap(), Some(int(256)));
        assert_eq!(fold_binary(BinaryOp::Shr, &int(-3), &int(1)).unwrap(), Some(int(-2)));
        assert_eq!(fold_binary(BinaryOp::Shr, &int(-1), &int(100)).unwrap(), Some(int(-1)));
        assert_eq!(fold_binary(BinaryOp::Shr, &int(5), &int(100)).unwrap(), Some(int(0)));
        assert_eq!(fold_binary(BinaryOp::Shl, &int(1), &int(-1)).unwrap(), None);
        assert_eq!(fold_binary(BinaryOp::Shl, &int(1), &int(5000)).unwrap(), None);
    }

    #[test]
    fn bit_operations_reject_fractions() {
        let half = BigRational::new(BigInt::from(1), BigInt::from(2));
        assert_eq!(fold_binary(BinaryOp::BitAnd, &half, &int(1)).unwrap(), None);
        assert_eq!(fold_unary(UnaryOp::BitNot, &half), None);
        assert_eq!(fold_unary(UnaryOp::BitNot, &int(0)), Some(int(-1)));
    }

    #[test]
    fn literal_words() {
        assert_eq!(literal_value(&int(-1)), Some(u256_max()));
        assert_eq!(literal_value(&int(7)), Some(BigUint::from(7u32)));
        assert_eq!(literal_value(&parse("0.5")), None);
    }

    #[test]
    fn readable_shortens() {
        let long = BigInt::from(two_pow(200));
        assert!(readable(&long).contains("digits omitted"));
        assert_eq!(readable(&BigInt::from(42)), "42");
    }
}
