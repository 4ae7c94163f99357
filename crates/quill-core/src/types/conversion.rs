//! Implicit and explicit convertibility.

use crate::env::TypeEnv;
use crate::rational::{fits_integer, is_fractional};
use crate::types::{ArrayType, DataLocation, FunctionType, StateMutability, StructType, Type};

impl Type {
    /// Whether a value of this type may be used where `target` is expected
    /// without an explicit conversion.
    pub fn is_implicitly_convertible_to(&self, env: &TypeEnv, target: &Type) -> bool {
        if self == target {
            return true;
        }
        match (self, target) {
            (Type::Address { payable }, Type::Address { payable: to_payable }) => *payable || !*to_payable,
            (Type::Integer(from), Type::Integer(to)) => {
                if to.bits < from.bits {
                    false
                } else if from.signed {
                    to.signed
                } else {
                    !to.signed || to.bits > from.bits
                }
            }
            (Type::RationalNumber(rational), Type::Integer(to)) => {
                !is_fractional(&rational.value) && fits_integer(&rational.value, *to)
            }
            (Type::RationalNumber(rational), Type::FixedBytes(n)) => {
                num_traits::Zero::is_zero(&rational.value) || rational.compatible_bytes == Some(*n)
            }
            (Type::StringLiteral(bytes), Type::FixedBytes(n)) => usize::from(*n) >= bytes.len(),
            (Type::StringLiteral(bytes), Type::Array(array)) => {
                array.is_byte_array()
                    && !(array.location == DataLocation::Storage && array.pointer)
                    && !(array.is_string() && std::str::from_utf8(bytes).is_err())
            }
            (Type::FixedBytes(from), Type::FixedBytes(to)) => to >= from,
            (Type::Contract(from), Type::Contract(to)) => {
                let bases = &env.contract(from.id).bases;
                if to.is_super {
                    return false;
                }
                let candidates = if from.is_super { bases.get(1..).unwrap_or(&[]) } else { &bases[..] };
                candidates.contains(&to.id)
            }
            (Type::Tuple(from), Type::Tuple(to)) => {
                if to.is_empty() {
                    return from.is_empty();
                }
                from.len() == to.len()
                    && from.iter().zip(to).all(|(f, t)| match (f, t) {
                        (None, Some(_)) => false,
                        (Some(f), Some(t)) => f.is_implicitly_convertible_to(env, t),
                        _ => true,
                    })
            }
            (Type::Array(from), Type::Array(to)) => array_implicitly_convertible(env, from, to),
            (Type::Struct(from), Type::Struct(to)) => struct_implicitly_convertible(from, to),
            (Type::Function(from), Type::Function(to)) => function_implicitly_convertible(from, to),
            _ => false,
        }
    }

    /// Whether `T(value)` is allowed.
    pub fn is_explicitly_convertible_to(&self, env: &TypeEnv, target: &Type) -> bool {
        if self.is_implicitly_convertible_to(env, target) {
            return true;
        }
        match (self, target) {
            (Type::Address { .. }, Type::Address { .. }) => true,
            (Type::Address { payable }, Type::Contract(contract)) => {
                *payable || !env.contract(contract.id).receives_ether
            }
            (Type::Address { .. }, Type::Integer(_)) => true,
            (Type::Address { .. }, Type::FixedBytes(20)) => true,
            (Type::Integer(_), Type::Integer(_) | Type::Address { .. } | Type::Contract(_) | Type::Enum(_)) => true,
            (Type::Integer(int), Type::FixedBytes(n)) => u32::from(int.bits) == u32::from(*n) * 8,
            (Type::RationalNumber(_), Type::FixedBytes(_)) => false,
            (Type::RationalNumber(_), _) => self
                .mobile_type(env)
                .is_some_and(|mobile| mobile.is_explicitly_convertible_to(env, target)),
            (Type::FixedBytes(n), Type::Integer(int)) => u32::from(*n) * 8 == u32::from(int.bits),
            (Type::FixedBytes(20), Type::Address { .. }) => true,
            (Type::FixedBytes(_), Type::FixedBytes(_)) => true,
            (Type::Contract(contract), Type::Address { payable }) => {
                env.contract(contract.id).receives_ether || !*payable
            }
            (Type::Enum(_), Type::Integer(_)) => true,
            (Type::Array(from), Type::Array(to)) => {
                from.location == to.location && from.is_byte_array() && to.is_byte_array()
            }
            (Type::Function(_), Type::Function(_)) => true,
            _ => false,
        }
    }
}

fn array_implicitly_convertible(env: &TypeEnv, from: &ArrayType, to: &ArrayType) -> bool {
    if from.is_byte_array() != to.is_byte_array() || from.is_string() != to.is_string() {
        return false;
    }
    // memory/calldata only converts to a direct storage reference, which copies
    if to.location == DataLocation::Storage && from.location != DataLocation::Storage && to.pointer {
        return false;
    }
    if to.location == DataLocation::CallData && from.location != DataLocation::CallData {
        return false;
    }
    if to.location == DataLocation::Storage && !to.pointer {
        if !from.base.is_implicitly_convertible_to(env, &to.base) {
            return false;
        }
        return match (&from.length, &to.length) {
            (_, None) => true,
            (Some(from_len), Some(to_len)) => to_len >= from_len,
            (None, Some(_)) => false,
        };
    }
    from.base.with_location_if_reference(from.location) == to.base.with_location_if_reference(from.location)
        && from.length == to.length
}

fn struct_implicitly_convertible(from: &StructType, to: &StructType) -> bool {
    if to.location == DataLocation::Storage && from.location != DataLocation::Storage && to.pointer {
        return false;
    }
    if to.location == DataLocation::CallData && from.location != DataLocation::CallData {
        return false;
    }
    from.id == to.id
}

fn function_implicitly_convertible(from: &FunctionType, to: &FunctionType) -> bool {
    if from.kind != to.kind
        || from.params != to.params
        || from.returns != to.returns
        || from.options != to.options
    {
        return false;
    }
    match (from.mutability, to.mutability) {
        (StateMutability::Payable, StateMutability::NonPayable) => true,
        (f, StateMutability::Payable) => f == StateMutability::Payable,
        (f, t) => f <= t,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ContractKind;
    use num_bigint::BigInt;
    use num_rational::BigRational;

    #[test]
    fn integer_widening() {
        let env = TypeEnv::new();
        assert!(Type::uint(8).is_implicitly_convertible_to(&env, &Type::uint(16)));
        assert!(Type::uint(8).is_implicitly_convertible_to(&env, &Type::int(16)));
        assert!(!Type::uint(8).is_implicitly_convertible_to(&env, &Type::int(8)));
        assert!(!Type::int(8).is_implicitly_convertible_to(&env, &Type::uint(256)));
        assert!(Type::int(8).is_explicitly_convertible_to(&env, &Type::uint(256)));
    }

    #[test]
    fn literal_conversions() {
        let env = TypeEnv::new();
        assert!(Type::rational_int(255).is_implicitly_convertible_to(&env, &Type::uint(8)));
        assert!(!Type::rational_int(256).is_implicitly_convertible_to(&env, &Type::uint(8)));
        assert!(!Type::rational_int(-1).is_implicitly_convertible_to(&env, &Type::uint(8)));
        assert!(Type::rational_int(-1).is_explicitly_convertible_to(&env, &Type::uint(8)));
        let half = Type::rational(BigRational::new(BigInt::from(1), BigInt::from(2)));
        assert!(!half.is_implicitly_convertible_to(&env, &Type::uint256()));
        assert!(Type::rational_int(0).is_implicitly_convertible_to(&env, &Type::fixed_bytes(4)));
        assert!(!Type::rational_int(1).is_explicitly_convertible_to(&env, &Type::fixed_bytes(4)));
    }

    #[test]
    fn string_literal_conversions() {
        let env = TypeEnv::new();
        let hi = Type::string_literal("hi");
        assert!(hi.is_implicitly_convertible_to(&env, &Type::fixed_bytes(2)));
        assert!(!hi.is_implicitly_convertible_to(&env, &Type::fixed_bytes(1)));
        assert!(hi.is_implicitly_convertible_to(&env, &Type::string(DataLocation::Memory)));
        assert!(hi.is_implicitly_convertible_to(&env, &Type::bytes(DataLocation::Storage)));
        let invalid = Type::string_literal(vec![0xff, 0xfe]);
        assert!(!invalid.is_implicitly_convertible_to(&env, &Type::string(DataLocation::Memory)));
    }

    #[test]
    fn address_payability() {
        let env = TypeEnv::new();
        assert!(Type::address_payable().is_implicitly_convertible_to(&env, &Type::address()));
        assert!(!Type::address().is_implicitly_convertible_to(&env, &Type::address_payable()));
        assert!(Type::address().is_explicitly_convertible_to(&env, &Type::address_payable()));
        assert!(Type::uint(160).is_explicitly_convertible_to(&env, &Type::address()));
        assert!(Type::fixed_bytes(20).is_explicitly_convertible_to(&env, &Type::address()));
        assert!(!Type::fixed_bytes(4).is_explicitly_convertible_to(&env, &Type::address()));
    }

    #[test]
    fn contract_inheritance() {
        let mut env = TypeEnv::new();
        let base = env.add_contract("Base", ContractKind::Contract, &[]);
        let derived = env.add_contract("Derived", ContractKind::Contract, &[base]);
        assert!(Type::contract(derived).is_implicitly_convertible_to(&env, &Type::contract(base)));
        assert!(!Type::contract(base).is_implicitly_convertible_to(&env, &Type::contract(derived)));
        assert!(Type::contract(derived).is_explicitly_convertible_to(&env, &Type::address()));
        assert!(!Type::contract(derived).is_explicitly_convertible_to(&env, &Type::address_payable()));
    }

    #[test]
    fn array_locations() {
        let env = TypeEnv::new();
        let memory = Type::array(Type::uint256(), None, DataLocation::Memory);
        let storage_ref = Type::array(Type::uint256(), None, DataLocation::Storage);
        let storage_ptr = storage_ref.with_location(DataLocation::Storage, true);
        assert!(memory.is_implicitly_convertible_to(&env, &storage_ref));
        assert!(!memory.is_implicitly_convertible_to(&env, &storage_ptr));
        assert!(storage_ref.is_implicitly_convertible_to(&env, &memory));
        let calldata = Type::array(Type::uint256(), None, DataLocation::CallData);
        assert!(!memory.is_implicitly_convertible_to(&env, &calldata));
        let small = Type::array(Type::uint(8), Some(2), DataLocation::Memory);
        let wide = Type::array(Type::uint256(), Some(3), DataLocation::Storage);
        assert!(small.is_implicitly_convertible_to(&env, &wide));
        assert!(Type::bytes(DataLocation::Memory).is_explicitly_convertible_to(&env, &Type::string(DataLocation::Memory)));
        assert!(!Type::bytes(DataLocation::Memory).is_implicitly_convertible_to(&env, &Type::string(DataLocation::Memory)));
    }

    #[test]
    fn tuple_wildcards() {
        let env = TypeEnv::new();
        let source = Type::tuple(vec![Type::uint(8), Type::Bool]);
        let target = Type::Tuple(vec![Some(Type::uint256()), None]);
        assert!(source.is_implicitly_convertible_to(&env, &target));
        let missing = Type::Tuple(vec![None, Some(Type::Bool)]);
        assert!(!missing.is_implicitly_convertible_to(&env, &source));
    }
}
