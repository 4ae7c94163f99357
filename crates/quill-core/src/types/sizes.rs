//! Storage, stack and ABI sizes.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};

use crate::env::TypeEnv;
use crate::error::LayoutError;
use crate::num::{bytes_required, two_pow};
use crate::types::{ArrayType, DataLocation, FunctionKind, Type};

impl Type {
    /// Bytes the type occupies inside a storage slot (at most 32).
    pub fn storage_bytes(&self, env: &TypeEnv) -> u32 {
        match self {
            Type::Address { .. } | Type::Contract(_) => 20,
            Type::Integer(int) => u32::from(int.bits) / 8,
            Type::Bool => 1,
            Type::FixedBytes(n) => u32::from(*n),
            Type::Enum(id) => {
                let members = env.enum_def(*id).values.len().max(1) as u64 - 1;
                bytes_required(&BigUint::from(members)).max(1)
            }
            Type::Function(f) => match f.kind {
                FunctionKind::Internal => 8,
                FunctionKind::External => 24,
                _ => 32,
            },
            _ => 32,
        }
    }

    /// Whole slots the type occupies in storage (at least 1).
    ///
    /// # Errors
    ///
    /// [`LayoutError::ArrayTooLarge`] for static arrays beyond `2^256` slots
    /// and [`LayoutError::ObjectTooLarge`] for oversized structs.
    pub fn storage_size(&self, env: &TypeEnv) -> Result<BigUint, LayoutError> {
        match self {
            Type::Array(array) => array_storage_size(env, array),
            Type::Struct(s) => {
                let layout = env.struct_layout(s.id)?;
                Ok(layout.storage_size().clone().max(BigUint::one()))
            }
            _ => Ok(BigUint::one()),
        }
    }

    /// Stack slots a value of this type occupies.
    pub fn size_on_stack(&self, env: &TypeEnv) -> usize {
        match self {
            Type::StringLiteral(_) | Type::Magic(_) | Type::TypeType(_) => 0,
            Type::Contract(contract) if contract.is_super => 0,
            Type::Array(array)
                if array.location == DataLocation::CallData && array.is_dynamically_sized() =>
            {
                2
            }
            Type::Tuple(components) => components
                .iter()
                .flatten()
                .map(|c| c.size_on_stack(env))
                .sum(),
            Type::Function(f) => f.size_on_stack(env),
            _ => 1,
        }
    }

    /// Whether the ABI encoding has a head offset and a tail.
    pub fn is_dynamically_encoded(&self, env: &TypeEnv) -> bool {
        match self {
            Type::Array(array) => {
                array.is_dynamically_sized() || array.base.is_dynamically_encoded(env)
            }
            Type::Struct(s) => env
                .struct_member_types(s.id, DataLocation::Memory)
                .iter()
                .any(|(_, ty)| ty.can_live_outside_storage(env) && ty.is_dynamically_encoded(env)),
            Type::Tuple(components) => components
                .iter()
                .flatten()
                .any(|c| c.is_dynamically_encoded(env)),
            Type::StringLiteral(_) => true,
            _ => false,
        }
    }

    /// Size of the static ABI encoding. For dynamically encoded types this
    /// is the size of the head offset.
    pub fn calldata_encoded_size(&self, env: &TypeEnv, padded: bool) -> u64 {
        if self.is_dynamically_encoded(env) {
            return 32;
        }
        match self {
            Type::Array(array) => {
                let length = array.length.as_ref().and_then(ToPrimitive::to_u64).unwrap_or(0);
                length.saturating_mul(array.base.calldata_encoded_size(env, true))
            }
            Type::Struct(s) => env
                .struct_memory_members(s.id)
                .iter()
                .map(|(_, ty)| ty.calldata_encoded_size(env, true))
                .sum(),
            Type::Tuple(components) => components
                .iter()
                .flatten()
                .map(|c| c.calldata_encoded_size(env, true))
                .sum(),
            Type::Bool
            | Type::Address { .. }
            | Type::Integer(_)
            | Type::FixedBytes(_)
            | Type::Enum(_)
            | Type::Contract(_)
            | Type::Function(_)
            | Type::RationalNumber(_) => {
                let bytes = u64::from(self.storage_bytes(env).min(32));
                if padded { 32 } else { bytes }
            }
            _ => 32,
        }
    }

    /// Bytes a value takes as an element or member of a memory object:
    /// value types inline, reference types as a pointer word.
    pub fn memory_head_size(&self, env: &TypeEnv) -> u64 {
        if self.is_reference_type() {
            32
        } else {
            self.calldata_encoded_size(env, true)
        }
    }

    /// Bytes of a memory object's data area, excluding the length word of
    /// dynamic arrays.
    pub fn memory_data_size(&self, env: &TypeEnv) -> u64 {
        match self {
            Type::Array(array) => match &array.length {
                Some(length) => length
                    .to_u64()
                    .unwrap_or(u64::MAX)
                    .saturating_mul(array.base.memory_head_size(env)),
                None => 32,
            },
            Type::Struct(s) => env
                .struct_memory_members(s.id)
                .iter()
                .map(|(_, ty)| ty.memory_head_size(env))
                .sum(),
            other => other.memory_head_size(env),
        }
    }
}

fn array_storage_size(env: &TypeEnv, array: &ArrayType) -> Result<BigUint, LayoutError> {
    let Some(length) = &array.length else {
        return Ok(BigUint::one());
    };
    let base_bytes = array.base.storage_bytes(env);
    let size = if base_bytes == 0 {
        BigUint::one()
    } else if base_bytes < 32 {
        let per_slot = 32 / base_bytes;
        (length + BigUint::from(per_slot - 1)) / per_slot
    } else {
        length * array.base.storage_size(env)?
    };
    if size >= two_pow(256) {
        return Err(LayoutError::ArrayTooLarge);
    }
    if size.is_zero() {
        Ok(BigUint::one())
    } else {
        Ok(size)
    }
}

/// Items of `base` packed into one storage slot (1 for types of 17 bytes or more).
pub fn items_per_slot(env: &TypeEnv, base: &Type) -> u32 {
    let bytes = base.storage_bytes(env);
    if bytes == 0 || bytes > 16 { 1 } else { 32 / bytes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_bytes_of_value_types() {
        let mut env = TypeEnv::new();
        assert_eq!(Type::uint(8).storage_bytes(&env), 1);
        assert_eq!(Type::address().storage_bytes(&env), 20);
        assert_eq!(Type::fixed_bytes(7).storage_bytes(&env), 7);
        let small = env.add_enum("Small", None, &["A", "B", "C"]);
        assert_eq!(Type::Enum(small).storage_bytes(&env), 1);
        let names: Vec<String> = (0..300).map(|i| format!("V{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let large = env.add_enum("Large", None, &refs);
        assert_eq!(Type::Enum(large).storage_bytes(&env), 2);
    }

    #[test]
    fn static_array_storage_size() {
        let env = TypeEnv::new();
        let packed = Type::array(Type::uint(8), Some(33), DataLocation::Storage);
        assert_eq!(packed.storage_size(&env).unwrap(), BigUint::from(2u32));
        let words = Type::array(Type::uint256(), Some(3), DataLocation::Storage);
        assert_eq!(words.storage_size(&env).unwrap(), BigUint::from(3u32));
        let dynamic = Type::array(Type::uint256(), None, DataLocation::Storage);
        assert_eq!(dynamic.storage_size(&env).unwrap(), BigUint::one());
    }

    #[test]
    fn huge_array_is_rejected() {
        let env = TypeEnv::new();
        let inner = Type::array(Type::uint256(), Some(u64::MAX), DataLocation::Storage);
        let mut ty = inner;
        for _ in 0..4 {
            ty = Type::array(ty, Some(u64::MAX), DataLocation::Storage);
        }
        assert_eq!(ty.storage_size(&env), Err(LayoutError::ArrayTooLarge));
    }

    #[test]
    fn stack_sizes() {
        let env = TypeEnv::new();
        assert_eq!(Type::uint256().size_on_stack(&env), 1);
        assert_eq!(Type::string_literal("x").size_on_stack(&env), 0);
        assert_eq!(Type::bytes(DataLocation::CallData).size_on_stack(&env), 2);
        assert_eq!(Type::bytes(DataLocation::Memory).size_on_stack(&env), 1);
        let tuple = Type::tuple(vec![Type::Bool, Type::bytes(DataLocation::CallData)]);
        assert_eq!(tuple.size_on_stack(&env), 3);
    }

    #[test]
    fn abi_sizes() {
        let env = TypeEnv::new();
        assert!(Type::string(DataLocation::Memory).is_dynamically_encoded(&env));
        let fixed = Type::array(Type::uint(8), Some(3), DataLocation::Memory);
        assert!(!fixed.is_dynamically_encoded(&env));
        assert_eq!(fixed.calldata_encoded_size(&env, true), 96);
        assert_eq!(fixed.memory_data_size(&env), 96);
        assert_eq!(Type::uint(8).calldata_encoded_size(&env, false), 1);
    }

    #[test]
    fn packing_density() {
        let env = TypeEnv::new();
        assert_eq!(items_per_slot(&env, &Type::uint(8)), 32);
        assert_eq!(items_per_slot(&env, &Type::uint(128)), 2);
        assert_eq!(items_per_slot(&env, &Type::address()), 1);
    }
}
