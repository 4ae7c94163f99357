//! Shapes of values crossing an ABI boundary.
//!
//! - [`Type::interface_type`]: the type as seen by an external caller, or
//!   `None` when the type cannot be passed externally (mappings, internal
//!   functions, recursive structs).
//! - [`Type::encoding_type`]: what a value is converted to before encoding
//!   (enums to their underlying integer, contracts to addresses).
//! - [`Type::decoding_type`]: what decoded data becomes on the stack.
//! - [`Type::canonical_name`]: the spelling used in signatures.

use crate::env::TypeEnv;
use crate::types::{ArrayType, DataLocation, FunctionKind, Type};

impl Type {
    /// Type seen by external callers. `in_library` keeps storage references
    /// and mappings, which library functions may take.
    pub fn interface_type(&self, env: &TypeEnv, in_library: bool) -> Option<Type> {
        match self {
            Type::Address { .. } | Type::Integer(_) | Type::Bool | Type::FixedBytes(_) => Some(self.clone()),
            Type::Enum(_) => Some(Type::uint(self.storage_bytes(env) as u16 * 8)),
            Type::Contract(contract) if !contract.is_super => Some(Type::Address {
                payable: env.contract(contract.id).receives_ether,
            }),
            Type::Function(f) if f.kind == FunctionKind::External => Some(self.clone()),
            Type::Mapping(_) if in_library => Some(self.clone()),
            Type::Array(array) => {
                if in_library && array.location == DataLocation::Storage {
                    return Some(self.clone());
                }
                let base = array.base.interface_type(env, in_library)?;
                Some(Type::Array(ArrayType {
                    kind: array.kind,
                    base: Box::new(base.with_location_if_reference(DataLocation::Memory)),
                    length: array.length.clone(),
                    location: DataLocation::Memory,
                    pointer: true,
                }))
            }
            Type::Struct(s) => {
                if env.is_recursive_struct(s.id) {
                    return None;
                }
                if in_library && s.location == DataLocation::Storage {
                    return Some(self.clone());
                }
                let members_ok = env
                    .struct_member_types(s.id, DataLocation::Memory)
                    .iter()
                    .all(|(_, ty)| ty.interface_type(env, false).is_some());
                members_ok.then(|| self.with_location(DataLocation::Memory, true))
            }
            _ => None,
        }
    }

    /// Type a value is converted to before ABI encoding.
    pub fn encoding_type(&self, env: &TypeEnv) -> Option<Type> {
        match self {
            Type::RationalNumber(_) | Type::StringLiteral(_) => {
                self.mobile_type(env)?.encoding_type(env)
            }
            Type::Array(array) if array.location == DataLocation::Storage => {
                // encoded straight from storage
                array.base.encoding_type(env)?;
                Some(self.clone())
            }
            Type::Struct(s) if s.location == DataLocation::Storage => {
                self.interface_type(env, false)?;
                Some(self.clone())
            }
            Type::Array(array) if array.location == DataLocation::CallData => {
                array.base.encoding_type(env)?;
                Some(self.clone())
            }
            Type::Struct(s) if s.location == DataLocation::CallData => {
                self.interface_type(env, false)?;
                Some(self.clone())
            }
            other => other.interface_type(env, false),
        }
    }

    /// Type decoded ABI data takes on the stack: memory for reference types
    /// decoded from memory, the type itself for value types.
    pub fn decoding_type(&self, env: &TypeEnv) -> Option<Type> {
        match self {
            Type::Enum(_) | Type::Contract(_) => Some(self.clone()),
            Type::Array(_) | Type::Struct(_) => {
                self.interface_type(env, false)?;
                Some(self.with_location(DataLocation::Memory, true))
            }
            other => other.interface_type(env, false),
        }
    }

    /// Spelling in function and event signatures.
    pub fn canonical_name(&self, env: &TypeEnv) -> String {
        match self {
            Type::Address { .. } | Type::Contract(_) => "address".into(),
            Type::Integer(int) => format!("{}int{}", if int.signed { "" } else { "u" }, int.bits),
            Type::Bool => "bool".into(),
            Type::FixedBytes(n) => format!("bytes{n}"),
            Type::Enum(_) => format!("uint{}", self.storage_bytes(env) * 8),
            Type::RationalNumber(_) | Type::StringLiteral(_) => self
                .mobile_type(env)
                .map(|m| m.canonical_name(env))
                .unwrap_or_default(),
            Type::Array(array) => {
                if array.is_string() {
                    "string".into()
                } else if array.is_byte_array() {
                    "bytes".into()
                } else {
                    let length = array.length.as_ref().map(|l| l.to_string()).unwrap_or_default();
                    format!("{}[{length}]", array.base.canonical_name(env))
                }
            }
            Type::Struct(s) => {
                let members: Vec<String> = env
                    .struct_memory_members(s.id)
                    .iter()
                    .map(|(_, ty)| ty.canonical_name(env))
                    .collect();
                format!("({})", members.join(","))
            }
            Type::Mapping(mapping) => format!(
                "mapping({} => {})",
                mapping.key.canonical_name(env),
                mapping.value.canonical_name(env)
            ),
            Type::Function(_) => "function".into(),
            other => other.name(env),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ContractKind;

    #[test]
    fn value_types_are_their_own_interface() {
        let env = TypeEnv::new();
        assert_eq!(Type::uint(8).interface_type(&env, false), Some(Type::uint(8)));
        assert_eq!(Type::Bool.canonical_name(&env), "bool");
    }

    #[test]
    fn enums_and_contracts_collapse() {
        let mut env = TypeEnv::new();
        let e = env.add_enum("E", None, &["A", "B"]);
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        assert_eq!(Type::Enum(e).interface_type(&env, false), Some(Type::uint(8)));
        assert_eq!(Type::Enum(e).canonical_name(&env), "uint8");
        assert_eq!(Type::contract(c).interface_type(&env, false), Some(Type::address()));
        assert_eq!(Type::contract(c).decoding_type(&env), Some(Type::contract(c)));
    }

    #[test]
    fn mappings_have_no_interface() {
        let env = TypeEnv::new();
        let mapping = Type::mapping(Type::uint256(), Type::uint256());
        assert_eq!(mapping.interface_type(&env, false), None);
        assert!(mapping.interface_type(&env, true).is_some());
    }

    #[test]
    fn storage_arrays_become_memory() {
        let env = TypeEnv::new();
        let storage = Type::array(Type::uint(8), None, DataLocation::Storage);
        assert_eq!(
            storage.interface_type(&env, false),
            Some(Type::array(Type::uint(8), None, DataLocation::Memory))
        );
        assert_eq!(storage.canonical_name(&env), "uint8[]");
        assert_eq!(storage.encoding_type(&env), Some(storage.clone()));
    }

    #[test]
    fn struct_signature_is_a_tuple() {
        let mut env = TypeEnv::new();
        let s = env.add_struct(
            "S",
            None,
            vec![
                ("a".into(), Type::uint256()),
                ("b".into(), Type::bytes(DataLocation::Storage)),
            ],
        );
        assert_eq!(
            Type::struct_type(s, DataLocation::Memory).canonical_name(&env),
            "(uint256,bytes)"
        );
    }

    #[test]
    fn recursive_struct_has_no_interface() {
        let mut env = TypeEnv::new();
        let node = env.add_struct("Node", None, vec![]);
        env.set_struct_members(
            node,
            vec![(
                "next".into(),
                Type::array(Type::struct_type(node, DataLocation::Storage), None, DataLocation::Storage),
            )],
        );
        assert_eq!(Type::struct_type(node, DataLocation::Memory).interface_type(&env, false), None);
    }

    #[test]
    fn literals_encode_as_mobile_types() {
        let env = TypeEnv::new();
        assert_eq!(Type::rational_int(300).encoding_type(&env), Some(Type::uint(16)));
        assert_eq!(
            Type::string_literal("hi").encoding_type(&env),
            Some(Type::string(DataLocation::Memory))
        );
    }
}
