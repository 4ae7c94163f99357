//! Canonical type identifiers and human-readable names.
//!
//! The identifier is a deterministic string that names a type uniquely:
//! `t_uint256`, `t_mapping$_t_address_$_t_uint256_$`, ... It keys the
//! interning table, the layout cache and runtime helper names, so it must
//! only contain characters valid in a label.

use num_traits::Signed;

use crate::env::TypeEnv;
use crate::hash::{keccak256, to_hex};
use crate::rational::{is_fractional, readable};
use crate::types::{
    ArrayKind, ArrayType, DataLocation, FunctionKind, FunctionType, MagicKind, Type,
};

/// Escape a rich identifier so it contains no parentheses or commas.
pub(crate) fn escape_identifier(rich: &str) -> String {
    rich.replace('$', "$$$")
        .replace(',', "_$_")
        .replace('(', "$_")
        .replace(')', "_$")
}

fn parenthesize(inner: &str) -> String {
    format!("({inner})")
}

fn identifier_list<'a>(env: &TypeEnv, types: impl IntoIterator<Item = Option<&'a Type>>) -> String {
    let parts: Vec<String> = types
        .into_iter()
        .map(|ty| ty.map(|t| t.rich_identifier(env)).unwrap_or_default())
        .collect();
    parenthesize(&parts.join(","))
}

fn location_suffix(location: DataLocation, pointer: bool) -> &'static str {
    match (location, pointer) {
        (DataLocation::Storage, false) => "_storage",
        (DataLocation::Storage, true) => "_storage_ptr",
        (DataLocation::Memory, false) => "_memory",
        (DataLocation::Memory, true) => "_memory_ptr",
        (DataLocation::CallData, false) => "_calldata",
        (DataLocation::CallData, true) => "_calldata_ptr",
    }
}

fn location_name(location: DataLocation, pointer: bool) -> &'static str {
    match (location, pointer) {
        (DataLocation::Storage, false) => "storage ref",
        (DataLocation::Storage, true) => "storage pointer",
        (DataLocation::Memory, _) => "memory",
        (DataLocation::CallData, _) => "calldata",
    }
}

impl Type {
    /// Identifier before escaping; nested types appear unescaped inside parentheses.
    pub fn rich_identifier(&self, env: &TypeEnv) -> String {
        match self {
            Type::Address { payable: true } => "t_address_payable".into(),
            Type::Address { payable: false } => "t_address".into(),
            Type::Integer(int) => {
                format!("t_{}int{}", if int.signed { "" } else { "u" }, int.bits)
            }
            Type::RationalNumber(rational) => {
                let numer = rational.value.numer().abs();
                let denom = rational.value.denom().abs();
                if rational.value.is_negative() {
                    format!("t_rational_minus_{numer}_by_{denom}")
                } else {
                    format!("t_rational_{numer}_by_{denom}")
                }
            }
            Type::StringLiteral(bytes) => format!("t_stringliteral_{}", to_hex(&keccak256(bytes))),
            Type::Bool => "t_bool".into(),
            Type::FixedBytes(n) => format!("t_bytes{n}"),
            Type::Array(array) => array_rich_identifier(env, array),
            Type::Mapping(mapping) => format!(
                "t_mapping{}",
                identifier_list(env, [Some(&*mapping.key), Some(&*mapping.value)])
            ),
            Type::Struct(s) => format!(
                "t_struct{}{}{}",
                parenthesize(&env.struct_def(s.id).name),
                s.id.0,
                location_suffix(s.location, s.pointer)
            ),
            Type::Enum(id) => format!("t_enum{}{}", parenthesize(&env.enum_def(*id).name), id.0),
            Type::Contract(contract) => format!(
                "{}{}{}",
                if contract.is_super { "t_super" } else { "t_contract" },
                parenthesize(&env.contract(contract.id).name),
                contract.id.0
            ),
            Type::Tuple(components) => {
                format!("t_tuple{}", identifier_list(env, components.iter().map(Option::as_ref)))
            }
            Type::Function(function) => function_rich_identifier(env, function),
            Type::Magic(kind) => match kind {
                MagicKind::Block => "t_magic_block".into(),
                MagicKind::Message => "t_magic_message".into(),
                MagicKind::Transaction => "t_magic_transaction".into(),
                MagicKind::Abi => "t_magic_abi".into(),
                MagicKind::MetaType(inner) => format!("t_magic_meta_type_{}", inner.rich_identifier(env)),
            },
            Type::TypeType(inner) => format!("t_type{}", identifier_list(env, [Some(&**inner)])),
        }
    }

    /// Canonical escaped identifier, e.g. `t_array$_t_uint8_$dyn_storage`.
    pub fn identifier(&self, env: &TypeEnv) -> String {
        escape_identifier(&self.rich_identifier(env))
    }

    /// Human-readable name used in diagnostics, e.g. `bytes memory`.
    pub fn name(&self, env: &TypeEnv) -> String {
        self.display_name(env, false)
    }

    /// Name without location qualifiers.
    pub fn short_name(&self, env: &TypeEnv) -> String {
        self.display_name(env, true)
    }

    fn display_name(&self, env: &TypeEnv, short: bool) -> String {
        match self {
            Type::Address { payable: true } => "address payable".into(),
            Type::Address { payable: false } => "address".into(),
            Type::Integer(int) => format!("{}int{}", if int.signed { "" } else { "u" }, int.bits),
            Type::RationalNumber(rational) => {
                if is_fractional(&rational.value) {
                    format!(
                        "rational_const {} / {}",
                        readable(rational.value.numer()),
                        readable(rational.value.denom())
                    )
                } else {
                    format!("int_const {}", readable(rational.value.numer()))
                }
            }
            Type::StringLiteral(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => format!("literal_string \"{text}\""),
                Err(error) => format!(
                    "literal_string (contains invalid UTF-8 sequence at position {})",
                    error.valid_up_to()
                ),
            },
            Type::Bool => "bool".into(),
            Type::FixedBytes(n) => format!("bytes{n}"),
            Type::Array(array) => {
                let mut name = match array.kind {
                    ArrayKind::String => "string".to_string(),
                    ArrayKind::Bytes => "bytes".to_string(),
                    ArrayKind::Ordinary => {
                        let length = array
                            .length
                            .as_ref()
                            .map(|l| l.to_string())
                            .unwrap_or_default();
                        format!("{}[{length}]", array.base.display_name(env, short))
                    }
                };
                if !short {
                    name.push(' ');
                    name.push_str(location_name(array.location, array.pointer));
                }
                name
            }
            Type::Mapping(mapping) => format!(
                "mapping({} => {})",
                mapping.key.display_name(env, short),
                mapping.value.display_name(env, short)
            ),
            Type::Struct(s) => {
                let mut name = format!("struct {}", env.struct_def(s.id).name);
                if !short {
                    name.push(' ');
                    name.push_str(location_name(s.location, s.pointer));
                }
                name
            }
            Type::Enum(id) => format!("enum {}", env.enum_def(*id).name),
            Type::Contract(contract) => {
                let def = env.contract(contract.id);
                format!(
                    "{}{}{}",
                    if def.kind == crate::env::ContractKind::Library {
                        "library "
                    } else {
                        "contract "
                    },
                    if contract.is_super { "super " } else { "" },
                    def.name
                )
            }
            Type::Tuple(components) => {
                let parts: Vec<String> = components
                    .iter()
                    .map(|c| c.as_ref().map(|t| t.display_name(env, short)).unwrap_or_default())
                    .collect();
                format!("tuple({})", parts.join(","))
            }
            Type::Function(function) => {
                let params: Vec<String> = function.params.iter().map(|p| p.display_name(env, short)).collect();
                let mut name = format!("function ({})", params.join(","));
                if function.mutability != crate::types::StateMutability::NonPayable {
                    name.push(' ');
                    name.push_str(function.mutability.as_str());
                }
                if function.kind == FunctionKind::External {
                    name.push_str(" external");
                }
                if !function.returns.is_empty() {
                    let returns: Vec<String> =
                        function.returns.iter().map(|r| r.display_name(env, short)).collect();
                    name.push_str(&format!(" returns ({})", returns.join(",")));
                }
                name
            }
            Type::Magic(kind) => match kind {
                MagicKind::Block => "block".into(),
                MagicKind::Message => "msg".into(),
                MagicKind::Transaction => "tx".into(),
                MagicKind::Abi => "abi".into(),
                MagicKind::MetaType(inner) => format!("type({})", inner.display_name(env, short)),
            },
            Type::TypeType(inner) => format!("type({})", inner.display_name(env, short)),
        }
    }
}

fn array_rich_identifier(env: &TypeEnv, array: &ArrayType) -> String {
    let mut id = match array.kind {
        ArrayKind::String => "t_string".to_string(),
        ArrayKind::Bytes => "t_bytes".to_string(),
        ArrayKind::Ordinary => {
            let length = match &array.length {
                Some(length) => length.to_string(),
                None => "dyn".to_string(),
            };
            format!("t_array{}{length}", identifier_list(env, [Some(&*array.base)]))
        }
    };
    id.push_str(location_suffix(array.location, array.pointer));
    id
}

fn function_rich_identifier(env: &TypeEnv, function: &FunctionType) -> String {
    let mut id = format!(
        "t_function_{}_{}",
        function.kind.identifier(),
        function.mutability.as_str()
    );
    id.push_str(&identifier_list(env, function.params.iter().map(Some)));
    id.push_str("returns");
    id.push_str(&identifier_list(env, function.returns.iter().map(Some)));
    if function.gas_set() {
        id.push_str("gas");
    }
    if function.value_set() {
        id.push_str("value");
    }
    if function.salt_set() {
        id.push_str("salt");
    }
    if function.bound()
        && let Some(receiver) = function.params.first()
    {
        id.push_str("bound_to");
        id.push_str(&identifier_list(env, [Some(receiver)]));
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::TypeEnv;

    #[test]
    fn elementary_identifiers() {
        let env = TypeEnv::new();
        assert_eq!(Type::uint256().identifier(&env), "t_uint256");
        assert_eq!(Type::int(16).identifier(&env), "t_int16");
        assert_eq!(Type::address_payable().identifier(&env), "t_address_payable");
        assert_eq!(Type::fixed_bytes(4).identifier(&env), "t_bytes4");
        assert_eq!(Type::rational_int(-129).identifier(&env), "t_rational_minus_129_by_1");
    }

    #[test]
    fn reference_identifiers() {
        let env = TypeEnv::new();
        assert_eq!(Type::bytes(DataLocation::Memory).identifier(&env), "t_bytes_memory_ptr");
        assert_eq!(Type::string(DataLocation::Storage).identifier(&env), "t_string_storage");
        assert_eq!(
            Type::array(Type::uint(8), None, DataLocation::Storage).identifier(&env),
            "t_array$_t_uint8_$dyn_storage"
        );
        assert_eq!(
            Type::mapping(Type::address(), Type::uint256()).identifier(&env),
            "t_mapping$_t_address_$_t_uint256_$"
        );
    }

    #[test]
    fn nested_mapping_identifier() {
        let env = TypeEnv::new();
        let nested = Type::mapping(
            Type::uint256(),
            Type::mapping(Type::address(), Type::Bool),
        );
        assert_eq!(
            nested.identifier(&env),
            "t_mapping$_t_uint256_$_t_mapping$_t_address_$_t_bool_$_$"
        );
    }

    #[test]
    fn struct_identifier_and_name() {
        let mut env = TypeEnv::new();
        let s = env.add_struct("S", None, vec![("x".into(), Type::uint256())]);
        let storage = Type::struct_type(s, DataLocation::Storage);
        assert_eq!(storage.identifier(&env), "t_struct$_S_$0_storage");
        assert_eq!(storage.name(&env), "struct S storage ref");
        let memory = Type::struct_type(s, DataLocation::Memory);
        assert_eq!(memory.identifier(&env), "t_struct$_S_$0_memory_ptr");
    }

    #[test]
    fn display_names() {
        let env = TypeEnv::new();
        assert_eq!(Type::rational_int(-129).name(&env), "int_const -129");
        assert_eq!(Type::string_literal("hi").name(&env), "literal_string \"hi\"");
        assert_eq!(Type::bytes(DataLocation::Memory).name(&env), "bytes memory");
        assert_eq!(Type::address_payable().name(&env), "address payable");
    }

    #[test]
    fn identifiers_are_label_safe() {
        let env = TypeEnv::new();
        let tuple = Type::tuple(vec![Type::uint256(), Type::bytes(DataLocation::Memory)]);
        let id = tuple.identifier(&env);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$'));
    }
}
