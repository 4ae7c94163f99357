//! The semantic type lattice.
//!
//! [`Type`] is a closed tagged union over every type category of the
//! language. Queries that need declarations (struct members, enum values,
//! contract functions) take the [`TypeEnv`] arena explicitly; the type values
//! themselves are plain immutable data compared structurally.
//!
//! ## Modules
//!
//! - [`abi`]: interface, encoding and decoding shapes and canonical signature names
//! - `conversion`: implicit and explicit convertibility
//! - [`function`]: function types and call kinds
//! - `identifier`: canonical `t_...` identifiers and display names
//! - [`members`]: member lookup including bound library functions
//! - `operators`: operator result types, common and mobile types
//! - `sizes`: storage, stack and ABI sizes

pub mod abi;
mod conversion;
pub mod function;
mod identifier;
pub mod members;
mod operators;
mod sizes;

pub use function::{CallOptions, FunctionKind, FunctionType};
pub use members::{Member, MemberList};
pub use operators::tuple_alignment;
pub use sizes::items_per_slot;

use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use num_traits::One;
use std::hash::{Hash, Hasher};

use crate::env::{ContractId, EnumId, StructId, TypeEnv};
use crate::num::two_pow;

/// Where a reference-type value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataLocation {
    /// Persistent contract storage.
    Storage,
    /// The linear heap.
    Memory,
    /// Read-only call input.
    CallData,
}

/// State mutability of functions and addresses, ordered from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateMutability {
    /// Neither reads nor writes state.
    Pure,
    /// Reads but does not write state.
    View,
    /// May write state, rejects value.
    NonPayable,
    /// May write state and receive value.
    Payable,
}

impl StateMutability {
    /// Source keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            StateMutability::Pure => "pure",
            StateMutability::View => "view",
            StateMutability::NonPayable => "nonpayable",
            StateMutability::Payable => "payable",
        }
    }
}

/// Type category tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Address,
    Integer,
    RationalNumber,
    StringLiteral,
    Bool,
    FixedBytes,
    Array,
    Mapping,
    Struct,
    Enum,
    Contract,
    Tuple,
    Function,
    Magic,
    TypeType,
}

/// Integer type `intN`/`uintN` with `N` in `8..=256` step 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntegerType {
    /// Width in bits.
    pub bits: u16,
    /// Two's complement signed.
    pub signed: bool,
}

impl IntegerType {
    /// Create an integer type.
    pub const fn new(bits: u16, signed: bool) -> Self {
        Self { bits, signed }
    }

    /// `uint256`.
    pub const fn uint256() -> Self {
        Self::new(256, false)
    }

    /// Smallest representable value.
    pub fn min_value(&self) -> BigInt {
        if self.signed {
            -BigInt::from(two_pow(u32::from(self.bits) - 1))
        } else {
            BigInt::default()
        }
    }

    /// Largest representable value.
    pub fn max_value(&self) -> BigInt {
        if self.signed {
            BigInt::from(two_pow(u32::from(self.bits) - 1)) - BigInt::one()
        } else {
            BigInt::from(two_pow(u32::from(self.bits))) - BigInt::one()
        }
    }
}

/// A compile-time number constant.
///
/// Equality and hashing consider only the value.
#[derive(Debug, Clone)]
pub struct RationalNumberType {
    /// Exact value.
    pub value: BigRational,
    /// `bytesN` the literal may implicitly convert to (even-digit hex literals).
    pub compatible_bytes: Option<u8>,
}

impl PartialEq for RationalNumberType {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for RationalNumberType {}

impl Hash for RationalNumberType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

/// Flavour of an array type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    /// `T[]` / `T[n]`.
    Ordinary,
    /// `bytes`, packed one byte per element.
    Bytes,
    /// `string`, like `bytes` without index access.
    String,
}

/// Array, `bytes` or `string` type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayType {
    /// Flavour.
    pub kind: ArrayKind,
    /// Element type (`bytes1` for byte arrays).
    pub base: Box<Type>,
    /// Static length, `None` when dynamically sized.
    pub length: Option<BigUint>,
    /// Data location.
    pub location: DataLocation,
    /// Whether this is a pointer rather than a direct storage reference.
    pub pointer: bool,
}

impl ArrayType {
    /// `bytes` or `string`.
    pub fn is_byte_array(&self) -> bool {
        matches!(self.kind, ArrayKind::Bytes | ArrayKind::String)
    }

    /// `string`.
    pub fn is_string(&self) -> bool {
        self.kind == ArrayKind::String
    }

    /// Dynamic length.
    pub fn is_dynamically_sized(&self) -> bool {
        self.length.is_none()
    }
}

/// `mapping(K => V)`; always in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingType {
    /// Key type.
    pub key: Box<Type>,
    /// Value type.
    pub value: Box<Type>,
}

/// A user-defined struct at a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructType {
    /// Declaration.
    pub id: StructId,
    /// Data location.
    pub location: DataLocation,
    /// Pointer rather than a direct storage reference.
    pub pointer: bool,
}

/// A contract, or `super` of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContractType {
    /// Declaration.
    pub id: ContractId,
    /// `super` lookups skip the most derived contract.
    pub is_super: bool,
}

/// Globally available magic objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MagicKind {
    /// `block`
    Block,
    /// `msg`
    Message,
    /// `tx`
    Transaction,
    /// `abi`
    Abi,
    /// `type(T)`
    MetaType(Box<Type>),
}

/// A semantic type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// `address` / `address payable`.
    Address {
        /// Whether value can be sent to it.
        payable: bool,
    },
    /// `intN` / `uintN`.
    Integer(IntegerType),
    /// Number literal.
    RationalNumber(Box<RationalNumberType>),
    /// String literal with its raw bytes.
    StringLiteral(Vec<u8>),
    /// `bool`.
    Bool,
    /// `bytesN` with `N` in `1..=32`.
    FixedBytes(u8),
    /// Arrays, `bytes` and `string`.
    Array(ArrayType),
    /// `mapping(K => V)`.
    Mapping(MappingType),
    /// User-defined struct.
    Struct(StructType),
    /// User-defined enum.
    Enum(EnumId),
    /// Contract instance.
    Contract(ContractType),
    /// Tuple; components are absent for wildcards in assignments.
    Tuple(Vec<Option<Type>>),
    /// Callable.
    Function(Box<FunctionType>),
    /// `block`, `msg`, `tx`, `abi`, `type(T)`.
    Magic(MagicKind),
    /// The type of a type name expression, e.g. `uint8` in `uint8(x)`.
    TypeType(Box<Type>),
}

impl Type {
    // ========================================================================
    // Constructors
    // ========================================================================

    /// `uintN`.
    pub fn uint(bits: u16) -> Type {
        Type::Integer(IntegerType::new(bits, false))
    }

    /// `intN`.
    pub fn int(bits: u16) -> Type {
        Type::Integer(IntegerType::new(bits, true))
    }

    /// `uint256`.
    pub fn uint256() -> Type {
        Type::uint(256)
    }

    /// Non-payable `address`.
    pub fn address() -> Type {
        Type::Address { payable: false }
    }

    /// `address payable`.
    pub fn address_payable() -> Type {
        Type::Address { payable: true }
    }

    /// `bytesN`.
    pub fn fixed_bytes(n: u8) -> Type {
        Type::FixedBytes(n)
    }

    /// Number literal type of `value`.
    pub fn rational(value: BigRational) -> Type {
        Type::RationalNumber(Box::new(RationalNumberType {
            value,
            compatible_bytes: None,
        }))
    }

    /// Number literal type of an integer.
    pub fn rational_int(value: impl Into<BigInt>) -> Type {
        Type::rational(BigRational::from_integer(value.into()))
    }

    /// String literal type.
    pub fn string_literal(bytes: impl Into<Vec<u8>>) -> Type {
        Type::StringLiteral(bytes.into())
    }

    /// Dynamic `bytes` at `location` (pointer unless storage).
    pub fn bytes(location: DataLocation) -> Type {
        Type::byte_array(ArrayKind::Bytes, location)
    }

    /// Dynamic `string` at `location` (pointer unless storage).
    pub fn string(location: DataLocation) -> Type {
        Type::byte_array(ArrayKind::String, location)
    }

    fn byte_array(kind: ArrayKind, location: DataLocation) -> Type {
        Type::Array(ArrayType {
            kind,
            base: Box::new(Type::FixedBytes(1)),
            length: None,
            location,
            pointer: location != DataLocation::Storage,
        })
    }

    /// `base[]` (dynamic) or `base[length]` at `location`.
    pub fn array(base: Type, length: Option<u64>, location: DataLocation) -> Type {
        let base = base.with_location_if_reference(location);
        Type::Array(ArrayType {
            kind: ArrayKind::Ordinary,
            base: Box::new(base),
            length: length.map(BigUint::from),
            location,
            pointer: location != DataLocation::Storage,
        })
    }

    /// `mapping(key => value)`.
    pub fn mapping(key: Type, value: Type) -> Type {
        Type::Mapping(MappingType {
            key: Box::new(key),
            value: Box::new(value.with_location_if_reference(DataLocation::Storage)),
        })
    }

    /// Struct type at `location` (pointer unless storage).
    pub fn struct_type(id: StructId, location: DataLocation) -> Type {
        Type::Struct(StructType {
            id,
            location,
            pointer: location != DataLocation::Storage,
        })
    }

    /// Contract type.
    pub fn contract(id: ContractId) -> Type {
        Type::Contract(ContractType { id, is_super: false })
    }

    /// Tuple of present components.
    pub fn tuple(components: Vec<Type>) -> Type {
        Type::Tuple(components.into_iter().map(Some).collect())
    }

    /// The empty tuple, the type of statements like `delete x`.
    pub fn empty_tuple() -> Type {
        Type::Tuple(Vec::new())
    }

    /// Wrap a function type.
    pub fn function(function: FunctionType) -> Type {
        Type::Function(Box::new(function))
    }

    // ========================================================================
    // Classification
    // ========================================================================

    /// Category tag.
    pub fn category(&self) -> Category {
        match self {
            Type::Address { .. } => Category::Address,
            Type::Integer(_) => Category::Integer,
            Type::RationalNumber(_) => Category::RationalNumber,
            Type::StringLiteral(_) => Category::StringLiteral,
            Type::Bool => Category::Bool,
            Type::FixedBytes(_) => Category::FixedBytes,
            Type::Array(_) => Category::Array,
            Type::Mapping(_) => Category::Mapping,
            Type::Struct(_) => Category::Struct,
            Type::Enum(_) => Category::Enum,
            Type::Contract(_) => Category::Contract,
            Type::Tuple(_) => Category::Tuple,
            Type::Function(_) => Category::Function,
            Type::Magic(_) => Category::Magic,
            Type::TypeType(_) => Category::TypeType,
        }
    }

    /// Whether values of this type are copied rather than referenced.
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            Type::Address { .. }
                | Type::Integer(_)
                | Type::RationalNumber(_)
                | Type::StringLiteral(_)
                | Type::Bool
                | Type::FixedBytes(_)
                | Type::Enum(_)
                | Type::Contract(_)
        ) || matches!(self, Type::Function(f) if f.kind == FunctionKind::Internal || f.kind == FunctionKind::External)
    }

    /// Arrays, mappings and structs.
    pub fn is_reference_type(&self) -> bool {
        matches!(self, Type::Array(_) | Type::Mapping(_) | Type::Struct(_))
    }

    /// Location of a reference type.
    pub fn data_location(&self) -> Option<DataLocation> {
        match self {
            Type::Array(array) => Some(array.location),
            Type::Struct(s) => Some(s.location),
            Type::Mapping(_) => Some(DataLocation::Storage),
            _ => None,
        }
    }

    /// Pointer flag of a reference type.
    pub fn is_pointer(&self) -> bool {
        match self {
            Type::Array(array) => array.pointer,
            Type::Struct(s) => s.pointer,
            _ => false,
        }
    }

    /// Storage-located reference type.
    pub fn is_in_storage(&self) -> bool {
        self.data_location() == Some(DataLocation::Storage)
    }

    /// The same reference type at another location. Value types are returned unchanged.
    pub fn with_location(&self, location: DataLocation, pointer: bool) -> Type {
        match self {
            Type::Array(array) => Type::Array(ArrayType {
                kind: array.kind,
                base: Box::new(array.base.with_location_if_reference(location)),
                length: array.length.clone(),
                location,
                pointer,
            }),
            Type::Struct(s) => Type::Struct(StructType {
                id: s.id,
                location,
                pointer,
            }),
            other => other.clone(),
        }
    }

    /// Nested reference types inherit the location as direct references.
    pub fn with_location_if_reference(&self, location: DataLocation) -> Type {
        match self {
            Type::Array(_) | Type::Struct(_) => self.with_location(location, false),
            other => other.clone(),
        }
    }

    /// Whether stack values of this type are left-aligned in the word.
    pub fn is_left_aligned(&self) -> bool {
        matches!(self, Type::FixedBytes(_))
            || matches!(self, Type::Function(f) if f.kind == FunctionKind::External)
    }

    /// Dynamically sized array, `bytes` or `string`.
    pub fn is_dynamically_sized(&self) -> bool {
        matches!(self, Type::Array(array) if array.is_dynamically_sized())
    }

    /// `bytes` or `string`.
    pub fn is_byte_array(&self) -> bool {
        matches!(self, Type::Array(array) if array.is_byte_array())
    }

    /// Signed integer.
    pub fn is_signed(&self) -> bool {
        matches!(self, Type::Integer(int) if int.signed)
    }

    /// Width in bits of value types that have a numeric representation.
    pub fn value_bits(&self, env: &TypeEnv) -> Option<u32> {
        match self {
            Type::Integer(int) => Some(u32::from(int.bits)),
            Type::Address { .. } | Type::Contract(_) => Some(160),
            Type::Bool => Some(8),
            Type::FixedBytes(n) => Some(u32::from(*n) * 8),
            Type::Enum(_) => Some(self.storage_bytes(env) * 8),
            _ => None,
        }
    }

    /// Whether the type may appear outside storage (not a mapping, not a
    /// struct containing one).
    pub fn can_live_outside_storage(&self, env: &TypeEnv) -> bool {
        match self {
            Type::Mapping(_) => false,
            Type::Array(array) => array.base.can_live_outside_storage(env),
            Type::Struct(s) => !env.struct_contains_mapping(s.id),
            _ => true,
        }
    }

    /// The components of a tuple, or the type itself as a singleton list.
    pub fn components(&self) -> Vec<Option<Type>> {
        match self {
            Type::Tuple(components) => components.clone(),
            other => vec![Some(other.clone())],
        }
    }

    /// Unwrap a function type.
    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Unwrap an array type.
    pub fn as_array(&self) -> Option<&ArrayType> {
        match self {
            Type::Array(array) => Some(array),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_bounds() {
        let int8 = IntegerType::new(8, true);
        assert_eq!(int8.min_value(), BigInt::from(-128));
        assert_eq!(int8.max_value(), BigInt::from(127));
        let uint16 = IntegerType::new(16, false);
        assert_eq!(uint16.max_value(), BigInt::from(65535));
    }

    #[test]
    fn rational_equality_ignores_bytes_hint() {
        let a = RationalNumberType {
            value: BigRational::from_integer(BigInt::from(1)),
            compatible_bytes: Some(1),
        };
        let b = RationalNumberType {
            value: BigRational::from_integer(BigInt::from(1)),
            compatible_bytes: None,
        };
        assert_eq!(a, b);
    }

    #[test]
    fn array_base_inherits_location() {
        let env = TypeEnv::new();
        let sid = StructId(0);
        let arr = Type::array(Type::struct_type(sid, DataLocation::Memory), None, DataLocation::Storage);
        let Type::Array(array) = &arr else { panic!() };
        assert_eq!(array.base.data_location(), Some(DataLocation::Storage));
        assert!(!array.base.is_pointer());
        assert!(arr.is_dynamically_sized());
        assert!(Type::uint256().can_live_outside_storage(&env));
    }

    #[test]
    fn with_location_switches() {
        let bytes = Type::bytes(DataLocation::Storage);
        let memory = bytes.with_location(DataLocation::Memory, true);
        assert_eq!(memory, Type::bytes(DataLocation::Memory));
        assert!(memory.is_byte_array());
    }

    #[test]
    fn value_type_classification() {
        assert!(Type::Bool.is_value_type());
        assert!(!Type::bytes(DataLocation::Memory).is_value_type());
        assert!(Type::FixedBytes(4).is_left_aligned());
        assert!(!Type::uint256().is_left_aligned());
    }
}
