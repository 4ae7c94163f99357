//! Hashing: deterministic type identity and the machine's keccak-256.
//!
//! [`TypeHash`] is a 64-bit XXHash of a canonical identifier, mixed with a
//! domain constant so that type identifiers and helper names never collide.
//! It keys the layout cache side-table and helper-name interning.
//!
//! [`keccak256`] is the hash the target machine uses for selectors, event
//! topics, mapping slots and dynamic array data areas.
//!
//! # Examples
//!
//! ```
//! use quill_core::{TypeHash, selector};
//!
//! assert_eq!(TypeHash::from_identifier("t_uint256"), TypeHash::from_identifier("t_uint256"));
//! assert_ne!(TypeHash::from_identifier("t_uint256"), TypeHash::from_helper("t_uint256"));
//! assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
//! ```

use std::fmt;

use num_bigint::BigUint;
use tiny_keccak::{Hasher, Keccak};
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Domain marker for type identifiers.
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for runtime helper names.
    pub const HELPER: u64 = 0x5ea77ffbcdf5f302;

    /// Domain marker for member list cache keys.
    pub const MEMBERS: u64 = 0x7d3c8b4a92e15f6d;
}

/// A deterministic 64-bit hash of a canonical identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Hash of a type's canonical identifier (`t_uint256`, `t_struct$_S_$0_storage`, ...).
    #[inline]
    pub fn from_identifier(identifier: &str) -> Self {
        TypeHash(xxh64(identifier.as_bytes(), hash_constants::TYPE))
    }

    /// Hash of a runtime helper name.
    #[inline]
    pub fn from_helper(name: &str) -> Self {
        TypeHash(xxh64(name.as_bytes(), hash_constants::HELPER))
    }

    /// Combine a type hash with a lookup scope for member list caching.
    #[inline]
    pub fn with_scope(self, scope: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.0.to_le_bytes());
        bytes[8..].copy_from_slice(&scope.to_le_bytes());
        TypeHash(xxh64(&bytes, hash_constants::MEMBERS))
    }

    /// Whether this is the empty hash.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// Keccak-256 of `data` as a big-endian machine word.
pub fn keccak_word(data: &[u8]) -> BigUint {
    BigUint::from_bytes_be(&keccak256(data))
}

/// Four-byte function selector of a canonical signature such as `f(uint256,bool)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Selector as an integer, right-aligned.
pub fn selector_value(signature: &str) -> u32 {
    u32::from_be_bytes(selector(signature))
}

/// Lower-case hex rendering used inside identifiers.
pub fn to_hex(bytes: &[u8]) -> String {
    use fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
