//! 256-bit word helpers over arbitrary-precision integers.
//!
//! Machine words are represented as [`BigUint`] values in `0..2^256`; signed
//! quantities use two's complement inside that range.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};

/// Width of a machine word in bits.
pub const WORD_BITS: u32 = 256;

/// `2^bits`.
pub fn two_pow(bits: u32) -> BigUint {
    BigUint::one() << bits
}

/// `2^bits - 1`.
pub fn low_mask(bits: u32) -> BigUint {
    two_pow(bits) - BigUint::one()
}

/// The largest unsigned word, `2^256 - 1`.
pub fn u256_max() -> BigUint {
    low_mask(WORD_BITS)
}

/// Number of bytes needed to represent `value` (zero needs zero bytes).
pub fn bytes_required(value: &BigUint) -> u32 {
    value.bits().div_ceil(8) as u32
}

/// Position of the most significant set bit plus one (zero for zero).
pub fn bit_length(value: &BigInt) -> u64 {
    value.magnitude().bits()
}

/// Reduce a signed integer into the word range using two's complement.
pub fn to_word(value: &BigInt) -> BigUint {
    let modulus = BigInt::from(two_pow(WORD_BITS));
    let mut reduced = value % &modulus;
    if reduced.sign() == Sign::Minus {
        reduced += &modulus;
    }
    reduced.to_biguint().unwrap_or_default()
}

/// Interpret a word as a two's complement signed integer.
pub fn from_word_signed(word: &BigUint) -> BigInt {
    if word.bit(u64::from(WORD_BITS) - 1) {
        BigInt::from(word.clone()) - BigInt::from(two_pow(WORD_BITS))
    } else {
        BigInt::from(word.clone())
    }
}

/// Interpret the low `bits` of a word as a two's complement signed integer.
pub fn from_bits_signed(word: &BigUint, bits: u32) -> BigInt {
    let value = word & low_mask(bits);
    if bits > 0 && value.bit(u64::from(bits) - 1) {
        BigInt::from(value) - BigInt::from(two_pow(bits))
    } else {
        BigInt::from(value)
    }
}

/// Big-endian 32-byte rendering of a word.
pub fn word_to_bytes(word: &BigUint) -> [u8; 32] {
    let mut out = [0u8; 32];
    let bytes = word.to_bytes_be();
    if word.is_zero() {
        return out;
    }
    let take = bytes.len().min(32);
    out[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    out
}

/// Word from up to 32 big-endian bytes (right-aligned).
pub fn word_from_bytes(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Word holding `bytes` left-aligned, zero padded on the right.
pub fn left_aligned(bytes: &[u8]) -> BigUint {
    let mut out = [0u8; 32];
    let take = bytes.len().min(32);
    out[..take].copy_from_slice(&bytes[..take]);
    BigUint::from_bytes_be(&out)
}

/// Round `len` up to the next multiple of 32.
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(32) * 32
}

/// Word as a `u64` if it fits.
pub fn to_u64(word: &BigUint) -> Option<u64> {
    let digits = word.to_u64_digits();
    match digits.len() {
        0 => Some(0),
        1 => Some(digits[0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_required_boundaries() {
        assert_eq!(bytes_required(&BigUint::zero()), 0);
        assert_eq!(bytes_required(&BigUint::from(255u32)), 1);
        assert_eq!(bytes_required(&BigUint::from(256u32)), 2);
        assert_eq!(bytes_required(&u256_max()), 32);
    }

    #[test]
    fn twos_complement_round_trip() {
        let minus_one = BigInt::from(-1);
        let word = to_word(&minus_one);
        assert_eq!(word, u256_max());
        assert_eq!(from_word_signed(&word), minus_one);
        assert_eq!(from_bits_signed(&BigUint::from(0x80u32), 8), BigInt::from(-128));
    }

    #[test]
    fn word_bytes() {
        let word = BigUint::from(0x1234u32);
        let bytes = word_to_bytes(&word);
        assert_eq!(&bytes[30..], &[0x12, 0x34]);
        assert_eq!(word_from_bytes(&bytes), word);
        assert_eq!(left_aligned(b"hi").to_bytes_be()[..2], *b"hi");
    }

    #[test]
    fn padding() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 32);
        assert_eq!(padded_len(32), 32);
        assert_eq!(padded_len(33), 64);
    }
}
