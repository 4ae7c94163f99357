//! Host-side ABI codec.
//!
//! Builds calldata for [`Vm::call`](crate::Vm::call) and decodes returned
//! data for assertions. Values are encoded as a tuple: static values in
//! place, dynamic values as an offset in the head and a length-prefixed,
//! 32-byte padded tail.

use std::fmt;

use num_bigint::{BigInt, BigUint};
use num_traits::{One, ToPrimitive, Zero};
use quill_core::num::{from_word_signed, padded_len, to_word, two_pow, word_from_bytes, word_to_bytes};
use quill_core::selector;

use crate::error::VmError;
use crate::state::Address;

/// Shape of an ABI value, as written in canonical signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiType {
    Uint(u16),
    Int(u16),
    Address,
    Bool,
    FixedBytes(u8),
    Bytes,
    String,
    Array(Box<AbiType>),
    FixedArray(Box<AbiType>, usize),
    Tuple(Vec<AbiType>),
}

/// A decoded or to-be-encoded ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Uint(BigUint),
    Int(BigInt),
    Address(Address),
    Bool(bool),
    /// `bytesN`; at most 32 bytes, left-aligned when encoded.
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<AbiValue>),
    FixedArray(Vec<AbiValue>),
    Tuple(Vec<AbiValue>),
}

impl AbiType {
    /// Parse a canonical type such as `uint256`, `bytes32[]` or
    /// `(bool,string)[2]`.
    pub fn parse(text: &str) -> Result<Self, VmError> {
        let mut parser = TypeParser { text, pos: 0 };
        let ty = parser.parse_type()?;
        if parser.pos != text.len() {
            return Err(VmError::AbiType(text.to_string()));
        }
        Ok(ty)
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            AbiType::Bytes | AbiType::String | AbiType::Array(_) => true,
            AbiType::FixedArray(element, _) => element.is_dynamic(),
            AbiType::Tuple(members) => members.iter().any(AbiType::is_dynamic),
            _ => false,
        }
    }

    /// Bytes taken in the head of an enclosing tuple.
    pub fn head_size(&self) -> usize {
        match self {
            _ if self.is_dynamic() => 32,
            AbiType::FixedArray(element, len) => element.head_size() * len,
            AbiType::Tuple(members) => members.iter().map(AbiType::head_size).sum(),
            _ => 32,
        }
    }
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiType::Uint(bits) => write!(f, "uint{bits}"),
            AbiType::Int(bits) => write!(f, "int{bits}"),
            AbiType::Address => write!(f, "address"),
            AbiType::Bool => write!(f, "bool"),
            AbiType::FixedBytes(len) => write!(f, "bytes{len}"),
            AbiType::Bytes => write!(f, "bytes"),
            AbiType::String => write!(f, "string"),
            AbiType::Array(element) => write!(f, "{element}[]"),
            AbiType::FixedArray(element, len) => write!(f, "{element}[{len}]"),
            AbiType::Tuple(members) => {
                write!(f, "(")?;
                for (index, member) in members.iter().enumerate() {
                    if index > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, ")")
            }
        }
    }
}

struct TypeParser<'a> {
    text: &'a str,
    pos: usize,
}

impl TypeParser<'_> {
    fn error(&self) -> VmError {
        VmError::AbiType(self.text.to_string())
    }

    fn parse_type(&mut self) -> Result<AbiType, VmError> {
        let mut ty = if self.text[self.pos..].starts_with('(') {
            self.pos += 1;
            let mut members = Vec::new();
            if self.text[self.pos..].starts_with(')') {
                self.pos += 1;
            } else {
                loop {
                    members.push(self.parse_type()?);
                    match self.text[self.pos..].chars().next() {
                        Some(',') => self.pos += 1,
                        Some(')') => {
                            self.pos += 1;
                            break;
                        }
                        _ => return Err(self.error()),
                    }
                }
            }
            AbiType::Tuple(members)
        } else {
            let rest = &self.text[self.pos..];
            let len = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            let name = &rest[..len];
            self.pos += len;
            elementary(name).ok_or_else(|| self.error())?
        };
        while self.text[self.pos..].starts_with('[') {
            let close = self.text[self.pos..].find(']').ok_or_else(|| self.error())?;
            let inner = &self.text[self.pos + 1..self.pos + close];
            ty = if inner.is_empty() {
                AbiType::Array(Box::new(ty))
            } else {
                let len = inner.parse().map_err(|_| self.error())?;
                AbiType::FixedArray(Box::new(ty), len)
            };
            self.pos += close + 1;
        }
        Ok(ty)
    }
}

fn elementary(name: &str) -> Option<AbiType> {
    let sized = |prefix: &str| -> Option<Option<u16>> {
        let digits = name.strip_prefix(prefix)?;
        if digits.is_empty() {
            Some(None)
        } else {
            digits.parse().ok().map(Some)
        }
    };
    match name {
        "address" => return Some(AbiType::Address),
        "bool" => return Some(AbiType::Bool),
        "string" => return Some(AbiType::String),
        "bytes" => return Some(AbiType::Bytes),
        _ => {}
    }
    let integer = |bits: Option<u16>| bits.unwrap_or(256);
    let valid_bits = |bits: u16| bits > 0 && bits <= 256 && bits % 8 == 0;
    if let Some(bits) = sized("uint") {
        let bits = integer(bits);
        return valid_bits(bits).then_some(AbiType::Uint(bits));
    }
    if let Some(bits) = sized("int") {
        let bits = integer(bits);
        return valid_bits(bits).then_some(AbiType::Int(bits));
    }
    if let Some(Some(len)) = sized("bytes") {
        return (1..=32).contains(&len).then_some(AbiType::FixedBytes(len as u8));
    }
    None
}

// ============================================================================
// Encoding
// ============================================================================

impl AbiValue {
    pub fn uint(value: impl Into<BigUint>) -> Self {
        AbiValue::Uint(value.into())
    }

    pub fn int(value: impl Into<BigInt>) -> Self {
        AbiValue::Int(value.into())
    }

    pub fn string(value: impl Into<String>) -> Self {
        AbiValue::String(value.into())
    }

    pub fn as_uint(&self) -> Option<&BigUint> {
        match self {
            AbiValue::Uint(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            AbiValue::Int(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AbiValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            AbiValue::Address(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            AbiValue::Bytes(value) | AbiValue::FixedBytes(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AbiValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            AbiValue::Bytes(_) | AbiValue::String(_) | AbiValue::Array(_) => true,
            AbiValue::FixedArray(values) | AbiValue::Tuple(values) => values.iter().any(AbiValue::is_dynamic),
            _ => false,
        }
    }

    /// Encode `values` as a tuple.
    pub fn encode(values: &[AbiValue]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_tuple(values, &mut out);
        out
    }

    /// Selector of `signature` followed by the encoded `args`.
    pub fn calldata(signature: &str, args: &[AbiValue]) -> Vec<u8> {
        let mut out = selector(signature).to_vec();
        encode_tuple(args, &mut out);
        out
    }

    /// Decode a tuple of `types` from `data`.
    pub fn decode(types: &[AbiType], data: &[u8]) -> Result<Vec<AbiValue>, VmError> {
        decode_tuple(types, data, 0)
    }

    /// Decode a tuple described by canonical type strings.
    pub fn decode_str(types: &[&str], data: &[u8]) -> Result<Vec<AbiValue>, VmError> {
        let types = types.iter().map(|ty| AbiType::parse(ty)).collect::<Result<Vec<_>, _>>()?;
        Self::decode(&types, data)
    }
}

fn head_size(value: &AbiValue) -> usize {
    match value {
        _ if value.is_dynamic() => 32,
        AbiValue::FixedArray(values) | AbiValue::Tuple(values) => values.iter().map(head_size).sum(),
        _ => 32,
    }
}

fn encode_tuple(values: &[AbiValue], out: &mut Vec<u8>) {
    let start = out.len();
    let heads: usize = values.iter().map(head_size).sum();
    let mut tail = Vec::new();
    for value in values {
        if value.is_dynamic() {
            out.extend_from_slice(&word_to_bytes(&BigUint::from(heads + tail.len())));
            encode_value(value, &mut tail);
        } else {
            encode_value(value, out);
        }
    }
    debug_assert_eq!(out.len() - start, heads);
    out.extend(tail);
}

fn encode_value(value: &AbiValue, out: &mut Vec<u8>) {
    match value {
        AbiValue::Uint(value) => out.extend_from_slice(&word_to_bytes(value)),
        AbiValue::Int(value) => out.extend_from_slice(&word_to_bytes(&to_word(value))),
        AbiValue::Address(address) => out.extend_from_slice(&word_to_bytes(&address.to_word())),
        AbiValue::Bool(value) => out.extend_from_slice(&word_to_bytes(&BigUint::from(u8::from(*value)))),
        AbiValue::FixedBytes(bytes) => {
            let mut word = [0u8; 32];
            let take = bytes.len().min(32);
            word[..take].copy_from_slice(&bytes[..take]);
            out.extend_from_slice(&word);
        }
        AbiValue::Bytes(bytes) => encode_bytes(bytes, out),
        AbiValue::String(text) => encode_bytes(text.as_bytes(), out),
        AbiValue::Array(values) => {
            out.extend_from_slice(&word_to_bytes(&BigUint::from(values.len())));
            encode_tuple(values, out);
        }
        AbiValue::FixedArray(values) | AbiValue::Tuple(values) => encode_tuple(values, out),
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&word_to_bytes(&BigUint::from(bytes.len())));
    out.extend_from_slice(bytes);
    out.resize(out.len() + padded_len(bytes.len()) - bytes.len(), 0);
}

// ============================================================================
// Decoding
// ============================================================================

fn error(message: impl Into<String>) -> VmError {
    VmError::AbiDecode(message.into())
}

fn word_at(data: &[u8], offset: usize) -> Result<BigUint, VmError> {
    data.get(offset..offset + 32)
        .map(word_from_bytes)
        .ok_or_else(|| error(format!("word at {offset} is past the end of {} bytes", data.len())))
}

fn usize_at(data: &[u8], offset: usize) -> Result<usize, VmError> {
    let word = word_at(data, offset)?;
    word.to_usize()
        .filter(|value| *value <= data.len())
        .ok_or_else(|| error(format!("offset or length {word} at {offset} is out of range")))
}

fn decode_tuple(types: &[AbiType], data: &[u8], base: usize) -> Result<Vec<AbiValue>, VmError> {
    let mut values = Vec::with_capacity(types.len());
    let mut head = base;
    for ty in types {
        let value = if ty.is_dynamic() {
            let offset = usize_at(data, head)?;
            decode_value(ty, data, base + offset)?
        } else {
            decode_value(ty, data, head)?
        };
        values.push(value);
        head += ty.head_size();
    }
    Ok(values)
}

fn decode_value(ty: &AbiType, data: &[u8], at: usize) -> Result<AbiValue, VmError> {
    match ty {
        AbiType::Uint(bits) => {
            let word = word_at(data, at)?;
            if word >= two_pow(u32::from(*bits)) {
                return Err(error(format!("{word} does not fit {ty}")));
            }
            Ok(AbiValue::Uint(word))
        }
        AbiType::Int(bits) => {
            let value = from_word_signed(&word_at(data, at)?);
            let limit = BigInt::from(two_pow(u32::from(*bits) - 1));
            if value >= limit || value < -limit {
                return Err(error(format!("{value} does not fit {ty}")));
            }
            Ok(AbiValue::Int(value))
        }
        AbiType::Address => {
            let word = word_at(data, at)?;
            if word >= two_pow(160) {
                return Err(error(format!("{word} is not an address")));
            }
            Ok(AbiValue::Address(Address::from_word(&word)))
        }
        AbiType::Bool => {
            let word = word_at(data, at)?;
            if word > BigUint::one() {
                return Err(error(format!("{word} is not a bool")));
            }
            Ok(AbiValue::Bool(!word.is_zero()))
        }
        AbiType::FixedBytes(len) => {
            let bytes = word_to_bytes(&word_at(data, at)?);
            let len = usize::from(*len);
            if bytes[len..].iter().any(|byte| *byte != 0) {
                return Err(error(format!("dirty padding in {ty}")));
            }
            Ok(AbiValue::FixedBytes(bytes[..len].to_vec()))
        }
        AbiType::Bytes | AbiType::String => {
            let len = usize_at(data, at)?;
            let bytes = data
                .get(at + 32..at + 32 + len)
                .ok_or_else(|| error(format!("{len} bytes at {} are past the end", at + 32)))?
                .to_vec();
            if *ty == AbiType::Bytes {
                Ok(AbiValue::Bytes(bytes))
            } else {
                String::from_utf8(bytes)
                    .map(AbiValue::String)
                    .map_err(|_| error("string is not utf-8"))
            }
        }
        AbiType::Array(element) => {
            let len = usize_at(data, at)?;
            let types = vec![(**element).clone(); len];
            decode_tuple(&types, data, at + 32).map(AbiValue::Array)
        }
        AbiType::FixedArray(element, len) => {
            let types = vec![(**element).clone(); *len];
            decode_tuple(&types, data, at).map(AbiValue::FixedArray)
        }
        AbiType::Tuple(members) => decode_tuple(members, data, at).map(AbiValue::Tuple),
    }
}

/// Revert data of `Error(string)` as its message.
pub fn revert_reason(data: &[u8]) -> Option<String> {
    let (prefix, rest) = data.split_at_checked(4)?;
    if prefix != selector("Error(string)") {
        return None;
    }
    match AbiValue::decode(&[AbiType::String], rest).ok()?.pop()? {
        AbiValue::String(reason) => Some(reason),
        _ => None,
    }
}

/// Code of a `Panic(uint256)` revert.
pub fn panic_code(data: &[u8]) -> Option<u64> {
    let (prefix, rest) = data.split_at_checked(4)?;
    if prefix != selector("Panic(uint256)") {
        return None;
    }
    AbiValue::decode(&[AbiType::Uint(256)], rest)
        .ok()?
        .pop()?
        .as_uint()?
        .to_u64()
}
