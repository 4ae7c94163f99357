//! Storage layout engine.
//!
//! Packs an ordered list of member types into 32-byte slots. Small value
//! types share a slot while they fit; anything occupying more than one slot
//! (structs, static arrays, mappings) starts a fresh slot and the member after
//! it starts fresh as well. A partially used trailing slot counts as a whole
//! slot.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::env::TypeEnv;
use crate::error::LayoutError;
use crate::num::two_pow;
use crate::types::Type;

/// Bytes in one storage slot.
pub const SLOT_BYTES: u32 = 32;

/// Member index to `(slot, byte offset)` mapping for a type sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageOffsets {
    offsets: Vec<(BigUint, u8)>,
    storage_size: BigUint,
}

impl StorageOffsets {
    /// Lay out members given as `(storage bytes, storage size in slots)` pairs.
    ///
    /// # Errors
    ///
    /// [`LayoutError::ObjectTooLarge`] when the members need `2^256` slots or more.
    pub fn compute<I>(members: I) -> Result<Self, LayoutError>
    where
        I: IntoIterator<Item = (u32, BigUint)>,
    {
        let limit = two_pow(256);
        let mut slot = BigUint::zero();
        let mut byte_offset: u32 = 0;
        let mut offsets = Vec::new();

        for (bytes, size) in members {
            if byte_offset + bytes > SLOT_BYTES {
                slot += BigUint::one();
                byte_offset = 0;
            }
            if slot >= limit {
                return Err(LayoutError::ObjectTooLarge);
            }
            offsets.push((slot.clone(), byte_offset as u8));
            if size.is_one() && byte_offset + bytes <= SLOT_BYTES {
                byte_offset += bytes;
            } else {
                slot += size;
                byte_offset = 0;
            }
        }
        if byte_offset > 0 {
            slot += BigUint::one();
        }
        if slot >= limit {
            return Err(LayoutError::ObjectTooLarge);
        }
        Ok(Self {
            offsets,
            storage_size: slot,
        })
    }

    /// Lay out a sequence of types.
    pub fn for_types<'t, I>(env: &TypeEnv, types: I) -> Result<Self, LayoutError>
    where
        I: IntoIterator<Item = &'t Type>,
    {
        let sizes = types
            .into_iter()
            .map(|ty| Ok((ty.storage_bytes(env), ty.storage_size(env)?)))
            .collect::<Result<Vec<_>, LayoutError>>()?;
        Self::compute(sizes)
    }

    /// Position of member `index`.
    pub fn offset(&self, index: usize) -> Option<(&BigUint, u8)> {
        self.offsets.get(index).map(|(slot, offset)| (slot, *offset))
    }

    /// Total number of slots used.
    pub fn storage_size(&self) -> &BigUint {
        &self.storage_size
    }

    /// Number of members laid out.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether there are no members.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Iterate `(slot, byte offset)` in member order.
    pub fn iter(&self) -> impl Iterator<Item = (&BigUint, u8)> {
        self.offsets.iter().map(|(slot, offset)| (slot, *offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn word(bytes: u32) -> (u32, BigUint) {
        (bytes, BigUint::one())
    }

    #[test]
    fn packs_small_members() {
        // uint8, bool, uint8, uint256
        let layout = StorageOffsets::compute([word(1), word(1), word(1), word(32)]).unwrap();
        let got: Vec<_> = layout.iter().map(|(s, o)| (s.clone(), o)).collect();
        assert_eq!(
            got,
            vec![
                (BigUint::from(0u32), 0),
                (BigUint::from(0u32), 1),
                (BigUint::from(0u32), 2),
                (BigUint::from(1u32), 0),
            ]
        );
        assert_eq!(layout.storage_size(), &BigUint::from(2u32));
    }

    #[test]
    fn multi_slot_member_starts_and_ends_fresh() {
        // uint8, struct of 3 slots, uint8
        let layout =
            StorageOffsets::compute([word(1), (32, BigUint::from(3u32)), word(1)]).unwrap();
        assert_eq!(layout.offset(1), Some((&BigUint::from(1u32), 0)));
        assert_eq!(layout.offset(2), Some((&BigUint::from(4u32), 0)));
        assert_eq!(layout.storage_size(), &BigUint::from(5u32));
    }

    #[test]
    fn empty_layout() {
        let layout = StorageOffsets::compute(std::iter::empty()).unwrap();
        assert!(layout.is_empty());
        assert!(layout.storage_size().is_zero());
    }

    #[test]
    fn overflow_is_an_error() {
        let huge = (32, two_pow(256) - BigUint::one());
        assert_eq!(
            StorageOffsets::compute([word(32), huge]),
            Err(LayoutError::ObjectTooLarge)
        );
    }

    proptest! {
        #[test]
        fn members_never_overlap(sizes in prop::collection::vec((1u32..=32, 1u32..4), 0..24)) {
            let members: Vec<(u32, BigUint)> = sizes
                .iter()
                .map(|&(bytes, slots)| if slots > 1 { (32, BigUint::from(slots)) } else { (bytes, BigUint::one()) })
                .collect();
            let layout = StorageOffsets::compute(members.clone()).unwrap();

            // Byte ranges [slot*32 + offset, ...) of each member.
            let mut ranges = Vec::new();
            for (i, (slot, offset)) in layout.iter().enumerate() {
                let (bytes, slots) = &members[i];
                let start = slot * 32u32 + u32::from(offset);
                let len = if slots.is_one() { BigUint::from(*bytes) } else { slots * 32u32 };
                prop_assert!(u32::from(offset) + bytes <= 32);
                ranges.push((start.clone(), start + len));
            }
            for window in ranges.windows(2) {
                prop_assert!(window[0].1 <= window[1].0);
            }

            // The total rounds a dangling partial slot up to a whole slot.
            if let Some((_, end)) = ranges.last() {
                let expected = (end + 31u32) / 32u32;
                prop_assert_eq!(layout.storage_size(), &expected);
            }
        }
    }
}
