//! Property tests.

use num_bigint::BigUint;
use proptest::prelude::*;
use quill::quill_core::StorageOffsets;
use quill::AbiValue;

/// A member as `(storage bytes, slots)`: either a packable value type or a
/// multi-slot aggregate.
fn member() -> impl Strategy<Value = (u32, u64)> {
    prop_oneof![
        (1u32..=32).prop_map(|bytes| (bytes, 1)),
        (1u64..=4).prop_map(|slots| (32, slots)),
    ]
}

proptest! {
    #[test]
    fn storage_offsets_never_overlap(members in prop::collection::vec(member(), 0..24)) {
        let layout = StorageOffsets::compute(
            members.iter().map(|(bytes, slots)| (*bytes, BigUint::from(*slots))),
        )
        .unwrap();
        prop_assert_eq!(layout.len(), members.len());

        let mut ranges: Vec<(u64, u64)> = layout
            .iter()
            .zip(&members)
            .map(|((slot, offset), (bytes, slots))| {
                let start = u64::try_from(slot).unwrap() * 32 + u64::from(offset);
                let len = if *slots == 1 { u64::from(*bytes) } else { slots * 32 };
                (start, start + len)
            })
            .collect();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
        for (start, end) in &ranges {
            // Packed members stay inside one slot; aggregates start a fresh one.
            let len = end - start;
            let placed = if len <= 32 { start % 32 + len <= 32 } else { start % 32 == 0 };
            prop_assert!(placed, "member at {} with {} bytes crosses a slot", start, len);
        }
        let size = u64::try_from(layout.storage_size()).unwrap();
        // A partly used last slot counts as one whole slot.
        let end = ranges.iter().map(|(_, end)| *end).max().unwrap_or(0);
        prop_assert_eq!(size, end.div_ceil(32));
    }

    #[test]
    fn abi_values_survive_encoding(
        flag in any::<bool>(),
        number in any::<u128>(),
        bytes in prop::collection::vec(any::<u8>(), 0..80),
        text in "[a-z ]{0,40}",
    ) {
        let values = vec![
            AbiValue::Bool(flag),
            AbiValue::uint(number),
            AbiValue::Bytes(bytes),
            AbiValue::string(text),
        ];
        let encoded = AbiValue::encode(&values);
        prop_assert_eq!(encoded.len() % 32, 0);
        let decoded = AbiValue::decode_str(&["bool", "uint256", "bytes", "string"], &encoded).unwrap();
        prop_assert_eq!(decoded, values);
    }
}
