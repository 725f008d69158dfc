//! Property tests for the capsule grammar.

use bottledb_codec::{parse, Capsule, RefEntry, StoredRecord};
use proptest::prelude::*;

fn arb_head() -> impl Strategy<Value = String> {
    "[a-z0-9_.]{1,8}"
}

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-zA-Z0-9 :~]{0,12}",
        "[{}\\\\:a-z]{0,12}",
        any::<String>(),
    ]
}

fn arb_capsule() -> impl Strategy<Value = Capsule> {
    let leaf = (arb_head(), arb_text()).prop_map(|(h, t)| Capsule::text(h, t));
    leaf.prop_recursive(6, 64, 5, |inner| {
        (arb_head(), prop::collection::vec(inner, 0..5))
            .prop_map(|(h, nodes)| Capsule::nodes(h, nodes))
    })
}

proptest! {
    #[test]
    fn written_capsules_parse_back(capsule in arb_capsule()) {
        let text = capsule.to_text();
        prop_assert_eq!(parse(&text).unwrap(), capsule);
    }

    #[test]
    fn written_records_parse_back(
        capsule in arb_capsule(),
        refs in prop::collection::btree_set((0u32..50, "[0-9a-f]{32}"), 0..6),
        deleted in any::<bool>(),
    ) {
        let mut record = StoredRecord::new(capsule);
        record.references = refs.into_iter().map(|(t, id)| RefEntry::new(t, id)).collect();
        record.deleted = deleted;

        let text = record.to_text();
        prop_assert_eq!(StoredRecord::parse(&text).unwrap(), record);
    }

    #[test]
    fn parser_never_panics(input in any::<String>()) {
        let _ = parse(&input);
        let _ = StoredRecord::parse(&input);
    }
}
