//! Saved values load back unchanged, and saving them again writes nothing.

use bottledb_core::{Entity, Value};
use bottledb_testkit::prelude::*;
use proptest::prelude::*;

fn sample(fields: &[(&'static str, Value)]) -> Entity {
    fields
        .iter()
        .fold(Entity::new(SAMPLE), |entity, (name, value)| entity.with(name, value.clone()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn values_survive_save_and_load(fields in sample_fields_strategy()) {
        let store = TestStore::memory(scalar_schema());
        let entity = sample(&fields);
        let report = store.save(&entity).unwrap();

        let loaded = store.load(&report.root).unwrap();
        prop_assert_eq!(loaded.fields(), entity.fields());
        prop_assert_eq!(loaded.id(), entity.id());
    }

    #[test]
    fn saving_an_unchanged_entity_writes_nothing(fields in sample_fields_strategy()) {
        let store = TestStore::memory(scalar_schema());
        let entity = sample(&fields);
        let report = store.save(&entity).unwrap();
        let text = store.record_text(&report.root).unwrap();

        let again = store.save(&entity).unwrap();
        prop_assert!(again.is_noop());
        prop_assert_eq!(store.record_text(&report.root).unwrap(), text);

        // A loaded copy is the same graph too.
        let loaded = store.load(&report.root).unwrap();
        prop_assert!(store.save(&loaded).unwrap().is_noop());
    }
}

#[test]
fn values_survive_a_file_backed_store() {
    let mut test_store = TestStore::file(scalar_schema());
    let entity = Entity::new(SAMPLE)
        .with("label", "braces {and} back\\slashes: ~deleted")
        .with("count", -42i64)
        .with("ratio", 0.1)
        .with("initial", '}')
        .with("raw", vec![0u8, 255, 16])
        .with("tags", vec![Value::from("a"), Value::List(vec![Value::from(1i64)])]);
    let report = test_store.save(&entity).unwrap();

    let store = test_store.reopen();
    let loaded = store.load(&report.root).unwrap();
    assert_eq!(loaded.fields(), entity.fields());
}

#[test]
fn shop_graph_survives_reopen() {
    let (mut test_store, buyer, orders) = scenarios::populated_shop(2);
    let refs: Vec<_> = orders
        .iter()
        .map(|o| test_store.reference_of(o).unwrap())
        .collect();

    let store = test_store.reopen();
    assert!(store.recovery().is_clean());
    for reference in &refs {
        let loaded = store.load(reference).unwrap();
        let customer = loaded.get("customer").unwrap();
        assert_eq!(customer.as_entity().unwrap().id(), buyer.id());
        assert_eq!(loaded.get("items").unwrap().as_list().unwrap().len(), 2);
    }
    assert!(store.verify().unwrap().is_consistent());
}
