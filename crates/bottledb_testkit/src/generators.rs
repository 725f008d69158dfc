//! Property-based test generators using proptest.
//!
//! Provides strategies for values that survive a save and load unchanged,
//! and for sequences of shop operations.

use bottledb_core::{EntityId, FieldDescriptor, FieldType, Schema, TypeDescriptor, Value};
use chrono::{DateTime, Utc};
use proptest::prelude::*;

/// Type name of the entity used by [`scalar_schema`].
pub const SAMPLE: &str = "prop.Sample";

/// One entity type with a field of every scalar kind plus a list.
pub fn scalar_schema() -> Schema {
    Schema::from_types([TypeDescriptor::entity(SAMPLE)
        .field(FieldDescriptor::new("flag", FieldType::Bool))
        .field(FieldDescriptor::new("count", FieldType::Int))
        .field(FieldDescriptor::new("ratio", FieldType::Float))
        .field(FieldDescriptor::new("initial", FieldType::Char))
        .field(FieldDescriptor::new("label", FieldType::Str))
        .field(FieldDescriptor::new("at", FieldType::Date))
        .field(FieldDescriptor::new("raw", FieldType::Bytes))
        .field(FieldDescriptor::new("tags", FieldType::List))])
    .expect("sample schema is consistent")
}

/// Strategy for entity identities.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop::array::uniform16(any::<u8>()).prop_map(EntityId::from_bytes)
}

/// Strategy for strings, including the capsule metacharacters.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-zA-Z0-9 ]{1,16}",
        "[{}:~\\\\a-z]{1,16}",
        "\\PC{0,24}",
    ]
}

/// Strategy for finite floats.
pub fn float_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        -1.0e12..1.0e12f64,
        prop::num::f64::NORMAL,
    ]
}

/// Strategy for UTC instants between 1970 and 2100 at nanosecond precision.
pub fn date_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    })
}

/// Strategy for a scalar value of any kind.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        float_strategy().prop_map(Value::Float),
        any::<char>().prop_map(Value::Char),
        text_strategy().prop_map(Value::Str),
        date_strategy().prop_map(Value::Date),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
    ]
}

/// Strategy for nested lists of scalars.
pub fn list_strategy() -> impl Strategy<Value = Value> {
    let leaf = scalar_strategy();
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Value::List)
    })
    .prop_map(|value| match value {
        Value::List(_) => value,
        scalar => Value::List(vec![scalar]),
    })
}

/// Field values for one [`SAMPLE`] entity. Each field may be absent.
pub fn sample_fields_strategy() -> impl Strategy<Value = Vec<(&'static str, Value)>> {
    (
        prop::option::of(any::<bool>().prop_map(Value::Bool)),
        prop::option::of(any::<i64>().prop_map(Value::Int)),
        prop::option::of(float_strategy().prop_map(Value::Float)),
        prop::option::of(any::<char>().prop_map(Value::Char)),
        prop::option::of(text_strategy().prop_map(Value::Str)),
        prop::option::of(date_strategy().prop_map(Value::Date)),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes)),
        prop::option::of(list_strategy()),
    )
        .prop_map(|(flag, count, ratio, initial, label, at, raw, tags)| {
            [
                ("flag", flag),
                ("count", count),
                ("ratio", ratio),
                ("initial", initial),
                ("label", label),
                ("at", at),
                ("raw", raw),
                ("tags", tags),
            ]
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect()
        })
}

/// An operation on a shop store, addressed by slot.
///
/// Slots index a fixed pool of orders so that operations in a sequence
/// revisit the same entities.
#[derive(Debug, Clone)]
pub enum ShopOperation {
    /// Save the order in the slot with this many items, creating it if
    /// the slot is empty.
    SaveOrder {
        /// Order slot.
        slot: usize,
        /// Number of items.
        items: usize,
    },
    /// Drop the first item of the order in the slot and save it.
    DropItem {
        /// Order slot.
        slot: usize,
    },
    /// Delete the order in the slot.
    DeleteOrder {
        /// Order slot.
        slot: usize,
    },
}

/// Strategy for one shop operation over `slots` order slots.
pub fn shop_operation_strategy(slots: usize) -> impl Strategy<Value = ShopOperation> {
    let slots = slots.max(1);
    prop_oneof![
        3 => (0..slots, 0usize..4).prop_map(|(slot, items)| ShopOperation::SaveOrder { slot, items }),
        1 => (0..slots).prop_map(|slot| ShopOperation::DropItem { slot }),
        1 => (0..slots).prop_map(|slot| ShopOperation::DeleteOrder { slot }),
    ]
}

/// Strategy for a sequence of shop operations.
pub fn shop_operations_strategy(
    slots: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<ShopOperation>> {
    prop::collection::vec(shop_operation_strategy(slots), 1..=max_len.max(1))
}
