//! Benchmark utilities.

use bottledb_codec::Capsule;
use bottledb_core::{Entity, FieldDescriptor, FieldType, Schema, TypeDescriptor, Value};

/// Type name of the benchmark document.
pub const DOC: &str = "bench.Doc";

/// Type name of the parts a document owns.
pub const PART: &str = "bench.Part";

/// A document owning a list of parts and pointing at a parent document.
pub fn bench_schema() -> Schema {
    Schema::from_types([
        TypeDescriptor::entity(DOC)
            .field(FieldDescriptor::new("title", FieldType::Str))
            .field(FieldDescriptor::new("body", FieldType::Bytes))
            .field(FieldDescriptor::new("parent", FieldType::Entity(DOC.into())))
            .field(FieldDescriptor::new("parts", FieldType::List).cascade()),
        TypeDescriptor::entity(PART)
            .field(FieldDescriptor::new("index", FieldType::Int))
            .field(FieldDescriptor::new("label", FieldType::Str)),
    ])
    .expect("benchmark schema is consistent")
}

/// Deterministic filler bytes.
pub fn filler(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

/// A document with `parts` owned parts and a body of `body_size` bytes.
pub fn document(title: &str, parts: usize, body_size: usize) -> Entity {
    let parts: Vec<Value> = (0..parts)
        .map(|i| {
            Value::Entity(
                Entity::new(PART)
                    .with("index", i as i64)
                    .with("label", format!("part {{{i}}}")),
            )
        })
        .collect();
    Entity::new(DOC)
        .with("title", title)
        .with("body", Value::Bytes(filler(body_size)))
        .with("parts", parts)
}

/// A chain of `len` documents, each the parent of the next.
pub fn chain(len: usize) -> Entity {
    let mut current = document("doc-0", 0, 16);
    for i in 1..len.max(1) {
        current = document(&format!("doc-{i}"), 0, 16).with("parent", current);
    }
    current
}

/// A capsule tree `depth` levels deep with `width` children per node.
pub fn capsule_tree(depth: usize, width: usize) -> Capsule {
    if depth == 0 {
        Capsule::text("str", "leaf:{with} \\escapes")
    } else {
        Capsule::nodes(
            format!("f{depth}"),
            (0..width).map(|_| capsule_tree(depth - 1, width)).collect(),
        )
    }
}
