//! Outgoing references of a stored capsule.

use super::{field_value, ObjectCodec, LIST_HEAD, MAP_HEAD};
use crate::entity::{EntityId, Ref};
use crate::error::CoreResult;
use crate::schema::{TypeDescriptor, TypeKind, PRIMITIVE_TYPES};
use crate::types::TypeTag;
use bottledb_codec::{Body, Capsule};
use std::collections::BTreeMap;

/// Entities an entity points at, each with whether any of the pointing
/// fields is a cascade field. Self references are left out.
pub(crate) type Edges = BTreeMap<Ref, bool>;

enum Frame<'c, 's> {
    /// A value capsule reached through a field with the given cascade flag.
    Value(&'c Capsule, bool),
    /// The field capsules of an entity or composite.
    Fields(&'c Capsule, Option<&'s TypeDescriptor>),
}

impl ObjectCodec<'_> {
    /// Collects the entity references in `capsule`, the stored capsule of
    /// `source`.
    ///
    /// The cascade flag of a reference comes from the innermost field it is
    /// written under, so a composite can mark its own fields. Fields and
    /// types the schema no longer declares still count as references, never
    /// as cascade ones.
    pub fn edges(&self, source: Ref, capsule: &Capsule) -> CoreResult<Edges> {
        let location = source.to_string();
        let root = self.schema.get(&self.registry.type_of(source.tag)?);
        let mut edges = Edges::new();
        let mut stack = vec![Frame::Fields(capsule, root)];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Fields(capsule, descriptor) => {
                    let Body::Nodes(fields) = &capsule.body else {
                        continue;
                    };
                    for field in fields {
                        let cascade = descriptor
                            .and_then(|d| d.field_named(&field.head))
                            .is_some_and(|f| f.cascade);
                        stack.push(Frame::Value(field_value(field, &location)?, cascade));
                    }
                }
                Frame::Value(capsule, cascade) => match capsule.head.as_str() {
                    LIST_HEAD | MAP_HEAD => {
                        if let Body::Nodes(items) = &capsule.body {
                            stack.extend(items.iter().map(|item| Frame::Value(item, cascade)));
                        }
                    }
                    head => {
                        let Ok(tag) = head.parse::<TypeTag>() else {
                            // Attachments and anything else that is not a type index.
                            continue;
                        };
                        let name = self.registry.type_of(tag)?;
                        if PRIMITIVE_TYPES.contains(&name.as_str()) {
                            continue;
                        }
                        let descriptor = self.schema.get(&name);
                        match (&capsule.body, descriptor.map(|d| &d.kind)) {
                            (Body::Text(id), Some(TypeKind::Entity) | None) => {
                                let Ok(id) = EntityId::parse(id) else {
                                    continue;
                                };
                                let target = Ref::new(tag, id);
                                if target != source {
                                    let slot = edges.entry(target).or_insert(false);
                                    *slot |= cascade;
                                }
                            }
                            (Body::Nodes(_), Some(TypeKind::Composite) | None) => {
                                stack.push(Frame::Fields(capsule, descriptor));
                            }
                            _ => {}
                        }
                    }
                },
            }
        }
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::TypeRegistry;
    use crate::layout::Layout;
    use crate::schema::{FieldDescriptor, FieldType, Schema};
    use bottledb_codec::parse;
    use bottledb_storage::MemoryFileSystem;
    use std::sync::Arc;

    fn setup() -> (Schema, TypeRegistry) {
        let schema = Schema::from_types([
            TypeDescriptor::entity("t.Order")
                .field(FieldDescriptor::new("customer", FieldType::Entity("t.Customer".into())))
                .field(FieldDescriptor::new("items", FieldType::List).cascade())
                .field(FieldDescriptor::new("ship", FieldType::Composite("t.Ship".into()))),
            TypeDescriptor::composite("t.Ship")
                .field(FieldDescriptor::new("label", FieldType::Entity("t.Item".into())).cascade()),
            TypeDescriptor::entity("t.Customer"),
            TypeDescriptor::entity("t.Item"),
        ])
        .unwrap();
        let registry =
            TypeRegistry::load(Arc::new(MemoryFileSystem::new()), Layout::new("/db"), false).unwrap();
        for name in ["t.Order", "t.Ship", "t.Customer", "t.Item", "int", "t.Gone"] {
            registry.index_of(name).unwrap();
        }
        (schema, registry)
    }

    fn id(n: u8) -> EntityId {
        EntityId::from_bytes([n; 16])
    }

    #[test]
    fn cascade_flag_follows_innermost_field() {
        let (schema, registry) = setup();
        let codec = ObjectCodec::new(&schema, &registry);
        let order = Ref::new(0, id(0));
        let text = format!(
            "{{0:{{customer:{{2:{c}}}}}{{items:{{list:{{3:{i}}}{{4:5}}}}}}{{ship:{{1:{{label:{{3:{l}}}}}}}}}}}",
            c = id(1),
            i = id(2),
            l = id(3),
        );
        let edges = codec.edges(order, &parse(&text).unwrap()).unwrap();
        assert_eq!(edges.len(), 3);
        assert!(!edges[&Ref::new(2, id(1))]);
        assert!(edges[&Ref::new(3, id(2))]);
        assert!(edges[&Ref::new(3, id(3))]);
    }

    #[test]
    fn self_and_unknown_references() {
        let (schema, registry) = setup();
        let codec = ObjectCodec::new(&schema, &registry);
        let order = Ref::new(0, id(0));
        // `old` is no longer declared; `t.Gone` is no longer in the schema.
        let text = format!(
            "{{0:{{customer:{{0:{me}}}}}{{old:{{5:{gone}}}}}}}",
            me = id(0),
            gone = id(9),
        );
        let edges = codec.edges(order, &parse(&text).unwrap()).unwrap();
        assert_eq!(edges.into_iter().collect::<Vec<_>>(), vec![(Ref::new(5, id(9)), false)]);
    }

    #[test]
    fn repeated_targets_merge_cascade() {
        let (schema, registry) = setup();
        let codec = ObjectCodec::new(&schema, &registry);
        let item = id(4);
        let text = format!("{{0:{{items:{{list:{{3:{item}}}}}}}{{ship:{{1:{{}}}}}}}}");
        let edges = codec.edges(Ref::new(0, id(0)), &parse(&text).unwrap()).unwrap();
        assert!(edges[&Ref::new(3, item)]);
    }
}
