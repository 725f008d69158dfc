//! Decoding of stored records into entities.

use super::{field_value, ObjectCodec, TagKind, LIST_HEAD, MAP_HEAD};
use crate::blob::{Blob, BlobKind};
use crate::config::LoadMode;
use crate::entity::{Entity, EntityId, Object, Ref};
use crate::error::{CoreError, CoreResult};
use crate::layout::Layout;
use crate::schema::{TypeDescriptor, TypeKind};
use crate::value::Value;
use bottledb_codec::{Capsule, StoredRecord};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};

/// Where the decoder reads records and attachments from.
pub(crate) trait RecordSource {
    /// Reads the stored record of an entity, `None` if there is none.
    fn read_record(&self, reference: Ref) -> CoreResult<Option<StoredRecord>>;

    /// Reads one attachment of `owner`, `None` if it is absent.
    fn read_blob(&self, kind: BlobKind, owner: EntityId, name: &str) -> CoreResult<Option<Vec<u8>>>;
}

/// Materializes entities from stored records.
///
/// The decoder is a load context: every entity it creates is cached by
/// reference, so a graph with sharing or cycles decodes into handles with
/// the same sharing and cycles. Records are filled from a worklist rather
/// than by recursion, so the depth of the entity graph is irrelevant.
pub(crate) struct Decoder<'a, S: ?Sized> {
    codec: ObjectCodec<'a>,
    source: &'a S,
    mode: LoadMode,
    cache: BTreeMap<Ref, Entity>,
    pending: VecDeque<(Ref, Entity)>,
}

impl<'a, S: RecordSource + ?Sized> Decoder<'a, S> {
    pub fn new(codec: ObjectCodec<'a>, source: &'a S, mode: LoadMode) -> Self {
        Self {
            codec,
            source,
            mode,
            cache: BTreeMap::new(),
            pending: VecDeque::new(),
        }
    }

    /// Loads an entity.
    ///
    /// In deep mode every entity reachable from it is loaded too; in shallow
    /// mode its entity fields hold [`Value::Ref`].
    ///
    /// # Errors
    ///
    /// [`CoreError::MissingRecord`] if the entity, or in deep mode anything
    /// it reaches, has no live record.
    pub fn load(&mut self, reference: Ref) -> CoreResult<Entity> {
        let root = self.shell(reference)?;
        while let Some((next, shell)) = self.pending.pop_front() {
            self.fill(next, &shell)?;
        }
        Ok(root)
    }

    /// The cached handle for `reference`, queued for filling if new.
    fn shell(&mut self, reference: Ref) -> CoreResult<Entity> {
        if let Some(entity) = self.cache.get(&reference) {
            return Ok(entity.clone());
        }
        let type_name = self.codec.registry.type_of(reference.tag)?;
        self.codec.entity_descriptor(&type_name)?;
        let entity = Entity::with_id(type_name, reference.id);
        self.cache.insert(reference, entity.clone());
        self.pending.push_back((reference, entity.clone()));
        Ok(entity)
    }

    fn fill(&mut self, reference: Ref, shell: &Entity) -> CoreResult<()> {
        let record = self
            .source
            .read_record(reference)?
            .filter(|record| !record.deleted)
            .ok_or_else(|| CoreError::missing_record(reference))?;
        let location = reference.to_string();
        if record.capsule.head != reference.tag.to_string() {
            return Err(CoreError::corrupt(
                location,
                format!("record is tagged {}", record.capsule.head),
            ));
        }
        let descriptor = self.codec.entity_descriptor(&shell.type_name())?;
        let fields = self.decode_fields(descriptor, &record.capsule, reference.id, &location)?;
        shell.replace_fields(fields);
        Ok(())
    }

    /// Decodes the declared fields of an entity or composite capsule.
    /// Fields the descriptor does not know are skipped.
    fn decode_fields(
        &mut self,
        descriptor: &TypeDescriptor,
        capsule: &Capsule,
        owner: EntityId,
        location: &str,
    ) -> CoreResult<BTreeMap<String, Value>> {
        let nodes = nodes_of(capsule, location)?;
        let mut fields = BTreeMap::new();
        for field in nodes {
            if descriptor.field_named(&field.head).is_none() {
                tracing::trace!(type_name = %descriptor.name, field = %field.head, "skipping unknown field");
                continue;
            }
            let value = self.decode_value(field_value(field, location)?, owner, location)?;
            fields.insert(field.head.clone(), value);
        }
        Ok(fields)
    }

    /// Decodes one value capsule on its own, attachments read for `owner`.
    pub fn value(&mut self, capsule: &Capsule, owner: EntityId, location: &str) -> CoreResult<Value> {
        self.decode_value(capsule, owner, location)
    }

    fn decode_value(&mut self, capsule: &Capsule, owner: EntityId, location: &str) -> CoreResult<Value> {
        match capsule.head.as_str() {
            LIST_HEAD => {
                let mut items = Vec::new();
                for node in nodes_of(capsule, location)? {
                    items.push(self.decode_value(node, owner, location)?);
                }
                Ok(Value::List(items))
            }
            MAP_HEAD => {
                let nodes = nodes_of(capsule, location)?;
                if nodes.len() % 2 != 0 {
                    return Err(CoreError::corrupt(location, "map with an odd number of capsules"));
                }
                let mut pairs = Vec::with_capacity(nodes.len() / 2);
                for pair in nodes.chunks_exact(2) {
                    let key = self.decode_value(&pair[0], owner, location)?;
                    let value = self.decode_value(&pair[1], owner, location)?;
                    pairs.push((key, value));
                }
                Ok(Value::Map(pairs))
            }
            head if head == BlobKind::File.head() => {
                let blob = self.blob(BlobKind::File, owner, text_of(capsule, location)?)?;
                Ok(Value::File(blob))
            }
            head if head == BlobKind::Image.head() => {
                let blob = self.blob(BlobKind::Image, owner, text_of(capsule, location)?)?;
                Ok(Value::Image(blob))
            }
            head => {
                let (tag, name, kind) = self.codec.resolve(head)?;
                match kind {
                    TagKind::Primitive(primitive) => {
                        parse_primitive(primitive, text_of(capsule, location)?, location)
                    }
                    TagKind::Declared(descriptor) => match &descriptor.kind {
                        TypeKind::Entity => {
                            let id = EntityId::parse(text_of(capsule, location)?)?;
                            let reference = Ref::new(tag, id);
                            match self.mode {
                                LoadMode::Shallow => Ok(Value::Ref(reference)),
                                LoadMode::Deep => Ok(Value::Entity(self.shell(reference)?)),
                            }
                        }
                        TypeKind::Composite => {
                            let fields = self.decode_fields(descriptor, capsule, owner, location)?;
                            let mut object = Object::new(name);
                            for (field, value) in fields {
                                object.insert(&field, value);
                            }
                            Ok(Value::Object(object))
                        }
                        TypeKind::Enum(variants) => {
                            let variant = text_of(capsule, location)?;
                            if !variants.iter().any(|v| v == variant) {
                                return Err(CoreError::corrupt(
                                    location,
                                    format!("{name} has no variant {variant}"),
                                ));
                            }
                            Ok(Value::enumeration(name, variant))
                        }
                    },
                }
            }
        }
    }

    fn blob(&self, kind: BlobKind, owner: EntityId, name: &str) -> CoreResult<Blob> {
        let bytes = self
            .source
            .read_blob(kind, owner, name)?
            .ok_or_else(|| CoreError::MissingBlob {
                path: Layout::blob_rel(kind, owner, name),
            })?;
        Ok(Blob::new(name, bytes))
    }
}

fn nodes_of<'c>(capsule: &'c Capsule, location: &str) -> CoreResult<&'c [Capsule]> {
    capsule.as_nodes().ok_or_else(|| {
        CoreError::corrupt(
            location,
            format!("capsule {} should hold nested capsules", capsule.head),
        )
    })
}

fn text_of<'c>(capsule: &'c Capsule, location: &str) -> CoreResult<&'c str> {
    capsule.as_text().ok_or_else(|| {
        CoreError::corrupt(location, format!("capsule {} should hold text", capsule.head))
    })
}

fn parse_primitive(primitive: &str, text: &str, location: &str) -> CoreResult<Value> {
    let bad = || CoreError::corrupt(location, format!("invalid {primitive} {text:?}"));
    let value = match primitive {
        "bool" => match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err(bad()),
        },
        "int" => Value::Int(text.parse().map_err(|_| bad())?),
        "float" => Value::Float(text.parse().map_err(|_| bad())?),
        "char" => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Value::Char(c),
                _ => return Err(bad()),
            }
        }
        "str" => Value::Str(text.to_string()),
        "date" => Value::Date(
            DateTime::parse_from_rfc3339(text)
                .map_err(|_| bad())?
                .with_timezone(&Utc),
        ),
        "bytes" => Value::Bytes(hex::decode(text).map_err(|_| bad())?),
        _ => return Err(bad()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EncodedEntity, Stager};
    use crate::dictionary::TypeRegistry;
    use crate::schema::{FieldDescriptor, FieldType, Schema};
    use bottledb_storage::MemoryFileSystem;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Serves records and attachments out of maps.
    #[derive(Default)]
    struct Staging {
        records: HashMap<Ref, StoredRecord>,
        blobs: HashMap<(EntityId, String), Vec<u8>>,
    }

    impl RecordSource for Staging {
        fn read_record(&self, reference: Ref) -> CoreResult<Option<StoredRecord>> {
            Ok(self.records.get(&reference).cloned())
        }

        fn read_blob(&self, _: BlobKind, owner: EntityId, name: &str) -> CoreResult<Option<Vec<u8>>> {
            Ok(self.blobs.get(&(owner, name.to_string())).cloned())
        }
    }

    /// Collects nested entities, assigning identities on the way.
    impl Stager for Vec<Entity> {
        fn stage(&mut self, entity: &Entity) -> CoreResult<Ref> {
            let id = match entity.id() {
                Some(id) => id,
                None => {
                    let id = EntityId::new();
                    entity.assign_id(id)?;
                    id
                }
            };
            self.push(entity.clone());
            Ok(Ref::new(tag_for(&entity.type_name()), id))
        }
    }

    // The registry below registers these names first, in this order.
    fn tag_for(type_name: &str) -> u32 {
        ["t.Node", "t.Point", "t.Color"]
            .iter()
            .position(|n| *n == type_name)
            .map(|p| p as u32)
            .unwrap()
    }

    struct Bench<'a> {
        codec: ObjectCodec<'a>,
        staging: Staging,
    }

    impl Bench<'_> {
        /// Stores `root` and everything it reaches, through record text.
        fn save(&mut self, root: &Entity) -> Ref {
            let mut queue = vec![root.clone()];
            let mut seen = Vec::new();
            let mut root_ref = None;
            while let Some(entity) = queue.pop() {
                let reference = Vec::<Entity>::new().stage(&entity).unwrap();
                root_ref.get_or_insert(reference);
                if seen.contains(&reference) {
                    continue;
                }
                seen.push(reference);
                let mut nested = Vec::new();
                let EncodedEntity { capsule, blobs } = self
                    .codec
                    .encode_entity(&entity, reference.tag, &mut nested)
                    .unwrap();
                for (_, blob) in blobs {
                    self.staging
                        .blobs
                        .insert((reference.id, blob.name().to_string()), blob.bytes().to_vec());
                }
                let text = StoredRecord::new(capsule).to_text();
                self.staging
                    .records
                    .insert(reference, StoredRecord::parse(&text).unwrap());
                queue.extend(nested);
            }
            root_ref.unwrap()
        }

        fn load(&self, reference: Ref, mode: LoadMode) -> Entity {
            Decoder::new(self.codec, &self.staging, mode).load(reference).unwrap()
        }
    }

    fn schema() -> Schema {
        Schema::from_types([
            TypeDescriptor::entity("t.Node")
                .field(FieldDescriptor::new("label", FieldType::Str))
                .field(FieldDescriptor::new("next", FieldType::Entity("t.Node".into())))
                .field(FieldDescriptor::new("at", FieldType::Composite("t.Point".into())))
                .field(FieldDescriptor::new("color", FieldType::Enum("t.Color".into())))
                .field(FieldDescriptor::new("extra", FieldType::Any)),
            TypeDescriptor::composite("t.Point")
                .field(FieldDescriptor::new("x", FieldType::Int))
                .field(FieldDescriptor::new("y", FieldType::Int)),
            TypeDescriptor::enumeration("t.Color", ["Red", "Blue"]),
        ])
        .unwrap()
    }

    fn registry() -> TypeRegistry {
        let registry =
            TypeRegistry::load(Arc::new(MemoryFileSystem::new()), Layout::new("/db"), false).unwrap();
        for name in ["t.Node", "t.Point", "t.Color"] {
            registry.index_of(name).unwrap();
        }
        registry
    }

    #[test]
    fn primitives_round_trip() {
        let (schema, registry) = (schema(), registry());
        let mut bench = Bench {
            codec: ObjectCodec::new(&schema, &registry),
            staging: Staging::default(),
        };
        let when = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 0).unwrap();
        let extra = Value::List(vec![
            Value::Bool(false),
            Value::Int(-7),
            Value::Float(0.1),
            Value::Char('{'),
            Value::Str("a}b\\c:d".into()),
            Value::Date(when),
            Value::Bytes(vec![0, 255]),
            Value::List(Vec::new()),
            Value::Map(vec![(Value::Str("k".into()), Value::Int(1))]),
            Value::Map(Vec::new()),
        ]);
        let node = Entity::new("t.Node")
            .with("label", "")
            .with("at", Object::new("t.Point").with("x", 1i64))
            .with("color", Value::enumeration("t.Color", "Blue"))
            .with("extra", extra.clone());

        let reference = bench.save(&node);
        let loaded = bench.load(reference, LoadMode::Deep);
        assert_eq!(loaded.get("label"), Some(Value::Str(String::new())));
        assert_eq!(loaded.get("extra"), Some(extra));
        assert_eq!(loaded.get("at"), Some(Value::Object(Object::new("t.Point").with("x", 1i64))));
        assert_eq!(loaded.get("color"), Some(Value::enumeration("t.Color", "Blue")));
        assert_eq!(loaded.get("next"), None);
    }

    #[test]
    fn cycles_decode_to_shared_handles() {
        let (schema, registry) = (schema(), registry());
        let mut bench = Bench {
            codec: ObjectCodec::new(&schema, &registry),
            staging: Staging::default(),
        };
        let a = Entity::new("t.Node").with("label", "a");
        let b = Entity::new("t.Node").with("label", "b").with("next", a.clone());
        a.set("next", b.clone());
        let reference = bench.save(&a);

        let loaded = bench.load(reference, LoadMode::Deep);
        let b2 = loaded.get("next").and_then(|v| v.as_entity().cloned()).unwrap();
        let a2 = b2.get("next").and_then(|v| v.as_entity().cloned()).unwrap();
        assert!(a2.ptr_eq(&loaded));
        assert_eq!(b2.get("label"), Some(Value::Str("b".into())));

        let shallow = bench.load(reference, LoadMode::Shallow);
        assert_eq!(
            shallow.get("next"),
            Some(Value::Ref(Ref::new(0, b.id().unwrap())))
        );
    }

    #[test]
    fn encode_checks_declared_types() {
        let (schema, registry) = (schema(), registry());
        let codec = ObjectCodec::new(&schema, &registry);
        let mut stager = Vec::new();

        let wrong = Entity::new("t.Node").with("label", 3i64);
        assert!(matches!(
            codec.encode_entity(&wrong, 0, &mut stager),
            Err(CoreError::TypeMismatch { .. })
        ));
        let undeclared = Entity::new("t.Node").with("nope", 3i64);
        assert!(matches!(
            codec.encode_entity(&undeclared, 0, &mut stager),
            Err(CoreError::UnknownField { .. })
        ));
        let bad_variant = Entity::new("t.Node").with("color", Value::enumeration("t.Color", "Green"));
        assert!(codec.encode_entity(&bad_variant, 0, &mut stager).is_err());
    }

    #[test]
    fn unknown_fields_are_ignored_on_decode() {
        let (schema, registry) = (schema(), registry());
        let codec = ObjectCodec::new(&schema, &registry);
        let mut staging = Staging::default();
        let id = EntityId::new();
        let str_tag = registry.index_of("str").unwrap();
        let text = format!("{{0:{{label:{{{str_tag}:x}}}}{{retired:{{{str_tag}:y}}}}}}");
        staging
            .records
            .insert(Ref::new(0, id), StoredRecord::parse(&text).unwrap());

        let loaded = Decoder::new(codec, &staging, LoadMode::Deep)
            .load(Ref::new(0, id))
            .unwrap();
        assert_eq!(loaded.attributes(), vec!["label".to_string()]);
    }

    #[test]
    fn blobs_round_trip_and_missing_blob_fails() {
        let schema = Schema::from_types([TypeDescriptor::entity("t.Node")
            .field(FieldDescriptor::new("doc", FieldType::File))
            .field(FieldDescriptor::new("pic", FieldType::Image))])
        .unwrap();
        let registry = registry();
        let mut bench = Bench {
            codec: ObjectCodec::new(&schema, &registry),
            staging: Staging::default(),
        };
        let node = Entity::new("t.Node")
            .with("doc", Value::File(Blob::new("a.txt", b"hello".to_vec())))
            .with("pic", Value::Image(Blob::image(vec![1, 2, 3])));
        let reference = bench.save(&node);

        let loaded = bench.load(reference, LoadMode::Deep);
        assert_eq!(loaded.get("doc"), node.get("doc"));
        assert_eq!(loaded.get("pic"), node.get("pic"));

        bench.staging.blobs.clear();
        let err = Decoder::new(bench.codec, &bench.staging, LoadMode::Deep)
            .load(reference)
            .unwrap_err();
        assert!(matches!(err, CoreError::MissingBlob { .. }));
    }

    #[test]
    fn corrupt_primitives_are_rejected() {
        assert!(parse_primitive("bool", "yes", "x").is_err());
        assert!(parse_primitive("char", "ab", "x").is_err());
        assert!(parse_primitive("char", "", "x").is_err());
        assert!(parse_primitive("bytes", "zz", "x").is_err());
        assert_eq!(parse_primitive("float", "1", "x").unwrap(), Value::Float(1.0));
    }
}
