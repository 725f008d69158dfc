//! Encoding of entities and their field values.

use super::{ObjectCodec, LIST_HEAD, MAP_HEAD};
use crate::blob::{content_hash, validate_name, Blob, BlobKind};
use crate::entity::{AttributeAccessor, Entity, Ref};
use crate::error::{CoreError, CoreResult};
use crate::schema::{FieldType, TypeDescriptor, TypeKind};
use crate::types::TypeTag;
use crate::value::Value;
use bottledb_codec::{Capsule, MAX_DEPTH};
use chrono::SecondsFormat;

/// Receives the nested entities met while encoding.
pub(crate) trait Stager {
    /// Makes sure `entity` is part of the current save and returns its
    /// reference. Assigns an identity if the entity has none yet.
    fn stage(&mut self, entity: &Entity) -> CoreResult<Ref>;
}

/// One entity's capsule plus the attachments it holds.
#[derive(Debug, Clone)]
pub(crate) struct EncodedEntity {
    pub capsule: Capsule,
    pub blobs: Vec<(BlobKind, Blob)>,
}

/// Where in the object a value sits, for error messages.
#[derive(Clone, Copy)]
struct Site<'s> {
    type_name: &'s str,
    field: &'s str,
}

impl Site<'_> {
    fn mismatch(&self, expected: impl ToString, value: &Value) -> CoreError {
        CoreError::TypeMismatch {
            type_name: self.type_name.to_string(),
            field: self.field.to_string(),
            expected: expected.to_string(),
            found: value.kind_name().to_string(),
        }
    }
}

impl<'a> ObjectCodec<'a> {
    /// Encodes the fields of an entity.
    ///
    /// Nested entities are handed to `stager` and written by identity.
    pub fn encode_entity(
        &self,
        entity: &Entity,
        tag: TypeTag,
        stager: &mut dyn Stager,
    ) -> CoreResult<EncodedEntity> {
        let descriptor = self.entity_descriptor(&entity.type_name())?;
        let mut encoder = Encoder {
            codec: *self,
            stager,
            blobs: Vec::new(),
        };
        let fields = encoder.encode_fields(descriptor, entity, 1)?;
        Ok(EncodedEntity {
            capsule: Capsule::nodes(tag.to_string(), fields),
            blobs: encoder.blobs,
        })
    }
}

struct Encoder<'a, 'st> {
    codec: ObjectCodec<'a>,
    stager: &'st mut dyn Stager,
    blobs: Vec<(BlobKind, Blob)>,
}

impl Encoder<'_, '_> {
    /// Field capsules in declaration order. Absent fields are omitted.
    fn encode_fields(
        &mut self,
        descriptor: &TypeDescriptor,
        object: &dyn AttributeAccessor,
        depth: usize,
    ) -> CoreResult<Vec<Capsule>> {
        for name in object.attributes() {
            if descriptor.field_named(&name).is_none() {
                return Err(CoreError::unknown_field(&descriptor.name, name));
            }
        }

        let mut nodes = Vec::new();
        for field in &descriptor.fields {
            let Some(value) = object.get(&field.name) else {
                continue;
            };
            let site = Site {
                type_name: &descriptor.name,
                field: &field.name,
            };
            let capsule = self.encode_field(site, &field.ty, &value, depth + 2)?;
            nodes.push(Capsule::nodes(field.name.clone(), vec![capsule]));
        }
        Ok(nodes)
    }

    /// Checks a value against its declared type, then encodes it.
    fn encode_field(
        &mut self,
        site: Site<'_>,
        ty: &FieldType,
        value: &Value,
        depth: usize,
    ) -> CoreResult<Capsule> {
        let matches = match (ty, value) {
            (FieldType::Any, _)
            | (FieldType::Bool, Value::Bool(_))
            | (FieldType::Int, Value::Int(_))
            | (FieldType::Float, Value::Float(_))
            | (FieldType::Char, Value::Char(_))
            | (FieldType::Str, Value::Str(_))
            | (FieldType::Date, Value::Date(_))
            | (FieldType::Bytes, Value::Bytes(_))
            | (FieldType::List, Value::List(_))
            | (FieldType::Map, Value::Map(_))
            | (FieldType::File, Value::File(_))
            | (FieldType::Image, Value::Image(_)) => true,
            (FieldType::Entity(name), Value::Entity(e)) => e.type_name() == *name,
            (FieldType::Entity(name), Value::Ref(r)) => self.codec.registry.type_of(r.tag)? == *name,
            (FieldType::Composite(name), Value::Object(o)) => o.type_name() == name,
            (FieldType::Enum(name), Value::Enum { type_name, .. }) => type_name == name,
            _ => false,
        };
        if !matches {
            return Err(site.mismatch(ty, value));
        }
        self.encode_value(site, value, depth)
    }

    /// Encodes a value by its runtime kind.
    fn encode_value(&mut self, site: Site<'_>, value: &Value, depth: usize) -> CoreResult<Capsule> {
        if depth >= MAX_DEPTH {
            return Err(CoreError::invalid_operation(format!(
                "value of {}.{} nests deeper than {MAX_DEPTH} levels",
                site.type_name, site.field
            )));
        }
        let capsule = match value {
            Value::Bool(b) => self.primitive("bool", b.to_string())?,
            Value::Int(n) => self.primitive("int", n.to_string())?,
            Value::Float(x) => self.primitive("float", x.to_string())?,
            Value::Char(c) => self.primitive("char", c.to_string())?,
            Value::Str(s) => self.primitive("str", s.clone())?,
            Value::Date(d) => self.primitive("date", d.to_rfc3339_opts(SecondsFormat::AutoSi, true))?,
            Value::Bytes(bytes) => self.primitive("bytes", hex::encode(bytes))?,
            Value::Enum { type_name, variant } => {
                let descriptor = self.codec.schema.require(type_name)?;
                match &descriptor.kind {
                    TypeKind::Enum(variants) if variants.contains(variant) => {}
                    _ => return Err(site.mismatch(format!("enum {type_name}"), value)),
                }
                Capsule::text(self.codec.tag_of(type_name)?.to_string(), variant.clone())
            }
            Value::List(items) => {
                let mut nodes = Vec::with_capacity(items.len());
                for item in items {
                    nodes.push(self.encode_value(site, item, depth + 1)?);
                }
                Capsule::nodes(LIST_HEAD, nodes)
            }
            Value::Map(pairs) => {
                let mut nodes = Vec::with_capacity(pairs.len() * 2);
                for (key, item) in pairs {
                    nodes.push(self.encode_value(site, key, depth + 1)?);
                    nodes.push(self.encode_value(site, item, depth + 1)?);
                }
                Capsule::nodes(MAP_HEAD, nodes)
            }
            Value::Object(object) => {
                let descriptor = self.codec.schema.require(object.type_name())?;
                if descriptor.kind != TypeKind::Composite {
                    return Err(site.mismatch(format!("composite {}", object.type_name()), value));
                }
                let fields = self.encode_fields(descriptor, object, depth)?;
                Capsule::nodes(self.codec.tag_of(&descriptor.name)?.to_string(), fields)
            }
            Value::Entity(entity) => {
                let reference = self.stager.stage(entity)?;
                Capsule::text(reference.tag.to_string(), reference.id.to_string())
            }
            Value::Ref(reference) => {
                let name = self.codec.registry.type_of(reference.tag)?;
                self.codec.entity_descriptor(&name)?;
                Capsule::text(reference.tag.to_string(), reference.id.to_string())
            }
            Value::File(blob) => self.blob(BlobKind::File, blob)?,
            Value::Image(blob) => {
                if blob.name() != content_hash(blob.bytes()) {
                    return Err(CoreError::invalid_operation(format!(
                        "image {} is not named by its content hash",
                        blob.name()
                    )));
                }
                self.blob(BlobKind::Image, blob)?
            }
        };
        Ok(capsule)
    }

    fn primitive(&self, type_name: &str, text: String) -> CoreResult<Capsule> {
        Ok(Capsule::text(self.codec.tag_of(type_name)?.to_string(), text))
    }

    /// Registers an attachment of the entity being encoded.
    fn blob(&mut self, kind: BlobKind, blob: &Blob) -> CoreResult<Capsule> {
        validate_name(blob.name())?;
        let clash = self
            .blobs
            .iter()
            .find(|(k, b)| *k == kind && b.name() == blob.name());
        match clash {
            Some((_, existing)) if existing.bytes() != blob.bytes() => {
                return Err(CoreError::invalid_operation(format!(
                    "two different attachments named {}",
                    blob.name()
                )));
            }
            Some(_) => {}
            None => self.blobs.push((kind, blob.clone())),
        }
        Ok(Capsule::text(kind.head(), blob.name()))
    }
}
