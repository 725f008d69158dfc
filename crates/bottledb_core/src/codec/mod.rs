//! Object codec: values and entities to capsules and back.
//!
//! The grammar itself lives in `bottledb_codec`; this module decides what
//! the heads mean. Every numeric head is a type index resolved through the
//! [`TypeRegistry`], and the [`Schema`] says whether that type is a
//! primitive, an entity, a composite or an enum.
//!
//! | value               | capsule                         |
//! |---------------------|---------------------------------|
//! | primitive           | `{<idx>:<text>}`                |
//! | enum                | `{<idx>:<Variant>}`             |
//! | entity reference    | `{<idx>:<id>}`                  |
//! | composite / entity  | `{<idx>:{field:capsule}…}`      |
//! | list                | `{list:capsule…}` / `{list:{}}` |
//! | map                 | `{map:k v k v…}` / `{map:{}}`   |
//! | file / image        | `{file:name}` / `{img:hash}`    |

mod decode;
mod edges;
mod encode;

pub(crate) use decode::{Decoder, RecordSource};
pub(crate) use edges::Edges;
pub(crate) use encode::{EncodedEntity, Stager};

use crate::dictionary::TypeRegistry;
use crate::error::{CoreError, CoreResult};
use crate::schema::{Schema, TypeDescriptor, TypeKind, PRIMITIVE_TYPES};
use crate::types::TypeTag;
use bottledb_codec::Capsule;

/// Head of list capsules.
pub const LIST_HEAD: &str = "list";
/// Head of map capsules.
pub const MAP_HEAD: &str = "map";

/// What a numeric capsule head stands for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TagKind<'s> {
    /// One of the built-in primitive names.
    Primitive(&'static str),
    /// A schema type.
    Declared(&'s TypeDescriptor),
}

/// Shared lookups for encoding, decoding and edge extraction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObjectCodec<'a> {
    pub schema: &'a Schema,
    pub registry: &'a TypeRegistry,
}

impl<'a> ObjectCodec<'a> {
    pub fn new(schema: &'a Schema, registry: &'a TypeRegistry) -> Self {
        Self { schema, registry }
    }

    /// Tag of a type, registering it on first use.
    pub fn tag_of(&self, type_name: &str) -> CoreResult<TypeTag> {
        self.registry.index_of(type_name)
    }

    /// Resolves a numeric head.
    ///
    /// An index the dictionary does not know, or a name the schema does not
    /// declare, cannot be interpreted.
    pub fn resolve(&self, head: &str) -> CoreResult<(TypeTag, String, TagKind<'a>)> {
        let tag: TypeTag = head
            .parse()
            .map_err(|_| CoreError::corrupt(head, "unknown capsule head"))?;
        let name = self.registry.type_of(tag)?;
        if let Some(primitive) = PRIMITIVE_TYPES.iter().find(|p| **p == name) {
            return Ok((tag, name, TagKind::Primitive(primitive)));
        }
        let descriptor = self
            .schema
            .get(&name)
            .ok_or_else(|| CoreError::unknown_type(name.clone()))?;
        Ok((tag, name, TagKind::Declared(descriptor)))
    }

    /// Descriptor of an entity type.
    pub fn entity_descriptor(&self, type_name: &str) -> CoreResult<&'a TypeDescriptor> {
        let descriptor = self.schema.require(type_name)?;
        if descriptor.kind != TypeKind::Entity {
            return Err(CoreError::invalid_operation(format!(
                "{type_name} is not an entity type"
            )));
        }
        Ok(descriptor)
    }
}

/// Returns the single value capsule wrapped by a field capsule.
pub(crate) fn field_value<'c>(field: &'c Capsule, location: &str) -> CoreResult<&'c Capsule> {
    match field.as_nodes() {
        Some([value]) => Ok(value),
        _ => Err(CoreError::corrupt(
            location,
            format!("field {} must wrap exactly one capsule", field.head),
        )),
    }
}
