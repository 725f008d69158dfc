//! The closed value model.

use crate::blob::Blob;
use crate::entity::{Entity, Object, Ref};
use chrono::{DateTime, Utc};

/// Any value an entity field can hold.
///
/// There is no null variant: an absent field is simply not present, and
/// collections cannot contain holes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Single character.
    Char(char),
    /// UTF-8 string.
    Str(String),
    /// Point in time (UTC).
    Date(DateTime<Utc>),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A variant of an enum type declared in the schema.
    Enum {
        /// The enum type.
        type_name: String,
        /// The variant name.
        variant: String,
    },
    /// Ordered list.
    List(Vec<Value>),
    /// Ordered key/value pairs.
    Map(Vec<(Value, Value)>),
    /// Inline composite.
    Object(Object),
    /// Nested entity; stored by identity only.
    Entity(Entity),
    /// Reference to a stored entity that is not materialized.
    Ref(Ref),
    /// Name-addressed file attachment.
    File(Blob),
    /// Content-addressed image attachment.
    Image(Blob),
}

impl Value {
    /// Short name of the value's kind, used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Char(_) => "char",
            Self::Str(_) => "str",
            Self::Date(_) => "date",
            Self::Bytes(_) => "bytes",
            Self::Enum { .. } => "enum",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(_) => "composite",
            Self::Entity(_) => "entity",
            Self::Ref(_) => "ref",
            Self::File(_) => "file",
            Self::Image(_) => "image",
        }
    }

    /// Creates an enum value.
    pub fn enumeration(type_name: impl Into<String>, variant: impl Into<String>) -> Self {
        Self::Enum {
            type_name: type_name.into(),
            variant: variant.into(),
        }
    }

    /// Returns the string, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the entity handle, if this is a nested entity.
    #[must_use]
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the reference, if this is an unmaterialized reference.
    #[must_use]
    pub fn as_reference(&self) -> Option<&Ref> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the elements, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the composite, if this is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Returns the blob of a file or image value.
    #[must_use]
    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Self::File(b) | Self::Image(b) => Some(b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Self::Char(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Self::Object(v)
    }
}

impl From<Entity> for Value {
    fn from(v: Entity) -> Self {
        Self::Entity(v)
    }
}

impl From<Ref> for Value {
    fn from(v: Ref) -> Self {
        Self::Ref(v)
    }
}
