//! Type descriptors: the attribute capability consumed by the codec.
//!
//! A [`Schema`] lists every application type a store knows about. Each
//! [`TypeDescriptor`] declares the type's kind and its ordered fields; field
//! order is the order fields are written in capsules. Descriptors are plain
//! data, built by hand or generated by a [`crate::Persist`] implementation.

use crate::error::{CoreError, CoreResult};
use bottledb_codec::is_valid_head;
use std::collections::BTreeMap;
use std::fmt;

/// Names of the built-in primitive types, registered lazily in the dictionary.
pub const PRIMITIVE_TYPES: [&str; 7] = ["bool", "int", "float", "char", "str", "date", "bytes"];

/// First path segments that would collide with store-internal entries.
pub const RESERVED_SEGMENTS: [&str; 5] = ["temp", "files", "imgs", "dictionary", "LOCK"];

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// Single character.
    Char,
    /// String.
    Str,
    /// UTC timestamp.
    Date,
    /// Raw bytes.
    Bytes,
    /// List with elements of any type.
    List,
    /// Map with keys and values of any type.
    Map,
    /// Reference to an entity of the named type.
    Entity(String),
    /// Inline composite of the named type.
    Composite(String),
    /// Variant of the named enum type.
    Enum(String),
    /// File attachment.
    File,
    /// Image attachment.
    Image,
    /// Anything.
    Any,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Char => f.write_str("char"),
            Self::Str => f.write_str("str"),
            Self::Date => f.write_str("date"),
            Self::Bytes => f.write_str("bytes"),
            Self::List => f.write_str("list"),
            Self::Map => f.write_str("map"),
            Self::Entity(name) => write!(f, "entity {name}"),
            Self::Composite(name) => write!(f, "composite {name}"),
            Self::Enum(name) => write!(f, "enum {name}"),
            Self::File => f.write_str("file"),
            Self::Image => f.write_str("image"),
            Self::Any => f.write_str("any"),
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name; also the head of its field-capsule.
    pub name: String,
    /// Declared type.
    pub ty: FieldType,
    /// No two live entities of the owning type may share this value.
    pub unique: bool,
    /// Entities referenced through this field are owned by the holder and
    /// are deleted with it once nothing else points at them.
    pub cascade: bool,
}

impl FieldDescriptor {
    /// Creates a plain field.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            unique: false,
            cascade: false,
        }
    }

    /// Marks the field unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the field as an ownership edge.
    #[must_use]
    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }
}

/// What a named type is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// Has identity and its own record.
    Entity,
    /// Stored inline inside its holder.
    Composite,
    /// Closed set of variant names.
    Enum(Vec<String>),
}

/// Describes one application type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Dotted type name, e.g. `shop.Order`.
    pub name: String,
    /// Kind of type.
    pub kind: TypeKind,
    /// Declared fields in capsule order.
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    /// Describes an entity type.
    pub fn entity(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Entity)
    }

    /// Describes a composite type.
    pub fn composite(name: impl Into<String>) -> Self {
        Self::with_kind(name, TypeKind::Composite)
    }

    /// Describes an enum type.
    pub fn enumeration<S: Into<String>>(
        name: impl Into<String>,
        variants: impl IntoIterator<Item = S>,
    ) -> Self {
        let variants = variants.into_iter().map(Into::into).collect();
        Self::with_kind(name, TypeKind::Enum(variants))
    }

    fn with_kind(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fields: Vec::new(),
        }
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields marked unique.
    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.unique)
    }

    /// Whether any field is marked unique.
    #[must_use]
    pub fn has_unique_fields(&self) -> bool {
        self.fields.iter().any(|f| f.unique)
    }

    /// Whether this is an entity type.
    #[must_use]
    pub fn is_entity(&self) -> bool {
        self.kind == TypeKind::Entity
    }

    /// Store-relative directory of this type's records.
    #[must_use]
    pub fn type_path(&self) -> String {
        type_path(&self.name)
    }
}

/// Converts a dotted type name to its store-relative directory.
#[must_use]
pub fn type_path(name: &str) -> String {
    name.replace('.', "/")
}

/// Checks that a type name can be stored.
///
/// # Errors
///
/// Returns [`CoreError::InvalidFormat`] if the name has an empty segment,
/// a character outside `[A-Za-z0-9_-]`, a reserved first segment, or is the
/// name of a primitive type.
pub fn validate_type_name(name: &str) -> CoreResult<()> {
    if PRIMITIVE_TYPES.contains(&name) {
        return Err(CoreError::invalid_format(format!(
            "type name {name:?} is a primitive"
        )));
    }
    let mut segments = name.split('.');
    if let Some(first) = segments.clone().next() {
        if RESERVED_SEGMENTS.contains(&first) {
            return Err(CoreError::invalid_format(format!(
                "type name {name:?} starts with reserved segment {first:?}"
            )));
        }
    }
    let well_formed = segments.all(|s| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    });
    if !well_formed {
        return Err(CoreError::invalid_format(format!(
            "invalid type name {name:?}"
        )));
    }
    Ok(())
}

/// The set of application types known to a store.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: BTreeMap<String, TypeDescriptor>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schema from descriptors and checks cross references.
    ///
    /// # Errors
    ///
    /// Returns an error if a descriptor is invalid or refers to an
    /// undeclared type.
    pub fn from_types(types: impl IntoIterator<Item = TypeDescriptor>) -> CoreResult<Self> {
        let mut schema = Self::new();
        for ty in types {
            schema.register(ty)?;
        }
        schema.check()?;
        Ok(schema)
    }

    /// Adds a type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the name or a field is
    /// invalid, or if the type is already registered.
    pub fn register(&mut self, ty: TypeDescriptor) -> CoreResult<()> {
        validate_type_name(&ty.name)?;
        if self.types.contains_key(&ty.name) {
            return Err(CoreError::invalid_format(format!(
                "type {} registered twice",
                ty.name
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for field in &ty.fields {
            if !is_valid_head(&field.name) {
                return Err(CoreError::invalid_format(format!(
                    "invalid field name {:?} in {}",
                    field.name, ty.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(CoreError::invalid_format(format!(
                    "field {} declared twice in {}",
                    field.name, ty.name
                )));
            }
        }
        match &ty.kind {
            TypeKind::Enum(variants) => {
                if !ty.fields.is_empty() {
                    return Err(CoreError::invalid_format(format!(
                        "enum {} cannot declare fields",
                        ty.name
                    )));
                }
                if variants.iter().any(|v| v.is_empty() || v.contains(['{', '}', '\\'])) {
                    return Err(CoreError::invalid_format(format!(
                        "enum {} has an invalid variant",
                        ty.name
                    )));
                }
            }
            TypeKind::Composite if ty.has_unique_fields() => {
                return Err(CoreError::invalid_format(format!(
                    "composite {} cannot declare unique fields",
                    ty.name
                )));
            }
            _ => {}
        }
        self.types.insert(ty.name.clone(), ty);
        Ok(())
    }

    /// Adds a type, builder style.
    ///
    /// # Errors
    ///
    /// See [`Schema::register`].
    pub fn with(mut self, ty: TypeDescriptor) -> CoreResult<Self> {
        self.register(ty)?;
        Ok(self)
    }

    /// Checks that every field type names a declared type of the right kind.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] for a dangling name and
    /// [`CoreError::InvalidFormat`] for a kind mismatch.
    pub fn check(&self) -> CoreResult<()> {
        for ty in self.types.values() {
            for field in &ty.fields {
                let (target, want) = match &field.ty {
                    FieldType::Entity(n) => (n, "entity"),
                    FieldType::Composite(n) => (n, "composite"),
                    FieldType::Enum(n) => (n, "enum"),
                    _ => continue,
                };
                let found = self.require(target)?;
                let ok = match (&found.kind, want) {
                    (TypeKind::Entity, "entity") | (TypeKind::Composite, "composite") => true,
                    (TypeKind::Enum(_), "enum") => true,
                    _ => false,
                };
                if !ok {
                    return Err(CoreError::invalid_format(format!(
                        "{}.{} expects {want} {target}",
                        ty.name, field.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Looks up a type.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.types.get(name)
    }

    /// Looks up a type that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if it does not.
    pub fn require(&self, name: &str) -> CoreResult<&TypeDescriptor> {
        self.types
            .get(name)
            .ok_or_else(|| CoreError::unknown_type(name))
    }

    /// Iterates over all types in name order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    /// Iterates over entity types in name order.
    pub fn entity_types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values().filter(|t| t.is_entity())
    }
}
