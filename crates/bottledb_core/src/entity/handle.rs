//! In-memory entities, plain composites and references.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::types::TypeTag;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Named-attribute access to an application object.
///
/// The codec never looks at concrete application types; it enumerates and
/// reads attributes through this trait and writes them back on decode.
/// Which attributes exist and how they are typed is described separately by
/// the [`crate::Schema`].
pub trait AttributeAccessor {
    /// Fully-qualified type name of the object.
    fn type_name(&self) -> String;

    /// Names of the attributes that currently hold a value.
    fn attributes(&self) -> Vec<String>;

    /// Returns the value of an attribute, or `None` if it is absent.
    fn get(&self, name: &str) -> Option<Value>;

    /// Sets an attribute; `None` removes it.
    fn set(&mut self, name: &str, value: Option<Value>);
}

/// Identity of a stored entity without its fields.
///
/// Ordering is by type tag, then identity. This is the global order in
/// which identity locks are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ref {
    /// Dictionary index of the entity's type.
    pub tag: TypeTag,
    /// The entity's identity.
    pub id: EntityId,
}

impl Ref {
    /// Creates a reference.
    #[must_use]
    pub const fn new(tag: TypeTag, id: EntityId) -> Self {
        Self { tag, id }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tag, self.id)
    }
}

struct EntityState {
    type_name: String,
    id: Option<EntityId>,
    fields: BTreeMap<String, Value>,
}

/// A shared handle to an in-memory entity.
///
/// Cloning the handle is cheap and yields the same entity; object graphs
/// with sharing and cycles are built by storing handles in fields. Two
/// handles are equal when they are the same instance or when both carry
/// the same type and identity.
///
/// A graph whose handles point at each other in a cycle is only freed once
/// one of the edges is removed.
///
/// # Example
///
/// ```
/// use bottledb_core::Entity;
///
/// let customer = Entity::new("shop.Customer").with("name", "Ada");
/// let order = Entity::new("shop.Order").with("customer", customer.clone());
/// assert_eq!(order.get("customer").and_then(|v| v.as_entity().cloned()), Some(customer));
/// ```
#[derive(Clone)]
pub struct Entity(Arc<RwLock<EntityState>>);

impl Entity {
    /// Creates a new entity without identity.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self::build(type_name.into(), None)
    }

    /// Creates a handle for an entity that already has an identity.
    ///
    /// The identity must have been assigned by a store; saving an entity
    /// with a made-up identity creates a new record under that identity.
    pub fn with_id(type_name: impl Into<String>, id: EntityId) -> Self {
        Self::build(type_name.into(), Some(id))
    }

    fn build(type_name: String, id: Option<EntityId>) -> Self {
        Self(Arc::new(RwLock::new(EntityState {
            type_name,
            id,
            fields: BTreeMap::new(),
        })))
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Returns the type name.
    #[must_use]
    pub fn type_name(&self) -> String {
        self.0.read().type_name.clone()
    }

    /// Returns the identity, if one has been assigned.
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        self.0.read().id
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.0.read().fields.get(field).cloned()
    }

    /// Sets a field, returning the previous value.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Option<Value> {
        self.0.write().fields.insert(field.to_string(), value.into())
    }

    /// Removes a field, returning its value.
    pub fn unset(&self, field: &str) -> Option<Value> {
        self.0.write().fields.remove(field)
    }

    /// Returns the names of the present fields, sorted.
    #[must_use]
    pub fn attributes(&self) -> Vec<String> {
        self.0.read().fields.keys().cloned().collect()
    }

    /// Returns a copy of all present fields.
    #[must_use]
    pub fn fields(&self) -> BTreeMap<String, Value> {
        self.0.read().fields.clone()
    }

    /// Returns true if both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Assigns an identity. Re-assigning the same identity is a no-op.
    pub(crate) fn assign_id(&self, id: EntityId) -> CoreResult<()> {
        let mut state = self.0.write();
        match state.id {
            Some(existing) if existing != id => Err(CoreError::invalid_operation(format!(
                "entity {existing} cannot change identity to {id}"
            ))),
            _ => {
                state.id = Some(id);
                Ok(())
            }
        }
    }

    /// Forgets an identity assigned by a save that did not commit.
    pub(crate) fn clear_id(&self) {
        self.0.write().id = None;
    }

    pub(crate) fn replace_fields(&self, fields: BTreeMap<String, Value>) {
        self.0.write().fields = fields;
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let (a, b) = (self.0.read(), other.0.read());
        match (a.id, b.id) {
            (Some(x), Some(y)) => x == y && a.type_name == b.type_name,
            _ => false,
        }
    }
}

impl fmt::Debug for Entity {
    // Fields are left out: they may point back at this entity.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Some(state) => f
                .debug_struct("Entity")
                .field("type_name", &state.type_name)
                .field("id", &state.id)
                .field("fields", &state.fields.len())
                .finish(),
            None => f.write_str("Entity(<locked>)"),
        }
    }
}

impl AttributeAccessor for Entity {
    fn type_name(&self) -> String {
        Entity::type_name(self)
    }

    fn attributes(&self) -> Vec<String> {
        Entity::attributes(self)
    }

    fn get(&self, name: &str) -> Option<Value> {
        Entity::get(self, name)
    }

    fn set(&mut self, name: &str, value: Option<Value>) {
        match value {
            Some(v) => {
                Entity::set(self, name, v);
            }
            None => {
                self.unset(name);
            }
        }
    }
}

/// A plain composite value: a typed bag of fields without identity.
///
/// Composites are stored inline inside the capsule of the entity that
/// holds them.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    type_name: String,
    fields: BTreeMap<String, Value>,
}

impl Object {
    /// Creates an empty composite.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    /// Returns the type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, field: &str, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.to_string(), value.into())
    }

    /// Iterates over the present fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

impl AttributeAccessor for Object {
    fn type_name(&self) -> String {
        self.type_name.clone()
    }

    fn attributes(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Option<Value>) {
        match value {
            Some(v) => {
                self.fields.insert(name.to_string(), v);
            }
            None => {
                self.fields.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_share_state() {
        let a = Entity::new("t.A");
        let b = a.clone();
        b.set("x", 1i64);
        assert_eq!(a.get("x"), Some(Value::Int(1)));
        assert!(a.ptr_eq(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn equality_by_identity() {
        let id = EntityId::new();
        let a = Entity::with_id("t.A", id).with("x", 1i64);
        let b = Entity::with_id("t.A", id).with("x", 2i64);
        let c = Entity::with_id("t.B", id);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(Entity::new("t.A"), Entity::new("t.A"));
    }

    #[test]
    fn identity_is_immutable() {
        let e = Entity::new("t.A");
        let id = EntityId::new();
        e.assign_id(id).unwrap();
        e.assign_id(id).unwrap();
        assert!(e.assign_id(EntityId::new()).is_err());
        assert_eq!(e.id(), Some(id));
    }

    #[test]
    fn debug_does_not_recurse() {
        let a = Entity::new("t.A");
        a.set("me", a.clone());
        let text = format!("{a:?}");
        assert!(text.contains("t.A"));
    }

    #[test]
    fn accessor_set_none_removes() {
        let mut o = Object::new("t.C").with("x", "v");
        AttributeAccessor::set(&mut o, "x", None);
        assert!(AttributeAccessor::attributes(&o).is_empty());

        let mut e = Entity::new("t.A");
        AttributeAccessor::set(&mut e, "y", Some(Value::Bool(true)));
        assert_eq!(AttributeAccessor::attributes(&e), vec!["y".to_string()]);
    }

    #[test]
    fn refs_order_by_tag_then_id() {
        let lo = EntityId::from_bytes([0; 16]);
        let hi = EntityId::from_bytes([9; 16]);
        let mut refs = vec![Ref::new(2, lo), Ref::new(1, hi), Ref::new(1, lo)];
        refs.sort();
        assert_eq!(refs, vec![Ref::new(1, lo), Ref::new(1, hi), Ref::new(2, lo)]);
    }
}
