//! Typed collections on top of the dynamic entity API.

use crate::entity::{Entity, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::filter::{All, Filter};
use crate::schema::TypeDescriptor;
use crate::store::Store;
use crate::transaction::CommitReport;
use std::marker::PhantomData;

/// A Rust type stored as one entity type.
///
/// Implementations convert between the application struct and an
/// [`Entity`]. Nested entities are converted by the implementation too,
/// so a `Persist` type can own a whole graph.
///
/// # Example
///
/// ```rust,ignore
/// struct Note { id: Option<EntityId>, text: String }
///
/// impl Persist for Note {
///     const TYPE_NAME: &'static str = "app.Note";
///
///     fn descriptor() -> TypeDescriptor {
///         TypeDescriptor::entity(Self::TYPE_NAME)
///             .field(FieldDescriptor::new("text", FieldType::Str))
///     }
///
///     fn to_entity(&self) -> Entity {
///         let entity = match self.id {
///             Some(id) => Entity::with_id(Self::TYPE_NAME, id),
///             None => Entity::new(Self::TYPE_NAME),
///         };
///         entity.with("text", self.text.as_str())
///     }
///
///     fn from_entity(entity: &Entity) -> CoreResult<Self> {
///         let text = entity.get("text").and_then(|v| v.as_str().map(String::from));
///         Ok(Self { id: entity.id(), text: text.unwrap_or_default() })
///     }
/// }
/// ```
pub trait Persist: Sized {
    /// The entity type name.
    const TYPE_NAME: &'static str;

    /// The schema entry of the type.
    fn descriptor() -> TypeDescriptor;

    /// Builds the entity to save. Carry the identity of a previously saved
    /// value so saving it again updates the same record.
    fn to_entity(&self) -> Entity;

    /// Rebuilds a value from a loaded entity.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is absent or has the wrong
    /// kind.
    fn from_entity(entity: &Entity) -> CoreResult<Self>;
}

/// A typed view of all entities of one [`Persist`] type.
///
/// Filtering is plain Rust over loaded values, or a [`Filter`] over the
/// entities before conversion.
pub struct Collection<'s, T> {
    store: &'s Store,
    _marker: PhantomData<fn() -> T>,
}

impl<'s, T: Persist> Collection<'s, T> {
    /// Creates the collection.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if the store schema does not
    /// declare `T::TYPE_NAME`, and [`CoreError::InvalidFormat`] if it
    /// declares it differently from `T::descriptor()`.
    pub fn new(store: &'s Store) -> CoreResult<Self> {
        let declared = store.schema().require(T::TYPE_NAME)?;
        if *declared != T::descriptor() {
            return Err(CoreError::invalid_format(format!(
                "schema entry of {} differs from its Persist descriptor",
                T::TYPE_NAME
            )));
        }
        Ok(Self {
            store,
            _marker: PhantomData,
        })
    }

    /// The type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        T::TYPE_NAME
    }

    /// Saves a value and returns its identity.
    ///
    /// # Errors
    ///
    /// See [`Store::save`].
    pub fn save(&self, value: &T) -> CoreResult<EntityId> {
        let entity = value.to_entity();
        self.store.save(&entity)?;
        entity
            .id()
            .ok_or_else(|| CoreError::invalid_operation("saved entity has no identity"))
    }

    /// Loads a value, `None` if there is none with that identity.
    ///
    /// # Errors
    ///
    /// See [`Store::get`].
    pub fn load(&self, id: EntityId) -> CoreResult<Option<T>> {
        self.store
            .get(T::TYPE_NAME, id)?
            .map(|entity| T::from_entity(&entity))
            .transpose()
    }

    /// Deletes a value and whatever it owns.
    ///
    /// # Errors
    ///
    /// See [`Store::delete`].
    pub fn delete(&self, id: EntityId) -> CoreResult<CommitReport> {
        let reference = self.store.reference(T::TYPE_NAME, id)?;
        self.store.delete(&reference)
    }

    /// Loads every value. This is a full scan.
    ///
    /// # Errors
    ///
    /// See [`Store::scan`].
    pub fn scan_all(&self) -> CoreResult<Vec<T>> {
        self.scan(&All)
    }

    /// Loads the values whose entities match `filter`.
    ///
    /// # Errors
    ///
    /// See [`Store::scan`].
    pub fn scan(&self, filter: &dyn Filter) -> CoreResult<Vec<T>> {
        self.store
            .scan(T::TYPE_NAME, filter)?
            .iter()
            .map(T::from_entity)
            .collect()
    }

    /// Number of stored values.
    ///
    /// # Errors
    ///
    /// See [`Store::count`].
    pub fn count(&self) -> CoreResult<usize> {
        self.store.count(T::TYPE_NAME)
    }
}

impl Store {
    /// A typed collection of `T`.
    ///
    /// # Errors
    ///
    /// See [`Collection::new`].
    pub fn collection<T: Persist>(&self) -> CoreResult<Collection<'_, T>> {
        Collection::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Predicate;
    use crate::schema::{FieldDescriptor, FieldType, Schema};

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: Option<EntityId>,
        text: String,
        stars: i64,
    }

    impl Persist for Note {
        const TYPE_NAME: &'static str = "app.Note";

        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::entity(Self::TYPE_NAME)
                .field(FieldDescriptor::new("text", FieldType::Str))
                .field(FieldDescriptor::new("stars", FieldType::Int))
        }

        fn to_entity(&self) -> Entity {
            let entity = match self.id {
                Some(id) => Entity::with_id(Self::TYPE_NAME, id),
                None => Entity::new(Self::TYPE_NAME),
            };
            entity.with("text", self.text.as_str()).with("stars", self.stars)
        }

        fn from_entity(entity: &Entity) -> CoreResult<Self> {
            let text = entity
                .get("text")
                .and_then(|v| v.as_str().map(String::from))
                .ok_or_else(|| CoreError::invalid_operation("note without text"))?;
            Ok(Self {
                id: entity.id(),
                text,
                stars: entity.get("stars").and_then(|v| v.as_int()).unwrap_or(0),
            })
        }
    }

    fn note(text: &str, stars: i64) -> Note {
        Note {
            id: None,
            text: text.into(),
            stars,
        }
    }

    #[test]
    fn typed_round_trip() {
        let store = Store::open_in_memory(Schema::from_types([Note::descriptor()]).unwrap()).unwrap();
        let notes = store.collection::<Note>().unwrap();

        let id = notes.save(&note("hello", 3)).unwrap();
        notes.save(&note("other", 5)).unwrap();
        assert_eq!(notes.count().unwrap(), 2);

        let mut loaded = notes.load(id).unwrap().unwrap();
        assert_eq!(loaded.text, "hello");
        loaded.stars = 4;
        assert_eq!(notes.save(&loaded).unwrap(), id);
        assert_eq!(notes.load(id).unwrap().unwrap().stars, 4);

        let starred = notes.scan(&Predicate::ge("stars", 5i64)).unwrap();
        assert_eq!(starred.len(), 1);
        assert_eq!(notes.scan_all().unwrap().len(), 2);

        notes.delete(id).unwrap();
        assert_eq!(notes.load(id).unwrap(), None);
    }

    #[test]
    fn mismatched_descriptor_is_rejected() {
        let schema = Schema::from_types([TypeDescriptor::entity("app.Note")]).unwrap();
        let store = Store::open_in_memory(schema).unwrap();
        assert!(store.collection::<Note>().is_err());
    }
}
