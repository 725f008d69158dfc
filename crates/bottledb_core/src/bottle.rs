//! Staging aggregate for one save.
//!
//! A [`Bottle`] holds the new state of every entity reachable from a root:
//! its capsule, the references it makes, and the attachments it carries.
//! It lives for one save and is never persisted.

use crate::blob::{Blob, BlobKind};
use crate::codec::{Edges, EncodedEntity, ObjectCodec, Stager};
use crate::entity::{Entity, EntityId, Ref};
use crate::error::CoreResult;
use bottledb_codec::Capsule;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// The staged new state of one entity.
#[derive(Debug, Clone)]
pub(crate) struct Staged {
    pub entity: Entity,
    pub type_name: String,
    pub capsule: Capsule,
    pub edges: Edges,
    pub blobs: Vec<(BlobKind, Blob)>,
}

/// Every entity reachable from a root, encoded.
#[derive(Debug)]
pub struct Bottle {
    root: Ref,
    entries: BTreeMap<Ref, Staged>,
    assigned: Vec<Entity>,
}

/// Worklist state of [`Bottle::stage`].
struct Walk<'c> {
    codec: ObjectCodec<'c>,
    queued: BTreeSet<Ref>,
    pending: VecDeque<(Ref, Entity)>,
    assigned: Vec<Entity>,
}

impl Stager for Walk<'_> {
    fn stage(&mut self, entity: &Entity) -> CoreResult<Ref> {
        let type_name = entity.type_name();
        self.codec.entity_descriptor(&type_name)?;
        let tag = self.codec.tag_of(&type_name)?;
        let id = match entity.id() {
            Some(id) => id,
            None => {
                let id = EntityId::new();
                entity.assign_id(id)?;
                self.assigned.push(entity.clone());
                id
            }
        };
        let reference = Ref::new(tag, id);
        // The first handle met for an identity is the one that is stored.
        if self.queued.insert(reference) {
            self.pending.push_back((reference, entity.clone()));
        }
        Ok(reference)
    }
}

impl Bottle {
    /// Encodes `root` and every entity reachable from it, each exactly once.
    ///
    /// Entities without identity get one. If staging fails those identities
    /// are cleared again.
    pub(crate) fn stage(codec: ObjectCodec<'_>, root: &Entity) -> CoreResult<Self> {
        let mut walk = Walk {
            codec,
            queued: BTreeSet::new(),
            pending: VecDeque::new(),
            assigned: Vec::new(),
        };
        match Self::fill(&mut walk, root) {
            Ok((root, entries)) => Ok(Self {
                root,
                entries,
                assigned: walk.assigned,
            }),
            Err(e) => {
                for entity in &walk.assigned {
                    entity.clear_id();
                }
                Err(e)
            }
        }
    }

    fn fill(walk: &mut Walk<'_>, root: &Entity) -> CoreResult<(Ref, BTreeMap<Ref, Staged>)> {
        let root = walk.stage(root)?;
        let mut entries = BTreeMap::new();
        while let Some((reference, entity)) = walk.pending.pop_front() {
            let codec = walk.codec;
            let EncodedEntity { capsule, blobs } = codec.encode_entity(&entity, reference.tag, walk)?;
            let edges = codec.edges(reference, &capsule)?;
            entries.insert(
                reference,
                Staged {
                    type_name: entity.type_name(),
                    entity,
                    capsule,
                    edges,
                    blobs,
                },
            );
        }
        Ok((root, entries))
    }

    /// The root entity.
    #[must_use]
    pub fn root(&self) -> Ref {
        self.root
    }

    /// Number of staged entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entity is part of this bottle.
    #[must_use]
    pub fn contains(&self, reference: &Ref) -> bool {
        self.entries.contains_key(reference)
    }

    /// The staged entities in reference order.
    pub fn refs(&self) -> impl Iterator<Item = Ref> + '_ {
        self.entries.keys().copied()
    }

    /// The staged capsule of an entity.
    #[must_use]
    pub fn capsule(&self, reference: &Ref) -> Option<&Capsule> {
        self.entries.get(reference).map(|s| &s.capsule)
    }

    /// Entities of a previous graph that the new graph no longer reaches.
    ///
    /// A convenience for callers diffing two saved graphs. Commits do not
    /// use it; the planner derives orphans from reference-edge deltas.
    #[must_use]
    pub fn excluded(&self, previous: &BTreeSet<Ref>) -> BTreeSet<Ref> {
        previous
            .iter()
            .filter(|r| !self.entries.contains_key(r))
            .copied()
            .collect()
    }

    pub(crate) fn entries(&self) -> &BTreeMap<Ref, Staged> {
        &self.entries
    }

    pub(crate) fn get(&self, reference: &Ref) -> Option<&Staged> {
        self.entries.get(reference)
    }

    /// Forgets the identities this bottle handed out. Used when the save
    /// does not commit.
    pub(crate) fn release_ids(&self) {
        for entity in &self.assigned {
            entity.clear_id();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::TypeRegistry;
    use crate::error::CoreError;
    use crate::layout::Layout;
    use crate::schema::{FieldDescriptor, FieldType, Schema, TypeDescriptor};
    use crate::value::Value;
    use bottledb_storage::MemoryFileSystem;
    use std::sync::Arc;

    fn setup() -> (Schema, TypeRegistry) {
        let schema = Schema::from_types([
            TypeDescriptor::entity("t.Node")
                .field(FieldDescriptor::new("name", FieldType::Str))
                .field(FieldDescriptor::new("next", FieldType::Entity("t.Node".into())).cascade())
                .field(FieldDescriptor::new("all", FieldType::List)),
        ])
        .unwrap();
        let registry =
            TypeRegistry::load(Arc::new(MemoryFileSystem::new()), Layout::new("/db"), false).unwrap();
        (schema, registry)
    }

    #[test]
    fn cycles_are_staged_once() {
        let (schema, registry) = setup();
        let a = Entity::new("t.Node").with("name", "a");
        let b = Entity::new("t.Node").with("name", "b").with("next", a.clone());
        a.set("next", b.clone());
        a.set("all", vec![Value::Entity(a.clone()), Value::Entity(b.clone())]);

        let bottle = Bottle::stage(ObjectCodec::new(&schema, &registry), &a).unwrap();
        assert_eq!(bottle.len(), 2);
        let a_ref = bottle.root();
        let b_ref = Ref::new(a_ref.tag, b.id().unwrap());
        assert_eq!(a_ref.id, a.id().unwrap());
        assert!(bottle.contains(&b_ref));

        // a -> b through a cascade field and a plain list; no self edge.
        let edges = &bottle.get(&a_ref).unwrap().edges;
        assert_eq!(edges.len(), 1);
        assert!(edges[&b_ref]);
        assert!(bottle.get(&b_ref).unwrap().edges[&a_ref]);
    }

    #[test]
    fn failed_staging_clears_new_ids() {
        let (schema, registry) = setup();
        let existing = EntityId::new();
        let kept = Entity::with_id("t.Node", existing);
        let fresh = Entity::new("t.Node").with("name", 5i64);
        let root = Entity::new("t.Node")
            .with("all", vec![Value::Entity(kept.clone()), Value::Entity(fresh.clone())]);

        let err = Bottle::stage(ObjectCodec::new(&schema, &registry), &root).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        assert_eq!(root.id(), None);
        assert_eq!(fresh.id(), None);
        assert_eq!(kept.id(), Some(existing));
    }

    #[test]
    fn first_handle_wins_for_shared_identity() {
        let (schema, registry) = setup();
        let id = EntityId::new();
        let first = Entity::with_id("t.Node", id).with("name", "first");
        let second = Entity::with_id("t.Node", id).with("name", "second");
        let root = Entity::new("t.Node")
            .with("all", vec![Value::Entity(first), Value::Entity(second)]);

        let bottle = Bottle::stage(ObjectCodec::new(&schema, &registry), &root).unwrap();
        assert_eq!(bottle.len(), 2);
        let staged = bottle.get(&Ref::new(bottle.root().tag, id)).unwrap();
        assert_eq!(staged.entity.get("name"), Some(Value::Str("first".into())));
    }

    #[test]
    fn excluded_is_old_minus_new() {
        let (schema, registry) = setup();
        let root = Entity::new("t.Node");
        let bottle = Bottle::stage(ObjectCodec::new(&schema, &registry), &root).unwrap();
        let gone = Ref::new(bottle.root().tag, EntityId::new());
        let previous = BTreeSet::from([bottle.root(), gone]);
        assert_eq!(bottle.excluded(&previous), BTreeSet::from([gone]));

        bottle.release_ids();
        assert_eq!(root.id(), None);
    }

    #[test]
    fn non_entity_root_is_rejected() {
        let (schema, registry) = setup();
        let root = Entity::new("t.Missing");
        assert!(Bottle::stage(ObjectCodec::new(&schema, &registry), &root).is_err());
    }
}
