//! Unique-field validation.
//!
//! Field capsules are decoded shallowly and compared as [`Value`]s, so
//! numbers compare numerically (`0.0` equals `-0.0`, `NaN` equals nothing)
//! and entity references compare by identity. Attachments are never read;
//! they compare by file name or content hash.

use crate::blob::BlobKind;
use crate::bottle::Bottle;
use crate::codec::{field_value, Decoder, ObjectCodec, RecordSource};
use crate::config::LoadMode;
use crate::entity::{EntityId, Ref};
use crate::error::{CoreError, CoreResult};
use crate::layout::{Layout, BACKUP_SUFFIX};
use crate::reader::parse_record;
use crate::schema::type_path;
use crate::tracker::{Plan, WriteKind};
use crate::types::TypeTag;
use crate::value::Value;
use bottledb_codec::{Capsule, StoredRecord};
use bottledb_storage::FileSystem;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A unique value being written: owner, field name and decoded value.
struct Claim<'b> {
    owner: Ref,
    field: &'b str,
    value: Value,
}

/// Answers no record and an empty body for every attachment.
struct Detached;

impl RecordSource for Detached {
    fn read_record(&self, _: Ref) -> CoreResult<Option<StoredRecord>> {
        Ok(None)
    }

    fn read_blob(&self, _: BlobKind, _: EntityId, _: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(Some(Vec::new()))
    }
}

/// Checks unique fields of a plan against the store, the bottle itself and
/// the staging areas of other transactions.
pub(crate) struct UniqueValidator<'a> {
    fs: &'a dyn FileSystem,
    layout: &'a Layout,
    codec: ObjectCodec<'a>,
    token: &'a str,
}

impl<'a> UniqueValidator<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        layout: &'a Layout,
        codec: ObjectCodec<'a>,
        token: &'a str,
    ) -> Self {
        Self {
            fs,
            layout,
            codec,
            token,
        }
    }

    /// # Errors
    ///
    /// [`CoreError::DuplicateUniqueField`] naming the first collision.
    pub fn validate(&self, bottle: &Bottle, plan: &Plan) -> CoreResult<()> {
        let mut claims: BTreeMap<(TypeTag, String), Vec<Claim<'_>>> = BTreeMap::new();
        for (reference, write) in &plan.writes {
            if !matches!(write.kind, WriteKind::Full(_)) {
                continue;
            }
            let Some(capsule) = bottle.capsule(reference) else {
                continue;
            };
            let descriptor = self.codec.entity_descriptor(&write.type_name)?;
            for field in descriptor.unique_fields() {
                if let Some(value) = self.field(capsule, &field.name, reference.id)? {
                    claims
                        .entry((reference.tag, write.type_name.clone()))
                        .or_default()
                        .push(Claim {
                            owner: *reference,
                            field: &field.name,
                            value,
                        });
                }
            }
        }

        let skip: BTreeSet<Ref> = bottle.refs().chain(plan.deletions.iter().copied()).collect();
        for ((tag, type_name), claims) in &claims {
            self.check_bottle(bottle, *tag, type_name, claims)?;
            self.check_production(*tag, type_name, claims, &skip)?;
            self.check_staging(*tag, type_name, claims, &skip)?;
        }
        Ok(())
    }

    /// Claims against the other new versions in the same bottle.
    fn check_bottle(
        &self,
        bottle: &Bottle,
        tag: TypeTag,
        type_name: &str,
        claims: &[Claim<'_>],
    ) -> CoreResult<()> {
        for reference in bottle.refs().filter(|r| r.tag == tag) {
            let Some(capsule) = bottle.capsule(&reference) else {
                continue;
            };
            self.check(type_name, reference.id, capsule, claims)?;
        }
        Ok(())
    }

    /// Claims against stored siblings. A sibling whose record is backed up
    /// by an in-flight commit is read from its backup.
    fn check_production(
        &self,
        tag: TypeTag,
        type_name: &str,
        claims: &[Claim<'_>],
        skip: &BTreeSet<Ref>,
    ) -> CoreResult<()> {
        let dir = self.layout.type_dir(type_name);
        let entries = self.fs.list(&dir)?;
        let names: BTreeSet<&str> = entries.iter().filter(|e| !e.is_dir).map(|e| e.name.as_str()).collect();
        for name in &names {
            let (id_text, backup) = match name.strip_suffix(BACKUP_SUFFIX) {
                Some(id_text) if names.contains(id_text) => continue,
                Some(id_text) => (id_text, true),
                None => (*name, false),
            };
            let Ok(id) = EntityId::parse(id_text) else {
                continue;
            };
            if skip.contains(&Ref::new(tag, id)) {
                continue;
            }
            let path = dir.join(name);
            if let Some(record) = self.read(&path)? {
                if backup {
                    tracing::trace!(%id, "unique check reads backup");
                }
                self.check(type_name, id, &record.capsule, claims)?;
            }
        }
        Ok(())
    }

    /// Claims against versions other transactions have staged but not yet
    /// applied.
    fn check_staging(
        &self,
        tag: TypeTag,
        type_name: &str,
        claims: &[Claim<'_>],
        skip: &BTreeSet<Ref>,
    ) -> CoreResult<()> {
        let temp_root = self.layout.temp_root();
        for other in self.fs.list(&temp_root)? {
            if !other.is_dir || other.name == self.token {
                continue;
            }
            let dir = self.layout.staged(&other.name, &type_path(type_name));
            for entry in self.fs.list(&dir)? {
                let Ok(id) = EntityId::parse(&entry.name) else {
                    continue;
                };
                if entry.is_dir || skip.contains(&Ref::new(tag, id)) {
                    continue;
                }
                if let Some(record) = self.read(&dir.join(&entry.name))? {
                    self.check(type_name, id, &record.capsule, claims)?;
                }
            }
        }
        Ok(())
    }

    /// A live record at `path`.
    fn read(&self, path: &Path) -> CoreResult<Option<StoredRecord>> {
        let Some(bytes) = self.fs.read(path)? else {
            return Ok(None);
        };
        let record = parse_record(path, bytes)?;
        Ok((!record.deleted).then_some(record))
    }

    /// Decodes field `name` of an entity capsule, `None` if it is absent.
    fn field(&self, capsule: &Capsule, name: &str, owner: EntityId) -> CoreResult<Option<Value>> {
        let Some(field) = capsule.child(name) else {
            return Ok(None);
        };
        let location = format!("{}:{owner}", capsule.head);
        let mut decoder = Decoder::new(self.codec, &Detached, LoadMode::Shallow);
        decoder
            .value(field_value(field, &location)?, owner, &location)
            .map(Some)
    }

    fn check(&self, type_name: &str, id: EntityId, capsule: &Capsule, claims: &[Claim<'_>]) -> CoreResult<()> {
        for claim in claims {
            if claim.owner.id == id {
                continue;
            }
            if self.field(capsule, claim.field, id)?.as_ref() == Some(&claim.value) {
                return Err(CoreError::DuplicateUniqueField {
                    type_name: type_name.to_string(),
                    field: claim.field.to_string(),
                    conflicting_id: id.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RecordSource;
    use crate::dictionary::TypeRegistry;
    use crate::entity::Entity;
    use crate::schema::{FieldDescriptor, FieldType, Schema, TypeDescriptor};
    use crate::tracker::Planner;
    use bottledb_storage::MemoryFileSystem;
    use std::sync::Arc;

    struct Nothing;

    impl RecordSource for Nothing {
        fn read_record(&self, _: Ref) -> CoreResult<Option<StoredRecord>> {
            Ok(None)
        }

        fn read_blob(
            &self,
            _: crate::blob::BlobKind,
            _: EntityId,
            _: &str,
        ) -> CoreResult<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    struct Fixture {
        fs: Arc<MemoryFileSystem>,
        layout: Layout,
        schema: Schema,
        registry: TypeRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let fs = Arc::new(MemoryFileSystem::new());
            let layout = Layout::new("/db");
            let schema = Schema::from_types([
                TypeDescriptor::entity("t.User")
                    .field(FieldDescriptor::new("email", FieldType::Str).unique())
                    .field(FieldDescriptor::new("name", FieldType::Str))
                    .field(FieldDescriptor::new("friend", FieldType::Entity("t.User".into()))),
                TypeDescriptor::entity("t.Point").field(FieldDescriptor::new("x", FieldType::Float).unique()),
            ])
            .unwrap();
            let registry = TypeRegistry::load(fs.clone(), layout.clone(), false).unwrap();
            Self {
                fs,
                layout,
                schema,
                registry,
            }
        }

        fn codec(&self) -> ObjectCodec<'_> {
            ObjectCodec::new(&self.schema, &self.registry)
        }

        /// Writes the staged version of `entity` under `base` as if committed.
        fn store_at(&self, entity: &Entity, token: Option<&str>, suffix: &str) {
            let bottle = Bottle::stage(self.codec(), entity).unwrap();
            let plan = Planner::new(self.codec(), &Nothing).plan_save(&bottle).unwrap();
            for (reference, write) in &plan.writes {
                let rel = format!("{}{suffix}", Layout::record_rel(&write.type_name, reference.id));
                let path = match token {
                    Some(token) => self.layout.staged(token, &rel),
                    None => self.layout.abs(&rel),
                };
                self.fs.write(&path, write.text.as_bytes(), false).unwrap();
            }
        }

        fn validate(&self, entity: &Entity) -> CoreResult<()> {
            let bottle = Bottle::stage(self.codec(), entity)?;
            let plan = Planner::new(self.codec(), &Nothing).plan_save(&bottle)?;
            UniqueValidator::new(self.fs.as_ref(), &self.layout, self.codec(), "mine")
                .validate(&bottle, &plan)
        }
    }

    fn user(email: &str) -> Entity {
        Entity::new("t.User").with("email", email).with("name", "n")
    }

    #[test]
    fn collision_with_stored_sibling() {
        let fx = Fixture::new();
        let stored = user("a@x");
        fx.store_at(&stored, None, "");

        let err = fx.validate(&user("a@x")).unwrap_err();
        match err {
            CoreError::DuplicateUniqueField { field, conflicting_id, .. } => {
                assert_eq!(field, "email");
                assert_eq!(conflicting_id, stored.id().unwrap().to_string());
            }
            other => panic!("unexpected {other:?}"),
        }
        fx.validate(&user("b@x")).unwrap();
        // The stored entity itself may be re-saved unchanged.
        fx.validate(&stored).unwrap();
    }

    #[test]
    fn absent_unique_fields_never_collide() {
        let fx = Fixture::new();
        fx.store_at(&Entity::new("t.User").with("name", "a"), None, "");
        fx.validate(&Entity::new("t.User").with("name", "a")).unwrap();
    }

    #[test]
    fn collision_inside_one_bottle() {
        let fx = Fixture::new();
        let root = user("same").with("friend", user("same"));
        assert!(matches!(
            fx.validate(&root),
            Err(CoreError::DuplicateUniqueField { .. })
        ));
    }

    #[test]
    fn collision_with_other_staging_area_and_backups() {
        let fx = Fixture::new();
        fx.store_at(&user("staged@x"), Some("other"), "");
        fx.store_at(&user("backed@x"), None, BACKUP_SUFFIX);

        assert!(fx.validate(&user("staged@x")).is_err());
        assert!(fx.validate(&user("backed@x")).is_err());
        fx.validate(&user("free@x")).unwrap();
    }

    #[test]
    fn floats_collide_by_value_not_by_text() {
        let fx = Fixture::new();
        fx.store_at(&Entity::new("t.Point").with("x", 0.0), None, "");
        fx.store_at(&Entity::new("t.Point").with("x", f64::NAN), None, "");

        assert!(matches!(
            fx.validate(&Entity::new("t.Point").with("x", -0.0)),
            Err(CoreError::DuplicateUniqueField { ref field, .. }) if field == "x"
        ));
        fx.validate(&Entity::new("t.Point").with("x", f64::NAN)).unwrap();
        fx.validate(&Entity::new("t.Point").with("x", 1.5)).unwrap();
    }

    #[test]
    fn references_collide_by_identity() {
        let fx = Fixture::new();
        let schema = Schema::from_types([
            TypeDescriptor::entity("t.User")
                .field(FieldDescriptor::new("name", FieldType::Str))
                .field(FieldDescriptor::new("friend", FieldType::Entity("t.User".into())).unique()),
        ])
        .unwrap();
        let codec = ObjectCodec::new(&schema, &fx.registry);
        let friend = Entity::new("t.User").with("name", "f");
        let stored = Entity::new("t.User").with("name", "a").with("friend", friend.clone());
        let bottle = Bottle::stage(codec, &stored).unwrap();
        let plan = Planner::new(codec, &Nothing).plan_save(&bottle).unwrap();
        for (reference, write) in &plan.writes {
            let path = fx.layout.abs(&Layout::record_rel(&write.type_name, reference.id));
            fx.fs.write(&path, write.text.as_bytes(), false).unwrap();
        }

        let validate = |entity: &Entity| -> CoreResult<()> {
            let bottle = Bottle::stage(codec, entity)?;
            let plan = Planner::new(codec, &Nothing).plan_save(&bottle)?;
            UniqueValidator::new(fx.fs.as_ref(), &fx.layout, codec, "mine").validate(&bottle, &plan)
        };
        let twin = Entity::new("t.User").with("name", "f");
        validate(&Entity::new("t.User").with("name", "b").with("friend", twin)).unwrap();
        assert!(validate(&Entity::new("t.User").with("name", "c").with("friend", friend)).is_err());
    }

    #[test]
    fn soft_deleted_siblings_are_ignored() {
        let fx = Fixture::new();
        let gone = user("gone@x");
        fx.store_at(&gone, None, "");
        let path = fx.layout.abs(&Layout::record_rel("t.User", gone.id().unwrap()));
        let mut text = String::from_utf8(fx.fs.read(&path).unwrap().unwrap()).unwrap();
        text.push_str(bottledb_codec::DELETED_MARKER);
        fx.fs.write(&path, text.as_bytes(), false).unwrap();

        fx.validate(&user("gone@x")).unwrap();
    }
}
