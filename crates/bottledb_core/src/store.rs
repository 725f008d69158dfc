//! Store facade.

use crate::bottle::Bottle;
use crate::codec::{Decoder, ObjectCodec, RecordSource};
use crate::config::{Config, LoadMode};
use crate::dictionary::TypeRegistry;
use crate::entity::{Entity, EntityId, Ref};
use crate::error::{CoreError, CoreResult};
use crate::filter::Filter;
use crate::inspect::{IntegrityIssue, IntegrityReport, IssueKind};
use crate::layout::{Layout, BACKUP_SUFFIX};
use crate::lock::{LockKey, LockManager, LockMode, LockStats};
use crate::reader::{LockingReader, TreeReader};
use crate::schema::{Schema, PRIMITIVE_TYPES};
use crate::tracker::{referrers_of, Plan, Planner};
use crate::transaction::{recover, CommitReport, RecoveryReport, TransactionManager, TransactionState};
use crate::unique::UniqueValidator;
use bottledb_codec::StoredRecord;
use bottledb_storage::{FileSystem, LockHandle, MemoryFileSystem, OsFileSystem, StorageError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An open BottleDB store.
///
/// `Store` is the entry point for saving and loading entity graphs. It
/// provides:
/// - Atomic multi-entity saves and deletes with cascade
/// - Unique-field enforcement
/// - Reverse-reference tracking and orphan queries
/// - Recovery of interrupted commits on open
///
/// A store is opened by one handle at a time (the `LOCK` file); the handle
/// is `Send + Sync` and meant to be shared between threads. Transactions
/// on disjoint entities run in parallel.
///
/// # Example
///
/// ```rust,ignore
/// use bottledb_core::{Entity, FieldDescriptor, FieldType, Schema, Store, TypeDescriptor};
/// use std::path::Path;
///
/// let schema = Schema::from_types([TypeDescriptor::entity("app.Note")
///     .field(FieldDescriptor::new("text", FieldType::Str))])?;
/// let store = Store::open(Path::new("notes"), schema)?;
///
/// let note = Entity::new("app.Note").with("text", "hello");
/// let report = store.save(&note)?;
/// let loaded = store.load(&report.root)?;
/// ```
pub struct Store {
    fs: Arc<dyn FileSystem>,
    layout: Layout,
    config: Config,
    schema: Schema,
    registry: TypeRegistry,
    locks: LockManager,
    transactions: TransactionManager,
    recovery: RecoveryReport,
    _lock: Box<dyn LockHandle>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.layout.root())
            .field("types", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens or creates a store in a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another handle has the store open (`StoreLocked`)
    /// - The schema is inconsistent (`UnknownType`, `InvalidFormat`)
    /// - Recovery of an interrupted commit fails (`RollbackFailed`)
    /// - I/O errors occur
    pub fn open(path: &Path, schema: Schema) -> CoreResult<Self> {
        Self::open_with_config(path, schema, Config::default())
    }

    /// Opens a store with custom configuration.
    ///
    /// # Errors
    ///
    /// See [`Store::open`].
    pub fn open_with_config(path: &Path, schema: Schema, config: Config) -> CoreResult<Self> {
        Self::open_with_fs(Arc::new(OsFileSystem::new()), path, schema, config)
    }

    /// Opens a fresh store that lives in memory, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is inconsistent.
    pub fn open_in_memory(schema: Schema) -> CoreResult<Self> {
        Self::open_with_fs(
            Arc::new(MemoryFileSystem::new()),
            Path::new("/bottledb"),
            schema,
            Config::default(),
        )
    }

    /// Opens a store on any [`FileSystem`].
    ///
    /// # Errors
    ///
    /// See [`Store::open`].
    pub fn open_with_fs(
        fs: Arc<dyn FileSystem>,
        root: impl Into<PathBuf>,
        schema: Schema,
        config: Config,
    ) -> CoreResult<Self> {
        let layout = Layout::new(root);
        schema.check()?;

        if !fs.is_dir(layout.root()) {
            if !config.create_if_missing {
                return Err(CoreError::invalid_format(format!(
                    "store {} does not exist and create_if_missing is false",
                    layout.root().display()
                )));
            }
            fs.create_dir_all(layout.root())?;
        }

        let lock = fs.lock_exclusive(&layout.lock_path()).map_err(|e| match e {
            StorageError::Locked(_) => CoreError::StoreLocked,
            other => CoreError::Storage(other),
        })?;

        let recovery = if config.recover_on_open {
            recover(fs.as_ref(), &layout)?
        } else {
            RecoveryReport::default()
        };

        let registry = TypeRegistry::load(Arc::clone(&fs), layout.clone(), config.sync_writes)?;
        let locks = LockManager::new(config.lock_timeout, config.lock_sweep_interval);
        let transactions = TransactionManager::new(Arc::clone(&fs), layout.clone(), config.sync_writes);

        tracing::info!(
            root = %layout.root().display(),
            types = registry.len(),
            schema = schema.types().count(),
            "opened store"
        );

        Ok(Self {
            fs,
            layout,
            config,
            schema,
            registry,
            locks,
            transactions,
            recovery,
            _lock: lock,
        })
    }

    /// The store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.layout.root()
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The schema the store was opened with.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The type registry.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// What recovery did when the store was opened.
    #[must_use]
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Identity lock counters.
    #[must_use]
    pub fn lock_stats(&self) -> LockStats {
        self.locks.stats()
    }

    /// Evicts idle identity locks now; returns how many were evicted.
    pub fn sweep_locks(&self) -> usize {
        self.locks.sweep()
    }

    fn codec(&self) -> ObjectCodec<'_> {
        ObjectCodec::new(&self.schema, &self.registry)
    }

    fn tree(&self) -> TreeReader<'_> {
        TreeReader {
            fs: self.fs.as_ref(),
            layout: &self.layout,
            registry: &self.registry,
        }
    }

    fn reader(&self) -> LockingReader<'_> {
        LockingReader {
            tree: self.tree(),
            locks: &self.locks,
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Saves `root` and every entity reachable from it in one transaction.
    ///
    /// Entities without identity get one. Records of entities the graph no
    /// longer reaches through a cascade field are deleted when nothing else
    /// refers to them.
    ///
    /// # Errors
    ///
    /// Validation errors (`TypeMismatch`, `UnknownField`,
    /// `DuplicateUniqueField`, `MissingRecord`) leave the store untouched.
    /// An I/O error during the commit is returned after rollback;
    /// `RollbackFailed` means rollback failed too. On any error the
    /// identities this save assigned are cleared again.
    pub fn save(&self, root: &Entity) -> CoreResult<CommitReport> {
        let bottle = Bottle::stage(self.codec(), root)?;
        let result = self.run(bottle.root(), Some(&bottle), |planner| planner.plan_save(&bottle));
        if result.is_err() {
            bottle.release_ids();
        }
        result
    }

    /// Encodes the graph of `root` without committing it.
    ///
    /// Entities without identity get one, exactly as [`Store::save`] would
    /// assign it.
    ///
    /// # Errors
    ///
    /// Returns the validation errors of encoding (`TypeMismatch`,
    /// `UnknownField`, `UnknownType`).
    pub fn stage(&self, root: &Entity) -> CoreResult<Bottle> {
        Bottle::stage(self.codec(), root)
    }

    /// Deletes an entity and everything it owns exclusively through cascade
    /// fields.
    ///
    /// # Errors
    ///
    /// `MissingRecord` if the entity does not exist, `StillReferenced` if an
    /// entity outside the deleted set still refers to it.
    pub fn delete(&self, reference: &Ref) -> CoreResult<CommitReport> {
        let root = *reference;
        self.run(root, None, |planner| planner.plan_delete(root))
    }

    /// Plans, locks, validates and commits.
    ///
    /// The plan is first computed without locks to learn which identities it
    /// touches, then recomputed under those locks. If the locked plan needs
    /// more, everything is released and the union is locked, up to
    /// `max_lock_rounds` times.
    fn run(
        &self,
        root: Ref,
        bottle: Option<&Bottle>,
        plan_with: impl Fn(Planner<'_>) -> CoreResult<Plan>,
    ) -> CoreResult<CommitReport> {
        let codec = self.codec();
        let tree = self.tree();
        let mut txn = self.transactions.begin();
        let mut wanted: BTreeMap<LockKey, LockMode> = plan_with(Planner::new(codec, &tree))?.locks;

        let mut round = 1;
        let (plan, held) = loop {
            let held = self.locks.lock_all(wanted.iter().map(|(k, m)| (*k, *m)))?;
            let plan = plan_with(Planner::new(codec, &tree))?;
            if plan.covered_by(&held) {
                break (plan, held);
            }
            drop(held);
            if round >= self.config.max_lock_rounds.max(1) {
                return Err(CoreError::transaction_aborted(format!(
                    "lock set of {root} did not settle after {round} rounds"
                )));
            }
            tracing::debug!(token = %txn.token(), round, "lock set grew, re-planning");
            for (key, mode) in plan.locks {
                let slot = wanted.entry(key).or_insert(mode);
                *slot = (*slot).max(mode);
            }
            round += 1;
        };
        txn.advance(TransactionState::Locked)?;

        if let Some(bottle) = bottle {
            UniqueValidator::new(self.fs.as_ref(), &self.layout, codec, txn.token()).validate(bottle, &plan)?;
        }

        let report = CommitReport {
            id: txn.id(),
            token: txn.token().to_string(),
            root,
            written: plan.full_writes(),
            updated: plan.reference_updates(),
            deleted: plan.deletions.iter().copied().collect(),
        };
        if plan.writes.is_empty() {
            tracing::debug!(token = %txn.token(), "nothing to commit");
            return Ok(report);
        }
        self.transactions.commit(&mut txn, &plan)?;
        drop(held);
        tracing::debug!(
            token = %report.token,
            written = report.written,
            updated = report.updated,
            deleted = report.deleted.len(),
            "commit done"
        );
        Ok(report)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The reference of a stored entity type and identity.
    ///
    /// # Errors
    ///
    /// Returns an error if `type_name` is not an entity type of the schema.
    pub fn reference(&self, type_name: &str, id: EntityId) -> CoreResult<Ref> {
        let codec = self.codec();
        codec.entity_descriptor(type_name)?;
        Ok(Ref::new(codec.tag_of(type_name)?, id))
    }

    /// The reference of an entity handle.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the entity has no identity
    /// yet.
    pub fn reference_of(&self, entity: &Entity) -> CoreResult<Ref> {
        let id = entity
            .id()
            .ok_or_else(|| CoreError::invalid_operation("entity has not been saved"))?;
        self.reference(&entity.type_name(), id)
    }

    /// Loads an entity with the configured [`LoadMode`].
    ///
    /// # Errors
    ///
    /// `MissingRecord` if the entity, or in deep mode anything it reaches,
    /// does not exist.
    pub fn load(&self, reference: &Ref) -> CoreResult<Entity> {
        self.load_with(reference, self.config.load_mode)
    }

    /// Loads an entity with an explicit [`LoadMode`].
    ///
    /// # Errors
    ///
    /// See [`Store::load`].
    pub fn load_with(&self, reference: &Ref, mode: LoadMode) -> CoreResult<Entity> {
        let reader = self.reader();
        Decoder::new(self.codec(), &reader, mode).load(*reference)
    }

    /// Loads an entity by type and identity, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or a reachable record is
    /// missing or corrupt.
    pub fn get(&self, type_name: &str, id: EntityId) -> CoreResult<Option<Entity>> {
        let reference = self.reference(type_name, id)?;
        match self.load(&reference) {
            Ok(entity) => Ok(Some(entity)),
            Err(CoreError::MissingRecord { reference: missing }) if missing == reference.to_string() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether an entity has a live record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read.
    pub fn exists(&self, reference: &Ref) -> CoreResult<bool> {
        Ok(self.live_record(reference)?.is_some())
    }

    fn live_record(&self, reference: &Ref) -> CoreResult<Option<StoredRecord>> {
        Ok(self.reader().read_record(*reference)?.filter(|r| !r.deleted))
    }

    /// Identities of every live entity of a type, in identity order.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or the directory unreadable.
    pub fn ids(&self, type_name: &str) -> CoreResult<Vec<EntityId>> {
        let tag = self.codec().tag_of(type_name)?;
        self.codec().entity_descriptor(type_name)?;
        let mut ids = Vec::new();
        for id in self.stored_ids(type_name)? {
            if self.exists(&Ref::new(tag, id))? {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Identities with a record file or a backup of one.
    fn stored_ids(&self, type_name: &str) -> CoreResult<BTreeSet<EntityId>> {
        Ok(self
            .fs
            .list(&self.layout.type_dir(type_name))?
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .filter_map(|entry| {
                let name = entry.name.strip_suffix(BACKUP_SUFFIX).unwrap_or(&entry.name);
                EntityId::parse(name).ok()
            })
            .collect())
    }

    /// Number of live entities of a type.
    ///
    /// # Errors
    ///
    /// See [`Store::ids`].
    pub fn count(&self, type_name: &str) -> CoreResult<usize> {
        Ok(self.ids(type_name)?.len())
    }

    /// Loads every live entity of a type that matches `filter`.
    ///
    /// Entities are loaded one at a time, each with the configured load
    /// mode. An entity deleted while the scan runs is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is unknown or a record is corrupt.
    pub fn scan(&self, type_name: &str, filter: &dyn Filter) -> CoreResult<Vec<Entity>> {
        let mut found = Vec::new();
        for id in self.ids(type_name)? {
            if let Some(entity) = self.get(type_name, id)? {
                if filter.matches(&entity) {
                    found.push(entity);
                }
            }
        }
        Ok(found)
    }

    /// Entities whose records refer to `reference`.
    ///
    /// # Errors
    ///
    /// `MissingRecord` if the entity does not exist.
    pub fn referrers(&self, reference: &Ref) -> CoreResult<Vec<Ref>> {
        let record = self
            .live_record(reference)?
            .ok_or_else(|| CoreError::missing_record(reference))?;
        Ok(referrers_of(*reference, &record)?.into_iter().collect())
    }

    /// Whether nothing refers to an entity.
    ///
    /// # Errors
    ///
    /// `MissingRecord` if the entity does not exist.
    pub fn is_orphan(&self, reference: &Ref) -> CoreResult<bool> {
        Ok(self.referrers(reference)?.is_empty())
    }

    /// Live entities of a type that nothing refers to.
    ///
    /// # Errors
    ///
    /// See [`Store::ids`].
    pub fn orphans(&self, type_name: &str) -> CoreResult<Vec<Ref>> {
        let tag = self.codec().tag_of(type_name)?;
        let mut orphans = Vec::new();
        for id in self.ids(type_name)? {
            let reference = Ref::new(tag, id);
            match self.is_orphan(&reference) {
                Ok(true) => orphans.push(reference),
                Ok(false) | Err(CoreError::MissingRecord { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(orphans)
    }

    /// The raw stored text of a record, soft-deleted or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read.
    pub fn record_text(&self, reference: &Ref) -> CoreResult<Option<String>> {
        self.reader().record_text(*reference)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Cross-checks every reverse-reference section against the references
    /// the records actually make.
    ///
    /// Records are read one at a time under their read locks; run it on a
    /// quiet store for an exact picture.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be listed or the dictionary is
    /// inconsistent. Unreadable records are reported as issues.
    pub fn verify(&self) -> CoreResult<IntegrityReport> {
        let codec = self.codec();
        let reader = self.reader();
        let mut report = IntegrityReport::default();
        let mut records = BTreeMap::new();

        for (tag, type_name) in self.registry.entries() {
            if PRIMITIVE_TYPES.contains(&type_name.as_str()) {
                continue;
            }
            for id in self.stored_ids(&type_name)? {
                let reference = Ref::new(tag, id);
                match reader.read_record(reference) {
                    Ok(Some(record)) if !record.deleted => {
                        records.insert(reference, record);
                    }
                    Ok(_) => {}
                    Err(e) => report.issues.push(IntegrityIssue {
                        target: reference.to_string(),
                        referrer: None,
                        kind: IssueKind::Unreadable(e.to_string()),
                    }),
                }
            }
        }
        report.records = records.len();

        let mut expected: BTreeMap<Ref, BTreeSet<Ref>> = BTreeMap::new();
        for (&source, record) in &records {
            let edges = match codec.edges(source, &record.capsule) {
                Ok(edges) => edges,
                Err(e) => {
                    report.issues.push(IntegrityIssue {
                        target: source.to_string(),
                        referrer: None,
                        kind: IssueKind::Unreadable(e.to_string()),
                    });
                    continue;
                }
            };
            for target in edges.into_keys() {
                if records.contains_key(&target) {
                    expected.entry(target).or_default().insert(source);
                } else {
                    report.issues.push(IntegrityIssue {
                        target: target.to_string(),
                        referrer: Some(source.to_string()),
                        kind: IssueKind::DanglingReference,
                    });
                }
            }
        }

        for (&target, record) in &records {
            let stored = referrers_of(target, record)?;
            let wanted = expected.remove(&target).unwrap_or_default();
            for referrer in stored.difference(&wanted) {
                let kind = if records.contains_key(referrer) {
                    IssueKind::StaleReference
                } else {
                    IssueKind::MissingReferrer
                };
                report.issues.push(IntegrityIssue {
                    target: target.to_string(),
                    referrer: Some(referrer.to_string()),
                    kind,
                });
            }
            for referrer in wanted.difference(&stored) {
                report.issues.push(IntegrityIssue {
                    target: target.to_string(),
                    referrer: Some(referrer.to_string()),
                    kind: IssueKind::MissingBackReference,
                });
            }
        }

        if report.is_consistent() {
            tracing::debug!(records = report.records, "verify clean");
        } else {
            tracing::warn!(records = report.records, issues = report.issues.len(), "verify found issues");
        }
        Ok(report)
    }
}
