//! Reference tracking and cascade analysis.
//!
//! Every stored record carries its reverse-reference set: the entities
//! whose capsules point at it. A save or delete changes outgoing edges, and
//! the [`Planner`] turns those changes into a [`Plan`]: the exact records to
//! rewrite, the records to delete, and the locks that cover everything the
//! plan was computed from.
//!
//! # Cascade
//!
//! When an edge written under a cascade field disappears, its target becomes
//! a deletion candidate, together with everything it reaches through stored
//! cascade edges. The candidates that survive are those with a live
//! referrer outside the deleted set; dropping a survivor can make others
//! survive too, so candidates are dropped until nothing changes. What
//! remains is deleted. A group of candidates that only reference each other
//! is therefore collected, while anything an outside owner still points at
//! stays, along with everything it keeps alive.

use crate::blob::{Blob, BlobKind};
use crate::bottle::Bottle;
use crate::codec::{Edges, ObjectCodec, RecordSource};
use crate::entity::{EntityId, Ref};
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockKey, LockMode, LockSet};
use bottledb_codec::{RefEntry, StoredRecord};
use std::collections::{BTreeMap, BTreeSet};

/// What happens to one record.
#[derive(Debug, Clone)]
pub(crate) enum WriteKind {
    /// A new version from the bottle; attachment directories are replaced.
    Full(Vec<(BlobKind, Blob)>),
    /// Only the reverse-reference section changes.
    References,
    /// The record is soft-deleted, then purged once the commit is durable.
    Delete,
}

/// One record to write.
#[derive(Debug, Clone)]
pub(crate) struct RecordWrite {
    pub type_name: String,
    pub text: String,
    pub kind: WriteKind,
}

/// Everything a save or delete will change.
#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub writes: BTreeMap<Ref, RecordWrite>,
    pub deletions: BTreeSet<Ref>,
    pub locks: BTreeMap<LockKey, LockMode>,
}

impl Plan {
    /// Whether `held` covers every lock this plan needs.
    pub fn covered_by(&self, held: &LockSet<'_>) -> bool {
        self.locks.iter().all(|(key, mode)| held.covers(*key, *mode))
    }

    fn lock(&mut self, key: LockKey, mode: LockMode) {
        let slot = self.locks.entry(key).or_insert(mode);
        *slot = (*slot).max(mode);
    }

    /// Number of bottle records written.
    pub fn full_writes(&self) -> usize {
        self.writes
            .values()
            .filter(|w| matches!(w.kind, WriteKind::Full(_)))
            .count()
    }

    /// Number of records whose references alone change.
    pub fn reference_updates(&self) -> usize {
        self.writes
            .values()
            .filter(|w| matches!(w.kind, WriteKind::References))
            .count()
    }
}

/// Pending changes to the reverse-reference sets of targets.
#[derive(Debug, Default)]
struct Delta {
    added: BTreeMap<Ref, BTreeSet<Ref>>,
    removed: BTreeMap<Ref, BTreeSet<Ref>>,
}

impl Delta {
    fn add(&mut self, target: Ref, referrer: Ref) {
        self.added.entry(target).or_default().insert(referrer);
    }

    fn remove(&mut self, target: Ref, referrer: Ref) {
        self.removed.entry(target).or_default().insert(referrer);
    }

    fn targets(&self) -> BTreeSet<Ref> {
        self.added.keys().chain(self.removed.keys()).copied().collect()
    }

    fn apply(&self, target: Ref, referrers: &mut BTreeSet<Ref>) {
        if let Some(added) = self.added.get(&target) {
            referrers.extend(added);
        }
        if let Some(removed) = self.removed.get(&target) {
            referrers.retain(|r| !removed.contains(r));
        }
    }
}

fn entry_of(reference: Ref) -> RefEntry {
    RefEntry::new(reference.tag, reference.id.to_string())
}

pub(crate) fn referrers_of(reference: Ref, record: &StoredRecord) -> CoreResult<BTreeSet<Ref>> {
    record
        .references
        .iter()
        .map(|entry| {
            let id = EntityId::parse(&entry.id).map_err(|_| {
                CoreError::corrupt(reference.to_string(), format!("bad reference entry {entry}"))
            })?;
            Ok(Ref::new(entry.tag, id))
        })
        .collect()
}

/// Computes plans from the stored state.
///
/// Every record the planner reads is remembered and read-locked by the
/// resulting plan, so a plan recomputed under its own locks sees the same
/// state it was derived from.
pub(crate) struct Planner<'a> {
    codec: ObjectCodec<'a>,
    source: &'a dyn RecordSource,
    records: BTreeMap<Ref, Option<StoredRecord>>,
    edges: BTreeMap<Ref, Edges>,
}

impl<'a> Planner<'a> {
    pub fn new(codec: ObjectCodec<'a>, source: &'a dyn RecordSource) -> Self {
        Self {
            codec,
            source,
            records: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    /// The live stored record of an entity.
    fn record(&mut self, reference: Ref) -> CoreResult<Option<&StoredRecord>> {
        if !self.records.contains_key(&reference) {
            let record = self
                .source
                .read_record(reference)?
                .filter(|record| !record.deleted);
            self.records.insert(reference, record);
        }
        Ok(self.records.get(&reference).and_then(Option::as_ref))
    }

    /// Outgoing edges of the stored version of an entity.
    fn stored_edges(&mut self, reference: Ref) -> CoreResult<Edges> {
        if let Some(edges) = self.edges.get(&reference) {
            return Ok(edges.clone());
        }
        let edges = match self.record(reference)? {
            Some(record) => {
                let capsule = record.capsule.clone();
                self.codec.edges(reference, &capsule)?
            }
            None => Edges::new(),
        };
        self.edges.insert(reference, edges.clone());
        Ok(edges)
    }

    fn stored_referrers(&mut self, reference: Ref) -> CoreResult<BTreeSet<Ref>> {
        match self.record(reference)? {
            Some(record) => referrers_of(reference, record),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Referrers after `delta`, limited to entities that exist.
    fn live_referrers(
        &mut self,
        target: Ref,
        delta: &Delta,
        bottle: Option<&Bottle>,
    ) -> CoreResult<BTreeSet<Ref>> {
        let mut referrers = self.stored_referrers(target)?;
        delta.apply(target, &mut referrers);
        let mut live = BTreeSet::new();
        for referrer in referrers {
            let staged = bottle.is_some_and(|b| b.contains(&referrer));
            if staged || self.record(referrer)?.is_some() {
                live.insert(referrer);
            }
        }
        Ok(live)
    }

    /// Plans saving a staged graph.
    pub fn plan_save(mut self, bottle: &Bottle) -> CoreResult<Plan> {
        let mut delta = Delta::default();
        let mut seeds = Vec::new();
        for (&reference, staged) in bottle.entries() {
            let old = self.stored_edges(reference)?;
            for target in staged.edges.keys() {
                if !old.contains_key(target) {
                    delta.add(*target, reference);
                }
            }
            for (&target, &cascade) in &old {
                if !staged.edges.contains_key(&target) {
                    delta.remove(target, reference);
                    if cascade {
                        seeds.push(target);
                    }
                }
            }
        }

        let doomed = self.collect(seeds, &BTreeSet::new(), &delta, Some(bottle))?;
        if !doomed.is_empty() {
            tracing::debug!(root = %bottle.root(), count = doomed.len(), "cascade after save");
        }
        self.finish(Some(bottle), &doomed, delta)
    }

    /// Plans deleting `root` and whatever it owns exclusively.
    ///
    /// # Errors
    ///
    /// [`CoreError::MissingRecord`] if `root` has no live record, and
    /// [`CoreError::StillReferenced`] if an entity outside the deleted set
    /// still points at it.
    pub fn plan_delete(mut self, root: Ref) -> CoreResult<Plan> {
        if self.record(root)?.is_none() {
            return Err(CoreError::missing_record(root));
        }
        let roots = BTreeSet::from([root]);
        let seeds = self
            .stored_edges(root)?
            .into_iter()
            .filter_map(|(target, cascade)| cascade.then_some(target))
            .collect();
        let delta = Delta::default();
        let mut doomed = self.collect(seeds, &roots, &delta, None)?;
        doomed.insert(root);

        let outside: Vec<String> = self
            .live_referrers(root, &delta, None)?
            .into_iter()
            .filter(|r| !doomed.contains(r))
            .map(|r| r.to_string())
            .collect();
        if !outside.is_empty() {
            return Err(CoreError::StillReferenced {
                reference: root.to_string(),
                referrers: outside,
            });
        }
        self.finish(None, &doomed, delta)
    }

    /// Cascade candidates reachable from `seeds` that nothing outside the
    /// deleted set keeps alive.
    fn collect(
        &mut self,
        seeds: Vec<Ref>,
        roots: &BTreeSet<Ref>,
        delta: &Delta,
        bottle: Option<&Bottle>,
    ) -> CoreResult<BTreeSet<Ref>> {
        let excluded = |r: &Ref| roots.contains(r) || bottle.is_some_and(|b| b.contains(r));
        let mut candidates = BTreeSet::new();
        let mut frontier: Vec<Ref> = seeds.into_iter().filter(|r| !excluded(r)).collect();
        while let Some(candidate) = frontier.pop() {
            if candidates.contains(&candidate) || self.record(candidate)?.is_none() {
                continue;
            }
            candidates.insert(candidate);
            for (target, cascade) in self.stored_edges(candidate)? {
                if cascade && !excluded(&target) && !candidates.contains(&target) {
                    frontier.push(target);
                }
            }
        }

        loop {
            let mut survivors = Vec::new();
            for &candidate in &candidates {
                let kept_alive = self
                    .live_referrers(candidate, delta, bottle)?
                    .iter()
                    .any(|r| !roots.contains(r) && !candidates.contains(r));
                if kept_alive {
                    survivors.push(candidate);
                }
            }
            if survivors.is_empty() {
                return Ok(candidates);
            }
            for survivor in survivors {
                candidates.remove(&survivor);
            }
        }
    }

    fn finish(
        mut self,
        bottle: Option<&Bottle>,
        doomed: &BTreeSet<Ref>,
        mut delta: Delta,
    ) -> CoreResult<Plan> {
        for &gone in doomed {
            for target in self.stored_edges(gone)?.into_keys() {
                if !doomed.contains(&target) {
                    delta.remove(target, gone);
                }
            }
        }

        let mut plan = Plan::default();
        if let Some(bottle) = bottle {
            for (&reference, staged) in bottle.entries() {
                let old = self.record(reference)?.cloned();
                let mut referrers = match &old {
                    Some(record) => referrers_of(reference, record)?,
                    None => BTreeSet::new(),
                };
                delta.apply(reference, &mut referrers);
                let record = StoredRecord {
                    capsule: staged.capsule.clone(),
                    references: referrers.into_iter().map(entry_of).collect(),
                    deleted: false,
                };
                let unchanged = staged.blobs.is_empty() && old.as_ref() == Some(&record);
                if unchanged {
                    plan.lock(LockKey::Entity(reference), LockMode::Read);
                    continue;
                }
                plan.lock(LockKey::Entity(reference), LockMode::Write);
                if self.codec.entity_descriptor(&staged.type_name)?.has_unique_fields() {
                    plan.lock(LockKey::TypeGate(reference.tag), LockMode::Write);
                }
                plan.writes.insert(
                    reference,
                    RecordWrite {
                        type_name: staged.type_name.clone(),
                        text: record.to_text(),
                        kind: WriteKind::Full(staged.blobs.clone()),
                    },
                );
            }
        }

        for &gone in doomed {
            let Some(record) = self.record(gone)? else {
                continue;
            };
            let mut record = record.clone();
            record.deleted = true;
            let type_name = self.codec.registry.type_of(gone.tag)?;
            plan.lock(LockKey::Entity(gone), LockMode::Write);
            if self.codec.entity_descriptor(&type_name)?.has_unique_fields() {
                plan.lock(LockKey::TypeGate(gone.tag), LockMode::Write);
            }
            plan.writes.insert(
                gone,
                RecordWrite {
                    type_name,
                    text: record.to_text(),
                    kind: WriteKind::Delete,
                },
            );
            plan.deletions.insert(gone);
        }

        for target in delta.targets() {
            if doomed.contains(&target) || bottle.is_some_and(|b| b.contains(&target)) {
                continue;
            }
            let adds = delta.added.get(&target).is_some_and(|a| !a.is_empty());
            let Some(record) = self.record(target)?.cloned() else {
                if adds {
                    return Err(CoreError::missing_record(target));
                }
                // Dangling removal: the target is already gone.
                continue;
            };
            let before = referrers_of(target, &record)?;
            let mut after = before.clone();
            delta.apply(target, &mut after);
            if after == before {
                continue;
            }
            plan.lock(LockKey::Entity(target), LockMode::Write);
            plan.writes.insert(
                target,
                RecordWrite {
                    type_name: self.codec.registry.type_of(target.tag)?,
                    text: StoredRecord {
                        references: after.into_iter().map(entry_of).collect(),
                        ..record
                    }
                    .to_text(),
                    kind: WriteKind::References,
                },
            );
        }

        for &read in self.records.keys() {
            plan.lock(LockKey::Entity(read), LockMode::Read);
        }
        Ok(plan)
    }
}
