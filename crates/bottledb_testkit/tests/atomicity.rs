//! Commits interrupted at every pipeline step leave either the old or the
//! new state, never a mix.

use bottledb_core::{
    Blob, Config, CoreError, Entity, Inspector, Journal, JournalEntry, Layout, Ref, Value,
};
use bottledb_testkit::prelude::*;
use std::sync::Arc;

struct Scenario {
    fs: Arc<FaultyFileSystem>,
    store: TestStore,
    order: Entity,
    buyer: Entity,
    kept: Entity,
    dropped: Entity,
    refs: Vec<Ref>,
    before: Vec<Option<String>>,
    files: Vec<String>,
}

impl Scenario {
    fn new() -> Self {
        let fs = FaultyFileSystem::memory("/db");
        let store = TestStore::on(fs.clone(), "/db", shop_schema(), Config::default());
        let buyer = customer("ada@example.com", "Ada");
        let kept = item("kept", 1).with("manual", Value::File(Blob::new("manual.txt", "v1")));
        let dropped = item("dropped", 2);
        let order = order(&buyer, &[kept.clone(), dropped.clone()]);
        store.save(&order).unwrap();

        let refs: Vec<Ref> = [&order, &buyer, &kept, &dropped]
            .iter()
            .map(|e| store.reference_of(e).unwrap())
            .collect();
        let before = refs.iter().map(|r| store.record_text(r).unwrap()).collect();
        let files = durable_files(&store);
        Self {
            fs,
            store,
            order,
            buyer,
            kept,
            dropped,
            refs,
            before,
            files,
        }
    }

    /// Rewrites three records and an attachment, drops one item and adds
    /// another. Returns the added item.
    fn change(&self) -> Entity {
        let added = item("added", 3);
        self.kept
            .set("manual", Value::File(Blob::new("manual.txt", "v2")));
        self.buyer.set("name", "Ada L.");
        self.order.set("note", "changed");
        self.order.set(
            "items",
            vec![Value::Entity(self.kept.clone()), Value::Entity(added.clone())],
        );
        added
    }

    fn assert_unchanged(&self) {
        for (reference, text) in self.refs.iter().zip(&self.before) {
            assert_eq!(&self.store.record_text(reference).unwrap(), text, "{reference}");
        }
        assert_eq!(durable_files(&self.store), self.files);
        assert_eq!(self.store.count(ITEM).unwrap(), 2);
        assert!(self.store.verify().unwrap().is_consistent());
    }

    fn assert_changed(&self) {
        let order = self.store.load(&self.refs[0]).unwrap();
        assert_eq!(order.get("note"), Some(Value::from("changed")));
        let kept = self.store.load(&self.refs[2]).unwrap();
        let manual = kept.get("manual").unwrap();
        assert_eq!(manual.as_blob().unwrap().bytes(), b"v2");
        assert!(!self.store.exists(&self.refs[3]).unwrap());
        assert_eq!(self.store.count(ITEM).unwrap(), 2);
        assert!(self.store.verify().unwrap().is_consistent());
        assert!(leftovers(&self.store).is_empty(), "{:?}", leftovers(&self.store));
    }
}

/// Files that hold committed state.
fn durable_files(store: &TestStore) -> Vec<String> {
    store
        .files()
        .into_iter()
        .filter(|f| f != "dictionary")
        .collect()
}

/// Staging files and backups.
fn leftovers(store: &TestStore) -> Vec<String> {
    store
        .files()
        .into_iter()
        .filter(|f| f.starts_with("temp/") || f.ends_with(".bak") || f.contains(".bak/"))
        .collect()
}

#[test]
fn failed_step_before_commit_point_rolls_back_in_process() {
    for point in CrashPoint::ALL.into_iter().filter(|p| !p.is_after_commit()) {
        let scenario = Scenario::new();
        let added = scenario.change();
        scenario.fs.fail_at(point);

        let err = scenario.store.save(&scenario.order).unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)), "{point:?}: {err}");
        assert_eq!(added.id(), None, "{point:?}: identity kept after failure");
        scenario.assert_unchanged();
        assert!(leftovers(&scenario.store).is_empty(), "{point:?}");

        // The same graph commits once the fault is gone.
        scenario.store.save(&scenario.order).unwrap();
        scenario.assert_changed();
    }
}

#[test]
fn failed_cleanup_keeps_the_commit() {
    let mut scenario = Scenario::new();
    scenario.change();
    scenario.fs.fail_at(CrashPoint::Cleanup);

    scenario.store.save(&scenario.order).unwrap();
    assert!(!leftovers(&scenario.store).is_empty());

    let report = scenario.store.reopen().recovery().clone();
    assert_eq!(report.rolled_forward.len(), 1);
    scenario.assert_changed();
}

#[test]
fn crash_at_every_point_recovers_on_open() {
    for point in CrashPoint::ALL {
        let mut scenario = Scenario::new();
        scenario.change();
        scenario.fs.crash_at(point);

        let result = scenario.store.save(&scenario.order);
        assert!(scenario.fs.has_crashed(), "{point:?} was never reached");
        assert_eq!(result.is_ok(), point.is_after_commit(), "{point:?}");

        scenario.fs.revive();
        let report = scenario.store.reopen().recovery().clone();
        match point {
            CrashPoint::Backup | CrashPoint::Apply | CrashPoint::CommitMark => {
                assert_eq!(report.rolled_back.len(), 1, "{point:?}");
            }
            CrashPoint::Cleanup => assert_eq!(report.rolled_forward.len(), 1),
            CrashPoint::Staging | CrashPoint::Journal => assert!(report.rolled_back.is_empty()),
        }

        if point.is_after_commit() {
            scenario.assert_changed();
        } else {
            scenario.assert_unchanged();
            assert!(leftovers(&scenario.store).is_empty(), "{point:?}");
        }
    }
}

#[test]
fn failed_rollback_keeps_the_journal() {
    let mut scenario = Scenario::new();
    scenario.change();
    scenario.fs.crash_at(CrashPoint::Apply);

    let err = scenario.store.save(&scenario.order).unwrap_err();
    assert!(matches!(err, CoreError::RollbackFailed { .. }), "{err}");

    let inspector = Inspector::open(Arc::clone(scenario.fs.inner()), "/db").unwrap();
    let journals = inspector.journals().unwrap();
    assert_eq!(journals.len(), 1);
    assert!(!journals[0].committed);

    scenario.fs.revive();
    scenario.store.reopen();
    scenario.assert_unchanged();
}

#[test]
fn leftover_journal_is_replayed_on_open() {
    let mut scenario = Scenario::new();
    let fs = Arc::clone(scenario.fs.inner());
    let layout = Layout::new("/db");
    let rel = Layout::record_rel(CUSTOMER, scenario.refs[1].id);

    // An interrupted commit: the customer was moved aside and a new version
    // applied, but `committed` was never written.
    fs.rename(&layout.abs(&rel), &layout.backup_path(&rel)).unwrap();
    fs.write(&layout.abs(&rel), b"{9:half written", false).unwrap();
    let mut journal = Journal::new();
    journal.push(JournalEntry::Backup(rel));
    journal.store(fs.as_ref(), &layout, "42-7-deadbeef", false).unwrap();

    let report = scenario.store.reopen().recovery().clone();
    assert_eq!(report.rolled_back, vec!["42-7-deadbeef".to_string()]);
    scenario.assert_unchanged();
}
