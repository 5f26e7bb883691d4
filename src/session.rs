use crate::archive::archive;
use crate::blob_store::BlobStore;
use crate::ledger::{Ledger, Overlap};
use crate::reconcile::{add_rows, add_to_tracker, apply_edits, EditSet};
use crate::record::{Partition, TrackerRecord};
use crate::store::TrackerStore;
use crate::TrackerError;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One user's view of the tracker.
///
/// Holds the ledger snapshot the user is editing against, the stale row
/// indexes from their last save per partition, and the key for the next
/// batch of hand-entered rows. Every mutation reloads the stored ledger
/// first, applies the change to that copy, saves the touched partitions
/// and then replaces the snapshot. The first write to an empty store saves
/// all three partitions; a store missing only some of them refuses writes.
#[derive(Debug, Clone)]
pub struct Session {
    ledger: Ledger,
    overlaps: Vec<Overlap>,
    missing: Vec<Partition>,
    unwritable: BTreeMap<Partition, Vec<usize>>,
    data_entry_key: String,
}

impl Session {
    pub fn open<S: BlobStore>(store: &TrackerStore<S>) -> Result<Self, TrackerError> {
        let loaded = store.load_ledger()?;
        Ok(Self {
            ledger: loaded.ledger,
            overlaps: loaded.overlaps,
            missing: loaded.missing,
            unwritable: BTreeMap::new(),
            data_entry_key: new_data_entry_key(),
        })
    }

    pub fn refresh<S: BlobStore>(&mut self, store: &TrackerStore<S>) -> Result<(), TrackerError> {
        let loaded = store.load_ledger()?;
        self.ledger = loaded.ledger;
        self.overlaps = loaded.overlaps;
        self.missing = loaded.missing;
        Ok(())
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn rows(&self, partition: Partition) -> &[TrackerRecord] {
        self.ledger.partition(partition)
    }

    pub fn overlaps(&self) -> &[Overlap] {
        &self.overlaps
    }

    /// Partitions that had no stored blob when the snapshot was loaded.
    pub fn missing(&self) -> &[Partition] {
        &self.missing
    }

    /// Indexes rejected as stale by the last save of this partition.
    pub fn unwritable(&self, partition: Partition) -> &[usize] {
        self.unwritable.get(&partition).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn data_entry_key(&self) -> &str {
        &self.data_entry_key
    }

    /// Commit the edits made to `partition` as shown in this session.
    /// Returns the session indexes that were stale and not written.
    pub fn save_edits<S: BlobStore>(
        &mut self,
        store: &TrackerStore<S>,
        partition: Partition,
        edits: &EditSet,
        today: NaiveDate,
    ) -> Result<Vec<usize>, TrackerError> {
        let stored = store.load_ledger_for_update()?;
        let first_run = stored.is_first_run();
        let outcome = apply_edits(stored.ledger, partition, self.rows(partition), edits, today)?;

        let mut touched = BTreeSet::from([partition]);
        if outcome.moved_to_complete > 0 {
            touched.insert(Partition::Complete);
        }
        if outcome.moved_to_exempt > 0 {
            touched.insert(Partition::Exempt);
        }

        let mut ledger = outcome.ledger;
        if !edits.added_rows.is_empty() {
            ledger = add_rows(ledger, &edits.added_rows, today)?;
            touched.insert(Partition::InProgress);
            self.data_entry_key = new_data_entry_key();
        }

        self.persist(store, ledger, touched, first_run)?;
        self.unwritable.insert(partition, outcome.unwritable.clone());
        Ok(outcome.unwritable)
    }

    /// Commit hand-entered rows to InProgress.
    pub fn add_rows<S: BlobStore>(
        &mut self,
        store: &TrackerStore<S>,
        rows: &[BTreeMap<String, Value>],
        today: NaiveDate,
    ) -> Result<usize, TrackerError> {
        let stored = store.load_ledger_for_update()?;
        let first_run = stored.is_first_run();
        let ledger = add_rows(stored.ledger, rows, today)?;
        self.persist(store, ledger, BTreeSet::from([Partition::InProgress]), first_run)?;
        self.data_entry_key = new_data_entry_key();
        Ok(rows.len())
    }

    /// Move selected findings into InProgress; returns the findings left over.
    pub fn add_findings<S: BlobStore>(
        &mut self,
        store: &TrackerStore<S>,
        findings: Vec<TrackerRecord>,
        selected: &[usize],
        today: NaiveDate,
    ) -> Result<Vec<TrackerRecord>, TrackerError> {
        let stored = store.load_ledger_for_update()?;
        let first_run = stored.is_first_run();
        let addition = add_to_tracker(stored.ledger, findings, selected, today)?;
        self.persist(store, addition.ledger, BTreeSet::from([Partition::InProgress]), first_run)?;
        Ok(addition.remaining)
    }

    /// Prune Complete past retention; returns the archived rows.
    pub fn archive<S: BlobStore>(
        &mut self,
        store: &TrackerStore<S>,
        today: NaiveDate,
    ) -> Result<Vec<TrackerRecord>, TrackerError> {
        let stored = store.load_ledger_for_update()?;
        let first_run = stored.is_first_run();
        let mut ledger = stored.ledger;
        let outcome = archive(std::mem::take(&mut ledger.complete), today);
        ledger.complete = outcome.retained;
        self.persist(store, ledger, BTreeSet::from([Partition::Complete]), first_run)?;
        Ok(outcome.archived)
    }

    fn persist<S: BlobStore>(
        &mut self,
        store: &TrackerStore<S>,
        ledger: Ledger,
        touched: BTreeSet<Partition>,
        first_run: bool,
    ) -> Result<(), TrackerError> {
        if first_run {
            store.save_ledger(&ledger)?;
        } else {
            for partition in touched {
                store.save(partition, ledger.partition(partition))?;
            }
        }
        self.ledger = ledger;
        self.missing.clear();
        Ok(())
    }
}

fn new_data_entry_key() -> String {
    uuid::Uuid::new_v4().to_string()
}
