use crate::blob_store::BlobStore;
use crate::config::Environment;
use crate::ledger::{Ledger, Overlap};
use crate::record::{Partition, RowKey, TrackerRecord};
use crate::TrackerError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct TableOut<'a> {
    version: u32,
    partition: Partition,
    rows: &'a [TrackerRecord],
}

/// Stored table shapes: the versioned envelope, or a bare row array as
/// exported from older trackers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TableIn {
    Envelope {
        version: u32,
        partition: Option<Partition>,
        rows: Vec<TrackerRecord>,
    },
    Rows(Vec<TrackerRecord>),
}

/// A loaded ledger plus any cross-partition overlaps found while loading.
#[derive(Debug, Clone, Default)]
pub struct LoadedLedger {
    pub ledger: Ledger,
    pub overlaps: Vec<Overlap>,
    /// Partitions with no stored blob, loaded as empty.
    pub missing: Vec<Partition>,
}

impl LoadedLedger {
    /// No partition has ever been saved.
    pub fn is_first_run(&self) -> bool {
        self.missing.len() == Partition::ALL.len()
    }

    /// Some partitions are stored and others are not.
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty() && !self.is_first_run()
    }
}

/// Durable home of the three tracker partitions.
pub struct TrackerStore<S: BlobStore> {
    blobs: S,
    prefix: String,
}

impl<S: BlobStore> TrackerStore<S> {
    pub fn new(blobs: S, prefix: impl Into<String>) -> Self {
        Self {
            blobs,
            prefix: prefix.into(),
        }
    }

    pub fn for_environment(blobs: S, environment: Environment) -> Self {
        Self::new(blobs, environment.prefix())
    }

    pub fn blobs(&self) -> &S {
        &self.blobs
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, partition: Partition) -> String {
        format!("{}/CostTracker_{}.json", self.prefix, partition.blob_name())
    }

    pub fn load(&self, partition: Partition) -> Result<Vec<TrackerRecord>, TrackerError> {
        let key = self.key(partition);
        let bytes = self.blobs.get(&key)?;
        let mut rows = match serde_json::from_slice::<TableIn>(&bytes)? {
            TableIn::Envelope {
                version,
                partition: stored,
                rows,
            } => {
                if version > FORMAT_VERSION {
                    return Err(TrackerError::Storage(format!(
                        "{} has format version {}, newest supported is {}",
                        key, version, FORMAT_VERSION
                    )));
                }
                if let Some(stored) = stored.filter(|s| *s != partition) {
                    warn!("[costtrack:store] {} is labelled {}, loading as {}", key, stored, partition);
                }
                rows
            }
            TableIn::Rows(rows) => rows,
        };

        for (position, row) in rows.iter_mut().enumerate() {
            if row.row_key.is_none() {
                row.row_key = Some(RowKey::derived(partition, position, row));
            }
        }
        Ok(rows)
    }

    /// Load a partition, treating an absent blob as the first run.
    pub fn load_or_empty(&self, partition: Partition) -> Result<Vec<TrackerRecord>, TrackerError> {
        match self.load(partition) {
            Ok(rows) => Ok(rows),
            Err(TrackerError::NotFound(key)) => {
                info!("[costtrack:store] {} not found, starting {} empty", key, partition);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the whole partition.
    pub fn save(&self, partition: Partition, records: &[TrackerRecord]) -> Result<(), TrackerError> {
        let key = self.key(partition);
        let table = TableOut {
            version: FORMAT_VERSION,
            partition,
            rows: records,
        };
        let bytes = serde_json::to_vec(&table)?;
        self.blobs.put(&key, bytes)?;
        info!("[costtrack:store] saved {} rows to {}", records.len(), key);
        Ok(())
    }

    /// Load all three partitions.
    ///
    /// A store with no partitions at all is the first run. A store missing
    /// only some partitions still loads, with the gaps reported in `missing`
    /// and logged as warnings.
    pub fn load_ledger(&self) -> Result<LoadedLedger, TrackerError> {
        let mut ledger = Ledger::default();
        let mut missing = Vec::new();
        for partition in Partition::ALL {
            match self.load(partition) {
                Ok(rows) => *ledger.partition_mut(partition) = rows,
                Err(TrackerError::NotFound(_)) => missing.push(partition),
                Err(e) => return Err(e),
            }
        }

        let overlaps = ledger.validate_disjoint();
        for overlap in &overlaps {
            warn!("[costtrack:store] partition overlap: {}", overlap);
        }
        let loaded = LoadedLedger {
            ledger,
            overlaps,
            missing,
        };
        if loaded.is_first_run() {
            info!("[costtrack:store] no partitions under {}, starting empty", self.prefix);
        } else {
            for partition in &loaded.missing {
                warn!(
                    "[costtrack:store] {} is missing while other partitions exist, loading it empty",
                    self.key(*partition)
                );
            }
        }
        Ok(loaded)
    }

    /// Load the ledger ahead of a write. Fails with `NotFound` when only some
    /// partitions are stored, so a lost blob is never rewritten from empty.
    pub fn load_ledger_for_update(&self) -> Result<LoadedLedger, TrackerError> {
        let loaded = self.load_ledger()?;
        if loaded.is_partial() {
            let keys: Vec<String> = loaded.missing.iter().map(|p| self.key(*p)).collect();
            return Err(TrackerError::NotFound(keys.join(", ")));
        }
        Ok(loaded)
    }

    pub fn save_ledger(&self, ledger: &Ledger) -> Result<(), TrackerError> {
        for partition in Partition::ALL {
            self.save(partition, ledger.partition(partition))?;
        }
        Ok(())
    }
}
