use crate::blob_store::BlobStore;
use crate::finding::{FindingKind, RawFinding};
use crate::freshness::Freshness;
use crate::normalizer::{Normalizer, Rejection};
use crate::reconcile::reconcile_statuses;
use crate::record::{Partition, TrackerRecord};
use crate::store::TrackerStore;
use crate::TrackerError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where raw findings come from.
pub trait FindingSource {
    fn pull(&self, kind: FindingKind) -> Result<Vec<Value>, TrackerError>;
}

/// Reads a JSON array of raw findings from disk, whatever the kind.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FindingSource for JsonFileSource {
    fn pull(&self, kind: FindingKind) -> Result<Vec<Value>, TrackerError> {
        let bytes = std::fs::read(&self.path)?;
        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Array(items) => Ok(items),
            // Also accept {"chub": [...], "sec2": [...]} bundles.
            Value::Object(mut by_kind) => match by_kind.remove(kind.name()) {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(TrackerError::NotFound(format!("{} findings in {}", kind, self.path.display()))),
            },
            other => Err(TrackerError::InvalidArgument(format!(
                "{} must hold a JSON array, found {}",
                self.path.display(),
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Summary and detail tables for one finding kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedFindings {
    pub summary: Vec<TrackerRecord>,
    pub detail: Vec<RawFinding>,
    pub refreshed: bool,
    pub rejected: Vec<Rejection>,
}

/// Regenerates per-kind finding tables when they go stale.
pub struct FindingsCache<'a, S: BlobStore> {
    store: &'a TrackerStore<S>,
    normalizer: &'a Normalizer,
    freshness: Freshness,
}

impl<'a, S: BlobStore> FindingsCache<'a, S> {
    pub fn new(store: &'a TrackerStore<S>, normalizer: &'a Normalizer, freshness: Freshness) -> Self {
        Self {
            store,
            normalizer,
            freshness,
        }
    }

    pub fn summary_key(&self, kind: FindingKind) -> String {
        format!("{}/findings/{}_summary.json", self.store.prefix(), kind)
    }

    pub fn detail_key(&self, kind: FindingKind) -> String {
        format!("{}/findings/{}_detail.json", self.store.prefix(), kind)
    }

    pub fn is_fresh(&self, kind: FindingKind, now: DateTime<Utc>) -> Result<bool, TrackerError> {
        let blobs = self.store.blobs();
        Ok(self.freshness.check(blobs, &self.summary_key(kind), now)?
            && self.freshness.check(blobs, &self.detail_key(kind), now)?)
    }

    /// Serve cached tables while fresh, otherwise pull, normalize, carry
    /// ledger statuses forward and persist both tables.
    pub fn load_or_refresh(
        &self,
        kind: FindingKind,
        source: &dyn FindingSource,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<CachedFindings, TrackerError> {
        if !force && self.is_fresh(kind, now)? {
            let blobs = self.store.blobs();
            let summary = serde_json::from_slice(&blobs.get(&self.summary_key(kind))?)?;
            let detail = serde_json::from_slice(&blobs.get(&self.detail_key(kind))?)?;
            return Ok(CachedFindings {
                summary,
                detail,
                refreshed: false,
                rejected: Vec::new(),
            });
        }

        let values = source.pull(kind)?;
        let report = self.normalizer.normalize_json(kind, &values, now.date_naive());
        let in_progress = self.store.load_or_empty(Partition::InProgress)?;
        let exempt = self.store.load_or_empty(Partition::Exempt)?;
        let summary = reconcile_statuses(report.records, &in_progress, &exempt);

        let blobs = self.store.blobs();
        blobs.put(&self.summary_key(kind), serde_json::to_vec(&summary)?)?;
        blobs.put(&self.detail_key(kind), serde_json::to_vec(&report.findings)?)?;
        info!(
            "[costtrack:cache] regenerated {} ({} findings{})",
            kind,
            summary.len(),
            if force { ", forced" } else { "" }
        );

        Ok(CachedFindings {
            summary,
            detail: report.findings,
            refreshed: true,
            rejected: report.rejected,
        })
    }

    /// Replace the cached summary, e.g. after findings were moved into the
    /// tracker.
    pub fn store_summary(&self, kind: FindingKind, summary: &[TrackerRecord]) -> Result<(), TrackerError> {
        self.store
            .blobs()
            .put(&self.summary_key(kind), serde_json::to_vec(summary)?)
    }
}
