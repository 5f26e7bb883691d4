use crate::finding::{FindingKind, RawFinding, Rightsizing};
use crate::identity::float_repr;
use crate::record::{FinOpsStatus, TrackerRecord};
use crate::TrackerError;
use chrono::NaiveDate;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 250;

/// Compute and memory shape of an instance type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub vcpus: u32,
    pub memory_mib: u64,
}

impl InstanceSpec {
    pub fn memory_gib(&self) -> f64 {
        self.memory_mib as f64 / 1024.0
    }
}

/// Resolves instance types to their shape. Failures are reported as
/// `TrackerError::LookupUnavailable` and only drop the enrichment.
pub trait InstanceSpecLookup: Send + Sync {
    fn lookup(&self, instance_type: &str) -> Result<InstanceSpec, TrackerError>;
}

/// In-memory table of instance specs, usually loaded from a JSON object
/// keyed by instance type.
#[derive(Debug, Clone, Default)]
pub struct StaticInstanceSpecs {
    specs: FxHashMap<String, InstanceSpec>,
}

impl StaticInstanceSpecs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let bytes = std::fs::read(path.as_ref())?;
        let specs: FxHashMap<String, InstanceSpec> = serde_json::from_slice(&bytes)?;
        Ok(Self { specs })
    }

    pub fn insert(&mut self, instance_type: impl Into<String>, spec: InstanceSpec) {
        self.specs.insert(instance_type.into(), spec);
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl FromIterator<(String, InstanceSpec)> for StaticInstanceSpecs {
    fn from_iter<I: IntoIterator<Item = (String, InstanceSpec)>>(iter: I) -> Self {
        Self {
            specs: iter.into_iter().collect(),
        }
    }
}

impl InstanceSpecLookup for StaticInstanceSpecs {
    fn lookup(&self, instance_type: &str) -> Result<InstanceSpec, TrackerError> {
        self.specs
            .get(instance_type)
            .copied()
            .ok_or_else(|| TrackerError::LookupUnavailable(instance_type.to_string()))
    }
}

/// Lookup that never resolves; rightsizing comments are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInstanceSpecs;

impl InstanceSpecLookup for NoInstanceSpecs {
    fn lookup(&self, instance_type: &str) -> Result<InstanceSpec, TrackerError> {
        Err(TrackerError::LookupUnavailable(instance_type.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub index: usize,
    pub reason: String,
}

/// Outcome of normalizing one pulled batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    pub findings: Vec<RawFinding>,
    pub records: Vec<TrackerRecord>,
    pub rejected: Vec<Rejection>,
    pub pruned: usize,
}

pub struct Normalizer {
    lookup: Box<dyn InstanceSpecLookup>,
    chunk_size: usize,
    account_names: FxHashMap<String, String>,
}

impl Normalizer {
    pub fn new(lookup: Box<dyn InstanceSpecLookup>) -> Self {
        Self {
            lookup,
            chunk_size: DEFAULT_CHUNK_SIZE,
            account_names: FxHashMap::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Map account ids to friendly names in the Account column.
    pub fn with_account_names(mut self, names: FxHashMap<String, String>) -> Self {
        self.account_names = names;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Normalize tracked findings into tracker records, in input order.
    ///
    /// Chunks are processed in parallel; untracked findings are dropped.
    pub fn normalize(&self, findings: &[RawFinding], today: NaiveDate) -> Vec<TrackerRecord> {
        findings
            .par_chunks(self.chunk_size)
            .map(|chunk| {
                chunk
                    .iter()
                    .filter(|f| f.is_tracked())
                    .map(|f| self.normalize_one(f, today))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }

    /// Extract and normalize a raw batch. Entries that fail extraction are
    /// reported by index and skipped.
    pub fn normalize_json(&self, kind: FindingKind, values: &[Value], today: NaiveDate) -> NormalizeReport {
        let mut report = NormalizeReport::default();
        for (index, value) in values.iter().enumerate() {
            match RawFinding::from_json(kind, value) {
                Ok(finding) if finding.is_tracked() => report.findings.push(finding),
                Ok(_) => report.pruned += 1,
                Err(e) => {
                    warn!("[costtrack:normalize] rejected {} finding {}: {}", kind, index, e);
                    report.rejected.push(Rejection {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report.records = self.normalize(&report.findings, today);
        info!(
            "[costtrack:normalize] {}: {} records, {} rejected, {} pruned",
            kind,
            report.records.len(),
            report.rejected.len(),
            report.pruned
        );
        report
    }

    pub fn normalize_one(&self, finding: &RawFinding, today: NaiveDate) -> TrackerRecord {
        let resource_id = finding.resource_id().to_string();
        let savings_type = finding.action_type().to_string();
        let account = self
            .account_names
            .get(finding.account())
            .cloned()
            .unwrap_or_else(|| finding.account().to_string());

        let mut record = TrackerRecord {
            resource_id_type: format!("{}{}", resource_id, savings_type),
            resource_id,
            recommendation_id: finding.recommendation_id().to_string(),
            status: FinOpsStatus::default(),
            last_modified: Some(today),
            account,
            estimated_monthly_savings: finding.estimated_monthly_savings(),
            savings_type,
            name: tag_text(finding, "Name"),
            cost_center: tag_text(finding, "Cost Center"),
            service_group: tag_text(finding, "Service Group"),
            optimization_exemption: tag_text(finding, "Optimization Exemption"),
            ..TrackerRecord::default()
        };

        if record.status.is_needs_research() {
            if let Some(comment) = self.rightsizing_comment(finding) {
                record.comments = format!("{}{}", comment, record.comments);
            }
        }
        record
    }

    fn rightsizing_comment(&self, finding: &RawFinding) -> Option<String> {
        match finding.rightsizing()? {
            Rightsizing::Volume { from, to } => Some(format!("{}->{}", from, to)),
            Rightsizing::Instance { from, to } => {
                let from = self.describe_instance(from)?;
                let to = self.describe_instance(to)?;
                Some(format!("{}->{}", from, to))
            }
        }
    }

    fn describe_instance(&self, instance_type: &str) -> Option<String> {
        match self.lookup.lookup(instance_type) {
            Ok(spec) => Some(format!(
                "{}({} Cores / RAM:{}GB)",
                instance_type,
                spec.vcpus,
                float_repr(spec.memory_gib())
            )),
            Err(e) => {
                debug!("[costtrack:normalize] no instance spec for {}: {}", instance_type, e);
                None
            }
        }
    }
}

fn tag_text(finding: &RawFinding, key: &str) -> String {
    finding.tag(key).unwrap_or_default().to_string()
}
