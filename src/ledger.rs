use crate::record::{Partition, TrackerRecord};
use itertools::Itertools;
use rustc_hash::FxHashSet;
use std::fmt;

/// The three tracker partitions as one value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    pub in_progress: Vec<TrackerRecord>,
    pub complete: Vec<TrackerRecord>,
    pub exempt: Vec<TrackerRecord>,
}

/// The same (ResourceId, Savings Type) found in two partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    pub resource_id: String,
    pub savings_type: String,
    pub first: Partition,
    pub second: Partition,
}

impl fmt::Display for Overlap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) is in both {} and {}",
            self.resource_id, self.savings_type, self.first, self.second
        )
    }
}

impl Ledger {
    pub fn new(in_progress: Vec<TrackerRecord>, complete: Vec<TrackerRecord>, exempt: Vec<TrackerRecord>) -> Self {
        Self {
            in_progress,
            complete,
            exempt,
        }
    }

    pub fn partition(&self, partition: Partition) -> &[TrackerRecord] {
        match partition {
            Partition::InProgress => &self.in_progress,
            Partition::Complete => &self.complete,
            Partition::Exempt => &self.exempt,
        }
    }

    pub fn partition_mut(&mut self, partition: Partition) -> &mut Vec<TrackerRecord> {
        match partition {
            Partition::InProgress => &mut self.in_progress,
            Partition::Complete => &mut self.complete,
            Partition::Exempt => &mut self.exempt,
        }
    }

    pub fn len(&self) -> usize {
        self.in_progress.len() + self.complete.len() + self.exempt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pairwise overlaps on (ResourceId, Savings Type). Rows without a
    /// ResourceId are not compared.
    pub fn validate_disjoint(&self) -> Vec<Overlap> {
        let keys: Vec<(Partition, FxHashSet<(&str, &str)>)> = Partition::ALL
            .iter()
            .map(|&p| {
                let set = self
                    .partition(p)
                    .iter()
                    .filter(|r| !r.resource_id.is_empty())
                    .map(|r| r.match_key())
                    .collect();
                (p, set)
            })
            .collect();

        let mut overlaps = Vec::new();
        for ((first, a), (second, b)) in keys.iter().tuple_combinations() {
            for &(resource_id, savings_type) in a.intersection(b).sorted() {
                overlaps.push(Overlap {
                    resource_id: resource_id.to_string(),
                    savings_type: savings_type.to_string(),
                    first: *first,
                    second: *second,
                });
            }
        }
        overlaps
    }
}

/// Partition rows by status: complete or exempt rows go right, the rest left.
/// Applying it again to either side changes nothing.
pub fn split(records: Vec<TrackerRecord>) -> (Vec<TrackerRecord>, Vec<TrackerRecord>) {
    records.into_iter().partition(|r| !r.status.is_closed())
}

/// Move every exempt-status row out of InProgress and Complete.
pub fn split_exempt(ledger: Ledger) -> Ledger {
    let Ledger {
        in_progress,
        complete,
        mut exempt,
    } = ledger;
    let (exempt_open, in_progress): (Vec<_>, Vec<_>) = in_progress.into_iter().partition(|r| r.status.is_exempt());
    let (exempt_closed, complete): (Vec<_>, Vec<_>) = complete.into_iter().partition(|r| r.status.is_exempt());
    exempt.extend(exempt_open);
    exempt.extend(exempt_closed);
    Ledger {
        in_progress,
        complete,
        exempt,
    }
}

/// Backfill DateOfSavings from FinOpsLastModified for complete rows that
/// have none.
pub fn build_savings_dates(records: &mut [TrackerRecord]) {
    for record in records.iter_mut() {
        if record.status.is_complete() && record.date_of_savings.is_none() {
            record.date_of_savings = record.last_modified;
        }
    }
}

/// Turn a single legacy tracker table into a three-way ledger.
pub fn import_legacy(mut records: Vec<TrackerRecord>) -> Ledger {
    build_savings_dates(&mut records);
    let (in_progress, closed) = split(records);
    let (exempt, complete): (Vec<_>, Vec<_>) = closed.into_iter().partition(|r| r.status.is_exempt());
    Ledger {
        in_progress,
        complete,
        exempt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FinOpsStatus;
    use chrono::NaiveDate;

    fn row(resource: &str, savings_type: &str, status: &str) -> TrackerRecord {
        TrackerRecord {
            resource_id: resource.to_string(),
            recommendation_id: format!("rec-{}", resource),
            savings_type: savings_type.to_string(),
            status: FinOpsStatus::new(status),
            ..TrackerRecord::default()
        }
    }

    #[test]
    fn test_split_routes_by_status() {
        let records = vec![
            row("r1", "Stop", "Needs Research"),
            row("r2", "Stop", "In Progress"),
            row("r3", "Stop", "Complete"),
            row("r4", "Stop", "Exempt"),
        ];
        let (left, right) = split(records);
        let left_ids: Vec<_> = left.iter().map(|r| r.resource_id.as_str()).collect();
        let right_ids: Vec<_> = right.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(left_ids, vec!["r1", "r2"]);
        assert_eq!(right_ids, vec!["r3", "r4"]);
    }

    #[test]
    fn test_split_is_case_insensitive_and_idempotent() {
        let records = vec![row("a", "Stop", "COMPLETE"), row("b", "Stop", "exempt"), row("c", "Stop", "")];
        let (left, right) = split(records);
        assert_eq!(left.len(), 1);
        assert_eq!(right.len(), 2);

        let (left_again, nothing) = split(left.clone());
        assert_eq!(left_again, left);
        assert!(nothing.is_empty());
        let (nothing, right_again) = split(right.clone());
        assert!(nothing.is_empty());
        assert_eq!(right_again, right);
    }

    #[test]
    fn test_split_exempt_moves_rows_from_both_partitions() {
        let ledger = Ledger::new(
            vec![row("a", "Stop", "In Progress"), row("b", "Stop", "Exempt")],
            vec![row("c", "Stop", "Complete"), row("d", "Stop", "exempt")],
            vec![row("e", "Stop", "Exempt")],
        );
        let ledger = split_exempt(ledger);
        assert_eq!(ledger.in_progress.len(), 1);
        assert_eq!(ledger.complete.len(), 1);
        let exempt: Vec<_> = ledger.exempt.iter().map(|r| r.resource_id.as_str()).collect();
        assert_eq!(exempt, vec!["e", "b", "d"]);
    }

    #[test]
    fn test_build_savings_dates_only_fills_complete_gaps() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let other = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut records = vec![
            TrackerRecord {
                last_modified: Some(day),
                ..row("a", "Stop", "complete")
            },
            TrackerRecord {
                last_modified: Some(day),
                date_of_savings: Some(other),
                ..row("b", "Stop", "Complete")
            },
            TrackerRecord {
                last_modified: Some(day),
                ..row("c", "Stop", "In Progress")
            },
        ];
        build_savings_dates(&mut records);
        assert_eq!(records[0].date_of_savings, Some(day));
        assert_eq!(records[1].date_of_savings, Some(other));
        assert_eq!(records[2].date_of_savings, None);
    }

    #[test]
    fn test_import_legacy_splits_three_ways() {
        let ledger = import_legacy(vec![
            row("a", "Stop", "Needs Research"),
            row("b", "Stop", "Complete"),
            row("c", "Stop", "Exempt"),
        ]);
        assert_eq!(ledger.in_progress.len(), 1);
        assert_eq!(ledger.complete.len(), 1);
        assert_eq!(ledger.exempt.len(), 1);
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_validate_disjoint_reports_overlaps() {
        let ledger = Ledger::new(
            vec![row("vol-1", "Delete", "In Progress"), row("", "Delete", "In Progress")],
            vec![row("vol-1", "Delete", "Complete"), row("", "Delete", "Complete")],
            vec![row("vol-1", "Rightsize", "Exempt")],
        );
        let overlaps = ledger.validate_disjoint();
        assert_eq!(
            overlaps,
            vec![Overlap {
                resource_id: "vol-1".to_string(),
                savings_type: "Delete".to_string(),
                first: Partition::InProgress,
                second: Partition::Complete,
            }]
        );
    }
}
