use crate::ledger::Ledger;
use crate::record::{Partition, RowKey, TrackerRecord};
use crate::TrackerError;
use chrono::NaiveDate;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Copy carried-forward statuses from the ledger onto fresh findings.
///
/// A fresh finding matches a ledger row by RecommendationId first, then by
/// (ResourceId, Savings Type). Ledger rows without a ResourceId, and rows
/// whose status does not carry forward, are ignored. When several carrying
/// rows match, exempt rows beat tracker rows and later rows beat earlier ones.
pub fn reconcile_statuses(
    mut fresh: Vec<TrackerRecord>,
    tracker: &[TrackerRecord],
    exempt: &[TrackerRecord],
) -> Vec<TrackerRecord> {
    let mut by_recommendation: FxHashMap<&str, &TrackerRecord> = FxHashMap::default();
    let mut by_resource: FxHashMap<(&str, &str), &TrackerRecord> = FxHashMap::default();
    for row in tracker.iter().chain(exempt.iter()) {
        if row.resource_id.is_empty() || !row.status.carries_forward() {
            continue;
        }
        if !row.recommendation_id.is_empty() {
            by_recommendation.insert(row.recommendation_id.as_str(), row);
        }
        by_resource.insert(row.match_key(), row);
    }

    let mut carried = 0usize;
    for finding in fresh.iter_mut() {
        let matched = by_recommendation
            .get(finding.recommendation_id.as_str())
            .or_else(|| by_resource.get(&finding.match_key()));
        if let Some(row) = matched {
            finding.status = row.status.clone();
            carried += 1;
        }
    }
    debug!("[costtrack:reconcile] carried {} statuses onto {} findings", carried, fresh.len());
    fresh
}

/// Edits submitted from a table editor: sparse per-row column deltas keyed
/// by row index, plus whole new rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditSet {
    #[serde(default)]
    pub edited_rows: BTreeMap<usize, BTreeMap<String, Value>>,
    #[serde(default)]
    pub added_rows: Vec<BTreeMap<String, Value>>,
}

impl EditSet {
    pub fn is_empty(&self) -> bool {
        self.edited_rows.is_empty() && self.added_rows.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditOutcome {
    pub ledger: Ledger,
    /// Session row indexes whose edits were stale and not applied.
    pub unwritable: Vec<usize>,
    pub applied: usize,
    pub moved_to_complete: usize,
    pub moved_to_exempt: usize,
    pub deleted: usize,
}

enum RowChange {
    Replace(TrackerRecord),
    Remove,
    MoveTo(Partition, TrackerRecord),
}

/// Apply edited rows from one partition's session view to the persisted
/// ledger.
///
/// Every edited row is stamped with `today` as its FinOpsLastModified. An
/// edit lands only if the persisted row has no FinOpsLastModified or `today`
/// is not older than it; otherwise the session index is reported in
/// `unwritable`. Rows set to "DeleteMe" are removed without that check.
/// In-progress rows that become complete move to Complete with
/// DateOfSavings set to `today`; rows that become exempt move to Exempt.
pub fn apply_edits(
    ledger: Ledger,
    partition: Partition,
    session_rows: &[TrackerRecord],
    edits: &EditSet,
    today: NaiveDate,
) -> Result<EditOutcome, TrackerError> {
    let mut outcome = EditOutcome {
        ledger,
        ..EditOutcome::default()
    };
    let mut changes: BTreeMap<usize, RowChange> = BTreeMap::new();

    {
        let persisted = outcome.ledger.partition(partition);
        for (&index, deltas) in &edits.edited_rows {
            let session_row = session_rows.get(index).ok_or_else(|| {
                TrackerError::InvalidArgument(format!(
                    "edited row {} is outside the {} rows shown",
                    index,
                    session_rows.len()
                ))
            })?;

            let mut edited = session_row.clone();
            for (column, value) in deltas {
                edited.set_column(column, value)?;
            }
            edited.last_modified = Some(today);

            let position = locate(persisted, session_row, index);

            if edited.status.is_delete_sentinel() {
                if let Some(position) = position {
                    changes.insert(position, RowChange::Remove);
                }
                continue;
            }

            let Some(position) = position else {
                warn!(
                    "[costtrack:edit] {} row {} no longer exists in the stored partition",
                    partition, index
                );
                outcome.unwritable.push(index);
                continue;
            };

            let current = &persisted[position];
            let accepted = match current.last_modified {
                None => true,
                Some(stored) => today >= stored,
            };
            if !accepted {
                warn!(
                    "[costtrack:edit] stale write to {} row {}: stored {:?} is newer than {}",
                    partition, index, current.last_modified, today
                );
                outcome.unwritable.push(index);
                continue;
            }

            if edited.row_key.is_none() {
                edited.row_key = current.row_key.clone();
            }

            let change = if partition == Partition::InProgress && edited.status.is_complete() {
                edited.date_of_savings = Some(today);
                RowChange::MoveTo(Partition::Complete, edited)
            } else if partition == Partition::InProgress && edited.status.is_exempt() {
                RowChange::MoveTo(Partition::Exempt, edited)
            } else {
                RowChange::Replace(edited)
            };
            changes.insert(position, change);
        }
    }

    let rows = std::mem::take(outcome.ledger.partition_mut(partition));
    let mut kept = Vec::with_capacity(rows.len());
    for (position, row) in rows.into_iter().enumerate() {
        match changes.remove(&position) {
            None => kept.push(row),
            Some(RowChange::Replace(edited)) => {
                outcome.applied += 1;
                kept.push(edited);
            }
            Some(RowChange::Remove) => outcome.deleted += 1,
            Some(RowChange::MoveTo(target, edited)) => {
                outcome.applied += 1;
                match target {
                    Partition::Complete => outcome.moved_to_complete += 1,
                    Partition::Exempt => outcome.moved_to_exempt += 1,
                    Partition::InProgress => {}
                }
                outcome.ledger.partition_mut(target).push(edited);
            }
        }
    }
    *outcome.ledger.partition_mut(partition) = kept;

    info!(
        "[costtrack:edit] {}: {} applied, {} to Complete, {} to Exempt, {} deleted, {} stale",
        partition,
        outcome.applied,
        outcome.moved_to_complete,
        outcome.moved_to_exempt,
        outcome.deleted,
        outcome.unwritable.len()
    );
    Ok(outcome)
}

/// Position of a session row in the stored partition: by row key when the
/// session row has one, otherwise by index.
fn locate(persisted: &[TrackerRecord], session_row: &TrackerRecord, index: usize) -> Option<usize> {
    match &session_row.row_key {
        Some(key) => persisted.iter().position(|r| r.row_key.as_ref() == Some(key)),
        None => (index < persisted.len()).then_some(index),
    }
}

/// Append user-entered rows to InProgress, each with a fresh row key.
pub fn add_rows(
    mut ledger: Ledger,
    added_rows: &[BTreeMap<String, Value>],
    today: NaiveDate,
) -> Result<Ledger, TrackerError> {
    for columns in added_rows {
        let mut record = TrackerRecord::from_columns(columns)?;
        if record.last_modified.is_none() {
            record.last_modified = Some(today);
        }
        if record.resource_id_type.is_empty() && !record.resource_id.is_empty() {
            record.resource_id_type = format!("{}{}", record.resource_id, record.savings_type);
        }
        record.row_key = Some(RowKey::generate());
        ledger.in_progress.push(record);
    }
    if !added_rows.is_empty() {
        info!("[costtrack:edit] added {} rows to InProgress", added_rows.len());
    }
    Ok(ledger)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerAddition {
    pub ledger: Ledger,
    /// Findings that were not selected, in their original order.
    pub remaining: Vec<TrackerRecord>,
    pub added: usize,
    pub updated: usize,
}

/// Move selected fresh findings into InProgress.
///
/// A finding whose (ResourceId, Savings Type) already has an InProgress row
/// refreshes that row's finding-derived columns in place and keeps its
/// status, comments and row key.
pub fn add_to_tracker(
    mut ledger: Ledger,
    findings: Vec<TrackerRecord>,
    selected: &[usize],
    today: NaiveDate,
) -> Result<TrackerAddition, TrackerError> {
    if let Some(&bad) = selected.iter().find(|&&i| i >= findings.len()) {
        return Err(TrackerError::InvalidArgument(format!(
            "selected finding {} is outside the {} findings shown",
            bad,
            findings.len()
        )));
    }
    let selected: FxHashSet<usize> = selected.iter().copied().collect();

    let mut added = 0usize;
    let mut updated = 0usize;
    let mut remaining = Vec::with_capacity(findings.len().saturating_sub(selected.len()));
    for (index, mut finding) in findings.into_iter().enumerate() {
        if !selected.contains(&index) {
            remaining.push(finding);
            continue;
        }

        let existing = ledger
            .in_progress
            .iter_mut()
            .find(|row| !row.resource_id.is_empty() && row.match_key() == finding.match_key());
        match existing {
            Some(row) => {
                row.recommendation_id = finding.recommendation_id;
                row.estimated_monthly_savings = finding.estimated_monthly_savings;
                row.account = finding.account;
                row.cost_center = finding.cost_center;
                row.service_group = finding.service_group;
                row.optimization_exemption = finding.optimization_exemption;
                row.resource_id_type = finding.resource_id_type;
                row.name = finding.name;
                row.last_modified = Some(today);
                updated += 1;
            }
            None => {
                if finding.last_modified.is_none() {
                    finding.last_modified = Some(today);
                }
                finding.row_key = Some(RowKey::generate());
                ledger.in_progress.push(finding);
                added += 1;
            }
        }
    }

    info!(
        "[costtrack:edit] tracked {} new findings, refreshed {} existing rows",
        added, updated
    );
    Ok(TrackerAddition {
        ledger,
        remaining,
        added,
        updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FinOpsStatus;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(resource: &str, rec: &str, savings_type: &str, status: &str) -> TrackerRecord {
        TrackerRecord {
            resource_id: resource.to_string(),
            recommendation_id: rec.to_string(),
            savings_type: savings_type.to_string(),
            status: FinOpsStatus::new(status),
            ..TrackerRecord::default()
        }
    }

    fn keyed(mut record: TrackerRecord) -> TrackerRecord {
        record.row_key = Some(RowKey::generate());
        record
    }

    fn edit(index: usize, column: &str, value: Value) -> EditSet {
        let mut deltas = BTreeMap::new();
        deltas.insert(column.to_string(), value);
        let mut edited_rows = BTreeMap::new();
        edited_rows.insert(index, deltas);
        EditSet {
            edited_rows,
            added_rows: Vec::new(),
        }
    }

    #[test]
    fn test_status_carries_by_resource_and_type() {
        let fresh = vec![row("vol-1", "h1", "Delete", "Needs Research")];
        let tracker = vec![row("vol-1", "h0", "Delete", "In Progress")];
        let out = reconcile_statuses(fresh, &tracker, &[]);
        assert_eq!(out[0].status.as_str(), "In Progress");
    }

    #[test]
    fn test_closed_statuses_do_not_carry() {
        for status in ["Needs Research", "complete", "Completed", "ARCHIVED", "archive"] {
            let fresh = vec![row("vol-1", "h1", "Delete", "Needs Research")];
            let tracker = vec![row("vol-1", "h1", "Delete", status)];
            let out = reconcile_statuses(fresh, &tracker, &[]);
            assert_eq!(out[0].status.as_str(), "Needs Research", "{} carried", status);
        }
    }

    #[test]
    fn test_recommendation_id_match_beats_resource_match() {
        let fresh = vec![row("vol-1", "h1", "Delete", "Needs Research")];
        let tracker = vec![
            row("vol-9", "h1", "Rightsize", "Waiting on owner"),
            row("vol-1", "h0", "Delete", "In Progress"),
        ];
        let out = reconcile_statuses(fresh, &tracker, &[]);
        assert_eq!(out[0].status.as_str(), "Waiting on owner");
    }

    #[test]
    fn test_non_carrying_duplicates_do_not_hide_carrying_rows() {
        let fresh = vec![row("vol-1", "hz", "Unattached EBS", "Needs Research")];
        let tracker = vec![row("vol-1", "h0", "Unattached EBS", "In Progress")];
        let exempt = vec![row("vol-1", "h9", "Unattached EBS", "Needs Research")];
        let out = reconcile_statuses(fresh, &tracker, &exempt);
        assert_eq!(out[0].status.as_str(), "In Progress");

        let fresh = vec![row("vol-2", "h1", "Delete", "Needs Research")];
        let tracker = vec![
            row("vol-2", "h0", "Delete", "In Progress"),
            row("vol-2", "h1", "Delete", "Needs Research"),
        ];
        let out = reconcile_statuses(fresh, &tracker, &[]);
        assert_eq!(out[0].status.as_str(), "In Progress");
    }

    #[test]
    fn test_exempt_wins_over_tracker_and_empty_resource_ignored() {
        let fresh = vec![
            row("vol-1", "h1", "Delete", "Needs Research"),
            row("", "h2", "Delete", "Needs Research"),
        ];
        let tracker = vec![row("vol-1", "h0", "Delete", "In Progress"), row("", "h2", "Delete", "In Progress")];
        let exempt = vec![row("vol-1", "hx", "Delete", "Exempt")];
        let out = reconcile_statuses(fresh, &tracker, &exempt);
        assert_eq!(out[0].status.as_str(), "Exempt");
        assert_eq!(out[1].status.as_str(), "Needs Research");
    }

    #[test]
    fn test_edit_accepted_when_not_older_than_stored() {
        let today = day(2026, 5, 10);
        let mut stored = keyed(row("vol-1", "h1", "Delete", "Needs Research"));
        stored.last_modified = Some(day(2026, 5, 10));
        let ledger = Ledger::new(vec![stored.clone()], vec![], vec![]);

        let edits = edit(0, "Comments", json!("owner pinged"));
        let outcome = apply_edits(ledger, Partition::InProgress, &[stored], &edits, today).unwrap();
        assert!(outcome.unwritable.is_empty());
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.ledger.in_progress[0].comments, "owner pinged");
        assert_eq!(outcome.ledger.in_progress[0].last_modified, Some(today));
    }

    #[test]
    fn test_stale_edit_is_reported_and_not_applied() {
        let today = day(2026, 5, 9);
        let mut stored = keyed(row("vol-1", "h1", "Delete", "Needs Research"));
        stored.last_modified = Some(day(2026, 5, 10));
        let ledger = Ledger::new(vec![], vec![stored.clone()], vec![]);

        let edits = edit(0, "Comments", json!("late"));
        let outcome = apply_edits(ledger, Partition::Complete, &[stored.clone()], &edits, today).unwrap();
        assert_eq!(outcome.unwritable, vec![0]);
        assert_eq!(outcome.ledger.complete[0], stored);
    }

    #[test]
    fn test_complete_moves_with_savings_date() {
        let today = day(2026, 5, 10);
        let stored = keyed(row("vol-1", "h1", "Delete", "In Progress"));
        let other = keyed(row("vol-2", "h2", "Delete", "In Progress"));
        let session = vec![stored.clone(), other.clone()];
        let ledger = Ledger::new(session.clone(), vec![], vec![]);

        let edits = edit(0, "FinOpsStatus", json!("complete"));
        let outcome = apply_edits(ledger, Partition::InProgress, &session, &edits, today).unwrap();
        assert_eq!(outcome.moved_to_complete, 1);
        assert_eq!(outcome.ledger.in_progress, vec![other]);
        let moved = &outcome.ledger.complete[0];
        assert_eq!(moved.resource_id, "vol-1");
        assert_eq!(moved.date_of_savings, Some(today));
        assert_eq!(moved.row_key, stored.row_key);
    }

    #[test]
    fn test_exempt_moves_out_of_in_progress() {
        let today = day(2026, 5, 10);
        let stored = keyed(row("vol-1", "h1", "Delete", "In Progress"));
        let ledger = Ledger::new(vec![stored.clone()], vec![], vec![]);
        let edits = edit(0, "FinOpsStatus", json!("Exempt"));
        let outcome = apply_edits(ledger, Partition::InProgress, &[stored], &edits, today).unwrap();
        assert!(outcome.ledger.in_progress.is_empty());
        assert_eq!(outcome.ledger.exempt.len(), 1);
        assert_eq!(outcome.ledger.exempt[0].date_of_savings, None);
    }

    #[test]
    fn test_delete_ignores_conflict_check() {
        let today = day(2026, 1, 1);
        let mut stored = keyed(row("vol-1", "h1", "Delete", "Exempt"));
        stored.last_modified = Some(day(2026, 12, 31));
        let ledger = Ledger::new(vec![], vec![], vec![stored.clone()]);
        let edits = edit(0, "FinOpsStatus", json!("DeleteMe"));
        let outcome = apply_edits(ledger, Partition::Exempt, &[stored], &edits, today).unwrap();
        assert!(outcome.ledger.exempt.is_empty());
        assert!(outcome.unwritable.is_empty());
        assert_eq!(outcome.deleted, 1);
    }

    #[test]
    fn test_lowercase_deleteme_is_not_a_delete() {
        let today = day(2026, 1, 1);
        let stored = keyed(row("vol-1", "h1", "Delete", "In Progress"));
        let ledger = Ledger::new(vec![stored.clone()], vec![], vec![]);
        let edits = edit(0, "FinOpsStatus", json!("deleteme"));
        let outcome = apply_edits(ledger, Partition::InProgress, &[stored], &edits, today).unwrap();
        assert_eq!(outcome.ledger.in_progress.len(), 1);
        assert_eq!(outcome.ledger.in_progress[0].status.as_str(), "deleteme");
    }

    #[test]
    fn test_edits_follow_row_key_when_rows_shift() {
        let today = day(2026, 5, 10);
        let a = keyed(row("vol-a", "ha", "Delete", "In Progress"));
        let b = keyed(row("vol-b", "hb", "Delete", "In Progress"));
        // Another session removed vol-a after this one loaded.
        let ledger = Ledger::new(vec![b.clone()], vec![], vec![]);
        let session = vec![a, b];
        let edits = edit(1, "Comments", json!("still here"));
        let outcome = apply_edits(ledger, Partition::InProgress, &session, &edits, today).unwrap();
        assert_eq!(outcome.ledger.in_progress[0].comments, "still here");

        let vanished = edit(0, "Comments", json!("gone"));
        let outcome = apply_edits(outcome.ledger, Partition::InProgress, &session, &vanished, today).unwrap();
        assert_eq!(outcome.unwritable, vec![0]);
    }

    #[test]
    fn test_edit_outside_session_rows_is_invalid() {
        let edits = edit(3, "Comments", json!("x"));
        let result = apply_edits(Ledger::default(), Partition::InProgress, &[], &edits, day(2026, 1, 1));
        assert!(matches!(result, Err(TrackerError::InvalidArgument(_))));
    }

    #[test]
    fn test_edit_set_parses_editor_payload() {
        let payload = r#"{"edited_rows": {"2": {"Comments": "hi"}}, "added_rows": [{"ResourceId": "i-1"}], "deleted_rows": []}"#;
        let edits: EditSet = serde_json::from_str(payload).unwrap();
        assert_eq!(edits.edited_rows[&2]["Comments"], json!("hi"));
        assert_eq!(edits.added_rows.len(), 1);
    }

    #[test]
    fn test_add_rows_assigns_fresh_keys_and_defaults() {
        let today = day(2026, 3, 3);
        let mut first = BTreeMap::new();
        first.insert("ResourceId".to_string(), json!("i-1"));
        first.insert("Savings Type".to_string(), json!("Self Identified"));
        let mut second = BTreeMap::new();
        second.insert("ResourceId".to_string(), json!("i-2"));
        second.insert("FinOpsStatus".to_string(), json!("In Progress"));
        second.insert("FinOpsLastModified".to_string(), json!("2026-01-01"));

        let ledger = add_rows(Ledger::default(), &[first, second], today).unwrap();
        let rows = &ledger.in_progress;
        assert_eq!(rows.len(), 2);
        assert!(rows[0].status.is_needs_research());
        assert_eq!(rows[0].last_modified, Some(today));
        assert_eq!(rows[0].resource_id_type, "i-1Self Identified");
        assert_eq!(rows[1].last_modified, Some(day(2026, 1, 1)));
        assert_ne!(rows[0].row_key, rows[1].row_key);
    }

    #[test]
    fn test_add_rows_rejects_unknown_columns() {
        let mut bad = BTreeMap::new();
        bad.insert("MoveToTracker".to_string(), json!(true));
        assert!(matches!(
            add_rows(Ledger::default(), &[bad], day(2026, 1, 1)),
            Err(TrackerError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_add_to_tracker_moves_selected_and_updates_existing() {
        let today = day(2026, 4, 1);
        let mut existing = keyed(row("vol-1", "old-hash", "Delete", "In Progress"));
        existing.comments = "waiting".to_string();
        existing.estimated_monthly_savings = 10.0;
        let key = existing.row_key.clone();
        let ledger = Ledger::new(vec![existing], vec![], vec![]);

        let mut changed = row("vol-1", "new-hash", "Delete", "Needs Research");
        changed.estimated_monthly_savings = 12.0;
        let findings = vec![
            changed,
            row("vol-2", "h2", "Delete", "Needs Research"),
            row("vol-3", "h3", "Delete", "Needs Research"),
        ];

        let result = add_to_tracker(ledger, findings, &[0, 2], today).unwrap();
        assert_eq!(result.added, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(result.remaining.len(), 1);
        assert_eq!(result.remaining[0].resource_id, "vol-2");

        let rows = &result.ledger.in_progress;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].recommendation_id, "new-hash");
        assert_eq!(rows[0].estimated_monthly_savings, 12.0);
        assert_eq!(rows[0].status.as_str(), "In Progress");
        assert_eq!(rows[0].comments, "waiting");
        assert_eq!(rows[0].row_key, key);
        assert_eq!(rows[1].resource_id, "vol-3");
        assert!(rows[1].row_key.is_some());
    }

    #[test]
    fn test_add_to_tracker_rejects_out_of_range_selection() {
        let result = add_to_tracker(Ledger::default(), vec![], &[0], day(2026, 1, 1));
        assert!(matches!(result, Err(TrackerError::InvalidArgument(_))));
    }
}
