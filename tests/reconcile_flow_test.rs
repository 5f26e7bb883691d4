use chrono::{NaiveDate, TimeZone, Utc};
use costtrack::blob_store::{FsBlobStore, MemoryBlobStore};
use costtrack::finding::FindingKind;
use costtrack::findings_cache::{FindingsCache, JsonFileSource};
use costtrack::freshness::Freshness;
use costtrack::normalizer::{NoInstanceSpecs, Normalizer};
use costtrack::reconcile::{reconcile_statuses, EditSet};
use costtrack::session::Session;
use costtrack::{Ledger, Partition, TrackerRecord, TrackerStore};
use serde_json::json;
use std::fs;

fn finding(resource: &str, rec: &str, savings_type: &str) -> TrackerRecord {
    TrackerRecord {
        resource_id: resource.to_string(),
        recommendation_id: rec.to_string(),
        savings_type: savings_type.to_string(),
        ..TrackerRecord::default()
    }
}

#[test]
fn test_in_progress_status_carries_to_new_hash() {
    let fresh = vec![finding("vol-1", "h1", "Delete")];
    let mut tracked = finding("vol-1", "h0", "Delete");
    tracked.status = "In Progress".into();

    let out = reconcile_statuses(fresh, &[tracked], &[]);
    assert_eq!(out[0].status.as_str(), "In Progress");
    assert_eq!(out[0].recommendation_id, "h1");
}

#[test]
fn test_pull_track_complete_and_repull() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("uebs.json");
    fs::write(
        &input,
        serde_json::to_vec(&json!([
            {"VolumeId": "vol-1", "Account": "HF-Dev", "VolumeType": "gp3", "Size": 100, "Iops": 4000, "Throughput": 150},
            {"VolumeId": "vol-2", "Account": "HF-Dev", "VolumeType": "gp2", "Size": 50},
            {"VolumeId": "vol-3", "Account": "HF-Dev", "VolumeType": "gp2", "Size": 7.5}
        ]))
        .unwrap(),
    )
    .unwrap();

    let store = TrackerStore::new(FsBlobStore::new(dir.path().join("state")), "Tracking");
    let normalizer = Normalizer::new(Box::new(NoInstanceSpecs)).with_chunk_size(1);
    let cache = FindingsCache::new(&store, &normalizer, Freshness::default());
    let source = JsonFileSource::new(&input);
    let day1 = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();

    let pulled = cache.load_or_refresh(FindingKind::Uebs, &source, day1, false).unwrap();
    assert!(pulled.refreshed);
    assert_eq!(pulled.summary.len(), 2);
    assert_eq!(pulled.rejected.len(), 1);
    assert_eq!(pulled.rejected[0].index, 2);
    assert!((pulled.summary[0].estimated_monthly_savings - 14.0).abs() < 1e-9);

    let today = day1.date_naive();
    let mut session = Session::open(&store).unwrap();
    let remaining = session.add_findings(&store, pulled.summary, &[0], today).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].resource_id, "vol-2");

    let mut session = Session::open(&store).unwrap();
    assert_eq!(session.rows(Partition::InProgress).len(), 1);
    let edits: EditSet = serde_json::from_value(json!({
        "edited_rows": {"0": {"FinOpsStatus": "In Progress", "Comments": "snapshot first"}}
    }))
    .unwrap();
    let stale = session
        .save_edits(&store, Partition::InProgress, &edits, today)
        .unwrap();
    assert!(stale.is_empty());

    let day2 = Utc.with_ymd_and_hms(2026, 4, 3, 8, 0, 0).unwrap();
    let repulled = cache.load_or_refresh(FindingKind::Uebs, &source, day2, true).unwrap();
    assert!(repulled.refreshed);
    let vol1 = repulled.summary.iter().find(|r| r.resource_id == "vol-1").unwrap();
    assert_eq!(vol1.status.as_str(), "In Progress");
    assert_eq!(vol1.comments, "");

    let edits: EditSet = serde_json::from_value(json!({
        "edited_rows": {"0": {"FinOpsStatus": "Complete"}}
    }))
    .unwrap();
    session
        .save_edits(&store, Partition::InProgress, &edits, day2.date_naive())
        .unwrap();
    let ledger = store.load_ledger().unwrap().ledger;
    assert!(ledger.in_progress.is_empty());
    assert_eq!(ledger.complete.len(), 1);
    assert_eq!(ledger.complete[0].date_of_savings, Some(day2.date_naive()));
    assert_eq!(ledger.complete[0].comments, "snapshot first");

    let day3 = Utc.with_ymd_and_hms(2026, 4, 5, 8, 0, 0).unwrap();
    let again = cache.load_or_refresh(FindingKind::Uebs, &source, day3, true).unwrap();
    let vol1 = again.summary.iter().find(|r| r.resource_id == "vol-1").unwrap();
    assert!(vol1.status.is_needs_research());
}

#[test]
fn test_stale_session_cannot_overwrite_newer_edit() {
    let store = TrackerStore::new(MemoryBlobStore::new(), "Tracking");
    let mut row = finding("i-1", "h1", "Stop");
    row.status = "In Progress".into();
    row.last_modified = NaiveDate::from_ymd_opt(2026, 2, 1);
    store.save_ledger(&Ledger::new(vec![row], Vec::new(), Vec::new())).unwrap();

    let mut early = Session::open(&store).unwrap();
    let mut late = Session::open(&store).unwrap();
    let comment = |text: &str| -> EditSet {
        serde_json::from_value(json!({"edited_rows": {"0": {"Comments": text}}})).unwrap()
    };

    let feb = |d: u32| NaiveDate::from_ymd_opt(2026, 2, d).unwrap();
    late.save_edits(&store, Partition::InProgress, &comment("newer"), feb(10))
        .unwrap();
    let stale = early
        .save_edits(&store, Partition::InProgress, &comment("older"), feb(5))
        .unwrap();
    assert_eq!(stale, vec![0]);
    assert_eq!(store.load(Partition::InProgress).unwrap()[0].comments, "newer");

    let delete: EditSet =
        serde_json::from_value(json!({"edited_rows": {"0": {"FinOpsStatus": "DeleteMe"}}})).unwrap();
    let stale = early
        .save_edits(&store, Partition::InProgress, &delete, feb(5))
        .unwrap();
    assert!(stale.is_empty());
    assert!(store.load(Partition::InProgress).unwrap().is_empty());
}
