use crate::record::TrackerRecord;
use chrono::{Months, NaiveDate};
use tracing::info;

/// Completed savings are kept this many months after DateOfSavings.
pub const RETENTION_MONTHS: u32 = 24;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveOutcome {
    pub retained: Vec<TrackerRecord>,
    pub archived: Vec<TrackerRecord>,
}

/// First day that is still inside the retention window. Month arithmetic
/// clamps Feb 29 to Feb 28.
pub fn retention_cutoff(today: NaiveDate) -> NaiveDate {
    today
        .checked_sub_months(Months::new(RETENTION_MONTHS))
        .unwrap_or(NaiveDate::MIN)
}

/// Split Complete rows into those still retained and those whose
/// DateOfSavings falls before the cutoff. Rows with no DateOfSavings stay.
pub fn archive(complete: Vec<TrackerRecord>, today: NaiveDate) -> ArchiveOutcome {
    let cutoff = retention_cutoff(today);
    let (archived, retained): (Vec<_>, Vec<_>) = complete
        .into_iter()
        .partition(|r| r.date_of_savings.is_some_and(|d| d < cutoff));
    if !archived.is_empty() {
        info!(
            "[costtrack:archive] archiving {} rows saved before {}",
            archived.len(),
            cutoff
        );
    }
    ArchiveOutcome { retained, archived }
}
