use crate::blob_store::BlobStore;
use crate::config::DEFAULT_STALE_MINUTES;
use crate::TrackerError;
use chrono::{DateTime, Duration, Utc};

/// Staleness policy for cached tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub window: Duration,
}

impl Default for Freshness {
    fn default() -> Self {
        Self::minutes(DEFAULT_STALE_MINUTES)
    }
}

impl Freshness {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Out-of-range minutes saturate to the longest window.
    pub fn minutes(minutes: i64) -> Self {
        Self::new(Duration::try_minutes(minutes).unwrap_or(Duration::MAX))
    }

    /// Fresh iff the object exists and is no older than the window.
    pub fn is_fresh(&self, last_modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_modified {
            Some(modified) => now.signed_duration_since(modified) <= self.window,
            None => false,
        }
    }

    pub fn check<S: BlobStore + ?Sized>(&self, blobs: &S, key: &str, now: DateTime<Utc>) -> Result<bool, TrackerError> {
        Ok(self.is_fresh(blobs.last_modified(key)?, now))
    }
}
