pub mod archive;
pub mod blob_store;
pub mod config;
pub mod cost_model;
pub mod error;
pub mod finding;
pub mod findings_cache;
pub mod freshness;
pub mod identity;
pub mod ledger;
pub mod normalizer;
pub mod reconcile;
pub mod record;
#[cfg(feature = "s3")]
pub mod s3_store;
pub mod session;
pub mod store;
pub mod table_print;

pub use error::*;
pub use ledger::Ledger;
pub use record::{FinOpsStatus, Partition, RowKey, TrackerRecord};
pub use store::TrackerStore;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber for a binary. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_tracing(service: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
    if installed.is_ok() {
        tracing::debug!("[{}] tracing initialized", service);
    }
}
