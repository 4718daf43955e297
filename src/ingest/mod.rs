//! Provider ingestion.
//!
//! Each provider adapter implements [`Ingester`] and writes normalized rows
//! through the catalog upsert path. Adapters own their fetch strategy (HTTP,
//! headless browser, cached snapshot); the pipeline owns their lifecycle and
//! runs them once per refresh. The snapshot ingester ships in-repo and reads
//! a JSON file of normalized rows, which is also how fixtures get loaded in
//! tests.

pub mod normalize;
pub mod snapshot;

use chrono::Utc;

use crate::db::{DbError, DbPool};

/// Outcome counters for one ingester run, surfaced in the run summary.
#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub upserted: usize,
    pub skipped_invalid: usize,
    pub dropped_non_sport: usize,
    pub dropped_replay: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Snapshot read error: {0}")]
    Snapshot(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Everything an ingester may need: the pool plus ambient timestamps.
pub struct IngestContext {
    pub pool: DbPool,
    pub now_utc: chrono::DateTime<Utc>,
}

impl IngestContext {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            now_utc: Utc::now(),
        }
    }
}

/// A pluggable provider adapter. Implementations must be idempotent under
/// re-runs and must populate the catalog invariants (pvid, both time forms).
#[async_trait::async_trait]
pub trait Ingester: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &IngestContext) -> Result<IngestSummary, IngestError>;
}
