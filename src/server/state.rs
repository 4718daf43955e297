use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::db::{DbPool, DbPooledConnection};
use crate::detector::Detector;
use crate::refresh::RefreshRunner;
use crate::scheduler::RefreshScheduler;

/// Shared state behind every request handler.
#[derive(Clone)]
pub struct AppState {
    pool: DbPool,
    config: Arc<Config>,
    runner: Arc<RefreshRunner>,
    scheduler: Option<RefreshScheduler>,
    detector: Arc<Detector>,
    /// Pre-rendered dummy TS segment; `None` when ffmpeg was unavailable
    segment: Arc<RwLock<Option<Bytes>>>,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        config: Arc<Config>,
        runner: Arc<RefreshRunner>,
        scheduler: Option<RefreshScheduler>,
        detector: Arc<Detector>,
    ) -> Self {
        Self {
            pool,
            config,
            runner,
            scheduler,
            detector,
            segment: Arc::new(RwLock::new(None)),
        }
    }

    pub fn get_connection(&self) -> Result<DbPooledConnection, r2d2::Error> {
        self.pool.get()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runner(&self) -> &Arc<RefreshRunner> {
        &self.runner
    }

    pub fn scheduler(&self) -> Option<&RefreshScheduler> {
        self.scheduler.as_ref()
    }

    pub fn detector(&self) -> &Arc<Detector> {
        &self.detector
    }

    pub async fn segment_bytes(&self) -> Option<Bytes> {
        self.segment.read().await.clone()
    }

    pub async fn set_segment_bytes(&self, bytes: Bytes) {
        *self.segment.write().await = Some(bytes);
    }
}
