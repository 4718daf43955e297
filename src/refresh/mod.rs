//! Refresh orchestration.
//!
//! One pipeline run rebuilds everything downstream of the catalog: ingest,
//! schema ensure, dedupe + integrity check, lane plans, artifacts, DVR
//! notification. Steps run in-process and strictly in order; each returns a
//! structured summary that lands in the log ring. At most one run executes
//! at a time; concurrent requests are rejected so callers can surface a 409.

pub mod logbuffer;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::db::{self, catalog, DbError, DbPool};
use crate::dvr::DvrClient;
use crate::export;
use crate::ingest::snapshot::SnapshotIngester;
use crate::ingest::{IngestContext, Ingester};
use crate::lanes::{self, adb, LanePlanConfig};
use crate::timeutil::fmt_iso_utc;

use logbuffer::LogBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Manual,
    Auto,
}

impl RunKind {
    fn as_str(&self) -> &'static str {
        match self {
            RunKind::Manual => "manual",
            RunKind::Auto => "auto",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("A refresh is already running")]
    AlreadyRunning,

    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: &'static str, message: String },
}

/// Status snapshot served by `/api/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshStatus {
    pub running: bool,
    pub current_step: Option<String>,
    pub last_run: Option<String>,
    pub last_status: Option<String>,
    pub last_run_manual: Option<String>,
    pub last_status_manual: Option<String>,
    pub last_run_auto: Option<String>,
    pub last_status_auto: Option<String>,
}

pub struct RefreshRunner {
    pool: DbPool,
    config: Arc<Config>,
    logs: Arc<LogBuffer>,
    status: RwLock<RefreshStatus>,
    run_gate: tokio::sync::Mutex<()>,
}

impl RefreshRunner {
    pub fn new(pool: DbPool, config: Arc<Config>, logs: Arc<LogBuffer>) -> Self {
        Self {
            pool,
            config,
            logs,
            status: RwLock::new(RefreshStatus::default()),
            run_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn status(&self) -> RefreshStatus {
        self.status.read().await.clone()
    }

    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    async fn set_step(&self, step: &'static str) {
        let mut status = self.status.write().await;
        status.current_step = Some(step.to_string());
    }

    /// Snapshot ingesters for every JSON file in the ingest directory.
    fn discover_ingesters(&self) -> Vec<Box<dyn Ingester>> {
        let mut out: Vec<Box<dyn Ingester>> = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.config.ingest_dir) else {
            return out;
        };
        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        for path in paths {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "snapshot".to_string());
            out.push(Box::new(SnapshotIngester::new(name, path)));
        }
        out
    }

    /// Run the full pipeline. Returns the final status string.
    pub async fn run(&self, kind: RunKind) -> Result<String, RefreshError> {
        let _guard = self
            .run_gate
            .try_lock()
            .map_err(|_| RefreshError::AlreadyRunning)?;

        let started = fmt_iso_utc(Utc::now());
        {
            let mut status = self.status.write().await;
            status.running = true;
            status.current_step = None;
        }
        self.logs
            .append(format!("=== refresh started ({}) ===", kind.as_str()));

        let result = self.run_steps().await;

        let outcome = match &result {
            Ok(()) => "success".to_string(),
            Err(e) => format!("failed: {}", e),
        };
        self.logs
            .append(format!("=== refresh finished: {} ===", outcome));

        {
            let mut status = self.status.write().await;
            status.running = false;
            status.current_step = None;
            status.last_run = Some(started.clone());
            status.last_status = Some(outcome.clone());
            match kind {
                RunKind::Manual => {
                    status.last_run_manual = Some(started.clone());
                    status.last_status_manual = Some(outcome.clone());
                }
                RunKind::Auto => {
                    status.last_run_auto = Some(started.clone());
                    status.last_status_auto = Some(outcome.clone());
                }
            }
        }

        result.map(|_| outcome)
    }

    async fn run_steps(&self) -> Result<(), RefreshError> {
        self.step_ingest().await?;
        self.step_ensure_schema().await?;
        self.step_integrity().await?;
        self.step_build_lanes().await?;
        self.step_build_adb_lanes().await?;
        self.step_emit().await?;
        self.step_notify_dvr().await;
        Ok(())
    }

    async fn step_ingest(&self) -> Result<(), RefreshError> {
        self.set_step("ingest").await;
        let ingesters = self.discover_ingesters();
        if ingesters.is_empty() {
            self.logs.append("ingest: no snapshot files, skipping");
            return Ok(());
        }

        let ctx = IngestContext::new(self.pool.clone());
        for ingester in ingesters {
            match ingester.run(&ctx).await {
                Ok(summary) => self.logs.append(format!(
                    "ingest {}: {} upserted, {} invalid, {} non-sport, {} replays",
                    ingester.name(),
                    summary.upserted,
                    summary.skipped_invalid,
                    summary.dropped_non_sport,
                    summary.dropped_replay
                )),
                // A failing source does not stop the pipeline
                Err(e) => self
                    .logs
                    .append(format!("ingest {}: FAILED: {}", ingester.name(), e)),
            };
        }

        match export::prune_debug_artifacts(
            &self.config.log_dir,
            "amazon_scrape_",
            self.config.debug_artifacts_keep,
        ) {
            Ok(removed) if removed > 0 => {
                self.logs
                    .append(format!("pruned {} old debug artifacts", removed));
            }
            _ => {}
        }
        Ok(())
    }

    async fn step_ensure_schema(&self) -> Result<(), RefreshError> {
        self.set_step("ensure-schema").await;
        let mut conn = self.checkout("ensure-schema")?;
        db::run_migrations(&mut conn).map_err(|e| RefreshError::StepFailed {
            step: "ensure-schema",
            message: e.to_string(),
        })?;
        self.logs.append("schema ensured");
        Ok(())
    }

    async fn step_integrity(&self) -> Result<(), RefreshError> {
        self.set_step("integrity").await;
        let mut conn = self.checkout("integrity")?;

        let discarded = catalog::dedupe_by_pvid(&mut conn).map_err(|e| {
            RefreshError::StepFailed {
                step: "integrity",
                message: e.to_string(),
            }
        })?;
        if discarded > 0 {
            self.logs
                .append(format!("dedupe: discarded {} duplicate events", discarded));
        }

        // Integrity violations are fatal: prior artifacts stay in place
        catalog::verify_catalog_integrity(&mut conn).map_err(|e| RefreshError::StepFailed {
            step: "integrity",
            message: e.to_string(),
        })?;
        self.logs.append("catalog integrity verified");
        Ok(())
    }

    async fn step_build_lanes(&self) -> Result<(), RefreshError> {
        self.set_step("build-lanes").await;
        let mut conn = self.checkout("build-lanes")?;
        let cfg = LanePlanConfig::from(self.config.as_ref());
        let summary =
            lanes::build_lanes(&mut conn, &cfg).map_err(|e| RefreshError::StepFailed {
                step: "build-lanes",
                message: e.to_string(),
            })?;
        self.logs.append(format!(
            "lanes: {} scheduled, {} dropped, {} placeholders, {} filtered",
            summary.scheduled, summary.dropped, summary.placeholders, summary.filtered_out
        ));
        Ok(())
    }

    async fn step_build_adb_lanes(&self) -> Result<(), RefreshError> {
        self.set_step("build-adb-lanes").await;
        let mut conn = self.checkout("build-adb-lanes")?;
        let summary = adb::build_adb_lanes(&mut conn).map_err(|e| RefreshError::StepFailed {
            step: "build-adb-lanes",
            message: e.to_string(),
        })?;
        self.logs.append(format!(
            "adb lanes: {} providers, {} scheduled, {} dropped",
            summary.providers_built, summary.scheduled, summary.dropped
        ));
        Ok(())
    }

    async fn step_emit(&self) -> Result<(), RefreshError> {
        self.set_step("emit").await;
        let mut conn = self.checkout("emit")?;
        let summary = export::emit_all(&mut conn, &self.config).map_err(|e| {
            RefreshError::StepFailed {
                step: "emit",
                message: e.to_string(),
            }
        })?;
        self.logs.append(format!(
            "artifacts: {} files written, {} events missing deeplinks",
            summary.files_written.len(),
            summary.missing_deeplinks
        ));
        Ok(())
    }

    /// Best-effort: ask the DVR to rescan so it picks up fresh artifacts.
    async fn step_notify_dvr(&self) {
        self.set_step("notify-dvr").await;
        if !self.config.detector_enabled() {
            return;
        }
        let dvr = DvrClient::new(&self.config);
        match dvr.scan().await {
            Ok(()) => self.logs.append("dvr: rescan triggered"),
            Err(e) => self.logs.append(format!("dvr: rescan failed: {}", e)),
        };
    }

    fn checkout(&self, step: &'static str) -> Result<crate::db::DbPooledConnection, RefreshError> {
        self.pool
            .get()
            .map_err(DbError::PoolCheckout)
            .map_err(|e| RefreshError::StepFailed {
                step,
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::upsert_event;
    use crate::db::connection::create_migrated_pool;
    use crate::db::test_support::{make_event, make_playable};

    fn runner(out_dir: &std::path::Path) -> RefreshRunner {
        let pool = create_migrated_pool(":memory:").expect("pool");
        {
            let mut conn = pool.get().unwrap();
            let ev = make_event("e1", Some("pv1"), 1, 3);
            upsert_event(&mut conn, &ev, &[make_playable("e1", "p1", "peacock")], &[]).unwrap();
        }
        let mut cfg = Config::default();
        cfg.out_dir = out_dir.to_path_buf();
        cfg.lane_count = 2;
        RefreshRunner::new(pool, Arc::new(cfg), Arc::new(LogBuffer::new(100)))
    }

    #[tokio::test]
    async fn test_full_run_succeeds_and_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner(dir.path());

        let outcome = runner.run(RunKind::Manual).await.expect("run");
        assert_eq!(outcome, "success");

        let status = runner.status().await;
        assert!(!status.running);
        assert_eq!(status.last_status.as_deref(), Some("success"));
        assert_eq!(status.last_status_manual.as_deref(), Some("success"));
        assert!(status.last_status_auto.is_none());

        assert!(dir.path().join("multisource_lanes.m3u").exists());

        let lines = runner.logs().since(0);
        assert!(lines.iter().any(|l| l.line.contains("refresh started")));
        assert!(lines.iter().any(|l| l.line.contains("lanes:")));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner(dir.path());

        runner.run(RunKind::Manual).await.expect("first");
        let first_m3u =
            std::fs::read_to_string(dir.path().join("multisource_lanes.m3u")).unwrap();
        runner.run(RunKind::Auto).await.expect("second");
        let second_m3u =
            std::fs::read_to_string(dir.path().join("multisource_lanes.m3u")).unwrap();
        assert_eq!(first_m3u, second_m3u);

        let status = runner.status().await;
        assert_eq!(status.last_status_auto.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn test_concurrent_run_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner(dir.path());

        let _guard = runner.run_gate.try_lock().expect("hold gate");
        let err = runner.run(RunKind::Manual).await.expect_err("must reject");
        assert!(matches!(err, RefreshError::AlreadyRunning));
    }
}
