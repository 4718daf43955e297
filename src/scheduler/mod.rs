//! Auto-refresh scheduling.
//!
//! A single cron job fires the refresh pipeline at the configured HH:MM
//! local time each day. Startup performs a missed-run check so a host that
//! was down at the scheduled time catches up shortly after boot.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveTime, Utc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use uuid::Uuid;

use crate::db::DbPool;
use crate::filters;
use crate::refresh::{RefreshRunner, RunKind};
use crate::timeutil::fmt_iso_utc;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Scheduler(err.to_string())
    }
}

/// Parse "HH:MM" into hour/minute.
pub fn parse_schedule_time(time: &str) -> Result<(u8, u8), SchedulerError> {
    let (h, m) = time
        .split_once(':')
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("expected HH:MM, got {}", time)))?;
    let hour: u8 = h
        .parse()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("bad hour in {}", time)))?;
    let minute: u8 = m
        .parse()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("bad minute in {}", time)))?;
    if hour > 23 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "Hour must be 0-23, got {}",
            hour
        )));
    }
    if minute > 59 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "Minute must be 0-59, got {}",
            minute
        )));
    }
    Ok((hour, minute))
}

/// Cron expression for a daily local-time job
/// ("sec min hour day-of-month month day-of-week").
pub fn build_cron_expression(hour: u8, minute: u8) -> String {
    format!("0 {} {} * * *", minute, hour)
}

#[derive(Clone)]
pub struct RefreshScheduler {
    scheduler: Arc<RwLock<Option<JobScheduler>>>,
    job_id: Arc<RwLock<Option<Uuid>>>,
    runner: Arc<RefreshRunner>,
    pool: DbPool,
    enabled: Arc<RwLock<bool>>,
}

impl RefreshScheduler {
    pub fn new(runner: Arc<RefreshRunner>, pool: DbPool) -> Self {
        Self {
            scheduler: Arc::new(RwLock::new(None)),
            job_id: Arc::new(RwLock::new(None)),
            runner,
            pool,
            enabled: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        let sched = JobScheduler::new().await?;
        sched.start().await?;
        *self.scheduler.write().await = Some(sched);
        tracing::info!("refresh scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(id) = *self.job_id.read().await {
            if let Some(ref sched) = *self.scheduler.read().await {
                let _ = sched.remove(&id).await;
            }
        }
        if let Some(ref mut sched) = *self.scheduler.write().await {
            sched.shutdown().await?;
        }
        *self.scheduler.write().await = None;
        *self.job_id.write().await = None;
        tracing::info!("refresh scheduler stopped");
        Ok(())
    }

    pub async fn is_enabled(&self) -> bool {
        *self.enabled.read().await
    }

    pub async fn has_job(&self) -> bool {
        self.job_id.read().await.is_some()
    }

    /// Apply a new enabled/time configuration: removes the current job and
    /// schedules a fresh one when enabled.
    pub async fn apply(&self, enabled: bool, time: &str) -> Result<(), SchedulerError> {
        *self.enabled.write().await = enabled;

        let scheduler_guard = self.scheduler.read().await;
        let sched = scheduler_guard
            .as_ref()
            .ok_or_else(|| SchedulerError::Scheduler("Scheduler not started".to_string()))?;

        if let Some(id) = *self.job_id.read().await {
            let _ = sched.remove(&id).await;
        }

        if !enabled {
            *self.job_id.write().await = None;
            tracing::info!("auto refresh disabled");
            return Ok(());
        }

        let (hour, minute) = parse_schedule_time(time)?;
        let cron = build_cron_expression(hour, minute);
        tracing::info!(cron = %cron, "scheduling auto refresh");

        let runner = self.runner.clone();
        let pool = self.pool.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let runner = runner.clone();
            let pool = pool.clone();
            Box::pin(async move {
                tracing::info!("scheduled refresh triggered");
                run_auto_refresh(runner, pool).await;
            })
        })
        .map_err(|e| SchedulerError::Scheduler(e.to_string()))?;

        let id = sched.add(job).await?;
        *self.job_id.write().await = Some(id);
        tracing::info!("auto refresh scheduled for {:02}:{:02} daily", hour, minute);
        Ok(())
    }

    /// Startup catch-up: trigger a run if the most recent scheduled time was
    /// missed while the process was down.
    pub async fn check_missed_run(&self, time: &str) {
        if !*self.enabled.read().await {
            return;
        }
        let Ok((hour, minute)) = parse_schedule_time(time) else {
            tracing::error!("invalid auto refresh time '{}', skipping missed-run check", time);
            return;
        };

        let last = self.load_last_auto_refresh();
        if should_trigger_missed_run(hour, minute, last, Local::now().naive_local()) {
            tracing::info!("missed auto refresh detected, triggering catch-up run");
            run_auto_refresh(self.runner.clone(), self.pool.clone()).await;
        }
    }

    fn load_last_auto_refresh(&self) -> Option<DateTime<Utc>> {
        let mut conn = self.pool.get().ok()?;
        let prefs: Option<String> = {
            use crate::db::schema::user_preferences::dsl::*;
            use diesel::prelude::*;
            user_preferences
                .filter(key.eq("last_auto_refresh"))
                .select(value)
                .first::<String>(&mut conn)
                .ok()
        };
        prefs
            .and_then(|v| serde_json::from_str::<String>(&v).ok())
            .and_then(|s| crate::timeutil::parse_iso_utc(&s))
    }
}

async fn run_auto_refresh(runner: Arc<RefreshRunner>, pool: DbPool) {
    match runner.run(RunKind::Auto).await {
        Ok(outcome) => tracing::info!(outcome = %outcome, "auto refresh finished"),
        Err(e) => tracing::error!("auto refresh failed: {}", e),
    }
    if let Ok(mut conn) = pool.get() {
        let _ = filters::set_preference(&mut conn, "last_auto_refresh", &fmt_iso_utc(Utc::now()));
    }
}

/// A run was missed when the most recent scheduled instant has passed and
/// the last recorded auto refresh predates it (or never happened).
pub fn should_trigger_missed_run(
    hour: u8,
    minute: u8,
    last_auto: Option<DateTime<Utc>>,
    now_local: chrono::NaiveDateTime,
) -> bool {
    let Some(schedule_time) = NaiveTime::from_hms_opt(hour as u32, minute as u32, 0) else {
        return false;
    };

    let today_scheduled = now_local.date().and_time(schedule_time);
    let most_recent = if today_scheduled <= now_local {
        today_scheduled
    } else {
        today_scheduled - chrono::Duration::days(1)
    };

    match last_auto {
        Some(last) => last.with_timezone(&Local).naive_local() < most_recent,
        None => true,
    }
}
