//! Snapshot ingester: loads normalized provider rows from a JSON file.
//!
//! External scrapers dump their raw harvest into snapshot files; this
//! adapter turns them into catalog rows, applying the shared normalization
//! rules and recomputing logical services. It never trusts upstream
//! `logical_service` values.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Datelike;
use serde::Deserialize;

use crate::db::catalog;
use crate::db::models::{Event, EventImage, Playable};
use crate::ingest::normalize::{
    normalize_genres, normalize_sport, should_drop_record, sport_fallback_image_url,
};
use crate::ingest::{IngestContext, IngestError, IngestSummary, Ingester};
use crate::mapper;
use crate::timeutil::{fmt_iso_utc, ms_to_dt, parse_iso_utc};

#[derive(Debug, Deserialize)]
pub struct SnapshotFile {
    /// Stable id prefix for this provider ("appletv", "bein", "kayo", ...)
    pub provider_prefix: String,
    #[serde(default)]
    pub events: Vec<SnapshotEvent>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotEvent {
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub title_brief: Option<String>,
    #[serde(default)]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub synopsis_brief: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub channel_provider_id: Option<String>,
    #[serde(default)]
    pub start_utc: Option<String>,
    #[serde(default)]
    pub end_utc: Option<String>,
    #[serde(default)]
    pub start_ms: Option<i64>,
    #[serde(default)]
    pub end_ms: Option<i64>,
    #[serde(default)]
    pub sport: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub league: Option<String>,
    #[serde(default)]
    pub extra_genres: Vec<String>,
    #[serde(default)]
    pub is_free: Option<bool>,
    #[serde(default)]
    pub is_premium: Option<bool>,
    #[serde(default)]
    pub hero_image_url: Option<String>,
    #[serde(default)]
    pub airing_type: Option<String>,
    #[serde(default)]
    pub is_reair: Option<bool>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub raw_attributes: Option<serde_json::Value>,
    #[serde(default)]
    pub playables: Vec<SnapshotPlayable>,
    #[serde(default)]
    pub images: Vec<SnapshotImage>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotPlayable {
    pub playable_id: String,
    pub provider: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub deeplink_play: Option<String>,
    #[serde(default)]
    pub deeplink_open: Option<String>,
    #[serde(default)]
    pub playable_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub espn_graph_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotImage {
    pub img_type: String,
    pub url: String,
}

pub struct SnapshotIngester {
    name: String,
    path: PathBuf,
}

impl SnapshotIngester {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl Ingester for SnapshotIngester {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &IngestContext) -> Result<IngestSummary, IngestError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| IngestError::Snapshot(format!("{}: {}", self.path.display(), e)))?;
        let snapshot: SnapshotFile = serde_json::from_str(&raw)
            .map_err(|e| IngestError::Snapshot(format!("{}: {}", self.path.display(), e)))?;

        ingest_snapshot(ctx, &snapshot)
    }
}

/// Convert and upsert every event in a snapshot. Record-level violations are
/// counted and skipped; they never fail the run.
pub fn ingest_snapshot(
    ctx: &IngestContext,
    snapshot: &SnapshotFile,
) -> Result<IngestSummary, IngestError> {
    let mut conn = ctx.pool.get().map_err(crate::db::DbError::PoolCheckout)?;
    let mut summary = IngestSummary::default();
    let current_year = ctx.now_utc.year();

    for row in &snapshot.events {
        let sport_input = row.sport.as_deref().unwrap_or("");
        let category = row.category.as_deref().unwrap_or("");
        let genre = row.genre.as_deref().unwrap_or("");

        // No sport signal at all means this is not a sports airing
        if sport_input.is_empty() && category.is_empty() && genre.is_empty() {
            summary.dropped_non_sport += 1;
            continue;
        }

        if should_drop_record(&row.title, category, current_year) {
            summary.dropped_replay += 1;
            continue;
        }

        let sport = normalize_sport(sport_input, category, genre);

        // Resolve both time forms, skipping records where either end is
        // missing or inverted
        let start = row
            .start_utc
            .as_deref()
            .and_then(parse_iso_utc)
            .or_else(|| row.start_ms.and_then(ms_to_dt));
        let end = row
            .end_utc
            .as_deref()
            .and_then(parse_iso_utc)
            .or_else(|| row.end_ms.and_then(ms_to_dt));
        let (Some(start), Some(end)) = (start, end) else {
            tracing::warn!(
                ingester = %self_name(snapshot),
                external_id = %row.external_id,
                "skipping record with missing timestamps"
            );
            summary.skipped_invalid += 1;
            continue;
        };
        if end <= start || row.external_id.trim().is_empty() {
            summary.skipped_invalid += 1;
            continue;
        }

        let event_id = format!("{}-{}", snapshot.provider_prefix, row.external_id);

        let mut genres = vec![sport.to_string()];
        genres.extend(normalize_genres(&row.extra_genres));

        let mut classification = vec![serde_json::json!({"type": "sport", "value": sport})];
        if let Some(league) = row.league.as_deref().filter(|l| !l.trim().is_empty()) {
            classification.push(serde_json::json!({"type": "league", "value": league}));
        }

        let hero = row
            .hero_image_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| sport_fallback_image_url(sport));

        let event = Event {
            id: event_id.clone(),
            pvid: Some(row.external_id.clone()),
            slug: None,
            title: row.title.clone(),
            title_brief: row.title_brief.clone(),
            synopsis: row.synopsis.clone(),
            synopsis_brief: row.synopsis_brief.clone(),
            channel_name: row.channel_name.clone(),
            channel_provider_id: row.channel_provider_id.clone(),
            start_utc: fmt_iso_utc(start),
            end_utc: fmt_iso_utc(end),
            start_ms: start.timestamp_millis(),
            end_ms: end.timestamp_millis(),
            runtime_secs: Some((end - start).num_seconds() as i32),
            is_free: row.is_free.unwrap_or(false) as i32,
            is_premium: row.is_premium.unwrap_or(false) as i32,
            hero_image_url: Some(hero),
            genres_json: serde_json::to_string(&genres).ok(),
            classification_json: serde_json::to_string(&classification).ok(),
            airing_type: row.airing_type.clone(),
            is_reair: row.is_reair.unwrap_or(false) as i32,
            venue: row.venue.clone(),
            raw_attributes_json: row.raw_attributes.as_ref().map(|v| v.to_string()),
            last_seen_utc: fmt_iso_utc(ctx.now_utc),
        };

        let created = fmt_iso_utc(ctx.now_utc);
        let playables: Vec<Playable> = row
            .playables
            .iter()
            .map(|p| {
                let logical = mapper::logical_service_for_playable(
                    &p.provider,
                    p.deeplink_play.as_deref(),
                    p.deeplink_open.as_deref(),
                    p.playable_url.as_deref(),
                    None,
                    None,
                );
                Playable {
                    event_id: event_id.clone(),
                    playable_id: p.playable_id.clone(),
                    provider: p.provider.clone(),
                    service_name: p.service_name.clone(),
                    logical_service: Some(logical),
                    deeplink_play: p.deeplink_play.clone(),
                    deeplink_open: p.deeplink_open.clone(),
                    http_deeplink_url: None,
                    playable_url: p.playable_url.clone(),
                    title: p.title.clone(),
                    content_id: p.content_id.clone(),
                    locale: p.locale.clone(),
                    priority: p.priority.unwrap_or(0),
                    espn_graph_id: p.espn_graph_id.clone(),
                    created_utc: created.clone(),
                }
            })
            .collect();

        let images: Vec<EventImage> = row
            .images
            .iter()
            .map(|i| EventImage {
                event_id: event_id.clone(),
                img_type: i.img_type.clone(),
                url: i.url.clone(),
            })
            .collect();

        catalog::upsert_event(&mut conn, &event, &playables, &images)?;
        summary.upserted += 1;
    }

    // Amazon playables pick up channel-specific services once the GTI map
    // has rows for them
    apply_amazon_remap(&mut conn)?;

    Ok(summary)
}

fn self_name(snapshot: &SnapshotFile) -> String {
    format!("snapshot:{}", snapshot.provider_prefix)
}

/// Second normalization pass: rewrite `aiv` playables whose GTI is known in
/// the Amazon channel table.
fn apply_amazon_remap(conn: &mut crate::db::DbPooledConnection) -> Result<(), IngestError> {
    use crate::db::schema::playables::dsl as p;
    use diesel::prelude::*;

    let amazon_rows: Vec<Playable> = p::playables
        .filter(p::logical_service.eq("aiv"))
        .load(conn)
        .map_err(crate::db::DbError::Query)?;

    for row in amazon_rows {
        let Some(url) = row.best_url().map(String::from) else {
            continue;
        };
        if let Some(remapped) = mapper::remap_amazon_service(conn, &url) {
            diesel::update(
                p::playables
                    .filter(p::event_id.eq(&row.event_id))
                    .filter(p::playable_id.eq(&row.playable_id)),
            )
            .set(p::logical_service.eq(&remapped))
            .execute(conn)
            .map_err(crate::db::DbError::Query)?;
        }
    }
    Ok(())
}
