//! Admin API handlers: status, refresh control, filters, provider lanes and
//! the events browser.

use std::collections::BTreeSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::catalog;
use crate::db::models::ProviderLane;
use crate::deeplink::{resolve_candidates, select_best};
use crate::filters::{self, classify, genres_of, Preferences};
use crate::mapper;
use crate::refresh::{RefreshError, RunKind};
use crate::timeutil::fmt_iso_utc;

use super::state::AppState;

/// Health check response structure
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Liveness probe used by monitoring and the DVR.
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
        }),
    )
}

/// 404 for anything not explicitly routed.
pub async fn fallback_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn db_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("admin query failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

// -------------------- Status + refresh --------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub refresh: crate::refresh::RefreshStatus,
    pub detector_enabled: bool,
    pub auto_refresh_enabled: bool,
    pub auto_refresh_time: String,
    pub events: EventStats,
}

#[derive(Serialize)]
pub struct EventStats {
    pub total_events: i64,
    pub upcoming_events: i64,
    pub total_playables: i64,
    pub events_missing_pvid: i64,
}

/// `GET /api/status`
pub async fn api_status(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;
    let prefs = filters::load_preferences(&mut conn).map_err(db_error)?;
    let stats = catalog::event_stats(&mut conn).map_err(db_error)?;

    Ok(Json(StatusResponse {
        refresh: state.runner().status().await,
        detector_enabled: state.config().detector_enabled(),
        auto_refresh_enabled: prefs.auto_refresh_enabled,
        auto_refresh_time: prefs.auto_refresh_time,
        events: EventStats {
            total_events: stats.total_events,
            upcoming_events: stats.upcoming_events,
            total_playables: stats.total_playables,
            events_missing_pvid: stats.events_missing_pvid,
        },
    }))
}

#[derive(Serialize)]
pub struct RefreshStarted {
    pub started: bool,
}

/// `POST /api/refresh` - kick off a manual run in the background. A second
/// request while one is running gets a 409.
pub async fn api_refresh(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<RefreshStarted>), (StatusCode, String)> {
    if state.runner().status().await.running {
        return Err((StatusCode::CONFLICT, "Refresh already running".to_string()));
    }

    let runner = state.runner().clone();
    tokio::spawn(async move {
        match runner.run(RunKind::Manual).await {
            Ok(outcome) => tracing::info!(outcome = %outcome, "manual refresh finished"),
            Err(RefreshError::AlreadyRunning) => {
                tracing::warn!("manual refresh lost the start race")
            }
            Err(e) => tracing::error!("manual refresh failed: {}", e),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(RefreshStarted { started: true })))
}

#[derive(Debug, Deserialize)]
pub struct AutoRefreshBody {
    pub enabled: bool,
    pub time: String,
}

#[derive(Serialize)]
pub struct AutoRefreshResponse {
    pub enabled: bool,
    pub time: String,
}

/// `GET /api/auto-refresh`
pub async fn get_auto_refresh(
    State(state): State<AppState>,
) -> Result<Json<AutoRefreshResponse>, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;
    let prefs = filters::load_preferences(&mut conn).map_err(db_error)?;
    Ok(Json(AutoRefreshResponse {
        enabled: prefs.auto_refresh_enabled,
        time: prefs.auto_refresh_time,
    }))
}

/// `POST /api/auto-refresh` - persist the schedule and apply it live.
pub async fn set_auto_refresh(
    State(state): State<AppState>,
    Json(body): Json<AutoRefreshBody>,
) -> Result<Json<AutoRefreshResponse>, (StatusCode, String)> {
    crate::scheduler::parse_schedule_time(&body.time)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    {
        let mut conn = state.get_connection().map_err(db_error)?;
        filters::set_preference(&mut conn, "auto_refresh_enabled", &body.enabled)
            .map_err(db_error)?;
        filters::set_preference(&mut conn, "auto_refresh_time", &body.time).map_err(db_error)?;
    }

    if let Some(scheduler) = state.scheduler() {
        scheduler
            .apply(body.enabled, &body.time)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }

    Ok(Json(AutoRefreshResponse {
        enabled: body.enabled,
        time: body.time,
    }))
}

// -------------------- Filters --------------------

#[derive(Serialize)]
pub struct AvailableService {
    pub code: String,
    pub display_name: String,
    pub event_count: i64,
}

#[derive(Serialize)]
pub struct AvailableFilters {
    pub services: Vec<AvailableService>,
    pub sports: Vec<String>,
    pub leagues: Vec<String>,
}

/// `GET /api/filters` - everything the filter UI can offer, computed from
/// future events.
pub async fn get_available_filters(
    State(state): State<AppState>,
) -> Result<Json<AvailableFilters>, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;

    let services = catalog::service_counts(&mut conn)
        .map_err(db_error)?
        .into_iter()
        .map(|row| AvailableService {
            display_name: mapper::service_display_name(&row.logical_service),
            code: row.logical_service,
            event_count: row.count,
        })
        .collect();

    let now_ms = Utc::now().timestamp_millis();
    let events = catalog::events_in_window(&mut conn, 0, 365).map_err(db_error)?;
    let mut sports = BTreeSet::new();
    let mut leagues = BTreeSet::new();
    for event in events.iter().filter(|e| e.end_ms > now_ms) {
        let classification = classify(event.classification_json.as_deref());
        if let Some(sport) = classification.sport {
            sports.insert(sport);
        }
        if let Some(league) = classification.league {
            leagues.insert(league);
        }
        for genre in genres_of(event) {
            sports.insert(genre);
        }
    }

    Ok(Json(AvailableFilters {
        services,
        sports: sports.into_iter().collect(),
        leagues: leagues.into_iter().collect(),
    }))
}

/// `GET /api/filters/preferences`
pub async fn get_preferences(
    State(state): State<AppState>,
) -> Result<Json<Preferences>, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;
    let prefs = filters::load_preferences(&mut conn).map_err(db_error)?;
    Ok(Json(prefs))
}

/// `POST /api/filters/preferences` - replace the stored filter preferences.
/// The auto-refresh schedule has its own endpoint and is left untouched.
pub async fn set_preferences(
    State(state): State<AppState>,
    Json(prefs): Json<Preferences>,
) -> Result<Json<Preferences>, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;
    filters::set_preference(&mut conn, "enabled_services", &prefs.enabled_services)
        .map_err(db_error)?;
    filters::set_preference(&mut conn, "disabled_sports", &prefs.disabled_sports)
        .map_err(db_error)?;
    filters::set_preference(&mut conn, "disabled_leagues", &prefs.disabled_leagues)
        .map_err(db_error)?;
    filters::set_preference(&mut conn, "service_priorities", &prefs.service_priorities)
        .map_err(db_error)?;
    filters::set_preference(&mut conn, "amazon_penalty", &prefs.amazon_penalty)
        .map_err(db_error)?;
    filters::set_preference(&mut conn, "language_preference", &prefs.language_preference)
        .map_err(db_error)?;
    Ok(Json(prefs))
}

#[derive(Debug, Deserialize)]
pub struct PrioritiesBody {
    pub service_priorities: std::collections::HashMap<String, i32>,
}

/// `POST /api/filters/priorities`
pub async fn set_priorities(
    State(state): State<AppState>,
    Json(body): Json<PrioritiesBody>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;
    filters::set_preference(&mut conn, "service_priorities", &body.service_priorities)
        .map_err(db_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct SelectionExample {
    pub event_id: String,
    pub title: String,
    pub services: Vec<String>,
    pub winner: Option<String>,
    pub winner_display: Option<String>,
    pub reason: Option<String>,
}

/// `GET /api/filters/selection-examples` - sample future events annotated
/// with the service that would win under current preferences and why. The
/// debuggability window into the selection engine.
pub async fn selection_examples(
    State(state): State<AppState>,
) -> Result<Json<Vec<SelectionExample>>, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;
    let prefs = filters::load_preferences(&mut conn).map_err(db_error)?;

    let now_ms = Utc::now().timestamp_millis();
    let events = catalog::events_in_window(&mut conn, 0, 365).map_err(db_error)?;

    let mut examples = Vec::new();
    for event in events.into_iter().filter(|e| e.end_ms > now_ms) {
        let candidates = resolve_candidates(&mut conn, &event.id).map_err(db_error)?;
        if candidates.is_empty() {
            continue;
        }

        let services: Vec<String> = candidates
            .iter()
            .map(|c| c.logical_service.clone())
            .collect();
        let selection = select_best(&candidates, &prefs);

        examples.push(SelectionExample {
            event_id: event.id,
            title: event.title,
            services,
            winner: selection
                .as_ref()
                .map(|s| s.candidate.logical_service.clone()),
            winner_display: selection
                .as_ref()
                .map(|s| mapper::service_display_name(&s.candidate.logical_service)),
            reason: selection.map(|s| s.reason),
        });

        if examples.len() >= 10 {
            break;
        }
    }

    Ok(Json(examples))
}

// -------------------- Provider lanes --------------------

#[derive(Serialize)]
pub struct ProviderLaneRow {
    pub provider_code: String,
    pub display_name: String,
    pub adb_enabled: bool,
    pub adb_lane_count: i32,
}

/// `GET /api/provider_lanes`
pub async fn get_provider_lanes(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProviderLaneRow>>, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;
    let rows = catalog::all_provider_lanes(&mut conn).map_err(db_error)?;
    Ok(Json(
        rows.into_iter()
            .map(|r| ProviderLaneRow {
                display_name: mapper::service_display_name(&r.provider_code),
                provider_code: r.provider_code,
                adb_enabled: r.adb_enabled == 1,
                adb_lane_count: r.adb_lane_count,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ProviderLaneBody {
    pub provider_code: String,
    pub adb_enabled: bool,
    pub adb_lane_count: i32,
}

/// `POST /api/provider_lanes`
pub async fn set_provider_lane(
    State(state): State<AppState>,
    Json(body): Json<ProviderLaneBody>,
) -> Result<StatusCode, (StatusCode, String)> {
    if body.adb_lane_count < 0 || body.adb_lane_count > 99 {
        return Err((
            StatusCode::BAD_REQUEST,
            "adb_lane_count must be 0-99".to_string(),
        ));
    }
    let mut conn = state.get_connection().map_err(db_error)?;
    catalog::upsert_provider_lane(
        &mut conn,
        &ProviderLane {
            provider_code: body.provider_code,
            adb_enabled: body.adb_enabled as i32,
            adb_lane_count: body.adb_lane_count,
            updated_at: fmt_iso_utc(Utc::now()),
        },
    )
    .map_err(db_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// -------------------- Events browser --------------------

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    #[serde(default)]
    pub days_back: Option<i64>,
    #[serde(default)]
    pub days_forward: Option<i64>,
}

#[derive(Serialize)]
pub struct EventSummary {
    pub id: String,
    pub title: String,
    pub channel_name: Option<String>,
    pub start_utc: String,
    pub end_utc: String,
    pub sport: Option<String>,
    pub league: Option<String>,
}

/// `GET /api/events`
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Result<Json<Vec<EventSummary>>, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;
    let events = catalog::events_in_window(
        &mut conn,
        params.days_back.unwrap_or(1),
        params.days_forward.unwrap_or(7),
    )
    .map_err(db_error)?;

    Ok(Json(
        events
            .into_iter()
            .map(|e| {
                let classification = classify(e.classification_json.as_deref());
                EventSummary {
                    id: e.id,
                    title: e.title,
                    channel_name: e.channel_name,
                    start_utc: e.start_utc,
                    end_utc: e.end_utc,
                    sport: classification.sport,
                    league: classification.league,
                }
            })
            .collect(),
    ))
}

/// `GET /api/events/stats`
pub async fn events_stats(
    State(state): State<AppState>,
) -> Result<Json<EventStats>, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;
    let stats = catalog::event_stats(&mut conn).map_err(db_error)?;
    Ok(Json(EventStats {
        total_events: stats.total_events,
        upcoming_events: stats.upcoming_events,
        total_playables: stats.total_playables,
        events_missing_pvid: stats.events_missing_pvid,
    }))
}

#[derive(Serialize)]
pub struct EventDetail {
    pub event: crate::server::EventJson,
    pub playables: Vec<PlayableJson>,
}

#[derive(Serialize)]
pub struct PlayableJson {
    pub playable_id: String,
    pub provider: String,
    pub logical_service: Option<String>,
    pub deeplink_play: Option<String>,
    pub deeplink_open: Option<String>,
    pub http_deeplink_url: Option<String>,
    pub locale: Option<String>,
    pub priority: i32,
    pub espn_graph_id: Option<String>,
}

/// `GET /api/events/{id}`
pub async fn get_event_detail(
    Path(event_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<EventDetail>, (StatusCode, String)> {
    let mut conn = state.get_connection().map_err(db_error)?;
    let Some(event) = catalog::get_event(&mut conn, &event_id).map_err(db_error)? else {
        return Err((StatusCode::NOT_FOUND, "Event not found".to_string()));
    };
    let playables = catalog::playables_for_event(&mut conn, &event_id).map_err(db_error)?;

    Ok(Json(EventDetail {
        event: crate::server::EventJson::from(&event),
        playables: playables
            .into_iter()
            .map(|p| PlayableJson {
                playable_id: p.playable_id,
                provider: p.provider,
                logical_service: p.logical_service,
                deeplink_play: p.deeplink_play,
                deeplink_open: p.deeplink_open,
                http_deeplink_url: p.http_deeplink_url,
                locale: p.locale,
                priority: p.priority,
                espn_graph_id: p.espn_graph_id,
            })
            .collect(),
    }))
}
