use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    api_refresh, api_status, events_stats, fallback_handler, get_auto_refresh,
    get_available_filters, get_event_detail, get_preferences, get_provider_lanes, health_check,
    list_events, selection_examples, set_auto_refresh, set_preferences, set_priorities,
    set_provider_lane,
};
use super::hls::{segment_ts, stream_m3u8};
use super::logs::logs_stream;
use super::state::AppState;
use super::whatson::{adb_lane_deeplink, lane_deeplink, lane_launch, whatson};

/// Create the Axum router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Resolver surface
        .route("/whatson/{lane}", get(whatson))
        .route("/api/lane/{lane}/deeplink", get(lane_deeplink))
        .route("/api/lane/{lane}/launch", get(lane_launch))
        .route(
            "/api/adb/lanes/{provider_code}/{lane_number}/deeplink",
            get(adb_lane_deeplink),
        )
        // HLS stub that arms the detector
        .route("/lane/{lane}/stream.m3u8", get(stream_m3u8))
        .route("/lane/{lane}/segment.ts", get(segment_ts))
        // Admin API
        .route("/api/status", get(api_status))
        .route("/api/refresh", post(api_refresh))
        .route(
            "/api/auto-refresh",
            get(get_auto_refresh).post(set_auto_refresh),
        )
        .route("/api/filters", get(get_available_filters))
        .route(
            "/api/filters/preferences",
            get(get_preferences).post(set_preferences),
        )
        .route("/api/filters/priorities", post(set_priorities))
        .route("/api/filters/selection-examples", get(selection_examples))
        .route(
            "/api/provider_lanes",
            get(get_provider_lanes).post(set_provider_lane),
        )
        .route("/api/events", get(list_events))
        .route("/api/events/stats", get(events_stats))
        .route("/api/events/{id}", get(get_event_detail))
        .route("/api/logs/stream", get(logs_stream))
        .fallback(fallback_handler)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
