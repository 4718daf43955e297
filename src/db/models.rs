use diesel::prelude::*;

use crate::db::schema::{
    adb_lanes, amazon_channels, auth_blobs, event_images, events, lane_events, lanes, playables,
    provider_lanes, user_preferences,
};

/// Full event row as stored in the catalog
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = events)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Event {
    pub id: String,
    pub pvid: Option<String>,
    pub slug: Option<String>,
    pub title: String,
    pub title_brief: Option<String>,
    pub synopsis: Option<String>,
    pub synopsis_brief: Option<String>,
    pub channel_name: Option<String>,
    pub channel_provider_id: Option<String>,
    pub start_utc: String,
    pub end_utc: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub runtime_secs: Option<i32>,
    pub is_free: i32,
    pub is_premium: i32,
    pub hero_image_url: Option<String>,
    pub genres_json: Option<String>,
    pub classification_json: Option<String>,
    pub airing_type: Option<String>,
    pub is_reair: i32,
    pub venue: Option<String>,
    pub raw_attributes_json: Option<String>,
    pub last_seen_utc: String,
}

/// One way to watch an event
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = playables)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Playable {
    pub event_id: String,
    pub playable_id: String,
    pub provider: String,
    pub service_name: Option<String>,
    pub logical_service: Option<String>,
    pub deeplink_play: Option<String>,
    pub deeplink_open: Option<String>,
    pub http_deeplink_url: Option<String>,
    pub playable_url: Option<String>,
    pub title: Option<String>,
    pub content_id: Option<String>,
    pub locale: Option<String>,
    pub priority: i32,
    pub espn_graph_id: Option<String>,
    pub created_utc: String,
}

impl Playable {
    /// First non-empty deeplink in preference order (play, open, web URL).
    pub fn best_url(&self) -> Option<&str> {
        for url in [
            self.deeplink_play.as_deref(),
            self.deeplink_open.as_deref(),
            self.playable_url.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            if !url.trim().is_empty() {
                return Some(url);
            }
        }
        None
    }
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = event_images)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventImage {
    pub event_id: String,
    pub img_type: String,
    pub url: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = user_preferences)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserPreference {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

/// Opaque per-upstream session material (Apple UTS tokens, guest sessions)
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = auth_blobs)]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AuthBlob {
    pub upstream: String,
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    pub session_key: Option<String>,
    pub created_utc: String,
    pub updated_utc: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = lanes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Lane {
    pub lane_id: i32,
    pub name: String,
    pub logical_number: i32,
}

/// Scheduled slot on a generic lane, real event or placeholder
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = lane_events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LaneEvent {
    pub lane_id: i32,
    pub event_id: String,
    pub start_utc: String,
    pub end_utc: String,
    pub is_placeholder: i32,
    pub title: Option<String>,
    pub chosen_playable_id: Option<String>,
    pub chosen_provider: Option<String>,
    pub chosen_logical_service: Option<String>,
    pub chosen_deeplink: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = provider_lanes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProviderLane {
    pub provider_code: String,
    pub adb_enabled: i32,
    pub adb_lane_count: i32,
    pub updated_at: String,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = adb_lanes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AdbLane {
    pub id: Option<i32>,
    pub provider_code: String,
    pub lane_number: i32,
    pub channel_id: String,
    pub event_id: String,
    pub start_utc: String,
    pub stop_utc: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = adb_lanes)]
pub struct NewAdbLane {
    pub provider_code: String,
    pub lane_number: i32,
    pub channel_id: String,
    pub event_id: String,
    pub start_utc: String,
    pub stop_utc: String,
}

/// Amazon GTI -> channel subscription row, produced by the external crawler
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = amazon_channels)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AmazonChannel {
    pub gti: String,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub logical_service: Option<String>,
    pub last_updated_utc: Option<String>,
    pub is_stale: i32,
}
