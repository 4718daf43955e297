//! Row builders shared by unit tests across modules.

use chrono::{Duration, Utc};

use crate::db::models::{Event, EventImage, Playable};
use crate::timeutil::fmt_iso_utc;

/// Event starting `start_hours` from now and ending `end_hours` from now.
pub fn make_event(id: &str, pvid: Option<&str>, start_hours: i64, end_hours: i64) -> Event {
    let now = Utc::now();
    let start = now + Duration::hours(start_hours);
    let end = now + Duration::hours(end_hours);
    Event {
        id: id.to_string(),
        pvid: pvid.map(|s| s.to_string()),
        slug: None,
        title: format!("Test Event {}", id),
        title_brief: None,
        synopsis: None,
        synopsis_brief: None,
        channel_name: Some("ESPN".to_string()),
        channel_provider_id: None,
        start_utc: fmt_iso_utc(start),
        end_utc: fmt_iso_utc(end),
        start_ms: start.timestamp_millis(),
        end_ms: end.timestamp_millis(),
        runtime_secs: Some(((end - start).num_seconds()) as i32),
        is_free: 0,
        is_premium: 1,
        hero_image_url: None,
        genres_json: Some(r#"["Basketball"]"#.to_string()),
        classification_json: Some(
            r#"[{"type":"sport","value":"Basketball"},{"type":"league","value":"NBA"}]"#
                .to_string(),
        ),
        airing_type: Some("live".to_string()),
        is_reair: 0,
        venue: None,
        raw_attributes_json: None,
        last_seen_utc: fmt_iso_utc(now),
    }
}

pub fn make_playable(event_id: &str, playable_id: &str, provider: &str) -> Playable {
    Playable {
        event_id: event_id.to_string(),
        playable_id: playable_id.to_string(),
        provider: provider.to_string(),
        service_name: None,
        logical_service: Some(provider.to_string()),
        deeplink_play: Some(format!("{}://play/{}", provider, playable_id)),
        deeplink_open: None,
        http_deeplink_url: None,
        playable_url: None,
        title: None,
        content_id: None,
        locale: None,
        priority: 0,
        espn_graph_id: None,
        created_utc: fmt_iso_utc(Utc::now()),
    }
}

pub fn image(event_id: &str, img_type: &str, url: &str) -> EventImage {
    EventImage {
        event_id: event_id.to_string(),
        img_type: img_type.to_string(),
        url: url.to_string(),
    }
}
