//! "What's on" resolution: lane + instant -> the deeplink to play.
//!
//! Pure catalog logic shared by the HTTP surface and the detector. The ESPN
//! correction runs again here because the frozen `chosen_deeplink` may
//! predate a graph enrichment pass.

use chrono::{DateTime, Duration, Utc};

use crate::db::catalog;
use crate::db::models::LaneEvent;
use crate::db::{DbError, DbPooledConnection};
use crate::deeplink::convert::{correct_scheme_deeplink, generate_http_deeplink, ConvertContext};
use crate::deeplink::{resolve_candidates, select_best};
use crate::filters::{self, classify};
use crate::mapper;

/// Which deeplink form the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeeplinkFormat {
    #[default]
    Scheme,
    Http,
}

impl DeeplinkFormat {
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("http") => DeeplinkFormat::Http,
            _ => DeeplinkFormat::Scheme,
        }
    }
}

/// Resolution result for one lane at one instant.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WhatsOn {
    pub ok: bool,
    pub lane: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deeplink_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deeplink_url_full: Option<String>,
    pub is_fallback: bool,
    pub is_placeholder: bool,
}

/// Both deeplink forms for a real lane slot, with the ESPN correction
/// re-applied from the playable's enrichment token.
fn deeplinks_for_slot(
    conn: &mut DbPooledConnection,
    slot: &LaneEvent,
) -> Result<(Option<String>, Option<String>), DbError> {
    let Some(raw) = slot.chosen_deeplink.as_deref().filter(|s| !s.trim().is_empty()) else {
        return Ok((None, None));
    };

    let playable = match slot.chosen_playable_id.as_deref() {
        Some(pid) => catalog::get_playable(conn, &slot.event_id, pid)?,
        None => None,
    };
    let event = catalog::get_event(conn, &slot.event_id)?;
    let league = event
        .as_ref()
        .and_then(|e| classify(e.classification_json.as_deref()).league);

    let ctx = ConvertContext {
        playable_id: playable.as_ref().map(|p| p.playable_id.as_str()),
        espn_graph_id: playable.as_ref().and_then(|p| p.espn_graph_id.as_deref()),
        league: league.as_deref(),
        vix_locale: None,
    };

    let scheme = correct_scheme_deeplink(raw, &ctx);
    let http = playable
        .as_ref()
        .and_then(|p| p.http_deeplink_url.clone())
        .filter(|s| !s.trim().is_empty())
        .or_else(|| generate_http_deeplink(&scheme, &ctx));

    Ok((Some(scheme), http))
}

fn pick(format: DeeplinkFormat, scheme: Option<String>, http: Option<String>) -> (Option<String>, Option<String>) {
    // deeplink_url follows the requested format (falling back to the other
    // form); deeplink_url_full always carries the HTTP form when one exists.
    let full = http.clone().or_else(|| scheme.clone());
    let url = match format {
        DeeplinkFormat::Scheme => scheme.or(http),
        DeeplinkFormat::Http => http.or(scheme),
    };
    (url, full)
}

/// Resolve what a generic lane is showing at `at`.
///
/// A placeholder slot within `padding_minutes` of a real event's end
/// resolves to that event's deeplink with `is_fallback` set; "no slot at
/// all" is `ok: false`, never an error.
pub fn resolve_whatson(
    conn: &mut DbPooledConnection,
    lane: i32,
    at: DateTime<Utc>,
    padding_minutes: i64,
    format: DeeplinkFormat,
) -> Result<WhatsOn, DbError> {
    let Some(slot) = catalog::current_lane_slot(conn, lane, at)? else {
        return Ok(WhatsOn {
            ok: false,
            lane,
            ..Default::default()
        });
    };

    if slot.is_placeholder == 0 {
        let (scheme, http) = deeplinks_for_slot(conn, &slot)?;
        let (url, full) = pick(format, scheme, http);
        return Ok(WhatsOn {
            ok: true,
            lane,
            event_uid: Some(slot.event_id.clone()),
            title: slot.title.clone(),
            deeplink_url: url,
            deeplink_url_full: full,
            is_fallback: false,
            is_placeholder: false,
        });
    }

    // Padding window: a just-ended event keeps answering for its lane
    if let Some(prev) = catalog::last_real_slot_before(conn, lane, at)? {
        if let Some(prev_end) = crate::timeutil::parse_iso_utc(&prev.end_utc) {
            if prev_end + Duration::minutes(padding_minutes) >= at {
                let (scheme, http) = deeplinks_for_slot(conn, &prev)?;
                let (url, full) = pick(format, scheme, http);
                return Ok(WhatsOn {
                    ok: true,
                    lane,
                    event_uid: Some(prev.event_id.clone()),
                    title: prev.title.clone(),
                    deeplink_url: url,
                    deeplink_url_full: full,
                    is_fallback: true,
                    is_placeholder: true,
                });
            }
        }
    }

    Ok(WhatsOn {
        ok: true,
        lane,
        event_uid: Some(slot.event_id.clone()),
        title: slot.title.clone(),
        deeplink_url: None,
        deeplink_url_full: None,
        is_fallback: false,
        is_placeholder: true,
    })
}

/// Resolve a provider-scoped lane, enforcing the user's service filters.
pub fn resolve_adb_whatson(
    conn: &mut DbPooledConnection,
    provider_code: &str,
    lane_number: i32,
    at: DateTime<Utc>,
    format: DeeplinkFormat,
) -> Result<WhatsOn, DbError> {
    let prefs = filters::load_preferences(conn)?;

    // A provider excluded by the allowlist resolves to nothing
    let all_services = mapper::logical_services_for_adb_provider(provider_code);
    let services: Vec<String> = if prefs.enabled_services.is_empty() {
        all_services
    } else {
        all_services
            .into_iter()
            .filter(|s| prefs.enabled_services.contains(s))
            .collect()
    };
    if services.is_empty() {
        return Ok(WhatsOn {
            ok: false,
            lane: lane_number,
            ..Default::default()
        });
    }

    let Some(slot) = catalog::current_adb_slot(conn, provider_code, lane_number, at)? else {
        return Ok(WhatsOn {
            ok: false,
            lane: lane_number,
            ..Default::default()
        });
    };

    let Some(event) = catalog::get_event(conn, &slot.event_id)? else {
        return Ok(WhatsOn {
            ok: false,
            lane: lane_number,
            ..Default::default()
        });
    };

    // Select only among this provider's services
    let candidates: Vec<_> = resolve_candidates(conn, &event.id)?
        .into_iter()
        .filter(|c| services.contains(&c.logical_service))
        .collect();
    let Some(selection) = select_best(&candidates, &prefs) else {
        return Ok(WhatsOn {
            ok: false,
            lane: lane_number,
            ..Default::default()
        });
    };

    let playable = &selection.candidate.playable;
    let league = classify(event.classification_json.as_deref()).league;
    let ctx = ConvertContext {
        playable_id: Some(playable.playable_id.as_str()),
        espn_graph_id: playable.espn_graph_id.as_deref(),
        league: league.as_deref(),
        vix_locale: None,
    };
    let scheme = playable
        .best_url()
        .map(|url| correct_scheme_deeplink(url, &ctx));
    let http = scheme
        .as_deref()
        .and_then(|url| generate_http_deeplink(url, &ctx));
    let (url, full) = pick(format, scheme, http);

    Ok(WhatsOn {
        ok: true,
        lane: lane_number,
        event_uid: Some(event.id.clone()),
        title: Some(event.title.clone()),
        deeplink_url: url,
        deeplink_url_full: full,
        is_fallback: false,
        is_placeholder: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::{insert_lane_event, upsert_event};
    use crate::db::connection::create_migrated_pool;
    use crate::db::test_support::{make_event, make_playable};
    use crate::db::{DbPool, LaneEvent};
    use crate::timeutil::fmt_iso_utc;
    use chrono::TimeZone;

    fn utc(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, h, mi, 0).unwrap()
    }

    /// Lane 1: event 10:00-11:00, placeholders around it.
    fn seeded_pool() -> DbPool {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        let mut event = make_event("e1", Some("pv1"), 1, 2);
        event.start_utc = fmt_iso_utc(utc(10, 0));
        event.end_utc = fmt_iso_utc(utc(11, 0));
        event.start_ms = utc(10, 0).timestamp_millis();
        event.end_ms = utc(11, 0).timestamp_millis();
        let playable = make_playable("e1", "p1", "peacock");
        upsert_event(&mut conn, &event, &[playable], &[]).unwrap();

        insert_lane_event(
            &mut conn,
            &LaneEvent {
                lane_id: 1,
                event_id: "e1".into(),
                start_utc: fmt_iso_utc(utc(10, 0)),
                end_utc: fmt_iso_utc(utc(11, 0)),
                is_placeholder: 0,
                title: Some("Test Event e1".into()),
                chosen_playable_id: Some("p1".into()),
                chosen_provider: Some("peacock".into()),
                chosen_logical_service: Some("peacock".into()),
                chosen_deeplink: Some("peacock://play/p1".into()),
            },
        )
        .unwrap();
        insert_lane_event(
            &mut conn,
            &LaneEvent {
                lane_id: 1,
                event_id: format!("placeholder-1-{}", fmt_iso_utc(utc(11, 0))),
                start_utc: fmt_iso_utc(utc(11, 0)),
                end_utc: fmt_iso_utc(utc(12, 0)),
                is_placeholder: 1,
                title: Some("Nothing Scheduled".into()),
                chosen_playable_id: None,
                chosen_provider: None,
                chosen_logical_service: None,
                chosen_deeplink: None,
            },
        )
        .unwrap();
        pool
    }

    #[test]
    fn test_live_slot_resolves() {
        let pool = seeded_pool();
        let mut conn = pool.get().expect("conn");
        let out =
            resolve_whatson(&mut conn, 1, utc(10, 30), 45, DeeplinkFormat::Scheme).expect("resolve");
        assert!(out.ok);
        assert_eq!(out.event_uid.as_deref(), Some("e1"));
        assert_eq!(out.deeplink_url.as_deref(), Some("peacock://play/p1"));
        assert!(!out.is_fallback);
    }

    #[test]
    fn test_fallback_inside_padding_window() {
        let pool = seeded_pool();
        let mut conn = pool.get().expect("conn");
        // 11:20, event ended 11:00, padding 45 -> fallback
        let out =
            resolve_whatson(&mut conn, 1, utc(11, 20), 45, DeeplinkFormat::Scheme).expect("resolve");
        assert!(out.ok);
        assert!(out.is_fallback);
        assert_eq!(out.event_uid.as_deref(), Some("e1"));
        assert_eq!(out.deeplink_url.as_deref(), Some("peacock://play/p1"));
    }

    #[test]
    fn test_placeholder_after_padding_expires() {
        let pool = seeded_pool();
        let mut conn = pool.get().expect("conn");
        // 11:46 is outside the 45-minute window
        let out =
            resolve_whatson(&mut conn, 1, utc(11, 46), 45, DeeplinkFormat::Scheme).expect("resolve");
        assert!(out.ok);
        assert!(!out.is_fallback);
        assert!(out.is_placeholder);
        assert!(out.deeplink_url.is_none());
        assert_eq!(out.title.as_deref(), Some("Nothing Scheduled"));
    }

    #[test]
    fn test_unknown_lane_is_ok_false() {
        let pool = seeded_pool();
        let mut conn = pool.get().expect("conn");
        let out =
            resolve_whatson(&mut conn, 9, utc(10, 30), 45, DeeplinkFormat::Scheme).expect("resolve");
        assert!(!out.ok);
        assert!(out.deeplink_url.is_none());
    }

    #[test]
    fn test_adb_resolution_respects_allowlist() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        let mut event = make_event("e1", Some("pv1"), 1, 2);
        event.start_utc = fmt_iso_utc(utc(10, 0));
        event.end_utc = fmt_iso_utc(utc(11, 0));
        event.start_ms = utc(10, 0).timestamp_millis();
        event.end_ms = utc(11, 0).timestamp_millis();
        upsert_event(&mut conn, &event, &[make_playable("e1", "p1", "espn_plus")], &[]).unwrap();

        catalog::insert_adb_lanes(
            &mut conn,
            &[crate::db::NewAdbLane {
                provider_code: "sportscenter".into(),
                lane_number: 1,
                channel_id: "sportscenter01".into(),
                event_id: "e1".into(),
                start_utc: fmt_iso_utc(utc(10, 0)),
                stop_utc: fmt_iso_utc(utc(11, 0)),
            }],
        )
        .unwrap();

        let out = resolve_adb_whatson(
            &mut conn,
            "sportscenter",
            1,
            utc(10, 30),
            DeeplinkFormat::Scheme,
        )
        .expect("resolve");
        assert!(out.ok);
        assert_eq!(out.event_uid.as_deref(), Some("e1"));

        // Excluding the provider from the allowlist empties the answer
        filters::set_preference(&mut conn, "enabled_services", &vec!["peacock".to_string()])
            .unwrap();
        let out = resolve_adb_whatson(
            &mut conn,
            "sportscenter",
            1,
            utc(10, 30),
            DeeplinkFormat::Scheme,
        )
        .expect("resolve");
        assert!(!out.ok);
    }

    #[test]
    fn test_http_format_prefers_http_form() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        let mut event = make_event("e2", Some("pv2"), 1, 2);
        event.start_utc = fmt_iso_utc(utc(10, 0));
        event.end_utc = fmt_iso_utc(utc(11, 0));
        event.start_ms = utc(10, 0).timestamp_millis();
        event.end_ms = utc(11, 0).timestamp_millis();
        let mut playable = make_playable("e2", "p1", "pplus");
        playable.deeplink_play = Some("pplus://www.paramountplus.com/live-tv/stream/x/".into());
        upsert_event(&mut conn, &event, &[playable], &[]).unwrap();

        insert_lane_event(
            &mut conn,
            &LaneEvent {
                lane_id: 2,
                event_id: "e2".into(),
                start_utc: fmt_iso_utc(utc(10, 0)),
                end_utc: fmt_iso_utc(utc(11, 0)),
                is_placeholder: 0,
                title: Some("Event".into()),
                chosen_playable_id: Some("p1".into()),
                chosen_provider: Some("pplus".into()),
                chosen_logical_service: Some("pplus".into()),
                chosen_deeplink: Some("pplus://www.paramountplus.com/live-tv/stream/x/".into()),
            },
        )
        .unwrap();

        let out =
            resolve_whatson(&mut conn, 2, utc(10, 30), 45, DeeplinkFormat::Http).expect("resolve");
        assert_eq!(
            out.deeplink_url.as_deref(),
            Some("https://www.paramountplus.com/live-tv/stream/x/")
        );
        assert_eq!(
            out.deeplink_url_full.as_deref(),
            Some("https://www.paramountplus.com/live-tv/stream/x/")
        );
    }
}
