//! Direct emitters: one virtual channel per upcoming event, stream URL set
//! to the event's corrected deeplink.

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::db::catalog;
use crate::db::models::Event;
use crate::db::{DbError, DbPooledConnection};
use crate::deeplink;
use crate::export::m3u::{render_m3u, M3uEntry};
use crate::export::provider_from_channel;
use crate::export::xmltv::{
    build_categories, build_enhanced_description, is_live_broadcast, is_new_broadcast,
    render_xmltv, stable_channel_id, xmltv_time, XmltvChannel, XmltvProgramme,
};
use crate::filters;
use crate::mapper;
use crate::timeutil::{fmt_local_short, ms_to_dt, snap_to_half_hour};

/// Events that made the window but have no resolvable deeplink, written to
/// `missing_direct_deeplinks.json` for debugging.
#[derive(Debug, Clone, Serialize)]
pub struct MissingDeeplink {
    pub event_id: String,
    pub title: String,
    pub start_utc: String,
    pub channel_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DirectOutputs {
    pub m3u: String,
    pub xml: String,
    pub missing: Vec<MissingDeeplink>,
}

/// Last-ditch deeplink recovery from the raw provider payload: the first
/// punchout URL any embedded playable carries, then a Peacock deeplink
/// synthesized from the pvid.
fn fallback_deeplink(event: &Event) -> Option<String> {
    if let Some(raw) = event.raw_attributes_json.as_deref() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
            if let Some(playables) = value.get("playables").and_then(|p| p.as_array()) {
                for playable in playables {
                    let punchout = playable.get("punchoutUrls");
                    for key in ["play", "open"] {
                        if let Some(url) = punchout
                            .and_then(|p| p.get(key))
                            .and_then(|u| u.as_str())
                            .filter(|u| !u.trim().is_empty())
                        {
                            return Some(url.to_string());
                        }
                    }
                    if let Some(url) = playable
                        .get("playable_url")
                        .and_then(|u| u.as_str())
                        .filter(|u| !u.trim().is_empty())
                    {
                        return Some(url.to_string());
                    }
                }
            }
            if let Some(url) = value
                .get("apple_tv_url")
                .and_then(|u| u.as_str())
                .filter(|u| !u.trim().is_empty())
            {
                return Some(url.to_string());
            }
        }
    }

    // Peacock events can always be reached through the deeplink endpoint
    let pvid = event.pvid.as_deref()?;
    if event.id.starts_with("appletv-") {
        return None;
    }
    let payload = serde_json::json!({
        "pvid": pvid,
        "type": "PROGRAMME",
        "action": "PLAY",
    });
    Some(format!(
        "https://www.peacocktv.com/deeplink?deeplinkData={}",
        urlencoding::encode(&payload.to_string())
    ))
}

/// Build the direct M3U + XMLTV pair from the catalog.
pub fn build_direct_outputs(
    conn: &mut DbPooledConnection,
    hours_window: i64,
) -> Result<DirectOutputs, DbError> {
    let prefs = filters::load_preferences(conn)?;
    let mut events = catalog::direct_window_events(conn, hours_window)?;
    // Emitters silently skip events without an external id
    events.retain(|e| e.pvid.is_some());
    events.retain(|e| filters::should_include_event(e, &prefs));

    let now = Utc::now();
    let mut entries: Vec<M3uEntry> = Vec::with_capacity(events.len());
    let mut channels: Vec<XmltvChannel> = Vec::with_capacity(events.len());
    let mut programmes: Vec<XmltvProgramme> = Vec::new();
    let mut missing: Vec<MissingDeeplink> = Vec::new();

    for event in &events {
        let chan_id = stable_channel_id(event);
        let chosen = deeplink::best_deeplink_for_event(conn, event, &prefs)?;

        let deeplink_url = chosen
            .as_ref()
            .and_then(|c| c.scheme_url.clone())
            .or_else(|| fallback_deeplink(event));

        let provider_name = match &chosen {
            Some(c) => mapper::service_display_name(&c.logical_service),
            None => provider_from_channel(event.channel_name.as_deref()),
        };

        let hero = match event.hero_image_url.clone() {
            Some(url) if !url.trim().is_empty() => Some(url),
            _ => catalog::first_event_image(conn, &event.id)?,
        };

        match &deeplink_url {
            Some(url) => entries.push(M3uEntry {
                tvg_id: chan_id.clone(),
                tvg_name: event.title.clone(),
                tvg_logo: hero.clone(),
                tvg_chno: None,
                group_title: Some(provider_name.clone()),
                display_name: event.title.clone(),
                stream_url: url.clone(),
            }),
            None => missing.push(MissingDeeplink {
                event_id: event.id.clone(),
                title: event.title.clone(),
                start_utc: event.start_utc.clone(),
                channel_name: event.channel_name.clone(),
            }),
        }

        channels.push(XmltvChannel {
            id: chan_id.clone(),
            display_name: event.title.clone(),
            icon: hero.clone(),
        });

        let Some(event_start) = ms_to_dt(event.start_ms) else {
            continue;
        };
        let mut event_end = ms_to_dt(event.end_ms).unwrap_or(event_start);
        if event_end <= event_start {
            event_end = event_start + Duration::hours(3);
        }

        // Pre-event blocks from an hour ago, aligned to :00/:30
        let mut cursor = snap_to_half_hour(now - Duration::hours(1));
        while cursor < event_start {
            let block_end = std::cmp::min(cursor + Duration::hours(1), event_start);
            if (block_end - cursor).num_seconds() < 60 {
                break;
            }
            programmes.push(XmltvProgramme::placeholder(
                &chan_id,
                "Event Not Started",
                &format!(
                    "Starts {}. Available on {}.",
                    fmt_local_short(event_start),
                    provider_name
                ),
                &xmltv_time(cursor),
                &xmltv_time(block_end),
            ));
            cursor = block_end;
        }

        programmes.push(XmltvProgramme {
            channel_id: chan_id.clone(),
            title: event.title.clone(),
            desc: Some(build_enhanced_description(event, Some(provider_name.as_str()))),
            start: xmltv_time(event_start),
            stop: xmltv_time(event_end),
            categories: build_categories(event, Some(provider_name.as_str())),
            icon: hero,
            live: is_live_broadcast(event),
            new: is_new_broadcast(event),
        });

        // Post-event blocks for 24 hours
        let mut cursor = event_end;
        let post_end = event_end + Duration::hours(24);
        while cursor < post_end {
            let block_end = std::cmp::min(cursor + Duration::hours(1), post_end);
            programmes.push(XmltvProgramme::placeholder(
                &chan_id,
                "Event Ended",
                &format!(
                    "Ended {}. Available on {}.",
                    fmt_local_short(event_end),
                    provider_name
                ),
                &xmltv_time(cursor),
                &xmltv_time(block_end),
            ));
            cursor = block_end;
        }
    }

    Ok(DirectOutputs {
        m3u: render_m3u(&entries),
        xml: render_xmltv(&channels, &programmes, "GuideForge - Direct")
            .map_err(|e| DbError::Other(format!("xmltv render: {}", e)))?,
        missing,
    })
}
