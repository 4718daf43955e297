//! Lane emitters: M3U + XMLTV for the generic multi-source lane pool.
//!
//! Stream URLs point at the resolver's HLS stub so tuning a lane triggers
//! the detector; the chrome variant instead points at the launch redirect
//! for browser-capture clients.

use crate::db::catalog;
use crate::db::models::LaneEvent;
use crate::db::{DbError, DbPooledConnection};
use crate::export::m3u::{render_m3u, M3uEntry};
use crate::export::xmltv::{
    build_categories, build_enhanced_description, is_live_broadcast, is_new_broadcast,
    render_xmltv, xmltv_time, XmltvChannel, XmltvProgramme,
};
use crate::mapper;
use crate::timeutil::parse_iso_utc;

#[derive(Debug, Clone)]
pub struct LaneOutputs {
    pub m3u: String,
    pub m3u_chrome: String,
    pub xml: String,
}

/// Channel id for a lane, shared across XMLTV and both playlists.
pub fn lane_channel_id(lane_id: i32) -> String {
    format!("fdl.lane.{}", lane_id)
}

fn programme_for_slot(
    conn: &mut DbPooledConnection,
    chan_id: &str,
    slot: &LaneEvent,
) -> Result<Option<XmltvProgramme>, DbError> {
    let (Some(start), Some(end)) = (
        parse_iso_utc(&slot.start_utc),
        parse_iso_utc(&slot.end_utc),
    ) else {
        return Ok(None);
    };

    if slot.is_placeholder != 0 {
        return Ok(Some(XmltvProgramme {
            channel_id: chan_id.to_string(),
            title: slot
                .title
                .clone()
                .unwrap_or_else(|| "Nothing Scheduled".to_string()),
            desc: None,
            start: xmltv_time(start),
            stop: xmltv_time(end),
            categories: Vec::new(),
            icon: None,
            live: false,
            new: false,
        }));
    }

    let Some(event) = catalog::get_event(conn, &slot.event_id)? else {
        return Ok(None);
    };

    let provider_name = slot
        .chosen_logical_service
        .as_deref()
        .map(mapper::service_display_name);

    let hero = match event.hero_image_url.clone() {
        Some(url) if !url.trim().is_empty() => Some(url),
        _ => catalog::first_event_image(conn, &event.id)?,
    };

    Ok(Some(XmltvProgramme {
        channel_id: chan_id.to_string(),
        title: event.title.clone(),
        desc: Some(build_enhanced_description(
            &event,
            provider_name.as_deref(),
        )),
        start: xmltv_time(start),
        stop: xmltv_time(end),
        categories: build_categories(&event, provider_name.as_deref()),
        icon: hero,
        live: is_live_broadcast(&event),
        new: is_new_broadcast(&event),
    }))
}

/// Build the lane playlist pair and guide from the current lane plan.
///
/// `public_host` is the host:port the DVR uses to reach this server.
pub fn build_lane_outputs(
    conn: &mut DbPooledConnection,
    public_host: &str,
) -> Result<LaneOutputs, DbError> {
    let lanes = catalog::all_lanes(conn)?;

    let mut entries = Vec::with_capacity(lanes.len());
    let mut chrome_entries = Vec::with_capacity(lanes.len());
    let mut channels = Vec::with_capacity(lanes.len());
    let mut programmes = Vec::new();

    for lane in &lanes {
        let chan_id = lane_channel_id(lane.lane_id);

        channels.push(XmltvChannel {
            id: chan_id.clone(),
            display_name: lane.name.clone(),
            icon: None,
        });

        entries.push(M3uEntry {
            tvg_id: chan_id.clone(),
            tvg_name: lane.name.clone(),
            tvg_logo: None,
            tvg_chno: Some(lane.logical_number),
            group_title: Some("Multi-Source Sports".to_string()),
            display_name: lane.name.clone(),
            stream_url: format!(
                "http://{}/lane/{}/stream.m3u8",
                public_host, lane.lane_id
            ),
        });

        chrome_entries.push(M3uEntry {
            tvg_id: chan_id.clone(),
            tvg_name: lane.name.clone(),
            tvg_logo: None,
            tvg_chno: Some(lane.logical_number),
            group_title: Some("Multi-Source Sports".to_string()),
            display_name: lane.name.clone(),
            stream_url: format!(
                "http://{}/api/lane/{}/launch?deeplink_format=http",
                public_host, lane.lane_id
            ),
        });

        for slot in catalog::lane_events_for_lane(conn, lane.lane_id)? {
            if let Some(programme) = programme_for_slot(conn, &chan_id, &slot)? {
                programmes.push(programme);
            }
        }
    }

    Ok(LaneOutputs {
        m3u: render_m3u(&entries),
        m3u_chrome: render_m3u(&chrome_entries),
        xml: render_xmltv(&channels, &programmes, "GuideForge - Lanes")
            .map_err(|e| DbError::Other(format!("xmltv render: {}", e)))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::upsert_event;
    use crate::db::connection::create_migrated_pool;
    use crate::db::test_support::{make_event, make_playable};
    use crate::db::DbPool;
    use crate::lanes::{build_lanes, LanePlanConfig};

    fn planned_pool() -> DbPool {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        for (id, s, e) in [("e1", 2, 4), ("e2", 3, 5)] {
            let ev = make_event(id, Some(&format!("pv-{}", id)), s, e);
            upsert_event(&mut conn, &ev, &[make_playable(id, "p1", "peacock")], &[]).unwrap();
        }

        build_lanes(
            &mut conn,
            &LanePlanConfig {
                lane_count: 2,
                days_ahead: 7,
                padding_minutes: 45,
                placeholder_block_minutes: 60,
                placeholder_extra_days: 1,
                lane_start_ch: 9000,
            },
        )
        .expect("plan");
        pool
    }

    #[test]
    fn test_lane_m3u_points_at_hls_stub() {
        let pool = planned_pool();
        let mut conn = pool.get().expect("conn");
        let out = build_lane_outputs(&mut conn, "127.0.0.1:8411").expect("build");

        assert!(out.m3u.contains("http://127.0.0.1:8411/lane/1/stream.m3u8"));
        assert!(out.m3u.contains("http://127.0.0.1:8411/lane/2/stream.m3u8"));
        assert!(out.m3u.contains("tvg-chno=\"9000\""));
        assert!(out.m3u.contains("group-title=\"Multi-Source Sports\""));
    }

    #[test]
    fn test_chrome_variant_points_at_launch() {
        let pool = planned_pool();
        let mut conn = pool.get().expect("conn");
        let out = build_lane_outputs(&mut conn, "127.0.0.1:8411").expect("build");
        assert!(out
            .m3u_chrome
            .contains("http://127.0.0.1:8411/api/lane/1/launch?deeplink_format=http"));
    }

    #[test]
    fn test_lane_xmltv_has_events_and_placeholders() {
        let pool = planned_pool();
        let mut conn = pool.get().expect("conn");
        let out = build_lane_outputs(&mut conn, "127.0.0.1:8411").expect("build");

        assert!(out.xml.contains("<channel id=\"fdl.lane.1\">"));
        assert!(out.xml.contains("<display-name>Sports Lane 1</display-name>"));
        assert!(out.xml.contains("Nothing Scheduled"));
        assert!(out.xml.contains("Test Event e1"));
        // Real programmes carry the provider category, placeholders none
        assert!(out.xml.contains("<category lang=\"en\">Peacock</category>"));
    }

    #[test]
    fn test_channel_ids_match_between_outputs() {
        let pool = planned_pool();
        let mut conn = pool.get().expect("conn");
        let out = build_lane_outputs(&mut conn, "127.0.0.1:8411").expect("build");
        assert!(out.m3u.contains("tvg-id=\"fdl.lane.1\""));
        assert!(out.xml.contains("channel=\"fdl.lane.1\""));
    }
}
