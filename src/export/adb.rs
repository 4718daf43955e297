//! ADB lane emitters: per-provider playlists plus one combined guide.
//!
//! Channel ids are the synthesized `{provider_code}{lane:02}` values so
//! tuner integrations address lanes without any lookup table.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};

use crate::db::catalog;
use crate::db::{DbError, DbPooledConnection};
use crate::export::m3u::{render_m3u, M3uEntry};
use crate::export::xmltv::{
    build_categories, build_enhanced_description, is_live_broadcast, is_new_broadcast,
    render_xmltv, xmltv_time, XmltvChannel, XmltvProgramme,
};
use crate::mapper;
use crate::timeutil::{floor_hour, parse_iso_utc};

#[derive(Debug, Clone)]
pub struct AdbOutputs {
    pub m3u: String,
    pub xml: String,
    /// provider_code -> playlist restricted to that provider
    pub per_provider_m3u: BTreeMap<String, String>,
}

fn lane_entry(public_host: &str, provider_code: &str, lane_number: i32) -> M3uEntry {
    let channel_id = format!("{}{:02}", provider_code, lane_number);
    let display = format!(
        "{} Lane {}",
        mapper::service_display_name(provider_code),
        lane_number
    );
    M3uEntry {
        tvg_id: channel_id.clone(),
        tvg_name: display.clone(),
        tvg_logo: None,
        tvg_chno: None,
        group_title: Some(mapper::service_display_name(provider_code)),
        display_name: display,
        stream_url: format!(
            "http://{}/api/adb/lanes/{}/{}/deeplink?format=text",
            public_host, provider_code, lane_number
        ),
    }
}

/// Build all ADB artifacts from the current plan.
pub fn build_adb_outputs(
    conn: &mut DbPooledConnection,
    public_host: &str,
) -> Result<AdbOutputs, DbError> {
    let providers = catalog::adb_enabled_providers(conn)?;

    let mut all_entries: Vec<M3uEntry> = Vec::new();
    let mut per_provider_m3u = BTreeMap::new();
    let mut channels: Vec<XmltvChannel> = Vec::new();
    let mut programmes: Vec<XmltvProgramme> = Vec::new();

    let now = Utc::now();
    let grid_start = floor_hour(now) - Duration::hours(1);

    for provider in &providers {
        let mut provider_entries: Vec<M3uEntry> = Vec::new();

        for lane_number in 1..=provider.adb_lane_count {
            let entry = lane_entry(public_host, &provider.provider_code, lane_number);
            channels.push(XmltvChannel {
                id: entry.tvg_id.clone(),
                display_name: entry.tvg_name.clone(),
                icon: None,
            });
            provider_entries.push(entry.clone());
            all_entries.push(entry);
        }

        let rows = catalog::adb_lanes_for_provider(conn, &provider.provider_code)?;
        let mut lane_cursor: BTreeMap<i32, chrono::DateTime<Utc>> = BTreeMap::new();

        for row in &rows {
            let (Some(start), Some(stop)) = (
                parse_iso_utc(&row.start_utc),
                parse_iso_utc(&row.stop_utc),
            ) else {
                continue;
            };

            // Idle filler between scheduled events keeps the guide continuous
            let cursor = lane_cursor.entry(row.lane_number).or_insert(grid_start);
            let mut gap = *cursor;
            while gap < start {
                let gap_end = std::cmp::min(gap + Duration::hours(1), start);
                if gap_end > gap {
                    programmes.push(XmltvProgramme {
                        channel_id: row.channel_id.clone(),
                        title: "Nothing Scheduled".to_string(),
                        desc: None,
                        start: xmltv_time(gap),
                        stop: xmltv_time(gap_end),
                        categories: Vec::new(),
                        icon: None,
                        live: false,
                        new: false,
                    });
                }
                gap = gap_end;
            }
            *cursor = stop;

            let Some(event) = catalog::get_event(conn, &row.event_id)? else {
                continue;
            };
            if event.pvid.is_none() {
                continue;
            }
            let provider_name = mapper::service_display_name(&provider.provider_code);
            programmes.push(XmltvProgramme {
                channel_id: row.channel_id.clone(),
                title: event.title.clone(),
                desc: Some(build_enhanced_description(
                    &event,
                    Some(provider_name.as_str()),
                )),
                start: xmltv_time(start),
                stop: xmltv_time(stop),
                categories: build_categories(&event, Some(provider_name.as_str())),
                icon: event.hero_image_url.clone(),
                live: is_live_broadcast(&event),
                new: is_new_broadcast(&event),
            });
        }

        per_provider_m3u.insert(
            provider.provider_code.clone(),
            render_m3u(&provider_entries),
        );
    }

    Ok(AdbOutputs {
        m3u: render_m3u(&all_entries),
        xml: render_xmltv(&channels, &programmes, "GuideForge - ADB Lanes")
            .map_err(|e| DbError::Other(format!("xmltv render: {}", e)))?,
        per_provider_m3u,
    })
}
