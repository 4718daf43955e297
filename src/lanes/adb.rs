//! Per-provider (ADB) lanes.
//!
//! Each tuner-backed provider gets its own small pool of lanes restricted to
//! the logical services that aggregate onto its provider code. Times snap to
//! 15-minute boundaries so the XMLTV output stays stable across refreshes.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::catalog;
use crate::db::models::{Event, NewAdbLane};
use crate::db::schema::{events, playables};
use crate::db::{DbError, DbPooledConnection};
use crate::filters::{self, Preferences};
use crate::mapper;
use crate::timeutil::{fmt_iso_utc, ms_to_dt, snap_down_quarter, snap_up_quarter};

#[derive(Debug, Clone, Default)]
pub struct AdbPlanSummary {
    pub providers_built: usize,
    pub providers_skipped: usize,
    pub scheduled: usize,
    pub dropped: usize,
}

/// One packed assignment: lane number (1-based) plus snapped times.
#[derive(Debug, Clone)]
pub(crate) struct AdbAssignment {
    pub lane_number: i32,
    pub event_idx: usize,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

/// Greedy packing onto `lane_count` lanes. Unlike the generic pool this
/// picks the eligible lane that frees up earliest, which keeps per-provider
/// schedules dense when lane counts are small.
pub(crate) fn assign_to_lanes(
    intervals: &[(DateTime<Utc>, DateTime<Utc>)],
    lane_count: usize,
) -> (Vec<AdbAssignment>, usize) {
    let mut lane_ends: Vec<Option<DateTime<Utc>>> = vec![None; lane_count];
    let mut assignments = Vec::new();
    let mut dropped = 0usize;

    let mut order: Vec<usize> = (0..intervals.len()).collect();
    order.sort_by_key(|&i| intervals[i].0);

    for idx in order {
        let (start, stop) = intervals[idx];
        if stop <= start {
            dropped += 1;
            continue;
        }

        let mut best_lane: Option<usize> = None;
        for (lane, lane_end) in lane_ends.iter().enumerate() {
            let free = match lane_end {
                None => true,
                Some(end) => *end <= start,
            };
            if !free {
                continue;
            }
            // Never-used lanes compare as None < Some, so they win ties
            let better = match best_lane {
                None => true,
                Some(current) => lane_ends[lane] < lane_ends[current],
            };
            if better {
                best_lane = Some(lane);
            }
        }

        match best_lane {
            Some(lane) => {
                lane_ends[lane] = Some(stop);
                assignments.push(AdbAssignment {
                    lane_number: lane as i32 + 1,
                    event_idx: idx,
                    start,
                    stop,
                });
            }
            None => dropped += 1,
        }
    }

    (assignments, dropped)
}

/// Events with at least one playable in the given logical service set.
fn events_for_services(
    conn: &mut DbPooledConnection,
    services: &[String],
) -> Result<Vec<Event>, DbError> {
    let service_refs: Vec<&str> = services.iter().map(|s| s.as_str()).collect();
    let rows = events::table
        .inner_join(playables::table)
        .filter(playables::logical_service.eq_any(service_refs))
        .select(Event::as_select())
        .distinct()
        .order((events::start_ms.asc(), events::id.asc()))
        .load::<Event>(conn)?;
    Ok(rows)
}

/// Rebuild ADB lanes for every enabled provider.
pub fn build_adb_lanes(conn: &mut DbPooledConnection) -> Result<AdbPlanSummary, DbError> {
    let prefs = filters::load_preferences(conn)?;
    let providers = catalog::adb_enabled_providers(conn)?;
    let mut summary = AdbPlanSummary::default();

    for provider in providers {
        catalog::clear_adb_lanes(conn, &provider.provider_code)?;

        let built = build_provider(
            conn,
            &prefs,
            &provider.provider_code,
            provider.adb_lane_count as usize,
        )?;
        match built {
            Some((scheduled, dropped)) => {
                summary.providers_built += 1;
                summary.scheduled += scheduled;
                summary.dropped += dropped;
            }
            None => summary.providers_skipped += 1,
        }
    }

    tracing::info!(
        providers = summary.providers_built,
        skipped = summary.providers_skipped,
        scheduled = summary.scheduled,
        dropped = summary.dropped,
        "adb lane plans rebuilt"
    );
    Ok(summary)
}

/// Build one provider's lanes. Returns `None` when the user's allowlist
/// excludes every logical service mapped to this provider.
fn build_provider(
    conn: &mut DbPooledConnection,
    prefs: &Preferences,
    provider_code: &str,
    lane_count: usize,
) -> Result<Option<(usize, usize)>, DbError> {
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
        tracing::info!(provider = provider_code, "skipped: no enabled services");
        return Ok(None);
    }

    let now = Utc::now();
    let mut events = events_for_services(conn, &services)?;
    events.retain(|e| {
        e.end_ms > now.timestamp_millis() && filters::should_include_event(e, prefs)
    });

    let intervals: Vec<(DateTime<Utc>, DateTime<Utc>)> = events
        .iter()
        .map(|e| {
            let start = ms_to_dt(e.start_ms).map(snap_down_quarter);
            let stop = ms_to_dt(e.end_ms).map(snap_up_quarter);
            match (start, stop) {
                (Some(s), Some(t)) => (s, t),
                _ => (now, now), // zero-length, dropped by the packer
            }
        })
        .collect();

    let (assignments, dropped) = assign_to_lanes(&intervals, lane_count);

    let rows: Vec<NewAdbLane> = assignments
        .iter()
        .map(|a| NewAdbLane {
            provider_code: provider_code.to_string(),
            lane_number: a.lane_number,
            channel_id: format!("{}{:02}", provider_code, a.lane_number),
            event_id: events[a.event_idx].id.clone(),
            start_utc: fmt_iso_utc(a.start),
            stop_utc: fmt_iso_utc(a.stop),
        })
        .collect();
    let inserted = catalog::insert_adb_lanes(conn, &rows)?;

    Ok(Some((inserted, dropped)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::{upsert_event, upsert_provider_lane};
    use crate::db::connection::create_migrated_pool;
    use crate::db::test_support::{make_event, make_playable};
    use crate::db::ProviderLane;
    use chrono::{Duration, TimeZone};

    fn utc(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, h, mi, 0).unwrap()
    }

    #[test]
    fn test_assign_prefers_earliest_ending_lane() {
        let intervals = vec![
            (utc(10, 0), utc(12, 0)),
            (utc(10, 0), utc(11, 0)),
            // Fits after interval 1 on its lane, even though lane of
            // interval 0 is later-numbered
            (utc(11, 15), utc(13, 0)),
        ];
        let (assignments, dropped) = assign_to_lanes(&intervals, 2);
        assert_eq!(dropped, 0);

        let third = assignments
            .iter()
            .find(|a| a.event_idx == 2)
            .expect("third placed");
        let second = assignments
            .iter()
            .find(|a| a.event_idx == 1)
            .expect("second placed");
        assert_eq!(third.lane_number, second.lane_number);
    }

    #[test]
    fn test_assign_drops_when_full() {
        let intervals = vec![
            (utc(10, 0), utc(12, 0)),
            (utc(10, 15), utc(12, 0)),
            (utc(10, 30), utc(12, 0)),
        ];
        let (assignments, dropped) = assign_to_lanes(&intervals, 2);
        assert_eq!(assignments.len(), 2);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_build_adb_lanes_espn_aggregation() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        // One ESPN+ and one ESPN linear event both schedule under the
        // sportscenter provider code
        let e1 = make_event("e1", Some("pv1"), 1, 3);
        upsert_event(&mut conn, &e1, &[make_playable("e1", "p1", "espn_plus")], &[]).unwrap();
        let e2 = make_event("e2", Some("pv2"), 4, 6);
        upsert_event(&mut conn, &e2, &[make_playable("e2", "p1", "espn_linear")], &[]).unwrap();
        // Unrelated provider, not ADB-enabled
        let e3 = make_event("e3", Some("pv3"), 1, 3);
        upsert_event(&mut conn, &e3, &[make_playable("e3", "p1", "peacock")], &[]).unwrap();

        upsert_provider_lane(
            &mut conn,
            &ProviderLane {
                provider_code: "sportscenter".into(),
                adb_enabled: 1,
                adb_lane_count: 2,
                updated_at: "2026-08-01T00:00:00Z".into(),
            },
        )
        .unwrap();

        let summary = build_adb_lanes(&mut conn).expect("build");
        assert_eq!(summary.providers_built, 1);
        assert_eq!(summary.scheduled, 2);

        let rows = catalog::adb_lanes_for_provider(&mut conn, "sportscenter").expect("rows");
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(row.channel_id.starts_with("sportscenter0"));
            // Times snapped to quarter boundaries
            let start = crate::timeutil::parse_iso_utc(&row.start_utc).unwrap();
            assert_eq!(start.timestamp() % 900, 0);
        }
    }

    #[test]
    fn test_provider_skipped_when_allowlist_excludes_it() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        let e1 = make_event("e1", Some("pv1"), 1, 3);
        upsert_event(&mut conn, &e1, &[make_playable("e1", "p1", "espn_plus")], &[]).unwrap();
        upsert_provider_lane(
            &mut conn,
            &ProviderLane {
                provider_code: "sportscenter".into(),
                adb_enabled: 1,
                adb_lane_count: 2,
                updated_at: "2026-08-01T00:00:00Z".into(),
            },
        )
        .unwrap();
        filters::set_preference(&mut conn, "enabled_services", &vec!["peacock".to_string()])
            .unwrap();

        let summary = build_adb_lanes(&mut conn).expect("build");
        assert_eq!(summary.providers_built, 0);
        assert_eq!(summary.providers_skipped, 1);
        assert!(catalog::adb_lanes_for_provider(&mut conn, "sportscenter")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_snapping_monotonic() {
        // Snapped stop must never be before snapped start for a valid event
        let start = utc(10, 7);
        let stop = utc(10, 8);
        assert!(snap_up_quarter(stop) > snap_down_quarter(start) - Duration::minutes(16));
    }
}
