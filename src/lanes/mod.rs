//! Lane planning: offline greedy interval packing of events onto a fixed
//! pool of virtual channels.
//!
//! Plans are stateless. Every refresh truncates the lane tables and rebuilds
//! them from the current catalog, so a failed run never leaves a half-merged
//! schedule behind.
//!
//! Real slots are stored with their true end time; the padding applied
//! during packing only widens lane occupancy, and the padded window shows up
//! as placeholder blocks that the resolver can serve with a fallback
//! deeplink.

pub mod adb;

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::db::catalog;
use crate::db::models::{Event, Lane, LaneEvent};
use crate::db::{DbError, DbPooledConnection};
use crate::deeplink::{self, ChosenDeeplink};
use crate::filters;
use crate::timeutil::{ceil_hour, floor_hour, fmt_iso_utc, ms_to_dt};

#[derive(Debug, Clone)]
pub struct LanePlanConfig {
    pub lane_count: usize,
    pub days_ahead: i64,
    pub padding_minutes: i64,
    pub placeholder_block_minutes: i64,
    pub placeholder_extra_days: i64,
    pub lane_start_ch: u32,
}

impl From<&Config> for LanePlanConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            lane_count: cfg.lane_count as usize,
            days_ahead: cfg.days_ahead,
            padding_minutes: cfg.padding_minutes,
            placeholder_block_minutes: cfg.placeholder_block_minutes,
            placeholder_extra_days: cfg.placeholder_extra_days,
            lane_start_ch: cfg.lane_start_ch,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LanePlanSummary {
    pub scheduled: usize,
    pub dropped: usize,
    pub placeholders: usize,
    pub filtered_out: usize,
}

/// An event prepared for packing.
#[derive(Debug, Clone)]
pub(crate) struct SchedEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub end_padded: DateTime<Utc>,
}

/// First-fit greedy packing. Events must be sorted by start ascending.
/// Returns per-lane assignment lists (event indices) and the indices that
/// did not fit anywhere.
pub(crate) fn pack_first_fit(
    events: &[SchedEvent],
    lane_count: usize,
    initial_lane_end: DateTime<Utc>,
) -> (Vec<Vec<usize>>, Vec<usize>) {
    let mut lane_ends = vec![initial_lane_end; lane_count];
    let mut assignments: Vec<Vec<usize>> = vec![Vec::new(); lane_count];
    let mut dropped = Vec::new();

    for (idx, ev) in events.iter().enumerate() {
        let mut placed = false;
        for lane in 0..lane_count {
            if lane_ends[lane] <= ev.start {
                assignments[lane].push(idx);
                lane_ends[lane] = ev.end_padded;
                placed = true;
                break;
            }
        }
        if !placed {
            dropped.push(idx);
        }
    }

    (assignments, dropped)
}

/// Rebuild the generic lane pool from the current catalog.
pub fn build_lanes(
    conn: &mut DbPooledConnection,
    cfg: &LanePlanConfig,
) -> Result<LanePlanSummary, DbError> {
    let prefs = filters::load_preferences(conn)?;
    let mut summary = LanePlanSummary::default();

    catalog::reset_lanes(conn)?;
    for lane_id in 1..=cfg.lane_count as i32 {
        catalog::insert_lane(
            conn,
            &Lane {
                lane_id,
                name: format!("Sports Lane {}", lane_id),
                logical_number: cfg.lane_start_ch as i32 + lane_id - 1,
            },
        )?;
    }

    let mut events = catalog::future_events_for_lanes(conn, cfg.days_ahead)?;
    events.retain(|e| filters::should_include_event(e, &prefs));

    // Precompute the frozen deeplink choice per event; an explicit
    // allowlist with no surviving playable drops the event from planning.
    let mut chosen: Vec<Option<ChosenDeeplink>> = Vec::with_capacity(events.len());
    let mut kept_events: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        let best = deeplink::best_deeplink_for_event(conn, &event, &prefs)?;
        if !prefs.enabled_services.is_empty() && best.is_none() {
            summary.filtered_out += 1;
            continue;
        }
        chosen.push(best);
        kept_events.push(event);
    }

    if kept_events.is_empty() {
        tracing::info!("no future events to schedule");
        return Ok(summary);
    }

    let sched: Vec<SchedEvent> = kept_events
        .iter()
        .map(|e| {
            let start = ms_to_dt(e.start_ms).unwrap_or_else(Utc::now);
            let end = ms_to_dt(e.end_ms).unwrap_or(start);
            SchedEvent {
                start,
                end,
                end_padded: end + Duration::minutes(cfg.padding_minutes),
            }
        })
        .collect();

    let now = Utc::now();
    let mut placeholder_start_global = floor_hour(now) - Duration::hours(1);
    if let Some(earliest) = sched.iter().map(|e| e.start).min() {
        let earliest_floored = floor_hour(earliest);
        if earliest_floored < placeholder_start_global {
            placeholder_start_global = earliest_floored - Duration::hours(1);
        }
    }
    let latest_end = sched
        .iter()
        .map(|e| e.end_padded)
        .max()
        .unwrap_or(now);
    let placeholder_end_global =
        ceil_hour(latest_end + Duration::days(cfg.placeholder_extra_days));

    let (assignments, dropped) =
        pack_first_fit(&sched, cfg.lane_count, placeholder_start_global);
    summary.dropped = dropped.len();

    let block = Duration::minutes(cfg.placeholder_block_minutes);
    for (lane_idx, lane_assignments) in assignments.iter().enumerate() {
        let lane_id = lane_idx as i32 + 1;
        let mut cursor = placeholder_start_global;

        for &idx in lane_assignments {
            let ev = &kept_events[idx];
            let slot = &sched[idx];

            // Idle blocks up to the event start
            let mut gap_start = cursor;
            while gap_start < slot.start {
                let gap_end = std::cmp::min(gap_start + block, slot.start);
                if gap_end > gap_start {
                    insert_placeholder(conn, lane_id, gap_start, gap_end)?;
                    summary.placeholders += 1;
                }
                gap_start = gap_end;
            }

            let choice = chosen[idx].as_ref();
            catalog::insert_lane_event(
                conn,
                &LaneEvent {
                    lane_id,
                    event_id: ev.id.clone(),
                    start_utc: fmt_iso_utc(slot.start),
                    end_utc: fmt_iso_utc(slot.end),
                    is_placeholder: 0,
                    title: Some(ev.title.clone()),
                    chosen_playable_id: choice.map(|c| c.playable_id.clone()),
                    chosen_provider: choice.map(|c| c.provider.clone()),
                    chosen_logical_service: choice.map(|c| c.logical_service.clone()),
                    chosen_deeplink: choice.and_then(|c| c.scheme_url.clone()),
                },
            )?;
            summary.scheduled += 1;
            cursor = slot.end;
        }

        while cursor < placeholder_end_global {
            let gap_end = std::cmp::min(cursor + block, placeholder_end_global);
            if gap_end > cursor {
                insert_placeholder(conn, lane_id, cursor, gap_end)?;
                summary.placeholders += 1;
            }
            cursor = gap_end;
        }
    }

    tracing::info!(
        scheduled = summary.scheduled,
        dropped = summary.dropped,
        placeholders = summary.placeholders,
        filtered_out = summary.filtered_out,
        "lane plan rebuilt"
    );
    Ok(summary)
}

fn insert_placeholder(
    conn: &mut DbPooledConnection,
    lane_id: i32,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), DbError> {
    catalog::insert_lane_event(
        conn,
        &LaneEvent {
            lane_id,
            event_id: format!("placeholder-{}-{}", lane_id, fmt_iso_utc(start)),
            start_utc: fmt_iso_utc(start),
            end_utc: fmt_iso_utc(end),
            is_placeholder: 1,
            title: Some("Nothing Scheduled".to_string()),
            chosen_playable_id: None,
            chosen_provider: None,
            chosen_logical_service: None,
            chosen_deeplink: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::upsert_event;
    use crate::db::connection::create_migrated_pool;
    use crate::db::test_support::{make_event, make_playable};
    use crate::db::DbPool;
    use crate::timeutil::parse_iso_utc;
    use chrono::TimeZone;

    fn utc(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, h, mi, 0).unwrap()
    }

    fn sched(start: DateTime<Utc>, end: DateTime<Utc>, padding_min: i64) -> SchedEvent {
        SchedEvent {
            start,
            end,
            end_padded: end + Duration::minutes(padding_min),
        }
    }

    #[test]
    fn test_three_overlapping_events_two_lanes_drops_third() {
        // A [10:00-11:00], B [10:30-11:30], C [10:45-12:00], padding 45
        let events = vec![
            sched(utc(10, 0), utc(11, 0), 45),
            sched(utc(10, 30), utc(11, 30), 45),
            sched(utc(10, 45), utc(12, 0), 45),
        ];
        let origin = utc(8, 0);
        let (assignments, dropped) = pack_first_fit(&events, 2, origin);

        assert_eq!(assignments[0], vec![0]);
        assert_eq!(assignments[1], vec![1]);
        assert_eq!(dropped, vec![2]);
    }

    #[test]
    fn test_event_fits_after_padding_expires() {
        let events = vec![
            sched(utc(10, 0), utc(11, 0), 45),
            // Starts exactly when lane 1's padding ends
            sched(utc(11, 45), utc(13, 0), 45),
        ];
        let (assignments, dropped) = pack_first_fit(&events, 1, utc(8, 0));
        assert_eq!(assignments[0], vec![0, 1]);
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_first_fit_prefers_lowest_lane_index() {
        let events = vec![
            sched(utc(10, 0), utc(11, 0), 0),
            sched(utc(12, 0), utc(13, 0), 0),
        ];
        let (assignments, _) = pack_first_fit(&events, 3, utc(8, 0));
        // Both land on lane 0 because it frees up in time
        assert_eq!(assignments[0], vec![0, 1]);
        assert!(assignments[1].is_empty());
    }

    fn seeded_pool() -> DbPool {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");
        for (id, start_h, end_h) in [("e1", 2, 4), ("e2", 3, 5), ("e3", 6, 8)] {
            let ev = make_event(id, Some(&format!("pv-{}", id)), start_h, end_h);
            let p = make_playable(id, "p1", "peacock");
            upsert_event(&mut conn, &ev, &[p], &[]).expect("seed");
        }
        pool
    }

    fn test_cfg() -> LanePlanConfig {
        LanePlanConfig {
            lane_count: 2,
            days_ahead: 7,
            padding_minutes: 45,
            placeholder_block_minutes: 60,
            placeholder_extra_days: 1,
            lane_start_ch: 9000,
        }
    }

    #[test]
    fn test_build_lanes_end_to_end() {
        let pool = seeded_pool();
        let mut conn = pool.get().expect("conn");

        let summary = build_lanes(&mut conn, &test_cfg()).expect("build");
        assert_eq!(summary.scheduled, 3);
        assert_eq!(summary.dropped, 0);
        assert!(summary.placeholders > 0);

        let lanes = catalog::all_lanes(&mut conn).expect("lanes");
        assert_eq!(lanes.len(), 2);
        assert_eq!(lanes[0].logical_number, 9000);
        assert_eq!(lanes[1].logical_number, 9001);

        // Frozen deeplink choice recorded on real slots
        let slots = catalog::lane_events_for_lane(&mut conn, 1).expect("slots");
        let real: Vec<_> = slots.iter().filter(|s| s.is_placeholder == 0).collect();
        assert!(!real.is_empty());
        for slot in &real {
            assert_eq!(slot.chosen_logical_service.as_deref(), Some("peacock"));
            assert!(slot.chosen_deeplink.is_some());
        }
    }

    #[test]
    fn test_no_overlapping_slots_per_lane() {
        let pool = seeded_pool();
        let mut conn = pool.get().expect("conn");
        build_lanes(&mut conn, &test_cfg()).expect("build");

        for lane in 1..=2 {
            let slots = catalog::lane_events_for_lane(&mut conn, lane).expect("slots");
            for pair in slots.windows(2) {
                let prev_end = parse_iso_utc(&pair[0].end_utc).expect("end");
                let next_start = parse_iso_utc(&pair[1].start_utc).expect("start");
                assert!(
                    prev_end <= next_start,
                    "lane {} slots overlap: {} > {}",
                    lane,
                    pair[0].end_utc,
                    pair[1].start_utc
                );
            }
        }
    }

    #[test]
    fn test_rebuild_is_stateless() {
        let pool = seeded_pool();
        let mut conn = pool.get().expect("conn");

        build_lanes(&mut conn, &test_cfg()).expect("first build");
        let first: Vec<_> = catalog::lane_events_for_lane(&mut conn, 1).expect("slots");

        build_lanes(&mut conn, &test_cfg()).expect("second build");
        let second: Vec<_> = catalog::lane_events_for_lane(&mut conn, 1).expect("slots");

        let ids = |v: &[LaneEvent]| {
            v.iter()
                .map(|s| (s.event_id.clone(), s.start_utc.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_allowlist_drops_events_without_surviving_playable() {
        let pool = seeded_pool();
        let mut conn = pool.get().expect("conn");
        filters::set_preference(&mut conn, "enabled_services", &vec!["dazn".to_string()])
            .expect("prefs");

        let summary = build_lanes(&mut conn, &test_cfg()).expect("build");
        assert_eq!(summary.scheduled, 0);
        assert_eq!(summary.filtered_out, 3);
    }
}
