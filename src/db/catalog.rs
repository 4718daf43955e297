//! Catalog queries and transactional upserts.
//!
//! Single embedded store for events, playables, images, preferences and lane
//! plans. Writers (ingest + refresh) go through the functions here; emitters
//! declare the columns they need through the typed row structs in
//! `db::models` rather than discovering them at runtime.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};

use crate::db::models::{
    AdbLane, AmazonChannel, AuthBlob, Event, EventImage, Lane, LaneEvent, NewAdbLane, Playable,
    ProviderLane,
};
use crate::db::schema::{
    adb_lanes, amazon_channels, auth_blobs, event_images, events, lane_events, lanes, playables,
    provider_lanes,
};
use crate::db::{DbError, DbPooledConnection};
use crate::timeutil::fmt_iso_utc;

/// Channel labels that are synthetic placeholders upstream, never real airings.
pub const FAKE_CHANNELS: &[&str] = &["NBC Sports NOW", "NFL Channel", "Telemundo Deportes Ahora"];

/// Upsert one event together with its playables and images.
///
/// Playables for the event are deleted and reinserted so feeds removed
/// upstream disappear here too. Images de-duplicate on their composite key.
/// The whole write is one transaction.
pub fn upsert_event(
    conn: &mut DbPooledConnection,
    event: &Event,
    event_playables: &[Playable],
    images: &[EventImage],
) -> Result<(), DbError> {
    if event.end_ms <= event.start_ms {
        return Err(DbError::Query(diesel::result::Error::QueryBuilderError(
            format!("event {} has end <= start", event.id).into(),
        )));
    }

    conn.transaction::<_, diesel::result::Error, _>(|tx| {
        diesel::insert_into(events::table)
            .values(event)
            .on_conflict(events::id)
            .do_update()
            .set(event)
            .execute(tx)?;

        diesel::delete(playables::table.filter(playables::event_id.eq(&event.id))).execute(tx)?;
        if !event_playables.is_empty() {
            diesel::insert_into(playables::table)
                .values(event_playables)
                .execute(tx)?;
        }

        for image in images {
            diesel::insert_into(event_images::table)
                .values(image)
                .on_conflict_do_nothing()
                .execute(tx)?;
        }

        Ok(())
    })?;

    Ok(())
}

/// Window query used by the admin events API: everything that ended less
/// than `days_back` ago and starts within `days_forward`. Ordering is
/// deterministic (start, end, title, id) with epoch-ms authoritative.
pub fn events_in_window(
    conn: &mut DbPooledConnection,
    days_back: i64,
    days_forward: i64,
) -> Result<Vec<Event>, DbError> {
    let now = Utc::now();
    let back_ms = (now - Duration::days(days_back)).timestamp_millis();
    let forward_ms = (now + Duration::days(days_forward)).timestamp_millis();

    let rows = events::table
        .filter(events::end_ms.ge(back_ms))
        .filter(events::start_ms.le(forward_ms))
        .order((
            events::start_ms.asc(),
            events::end_ms.asc(),
            events::title.asc(),
            events::id.asc(),
        ))
        .load::<Event>(conn)?;
    Ok(rows)
}

/// Events for the direct emitters: currently airing or starting within
/// `hours_window`, same deterministic ordering.
pub fn direct_window_events(
    conn: &mut DbPooledConnection,
    hours_window: i64,
) -> Result<Vec<Event>, DbError> {
    let now = Utc::now();
    let now_ms = now.timestamp_millis();
    let window_end_ms = (now + Duration::hours(hours_window)).timestamp_millis();

    let rows = events::table
        .filter(events::start_ms.le(window_end_ms))
        .filter(events::end_ms.ge(now_ms))
        .order((
            events::start_ms.asc(),
            events::end_ms.asc(),
            events::title.asc(),
            events::id.asc(),
        ))
        .load::<Event>(conn)?;
    Ok(rows)
}

/// Future events eligible for lane planning: pvid present, start within the
/// look-ahead window, not yet ended, channel label not in the deny list.
/// Durations over 12 hours are sentinel values upstream and are skipped.
pub fn future_events_for_lanes(
    conn: &mut DbPooledConnection,
    days_ahead: i64,
) -> Result<Vec<Event>, DbError> {
    let now = Utc::now();
    let now_ms = now.timestamp_millis();
    let cutoff_ms = (now + Duration::days(days_ahead)).timestamp_millis();

    let rows = events::table
        .filter(events::pvid.is_not_null())
        .filter(events::start_ms.ge(now_ms))
        .filter(events::start_ms.le(cutoff_ms))
        .filter(events::end_ms.gt(now_ms))
        .order((events::start_ms.asc(), events::id.asc()))
        .load::<Event>(conn)?;

    let max_duration_ms = 12 * 3600 * 1000;
    Ok(rows
        .into_iter()
        .filter(|e| e.end_ms > e.start_ms && e.end_ms - e.start_ms <= max_duration_ms)
        .filter(|e| {
            e.channel_name
                .as_deref()
                .map(|c| !FAKE_CHANNELS.contains(&c))
                .unwrap_or(true)
        })
        .collect())
}

#[derive(QueryableByName, Debug)]
struct DupePvidRow {
    #[diesel(sql_type = Text)]
    pvid: String,
}

/// Resolve duplicate external ids: the freshest row wins (last seen, then
/// latest start, then latest end); the rest are deleted along with their
/// playables and images. Returns how many rows were discarded.
pub fn dedupe_by_pvid(conn: &mut DbPooledConnection) -> Result<usize, DbError> {
    let dupes: Vec<DupePvidRow> = diesel::sql_query(
        "SELECT pvid FROM events WHERE pvid IS NOT NULL GROUP BY pvid HAVING COUNT(*) > 1",
    )
    .load(conn)?;

    let mut discarded = 0usize;
    for dupe in dupes {
        let mut rows: Vec<Event> = events::table
            .filter(events::pvid.eq(&dupe.pvid))
            .load(conn)?;
        rows.sort_by(|a, b| {
            b.last_seen_utc
                .cmp(&a.last_seen_utc)
                .then(b.start_ms.cmp(&a.start_ms))
                .then(b.end_ms.cmp(&a.end_ms))
        });
        for loser in rows.iter().skip(1) {
            conn.transaction::<_, diesel::result::Error, _>(|tx| {
                diesel::delete(playables::table.filter(playables::event_id.eq(&loser.id)))
                    .execute(tx)?;
                diesel::delete(event_images::table.filter(event_images::event_id.eq(&loser.id)))
                    .execute(tx)?;
                diesel::delete(events::table.filter(events::id.eq(&loser.id))).execute(tx)?;
                Ok(())
            })?;
            discarded += 1;
        }
    }
    Ok(discarded)
}

pub fn get_event(conn: &mut DbPooledConnection, event_id: &str) -> Result<Option<Event>, DbError> {
    let row = events::table
        .filter(events::id.eq(event_id))
        .first::<Event>(conn)
        .optional()?;
    Ok(row)
}

/// Playables for one event in stable legacy order (stored priority, then id).
pub fn playables_for_event(
    conn: &mut DbPooledConnection,
    event_id: &str,
) -> Result<Vec<Playable>, DbError> {
    let rows = playables::table
        .filter(playables::event_id.eq(event_id))
        .order((playables::priority.asc(), playables::playable_id.asc()))
        .load::<Playable>(conn)?;
    Ok(rows)
}

pub fn get_playable(
    conn: &mut DbPooledConnection,
    event_id: &str,
    playable_id: &str,
) -> Result<Option<Playable>, DbError> {
    let row = playables::table
        .filter(playables::event_id.eq(event_id))
        .filter(playables::playable_id.eq(playable_id))
        .first::<Playable>(conn)
        .optional()?;
    Ok(row)
}

// -------------------- Generic lanes --------------------

pub fn all_lanes(conn: &mut DbPooledConnection) -> Result<Vec<Lane>, DbError> {
    Ok(lanes::table.order(lanes::lane_id.asc()).load::<Lane>(conn)?)
}

pub fn lane_events_for_lane(
    conn: &mut DbPooledConnection,
    lane: i32,
) -> Result<Vec<LaneEvent>, DbError> {
    let rows = lane_events::table
        .filter(lane_events::lane_id.eq(lane))
        .order(lane_events::start_utc.asc())
        .load::<LaneEvent>(conn)?;
    Ok(rows)
}

/// The slot covering instant `at` on a lane, if any. At most one row can
/// match because slots never overlap within a lane.
pub fn current_lane_slot(
    conn: &mut DbPooledConnection,
    lane: i32,
    at: DateTime<Utc>,
) -> Result<Option<LaneEvent>, DbError> {
    let at_iso = fmt_iso_utc(at);
    let row = lane_events::table
        .filter(lane_events::lane_id.eq(lane))
        .filter(lane_events::start_utc.le(&at_iso))
        .filter(lane_events::end_utc.gt(&at_iso))
        .first::<LaneEvent>(conn)
        .optional()?;
    Ok(row)
}

/// Most recent real (non-placeholder) slot that already ended at `at`.
/// Feeds the padding-window fallback in the resolver.
pub fn last_real_slot_before(
    conn: &mut DbPooledConnection,
    lane: i32,
    at: DateTime<Utc>,
) -> Result<Option<LaneEvent>, DbError> {
    let at_iso = fmt_iso_utc(at);
    let row = lane_events::table
        .filter(lane_events::lane_id.eq(lane))
        .filter(lane_events::is_placeholder.eq(0))
        .filter(lane_events::end_utc.le(&at_iso))
        .order(lane_events::end_utc.desc())
        .first::<LaneEvent>(conn)
        .optional()?;
    Ok(row)
}

pub fn reset_lanes(conn: &mut DbPooledConnection) -> Result<(), DbError> {
    conn.transaction::<_, diesel::result::Error, _>(|tx| {
        diesel::delete(lane_events::table).execute(tx)?;
        diesel::delete(lanes::table).execute(tx)?;
        Ok(())
    })?;
    Ok(())
}

pub fn insert_lane(conn: &mut DbPooledConnection, lane: &Lane) -> Result<(), DbError> {
    diesel::insert_into(lanes::table).values(lane).execute(conn)?;
    Ok(())
}

pub fn insert_lane_event(conn: &mut DbPooledConnection, slot: &LaneEvent) -> Result<(), DbError> {
    diesel::replace_into(lane_events::table)
        .values(slot)
        .execute(conn)?;
    Ok(())
}

// -------------------- ADB lanes --------------------

/// Providers with ADB lanes enabled and a positive lane count.
pub fn adb_enabled_providers(
    conn: &mut DbPooledConnection,
) -> Result<Vec<ProviderLane>, DbError> {
    let rows = provider_lanes::table
        .filter(provider_lanes::adb_enabled.eq(1))
        .filter(provider_lanes::adb_lane_count.gt(0))
        .order(provider_lanes::provider_code.asc())
        .load::<ProviderLane>(conn)?;
    Ok(rows)
}

pub fn all_provider_lanes(conn: &mut DbPooledConnection) -> Result<Vec<ProviderLane>, DbError> {
    Ok(provider_lanes::table
        .order(provider_lanes::provider_code.asc())
        .load::<ProviderLane>(conn)?)
}

pub fn upsert_provider_lane(
    conn: &mut DbPooledConnection,
    row: &ProviderLane,
) -> Result<(), DbError> {
    diesel::insert_into(provider_lanes::table)
        .values(row)
        .on_conflict(provider_lanes::provider_code)
        .do_update()
        .set(row)
        .execute(conn)?;
    Ok(())
}

pub fn clear_adb_lanes(conn: &mut DbPooledConnection, provider_code: &str) -> Result<(), DbError> {
    diesel::delete(adb_lanes::table.filter(adb_lanes::provider_code.eq(provider_code)))
        .execute(conn)?;
    Ok(())
}

pub fn insert_adb_lanes(
    conn: &mut DbPooledConnection,
    rows: &[NewAdbLane],
) -> Result<usize, DbError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let n = diesel::insert_into(adb_lanes::table).values(rows).execute(conn)?;
    Ok(n)
}

pub fn adb_lanes_for_provider(
    conn: &mut DbPooledConnection,
    provider_code: &str,
) -> Result<Vec<AdbLane>, DbError> {
    let rows = adb_lanes::table
        .filter(adb_lanes::provider_code.eq(provider_code))
        .order((adb_lanes::lane_number.asc(), adb_lanes::start_utc.asc()))
        .load::<AdbLane>(conn)?;
    Ok(rows)
}

/// Slot covering `at` on a provider-scoped lane.
pub fn current_adb_slot(
    conn: &mut DbPooledConnection,
    provider_code: &str,
    lane_number: i32,
    at: DateTime<Utc>,
) -> Result<Option<AdbLane>, DbError> {
    let at_iso = fmt_iso_utc(at);
    let row = adb_lanes::table
        .filter(adb_lanes::provider_code.eq(provider_code))
        .filter(adb_lanes::lane_number.eq(lane_number))
        .filter(adb_lanes::start_utc.le(&at_iso))
        .filter(adb_lanes::stop_utc.gt(&at_iso))
        .first::<AdbLane>(conn)
        .optional()?;
    Ok(row)
}

// -------------------- Amazon channel map --------------------

pub fn amazon_channel_for_gti(
    conn: &mut DbPooledConnection,
    gti: &str,
) -> Result<Option<AmazonChannel>, DbError> {
    let row = amazon_channels::table
        .filter(amazon_channels::gti.eq(gti))
        .first::<AmazonChannel>(conn)
        .optional()?;
    Ok(row)
}

pub fn upsert_amazon_channel(
    conn: &mut DbPooledConnection,
    row: &AmazonChannel,
) -> Result<(), DbError> {
    diesel::replace_into(amazon_channels::table)
        .values(row)
        .execute(conn)?;
    Ok(())
}

// -------------------- Auth blobs --------------------

/// Fetch the singleton auth blob for an upstream, creating an empty one on
/// first use. Reused until an explicit force-reauth replaces it.
pub fn get_or_create_auth_blob(
    conn: &mut DbPooledConnection,
    upstream: &str,
) -> Result<AuthBlob, DbError> {
    if let Some(existing) = auth_blobs::table
        .filter(auth_blobs::upstream.eq(upstream))
        .first::<AuthBlob>(conn)
        .optional()?
    {
        return Ok(existing);
    }

    let now = fmt_iso_utc(Utc::now());
    let blob = AuthBlob {
        upstream: upstream.to_string(),
        device_id: None,
        user_id: None,
        session_key: None,
        created_utc: now.clone(),
        updated_utc: now,
    };
    diesel::insert_into(auth_blobs::table)
        .values(&blob)
        .execute(conn)?;
    Ok(blob)
}

pub fn update_auth_blob(conn: &mut DbPooledConnection, blob: &AuthBlob) -> Result<(), DbError> {
    let mut updated = blob.clone();
    updated.updated_utc = fmt_iso_utc(Utc::now());
    diesel::insert_into(auth_blobs::table)
        .values(&updated)
        .on_conflict(auth_blobs::upstream)
        .do_update()
        .set(&updated)
        .execute(conn)?;
    Ok(())
}

// -------------------- Stats --------------------

#[derive(QueryableByName, Debug)]
pub struct ServiceCountRow {
    #[diesel(sql_type = Text)]
    pub logical_service: String,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

/// Playable counts per logical service for events that have not ended yet.
pub fn service_counts(conn: &mut DbPooledConnection) -> Result<Vec<ServiceCountRow>, DbError> {
    let now_ms = Utc::now().timestamp_millis();
    let rows = diesel::sql_query(
        "SELECT COALESCE(p.logical_service, p.provider) AS logical_service, COUNT(*) AS count \
         FROM playables p JOIN events e ON p.event_id = e.id \
         WHERE e.end_ms > ? \
         GROUP BY COALESCE(p.logical_service, p.provider) \
         ORDER BY count DESC",
    )
    .bind::<BigInt, _>(now_ms)
    .load(conn)?;
    Ok(rows)
}

#[derive(QueryableByName, Debug)]
pub struct EventStatsRow {
    #[diesel(sql_type = BigInt)]
    pub total_events: i64,
    #[diesel(sql_type = BigInt)]
    pub upcoming_events: i64,
    #[diesel(sql_type = BigInt)]
    pub total_playables: i64,
    #[diesel(sql_type = BigInt)]
    pub events_missing_pvid: i64,
}

pub fn event_stats(conn: &mut DbPooledConnection) -> Result<EventStatsRow, DbError> {
    let now_ms = Utc::now().timestamp_millis();
    let row = diesel::sql_query(
        "SELECT \
            (SELECT COUNT(*) FROM events) AS total_events, \
            (SELECT COUNT(*) FROM events WHERE start_ms > ?) AS upcoming_events, \
            (SELECT COUNT(*) FROM playables) AS total_playables, \
            (SELECT COUNT(*) FROM events WHERE pvid IS NULL) AS events_missing_pvid",
    )
    .bind::<BigInt, _>(now_ms)
    .get_result(conn)?;
    Ok(row)
}

/// Images for an event ordered by type, used as a hero-image fallback.
pub fn first_event_image(
    conn: &mut DbPooledConnection,
    event_id: &str,
) -> Result<Option<String>, DbError> {
    let row = event_images::table
        .filter(event_images::event_id.eq(event_id))
        .order(event_images::img_type.asc())
        .select(event_images::url)
        .first::<String>(conn)
        .optional()?;
    Ok(row)
}

/// Guard used by the orchestrator before emitting: a catalog where any event
/// violates the time invariants fails the run.
pub fn verify_catalog_integrity(conn: &mut DbPooledConnection) -> Result<(), DbError> {
    #[derive(QueryableByName)]
    struct CountRow {
        #[diesel(sql_type = BigInt)]
        bad: i64,
    }
    let row: CountRow = diesel::sql_query(
        "SELECT COUNT(*) AS bad FROM events WHERE end_ms <= start_ms OR start_utc = '' OR end_utc = ''",
    )
    .get_result(conn)?;
    if row.bad > 0 {
        return Err(DbError::Query(diesel::result::Error::QueryBuilderError(
            format!("{} events violate time invariants", row.bad).into(),
        )));
    }
    Ok(())
}
