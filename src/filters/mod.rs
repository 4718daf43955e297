//! User preferences and content filtering.
//!
//! Preferences are key/value rows with JSON values. An empty
//! `enabled_services` list means "allow all"; disabled sports and leagues
//! drop whole events before deeplink selection ever sees them.

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::models::Event;
use crate::db::schema::user_preferences;
use crate::db::{DbError, DbPooledConnection};
use crate::timeutil::fmt_iso_utc;

/// Parsed user preferences with defaults for anything unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub enabled_services: Vec<String>,
    #[serde(default)]
    pub disabled_sports: Vec<String>,
    #[serde(default)]
    pub disabled_leagues: Vec<String>,
    #[serde(default)]
    pub service_priorities: HashMap<String, i32>,
    #[serde(default = "default_amazon_penalty")]
    pub amazon_penalty: bool,
    #[serde(default = "default_language")]
    pub language_preference: String,
    #[serde(default)]
    pub auto_refresh_enabled: bool,
    #[serde(default = "default_refresh_time")]
    pub auto_refresh_time: String,
}

fn default_amazon_penalty() -> bool {
    true
}

fn default_language() -> String {
    "en".to_string()
}

fn default_refresh_time() -> String {
    "02:30".to_string()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled_services: Vec::new(),
            disabled_sports: Vec::new(),
            disabled_leagues: Vec::new(),
            service_priorities: HashMap::new(),
            amazon_penalty: true,
            language_preference: "en".to_string(),
            auto_refresh_enabled: false,
            auto_refresh_time: "02:30".to_string(),
        }
    }
}

fn read_json_key<T: serde::de::DeserializeOwned>(
    raw: &HashMap<String, String>,
    key: &str,
) -> Option<T> {
    raw.get(key).and_then(|v| serde_json::from_str(v).ok())
}

/// Load preferences from the store. Missing keys fall back to defaults;
/// malformed values are ignored rather than failing the caller.
pub fn load_preferences(conn: &mut DbPooledConnection) -> Result<Preferences, DbError> {
    let rows: Vec<(String, String)> = user_preferences::table
        .select((user_preferences::key, user_preferences::value))
        .load(conn)?;
    let raw: HashMap<String, String> = rows.into_iter().collect();

    let mut prefs = Preferences::default();
    if let Some(v) = read_json_key(&raw, "enabled_services") {
        prefs.enabled_services = v;
    }
    if let Some(v) = read_json_key(&raw, "disabled_sports") {
        prefs.disabled_sports = v;
    }
    if let Some(v) = read_json_key(&raw, "disabled_leagues") {
        prefs.disabled_leagues = v;
    }
    if let Some(v) = read_json_key(&raw, "service_priorities") {
        prefs.service_priorities = v;
    }
    if let Some(v) = read_json_key(&raw, "amazon_penalty") {
        prefs.amazon_penalty = v;
    }
    if let Some(v) = read_json_key::<String>(&raw, "language_preference") {
        if matches!(v.as_str(), "en" | "es" | "both") {
            prefs.language_preference = v;
        }
    }
    if let Some(v) = read_json_key(&raw, "auto_refresh_enabled") {
        prefs.auto_refresh_enabled = v;
    }
    if let Some(v) = read_json_key::<String>(&raw, "auto_refresh_time") {
        prefs.auto_refresh_time = v;
    }

    Ok(prefs)
}

/// Persist one preference key (value is JSON-encoded).
pub fn set_preference<T: Serialize>(
    conn: &mut DbPooledConnection,
    key: &str,
    value: &T,
) -> Result<(), DbError> {
    let json = serde_json::to_string(value)
        .map_err(|e| DbError::Other(format!("serialize {}: {}", key, e)))?;
    let now = fmt_iso_utc(Utc::now());
    diesel::insert_into(user_preferences::table)
        .values((
            user_preferences::key.eq(key),
            user_preferences::value.eq(&json),
            user_preferences::updated_at.eq(&now),
        ))
        .on_conflict(user_preferences::key)
        .do_update()
        .set((
            user_preferences::value.eq(&json),
            user_preferences::updated_at.eq(&now),
        ))
        .execute(conn)?;
    Ok(())
}

/// Persist a whole preferences struct key by key.
pub fn save_preferences(
    conn: &mut DbPooledConnection,
    prefs: &Preferences,
) -> Result<(), DbError> {
    set_preference(conn, "enabled_services", &prefs.enabled_services)?;
    set_preference(conn, "disabled_sports", &prefs.disabled_sports)?;
    set_preference(conn, "disabled_leagues", &prefs.disabled_leagues)?;
    set_preference(conn, "service_priorities", &prefs.service_priorities)?;
    set_preference(conn, "amazon_penalty", &prefs.amazon_penalty)?;
    set_preference(conn, "language_preference", &prefs.language_preference)?;
    set_preference(conn, "auto_refresh_enabled", &prefs.auto_refresh_enabled)?;
    set_preference(conn, "auto_refresh_time", &prefs.auto_refresh_time)?;
    Ok(())
}

// -------------------- Classification helpers --------------------

/// Sport and league extracted from an event's classification list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub sport: Option<String>,
    pub league: Option<String>,
}

/// Parse classification JSON. Accepts both the list form
/// `[{"type":"sport","value":...}]` and the legacy dict form
/// `{"sport":...,"league":...}`.
pub fn classify(classification_json: Option<&str>) -> Classification {
    let mut out = Classification::default();
    let Some(raw) = classification_json else {
        return out;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return out;
    };

    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                let t = item.get("type").and_then(|v| v.as_str());
                let v = item.get("value").and_then(|v| v.as_str());
                match (t, v) {
                    (Some("sport"), Some(v)) if out.sport.is_none() => {
                        out.sport = Some(v.to_string())
                    }
                    (Some("league"), Some(v)) if out.league.is_none() => {
                        out.league = Some(v.to_string())
                    }
                    _ => {}
                }
            }
        }
        serde_json::Value::Object(map) => {
            out.sport = map.get("sport").and_then(|v| v.as_str()).map(String::from);
            out.league = map.get("league").and_then(|v| v.as_str()).map(String::from);
        }
        _ => {}
    }
    out
}

/// Genres list from an event's genres JSON.
pub fn genres_of(event: &Event) -> Vec<String> {
    event
        .genres_json
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
        .unwrap_or_default()
}

/// Event-level content filter: disabled sports match against genres and the
/// sport classification, disabled leagues against the league classification.
pub fn should_include_event(event: &Event, prefs: &Preferences) -> bool {
    if prefs.disabled_sports.is_empty() && prefs.disabled_leagues.is_empty() {
        return true;
    }

    let classification = classify(event.classification_json.as_deref());

    if !prefs.disabled_sports.is_empty() {
        for genre in genres_of(event) {
            if prefs.disabled_sports.iter().any(|s| s == &genre) {
                return false;
            }
        }
        if let Some(sport) = &classification.sport {
            if prefs.disabled_sports.iter().any(|s| s == sport) {
                return false;
            }
        }
    }

    if !prefs.disabled_leagues.is_empty() {
        if let Some(league) = &classification.league {
            if prefs.disabled_leagues.iter().any(|l| l == league) {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_migrated_pool;
    use crate::db::test_support::make_event;

    #[test]
    fn test_defaults_when_store_empty() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");
        let prefs = load_preferences(&mut conn).expect("load");
        assert!(prefs.enabled_services.is_empty());
        assert!(prefs.amazon_penalty);
        assert_eq!(prefs.language_preference, "en");
    }

    #[test]
    fn test_round_trip_persistence() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        let mut prefs = Preferences::default();
        prefs.enabled_services = vec!["peacock".into(), "sportsonespn".into()];
        prefs.disabled_sports = vec!["Darts".into()];
        prefs.service_priorities.insert("peacock".into(), 90);
        prefs.amazon_penalty = false;
        prefs.language_preference = "both".into();
        save_preferences(&mut conn, &prefs).expect("save");

        let loaded = load_preferences(&mut conn).expect("load");
        assert_eq!(loaded.enabled_services, prefs.enabled_services);
        assert_eq!(loaded.disabled_sports, prefs.disabled_sports);
        assert_eq!(loaded.service_priorities.get("peacock"), Some(&90));
        assert!(!loaded.amazon_penalty);
        assert_eq!(loaded.language_preference, "both");
    }

    #[test]
    fn test_malformed_value_falls_back() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        diesel::sql_query(
            "INSERT INTO user_preferences (key, value, updated_at) \
             VALUES ('enabled_services', '{broken json', '2026-01-01T00:00:00Z')",
        )
        .execute(&mut conn)
        .expect("seed");

        let prefs = load_preferences(&mut conn).expect("load");
        assert!(prefs.enabled_services.is_empty());
    }

    #[test]
    fn test_classify_list_and_dict_forms() {
        let list = r#"[{"type":"sport","value":"Hockey"},{"type":"league","value":"NHL"}]"#;
        let c = classify(Some(list));
        assert_eq!(c.sport.as_deref(), Some("Hockey"));
        assert_eq!(c.league.as_deref(), Some("NHL"));

        let dict = r#"{"sport":"Soccer","league":"MLS"}"#;
        let c = classify(Some(dict));
        assert_eq!(c.sport.as_deref(), Some("Soccer"));
        assert_eq!(c.league.as_deref(), Some("MLS"));

        assert_eq!(classify(None), Classification::default());
        assert_eq!(classify(Some("not json")), Classification::default());
    }

    #[test]
    fn test_should_include_event_filters() {
        let mut prefs = Preferences::default();
        prefs.disabled_sports = vec!["Basketball".into()];

        let event = make_event("e1", Some("pv"), 1, 3); // Basketball / NBA
        assert!(!should_include_event(&event, &prefs));

        let mut prefs = Preferences::default();
        prefs.disabled_leagues = vec!["NBA".into()];
        assert!(!should_include_event(&event, &prefs));

        let prefs = Preferences::default();
        assert!(should_include_event(&event, &prefs));

        let mut prefs = Preferences::default();
        prefs.disabled_sports = vec!["Darts".into()];
        assert!(should_include_event(&event, &prefs));
    }
}
