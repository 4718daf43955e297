//! Logical service mapping
//!
//! Breaks the generic "Web" provider into distinct logical services based on
//! URL host and event metadata, and owns the service display-name and
//! default-priority tables. Raw app-scheme providers pass through unchanged;
//! only `http`/`https`/empty providers are analyzed.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::db::catalog;
use crate::db::DbPooledConnection;

/// Hostname -> logical service code for web playables.
fn host_service(host: &str) -> Option<&'static str> {
    match host {
        "peacocktv.com" | "www.peacocktv.com" => Some("peacock_web"),
        "play.hbomax.com" | "www.max.com" => Some("max"),
        "f1tv.formula1.com" => Some("f1tv"),
        "tv.apple.com" => Some("apple_tv"),
        _ => None,
    }
}

/// Determine the logical service code for a playable.
///
/// When `conn` is provided, Apple TV playables are routed to a league-scoped
/// service (`apple_mls`, `apple_mlb`, `apple_nba`, `apple_nhl`) using the
/// event classification; without a connection they fall back to
/// `apple_other`. Everything else is a pure function of its inputs.
pub fn logical_service_for_playable(
    provider: &str,
    deeplink_play: Option<&str>,
    deeplink_open: Option<&str>,
    playable_url: Option<&str>,
    event_id: Option<&str>,
    conn: Option<&mut DbPooledConnection>,
) -> String {
    // Non-web providers keep their scheme identity
    if !matches!(provider, "" | "http" | "https") {
        return provider.to_string();
    }

    let url = [deeplink_play, deeplink_open, playable_url]
        .into_iter()
        .flatten()
        .find(|u| !u.trim().is_empty());

    let Some(url) = url else {
        return "https".to_string();
    };

    let Some(host) = extract_host(url) else {
        return "https".to_string();
    };

    match host_service(&host) {
        Some("apple_tv") => {
            if let (Some(event_id), Some(conn)) = (event_id, conn) {
                match league_for_event(conn, event_id).as_deref() {
                    Some("MLS") => "apple_mls".to_string(),
                    Some("MLB") => "apple_mlb".to_string(),
                    Some("NBA") => "apple_nba".to_string(),
                    Some("NHL") => "apple_nhl".to_string(),
                    _ => "apple_other".to_string(),
                }
            } else {
                "apple_other".to_string()
            }
        }
        Some(code) => code.to_string(),
        None => "https".to_string(),
    }
}

fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Normalized league for Apple TV routing, read from the event's
/// classification list.
fn league_for_event(conn: &mut DbPooledConnection, event_id: &str) -> Option<String> {
    let event = catalog::get_event(conn, event_id).ok()??;
    let raw = event.classification_json?;
    let parsed: serde_json::Value = serde_json::from_str(&raw).ok()?;
    let items = parsed.as_array()?;

    for item in items {
        if item.get("type").and_then(|t| t.as_str()) != Some("league") {
            continue;
        }
        let league = item.get("value").and_then(|v| v.as_str())?.to_uppercase();
        if league.contains("MLS") {
            return Some("MLS".to_string());
        }
        if league.contains("MLB") || league.contains("BASEBALL") {
            return Some("MLB".to_string());
        }
        if league.contains("NBA") {
            return Some("NBA".to_string());
        }
        if league.contains("NHL") || league.contains("HOCKEY") {
            return Some("NHL".to_string());
        }
    }
    None
}

/// Human-readable display name for a service code.
pub fn service_display_name(code: &str) -> String {
    let name = match code {
        // App-based
        "sportsonespn" => "ESPN+",
        "espn_plus" => "ESPN+",
        "espn_linear" => "ESPN",
        "sportscenter" => "ESPN",
        "peacock" | "peacocktv" => "Peacock",
        "pplus" => "Paramount+",
        "aiv" => "Prime Video",
        "aiv_prime" => "Prime Video",
        "aiv_peacock" => "Peacock (on Prime)",
        "aiv_max" => "Max (on Prime)",
        "aiv_dazn" => "DAZN (on Prime)",
        "aiv_fanduel" => "FanDuel TV (on Prime)",
        "gametime" => "Prime Video TNF",
        "cbssportsapp" => "CBS Sports",
        "cbstve" => "CBS",
        "nbcsportstve" => "NBC Sports",
        "foxone" => "FOX Sports",
        "fsapp" => "FOX Sports",
        "dazn" | "open.dazn.com" => "DAZN",
        "vixapp" => "ViX",
        "nflctv" => "NFL+",
        "nflmobile" => "NFL",
        "watchtru" => "truTV",
        "watchtnt" => "TNT",
        "victory" => "Victory+",
        "kayo" => "Kayo",
        "kayo_web" => "Kayo (Web)",
        "bein" => "beIN Sports",
        "fanatiz" => "Fanatiz",
        "gotham" => "Gotham",

        // Web-based
        "peacock_web" => "Peacock (Web)",
        "max" => "Max",
        "f1tv" => "F1 TV",
        "apple_mls" => "Apple MLS",
        "apple_mlb" => "Apple MLB",
        "apple_nba" => "Apple NBA",
        "apple_nhl" => "Apple NHL",
        "apple_other" => "Apple TV+",

        // Fallback
        "https" | "http" => "Web - Other",
        _ => return code.to_uppercase(),
    };
    name.to_string()
}

/// Default selection priority for a service (lower = preferred). User
/// overrides in `service_priorities` take precedence; unknown codes land in
/// the middle of the table.
pub fn default_service_priority(code: &str) -> i32 {
    match code {
        // Premium sports services
        "sportsonespn" | "espn_plus" => 0,
        "peacock" => 1,
        "peacock_web" => 2,

        // General streaming
        "pplus" => 3,
        "aiv" | "aiv_prime" => 4,
        "max" => 5,
        // Prime channel subscriptions rank just below native Prime
        "aiv_peacock" | "aiv_max" | "aiv_dazn" | "aiv_fanduel" => 6,

        // Sports-specific
        "cbssportsapp" => 6,
        "cbstve" => 7,
        "nbcsportstve" => 8,
        "foxone" => 9,
        "fsapp" => 10,

        // Apple services
        "apple_mls" => 11,
        "apple_mlb" => 12,
        "apple_nba" => 13,
        "apple_nhl" => 14,
        "apple_other" => 15,

        // Niche / specialty
        "dazn" => 16,
        "open.dazn.com" => 17,
        "f1tv" => 18,
        "vixapp" => 19,
        "nflctv" => 20,
        "watchtru" => 21,
        "watchtnt" => 22,

        // Generic web, last resort
        "https" => 30,
        "http" => 31,

        _ => 25,
    }
}

/// Score used by the filtered selection path, where higher is better.
/// Inverts the legacy lower-is-better table onto a 0..=100 scale.
pub fn inverted_service_score(code: &str) -> i32 {
    100 - default_service_priority(code)
}

static GTI_RE: OnceLock<Regex> = OnceLock::new();

/// Extract an Amazon Global Title Identifier from a deeplink, if present.
pub fn extract_gti(url: &str) -> Option<String> {
    let re = GTI_RE
        .get_or_init(|| Regex::new(r"(amzn1\.dv\.gti\.[0-9a-fA-F-]{36})").expect("gti regex"));
    re.captures(url).map(|c| c[1].to_string())
}

/// Remap a generic `aiv` playable to its channel-specific sub-service using
/// the persisted Amazon GTI map. Returns `None` when the GTI is unknown or
/// the deeplink carries none.
pub fn remap_amazon_service(
    conn: &mut DbPooledConnection,
    deeplink: &str,
) -> Option<String> {
    let gti = extract_gti(deeplink)?;
    let row = catalog::amazon_channel_for_gti(conn, &gti).ok()??;
    row.logical_service.filter(|s| !s.trim().is_empty())
}

// -------------------- ADB provider aggregation --------------------

/// Collapse a logical service onto its ADB provider code. Multiple ESPN
/// services share one tuner provider; everything else maps to itself.
pub fn adb_provider_code(logical_service: &str) -> &str {
    match logical_service {
        "espn_linear" | "espn_plus" | "sportsonespn" | "sportscenter" => "sportscenter",
        other => other,
    }
}

/// All logical services that schedule onto an ADB provider code.
pub fn logical_services_for_adb_provider(provider_code: &str) -> Vec<String> {
    match provider_code {
        "sportscenter" => vec![
            "espn_linear".to_string(),
            "espn_plus".to_string(),
            "sportscenter".to_string(),
            "sportsonespn".to_string(),
        ],
        other => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog::upsert_event;
    use crate::db::connection::create_migrated_pool;
    use crate::db::test_support::make_event;
    use crate::db::AmazonChannel;

    #[test]
    fn test_app_scheme_passes_through() {
        let svc = logical_service_for_playable(
            "sportscenter",
            Some("sportscenter://x-callback-url/showWatchStream?playID=abc"),
            None,
            None,
            None,
            None,
        );
        assert_eq!(svc, "sportscenter");
    }

    #[test]
    fn test_known_web_hosts() {
        let cases = [
            ("https://www.peacocktv.com/watch/live", "peacock_web"),
            ("https://play.hbomax.com/page/x", "max"),
            ("https://f1tv.formula1.com/detail/123", "f1tv"),
        ];
        for (url, expected) in cases {
            let svc = logical_service_for_playable("https", Some(url), None, None, None, None);
            assert_eq!(svc, expected, "for {}", url);
        }
    }

    #[test]
    fn test_unknown_host_falls_back_to_https() {
        let svc = logical_service_for_playable(
            "https",
            Some("https://www.example.com/watch"),
            None,
            None,
            None,
            None,
        );
        assert_eq!(svc, "https");
    }

    #[test]
    fn test_no_url_falls_back_to_https() {
        let svc = logical_service_for_playable("", None, None, None, None, None);
        assert_eq!(svc, "https");
    }

    #[test]
    fn test_apple_tv_without_conn_is_apple_other() {
        let svc = logical_service_for_playable(
            "https",
            Some("https://tv.apple.com/us/sporting-event/x"),
            None,
            None,
            None,
            None,
        );
        assert_eq!(svc, "apple_other");
    }

    #[test]
    fn test_apple_tv_league_routing() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        let mut ev = make_event("appletv-99", Some("pv99"), 1, 3);
        ev.classification_json = Some(
            r#"[{"type":"sport","value":"Soccer"},{"type":"league","value":"MLS"}]"#.to_string(),
        );
        upsert_event(&mut conn, &ev, &[], &[]).expect("upsert");

        let svc = logical_service_for_playable(
            "https",
            Some("https://tv.apple.com/us/sporting-event/x"),
            None,
            None,
            Some("appletv-99"),
            Some(&mut conn),
        );
        assert_eq!(svc, "apple_mls");
    }

    #[test]
    fn test_display_names() {
        assert_eq!(service_display_name("peacock_web"), "Peacock (Web)");
        assert_eq!(service_display_name("sportsonespn"), "ESPN+");
        assert_eq!(service_display_name("https"), "Web - Other");
        assert_eq!(service_display_name("mystery"), "MYSTERY");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(default_service_priority("sportsonespn") < default_service_priority("aiv"));
        assert!(default_service_priority("aiv") < default_service_priority("https"));
        assert_eq!(default_service_priority("unknown_code"), 25);
        assert!(inverted_service_score("sportsonespn") > inverted_service_score("https"));
    }

    #[test]
    fn test_extract_gti() {
        let url = "aiv://aiv/detail?gti=amzn1.dv.gti.10fd272d-309e-427a-87b6-6289003e2ccb&action=watch";
        assert_eq!(
            extract_gti(url).as_deref(),
            Some("amzn1.dv.gti.10fd272d-309e-427a-87b6-6289003e2ccb")
        );
        assert_eq!(extract_gti("aiv://aiv/detail?gti=bogus"), None);
    }

    #[test]
    fn test_amazon_gti_remap() {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut conn = pool.get().expect("conn");

        let gti = "amzn1.dv.gti.10fd272d-309e-427a-87b6-6289003e2ccb";
        catalog::upsert_amazon_channel(
            &mut conn,
            &AmazonChannel {
                gti: gti.to_string(),
                channel_id: Some("peacock".into()),
                channel_name: Some("Peacock on Prime".into()),
                logical_service: Some("aiv_peacock".into()),
                last_updated_utc: None,
                is_stale: 0,
            },
        )
        .expect("seed");

        let url = format!("aiv://aiv/detail?gti={}&action=watch", gti);
        assert_eq!(
            remap_amazon_service(&mut conn, &url).as_deref(),
            Some("aiv_peacock")
        );
        assert_eq!(
            remap_amazon_service(&mut conn, "aiv://aiv/detail?gti=amzn1.dv.gti.ffffffff-ffff-ffff-ffff-ffffffffffff"),
            None
        );
    }

    #[test]
    fn test_adb_aggregation() {
        assert_eq!(adb_provider_code("espn_plus"), "sportscenter");
        assert_eq!(adb_provider_code("espn_linear"), "sportscenter");
        assert_eq!(adb_provider_code("peacock"), "peacock");

        let services = logical_services_for_adb_provider("sportscenter");
        assert!(services.contains(&"espn_plus".to_string()));
        assert!(services.contains(&"espn_linear".to_string()));
        assert_eq!(logical_services_for_adb_provider("pplus"), vec!["pplus"]);
    }
}
