//! Scheme deeplink parsing and scheme -> HTTP conversion.
//!
//! App-scheme deeplinks are modeled as a tagged variant with per-provider
//! constructors; conversion to an HTTP URL is a pure function of the variant
//! plus a small context (playable id, league, locale). No network calls.
//!
//! Provider notes, learned the hard way from real devices:
//! - ESPN: Apple hands out channel-based links (`playChannel=espn1`) that do
//!   not start playback. The watch playback UUID lives in the graph
//!   enrichment token or embedded in the Apple playable id
//!   (`tvs.sbd.30061:<UUID>:...`).
//! - NBA gametime: stripping the Apple tracking query string makes the app
//!   open the event page; converting to HTTP does not.
//! - NBC Sports: the naive `watch/<id>` rewrite 404s, so we land on the
//!   schedule hub instead.

use std::sync::OnceLock;

use regex::Regex;

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
            .expect("uuid regex")
    })
}

fn embedded_uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r":([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}):")
            .expect("embedded uuid regex")
    })
}

fn is_uuid(s: &str) -> bool {
    uuid_re().is_match(&s.to_lowercase())
}

/// Context that sharpens per-provider conversions.
#[derive(Debug, Clone, Default)]
pub struct ConvertContext<'a> {
    /// Apple playable id, carries an embedded watch UUID for ESPN
    pub playable_id: Option<&'a str>,
    /// ESPN Watch Graph enrichment token (`espn-watch:{playID}[:{hash}]`)
    pub espn_graph_id: Option<&'a str>,
    /// League hint for the CBS Sports watch path
    pub league: Option<&'a str>,
    /// ViX locale path segment, defaults to `es-es`
    pub vix_locale: Option<&'a str>,
}

/// A deeplink, parsed into its provider shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemeLink {
    /// Already HTTP(S), kept verbatim
    Http(String),
    /// `aiv://aiv/detail?gti=...`
    Aiv { gti: Option<String> },
    /// `sportscenter://...` with the raw URL retained for query extraction
    SportsCenter { raw: String },
    /// `pplus://host/path/`
    ParamountPlus { rest: String },
    /// `cbstve://host/path/`
    CbsTve { rest: String },
    /// `open.dazn.com://path`
    Dazn { rest: String },
    /// `vixapp://live/ID?play`
    Vix { tail: String },
    /// `fsapp://live/FS1?...`
    FsApp { channel: String, query: Option<String> },
    /// `foxone://channel/FS1`
    FoxOne { channel: String },
    /// `watchtnt://play...`
    WatchTnt { suffix: String },
    /// `watchtru://play...`
    WatchTru { suffix: String },
    /// `gametime://game/ID?apple-tracking`
    Gametime { base: String },
    /// `nbcsportstve://watch/id`
    NbcSportsTve,
    /// `cbssportsapp://home/watch/LET-N?...`
    CbsSportsApp { let_id: Option<String> },
    /// `nflctv://livestream/uuid`
    NflCtv,
    /// Anything else, raw
    Other(String),
}

fn strip_prefix_ci<'a>(url: &'a str, prefix: &str) -> Option<&'a str> {
    if url.len() >= prefix.len()
        && url.is_char_boundary(prefix.len())
        && url[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&url[prefix.len()..])
    } else {
        None
    }
}

impl SchemeLink {
    pub fn parse(url: &str) -> SchemeLink {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return SchemeLink::Other(String::new());
        }
        let lower = trimmed.to_lowercase();

        if lower.starts_with("http://") || lower.starts_with("https://") {
            return SchemeLink::Http(trimmed.to_string());
        }

        if lower.starts_with("aiv://") {
            let gti = query_param(trimmed, "gti");
            return SchemeLink::Aiv { gti };
        }

        if lower.starts_with("sportscenter://") {
            return SchemeLink::SportsCenter {
                raw: trimmed.to_string(),
            };
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "pplus://") {
            return SchemeLink::ParamountPlus {
                rest: rest.trim_start_matches('/').to_string(),
            };
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "cbstve://") {
            return SchemeLink::CbsTve {
                rest: rest.trim_start_matches('/').to_string(),
            };
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "open.dazn.com://") {
            return SchemeLink::Dazn {
                rest: rest.trim_start_matches('/').to_string(),
            };
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "vixapp://") {
            let mut tail = rest.trim_start_matches('/').to_string();
            if !tail.starts_with("live/") {
                tail = format!("live/{}", tail);
            }
            return SchemeLink::Vix { tail };
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "fsapp://live/") {
            let (channel, query) = match rest.split_once('?') {
                Some((c, q)) => (c, Some(q.to_string())),
                None => (rest, None),
            };
            return SchemeLink::FsApp {
                channel: channel.trim_matches('/').to_lowercase(),
                query,
            };
        }

        if let Some(rest) = strip_prefix_ci(trimmed, "foxone://channel/") {
            return SchemeLink::FoxOne {
                channel: rest.trim_matches('/').to_lowercase(),
            };
        }

        if let Some(suffix) = strip_prefix_ci(trimmed, "watchtnt://play") {
            return SchemeLink::WatchTnt {
                suffix: suffix.to_string(),
            };
        }

        if let Some(suffix) = strip_prefix_ci(trimmed, "watchtru://play") {
            return SchemeLink::WatchTru {
                suffix: suffix.to_string(),
            };
        }

        if lower.starts_with("gametime://") {
            let base = match trimmed.split_once('?') {
                Some((b, _)) => b.to_string(),
                None => trimmed.to_string(),
            };
            return SchemeLink::Gametime { base };
        }

        if lower.starts_with("nbcsportstve://") {
            return SchemeLink::NbcSportsTve;
        }

        if lower.starts_with("cbssportsapp://") {
            static LET_RE: OnceLock<Regex> = OnceLock::new();
            let re = LET_RE.get_or_init(|| Regex::new(r"/watch/(LET-\d+)").expect("LET regex"));
            let let_id = re.captures(trimmed).map(|c| c[1].to_string());
            return SchemeLink::CbsSportsApp { let_id };
        }

        if lower.starts_with("nflctv://") {
            return SchemeLink::NflCtv;
        }

        SchemeLink::Other(trimmed.to_string())
    }

    /// Convert to an HTTP URL for Android / Fire TV clients.
    ///
    /// Returns `None` when no conversion exists; the caller decides whether
    /// to keep the scheme URL. Gametime deliberately stays a scheme URL with
    /// the tracking query removed.
    pub fn to_http(&self, ctx: &ConvertContext) -> Option<String> {
        match self {
            SchemeLink::Http(url) => Some(url.clone()),

            SchemeLink::Aiv { gti } => gti
                .as_ref()
                .map(|g| format!("https://app.primevideo.com/detail?gti={}", g)),

            SchemeLink::SportsCenter { raw } => Some(convert_espn(raw, ctx)),

            SchemeLink::ParamountPlus { rest } => Some(format!("https://{}", rest)),
            SchemeLink::CbsTve { rest } => Some(format!("https://{}", rest)),
            SchemeLink::Dazn { rest } => Some(format!("https://open.dazn.com/{}", rest)),

            SchemeLink::Vix { tail } => {
                let locale = ctx.vix_locale.unwrap_or("es-es");
                Some(format!("https://vix.com/{}/{}", locale, tail))
            }

            SchemeLink::FsApp { channel, query } => match query {
                Some(q) => Some(format!("https://www.foxsports.com/live/{}?{}", channel, q)),
                None => Some(format!("https://www.foxsports.com/live/{}", channel)),
            },
            SchemeLink::FoxOne { channel } => {
                Some(format!("https://www.foxsports.com/live/{}", channel))
            }

            SchemeLink::WatchTnt { suffix } => {
                Some(format!("https://www.tntdrama.com/watchtnt{}", suffix))
            }
            SchemeLink::WatchTru { suffix } => {
                Some(format!("https://www.trutv.com/watchtrutv{}", suffix))
            }

            // Keep the native scheme, minus Apple tracking params
            SchemeLink::Gametime { base } => Some(base.clone()),

            SchemeLink::NbcSportsTve => Some("https://www.nbcsports.com/watch/schedule".to_string()),

            SchemeLink::CbsSportsApp { let_id } => {
                let let_id = let_id.as_ref()?;
                match ctx.league {
                    Some(league) if !league.trim().is_empty() => {
                        let path = cbs_league_path(league);
                        Some(format!("https://www.cbssports.com/watch/{}/{}", path, let_id))
                    }
                    _ => Some(format!("https://www.cbssports.com/watch/{}", let_id)),
                }
            }

            SchemeLink::NflCtv => Some("https://www.nfl.com/plus/".to_string()),

            SchemeLink::Other(raw) => generic_www_rewrite(raw),
        }
    }
}

/// Pull one query parameter out of a scheme URL without requiring the scheme
/// to be URL-crate-parseable.
fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    for pair in query.split('&') {
        let Some((k, v)) = pair.split_once('=') else {
            continue;
        };
        if k.eq_ignore_ascii_case(name) && !v.is_empty() {
            return Some(v.to_string());
        }
    }
    None
}

/// ESPN scheme to HTTP. Priority: graph id, playID in the URL, UUID embedded
/// in the Apple playable id, then the watch landing page.
fn convert_espn(raw: &str, ctx: &ConvertContext) -> String {
    if let Some(play_id) = ctx.espn_graph_id.and_then(espn_play_id_from_graph) {
        return format!("https://www.espn.com/watch/player/_/id/{}", play_id);
    }

    for key in ["playID", "playId", "playid"] {
        if let Some(play_id) = query_param(raw, key) {
            if is_uuid(&play_id) {
                return format!("https://www.espn.com/watch/player/_/id/{}", play_id);
            }
        }
    }

    if let Some(pid) = ctx.playable_id {
        if let Some(caps) = embedded_uuid_re().captures(pid) {
            return format!("https://www.espn.com/watch/player/_/id/{}", &caps[1]);
        }
    }

    "https://www.espn.com/watch/".to_string()
}

/// Extract the playID from an ESPN Watch Graph token
/// (`espn-watch:{playID}[:{hash}]`).
pub fn espn_play_id_from_graph(graph_id: &str) -> Option<String> {
    let mut parts = graph_id.split(':');
    let prefix = parts.next()?;
    if prefix != "espn-watch" {
        return None;
    }
    let play_id = parts.next()?;
    if is_uuid(play_id) {
        Some(play_id.to_string())
    } else {
        None
    }
}

/// Build the working `sportscenter://` deeplink from a graph token. Apple's
/// channel-based form (`playChannel=espn1`) does not start playback; the
/// playID form does. Falls back to the original URL when no token exists.
pub fn espn_scheme_deeplink(
    espn_graph_id: Option<&str>,
    fallback_url: Option<&str>,
) -> Option<String> {
    if let Some(play_id) = espn_graph_id.and_then(espn_play_id_from_graph) {
        return Some(format!(
            "sportscenter://x-callback-url/showWatchStream?playID={}",
            play_id
        ));
    }
    fallback_url.map(|s| s.to_string())
}

/// UUID embedded in an Apple playable id (`tvs.sbd.30061:<UUID>:<suffix>`).
pub fn uuid_from_playable_id(playable_id: &str) -> Option<String> {
    embedded_uuid_re()
        .captures(playable_id)
        .map(|c| c[1].to_lowercase())
}

/// CBS Sports needs a league-ish path segment for the most specific watch
/// URL. Known leagues come from a small table; the rest are slugified.
fn cbs_league_path(league: &str) -> String {
    match league {
        "Men's College Basketball" => "college-basketball".to_string(),
        "Women's College Basketball" => "womens-college-basketball".to_string(),
        "Conference League" => "uefa-conference-league".to_string(),
        "Women's Champions League" => "uefa-womens-champions-league".to_string(),
        "EFL Cup" => "carabao-cup".to_string(),
        "EFL Championship" | "England League One" | "England League Two" => "efl".to_string(),
        "Scottish Premiership" => "scottish-professional-football-league".to_string(),
        "Serie A" | "Italy Supercoppa Italiana" => "serie-a".to_string(),
        "Major Arena Soccer League" => "soccer".to_string(),
        other => slugify(other),
    }
}

fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_dash = true;
    for ch in s.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch == '\'' || ch == '\u{2019}' {
            continue;
        }
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Last-resort `scheme://www.domain/...` -> `https://www.domain/...`.
fn generic_www_rewrite(raw: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*://(www\.[^/]+/.+)$").expect("generic rewrite regex")
    });
    re.captures(raw).map(|c| format!("https://{}", &c[1]))
}

/// Convert an app-scheme deeplink to an HTTP URL where possible.
///
/// HTTPS input is returned unchanged; `None` means no conversion is
/// available and the caller may keep the scheme URL.
pub fn generate_http_deeplink(url: &str, ctx: &ConvertContext) -> Option<String> {
    if url.trim().is_empty() {
        return None;
    }
    SchemeLink::parse(url).to_http(ctx)
}

/// Apply the ESPN playChannel correction to a scheme deeplink, leaving
/// everything else untouched. Used after selection and again at emit time.
pub fn correct_scheme_deeplink(url: &str, ctx: &ConvertContext) -> String {
    let lower = url.to_lowercase();
    if !lower.starts_with("sportscenter://") {
        return url.to_string();
    }

    if let Some(play_id) = ctx.espn_graph_id.and_then(espn_play_id_from_graph) {
        return format!(
            "sportscenter://x-callback-url/showWatchStream?playID={}",
            play_id
        );
    }

    // Channel-based link with a UUID recoverable from the playable id
    if query_param(url, "playID").is_none() && query_param(url, "playChannel").is_some() {
        if let Some(uuid) = ctx.playable_id.and_then(|p| uuid_from_playable_id(p)) {
            return format!(
                "sportscenter://x-callback-url/showWatchStream?playID={}",
                uuid
            );
        }
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConvertContext<'static> {
        ConvertContext::default()
    }

    #[test]
    fn test_amazon_prime_conversion() {
        let url = "aiv://aiv/detail?gti=amzn1.dv.gti.10fd272d-309e-427a-87b6-6289003e2ccb&action=watch&type=live";
        assert_eq!(
            generate_http_deeplink(url, &ctx()).as_deref(),
            Some("https://app.primevideo.com/detail?gti=amzn1.dv.gti.10fd272d-309e-427a-87b6-6289003e2ccb")
        );
    }

    #[test]
    fn test_espn_play_id_in_url() {
        let url = "sportscenter://x-callback-url/showWatchStream?playID=3be751ec-31ee-466d-9d5a-59645ee401aa&x-source=AppleUMC";
        assert_eq!(
            generate_http_deeplink(url, &ctx()).as_deref(),
            Some("https://www.espn.com/watch/player/_/id/3be751ec-31ee-466d-9d5a-59645ee401aa")
        );
    }

    #[test]
    fn test_espn_play_channel_uses_playable_id() {
        let url = "sportscenter://x-callback-url/showWatchStream?playChannel=espn1&x-source=AppleUMC";
        let ctx = ConvertContext {
            playable_id: Some("tvs.sbd.30061:21a4067c-1db2-4cfa-8b6c-e8c339b32047:4050e1f9"),
            ..Default::default()
        };
        assert_eq!(
            generate_http_deeplink(url, &ctx).as_deref(),
            Some("https://www.espn.com/watch/player/_/id/21a4067c-1db2-4cfa-8b6c-e8c339b32047")
        );
    }

    #[test]
    fn test_espn_graph_id_wins() {
        let url = "sportscenter://x-callback-url/showWatchStream?playChannel=espn1&x-source=AppleUMC";
        let ctx = ConvertContext {
            espn_graph_id: Some(
                "espn-watch:9eb9b68b-11c6-4da0-9492-df997dbbf897:bb816546ee4e3a967b98e9d775c9c6f3",
            ),
            ..Default::default()
        };
        assert_eq!(
            generate_http_deeplink(url, &ctx).as_deref(),
            Some("https://www.espn.com/watch/player/_/id/9eb9b68b-11c6-4da0-9492-df997dbbf897")
        );
    }

    #[test]
    fn test_espn_fallback_landing_page() {
        let url = "sportscenter://x-callback-url/showWatchStream?playChannel=espn1";
        assert_eq!(
            generate_http_deeplink(url, &ctx()).as_deref(),
            Some("https://www.espn.com/watch/")
        );
    }

    #[test]
    fn test_paramount_plus() {
        let url = "pplus://www.paramountplus.com/live-tv/stream/serie-a/49f986ec-3ab2-44d7-ade6-6dfd2df5b492/";
        assert_eq!(
            generate_http_deeplink(url, &ctx()).as_deref(),
            Some("https://www.paramountplus.com/live-tv/stream/serie-a/49f986ec-3ab2-44d7-ade6-6dfd2df5b492/")
        );
    }

    #[test]
    fn test_cbs_tve() {
        let url = "cbstve://www.cbs.com/live-tv/stream/sports/046fb39f-9eda-4968-adde-c0162f566980/";
        assert_eq!(
            generate_http_deeplink(url, &ctx()).as_deref(),
            Some("https://www.cbs.com/live-tv/stream/sports/046fb39f-9eda-4968-adde-c0162f566980/")
        );
    }

    #[test]
    fn test_dazn() {
        let url = "open.dazn.com://media/open/74d3bc02-dc0b-4060-8d79-c9eb3b103461";
        assert_eq!(
            generate_http_deeplink(url, &ctx()).as_deref(),
            Some("https://open.dazn.com/media/open/74d3bc02-dc0b-4060-8d79-c9eb3b103461")
        );
    }

    #[test]
    fn test_vix_with_default_locale() {
        let url = "vixapp://live/transmission-matchid-LGUA25065?play";
        assert_eq!(
            generate_http_deeplink(url, &ctx()).as_deref(),
            Some("https://vix.com/es-es/live/transmission-matchid-LGUA25065?play")
        );
    }

    #[test]
    fn test_fox_variants() {
        let url = "fsapp://live/FS1?eventId=undefined&headerTitle=FOX+Sports+Live&sport=undefined";
        assert_eq!(
            generate_http_deeplink(url, &ctx()).as_deref(),
            Some("https://www.foxsports.com/live/fs1?eventId=undefined&headerTitle=FOX+Sports+Live&sport=undefined")
        );

        assert_eq!(
            generate_http_deeplink("foxone://channel/FS1", &ctx()).as_deref(),
            Some("https://www.foxsports.com/live/fs1")
        );
    }

    #[test]
    fn test_turner() {
        assert_eq!(
            generate_http_deeplink("watchtnt://play?stream=east&appId=27125", &ctx()).as_deref(),
            Some("https://www.tntdrama.com/watchtnt?stream=east&appId=27125")
        );
        assert_eq!(
            generate_http_deeplink("watchtru://play?stream=x", &ctx()).as_deref(),
            Some("https://www.trutv.com/watchtrutv?stream=x")
        );
    }

    #[test]
    fn test_gametime_strips_tracking_but_stays_scheme() {
        let url = "gametime://game/0022500409?x-source=umc.ums.apple.tvapp&x-apple-x=1";
        assert_eq!(
            generate_http_deeplink(url, &ctx()).as_deref(),
            Some("gametime://game/0022500409")
        );
    }

    #[test]
    fn test_nbcsports_schedule_fallback() {
        assert_eq!(
            generate_http_deeplink("nbcsportstve://watch/12013522", &ctx()).as_deref(),
            Some("https://www.nbcsports.com/watch/schedule")
        );
    }

    #[test]
    fn test_cbssports_with_league_table_and_slugify() {
        let url = "cbssportsapp://home/watch/LET-211531296?source=tvapp";
        let with_league = ConvertContext {
            league: Some("Serie A"),
            ..Default::default()
        };
        assert_eq!(
            generate_http_deeplink(url, &with_league).as_deref(),
            Some("https://www.cbssports.com/watch/serie-a/LET-211531296")
        );

        let unknown_league = ConvertContext {
            league: Some("Women's Super League"),
            ..Default::default()
        };
        assert_eq!(
            generate_http_deeplink(url, &unknown_league).as_deref(),
            Some("https://www.cbssports.com/watch/womens-super-league/LET-211531296")
        );

        assert_eq!(
            generate_http_deeplink(url, &ctx()).as_deref(),
            Some("https://www.cbssports.com/watch/LET-211531296")
        );
    }

    #[test]
    fn test_nfl_landing() {
        assert_eq!(
            generate_http_deeplink(
                "nflctv://livestream/f8d8eae6-311e-11f0-b670-ae1250fadad1",
                &ctx()
            )
            .as_deref(),
            Some("https://www.nfl.com/plus/")
        );
    }

    #[test]
    fn test_https_passthrough() {
        assert_eq!(
            generate_http_deeplink("https://www.peacocktv.com/watch/x", &ctx()).as_deref(),
            Some("https://www.peacocktv.com/watch/x")
        );
    }

    #[test]
    fn test_generic_www_rewrite() {
        assert_eq!(
            generate_http_deeplink("someapp://www.example.com/live/123", &ctx()).as_deref(),
            Some("https://www.example.com/live/123")
        );
        assert_eq!(generate_http_deeplink("someapp://opaque-token", &ctx()), None);
    }

    #[test]
    fn test_espn_scheme_deeplink_generation() {
        let graph = "espn-watch:9eb9b68b-11c6-4da0-9492-df997dbbf897:bb816546ee4e3a967b98e9d775c9c6f3";
        assert_eq!(
            espn_scheme_deeplink(Some(graph), None).as_deref(),
            Some("sportscenter://x-callback-url/showWatchStream?playID=9eb9b68b-11c6-4da0-9492-df997dbbf897")
        );

        let fallback = "sportscenter://x-callback-url/showWatchStream?playChannel=espn1";
        assert_eq!(
            espn_scheme_deeplink(None, Some(fallback)).as_deref(),
            Some(fallback)
        );
        assert_eq!(
            espn_scheme_deeplink(Some("espn-watch:not-a-uuid"), Some(fallback)).as_deref(),
            Some(fallback)
        );
    }

    #[test]
    fn test_correct_scheme_deeplink_rewrites_channel_links() {
        let url = "sportscenter://x-callback-url/showWatchStream?playChannel=espn1";
        let ctx = ConvertContext {
            espn_graph_id: Some("espn-watch:9eb9b68b-11c6-4da0-9492-df997dbbf897:bb816546"),
            ..Default::default()
        };
        assert_eq!(
            correct_scheme_deeplink(url, &ctx),
            "sportscenter://x-callback-url/showWatchStream?playID=9eb9b68b-11c6-4da0-9492-df997dbbf897"
        );

        // Non-ESPN links are untouched
        assert_eq!(
            correct_scheme_deeplink("pplus://www.paramountplus.com/x/", &ctx),
            "pplus://www.paramountplus.com/x/"
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Women's Super League"), "womens-super-league");
        assert_eq!(slugify("Serie A"), "serie-a");
        assert_eq!(slugify("  UEFA -- Champions  "), "uefa-champions");
    }
}
