//! Shared XMLTV rendering: channel/programme structs, the quick-xml writer,
//! live/new detection and the enhanced description builder. Every emitter
//! goes through these helpers so tagging stays consistent across direct,
//! lane and ADB outputs.

use std::io::Cursor;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::Writer;
use regex::Regex;

use crate::db::models::Event;
use crate::filters::{classify, genres_of};

/// Output structure for an XMLTV channel
#[derive(Debug, Clone)]
pub struct XmltvChannel {
    pub id: String,
    pub display_name: String,
    pub icon: Option<String>,
}

/// Output structure for an XMLTV programme
#[derive(Debug, Clone)]
pub struct XmltvProgramme {
    pub channel_id: String,
    pub title: String,
    pub desc: Option<String>,
    /// "YYYYMMDDHHMMSS +0000"
    pub start: String,
    pub stop: String,
    pub categories: Vec<String>,
    pub icon: Option<String>,
    pub live: bool,
    pub new: bool,
}

impl XmltvProgramme {
    /// Placeholder block: no categories, no live/new tags.
    pub fn placeholder(channel_id: &str, title: &str, desc: &str, start: &str, stop: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            title: title.to_string(),
            desc: Some(desc.to_string()),
            start: start.to_string(),
            stop: stop.to_string(),
            categories: Vec::new(),
            icon: None,
            live: false,
            new: false,
        }
    }
}

/// XMLTV time format: "YYYYMMDDHHMMSS +0000" (always UTC).
pub fn xmltv_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%d%H%M%S +0000").to_string()
}

/// Stable channel id shared between XMLTV and M3U so the DVR links them:
/// `fdl.{sanitized key}` where the key prefers event id, then pvid, then
/// title+start.
pub fn stable_channel_id(event: &Event) -> String {
    let key = if !event.id.trim().is_empty() {
        event.id.clone()
    } else if let Some(pvid) = event.pvid.as_deref().filter(|p| !p.trim().is_empty()) {
        pvid.to_string()
    } else {
        let start_compact: String = event
            .start_utc
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        format!("{}.{}", event.title.trim(), start_compact)
    };
    sanitize_id(&format!("fdl.{}", key))
}

/// Restrict channel ids to `[A-Za-z0-9._-]`, never starting with a digit.
pub fn sanitize_id(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("sanitize regex"));

    let mut out = re.replace_all(s.trim(), ".").to_string();
    if out.is_empty() {
        out = "ev".to_string();
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out = format!("x{}", out);
    }
    out
}

/// Live-broadcast detection.
///
/// Checks the airing type, then provider-specific markers in the raw
/// payload (`playbackType == "LIVE"` and recursive `isLive: true`). Sports
/// events default to live when nothing says otherwise.
pub fn is_live_broadcast(event: &Event) -> bool {
    if let Some(airing) = event.airing_type.as_deref() {
        if airing.to_lowercase().contains("live") {
            return true;
        }
    }

    if let Some(raw) = event.raw_attributes_json.as_deref() {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) {
            let playback_type = value
                .pointer("/data/playback/info/playbackType")
                .and_then(|v| v.as_str());
            if playback_type.is_some_and(|t| t.eq_ignore_ascii_case("LIVE")) {
                return true;
            }
            if has_is_live(&value) {
                return true;
            }
        }
    }

    true
}

fn has_is_live(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(map) => {
            if map.get("isLive").and_then(|v| v.as_bool()) == Some(true) {
                return true;
            }
            map.values().any(has_is_live)
        }
        serde_json::Value::Array(items) => items.iter().any(has_is_live),
        _ => false,
    }
}

/// New/first-run detection: everything is new unless flagged as a re-air.
pub fn is_new_broadcast(event: &Event) -> bool {
    event.is_reair == 0
}

/// Category taxonomy for a real sports programme: provider, "Sports",
/// "Sports Event", sport, league, then remaining genres without duplicates.
pub fn build_categories(event: &Event, provider_name: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(p) = provider_name.filter(|p| !p.trim().is_empty()) {
        out.push(p.to_string());
    }
    out.push("Sports".to_string());
    out.push("Sports Event".to_string());

    let classification = classify(event.classification_json.as_deref());
    if let Some(sport) = classification.sport.as_deref().filter(|s| *s != "Sports") {
        out.push(sport.to_string());
    }
    if let Some(league) = classification.league.as_deref() {
        out.push(league.to_string());
    }

    for genre in genres_of(event) {
        if out.iter().any(|existing| existing == &genre) {
            continue;
        }
        out.push(genre);
    }

    out
}

fn artifact_res() -> &'static [Regex; 4] {
    static RES: OnceLock<[Regex; 4]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            // "(Sport) - Sport - (Detail) - "
            Regex::new(r"^\([^)]+\)\s*-\s*[^-]+\s*-\s*\([^)]+\)\s*-\s*").expect("artifact re 1"),
            // "(Hockey) - "
            Regex::new(r"^\([^)]+\)\s*-\s*").expect("artifact re 2"),
            // "Sport - (Detail) - "
            Regex::new(r"^[^-]+-\s*\([^)]+\)\s*-\s*").expect("artifact re 3"),
            // trailing "- Available on X"
            Regex::new(r"\s*-\s*Available on [^-]+$").expect("artifact re 4"),
        ]
    })
}

fn strip_artifacts(text: &str) -> String {
    let res = artifact_res();
    let mut out = text.to_string();
    out = res[0].replace(&out, "").to_string();
    out = res[1].replace(&out, "").to_string();
    out = res[2].replace(&out, "").to_string();
    out = res[3].replace(&out, "").to_string();
    out.trim().to_string()
}

fn feed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\s*-\s*(Home Feed|Away Feed|National Feed|Local Feed|Main Feed|Alternate Feed)$",
        )
        .expect("feed regex")
    })
}

/// Build the structured description used across emitters:
/// `{Sport} - ({Detail or League}) - {base} - Available on {Provider}[ ({Feed})]`.
///
/// Prior-run artifacts and feed suffixes are stripped first so re-exports do
/// not stack prefixes.
pub fn build_enhanced_description(event: &Event, provider_name: Option<&str>) -> String {
    let mut title = event.title.clone();
    let mut synopsis = event
        .synopsis
        .as_deref()
        .map(strip_artifacts)
        .unwrap_or_default();
    let synopsis_brief = event
        .synopsis_brief
        .as_deref()
        .map(strip_artifacts)
        .unwrap_or_default();
    let venue = event.venue.as_deref().unwrap_or("").trim().to_string();

    // Extract the feed qualifier from title or synopsis
    let mut feed_type: Option<String> = None;
    if let Some(caps) = feed_re().captures(&title) {
        feed_type = Some(caps[1].to_string());
        title = feed_re().replace(&title, "").to_string();
    }
    if feed_type.is_none() {
        if let Some(caps) = feed_re().captures(&synopsis) {
            feed_type = Some(caps[1].to_string());
            synopsis = feed_re().replace(&synopsis, "").to_string();
        }
    }

    let title = title.trim().trim_end_matches('-').trim().to_string();
    let synopsis = synopsis.trim().trim_end_matches('-').trim().to_string();
    let synopsis_brief = synopsis_brief
        .trim()
        .trim_end_matches('-')
        .trim()
        .to_string();

    let classification = classify(event.classification_json.as_deref());
    let sport = classification.sport.as_deref().filter(|s| *s != "Sports");
    let league = classification.league.as_deref();

    // Most specific genre that is not the sport, league or provider name
    let sport_detail: Option<String> = genres_of(event)
        .into_iter()
        .filter(|g| {
            !g.is_empty()
                && g != "Sports"
                && g != "Sports Event"
                && Some(g.as_str()) != sport
                && Some(g.as_str()) != league
                && Some(g.as_str()) != provider_name
        })
        .max_by_key(|g| g.len());

    let mut base_desc = if synopsis.len() > 30 {
        synopsis.clone()
    } else if !synopsis_brief.is_empty() {
        synopsis_brief.clone()
    } else {
        title.clone()
    };

    if !venue.is_empty() {
        if base_desc.trim() == venue {
            base_desc = format!("{} at {}", title, venue);
        } else if base_desc.len() < 40 && !base_desc.contains(&venue) {
            base_desc = format!("{} at {}", base_desc, venue);
        }
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(sport) = sport {
        parts.push(sport.to_string());
    }

    let detail = match (&sport_detail, sport) {
        (Some(detail), Some(sport)) if detail != sport => Some(detail.clone()),
        (Some(detail), None) => Some(detail.clone()),
        _ => league.map(String::from),
    };
    if let Some(detail) = detail {
        parts.push(format!("({})", detail));
    }

    parts.push(base_desc);

    if let Some(provider) = provider_name.filter(|p| !p.trim().is_empty()) {
        match &feed_type {
            Some(feed) => parts.push(format!("Available on {} ({})", provider, feed)),
            None => parts.push(format!("Available on {}", provider)),
        }
    }

    parts.join(" - ")
}

/// Render a complete XMLTV document.
pub fn render_xmltv(
    channels: &[XmltvChannel],
    programmes: &[XmltvProgramme],
    generator_name: &str,
) -> Result<String, quick_xml::Error> {
    let estimated = 500 + channels.len() * 300 + programmes.len() * 400;
    let buffer = Vec::with_capacity(estimated);
    let mut writer = Writer::new(Cursor::new(buffer));

    writer.write_event(XmlEvent::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(XmlEvent::Text(BytesText::new("\n")))?;
    writer.write_event(XmlEvent::DocType(BytesText::from_escaped(
        "tv SYSTEM \"xmltv.dtd\"",
    )))?;
    writer.write_event(XmlEvent::Text(BytesText::new("\n")))?;

    let mut tv = BytesStart::new("tv");
    tv.push_attribute(("generator-info-name", generator_name));
    writer.write_event(XmlEvent::Start(tv))?;
    writer.write_event(XmlEvent::Text(BytesText::new("\n")))?;

    for channel in channels {
        write_channel(&mut writer, channel)?;
    }
    for programme in programmes {
        write_programme(&mut writer, programme)?;
    }

    writer.write_event(XmlEvent::End(BytesEnd::new("tv")))?;
    writer.write_event(XmlEvent::Text(BytesText::new("\n")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| quick_xml::Error::Io(std::sync::Arc::new(
        std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    )))
}

fn write_channel<W: std::io::Write>(
    writer: &mut Writer<W>,
    channel: &XmltvChannel,
) -> Result<(), quick_xml::Error> {
    let mut ch = BytesStart::new("channel");
    ch.push_attribute(("id", channel.id.as_str()));
    writer.write_event(XmlEvent::Start(ch))?;

    writer.write_event(XmlEvent::Start(BytesStart::new("display-name")))?;
    writer.write_event(XmlEvent::Text(BytesText::new(&channel.display_name)))?;
    writer.write_event(XmlEvent::End(BytesEnd::new("display-name")))?;

    if let Some(ref icon) = channel.icon {
        let mut icon_elem = BytesStart::new("icon");
        icon_elem.push_attribute(("src", icon.as_str()));
        writer.write_event(XmlEvent::Empty(icon_elem))?;
    }

    writer.write_event(XmlEvent::End(BytesEnd::new("channel")))?;
    writer.write_event(XmlEvent::Text(BytesText::new("\n")))?;
    Ok(())
}

fn write_programme<W: std::io::Write>(
    writer: &mut Writer<W>,
    programme: &XmltvProgramme,
) -> Result<(), quick_xml::Error> {
    let mut prog = BytesStart::new("programme");
    prog.push_attribute(("start", programme.start.as_str()));
    prog.push_attribute(("stop", programme.stop.as_str()));
    prog.push_attribute(("channel", programme.channel_id.as_str()));
    writer.write_event(XmlEvent::Start(prog))?;

    let mut title = BytesStart::new("title");
    title.push_attribute(("lang", "en"));
    writer.write_event(XmlEvent::Start(title))?;
    writer.write_event(XmlEvent::Text(BytesText::new(&programme.title)))?;
    writer.write_event(XmlEvent::End(BytesEnd::new("title")))?;

    if let Some(ref desc) = programme.desc {
        let mut desc_elem = BytesStart::new("desc");
        desc_elem.push_attribute(("lang", "en"));
        writer.write_event(XmlEvent::Start(desc_elem))?;
        writer.write_event(XmlEvent::Text(BytesText::new(desc)))?;
        writer.write_event(XmlEvent::End(BytesEnd::new("desc")))?;
    }

    for category in &programme.categories {
        let mut cat = BytesStart::new("category");
        cat.push_attribute(("lang", "en"));
        writer.write_event(XmlEvent::Start(cat))?;
        writer.write_event(XmlEvent::Text(BytesText::new(category)))?;
        writer.write_event(XmlEvent::End(BytesEnd::new("category")))?;
    }

    if let Some(ref icon) = programme.icon {
        let mut icon_elem = BytesStart::new("icon");
        icon_elem.push_attribute(("src", icon.as_str()));
        writer.write_event(XmlEvent::Empty(icon_elem))?;
    }

    if programme.live {
        writer.write_event(XmlEvent::Empty(BytesStart::new("live")))?;
    }
    if programme.new {
        writer.write_event(XmlEvent::Empty(BytesStart::new("new")))?;
    }

    writer.write_event(XmlEvent::End(BytesEnd::new("programme")))?;
    writer.write_event(XmlEvent::Text(BytesText::new("\n")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::make_event;
    use chrono::TimeZone;

    #[test]
    fn test_xmltv_time_format() {
        let dt = Utc.with_ymd_and_hms(2026, 1, 20, 20, 0, 0).unwrap();
        assert_eq!(xmltv_time(dt), "20260120200000 +0000");
    }

    #[test]
    fn test_stable_channel_id_prefers_event_id() {
        let event = make_event("appletv-abc", Some("pv1"), 1, 2);
        assert_eq!(stable_channel_id(&event), "fdl.appletv-abc");
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("fdl.ap 1/b"), "fdl.ap.1.b");
        assert_eq!(sanitize_id("9abc"), "x9abc");
        assert_eq!(sanitize_id(""), "ev");
    }

    #[test]
    fn test_live_detection_heuristics() {
        let mut event = make_event("e1", Some("pv"), 1, 2);
        event.airing_type = Some("Live".into());
        assert!(is_live_broadcast(&event));

        event.airing_type = None;
        event.raw_attributes_json =
            Some(r#"{"data":{"playback":{"info":{"playbackType":"LIVE"}}}}"#.into());
        assert!(is_live_broadcast(&event));

        event.raw_attributes_json = Some(r#"{"nested":[{"isLive":true}]}"#.into());
        assert!(is_live_broadcast(&event));

        // Default for sports is live
        event.raw_attributes_json = None;
        assert!(is_live_broadcast(&event));
    }

    #[test]
    fn test_new_detection() {
        let mut event = make_event("e1", Some("pv"), 1, 2);
        assert!(is_new_broadcast(&event));
        event.is_reair = 1;
        assert!(!is_new_broadcast(&event));
    }

    #[test]
    fn test_categories_taxonomy() {
        let event = make_event("e1", Some("pv"), 1, 2);
        let cats = build_categories(&event, Some("ESPN+"));
        assert_eq!(
            cats,
            vec!["ESPN+", "Sports", "Sports Event", "Basketball", "NBA"]
        );
    }

    #[test]
    fn test_enhanced_description_structure() {
        let mut event = make_event("e1", Some("pv"), 1, 2);
        event.title = "North Carolina vs Georgia Tech".into();
        event.genres_json = Some(r#"["Basketball","Men's College Basketball"]"#.into());
        event.classification_json =
            Some(r#"[{"type":"sport","value":"Basketball"}]"#.into());

        let desc = build_enhanced_description(&event, Some("ESPN+"));
        assert_eq!(
            desc,
            "Basketball - (Men's College Basketball) - North Carolina vs Georgia Tech - Available on ESPN+"
        );
    }

    #[test]
    fn test_enhanced_description_strips_prior_run_artifacts() {
        let mut event = make_event("e1", Some("pv"), 1, 2);
        event.title = "Edmonton at Swift Current".into();
        event.synopsis = Some(
            "Hockey - (WHL) - Edmonton at Swift Current at InnovationPlex - Available on Victory+"
                .into(),
        );
        event.classification_json =
            Some(r#"[{"type":"sport","value":"Hockey"},{"type":"league","value":"WHL"}]"#.into());
        event.genres_json = Some(r#"["Hockey"]"#.into());

        let desc = build_enhanced_description(&event, Some("Victory+"));
        // The old prefix and provider suffix must not stack
        assert_eq!(desc.matches("Available on").count(), 1);
        assert!(desc.starts_with("Hockey - (WHL) - "));
    }

    #[test]
    fn test_enhanced_description_feed_extraction() {
        let mut event = make_event("e1", Some("pv"), 1, 2);
        event.title = "Edmonton at Calgary - Home Feed".into();
        event.classification_json =
            Some(r#"[{"type":"sport","value":"Hockey"},{"type":"league","value":"NHL"}]"#.into());
        event.genres_json = Some(r#"["Hockey"]"#.into());

        let desc = build_enhanced_description(&event, Some("Victory+"));
        assert!(desc.ends_with("Available on Victory+ (Home Feed)"));
        assert!(!desc.contains("- Home Feed -"));
    }

    #[test]
    fn test_render_document_shape() {
        let channels = vec![XmltvChannel {
            id: "fdl.e1".into(),
            display_name: "Test & Channel".into(),
            icon: Some("http://img/x.png".into()),
        }];
        let programmes = vec![XmltvProgramme {
            channel_id: "fdl.e1".into(),
            title: "Game <1>".into(),
            desc: Some("A & B".into()),
            start: "20260120200000 +0000".into(),
            stop: "20260120220000 +0000".into(),
            categories: vec!["ESPN+".into(), "Sports".into()],
            icon: Some("http://img/hero.jpg".into()),
            live: true,
            new: true,
        }];

        let xml = render_xmltv(&channels, &programmes, "GuideForge").expect("render");
        assert!(xml.contains("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<!DOCTYPE tv SYSTEM \"xmltv.dtd\">"));
        assert!(xml.contains("generator-info-name=\"GuideForge\""));
        assert!(xml.contains("<channel id=\"fdl.e1\">"));
        assert!(xml.contains("<display-name>Test &amp; Channel</display-name>"));
        assert!(xml.contains("<title lang=\"en\">Game &lt;1&gt;</title>"));
        assert!(xml.contains("<live/>"));
        assert!(xml.contains("<new/>"));
        assert!(xml.contains("<icon src=\"http://img/hero.jpg\"/>"));
        assert!(xml.contains("</tv>"));
    }

    #[test]
    fn test_placeholder_has_no_tags_or_categories() {
        let programmes = vec![XmltvProgramme::placeholder(
            "fdl.e1",
            "Event Ended",
            "Ended earlier.",
            "20260120200000 +0000",
            "20260120210000 +0000",
        )];
        let xml = render_xmltv(&[], &programmes, "GuideForge").expect("render");
        assert!(!xml.contains("<live/>"));
        assert!(!xml.contains("<new/>"));
        assert!(!xml.contains("<category"));
    }
}
