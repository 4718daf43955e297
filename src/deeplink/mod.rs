//! Deeplink selection engine.
//!
//! Given the playables of one event and the user's preferences, pick the
//! playable to surface: filter by enabled services and language, score by
//! service priority (user overrides first, then the default table inverted
//! so higher is better), deprioritize Amazon when an alternative exists,
//! then apply provider corrections to the winning URL.

pub mod convert;

use std::collections::HashSet;

use crate::db::catalog;
use crate::db::models::{Event, Playable};
use crate::db::{DbError, DbPooledConnection};
use crate::filters::{classify, Preferences};
use crate::mapper;

use convert::{correct_scheme_deeplink, generate_http_deeplink, ConvertContext};

/// Score subtracted from `aiv*` candidates when the Amazon penalty is on and
/// a non-Amazon candidate exists.
pub const AMAZON_PENALTY: i32 = 40;

/// A playable with its resolved logical service.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub playable: Playable,
    pub logical_service: String,
}

/// Outcome of a selection run, with the human-readable reason used by the
/// selection-examples debug endpoint.
#[derive(Debug, Clone)]
pub struct Selection {
    pub candidate: Candidate,
    pub score: i32,
    pub reason: String,
    /// The language filter removed every candidate and was bypassed
    pub locale_fallback: bool,
}

/// The frozen choice for an event: ids plus both deeplink forms.
#[derive(Debug, Clone)]
pub struct ChosenDeeplink {
    pub playable_id: String,
    pub provider: String,
    pub logical_service: String,
    pub scheme_url: Option<String>,
    pub http_url: Option<String>,
}

/// Resolve the candidates for an event. Logical services are never trusted
/// from upstream: empty ones are recomputed through the mapper, and Amazon
/// playables are remapped through the GTI channel table when possible.
pub fn resolve_candidates(
    conn: &mut DbPooledConnection,
    event_id: &str,
) -> Result<Vec<Candidate>, DbError> {
    let rows = catalog::playables_for_event(conn, event_id)?;
    let mut out = Vec::with_capacity(rows.len());

    for playable in rows {
        let stored = playable
            .logical_service
            .as_deref()
            .filter(|s| !s.trim().is_empty());

        let mut logical = match stored {
            Some(s) => s.to_string(),
            None => mapper::logical_service_for_playable(
                &playable.provider,
                playable.deeplink_play.as_deref(),
                playable.deeplink_open.as_deref(),
                playable.playable_url.as_deref(),
                Some(event_id),
                Some(&mut *conn),
            ),
        };

        if logical == "aiv" {
            if let Some(url) = playable.best_url() {
                let url = url.to_string();
                if let Some(remapped) = mapper::remap_amazon_service(conn, &url) {
                    logical = remapped;
                }
            }
        }

        out.push(Candidate {
            playable,
            logical_service: logical,
        });
    }

    Ok(out)
}

fn locale_allowed(locale: Option<&str>, language_preference: &str) -> bool {
    match language_preference {
        "en" => !matches!(locale, Some("es_MX")),
        "es" => !matches!(locale, Some("en_US")),
        _ => true,
    }
}

fn score_for(candidate: &Candidate, prefs: &Preferences, penalize_amazon: bool) -> i32 {
    let base = prefs
        .service_priorities
        .get(&candidate.logical_service)
        .copied()
        .unwrap_or_else(|| mapper::inverted_service_score(&candidate.logical_service));

    if penalize_amazon && candidate.logical_service.starts_with("aiv") {
        base - AMAZON_PENALTY
    } else {
        base
    }
}

/// Pick the best candidate under the current preferences.
///
/// Returns `None` when an explicit enabled-services allowlist leaves nothing;
/// the caller then drops the event entirely.
pub fn select_best(candidates: &[Candidate], prefs: &Preferences) -> Option<Selection> {
    if candidates.is_empty() {
        return None;
    }

    let enabled: HashSet<&str> = prefs.enabled_services.iter().map(|s| s.as_str()).collect();

    let service_filtered: Vec<&Candidate> = if enabled.is_empty() {
        candidates.iter().collect()
    } else {
        candidates
            .iter()
            .filter(|c| enabled.contains(c.logical_service.as_str()))
            .collect()
    };
    if service_filtered.is_empty() {
        return None;
    }

    let locale_filtered: Vec<&Candidate> = service_filtered
        .iter()
        .copied()
        .filter(|c| locale_allowed(c.playable.locale.as_deref(), &prefs.language_preference))
        .collect();

    // An event with only wrong-locale playables is still watchable; bypass
    // the filter rather than dropping it.
    let (pool, locale_fallback) = if locale_filtered.is_empty() {
        (service_filtered, true)
    } else {
        (locale_filtered, false)
    };

    let has_non_amazon = pool.iter().any(|c| !c.logical_service.starts_with("aiv"));
    let penalize = prefs.amazon_penalty && has_non_amazon;
    let amazon_present = pool.iter().any(|c| c.logical_service.starts_with("aiv"));

    let mut best: Option<(&Candidate, i32)> = None;
    for &candidate in &pool {
        let score = score_for(candidate, prefs, penalize);
        let better = match best {
            None => true,
            Some((current, current_score)) => {
                score > current_score
                    || (score == current_score
                        && candidate.playable.priority < current.playable.priority)
            }
        };
        if better {
            best = Some((candidate, score));
        }
    }

    let (winner, score) = best?;

    let mut reason = if pool.len() == 1 {
        if enabled.is_empty() {
            "only available service".to_string()
        } else {
            "only enabled service".to_string()
        }
    } else if enabled.is_empty() {
        "highest priority".to_string()
    } else {
        "highest priority among enabled".to_string()
    };
    if penalize && amazon_present && !winner.logical_service.starts_with("aiv") {
        reason.push_str(" (Amazon deprioritized)");
    }

    Some(Selection {
        candidate: winner.clone(),
        score,
        reason,
        locale_fallback,
    })
}

fn is_espn_provider(provider: &str) -> bool {
    matches!(
        provider.to_lowercase().as_str(),
        "sportscenter" | "espn" | "espn+" | "sportsonespn"
    )
}

/// Full selection for one event: resolve candidates, pick the winner, apply
/// the ESPN correction and the Spanish-only rewrite, and produce both the
/// scheme and HTTP forms.
pub fn best_deeplink_for_event(
    conn: &mut DbPooledConnection,
    event: &Event,
    prefs: &Preferences,
) -> Result<Option<ChosenDeeplink>, DbError> {
    let candidates = resolve_candidates(conn, &event.id)?;
    let Some(selection) = select_best(&candidates, prefs) else {
        return Ok(None);
    };

    let classification = classify(event.classification_json.as_deref());
    let playable = &selection.candidate.playable;

    let ctx = ConvertContext {
        playable_id: Some(playable.playable_id.as_str()),
        espn_graph_id: playable.espn_graph_id.as_deref(),
        league: classification.league.as_deref(),
        vix_locale: None,
    };

    let mut scheme_url = playable
        .best_url()
        .map(|url| correct_scheme_deeplink(url, &ctx));

    // Spanish-only ESPN events: the locale-specific playID resolves to the
    // Spanish feed. Rewriting to the graph playID (or the event's external
    // id) lets the ESPN app pick the main English stream.
    if selection.locale_fallback
        && prefs.language_preference == "en"
        && is_espn_provider(&playable.provider)
        && playable.locale.as_deref() == Some("es_MX")
    {
        let replacement = playable
            .espn_graph_id
            .as_deref()
            .and_then(convert::espn_play_id_from_graph)
            .or_else(|| event.pvid.clone());
        if let Some(play_id) = replacement {
            scheme_url = Some(format!(
                "sportscenter://x-callback-url/showWatchStream?playID={}",
                play_id
            ));
        }
    }

    let http_url = match playable
        .http_deeplink_url
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        Some(stored) => Some(stored.to_string()),
        None => scheme_url
            .as_deref()
            .and_then(|url| generate_http_deeplink(url, &ctx)),
    };

    Ok(Some(ChosenDeeplink {
        playable_id: playable.playable_id.clone(),
        provider: playable.provider.clone(),
        logical_service: selection.candidate.logical_service.clone(),
        scheme_url,
        http_url,
    }))
}
