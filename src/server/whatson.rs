//! Resolver HTTP surface: what's on a lane, lane deeplink convenience
//! wrappers, the launch redirect and the ADB variant.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::resolver::{resolve_adb_whatson, resolve_whatson, DeeplinkFormat, WhatsOn};
use crate::timeutil::parse_iso_utc;

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WhatsOnParams {
    #[serde(default)]
    pub at: Option<String>,
    #[serde(default)]
    pub include: Option<String>,
    #[serde(default)]
    pub deeplink_format: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub allow_fallback: Option<String>,
}

fn db_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("resolver query failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

fn resolve_for_params(
    state: &AppState,
    lane: i32,
    params: &WhatsOnParams,
) -> Result<WhatsOn, (StatusCode, String)> {
    let at = params
        .at
        .as_deref()
        .and_then(parse_iso_utc)
        .unwrap_or_else(Utc::now);
    let format = DeeplinkFormat::parse(params.deeplink_format.as_deref());

    let mut conn = state.get_connection().map_err(db_error)?;
    resolve_whatson(
        &mut conn,
        lane,
        at,
        state.config().padding_minutes,
        format,
    )
    .map_err(db_error)
}

fn txt_response(body: String) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    (StatusCode::OK, headers, body).into_response()
}

fn single_param(whatson: &WhatsOn, param: &str) -> String {
    match param {
        "event_uid" => whatson.event_uid.clone().unwrap_or_default(),
        "deeplink_url_full" => whatson.deeplink_url_full.clone().unwrap_or_default(),
        _ => whatson.deeplink_url.clone().unwrap_or_default(),
    }
}

/// `GET /whatson/{lane}`
pub async fn whatson(
    Path(lane): Path<i32>,
    State(state): State<AppState>,
    Query(params): Query<WhatsOnParams>,
) -> Result<Response, (StatusCode, String)> {
    let mut out = resolve_for_params(&state, lane, &params)?;

    if params.format.as_deref() == Some("txt") {
        let param = params.param.as_deref().unwrap_or("deeplink_url");
        return Ok(txt_response(single_param(&out, param)));
    }

    // Deeplink fields are opt-in on the JSON form
    if params.include.as_deref() != Some("deeplink") {
        out.deeplink_url = None;
        out.deeplink_url_full = None;
    }
    Ok(Json(out).into_response())
}

/// `GET /api/lane/{lane}/deeplink`
pub async fn lane_deeplink(
    Path(lane): Path<i32>,
    State(state): State<AppState>,
    Query(params): Query<WhatsOnParams>,
) -> Result<Response, (StatusCode, String)> {
    let out = resolve_for_params(&state, lane, &params)?;
    Ok(render_deeplink(&out, params.format.as_deref()))
}

fn render_deeplink(whatson: &WhatsOn, format: Option<&str>) -> Response {
    match format {
        Some("html") => {
            let body = match whatson.deeplink_url.as_deref() {
                Some(url) => format!("<a href=\"{}\">{}</a>", url, url),
                None => "<p>no event</p>".to_string(),
            };
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            (StatusCode::OK, headers, body).into_response()
        }
        Some("json") => Json(whatson.clone()).into_response(),
        _ => txt_response(whatson.deeplink_url.clone().unwrap_or_default()),
    }
}

/// `GET /api/lane/{lane}/launch` - 302 to the resolved HTTP deeplink; 404
/// with an empty body when nothing applies. Never cached.
pub async fn lane_launch(
    Path(lane): Path<i32>,
    State(state): State<AppState>,
    Query(params): Query<WhatsOnParams>,
) -> Result<Response, (StatusCode, String)> {
    let out = resolve_for_params(&state, lane, &params)?;

    let allow_fallback = params.allow_fallback.as_deref() != Some("0");

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    let target = out
        .deeplink_url
        .as_deref()
        .filter(|_| allow_fallback || !out.is_fallback);

    match target {
        Some(url) => {
            headers.insert(
                header::LOCATION,
                HeaderValue::from_str(url).map_err(|e| db_error(e))?,
            );
            Ok((StatusCode::FOUND, headers, String::new()).into_response())
        }
        None => Ok((StatusCode::NOT_FOUND, headers, String::new()).into_response()),
    }
}

/// `GET /api/adb/lanes/{provider_code}/{lane_number}/deeplink`
pub async fn adb_lane_deeplink(
    Path((provider_code, lane_number)): Path<(String, i32)>,
    State(state): State<AppState>,
    Query(params): Query<WhatsOnParams>,
) -> Result<Response, (StatusCode, String)> {
    let at = params
        .at
        .as_deref()
        .and_then(parse_iso_utc)
        .unwrap_or_else(Utc::now);
    let format = DeeplinkFormat::parse(params.deeplink_format.as_deref());

    let mut conn = state.get_connection().map_err(db_error)?;
    let out = resolve_adb_whatson(&mut conn, &provider_code, lane_number, at, format)
        .map_err(db_error)?;

    Ok(render_deeplink(&out, params.format.as_deref()))
}
