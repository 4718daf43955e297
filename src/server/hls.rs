//! HLS stub used to bait the DVR into tuning a lane.
//!
//! The playlist rolls forever (no ENDLIST, media sequence derived from unix
//! time) and every hit arms the detector. Segments serve a pre-rendered
//! black MPEG-TS clip built once at startup with ffmpeg; when ffmpeg is not
//! available the segment route 404s and the detector still works.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use chrono::Utc;

use super::state::AppState;

/// Nominal segment length in seconds; matches the generated clip.
const SEGMENT_SECONDS: i64 = 60;

/// Build the rolling playlist for a lane at the given unix time.
pub fn build_playlist(lane: i32, now_unix: i64) -> String {
    let sequence = now_unix / SEGMENT_SECONDS;
    let mut out = String::with_capacity(256);
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", SEGMENT_SECONDS));
    out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", sequence));
    for i in 0..3 {
        out.push_str(&format!("#EXTINF:{}.0,\n", SEGMENT_SECONDS));
        out.push_str(&format!("segment.ts?seq={}\n", sequence + i));
    }
    // No EXT-X-ENDLIST: the stream must look live
    out
}

/// `GET /lane/{lane}/stream.m3u8`
pub async fn stream_m3u8(
    Path(lane): Path<i32>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    crate::detector::Detector::maybe_spawn(state.detector(), lane);

    let playlist = build_playlist(lane, Utc::now().timestamp());
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/vnd.apple.mpegurl"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    (StatusCode::OK, headers, playlist)
}

/// `GET /lane/{lane}/segment.ts`
///
/// 503 when the detector is disabled outright (no DVR import mount), 404
/// when ffmpeg was unavailable at startup.
pub async fn segment_ts(
    Path(_lane): Path<i32>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if !state.config().detector_enabled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "detector disabled").into_response();
    }
    match state.segment_bytes().await {
        Some(bytes) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("video/mp2t"),
            );
            (StatusCode::OK, headers, bytes).into_response()
        }
        None => (StatusCode::NOT_FOUND, "segment unavailable").into_response(),
    }
}

/// Render the dummy segment with ffmpeg: 60 seconds of black 1280x720 video
/// with silent audio, muxed as MPEG-TS. Returns `None` when ffmpeg is
/// missing or fails.
pub async fn render_dummy_segment(out_dir: &std::path::Path) -> Option<Bytes> {
    let path = out_dir.join("dummy_segment.ts");
    if let Err(e) = tokio::fs::create_dir_all(out_dir).await {
        tracing::warn!("segment: cannot create out dir: {}", e);
        return None;
    }

    let status = tokio::process::Command::new("ffmpeg")
        .args([
            "-y",
            "-f",
            "lavfi",
            "-i",
            "color=c=black:s=1280x720:r=25",
            "-f",
            "lavfi",
            "-i",
            "anullsrc=channel_layout=stereo:sample_rate=44100",
            "-t",
            "60",
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-c:a",
            "aac",
            "-f",
            "mpegts",
        ])
        .arg(&path)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await;

    match status {
        Ok(code) if code.success() => match tokio::fs::read(&path).await {
            Ok(bytes) => {
                tracing::info!(bytes = bytes.len(), "dummy segment rendered");
                Some(Bytes::from(bytes))
            }
            Err(e) => {
                tracing::warn!("segment: read back failed: {}", e);
                None
            }
        },
        Ok(code) => {
            tracing::warn!("segment: ffmpeg exited with {}", code);
            None
        }
        Err(e) => {
            tracing::warn!("segment: ffmpeg unavailable: {} (segment route will 404)", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playlist_is_live() {
        let playlist = build_playlist(7, 1_700_000_060);
        assert!(playlist.starts_with("#EXTM3U\n"));
        assert!(!playlist.contains("EXT-X-ENDLIST"));
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:28333334"));
        assert_eq!(playlist.matches("segment.ts?seq=").count(), 3);
    }

    #[test]
    fn test_media_sequence_monotonic() {
        let a = build_playlist(1, 1_700_000_000);
        let b = build_playlist(1, 1_700_000_120);
        let seq = |s: &str| {
            s.lines()
                .find(|l| l.starts_with("#EXT-X-MEDIA-SEQUENCE:"))
                .and_then(|l| l.rsplit(':').next().and_then(|n| n.parse::<i64>().ok()))
                .unwrap()
        };
        assert!(seq(&b) > seq(&a));
    }
}
