//! Playback detector.
//!
//! Tuning a lane makes the DVR poll our HLS stub; each hit spawns one
//! detector task (debounced per lane) that figures out which client tuned,
//! resolves the lane's current deeplink, and pushes playback to the device
//! through the DVR's sidecar-reprocess flow. Every step is best-effort:
//! failures are logged and swallowed while the DVR keeps playing the dummy
//! stream.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::DbPool;
use crate::dvr::{DvrClient, DvrClientInfo};
use crate::resolver::{resolve_whatson, DeeplinkFormat};

/// Clients seen more recently than this are preferred candidates.
const SEEN_AT_WINDOW_SECS: f64 = 90.0;

/// Grace for the DVR's playback request to reach the end client.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

pub struct Detector {
    pool: DbPool,
    config: Arc<Config>,
    dvr: DvrClient,
    last_spawn: DashMap<i32, Instant>,
    tasks: DashMap<i32, JoinHandle<()>>,
}

/// True when `channel_name` refers to the given lane: its trailing digits
/// equal the lane number ("Sports Lane 7" -> 7).
pub fn channel_matches_lane(channel_name: &str, lane: i32) -> bool {
    let digits: String = channel_name
        .trim_end()
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse::<i32>().map(|n| n == lane).unwrap_or(false)
}

impl Detector {
    pub fn new(pool: DbPool, config: Arc<Config>) -> Self {
        let dvr = DvrClient::new(&config);
        Self {
            pool,
            config,
            dvr,
            last_spawn: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.detector_enabled()
    }

    /// Sidecar file for one lane inside the DVR import mount.
    pub fn sidecar_path(&self, lane: i32) -> PathBuf {
        PathBuf::from(&self.config.dvr_import_path)
            .join("Imports")
            .join("Videos")
            .join("GuideForge")
            .join(format!("lane{}.strmlnk", lane))
    }

    /// Write the lane's sidecar file. Each file is owned by exactly one
    /// lane, so plain overwrites are safe.
    pub fn write_sidecar(&self, lane: i32, deeplink: &str) -> io::Result<PathBuf> {
        let path = self.sidecar_path(lane);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, deeplink)?;
        Ok(path)
    }

    /// Spawn a detection run for a lane unless one was spawned within the
    /// debounce window. Returns whether a task was started.
    pub fn maybe_spawn(detector: &Arc<Detector>, lane: i32) -> bool {
        if !detector.enabled() {
            return false;
        }

        let debounce = Duration::from_secs_f64(detector.config.detect_debounce_secs);
        let now = Instant::now();
        let suppressed = detector
            .last_spawn
            .get(&lane)
            .is_some_and(|prev| now.duration_since(*prev) < debounce);
        if suppressed {
            return false;
        }
        detector.last_spawn.insert(lane, now);

        let task_detector = Arc::clone(detector);
        let handle = tokio::spawn(async move {
            task_detector.run_detection(lane).await;
        });
        if let Some(old) = detector.tasks.insert(lane, handle) {
            // A finished handle; aborting it is a no-op
            old.abort();
        }
        true
    }

    /// Abort in-flight detection tasks. Called on shutdown.
    pub fn shutdown(&self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
    }

    async fn run_detection(&self, lane: i32) {
        tracing::info!(lane, "detector: started");
        tokio::time::sleep(SETTLE_DELAY).await;

        let clients = match self.dvr.clients_info().await {
            Ok(clients) => clients,
            Err(e) => {
                tracing::warn!(lane, "detector: client enumeration failed: {}", e);
                return;
            }
        };

        let supported: Vec<DvrClientInfo> = clients
            .into_iter()
            .filter(|c| c.is_supported_platform())
            .collect();
        if supported.is_empty() {
            tracing::info!(lane, "detector: no supported clients connected");
            return;
        }

        // Recently seen clients first; all supported as fallback
        let now_epoch = Utc::now().timestamp() as f64;
        let mut candidates: Vec<&DvrClientInfo> = supported
            .iter()
            .filter(|c| {
                c.seen_at
                    .map(|t| now_epoch - t <= SEEN_AT_WINDOW_SECS)
                    .unwrap_or(false)
            })
            .collect();
        if candidates.is_empty() {
            candidates = supported.iter().collect();
        }

        let mut tuned: Option<&DvrClientInfo> = None;
        for candidate in candidates {
            let Some(ip) = candidate.local_ip.as_deref() else {
                continue;
            };
            match self.dvr.player_status(ip).await {
                Ok(status) => {
                    let playing = status
                        .status
                        .as_deref()
                        .is_some_and(|s| s.eq_ignore_ascii_case("playing"));
                    let on_lane = status
                        .channel_name
                        .as_deref()
                        .is_some_and(|name| channel_matches_lane(name, lane));
                    if playing && on_lane {
                        tuned = Some(candidate);
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(lane, client = ip, "detector: status probe failed: {}", e);
                }
            }
        }

        let Some(client) = tuned else {
            tracing::info!(lane, "detector: no client playing this lane");
            return;
        };
        let client_ip = client.local_ip.as_deref().unwrap_or_default().to_string();
        let format = if client.wants_http_deeplinks() {
            DeeplinkFormat::Http
        } else {
            DeeplinkFormat::Scheme
        };
        tracing::info!(
            lane,
            client = %client_ip,
            platform = client.platform.as_deref().unwrap_or("unknown"),
            "detector: matched tuned client"
        );

        let whatson = {
            let mut conn = match self.pool.get() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(lane, "detector: db checkout failed: {}", e);
                    return;
                }
            };
            match resolve_whatson(
                &mut conn,
                lane,
                Utc::now(),
                self.config.padding_minutes,
                format,
            ) {
                Ok(whatson) => whatson,
                Err(e) => {
                    tracing::warn!(lane, "detector: whatson failed: {}", e);
                    return;
                }
            }
        };

        let Some(deeplink) = whatson.deeplink_url.as_deref() else {
            tracing::info!(lane, "detector: nothing to play (placeholder without fallback)");
            return;
        };
        if whatson.is_fallback {
            tracing::info!(lane, "detector: using fallback deeplink from padded event");
        }

        let sidecar = match self.write_sidecar(lane, deeplink) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(lane, "detector: sidecar write failed: {}", e);
                return;
            }
        };
        tracing::info!(lane, path = %sidecar.display(), "detector: sidecar updated");

        let file_id = match self.find_sidecar_file_id(lane).await {
            Some(id) => id,
            None => {
                tracing::warn!(lane, "detector: sidecar not indexed by dvr");
                return;
            }
        };

        if let Err(e) = self.dvr.reprocess_file(&file_id).await {
            tracing::warn!(lane, file = %file_id, "detector: reprocess failed: {}", e);
            return;
        }

        match self.dvr.play_recording(&client_ip, &file_id).await {
            Ok(()) => {
                tracing::info!(lane, client = %client_ip, "detector: playback triggered")
            }
            Err(e) => tracing::warn!(lane, "detector: play trigger failed: {}", e),
        }
    }

    async fn find_sidecar_file_id(&self, lane: i32) -> Option<String> {
        let needle = format!("lane{}.strmlnk", lane);
        let files = self.dvr.files().await.ok()?;
        files
            .into_iter()
            .find(|f| {
                f.path
                    .as_deref()
                    .is_some_and(|p| p.ends_with(needle.as_str()))
            })
            .map(|f| f.id)
    }

    /// Startup bootstrap: seed every lane's sidecar with `about:blank`, ask
    /// the DVR to scan them in, and hide our import group from its UI.
    pub async fn bootstrap(&self) {
        if !self.enabled() {
            tracing::info!("detector disabled (no DVR import path configured)");
            return;
        }

        for lane in 1..=self.config.lane_count as i32 {
            let path = self.sidecar_path(lane);
            if !path.exists() {
                if let Err(e) = self.write_sidecar(lane, "about:blank") {
                    tracing::warn!(lane, "bootstrap: sidecar seed failed: {}", e);
                }
            }
        }

        if let Err(e) = self.dvr.scan().await {
            tracing::warn!("bootstrap: dvr scan failed: {}", e);
        }

        match self.dvr.groups().await {
            Ok(groups) => {
                for group in groups {
                    if group
                        .name
                        .as_deref()
                        .is_some_and(|n| n.contains("GuideForge"))
                    {
                        if let Err(e) = self.dvr.hide_group(&group.id).await {
                            tracing::warn!(group = %group.id, "bootstrap: hide failed: {}", e);
                        }
                    }
                }
            }
            Err(e) => tracing::warn!("bootstrap: group listing failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_migrated_pool;

    fn detector(import_path: &str, debounce_secs: f64) -> Arc<Detector> {
        let pool = create_migrated_pool(":memory:").expect("pool");
        let mut cfg = Config::default();
        cfg.dvr_import_path = import_path.to_string();
        cfg.detect_debounce_secs = debounce_secs;
        Arc::new(Detector::new(pool, Arc::new(cfg)))
    }

    #[test]
    fn test_channel_matches_lane() {
        assert!(channel_matches_lane("Sports Lane 7", 7));
        assert!(channel_matches_lane("Fruit Lane 12", 12));
        assert!(!channel_matches_lane("Sports Lane 7", 17));
        assert!(!channel_matches_lane("Sports Lane 17", 7));
        assert!(!channel_matches_lane("ESPN", 1));
    }

    #[tokio::test]
    async fn test_disabled_without_import_path() {
        let detector = detector("", 3.0);
        assert!(!detector.enabled());
        assert!(!Detector::maybe_spawn(&detector, 1));
    }

    #[tokio::test]
    async fn test_debounce_single_spawn() {
        let dir = tempfile::tempdir().expect("tempdir");
        let detector = detector(dir.path().to_str().unwrap(), 3.0);

        assert!(Detector::maybe_spawn(&detector, 7));
        // Second hit inside the window is suppressed
        assert!(!Detector::maybe_spawn(&detector, 7));
        // A different lane is tracked independently
        assert!(Detector::maybe_spawn(&detector, 8));

        detector.shutdown();
    }

    #[tokio::test]
    async fn test_debounce_expires() {
        let dir = tempfile::tempdir().expect("tempdir");
        let detector = detector(dir.path().to_str().unwrap(), 0.05);

        assert!(Detector::maybe_spawn(&detector, 7));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(Detector::maybe_spawn(&detector, 7));
        detector.shutdown();
    }

    #[test]
    fn test_sidecar_path_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let detector = detector(dir.path().to_str().unwrap(), 3.0);
        let path = detector.sidecar_path(7);
        assert!(path.ends_with("Imports/Videos/GuideForge/lane7.strmlnk"));
    }

    #[test]
    fn test_write_sidecar() {
        let dir = tempfile::tempdir().expect("tempdir");
        let detector = detector(dir.path().to_str().unwrap(), 3.0);
        let path = detector
            .write_sidecar(3, "peacock://play/x")
            .expect("write");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "peacock://play/x");
    }
}
