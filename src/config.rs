//! Runtime configuration
//!
//! All tunables come from the environment, read once at startup into a
//! `Config` struct that is passed down explicitly. Nothing else in the
//! codebase reads environment variables.

use std::path::PathBuf;

fn env_str(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_int<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Application configuration, constructed once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite catalog database
    pub db_path: String,
    /// Directory where guide artifacts (M3U / XMLTV) are written
    pub out_dir: PathBuf,
    /// Directory for debug artifacts (scrape CSVs, diagnostics)
    pub log_dir: PathBuf,
    /// Directory of provider snapshot files consumed at refresh time
    pub ingest_dir: PathBuf,

    /// HTTP server bind host and port
    pub server_host: String,
    pub server_port: u16,
    /// Host/port the DVR should use to reach us in emitted stream URLs
    pub public_host: String,

    /// DVR server address and ports
    pub dvr_host: String,
    pub dvr_port: u16,
    /// Port of the per-client player API on tuning devices
    pub dvr_api_port: u16,
    /// Mounted DVR import directory; empty disables the detector
    pub dvr_import_path: String,

    /// Generic lane pool sizing
    pub lane_count: u32,
    pub lane_start_ch: u32,
    pub days_ahead: i64,

    /// Lane schedule shaping
    pub padding_minutes: i64,
    pub placeholder_block_minutes: i64,
    pub placeholder_extra_days: i64,

    /// Auto refresh
    pub auto_refresh_enabled: bool,
    /// "HH:MM" local time
    pub auto_refresh_time: String,

    /// Detector debounce window in seconds
    pub detect_debounce_secs: f64,

    /// Number of newest debug artifacts kept when pruning
    pub debug_artifacts_keep: usize,
}

impl Config {
    /// Build configuration from the process environment.
    ///
    /// `.env` files are honored (dotenvy) so local runs match container runs.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let server_host = env_str("GUIDEFORGE_HOST", "0.0.0.0");
        let server_port: u16 = env_int("GUIDEFORGE_PORT", 8411);
        let public_host = env_str(
            "GUIDEFORGE_PUBLIC_HOST",
            &format!("127.0.0.1:{}", server_port),
        );

        Self {
            db_path: env_str("GUIDEFORGE_DB_PATH", "data/guide_events.db"),
            out_dir: PathBuf::from(env_str("GUIDEFORGE_OUT_DIR", "out")),
            log_dir: PathBuf::from(env_str("GUIDEFORGE_LOG_DIR", "logs")),
            ingest_dir: PathBuf::from(env_str("GUIDEFORGE_INGEST_DIR", "ingest")),
            server_host,
            server_port,
            public_host,
            dvr_host: env_str("DVR_HOST", "127.0.0.1"),
            dvr_port: env_int("DVR_PORT", 8089),
            dvr_api_port: env_int("DVR_API_PORT", 57000),
            dvr_import_path: env_str("DVR_IMPORT_PATH", ""),
            lane_count: env_int("GUIDEFORGE_LANES", 10),
            lane_start_ch: env_int("GUIDEFORGE_LANE_START_CH", 9000),
            days_ahead: env_int("GUIDEFORGE_DAYS_AHEAD", 7),
            padding_minutes: env_int("GUIDEFORGE_PADDING_MINUTES", 45),
            placeholder_block_minutes: env_int("GUIDEFORGE_PLACEHOLDER_BLOCK_MINUTES", 60),
            placeholder_extra_days: env_int("GUIDEFORGE_PLACEHOLDER_EXTRA_DAYS", 5),
            auto_refresh_enabled: env_bool("GUIDEFORGE_AUTO_REFRESH", false),
            auto_refresh_time: env_str("GUIDEFORGE_AUTO_REFRESH_TIME", "02:30"),
            detect_debounce_secs: env_int("DETECT_DEBOUNCE_SECONDS", 3i64) as f64,
            debug_artifacts_keep: env_int("GUIDEFORGE_DEBUG_KEEP", 10usize),
        }
    }

    /// True when a DVR import mount is configured, enabling the detector.
    pub fn detector_enabled(&self) -> bool {
        !self.dvr_import_path.trim().is_empty()
    }

    /// Base URL of the DVR REST API.
    pub fn dvr_base_url(&self) -> String {
        format!("http://{}:{}", self.dvr_host, self.dvr_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "data/guide_events.db".into(),
            out_dir: PathBuf::from("out"),
            log_dir: PathBuf::from("logs"),
            ingest_dir: PathBuf::from("ingest"),
            server_host: "0.0.0.0".into(),
            server_port: 8411,
            public_host: "127.0.0.1:8411".into(),
            dvr_host: "127.0.0.1".into(),
            dvr_port: 8089,
            dvr_api_port: 57000,
            dvr_import_path: String::new(),
            lane_count: 10,
            lane_start_ch: 9000,
            days_ahead: 7,
            padding_minutes: 45,
            placeholder_block_minutes: 60,
            placeholder_extra_days: 5,
            auto_refresh_enabled: false,
            auto_refresh_time: "02:30".into(),
            detect_debounce_secs: 3.0,
            debug_artifacts_keep: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.lane_count, 10);
        assert_eq!(cfg.padding_minutes, 45);
        assert!(!cfg.detector_enabled());
    }

    #[test]
    fn test_detector_enabled_requires_import_path() {
        let mut cfg = Config::default();
        assert!(!cfg.detector_enabled());
        cfg.dvr_import_path = "/mnt/dvr".into();
        assert!(cfg.detector_enabled());
    }

    #[test]
    fn test_dvr_base_url() {
        let cfg = Config::default();
        assert_eq!(cfg.dvr_base_url(), "http://127.0.0.1:8089");
    }
}
