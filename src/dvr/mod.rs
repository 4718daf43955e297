//! Typed client for the DVR host's REST API and the per-device player API.
//!
//! Every call carries an explicit timeout; the detector treats all of these
//! as best-effort.

use std::time::Duration;

use serde::Deserialize;

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum DvrError {
    #[error("DVR request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("DVR returned status {0}")]
    Status(reqwest::StatusCode),
}

/// A file known to the DVR (sidecar lookups only need id and path).
#[derive(Debug, Clone, Deserialize)]
pub struct DvrFile {
    pub id: String,
    #[serde(default)]
    pub path: Option<String>,
}

/// A connected player device.
#[derive(Debug, Clone, Deserialize)]
pub struct DvrClientInfo {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub local_ip: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub seen_at: Option<f64>,
}

impl DvrClientInfo {
    /// Platforms the detector can drive.
    pub fn is_supported_platform(&self) -> bool {
        let Some(platform) = self.platform.as_deref() else {
            return false;
        };
        let p = platform.to_lowercase();
        p.contains("apple") || p.contains("android") || p.contains("fire")
    }

    /// Android and Fire TV clients need HTTP deeplinks; Apple TV takes
    /// native schemes.
    pub fn wants_http_deeplinks(&self) -> bool {
        let Some(platform) = self.platform.as_deref() else {
            return false;
        };
        let p = platform.to_lowercase();
        p.contains("android") || p.contains("fire")
    }
}

/// Playback status reported by a device's player API.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DvrGroup {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct DvrClient {
    http: reqwest::Client,
    base_url: String,
    api_port: u16,
}

impl DvrClient {
    pub fn new(cfg: &Config) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: cfg.dvr_base_url(),
            api_port: cfg.dvr_api_port,
        }
    }

    fn check(resp: reqwest::Response) -> Result<reqwest::Response, DvrError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(DvrError::Status(resp.status()))
        }
    }

    /// `GET /dvr/files` - locate sidecar file ids.
    pub async fn files(&self) -> Result<Vec<DvrFile>, DvrError> {
        let resp = self
            .http
            .get(format!("{}/dvr/files", self.base_url))
            .send()
            .await?;
        Ok(Self::check(resp)?.json().await?)
    }

    /// `PUT /dvr/files/{id}/reprocess` - re-index one sidecar.
    pub async fn reprocess_file(&self, file_id: &str) -> Result<(), DvrError> {
        let resp = self
            .http
            .put(format!("{}/dvr/files/{}/reprocess", self.base_url, file_id))
            .send()
            .await?;
        Self::check(resp)?;
        Ok(())
    }

    /// `PUT /dvr/scanner/scan` - full rescan after bootstrap.
    pub async fn scan(&self) -> Result<(), DvrError> {
        let resp = self
            .http
            .put(format!("{}/dvr/scanner/scan", self.base_url))
            .send()
            .await?;
        Self::check(resp)?;
        Ok(())
    }

    /// `GET /dvr/clients/info` - enumerate connected players.
    pub async fn clients_info(&self) -> Result<Vec<DvrClientInfo>, DvrError> {
        let resp = self
            .http
            .get(format!("{}/dvr/clients/info", self.base_url))
            .send()
            .await?;
        Ok(Self::check(resp)?.json().await?)
    }

    /// `GET /dvr/groups?all=true`.
    pub async fn groups(&self) -> Result<Vec<DvrGroup>, DvrError> {
        let resp = self
            .http
            .get(format!("{}/dvr/groups?all=true", self.base_url))
            .send()
            .await?;
        Ok(Self::check(resp)?.json().await?)
    }

    /// `PUT /dvr/groups/{id}/visibility/hidden` - hide our import group from
    /// the DVR UI.
    pub async fn hide_group(&self, group_id: &str) -> Result<(), DvrError> {
        let resp = self
            .http
            .put(format!(
                "{}/dvr/groups/{}/visibility/hidden",
                self.base_url, group_id
            ))
            .send()
            .await?;
        Self::check(resp)?;
        Ok(())
    }

    /// `GET http://{client}:{api_port}/api/status` on a player device.
    pub async fn player_status(&self, client_ip: &str) -> Result<PlayerStatus, DvrError> {
        let resp = self
            .http
            .get(format!("http://{}:{}/api/status", client_ip, self.api_port))
            .send()
            .await?;
        Ok(Self::check(resp)?.json().await?)
    }

    /// `POST http://{client}:{api_port}/api/play/recording/{id}` - start
    /// playback of a recording (our reprocessed sidecar) on the device.
    pub async fn play_recording(&self, client_ip: &str, file_id: &str) -> Result<(), DvrError> {
        let resp = self
            .http
            .post(format!(
                "http://{}:{}/api/play/recording/{}",
                client_ip, self.api_port, file_id
            ))
            .send()
            .await?;
        Self::check(resp)?;
        Ok(())
    }
}
