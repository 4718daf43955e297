//! Guide artifact emission.
//!
//! Serializes the catalog and lane plans into the M3U playlists and XMLTV
//! documents the DVR consumes. Files are written atomically (temp + rename)
//! so readers always see the last complete artifact, even when a refresh
//! fails halfway.

pub mod adb;
pub mod direct;
pub mod lanes;
pub mod m3u;
pub mod xmltv;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::db::{DbError, DbPooledConnection};

/// Guess a display provider from a raw channel label. Used when no playable
/// survives to name the service properly.
pub fn provider_from_channel(channel_name: Option<&str>) -> String {
    let Some(name) = channel_name.filter(|n| !n.trim().is_empty()) else {
        return "Sports".to_string();
    };
    let lower = name.to_lowercase();

    let mapped = if lower.contains("espn") {
        "ESPN+"
    } else if lower.contains("peacock")
        || lower.contains("nbc sports")
        || lower.contains("national broadcasting company")
    {
        "Peacock"
    } else if lower.contains("prime") || lower.contains("amazon") {
        "Prime Video"
    } else if lower.contains("paramount") {
        "Paramount+"
    } else if lower.contains("cbs") {
        "CBS Sports"
    } else if lower.contains("fox") {
        "FOX Sports"
    } else if lower.contains("dazn") {
        "DAZN"
    } else if lower.contains("apple") {
        "Apple TV+"
    } else if lower.contains("kayo") {
        "Kayo"
    } else if lower.contains("victory") {
        "Victory+"
    } else if lower.contains("hbo") || lower.contains("max") {
        "Max"
    } else {
        return "Sports".to_string();
    };
    mapped.to_string()
}

/// Write content atomically: temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct EmitSummary {
    pub files_written: Vec<PathBuf>,
    pub missing_deeplinks: usize,
}

/// Emit every guide artifact into the configured output directory.
pub fn emit_all(conn: &mut DbPooledConnection, cfg: &Config) -> Result<EmitSummary, DbError> {
    let mut summary = EmitSummary::default();
    let out = &cfg.out_dir;

    fn io_err(e: io::Error) -> DbError {
        DbError::Other(format!("artifact write: {}", e))
    }

    let direct = direct::build_direct_outputs(conn, 24)?;
    let write = |name: &str, content: &str, summary: &mut EmitSummary| -> Result<(), DbError> {
        let path = out.join(name);
        write_atomic(&path, content).map_err(io_err)?;
        summary.files_written.push(path);
        Ok(())
    };

    write("direct.m3u", &direct.m3u, &mut summary)?;
    write("direct.xml", &direct.xml, &mut summary)?;
    summary.missing_deeplinks = direct.missing.len();
    let missing_json = serde_json::to_string_pretty(&direct.missing)
        .map_err(|e| DbError::Other(format!("missing json: {}", e)))?;
    write("missing_direct_deeplinks.json", &missing_json, &mut summary)?;

    let lane_out = lanes::build_lane_outputs(conn, &cfg.public_host)?;
    write("multisource_lanes.m3u", &lane_out.m3u, &mut summary)?;
    write("multisource_lanes.xml", &lane_out.xml, &mut summary)?;
    write(
        "multisource_lanes_chrome.m3u",
        &lane_out.m3u_chrome,
        &mut summary,
    )?;

    let adb_out = adb::build_adb_outputs(conn, &cfg.public_host)?;
    write("adb_lanes.m3u", &adb_out.m3u, &mut summary)?;
    write("adb_lanes.xml", &adb_out.xml, &mut summary)?;
    for (provider_code, playlist) in &adb_out.per_provider_m3u {
        write(
            &format!("adb_lanes_{}.m3u", provider_code),
            playlist,
            &mut summary,
        )?;
    }

    tracing::info!(
        files = summary.files_written.len(),
        missing_deeplinks = summary.missing_deeplinks,
        "guide artifacts written"
    );
    Ok(summary)
}

/// Keep only the newest `keep` files matching `prefix` in `dir`. Used for
/// ingest debug artifacts like scrape CSVs.
pub fn prune_debug_artifacts(dir: &Path, prefix: &str, keep: usize) -> io::Result<usize> {
    let mut matches: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(prefix) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        matches.push((modified, entry.path()));
    }

    matches.sort_by(|a, b| b.0.cmp(&a.0));
    let mut removed = 0;
    for (_, path) in matches.into_iter().skip(keep) {
        fs::remove_file(path)?;
        removed += 1;
    }
    Ok(removed)
}
