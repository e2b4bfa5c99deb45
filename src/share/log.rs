//! Append-only share log and cross-device tail reader
//!
//! Each device appends one JSON line per identifier change to its own file
//! and never rewrites it. A peer tails that file by modification time,
//! scanning from the newest line back to the first valid record.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::live::{is_share_link, LiveIdentifier};

const LOG_EXTENSION: &str = "jsonl";

/// One logged event describing a device's current live link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    /// ISO-8601 local time of the change
    pub timestamp: String,

    #[serde(alias = "videoId")]
    pub identifier: LiveIdentifier,

    pub share_link: String,

    #[serde(alias = "popoutChatUrl")]
    pub popout_url: String,

    #[serde(alias = "sourceComputer")]
    pub source_device: String,
}

impl ShareRecord {
    pub fn new(identifier: &LiveIdentifier, source_device: &str) -> Self {
        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            identifier: identifier.clone(),
            share_link: identifier.share_link(),
            popout_url: identifier.popout_url(),
            source_device: source_device.to_string(),
        }
    }

    /// Parse one log line; `None` for anything that is not a valid record
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<ShareRecord>(line) {
            Ok(record) if is_share_link(&record.share_link) => Some(record),
            Ok(record) => {
                debug!("Skipping record with non-canonical link: {}", record.share_link);
                None
            }
            Err(e) => {
                debug!("Skipping malformed log line: {}", e);
                None
            }
        }
    }
}

fn is_log_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(LOG_EXTENSION))
}

fn own_file_name(device_name: &str) -> String {
    format!("{device_name}.{LOG_EXTENSION}")
}

/// Writer for this device's share log
#[derive(Debug, Clone)]
pub struct ShareLog {
    path: Option<PathBuf>,
}

impl ShareLog {
    /// `write_path` is either a `.jsonl` file or a directory that receives
    /// `<device_name>.jsonl`
    pub fn new(write_path: Option<&Path>, device_name: &str) -> Self {
        let path = write_path.map(|path| {
            if is_log_file(path) {
                path.to_path_buf()
            } else {
                path.join(own_file_name(device_name))
            }
        });
        Self { path }
    }

    #[cfg(test)]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append and flush one record. Returns false when no path is configured.
    pub fn append(&self, record: &ShareRecord) -> Result<bool> {
        let Some(path) = self.path.as_ref() else {
            warn!("No share log write path configured, skipping write");
            return Ok(false);
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create share log directory: {:?}", parent))?;
        }

        let mut line = serde_json::to_string(record).context("Failed to serialize share record")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open share log: {:?}", path))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write share log: {:?}", path))?;
        file.flush()
            .with_context(|| format!("Failed to flush share log: {:?}", path))?;

        info!("Share link {} written to {:?}", record.share_link, path);
        Ok(true)
    }
}

/// Tail reader for a peer device's share log
#[derive(Debug)]
pub struct PeerLogTail {
    read_path: Option<PathBuf>,
    own_file_name: String,
    /// Last file read and its modification time at that read
    last_seen: Option<(PathBuf, SystemTime)>,
}

impl PeerLogTail {
    /// `read_path` is either a peer's `.jsonl` file or a directory searched
    /// for the first log that is not this device's own
    pub fn new(read_path: Option<&Path>, device_name: &str) -> Self {
        Self {
            read_path: read_path.map(Path::to_path_buf),
            own_file_name: own_file_name(device_name),
            last_seen: None,
        }
    }

    fn locate(&self) -> Option<PathBuf> {
        let read_path = self.read_path.as_ref()?;
        if is_log_file(read_path) {
            return read_path.is_file().then(|| read_path.clone());
        }

        let entries = match std::fs::read_dir(read_path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read peer log directory {:?}: {}", read_path, e);
                return None;
            }
        };

        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_log_file(path))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name != self.own_file_name)
            })
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    /// Newest valid record, but only if the peer log changed since the last
    /// call. Malformed lines are skipped one by one.
    pub fn poll(&mut self) -> Option<ShareRecord> {
        let path = self.locate()?;

        let modified = match std::fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Failed to stat peer log {:?}: {}", path, e);
                return None;
            }
        };
        let unchanged = self
            .last_seen
            .as_ref()
            .is_some_and(|(last_path, last)| *last_path == path && modified <= *last);
        if unchanged {
            return None;
        }

        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read peer log {:?}: {}", path, e);
                return None;
            }
        };
        self.last_seen = Some((path.clone(), modified));

        let record = contents
            .split(|byte| *byte == b'\n')
            .rev()
            .filter_map(|line| match std::str::from_utf8(line) {
                Ok(line) => Some(line),
                Err(e) => {
                    debug!("Skipping log line that is not UTF-8: {}", e);
                    None
                }
            })
            .find_map(ShareRecord::from_line);
        if let Some(record) = record.as_ref() {
            info!(
                "Peer {} shared {} ({:?})",
                record.source_device, record.share_link, path
            );
        }
        record
    }
}
