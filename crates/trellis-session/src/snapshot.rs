//! Session archives.
//!
//! `save` writes every node (id, owner, type tag, data, dependencies) and
//! the online users into one gzip-compressed JSON file. The file name gets a
//! `_YYYY_MM_DD_HH-MM-SS` stamp before its extension so earlier archives are
//! never overwritten.

use crate::error::{Result, SessionError};
use crate::presence::OnlineUser;
use chrono::{DateTime, Local, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use trellis_core::{NodeId, Owner};
use trellis_graph::NodeRegistry;

/// Archive format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H-%M-%S";

/// One node as stored in an archive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub owner: Owner,
    pub str_type: String,
    pub data: Value,
    pub dependencies: Vec<NodeId>,
}

/// Everything a session archive holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub nodes: Vec<(NodeId, SnapshotEntry)>,
    pub users: Vec<OnlineUser>,
}

impl SessionSnapshot {
    /// Capture the registry and user table.
    ///
    /// Node data is the pending remote payload when there is one, else the
    /// committed snapshot, else a fresh dump of the object. Nodes with none
    /// of these are left out.
    pub fn capture(registry: &NodeRegistry, users: Vec<OnlineUser>) -> Self {
        let mut nodes = Vec::with_capacity(registry.len());

        for node in registry.iter() {
            let data = match node.fetched().or(node.snapshot()) {
                Some(data) => data.clone(),
                None => match node.dump() {
                    Ok(data) => data,
                    Err(err) => {
                        warn!(node = %node.id(), error = %err, "node has no data, left out of archive");
                        continue;
                    }
                },
            };

            nodes.push((
                node.id(),
                SnapshotEntry {
                    owner: node.owner().clone(),
                    str_type: node.str_type().to_string(),
                    data,
                    dependencies: node.dependencies().to_vec(),
                },
            ));
        }

        Self {
            version: SNAPSHOT_VERSION,
            created_at: Utc::now(),
            nodes,
            users,
        }
    }

    /// Write the archive next to `path`, returning the timestamped path used.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = timestamped_path(path.as_ref(), Local::now());
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(&path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        encoder.finish()?.flush()?;

        info!(
            path = %path.display(),
            nodes = self.nodes.len(),
            users = self.users.len(),
            "saved session archive"
        );
        Ok(path)
    }

    /// Read an archive written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let decoder = GzDecoder::new(BufReader::new(file));
        let snapshot: SessionSnapshot = serde_json::from_reader(decoder)
            .map_err(|e| SessionError::Snapshot(format!("unreadable archive: {}", e)))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SessionError::Snapshot(format!(
                "unsupported archive version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }

    pub fn entry(&self, id: &NodeId) -> Option<&SnapshotEntry> {
        self.nodes
            .iter()
            .find_map(|(node, entry)| (node == id).then_some(entry))
    }
}

/// `dir/name.ext` becomes `dir/name_2024_05_01_13-45-10.ext`, with a `_N`
/// counter appended when that file already exists.
fn timestamped_path(path: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned());
    let stamp = now.format(TIMESTAMP_FORMAT).to_string();

    let file_name = |counter: usize| {
        let suffix = if counter == 0 {
            String::new()
        } else {
            format!("_{}", counter)
        };
        match &extension {
            Some(ext) => format!("{}_{}{}.{}", stem, stamp, suffix, ext),
            None => format!("{}_{}{}", stem, stamp, suffix),
        }
    };

    let mut counter = 0;
    let mut candidate = path.with_file_name(file_name(counter));
    while candidate.exists() {
        counter += 1;
        candidate = path.with_file_name(file_name(counter));
    }
    candidate
}
