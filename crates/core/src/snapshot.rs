//! Snapshot engine: capture and restore the whole database as one JSON
//! file.
//!
//! The on-disk format is indented, key-sorted UTF-8 JSON with top-level
//! keys `libraries`, `documents`, `chunks`, `indices` and `timestamp`.
//! Key sorting falls out of routing the serialization through
//! `serde_json::Value`, whose map is `BTreeMap`-backed.
//!
//! A load stages the entire parse into a transient [`SnapshotFile`] before
//! touching live state, so a corrupt file can never wedge the running
//! process: either the store is replaced wholesale or left alone.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::{IndexMeta, IndexRegistry};
use crate::store::{Store, StoreState};
use crate::{LibraryId, QuiverError, Result};

/// Auto-generated snapshot filenames: `snapshot_YYYYMMDD_HHMMSS.json`.
const FILE_PREFIX: &str = "snapshot_";
const FILE_SUFFIX: &str = ".json";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Everything a snapshot carries. Indexes themselves are not serialized —
/// they are rebuilt from `indices` metadata on load.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotFile {
    #[serde(flatten)]
    pub state: StoreState,
    pub indices: HashMap<LibraryId, IndexMeta>,
    pub timestamp: DateTime<Utc>,
}

/// One snapshot file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// File stem, e.g. `snapshot_20260801_120000`.
    pub id: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Serialize the current store tables and index metadata to `path`, or to
/// a timestamped file under `data_dir` when no path is given. Returns the
/// final path.
pub(crate) fn save(
    store: &Store,
    registry: &IndexRegistry,
    data_dir: &Path,
    path: Option<PathBuf>,
) -> Result<PathBuf> {
    let path = path.unwrap_or_else(|| {
        let stamp = Utc::now().format(TIMESTAMP_FORMAT);
        data_dir.join(format!("{FILE_PREFIX}{stamp}{FILE_SUFFIX}"))
    });

    // Lock order: store first, then registry.
    let file = SnapshotFile {
        state: store.snapshot(),
        indices: registry.metadata(),
        timestamp: Utc::now(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // Round-trip through `Value` for key-sorted output.
    let value = serde_json::to_value(&file)?;
    fs::write(&path, serde_json::to_string_pretty(&value)?)?;

    info!(path = %path.display(), "database saved");
    Ok(path)
}

/// Restore the store and rebuild every index from a snapshot file.
///
/// With no explicit path, `data_dir/snapshot.json` is tried and a missing
/// file is a logged no-op. An explicitly named file must exist; IO and
/// parse errors propagate, leaving live state untouched.
pub(crate) fn load(
    store: &Store,
    registry: &IndexRegistry,
    data_dir: &Path,
    path: Option<PathBuf>,
) -> Result<()> {
    let (path, defaulted) = match path {
        Some(path) => (path, false),
        None => (data_dir.join("snapshot.json"), true),
    };

    if defaulted && !path.exists() {
        info!(path = %path.display(), "no snapshot found, starting empty");
        return Ok(());
    }

    // Stage the whole parse before touching live state.
    let text = fs::read_to_string(&path)?;
    let file: SnapshotFile = serde_json::from_str(&text)?;

    store.load_snapshot(file.state);
    registry.rebuild(&file.indices);

    info!(path = %path.display(), "database loaded");
    Ok(())
}

/// All snapshot files under `data_dir`, newest first. A missing data
/// directory simply lists nothing.
pub(crate) fn list(data_dir: &Path) -> Result<Vec<SnapshotInfo>> {
    let entries = match fs::read_dir(data_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_SUFFIX) {
            continue;
        }

        let id = name.trim_end_matches(FILE_SUFFIX).to_string();
        let metadata = entry.metadata()?;
        let created_at = parse_stamp(&id)
            .or_else(|| metadata.modified().ok().map(DateTime::<Utc>::from))
            .unwrap_or_else(Utc::now);

        snapshots.push(SnapshotInfo {
            id,
            path,
            created_at,
            size_bytes: metadata.len(),
        });
    }

    snapshots.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(snapshots)
}

/// Delete one snapshot file by id (with or without the `.json` suffix).
pub(crate) fn delete(data_dir: &Path, id: &str) -> Result<()> {
    let file_name = if id.ends_with(FILE_SUFFIX) {
        id.to_string()
    } else {
        format!("{id}{FILE_SUFFIX}")
    };
    let path = data_dir.join(&file_name);

    if !path.exists() {
        return Err(QuiverError::NotFound {
            kind: "Snapshot",
            id: id.to_string(),
        });
    }
    fs::remove_file(&path)?;

    info!(path = %path.display(), "snapshot deleted");
    Ok(())
}

/// Recover the creation time baked into an auto-generated filename.
fn parse_stamp(id: &str) -> Option<DateTime<Utc>> {
    let stamp = id.strip_prefix(FILE_PREFIX)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
