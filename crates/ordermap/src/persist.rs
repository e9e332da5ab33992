//! Full-dump persistence for the order-id map.
//!
//! The whole mapping is rewritten on every bind rather than journaled: the
//! map is small (one trading day of one user's orders) and a full dump keeps
//! recovery trivial. The write goes through a temp file and rename so a
//! crash mid-write never corrupts the previous dump.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::map::{LocalOrderKey, MapInner, RemoteOrderKey};

/// On-disk layout of a persisted order-id map.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MapSnapshot {
    pub(crate) trading_day: String,
    pub(crate) next_seq: u64,
    pub(crate) bindings: Vec<(LocalOrderKey, RemoteOrderKey)>,
}

/// Write the full mapping to `path`.
pub(crate) fn save(path: &Path, inner: &MapInner) -> Result<()> {
    let snapshot = MapSnapshot {
        trading_day: inner.trading_day.clone(),
        next_seq: inner.next_seq,
        bindings: inner
            .local_to_remote
            .iter()
            .map(|(l, r)| (l.clone(), r.clone()))
            .collect(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let json = serde_json::to_vec(&snapshot).context("failed to serialize order-id map")?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename {} into place", tmp.display()))?;
    Ok(())
}

/// Load the mapping persisted at `path` for `trading_day`.
///
/// Returns `Ok(None)` when no file exists or the file belongs to a prior
/// trading day (whose entries must be discarded). A present-but-unparseable
/// file is an error; the caller degrades to an empty map.
pub(crate) fn load(path: &Path, trading_day: &str) -> Result<Option<MapSnapshot>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let snapshot: MapSnapshot = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    if snapshot.trading_day != trading_day {
        tracing::info!(
            path = %path.display(),
            persisted_day = %snapshot.trading_day,
            trading_day,
            "discarding order-id map from a prior trading day"
        );
        return Ok(None);
    }

    Ok(Some(snapshot))
}
