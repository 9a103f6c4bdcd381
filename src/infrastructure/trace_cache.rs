//! Imported-trace caching.
//!
//! Re-importing a large trace directory dominates repeated analysis runs, so
//! the parsed `Vec<Trace>` can be cached keyed by version plus a directory
//! fingerprint. Cache misses and backend failures are never fatal; the
//! caller just re-imports.

use crate::domain::trace::Trace;
use anyhow::Result;
use dashmap::DashMap;
use sled::Db;
use std::path::Path;
use tracing::{debug, warn};

/// Trait for trace cache backends.
/// Implementations must be thread-safe (Send + Sync).
pub trait TraceCache: Send + Sync {
    fn get(&self, version: &str, fingerprint: &str) -> Option<Vec<Trace>>;
    fn insert(&self, version: &str, fingerprint: &str, traces: &[Trace]);
}

/// Cheap content fingerprint of a trace directory: per-file name, size and
/// mtime. Any re-export of the traces changes it.
pub fn directory_fingerprint(dir: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        parts.push(format!(
            "{}:{}:{}",
            entry.file_name().to_string_lossy(),
            meta.len(),
            mtime
        ));
    }
    parts.sort();
    Ok(parts.join("|"))
}

// ============================================================================
// MemoryTraceCache - per-process cache using DashMap
// ============================================================================

#[derive(Default)]
pub struct MemoryTraceCache {
    entries: DashMap<(String, String), Vec<Trace>>,
}

impl TraceCache for MemoryTraceCache {
    fn get(&self, version: &str, fingerprint: &str) -> Option<Vec<Trace>> {
        self.entries
            .get(&(version.to_string(), fingerprint.to_string()))
            .map(|r| r.clone())
    }

    fn insert(&self, version: &str, fingerprint: &str, traces: &[Trace]) {
        self.entries
            .insert((version.to_string(), fingerprint.to_string()), traces.to_vec());
    }
}

// ============================================================================
// DiskTraceCache - persistent cache using sled
// ============================================================================

pub struct DiskTraceCache {
    db: Db,
    traces_tree: sled::Tree,
}

impl DiskTraceCache {
    pub fn new(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        let traces_tree = db.open_tree("traces")?;
        Ok(Self { db, traces_tree })
    }

    fn key(version: &str, fingerprint: &str) -> String {
        format!("{}::{}", version, fingerprint)
    }
}

impl TraceCache for DiskTraceCache {
    fn get(&self, version: &str, fingerprint: &str) -> Option<Vec<Trace>> {
        let key = Self::key(version, fingerprint);
        let hit = self
            .traces_tree
            .get(key.as_bytes())
            .ok()
            .flatten()
            .and_then(|bytes| bincode::deserialize(&bytes).ok());
        if hit.is_some() {
            debug!(version, "trace cache hit");
        }
        hit
    }

    fn insert(&self, version: &str, fingerprint: &str, traces: &[Trace]) {
        let key = Self::key(version, fingerprint);
        match bincode::serialize(traces) {
            Ok(bytes) => {
                if let Err(e) = self.traces_tree.insert(key.as_bytes(), bytes) {
                    warn!(version, error = %e, "failed to write trace cache");
                }
                let _ = self.db.flush();
            }
            Err(e) => warn!(version, error = %e, "failed to encode traces for cache"),
        }
    }
}
