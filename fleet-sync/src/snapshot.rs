//! Point-in-time inventories of a root on one host
//!
//! Exclusions are applied here, at capture time: a path that matches an
//! exclude glob never becomes a [`FileRecord`] and so can never show up in a
//! diff, a plan or a transfer.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::errors::{Result, SyncError};
use crate::limiter::HostLimiter;
use crate::transport::Transport;

/// One file or empty directory inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub relative_path: String,
    pub size_bytes: u64,
    /// Modification time in whole seconds since the epoch
    pub mtime: i64,
    pub content_hash: Option<String>,
    pub is_directory: bool,
}

impl FileRecord {
    pub fn file(relative_path: impl Into<String>, size_bytes: u64, mtime: i64) -> Self {
        Self {
            relative_path: relative_path.into(),
            size_bytes,
            mtime,
            content_hash: None,
            is_directory: false,
        }
    }

    pub fn directory(relative_path: impl Into<String>, mtime: i64) -> Self {
        Self {
            relative_path: relative_path.into(),
            size_bytes: 0,
            mtime,
            content_hash: None,
            is_directory: true,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Whether two records describe the same content.
    ///
    /// Directories match on existence alone. When both sides carry a hash
    /// the hash decides; otherwise size must match and mtimes must lie
    /// within `tolerance_secs` of each other.
    pub fn same_content(&self, other: &FileRecord, tolerance_secs: i64) -> bool {
        if self.is_directory != other.is_directory {
            return false;
        }
        if self.is_directory {
            return true;
        }
        if let (Some(a), Some(b)) = (&self.content_hash, &other.content_hash) {
            return a == b;
        }
        self.size_bytes == other.size_bytes && (self.mtime - other.mtime).abs() <= tolerance_secs
    }
}

/// Inventory of one root on one host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub host: String,
    pub root: String,
    pub captured_at: DateTime<Utc>,
    pub records: BTreeMap<String, FileRecord>,
}

impl TreeSnapshot {
    pub fn new(host: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            root: root.into(),
            captured_at: Utc::now(),
            records: BTreeMap::new(),
        }
    }

    /// Insert a record, keeping the first one seen for a path.
    ///
    /// Returns false when the path was already present.
    pub fn insert(&mut self, record: FileRecord) -> bool {
        if self.records.contains_key(&record.relative_path) {
            return false;
        }
        self.records.insert(record.relative_path.clone(), record);
        true
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileRecord> {
        self.records.get(relative_path)
    }

    /// Whether any record lies strictly below `relative_path`
    pub fn has_descendants(&self, relative_path: &str) -> bool {
        let prefix = format!("{}/", relative_path);
        self.records
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .next()
            .is_some_and(|(path, _)| path.starts_with(&prefix))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.records.values().map(|r| r.size_bytes).sum()
    }
}

/// Compiled exclude globs
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    globs: GlobSet,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| SyncError::InvalidPattern(format!("{}: {}", pattern, e)))?;
            builder.add(glob);
        }
        let globs = builder
            .build()
            .map_err(|e| SyncError::InvalidPattern(e.to_string()))?;

        Ok(Self { globs })
    }

    pub fn empty() -> Self {
        Self {
            globs: GlobSet::empty(),
        }
    }

    /// A path is excluded when it, or any of its ancestors, matches a
    /// pattern either as-is or with a leading slash.
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        if self.globs.is_empty() {
            return false;
        }
        let mut end = 0;
        for (idx, component) in relative_path.split('/').enumerate() {
            end += component.len() + usize::from(idx > 0);
            let prefix = &relative_path[..end];
            if self.globs.is_match(prefix) || self.globs.is_match(format!("/{}", prefix)) {
                return true;
            }
        }
        false
    }
}

/// Reject paths that could escape their root
pub fn validate_relative_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(SyncError::InvalidPath("empty path".to_string()));
    }
    if path.starts_with('/') {
        return Err(SyncError::InvalidPath(format!("absolute path: {}", path)));
    }
    if path
        .split('/')
        .any(|component| component.is_empty() || component == "." || component == "..")
    {
        return Err(SyncError::InvalidPath(path.to_string()));
    }
    if path.contains('\0') {
        return Err(SyncError::InvalidPath("path contains NUL".to_string()));
    }
    Ok(())
}

/// Configuration for snapshot capture
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub excludes: ExcludeSet,
    /// Ask the host for content hashes alongside size and mtime
    pub with_hashes: bool,
    /// Upper bound on a single listing call
    pub timeout: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            excludes: ExcludeSet::empty(),
            with_hashes: true,
            timeout: Duration::from_secs(240),
        }
    }
}

/// Captures tree snapshots through a transport
pub struct Snapshotter {
    transport: Arc<dyn Transport>,
    limiter: HostLimiter,
    config: SnapshotConfig,
}

impl Snapshotter {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: HostLimiter,
        config: SnapshotConfig,
    ) -> Self {
        Self {
            transport,
            limiter,
            config,
        }
    }

    /// Capture the inventory of `root` on `host`
    pub async fn capture(&self, host: &str, root: &str) -> Result<TreeSnapshot> {
        debug!("Capturing snapshot of {}:{}", host, root);
        let _permits = self.limiter.acquire(&[host]).await?;

        let listing = tokio::time::timeout(
            self.config.timeout,
            self.transport
                .list_tree(host, root, self.config.with_hashes, self.config.timeout),
        )
        .await
        .map_err(|_| SyncError::Timeout {
            what: format!("snapshot of {}:{}", host, root),
            timeout: self.config.timeout,
        })?
        .map_err(|e| SyncError::from_transport(e, host, root))?;

        let mut snapshot = TreeSnapshot::new(host, root);
        let mut excluded = 0usize;
        let mut rejected = 0usize;

        for record in listing {
            if let Err(err) = validate_relative_path(&record.relative_path) {
                warn!("Skipping listing entry on {}:{}: {}", host, root, err);
                rejected += 1;
                continue;
            }

            if self.config.excludes.is_excluded(&record.relative_path) {
                trace!("Excluded {}:{}/{}", host, root, record.relative_path);
                excluded += 1;
                continue;
            }

            let path = record.relative_path.clone();
            if !snapshot.insert(record) {
                warn!("Duplicate listing entry for {}:{}/{}", host, root, path);
            }
        }

        info!(
            "Snapshot {}:{} captured: {} entries, {} excluded, {} rejected, {} bytes",
            host,
            root,
            snapshot.len(),
            excluded,
            rejected,
            snapshot.total_size()
        );

        Ok(snapshot)
    }
}
