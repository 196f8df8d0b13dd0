//! Snapshot diff computation
//!
//! Compares the source and target snapshots of one root and classifies every
//! path in their union into exactly one [`DiffAction`]. Entries come out
//! sorted by relative path so a plan reads the same every time it is
//! computed from the same state.
//!
//! Snapshots only carry empty directories as records, so a directory that
//! holds files on one side shows up there only through its descendants. A
//! path is compared by its shape on both sides before its content: a
//! directory record never replaces a populated directory, and a file never
//! silently replaces a directory (or the reverse).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{Result, SyncError};
use crate::snapshot::{FileRecord, TreeSnapshot};

/// Default clock-skew allowance between independently administered hosts
pub const DEFAULT_MTIME_TOLERANCE_SECS: i64 = 2;

/// Direction of reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Source is authoritative
    #[serde(alias = "a_to_b")]
    OneWay,
    /// Divergence on either side is surfaced as a conflict
    Bidirectional,
}

/// Classification of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    CopyToTarget,
    CopyToSource,
    DeleteOnTarget,
    DeleteOnSource,
    Conflict,
    Unchanged,
}

impl DiffAction {
    pub fn is_delete(&self) -> bool {
        matches!(self, DiffAction::DeleteOnTarget | DiffAction::DeleteOnSource)
    }
}

/// What a path is on one side, counting directories implied by descendants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Absent,
    File,
    Directory,
}

impl Shape {
    fn of(snapshot: &TreeSnapshot, relative_path: &str) -> Self {
        match snapshot.get(relative_path) {
            Some(record) if record.is_directory => Shape::Directory,
            Some(_) => Shape::File,
            None if snapshot.has_descendants(relative_path) => Shape::Directory,
            None => Shape::Absent,
        }
    }
}

/// One classified path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub root: String,
    pub relative_path: String,
    pub action: DiffAction,
    pub source_record: Option<FileRecord>,
    pub target_record: Option<FileRecord>,
}

impl DiffEntry {
    /// Bytes that would move if this entry is applied as planned
    pub fn transfer_size(&self) -> u64 {
        match self.action {
            DiffAction::CopyToTarget => self.source_record.as_ref().map_or(0, |r| r.size_bytes),
            DiffAction::CopyToSource => self.target_record.as_ref().map_or(0, |r| r.size_bytes),
            _ => 0,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.source_record
            .as_ref()
            .or(self.target_record.as_ref())
            .is_some_and(|r| r.is_directory)
    }
}

/// Per-root action counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSummary {
    pub root: String,
    pub copy_to_target: usize,
    pub copy_to_source: usize,
    pub delete_on_target: usize,
    pub delete_on_source: usize,
    pub conflicts: usize,
    pub unchanged: usize,
    pub bytes_to_transfer: u64,
}

impl RootSummary {
    pub fn from_entries(root: &str, entries: &[DiffEntry]) -> Self {
        let mut summary = RootSummary {
            root: root.to_string(),
            ..Default::default()
        };
        for entry in entries.iter().filter(|e| e.root == root) {
            match entry.action {
                DiffAction::CopyToTarget => summary.copy_to_target += 1,
                DiffAction::CopyToSource => summary.copy_to_source += 1,
                DiffAction::DeleteOnTarget => summary.delete_on_target += 1,
                DiffAction::DeleteOnSource => summary.delete_on_source += 1,
                DiffAction::Conflict => summary.conflicts += 1,
                DiffAction::Unchanged => summary.unchanged += 1,
            }
            summary.bytes_to_transfer += entry.transfer_size();
        }
        summary
    }

    /// Number of entries that are not `unchanged`
    pub fn pending(&self) -> usize {
        self.copy_to_target
            + self.copy_to_source
            + self.delete_on_target
            + self.delete_on_source
            + self.conflicts
    }
}

/// Classifies the union of two snapshots
#[derive(Debug, Clone)]
pub struct DiffPlanner {
    tolerance_secs: i64,
}

impl Default for DiffPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_MTIME_TOLERANCE_SECS)
    }
}

impl DiffPlanner {
    pub fn new(tolerance_secs: i64) -> Self {
        Self {
            tolerance_secs: tolerance_secs.max(0),
        }
    }

    /// Compute entries for one root.
    ///
    /// Both snapshots must describe the same root label.
    pub fn compute(
        &self,
        source: &TreeSnapshot,
        target: &TreeSnapshot,
        mode: SyncMode,
        allow_delete: bool,
    ) -> Result<Vec<DiffEntry>> {
        if source.root != target.root {
            return Err(SyncError::SnapshotMismatch {
                source_root: source.root.clone(),
                target_root: target.root.clone(),
            });
        }

        info!(
            "Computing diff for {}: {} ({} entries) -> {} ({} entries), {:?}",
            source.root,
            source.host,
            source.len(),
            target.host,
            target.len(),
            mode
        );

        let paths: BTreeSet<&String> =
            source.records.keys().chain(target.records.keys()).collect();

        let entries: Vec<DiffEntry> = paths
            .into_iter()
            .map(|path| {
                let source_record = source.get(path);
                let target_record = target.get(path);
                let action = match (Shape::of(source, path), Shape::of(target, path)) {
                    (Shape::File, Shape::Directory) | (Shape::Directory, Shape::File) => {
                        debug!("{}/{} is a file on one side only", source.root, path);
                        DiffAction::Conflict
                    }
                    (Shape::Directory, Shape::Directory) => DiffAction::Unchanged,
                    _ => self.classify(source_record, target_record, mode, allow_delete),
                };
                DiffEntry {
                    root: source.root.clone(),
                    relative_path: path.clone(),
                    action,
                    source_record: source_record.cloned(),
                    target_record: target_record.cloned(),
                }
            })
            .collect();

        let summary = RootSummary::from_entries(&source.root, &entries);
        debug!(
            "Diff for {}: {} pending, {} unchanged, {} bytes",
            source.root,
            summary.pending(),
            summary.unchanged,
            summary.bytes_to_transfer
        );

        Ok(entries)
    }

    fn classify(
        &self,
        source: Option<&FileRecord>,
        target: Option<&FileRecord>,
        mode: SyncMode,
        allow_delete: bool,
    ) -> DiffAction {
        match (source, target) {
            (Some(_), None) => DiffAction::CopyToTarget,
            (None, Some(_)) => match mode {
                SyncMode::Bidirectional => DiffAction::CopyToSource,
                SyncMode::OneWay if allow_delete => DiffAction::DeleteOnTarget,
                SyncMode::OneWay => DiffAction::Unchanged,
            },
            (Some(s), Some(t)) if s.same_content(t, self.tolerance_secs) => DiffAction::Unchanged,
            (Some(_), Some(_)) => match mode {
                SyncMode::OneWay => DiffAction::CopyToTarget,
                SyncMode::Bidirectional => DiffAction::Conflict,
            },
            // The union only contains paths present on at least one side
            (None, None) => DiffAction::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(host: &str, records: Vec<FileRecord>) -> TreeSnapshot {
        let mut snapshot = TreeSnapshot::new(host, "/data");
        for record in records {
            snapshot.insert(record);
        }
        snapshot
    }

    fn actions(entries: &[DiffEntry]) -> Vec<(&str, DiffAction)> {
        entries
            .iter()
            .map(|e| (e.relative_path.as_str(), e.action))
            .collect()
    }

    #[test]
    fn test_missing_on_target_is_copied() {
        let source = snapshot("a", vec![FileRecord::file("a.txt", 100, 1000)]);
        let target = snapshot("b", vec![]);

        let entries = DiffPlanner::default()
            .compute(&source, &target, SyncMode::OneWay, false)
            .unwrap();

        assert_eq!(actions(&entries), vec![("a.txt", DiffAction::CopyToTarget)]);
        assert_eq!(entries[0].transfer_size(), 100);
        assert_eq!(entries[0].root, "/data");
    }

    #[test]
    fn test_extra_on_target_depends_on_mode_and_delete_flag() {
        let source = snapshot("a", vec![]);
        let target = snapshot("b", vec![FileRecord::file("extra.txt", 5, 1000)]);
        let planner = DiffPlanner::default();

        let keep = planner
            .compute(&source, &target, SyncMode::OneWay, false)
            .unwrap();
        assert_eq!(actions(&keep), vec![("extra.txt", DiffAction::Unchanged)]);

        let delete = planner
            .compute(&source, &target, SyncMode::OneWay, true)
            .unwrap();
        assert_eq!(actions(&delete), vec![("extra.txt", DiffAction::DeleteOnTarget)]);

        let pull = planner
            .compute(&source, &target, SyncMode::Bidirectional, true)
            .unwrap();
        assert_eq!(actions(&pull), vec![("extra.txt", DiffAction::CopyToSource)]);
    }

    #[test]
    fn test_divergence_is_conflict_only_in_bidirectional() {
        let source = snapshot("a", vec![FileRecord::file("notes.txt", 10, 1000)]);
        let target = snapshot("b", vec![FileRecord::file("notes.txt", 12, 5000)]);
        let planner = DiffPlanner::default();

        let one_way = planner
            .compute(&source, &target, SyncMode::OneWay, false)
            .unwrap();
        assert_eq!(actions(&one_way), vec![("notes.txt", DiffAction::CopyToTarget)]);

        let both = planner
            .compute(&source, &target, SyncMode::Bidirectional, false)
            .unwrap();
        assert_eq!(actions(&both), vec![("notes.txt", DiffAction::Conflict)]);
        assert!(both[0].source_record.is_some());
        assert!(both[0].target_record.is_some());
    }

    #[test]
    fn test_skew_within_tolerance_is_unchanged() {
        let source = snapshot("a", vec![FileRecord::file("a.txt", 10, 1000)]);
        let target = snapshot("b", vec![FileRecord::file("a.txt", 10, 1002)]);

        let entries = DiffPlanner::new(2)
            .compute(&source, &target, SyncMode::Bidirectional, false)
            .unwrap();
        assert_eq!(actions(&entries), vec![("a.txt", DiffAction::Unchanged)]);

        let strict = DiffPlanner::new(0)
            .compute(&source, &target, SyncMode::Bidirectional, false)
            .unwrap();
        assert_eq!(actions(&strict), vec![("a.txt", DiffAction::Conflict)]);
    }

    #[test]
    fn test_entries_sorted_and_total() {
        let source = snapshot(
            "a",
            vec![
                FileRecord::file("z.txt", 1, 1),
                FileRecord::file("b/c.txt", 1, 1),
                FileRecord::directory("empty", 1),
                FileRecord::file("same.txt", 3, 7),
            ],
        );
        let target = snapshot(
            "b",
            vec![
                FileRecord::file("a.txt", 1, 1),
                FileRecord::file("same.txt", 3, 7),
            ],
        );

        let entries = DiffPlanner::default()
            .compute(&source, &target, SyncMode::OneWay, true)
            .unwrap();

        let paths: Vec<_> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b/c.txt", "empty", "same.txt", "z.txt"]);
        assert!(entries[2].is_directory());

        let summary = RootSummary::from_entries("/data", &entries);
        assert_eq!(summary.copy_to_target, 3);
        assert_eq!(summary.delete_on_target, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.pending(), 4);
    }

    #[test]
    fn test_empty_dir_never_replaces_populated_dir() {
        let source = snapshot("a", vec![FileRecord::directory("d", 1000)]);
        let target = snapshot("b", vec![FileRecord::file("d/keep.txt", 4, 1000)]);
        let planner = DiffPlanner::default();

        let one_way = planner
            .compute(&source, &target, SyncMode::OneWay, false)
            .unwrap();
        assert_eq!(
            actions(&one_way),
            vec![("d", DiffAction::Unchanged), ("d/keep.txt", DiffAction::Unchanged)]
        );

        let both = planner
            .compute(&source, &target, SyncMode::Bidirectional, false)
            .unwrap();
        assert_eq!(
            actions(&both),
            vec![("d", DiffAction::Unchanged), ("d/keep.txt", DiffAction::CopyToSource)]
        );

        // Mirrored: the empty directory sits on the target side
        let source = snapshot("a", vec![FileRecord::file("d/new.txt", 4, 1000)]);
        let target = snapshot("b", vec![FileRecord::directory("d", 1000)]);
        let mirrored = planner
            .compute(&source, &target, SyncMode::OneWay, true)
            .unwrap();
        assert_eq!(
            actions(&mirrored),
            vec![("d", DiffAction::Unchanged), ("d/new.txt", DiffAction::CopyToTarget)]
        );
    }

    #[test]
    fn test_file_against_directory_is_conflict_in_both_modes() {
        let planner = DiffPlanner::default();

        let file_over_tree = (
            snapshot("a", vec![FileRecord::file("d", 3, 1000)]),
            snapshot("b", vec![FileRecord::file("d/keep.txt", 4, 1000)]),
        );
        let file_over_empty_dir = (
            snapshot("a", vec![FileRecord::file("d", 3, 1000)]),
            snapshot("b", vec![FileRecord::directory("d", 1000)]),
        );
        let tree_over_file = (
            snapshot("a", vec![FileRecord::file("d/new.txt", 4, 1000)]),
            snapshot("b", vec![FileRecord::file("d", 3, 1000)]),
        );

        for (source, target) in [file_over_tree, file_over_empty_dir, tree_over_file] {
            for mode in [SyncMode::OneWay, SyncMode::Bidirectional] {
                for allow_delete in [false, true] {
                    let entries = planner
                        .compute(&source, &target, mode, allow_delete)
                        .unwrap();
                    let d = entries.iter().find(|e| e.relative_path == "d").unwrap();
                    assert_eq!(d.action, DiffAction::Conflict, "{:?}", mode);
                }
            }
        }
    }

    #[test]
    fn test_mismatched_roots_rejected() {
        let source = TreeSnapshot::new("a", "/data");
        let target = TreeSnapshot::new("b", "/other");

        let err = DiffPlanner::default()
            .compute(&source, &target, SyncMode::OneWay, false)
            .unwrap_err();
        assert!(matches!(err, SyncError::SnapshotMismatch { .. }));
    }

    #[test]
    fn test_mode_aliases() {
        let mode: SyncMode = serde_json::from_str("\"a_to_b\"").unwrap();
        assert_eq!(mode, SyncMode::OneWay);
        let mode: SyncMode = serde_json::from_str("\"bidirectional\"").unwrap();
        assert_eq!(mode, SyncMode::Bidirectional);
        assert!(serde_json::from_str::<SyncMode>("\"sideways\"").is_err());
    }
}
