//! Conflict arbitration for bidirectional plans
//!
//! Divergence is never settled by comparing timestamps; every conflicting
//! path waits for an explicit decision from the client. Decisions are a
//! closed set and must name a path from the plan's own conflict set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diff::{DiffAction, DiffEntry};
use crate::errors::{Result, SyncError};

/// Client decision for one conflicting path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDecision {
    /// Source wins
    KeepA,
    /// Target wins
    KeepB,
    /// Preserve the target copy under an alternate name, then take the source
    KeepBoth,
}

impl ConflictDecision {
    pub const ALL: [ConflictDecision; 3] = [
        ConflictDecision::KeepA,
        ConflictDecision::KeepB,
        ConflictDecision::KeepBoth,
    ];
}

/// A decision bound to a specific conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub root: String,
    pub relative_path: String,
    pub decision: ConflictDecision,
}

impl ConflictResolution {
    pub fn new(
        root: impl Into<String>,
        relative_path: impl Into<String>,
        decision: ConflictDecision,
    ) -> Self {
        Self {
            root: root.into(),
            relative_path: relative_path.into(),
            decision,
        }
    }
}

/// What the executor will actually do with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveAction {
    CopyToTarget,
    CopyToSource,
    DeleteOnTarget,
    DeleteOnSource,
    KeepBoth,
    Unchanged,
    /// Conflict without a decision; never applied
    Unresolved,
}

impl From<ConflictDecision> for EffectiveAction {
    fn from(decision: ConflictDecision) -> Self {
        match decision {
            ConflictDecision::KeepA => EffectiveAction::CopyToTarget,
            ConflictDecision::KeepB => EffectiveAction::CopyToSource,
            ConflictDecision::KeepBoth => EffectiveAction::KeepBoth,
        }
    }
}

/// Validated decisions keyed by (root, relative_path)
#[derive(Debug, Clone, Default)]
pub struct ConflictDecisions {
    by_path: HashMap<(String, String), ConflictDecision>,
}

impl ConflictDecisions {
    pub fn get(&self, root: &str, relative_path: &str) -> Option<ConflictDecision> {
        self.by_path
            .get(&(root.to_string(), relative_path.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Turns conflict entries plus client decisions into effective actions
pub struct ConflictResolver;

impl ConflictResolver {
    /// The conflict subset of a plan's entries
    pub fn conflicts(entries: &[DiffEntry]) -> Vec<DiffEntry> {
        entries
            .iter()
            .filter(|e| e.action == DiffAction::Conflict)
            .cloned()
            .collect()
    }

    /// Check client decisions against the plan's conflict set.
    ///
    /// A resolution naming a path that is not a conflict in this plan is
    /// rejected, as are two different decisions for the same path.
    pub fn validate(
        conflicts: &[DiffEntry],
        resolutions: &[ConflictResolution],
    ) -> Result<ConflictDecisions> {
        let mut decisions = ConflictDecisions::default();

        for resolution in resolutions {
            let known = conflicts.iter().any(|c| {
                c.action == DiffAction::Conflict
                    && c.root == resolution.root
                    && c.relative_path == resolution.relative_path
            });
            if !known {
                warn!(
                    "Rejecting resolution for non-conflict {}/{}",
                    resolution.root, resolution.relative_path
                );
                return Err(SyncError::UnknownConflict {
                    root: resolution.root.clone(),
                    path: resolution.relative_path.clone(),
                });
            }

            let key = (resolution.root.clone(), resolution.relative_path.clone());
            match decisions.by_path.get(&key) {
                Some(existing) if *existing != resolution.decision => {
                    return Err(SyncError::DuplicateResolution {
                        root: resolution.root.clone(),
                        path: resolution.relative_path.clone(),
                    });
                }
                _ => {
                    decisions.by_path.insert(key, resolution.decision);
                }
            }
        }

        debug!(
            "Validated {} decisions for {} conflicts",
            decisions.len(),
            conflicts.len()
        );
        Ok(decisions)
    }

    /// Effective action for an entry given the validated decisions
    pub fn effective_action(entry: &DiffEntry, decisions: &ConflictDecisions) -> EffectiveAction {
        match entry.action {
            DiffAction::CopyToTarget => EffectiveAction::CopyToTarget,
            DiffAction::CopyToSource => EffectiveAction::CopyToSource,
            DiffAction::DeleteOnTarget => EffectiveAction::DeleteOnTarget,
            DiffAction::DeleteOnSource => EffectiveAction::DeleteOnSource,
            DiffAction::Unchanged => EffectiveAction::Unchanged,
            DiffAction::Conflict => decisions
                .get(&entry.root, &entry.relative_path)
                .map_or(EffectiveAction::Unresolved, EffectiveAction::from),
        }
    }
}

/// Side-tagged name under which keep_both preserves the existing copy.
///
/// `notes/todo.txt` becomes `notes/todo.conflict-<side>-<stamp>.txt`; names
/// without an extension (or dotfiles) get the tag appended.
pub fn alternate_name(relative_path: &str, side: &str, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y%m%d%H%M%S");
    let side: String = side
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    let (dir, file) = match relative_path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, relative_path),
    };
    let renamed = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            format!("{}.conflict-{}-{}.{}", stem, side, stamp, ext)
        }
        _ => format!("{}.conflict-{}-{}", file, side, stamp),
    };

    match dir {
        Some(dir) => format!("{}/{}", dir, renamed),
        None => renamed,
    }
}
