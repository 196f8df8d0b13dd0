//! In-memory transport for tests and dry runs
//!
//! Each host is a flat map from absolute path to entry. Parent directories
//! are implicit; an explicit directory entry only exists for directories
//! created through [`MemoryTransport::put_dir`] or copied from one. Faults
//! (unreachable hosts, failing paths, slow hosts) are injected per host.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::snapshot::FileRecord;
use crate::transport::{CommandOutput, RemotePath, Transport, TransportError};

#[derive(Debug, Clone)]
struct MemoryEntry {
    content: Vec<u8>,
    mtime: i64,
    is_directory: bool,
}

/// One recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Run { host: String, command: String },
    List { host: String, root: String },
    Copy { from: RemotePath, to: RemotePath },
    Delete { at: RemotePath },
}

#[derive(Default)]
struct MemoryState {
    hosts: HashMap<String, BTreeMap<String, MemoryEntry>>,
    unreachable: HashSet<String>,
    failing: HashSet<RemotePath>,
    delays: HashMap<String, Duration>,
    scripted: HashMap<(String, String), CommandOutput>,
    calls: Vec<TransportCall>,
    in_flight: HashMap<String, usize>,
    peak_in_flight: HashMap<String, usize>,
}

/// Scriptable [`Transport`] backed by per-host path maps
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

fn is_under(path: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    path.len() > root.len() + 1 && path.starts_with(root) && path.as_bytes()[root.len()] == b'/'
}

fn is_at_or_under(path: &str, root: &str) -> bool {
    path == root.trim_end_matches('/') || is_under(path, root)
}

/// Nearest ancestor of `path` that is a file, which `mkdir -p` would trip on
fn file_ancestor(tree: &BTreeMap<String, MemoryEntry>, path: &str) -> Option<String> {
    let mut current = path.trim_end_matches('/');
    while let Some((parent, _)) = current.rsplit_once('/') {
        if parent.is_empty() {
            break;
        }
        if tree.get(parent).is_some_and(|e| !e.is_directory) {
            return Some(parent.to_string());
        }
        current = parent;
    }
    None
}

/// Counts a call against its hosts until dropped
struct InFlight<'a> {
    transport: &'a MemoryTransport,
    hosts: Vec<String>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.transport.lock();
        for host in &self.hosts {
            if let Some(count) = state.in_flight.get_mut(host) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a host with no files
    pub fn add_host(&self, host: &str) {
        self.lock().hosts.entry(host.to_string()).or_default();
    }

    pub fn put_file(&self, host: &str, path: &str, content: &[u8], mtime: i64) {
        self.lock().hosts.entry(host.to_string()).or_default().insert(
            path.to_string(),
            MemoryEntry {
                content: content.to_vec(),
                mtime,
                is_directory: false,
            },
        );
    }

    pub fn put_dir(&self, host: &str, path: &str, mtime: i64) {
        self.lock().hosts.entry(host.to_string()).or_default().insert(
            path.trim_end_matches('/').to_string(),
            MemoryEntry {
                content: Vec::new(),
                mtime,
                is_directory: true,
            },
        );
    }

    /// Content of a file, `None` for directories and missing paths
    pub fn read(&self, host: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .hosts
            .get(host)?
            .get(path)
            .filter(|e| !e.is_directory)
            .map(|e| e.content.clone())
    }

    pub fn exists(&self, host: &str, path: &str) -> bool {
        self.lock()
            .hosts
            .get(host)
            .is_some_and(|tree| tree.keys().any(|p| is_at_or_under(p, path)))
    }

    /// Explicit entries strictly under `root`, relative to it
    pub fn relative_paths(&self, host: &str, root: &str) -> Vec<String> {
        let root = root.trim_end_matches('/');
        self.lock()
            .hosts
            .get(host)
            .map(|tree| {
                tree.keys()
                    .filter(|p| is_under(p, root))
                    .map(|p| p[root.len() + 1..].to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        let mut state = self.lock();
        if unreachable {
            state.unreachable.insert(host.to_string());
        } else {
            state.unreachable.remove(host);
        }
    }

    /// Make every copy or delete touching `path` fail
    pub fn fail_path(&self, path: RemotePath) {
        self.lock().failing.insert(path);
    }

    /// Delay every call that touches `host`
    pub fn set_delay(&self, host: &str, delay: Duration) {
        self.lock().delays.insert(host.to_string(), delay);
    }

    /// Canned output for `run(host, command)`
    pub fn script(&self, host: &str, command: &str, output: CommandOutput) {
        self.lock()
            .scripted
            .insert((host.to_string(), command.to_string()), output);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn copies(&self) -> Vec<TransportCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, TransportCall::Copy { .. }))
            .collect()
    }

    pub fn deletes(&self) -> Vec<TransportCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, TransportCall::Delete { .. }))
            .collect()
    }

    /// Most calls ever in flight at once against `host`
    pub fn peak_in_flight(&self, host: &str) -> usize {
        self.lock().peak_in_flight.get(host).copied().unwrap_or(0)
    }

    /// Record the call, apply the host delay and check reachability
    async fn enter(&self, call: TransportCall, hosts: &[&str]) -> Result<(), TransportError> {
        let mut distinct: Vec<String> = hosts.iter().map(|h| h.to_string()).collect();
        distinct.sort();
        distinct.dedup();

        let delay = {
            let mut state = self.lock();
            trace!("Memory transport call: {:?}", call);
            state.calls.push(call);
            for host in &distinct {
                let count = state.in_flight.entry(host.clone()).or_default();
                *count += 1;
                let count = *count;
                let peak = state.peak_in_flight.entry(host.clone()).or_default();
                *peak = (*peak).max(count);
            }
            hosts
                .iter()
                .filter_map(|h| state.delays.get(*h).copied())
                .max()
        };
        let _in_flight = InFlight {
            transport: self,
            hosts: distinct,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        for host in hosts {
            if state.unreachable.contains(*host) || !state.hosts.contains_key(*host) {
                return Err(TransportError::Unreachable {
                    host: host.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_failing(&self, paths: &[&RemotePath]) -> Result<(), TransportError> {
        let state = self.lock();
        match paths.iter().find(|p| state.failing.contains(**p)) {
            Some(path) => Err(TransportError::CommandFailed {
                code: Some(1),
                stderr: format!("injected failure at {}", path),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn run(
        &self,
        host: &str,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        self.enter(
            TransportCall::Run {
                host: host.to_string(),
                command: command.to_string(),
            },
            &[host],
        )
        .await?;

        let state = self.lock();
        Ok(state
            .scripted
            .get(&(host.to_string(), command.to_string()))
            .cloned()
            .unwrap_or_else(|| CommandOutput {
                status: Some(127),
                stdout: String::new(),
                stderr: "command not scripted".to_string(),
            }))
    }

    async fn copy(&self, from: &RemotePath, to: &RemotePath) -> Result<(), TransportError> {
        self.enter(
            TransportCall::Copy {
                from: from.clone(),
                to: to.clone(),
            },
            &[from.host.as_str(), to.host.as_str()],
        )
        .await?;
        self.check_failing(&[from, to])?;

        let mut state = self.lock();
        let source_root = from.path.trim_end_matches('/');
        let moved: Vec<(String, MemoryEntry)> = state
            .hosts
            .get(&from.host)
            .map(|tree| {
                tree.iter()
                    .filter(|(p, _)| is_at_or_under(p, source_root))
                    .map(|(p, e)| (format!("{}{}", to.path, &p[source_root.len()..]), e.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if moved.is_empty() {
            return Err(TransportError::NotFound {
                host: from.host.clone(),
                path: from.path.clone(),
            });
        }

        let target = state.hosts.entry(to.host.clone()).or_default();
        if let Some(blocker) = file_ancestor(target, &to.path) {
            return Err(TransportError::CommandFailed {
                code: Some(1),
                stderr: format!("{}:{}: Not a directory", to.host, blocker),
            });
        }
        target.retain(|p, _| !is_at_or_under(p, &to.path));
        target.extend(moved);
        Ok(())
    }

    async fn delete(&self, at: &RemotePath) -> Result<(), TransportError> {
        self.enter(TransportCall::Delete { at: at.clone() }, &[&at.host])
            .await?;
        self.check_failing(&[at])?;

        if let Some(tree) = self.lock().hosts.get_mut(&at.host) {
            tree.retain(|p, _| !is_at_or_under(p, &at.path));
        }
        Ok(())
    }

    async fn list_tree(
        &self,
        host: &str,
        root: &str,
        with_hashes: bool,
        _timeout: Duration,
    ) -> Result<Vec<FileRecord>, TransportError> {
        self.enter(
            TransportCall::List {
                host: host.to_string(),
                root: root.to_string(),
            },
            &[host],
        )
        .await?;

        let state = self.lock();
        let root = root.trim_end_matches('/');
        let tree = state.hosts.get(host).ok_or_else(|| TransportError::NotFound {
            host: host.to_string(),
            path: root.to_string(),
        })?;
        if !tree.keys().any(|p| is_at_or_under(p, root)) {
            return Err(TransportError::NotFound {
                host: host.to_string(),
                path: root.to_string(),
            });
        }

        let mut records = Vec::new();
        for (path, entry) in tree.iter().filter(|(p, _)| is_under(p, root)) {
            let relative = &path[root.len() + 1..];
            if entry.is_directory {
                if tree.keys().any(|p| is_under(p, path)) {
                    continue;
                }
                records.push(FileRecord::directory(relative, entry.mtime));
            } else {
                let record = FileRecord::file(relative, entry.content.len() as u64, entry.mtime);
                records.push(if with_hashes {
                    record.with_hash(blake3::hash(&entry.content).to_hex().to_string())
                } else {
                    record
                });
            }
        }
        Ok(records)
    }
}
