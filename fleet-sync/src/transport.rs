//! Transport capability consumed by the sync engine
//!
//! Every remote effect the engine has goes through [`Transport`]: running a
//! bounded command, copying a path from one host to another and deleting a
//! path. Tree listing has a default implementation on top of `run` so a
//! shell-backed transport only needs the three primitives, while scripted
//! transports can answer listings directly.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::FileRecord;

/// Exit status the listing script uses when the root directory is missing
pub const ROOT_MISSING_EXIT: i32 = 3;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Host unreachable: {host}: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("Path not found: {host}:{path}")]
    NotFound { host: String, path: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Command failed (exit {code:?}): {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("Malformed listing output: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured output of a remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// An absolute path on a specific host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    pub host: String,
    pub path: String,
}

impl RemotePath {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    /// Join a root and a root-relative path on `host`
    pub fn under_root(host: &str, root: &str, relative: &str) -> Self {
        Self::new(host, join_root(root, relative))
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.path)
    }
}

/// Join `relative` onto `root` with exactly one separator
pub fn join_root(root: &str, relative: &str) -> String {
    let root = root.trim_end_matches('/');
    if relative.is_empty() {
        return root.to_string();
    }
    format!("{}/{}", root, relative.trim_start_matches('/'))
}

/// Quote a string for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell script that prints an inventory of `root`.
///
/// Records are NUL-terminated so any byte a filename may hold, newlines
/// included, survives. Fields are tab-separated: `f<TAB>size<TAB>mtime<TAB>path`
/// for files, `d<TAB>0<TAB>mtime<TAB>path` for empty directories and, when
/// hashing is enabled, `h<TAB>sha256<TAB>path` for every file.
pub fn listing_command(root: &str, with_hashes: bool) -> String {
    let mut script = format!(
        "cd -- {} 2>/dev/null || exit {}\n\
         find . -mindepth 1 \\( -type f -printf 'f\\t%s\\t%T@\\t%P\\0' \\) \
         -o \\( -type d -empty -printf 'd\\t0\\t%T@\\t%P\\0' \\)\n",
        shell_quote(root),
        ROOT_MISSING_EXIT
    );
    if with_hashes {
        // -z ends records with NUL and turns off sha256sum's name escaping
        script.push_str(
            "find . -mindepth 1 -type f -printf '%P\\0' | xargs -0r sha256sum -z -- \
             | sed -z -e 's/^\\([0-9a-f]\\{64\\}\\)  /h\\t\\1\\t/'\n",
        );
    }
    script
}

/// Parse the output of [`listing_command`]
pub fn parse_listing(stdout: &str) -> Result<Vec<FileRecord>, TransportError> {
    let mut records: BTreeMap<String, FileRecord> = BTreeMap::new();
    let mut hashes: Vec<(String, String)> = Vec::new();

    for line in stdout.split('\0') {
        if line.is_empty() {
            continue;
        }
        let (tag, rest) = line
            .split_once('\t')
            .ok_or_else(|| TransportError::Malformed(line.to_string()))?;

        match tag {
            "f" | "d" => {
                let mut fields = rest.splitn(3, '\t');
                let (Some(size), Some(mtime), Some(path)) =
                    (fields.next(), fields.next(), fields.next())
                else {
                    return Err(TransportError::Malformed(line.to_string()));
                };
                let size: u64 = size
                    .parse()
                    .map_err(|_| TransportError::Malformed(line.to_string()))?;
                let mtime = parse_mtime(mtime)
                    .ok_or_else(|| TransportError::Malformed(line.to_string()))?;
                let record = if tag == "d" {
                    FileRecord::directory(path, mtime)
                } else {
                    FileRecord::file(path, size, mtime)
                };
                records.insert(path.to_string(), record);
            }
            "h" => {
                let (hash, path) = rest
                    .split_once('\t')
                    .ok_or_else(|| TransportError::Malformed(line.to_string()))?;
                hashes.push((path.to_string(), hash.to_string()));
            }
            _ => return Err(TransportError::Malformed(line.to_string())),
        }
    }

    for (path, hash) in hashes {
        if let Some(record) = records.get_mut(&path) {
            record.content_hash = Some(hash);
        }
    }

    Ok(records.into_values().collect())
}

/// `find -printf %T@` prints fractional seconds; records keep whole seconds
fn parse_mtime(raw: &str) -> Option<i64> {
    let whole = raw.split('.').next()?;
    whole.parse().ok()
}

/// Remote operations the engine needs from a host connection layer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run `command` on `host`, giving up after `timeout`
    async fn run(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError>;

    /// Copy a file or subtree, creating missing parent directories at `to`
    async fn copy(&self, from: &RemotePath, to: &RemotePath) -> Result<(), TransportError>;

    /// Delete a file or subtree
    async fn delete(&self, at: &RemotePath) -> Result<(), TransportError>;

    /// List every file and empty directory under `root` on `host`
    async fn list_tree(
        &self,
        host: &str,
        root: &str,
        with_hashes: bool,
        timeout: Duration,
    ) -> Result<Vec<FileRecord>, TransportError> {
        let output = self
            .run(host, &listing_command(root, with_hashes), timeout)
            .await?;

        match output.status {
            Some(0) => parse_listing(&output.stdout),
            Some(ROOT_MISSING_EXIT) => Err(TransportError::NotFound {
                host: host.to_string(),
                path: root.to_string(),
            }),
            code => Err(TransportError::CommandFailed {
                code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing_with_hashes() {
        let stdout = "f\t100\t1700000000.5000000000\ta.txt\0\
                      d\t0\t1700000001.0000000000\tempty\0\
                      f\t7\t1700000002.0\tsub/b.txt\0\
                      h\tabc123\ta.txt\0";

        let records = parse_listing(stdout).unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].relative_path, "a.txt");
        assert_eq!(records[0].size_bytes, 100);
        assert_eq!(records[0].mtime, 1_700_000_000);
        assert_eq!(records[0].content_hash.as_deref(), Some("abc123"));

        assert!(records[1].is_directory);
        assert_eq!(records[1].relative_path, "empty");

        assert_eq!(records[2].relative_path, "sub/b.txt");
        assert!(records[2].content_hash.is_none());
    }

    #[test]
    fn test_parse_listing_rejects_garbage() {
        assert!(matches!(
            parse_listing("x\tgarbage"),
            Err(TransportError::Malformed(_))
        ));
        assert!(matches!(
            parse_listing("f\tnot-a-number\t1\ta.txt"),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn test_odd_names_keep_their_bytes() {
        let stdout = "f\t1\t2\tweird\tname.txt\0\
                      f\t3\t2\tline\nbreak.txt\0\
                      f\t4\t2\tback\\slash.txt\0\
                      h\tfeed\tline\nbreak.txt\0\
                      h\tbeef\tback\\slash.txt\0";

        let records = parse_listing(stdout).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(names, vec!["back\\slash.txt", "line\nbreak.txt", "weird\tname.txt"]);
        assert_eq!(records[0].content_hash.as_deref(), Some("beef"));
        assert_eq!(records[1].content_hash.as_deref(), Some("feed"));
        assert_eq!(records[1].size_bytes, 3);
    }

    #[test]
    fn test_join_and_quote() {
        assert_eq!(join_root("/data/", "a/b.txt"), "/data/a/b.txt");
        assert_eq!(join_root("/data", ""), "/data");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");

        let path = RemotePath::under_root("host-a", "/data", "x.txt");
        assert_eq!(path.to_string(), "host-a:/data/x.txt");
    }

    #[test]
    fn test_listing_command_quotes_root() {
        let cmd = listing_command("/root/my files", true);
        assert!(cmd.contains("'/root/my files'"));
        assert!(cmd.contains("sha256sum -z"));
        assert!(cmd.contains("%P\\0"));
        assert!(!listing_command("/data", false).contains("sha256sum"));
    }
}
