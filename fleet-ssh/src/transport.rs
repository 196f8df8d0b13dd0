//! [`Transport`] over ssh and rsync
//!
//! Same-host copies run `cp -a` remotely. Cross-host copies are relayed
//! through a local staging directory: rsync pulls from the source host, then
//! pushes to a partial path on the target host which is moved into place
//! once complete. The target is never removed before its replacement is
//! fully present on the target host.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use fleet_sync::{shell_quote, CommandOutput, RemotePath, Transport, TransportError};

use crate::config::SshConfig;
use crate::runner::{SshRunner, SSH_CONNECTION_FAILED};

/// Suffix of the in-progress copy written next to the destination
const PARTIAL_SUFFIX: &str = ".fleetsync-partial";

fn parent_of(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

fn partial_path(path: &str) -> String {
    format!("{}{}", path.trim_end_matches('/'), PARTIAL_SUFFIX)
}

/// Reject paths `rm -rf` or `mv` must never be pointed at
fn checked_target(path: &str) -> Result<&str, TransportError> {
    let trimmed = path.trim_end_matches('/');
    if !path.starts_with('/') || trimmed.is_empty() || trimmed.split('/').any(|c| c == "..") {
        return Err(TransportError::CommandFailed {
            code: None,
            stderr: format!("refusing to modify unsafe path {:?}", path),
        });
    }
    Ok(trimmed)
}

/// Remote script copying `from` to `to` on one host
pub fn local_copy_command(from: &str, to: &str) -> Result<String, TransportError> {
    let to = checked_target(to)?;
    let partial = partial_path(to);
    Ok(format!(
        "mkdir -p -- {parent} && rm -rf -- {partial} && cp -a -- {from} {partial} && {swap}",
        parent = shell_quote(parent_of(to)),
        partial = shell_quote(&partial),
        from = shell_quote(from),
        swap = swap_command(to)?,
    ))
}

/// Remote script replacing `to` with its finished partial copy
pub fn swap_command(to: &str) -> Result<String, TransportError> {
    let to = checked_target(to)?;
    Ok(format!(
        "rm -rf -- {to} && mv -- {partial} {to}",
        to = shell_quote(to),
        partial = shell_quote(&partial_path(to)),
    ))
}

/// Remote script preparing a partial destination for an incoming rsync
pub fn prepare_command(to: &str) -> Result<String, TransportError> {
    let to = checked_target(to)?;
    Ok(format!(
        "mkdir -p -- {} && rm -rf -- {}",
        shell_quote(parent_of(to)),
        shell_quote(&partial_path(to)),
    ))
}

pub fn delete_command(at: &str) -> Result<String, TransportError> {
    let at = checked_target(at)?;
    Ok(format!("rm -rf -- {}", shell_quote(at)))
}

/// Transport that reaches hosts through the ssh client
pub struct SshTransport {
    runner: SshRunner,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self {
            runner: SshRunner::new(config),
        }
    }

    fn config(&self) -> &SshConfig {
        self.runner.config()
    }

    async fn rsync(
        &self,
        source: &str,
        destination: &str,
        host: &str,
    ) -> Result<(), TransportError> {
        let config = self.config();
        let args = [
            "-a".to_string(),
            "-s".to_string(),
            "-e".to_string(),
            config.rsync_shell(),
            "--".to_string(),
            source.to_string(),
            destination.to_string(),
        ];
        let output = self
            .runner
            .run_local(&config.rsync_binary, args, config.transfer_timeout)
            .await?;
        check_rsync(host, output)
    }

    async fn relay(&self, from: &RemotePath, to: &RemotePath) -> Result<(), TransportError> {
        let staging = tempfile::Builder::new().prefix("fleetsync-").tempdir()?;
        let source = from.path.trim_end_matches('/');
        let name = source.rsplit('/').next().unwrap_or(source);
        let payload = staging.path().join(name);

        // Without a trailing slash rsync recreates the source's last component
        self.rsync(
            &format!("{}:{}", from.host, source),
            &format!("{}/", staging.path().to_string_lossy()),
            &from.host,
        )
        .await?;

        let is_dir = tokio::fs::metadata(&payload).await?.is_dir();
        debug!("Staged {} in {:?} (dir={})", from, staging.path(), is_dir);

        let prepare = prepare_command(&to.path)?;
        self.runner
            .run_checked(&to.host, &prepare, self.config().command_timeout)
            .await?;

        let local = staged_source(&payload, is_dir);
        let partial = format!("{}:{}", to.host, partial_path(&to.path));
        self.rsync(&local, &partial, &to.host).await?;

        let swap = swap_command(&to.path)?;
        self.runner
            .run_checked(&to.host, &swap, self.config().command_timeout)
            .await?;
        Ok(())
    }
}

/// rsync copies a directory's contents only when the source ends in `/`
fn staged_source(payload: &Path, is_dir: bool) -> String {
    let path = payload.to_string_lossy().into_owned();
    if is_dir {
        format!("{}/", path)
    } else {
        path
    }
}

fn check_rsync(host: &str, output: CommandOutput) -> Result<(), TransportError> {
    match output.status {
        Some(0) => Ok(()),
        Some(SSH_CONNECTION_FAILED) => Err(TransportError::Unreachable {
            host: host.to_string(),
            reason: output.stderr.trim().to_string(),
        }),
        // "some files vanished" / "file not found" on the sending side
        Some(23) | Some(24) if output.stderr.contains("No such file") => {
            Err(TransportError::NotFound {
                host: host.to_string(),
                path: output.stderr.trim().to_string(),
            })
        }
        code => Err(TransportError::CommandFailed {
            code,
            stderr: output.stderr.trim().to_string(),
        }),
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        self.runner.run(host, command, timeout).await
    }

    async fn copy(&self, from: &RemotePath, to: &RemotePath) -> Result<(), TransportError> {
        if from.host == to.host {
            let script = local_copy_command(&from.path, &to.path)?;
            self.runner
                .run_checked(&from.host, &script, self.config().transfer_timeout)
                .await?;
        } else {
            self.relay(from, to).await?;
        }
        info!("Copied {} -> {}", from, to);
        Ok(())
    }

    async fn delete(&self, at: &RemotePath) -> Result<(), TransportError> {
        let script = delete_command(&at.path)?;
        self.runner
            .run_checked(&at.host, &script, self.config().command_timeout)
            .await?;
        info!("Deleted {}", at);
        Ok(())
    }
}
