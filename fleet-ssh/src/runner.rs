//! Bounded execution of ssh and local helper processes

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use fleet_sync::{CommandOutput, TransportError};

use crate::config::SshConfig;

/// Exit status ssh reserves for its own connection failures
pub const SSH_CONNECTION_FAILED: i32 = 255;

/// Spawns ssh and rsync with a hard timeout
#[derive(Debug, Clone)]
pub struct SshRunner {
    config: SshConfig,
}

impl SshRunner {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Arguments for running `remote_command` on `host`
    pub fn ssh_args(&self, host: &str, remote_command: &str) -> Vec<String> {
        let mut args = self.config.ssh_options();
        args.push("--".to_string());
        args.push(host.to_string());
        args.push(remote_command.to_string());
        args
    }

    /// Run a shell command on `host`.
    ///
    /// A non-zero remote exit is returned as output for the caller to
    /// interpret; only ssh's own connection failure becomes an error.
    pub async fn run(
        &self,
        host: &str,
        remote_command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        let output = self
            .run_local(&self.config.ssh_binary, self.ssh_args(host, remote_command), timeout)
            .await?;

        if output.status == Some(SSH_CONNECTION_FAILED) {
            warn!("ssh to {} failed: {}", host, output.stderr.trim());
            return Err(TransportError::Unreachable {
                host: host.to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run a remote command and treat any non-zero exit as failure
    pub async fn run_checked(
        &self,
        host: &str,
        remote_command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        let output = self.run(host, remote_command, timeout).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(TransportError::CommandFailed {
                code: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Run a local program, killing it if `timeout` elapses
    pub async fn run_local<I, S>(
        &self,
        program: impl AsRef<OsStr>,
        args: I,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Spawning {:?} (timeout {:?})", program, timeout);
        let output = match tokio::time::timeout(timeout, command.output()).await {
            Err(_) => {
                warn!("{:?} timed out after {:?}", program, timeout);
                return Err(TransportError::Timeout(timeout));
            }
            Ok(output) => output?,
        };

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
