use std::path::PathBuf;
use std::time::Duration;

use fleet_sync::shell_quote;

/// ssh/rsync invocation settings
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// ssh client binary
    pub ssh_binary: PathBuf,

    /// rsync binary, used for cross-host copies
    pub rsync_binary: PathBuf,

    /// Private key passed with `-i`; the agent and default keys are ignored
    pub key_path: Option<PathBuf>,

    /// TCP connect timeout handed to ssh
    pub connect_timeout: Duration,

    /// Interval between keep-alive messages
    pub server_alive_interval: Duration,

    /// Missed keep-alives before ssh gives up
    pub server_alive_count_max: u32,

    /// Bound on short housekeeping commands (mkdir, mv, rm)
    pub command_timeout: Duration,

    /// Bound on one rsync leg of a cross-host copy
    pub transfer_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            ssh_binary: PathBuf::from("ssh"),
            rsync_binary: PathBuf::from("rsync"),
            key_path: None,
            connect_timeout: Duration::from_secs(10),
            server_alive_interval: Duration::from_secs(10),
            server_alive_count_max: 2,
            command_timeout: Duration::from_secs(60),
            transfer_timeout: Duration::from_secs(600),
        }
    }
}

impl SshConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn ssh_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.ssh_binary = binary.into();
        self
    }

    pub fn rsync_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.rsync_binary = binary.into();
        self
    }

    /// Options placed before the host on every ssh invocation
    pub fn ssh_options(&self) -> Vec<String> {
        let mut options = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.server_alive_interval.as_secs()),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", self.server_alive_count_max),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(key) = &self.key_path {
            options.push("-i".to_string());
            options.push(key.to_string_lossy().into_owned());
        }
        options
    }

    /// Remote shell string for `rsync -e`
    pub fn rsync_shell(&self) -> String {
        std::iter::once(self.ssh_binary.to_string_lossy().into_owned())
            .chain(self.ssh_options())
            .map(|part| shell_quote(&part))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
