use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use fleet_ssh::SshConfig;
use fleet_sync::{ExcludeSet, DEFAULT_MTIME_TOLERANCE_SECS, DEFAULT_PLAN_TTL_SECS};

/// A host in the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Operator-facing label, also used to tag keep_both copies
    pub name: String,
    /// Destination handed to ssh (`user@host` or an alias)
    pub ssh_host: String,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, ssh_host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ssh_host: ssh_host.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub roots: Vec<String>,
    pub excludes: Vec<String>,
    pub allow_delete: bool,
    pub hash_contents: bool,
    pub mtime_tolerance_secs: i64,
    pub plan_ttl_secs: i64,
    pub snapshot_timeout_secs: u64,
    pub transfer_timeout_secs: u64,
    pub max_concurrency_per_host: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            roots: vec![
                "/root/files".to_string(),
                "/root/.openclaw/workspace".to_string(),
            ],
            excludes: vec![
                "**/.env".to_string(),
                "**/credentials/**".to_string(),
                "**/openclaw.json".to_string(),
                "**/auth-profiles.json".to_string(),
                "**/.codex/**".to_string(),
            ],
            allow_delete: false,
            hash_contents: true,
            mtime_tolerance_secs: DEFAULT_MTIME_TOLERANCE_SECS,
            plan_ttl_secs: DEFAULT_PLAN_TTL_SECS,
            snapshot_timeout_secs: 240,
            transfer_timeout_secs: 600,
            max_concurrency_per_host: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub key_path: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            key_path: None,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Code an operator presents to obtain a confirm ticket. Unset disables
    /// ticket issuing, and with it every confirmed action.
    pub operation_confirm_code: Option<String>,
    pub confirm_ttl_secs: u64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            operation_confirm_code: None,
            confirm_ttl_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub bind: SocketAddr,
    /// Interval of the expired plan/ticket sweep
    pub eviction_interval_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 7703)),
            eviction_interval_secs: 60,
        }
    }
}

fn default_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::new("server-1", "root@203.0.113.10"),
        ServerConfig::new("server-2", "root@203.0.113.11"),
    ]
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_servers")]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub api: ApiSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            sync: SyncSettings::default(),
            ssh: SshSettings::default(),
            security: SecuritySettings::default(),
            api: ApiSettings::default(),
        }
    }
}

impl Config {
    /// Load and validate `path`, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Config::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        info!(
            "Loaded config from {} ({} servers, {} roots)",
            path.display(),
            config.servers.len(),
            config.sync.roots.len()
        );
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            bail!("servers must not be empty");
        }

        let mut names = HashSet::new();
        let mut hosts = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() || server.ssh_host.trim().is_empty() {
                bail!("servers[].name and servers[].ssh_host are required");
            }
            if !names.insert(server.name.as_str()) {
                bail!("servers[].name must be unique: {}", server.name);
            }
            if !hosts.insert(server.ssh_host.as_str()) {
                bail!("servers[].ssh_host must be unique: {}", server.ssh_host);
            }
        }

        if let Some(root) = self.sync.roots.iter().find(|r| !r.starts_with('/')) {
            bail!("sync.roots must be absolute paths: {}", root);
        }
        ExcludeSet::new(&self.sync.excludes).context("sync.excludes")?;

        if self.sync.mtime_tolerance_secs < 0 {
            bail!("sync.mtime_tolerance_secs must not be negative");
        }
        if self.sync.plan_ttl_secs <= 0 {
            bail!("sync.plan_ttl_secs must be positive");
        }
        if self.sync.snapshot_timeout_secs == 0 || self.sync.transfer_timeout_secs == 0 {
            bail!("sync timeouts must be positive");
        }
        if self.sync.max_concurrency_per_host == 0 {
            bail!("sync.max_concurrency_per_host must be at least 1");
        }
        if self.ssh.connect_timeout_secs == 0 {
            bail!("ssh.connect_timeout_secs must be positive");
        }
        if self.security.confirm_ttl_secs == 0 {
            bail!("security.confirm_ttl_secs must be positive");
        }
        if self.api.eviction_interval_secs == 0 {
            bail!("api.eviction_interval_secs must be positive");
        }
        Ok(())
    }

    /// Find a server by name or ssh_host
    pub fn server(&self, key: &str) -> Option<&ServerConfig> {
        self.servers
            .iter()
            .find(|s| s.name == key || s.ssh_host == key)
    }

    pub fn exclude_set(&self) -> fleet_sync::Result<ExcludeSet> {
        ExcludeSet::new(&self.sync.excludes)
    }

    pub fn ssh_config(&self) -> SshConfig {
        let mut config = SshConfig::new()
            .connect_timeout(Duration::from_secs(self.ssh.connect_timeout_secs))
            .transfer_timeout(self.transfer_timeout());
        if let Some(key) = &self.ssh.key_path {
            config = config.key_path(key);
        }
        config
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.snapshot_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.transfer_timeout_secs)
    }
}

/// Default config location, `~/.fleetsync/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Home directory not found")?;
    Ok(home.join(".fleetsync").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::from_toml(
            r#"
            [[servers]]
            name = "alpha"
            ssh_host = "root@10.0.0.1"

            [[servers]]
            name = "beta"
            ssh_host = "root@10.0.0.2"
            "#,
        )
        .unwrap();

        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.sync.roots.len(), 2);
        assert!(config.sync.excludes.contains(&"**/.env".to_string()));
        assert!(!config.sync.allow_delete);
        assert_eq!(config.sync.plan_ttl_secs, 900);
        assert_eq!(config.security.confirm_ttl_secs, 120);
        assert_eq!(config.api.bind.port(), 7703);
        assert!(config.security.operation_confirm_code.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [sync]
            allow_delete = true
            roots = ["/srv/a"]

            [security]
            operation_confirm_code = "1234"
            "#,
        )
        .unwrap();

        assert!(config.sync.allow_delete);
        assert_eq!(config.sync.roots, vec!["/srv/a".to_string()]);
        assert_eq!(config.sync.max_concurrency_per_host, 4);
        assert_eq!(config.servers, default_servers());
        assert_eq!(config.security.operation_confirm_code.as_deref(), Some("1234"));
    }

    #[test]
    fn test_duplicate_servers_rejected() {
        let err = Config::from_toml(
            r#"
            [[servers]]
            name = "alpha"
            ssh_host = "root@10.0.0.1"

            [[servers]]
            name = "beta"
            ssh_host = "root@10.0.0.1"
            "#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("ssh_host must be unique"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml("[sync]\nexcludes = [\"a[\"]").is_err());
        assert!(Config::from_toml("[sync]\nroots = [\"relative\"]").is_err());
        assert!(Config::from_toml("[sync]\nmax_concurrency_per_host = 0").is_err());
        assert!(Config::from_toml("servers = []").is_err());
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let missing = Config::load(&path).unwrap();
        assert_eq!(missing.servers.len(), 2);

        std::fs::write(
            &path,
            "[ssh]\nkey_path = \"/keys/id_ed25519\"\nconnect_timeout_secs = 5\n",
        )
        .unwrap();
        let loaded = Config::load(&path).unwrap();
        let options = loaded.ssh_config().ssh_options();
        assert!(options.contains(&"/keys/id_ed25519".to_string()));
        assert!(options.contains(&"ConnectTimeout=5".to_string()));
    }

    #[test]
    fn test_server_lookup_by_name_or_host() {
        let config = Config::default();
        assert_eq!(config.server("server-2").unwrap().ssh_host, "root@203.0.113.11");
        assert_eq!(config.server("root@203.0.113.10").unwrap().name, "server-1");
        assert!(config.server("server-3").is_none());
    }
}
