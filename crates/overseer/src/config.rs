//! overseer.toml configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working single-node controller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use voidnet_orchestrator::{DEFAULT_MANIFEST_CANDIDATES, DispatchSettings, FetchSettings};
use voidnet_state::{DEFAULT_MAX_MANIFEST_BYTES, Validator};
use voidnet_uplink::{
    DEFAULT_AGENT_PORT, DEFAULT_MAX_RESPONSE_BYTES, UplinkClient, UplinkTimeouts,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub agent: AgentConfig,
    pub fetch: FetchConfig,
    pub validator: ValidatorConfig,
    pub dispatch: DispatchConfig,
    pub auth: AuthConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/voidnet"),
            db_file: "overseer.redb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Used when a satellite address carries no port.
    pub port: u16,
    pub deploy_timeout_secs: u64,
    pub logs_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub max_in_flight: usize,
    /// Largest agent response body accepted.
    pub max_response_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_AGENT_PORT,
            deploy_timeout_secs: 60,
            logs_timeout_secs: 30,
            probe_timeout_secs: 10,
            max_in_flight: 4,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Defaults to `<data_dir>/checkouts`.
    pub checkout_root: Option<PathBuf>,
    pub clone_timeout_secs: u64,
    pub git_binary: String,
    pub manifest_candidates: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            checkout_root: None,
            clone_timeout_secs: 300,
            git_binary: "git".to_string(),
            manifest_candidates: DEFAULT_MANIFEST_CANDIDATES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub strict: bool,
    pub max_manifest_bytes: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            strict: false,
            max_manifest_bytes: DEFAULT_MAX_MANIFEST_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mark_failed_capsules: bool,
    /// How long shutdown waits for running deploys and stops.
    pub drain_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mark_failed_capsules: false,
            drain_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub admin_username: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_username: "admin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
}

impl OverseerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OverseerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.db_file)
    }

    pub fn validator(&self) -> Validator {
        let base = if self.validator.strict {
            Validator::strict()
        } else {
            Validator::new()
        };
        base.with_max_bytes(self.validator.max_manifest_bytes)
    }

    pub fn uplink_timeouts(&self) -> UplinkTimeouts {
        UplinkTimeouts {
            dispatch: Duration::from_secs(self.agent.deploy_timeout_secs),
            logs: Duration::from_secs(self.agent.logs_timeout_secs),
            probe: Duration::from_secs(self.agent.probe_timeout_secs),
        }
    }

    pub fn uplink_client(&self) -> UplinkClient {
        UplinkClient::new(self.agent.port, self.uplink_timeouts())
            .with_max_response_bytes(self.agent.max_response_bytes)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            checkout_root: self
                .fetch
                .checkout_root
                .clone()
                .unwrap_or_else(|| self.storage.data_dir.join("checkouts")),
            git_binary: self.fetch.git_binary.clone(),
            clone_timeout: Duration::from_secs(self.fetch.clone_timeout_secs),
            manifest_candidates: self.fetch.manifest_candidates.clone(),
            max_manifest_bytes: self.validator.max_manifest_bytes,
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            mark_failed_capsules: self.dispatch.mark_failed_capsules,
            max_in_flight_per_satellite: self.agent.max_in_flight.max(1),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.drain_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: OverseerConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.agent.port, 8001);
        assert_eq!(config.auth.admin_username, "admin");
        assert_eq!(config.log.format, LogFormat::Text);
        assert!(!config.validator.strict);
        assert_eq!(config.fetch.manifest_candidates.len(), 4);

        let timeouts = config.uplink_timeouts();
        assert_eq!(timeouts.dispatch, Duration::from_secs(60));
        assert_eq!(timeouts.logs, Duration::from_secs(30));
        assert_eq!(timeouts.probe, Duration::from_secs(10));
        assert_eq!(config.dispatch_settings(), DispatchSettings::default());
        assert_eq!(
            config.uplink_client().max_response_bytes(),
            DEFAULT_MAX_RESPONSE_BYTES
        );
    }

    #[test]
    fn parse_partial_config() {
        let toml_str = r#"
[server]
port = 9000

[storage]
data_dir = "/srv/overseer"

[agent]
port = 7001
max_in_flight = 2
max_response_bytes = 65536

[validator]
strict = true
max_manifest_bytes = 4096

[dispatch]
mark_failed_capsules = true

[log]
format = "json"
"#;
        let config: OverseerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.db_path(), PathBuf::from("/srv/overseer/overseer.redb"));
        assert_eq!(config.agent.port, 7001);
        assert_eq!(config.uplink_client().max_response_bytes(), 65536);
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.validator().is_strict());

        let dispatch = config.dispatch_settings();
        assert!(dispatch.mark_failed_capsules);
        assert_eq!(dispatch.max_in_flight_per_satellite, 2);

        let fetch = config.fetch_settings();
        assert_eq!(fetch.checkout_root, PathBuf::from("/srv/overseer/checkouts"));
        assert_eq!(fetch.max_manifest_bytes, 4096);
    }

    #[test]
    fn explicit_checkout_root_wins() {
        let config: OverseerConfig =
            toml::from_str("[fetch]\ncheckout_root = \"/tmp/co\"\n").unwrap();
        assert_eq!(config.fetch_settings().checkout_root, PathBuf::from("/tmp/co"));
    }

    #[test]
    fn zero_in_flight_is_clamped() {
        let config: OverseerConfig = toml::from_str("[agent]\nmax_in_flight = 0\n").unwrap();
        assert_eq!(config.dispatch_settings().max_in_flight_per_satellite, 1);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(toml::from_str::<OverseerConfig>("[log]\nformat = \"xml\"\n").is_err());
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overseer.toml");
        std::fs::write(&path, "[auth]\nadmin_username = \"root\"\n").unwrap();
        let config = OverseerConfig::from_file(&path).unwrap();
        assert_eq!(config.auth.admin_username, "root");
    }
}
