//! `chainpulse.yaml` loading and validation.
//!
//! ```yaml
//! node:
//!   url: http://127.0.0.1:8332
//!   user: rpc
//! electrum:
//!   addr: 127.0.0.1:50001
//! polling:
//!   tip_interval_ms: 5000
//! circuit_breaker:
//!   failure_threshold: 5
//!   cooldown_ms: 30000
//! log:
//!   level: info
//!   components:
//!     chainpulse-hub: debug
//! ```
//!
//! Every section is optional and falls back to its defaults.

use std::path::{Path, PathBuf};

use chainpulse_bootstrap::{BootstrapConfig, HealthMonitorConfig};
use chainpulse_core::CircuitBreakerConfig;
use chainpulse_hub::{HubConfig, PollingConfig};
use chainpulse_rpc::{ElectrumConfig, NodeRpcConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainPulseConfig {
    pub node: NodeRpcConfig,
    pub electrum: ElectrumConfig,
    pub polling: PollingConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub bootstrap: BootstrapConfig,
    pub health: HealthMonitorConfig,
    pub hub: HubConfig,
    pub log: LogConfig,
}

/// Command-line / environment values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub node_url: Option<String>,
    pub node_user: Option<String>,
    pub node_password: Option<String>,
    pub electrum_addr: Option<String>,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl ChainPulseConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.node_url {
            self.node.url = url;
        }
        if overrides.node_user.is_some() {
            self.node.user = overrides.node_user;
        }
        if overrides.node_password.is_some() {
            self.node.password = overrides.node_password;
        }
        if let Some(addr) = overrides.electrum_addr {
            self.electrum.addr = addr;
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
        if overrides.json_logs {
            self.log.json = true;
        }
    }

    /// Reject settings that would make a component spin or never act.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.node.url.trim().is_empty() {
            problems.push("node.url must not be empty".to_string());
        }
        if self.electrum.addr.trim().is_empty() {
            problems.push("electrum.addr must not be empty".to_string());
        }
        problems.extend(
            self.polling
                .zero_intervals()
                .into_iter()
                .map(|field| format!("polling.{field} must be > 0")),
        );
        let nonzero = [
            ("circuit_breaker.failure_threshold", u64::from(self.circuit_breaker.failure_threshold)),
            ("circuit_breaker.cooldown_ms", self.circuit_breaker.cooldown_ms),
            ("bootstrap.snapshot_ttl_ms", self.bootstrap.snapshot_ttl_ms),
            ("bootstrap.data_timeout_ms", self.bootstrap.data_timeout_ms),
            ("health.interval_ms", self.health.interval_ms),
            ("health.probe_timeout_ms", self.health.probe_timeout_ms),
            ("hub.subscriber_buffer", self.hub.subscriber_buffer as u64),
            ("node.request_timeout_ms", self.node.request_timeout_ms),
            ("electrum.timeout_ms", self.electrum.timeout_ms),
        ];
        problems.extend(
            nonzero
                .into_iter()
                .filter(|(_, v)| *v == 0)
                .map(|(field, _)| format!("{field} must be > 0")),
        );
        if self.node.name == self.electrum.name {
            problems.push(format!(
                "node.name and electrum.name must differ (both are {:?})",
                self.node.name
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = ChainPulseConfig::from_yaml("{}").unwrap();
        assert_eq!(config.polling.tip_interval_ms, 5_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.hub.subscriber_buffer, 256);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let yaml = r#"
node:
  url: http://10.0.0.5:8332
  user: rpc
polling:
  fees_interval_ms: 20000
log:
  level: debug
  components:
    chainpulse-hub: trace
"#;
        let config = ChainPulseConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.node.url, "http://10.0.0.5:8332");
        assert_eq!(config.node.user.as_deref(), Some("rpc"));
        assert_eq!(config.node.name, "node");
        assert_eq!(config.polling.fees_interval_ms, 20_000);
        assert_eq!(config.polling.tip_interval_ms, 5_000);
        assert_eq!(config.log.directives(), "debug,chainpulse_hub=trace");
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config = ChainPulseConfig::from_yaml("node:\n  url: http://file:8332\n").unwrap();
        config.apply(Overrides {
            node_url: Some("http://env:8332".into()),
            node_password: Some("pw".into()),
            electrum_addr: Some("electrum.local:50001".into()),
            json_logs: true,
            ..Overrides::default()
        });
        assert_eq!(config.node.url, "http://env:8332");
        assert_eq!(config.node.password.as_deref(), Some("pw"));
        assert_eq!(config.node.user, None);
        assert_eq!(config.electrum.addr, "electrum.local:50001");
        assert!(config.log.json);
    }

    #[test]
    fn validation_lists_every_problem() {
        let yaml = r#"
node:
  url: ""
polling:
  tip_interval_ms: 0
circuit_breaker:
  failure_threshold: 0
"#;
        let err = ChainPulseConfig::from_yaml(yaml).unwrap().validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("node.url"));
        assert!(msg.contains("polling.tip_interval_ms"));
        assert!(msg.contains("circuit_breaker.failure_threshold"));
    }

    #[test]
    fn source_names_must_differ() {
        let mut config = ChainPulseConfig::default();
        config.electrum.name = "node".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        assert!(matches!(
            ChainPulseConfig::from_yaml("polling: [1, 2"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = ChainPulseConfig::load(Path::new("/nonexistent/chainpulse.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
