//! `log:` section of the config and the process-wide tracing subscriber.
//!
//! Everything is written to stderr; stdout carries only the envelopes
//! printed by `chainpulse run` and the JSON of the one-shot commands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FALLBACK_DIRECTIVE: &str = "info";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for every target without its own entry in `components`.
    pub level: String,
    /// Crate name (dashes allowed, e.g. `chainpulse-hub`) to level.
    pub components: BTreeMap<String, String>,
    /// One JSON object per line instead of the human-readable format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: FALLBACK_DIRECTIVE.into(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directives, e.g. `"info,chainpulse_hub=debug"`.
    pub fn directives(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(
                self.components
                    .iter()
                    .map(|(krate, level)| format!("{}={level}", krate.replace('-', "_"))),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `RUST_LOG` when set and valid, then the config, then `info`.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.directives()))
            .unwrap_or_else(|e| {
                eprintln!("invalid log directives ({e}), falling back to {FALLBACK_DIRECTIVE}");
                EnvFilter::new(FALLBACK_DIRECTIVE)
            })
    }
}

/// Install the global subscriber. Call once, before any command runs.
pub fn init_tracing(config: &LogConfig) {
    let registry = tracing_subscriber::registry().with(config.filter());
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    if config.json {
        registry.with(layer.json()).init();
    } else {
        registry.with(layer).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_levels_use_crate_identifiers() {
        let mut config = LogConfig::default();
        config.components.insert("chainpulse-hub".into(), "debug".into());
        config.components.insert("chainpulse-rpc".into(), "trace".into());
        assert_eq!(
            config.directives(),
            "info,chainpulse_hub=debug,chainpulse_rpc=trace"
        );
    }

    #[test]
    fn bare_level_is_the_whole_filter() {
        let config = LogConfig {
            level: "warn".into(),
            ..LogConfig::default()
        };
        assert_eq!(config.directives(), "warn");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: LogConfig = serde_yaml::from_str("json: true\n").unwrap();
        assert_eq!(config.level, "info");
        assert!(config.components.is_empty());
        assert!(config.json);
    }
}
