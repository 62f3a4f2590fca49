//! Tracing / logging initialisation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per crate: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Quiet config for the inspection commands.
    pub fn with_level(level: &str) -> Self {
        Self {
            level: level.to_string(),
            ..Self::default()
        }
    }

    /// Filter directives, e.g. `"info,bridgescan_core=debug"`.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();

        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Initialise tracing with the given log config. `RUST_LOG`, when set,
/// replaces the configured directives.
///
/// Should be called once at application startup.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_normalise_crate_names() {
        let mut config = LogConfig::with_level("warn");
        config
            .components
            .insert("bridgescan-core".into(), "debug".into());
        config
            .components
            .insert("bridgescan-storage".into(), "trace".into());
        assert_eq!(
            config.directives(),
            "warn,bridgescan_core=debug,bridgescan_storage=trace"
        );
    }

    #[test]
    fn yaml_defaults() {
        let config: LogConfig = serde_yaml::from_str("json: true").unwrap();
        assert_eq!(config.level, "info");
        assert!(config.json);
        assert!(config.components.is_empty());
    }
}
