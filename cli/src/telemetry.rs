//! Tracing / logging initialisation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level, globally and per crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: BTreeMap<String, String>,
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
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Filter directives, e.g. `"info,couchriver_feed=trace"`, with
    /// components sorted by their target name.
    pub fn directives(&self) -> String {
        let mut targets: Vec<(String, &str)> = self
            .components
            .iter()
            .map(|(component, level)| (component.replace('-', "_"), level.as_str()))
            .collect();
        targets.sort();

        let mut directives = self.level.clone();
        for (target, level) in targets {
            directives.push_str(&format!(",{target}={level}"));
        }
        directives
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, wins over `config`.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A subscriber may already be installed (tests); keep it.
    let _ = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_components() {
        let mut cfg = LogConfig::default();
        cfg.components.insert("couchriver-feed".into(), "trace".into());
        cfg.components.insert("couchriver_elastic".into(), "debug".into());
        assert_eq!(
            cfg.directives(),
            "info,couchriver_elastic=debug,couchriver_feed=trace"
        );

        // Crate names sort by their target spelling, not the dashed one.
        cfg.components.insert("couchriver_core".into(), "warn".into());
        cfg.components.insert("couchriver-storage".into(), "error".into());
        assert_eq!(
            cfg.directives(),
            "info,couchriver_core=warn,couchriver_elastic=debug,couchriver_feed=trace,couchriver_storage=error"
        );
    }
}
