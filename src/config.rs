use serde::Deserialize;
use std::path::Path;

/// Top-level config loaded from an optional TOML file (e.g. `odata.toml`),
/// overridable with environment variables at deploy time.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub persistent_change_tracking: bool,
    #[serde(default = "default_expand_depth_limit")]
    pub expand_depth_limit: u32,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            max_batch_size: default_max_batch_size(),
            persistent_change_tracking: false,
            expand_depth_limit: default_expand_depth_limit(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn default_namespace() -> String {
    "ODataService".to_string()
}

fn default_max_batch_size() -> usize {
    100
}

fn default_expand_depth_limit() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub enable_server_timing: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_service_version")]
    pub service_version: String,
}

fn default_service_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl ServiceConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist,
    /// then applies the `ODATA_*` environment overrides a deploy operator needs
    /// without editing the checked-in file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        } else {
            let contents = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&contents)?;
            tracing::info!(path = %path.display(), "loaded service config");
            config
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(ns) = std::env::var("ODATA_NAMESPACE") {
            self.namespace = ns;
        }
        if let Ok(v) = std::env::var("ODATA_MAX_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.max_batch_size = n;
            }
        }
        if let Ok(v) = std::env::var("ODATA_PERSISTENT_CHANGE_TRACKING") {
            self.persistent_change_tracking = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("ODATA_EXPAND_DEPTH_LIMIT") {
            if let Ok(n) = v.parse() {
                self.expand_depth_limit = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_spec_mandated() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.namespace, "ODataService");
        assert_eq!(cfg.max_batch_size, 100);
        assert_eq!(cfg.expand_depth_limit, 5);
        assert!(!cfg.persistent_change_tracking);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ServiceConfig::load("/nonexistent/does-not-exist.toml").unwrap();
        assert_eq!(cfg.namespace, "ODataService");
    }
}
