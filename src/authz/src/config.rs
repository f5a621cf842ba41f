//! Engine configuration loading and validation

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete engine configuration; every section and field is optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub janitor: JanitorSection,

    #[serde(default)]
    pub context: ContextSection,

    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JanitorSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_janitor_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ContextSection {
    /// Context key unioned into every resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: default_cache_ttl(),
        }
    }
}

impl Default for JanitorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_janitor_interval(),
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_cache_ttl() -> u64 { 5000 }
fn default_janitor_interval() -> u64 { 60 }
fn default_backend() -> String { "memory".to_string() }

impl EngineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| AuthzError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AuthzError::Config(format!(
                "Failed to read configuration file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml_str(&contents)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.enabled && self.cache.ttl_ms == 0 {
            return Err(AuthzError::Config(
                "cache.ttl_ms must be greater than zero".to_string(),
            ));
        }

        if self.cache.ttl_ms > i64::MAX as u64 {
            return Err(AuthzError::Config("cache.ttl_ms is out of range".to_string()));
        }

        if self.janitor.enabled && self.janitor.interval_secs == 0 {
            return Err(AuthzError::Config(
                "janitor.interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.storage.backend.trim().is_empty() {
            return Err(AuthzError::Config("storage.backend must not be empty".to_string()));
        }

        if self.storage.backend == "json" && self.storage.path.is_none() {
            return Err(AuthzError::Config(
                "storage.path is required for the 'json' backend".to_string(),
            ));
        }

        if let Some(server) = &self.context.server {
            if server.trim().is_empty() {
                return Err(AuthzError::Config(
                    "context.server must not be blank".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Cache TTL as a chrono duration
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.cache.ttl_ms.min(i64::MAX as u64) as i64)
    }

    /// Janitor run interval
    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl_ms, 5000);
        assert!(config.janitor.enabled);
        assert_eq!(config.janitor_interval(), Duration::from_secs(60));
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.context.server, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full() {
        let config = EngineConfig::from_toml_str(
            r#"
            [cache]
            enabled = false
            ttl_ms = 250

            [janitor]
            interval_secs = 5

            [context]
            server = "survival"

            [storage]
            backend = "json"
            path = "/var/lib/warden/permissions.json"
            "#,
        )
        .unwrap();

        assert!(!config.cache.enabled);
        assert_eq!(config.cache_ttl(), chrono::Duration::milliseconds(250));
        assert!(config.janitor.enabled);
        assert_eq!(config.janitor.interval_secs, 5);
        assert_eq!(config.context.server.as_deref(), Some("survival"));
        assert_eq!(
            config.storage.path,
            Some(PathBuf::from("/var/lib/warden/permissions.json"))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.cache.ttl_ms = 0;
        assert!(matches!(config.validate(), Err(AuthzError::Config(_))));

        let mut config = EngineConfig::default();
        config.janitor.interval_secs = 0;
        assert!(config.validate().is_err());
        config.janitor.enabled = false;
        assert!(config.validate().is_ok());

        let mut config = EngineConfig::default();
        config.storage.backend = "json".to_string();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.context.server = Some(" ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let result = EngineConfig::from_toml_str("[cache]\nttl_ms = \"soon\"");
        assert!(matches!(result, Err(AuthzError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "[cache]\nttl_ms = 1000\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.cache.ttl_ms, 1000);

        assert!(EngineConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
