//! # Configuration
//!
//! Serde-backed settings for the engine, the descriptor lifecycle manager and
//! logging. Every field has a default so partial YAML documents are accepted.
use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TYPE_CACHE_CAPACITY: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for the [`crate::engine::Engine`] and every controller it builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of resolved methods kept per schema generation.
    pub type_cache_capacity: usize,
    /// Emit fields holding their default value when marshalling responses.
    pub emit_default_fields: bool,
    /// Use the proto field name instead of the lowerCamelCase JSON name on output.
    pub use_proto_field_names: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            type_cache_capacity: DEFAULT_TYPE_CACHE_CAPACITY,
            emit_default_fields: true,
            use_proto_field_names: false,
        }
    }
}

/// Settings for the [`crate::lifecycle::DescriptorLifecycle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Directory holding one cached blob per namespace.
    pub cache_dir: PathBuf,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub download_timeout: Duration,
    pub persist_queue_capacity: usize,
    /// Total write attempts per queued blob, the first one included.
    pub persist_attempts: usize,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub persist_retry_backoff: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./descriptor-cache"),
            download_timeout: Duration::from_secs(3),
            persist_queue_capacity: 64,
            persist_attempts: 3,
            persist_retry_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub log_level: String,
    /// Full `EnvFilter` directive, takes precedence over `log_level` when set.
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            filter: None,
        }
    }
}

impl TracingConfig {
    pub fn directive(&self) -> &str {
        self.filter.as_deref().unwrap_or(&self.log_level)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub engine: EngineConfig,
    pub lifecycle: LifecycleConfig,
    pub tracing: TracingConfig,
}

impl GatewayConfig {
    pub fn from_yaml_str(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(path, &content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.type_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "engine.type_cache_capacity must be greater than zero".into(),
            ));
        }
        if self.lifecycle.persist_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "lifecycle.persist_queue_capacity must be greater than zero".into(),
            ));
        }
        if self.lifecycle.persist_attempts < 2 {
            return Err(ConfigError::Invalid(
                "lifecycle.persist_attempts must allow at least one retry".into(),
            ));
        }
        Ok(())
    }
}

/// Writes a duration in a form `deserialize_duration` reads back, e.g. `200ms`.
fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    if duration.subsec_nanos() % 1_000_000 == 0 {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    } else {
        serializer.serialize_str(&format!("{}ns", duration.as_nanos()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.type_cache_capacity, DEFAULT_TYPE_CACHE_CAPACITY);
        assert_eq!(config.lifecycle.download_timeout, Duration::from_secs(3));
        assert_eq!(config.tracing.directive(), "info");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
engine:
  type_cache_capacity: 16
lifecycle:
  cache_dir: /var/cache/protogate
  download_timeout: 5s
  persist_retry_backoff: 50ms
tracing:
  filter: "protogate_core=debug"
"#;
        let config = GatewayConfig::from_yaml_str(Path::new("inline.yaml"), yaml).unwrap();

        assert_eq!(config.engine.type_cache_capacity, 16);
        assert!(config.engine.emit_default_fields);
        assert_eq!(
            config.lifecycle.cache_dir,
            PathBuf::from("/var/cache/protogate")
        );
        assert_eq!(config.lifecycle.download_timeout, Duration::from_secs(5));
        assert_eq!(
            config.lifecycle.persist_retry_backoff,
            Duration::from_millis(50)
        );
        assert_eq!(config.lifecycle.persist_attempts, 3);
        assert_eq!(config.tracing.directive(), "protogate_core=debug");
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let yaml = "engine:\n  type_cache_capacity: 0\n";
        let result = GatewayConfig::from_yaml_str(Path::new("inline.yaml"), yaml);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn single_persist_attempt_is_rejected() {
        let yaml = "lifecycle:\n  persist_attempts: 1\n";
        let result = GatewayConfig::from_yaml_str(Path::new("inline.yaml"), yaml);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn serialized_config_loads_back() {
        let mut config = GatewayConfig::default();
        config.lifecycle.download_timeout = Duration::from_millis(1500);
        config.lifecycle.persist_retry_backoff = Duration::from_nanos(2_500_000);

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("download_timeout: 1500ms"));

        let loaded = GatewayConfig::from_yaml_str(Path::new("inline.yaml"), &yaml).unwrap();
        assert_eq!(loaded, config);
    }
}
