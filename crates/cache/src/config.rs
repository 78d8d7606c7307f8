//! Cache configuration management with precedence and validation
//!
//! Precedence, lowest first: built-in defaults, the JSON config file, then
//! environment variables.

use crate::backends::{BackendKind, DEFAULT_KEY_VALUE_LIMIT};
use crate::errors::{CacheError, RecoveryHint, Result};
use failover_utils::XdgPaths;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Overrides the base directory for on-disk backends
pub const ENV_BASE_DIR: &str = "FAILOVER_CACHE_DIR";

/// Overrides the config file location
pub const ENV_CONFIG_FILE: &str = "FAILOVER_CACHE_CONFIG";

/// Comma separated backend names the capability probe must treat as missing
pub const ENV_DISABLE: &str = "FAILOVER_CACHE_DISABLE";

/// Per-backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower is tried first
    pub priority: i32,
    #[serde(default)]
    pub size_limit_bytes: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl BackendConfig {
    /// Built-in defaults: request cache first, key-value next, structured last
    pub fn default_for(kind: BackendKind) -> Self {
        let (priority, size_limit_bytes) = match kind {
            BackendKind::RequestCache => (0, None),
            BackendKind::KeyValue => (1, Some(DEFAULT_KEY_VALUE_LIMIT)),
            BackendKind::Structured => (2, None),
        };
        Self {
            kind,
            enabled: true,
            priority,
            size_limit_bytes,
        }
    }
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default configuration
    Default,
    /// Configuration file
    ConfigFile(PathBuf),
    /// Environment variable
    EnvironmentVariable(String),
    /// Built programmatically
    Builder,
}

/// Complete configuration of the failover cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding the key-value snapshot and the structured store
    #[serde(default = "XdgPaths::cache_dir")]
    pub base_dir: PathBuf,
    /// Backends in registration order
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
    #[serde(skip, default = "default_source")]
    pub source: ConfigSource,
}

fn default_backends() -> Vec<BackendConfig> {
    BackendKind::ALL
        .iter()
        .map(|kind| BackendConfig::default_for(*kind))
        .collect()
}

fn default_source() -> ConfigSource {
    ConfigSource::Default
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_dir: XdgPaths::cache_dir(),
            backends: default_backends(),
            source: ConfigSource::Default,
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    /// Location of the key-value store snapshot
    pub fn key_value_path(&self) -> PathBuf {
        self.base_dir.join("local-storage.json")
    }

    /// Root directory of the structured store
    pub fn structured_root(&self) -> PathBuf {
        self.base_dir.join("indexed-db")
    }

    pub fn backend(&self, kind: BackendKind) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.kind == kind)
    }

    /// Parse a JSON config file; missing fields fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                return Err(CacheError::Configuration {
                    message: format!("failed to read '{}': {e}", path.display()),
                    recovery_hint: RecoveryHint::CheckPermissions {
                        path: path.to_path_buf(),
                    },
                })
            }
        };

        let mut config: Self = match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                return Err(CacheError::Configuration {
                    message: format!("invalid config file '{}': {e}", path.display()),
                    recovery_hint: RecoveryHint::UpdateConfiguration,
                })
            }
        };
        config.source = ConfigSource::ConfigFile(path.to_path_buf());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env(mut self) -> Self {
        if let Ok(dir) = std::env::var(ENV_BASE_DIR) {
            if !dir.is_empty() {
                self.base_dir = PathBuf::from(dir);
                self.source = ConfigSource::EnvironmentVariable(ENV_BASE_DIR.to_string());
            }
        }
        self
    }

    /// Reject configurations the coordinator cannot honour
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.kind) {
                return Err(CacheError::Configuration {
                    message: format!("backend '{}' configured more than once", backend.kind),
                    recovery_hint: RecoveryHint::UpdateConfiguration,
                });
            }
            if backend.size_limit_bytes == Some(0) {
                return Err(CacheError::Configuration {
                    message: format!(
                        "backend '{}' has a zero size limit; disable it instead",
                        backend.kind
                    ),
                    recovery_hint: RecoveryHint::UpdateConfiguration,
                });
            }
        }
        Ok(())
    }
}

/// Builder for creating cache configurations
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CacheConfig {
                source: ConfigSource::Builder,
                ..CacheConfig::default()
            },
        }
    }

    /// Set base directory
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.config.base_dir = base_dir.into();
        self
    }

    /// Replace the configuration of one backend kind, registering it if new
    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        match self
            .config
            .backends
            .iter_mut()
            .find(|b| b.kind == backend.kind)
        {
            Some(existing) => *existing = backend,
            None => self.config.backends.push(backend),
        }
        self
    }

    /// Set a backend's priority
    pub fn with_priority(mut self, kind: BackendKind, priority: i32) -> Self {
        self.backend_mut(kind).priority = priority;
        self
    }

    /// Set or remove a backend's size limit
    pub fn with_size_limit(mut self, kind: BackendKind, limit: Option<u64>) -> Self {
        self.backend_mut(kind).size_limit_bytes = limit;
        self
    }

    /// Mark a backend as disabled so the probe reports it unavailable
    pub fn disable(mut self, kind: BackendKind) -> Self {
        self.backend_mut(kind).enabled = false;
        self
    }

    /// Set configuration source
    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.config.source = source;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    fn backend_mut(&mut self, kind: BackendKind) -> &mut BackendConfig {
        let index = match self.config.backends.iter().position(|b| b.kind == kind) {
            Some(index) => index,
            None => {
                self.config.backends.push(BackendConfig::default_for(kind));
                self.config.backends.len() - 1
            }
        };
        &mut self.config.backends[index]
    }
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration loader that handles precedence
pub struct CacheConfigLoader;

impl CacheConfigLoader {
    /// Load configuration with full precedence handling
    pub fn load() -> Result<CacheConfig> {
        let path = Self::config_file_path();
        let config = if path.exists() {
            tracing::debug!(path = %path.display(), "loading cache config file");
            CacheConfig::from_file(&path)?
        } else {
            CacheConfig::default()
        };

        let config = config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn config_file_path() -> PathBuf {
        match std::env::var(ENV_CONFIG_FILE) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => XdgPaths::config_file(),
        }
    }
}
