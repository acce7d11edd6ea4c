//! Configuration types for executorch-bridge.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{ExecutorchError, Result};
use crate::sys::{ModuleLoadMode, ProgramVerification};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Program configuration.
    #[serde(default)]
    pub program: ProgramConfig,

    /// Memory configuration.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Program configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramConfig {
    /// Path to the program file. A command-line path takes precedence.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How the file is brought into memory.
    #[serde(default)]
    pub load_mode: ModuleLoadMode,

    /// Checks run when the program is loaded.
    #[serde(default)]
    pub verification: ProgramVerification,
}

/// Memory configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Size of the arena holding the value table and tensor metadata.
    #[serde(default = "default_method_allocator_bytes")]
    pub method_allocator_bytes: usize,

    /// Kernel scratch space. Zero means no temp allocator.
    #[serde(default)]
    pub temp_allocator_bytes: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            method_allocator_bytes: default_method_allocator_bytes(),
            temp_allocator_bytes: 0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// The configured level as a `tracing` level.
    pub fn tracing_level(&self) -> Result<tracing::Level> {
        self.level
            .parse()
            .map_err(|_| ExecutorchError::config(format!("unknown log level: {}", self.level)))
    }
}

fn default_method_allocator_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ExecutorchError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.memory.method_allocator_bytes == 0 {
            return Err(ExecutorchError::config("memory.method_allocator_bytes must be positive"));
        }
        if u32::try_from(self.memory.method_allocator_bytes).is_err() {
            return Err(ExecutorchError::config("memory.method_allocator_bytes must fit in 32 bits"));
        }
        self.logging.tracing_level()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert!(config.program.path.is_none());
        assert_eq!(config.program.load_mode, ModuleLoadMode::Mmap);
        assert_eq!(config.program.verification, ProgramVerification::Minimal);
        assert_eq!(config.memory.method_allocator_bytes, 4194304);
        assert_eq!(config.memory.temp_allocator_bytes, 0);
        assert_eq!(config.logging.tracing_level().unwrap(), tracing::Level::INFO);
    }

    #[test]
    fn test_full_file() {
        let yaml = r#"
program:
  path: model.pte
  load_mode: mmap_use_mlock_ignore_errors
  verification: internal_consistency
memory:
  method_allocator_bytes: 65536
  temp_allocator_bytes: 1024
logging:
  level: debug
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.program.path, Some(PathBuf::from("model.pte")));
        assert_eq!(config.program.load_mode, ModuleLoadMode::MmapUseMlockIgnoreErrors);
        assert_eq!(config.program.verification, ProgramVerification::InternalConsistency);
        assert_eq!(config.memory.temp_allocator_bytes, 1024);
        assert_eq!(config.logging.tracing_level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_yaml_str("program:\n  load_mode: tape\n").unwrap_err();
        assert!(matches!(err, ExecutorchError::Yaml(_)));
        let err = Config::from_yaml_str("memory:\n  method_allocator_bytes: 0\n").unwrap_err();
        assert!(matches!(err, ExecutorchError::Config(_)));
        let err = Config::from_yaml_str("logging:\n  level: loud\n").unwrap_err();
        assert!(matches!(err, ExecutorchError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_yaml_file("/no/such/config.yaml").unwrap_err();
        assert!(matches!(err, ExecutorchError::FileNotFound(_)));
    }
}
