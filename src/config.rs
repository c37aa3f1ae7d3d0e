//! Runtime configuration types.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// How the CLI reports the final accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `ACCUM: <value>` on stdout
    #[default]
    Human,
    /// One JSON object on stdout
    Json,
}

/// Runtime configuration for the VM
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Step budget (None = unlimited)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u64>,
    /// Run the static verifier before executing
    pub verify: bool,
    pub profile_opcodes: bool,
    pub format: OutputFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_steps, None);
        assert!(!config.verify);
        assert!(!config.profile_opcodes);
        assert_eq!(config.format, OutputFormat::Human);
    }

    #[test]
    fn test_parse_full() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            max_steps = 5000
            verify = true
            profile_opcodes = true
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            RuntimeConfig {
                max_steps: Some(5000),
                verify: true,
                profile_opcodes: true,
                format: OutputFormat::Json,
            }
        );
    }

    #[test]
    fn test_missing_keys_default() {
        let config = RuntimeConfig::from_toml_str("verify = true").unwrap();
        assert!(config.verify);
        assert_eq!(config.max_steps, None);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = RuntimeConfig::from_toml_str("jit = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_bad_format_rejected() {
        assert!(RuntimeConfig::from_toml_str(r#"format = "xml""#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_steps = 12").unwrap();
        let config = RuntimeConfig::load(file.path()).unwrap();
        assert_eq!(config.max_steps, Some(12));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }
}
