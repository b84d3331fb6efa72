//! Shell configuration.
//!
//! Loaded from `.strand/config.toml` (or the file given with `--config`);
//! command-line flags override individual fields afterwards. Every field has
//! a default, so an empty or missing default file yields a usable config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Location searched when no `--config` flag is given.
pub const DEFAULT_CONFIG_PATH: &str = ".strand/config.toml";

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How operator-supplied site addresses are checked before encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    /// Out-of-range values are truncated by the codec.
    #[default]
    Lenient,
    /// Undefined roles and oversized ordinals are rejected.
    Strict,
}

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directive, used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Site layout the loopback runtime starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopbackConfig {
    pub mds: u32,
    pub mdsl: u32,
    pub osd: u32,
    pub bp: u32,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            mds: 1,
            mdsl: 1,
            osd: 2,
            bp: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
    /// Ordinal of this client's own CLIENT site.
    pub client_id: u32,
    /// Host of the ring/placement directory.
    pub ring: String,
    /// Base port; the client listens on `port_base + client_id`.
    pub port_base: u16,
    /// Worker threads of the async runtime.
    pub threads: u32,
    /// Enables branch feeder mode (`bp` publishing).
    pub use_branch: bool,
    pub addressing: AddressingMode,
    pub log: LogConfig,
    pub loopback: LoopbackConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            client_id: 0,
            ring: "127.0.0.1".to_string(),
            port_base: 8412,
            threads: 1,
            use_branch: false,
            addressing: AddressingMode::Lenient,
            log: LogConfig::default(),
            loopback: LoopbackConfig::default(),
        }
    }
}

impl ShellConfig {
    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
    /// read if present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Self =
            toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        if self.ring.trim().is_empty() {
            return Err(ConfigError::Invalid("ring host must not be empty".into()));
        }
        Ok(())
    }

    /// Port this client listens on.
    pub fn client_port(&self) -> u16 {
        self.port_base
            .saturating_add(u16::try_from(self.client_id).unwrap_or(u16::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_yields_defaults() {
        let file = write_config("");
        assert_eq!(ShellConfig::load(Some(file.path())).unwrap(), ShellConfig::default());
    }

    #[test]
    fn fields_override_defaults() {
        let file = write_config(
            r#"
            client_id = 3
            use_branch = true
            addressing = "strict"

            [log]
            format = "json"

            [loopback]
            bp = 4
            "#,
        );
        let config = ShellConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.client_id, 3);
        assert!(config.use_branch);
        assert_eq!(config.addressing, AddressingMode::Strict);
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter, "warn");
        assert_eq!(config.loopback.bp, 4);
        assert_eq!(config.loopback.osd, 2);
        assert_eq!(config.client_port(), 8415);
    }

    #[test]
    fn client_port_saturates_for_large_ids() {
        let config = ShellConfig {
            client_id: 65_536,
            ..ShellConfig::default()
        };
        assert_eq!(config.client_port(), u16::MAX);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("colour = true\n");
        assert!(matches!(
            ShellConfig::load(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn zero_threads_is_invalid() {
        let file = write_config("threads = 0\n");
        assert!(matches!(
            ShellConfig::load(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            ShellConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }
}
