//! Daemon configuration file
//!
//! ```toml
//! progs = "./progs"
//! gc_interval = "1m"      # 0 disables expiry
//! workers = 4
//! dump = "metrics.json"
//! log = "info"
//! ```
//!
//! Every field is optional. Command line flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::lexer::parse_duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory of `*.tl` programs
    #[serde(default = "defaults::progs")]
    pub progs: PathBuf,

    /// Period of the expiry sweep; zero disables it
    #[serde(
        default = "defaults::gc_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub gc_interval: Duration,

    /// Number of line-processing workers
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Where the final JSON dump goes; stdout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump: Option<PathBuf>,

    /// `tracing` filter directive
    #[serde(default = "defaults::log")]
    pub log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            progs: defaults::progs(),
            gc_interval: defaults::gc_interval(),
            workers: defaults::workers(),
            dump: None,
            log: defaults::log(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "workers",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {message}")]
    Parse { message: String },

    #[error("invalid value for '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Accepts `"30s"`-style strings or a bare number of seconds
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration '{text}'"))),
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        serializer.serialize_str(&format!("{}s", millis / 1000))
    } else {
        serializer.serialize_str(&format!("{millis}ms"))
    }
}

mod defaults {
    use std::path::PathBuf;
    use std::time::Duration;

    pub fn progs() -> PathBuf {
        PathBuf::from("./progs")
    }

    pub fn gc_interval() -> Duration {
        Duration::from_secs(60)
    }

    pub fn workers() -> usize {
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }

    pub fn log() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.gc_interval, Duration::from_secs(60));
        assert!(config.workers >= 1);
    }

    #[test]
    fn full_file() {
        let config = Config::from_toml(
            r#"
            progs = "/etc/tallylog"
            gc_interval = "30s"
            workers = 8
            dump = "out.json"
            log = "tallylog=debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.progs, PathBuf::from("/etc/tallylog"));
        assert_eq!(config.gc_interval, Duration::from_secs(30));
        assert_eq!(config.workers, 8);
        assert_eq!(config.dump, Some(PathBuf::from("out.json")));
        assert_eq!(config.log, "tallylog=debug");
    }

    #[test]
    fn numeric_interval_is_seconds() {
        let config = Config::from_toml("gc_interval = 0").unwrap();
        assert_eq!(config.gc_interval, Duration::ZERO);
    }

    #[test]
    fn bad_interval_is_rejected() {
        let err = Config::from_toml("gc_interval = \"5 fortnights\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = Config::from_toml("workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "workers", .. }));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("prog = \"x\"").is_err());
    }

    #[test]
    fn missing_file() {
        let err = Config::from_file("/nonexistent/tallylog.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn serializes_back_to_toml() {
        let config = Config {
            gc_interval: Duration::from_millis(1500),
            ..Config::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("gc_interval = \"1500ms\""), "{text}");
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }
}
