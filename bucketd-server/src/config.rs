//! Configuration: CLI arguments, environment variables, YAML file
//!
//! Precedence is CLI > config file > defaults. Environment variables
//! with the `BUCKETD_` prefix back most flags (clap resolves those
//! before the file is consulted, matching CLI precedence); the log
//! level additionally honors the conventional `LOG_LEVEL` variable.

use crate::protocol::{Dialect, DEFAULT_MAX_FRAME};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 9231;
pub const DEFAULT_HOSTNAME: &str = "0.0.0.0";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default interval between remote configuration fetches
pub const DEFAULT_REMOTE_CONFIG_INTERVAL: Duration = Duration::from_secs(60);

/// Grace period granted to in-flight requests on shutdown
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a database path is required (--db or the config file's `db` key)")]
    MissingDb,
    #[error("failed to read config file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid log level {0:?} (expected debug, info, or error)")]
    InvalidLogLevel(String),
    #[error("bucket type name must not be empty")]
    EmptyBucketName,
    #[error("bucket type {bucket:?}: {field} must be at least 1")]
    InvalidBucketField {
        bucket: String,
        field: &'static str,
    },
    #[error("bucket type {bucket:?}: an override needs a `key` or a `match` pattern")]
    EmptyOverride { bucket: String },
    #[error("bucket type {bucket:?}: invalid `match` pattern: {source}")]
    InvalidPattern {
        bucket: String,
        source: regex::Error,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "bucketd",
    about = "Networked token-bucket rate limiting service",
    long_about = "A token-bucket rate limiting service speaking length-prefixed \
                  binary frames over TCP.\n\nBucket types are declared in the YAML \
                  config file and can be reloaded while the server runs. CLI \
                  arguments take precedence over the config file; BUCKETD_* \
                  environment variables back most flags."
)]
pub struct Args {
    #[arg(
        long,
        value_name = "PATH",
        help = "Bucket state database path",
        env = "BUCKETD_DB"
    )]
    pub db: Option<PathBuf>,

    #[arg(
        long,
        value_name = "PORT",
        help = "TCP port to listen on",
        env = "BUCKETD_PORT"
    )]
    pub port: Option<u16>,

    #[arg(
        long,
        value_name = "HOST",
        help = "Address to bind",
        env = "BUCKETD_HOSTNAME"
    )]
    pub hostname: Option<String>,

    #[arg(
        long,
        value_name = "FILE",
        help = "YAML configuration file",
        env = "BUCKETD_CONFIG_FILE"
    )]
    pub config_file: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DIALECT",
        help = "Wire dialect: binary-schema or tagged-json",
        env = "BUCKETD_PROTOCOL"
    )]
    pub protocol: Option<Dialect>,

    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: debug, info, error",
        env = "LOG_LEVEL"
    )]
    pub log_level: Option<String>,

    #[arg(long, help = "Enable CPU profiling hooks")]
    pub profile: bool,

    #[arg(
        long,
        value_name = "BYTES",
        help = "Maximum frame payload size",
        default_value_t = DEFAULT_MAX_FRAME,
        env = "BUCKETD_MAX_FRAME"
    )]
    pub max_frame: usize,

    #[arg(
        long,
        value_name = "SIZE",
        help = "Initial bucket store capacity",
        default_value_t = 100_000,
        env = "BUCKETD_STORE_CAPACITY"
    )]
    pub store_capacity: usize,

    #[arg(
        long,
        value_name = "SECS",
        help = "Interval between store expiry sweeps",
        default_value_t = 300,
        env = "BUCKETD_STORE_CLEANUP_INTERVAL"
    )]
    pub store_cleanup_interval: u64,

    #[arg(
        long,
        value_name = "SIZE",
        help = "Store actor channel buffer size",
        default_value_t = 100_000,
        env = "BUCKETD_BUFFER_SIZE"
    )]
    pub buffer_size: usize,
}

/// Declarative bucket type as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketTypeConfig {
    /// Burst capacity in tokens
    pub size: u64,
    /// Tokens refilled per `interval`
    pub per_interval: u64,
    /// Refill interval in milliseconds
    pub interval: u64,
    /// TAKE always conforms and never touches storage
    #[serde(default)]
    pub unlimited: bool,
    #[serde(default)]
    pub overrides: Vec<OverrideConfig>,
}

/// Per-key parameter override; first match in declaration order wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideConfig {
    /// Exact instance key to match
    #[serde(default)]
    pub key: Option<String>,
    /// Anchored regular expression matched against the instance key
    #[serde(rename = "match", default)]
    pub matches: Option<String>,
    /// Fields not given here inherit the bucket type's base values
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub per_interval: Option<u64>,
    #[serde(default)]
    pub interval: Option<u64>,
}

/// YAML config file schema; unknown keys are rejected
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub db: Option<PathBuf>,
    pub log_level: Option<String>,
    pub protocol: Option<Dialect>,
    #[serde(default)]
    pub buckets: BTreeMap<String, BucketTypeConfig>,
    #[serde(alias = "remoteConfigURI")]
    pub remote_config_uri: Option<String>,
    /// Milliseconds between remote configuration fetches
    #[serde(alias = "remoteConfigInterval")]
    pub remote_config_interval: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<FileConfig, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub db: PathBuf,
    pub port: u16,
    pub hostname: String,
    pub protocol: Dialect,
    pub log_level: String,
    pub profile: bool,
    pub max_frame: usize,
    pub buckets: BTreeMap<String, BucketTypeConfig>,
    pub remote_config_uri: Option<String>,
    pub remote_config_interval: Duration,
    pub store_capacity: usize,
    pub store_cleanup_interval: Duration,
    pub buffer_size: usize,
    pub grace_period: Duration,
    pub config_file: Option<PathBuf>,
}

impl Config {
    /// Merge CLI arguments over the config file over defaults
    pub fn resolve(args: Args) -> Result<Config, ConfigError> {
        let file = match &args.config_file {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let db = args.db.or(file.db).ok_or(ConfigError::MissingDb)?;

        let log_level = args
            .log_level
            .or(file.log_level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        if !matches!(log_level.as_str(), "debug" | "info" | "error") {
            return Err(ConfigError::InvalidLogLevel(log_level));
        }

        Ok(Config {
            db,
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            hostname: args
                .hostname
                .or(file.hostname)
                .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string()),
            protocol: args
                .protocol
                .or(file.protocol)
                .unwrap_or(Dialect::BinarySchema),
            log_level,
            profile: args.profile,
            max_frame: args.max_frame,
            buckets: file.buckets,
            remote_config_uri: file.remote_config_uri,
            remote_config_interval: file
                .remote_config_interval
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REMOTE_CONFIG_INTERVAL),
            store_capacity: args.store_capacity,
            store_cleanup_interval: Duration::from_secs(args.store_cleanup_interval),
            buffer_size: args.buffer_size,
            grace_period: DEFAULT_GRACE_PERIOD,
            config_file: args.config_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["bucketd", "--db", "/tmp/buckets.db"])
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(base_args()).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.hostname, DEFAULT_HOSTNAME);
        assert_eq!(config.protocol, Dialect::BinarySchema);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_frame, DEFAULT_MAX_FRAME);
    }

    #[test]
    fn test_db_required() {
        let args = Args::parse_from(["bucketd"]);
        assert!(matches!(
            Config::resolve(args),
            Err(ConfigError::MissingDb)
        ));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let args = Args::parse_from(["bucketd", "--db", "/tmp/b.db", "--log-level", "loud"]);
        assert!(matches!(
            Config::resolve(args),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_file_config_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucketd.yml");
        std::fs::write(
            &path,
            r#"
port: 9500
hostname: 127.0.0.1
db: /var/lib/bucketd/state.db
protocol: tagged-json
remoteConfigURI: https://config.internal/buckets
remoteConfigInterval: 30000
buckets:
  ip:
    size: 10
    per_interval: 10
    interval: 1000
    overrides:
      - match: "10\\.0\\..*"
        size: 100
  search:
    size: 5
    per_interval: 5
    interval: 60000
    unlimited: true
"#,
        )
        .unwrap();

        let args = Args::parse_from(["bucketd", "--config-file", path.to_str().unwrap()]);
        let config = Config::resolve(args).unwrap();

        assert_eq!(config.port, 9500);
        assert_eq!(config.hostname, "127.0.0.1");
        assert_eq!(config.db, PathBuf::from("/var/lib/bucketd/state.db"));
        assert_eq!(config.protocol, Dialect::TaggedJson);
        assert_eq!(
            config.remote_config_uri.as_deref(),
            Some("https://config.internal/buckets")
        );
        assert_eq!(config.remote_config_interval, Duration::from_secs(30));
        assert_eq!(config.buckets.len(), 2);
        assert!(config.buckets["search"].unlimited);
        assert_eq!(config.buckets["ip"].overrides.len(), 1);
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucketd.yml");
        std::fs::write(&path, "port: 9500\ndb: /from/file.db\n").unwrap();

        let args = Args::parse_from([
            "bucketd",
            "--config-file",
            path.to_str().unwrap(),
            "--port",
            "9600",
            "--db",
            "/from/cli.db",
        ]);
        let config = Config::resolve(args).unwrap();
        assert_eq!(config.port, 9600);
        assert_eq!(config.db, PathBuf::from("/from/cli.db"));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucketd.yml");
        std::fs::write(&path, "db: /tmp/b.db\nshards: 4\n").unwrap();

        let args = Args::parse_from(["bucketd", "--config-file", path.to_str().unwrap()]);
        let err = Config::resolve(args).unwrap_err();
        assert!(err.to_string().contains("shards"), "got: {err}");
    }
}
