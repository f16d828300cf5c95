//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

use crate::cache::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "catalog-cache";
const ENV_PREFIX: &str = "CATALOG_CACHE";

/// Command-line arguments for the catalog-cache operator binary.
#[derive(Debug, Parser)]
#[command(
    name = "catalog-cache",
    version,
    about = "Catalog cache maintenance tool"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "CATALOG_CACHE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Check that the distributed cache answers.
    Ping,
    /// Remove cached catalog entries from the distributed cache.
    Purge(PurgeArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    #[command(subcommand)]
    pub target: PurgeTarget,
}

#[derive(Debug, Subcommand, Clone, PartialEq, Eq)]
pub enum PurgeTarget {
    /// Purge one product's lookups and every product listing.
    Product {
        /// Product identifier.
        #[arg(long, value_name = "UUID")]
        id: Uuid,
        /// Slug keys to purge as well; repeatable.
        #[arg(long = "slug", value_name = "SLUG")]
        slugs: Vec<String>,
    },
    /// Purge the cached category list.
    Categories,
    /// Purge every catalog namespace.
    All,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL", global = true)]
    pub redis_url: Option<String>,

    /// Override the per-call timeout for the distributed cache.
    #[arg(long = "l2-timeout-ms", value_name = "MILLIS", global = true)]
    pub l2_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub redis: RedisSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// `None` leaves the distributed tier unconfigured.
    pub url: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Parse the process arguments and load settings for them.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    redis: RawRedisSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enable_l1_cache: Option<bool>,
    enable_l2_cache: Option<bool>,
    l1_ttl_secs: Option<u64>,
    l1_max_entries: Option<usize>,
    l2_ttl_secs: Option<u64>,
    l2_timeout_ms: Option<u64>,
    load_timeout_ms: Option<u64>,
    category_ttl_secs: Option<u64>,
    l2_key_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
        if let Some(timeout) = overrides.l2_timeout_ms {
            self.cache.l2_timeout_ms = Some(timeout);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            redis,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let redis = build_redis_settings(redis);

        Ok(Self {
            logging,
            cache,
            redis,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let config = CacheConfig {
        enable_l1_cache: cache.enable_l1_cache.unwrap_or(defaults.enable_l1_cache),
        enable_l2_cache: cache.enable_l2_cache.unwrap_or(defaults.enable_l2_cache),
        l1_ttl_secs: positive(cache.l1_ttl_secs, defaults.l1_ttl_secs, "cache.l1_ttl_secs")?,
        l1_max_entries: match cache.l1_max_entries {
            Some(0) => {
                return Err(LoadError::invalid(
                    "cache.l1_max_entries",
                    "must be greater than zero",
                ));
            }
            Some(value) => value,
            None => defaults.l1_max_entries,
        },
        l2_ttl_secs: positive(cache.l2_ttl_secs, defaults.l2_ttl_secs, "cache.l2_ttl_secs")?,
        l2_timeout_ms: positive(
            cache.l2_timeout_ms,
            defaults.l2_timeout_ms,
            "cache.l2_timeout_ms",
        )?,
        load_timeout_ms: positive(
            cache.load_timeout_ms,
            defaults.load_timeout_ms,
            "cache.load_timeout_ms",
        )?,
        category_ttl_secs: positive(
            cache.category_ttl_secs,
            defaults.category_ttl_secs,
            "cache.category_ttl_secs",
        )?,
        l2_key_prefix: cache.l2_key_prefix.unwrap_or(defaults.l2_key_prefix),
    };

    if config.l1_ttl_secs > config.l2_ttl_secs {
        return Err(LoadError::invalid(
            "cache.l1_ttl_secs",
            format!(
                "must not exceed cache.l2_ttl_secs ({}s)",
                config.l2_ttl_secs
            ),
        ));
    }

    Ok(config)
}

fn build_redis_settings(redis: RawRedisSettings) -> RedisSettings {
    let url = redis.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    RedisSettings { url }
}

fn positive(value: Option<u64>, default: u64, key: &'static str) -> Result<u64, LoadError> {
    match value {
        Some(0) => Err(LoadError::invalid(key, "must be greater than zero")),
        Some(value) => Ok(value),
        None => Ok(default),
    }
}
