//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU64, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::granularity::Granularity;

mod cli;

pub use cli::{
    CliArgs, CombineArgs, Command, CountArgs, GlobalOverrides, IdsArgs, IndexArgs, IndexCommand,
    IndexEntryArgs, IndexMatchArgs, KeyArgs, RangeArgs, ScoreArgs, TrackArgs, UniquesArgs,
    UniquesCommand, UniquesCountArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "zcache";
const ENV_PREFIX: &str = "ZCACHE";
const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379/0";
const DEFAULT_MAX_CACHE_SECONDS: u64 = 300;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_KEY_PREFIX: &str = "ZCACHE";
const DEFAULT_NAMESPACE_DELIMITER: &str = ":";
const DEFAULT_BITOP_TTL_SECONDS: u64 = 600;
const DEFAULT_SCORE_BAND_WIDTH: f64 = 100_000.0;
const DEFAULT_KEY_SEPARATOR: &str = ":";

#[derive(Debug, Clone)]
pub struct Settings {
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
    pub unique_count: UniqueCountSettings,
    pub prefix_index: PrefixIndexSettings,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_cache_seconds: NonZeroU64,
    pub max_retries: u32,
    pub key_prefix: String,
    pub thread_local: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct UniqueCountSettings {
    pub namespace_delimiter: String,
    pub bitop_ttl_seconds: u64,
    pub granularity: Granularity,
}

#[derive(Debug, Clone)]
pub struct PrefixIndexSettings {
    pub score_band_width: f64,
    pub length_score: bool,
    pub key_separator: String,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            store,
            cache,
            logging,
            unique_count,
            prefix_index,
        } = raw;

        Ok(Self {
            store: build_store_settings(store)?,
            cache: build_cache_settings(cache)?,
            logging: build_logging_settings(logging)?,
            unique_count: build_unique_count_settings(unique_count)?,
            prefix_index: build_prefix_index_settings(prefix_index)?,
        })
    }
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
    raw.apply_global_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let url = store
        .url
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_STORE_URL.to_string());
    if url.is_empty() {
        return Err(LoadError::invalid("store.url", "must not be empty"));
    }

    Ok(StoreSettings { url })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_cache_seconds = cache
        .max_cache_seconds
        .unwrap_or(DEFAULT_MAX_CACHE_SECONDS);
    let max_cache_seconds = NonZeroU64::new(max_cache_seconds).ok_or_else(|| {
        LoadError::invalid("cache.max_cache_seconds", "must be greater than zero")
    })?;

    let key_prefix = cache
        .key_prefix
        .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
    if key_prefix.trim().is_empty() {
        return Err(LoadError::invalid("cache.key_prefix", "must not be empty"));
    }

    Ok(CacheSettings {
        max_cache_seconds,
        max_retries: cache.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        key_prefix,
        thread_local: cache.thread_local.unwrap_or(false),
    })
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

fn build_unique_count_settings(
    unique_count: RawUniqueCountSettings,
) -> Result<UniqueCountSettings, LoadError> {
    let namespace_delimiter = unique_count
        .namespace_delimiter
        .unwrap_or_else(|| DEFAULT_NAMESPACE_DELIMITER.to_string());
    if namespace_delimiter.is_empty() {
        return Err(LoadError::invalid(
            "unique_count.namespace_delimiter",
            "must not be empty",
        ));
    }

    let granularity = match unique_count.granularity {
        Some(value) => Granularity::from_str(&value).map_err(|err| {
            LoadError::invalid("unique_count.granularity", err.to_string())
        })?,
        None => Granularity::Daily,
    };

    Ok(UniqueCountSettings {
        namespace_delimiter,
        bitop_ttl_seconds: unique_count
            .bitop_ttl_seconds
            .unwrap_or(DEFAULT_BITOP_TTL_SECONDS),
        granularity,
    })
}

fn build_prefix_index_settings(
    prefix_index: RawPrefixIndexSettings,
) -> Result<PrefixIndexSettings, LoadError> {
    let score_band_width = prefix_index
        .score_band_width
        .unwrap_or(DEFAULT_SCORE_BAND_WIDTH);
    if !score_band_width.is_finite() || score_band_width <= 0.0 {
        return Err(LoadError::invalid(
            "prefix_index.score_band_width",
            "must be a positive number",
        ));
    }

    let key_separator = prefix_index
        .key_separator
        .unwrap_or_else(|| DEFAULT_KEY_SEPARATOR.to_string());
    if key_separator.is_empty() {
        return Err(LoadError::invalid(
            "prefix_index.key_separator",
            "must not be empty",
        ));
    }

    Ok(PrefixIndexSettings {
        score_band_width,
        length_score: prefix_index.length_score.unwrap_or(true),
        key_separator,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    store: RawStoreSettings,
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
    unique_count: RawUniqueCountSettings,
    prefix_index: RawPrefixIndexSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(seconds) = overrides.max_cache_seconds {
            self.cache.max_cache_seconds = Some(seconds);
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_cache_seconds: Option<u64>,
    max_retries: Option<u32>,
    key_prefix: Option<String>,
    thread_local: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUniqueCountSettings {
    namespace_delimiter: Option<String>,
    bitop_ttl_seconds: Option<u64>,
    granularity: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPrefixIndexSettings {
    score_band_width: Option<f64>,
    length_score: Option<bool>,
    key_separator: Option<String>,
}
