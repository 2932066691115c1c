//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::TableRule;

mod cli;

pub use cli::{
    CacheOverrides, CheckArgs, CliArgs, Command, LoggingOverrides, StormArgs, StormOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "easecache";
const ENV_PREFIX: &str = "EASECACHE";
const DEFAULT_MEMORY_CAPACITY: u64 = 1024;
const DEFAULT_STORM_CALLERS: u64 = 10;
const DEFAULT_STORM_LATENCY_MS: u64 = 25;
const DEFAULT_STORM_USER_ID: u64 = 1;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub storm: StormSettings,
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
pub struct CacheSettings {
    pub easer: bool,
    pub backend: CacheBackend,
    pub memory_capacity: NonZeroUsize,
    pub cacheable_tables: Vec<TableRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    None,
    Memory,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend `{other}`, expected none|memory")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StormSettings {
    pub callers: NonZeroUsize,
    pub latency: Duration,
    pub user_id: u64,
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

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cache.cacheable_tables"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Storm(args)) => raw.apply_storm_overrides(&args.overrides),
        Some(Command::Check(args)) => {
            raw.apply_cache_overrides(&args.cache);
            raw.apply_logging_overrides(&args.logging);
        }
        None => raw.apply_storm_overrides(&StormOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    storm: RawStormSettings,
}

impl RawSettings {
    fn apply_storm_overrides(&mut self, overrides: &StormOverrides) {
        self.apply_cache_overrides(&overrides.cache);
        self.apply_logging_overrides(&overrides.logging);
        if let Some(callers) = overrides.callers {
            self.storm.callers = Some(callers);
        }
        if let Some(latency) = overrides.latency_ms {
            self.storm.latency_ms = Some(latency);
        }
        if let Some(user_id) = overrides.user_id {
            self.storm.user_id = Some(user_id);
        }
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(easer) = overrides.easer {
            self.cache.easer = Some(easer);
        }
        if let Some(backend) = overrides.backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(capacity) = overrides.memory_capacity {
            self.cache.memory_capacity = Some(capacity);
        }
        if !overrides.cacheable_tables.is_empty() {
            self.cache.cacheable_tables = Some(overrides.cacheable_tables.clone());
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            storm,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            storm: build_storm_settings(storm)?,
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => CacheBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackend::None,
    };

    let memory_capacity = non_zero_usize(
        cache.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY),
        "cache.memory_capacity",
    )?;

    let cacheable_tables = cache
        .cacheable_tables
        .unwrap_or_default()
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| {
            TableRule::pattern(pattern).map_err(|err| {
                LoadError::invalid(
                    "cache.cacheable_tables",
                    format!("invalid pattern `{pattern}`: {err}"),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CacheSettings {
        easer: cache.easer.unwrap_or(false),
        backend,
        memory_capacity,
        cacheable_tables,
    })
}

fn build_storm_settings(storm: RawStormSettings) -> Result<StormSettings, LoadError> {
    let callers = non_zero_usize(
        storm.callers.unwrap_or(DEFAULT_STORM_CALLERS),
        "storm.callers",
    )?;

    Ok(StormSettings {
        callers,
        latency: Duration::from_millis(storm.latency_ms.unwrap_or(DEFAULT_STORM_LATENCY_MS)),
        user_id: storm.user_id.unwrap_or(DEFAULT_STORM_USER_ID),
    })
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
    easer: Option<bool>,
    backend: Option<String>,
    memory_capacity: Option<u64>,
    cacheable_tables: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStormSettings {
    callers: Option<u64>,
    latency_ms: Option<u64>,
    user_id: Option<u64>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
