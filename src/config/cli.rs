use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the easecache binary.
#[derive(Debug, Parser)]
#[command(
    name = "easecache",
    version,
    about = "Query result caching and read coalescing layer"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "EASECACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Fire concurrent identical reads against a simulated store and report what ran.
    Storm(Box<StormArgs>),
    /// Print the cache eligibility verdict for each table.
    Check(CheckArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct StormArgs {
    #[command(flatten)]
    pub overrides: StormOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StormOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the number of concurrent callers.
    #[arg(long = "storm-callers", value_name = "COUNT")]
    pub callers: Option<u64>,

    /// Override the simulated store latency.
    #[arg(long = "storm-latency-ms", value_name = "MILLIS")]
    pub latency_ms: Option<u64>,

    /// Override the user row every caller reads.
    #[arg(long = "storm-user-id", value_name = "ID")]
    pub user_id: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Tables to check.
    #[arg(value_name = "TABLE", required = true)]
    pub tables: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Toggle read coalescing.
    #[arg(
        long = "cache-easer",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub easer: Option<bool>,

    /// Override the cache backend (none|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Override the in-memory backend capacity.
    #[arg(long = "cache-memory-capacity", value_name = "ENTRIES")]
    pub memory_capacity: Option<u64>,

    /// Replace the cacheable table patterns; repeat for several.
    #[arg(long = "cache-table", value_name = "PATTERN")]
    pub cacheable_tables: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
