use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

use crate::domain::query::{Aggregate, Operator, ScoreBound};
use crate::domain::score::SortDirection;
use crate::domain::weighted_key::WeightedKey;

/// Command-line arguments for the zcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "zcache",
    version,
    about = "Cached set algebra over Redis sorted sets"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ZCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    #[arg(long = "store-url", value_name = "URL", global = true)]
    pub store_url: Option<String>,

    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    #[arg(long = "max-cache-seconds", value_name = "SECONDS", global = true)]
    pub max_cache_seconds: Option<u64>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Count members of a combination, optionally inside a score band.
    Count(CountArgs),
    /// Read members of a combination by rank or by score.
    Range(RangeArgs),
    /// Materialise a combination and print its key.
    Key(KeyArgs),
    /// Maintain and query a prefix index.
    Index(IndexArgs),
    /// Track and count unique ids per event.
    Uniques(UniquesArgs),
}

/// Inputs shared by every query command.
#[derive(Debug, Args, Clone)]
pub struct CombineArgs {
    /// Sorted sets as `name` or `name*weight`.
    #[arg(value_name = "BIND", required = true, num_args = 1..)]
    pub bind: Vec<WeightedKey>,

    #[arg(long, default_value_t = Operator::Union)]
    pub operator: Operator,

    #[arg(long, default_value_t = Aggregate::Max)]
    pub aggregate: Aggregate,

    /// Seconds to keep the combination; 0 drops it after the call.
    #[arg(long, default_value_t = 0)]
    pub ttl: u64,

    #[arg(long = "thread-local")]
    pub thread_local: bool,

    #[arg(long)]
    pub cachebust: bool,
}

#[derive(Debug, Args, Clone, Default)]
pub struct ScoreArgs {
    /// Lower score bound (`5`, `(5`, `-inf`).
    #[arg(long = "min", value_name = "SCORE", allow_hyphen_values = true)]
    pub min: Option<ScoreBound>,

    /// Upper score bound (`15`, `(15`, `+inf`).
    #[arg(long = "max", value_name = "SCORE", allow_hyphen_values = true)]
    pub max: Option<ScoreBound>,
}

#[derive(Debug, Args, Clone)]
pub struct CountArgs {
    #[command(flatten)]
    pub combine: CombineArgs,

    #[command(flatten)]
    pub scores: ScoreArgs,
}

#[derive(Debug, Args, Clone)]
pub struct RangeArgs {
    #[command(flatten)]
    pub combine: CombineArgs,

    #[command(flatten)]
    pub scores: ScoreArgs,

    #[arg(long, allow_hyphen_values = true)]
    pub start: i64,

    #[arg(long, allow_hyphen_values = true)]
    pub end: i64,

    /// Lowest score first.
    #[arg(long)]
    pub ascending: bool,

    #[arg(long = "with-scores")]
    pub with_scores: bool,

    #[arg(long)]
    pub retries: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    #[command(flatten)]
    pub combine: CombineArgs,
}

#[derive(Debug, Args, Clone)]
pub struct IndexArgs {
    #[arg(long = "index", default_value = "prefix", global = true)]
    pub index: String,

    #[command(subcommand)]
    pub command: IndexCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum IndexCommand {
    Add(IndexEntryArgs),
    Remove(IndexEntryArgs),
    Match(IndexMatchArgs),
}

#[derive(Debug, Args, Clone)]
pub struct IndexEntryArgs {
    pub id: String,

    pub text: String,

    #[arg(long = "min-prefix", default_value_t = 1)]
    pub min_prefix: usize,

    /// Secondary sort score as `value:asc` or `value:desc`, most significant first.
    #[arg(long = "sort", value_name = "SCORE:DIR", value_parser = parse_secondary_score, allow_hyphen_values = true)]
    pub sort: Vec<(f64, SortDirection)>,
}

#[derive(Debug, Args, Clone)]
pub struct IndexMatchArgs {
    pub query: String,

    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub start: i64,

    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub end: i64,

    #[arg(long = "with-scores")]
    pub with_scores: bool,

    #[arg(long, default_value_t = 0)]
    pub ttl: u64,
}

#[derive(Debug, Args, Clone)]
pub struct UniquesArgs {
    #[arg(long, default_value = "global", global = true)]
    pub namespace: String,

    #[command(subcommand)]
    pub command: UniquesCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum UniquesCommand {
    Track(TrackArgs),
    Count(UniquesCountArgs),
    Ids(IdsArgs),
}

#[derive(Debug, Args, Clone)]
pub struct TrackArgs {
    pub event: String,

    pub id: String,

    /// Event time as `YYYY-MM-DDTHH:MM:SS`; defaults to now (UTC).
    #[arg(long, value_parser = parse_datetime)]
    pub at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Args, Clone)]
pub struct UniquesCountArgs {
    pub event: String,

    #[arg(value_parser = parse_moment)]
    pub from: PrimitiveDateTime,

    #[arg(value_parser = parse_moment)]
    pub to: PrimitiveDateTime,
}

#[derive(Debug, Args, Clone)]
pub struct IdsArgs {
    pub event: String,

    #[arg(long, value_parser = parse_moment)]
    pub at: Option<PrimitiveDateTime>,
}

fn parse_secondary_score(value: &str) -> Result<(f64, SortDirection), String> {
    let (score, direction) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected SCORE:asc|desc, got `{value}`"))?;
    let score = score
        .parse::<f64>()
        .map_err(|err| format!("invalid score `{score}`: {err}"))?;
    let direction = direction
        .parse::<SortDirection>()
        .map_err(|err| err.to_string())?;
    Ok((score, direction))
}

fn parse_datetime(value: &str) -> Result<PrimitiveDateTime, String> {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(value, format).map_err(|err| format!("invalid timestamp `{value}`: {err}"))
}

/// A full timestamp or a bare `YYYY-MM-DD` date at midnight.
fn parse_moment(value: &str) -> Result<PrimitiveDateTime, String> {
    let format = format_description!("[year]-[month]-[day]");
    match Date::parse(value, format) {
        Ok(date) => Ok(date.midnight()),
        Err(_) => parse_datetime(value),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn secondary_score_syntax() {
        assert_eq!(parse_secondary_score("12.5:desc"), Ok((12.5, SortDirection::Desc)));
        assert_eq!(parse_secondary_score("-3:asc"), Ok((-3.0, SortDirection::Asc)));
        assert!(parse_secondary_score("12").is_err());
        assert!(parse_secondary_score("12:up").is_err());
    }

    #[test]
    fn moments_accept_dates_and_timestamps() {
        assert_eq!(parse_moment("2024-03-09"), Ok(datetime!(2024-03-09 00:00)));
        assert_eq!(
            parse_moment("2024-03-09T13:45:10"),
            Ok(datetime!(2024-03-09 13:45:10))
        );
        assert!(parse_moment("yesterday").is_err());
    }
}
