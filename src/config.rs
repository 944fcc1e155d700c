//! Server Configuration
//!
//! Defaults plus hand-parsed command-line flags. Intervals use the compact
//! `1Y2M3D4h5m6s` form where every unit is optional but the order is fixed
//! (a year counts 365 days, a month 30 days).

use crate::commands::DEFAULT_DATABASES;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default append log location
pub const DEFAULT_APPEND_FILE: &str = "append-only.aof";

/// Default compacted snapshot location
pub const DEFAULT_CLONE_FILE: &str = "data.rcl";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for {flag}: {reason}")]
    InvalidValue {
        flag: String,
        value: String,
        reason: String,
    },

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// Settings of the persistence driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistConfig {
    pub append_file: PathBuf,
    pub clone_file: PathBuf,
    /// How often buffered log records reach the append log
    pub flush_interval: Duration,
    /// How often a full clone cycle runs
    pub rewrite_interval: Duration,
    /// Replay the clone file and append log at startup
    pub restore: bool,
    /// Keep a timestamped copy of every committed clone file
    pub save_copy: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            append_file: PathBuf::from(DEFAULT_APPEND_FILE),
            clone_file: PathBuf::from(DEFAULT_CLONE_FILE),
            flush_interval: Duration::from_secs(1),
            rewrite_interval: Duration::from_secs(60 * 60),
            restore: true,
            save_copy: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub databases: usize,
    /// Per-read deadline on client sockets. `None` waits forever.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub persist: PersistConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            databases: DEFAULT_DATABASES,
            read_timeout: None,
            write_timeout: None,
            persist: PersistConfig::default(),
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliAction {
    Run(ServerConfig),
    Help,
    Version,
}

impl ServerConfig {
    /// Parses command-line arguments, without the program name.
    pub fn from_args<I>(args: I) -> Result<CliAction, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = ServerConfig::default();
        let mut args = args.into_iter();

        while let Some(flag) = args.next() {
            let mut value = || args.next().ok_or_else(|| ConfigError::MissingValue(flag.clone()));
            match flag.as_str() {
                "--host" | "-h" => config.host = value()?,
                "--port" | "-p" => config.port = parse_number(&flag, &value()?)?,
                "--databases" | "-d" => {
                    let databases: usize = parse_number(&flag, &value()?)?;
                    if databases == 0 {
                        return Err(invalid(&flag, "0", "at least one dataset is required"));
                    }
                    config.databases = databases;
                }
                "--append-file" => config.persist.append_file = PathBuf::from(value()?),
                "--clone-file" => config.persist.clone_file = PathBuf::from(value()?),
                "--flush-interval" => {
                    let raw = value()?;
                    config.persist.flush_interval = parse_interval(&flag, &raw)?;
                }
                "--rewrite-interval" => {
                    let raw = value()?;
                    config.persist.rewrite_interval = parse_interval(&flag, &raw)?;
                }
                "--read-timeout" => config.read_timeout = parse_timeout(&flag, &value()?)?,
                "--write-timeout" => config.write_timeout = parse_timeout(&flag, &value()?)?,
                "--no-restore" => config.persist.restore = false,
                "--save-copy" => config.persist.save_copy = true,
                "--help" => return Ok(CliAction::Help),
                "--version" | "-v" => return Ok(CliAction::Version),
                _ => return Err(ConfigError::UnknownArgument(flag.clone())),
            }
        }

        Ok(CliAction::Run(config))
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn invalid(flag: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| invalid(flag, value, "not a valid number"))
}

/// Milliseconds, where 0 disables the timeout.
fn parse_timeout(flag: &str, value: &str) -> Result<Option<Duration>, ConfigError> {
    let millis: u64 = parse_number(flag, value)?;
    Ok((millis > 0).then(|| Duration::from_millis(millis)))
}

fn parse_interval(flag: &str, value: &str) -> Result<Duration, ConfigError> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        Some(_) => Err(invalid(flag, value, "interval must be positive")),
        None => Err(invalid(flag, value, "expected a duration like 1Y2M3D4h5m6s")),
    }
}

/// Parses `1Y2M3D4h5m6s`. Units may be omitted but must appear in this order.
pub fn parse_duration(s: &str) -> Option<Duration> {
    const UNITS: [(char, u64); 6] = [
        ('Y', 365 * 24 * 60 * 60),
        ('M', 30 * 24 * 60 * 60),
        ('D', 24 * 60 * 60),
        ('h', 60 * 60),
        ('m', 60),
        ('s', 1),
    ];

    if s.is_empty() {
        return None;
    }

    let mut rest = s;
    let mut seconds: u64 = 0;
    let mut next_unit = 0;

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        let unit = rest[digits..].chars().next()?;

        let offset = UNITS[next_unit..].iter().position(|(u, _)| *u == unit)?;
        let (_, scale) = UNITS[next_unit + offset];
        seconds = seconds.checked_add(amount.checked_mul(scale)?)?;
        next_unit += offset + 1;
        rest = &rest[digits + unit.len_utf8()..];
    }

    Some(Duration::from_secs(seconds))
}

pub fn help_text() -> String {
    format!(
        r#"
FrostKV - An In-Memory Key-Value Store with Snapshot Persistence

USAGE:
    frostkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>                Host to bind to (default: {host})
    -p, --port <PORT>                Port to listen on (default: {port})
    -d, --databases <N>              Number of datasets (default: {databases})
        --append-file <PATH>         Append log file (default: {append})
        --clone-file <PATH>          Compacted snapshot file (default: {clone})
        --flush-interval <DURATION>  Append log flush interval (default: 1s)
        --rewrite-interval <DURATION>
                                     Snapshot rewrite interval (default: 1h)
        --read-timeout <MILLIS>      Client read timeout, 0 = none (default: 0)
        --write-timeout <MILLIS>     Client write timeout, 0 = none (default: 0)
        --no-restore                 Skip replaying persisted files at startup
        --save-copy                  Keep a timestamped copy of each snapshot
    -v, --version                    Print version information
        --help                       Print this help message

DURATIONS:
    1Y2M3D4h5m6s  (Y = 365 days, M = 30 days; every unit optional)

EXAMPLES:
    frostkv                               # Start on {host}:{port}
    frostkv --flush-interval 5s           # Flush the append log every 5 seconds
    frostkv --rewrite-interval 1D --save-copy
"#,
        host = DEFAULT_HOST,
        port = DEFAULT_PORT,
        databases = DEFAULT_DATABASES,
        append = DEFAULT_APPEND_FILE,
        clone = DEFAULT_CLONE_FILE,
    )
}
