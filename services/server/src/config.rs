use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0}: expected a positive integer, got {1:?}")]
    NotANumber(&'static str, String),
    #[error("WS_PING_PERIOD ({ping}s) must be shorter than WS_READ_DEADLINE ({read}s)")]
    PingTooSlow { ping: u64, read: u64 },
}

/// Runtime settings, all read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub read_deadline: Duration,
    pub write_deadline: Duration,
    pub ping_period: Duration,
    pub outbound_queue: usize,
    pub scheduler_interval: Duration,
    pub sweeper_interval: Duration,
    pub drain_window: Duration,
    pub push_endpoint: Option<String>,
    pub push_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same parsing as `from_env`, with the environment injected so tests do
    /// not race on process-global state.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read_deadline_secs = parse_secs(&get, "WS_READ_DEADLINE", 60)?;
        let ping_period_secs = parse_secs(&get, "WS_PING_PERIOD", 54)?;
        if ping_period_secs >= read_deadline_secs {
            return Err(ConfigError::PingTooSlow {
                ping: ping_period_secs,
                read: read_deadline_secs,
            });
        }

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            jwt_secret: get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            read_deadline: Duration::from_secs(read_deadline_secs),
            write_deadline: Duration::from_secs(parse_secs(&get, "WS_WRITE_DEADLINE", 10)?),
            ping_period: Duration::from_secs(ping_period_secs),
            outbound_queue: parse_usize(&get, "WS_OUTBOUND_QUEUE", 256)?,
            scheduler_interval: Duration::from_secs(parse_secs(&get, "SCHEDULER_INTERVAL", 30)?),
            sweeper_interval: Duration::from_secs(parse_secs(&get, "SWEEPER_INTERVAL", 60)?),
            drain_window: Duration::from_secs(parse_secs(&get, "SHUTDOWN_DRAIN", 5)?),
            push_endpoint: get("PUSH_ENDPOINT"),
            push_api_key: get("PUSH_API_KEY"),
        })
    }
}

fn parse_secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or(ConfigError::NotANumber(key, raw)),
    }
}

fn parse_usize(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or(ConfigError::NotANumber(key, raw)),
    }
}
