//! tunebot-core/src/config.rs
//!
//! Runtime configuration, read from the process environment (and a `.env`
//! file when present).

use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::Error;
use crate::services::playback::PlaybackPolicy;

pub const DEFAULT_PREFIX: &str = "!";
pub const DEFAULT_DASHBOARD_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub discord_token: String,
    pub command_prefix: String,
    /// `None` disables the dashboard.
    pub dashboard_addr: Option<SocketAddr>,
    pub playback: PlaybackPolicy,
}

impl BotConfig {
    /// Loads `.env` (if any) and then reads the environment.
    pub fn from_env() -> Result<Self, Error> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Config("DISCORD_TOKEN is not set".into()))?;

        let command_prefix = lookup("COMMAND_PREFIX")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        let dashboard_addr = match lookup("DASHBOARD_ADDR") {
            Some(addr) => Some(addr.parse::<SocketAddr>()?),
            None => {
                let port = parse_or(&lookup, "DASHBOARD_PORT", DEFAULT_DASHBOARD_PORT)?;
                Some(SocketAddr::from(([0, 0, 0, 0], port)))
            }
        };

        let defaults = PlaybackPolicy::default();
        let playback = PlaybackPolicy {
            max_attempts: parse_or(&lookup, "PLAYBACK_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            retry_backoff: millis_or(&lookup, "PLAYBACK_RETRY_BACKOFF_MS", defaults.retry_backoff)?,
            min_audible: secs_or(&lookup, "PLAYBACK_MIN_AUDIBLE_SECS", defaults.min_audible)?,
            resource_timeout: millis_or(&lookup, "PLAYBACK_RESOURCE_TIMEOUT_MS", defaults.resource_timeout)?,
            idle_timeout: secs_or(&lookup, "PLAYBACK_IDLE_TIMEOUT_SECS", defaults.idle_timeout)?,
            skip_delay: millis_or(&lookup, "PLAYBACK_SKIP_DELAY_MS", defaults.skip_delay)?,
            search_attempts: parse_or(&lookup, "SEARCH_ATTEMPTS", defaults.search_attempts)?.max(1),
            search_retry_delay: millis_or(&lookup, "SEARCH_RETRY_DELAY_MS", defaults.search_retry_delay)?,
        };

        Ok(Self {
            discord_token,
            command_prefix,
            dashboard_addr,
            playback,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, Error>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let ms = parse_or(lookup, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = parse_or(lookup, key, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}
