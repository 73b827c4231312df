use std::env;
use std::time::Duration;

use crate::reaper::ReapPolicy;

#[derive(Clone, Debug)]
pub struct Config {
    /// Unset selects the in-memory store.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub idle_timeout: Duration,
    pub reap_interval: Duration,
    /// Grace period before finished sessions are dropped.
    pub finished_retention: Duration,
    pub poll_interval: Duration,
    pub matchmaking_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            host: "0.0.0.0".to_string(),
            port: 8000,
            idle_timeout: Duration::from_secs(900),
            reap_interval: Duration::from_secs(60),
            finished_retention: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(1000),
            matchmaking_attempts: 3,
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    pub fn reap_policy(&self) -> ReapPolicy {
        ReapPolicy {
            idle: self.idle_timeout,
            keep_finished: self.finished_retention,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parsed("PORT").unwrap_or(defaults.port),
            idle_timeout: parsed::<u64>("IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            reap_interval: parsed::<u64>("REAP_INTERVAL_SECS")
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reap_interval),
            finished_retention: parsed::<u64>("FINISHED_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.finished_retention),
            poll_interval: parsed::<u64>("POLL_INTERVAL_MS")
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            matchmaking_attempts: parsed("MATCHMAKING_ATTEMPTS")
                .unwrap_or(defaults.matchmaking_attempts),
        }
    }
}
