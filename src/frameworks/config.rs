// Runtime/server constants and env-backed config. Pattern grounded on
// `game_server::frameworks::config`'s `env::var(...).ok().and_then(parse)`
// style; the fixed algorithm constants (relaxation step, weights) live next
// to `MatchAlgorithm` instead, since they aren't deployment knobs.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub database_url: Option<String>,
    pub dev_mode: bool,
    pub process_interval: Duration,
    pub min_group_size: usize,
    pub lock_ttl: Duration,
}

fn env_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            http_port: env_var("MATCHMAKING_SERVER_PORT", 3003),
            database_url: env::var("DATABASE_URL").ok(),
            dev_mode: matches!(env::var("DEV_MODE").as_deref(), Ok("1") | Ok("true")),
            process_interval: Duration::from_millis(env_var("PROCESS_INTERVAL_MS", 5_000)),
            min_group_size: env_var("MIN_GROUP_SIZE", crate::use_cases::match_algorithm::DEFAULT_MIN_GROUP_SIZE),
            lock_ttl: Duration::from_millis(env_var("LOCK_TTL_MS", 10_000)),
        }
    }

    // Used by unit tests and by the integration-test support harness to
    // avoid touching real env vars or a real database.
    pub fn for_tests() -> Self {
        Self {
            http_port: 0,
            database_url: None,
            dev_mode: true,
            process_interval: Duration::from_secs(5),
            min_group_size: crate::use_cases::match_algorithm::DEFAULT_MIN_GROUP_SIZE,
            lock_ttl: Duration::from_secs(10),
        }
    }
}
