//! Runner configuration loaded from environment variables.

use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use uuid::Uuid;

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub api_key: String,
    pub worker_id: String,

    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub dir_delay_min: Duration,
    pub dir_delay_max: Duration,
    pub max_concurrent_attempts: usize,
    pub attempt_timeout: Duration,
    pub ai_probability_threshold: f64,
    pub escalation_threshold: u32,
    pub directory_list_path: Option<String>,

    pub health_ewma_alpha: f64,
    pub health_unhealthy_success_rate: f64,
    pub health_unhealthy_observation_count: u32,
    pub health_recovery_success_rate: f64,
    pub health_recovery_streak_required: u32,
}

impl Config {
    /// Load configuration from environment variables, loading a `.env` file
    /// first if present (development convenience).
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            api_base: env_var("AUTOBOLT_API_BASE").context("AUTOBOLT_API_BASE must be set")?,
            api_key: env_var("AUTOBOLT_API_KEY").context("AUTOBOLT_API_KEY must be set")?,
            worker_id: env_var("WORKER_ID").unwrap_or_else(|| format!("worker-{}", Uuid::new_v4())),

            poll_interval: millis("POLL_INTERVAL", 5_000)?,
            heartbeat_interval: millis("HEARTBEAT_INTERVAL", 30_000)?,
            dir_delay_min: millis("DIR_DELAY_MIN", 2_000)?,
            dir_delay_max: millis("DIR_DELAY_MAX", 5_000)?,
            max_concurrent_attempts: parse("MAX_CONCURRENT_ATTEMPTS", 20usize)?,
            attempt_timeout: millis("ATTEMPT_TIMEOUT", 60_000)?,
            ai_probability_threshold: parse("AI_PROBABILITY_THRESHOLD", 0.60f64)?,
            escalation_threshold: parse("ESCALATION_THRESHOLD", 3u32)?,
            directory_list_path: env_var("DIRECTORY_LIST_PATH"),

            health_ewma_alpha: parse("HEALTH_EWMA_ALPHA", 0.2f64)?,
            health_unhealthy_success_rate: parse("HEALTH_UNHEALTHY_SUCCESS_RATE", 0.20f64)?,
            health_unhealthy_observation_count: parse("HEALTH_UNHEALTHY_OBSERVATION_COUNT", 20u32)?,
            health_recovery_success_rate: parse("HEALTH_RECOVERY_SUCCESS_RATE", 0.50f64)?,
            health_recovery_streak_required: parse("HEALTH_RECOVERY_STREAK_REQUIRED", 10u32)?,
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{name} must be a valid value: {e}")),
    }
}

fn millis(name: &str, default_ms: u64) -> Result<Duration> {
    parse(name, default_ms).map(Duration::from_millis)
}
