use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub webhook_secret: String,
    pub tuning: SessionTuning,
}

/// Timing and retry budgets of the attempt session core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTuning {
    pub deadline_tick: Duration,
    pub autosave_interval: Duration,
    pub autosave_retry_delay: Duration,
    pub submit_max_attempts: u32,
    pub submit_retry_delay: Duration,
    /// How long a submitted session stays in memory for late score pushes.
    pub terminal_retention: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            deadline_tick: Duration::from_secs(1),
            autosave_interval: Duration::from_secs(30),
            autosave_retry_delay: Duration::from_secs(2),
            submit_max_attempts: 3,
            submit_retry_delay: Duration::from_secs(1),
            terminal_retention: Duration::from_secs(10 * 60),
        }
    }
}

impl SessionTuning {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let tuning = Self {
            deadline_tick: get_env_millis("DEADLINE_TICK_MS")?.unwrap_or(defaults.deadline_tick),
            autosave_interval: get_env_parse_opt::<u64>("AUTOSAVE_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.autosave_interval),
            autosave_retry_delay: get_env_millis("AUTOSAVE_RETRY_DELAY_MS")?
                .unwrap_or(defaults.autosave_retry_delay),
            submit_max_attempts: get_env_parse_opt("SUBMIT_MAX_ATTEMPTS")?
                .unwrap_or(defaults.submit_max_attempts),
            submit_retry_delay: get_env_millis("SUBMIT_RETRY_DELAY_MS")?
                .unwrap_or(defaults.submit_retry_delay),
            terminal_retention: get_env_parse_opt::<u64>("TERMINAL_RETENTION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.terminal_retention),
        };
        tuning.validate()?;
        Ok(tuning)
    }

    pub fn validate(&self) -> Result<()> {
        if self.deadline_tick.is_zero() || self.autosave_interval.is_zero() {
            return Err(Error::Config("tick and autosave intervals must be positive".into()));
        }
        if self.submit_max_attempts == 0 {
            return Err(Error::Config("SUBMIT_MAX_ATTEMPTS must be at least 1".into()));
        }
        Ok(())
    }
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            webhook_secret: get_env("WEBHOOK_SECRET")?,
            tuning: SessionTuning::from_env()?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_opt<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

fn get_env_millis(name: &str) -> Result<Option<Duration>> {
    Ok(get_env_parse_opt::<u64>(name)?.map(Duration::from_millis))
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tuning_matches_reference_budgets() {
        let tuning = SessionTuning::default();
        assert_eq!(tuning.deadline_tick, Duration::from_secs(1));
        assert_eq!(tuning.autosave_interval, Duration::from_secs(30));
        assert_eq!(tuning.autosave_retry_delay, Duration::from_secs(2));
        assert_eq!(tuning.submit_max_attempts, 3);
        assert_eq!(tuning.submit_retry_delay, Duration::from_secs(1));
        assert_eq!(tuning.terminal_retention, Duration::from_secs(600));
        assert!(tuning.validate().is_ok());
    }

    #[test]
    fn zero_attempt_budget_is_rejected() {
        let tuning = SessionTuning {
            submit_max_attempts: 0,
            ..SessionTuning::default()
        };
        assert!(matches!(tuning.validate(), Err(Error::Config(_))));
    }
}
