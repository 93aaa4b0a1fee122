//! Configuration module for APATIT.
//!
//! Every option can be given as a command-line flag or an environment variable.

use clap::Parser;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors that abort startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("API key is required, please set --api-key or API_KEY environment variable")]
    MissingApiKey,
    #[error("task IDs are required, please set --task-ids or TASK_IDS environment variable")]
    MissingTaskIds,
    #[error("invalid task IDs format: '{0}' is not a valid integer")]
    InvalidTaskId(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Exporter configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "apatit")]
#[command(about = "Advanced Ping-Admin Task Indicators Transducer", long_about = None)]
pub struct Config {
    /// API key for Ping-Admin
    #[arg(long, env = "API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Comma-separated list of task IDs
    #[arg(long = "task-ids", env = "TASK_IDS", default_value = "")]
    pub task_ids_raw: String,

    /// Translate monitoring point names to English
    #[arg(long, env = "ENG_MP_NAMES", default_value_t = true, action = clap::ArgAction::Set)]
    pub eng_mp_names: bool,

    /// Fixed Ping-Admin API delay for new data update
    #[arg(long, env = "API_UPDATE_DELAY", default_value = "4m", value_parser = parse_duration)]
    pub api_update_delay: Duration,

    /// Fixed Ping-Admin API time between data points
    #[arg(long, env = "API_DATA_TIME_STEP", default_value = "3m", value_parser = parse_duration)]
    pub api_data_time_step: Duration,

    /// Exporter's refresh interval
    #[arg(long, env = "REFRESH_INTERVAL", default_value = "3m", value_parser = parse_duration)]
    pub refresh_interval: Duration,

    /// Maximum allowed staleness steps (exposed as a gauge)
    #[arg(long, env = "MAX_ALLOWED_STALENESS_STEPS", default_value_t = 3)]
    pub max_allowed_staleness_steps: u32,

    /// Minimum delay before an API request (randomized between this and doubled value)
    #[arg(long, env = "REQUEST_DELAY", default_value = "2s", value_parser = parse_duration)]
    pub request_delay: Duration,

    /// Maximum number of attempts for each API request
    #[arg(long, env = "REQUEST_RETRIES", default_value_t = 3)]
    pub request_retries: u32,

    /// Maximum number of API requests allowed per second
    #[arg(long, env = "MAX_REQUESTS_PER_SECOND", default_value_t = 2)]
    pub max_requests_per_second: usize,

    /// Address to listen on for HTTP requests
    #[arg(long, env = "LISTEN_ADDRESS", default_value = "0.0.0.0:8080")]
    pub listen_address: String,

    /// Path to the locations.json translation file
    #[arg(long = "locations-file", env = "LOCATIONS_FILE", default_value = "locations.json")]
    pub locations_file: String,

    /// Ping-Admin API base URL
    #[arg(long, env = "API_ENDPOINT", default_value = "https://ping-admin.com")]
    pub api_endpoint: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (json or text)
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    #[arg(skip)]
    pub task_ids: Vec<i64>,
}

impl Config {
    /// Parse flags and environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::parse();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check required options and resolve derived fields.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        self.task_ids = parse_task_ids(&self.task_ids_raw)?;
        if self.task_ids.is_empty() {
            return Err(ConfigError::MissingTaskIds);
        }

        if self.refresh_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("refresh interval"));
        }
        if self.api_data_time_step.is_zero() {
            return Err(ConfigError::ZeroDuration("API data time step"));
        }

        // Go-style ":8080" means all interfaces.
        if self.listen_address.starts_with(':') {
            self.listen_address = format!("0.0.0.0{}", self.listen_address);
        }

        Ok(())
    }
}

/// Split a comma-separated list of task IDs, skipping blank items.
pub fn parse_task_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| ConfigError::InvalidTaskId(part.to_string()))
        })
        .collect()
}

/// Parse a duration such as `500ms`, `30s`, `4m`, `1h` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("invalid duration '{}'", s);

    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        scaled_secs(mins, 60).ok_or_else(invalid)
    } else if let Some(hours) = s.strip_suffix('h') {
        scaled_secs(hours, 3600).ok_or_else(invalid)
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}

/// `value * unit` seconds, or `None` on a parse error or overflow.
fn scaled_secs(value: &str, unit: u64) -> Option<Duration> {
    value
        .parse::<u64>()
        .ok()
        .and_then(|v| v.checked_mul(unit))
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(args: &[&str]) -> Config {
        let mut argv = vec!["apatit"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = parse_args(&["--api-key", "k", "--task-ids", "1"]);
        assert!(cfg.eng_mp_names);
        assert_eq!(cfg.api_update_delay, Duration::from_secs(240));
        assert_eq!(cfg.api_data_time_step, Duration::from_secs(180));
        assert_eq!(cfg.refresh_interval, Duration::from_secs(180));
        assert_eq!(cfg.max_allowed_staleness_steps, 3);
        assert_eq!(cfg.request_delay, Duration::from_secs(2));
        assert_eq!(cfg.request_retries, 3);
        assert_eq!(cfg.max_requests_per_second, 2);
        assert_eq!(cfg.listen_address, "0.0.0.0:8080");
        assert_eq!(cfg.api_endpoint, "https://ping-admin.com");
    }

    #[test]
    fn test_validate_resolves_task_ids_and_address() {
        let mut cfg = parse_args(&[
            "--api-key",
            "k",
            "--task-ids",
            " 123, ,456 ",
            "--listen-address",
            ":9100",
            "--eng-mp-names",
            "false",
        ]);
        cfg.validate().unwrap();
        assert_eq!(cfg.task_ids, vec![123, 456]);
        assert_eq!(cfg.listen_address, "0.0.0.0:9100");
        assert!(!cfg.eng_mp_names);
    }

    #[test]
    fn test_validate_requires_api_key_and_tasks() {
        let mut cfg = parse_args(&["--task-ids", "1"]);
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingApiKey)));

        let mut cfg = parse_args(&["--api-key", "k", "--task-ids", " , "]);
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingTaskIds)));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut cfg = parse_args(&["--api-key", "k", "--task-ids", "1", "--refresh-interval", "0"]);
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroDuration(_))));
    }

    #[test]
    fn test_parse_task_ids_rejects_garbage() {
        match parse_task_ids("1,abc") {
            Err(ConfigError::InvalidTaskId(part)) => assert_eq!(part, "abc"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("4m"), Ok(Duration::from_secs(240)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Ok(Duration::from_secs(10)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
        assert!(parse_duration(&format!("{}h", u64::MAX / 3600 + 1)).is_err());
        assert_eq!(
            parse_duration(&format!("{}h", u64::MAX / 3600)),
            Ok(Duration::from_secs(u64::MAX / 3600 * 3600))
        );
    }
}
