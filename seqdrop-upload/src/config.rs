use std::env;
use std::time::Duration;
use thiserror::Error;

/// Smallest part the S3 multipart protocol accepts (except the last one).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Error, Debug)]
#[error("Configuration error: {0}")]
pub struct ConfigError(String);

#[derive(Clone, Debug)]
pub struct Config {
    pub server_url: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub part_size: u64,
    pub progress_steps: u32,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_url: "http://localhost:3000".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_endpoint: None,
            part_size: 8 * 1024 * 1024,
            progress_steps: 400,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let part_size_mb: u64 = parse_or(&lookup, "SEQDROP_PART_SIZE_MB", 8)?;
        let part_size = part_size_mb * 1024 * 1024;
        if part_size < MIN_PART_SIZE {
            return Err(ConfigError(
                "SEQDROP_PART_SIZE_MB must be at least 5".to_string(),
            ));
        }

        let progress_steps: u32 =
            parse_or(&lookup, "SEQDROP_PROGRESS_STEPS", defaults.progress_steps)?;
        if progress_steps == 0 {
            return Err(ConfigError(
                "SEQDROP_PROGRESS_STEPS must be positive".to_string(),
            ));
        }

        let timeout_secs: u64 = parse_or(&lookup, "SEQDROP_TIMEOUT_SECS", 30)?;

        Ok(Config {
            server_url: lookup("SEQDROP_SERVER").unwrap_or(defaults.server_url),
            s3_region: lookup("SEQDROP_S3_REGION").unwrap_or(defaults.s3_region),
            s3_endpoint: lookup("SEQDROP_S3_ENDPOINT").filter(|e| !e.is_empty()),
            part_size,
            progress_steps,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError(format!("Invalid {}", name))),
        None => Ok(default),
    }
}
