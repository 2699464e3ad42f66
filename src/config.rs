use crate::error::ConfigError;
use serde_derive::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://server.aquawiz.net/api/v1";
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 600;
pub const MIN_UPDATE_INTERVAL_SECS: u64 = 60;
pub const MAX_UPDATE_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;
pub const MAX_LOOKBACK_DAYS: u32 = 31;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Seconds between polls, always within 60..=3600
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PollInterval(u64);

impl PollInterval {
    pub fn new(seconds: u64) -> Result<Self, ConfigError> {
        if (MIN_UPDATE_INTERVAL_SECS..=MAX_UPDATE_INTERVAL_SECS).contains(&seconds) {
            Ok(Self(seconds))
        } else {
            Err(ConfigError::PollIntervalOutOfRange(seconds))
        }
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self(DEFAULT_UPDATE_INTERVAL_SECS)
    }
}

impl TryFrom<u64> for PollInterval {
    type Error = ConfigError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PollInterval> for u64 {
    fn from(value: PollInterval) -> Self {
        value.0
    }
}

/// Login details for the AquaWiz account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the bridge needs to run, passed explicitly into the client and coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub credentials: Credentials,
    pub device_id: Option<String>,
    pub update_interval: PollInterval,
    pub lookback_days: u32,
    pub api_url: String,
    pub request_timeout: Duration,
}

impl Config {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            device_id: None,
            update_interval: PollInterval::default(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any name -> value lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let username =
            var("AQUAWIZ_USERNAME").ok_or(ConfigError::Missing("AQUAWIZ_USERNAME"))?;
        let password =
            var("AQUAWIZ_PASSWORD").ok_or(ConfigError::Missing("AQUAWIZ_PASSWORD"))?;

        let mut config = Self::new(Credentials::new(username, password));
        config.device_id = var("AQUAWIZ_DEVICE_ID");

        let interval = var("AQUAWIZ_UPDATE_INTERVAL");
        if let Some(seconds) = parse_var::<u64>("AQUAWIZ_UPDATE_INTERVAL", interval)? {
            config.update_interval = PollInterval::new(seconds)?;
        }

        let lookback = var("AQUAWIZ_LOOKBACK_DAYS");
        if let Some(days) = parse_var::<u32>("AQUAWIZ_LOOKBACK_DAYS", lookback.clone())? {
            if !(1..=MAX_LOOKBACK_DAYS).contains(&days) {
                return Err(ConfigError::InvalidValue {
                    name: "AQUAWIZ_LOOKBACK_DAYS",
                    value: lookback.unwrap_or_default(),
                });
            }
            config.lookback_days = days;
        }

        if let Some(url) = var("AQUAWIZ_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        let timeout = var("AQUAWIZ_REQUEST_TIMEOUT");
        if let Some(seconds) = parse_var::<u64>("AQUAWIZ_REQUEST_TIMEOUT", timeout.clone())? {
            // A zero timeout fails every request
            if seconds == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "AQUAWIZ_REQUEST_TIMEOUT",
                    value: timeout.unwrap_or_default(),
                });
            }
            config.request_timeout = Duration::from_secs(seconds);
        }

        Ok(config)
    }

    /// The selected device, which polling cannot start without
    pub fn require_device(&self) -> Result<&str, ConfigError> {
        self.device_id.as_deref().ok_or(ConfigError::MissingDevice)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.lookback_days))
    }
}

fn parse_var<T: FromStr>(
    name: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}
