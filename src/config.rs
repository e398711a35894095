//! Server configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
pub const DEFAULT_FRAGMENT_HISTORY: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

impl crate::fragment::ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        "E_CONFIG"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Read timeout per connection. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Largest inbound message the transport will assemble.
    pub max_message_bytes: usize,
    /// How long shutdown waits for open connections to drain.
    pub shutdown_grace: Duration,
    /// Capacity of the recent-fragment history. Zero disables it.
    pub fragment_history: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            fragment_history: DEFAULT_FRAGMENT_HISTORY,
        }
    }
}

impl ServerConfig {
    /// Build typed server config from environment variables.
    ///
    /// Optional:
    /// - `HOST`: default `0.0.0.0`
    /// - `PORT`: default 8765
    /// - `IDLE_TIMEOUT_SECS`: default 300, `0` disables
    /// - `MAX_MESSAGE_BYTES`: default 64 MiB
    /// - `SHUTDOWN_GRACE_SECS`: default 10
    /// - `FRAGMENT_HISTORY`: default 32, `0` disables
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `HOST` is empty or `PORT` is not a
    /// port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] but reads from `lookup`.
    ///
    /// # Errors
    ///
    /// See [`ServerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = match lookup("HOST") {
            Some(h) if h.trim().is_empty() => return Err(ConfigError::Invalid { var: "HOST", value: h }),
            Some(h) => h.trim().to_string(),
            None => DEFAULT_HOST.to_string(),
        };
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { var: "PORT", value: raw.clone() })?,
            None => DEFAULT_PORT,
        };

        let idle_secs = parse_or(&lookup, "IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS);
        let idle_timeout = (idle_secs > 0).then(|| Duration::from_secs(idle_secs));

        Ok(Self {
            host,
            port,
            idle_timeout,
            max_message_bytes: parse_or(&lookup, "MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES),
            shutdown_grace: Duration::from_secs(parse_or(&lookup, "SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS)),
            fragment_history: parse_or(&lookup, "FRAGMENT_HISTORY", DEFAULT_FRAGMENT_HISTORY),
        })
    }

    /// `host:port` suitable for `TcpListener::bind`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
