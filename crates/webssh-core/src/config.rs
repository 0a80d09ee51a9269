//! Bridge configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bytes read from a remote output stream per message.
pub const DEFAULT_BUFFER_SIZE: u32 = 8192;
/// Terminal type used when the peer never sends `term`.
pub const DEFAULT_TERM: &str = "xterm";
/// Bound on dialing and on the SSH handshake plus authentication.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;
/// PTY rows used when the auth message carries `rows = 0`.
pub const DEFAULT_PTY_ROWS: u32 = 80;
/// PTY columns used when the auth message carries `cols = 0`.
pub const DEFAULT_PTY_COLS: u32 = 40;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Per-bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Read chunk size for output pumps; also sent as the PTY terminal speed.
    pub buffer_size: u32,
    /// Terminal type until the peer overrides it.
    pub default_term: String,
    /// Connect and handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    pub default_rows: u32,
    pub default_cols: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            default_term: DEFAULT_TERM.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            default_rows: DEFAULT_PTY_ROWS,
            default_cols: DEFAULT_PTY_COLS,
        }
    }
}

impl BridgeConfig {
    /// Read overrides from `WEBSSH_*` environment variables.
    ///
    /// # Errors
    /// Returns error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, starting from defaults.
    ///
    /// # Errors
    /// Returns error if a value cannot be parsed or fails validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("WEBSSH_BUFFER_SIZE") {
            config.buffer_size = parse("WEBSSH_BUFFER_SIZE", &v)?;
        }
        if let Some(v) = lookup("WEBSSH_TERM") {
            config.default_term = v;
        }
        if let Some(v) = lookup("WEBSSH_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = parse("WEBSSH_CONNECT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("WEBSSH_PTY_ROWS") {
            config.default_rows = parse("WEBSSH_PTY_ROWS", &v)?;
        }
        if let Some(v) = lookup("WEBSSH_PTY_COLS") {
            config.default_cols = parse("WEBSSH_PTY_COLS", &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the engine relies on.
    ///
    /// # Errors
    /// Returns error on a zero buffer size or an empty default terminal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                key: "buffer_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.default_term.is_empty() {
            return Err(ConfigError::Invalid {
                key: "default_term",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: u32) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    #[must_use]
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.default_term = term.into();
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}
