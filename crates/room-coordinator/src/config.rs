//! Room Coordinator configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::jwt::MAX_CLOCK_SKEW;
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_WS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default database pool size.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Default limit on concurrently open WebSocket connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Default maximum chat message length in characters.
pub const DEFAULT_MAX_CHAT_MESSAGE_LENGTH: usize = 2000;

/// Default JWT clock skew allowance in seconds.
pub const DEFAULT_JWT_CLOCK_SKEW_SECONDS: u64 = 300;

/// Default graceful shutdown window in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 10;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rc";

/// Minimum length of the HS256 signing secret in bytes.
pub const MIN_JWT_SECRET_BYTES: usize = 32;

/// Room Coordinator configuration.
#[derive(Clone)]
pub struct Config {
    /// Postgres connection URL.
    pub database_url: SecretString,

    /// HS256 secret used to verify connection credentials.
    pub jwt_secret: SecretString,

    /// WebSocket server bind address (default: "0.0.0.0:8080").
    pub ws_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// Database pool size.
    pub db_max_connections: u32,

    /// Maximum concurrently open WebSocket connections.
    pub max_connections: usize,

    /// Chat messages longer than this (after trimming) are truncated.
    pub max_chat_message_length: usize,

    /// Allowed clock skew for the credential `iat` claim, capped at 600s.
    pub jwt_clock_skew_seconds: u64,

    /// How long shutdown waits for actors to drain.
    pub shutdown_grace_seconds: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("jwt_secret", &"[REDACTED]")
            .field("ws_bind_address", &self.ws_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("instance_id", &self.instance_id)
            .field("db_max_connections", &self.db_max_connections)
            .field("max_connections", &self.max_connections)
            .field("max_chat_message_length", &self.max_chat_message_length)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("shutdown_grace_seconds", &self.shutdown_grace_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// - `MissingEnvVar` if `DATABASE_URL` or `RC_JWT_SECRET` is absent
    /// - `InvalidValue` if a numeric variable does not parse or the JWT
    ///   secret is shorter than [`MIN_JWT_SECRET_BYTES`]
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = SecretString::from(
            vars.get("DATABASE_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
                .clone(),
        );

        let jwt_secret = SecretString::from(
            vars.get("RC_JWT_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("RC_JWT_SECRET".to_string()))?
                .clone(),
        );
        if jwt_secret.expose_secret().len() < MIN_JWT_SECRET_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "RC_JWT_SECRET must be at least {MIN_JWT_SECRET_BYTES} bytes"
            )));
        }

        let ws_bind_address = vars
            .get("RC_WS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_WS_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let db_max_connections =
            parse_or_default(vars, "RC_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?;
        let max_connections = parse_or_default(vars, "RC_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let max_chat_message_length = parse_or_default(
            vars,
            "RC_MAX_CHAT_MESSAGE_LENGTH",
            DEFAULT_MAX_CHAT_MESSAGE_LENGTH,
        )?;
        let shutdown_grace_seconds = parse_or_default(
            vars,
            "RC_SHUTDOWN_GRACE_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_SECONDS,
        )?;

        // Clamp to the shared upper bound
        let jwt_clock_skew_seconds: u64 = parse_or_default(
            vars,
            "RC_JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_JWT_CLOCK_SKEW_SECONDS,
        )?;
        let jwt_clock_skew_seconds = jwt_clock_skew_seconds.min(MAX_CLOCK_SKEW.as_secs());

        let instance_id = vars.get("RC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = vars
                .get("HOSTNAME")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().simple().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            database_url,
            jwt_secret,
            ws_bind_address,
            health_bind_address,
            instance_id,
            db_max_connections,
            max_connections,
            max_chat_message_length,
            jwt_clock_skew_seconds,
            shutdown_grace_seconds,
        })
    }

    /// Clock skew tolerance as a `Duration`.
    #[must_use]
    pub fn jwt_clock_skew(&self) -> Duration {
        Duration::from_secs(self.jwt_clock_skew_seconds)
    }

    /// Shutdown grace window as a `Duration`.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

fn parse_or_default<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key} must be a positive integer"))),
        None => Ok(default),
    }
}
