//! Secret types for values that must never reach a log line.
//!
//! Re-exports [`secrecy`] so every crate in the workspace wraps the JWT
//! signing secret and the database URL the same way. `SecretString` and
//! `SecretBox<T>` print `[REDACTED]` through `Debug`, so a struct that
//! derives `Debug` stays safe to pass to `tracing`.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let signing_key = SecretString::from("room-signing-key");
//! assert!(!format!("{signing_key:?}").contains("room-signing-key"));
//! assert_eq!(signing_key.expose_secret(), "room-signing-key");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("jwt-signing-key");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("jwt-signing-key"));
    }

    #[test]
    fn test_settings_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct StoreSettings {
            pool_size: u32,
            database_url: SecretString,
        }

        let json = r#"{"pool_size": 4, "database_url": "postgres://rooms:pw@db/rooms"}"#;
        let settings: StoreSettings = serde_json::from_str(json).expect("deserialize");

        assert_eq!(
            settings.database_url.expose_secret(),
            "postgres://rooms:pw@db/rooms"
        );

        let debug = format!("{settings:?}");
        assert!(debug.contains("pool_size: 4"));
        assert!(!debug.contains("postgres://"));
    }
}
