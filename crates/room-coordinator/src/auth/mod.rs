//! Connection authentication.
//!
//! Resolves the bearer credential presented at upgrade time to a stable
//! identity. Runs once per connection, before any room command.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted; `exp` is required
//! - `iat` is validated with the configured clock skew
//! - Every failure maps to the same generic client message

use crate::errors::RcError;
use crate::observability::metrics;
use crate::store::RoomStore;
use common::jwt::{check_token_shape, validate_iat, UserClaims};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Display name used when the user record cannot be resolved.
pub const FALLBACK_DISPLAY_NAME: &str = "Unknown User";

const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// Authenticated identity of a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &"[REDACTED]")
            .field("name", &"[REDACTED]")
            .finish()
    }
}

/// Validates connection credentials and resolves display names.
pub struct ConnectionAuthenticator {
    decoding_key: DecodingKey,
    store: Arc<dyn RoomStore>,
    clock_skew: Duration,
}

impl ConnectionAuthenticator {
    #[must_use]
    pub fn new(secret: &SecretString, store: Arc<dyn RoomStore>, clock_skew: Duration) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            store,
            clock_skew,
        }
    }

    /// Validate `token` and resolve the caller's identity.
    ///
    /// A missing or unreadable user record does not fail authentication:
    /// the token already proves the identity, so the name falls back to
    /// the token's `name` claim, then to [`FALLBACK_DISPLAY_NAME`].
    ///
    /// # Errors
    ///
    /// Returns `RcError::Unauthenticated` for every credential failure.
    #[instrument(skip_all, name = "rc.auth.authenticate")]
    pub async fn authenticate(&self, token: &str) -> Result<Identity, RcError> {
        let claims = self.verify(token).inspect_err(|_| metrics::record_auth_failure())?;

        let name = match self.store.get_user(&claims.sub).await {
            Ok(Some(user)) => user.name,
            Ok(None) => {
                tracing::debug!(target: "rc.auth", "User record not found, using fallback name");
                fallback_name(&claims)
            }
            Err(e) => {
                tracing::warn!(
                    target: "rc.auth",
                    error = %e,
                    "User lookup failed, using fallback name"
                );
                fallback_name(&claims)
            }
        };

        tracing::debug!(target: "rc.auth", "Connection authenticated");
        Ok(Identity {
            user_id: claims.sub,
            name,
        })
    }

    fn verify(&self, token: &str) -> Result<UserClaims, RcError> {
        check_token_shape(token).map_err(|e| {
            tracing::debug!(target: "rc.auth", error = ?e, "Token shape check failed");
            invalid_token()
        })?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data =
            decode::<UserClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                tracing::debug!(target: "rc.auth", error = %e, "Token verification failed");
                invalid_token()
            })?;

        validate_iat(token_data.claims.iat, self.clock_skew).map_err(|e| {
            tracing::debug!(target: "rc.auth", error = ?e, "Token iat validation failed");
            invalid_token()
        })?;

        if token_data.claims.sub.is_empty() {
            tracing::debug!(target: "rc.auth", "Token has empty subject");
            return Err(invalid_token());
        }

        Ok(token_data.claims)
    }
}

fn fallback_name(claims: &UserClaims) -> String {
    claims
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string())
}

fn invalid_token() -> RcError {
    RcError::Unauthenticated(INVALID_TOKEN_MESSAGE.to_string())
}

/// Query string accepted on the upgrade request.
///
/// Browsers cannot set headers on a WebSocket handshake, so the credential
/// may arrive as `?token=...` instead.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

impl TokenQuery {
    /// The query credential, if present and non-empty.
    #[must_use]
    pub fn into_token(self) -> Option<String> {
        self.token.filter(|t| !t.trim().is_empty())
    }
}

/// Extract the credential from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn extract_bearer_token(authorization: Option<&str>) -> Option<&str> {
    authorization
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
