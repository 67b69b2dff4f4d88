//! Common utilities and types shared across the room coordinator crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for bearer-token utilities (size limit, iat skew, user claims)
pub mod jwt;
