//! Authentication error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while resolving a caller identity.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token has expired.
    #[error("token expired")]
    TokenExpired,

    /// The token signature is invalid.
    #[error("invalid signature")]
    InvalidSignature,

    /// The user id in the token is malformed.
    #[error("invalid user id in token")]
    InvalidUserId,

    /// The role claim carries an unknown value.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// The token format is invalid.
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        // Every identity failure is an authentication failure.
        401
    }

    /// Whether the credential was valid once and merely aged out.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }
}
