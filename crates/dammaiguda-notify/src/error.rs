//! Error types for push, SMS, and SOS operations.

use dammaiguda_core::{AlertId, ContactId, UserId};
use dammaiguda_store::StoreError;
use thiserror::Error;

/// Errors that can occur while delivering one Web-Push request.
#[derive(Debug, Error)]
pub enum PushError {
    /// VAPID or subscription key material could not be parsed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Payload encryption failed.
    #[error("payload encryption failed: {0}")]
    Crypto(String),

    /// The cleartext payload does not fit in a single record.
    #[error("payload of {size} bytes exceeds the {limit}-byte record limit")]
    PayloadTooLarge {
        /// Cleartext size in bytes.
        size: usize,
        /// Largest cleartext that fits.
        limit: usize,
    },

    /// The push service no longer knows the subscription (404/410); the
    /// subscription must be evicted.
    #[error("subscription gone (status {0})")]
    Gone(u16),

    /// The push service rejected the request for a non-transient reason
    /// other than a dead subscription.
    #[error("push service rejected the request (status {0})")]
    Rejected(u16),

    /// A transient transport failure: timeout, connection error, or 5xx.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl PushError {
    /// Whether this failure means the subscription is dead.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Gone(_))
    }

    /// Whether another attempt at the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Errors that can occur while sending an SMS.
#[derive(Debug, Error)]
pub enum SmsError {
    /// The provider could not be reached.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The provider answered with a failure.
    #[error("provider rejected the message (status {status}): {message}")]
    Provider {
        /// HTTP status from the provider.
        status: u16,
        /// Provider error body, possibly empty.
        message: String,
    },
}

/// A result type using `AlertError`.
pub type Result<T> = std::result::Result<T, AlertError>;

/// Errors that can occur in SOS operations.
#[derive(Debug, Error)]
pub enum AlertError {
    /// The caller holds a guest identity and may only read.
    #[error("guest sessions are read-only")]
    ReadOnly,

    /// The user has no emergency contacts configured.
    #[error("no emergency contacts configured")]
    NoContacts,

    /// The requested alert was not found.
    #[error("alert not found: {0}")]
    AlertNotFound(AlertId),

    /// The requested contact was not found.
    #[error("emergency contact not found: {0}")]
    ContactNotFound(ContactId),

    /// The caller is not a recipient of the alert.
    #[error("user {user_id} is not a recipient of alert {alert_id}")]
    NotRecipient {
        /// The user making the request.
        user_id: UserId,
        /// The alert being acknowledged.
        alert_id: AlertId,
    },

    /// Only the creator or an admin may resolve an alert.
    #[error("user {user_id} may not resolve alert {alert_id}")]
    NotCreator {
        /// The user making the request.
        user_id: UserId,
        /// The alert being resolved.
        alert_id: AlertId,
    },

    /// The alert is already past the requested state.
    #[error("alert {alert_id} is already {status}")]
    InvalidTransition {
        /// The alert.
        alert_id: AlertId,
        /// Its current status name.
        status: &'static str,
    },

    /// A request field failed validation.
    #[error("{0}")]
    InvalidArgument(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl AlertError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::ReadOnly | Self::NotRecipient { .. } | Self::NotCreator { .. } => 403,
            Self::NoContacts => 412,
            Self::AlertNotFound(_)
            | Self::ContactNotFound(_)
            | Self::Store(StoreError::NotFound) => 404,
            Self::InvalidTransition { .. } | Self::Store(StoreError::Conflict) => 409,
            Self::InvalidArgument(_) => 400,
            Self::Store(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let alert_id = AlertId::generate();
        assert_eq!(AlertError::NoContacts.http_status_code(), 412);
        assert_eq!(AlertError::AlertNotFound(alert_id).http_status_code(), 404);
        assert_eq!(
            AlertError::NotRecipient {
                user_id: UserId::new("u-1"),
                alert_id,
            }
            .http_status_code(),
            403
        );
        assert_eq!(
            AlertError::InvalidTransition {
                alert_id,
                status: "resolved",
            }
            .http_status_code(),
            409
        );
    }

    #[test]
    fn push_error_classification() {
        assert!(PushError::Gone(410).is_permanent());
        assert!(!PushError::Gone(410).is_transient());
        assert!(PushError::Transport("timeout".into()).is_transient());
        assert!(!PushError::Rejected(400).is_transient());
        assert!(!PushError::Rejected(400).is_permanent());
    }
}
