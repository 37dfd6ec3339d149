//! Error types for location and geofence operations.

use dammaiguda_core::{FenceId, UserId};
use dammaiguda_store::StoreError;
use thiserror::Error;

/// A result type using `GeoError`.
pub type Result<T> = std::result::Result<T, GeoError>;

/// Errors that can occur in location and geofence operations.
#[derive(Debug, Error)]
pub enum GeoError {
    /// The caller holds a guest identity and may only read.
    #[error("guest sessions are read-only")]
    ReadOnly,

    /// The requested fence was not found.
    #[error("geofence not found: {0}")]
    FenceNotFound(FenceId),

    /// The user does not own the fence.
    #[error("user {user_id} does not own geofence {fence_id}")]
    NotOwner {
        /// The user making the request.
        user_id: UserId,
        /// The fence being accessed.
        fence_id: FenceId,
    },

    /// No accepted family link exists between the watcher and the member.
    #[error("user {watcher_id} holds no accepted family link with {member_id}")]
    NotLinked {
        /// The watcher making the request.
        watcher_id: UserId,
        /// The member being watched.
        member_id: UserId,
    },

    /// A request field failed validation.
    #[error("{0}")]
    InvalidArgument(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl GeoError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::ReadOnly | Self::NotOwner { .. } => 403,
            Self::FenceNotFound(_) | Self::Store(StoreError::NotFound) => 404,
            Self::NotLinked { .. } => 412,
            Self::InvalidArgument(_) => 400,
            Self::Store(StoreError::Conflict) => 409,
            Self::Store(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let fence_id = FenceId::generate();
        assert_eq!(GeoError::FenceNotFound(fence_id).http_status_code(), 404);
        assert_eq!(
            GeoError::NotLinked {
                watcher_id: UserId::new("w-1"),
                member_id: UserId::new("m-1"),
            }
            .http_status_code(),
            412
        );
        assert_eq!(
            GeoError::NotOwner {
                user_id: UserId::new("u-1"),
                fence_id,
            }
            .http_status_code(),
            403
        );
        assert_eq!(
            GeoError::InvalidArgument("radius".to_owned()).http_status_code(),
            400
        );
    }
}
