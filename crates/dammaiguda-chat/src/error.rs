//! Error types for chat operations.

use dammaiguda_core::{MessageId, RoomId, UserId};
use dammaiguda_store::StoreError;
use thiserror::Error;

/// A result type using `ChatError`.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can occur in chat operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The requested room was not found.
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// The requested message was not found.
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),

    /// The user is not a member of the room.
    #[error("user {user_id} is not a member of room {room_id}")]
    NotAMember {
        /// The user making the request.
        user_id: UserId,
        /// The room being accessed.
        room_id: RoomId,
    },

    /// The caller holds a guest identity and may only read.
    #[error("guest sessions are read-only")]
    ReadOnly,

    /// The room is archived and no longer accepts messages.
    #[error("room {0} is archived")]
    RoomArchived(RoomId),

    /// A request field failed validation.
    #[error("{0}")]
    InvalidArgument(String),

    /// The message body exceeds the allowed length.
    #[error("message exceeds {limit} characters")]
    MessageTooLong {
        /// Maximum allowed character count.
        limit: usize,
    },

    /// A reaction toggle kept losing its compare-and-set.
    #[error("message {0} is receiving too many concurrent reactions")]
    ReactionContention(MessageId),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl ChatError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::RoomNotFound(_)
            | Self::MessageNotFound(_)
            | Self::Store(StoreError::NotFound) => 404,
            Self::NotAMember { .. } | Self::ReadOnly => 403,
            Self::RoomArchived(_)
            | Self::ReactionContention(_)
            | Self::Store(StoreError::Conflict) => 409,
            Self::InvalidArgument(_) | Self::MessageTooLong { .. } => 400,
            Self::Store(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let room_id = RoomId::generate();
        let message_id = MessageId::generate();

        assert_eq!(ChatError::RoomNotFound(room_id).http_status_code(), 404);
        assert_eq!(ChatError::ReadOnly.http_status_code(), 403);
        assert_eq!(
            ChatError::NotAMember {
                user_id: UserId::new("u-1"),
                room_id,
            }
            .http_status_code(),
            403
        );
        assert_eq!(ChatError::RoomArchived(room_id).http_status_code(), 409);
        assert_eq!(
            ChatError::MessageTooLong { limit: 4096 }.http_status_code(),
            400
        );
        assert_eq!(
            ChatError::ReactionContention(message_id).http_status_code(),
            409
        );
        assert_eq!(
            ChatError::Store(StoreError::Conflict).http_status_code(),
            409
        );
    }
}
