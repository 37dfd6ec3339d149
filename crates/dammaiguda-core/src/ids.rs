//! Identifier types for the community hub.
//!
//! User ids are opaque strings minted by the external auth service; every
//! other entity gets a UUID v4 newtype so ids of different entities cannot be
//! confused at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An opaque user identifier.
///
/// User ids are issued by the external auth service and extracted from token
/// `sub` claims; the hub treats them as opaque strings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a `UserId` from a trusted source (token claims, fixtures).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a `UserId` from untrusted input.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Empty`] if the string is empty.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(s.to_owned()))
    }

    /// Return the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(value))
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random id.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
                Ok(Self(uuid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

uuid_id! {
    /// A chat room identifier.
    RoomId
}

uuid_id! {
    /// A chat message identifier.
    MessageId
}

uuid_id! {
    /// An SOS alert identifier; doubles as the de-duplication key for its
    /// notification fanout.
    AlertId
}

uuid_id! {
    /// A geofence identifier.
    FenceId
}

uuid_id! {
    /// A push subscription identifier.
    SubscriptionId
}

uuid_id! {
    /// An emergency contact identifier.
    ContactId
}

uuid_id! {
    /// A notification log row identifier.
    LogId
}

uuid_id! {
    /// An ephemeral WebSocket connection identifier. Never persisted.
    ConnId
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input string is empty.
    #[error("empty identifier")]
    Empty,

    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_roundtrip() {
        let id = UserId::new("user-42");
        assert_eq!(id.as_str(), "user-42");
        let parsed = UserId::parse("user-42").unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn user_id_rejects_empty() {
        assert!(matches!(UserId::parse(""), Err(IdError::Empty)));
        let result: Result<UserId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn user_id_serde_json() {
        let id = UserId::new("user-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"user-7\"");
        let parsed: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn room_id_roundtrip() {
        let id = RoomId::generate();
        let str_repr = id.to_string();
        let parsed = RoomId::from_str(&str_repr).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn room_id_invalid_uuid() {
        let result = RoomId::from_str("not-a-uuid");
        assert!(matches!(result, Err(IdError::InvalidUuid)));
    }

    #[test]
    fn alert_id_serde_json() {
        let id = AlertId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: AlertId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn fence_id_unique() {
        assert_ne!(FenceId::generate(), FenceId::generate());
    }

    #[test]
    fn debug_includes_type_name() {
        let id = MessageId::generate();
        assert!(format!("{id:?}").starts_with("MessageId("));
    }
}
