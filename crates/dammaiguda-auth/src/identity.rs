//! Resolved caller identities and roles.

use dammaiguda_core::UserId;
use serde::{Deserialize, Serialize};

/// A resolved caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// The caller's user id.
    pub user_id: UserId,
    /// Display name from the token; "Guest" for guest identities.
    pub name: String,
    /// The caller's role.
    pub role: Role,
    /// Neighborhood area from the token, if present.
    pub area_id: Option<String>,
}

impl Identity {
    /// Mint a synthetic read-only identity for an unauthenticated WebSocket
    /// peer.
    #[must_use]
    pub fn guest() -> Self {
        Self {
            user_id: UserId::new(format!("guest-{}", uuid::Uuid::new_v4())),
            name: "Guest".to_owned(),
            role: Role::Guest,
            area_id: None,
        }
    }

    /// Whether the caller may only read. Guests never mutate.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.role.is_guest()
    }
}

/// Caller roles.
///
/// `Guest` is never carried in a token; it only arises from
/// [`Identity::guest`] for unauthenticated sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular resident.
    Citizen,
    /// Area manager; may publish targeted notifications.
    Manager,
    /// Administrator.
    Admin,
    /// Synthetic read-only identity for unauthenticated sockets.
    Guest,
}

impl Role {
    /// Parse a role claim. `guest` is rejected: tokens never carry it.
    #[must_use]
    pub fn from_claim(value: &str) -> Option<Self> {
        match value {
            "citizen" => Some(Self::Citizen),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Whether this is the synthetic guest role.
    #[must_use]
    pub const fn is_guest(&self) -> bool {
        matches!(self, Self::Guest)
    }

    /// Whether the role may publish news and announcements.
    #[must_use]
    pub const fn can_publish(&self) -> bool {
        matches!(self, Self::Manager | Self::Admin)
    }

    /// Whether the role is the administrator role.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}
