//! Core types for the Dammaiguda community hub.
//!
//! This crate provides the foundation shared by every other crate in the
//! workspace:
//!
//! - **Identifiers**: Strongly-typed IDs for users, rooms, messages, alerts,
//!   geofences, subscriptions, and connections
//! - **Events**: The typed hub event set and the in-process event bus that
//!   connects the chat engine, the geofence evaluator, the alert fanout, and
//!   the push dispatcher
//!
//! # Example
//!
//! ```
//! use dammaiguda_core::{EventBus, HubEvent, RoomId, UserId};
//!
//! let bus = EventBus::new(64);
//! let mut sub = bus.subscriber("example");
//!
//! bus.publish(HubEvent::PresenceJoin {
//!     room_id: RoomId::generate(),
//!     user_id: UserId::new("u-100"),
//!     user_name: "Asha".to_owned(),
//!     online_count: 1,
//! });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod events;
pub mod ids;

pub use events::{
    BusSubscriber, EventBus, EventKind, FenceTransition, GeoPoint, HubEvent, MessageEvent,
    PushCategory,
};
pub use ids::{
    AlertId, ConnId, ContactId, FenceId, IdError, LogId, MessageId, RoomId, SubscriptionId, UserId,
};
