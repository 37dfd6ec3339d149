//! Chat rooms, messages, and live presence for the community hub.
//!
//! This crate holds the room-level business logic. REST and WebSocket
//! handlers call into [`ChatEngine`]; live sockets register with the
//! [`PresenceRegistry`], which fans frames out to every socket in a room.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Gateway (REST + WebSocket)              │
//! └─────────────────────────────────────────────────────────┘
//!            │                                │
//!            ▼                                ▼
//! ┌─────────────────────┐          ┌─────────────────────┐
//! │     ChatEngine      │─────────▶│  PresenceRegistry   │
//! │  rooms / messages   │  typing  │  sockets per room   │
//! │  reactions / unread │          │  bounded send queues│
//! └─────────────────────┘          └─────────────────────┘
//!            │                                │
//!            ▼                                ▼
//!       ┌─────────┐                     ┌──────────┐
//!       │  Store  │                     │ EventBus │
//!       │ (Mongo) │                     │ (fanout) │
//!       └─────────┘                     └──────────┘
//! ```
//!
//! Persisted writes go through the [`dammaiguda_store::Store`] trait; every
//! persisted chat change is then published on the
//! [`dammaiguda_core::EventBus`] so the WebSocket broadcaster and the push
//! dispatcher observe it. Typing indicators skip both the store and the bus:
//! they are broadcast straight to the room's live sockets and are lost when
//! no one is connected.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod engine;
pub mod error;
pub mod frames;
pub mod presence;

pub use engine::{ChatEngine, CreateRoom, PostMessage, RoomSummary};
pub use error::{ChatError, Result};
pub use frames::{ClientFrame, PresenceChange, ServerFrame};
pub use presence::{PresenceRegistry, OUTBOUND_BUFFER};
