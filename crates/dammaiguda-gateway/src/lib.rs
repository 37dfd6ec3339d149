//! HTTP and WebSocket gateway for the community hub.
//!
//! This crate is the public-facing surface of the hub. It handles:
//!
//! - Bearer-token authentication with a guest fallback on room sockets
//! - REST endpoints for chat, notifications, SOS, family, and admin pushes
//! - Room WebSockets wired into the presence registry
//! - Background delivery tasks (push dispatcher, alert fanout, broadcaster)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Clients                              │
//! │                  (HTTP / WebSocket)                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   dammaiguda-gateway                        │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │   Auth      │ │   Router    │ │   Room Sockets +    │    │
//! │  │  Extractor  │ │  + Handlers │ │   Broadcaster       │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ event bus
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │  Chat /  │   │   Push   │   │  Alert   │
//!        │ Geo / SOS│   │Dispatcher│   │  Fanout  │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dammaiguda_auth::HmacVerifier;
//! use dammaiguda_core::EventBus;
//! use dammaiguda_gateway::{create_router, AppState, GatewayConfig};
//! use dammaiguda_store::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let verifier = Arc::new(HmacVerifier::new("secret"));
//! let bus = EventBus::new(256);
//!
//! let config = GatewayConfig::default();
//! let state = AppState::new(store, verifier, bus, "BPx…".to_owned(), config);
//!
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod broadcaster;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use broadcaster::spawn_room_broadcaster;
pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

// Re-export key types for convenience
pub use auth::AuthUser;
