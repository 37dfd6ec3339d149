//! Caller identity resolution for the community hub.
//!
//! Every REST and WebSocket entry point passes its credential through a
//! [`TokenVerifier`] to obtain an [`Identity`]. Verification is side-effect
//! free: the production verifier checks an HS256 signature against the
//! shared secret issued by the auth service, with no network or database
//! access.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   Gateway        │────▶│  TokenVerifier   │
//! │   (HTTP/WS)      │     │  (trait)         │
//! └──────────────────┘     └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │  HmacVerifier    │
//!                          │  (HS256, local)  │
//!                          └──────────────────┘
//! ```
//!
//! Unauthenticated WebSocket peers receive a synthetic guest identity via
//! [`Identity::guest`]; guests may read but every mutating operation
//! rejects them.
//!
//! # Example
//!
//! ```
//! use dammaiguda_auth::{HmacVerifier, TokenVerifier};
//!
//! let verifier = HmacVerifier::new("shared-secret");
//! match verifier.verify("not-a-jwt") {
//!     Ok(identity) => println!("caller: {}", identity.user_id),
//!     Err(err) => println!("rejected: {err}"),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod identity;
pub mod token;

pub use error::{AuthError, Result};
pub use identity::{Identity, Role};
pub use token::{HmacVerifier, TokenVerifier};

#[cfg(any(test, feature = "test-utils"))]
pub use token::MockVerifier;
