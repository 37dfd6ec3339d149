//! Request handlers.

pub mod admin;
pub mod chat;
pub mod family;
pub mod health;
pub mod notifications;
pub mod sos;
pub mod ws;
