//! Notification delivery for the community hub: VAPID Web-Push, SOS
//! alerts, SMS fanout, and the in-app feed.
//!
//! Two bus subscribers do the delivery work. The [`PushDispatcher`] renders
//! push-eligible events into encrypted `aes128gcm` bodies and posts them to
//! each recipient's subscribed push services, honoring per-user preferences
//! and evicting dead subscriptions. The [`AlertFanout`] covers the non-push
//! channels: SMS to emergency contacts and rows in the in-app feed.
//!
//! Both subscribers are at-most-once per `(event, channel, recipient)`: the
//! notification log doubles as the delivery ledger, and a `sent` row there
//! suppresses any replay of the same event.
//!
//! [`SosService`] owns the alert lifecycle itself: emergency contacts, the
//! trigger path, and the monotone `active → acknowledged → resolved` state
//! machine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dispatcher;
pub mod ece;
pub mod error;
pub mod sms;
pub mod sos;
pub mod vapid;

pub use dispatcher::{PushDispatcher, PushPayload, WebPushClient};
pub use error::{AlertError, PushError, Result, SmsError};
pub use sms::{HttpSmsSender, NoopSmsSender, SmsSender};
pub use sos::{AddContact, AlertFanout, SosService};
pub use vapid::VapidSigner;
