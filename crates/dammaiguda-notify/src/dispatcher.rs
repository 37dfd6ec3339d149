//! Web-Push dispatcher.
//!
//! Subscribes to the hub bus, renders push-eligible events into payloads,
//! and delivers them to every subscription of every recipient. Delivery is
//! at-most-once per `(event, channel, recipient)`: a `sent` row in the
//! notification log is written after the attempt sequence, and a pre-flight
//! probe skips recipients that already have one. Preferences are enforced
//! here, not at the producers.

use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use dammaiguda_core::{BusSubscriber, EventKind, HubEvent, PushCategory, UserId};
use dammaiguda_store::{
    Channel, DeliveryResult, NotificationLog, PushSubscription, Store,
};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ece;
use crate::error::PushError;
use crate::vapid::VapidSigner;

/// Concurrent recipient deliveries per event.
const FANOUT_LIMIT: usize = 32;

/// Seconds a push service may hold an undelivered message.
const PUSH_TTL_SECS: u32 = 86_400;

/// Delays before the second and third attempt at a transient failure.
const RETRY_DELAYS: [Duration; 2] = [Duration::from_millis(200), Duration::from_secs(2)];

/// Longest mention preview carried in a push body.
const PREVIEW_CHARS: usize = 120;

/// The JSON document a service worker receives after decryption.
#[derive(Debug, Clone, Serialize)]
pub struct PushPayload {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// App-relative icon path for the category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Collapse tag; one notification per category stays visible.
    pub tag: String,
    /// Link opened on tap, app-relative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Kind-specific extra fields.
    pub data: serde_json::Value,
}

impl PushPayload {
    /// Render a bus event into a payload, or `None` for kinds that never
    /// produce a push.
    #[must_use]
    pub fn render(event: &HubEvent) -> Option<Self> {
        let tag = event.kind().push_category()?.as_str().to_owned();
        let icon = Some(format!("/icons/{tag}.png"));
        let payload = match event {
            HubEvent::SosTriggered {
                alert_id,
                user_name,
                message,
                location,
                ..
            } => Self {
                title: format!("SOS from {user_name}"),
                body: if message.is_empty() {
                    "Emergency alert. Open the app now.".to_owned()
                } else {
                    message.clone()
                },
                icon,
                tag,
                url: Some(format!("/sos/{alert_id}")),
                data: serde_json::json!({
                    "alert_id": alert_id.to_string(),
                    "location": location,
                }),
            },
            HubEvent::GeofenceTransition {
                fence_id,
                fence_name,
                member_id,
                member_name,
                transition,
                location,
                ..
            } => Self {
                title: match transition {
                    dammaiguda_core::FenceTransition::Enter => {
                        format!("{member_name} arrived at {fence_name}")
                    }
                    dammaiguda_core::FenceTransition::Exit => {
                        format!("{member_name} left {fence_name}")
                    }
                },
                body: "Tap to see the live location.".to_owned(),
                icon,
                tag,
                url: Some(format!("/family/{member_id}")),
                data: serde_json::json!({
                    "fence_id": fence_id.to_string(),
                    "transition": transition.as_str(),
                    "location": location,
                }),
            },
            HubEvent::ChatMention {
                room_id,
                room_name,
                message_id,
                author_name,
                content,
                ..
            } => Self {
                title: format!("{author_name} mentioned you in {room_name}"),
                body: preview(content),
                icon,
                tag,
                url: Some(format!("/chat/{room_id}")),
                data: serde_json::json!({
                    "room_id": room_id.to_string(),
                    "message_id": message_id.to_string(),
                }),
            },
            HubEvent::NewsPushed {
                title, body, url, ..
            } => Self {
                title: title.clone(),
                body: body.clone(),
                icon,
                tag,
                url: url.clone(),
                data: serde_json::Value::Null,
            },
            HubEvent::CommunityAnnouncement { title, body, .. }
            | HubEvent::HealthReminder { title, body, .. } => Self {
                title: title.clone(),
                body: body.clone(),
                icon,
                tag,
                url: None,
                data: serde_json::Value::Null,
            },
            HubEvent::PresenceJoin { .. }
            | HubEvent::PresenceLeave { .. }
            | HubEvent::ChatMessage { .. }
            | HubEvent::ChatReaction { .. } => return None,
        };
        Some(payload)
    }
}

/// Truncate a mention preview on a character boundary.
fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_owned();
    }
    let cut: String = content.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}…")
}

/// The `Urgency` header value for an event kind.
const fn urgency(kind: EventKind) -> &'static str {
    match kind {
        EventKind::SosTriggered => "high",
        _ => "normal",
    }
}

/// HTTP client for one push service request: encrypted body, VAPID auth.
pub struct WebPushClient {
    http: reqwest::Client,
    signer: VapidSigner,
}

impl WebPushClient {
    /// Build a client around a signer.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Transport`] if the HTTP client cannot be built.
    pub fn new(signer: VapidSigner) -> Result<Self, PushError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(64)
            .build()
            .map_err(|e| PushError::Transport(format!("HTTP client build failed: {e}")))?;
        Ok(Self { http, signer })
    }

    /// The server VAPID public key, for the subscription endpoint.
    #[must_use]
    pub fn public_key(&self) -> &str {
        self.signer.public_key()
    }

    /// Deliver one encrypted body to one subscription endpoint.
    ///
    /// # Errors
    ///
    /// Classifies the outcome: 404/410 as [`PushError::Gone`], 429 and 5xx
    /// and connection failures as [`PushError::Transport`], any other
    /// non-success as [`PushError::Rejected`].
    pub async fn send(
        &self,
        sub: &PushSubscription,
        body: Vec<u8>,
        urgency: &'static str,
    ) -> Result<(), PushError> {
        let authorization = self.signer.authorization(&sub.endpoint_url)?;
        let response = self
            .http
            .post(&sub.endpoint_url)
            .header("authorization", authorization)
            .header("content-encoding", "aes128gcm")
            .header("content-type", "application/octet-stream")
            .header("ttl", PUSH_TTL_SECS)
            .header("urgency", urgency)
            .body(body)
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => Ok(()),
            404 | 410 => Err(PushError::Gone(status.as_u16())),
            429 | 500..=599 => Err(PushError::Transport(format!("status {status}"))),
            code => Err(PushError::Rejected(code)),
        }
    }
}

/// Bus subscriber that fans push-eligible events out to subscriptions.
pub struct PushDispatcher<S> {
    store: Arc<S>,
    client: Arc<WebPushClient>,
    retry_delays: Vec<Duration>,
}

impl<S: Store + 'static> PushDispatcher<S> {
    /// Create a dispatcher with the production retry ladder.
    pub fn new(store: Arc<S>, client: Arc<WebPushClient>) -> Self {
        Self {
            store,
            client,
            retry_delays: RETRY_DELAYS.to_vec(),
        }
    }

    /// Override the delays between transient-failure attempts.
    #[must_use]
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Consume bus events until the bus closes.
    pub async fn run(&self, mut sub: BusSubscriber) {
        while let Some(event) = sub.next().await {
            self.dispatch(&event).await;
        }
        info!("event bus closed, push dispatcher stopping");
    }

    /// Fan one event out to all recipients. Storage and transport failures
    /// are logged per recipient and never poison the loop.
    pub async fn dispatch(&self, event: &HubEvent) {
        let Some(category) = event.kind().push_category() else {
            return;
        };
        let Some(dedup) = event.dedup_id() else {
            return;
        };
        let Some(payload) = PushPayload::render(event) else {
            return;
        };
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(kind = %event.kind(), error = %e, "payload serialization failed");
                return;
            }
        };
        let urgency = urgency(event.kind());
        let kind = event.kind();

        let outcomes: Vec<(bool, Option<String>)> = futures::stream::iter(
            event.recipients().iter().cloned(),
        )
        .map(|user_id| self.deliver_to(user_id, &payload, &body, &dedup, kind, category, urgency))
        .buffer_unordered(FANOUT_LIMIT)
        .collect()
        .await;

        // SOS alerts track the push channel outcome on the alert itself.
        if let HubEvent::SosTriggered { alert_id, .. } = event {
            let sent = outcomes.iter().any(|(sent, _)| *sent);
            let error = outcomes.iter().filter_map(|(_, e)| e.clone()).next_back();
            let outcome = dammaiguda_store::ChannelDelivery { sent, error };
            if let Err(e) = self
                .store
                .set_sos_delivery(alert_id, Channel::Push, &outcome)
                .await
            {
                warn!(%alert_id, error = %e, "recording push delivery outcome failed");
            }
        }
    }

    /// Deliver one event to one recipient across all their subscriptions.
    /// Returns whether at least one delivery succeeded, and the last error.
    async fn deliver_to(
        &self,
        user_id: UserId,
        payload: &PushPayload,
        body: &[u8],
        dedup: &str,
        kind: EventKind,
        category: PushCategory,
        urgency: &'static str,
    ) -> (bool, Option<String>) {
        let prefs = match self.store.notification_prefs(&user_id).await {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(%user_id, error = %e, "loading push preferences failed");
                return (false, Some(e.to_string()));
            }
        };
        if !prefs.allows(category) {
            self.log(dedup, &user_id, kind, payload, DeliveryResult::Suppressed)
                .await;
            return (false, None);
        }

        match self
            .store
            .notification_sent(dedup, Channel::Push, &user_id)
            .await
        {
            // Already delivered in an earlier run of this event.
            Ok(true) => return (true, None),
            Ok(false) => {}
            Err(e) => {
                warn!(%user_id, error = %e, "at-most-once probe failed");
                return (false, Some(e.to_string()));
            }
        }

        let subs = match self.store.list_push_subscriptions(&user_id).await {
            Ok(subs) => subs,
            Err(e) => {
                warn!(%user_id, error = %e, "listing push subscriptions failed");
                return (false, Some(e.to_string()));
            }
        };
        if subs.is_empty() {
            debug!(%user_id, kind = %kind, "recipient has no push subscriptions");
            return (false, None);
        }

        let mut any_success = false;
        let mut any_evicted = false;
        let mut any_failed = false;
        let mut last_error: Option<String> = None;
        for sub in &subs {
            match self.send_with_retry(sub, body, urgency).await {
                Ok(()) => {
                    any_success = true;
                    if let Err(e) = self
                        .store
                        .record_push_success(&user_id, &sub.endpoint_url, bson::DateTime::now())
                        .await
                    {
                        warn!(%user_id, error = %e, "recording push success failed");
                    }
                }
                Err(e) if e.is_permanent() => {
                    info!(%user_id, endpoint = %sub.endpoint_url, "evicting dead subscription");
                    any_evicted = true;
                    last_error = Some(e.to_string());
                    match self
                        .store
                        .delete_push_subscription(&user_id, &sub.endpoint_url)
                        .await
                    {
                        Ok(()) | Err(dammaiguda_store::StoreError::NotFound) => {}
                        Err(e) => warn!(%user_id, error = %e, "evicting subscription failed"),
                    }
                }
                Err(e) => {
                    warn!(%user_id, endpoint = %sub.endpoint_url, error = %e, "push delivery failed");
                    any_failed = true;
                    last_error = Some(e.to_string());
                    if let Err(e) = self
                        .store
                        .record_push_failure(&user_id, &sub.endpoint_url)
                        .await
                    {
                        warn!(%user_id, error = %e, "recording push failure failed");
                    }
                }
            }
        }

        // `evicted` only when every subscription was a dead endpoint; a mix
        // with transient or rejected failures still reads as `failed`.
        let result = if any_success {
            DeliveryResult::Sent
        } else if any_evicted && !any_failed {
            DeliveryResult::Evicted
        } else {
            DeliveryResult::Failed
        };
        self.log(dedup, &user_id, kind, payload, result).await;
        (any_success, last_error)
    }

    /// Encrypt per subscription and attempt delivery, retrying transient
    /// failures up to the retry ladder.
    async fn send_with_retry(
        &self,
        sub: &PushSubscription,
        body: &[u8],
        urgency: &'static str,
    ) -> Result<(), PushError> {
        let mut attempt = 0;
        loop {
            let encrypted = ece::encrypt(&sub.p256dh_key, &sub.auth_key, body)?;
            match self.client.send(sub, encrypted, urgency).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.retry_delays.len() => {
                    debug!(endpoint = %sub.endpoint_url, attempt, error = %e, "retrying push");
                    tokio::time::sleep(self.retry_delays[attempt]).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn log(
        &self,
        dedup: &str,
        user_id: &UserId,
        kind: EventKind,
        payload: &PushPayload,
        result: DeliveryResult,
    ) {
        let entry = NotificationLog {
            log_id: dammaiguda_core::LogId::generate(),
            alert_id: Some(dedup.to_owned()),
            user_id: user_id.clone(),
            kind: kind.as_str().to_owned(),
            payload: bson::to_document(payload).unwrap_or_else(|_| doc! {}),
            channel: Channel::Push,
            result,
            at: bson::DateTime::now(),
        };
        if let Err(e) = self.store.append_notification_log(&entry).await {
            warn!(%user_id, error = %e, "appending notification log failed");
        }
    }
}
