//! SOS alerts: emergency contacts, the alert lifecycle, and the non-push
//! fanout channels (SMS and the in-app feed).
//!
//! Triggering persists the alert first and then publishes the bus event, so
//! a crashed fanout can never lose the alert itself. Each fanout channel is
//! guarded by the notification log's at-most-once ledger, keyed by the alert
//! id, and reports its outcome onto the alert's per-channel delivery map.

use std::sync::Arc;

use bson::doc;
use dammaiguda_auth::Identity;
use dammaiguda_core::{AlertId, BusSubscriber, ContactId, EventBus, GeoPoint, HubEvent, UserId};
use dammaiguda_store::{
    Channel, ChannelDelivery, DeliveryResult, EmergencyContact, NotificationLog, SosAlert,
    SosStatus, Store, StoreError,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::dispatcher::PushPayload;
use crate::error::{AlertError, Result};
use crate::sms::SmsSender;

/// Most emergency contacts one user may configure.
const MAX_CONTACTS: usize = 10;

/// Longest SOS message accepted from the trigger.
const MAX_MESSAGE_CHARS: usize = 500;

/// Request body for adding an emergency contact.
#[derive(Debug, Clone, Deserialize)]
pub struct AddContact {
    /// Contact display name.
    pub name: String,
    /// Phone number, E.164.
    pub phone: String,
    /// The contact's own account, when the contact is also an app user.
    #[serde(default)]
    pub contact_user_id: Option<UserId>,
}

/// Emergency contacts and the SOS alert lifecycle.
pub struct SosService<S> {
    store: Arc<S>,
    bus: EventBus,
}

impl<S: Store> SosService<S> {
    /// Create a service over a store and the hub bus.
    pub fn new(store: Arc<S>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Add an emergency contact for the caller.
    ///
    /// # Errors
    ///
    /// Rejects guests, malformed names and phone numbers, and callers
    /// already at the contact limit.
    pub async fn add_contact(&self, caller: &Identity, req: AddContact) -> Result<EmergencyContact> {
        if caller.is_read_only() {
            return Err(AlertError::ReadOnly);
        }
        let name = req.name.trim();
        if name.is_empty() || name.chars().count() > 100 {
            return Err(AlertError::InvalidArgument(
                "contact name must be 1..=100 characters".to_owned(),
            ));
        }
        validate_phone(&req.phone)?;
        let existing = self.store.list_emergency_contacts(&caller.user_id).await?;
        if existing.len() >= MAX_CONTACTS {
            return Err(AlertError::InvalidArgument(format!(
                "at most {MAX_CONTACTS} emergency contacts"
            )));
        }

        let contact = EmergencyContact {
            contact_id: ContactId::generate(),
            user_id: caller.user_id.clone(),
            name: name.to_owned(),
            phone: req.phone.trim().to_owned(),
            contact_user_id: req.contact_user_id,
            created_at: bson::DateTime::now(),
        };
        self.store.insert_emergency_contact(&contact).await?;
        Ok(contact)
    }

    /// List the caller's emergency contacts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_contacts(&self, caller: &Identity) -> Result<Vec<EmergencyContact>> {
        Ok(self.store.list_emergency_contacts(&caller.user_id).await?)
    }

    /// Remove one of the caller's emergency contacts.
    ///
    /// # Errors
    ///
    /// Rejects guests; returns [`AlertError::ContactNotFound`] if the caller
    /// has no such contact.
    pub async fn remove_contact(&self, caller: &Identity, contact_id: &ContactId) -> Result<()> {
        if caller.is_read_only() {
            return Err(AlertError::ReadOnly);
        }
        match self
            .store
            .delete_emergency_contact(&caller.user_id, contact_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(AlertError::ContactNotFound(*contact_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Trigger an SOS alert.
    ///
    /// The recipient set is the caller's family watchers plus the emergency
    /// contacts that have accounts, de-duplicated and never including the
    /// caller. The alert is persisted before the bus event goes out.
    ///
    /// # Errors
    ///
    /// Rejects guests, callers with no emergency contacts, and over-long
    /// messages.
    pub async fn trigger(
        &self,
        caller: &Identity,
        message: Option<String>,
        location: Option<GeoPoint>,
    ) -> Result<SosAlert> {
        if caller.is_read_only() {
            return Err(AlertError::ReadOnly);
        }
        let message = message.unwrap_or_default().trim().to_owned();
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AlertError::InvalidArgument(format!(
                "message must be at most {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let contacts = self.store.list_emergency_contacts(&caller.user_id).await?;
        if contacts.is_empty() {
            return Err(AlertError::NoContacts);
        }
        let watchers = self.store.list_watchers_of(&caller.user_id).await?;

        let mut recipients: Vec<UserId> = Vec::new();
        for user_id in watchers
            .iter()
            .map(|link| &link.watcher_id)
            .chain(contacts.iter().filter_map(|c| c.contact_user_id.as_ref()))
        {
            if *user_id != caller.user_id && !recipients.contains(user_id) {
                recipients.push(user_id.clone());
            }
        }

        let alert = SosAlert {
            alert_id: AlertId::generate(),
            user_id: caller.user_id.clone(),
            triggered_at: bson::DateTime::now(),
            location,
            message: message.clone(),
            status: SosStatus::Active,
            recipient_ids: recipients.clone(),
            delivery: std::collections::BTreeMap::new(),
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
        };
        self.store.insert_sos_alert(&alert).await?;
        info!(alert_id = %alert.alert_id, user_id = %caller.user_id,
              recipients = recipients.len(), "SOS alert triggered");

        self.bus.publish(HubEvent::SosTriggered {
            alert_id: alert.alert_id,
            user_id: caller.user_id.clone(),
            user_name: caller.name.clone(),
            message,
            location,
            recipients,
        });
        Ok(alert)
    }

    /// Acknowledge an active alert. Only recipients may acknowledge.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::NotRecipient`] for non-recipients and
    /// [`AlertError::InvalidTransition`] if the alert is past `active`.
    pub async fn acknowledge(&self, caller: &Identity, alert_id: &AlertId) -> Result<SosAlert> {
        let alert = self.get(alert_id).await?;
        if !alert.recipient_ids.contains(&caller.user_id) {
            return Err(AlertError::NotRecipient {
                user_id: caller.user_id.clone(),
                alert_id: *alert_id,
            });
        }
        self.advance(alert_id, SosStatus::Active, SosStatus::Acknowledged, caller)
            .await?;
        self.get(alert_id).await
    }

    /// Resolve an alert. Only the creator or an admin may resolve; both
    /// active and acknowledged alerts can be resolved directly.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::NotCreator`] for other callers and
    /// [`AlertError::InvalidTransition`] if already resolved.
    pub async fn resolve(&self, caller: &Identity, alert_id: &AlertId) -> Result<SosAlert> {
        let alert = self.get(alert_id).await?;
        if alert.user_id != caller.user_id && !caller.role.is_admin() {
            return Err(AlertError::NotCreator {
                user_id: caller.user_id.clone(),
                alert_id: *alert_id,
            });
        }
        if alert.status == SosStatus::Resolved {
            return Err(AlertError::InvalidTransition {
                alert_id: *alert_id,
                status: SosStatus::Resolved.as_str(),
            });
        }
        self.advance(alert_id, alert.status, SosStatus::Resolved, caller)
            .await?;
        self.get(alert_id).await
    }

    /// List alerts the caller triggered or receives, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn history(&self, caller: &Identity) -> Result<Vec<SosAlert>> {
        Ok(self.store.list_sos_alerts_for(&caller.user_id).await?)
    }

    async fn get(&self, alert_id: &AlertId) -> Result<SosAlert> {
        self.store
            .get_sos_alert(alert_id)
            .await?
            .ok_or(AlertError::AlertNotFound(*alert_id))
    }

    async fn advance(
        &self,
        alert_id: &AlertId,
        from: SosStatus,
        to: SosStatus,
        caller: &Identity,
    ) -> Result<()> {
        match self
            .store
            .advance_sos_status(alert_id, from, to, &caller.user_id, bson::DateTime::now())
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict) => {
                // A concurrent writer moved the status; report where it is now.
                let status = self.get(alert_id).await?.status;
                Err(AlertError::InvalidTransition {
                    alert_id: *alert_id,
                    status: status.as_str(),
                })
            }
            Err(StoreError::NotFound) => Err(AlertError::AlertNotFound(*alert_id)),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_phone(phone: &str) -> Result<()> {
    let digits = phone
        .trim()
        .strip_prefix('+')
        .ok_or_else(|| AlertError::InvalidArgument("phone must be E.164, starting with +".to_owned()))?;
    if digits.len() < 7 || digits.len() > 15 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AlertError::InvalidArgument(
            "phone must be 7..=15 digits after the +".to_owned(),
        ));
    }
    Ok(())
}

/// Bus subscriber for the non-push channels: SMS to emergency contacts and
/// the in-app notification feed.
pub struct AlertFanout<S> {
    store: Arc<S>,
    sms: Arc<dyn SmsSender>,
}

impl<S: Store + 'static> AlertFanout<S> {
    /// Create a fanout over a store and an SMS provider.
    pub fn new(store: Arc<S>, sms: Arc<dyn SmsSender>) -> Self {
        Self { store, sms }
    }

    /// Consume bus events until the bus closes.
    pub async fn run(&self, mut sub: BusSubscriber) {
        while let Some(event) = sub.next().await {
            self.handle(&event).await;
        }
        info!("event bus closed, alert fanout stopping");
    }

    /// Process one bus event. Failures are logged and never poison the loop.
    pub async fn handle(&self, event: &HubEvent) {
        match event {
            HubEvent::SosTriggered {
                alert_id,
                user_id,
                user_name,
                message,
                location,
                recipients,
            } => {
                self.sos_feed(event, alert_id, recipients).await;
                self.sos_sms(alert_id, user_id, user_name, message, *location)
                    .await;
            }
            HubEvent::GeofenceTransition {
                event_id,
                watcher_id,
                ..
            } => {
                self.feed_row(&event_id.to_string(), watcher_id, event).await;
            }
            _ => {}
        }
    }

    /// Write a feed row for each recipient, then record the channel outcome
    /// on the alert.
    async fn sos_feed(&self, event: &HubEvent, alert_id: &AlertId, recipients: &[UserId]) {
        let dedup = alert_id.to_string();
        let mut any = false;
        for user_id in recipients {
            if self.feed_row(&dedup, user_id, event).await {
                any = true;
            }
        }
        let outcome = ChannelDelivery {
            sent: any || recipients.is_empty(),
            error: None,
        };
        if let Err(e) = self
            .store
            .set_sos_delivery(alert_id, Channel::Feed, &outcome)
            .await
        {
            warn!(%alert_id, error = %e, "recording feed delivery outcome failed");
        }
    }

    /// SMS every emergency contact of the triggering user, at most once per
    /// contact per alert.
    async fn sos_sms(
        &self,
        alert_id: &AlertId,
        user_id: &UserId,
        user_name: &str,
        message: &str,
        location: Option<GeoPoint>,
    ) {
        let contacts = match self.store.list_emergency_contacts(user_id).await {
            Ok(contacts) => contacts,
            Err(e) => {
                warn!(%alert_id, error = %e, "listing emergency contacts failed");
                return;
            }
        };

        let mut text = if message.is_empty() {
            format!("SOS from {user_name}. Open the Dammaiguda app.")
        } else {
            format!("SOS from {user_name}: {message}")
        };
        if let Some(point) = location {
            text.push_str(&format!(
                " Location: https://www.google.com/maps?q={},{}",
                point.latitude, point.longitude
            ));
        }

        let dedup = alert_id.to_string();
        let mut any = false;
        let mut last_error: Option<String> = None;
        for contact in &contacts {
            // Contacts without an account are logged under their contact id.
            let log_user = contact
                .contact_user_id
                .clone()
                .unwrap_or_else(|| UserId::new(contact.contact_id.to_string()));
            match self
                .store
                .notification_sent(&dedup, Channel::Sms, &log_user)
                .await
            {
                Ok(true) => {
                    any = true;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(%alert_id, error = %e, "at-most-once probe failed");
                    last_error = Some(e.to_string());
                    continue;
                }
            }

            let result = match self.sms.send(&contact.phone, &text).await {
                Ok(()) => {
                    any = true;
                    DeliveryResult::Sent
                }
                Err(e) => {
                    warn!(%alert_id, contact = %contact.contact_id, error = %e, "SMS delivery failed");
                    last_error = Some(e.to_string());
                    DeliveryResult::Failed
                }
            };
            self.append_log(
                &dedup,
                &log_user,
                "sos.triggered",
                doc! { "phone": &contact.phone, "text": &text },
                Channel::Sms,
                result,
            )
            .await;
        }

        let outcome = ChannelDelivery {
            sent: any || contacts.is_empty(),
            error: last_error,
        };
        if let Err(e) = self
            .store
            .set_sos_delivery(alert_id, Channel::Sms, &outcome)
            .await
        {
            warn!(%alert_id, error = %e, "recording SMS delivery outcome failed");
        }
    }

    /// Write one guarded feed row. Returns whether the row exists afterwards.
    async fn feed_row(&self, dedup: &str, user_id: &UserId, event: &HubEvent) -> bool {
        match self
            .store
            .notification_sent(dedup, Channel::Feed, user_id)
            .await
        {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                warn!(%user_id, error = %e, "at-most-once probe failed");
                return false;
            }
        }
        let payload = PushPayload::render(event)
            .and_then(|p| bson::to_document(&p).ok())
            .unwrap_or_else(|| doc! {});
        self.append_log(
            dedup,
            user_id,
            event.kind().as_str(),
            payload,
            Channel::Feed,
            DeliveryResult::Sent,
        )
        .await
    }

    async fn append_log(
        &self,
        dedup: &str,
        user_id: &UserId,
        kind: &str,
        payload: bson::Document,
        channel: Channel,
        result: DeliveryResult,
    ) -> bool {
        let entry = NotificationLog {
            log_id: dammaiguda_core::LogId::generate(),
            alert_id: Some(dedup.to_owned()),
            user_id: user_id.clone(),
            kind: kind.to_owned(),
            payload,
            channel,
            result,
            at: bson::DateTime::now(),
        };
        match self.store.append_notification_log(&entry).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%user_id, error = %e, "appending notification log failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dammaiguda_auth::Role;
    use dammaiguda_store::{FamilyLink, MemoryStore};
    use parking_lot::Mutex;

    struct Harness {
        service: SosService<MemoryStore>,
        store: Arc<MemoryStore>,
        bus: EventBus,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new(64);
        Harness {
            service: SosService::new(store.clone(), bus.clone()),
            store,
            bus,
        }
    }

    fn citizen(id: &str, name: &str) -> Identity {
        Identity {
            user_id: UserId::new(id),
            name: name.to_owned(),
            role: Role::Citizen,
            area_id: Some("dammaiguda".to_owned()),
        }
    }

    fn contact_req(name: &str, phone: &str, user: Option<&str>) -> AddContact {
        AddContact {
            name: name.to_owned(),
            phone: phone.to_owned(),
            contact_user_id: user.map(UserId::new),
        }
    }

    async fn watch(store: &MemoryStore, watcher: &str, member: &str) {
        store
            .put_family_link(&FamilyLink {
                watcher_id: UserId::new(watcher),
                member_id: UserId::new(member),
                relationship: "parent".to_owned(),
                accepted_at: bson::DateTime::now(),
            })
            .await
            .unwrap();
    }

    #[derive(Default)]
    struct RecordingSms {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SmsSender for RecordingSms {
        async fn send(&self, to: &str, message: &str) -> std::result::Result<(), crate::error::SmsError> {
            self.sent.lock().push((to.to_owned(), message.to_owned()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn contact_lifecycle() {
        let h = harness();
        let asha = citizen("u-1", "Asha");

        let contact = h
            .service
            .add_contact(&asha, contact_req("Ravi", "+919876543210", Some("u-2")))
            .await
            .unwrap();
        assert_eq!(h.service.list_contacts(&asha).await.unwrap().len(), 1);

        h.service
            .remove_contact(&asha, &contact.contact_id)
            .await
            .unwrap();
        assert!(h.service.list_contacts(&asha).await.unwrap().is_empty());
        assert!(matches!(
            h.service.remove_contact(&asha, &contact.contact_id).await,
            Err(AlertError::ContactNotFound(_))
        ));
    }

    #[tokio::test]
    async fn malformed_contacts_are_rejected() {
        let h = harness();
        let asha = citizen("u-1", "Asha");

        for (name, phone) in [
            ("", "+919876543210"),
            ("Ravi", "9876543210"),
            ("Ravi", "+12ab"),
            ("Ravi", "+123"),
        ] {
            assert!(matches!(
                h.service.add_contact(&asha, contact_req(name, phone, None)).await,
                Err(AlertError::InvalidArgument(_))
            ));
        }
    }

    #[tokio::test]
    async fn guests_may_not_mutate() {
        let h = harness();
        let guest = Identity::guest();
        assert!(matches!(
            h.service
                .add_contact(&guest, contact_req("Ravi", "+919876543210", None))
                .await,
            Err(AlertError::ReadOnly)
        ));
        assert!(matches!(
            h.service.trigger(&guest, None, None).await,
            Err(AlertError::ReadOnly)
        ));
    }

    #[tokio::test]
    async fn trigger_requires_contacts() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        assert!(matches!(
            h.service.trigger(&asha, None, None).await,
            Err(AlertError::NoContacts)
        ));
    }

    #[tokio::test]
    async fn trigger_builds_the_recipient_set() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        watch(&h.store, "u-parent", "u-1").await;
        // The contact doubles as a watcher; must not be listed twice. A
        // self-contact must be excluded.
        h.service
            .add_contact(&asha, contact_req("Parent", "+919876543210", Some("u-parent")))
            .await
            .unwrap();
        h.service
            .add_contact(&asha, contact_req("Ravi", "+919876543211", Some("u-2")))
            .await
            .unwrap();
        h.service
            .add_contact(&asha, contact_req("Myself", "+919876543212", Some("u-1")))
            .await
            .unwrap();

        let mut sub = h.bus.subscriber("test");
        let alert = h
            .service
            .trigger(&asha, Some("help".to_owned()), None)
            .await
            .unwrap();

        assert_eq!(alert.status, SosStatus::Active);
        assert_eq!(
            alert.recipient_ids,
            vec![UserId::new("u-parent"), UserId::new("u-2")]
        );

        match sub.next().await.unwrap() {
            HubEvent::SosTriggered {
                alert_id,
                user_name,
                recipients,
                ..
            } => {
                assert_eq!(alert_id, alert.alert_id);
                assert_eq!(user_name, "Asha");
                assert_eq!(recipients, alert.recipient_ids);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn acknowledge_is_recipients_only_and_monotone() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        watch(&h.store, "u-parent", "u-1").await;
        h.service
            .add_contact(&asha, contact_req("Ravi", "+919876543210", None))
            .await
            .unwrap();
        let alert = h.service.trigger(&asha, None, None).await.unwrap();

        let stranger = citizen("u-9", "Stranger");
        assert!(matches!(
            h.service.acknowledge(&stranger, &alert.alert_id).await,
            Err(AlertError::NotRecipient { .. })
        ));

        let parent = citizen("u-parent", "Parent");
        let acked = h.service.acknowledge(&parent, &alert.alert_id).await.unwrap();
        assert_eq!(acked.status, SosStatus::Acknowledged);
        assert_eq!(acked.acknowledged_by, Some(parent.user_id.clone()));

        assert!(matches!(
            h.service.acknowledge(&parent, &alert.alert_id).await,
            Err(AlertError::InvalidTransition {
                status: "acknowledged",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn resolve_is_creator_or_admin() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        h.service
            .add_contact(&asha, contact_req("Ravi", "+919876543210", Some("u-2")))
            .await
            .unwrap();
        let alert = h.service.trigger(&asha, None, None).await.unwrap();

        let recipient = citizen("u-2", "Ravi");
        assert!(matches!(
            h.service.resolve(&recipient, &alert.alert_id).await,
            Err(AlertError::NotCreator { .. })
        ));

        let resolved = h.service.resolve(&asha, &alert.alert_id).await.unwrap();
        assert_eq!(resolved.status, SosStatus::Resolved);
        assert!(resolved.resolved_at.is_some());

        assert!(matches!(
            h.service.resolve(&asha, &alert.alert_id).await,
            Err(AlertError::InvalidTransition {
                status: "resolved",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn admin_may_resolve_an_acknowledged_alert() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        h.service
            .add_contact(&asha, contact_req("Ravi", "+919876543210", Some("u-2")))
            .await
            .unwrap();
        let alert = h.service.trigger(&asha, None, None).await.unwrap();
        let ravi = citizen("u-2", "Ravi");
        h.service.acknowledge(&ravi, &alert.alert_id).await.unwrap();

        let mut admin = citizen("u-admin", "Admin");
        admin.role = Role::Admin;
        let resolved = h.service.resolve(&admin, &alert.alert_id).await.unwrap();
        assert_eq!(resolved.status, SosStatus::Resolved);
    }

    #[tokio::test]
    async fn fanout_sends_sms_and_feed_rows_once() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        watch(&h.store, "u-parent", "u-1").await;
        h.service
            .add_contact(&asha, contact_req("Ravi", "+919876543210", Some("u-2")))
            .await
            .unwrap();
        let alert = h
            .service
            .trigger(
                &asha,
                Some("help".to_owned()),
                Some(GeoPoint {
                    latitude: 17.5,
                    longitude: 78.6,
                }),
            )
            .await
            .unwrap();

        let sms = Arc::new(RecordingSms::default());
        let fanout = AlertFanout::new(h.store.clone(), sms.clone());
        let event = HubEvent::SosTriggered {
            alert_id: alert.alert_id,
            user_id: asha.user_id.clone(),
            user_name: "Asha".to_owned(),
            message: "help".to_owned(),
            location: alert.location,
            recipients: alert.recipient_ids.clone(),
        };
        fanout.handle(&event).await;

        {
            let sent = sms.sent.lock();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, "+919876543210");
            assert!(sent[0].1.contains("SOS from Asha: help"));
            assert!(sent[0].1.contains("https://www.google.com/maps?q=17.5,78.6"));
        }

        for recipient in &alert.recipient_ids {
            let feed = h.store.list_feed(recipient, 10).await.unwrap();
            assert_eq!(feed.len(), 1);
            assert_eq!(feed[0].kind, "sos.triggered");
        }
        let stored = h.store.get_sos_alert(&alert.alert_id).await.unwrap().unwrap();
        assert!(stored.delivery["sms"].sent);
        assert!(stored.delivery["feed"].sent);

        // Replaying the event must not send or write anything again.
        fanout.handle(&event).await;
        assert_eq!(sms.sent.lock().len(), 1);
        for recipient in &alert.recipient_ids {
            assert_eq!(h.store.list_feed(recipient, 10).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn geofence_transitions_land_in_the_watcher_feed() {
        let h = harness();
        let sms = Arc::new(RecordingSms::default());
        let fanout = AlertFanout::new(h.store.clone(), sms.clone());

        let watcher = UserId::new("u-parent");
        let event = HubEvent::GeofenceTransition {
            event_id: uuid::Uuid::new_v4(),
            fence_id: dammaiguda_core::FenceId::generate(),
            fence_name: "school".to_owned(),
            watcher_id: watcher.clone(),
            member_id: UserId::new("u-child"),
            member_name: "Ravi".to_owned(),
            transition: dammaiguda_core::FenceTransition::Enter,
            location: GeoPoint {
                latitude: 17.5,
                longitude: 78.6,
            },
        };
        fanout.handle(&event).await;
        fanout.handle(&event).await;

        let feed = h.store.list_feed(&watcher, 10).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].kind, "geofence.transition");
        assert!(sms.sent.lock().is_empty());
    }
}
