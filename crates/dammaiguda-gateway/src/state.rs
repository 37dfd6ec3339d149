//! Shared application state.

use std::sync::Arc;

use dammaiguda_auth::TokenVerifier;
use dammaiguda_chat::{ChatEngine, PresenceRegistry};
use dammaiguda_core::EventBus;
use dammaiguda_geo::GeofenceEvaluator;
use dammaiguda_notify::SosService;
use dammaiguda_store::Store;

use crate::config::GatewayConfig;

/// State available to every request handler.
///
/// Generic over the store and the token verifier so tests run against the
/// in-memory store and a mock verifier.
pub struct AppState<S, V> {
    /// Persistence.
    pub store: Arc<S>,
    /// Caller identity resolution.
    pub verifier: Arc<V>,
    /// Chat rooms and messages.
    pub chat: Arc<ChatEngine<S>>,
    /// Live sockets per room.
    pub presence: Arc<PresenceRegistry>,
    /// Family locations and geofences.
    pub geo: Arc<GeofenceEvaluator<S>>,
    /// Emergency contacts and the SOS lifecycle.
    pub sos: Arc<SosService<S>>,
    /// The hub event bus.
    pub bus: EventBus,
    /// VAPID public key served to browsers.
    pub push_public_key: String,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl<S, V> AppState<S, V>
where
    S: Store,
    V: TokenVerifier,
{
    /// Assemble the state, constructing the engines over the shared store
    /// and bus.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        verifier: Arc<V>,
        bus: EventBus,
        push_public_key: String,
        config: GatewayConfig,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new(bus.clone()));
        let chat = Arc::new(ChatEngine::new(
            Arc::clone(&store),
            Arc::clone(&presence),
            bus.clone(),
        ));
        let geo = Arc::new(GeofenceEvaluator::new(Arc::clone(&store), bus.clone()));
        let sos = Arc::new(SosService::new(Arc::clone(&store), bus.clone()));
        Self {
            store,
            verifier,
            chat,
            presence,
            geo,
            sos,
            bus,
            push_public_key,
            config,
        }
    }
}

impl<S, V> Clone for AppState<S, V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            verifier: Arc::clone(&self.verifier),
            chat: Arc::clone(&self.chat),
            presence: Arc::clone(&self.presence),
            geo: Arc::clone(&self.geo),
            sos: Arc::clone(&self.sos),
            bus: self.bus.clone(),
            push_public_key: self.push_public_key.clone(),
            config: self.config.clone(),
        }
    }
}
