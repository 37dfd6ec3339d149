//! Community hub gateway - HTTP/WebSocket entry point.
//!
//! Wires the MongoDB store, the HMAC token verifier, the chat and geofence
//! engines, and the background delivery tasks together, then serves the
//! router.
//!
//! # Environment
//!
//! - `LISTEN_ADDR` - bind address (default `0.0.0.0:8080`)
//! - `MONGODB_URI` / `MONGODB_DB` - store connection
//! - `JWT_SECRET` - HMAC secret shared with the identity service
//! - `VAPID_PRIVATE_KEY` / `VAPID_CONTACT_EMAIL` - Web Push signing; when
//!   the key is missing push delivery is disabled
//! - `SMS_API_URL` / `SMS_API_KEY` - SMS provider; when unset SOS SMS is
//!   logged instead of sent
//! - `CORS_ORIGINS` - comma-separated allowed origins (default: any)

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dammaiguda_auth::HmacVerifier;
use dammaiguda_core::EventBus;
use dammaiguda_gateway::{create_router, spawn_room_broadcaster, AppState, GatewayConfig};
use dammaiguda_notify::{
    AlertFanout, HttpSmsSender, NoopSmsSender, PushDispatcher, SmsSender, VapidSigner,
    WebPushClient,
};
use dammaiguda_store::MongoStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dammaiguda=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting community hub gateway");

    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let mongodb_uri =
        std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
    let mongodb_db = std::env::var("MONGODB_DB").unwrap_or_else(|_| "dammaiguda".into());
    let jwt_secret = std::env::var("JWT_SECRET")?;
    let vapid_private_key = std::env::var("VAPID_PRIVATE_KEY").ok();
    let vapid_contact_email = std::env::var("VAPID_CONTACT_EMAIL")
        .unwrap_or_else(|_| "support@mydammaiguda.in".into());
    let sms_api_url = std::env::var("SMS_API_URL").ok();
    let sms_api_key = std::env::var("SMS_API_KEY").unwrap_or_default();
    let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
        .map(|v| v.split(',').map(|o| o.trim().to_owned()).collect())
        .unwrap_or_default();

    let config = GatewayConfig {
        listen_addr,
        cors_origins,
        ..GatewayConfig::default()
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        mongodb_db = %mongodb_db,
        "Gateway configuration loaded"
    );

    let store = Arc::new(MongoStore::connect(&mongodb_uri, &mongodb_db).await?);
    tracing::info!("Store connected");

    let verifier = Arc::new(HmacVerifier::new(&jwt_secret));
    let bus = EventBus::new(config.bus_capacity);

    // Web Push dispatcher; without a VAPID key pushes are dropped and the
    // public-key endpoint serves an empty key.
    let push_public_key = match vapid_private_key {
        Some(key) => {
            let signer = VapidSigner::from_base64(&key, &vapid_contact_email)?;
            let public_key = signer.public_key().to_owned();
            let client = Arc::new(WebPushClient::new(signer)?);
            let dispatcher = PushDispatcher::new(Arc::clone(&store), client);
            let sub = bus.subscriber("push-dispatcher");
            tokio::spawn(async move { dispatcher.run(sub).await });
            tracing::info!("Push dispatcher started");
            public_key
        }
        None => {
            tracing::warn!("No VAPID_PRIVATE_KEY set - push delivery disabled");
            String::new()
        }
    };

    // SOS fanout: SMS plus in-app feed rows.
    let sms: Arc<dyn SmsSender> = match sms_api_url {
        Some(url) => {
            tracing::info!(api_url = %url, "SMS provider configured");
            Arc::new(HttpSmsSender::new(url, sms_api_key)?)
        }
        None => {
            tracing::warn!("No SMS_API_URL set - SOS SMS will only be logged");
            Arc::new(NoopSmsSender)
        }
    };
    let fanout = AlertFanout::new(Arc::clone(&store), sms);
    let fanout_sub = bus.subscriber("alert-fanout");
    tokio::spawn(async move { fanout.run(fanout_sub).await });
    tracing::info!("Alert fanout started");

    let state = AppState::new(store, verifier, bus.clone(), push_public_key, config.clone());

    // Room broadcaster: bus events back onto live sockets.
    spawn_room_broadcaster(Arc::clone(&state.presence), bus.subscriber("room-broadcaster"));

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
