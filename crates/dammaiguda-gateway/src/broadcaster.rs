//! Bus-to-socket broadcaster.
//!
//! One task subscribes to the hub bus and pushes every room-scoped event
//! onto the queues of that room's live sockets. Events that are not
//! room-scoped (SOS, geofence, news) are ignored here; the push dispatcher
//! and the alert fanout carry those.

use std::sync::Arc;

use dammaiguda_chat::{PresenceRegistry, ServerFrame};
use dammaiguda_core::BusSubscriber;
use tokio::task::JoinHandle;
use tracing::info;

/// Spawn the broadcaster task. It runs until the bus closes.
pub fn spawn_room_broadcaster(
    presence: Arc<PresenceRegistry>,
    mut sub: BusSubscriber,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = sub.next().await {
            if let Some((room_id, frame)) = ServerFrame::from_event(&event) {
                presence.broadcast(&room_id, &frame, None);
            }
        }
        info!("event bus closed, room broadcaster stopping");
    })
}
