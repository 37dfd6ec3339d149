//! Room socket tests over a real TCP listener.
//!
//! Frames arrive interleaved with presence traffic, so assertions skim
//! frames until the expected `type` shows up.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use dammaiguda_auth::{Identity, MockVerifier, Role};
use dammaiguda_chat::CreateRoom;
use dammaiguda_core::{EventBus, RoomId, UserId};
use dammaiguda_gateway::{create_router, spawn_room_broadcaster, AppState, GatewayConfig};
use dammaiguda_store::MemoryStore;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Hub {
    addr: SocketAddr,
    state: AppState<MemoryStore, MockVerifier>,
}

async fn serve_hub() -> Hub {
    let store = Arc::new(MemoryStore::new());
    let verifier = Arc::new(MockVerifier {
        area_id: Some("ward-7".to_owned()),
    });
    let bus = EventBus::new(64);
    let state = AppState::new(
        store,
        verifier,
        bus.clone(),
        String::new(),
        GatewayConfig::default(),
    );
    spawn_room_broadcaster(Arc::clone(&state.presence), bus.subscriber("broadcast"));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    Hub { addr, state }
}

fn citizen(id: &str, name: &str) -> Identity {
    Identity {
        user_id: UserId::new(id),
        name: name.to_owned(),
        role: Role::Citizen,
        area_id: Some("ward-7".to_owned()),
    }
}

async fn public_room(hub: &Hub) -> RoomId {
    hub.state
        .chat
        .create_room(
            &citizen("u-asha", "Asha"),
            CreateRoom {
                name: "Water Supply".to_owned(),
                name_localized: None,
                is_public: true,
            },
        )
        .await
        .expect("create room")
        .room_id
}

async fn connect(hub: &Hub, room_id: RoomId, token: Option<&str>) -> Socket {
    let query = token.map(|t| format!("?token={t}")).unwrap_or_default();
    let url = format!("ws://{}/chat/rooms/{room_id}/ws{query}", hub.addr);
    let (socket, _) = connect_async(url).await.expect("connect");
    socket
}

/// Read frames until one of the given `type` arrives.
async fn frame_of_type(socket: &mut Socket, kind: &str) -> Value {
    let deadline = Duration::from_secs(5);
    loop {
        let message = tokio::time::timeout(deadline, socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = serde_json::from_str(text.as_str()).expect("frame json");
        if frame["type"] == kind {
            return frame;
        }
    }
}

#[tokio::test]
async fn messages_fan_out_to_every_socket_in_the_room() {
    let hub = serve_hub().await;
    let room_id = public_room(&hub).await;

    let mut asha = connect(&hub, room_id, Some("test-token:u-asha:citizen")).await;
    let join = frame_of_type(&mut asha, "presence").await;
    assert_eq!(join["event"], "join");
    assert_eq!(join["online_count"], 1);

    let mut ravi = connect(&hub, room_id, Some("test-token:u-ravi:citizen")).await;
    let join = frame_of_type(&mut asha, "presence").await;
    assert_eq!(join["user_id"], "u-ravi");
    assert_eq!(join["online_count"], 2);

    asha.send(Message::Text(
        json!({ "type": "message", "content": "tanker reaches at 5pm" })
            .to_string()
            .into(),
    ))
    .await
    .expect("send");

    // Both the author's socket and the other member's socket see the post.
    for socket in [&mut asha, &mut ravi] {
        let frame = frame_of_type(socket, "message").await;
        assert_eq!(frame["message"]["content"], "tanker reaches at 5pm");
        assert_eq!(frame["message"]["user_id"], "u-asha");
    }

    // The message was persisted, not just broadcast.
    let page = hub
        .state
        .chat
        .get_messages(&citizen("u-ravi", "Ravi"), &room_id, None, None)
        .await
        .expect("page");
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn typing_is_ephemeral_and_skips_the_sender() {
    let hub = serve_hub().await;
    let room_id = public_room(&hub).await;

    let mut asha = connect(&hub, room_id, Some("test-token:u-asha:citizen")).await;
    frame_of_type(&mut asha, "presence").await;
    let mut ravi = connect(&hub, room_id, Some("test-token:u-ravi:citizen")).await;
    frame_of_type(&mut ravi, "presence").await;

    asha.send(Message::Text(
        json!({ "type": "typing", "is_typing": true }).to_string().into(),
    ))
    .await
    .expect("send");

    let frame = frame_of_type(&mut ravi, "typing").await;
    assert_eq!(frame["user_id"], "u-asha");
    assert_eq!(frame["is_typing"], true);

    // The stopped-typing signal carries the cleared flag.
    asha.send(Message::Text(
        json!({ "type": "typing", "is_typing": false }).to_string().into(),
    ))
    .await
    .expect("send");
    let frame = frame_of_type(&mut ravi, "typing").await;
    assert_eq!(frame["is_typing"], false);

    // Nothing was persisted.
    let page = hub
        .state
        .chat
        .get_messages(&citizen("u-ravi", "Ravi"), &room_id, None, None)
        .await
        .expect("page");
    assert!(page.is_empty());
}

#[tokio::test]
async fn guest_sockets_read_but_may_not_post() {
    let hub = serve_hub().await;
    let room_id = public_room(&hub).await;

    let mut guest = connect(&hub, room_id, None).await;
    frame_of_type(&mut guest, "presence").await;

    guest
        .send(Message::Text(
            json!({ "type": "message", "content": "hello" }).to_string().into(),
        ))
        .await
        .expect("send");

    let frame = frame_of_type(&mut guest, "error").await;
    assert_eq!(frame["kind"], "forbidden");

    // But broadcasts still arrive.
    hub.state
        .chat
        .post_message(
            &citizen("u-asha", "Asha"),
            &room_id,
            dammaiguda_chat::PostMessage {
                content: "open meeting at the park".to_owned(),
                reply_to: None,
            },
        )
        .await
        .expect("post");
    let frame = frame_of_type(&mut guest, "message").await;
    assert_eq!(frame["message"]["content"], "open meeting at the park");
}

#[tokio::test]
async fn malformed_frames_get_an_error_reply() {
    let hub = serve_hub().await;
    let room_id = public_room(&hub).await;

    let mut asha = connect(&hub, room_id, Some("test-token:u-asha:citizen")).await;
    frame_of_type(&mut asha, "presence").await;

    asha.send(Message::Text("{not json".to_owned().into()))
        .await
        .expect("send");
    let frame = frame_of_type(&mut asha, "error").await;
    assert_eq!(frame["kind"], "invalid_argument");
}

#[tokio::test]
async fn an_invalid_token_downgrades_to_guest() {
    let hub = serve_hub().await;
    let room_id = public_room(&hub).await;

    let mut socket = connect(&hub, room_id, Some("bogus")).await;
    frame_of_type(&mut socket, "presence").await;

    socket
        .send(Message::Text(
            json!({ "type": "message", "content": "hello" }).to_string().into(),
        ))
        .await
        .expect("send");
    let frame = frame_of_type(&mut socket, "error").await;
    assert_eq!(frame["kind"], "forbidden");
}
