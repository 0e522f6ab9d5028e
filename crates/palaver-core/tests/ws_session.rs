//! End-to-end session flow over a real WebSocket connection.
//!
//! Spins up the signaling router on an ephemeral port and drives it with a
//! plain tungstenite client, covering the upgrade gate, both pumps, and the
//! waiting-room/approval flow as a client on the wire sees it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use palaver_core::{ws, AuthClaims, AuthError, Authenticator, Hub, RoomConfig};
use palaver_proto::web_socket_message::Payload;
use palaver_proto::{admin_action, AdminActionRequest, ChatRequest, JoinRequest, WebSocketMessage};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Token doubles as the user id; empty tokens are rejected.
struct TokenIsUser;

impl Authenticator for TokenIsUser {
    fn authenticate<'a>(
        &'a self,
        token: &'a str,
        _room_id: &'a str,
        _origin: Option<&'a str>,
    ) -> BoxFuture<'a, Result<AuthClaims, AuthError>> {
        Box::pin(async move {
            if token.is_empty() {
                return Err(AuthError::InvalidToken("empty token".into()));
            }
            Ok(AuthClaims {
                user_id: token.to_owned(),
                display_name: token.to_uppercase(),
                rate_limited: true,
            })
        })
    }
}

async fn spawn_server() -> (SocketAddr, Arc<Hub>) {
    let hub = Hub::new(RoomConfig::default(), Arc::new(TokenIsUser), None, None);
    let app = ws::build_router(hub.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, hub)
}

async fn connect(addr: SocketAddr, room: &str, token: &str) -> Socket {
    let url = format!("ws://{addr}/ws/{room}?token={token}");
    let (socket, _) = connect_async(url).await.expect("websocket connect");
    socket
}

async fn send(socket: &mut Socket, payload: Payload) {
    let frame = WebSocketMessage::new(payload).encode_to_bytes();
    socket
        .send(Message::Binary(frame.into()))
        .await
        .expect("send frame");
}

/// Read frames until one matches, failing the test after a bound.
async fn wait_for<F, T>(socket: &mut Socket, mut pick: F) -> T
where
    F: FnMut(Payload) -> Option<T>,
{
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let frame = socket.next().await.expect("stream open").expect("read");
            let Message::Binary(data) = frame else {
                continue;
            };
            let envelope = WebSocketMessage::decode_from_bytes(&data).expect("decode");
            let Some(payload) = envelope.payload else {
                continue;
            };
            if let Some(value) = pick(payload) {
                return value;
            }
        }
    })
    .await
    .expect("expected frame before timeout")
}

#[tokio::test]
async fn host_gets_room_state_and_join_response() {
    let (addr, _hub) = spawn_server().await;
    let mut alice = connect(addr, "R1", "alice").await;

    let state = wait_for(&mut alice, |p| match p {
        Payload::RoomState(state) => Some(state),
        _ => None,
    })
    .await;
    assert_eq!(state.participants.len(), 1);
    assert_eq!(state.participants[0].id, "alice");
    assert!(state.participants[0].is_host);

    send(
        &mut alice,
        Payload::Join(JoinRequest {
            display_name: "ALICE".into(),
            room_id: "R1".into(),
            token: String::new(),
        }),
    )
    .await;

    let join = wait_for(&mut alice, |p| match p {
        Payload::JoinResponse(resp) => Some(resp),
        _ => None,
    })
    .await;
    assert!(join.success);
    assert!(join.is_host);
    assert_eq!(join.user_id, "alice");
    assert!(join.initial_state.is_some());
}

#[tokio::test]
async fn upgrade_is_refused_without_a_token() {
    let (addr, _hub) = spawn_server().await;
    let url = format!("ws://{addr}/ws/R1?token=");
    assert!(connect_async(url).await.is_err());
}

#[tokio::test]
async fn approval_and_chat_reach_the_second_client() {
    let (addr, _hub) = spawn_server().await;
    let mut alice = connect(addr, "R1", "alice").await;
    let mut bob = connect(addr, "R1", "bob").await;

    // The host sees bob in the waiting list.
    let state = wait_for(&mut alice, |p| match p {
        Payload::RoomState(state) if !state.waiting_users.is_empty() => Some(state),
        _ => None,
    })
    .await;
    assert_eq!(state.waiting_users[0].id, "bob");

    send(
        &mut alice,
        Payload::AdminAction(AdminActionRequest {
            action: admin_action::APPROVE.into(),
            target_user_id: "bob".into(),
        }),
    )
    .await;

    let join = wait_for(&mut bob, |p| match p {
        Payload::JoinResponse(resp) => Some(resp),
        _ => None,
    })
    .await;
    assert!(join.success);
    assert_eq!(join.user_id, "bob");

    send(
        &mut alice,
        Payload::Chat(ChatRequest {
            content: "hello <world>".into(),
            target_user_id: String::new(),
        }),
    )
    .await;

    let chat = wait_for(&mut bob, |p| match p {
        Payload::ChatEvent(evt) => Some(evt),
        _ => None,
    })
    .await;
    assert_eq!(chat.sender_id, "alice");
    assert_eq!(chat.content, "hello &lt;world&gt;");
    assert!(!chat.is_private);
}

#[tokio::test]
async fn closing_the_socket_removes_the_client() {
    let (addr, hub) = spawn_server().await;
    let mut alice = connect(addr, "R1", "alice").await;
    wait_for(&mut alice, |p| match p {
        Payload::RoomState(state) => Some(state),
        _ => None,
    })
    .await;

    alice.close(None).await.expect("close");

    // The read pump runs the disconnect path; poll until it lands.
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let Some(room) = hub.room("R1").await else {
                // Already deleted is fine too; emptiness is what we assert.
                return;
            };
            if room.is_empty().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client removed before timeout");
}
