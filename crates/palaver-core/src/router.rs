//! Envelope dispatch.
//!
//! One decoded envelope in, one handler call out. Handlers own their
//! authorization and validation; the router's job is the payload-presence
//! check, the join gate, and making sure a rejected request dies here with
//! a log line instead of unwinding into the pumps.

use std::sync::Arc;

use palaver_proto::web_socket_message::Payload;
use palaver_proto::{JoinRequest, JoinResponse, WebSocketMessage};

use crate::client::Client;
use crate::error::CoreError;
use crate::room::Room;

/// Dispatch one inbound envelope from `client`.
pub async fn dispatch(room: &Arc<Room>, client: &Arc<Client>, envelope: WebSocketMessage) {
    let Some(payload) = envelope.payload else {
        tracing::debug!(room = %room.id(), user = %client.id(), "dropping envelope without payload");
        return;
    };

    let result = match payload {
        Payload::Join(req) => handle_join(room, client, req).await,
        Payload::Signal(signal) => room.handle_signal(client, signal).await,
        Payload::Chat(req) => room.handle_chat(client, req).await,
        Payload::ToggleMedia(req) => room.handle_toggle_media(client, req).await,
        Payload::ToggleHand(req) => room.handle_toggle_hand(client, req).await,
        Payload::ScreenShare(req) => room.handle_screen_share(client, req).await,
        Payload::GetRecentChats(_) => room.handle_recent_chats(client).await,
        Payload::DeleteChat(req) => room.handle_delete_chat(client, req).await,
        Payload::RequestScreenSharePermission(_) => room.handle_permission_request(client).await,
        Payload::AdminAction(req) => room.handle_admin(client, req).await,
        // A host's grant/deny reply rides the event variant back in.
        Payload::ScreenSharePermission(evt) => room.handle_permission_reply(client, evt).await,
        other => {
            tracing::debug!(room = %room.id(), user = %client.id(), variant = ?variant_name(&other),
                "ignoring server-to-client variant from client");
            Ok(())
        }
    };

    if let Err(error) = result {
        // Per-operation boundary: rejected requests are logged, never
        // surfaced past here.
        tracing::warn!(room = %room.id(), user = %client.id(), %error, "request rejected");
    }
}

/// The join gate: a Waiting client gets a synthetic join response with the
/// current snapshot and no SFU session; a live client gets a media session.
async fn handle_join(
    room: &Arc<Room>,
    client: &Arc<Client>,
    req: JoinRequest,
) -> Result<(), CoreError> {
    if !req.room_id.is_empty() && req.room_id != room.id() {
        tracing::debug!(room = %room.id(), user = %client.id(), requested = %req.room_id,
            "join names a different room; connection owns the routing");
    }

    if client.role().is_waiting() {
        let snapshot = room.room_state_snapshot().await;
        client.send_proto(&WebSocketMessage::new(Payload::JoinResponse(JoinResponse {
            success: true,
            user_id: client.id().to_owned(),
            is_host: false,
            initial_state: Some(snapshot),
        })));
        return Ok(());
    }

    room.start_media_session(client.clone(), true).await;
    Ok(())
}

fn variant_name(payload: &Payload) -> &'static str {
    match payload {
        Payload::Join(_) => "join",
        Payload::Signal(_) => "signal",
        Payload::Chat(_) => "chat",
        Payload::ToggleMedia(_) => "toggle_media",
        Payload::ToggleHand(_) => "toggle_hand",
        Payload::ScreenShare(_) => "screen_share",
        Payload::GetRecentChats(_) => "get_recent_chats",
        Payload::DeleteChat(_) => "delete_chat",
        Payload::RequestScreenSharePermission(_) => "request_screen_share_permission",
        Payload::AdminAction(_) => "admin_action",
        Payload::JoinResponse(_) => "join_response",
        Payload::RoomState(_) => "room_state",
        Payload::ChatEvent(_) => "chat_event",
        Payload::RecentChats(_) => "recent_chats",
        Payload::DeleteChatEvent(_) => "delete_chat_event",
        Payload::MediaState(_) => "media_state",
        Payload::HandUpdate(_) => "hand_update",
        Payload::ScreenShareChanged(_) => "screen_share_changed",
        Payload::ScreenSharePermission(_) => "screen_share_permission",
        Payload::AdminEvent(_) => "admin_event",
        Payload::SignalEvent(_) => "signal_event",
        Payload::TrackAdded(_) => "track_added",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use crate::sfu::testing::MockSfu;
    use crate::sfu::SfuClient;
    use palaver_proto::{signal, ChatEvent, Signal};
    use tokio::sync::mpsc;

    fn envelope(payload: Payload) -> WebSocketMessage {
        WebSocketMessage::new(payload)
    }

    async fn room_with_sfu() -> (Arc<Room>, Arc<MockSfu>) {
        let sfu = Arc::new(MockSfu::default());
        let room = Room::new(
            "R1",
            RoomConfig::default(),
            None,
            Some(sfu.clone() as Arc<dyn SfuClient>),
            "instance-test",
            Arc::new(|_| {}),
        );
        (room, sfu)
    }

    fn decode_all(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Payload> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Some(p) = WebSocketMessage::decode_from_bytes(&frame).unwrap().payload {
                out.push(p);
            }
        }
        out
    }

    #[tokio::test]
    async fn join_from_waiting_client_is_synthetic() {
        let (room, sfu) = room_with_sfu().await;
        let (host, _host_rx) = Client::new("alice", "Alice", 64);
        room.admit(host).await.unwrap();
        let (bob, mut bob_rx) = Client::new("bob", "Bob", 64);
        room.admit(bob.clone()).await.unwrap();

        dispatch(
            &room,
            &bob,
            envelope(Payload::Join(JoinRequest {
                display_name: "Bob".into(),
                room_id: "R1".into(),
                token: String::new(),
            })),
        )
        .await;

        let payloads = decode_all(&mut bob_rx);
        let Some(Payload::JoinResponse(resp)) = payloads.first() else {
            panic!("expected join response, got {payloads:?}");
        };
        assert!(resp.success);
        assert!(resp.initial_state.is_some());
        // No SFU session for a waiting client.
        assert!(sfu.created().is_empty());
    }

    #[tokio::test]
    async fn join_from_live_client_creates_media_session() {
        let (room, sfu) = room_with_sfu().await;
        let (alice, mut rx) = Client::new("alice", "Alice", 64);
        room.admit(alice.clone()).await.unwrap();
        while rx.try_recv().is_ok() {}

        dispatch(
            &room,
            &alice,
            envelope(Payload::Join(JoinRequest {
                display_name: "Alice".into(),
                room_id: "R1".into(),
                token: String::new(),
            })),
        )
        .await;

        assert_eq!(sfu.created(), vec![("alice".to_owned(), "R1".to_owned())]);
        let payloads = decode_all(&mut rx);
        // JoinResponse first, then the initial offer.
        assert!(matches!(payloads.first(), Some(Payload::JoinResponse(r)) if r.success && r.is_host));
        assert!(payloads.iter().any(|p| matches!(
            p,
            Payload::SignalEvent(Signal { sdp: Some(signal::Sdp::SdpOffer(_)) })
        )));
    }

    #[tokio::test]
    async fn signal_is_forwarded_for_live_clients_only() {
        let (room, sfu) = room_with_sfu().await;
        let (alice, _rx) = Client::new("alice", "Alice", 64);
        room.admit(alice.clone()).await.unwrap();
        let (bob, _bob_rx) = Client::new("bob", "Bob", 64);
        room.admit(bob.clone()).await.unwrap();

        let sig = Signal {
            sdp: Some(signal::Sdp::SdpAnswer("v=0".into())),
        };
        dispatch(&room, &alice, envelope(Payload::Signal(sig.clone()))).await;
        dispatch(&room, &bob, envelope(Payload::Signal(sig))).await;

        assert_eq!(sfu.signals(), vec!["alice".to_owned()]);
    }

    #[tokio::test]
    async fn empty_and_server_variants_are_dropped() {
        let (room, _sfu) = room_with_sfu().await;
        let (alice, mut rx) = Client::new("alice", "Alice", 64);
        room.admit(alice.clone()).await.unwrap();
        while rx.try_recv().is_ok() {}

        dispatch(&room, &alice, WebSocketMessage { payload: None }).await;
        dispatch(
            &room,
            &alice,
            envelope(Payload::ChatEvent(ChatEvent::default())),
        )
        .await;

        assert!(decode_all(&mut rx).is_empty());
        assert_eq!(room.stats().await.chat_messages, 0);
    }
}
