//! WebSocket edge: upgrade, admission, and the two per-client pumps.
//!
//! The token and Origin header are checked before the upgrade completes, so
//! an unauthenticated connect never touches room state. After admission the
//! connection runs as two cooperative tasks: the read pump decodes binary
//! frames into envelopes for the router, and the write pump drains the
//! client's bounded queue under a per-frame deadline. Either pump exiting
//! tears the connection down through the room's disconnect path.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use palaver_proto::WebSocketMessage;

use crate::auth::AuthClaims;
use crate::client::Client;
use crate::hub::Hub;
use crate::room::Room;
use crate::router;

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    token: String,
}

/// Build the signaling router: one WebSocket route per room.
pub fn build_router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/ws/{room_id}", get(ws_handler))
        .with_state(hub)
}

async fn ws_handler(
    Path(room_id): Path<String>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(hub): State<Arc<Hub>>,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let claims = match hub
        .authenticator()
        .authenticate(&params.token, &room_id, origin.as_deref())
        .await
    {
        Ok(claims) => claims,
        Err(error) => {
            tracing::warn!(room = %room_id, %error, "websocket upgrade rejected");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_connection(socket, hub, room_id, claims))
}

async fn handle_connection(socket: WebSocket, hub: Arc<Hub>, room_id: String, claims: AuthClaims) {
    let room = hub.get_or_create_room(&room_id).await;
    let (client, outbound_rx) = Client::new(
        claims.user_id,
        claims.display_name,
        room.config().outbound_queue_capacity,
    );
    client.set_rate_limited(claims.rate_limited);

    tracing::debug!(room = %room_id, user = %client.id(), "websocket connected");

    // A failed admission already queued the join-failed response and fired
    // the close latch; the pumps below flush it and exit immediately.
    let _ = room.admit(client.clone()).await;

    let (sink, stream) = socket.split();
    let write_deadline = room.config().write_deadline;
    let writer_user = client.id().to_owned();
    let writer = tokio::spawn(async move {
        write_pump(sink, outbound_rx, write_deadline, writer_user).await;
    });

    read_pump(stream, room, client).await;
    // Queue closure (via the disconnect path) ends the writer; just reap it.
    let _ = writer.await;
}

/// Decode binary frames and hand them to the router. Exits on read error,
/// close frame, room shutdown or a requested disconnect; the final action
/// is the room's client-disconnect path.
async fn read_pump(mut stream: SplitStream<WebSocket>, room: Arc<Room>, client: Arc<Client>) {
    let room_cancel = room.cancel_token().clone();
    loop {
        if client.is_disconnect_requested() {
            break;
        }
        tokio::select! {
            _ = client.cancelled() => break,
            _ = room_cancel.cancelled() => break,
            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    match WebSocketMessage::decode_from_bytes(&data) {
                        Ok(envelope) => router::dispatch(&room, &client, envelope).await,
                        Err(error) => {
                            tracing::debug!(user = %client.id(), %error, "dropping undecodable frame");
                        }
                    }
                }
                Some(Ok(Message::Text(_))) => {
                    tracing::debug!(user = %client.id(), "ignoring text frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong are answered by the stack
                Some(Err(error)) => {
                    tracing::debug!(user = %client.id(), %error, "websocket read error");
                    break;
                }
            },
        }
    }

    tracing::debug!(room = %room.id(), user = %client.id(), "read pump ended");
    room.remove_client(client.id()).await;
}

/// Drain the bounded queue into binary frames, each under a write deadline.
/// On queue close, emit a close frame and exit.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    deadline: Duration,
    user: String,
) {
    while let Some(frame) = outbound.recv().await {
        match tokio::time::timeout(deadline, sink.send(Message::Binary(frame.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::debug!(user = %user, %error, "websocket write error");
                return;
            }
            Err(_) => {
                tracing::warn!(user = %user, "write deadline exceeded, closing connection");
                return;
            }
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    tracing::debug!(user = %user, "write pump ended");
}
