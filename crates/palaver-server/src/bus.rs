//! Redis-backed event bus for multi-instance deployments.
//!
//! One pub/sub channel per room carries marshalled envelopes prefixed with
//! the publishing instance's tag, so bridges can drop their own echoes.
//! The room membership mirror is a Redis set per room with a TTL, refreshed
//! on every add; a crashed instance's stale members age out instead of
//! lingering forever.

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use palaver_core::bus::BusStream;
use palaver_core::{BusError, BusMessage, EventBus};
use redis::AsyncCommands;

/// Seconds before an unrefreshed membership set expires.
const MEMBER_SET_TTL_SECS: i64 = 3600;

pub struct RedisBus {
    /// Dedicated pub/sub connections come from the client; commands go
    /// through the auto-reconnecting manager.
    client: redis::Client,
    manager: redis::aio::ConnectionManager,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { client, manager })
    }

    fn channel(room_id: &str) -> String {
        format!("palaver:room:{room_id}")
    }

    fn members_key(room_id: &str) -> String {
        format!("palaver:members:{room_id}")
    }
}

/// Wire format on the channel: `[sender_len u8][sender][payload]`.
fn encode_frame(sender: &str, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + sender.len() + payload.len());
    buf.push(sender.len() as u8);
    buf.extend_from_slice(sender.as_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn decode_frame(bytes: &[u8]) -> Option<BusMessage> {
    let sender_len = *bytes.first()? as usize;
    let sender_end = 1 + sender_len;
    if bytes.len() < sender_end {
        return None;
    }
    let sender = std::str::from_utf8(&bytes[1..sender_end]).ok()?.to_owned();
    Some(BusMessage {
        sender,
        payload: bytes[sender_end..].to_vec(),
    })
}

fn transport_err(e: redis::RedisError) -> BusError {
    BusError::Transport(e.to_string())
}

impl EventBus for RedisBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        sender: &'a str,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        let mut conn = self.manager.clone();
        let channel = Self::channel(topic);
        let frame = encode_frame(sender, &payload);
        Box::pin(async move {
            let _: () = conn.publish(channel, frame).await.map_err(transport_err)?;
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<BusStream, BusError>> {
        let client = self.client.clone();
        let channel = Self::channel(topic);
        Box::pin(async move {
            let mut pubsub = client.get_async_pubsub().await.map_err(transport_err)?;
            pubsub.subscribe(&channel).await.map_err(transport_err)?;
            let stream = pubsub.into_on_message().filter_map(|msg| async move {
                let bytes: Vec<u8> = msg.get_payload().ok()?;
                decode_frame(&bytes)
            });
            Ok(Box::pin(stream) as BusStream)
        })
    }

    fn add_room_member<'a>(
        &'a self,
        room_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        let mut conn = self.manager.clone();
        let key = Self::members_key(room_id);
        let user = user_id.to_owned();
        Box::pin(async move {
            let _: () = conn.sadd(&key, user).await.map_err(transport_err)?;
            let _: () = conn
                .expire(&key, MEMBER_SET_TTL_SECS)
                .await
                .map_err(transport_err)?;
            Ok(())
        })
    }

    fn remove_room_member<'a>(
        &'a self,
        room_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        let mut conn = self.manager.clone();
        let key = Self::members_key(room_id);
        let user = user_id.to_owned();
        Box::pin(async move {
            let _: () = conn.srem(key, user).await.map_err(transport_err)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_sender_and_payload() {
        let frame = encode_frame("instance-a", &[0x08, 0x01, 0xff]);
        let msg = decode_frame(&frame).expect("decode");
        assert_eq!(msg.sender, "instance-a");
        assert_eq!(msg.payload, vec![0x08, 0x01, 0xff]);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        assert!(decode_frame(&[]).is_none());
        // Claims a 20-byte sender but carries 3 bytes.
        assert!(decode_frame(&[20, b'a', b'b']).is_none());
    }

    #[test]
    fn empty_payload_round_trips() {
        let frame = encode_frame("i", &[]);
        let msg = decode_frame(&frame).expect("decode");
        assert_eq!(msg.sender, "i");
        assert!(msg.payload.is_empty());
    }
}
