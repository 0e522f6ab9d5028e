//! # palaver-proto
//!
//! The Palaver wire protocol: one protobuf envelope (`WebSocketMessage`)
//! carried as a single binary WebSocket frame, in either direction.
//!
//! The message structs here are hand-maintained `prost` definitions kept in
//! sync with `proto/palaver.proto` (which exists for clients in other
//! languages). Hand-maintaining the Rust side keeps `protoc` out of the
//! build and lets us attach helpers directly to the types.

use prost::Message;

pub use prost::DecodeError;

/// The envelope. Exactly one payload variant per frame; a frame that decodes
/// to `payload: None` carries an unknown or absent variant and is dropped by
/// the receiver.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WebSocketMessage {
    #[prost(
        oneof = "web_socket_message::Payload",
        tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22"
    )]
    pub payload: Option<web_socket_message::Payload>,
}

pub mod web_socket_message {
    /// All request and event variants. Tags 1–10 are client requests,
    /// 11–22 are server events; `ScreenSharePermission` is additionally
    /// accepted from a host as the grant/deny reply.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Join(super::JoinRequest),
        #[prost(message, tag = "2")]
        Signal(super::Signal),
        #[prost(message, tag = "3")]
        Chat(super::ChatRequest),
        #[prost(message, tag = "4")]
        ToggleMedia(super::ToggleMediaRequest),
        #[prost(message, tag = "5")]
        ToggleHand(super::ToggleHandRequest),
        #[prost(message, tag = "6")]
        ScreenShare(super::ScreenShareRequest),
        #[prost(message, tag = "7")]
        GetRecentChats(super::GetRecentChatsRequest),
        #[prost(message, tag = "8")]
        DeleteChat(super::DeleteChatRequest),
        #[prost(message, tag = "9")]
        RequestScreenSharePermission(super::ScreenSharePermissionRequest),
        #[prost(message, tag = "10")]
        AdminAction(super::AdminActionRequest),

        #[prost(message, tag = "11")]
        JoinResponse(super::JoinResponse),
        #[prost(message, tag = "12")]
        RoomState(super::RoomStateEvent),
        #[prost(message, tag = "13")]
        ChatEvent(super::ChatEvent),
        #[prost(message, tag = "14")]
        RecentChats(super::RecentChatsEvent),
        #[prost(message, tag = "15")]
        DeleteChatEvent(super::DeleteChatEvent),
        #[prost(message, tag = "16")]
        MediaState(super::MediaStateEvent),
        #[prost(message, tag = "17")]
        HandUpdate(super::HandUpdateEvent),
        #[prost(message, tag = "18")]
        ScreenShareChanged(super::ScreenShareEvent),
        #[prost(message, tag = "19")]
        ScreenSharePermission(super::ScreenSharePermissionEvent),
        #[prost(message, tag = "20")]
        AdminEvent(super::AdminEvent),
        #[prost(message, tag = "21")]
        SignalEvent(super::Signal),
        #[prost(message, tag = "22")]
        TrackAdded(super::TrackAddedEvent),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JoinRequest {
    #[prost(string, tag = "1")]
    pub display_name: String,
    #[prost(string, tag = "2")]
    pub room_id: String,
    #[prost(string, tag = "3")]
    pub token: String,
}

/// SDP / ICE payload, shared between the client request and the server event.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Signal {
    #[prost(oneof = "signal::Sdp", tags = "1, 2, 3")]
    pub sdp: Option<signal::Sdp>,
}

pub mod signal {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Sdp {
        #[prost(string, tag = "1")]
        SdpOffer(String),
        #[prost(string, tag = "2")]
        SdpAnswer(String),
        #[prost(string, tag = "3")]
        IceCandidate(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatRequest {
    #[prost(string, tag = "1")]
    pub content: String,
    /// Non-empty target makes the chat private.
    #[prost(string, tag = "2")]
    pub target_user_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToggleMediaRequest {
    /// "audio" or "video"
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(bool, tag = "2")]
    pub is_enabled: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToggleHandRequest {
    #[prost(bool, tag = "1")]
    pub is_raised: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScreenShareRequest {
    #[prost(bool, tag = "1")]
    pub is_sharing: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRecentChatsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteChatRequest {
    #[prost(string, tag = "1")]
    pub chat_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScreenSharePermissionRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdminActionRequest {
    /// "kick" | "approve" | "mute" | "unmute" | "transfer_ownership"
    #[prost(string, tag = "1")]
    pub action: String,
    #[prost(string, tag = "2")]
    pub target_user_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JoinResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub user_id: String,
    #[prost(bool, tag = "3")]
    pub is_host: bool,
    #[prost(message, optional, tag = "4")]
    pub initial_state: Option<RoomStateEvent>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParticipantInfo {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub display_name: String,
    #[prost(bool, tag = "3")]
    pub is_host: bool,
    #[prost(bool, tag = "4")]
    pub is_audio_enabled: bool,
    #[prost(bool, tag = "5")]
    pub is_video_enabled: bool,
    #[prost(bool, tag = "6")]
    pub is_screen_sharing: bool,
    #[prost(bool, tag = "7")]
    pub is_hand_raised: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RoomStateEvent {
    #[prost(message, repeated, tag = "1")]
    pub participants: Vec<ParticipantInfo>,
    #[prost(message, repeated, tag = "2")]
    pub waiting_users: Vec<ParticipantInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatEvent {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub sender_id: String,
    #[prost(string, tag = "3")]
    pub sender_name: String,
    /// HTML-escaped before it ever reaches the wire.
    #[prost(string, tag = "4")]
    pub content: String,
    #[prost(int64, tag = "5")]
    pub timestamp_ms: i64,
    #[prost(bool, tag = "6")]
    pub is_private: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RecentChatsEvent {
    #[prost(message, repeated, tag = "1")]
    pub chats: Vec<ChatEvent>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteChatEvent {
    #[prost(string, tag = "1")]
    pub chat_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MediaStateEvent {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(bool, tag = "2")]
    pub is_audio_enabled: bool,
    #[prost(bool, tag = "3")]
    pub is_video_enabled: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HandUpdateEvent {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(bool, tag = "2")]
    pub is_raised: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScreenShareEvent {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(bool, tag = "2")]
    pub is_sharing: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScreenSharePermissionEvent {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub display_name: String,
    #[prost(bool, tag = "3")]
    pub is_granted: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdminEvent {
    /// "kicked" | "room_closed" | "ownership_transferred"
    ///
    /// For `ownership_transferred`, `reason` carries the new owner's user id.
    #[prost(string, tag = "1")]
    pub action: String,
    #[prost(string, tag = "2")]
    pub reason: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TrackAddedEvent {
    #[prost(string, tag = "1")]
    pub user_id: String,
    #[prost(string, tag = "2")]
    pub stream_id: String,
    #[prost(string, tag = "3")]
    pub track_kind: String,
}

impl WebSocketMessage {
    /// Wrap a payload variant into an envelope.
    pub fn new(payload: web_socket_message::Payload) -> Self {
        Self {
            payload: Some(payload),
        }
    }

    /// Encode to the binary frame representation.
    pub fn encode_to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode a binary frame into an envelope.
    pub fn decode_from_bytes(buf: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(buf)
    }
}

impl From<web_socket_message::Payload> for WebSocketMessage {
    fn from(payload: web_socket_message::Payload) -> Self {
        Self::new(payload)
    }
}

/// Admin action names carried in [`AdminActionRequest::action`].
pub mod admin_action {
    pub const KICK: &str = "kick";
    pub const APPROVE: &str = "approve";
    pub const MUTE: &str = "mute";
    pub const UNMUTE: &str = "unmute";
    pub const TRANSFER_OWNERSHIP: &str = "transfer_ownership";
}

/// Admin event names carried in [`AdminEvent::action`].
pub mod admin_event {
    pub const KICKED: &str = "kicked";
    pub const ROOM_CLOSED: &str = "room_closed";
    pub const OWNERSHIP_TRANSFERRED: &str = "ownership_transferred";
}

/// Media kinds carried in [`ToggleMediaRequest::kind`].
pub mod media_kind {
    pub const AUDIO: &str = "audio";
    pub const VIDEO: &str = "video";
}
