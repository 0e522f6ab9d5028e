//! The per-conference state machine and fan-out engine.
//!
//! A [`Room`] owns the single source of truth for membership: one clients
//! map keyed by stable user id, three draw orders holding ids that always
//! resolve into that map, a bounded chat ring, and the owner identity.
//! Every mutation happens under the room's write lock; broadcasts that must
//! observe a consistent snapshot (room state) run under the same lock, and
//! fan-out never blocks because client enqueues are non-blocking.
//!
//! Slow external work — SFU calls, bus publishes, deferred room-state
//! broadcasts — runs in tasks tracked by the room's task latch, never under
//! the lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use prost::Message;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use palaver_proto::web_socket_message::Payload;
use palaver_proto::{
    admin_action, admin_event, media_kind, AdminActionRequest, AdminEvent, ChatEvent, ChatRequest,
    DeleteChatEvent, DeleteChatRequest, HandUpdateEvent, JoinResponse, MediaStateEvent,
    RecentChatsEvent, RoomStateEvent, ScreenShareEvent, ScreenSharePermissionEvent,
    ScreenShareRequest, Signal, ToggleHandRequest, ToggleMediaRequest, WebSocketMessage,
};

use crate::bus::EventBus;
use crate::client::{Client, Role};
use crate::config::{RoomConfig, MAX_CHAT_CONTENT_CHARS, RECENT_CHATS_LIMIT};
use crate::error::CoreError;
use crate::sfu::{self, SfuClient};

/// Callback the hub installs to learn that a room may be ready for cleanup
/// (empty, or left without a host).
pub type OnEmpty = Arc<dyn Fn(String) + Send + Sync>;

/// Counts for the hub's stats endpoint. Never includes per-user data.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoomStats {
    pub participants: usize,
    pub waiting: usize,
    pub chat_messages: usize,
}

/// Mutable room state. Only touched through the room lock; the inner
/// helpers below assume the lock is held and stay free of locking logic.
struct RoomState {
    clients: HashMap<String, Arc<Client>>,
    /// Empty until the first admission; afterwards changed only by an
    /// explicit ownership transfer.
    owner_id: String,
    /// Conference tile order. Insertion at tail, removal by identity.
    participant_order: Vec<String>,
    /// Waiting-room stack, newest first.
    waiting_order: Vec<String>,
    /// Raised hands in raise order.
    hand_raised_order: Vec<String>,
    chat_history: VecDeque<ChatEvent>,
    /// Running total of stored chat content bytes.
    chat_bytes: usize,
    /// Live participants: Host + Participant + Screenshare.
    participant_count: usize,
}

pub struct Room {
    id: String,
    config: RoomConfig,
    /// Opaque sender marker for bus publishes; lets the bridge drop our own
    /// echoes.
    instance_tag: String,
    state: RwLock<RoomState>,
    /// Room lifecycle context. Cancelled once, at shutdown.
    cancel: CancellationToken,
    /// Outstanding-task latch: SFU pumps, bus bridge, deferred broadcasts.
    tasks: TaskTracker,
    bus: Option<Arc<dyn EventBus>>,
    sfu: Option<Arc<dyn SfuClient>>,
    on_empty: OnEmpty,
}

impl Room {
    pub fn new(
        id: impl Into<String>,
        config: RoomConfig,
        bus: Option<Arc<dyn EventBus>>,
        sfu: Option<Arc<dyn SfuClient>>,
        instance_tag: impl Into<String>,
        on_empty: OnEmpty,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            config,
            instance_tag: instance_tag.into(),
            state: RwLock::new(RoomState {
                clients: HashMap::new(),
                owner_id: String::new(),
                participant_order: Vec::new(),
                waiting_order: Vec::new(),
                hand_raised_order: Vec::new(),
                chat_history: VecDeque::new(),
                chat_bytes: 0,
                participant_count: 0,
            }),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            bus,
            sfu,
            on_empty,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Lifecycle context for connection pumps derived from this room.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.clients.is_empty()
    }

    pub async fn owner_id(&self) -> String {
        self.state.read().await.owner_id.clone()
    }

    pub async fn client(&self, user_id: &str) -> Option<Arc<Client>> {
        self.state.read().await.clients.get(user_id).cloned()
    }

    /// Current room-state snapshot, for join responses.
    pub async fn room_state_snapshot(&self) -> RoomStateEvent {
        let st = self.state.read().await;
        room_state_event(&st)
    }

    pub async fn stats(&self) -> RoomStats {
        let st = self.state.read().await;
        RoomStats {
            participants: st.participant_count,
            waiting: st.waiting_order.len(),
            chat_messages: st.chat_history.len(),
        }
    }

    // ─── Admission & removal ─────────────────────────────────────────────

    /// Admit a freshly connected client.
    ///
    /// A second connection for the same user id replaces the first: the old
    /// client's SFU session is torn down (log-only), its pumps are ended and
    /// it leaves the map before the new one is inserted, preserving its
    /// role. The first user to ever join becomes the owner. Host and
    /// Participant admissions are capacity-guarded before any state changes.
    pub async fn admit(self: &Arc<Self>, client: Arc<Client>) -> Result<(), CoreError> {
        let user_id = client.id().to_owned();
        let mut st = self.state.write().await;

        let mut preserved = Role::Unknown;
        if let Some(old) = st.clients.get(&user_id).cloned() {
            preserved = old.role();
            tracing::info!(room = %self.id, user = %user_id, role = ?preserved,
                "duplicate connection, replacing previous client");
            self.remove_locked(&mut st, &old);
        }

        if st.owner_id.is_empty() {
            st.owner_id = user_id.clone();
        }

        let target = if user_id == st.owner_id {
            Role::Host
        } else {
            match preserved {
                Role::Host => Role::Host,
                Role::Participant | Role::Screenshare => Role::Participant,
                Role::Waiting | Role::Unknown => Role::Waiting,
            }
        };

        if target.is_participant() && st.participant_count >= self.config.max_participants {
            drop(st);
            tracing::warn!(room = %self.id, user = %user_id, "admission rejected, room full");
            client.send_proto(&WebSocketMessage::new(Payload::JoinResponse(JoinResponse {
                success: false,
                user_id: user_id.clone(),
                is_host: false,
                initial_state: None,
            })));
            client.disconnect();
            return Err(CoreError::RoomFull(self.id.clone()));
        }

        client.attach_room(self);
        self.insert_locked(&mut st, client, target);

        tracing::info!(room = %self.id, user = %user_id, role = ?target, "client admitted");
        let msg = WebSocketMessage::new(Payload::RoomState(room_state_event(&st)));
        self.broadcast_frame_locked(&st, &msg, true);
        Ok(())
    }

    /// Full local disconnect: SFU teardown (log-only), removal from every
    /// draw order and the clients map, room-state broadcast, and the
    /// on-empty callback when the room has emptied or lost its host.
    pub async fn remove_client(&self, user_id: &str) {
        let mut st = self.state.write().await;
        let Some(client) = st.clients.get(user_id).cloned() else {
            return;
        };
        self.remove_locked(&mut st, &client);
        tracing::info!(room = %self.id, user = %user_id, "client removed");

        let msg = WebSocketMessage::new(Payload::RoomState(room_state_event(&st)));
        self.broadcast_frame_locked(&st, &msg, true);

        let empty = st.clients.is_empty();
        let hostless = !st.clients.values().any(|c| c.role().is_admin());
        if empty || hostless {
            let on_empty = self.on_empty.clone();
            let room_id = self.id.clone();
            self.tasks.spawn(async move { on_empty(room_id) });
        }
    }

    /// Insert with the given role: set the role, join the matching draw
    /// order, index by user id and mirror into the bus member set.
    /// Assumes the id is absent from the map (admission removes any
    /// predecessor first).
    fn insert_locked(&self, st: &mut RoomState, client: Arc<Client>, role: Role) {
        debug_assert!(!st.clients.contains_key(client.id()));
        client.set_role(role);
        let id = client.id().to_owned();
        match role {
            Role::Waiting => st.waiting_order.insert(0, id.clone()),
            _ => {
                st.participant_order.push(id.clone());
                st.participant_count += 1;
            }
        }
        st.clients.insert(id.clone(), client);
        self.mirror_member(&id, true);
    }

    /// Undo everything `insert_locked` did, tear down the SFU session and
    /// fire the client's close latch. No broadcast; callers decide that.
    fn remove_locked(&self, st: &mut RoomState, client: &Arc<Client>) {
        let id = client.id().to_owned();
        self.spawn_sfu_delete(&id);
        st.clients.remove(&id);
        st.participant_order.retain(|entry| *entry != id);
        st.waiting_order.retain(|entry| *entry != id);
        st.hand_raised_order.retain(|entry| *entry != id);
        if client.role().is_participant() {
            st.participant_count = st.participant_count.saturating_sub(1);
        }
        self.mirror_member(&id, false);
        client.disconnect();
    }

    /// Best-effort membership mirror into the bus's room-scoped set.
    fn mirror_member(&self, user_id: &str, present: bool) {
        let Some(bus) = self.bus.clone() else { return };
        let room_id = self.id.clone();
        let user_id = user_id.to_owned();
        self.tasks.spawn(async move {
            let result = if present {
                bus.add_room_member(&room_id, &user_id).await
            } else {
                bus.remove_room_member(&room_id, &user_id).await
            };
            if let Err(error) = result {
                tracing::warn!(room = %room_id, user = %user_id, %error, "bus member mirror failed");
            }
        });
    }

    fn spawn_sfu_delete(&self, user_id: &str) {
        let Some(sfu) = self.sfu.clone() else { return };
        let room_id = self.id.clone();
        let user_id = user_id.to_owned();
        self.tasks.spawn(async move {
            if let Err(error) = sfu.delete_session(&user_id, &room_id).await {
                tracing::warn!(room = %room_id, user = %user_id, %error, "sfu session delete failed");
            }
        });
    }

    // ─── Broadcast ───────────────────────────────────────────────────────

    /// Fan an envelope out to every live (non-waiting) client and, unless
    /// the envelope arrived from the bus, publish it for peer instances.
    /// The lock guard is implied by `&RoomState`.
    fn broadcast_frame_locked(&self, st: &RoomState, msg: &WebSocketMessage, publish: bool) {
        let frame = msg.encode_to_vec();
        for client in st.clients.values() {
            if client.role().is_participant() {
                client.send_raw(frame.clone());
            }
        }
        if publish {
            self.publish_to_bus(frame);
        }
    }

    /// Encode once and fan out under the read lock. For events that do not
    /// need the mutation they describe to be visible atomically.
    pub async fn broadcast(&self, msg: &WebSocketMessage) {
        let st = self.state.read().await;
        self.broadcast_frame_locked(&st, msg, true);
    }

    /// Broadcast the current room state under the write lock, so the
    /// snapshot is consistent with whatever mutation preceded it.
    pub async fn broadcast_room_state(&self) {
        let st = self.state.write().await;
        let msg = WebSocketMessage::new(Payload::RoomState(room_state_event(&st)));
        self.broadcast_frame_locked(&st, &msg, true);
    }

    /// Fire-and-forget publish; failures never reach the local path.
    fn publish_to_bus(&self, frame: Vec<u8>) {
        let Some(bus) = self.bus.clone() else { return };
        let topic = self.id.clone();
        let sender = self.instance_tag.clone();
        self.tasks.spawn(async move {
            if let Err(error) = bus.publish(&topic, &sender, frame).await {
                tracing::warn!(room = %topic, %error, "bus publish failed");
            }
        });
    }

    // ─── Bus bridge ──────────────────────────────────────────────────────

    /// Subscribe this room to its bus topic for the room's lifetime. The
    /// bridge replays peer-instance envelopes into the local fan-out path
    /// without re-publishing them, which is what keeps the bus loop-free.
    pub fn spawn_bus_bridge(self: &Arc<Self>) {
        let Some(bus) = self.bus.clone() else { return };
        let room = Arc::downgrade(self);
        let topic = self.id.clone();
        let tag = self.instance_tag.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            let mut sub = match bus.subscribe(&topic).await {
                Ok(sub) => sub,
                Err(error) => {
                    tracing::warn!(room = %topic, %error, "bus subscribe failed");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = sub.next() => {
                        let Some(msg) = msg else { break };
                        if msg.sender == tag || msg.payload.is_empty() {
                            continue;
                        }
                        let Some(room) = room.upgrade() else { break };
                        room.apply_bus_frame(&msg.payload).await;
                    }
                }
            }
            tracing::debug!(room = %topic, "bus bridge ended");
        });
    }

    /// Replay one bus-delivered frame into the local broadcast path.
    /// Publishing is suppressed: a replay must never go back onto the bus.
    pub async fn apply_bus_frame(&self, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        let msg = match WebSocketMessage::decode_from_bytes(payload) {
            Ok(msg) => msg,
            Err(error) => {
                tracing::warn!(room = %self.id, %error, "dropping undecodable bus frame");
                return;
            }
        };
        if msg.payload.is_none() {
            return;
        }
        let st = self.state.write().await;
        self.broadcast_frame_locked(&st, &msg, false);
    }

    // ─── Chat ────────────────────────────────────────────────────────────

    /// Admit a chat message: escape, stamp, store (public chat only) and
    /// fan out. Private chat goes point-to-point to the sender and the
    /// named target and is never stored or published.
    pub async fn handle_chat(
        &self,
        sender: &Arc<Client>,
        req: ChatRequest,
    ) -> Result<(), CoreError> {
        if !sender.role().is_participant() {
            return Err(CoreError::Unauthorized("chat requires participant role"));
        }
        if req.content.is_empty() {
            return Err(CoreError::Validation("empty chat content"));
        }
        if req.content.chars().count() > MAX_CHAT_CONTENT_CHARS {
            return Err(CoreError::Validation("chat content too long"));
        }
        if sender.id().is_empty() || sender.display_name().is_empty() {
            return Err(CoreError::Validation("sender has no identity"));
        }

        let event = ChatEvent {
            id: Uuid::new_v4().to_string(),
            sender_id: sender.id().to_owned(),
            sender_name: sender.display_name().to_owned(),
            content: html_escape(&req.content),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            is_private: !req.target_user_id.is_empty(),
        };

        let mut st = self.state.write().await;
        if event.is_private {
            let msg = WebSocketMessage::new(Payload::ChatEvent(event));
            sender.send_proto(&msg);
            if let Some(target) = st.clients.get(&req.target_user_id) {
                if target.id() != sender.id() && target.role().is_participant() {
                    target.send_proto(&msg);
                }
            }
            return Ok(());
        }

        push_chat_locked(&mut st, event.clone(), &self.config);
        let msg = WebSocketMessage::new(Payload::ChatEvent(event));
        self.broadcast_frame_locked(&st, &msg, true);
        Ok(())
    }

    /// Remove the first stored chat with the given id and announce the
    /// deletion.
    pub async fn handle_delete_chat(
        &self,
        sender: &Arc<Client>,
        req: DeleteChatRequest,
    ) -> Result<(), CoreError> {
        if !sender.role().is_participant() {
            return Err(CoreError::Unauthorized("chat delete requires participant role"));
        }
        if req.chat_id.is_empty() {
            return Err(CoreError::Validation("empty chat id"));
        }

        let mut st = self.state.write().await;
        if let Some(pos) = st.chat_history.iter().position(|e| e.id == req.chat_id) {
            if let Some(removed) = st.chat_history.remove(pos) {
                st.chat_bytes = st.chat_bytes.saturating_sub(removed.content.len());
            }
        }
        let msg = WebSocketMessage::new(Payload::DeleteChatEvent(DeleteChatEvent {
            chat_id: req.chat_id,
        }));
        self.broadcast_frame_locked(&st, &msg, true);
        Ok(())
    }

    /// Reply with the newest stored chats, oldest first.
    pub async fn handle_recent_chats(&self, sender: &Arc<Client>) -> Result<(), CoreError> {
        if !sender.role().is_participant() {
            return Err(CoreError::Unauthorized("recent chats requires participant role"));
        }
        let st = self.state.read().await;
        let skip = st.chat_history.len().saturating_sub(RECENT_CHATS_LIMIT);
        let chats = st.chat_history.iter().skip(skip).cloned().collect();
        sender.send_proto(&WebSocketMessage::new(Payload::RecentChats(
            RecentChatsEvent { chats },
        )));
        Ok(())
    }

    // ─── Media / hand / screen share ─────────────────────────────────────

    pub async fn handle_toggle_media(
        &self,
        sender: &Arc<Client>,
        req: ToggleMediaRequest,
    ) -> Result<(), CoreError> {
        match req.kind.as_str() {
            media_kind::AUDIO => sender.set_audio_enabled(req.is_enabled),
            media_kind::VIDEO => sender.set_video_enabled(req.is_enabled),
            _ => return Err(CoreError::Validation("unknown media kind")),
        }
        let st = self.state.read().await;
        let msg = WebSocketMessage::new(Payload::MediaState(MediaStateEvent {
            user_id: sender.id().to_owned(),
            is_audio_enabled: sender.is_audio_enabled(),
            is_video_enabled: sender.is_video_enabled(),
        }));
        self.broadcast_frame_locked(&st, &msg, true);
        Ok(())
    }

    pub async fn handle_toggle_hand(
        &self,
        sender: &Arc<Client>,
        req: ToggleHandRequest,
    ) -> Result<(), CoreError> {
        sender.set_hand_raised(req.is_raised);
        let mut st = self.state.write().await;
        let id = sender.id().to_owned();
        if req.is_raised {
            if !st.hand_raised_order.contains(&id) {
                st.hand_raised_order.push(id.clone());
            }
        } else {
            st.hand_raised_order.retain(|entry| *entry != id);
        }
        let msg = WebSocketMessage::new(Payload::HandUpdate(HandUpdateEvent {
            user_id: id,
            is_raised: req.is_raised,
        }));
        self.broadcast_frame_locked(&st, &msg, true);
        Ok(())
    }

    pub async fn handle_screen_share(
        &self,
        sender: &Arc<Client>,
        req: ScreenShareRequest,
    ) -> Result<(), CoreError> {
        if !sender.role().is_participant() {
            return Err(CoreError::Unauthorized("screen share requires participant role"));
        }
        sender.set_screen_sharing(req.is_sharing);
        let mut st = self.state.write().await;
        if req.is_sharing {
            // The sharer's tile moves to the tail of the draw order.
            let id = sender.id().to_owned();
            st.participant_order.retain(|entry| *entry != id);
            st.participant_order.push(id);
        }
        let msg = WebSocketMessage::new(Payload::ScreenShareChanged(ScreenShareEvent {
            user_id: sender.id().to_owned(),
            is_sharing: req.is_sharing,
        }));
        self.broadcast_frame_locked(&st, &msg, true);
        Ok(())
    }

    /// Relay a screen-share permission request to the owner.
    pub async fn handle_permission_request(&self, sender: &Arc<Client>) -> Result<(), CoreError> {
        if !sender.role().is_participant() {
            return Err(CoreError::Unauthorized(
                "screen share permission requires participant role",
            ));
        }
        let st = self.state.read().await;
        let host = st
            .clients
            .get(&st.owner_id)
            .filter(|c| c.role().is_admin())
            .or_else(|| st.clients.values().find(|c| c.role().is_admin()));
        let Some(host) = host else {
            tracing::warn!(room = %self.id, user = %sender.id(), "permission request with no host present");
            return Ok(());
        };
        host.send_proto(&WebSocketMessage::new(Payload::ScreenSharePermission(
            ScreenSharePermissionEvent {
                user_id: sender.id().to_owned(),
                display_name: sender.display_name().to_owned(),
                is_granted: false,
            },
        )));
        Ok(())
    }

    /// A host's grant/deny reply, relayed to the requester. A grant
    /// promotes a plain Participant to Screenshare.
    pub async fn handle_permission_reply(
        &self,
        sender: &Arc<Client>,
        evt: ScreenSharePermissionEvent,
    ) -> Result<(), CoreError> {
        if !sender.role().is_admin() {
            return Err(CoreError::Unauthorized("permission reply requires host role"));
        }
        let st = self.state.read().await;
        let Some(target) = st.clients.get(&evt.user_id) else {
            return Err(CoreError::UnknownTarget(evt.user_id));
        };
        if evt.is_granted && target.role() == Role::Participant {
            target.set_role(Role::Screenshare);
        }
        target.send_proto(&WebSocketMessage::new(Payload::ScreenSharePermission(
            ScreenSharePermissionEvent {
                user_id: target.id().to_owned(),
                display_name: target.display_name().to_owned(),
                is_granted: evt.is_granted,
            },
        )));
        Ok(())
    }

    // ─── Admin actions ───────────────────────────────────────────────────

    /// Execute a host's admin action. A missing target is a no-op, not an
    /// error; a host kicking another host is refused.
    pub async fn handle_admin(
        self: &Arc<Self>,
        sender: &Arc<Client>,
        req: AdminActionRequest,
    ) -> Result<(), CoreError> {
        if !sender.role().is_admin() {
            return Err(CoreError::Unauthorized("admin action requires host role"));
        }

        let mut st = self.state.write().await;
        let target = st.clients.get(&req.target_user_id).cloned();

        match req.action.as_str() {
            admin_action::KICK => {
                let Some(target) = target else { return Ok(()) };
                if target.role().is_admin() {
                    tracing::warn!(room = %self.id, host = %sender.id(), target = %target.id(),
                        "refusing host-on-host kick");
                    return Ok(());
                }
                tracing::info!(room = %self.id, host = %sender.id(), target = %target.id(), "kicking user");
                target.send_proto(&WebSocketMessage::new(Payload::AdminEvent(AdminEvent {
                    action: admin_event::KICKED.to_owned(),
                    reason: String::new(),
                })));
                // Removal from the map happens when the target's read pump
                // observes the disconnect and runs the disconnect path.
                target.disconnect();
            }
            admin_action::APPROVE => {
                let Some(target) = target else { return Ok(()) };
                if target.role() != Role::Waiting {
                    return Err(CoreError::Validation("approve target is not waiting"));
                }
                if st.participant_count >= self.config.max_participants {
                    return Err(CoreError::RoomFull(self.id.clone()));
                }
                let id = target.id().to_owned();
                st.waiting_order.retain(|entry| *entry != id);
                target.set_role(Role::Participant);
                st.participant_order.push(id);
                st.participant_count += 1;

                tracing::info!(room = %self.id, user = %target.id(), "waiting user approved");
                target.send_proto(&WebSocketMessage::new(Payload::JoinResponse(JoinResponse {
                    success: true,
                    user_id: target.id().to_owned(),
                    is_host: false,
                    initial_state: Some(room_state_event(&st)),
                })));

                let room = Arc::clone(self);
                let media_target = target.clone();
                self.tasks.spawn(async move {
                    room.start_media_session(media_target, false).await;
                });
                let room = Arc::clone(self);
                self.tasks.spawn(async move { room.broadcast_room_state().await });
            }
            admin_action::MUTE | admin_action::UNMUTE => {
                let Some(target) = target else { return Ok(()) };
                target.set_audio_enabled(req.action == admin_action::UNMUTE);
                let room = Arc::clone(self);
                self.tasks.spawn(async move { room.broadcast_room_state().await });
            }
            admin_action::TRANSFER_OWNERSHIP => {
                let Some(target) = target else { return Ok(()) };
                if !target.role().is_participant() {
                    return Err(CoreError::Validation("ownership target must be a participant"));
                }
                st.owner_id = target.id().to_owned();
                if !target.role().is_admin() {
                    target.set_role(Role::Host);
                }
                tracing::info!(room = %self.id, from = %sender.id(), to = %target.id(),
                    "ownership transferred");
                // `reason` carries the new owner id; clients rely on it.
                let msg = WebSocketMessage::new(Payload::AdminEvent(AdminEvent {
                    action: admin_event::OWNERSHIP_TRANSFERRED.to_owned(),
                    reason: target.id().to_owned(),
                }));
                self.broadcast_frame_locked(&st, &msg, true);
                let state_msg = WebSocketMessage::new(Payload::RoomState(room_state_event(&st)));
                self.broadcast_frame_locked(&st, &state_msg, true);
            }
            _ => return Err(CoreError::Validation("unknown admin action")),
        }
        Ok(())
    }

    // ─── SFU ─────────────────────────────────────────────────────────────

    /// Forward a client signal to the SFU.
    pub async fn handle_signal(&self, sender: &Arc<Client>, signal: Signal) -> Result<(), CoreError> {
        if !sender.role().is_participant() {
            return Err(CoreError::Unauthorized("signaling requires participant role"));
        }
        let Some(sfu) = self.sfu.clone() else {
            return Ok(());
        };
        sfu.handle_signal(sender.id(), &self.id, signal).await?;
        Ok(())
    }

    /// Create a media session for a live client: CreateSession, optional
    /// JoinResponse with a state snapshot, the initial offer as a signal
    /// event, then an event pump that turns each SFU event into exactly one
    /// envelope. Pump failures never affect the room.
    pub async fn start_media_session(
        self: &Arc<Self>,
        client: Arc<Client>,
        send_join_response: bool,
    ) {
        let user_id = client.id().to_owned();

        let offer = match &self.sfu {
            Some(sfu) => match sfu.create_session(&user_id, &self.id).await {
                Ok(offer) => Some(offer),
                Err(error) => {
                    tracing::warn!(room = %self.id, user = %user_id, %error, "sfu session create failed");
                    return;
                }
            },
            None => None,
        };

        if send_join_response {
            let st = self.state.read().await;
            client.send_proto(&WebSocketMessage::new(Payload::JoinResponse(JoinResponse {
                success: true,
                user_id: user_id.clone(),
                is_host: client.role().is_admin(),
                initial_state: Some(room_state_event(&st)),
            })));
        }

        if let Some(offer) = offer {
            client.send_proto(&WebSocketMessage::new(Payload::SignalEvent(Signal {
                sdp: Some(palaver_proto::signal::Sdp::SdpOffer(offer)),
            })));
        }

        let Some(sfu) = self.sfu.clone() else { return };
        let stream = match sfu.listen_events(&user_id, &self.id).await {
            Ok(stream) => stream,
            Err(error) => {
                // Non-fatal: the session exists, we just miss server events.
                tracing::warn!(room = %self.id, user = %user_id, %error, "sfu event listen failed");
                return;
            }
        };

        let cancel = self.cancel.clone();
        let room_id = self.id.clone();
        self.tasks.spawn(async move {
            let mut stream = stream;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = client.cancelled() => break,
                    event = stream.next() => match event {
                        Some(Ok(event)) => client.send_proto(&sfu::event_to_envelope(event)),
                        Some(Err(error)) => {
                            tracing::warn!(room = %room_id, user = %client.id(), %error,
                                "sfu event stream error");
                            break;
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!(room = %room_id, user = %client.id(), "sfu event pump ended");
        });
    }

    // ─── Shutdown ────────────────────────────────────────────────────────

    /// Cancel the room context, close every remaining client with a
    /// room-closed event, and wait (bounded) for outstanding tasks.
    pub async fn close(&self, timeout: Duration) {
        self.cancel.cancel();

        let clients: Vec<Arc<Client>> = {
            let mut st = self.state.write().await;
            st.participant_order.clear();
            st.waiting_order.clear();
            st.hand_raised_order.clear();
            st.participant_count = 0;
            let clients: Vec<_> = st.clients.drain().map(|(_, c)| c).collect();
            for client in &clients {
                self.mirror_member(client.id(), false);
            }
            clients
        };

        let closed = WebSocketMessage::new(Payload::AdminEvent(AdminEvent {
            action: admin_event::ROOM_CLOSED.to_owned(),
            reason: String::new(),
        }));
        for client in &clients {
            client.send_proto(&closed);
            client.disconnect();
        }

        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            tracing::warn!(room = %self.id, "room shutdown timed out with outstanding tasks");
        }
        tracing::info!(room = %self.id, "room closed");
    }
}

/// Snapshot for room-state events: participants in draw order, waiting
/// users newest first. Ids that fail to resolve are impossible while the
/// lock is held and are skipped defensively in release builds.
fn room_state_event(st: &RoomState) -> RoomStateEvent {
    RoomStateEvent {
        participants: st
            .participant_order
            .iter()
            .filter_map(|id| st.clients.get(id))
            .map(|c| c.participant_info())
            .collect(),
        waiting_users: st
            .waiting_order
            .iter()
            .filter_map(|id| st.clients.get(id))
            .map(|c| c.participant_info())
            .collect(),
    }
}

/// Append a chat event and prune oldest-first until both the count and the
/// byte budget hold again.
fn push_chat_locked(st: &mut RoomState, event: ChatEvent, config: &RoomConfig) {
    st.chat_bytes += event.content.len();
    st.chat_history.push_back(event);
    while st.chat_history.len() > config.max_chat_history_len
        || st.chat_bytes > config.max_chat_history_bytes
    {
        let Some(evicted) = st.chat_history.pop_front() else {
            break;
        };
        st.chat_bytes = st.chat_bytes.saturating_sub(evicted.content.len());
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
