//! Per-connection client session.
//!
//! A [`Client`] is created at admission and lives until both of its pumps
//! exit and the room has dropped it from its index. The room holds the
//! authoritative `Arc<Client>`; the client keeps only a weak handle back so
//! neither side outlives explicit removal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use prost::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use palaver_proto::{ParticipantInfo, WebSocketMessage};

use crate::room::Room;

/// A client's capability tier, partially ordered:
/// Waiting ⊂ Participant ⊂ Host. Screenshare carries Participant
/// capabilities plus screen-share permission; only Host carries admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Transient value during reconnection lookup. Must never persist on a
    /// live client past admission.
    Unknown,
    /// In the waiting room; receives only directed responses.
    Waiting,
    Participant,
    /// Participant plus screen-share permission.
    Screenshare,
    /// Room admin. Exactly one owner id exists, but ownership transfer can
    /// leave more than one client with the Host role.
    Host,
}

impl Role {
    /// Host, Participant and Screenshare take part in the conference and
    /// count toward the room's participant cap.
    pub fn is_participant(self) -> bool {
        matches!(self, Role::Participant | Role::Screenshare | Role::Host)
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Host)
    }

    pub fn is_waiting(self) -> bool {
        matches!(self, Role::Waiting)
    }
}

/// One connected user.
///
/// Flag setters take short per-client locks so room-state snapshots can read
/// them while the room lock is held, without a second trip through the room.
pub struct Client {
    id: String,
    display_name: String,
    role: RwLock<Role>,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    screen_sharing: AtomicBool,
    hand_raised: AtomicBool,
    rate_limited: AtomicBool,
    disconnect_requested: AtomicBool,
    /// Cancelled exactly once by [`Client::disconnect`]; the read pump
    /// selects on it so a disconnect does not wait for the next frame.
    cancel: CancellationToken,
    /// Close latch: taking the sender closes the outbound queue, which ends
    /// the write pump. Taken at most once.
    outbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    room: OnceLock<Weak<Room>>,
}

impl Client {
    /// Create a client and the receiving half of its outbound queue. The
    /// caller hands the receiver to the write pump.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let client = Arc::new(Self {
            id: id.into(),
            display_name: display_name.into(),
            role: RwLock::new(Role::Unknown),
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(true),
            screen_sharing: AtomicBool::new(false),
            hand_raised: AtomicBool::new(false),
            rate_limited: AtomicBool::new(true),
            disconnect_requested: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            outbound: Mutex::new(Some(tx)),
            room: OnceLock::new(),
        });
        (client, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn role(&self) -> Role {
        *self.role.read().expect("role lock poisoned")
    }

    pub fn set_role(&self, role: Role) {
        *self.role.write().expect("role lock poisoned") = role;
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::Relaxed)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::Relaxed)
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.video_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen_sharing.load(Ordering::Relaxed)
    }

    pub fn set_screen_sharing(&self, sharing: bool) {
        self.screen_sharing.store(sharing, Ordering::Relaxed);
    }

    pub fn is_hand_raised(&self) -> bool {
        self.hand_raised.load(Ordering::Relaxed)
    }

    pub fn set_hand_raised(&self, raised: bool) {
        self.hand_raised.store(raised, Ordering::Relaxed);
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn set_rate_limited(&self, limited: bool) {
        self.rate_limited.store(limited, Ordering::Relaxed);
    }

    /// Attach the weak back-reference to the owning room. Set once, at
    /// admission.
    pub(crate) fn attach_room(&self, room: &Arc<Room>) {
        let _ = self.room.set(Arc::downgrade(room));
    }

    /// The owning room, if the client was admitted and the room still
    /// exists.
    pub fn room(&self) -> Option<Arc<Room>> {
        self.room.get().and_then(Weak::upgrade)
    }

    /// Snapshot of this client for room-state events.
    pub fn participant_info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            is_host: self.role().is_admin(),
            is_audio_enabled: self.is_audio_enabled(),
            is_video_enabled: self.is_video_enabled(),
            is_screen_sharing: self.is_screen_sharing(),
            is_hand_raised: self.is_hand_raised(),
        }
    }

    /// Encode once and enqueue. Never blocks: a full queue drops the frame
    /// with a warning so one slow consumer cannot stall the room.
    pub fn send_proto(&self, msg: &WebSocketMessage) {
        self.send_raw(msg.encode_to_vec());
    }

    /// Enqueue pre-encoded bytes; used by broadcast fan-out so an envelope
    /// is marshalled once per room, not once per recipient.
    pub fn send_raw(&self, frame: Vec<u8>) {
        let guard = self.outbound.lock().expect("outbound lock poisoned");
        let Some(tx) = guard.as_ref() else {
            tracing::debug!(user = %self.id, "send after close, dropping frame");
            return;
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(user = %self.id, "outbound queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(user = %self.id, "outbound queue closed, dropping frame");
            }
        }
    }

    /// Request disconnect: the read pump exits on its next iteration and the
    /// outbound queue closes, ending the write pump. Idempotent; the close
    /// latch fires at most once.
    pub fn disconnect(&self) {
        self.disconnect_requested.store(true, Ordering::SeqCst);
        drop(self.outbound.lock().expect("outbound lock poisoned").take());
        self.cancel.cancel();
    }

    pub fn is_disconnect_requested(&self) -> bool {
        self.disconnect_requested.load(Ordering::SeqCst)
    }

    /// Completes when [`Client::disconnect`] has been called.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("role", &self.role())
            .finish_non_exhaustive()
    }
}
