//! Room engine limits and timeouts.
//!
//! The engine takes plain values; loading them from files or the
//! environment is the server binary's job.

use std::time::Duration;

/// Maximum chat content length in characters, checked before escaping.
pub const MAX_CHAT_CONTENT_CHARS: usize = 1000;

/// How many chat events a recent-chats reply returns at most.
pub const RECENT_CHATS_LIMIT: usize = 50;

/// Per-room limits and timeouts.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Live participants (Host + Participant + Screenshare) per room.
    pub max_participants: usize,
    /// Chat history bound by event count.
    pub max_chat_history_len: usize,
    /// Chat history bound by total content bytes.
    pub max_chat_history_bytes: usize,
    /// How long an empty room lingers before the hub deletes it.
    pub cleanup_grace: Duration,
    /// Outbound queue capacity per client, in frames.
    pub outbound_queue_capacity: usize,
    /// Per-frame write deadline on the outbound pump.
    pub write_deadline: Duration,
    /// How long shutdown waits for outstanding room tasks to drain.
    pub shutdown_timeout: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_participants: 100,
            max_chat_history_len: 100,
            max_chat_history_bytes: 1024 * 1024,
            cleanup_grace: Duration::from_secs(5),
            outbound_queue_capacity: 256,
            write_deadline: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
