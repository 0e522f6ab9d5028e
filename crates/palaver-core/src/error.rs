//! Error taxonomy for the room engine.
//!
//! Handlers never let an error unwind past their own boundary: rejections
//! are logged and the caller observes either the intended state change or
//! nothing at all. These types exist so the logs and the few surfaced
//! results (admission, shutdown) carry a precise kind.

use crate::auth::AuthError;
use crate::bus::BusError;
use crate::sfu::SfuError;

/// Core application error used across the engine.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Admission would exceed the room's participant cap.
    #[error("room {0} is at capacity")]
    RoomFull(String),

    /// Caller lacks the capability for the requested operation.
    #[error("not authorized: {0}")]
    Unauthorized(&'static str),

    /// Request payload failed a structural check.
    #[error("validation failed: {0}")]
    Validation(&'static str),

    /// Admin action named a user that is not in the room.
    #[error("unknown target user {0}")]
    UnknownTarget(String),

    /// Token or origin rejected at the upgrade edge.
    #[error("authentication rejected: {0}")]
    Auth(#[from] AuthError),

    /// Bus transport failure (publish, subscribe, member mirror).
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// SFU call failure.
    #[error("sfu error: {0}")]
    Sfu(#[from] SfuError),

    /// Envelope failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}
