//! Adapter contract for the external Selective Forwarding Unit.
//!
//! The core never touches RTC peer connections, ICE or media. It speaks to
//! the SFU through exactly four operations and translates the SFU's event
//! stream into outbound envelopes, one envelope per event. The transport
//! behind the trait is the server's business.

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

use palaver_proto::web_socket_message::Payload;
use palaver_proto::{signal, Signal, TrackAddedEvent, WebSocketMessage};

#[derive(Debug, thiserror::Error)]
pub enum SfuError {
    #[error("sfu transport error: {0}")]
    Transport(String),
    #[error("sfu rejected request: {0}")]
    Rejected(String),
    #[error("sfu event stream closed")]
    StreamClosed,
}

/// Events the SFU pushes for one (user, room) session.
#[derive(Debug, Clone, PartialEq)]
pub enum SfuEvent {
    /// Renegotiation offer from the SFU.
    Offer(String),
    /// SDP answer to a client offer.
    Answer(String),
    /// Trickled ICE candidate, serialized by the SFU.
    IceCandidate(String),
    /// A remote track became available for this session.
    TrackAdded {
        /// The publishing user.
        user_id: String,
        stream_id: String,
        track_kind: String,
    },
}

/// Lazy event sequence for one session. Finite on stream end; a receive
/// error terminates the pump but never the room.
pub type SfuEventStream = BoxStream<'static, Result<SfuEvent, SfuError>>;

/// The four-operation session contract.
pub trait SfuClient: Send + Sync {
    /// Create a session and return the initial SDP offer.
    fn create_session<'a>(
        &'a self,
        user_id: &'a str,
        room_id: &'a str,
    ) -> BoxFuture<'a, Result<String, SfuError>>;

    /// Forward an answer, offer or ICE candidate from the client.
    fn handle_signal<'a>(
        &'a self,
        user_id: &'a str,
        room_id: &'a str,
        signal: Signal,
    ) -> BoxFuture<'a, Result<(), SfuError>>;

    /// Tear down a session. Idempotent; callers treat errors as log-only.
    fn delete_session<'a>(
        &'a self,
        user_id: &'a str,
        room_id: &'a str,
    ) -> BoxFuture<'a, Result<(), SfuError>>;

    /// Open the event stream for a session.
    fn listen_events<'a>(
        &'a self,
        user_id: &'a str,
        room_id: &'a str,
    ) -> BoxFuture<'a, Result<SfuEventStream, SfuError>>;
}

/// Translate one SFU event into the envelope the client receives.
pub(crate) fn event_to_envelope(event: SfuEvent) -> WebSocketMessage {
    let payload = match event {
        SfuEvent::Offer(sdp) => Payload::SignalEvent(Signal {
            sdp: Some(signal::Sdp::SdpOffer(sdp)),
        }),
        SfuEvent::Answer(sdp) => Payload::SignalEvent(Signal {
            sdp: Some(signal::Sdp::SdpAnswer(sdp)),
        }),
        SfuEvent::IceCandidate(candidate) => Payload::SignalEvent(Signal {
            sdp: Some(signal::Sdp::IceCandidate(candidate)),
        }),
        SfuEvent::TrackAdded {
            user_id,
            stream_id,
            track_kind,
        } => Payload::TrackAdded(TrackAddedEvent {
            user_id,
            stream_id,
            track_kind,
        }),
    };
    WebSocketMessage::new(payload)
}

/// Recording mock used by the engine's own tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records the four session operations and hands out a canned offer.
    #[derive(Default)]
    pub(crate) struct MockSfu {
        pub(crate) created: Mutex<Vec<(String, String)>>,
        pub(crate) deleted: Mutex<Vec<(String, String)>>,
        pub(crate) signals: Mutex<Vec<String>>,
    }

    impl MockSfu {
        pub(crate) fn created(&self) -> Vec<(String, String)> {
            self.created.lock().unwrap().clone()
        }

        pub(crate) fn deleted(&self) -> Vec<(String, String)> {
            self.deleted.lock().unwrap().clone()
        }

        pub(crate) fn signals(&self) -> Vec<String> {
            self.signals.lock().unwrap().clone()
        }
    }

    impl SfuClient for MockSfu {
        fn create_session<'a>(
            &'a self,
            user_id: &'a str,
            room_id: &'a str,
        ) -> BoxFuture<'a, Result<String, SfuError>> {
            self.created
                .lock()
                .unwrap()
                .push((user_id.to_owned(), room_id.to_owned()));
            Box::pin(async { Ok("v=0 offer".to_owned()) })
        }

        fn handle_signal<'a>(
            &'a self,
            user_id: &'a str,
            _room_id: &'a str,
            _signal: Signal,
        ) -> BoxFuture<'a, Result<(), SfuError>> {
            self.signals.lock().unwrap().push(user_id.to_owned());
            Box::pin(async { Ok(()) })
        }

        fn delete_session<'a>(
            &'a self,
            user_id: &'a str,
            room_id: &'a str,
        ) -> BoxFuture<'a, Result<(), SfuError>> {
            self.deleted
                .lock()
                .unwrap()
                .push((user_id.to_owned(), room_id.to_owned()));
            Box::pin(async { Ok(()) })
        }

        fn listen_events<'a>(
            &'a self,
            _user_id: &'a str,
            _room_id: &'a str,
        ) -> BoxFuture<'a, Result<SfuEventStream, SfuError>> {
            Box::pin(async { Ok(Box::pin(futures_util::stream::empty()) as SfuEventStream) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_maps_to_exactly_one_envelope() {
        let answer = event_to_envelope(SfuEvent::Answer("v=0".into()));
        match answer.payload {
            Some(Payload::SignalEvent(Signal {
                sdp: Some(signal::Sdp::SdpAnswer(sdp)),
            })) => assert_eq!(sdp, "v=0"),
            other => panic!("unexpected payload: {other:?}"),
        }

        let track = event_to_envelope(SfuEvent::TrackAdded {
            user_id: "bob".into(),
            stream_id: "s1".into(),
            track_kind: "video".into(),
        });
        match track.payload {
            Some(Payload::TrackAdded(evt)) => {
                assert_eq!(evt.user_id, "bob");
                assert_eq!(evt.stream_id, "s1");
                assert_eq!(evt.track_kind, "video");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
