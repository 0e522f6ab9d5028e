//! Remote SFU adapter.
//!
//! Speaks the SFU's session API: unary operations as HTTP calls, the event
//! stream as a WebSocket of JSON events. The engine only sees the
//! four-method [`SfuClient`] contract.
//!
//! Session API, relative to the configured base URL:
//! - `POST   /v1/rooms/{room}/sessions/{user}`         → `{"sdp_offer": …}`
//! - `POST   /v1/rooms/{room}/sessions/{user}/signal`  ← one of
//!   `{"sdp_offer"|"sdp_answer"|"ice_candidate": …}`
//! - `DELETE /v1/rooms/{room}/sessions/{user}`         (404 == already gone)
//! - `WS     /v1/rooms/{room}/sessions/{user}/events`  → JSON event per
//!   text frame

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use palaver_core::sfu::SfuEventStream;
use palaver_core::{SfuClient, SfuError, SfuEvent};
use palaver_proto::{signal, Signal};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

pub struct RemoteSfu {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    sdp_offer: String,
}

/// Events as the SFU serializes them.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    IceCandidate {
        candidate: String,
    },
    TrackAdded {
        user_id: String,
        stream_id: String,
        track_kind: String,
    },
}

impl From<WireEvent> for SfuEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::Offer { sdp } => SfuEvent::Offer(sdp),
            WireEvent::Answer { sdp } => SfuEvent::Answer(sdp),
            WireEvent::IceCandidate { candidate } => SfuEvent::IceCandidate(candidate),
            WireEvent::TrackAdded {
                user_id,
                stream_id,
                track_kind,
            } => SfuEvent::TrackAdded {
                user_id,
                stream_id,
                track_kind,
            },
        }
    }
}

impl RemoteSfu {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn session_url(&self, user_id: &str, room_id: &str) -> String {
        format!("{}/v1/rooms/{room_id}/sessions/{user_id}", self.base_url)
    }

    fn events_url(&self, user_id: &str, room_id: &str) -> String {
        let ws_base = http_to_ws(&self.base_url);
        format!("{ws_base}/v1/rooms/{room_id}/sessions/{user_id}/events")
    }
}

fn http_to_ws(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    }
}

fn signal_body(signal: Signal) -> Result<serde_json::Value, SfuError> {
    match signal.sdp {
        Some(signal::Sdp::SdpOffer(sdp)) => Ok(serde_json::json!({ "sdp_offer": sdp })),
        Some(signal::Sdp::SdpAnswer(sdp)) => Ok(serde_json::json!({ "sdp_answer": sdp })),
        Some(signal::Sdp::IceCandidate(c)) => Ok(serde_json::json!({ "ice_candidate": c })),
        None => Err(SfuError::Rejected("signal without payload".into())),
    }
}

fn transport_err(e: impl std::fmt::Display) -> SfuError {
    SfuError::Transport(e.to_string())
}

impl SfuClient for RemoteSfu {
    fn create_session<'a>(
        &'a self,
        user_id: &'a str,
        room_id: &'a str,
    ) -> BoxFuture<'a, Result<String, SfuError>> {
        let url = self.session_url(user_id, room_id);
        Box::pin(async move {
            let response = self
                .http
                .post(url)
                .send()
                .await
                .map_err(transport_err)?
                .error_for_status()
                .map_err(|e| SfuError::Rejected(e.to_string()))?;
            let body: CreateSessionResponse = response.json().await.map_err(transport_err)?;
            Ok(body.sdp_offer)
        })
    }

    fn handle_signal<'a>(
        &'a self,
        user_id: &'a str,
        room_id: &'a str,
        signal: Signal,
    ) -> BoxFuture<'a, Result<(), SfuError>> {
        let url = format!("{}/signal", self.session_url(user_id, room_id));
        Box::pin(async move {
            let body = signal_body(signal)?;
            self.http
                .post(url)
                .json(&body)
                .send()
                .await
                .map_err(transport_err)?
                .error_for_status()
                .map_err(|e| SfuError::Rejected(e.to_string()))?;
            Ok(())
        })
    }

    fn delete_session<'a>(
        &'a self,
        user_id: &'a str,
        room_id: &'a str,
    ) -> BoxFuture<'a, Result<(), SfuError>> {
        let url = self.session_url(user_id, room_id);
        Box::pin(async move {
            let response = self.http.delete(url).send().await.map_err(transport_err)?;
            // Deleting an absent session is success: the call is idempotent.
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(());
            }
            response
                .error_for_status()
                .map_err(|e| SfuError::Rejected(e.to_string()))?;
            Ok(())
        })
    }

    fn listen_events<'a>(
        &'a self,
        user_id: &'a str,
        room_id: &'a str,
    ) -> BoxFuture<'a, Result<SfuEventStream, SfuError>> {
        let url = self.events_url(user_id, room_id);
        Box::pin(async move {
            let (socket, _response) = connect_async(&url).await.map_err(transport_err)?;
            let stream = socket.filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<WireEvent>(&text) {
                            Ok(event) => Some(Ok(SfuEvent::from(event))),
                            Err(error) => {
                                tracing::debug!(%error, "dropping unparseable sfu event");
                                None
                            }
                        }
                    }
                    Ok(Message::Close(_)) => None,
                    Ok(_) => None,
                    Err(error) => Some(Err(SfuError::Transport(error.to_string()))),
                }
            });
            Ok(Box::pin(stream) as SfuEventStream)
        })
    }
}
