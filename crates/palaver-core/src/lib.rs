//! # palaver-core
//!
//! The in-process room engine for Palaver.
//!
//! A [`hub::Hub`] owns every active [`room::Room`]. Each room is a state
//! machine that holds authoritative membership, roles, media flags, chat
//! history and draw orders, serializes every mutation under one read-write
//! lock, fans protobuf envelopes out to locally connected clients, and
//! mirrors them to peer instances through an [`bus::EventBus`].
//!
//! The engine talks to the outside world through three narrow seams:
//! - [`auth::Authenticator`] validates tokens at the WebSocket upgrade edge,
//! - [`bus::EventBus`] carries envelopes between instances,
//! - [`sfu::SfuClient`] brokers WebRTC sessions against the external SFU.
//!
//! Everything else — per-connection pumps, the router, admission, admin
//! actions, delayed room cleanup — lives in this crate.

pub mod auth;
pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod room;
pub mod router;
pub mod sfu;
pub mod ws;

pub use auth::{AuthClaims, AuthError, Authenticator};
pub use bus::{BusError, BusMessage, EventBus, LocalBus};
pub use client::{Client, Role};
pub use config::RoomConfig;
pub use error::CoreError;
pub use hub::Hub;
pub use room::Room;
pub use sfu::{SfuClient, SfuError, SfuEvent};
