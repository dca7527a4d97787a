//! # beacon-realtime
//!
//! Realtime transport for GraphQL subscriptions over an Absinthe socket.
//!
//! - [`Socket`]: one Phoenix v2 WebSocket connection with reply correlation,
//!   topic routing and heartbeats
//! - [`Channel`]: a topic on the socket (join, push, leave, events)
//! - [`AbsintheTransport`]: joins the `__absinthe__:control` channel,
//!   registers subscription documents and streams their results; implements
//!   [`beacon_core::SubscriptionForwarder`]
//!
//! The transport has an explicit lifecycle: [`AbsintheTransport::connect`]
//! opens the socket and starts the control join, registrations wait for the
//! join to finish, and [`AbsintheTransport::disconnect`] closes everything.
//! There is no reconnection.

#![deny(unsafe_code)]

pub mod absinthe;
pub mod channel;
pub mod error;
pub mod message;
pub mod socket;

pub use absinthe::{AbsintheTransport, ReadyState, TransportConfig};
pub use channel::{Channel, ChannelState};
pub use error::TransportError;
pub use message::{Message, Reply};
pub use socket::{Socket, SocketOptions, SocketState};
