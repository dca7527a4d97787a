//! # beacon-client
//!
//! GraphQL client pipeline. An operation flows through a chain of
//! [`Exchange`]s, each of which either answers it or hands it to the rest of
//! the chain:
//!
//! ```text
//! Dedup → Cache → Auth → Fetch (HTTP) → Subscription (realtime)
//! ```
//!
//! [`Client`] builds the default chain and exposes `query`, `mutation` and
//! `subscription` on top of it.

#![deny(unsafe_code)]

pub mod auth;
pub mod cache;
pub mod client;
pub mod dedup;
pub mod documents;
pub mod exchange;
pub mod fetch;
pub mod subscription;

pub use auth::{AuthConfig, AuthExchange, BearerAuth, add_bearer_token};
pub use cache::{CacheExchange, DocumentCache, collect_typenames};
pub use client::{Client, ClientBuilder};
pub use dedup::DedupExchange;
pub use documents::{
    GraphQLDocument, NewUser, NewUserData, NoVariables, Ping, PingData, Status, UserSummary,
};
pub use exchange::{Exchange, Forward, ResultStream};
pub use fetch::FetchExchange;
pub use subscription::SubscriptionExchange;
