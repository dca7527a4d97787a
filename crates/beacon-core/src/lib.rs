//! # beacon-core
//!
//! Shared vocabulary for the Beacon GraphQL client:
//!
//! - **Operations**: [`Operation`], [`OperationKind`], [`OperationKey`] and the
//!   per-operation [`OperationContext`] (request policy, fetch options)
//! - **Payloads**: [`GraphQLRequest`], [`GraphQLResponse`], [`GraphQLError`]
//! - **Results**: [`OperationResult`] and the [`OperationError`] taxonomy
//! - **Seams**: [`TokenSource`] (identity → pipeline) and
//!   [`SubscriptionForwarder`] (pipeline → realtime transport)
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod auth;
pub mod forward;
pub mod graphql;
pub mod logging;
pub mod operation;
pub mod result;

pub use auth::{AuthState, StaticToken, TokenSource};
pub use forward::{SubscriptionForwarder, SubscriptionStream};
pub use graphql::{ErrorLocation, GraphQLError, GraphQLRequest, GraphQLResponse};
pub use operation::{
    DeferredOptions, FetchOptions, Operation, OperationContext, OperationKey, OperationKind,
    RequestOptions, RequestPolicy,
};
pub use result::{OperationError, OperationResult};
