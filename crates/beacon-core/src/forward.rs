//! Seam between the client pipeline and the realtime transport.

use futures::stream::BoxStream;

use crate::graphql::{GraphQLRequest, GraphQLResponse};
use crate::result::OperationError;

/// Push-based stream of subscription payloads.
pub type SubscriptionStream = BoxStream<'static, Result<GraphQLResponse, OperationError>>;

/// Turns a subscription request into a stream of GraphQL payloads.
///
/// The returned stream is lazy: nothing is sent until it is first polled,
/// and dropping it tears the subscription down.
pub trait SubscriptionForwarder: Send + Sync {
    /// Start forwarding results for `request`.
    fn forward_subscription(&self, request: GraphQLRequest) -> SubscriptionStream;
}
