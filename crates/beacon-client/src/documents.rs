//! Typed GraphQL documents used by the application.

use beacon_core::{GraphQLRequest, OperationKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A GraphQL document with typed variables and result data.
pub trait GraphQLDocument {
    /// Operation type.
    const KIND: OperationKind;
    /// Operation name within [`Self::DOCUMENT`].
    const OPERATION_NAME: &'static str;
    /// Document text.
    const DOCUMENT: &'static str;

    /// Variables object.
    type Variables: Serialize;
    /// Shape of `data`.
    type Data: DeserializeOwned;

    /// Request for this document.
    fn request(variables: &Self::Variables) -> GraphQLRequest {
        GraphQLRequest::new(Self::DOCUMENT)
            .with_operation_name(Self::OPERATION_NAME)
            .with_variables(serde_json::to_value(variables).unwrap_or_default())
    }
}

/// Documents that take no variables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NoVariables {}

/// `query Ping`: server liveness.
#[derive(Clone, Copy, Debug)]
pub struct Ping;

impl GraphQLDocument for Ping {
    const KIND: OperationKind = OperationKind::Query;
    const OPERATION_NAME: &'static str = "Ping";
    const DOCUMENT: &'static str = "query Ping {\n  ping {\n    status\n  }\n}\n";
    type Variables = NoVariables;
    type Data = PingData;
}

/// Result of [`Ping`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PingData {
    /// Server status, `null` when unavailable.
    pub ping: Option<Status>,
}

/// Liveness flag.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Status {
    /// `true` when the server is up.
    pub status: Option<bool>,
}

/// `subscription NewUser`: users as they are created.
#[derive(Clone, Copy, Debug)]
pub struct NewUser;

impl GraphQLDocument for NewUser {
    const KIND: OperationKind = OperationKind::Subscription;
    const OPERATION_NAME: &'static str = "NewUser";
    const DOCUMENT: &'static str = "subscription NewUser {\n  newUser {\n    id\n    name\n  }\n}\n";
    type Variables = NoVariables;
    type Data = NewUserData;
}

/// One [`NewUser`] event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserData {
    /// The created user.
    pub new_user: Option<UserSummary>,
}

/// Fields selected by [`NewUser`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct UserSummary {
    /// User ID.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_request_is_named_and_has_no_variables() {
        let request = Ping::request(&NoVariables {});
        assert_eq!(request.operation_name.as_deref(), Some("Ping"));
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"query": Ping::DOCUMENT, "operationName": "Ping"})
        );
    }

    #[test]
    fn new_user_data_parses_nullable_fields() {
        let data: NewUserData =
            serde_json::from_value(json!({"newUser": {"id": "7", "name": null}})).unwrap();
        let user = data.new_user.unwrap();
        assert_eq!(user.id.as_deref(), Some("7"));
        assert!(user.name.is_none());

        let empty: NewUserData = serde_json::from_value(json!({"newUser": null})).unwrap();
        assert!(empty.new_user.is_none());
    }

    #[test]
    fn ping_data_parses() {
        let data: PingData = serde_json::from_value(json!({"ping": {"status": true}})).unwrap();
        assert_eq!(data.ping.unwrap().status, Some(true));
        assert_eq!(NewUser::KIND, OperationKind::Subscription);
    }
}
