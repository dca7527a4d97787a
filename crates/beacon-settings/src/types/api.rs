//! GraphQL HTTP endpoint settings.

use serde::{Deserialize, Serialize};

/// Where queries and mutations are sent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL of the API server (`VUE_APP_API_URL`).
    pub url: String,
    /// Path of the GraphQL endpoint under `url`.
    pub path: String,
    /// Per-request timeout; `None` leaves requests unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:4000".to_string(),
            path: "/api".to_string(),
            request_timeout_ms: None,
        }
    }
}

impl ApiSettings {
    /// Full GraphQL endpoint, e.g. `http://localhost:4000/api`.
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let settings = ApiSettings {
            url: "https://api.example.com/".to_string(),
            ..ApiSettings::default()
        };
        assert_eq!(settings.endpoint(), "https://api.example.com/api");
    }
}
