//! GraphQL-over-HTTP request and response payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request body sent to the API and pushed as an Absinthe `doc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    /// The GraphQL document.
    pub query: String,
    /// Name of the operation to run within the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Variables object. Omitted on the wire when empty.
    #[serde(default = "empty_variables", skip_serializing_if = "is_empty_variables")]
    pub variables: Value,
}

fn empty_variables() -> Value {
    Value::Object(Map::new())
}

fn is_empty_variables(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl GraphQLRequest {
    /// Request for a document with no variables. The operation name is taken
    /// from the first named operation in the document, if any.
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        let operation_name = extract_operation_name(&query);
        Self {
            query,
            operation_name,
            variables: empty_variables(),
        }
    }

    /// Replace the variables. `null` is normalized to an empty object.
    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = if variables.is_null() {
            empty_variables()
        } else {
            variables
        };
        self
    }

    /// Override the operation name.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// Pull the name out of `query Name`, `mutation Name(...)` or
/// `subscription Name {`. Comments and fragment definitions before the
/// operation are skipped. Shorthand and anonymous documents have no name.
fn extract_operation_name(document: &str) -> Option<String> {
    let stripped = strip_comments(document);
    let mut rest = stripped.as_str();
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        let (word, after) = trimmed.split_at(word_len(trimmed));
        match word {
            "" => return None,
            "query" | "mutation" | "subscription" => {
                let after = after.trim_start();
                let name = &after[..word_len(after)];
                let valid = !name.is_empty() && !name.starts_with(|c: char| c.is_ascii_digit());
                return valid.then(|| name.to_string());
            }
            "fragment" => rest = skip_selection_set(after)?,
            _ => return None,
        }
    }
}

/// Drop `#` comments, leaving string literals intact.
fn strip_comments(document: &str) -> String {
    let mut out = String::with_capacity(document.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = document.chars();
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '#' => {
                // Keep the line break so tokens stay separated.
                if chars.by_ref().any(|c| c == '\n') {
                    out.push('\n');
                }
            }
            '"' => {
                in_string = true;
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Return what follows the first balanced `{ ... }` block in `text`.
fn skip_selection_set(text: &str) -> Option<&str> {
    let open = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[open..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open + i + 1..]);
                }
            }
            _ => {}
        }
    }
    None
}

fn word_len(s: &str) -> usize {
    s.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len())
}

/// Location of an error within the request document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// A server-reported error inside a well-formed GraphQL response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// Human-readable description.
    pub message: String,
    /// Document locations the error refers to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<ErrorLocation>,
    /// Response path (field names and list indices).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,
    /// Server-specific error metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// Error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: None,
        }
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A GraphQL response payload: `{ data, errors, extensions }`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    /// Result data; `None` when the server returned `null` or omitted it.
    #[serde(default)]
    pub data: Option<Value>,
    /// Errors reported alongside (possibly partial) data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    /// Server extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLResponse {
    /// Whether the payload carries data or errors. Anything else is not a
    /// GraphQL response.
    pub fn is_well_formed(&self) -> bool {
        self.data.is_some() || !self.errors.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
