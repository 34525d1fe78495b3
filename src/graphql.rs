//! GraphQL-shaped cache values and keys
//!
//! The transport that actually performs requests lives outside this crate.
//! What it hands back is always a [`GraphQLResult`]: transport, parse and
//! remote failures are folded into its `errors` so the cache treats a failed
//! request like any other value.

use crate::cache::types::CacheKey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Cache key builder for request-derived keys
pub struct CacheKeyBuilder {
    namespace: String,
    identifier: String,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: String::new(),
            params: Vec::new(),
        }
    }

    /// Set the primary identifier
    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = id.into();
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let mut key = format!("{}:{}", self.namespace, self.identifier);

        if !self.params.is_empty() {
            let params_str: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push_str(&format!("?{}", params_str.join("&")));
        }

        key
    }
}

/// A GraphQL operation as sent by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLOperation {
    pub query: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub variables: Value,
}

impl GraphQLOperation {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: Value::Null,
        }
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    /// Stable key for this operation, e.g. `graphql:UserQuery?hash=3f2a...`
    ///
    /// The hash is SHA-256, so server and client builds agree on keys and a
    /// hydrated snapshot is found again on the client.
    ///
    /// Variables are hashed in canonical (sorted-key) JSON form, so two
    /// operations differing only in object key order share a key.
    pub fn cache_key(&self) -> CacheKey {
        let canonical = json!({
            "query": self.query,
            "operationName": self.operation_name,
            "variables": self.variables,
        })
        .to_string();

        CacheKeyBuilder::new("graphql")
            .identifier(self.operation_name.as_deref().unwrap_or("anonymous"))
            .param("hash", Self::hash(&canonical))
            .build()
    }

    fn hash(canonical: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Why the client side of a request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientErrorCode {
    /// The request could not be sent or no response arrived
    FetchError,
    /// The response was received with a non-success HTTP status
    ResponseHttpStatus,
    /// The response body was not valid JSON
    ResponseJsonParseError,
    /// The response JSON was not a GraphQL response
    ResponseMalformed,
}

/// One entry of a GraphQL `errors` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    /// An error reported by the GraphQL server
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: None,
        }
    }

    /// An error produced on the client while performing the request
    pub fn client(code: ClientErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: Some(json!({ "client": true, "code": code })),
        }
    }

    /// The client error code, if this error was produced on the client
    pub fn client_code(&self) -> Option<ClientErrorCode> {
        let extensions = self.extensions.as_ref()?;
        if extensions.get("client")?.as_bool()? {
            serde_json::from_value(extensions.get("code")?.clone()).ok()
        } else {
            None
        }
    }
}

/// The value cached for a GraphQL operation, successful or not
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphQLResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl GraphQLResult {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn error(error: GraphQLError) -> Self {
        Self {
            data: None,
            errors: vec![error],
        }
    }

    /// Result for a request that was cancelled before a response arrived
    pub fn cancelled() -> Self {
        Self::error(GraphQLError::client(
            ClientErrorCode::FetchError,
            "Fetch aborted.",
        ))
    }

    /// True when there are no errors
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// True when any error came from the client side of the request
    pub fn has_client_error(&self) -> bool {
        self.errors.iter().any(|e| e.client_code().is_some())
    }
}
