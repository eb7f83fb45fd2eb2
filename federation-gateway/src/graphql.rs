//! GraphQL request, response and error types, used both on the client side
//! and when talking to subgraphs.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::FetchError;
use crate::json_ext::Object;
use crate::json_ext::Path;

/// A GraphQL request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// The query document.
    pub query: String,

    /// The operation to run when the document holds several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    /// The variable values.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub variables: Object,
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Request {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }

    pub fn with_variables(mut self, variables: Object) -> Self {
        self.variables = variables;
        self
    }
}

/// A GraphQL response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// The response data.
    #[serde(default)]
    pub data: Option<Value>,

    /// The errors, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Error>,

    /// The response extensions.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl Response {
    /// A response with no data, made of a single error.
    pub fn from_error(error: Error) -> Self {
        Response {
            errors: vec![error],
            ..Default::default()
        }
    }

    /// Parse a subgraph response body.
    pub fn from_bytes(service_name: &str, bytes: &[u8]) -> Result<Response, FetchError> {
        serde_json::from_slice(bytes).map_err(|error| FetchError::SubrequestMalformedResponse {
            service: service_name.to_string(),
            reason: error.to_string(),
        })
    }
}

/// A GraphQL error.
#[derive(thiserror::Error, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[error("{message}")]
#[serde(rename_all = "camelCase")]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the originating request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// The path of the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// The optional GraphQL extensions.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl Error {
    pub fn new(message: impl Into<String>) -> Self {
        Error {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_code(self, code: &str) -> Self {
        self.with_extension("code", Value::String(code.to_string()))
    }

    pub fn with_extension(mut self, key: &str, value: Value) -> Self {
        self.extensions.insert(key.to_string(), value);
        self
    }

    /// The `extensions.code` value, if any.
    pub fn code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(|code| code.as_str())
    }
}

/// A location in the request that triggered a GraphQL error.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The line number.
    pub line: u32,

    /// The column number.
    pub column: u32,
}
