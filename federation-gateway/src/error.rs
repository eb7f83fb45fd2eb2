//! Error types for composition, planning, execution and configuration.

use std::fmt;

use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::graphql;
use crate::json_ext::Path;

/// The code attached to a composition error.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CompositionErrorCode {
    /// A subgraph document is not valid GraphQL.
    #[serde(rename = "INVALID_GRAPHQL")]
    #[strum(serialize = "INVALID_GRAPHQL")]
    InvalidGraphQL,
    /// Two subgraphs share a name.
    InvalidSubgraphName,
    /// A directive is unknown, misplaced or has invalid arguments.
    InvalidDirective,
    /// An `@external` field is not resolved by any subgraph.
    ExternalUnresolvable,
    /// Several `@override` declarations compete for a field.
    OverrideConflict,
    /// A field has more than one candidate owner.
    FieldOwnershipAmbiguous,
    /// `@requires` or `@override` declarations form a cycle.
    RequiresCycle,
    /// Entity keys disagree across subgraphs, or an entity is unreachable.
    KeyMismatch,
    /// A type is declared with different kinds.
    TypeKindMismatch,
    /// A field is declared with incompatible types.
    FieldTypeMismatch,
}

/// A single composition error.
#[derive(Error, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[error("[{code}] {message}")]
#[serde(rename_all = "camelCase")]
pub struct CompositionError {
    pub code: CompositionErrorCode,
    pub message: String,
    pub subgraph_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
}

impl CompositionError {
    pub fn new(
        code: CompositionErrorCode,
        subgraph_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CompositionError {
            code,
            message: message.into(),
            subgraph_name: subgraph_name.into(),
            type_name: None,
            field_name: None,
        }
    }

    pub fn on_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn on_field(mut self, type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self.field_name = Some(field_name.into());
        self
    }
}

/// Every error found while composing, in a deterministic order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CompositionErrors(pub Vec<CompositionError>);

impl CompositionErrors {
    pub fn iter(&self) -> impl Iterator<Item = &CompositionError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn codes(&self) -> Vec<CompositionErrorCode> {
        self.0.iter().map(|error| error.code).collect()
    }
}

impl fmt::Display for CompositionErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "composition failed with {} error(s):", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositionErrors {}

impl From<Vec<CompositionError>> for CompositionErrors {
    fn from(errors: Vec<CompositionError>) -> Self {
        CompositionErrors(errors)
    }
}

/// Error types for query planning.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
pub enum PlanningError {
    /// Parsing error(s): {0}
    ParseFailure(String),

    /// Unknown operation named "{0}".
    UnknownOperation(String),

    /// The document does not contain any operation.
    MissingOperation,

    /// Must provide operation name if query contains multiple operations.
    AmbiguousOperation,

    /// {0} operations are not supported.
    UnsupportedOperation(String),

    /// Introspection field "{0}" is not supported.
    UnsupportedIntrospection(String),

    /// Unknown fragment "{0}".
    UnknownFragment(String),

    /// Unknown type "{0}".
    UnknownType(String),

    /// Cannot query field "{field_name}" on type "{type_name}".
    UnknownField {
        type_name: String,
        field_name: String,
    },

    /// Field "{field_name}" of type "{type_name}" must have a selection of subfields.
    MissingSubselection {
        type_name: String,
        field_name: String,
    },

    /// Field "{type_name}.{field_name}" has no owning subgraph.
    NoOwner {
        type_name: String,
        field_name: String,
    },

    /// Field "{type_name}.{field_name}" of subgraph "{subgraph}" cannot be reached: "{type_name}" has no usable key in that subgraph.
    UnreachableField {
        type_name: String,
        field_name: String,
        subgraph: String,
    },

    /// The requirements of "{type_name}.{field_name}" cannot be satisfied without a dependency cycle.
    UnresolvableRequires {
        type_name: String,
        field_name: String,
    },

    /// The fetches of the query plan depend on each other in a cycle.
    DependencyCycle,
}

impl PlanningError {
    pub fn code(&self) -> &'static str {
        match self {
            PlanningError::ParseFailure(_) => "GRAPHQL_PARSE_FAILED",
            PlanningError::UnknownOperation(_)
            | PlanningError::MissingOperation
            | PlanningError::AmbiguousOperation
            | PlanningError::UnsupportedOperation(_)
            | PlanningError::UnsupportedIntrospection(_)
            | PlanningError::UnknownFragment(_)
            | PlanningError::UnknownType(_)
            | PlanningError::UnknownField { .. }
            | PlanningError::MissingSubselection { .. } => "GRAPHQL_VALIDATION_FAILED",
            PlanningError::NoOwner { .. }
            | PlanningError::UnreachableField { .. }
            | PlanningError::UnresolvableRequires { .. }
            | PlanningError::DependencyCycle => "QUERY_PLANNING_FAILED",
        }
    }

    /// Convert the planning error to a GraphQL error.
    pub fn to_graphql_error(&self) -> graphql::Error {
        graphql::Error::new(self.to_string()).with_code(self.code())
    }
}

/// Error types for execution.
///
/// These are not returned to the client as such: they are converted to
/// GraphQL errors attached to the response paths they affect.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq, Serialize, Deserialize, strum_macros::IntoStaticStr)]
#[serde(tag = "type")]
#[ignore_extra_doc_attributes]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchError {
    /// Query references unknown service '{service}'.
    ValidationUnknownServiceError {
        /// The service that was unknown.
        service: String,
    },

    /// HTTP fetch failed from '{service}': {reason}
    ///
    /// Note that this relates to a transport error and not a GraphQL error.
    SubrequestHttpError {
        /// The service failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// Service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed response.
        service: String,

        /// The reason the serialization failed.
        reason: String,
    },

    /// Request to service '{service}' timed out.
    SubrequestTimeout {
        /// The service that did not answer in time.
        service: String,
    },

    /// Request timed out before service '{service}' could answer.
    RequestTimeout {
        /// The service whose fetch was still pending.
        service: String,
    },

    /// Service '{service}' was not called: required data is unavailable.
    ExecutionMissingRequirements {
        /// The service that needed the data.
        service: String,
    },

    /// Invalid content from service '{service}': {reason}
    ExecutionInvalidContent {
        /// The service that returned the content.
        service: String,

        /// What was wrong with it.
        reason: String,
    },
}

impl FetchError {
    pub fn code(&self) -> &'static str {
        self.into()
    }

    pub fn service(&self) -> &str {
        match self {
            FetchError::ValidationUnknownServiceError { service }
            | FetchError::SubrequestHttpError { service, .. }
            | FetchError::SubrequestMalformedResponse { service, .. }
            | FetchError::SubrequestTimeout { service }
            | FetchError::RequestTimeout { service }
            | FetchError::ExecutionMissingRequirements { service }
            | FetchError::ExecutionInvalidContent { service, .. } => service,
        }
    }

    /// Convert the fetch error to a GraphQL error.
    pub fn to_graphql_error(&self, path: Option<Path>) -> graphql::Error {
        let mut error = graphql::Error::new(self.to_string())
            .with_code(self.code())
            .with_extension("service", Value::String(self.service().to_string()));
        error.path = path;
        error
    }
}

/// Error types for configuration loading.
#[derive(Error, Display, Debug)]
pub enum ConfigurationError {
    /// Could not read '{path}': {reason}
    Io { path: String, reason: String },

    /// Invalid configuration: {0}
    Yaml(#[from] serde_yaml::Error),

    /// Subgraph '{name}' is invalid: {reason}
    InvalidSubgraph { name: String, reason: String },
}

/// Errors raised while building a gateway.
#[derive(Error, Display, Debug)]
pub enum GatewayError {
    /// {0}
    Composition(#[from] CompositionErrors),

    /// {0}
    Configuration(#[from] ConfigurationError),

    /// {0}
    Services(#[from] FetchError),
}
