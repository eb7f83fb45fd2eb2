//! Query planning: turns a client operation into a DAG of subgraph fetches.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

mod builder;
mod caching_query_planner;
pub(crate) mod operation;

pub use caching_query_planner::CachingQueryPlanner;
pub use caching_query_planner::DEFAULT_CACHE_LIMIT;
pub use operation::NormalizedOperation;
pub use operation::OperationKind;

use crate::error::PlanningError;
use crate::json_ext::Path;
use crate::selection::Selection;
use crate::supergraph::Supergraph;

/// A fetch node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchNode {
    /// Position of the node in the plan. Dependencies always have lower ids.
    pub id: usize,

    /// The name of the service or subgraph that the fetch is querying.
    pub service_name: String,

    /// The GraphQL operation kind that is used for the fetch.
    pub operation_kind: OperationKind,

    /// The GraphQL subquery operation name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    /// The GraphQL subquery that is used for the fetch.
    pub operation: String,

    /// The variables that are used for the subgraph fetch.
    pub variable_usages: Vec<String>,

    /// The data that is required for the subgraph fetch.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub requires: Vec<Selection>,

    /// Where the entities of an entity fetch live in the response.
    #[serde(default, skip_serializing_if = "Path::is_empty")]
    pub merge_path: Path,

    /// The fetches that must complete before this one.
    #[serde(default)]
    pub depends_on: Vec<usize>,

    /// The response keys this fetch resolves at its merge path.
    pub output_keys: Vec<String>,
}

impl FetchNode {
    /// True for `_entities` fetches.
    pub fn is_entity_fetch(&self) -> bool {
        !self.requires.is_empty()
    }
}

/// A planned operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    /// Fetches in a topological order.
    pub nodes: Vec<FetchNode>,
    #[serde(skip)]
    pub(crate) operation: Arc<NormalizedOperation>,
}

impl QueryPlan {
    pub fn operation(&self) -> &NormalizedOperation {
        &self.operation
    }

    pub fn node(&self, id: usize) -> Option<&FetchNode> {
        self.nodes.get(id)
    }

    /// The services the plan sends requests to, in plan order.
    pub fn services(&self) -> Vec<&str> {
        let mut services: Vec<&str> = Vec::new();
        for node in &self.nodes {
            if !services.contains(&node.service_name.as_str()) {
                services.push(&node.service_name);
            }
        }
        services
    }
}

/// Plans operations against a supergraph.
#[derive(Clone)]
pub struct QueryPlanner {
    supergraph: Arc<Supergraph>,
}

impl QueryPlanner {
    pub fn new(supergraph: Arc<Supergraph>) -> Self {
        QueryPlanner { supergraph }
    }

    pub fn supergraph(&self) -> &Arc<Supergraph> {
        &self.supergraph
    }

    pub fn plan(
        &self,
        query: &str,
        operation_name: Option<&str>,
    ) -> Result<QueryPlan, PlanningError> {
        let operation = NormalizedOperation::parse(&self.supergraph, query, operation_name)?;
        self.plan_operation(operation)
    }

    /// Plan an operation that was already normalized.
    pub fn plan_operation(
        &self,
        operation: NormalizedOperation,
    ) -> Result<QueryPlan, PlanningError> {
        let span = tracing::debug_span!(
            "query_planning",
            operation.name = operation.name.as_deref().unwrap_or_default()
        );
        let _guard = span.enter();

        let nodes = builder::PlanBuilder::new(&self.supergraph, &operation).build()?;
        tracing::debug!(fetches = nodes.len(), "query planned");
        Ok(QueryPlan {
            nodes,
            operation: Arc::new(operation),
        })
    }
}
