use std::sync::Arc;

use tracing::Instrument;

use crate::composition::compose;
use crate::configuration::Configuration;
use crate::configuration::PlannerConfiguration;
use crate::error::CompositionErrors;
use crate::error::GatewayError;
use crate::error::PlanningError;
use crate::execution::ExecutionOptions;
use crate::execution::Executor;
use crate::graphql;
use crate::query_planner::CachingQueryPlanner;
use crate::query_planner::QueryPlan;
use crate::query_planner::QueryPlanner;
use crate::services::ServiceRegistry;
use crate::subgraph::Subgraph;
use crate::supergraph::Supergraph;

/// A federated gateway over a composed supergraph.
///
/// Only built from a successful composition. Cloning is cheap and clones
/// share the plan cache.
#[derive(Clone)]
pub struct Gateway {
    supergraph: Arc<Supergraph>,
    planner: CachingQueryPlanner,
    executor: Executor,
}

impl Gateway {
    pub fn new(
        subgraphs: &[Subgraph],
        services: ServiceRegistry,
        planner: PlannerConfiguration,
        execution: ExecutionOptions,
    ) -> Result<Gateway, CompositionErrors> {
        let supergraph = Arc::new(compose(subgraphs)?);
        Ok(Self::from_supergraph(supergraph, services, planner, execution))
    }

    pub fn from_supergraph(
        supergraph: Arc<Supergraph>,
        services: ServiceRegistry,
        planner: PlannerConfiguration,
        execution: ExecutionOptions,
    ) -> Gateway {
        let planner = CachingQueryPlanner::new(
            QueryPlanner::new(supergraph.clone()),
            planner.cache_limit,
        );
        let executor = Executor::new(supergraph.clone(), Arc::new(services), execution);
        Gateway {
            supergraph,
            planner,
            executor,
        }
    }

    /// Compose the configured subgraphs and fetch from them over HTTP.
    pub fn from_configuration(configuration: &Configuration) -> Result<Gateway, GatewayError> {
        let supergraph = Arc::new(compose_configuration(configuration)?);
        let services = ServiceRegistry::from_supergraph(&supergraph)?;
        Ok(Self::from_supergraph(
            supergraph,
            services,
            configuration.planner.clone(),
            configuration.execution.clone(),
        ))
    }

    pub fn supergraph(&self) -> &Arc<Supergraph> {
        &self.supergraph
    }

    pub async fn plan(
        &self,
        query: &str,
        operation_name: Option<&str>,
    ) -> Result<Arc<QueryPlan>, PlanningError> {
        self.planner.plan(query, operation_name).await
    }

    /// Plan and execute a client request.
    ///
    /// Planning failures come back as a single error without data.
    pub async fn execute(&self, request: graphql::Request) -> graphql::Response {
        let span = tracing::info_span!(
            "request",
            operation.name = request.operation_name.as_deref().unwrap_or_default()
        );
        async {
            let plan = match self
                .planner
                .plan(&request.query, request.operation_name.as_deref())
                .await
            {
                Ok(plan) => plan,
                Err(error) => {
                    tracing::debug!(%error, "query planning failed");
                    return graphql::Response::from_error(error.to_graphql_error());
                }
            };
            self.executor.execute(&plan, &request.variables).await
        }
        .instrument(span)
        .await
    }
}

/// Load and compose the subgraphs of a configuration. Every subgraph parse
/// failure and composition error is reported together.
pub fn compose_configuration(configuration: &Configuration) -> Result<Supergraph, GatewayError> {
    let mut subgraphs = Vec::new();
    let mut errors = Vec::new();
    for (name, url, sdl) in configuration.load_subgraphs()? {
        match Subgraph::parse(name, url, &sdl) {
            Ok(subgraph) => subgraphs.push(subgraph),
            Err(error) => errors.push(error),
        }
    }
    if !errors.is_empty() {
        return Err(CompositionErrors::from(errors).into());
    }
    Ok(compose(&subgraphs)?)
}
