//! Execution of query plans against the subgraphs.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Deserialize;
use serde::Serialize;
use tokio::time::Instant;
use tracing::Instrument;

mod fetch;
mod response_shape;

use self::fetch::PreparedFetch;
use self::response_shape::ResponseShaper;
use crate::error::FetchError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::query_planner::FetchNode;
use crate::query_planner::QueryPlan;
use crate::services::ServiceRegistry;
use crate::supergraph::Supergraph;

const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";

/// Execution options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExecutionOptions {
    /// Deadline of the whole request.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Deadline of each subgraph fetch.
    #[serde(with = "humantime_serde")]
    pub subgraph_timeout: Option<Duration>,

    /// Return what was resolved when the request deadline is reached,
    /// instead of failing the whole response.
    pub partial_results: bool,
}

/// Runs query plans.
#[derive(Clone, Debug)]
pub struct Executor {
    supergraph: Arc<Supergraph>,
    services: Arc<ServiceRegistry>,
    options: ExecutionOptions,
}

impl Executor {
    pub fn new(
        supergraph: Arc<Supergraph>,
        services: Arc<ServiceRegistry>,
        options: ExecutionOptions,
    ) -> Self {
        Executor {
            supergraph,
            services,
            options,
        }
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Execute the plan and return a [`graphql::Response`] in the shape of
    /// the planned operation.
    pub async fn execute(&self, plan: &QueryPlan, variables: &Object) -> graphql::Response {
        let span = tracing::info_span!(
            "execution",
            operation.name = plan.operation().name.as_deref().unwrap_or_default(),
            fetches = plan.nodes.len()
        );
        self.execute_plan(plan, variables).instrument(span).await
    }

    async fn execute_plan(&self, plan: &QueryPlan, variables: &Object) -> graphql::Response {
        let unknown: Vec<graphql::Error> = plan
            .services()
            .into_iter()
            .filter(|service| !self.services.contains(service))
            .map(|service| {
                FetchError::ValidationUnknownServiceError {
                    service: service.to_string(),
                }
                .to_graphql_error(None)
            })
            .collect();
        if !unknown.is_empty() {
            return graphql::Response {
                errors: unknown,
                ..Default::default()
            };
        }

        let variables = self.effective_variables(plan, variables);
        let deadline = self.options.timeout.map(|timeout| Instant::now() + timeout);
        let mut state = ExecutionState::new(plan);
        let mut in_flight = FuturesUnordered::new();

        loop {
            while let Some(id) = state.next_ready() {
                let node = &plan.nodes[id];
                match node.prepare(&state.data, &variables, &mut state.errors) {
                    Some(PreparedFetch {
                        request,
                        entity_paths,
                    }) => {
                        state.in_flight.insert(id, entity_paths);
                        in_flight.push(self.fetch(node, request));
                    }
                    None => {
                        tracing::debug!(node.id = id, subgraph.name = %node.service_name, "nothing to fetch");
                        state.complete(id);
                    }
                }
            }

            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, in_flight.next()).await {
                    Ok(next) => next,
                    Err(_) => return self.timed_out(plan, state, &variables),
                },
                None => in_flight.next().await,
            };
            let Some((id, result)) = next else {
                break;
            };

            let node = &plan.nodes[id];
            let entity_paths = state.in_flight.remove(&id).flatten();
            match result {
                Ok(response) => node.merge_response(
                    response,
                    entity_paths.as_deref(),
                    &mut state.data,
                    &mut state.errors,
                ),
                Err(error) => {
                    tracing::debug!(node.id = id, %error, "fetch failed");
                    node.record_failure(
                        &error,
                        &state.data,
                        entity_paths.as_deref(),
                        &mut state.errors,
                    )
                }
            }
            state.complete(id);
        }

        self.response(plan, state, &variables)
    }

    /// Client variables, completed with the defaults of the operation.
    fn effective_variables(&self, plan: &QueryPlan, variables: &Object) -> Object {
        let mut effective = variables.clone();
        for definition in &plan.operation().variables {
            if let Some(default_value) = &definition.default_value {
                if !effective.contains_key(&definition.name) {
                    effective.insert(definition.name.clone(), default_value.to_json(variables));
                }
            }
        }
        effective
    }

    async fn fetch(
        &self,
        node: &FetchNode,
        request: graphql::Request,
    ) -> (usize, Result<graphql::Response, FetchError>) {
        let span = tracing::info_span!(
            "fetch",
            subgraph.name = %node.service_name,
            node.id = node.id,
            operation.name = node.operation_name.as_deref().unwrap_or_default()
        );
        let result = async {
            let fetcher = self.services.get(&node.service_name).ok_or_else(|| {
                FetchError::ValidationUnknownServiceError {
                    service: node.service_name.clone(),
                }
            })?;
            match self.options.subgraph_timeout {
                Some(timeout) => tokio::time::timeout(timeout, fetcher.fetch(request))
                    .await
                    .map_err(|_| FetchError::SubrequestTimeout {
                        service: node.service_name.clone(),
                    })?,
                None => fetcher.fetch(request).await,
            }
        }
        .instrument(span)
        .await;
        (node.id, result)
    }

    /// The request deadline was reached: every fetch that did not complete
    /// is abandoned.
    fn timed_out(
        &self,
        plan: &QueryPlan,
        mut state: ExecutionState,
        variables: &Object,
    ) -> graphql::Response {
        tracing::debug!(pending = state.pending(), "request timed out");
        if !self.options.partial_results {
            return graphql::Response::from_error(
                graphql::Error::new("Request timed out.").with_code(REQUEST_TIMEOUT),
            );
        }

        for node in &plan.nodes {
            if state.is_complete(node.id) {
                continue;
            }
            let error = FetchError::RequestTimeout {
                service: node.service_name.clone(),
            };
            let entity_paths = state.in_flight.remove(&node.id).flatten();
            let paths = node.failure_paths(&state.data, entity_paths.as_deref());
            state
                .errors
                .extend(paths.into_iter().map(|path| error.to_graphql_error(Some(path))));
        }
        self.response(plan, state, variables)
    }

    fn response(
        &self,
        plan: &QueryPlan,
        state: ExecutionState,
        variables: &Object,
    ) -> graphql::Response {
        tracing::trace!(data = %state.data, "merged subgraph data");
        let data = ResponseShaper::new(&self.supergraph, variables)
            .shape(plan.operation(), &state.data);
        graphql::Response {
            data: Some(data),
            errors: state.errors,
            ..Default::default()
        }
    }
}

/// Per-request scheduling state.
struct ExecutionState {
    /// Number of unfinished dependencies of each node.
    waiting_on: Vec<usize>,
    /// The nodes depending on each node.
    dependents: Vec<Vec<usize>>,
    completed: Vec<bool>,
    ready: VecDeque<usize>,
    /// Entity paths of the fetches that were sent.
    in_flight: HashMap<usize, Option<Vec<Vec<Path>>>>,
    data: Value,
    errors: Vec<graphql::Error>,
}

impl ExecutionState {
    fn new(plan: &QueryPlan) -> Self {
        let mut dependents = vec![Vec::new(); plan.nodes.len()];
        let mut waiting_on = vec![0; plan.nodes.len()];
        for node in &plan.nodes {
            for &dependency in &node.depends_on {
                if let Some(dependents) = dependents.get_mut(dependency) {
                    dependents.push(node.id);
                    waiting_on[node.id] += 1;
                }
            }
        }
        let ready = waiting_on
            .iter()
            .enumerate()
            .filter(|&(_, waiting)| *waiting == 0)
            .map(|(id, _)| id)
            .collect();
        ExecutionState {
            waiting_on,
            dependents,
            completed: vec![false; plan.nodes.len()],
            ready,
            in_flight: HashMap::new(),
            data: Value::Object(Object::new()),
            errors: Vec::new(),
        }
    }

    fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop_front()
    }

    /// Mark a node as done, successful or not, and release its dependents.
    fn complete(&mut self, id: usize) {
        self.completed[id] = true;
        for &dependent in &self.dependents[id] {
            self.waiting_on[dependent] -= 1;
            if self.waiting_on[dependent] == 0 {
                self.ready.push_back(dependent);
            }
        }
    }

    fn is_complete(&self, id: usize) -> bool {
        self.completed.get(id).copied().unwrap_or(true)
    }

    fn pending(&self) -> usize {
        self.completed.iter().filter(|done| !**done).count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::composition::compose;
    use crate::query_planner::QueryPlanner;
    use crate::services::SubgraphFetcher;
    use crate::subgraph::Subgraph;

    struct Static {
        response: Value,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Static {
        fn new(response: Value) -> Arc<Self> {
            Self::delayed(response, Duration::ZERO)
        }

        fn delayed(response: Value, delay: Duration) -> Arc<Self> {
            Arc::new(Static {
                response,
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SubgraphFetcher for Static {
        async fn fetch(&self, _: graphql::Request) -> Result<graphql::Response, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(serde_json::from_value(self.response.clone()).unwrap())
        }
    }

    fn supergraph() -> Arc<Supergraph> {
        let subgraphs = [
            (
                "products",
                r#"type Query { product: Product } type Product @key(fields: "id") { id: ID! name: String }"#,
            ),
            (
                "reviews",
                r#"type Product @key(fields: "id") { id: ID! reviews: [String] }"#,
            ),
        ]
        .iter()
        .map(|&(name, sdl)| Subgraph::parse(name, format!("http://{name}"), sdl).unwrap())
        .collect::<Vec<_>>();
        Arc::new(compose(&subgraphs).unwrap())
    }

    fn registry(products: Arc<Static>, reviews: Arc<Static>) -> Arc<ServiceRegistry> {
        let mut registry = ServiceRegistry::new();
        registry.insert("products", products);
        registry.insert("reviews", reviews);
        Arc::new(registry)
    }

    fn products() -> Arc<Static> {
        Static::new(json!({"data": {"product": {"__typename": "Product", "id": "1", "name": "Table"}}}))
    }

    #[tokio::test]
    async fn stitches_entities() {
        let supergraph = supergraph();
        let plan = QueryPlanner::new(supergraph.clone())
            .plan("{ product { name reviews } }", None)
            .unwrap();
        let reviews = Static::new(json!({"data": {"_entities": [{"reviews": ["solid"]}]}}));
        let executor = Executor::new(
            supergraph,
            registry(products(), reviews.clone()),
            ExecutionOptions::default(),
        );
        let response = executor.execute(&plan, &Object::new()).await;
        assert_eq!(
            response.data,
            Some(json!({"product": {"name": "Table", "reviews": ["solid"]}}))
        );
        assert!(response.errors.is_empty());
        assert_eq!(reviews.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_services_fail_up_front() {
        let supergraph = supergraph();
        let plan = QueryPlanner::new(supergraph.clone())
            .plan("{ product { name reviews } }", None)
            .unwrap();
        let products = products();
        let mut registry = ServiceRegistry::new();
        registry.insert("products", products.clone());
        let executor = Executor::new(supergraph, Arc::new(registry), ExecutionOptions::default());
        let response = executor.execute(&plan, &Object::new()).await;
        assert_eq!(response.data, None);
        assert_eq!(response.errors[0].code(), Some("VALIDATION_UNKNOWN_SERVICE_ERROR"));
        assert_eq!(products.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subgraph_timeout_only_fails_its_paths() {
        let supergraph = supergraph();
        let plan = QueryPlanner::new(supergraph.clone())
            .plan("{ product { name reviews } }", None)
            .unwrap();
        let reviews = Static::delayed(json!({"data": {"_entities": [{"reviews": []}]}}), Duration::from_secs(5));
        let executor = Executor::new(
            supergraph,
            registry(products(), reviews),
            ExecutionOptions {
                subgraph_timeout: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        );
        let response = executor.execute(&plan, &Object::new()).await;
        assert_eq!(
            response.data,
            Some(json!({"product": {"name": "Table", "reviews": null}}))
        );
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].code(), Some("SUBREQUEST_TIMEOUT"));
        assert_eq!(
            response.errors[0].path.as_ref().unwrap().to_string(),
            "product/reviews"
        );
    }

    #[tokio::test]
    async fn request_timeout_without_partial_results() {
        let supergraph = supergraph();
        let plan = QueryPlanner::new(supergraph.clone())
            .plan("{ product { name reviews } }", None)
            .unwrap();
        let reviews = Static::delayed(json!({"data": {"_entities": [{"reviews": []}]}}), Duration::from_secs(5));
        let executor = Executor::new(
            supergraph,
            registry(products(), reviews),
            ExecutionOptions {
                timeout: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        );
        let response = executor.execute(&plan, &Object::new()).await;
        assert_eq!(response.data, None);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].code(), Some(REQUEST_TIMEOUT));
    }

    #[tokio::test]
    async fn operation_defaults_fill_missing_variables() {
        let subgraph = Subgraph::parse(
            "products",
            "http://products",
            "type Query { product(id: ID!): Product } type Product { id: ID! name: String }",
        )
        .unwrap();
        let supergraph = Arc::new(compose(&[subgraph]).unwrap());
        let plan = QueryPlanner::new(supergraph.clone())
            .plan(
                "query ($id: ID! = \"1\", $withName: Boolean = true) { product(id: $id) { id name @include(if: $withName) } }",
                None,
            )
            .unwrap();

        struct Echo;
        #[async_trait]
        impl SubgraphFetcher for Echo {
            async fn fetch(&self, request: graphql::Request) -> Result<graphql::Response, FetchError> {
                Ok(graphql::Response {
                    data: Some(json!({"product": {"id": request.variables["id"], "name": "Table"}})),
                    ..Default::default()
                })
            }
        }
        let mut registry = ServiceRegistry::new();
        registry.insert("products", Arc::new(Echo));
        let executor = Executor::new(supergraph, Arc::new(registry), ExecutionOptions::default());
        let response = executor.execute(&plan, &Object::new()).await;
        assert_eq!(
            response.data,
            Some(json!({"product": {"id": "1", "name": "Table"}}))
        );
    }

    #[test]
    fn options_from_yaml() {
        let options: ExecutionOptions =
            serde_yaml::from_str("timeout: 30s\nsubgraph_timeout: 250ms\npartial_results: true")
                .unwrap();
        assert_eq!(
            options,
            ExecutionOptions {
                timeout: Some(Duration::from_secs(30)),
                subgraph_timeout: Some(Duration::from_millis(250)),
                partial_results: true,
            }
        );
        assert!(serde_yaml::from_str::<ExecutionOptions>("retries: 3").is_err());
    }
}
