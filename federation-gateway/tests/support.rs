//! Shared subgraphs and an in-memory subgraph fetcher.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use federation_gateway::Gateway;
use federation_gateway::Subgraph;
use federation_gateway::Supergraph;
use federation_gateway::compose;
use federation_gateway::configuration::PlannerConfiguration;
use federation_gateway::error::CompositionErrors;
use federation_gateway::error::FetchError;
use federation_gateway::execution::ExecutionOptions;
use federation_gateway::graphql;
use federation_gateway::services::ServiceRegistry;
use federation_gateway::services::SubgraphFetcher;
use serde_json::Value;

/// Owns `Product.creditCardNumber` and the `product` entry point.
pub(crate) const A: &str = r#"
type Query {
  product(id: ID!): Product
}

type Product @key(fields: "id") {
  id: ID!
  creditCardNumber: String
}
"#;

/// Resolves `Product.paymentReceipt` from the card number, but was overridden.
pub(crate) const B: &str = r#"
type Product @key(fields: "id") {
  id: ID!
  creditCardNumber: String @external
  paymentReceipt: String @requires(fields: "creditCardNumber")
}
"#;

/// Took `Product.paymentReceipt` over from `b`.
pub(crate) const C: &str = r#"
type Product @key(fields: "id") {
  id: ID!
  paymentReceipt: String @override(from: "b")
}
"#;

pub(crate) fn subgraphs(schemas: &[(&str, &str)]) -> Vec<Subgraph> {
    schemas
        .iter()
        .map(|&(name, sdl)| Subgraph::parse(name, format!("http://{name}/graphql"), sdl).unwrap())
        .collect()
}

pub(crate) fn compose_schemas(schemas: &[(&str, &str)]) -> Result<Supergraph, CompositionErrors> {
    compose(&subgraphs(schemas))
}

pub(crate) fn abc() -> Vec<Subgraph> {
    subgraphs(&[("a", A), ("b", B), ("c", C)])
}

type Handler = dyn Fn(&graphql::Request) -> Result<Value, FetchError> + Send + Sync;

/// A subgraph answering from a closure, recording the requests it got.
pub(crate) struct MockSubgraph {
    handler: Box<Handler>,
    delay: Duration,
    requests: Mutex<Vec<graphql::Request>>,
}

impl MockSubgraph {
    /// Answer every request with `handler`, which returns the full response body.
    pub(crate) fn new(
        handler: impl Fn(&graphql::Request) -> Result<Value, FetchError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::delayed(Duration::ZERO, handler)
    }

    pub(crate) fn delayed(
        delay: Duration,
        handler: impl Fn(&graphql::Request) -> Result<Value, FetchError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(MockSubgraph {
            handler: Box::new(handler),
            delay,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Always answer with the same body.
    pub(crate) fn responding(body: Value) -> Arc<Self> {
        Self::new(move |_| Ok(body.clone()))
    }

    /// Always fail as if the subgraph was down.
    pub(crate) fn down(service: &str) -> Arc<Self> {
        let service = service.to_string();
        Self::new(move |_| {
            Err(FetchError::SubrequestHttpError {
                service: service.clone(),
                reason: "connection refused".to_string(),
            })
        })
    }

    pub(crate) fn requests(&self) -> Vec<graphql::Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubgraphFetcher for MockSubgraph {
    async fn fetch(&self, request: graphql::Request) -> Result<graphql::Response, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let body = (self.handler)(&request)?;
        Ok(serde_json::from_value(body).unwrap())
    }
}

pub(crate) fn gateway(
    subgraphs: &[Subgraph],
    mocks: &[(&str, Arc<MockSubgraph>)],
    options: ExecutionOptions,
) -> Gateway {
    let mut services = ServiceRegistry::new();
    for (name, mock) in mocks {
        services.insert(*name, mock.clone());
    }
    Gateway::new(subgraphs, services, PlannerConfiguration::default(), options).unwrap()
}
