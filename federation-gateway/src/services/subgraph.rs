use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::ACCEPT;
use http::header::HeaderValue;

use crate::error::FetchError;
use crate::graphql;
use crate::supergraph::Supergraph;

/// Sends GraphQL operations to one subgraph.
///
/// This is the seam between the executor and the transport: the executor
/// only ever talks to subgraphs through it.
#[async_trait]
pub trait SubgraphFetcher: Send + Sync {
    async fn fetch(&self, request: graphql::Request) -> Result<graphql::Response, FetchError>;
}

/// Fetches over HTTP, POSTing the request as JSON.
#[derive(Clone, Debug)]
pub struct HttpSubgraphFetcher {
    service: String,
    url: String,
    client: reqwest::Client,
}

impl HttpSubgraphFetcher {
    /// Construct a new http subgraph fetcher that will fetch from the supplied URL.
    pub fn new(service: impl Into<String>, url: impl Into<String>) -> Result<Self, FetchError> {
        let service = service.into();
        let client = reqwest::Client::builder()
            .tcp_keepalive(Some(Duration::from_secs(5)))
            .build()
            .map_err(|error| FetchError::SubrequestHttpError {
                service: service.clone(),
                reason: error.to_string(),
            })?;
        Ok(Self::with_client(service, url, client))
    }

    pub fn with_client(
        service: impl Into<String>,
        url: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        HttpSubgraphFetcher {
            service: service.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl SubgraphFetcher for HttpSubgraphFetcher {
    async fn fetch(&self, request: graphql::Request) -> Result<graphql::Response, FetchError> {
        let http_error = |reason: String| FetchError::SubrequestHttpError {
            service: self.service.clone(),
            reason,
        };
        tracing::trace!(subgraph.name = %self.service, url = %self.url, "sending subgraph request");
        let response = self
            .client
            .post(&self.url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(&request)
            .send()
            .await
            .map_err(|error| http_error(error.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|error| http_error(error.to_string()))?;
        tracing::trace!(subgraph.name = %self.service, %status, "received subgraph response");

        // error statuses may still carry a GraphQL response
        match graphql::Response::from_bytes(&self.service, &body) {
            Ok(response) => Ok(response),
            Err(_) if !status.is_success() => Err(http_error(format!(
                "subgraph answered with status {status}"
            ))),
            Err(error) => Err(error),
        }
    }
}

/// The fetchers of every known subgraph, by name.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn SubgraphFetcher>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// An HTTP fetcher for every subgraph, using its routing URL.
    pub fn from_supergraph(supergraph: &Supergraph) -> Result<Self, FetchError> {
        let mut registry = ServiceRegistry::new();
        for subgraph in supergraph.subgraphs() {
            registry.insert(
                subgraph.name.clone(),
                Arc::new(HttpSubgraphFetcher::new(&subgraph.name, &subgraph.url)?),
            );
        }
        Ok(registry)
    }

    pub fn insert(&mut self, name: impl Into<String>, fetcher: Arc<dyn SubgraphFetcher>) {
        self.services.insert(name.into(), fetcher);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SubgraphFetcher>> {
        self.services.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.services.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::body_json;
    use wiremock::matchers::header;
    use wiremock::matchers::method;

    use super::*;

    #[tokio::test]
    async fn posts_json_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("accept", "application/json"))
            .and(body_json(json!({
                "query": "{ me { id } }",
                "operationName": "Me"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"me": {"id": "1"}}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpSubgraphFetcher::new("accounts", server.uri()).unwrap();
        let response = fetcher
            .fetch(graphql::Request::new("{ me { id } }").with_operation_name("Me"))
            .await
            .unwrap();
        assert_eq!(response.data, Some(json!({"me": {"id": "1"}})));
        assert!(response.errors.is_empty());
    }

    #[tokio::test]
    async fn error_status_with_graphql_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "data": null,
                "errors": [{"message": "boom"}]
            })))
            .mount(&server)
            .await;

        let fetcher = HttpSubgraphFetcher::new("accounts", server.uri()).unwrap();
        let response = fetcher.fetch(graphql::Request::new("{ me { id } }")).await.unwrap();
        assert_eq!(response.errors[0].message, "boom");
    }

    #[tokio::test]
    async fn transport_and_body_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        let fetcher = HttpSubgraphFetcher::new("accounts", server.uri()).unwrap();
        let error = fetcher.fetch(graphql::Request::new("{ me { id } }")).await.unwrap_err();
        assert_eq!(error.code(), "SUBREQUEST_MALFORMED_RESPONSE");

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;
        let fetcher = HttpSubgraphFetcher::new("accounts", server.uri()).unwrap();
        let error = fetcher.fetch(graphql::Request::new("{ me { id } }")).await.unwrap_err();
        assert_eq!(error.code(), "SUBREQUEST_HTTP_ERROR");
        assert_eq!(
            error.to_string(),
            "HTTP fetch failed from 'accounts': subgraph answered with status 502 Bad Gateway"
        );
    }
}
