//! Subgraph services: the fetcher seam and its HTTP implementation.

mod subgraph;

pub use subgraph::HttpSubgraphFetcher;
pub use subgraph::ServiceRegistry;
pub use subgraph::SubgraphFetcher;
