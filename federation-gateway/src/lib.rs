//! Compose GraphQL subgraphs into a supergraph, then plan and execute
//! federated queries against it.

#![warn(unreachable_pub)]

pub mod json_ext;

mod cache;
pub mod composition;
pub mod configuration;
pub mod directives;
pub mod error;
pub mod execution;
mod gateway;
pub mod graphql;
pub mod query_planner;
pub mod schema;
pub mod selection;
pub mod services;
pub mod subgraph;
pub mod supergraph;

pub use composition::compose;
pub use configuration::Configuration;
pub use gateway::Gateway;
pub use gateway::compose_configuration;
pub use subgraph::Subgraph;
pub use supergraph::Supergraph;
