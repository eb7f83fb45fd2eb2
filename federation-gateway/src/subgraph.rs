use std::sync::Arc;

use apollo_compiler::ast;

use crate::error::CompositionError;
use crate::error::CompositionErrorCode;

/// A subgraph schema registered for composition.
///
/// Immutable once parsed.
#[derive(Clone, Debug)]
pub struct Subgraph {
    pub name: String,
    pub url: String,
    pub type_defs: Arc<ast::Document>,
}

impl Subgraph {
    /// Parse a subgraph schema.
    pub fn parse(
        name: impl Into<String>,
        url: impl Into<String>,
        sdl: &str,
    ) -> Result<Subgraph, CompositionError> {
        let name = name.into();
        let type_defs = ast::Document::parse(sdl, format!("{name}.graphql")).map_err(|invalid| {
            CompositionError::new(
                CompositionErrorCode::InvalidGraphQL,
                name.clone(),
                format!("subgraph \"{name}\" is not valid GraphQL: {}", invalid.errors),
            )
        })?;
        Ok(Subgraph {
            name,
            url: url.into(),
            type_defs: Arc::new(type_defs),
        })
    }
}
