//! Composition of subgraph schemas into a [`Supergraph`].
//!
//! Composition runs once, over a fixed ordered list of subgraphs. Errors are
//! collected rather than returned on first failure, and come out in a
//! deterministic order: subgraph input order, then declaration order.

mod extract;
mod keys;
mod ownership;
pub(crate) mod requires;
mod supergraph_sdl;

use indexmap::IndexMap;

use crate::error::CompositionError;
use crate::error::CompositionErrorCode;
use crate::error::CompositionErrors;
use crate::subgraph::Subgraph;
use crate::supergraph::SubgraphInfo;
use crate::supergraph::Supergraph;

/// Compose the subgraphs into a supergraph.
pub fn compose(subgraphs: &[Subgraph]) -> Result<Supergraph, CompositionErrors> {
    let span = tracing::info_span!("compose", subgraphs = subgraphs.len());
    let _guard = span.enter();

    let mut errors = Vec::new();
    let mut infos: IndexMap<String, SubgraphInfo> = IndexMap::new();
    let mut accepted = Vec::new();
    for subgraph in subgraphs {
        if subgraph.name.is_empty() {
            errors.push(CompositionError::new(
                CompositionErrorCode::InvalidSubgraphName,
                "",
                "subgraph names cannot be empty",
            ));
            continue;
        }
        if infos.contains_key(&subgraph.name) {
            errors.push(CompositionError::new(
                CompositionErrorCode::InvalidSubgraphName,
                &subgraph.name,
                format!("subgraph name \"{}\" is used more than once", subgraph.name),
            ));
            continue;
        }
        infos.insert(
            subgraph.name.clone(),
            SubgraphInfo {
                name: subgraph.name.clone(),
                url: subgraph.url.clone(),
            },
        );
        accepted.push(subgraph);
    }

    let extracted: Vec<_> = accepted
        .iter()
        .map(|subgraph| extract::extract_subgraph(subgraph, &mut errors))
        .collect();

    let types = ownership::merge_types(&extracted, &mut errors);
    let requires_graph = requires::RequiresGraph::build(&types);
    requires::check_requires_cycles(&requires_graph, &types, &mut errors);
    keys::check_keys(&extracted, &types, &mut errors);

    let Some(query_type) = types.get("Query").map(|ty| ty.name.clone()) else {
        if errors.is_empty() {
            errors.push(CompositionError::new(
                CompositionErrorCode::InvalidGraphQL,
                subgraphs.first().map(|subgraph| subgraph.name.as_str()).unwrap_or_default(),
                "no subgraph defines a query root type",
            ));
        }
        return Err(fail(errors));
    };
    if !errors.is_empty() {
        return Err(fail(errors));
    }

    let mutation_type = types.get("Mutation").map(|ty| ty.name.clone());
    let sdl = supergraph_sdl::print_supergraph(
        &infos,
        &types,
        &query_type,
        mutation_type.as_deref(),
    );
    tracing::info!(types = types.len(), "composition succeeded");
    Ok(Supergraph {
        subgraphs: infos,
        types,
        query_type,
        mutation_type,
        requires_graph,
        sdl,
    })
}

fn fail(errors: Vec<CompositionError>) -> CompositionErrors {
    for error in &errors {
        tracing::debug!(code = %error.code, subgraph = %error.subgraph_name, "{}", error.message);
    }
    tracing::warn!(errors = errors.len(), "composition failed");
    CompositionErrors(errors)
}
