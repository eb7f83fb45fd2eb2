//! Entity key consistency.

use indexmap::IndexMap;
use itertools::Itertools;

use super::extract::ExtractedSubgraph;
use crate::directives::FieldSet;
use crate::error::CompositionError;
use crate::error::CompositionErrorCode;
use crate::supergraph::SupergraphType;

/// Check that every subgraph declaring keys for a type declares the same
/// set, and that subgraphs contributing fields to an entity without a key
/// can still be reached through one of their own fields.
pub(crate) fn check_keys(
    subgraphs: &[ExtractedSubgraph],
    types: &IndexMap<String, SupergraphType>,
    errors: &mut Vec<CompositionError>,
) {
    for ty in types.values() {
        let Some((first_subgraph, first_keys)) = ty.keys.first() else {
            continue;
        };
        let expected = normalized_keys(first_keys.iter().map(|key| &key.fields));
        for (subgraph, keys) in ty.keys.iter().skip(1) {
            let declared = normalized_keys(keys.iter().map(|key| &key.fields));
            if declared != expected {
                errors.push(
                    CompositionError::new(
                        CompositionErrorCode::KeyMismatch,
                        subgraph,
                        format!(
                            "type \"{}\" has key(s) {} in subgraph \"{subgraph}\" but {} in subgraph \"{first_subgraph}\"",
                            ty.name,
                            describe_keys(&declared),
                            describe_keys(&expected),
                        ),
                    )
                    .on_type(&ty.name),
                );
            }
        }

        for subgraph in &ty.declared_in {
            if ty.keys.contains_key(subgraph) {
                continue;
            }
            let contributes = ty.fields.values().any(|field| {
                field.is_resolvable_in(subgraph)
                    && !expected.iter().any(|key| key.contains(&field.name))
            });
            if contributes && !has_entry_point(subgraphs, types, subgraph, &ty.name) {
                errors.push(
                    CompositionError::new(
                        CompositionErrorCode::KeyMismatch,
                        subgraph,
                        format!(
                            "subgraph \"{subgraph}\" resolves fields of entity \"{}\" but declares no @key for it and no field returning it",
                            ty.name
                        ),
                    )
                    .on_type(&ty.name),
                );
            }
        }
    }
}

fn normalized_keys<'a>(keys: impl Iterator<Item = &'a FieldSet>) -> Vec<FieldSet> {
    let mut keys: Vec<FieldSet> = keys.map(FieldSet::normalized).collect();
    keys.sort();
    keys.dedup();
    keys
}

fn describe_keys(keys: &[FieldSet]) -> String {
    keys.iter().map(|key| format!("\"{key}\"")).join(", ")
}

/// True if the subgraph resolves some field whose type is `type_name`.
fn has_entry_point(
    subgraphs: &[ExtractedSubgraph],
    types: &IndexMap<String, SupergraphType>,
    subgraph: &str,
    type_name: &str,
) -> bool {
    let Some(extracted) = subgraphs.iter().find(|candidate| candidate.name == subgraph) else {
        return false;
    };
    extracted.types.values().any(|ty| {
        ty.fields.values().any(|field| {
            field.ty.named_type() == type_name
                && types
                    .get(&ty.name)
                    .and_then(|merged| merged.fields.get(&field.name))
                    .is_some_and(|merged| merged.is_resolvable_in(subgraph))
        })
    })
}
