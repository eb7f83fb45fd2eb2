//! Merges the extracted subgraphs type by type and resolves the owner of
//! every composite field.

use indexmap::IndexMap;
use itertools::Itertools;

use super::extract::ExtractedField;
use super::extract::ExtractedSubgraph;
use super::extract::ExtractedType;
use super::requires::find_override_cycle;
use crate::error::CompositionError;
use crate::error::CompositionErrorCode;
use crate::schema::TypeKind;
use crate::supergraph::SupergraphField;
use crate::supergraph::SupergraphType;

/// One subgraph's declaration of a field.
pub(crate) struct Declaration<'a> {
    pub(crate) subgraph: &'a str,
    pub(crate) field: &'a ExtractedField,
    /// Whether the field is part of a `@key` of its type in that subgraph.
    pub(crate) key_field: bool,
}

/// All declarations of one type, in composition order.
struct MergedType<'a> {
    name: String,
    kind: TypeKind,
    declarations: Vec<(&'a str, &'a ExtractedType)>,
}

/// Merge the types of every subgraph. Fields are resolved to their owner;
/// conflicts are pushed to `errors`.
pub(crate) fn merge_types(
    subgraphs: &[ExtractedSubgraph],
    errors: &mut Vec<CompositionError>,
) -> IndexMap<String, SupergraphType> {
    let mut merged: IndexMap<String, MergedType<'_>> = IndexMap::new();
    for subgraph in subgraphs {
        for ty in subgraph.types.values() {
            match merged.get_mut(&ty.name) {
                Some(existing) if existing.kind != ty.kind => {
                    errors.push(
                        CompositionError::new(
                            CompositionErrorCode::TypeKindMismatch,
                            &subgraph.name,
                            format!(
                                "type \"{}\" is declared as {} in subgraph \"{}\" but as {} in subgraph \"{}\"",
                                ty.name,
                                existing.kind,
                                existing.declarations[0].0,
                                ty.kind,
                                subgraph.name
                            ),
                        )
                        .on_type(&ty.name),
                    );
                }
                Some(existing) => existing.declarations.push((subgraph.name.as_str(), ty)),
                None => {
                    merged.insert(
                        ty.name.clone(),
                        MergedType {
                            name: ty.name.clone(),
                            kind: ty.kind,
                            declarations: vec![(subgraph.name.as_str(), ty)],
                        },
                    );
                }
            }
        }
    }

    merged
        .into_values()
        .map(|ty| {
            let merged = merge_type(&ty, errors);
            (ty.name, merged)
        })
        .collect()
}

fn merge_type(ty: &MergedType<'_>, errors: &mut Vec<CompositionError>) -> SupergraphType {
    let mut supergraph_type = SupergraphType {
        name: ty.name.clone(),
        kind: ty.kind,
        declared_in: ty
            .declarations
            .iter()
            .map(|(subgraph, _)| subgraph.to_string())
            .collect(),
        keys: IndexMap::new(),
        fields: IndexMap::new(),
        interfaces: Vec::new(),
        members: Vec::new(),
        enum_values: Vec::new(),
        input_fields: IndexMap::new(),
    };

    let mut fields: IndexMap<&str, Vec<Declaration<'_>>> = IndexMap::new();
    for &(subgraph, declaration) in &ty.declarations {
        if !declaration.keys.is_empty() {
            supergraph_type
                .keys
                .insert(subgraph.to_string(), declaration.keys.clone());
        }
        for interface in &declaration.interfaces {
            if !supergraph_type.interfaces.contains(interface) {
                supergraph_type.interfaces.push(interface.clone());
            }
        }
        for member in &declaration.members {
            if !supergraph_type.members.contains(member) {
                supergraph_type.members.push(member.clone());
            }
        }
        for value in &declaration.enum_values {
            if !supergraph_type.enum_values.contains(value) {
                supergraph_type.enum_values.push(value.clone());
            }
        }
        for (name, field) in &declaration.input_fields {
            supergraph_type
                .input_fields
                .entry(name.clone())
                .or_insert_with(|| field.clone());
        }
        for field in declaration.fields.values() {
            fields.entry(field.name.as_str()).or_default().push(Declaration {
                subgraph,
                field,
                key_field: declaration.is_key_field(&field.name),
            });
        }
    }

    for (field_name, declarations) in fields {
        if !check_field_types(&ty.name, &declarations, errors) {
            continue;
        }
        if let Some(field) = resolve_owner(&ty.name, field_name, &declarations, errors) {
            supergraph_type
                .fields
                .insert(field_name.to_string(), field);
        }
    }
    supergraph_type
}

/// Every declaration must agree on the field type, nullability aside.
fn check_field_types(
    type_name: &str,
    declarations: &[Declaration<'_>],
    errors: &mut Vec<CompositionError>,
) -> bool {
    let first = &declarations[0];
    let expected = first.field.ty.nullable();
    let mut consistent = true;
    for declaration in &declarations[1..] {
        if declaration.field.ty.nullable() != expected {
            errors.push(
                CompositionError::new(
                    CompositionErrorCode::FieldTypeMismatch,
                    declaration.subgraph,
                    format!(
                        "field \"{type_name}.{}\" has type \"{}\" in subgraph \"{}\" but \"{}\" in subgraph \"{}\"",
                        first.field.name,
                        declaration.field.ty,
                        declaration.subgraph,
                        first.field.ty,
                        first.subgraph
                    ),
                )
                .on_field(type_name, &first.field.name),
            );
            consistent = false;
        }
    }
    consistent
}

/// Pick the single authoritative subgraph of a field.
///
/// `@external` declarations never own a field; `@override(from: X)` removes
/// X from the candidates. Key and `@shareable` fields may be resolved by
/// several subgraphs, the first candidate being authoritative.
pub(crate) fn resolve_owner(
    type_name: &str,
    field_name: &str,
    declarations: &[Declaration<'_>],
    errors: &mut Vec<CompositionError>,
) -> Option<SupergraphField> {
    let external_in: Vec<String> = declarations
        .iter()
        .filter(|declaration| declaration.field.external)
        .map(|declaration| declaration.subgraph.to_string())
        .collect();
    let resolving: Vec<&Declaration<'_>> = declarations
        .iter()
        .filter(|declaration| !declaration.field.external)
        .collect();
    if resolving.is_empty() {
        errors.push(
            CompositionError::new(
                CompositionErrorCode::ExternalUnresolvable,
                declarations[0].subgraph,
                format!(
                    "field \"{type_name}.{field_name}\" is marked @external in {} but no subgraph resolves it",
                    describe_subgraphs(&external_in)
                ),
            )
            .on_field(type_name, field_name),
        );
        return None;
    }

    if let Some(cycle) = find_override_cycle(&resolving) {
        errors.push(
            CompositionError::new(
                CompositionErrorCode::RequiresCycle,
                cycle[0].clone(),
                format!(
                    "@override declarations on \"{type_name}.{field_name}\" form a cycle: {}",
                    cycle.join(" -> ")
                ),
            )
            .on_field(type_name, field_name),
        );
        return None;
    }

    let overridden: Vec<&str> = resolving
        .iter()
        .filter_map(|declaration| declaration.field.override_from.as_deref())
        .collect();
    let candidates: Vec<&Declaration<'_>> = resolving
        .iter()
        .copied()
        .filter(|declaration| !overridden.contains(&declaration.subgraph))
        .collect();
    let shared = candidates
        .iter()
        .all(|declaration| declaration.field.shareable || declaration.key_field);
    if candidates.len() > 1 && !shared {
        let names: Vec<String> = candidates
            .iter()
            .map(|declaration| declaration.subgraph.to_string())
            .collect();
        let error = if overridden.is_empty() {
            CompositionError::new(
                CompositionErrorCode::FieldOwnershipAmbiguous,
                candidates[0].subgraph,
                format!(
                    "field \"{type_name}.{field_name}\" is resolved by {} without @override or @shareable",
                    describe_subgraphs(&names)
                ),
            )
        } else {
            CompositionError::new(
                CompositionErrorCode::OverrideConflict,
                candidates[0].subgraph,
                format!(
                    "field \"{type_name}.{field_name}\" still has several candidate owners after applying @override: {}",
                    describe_subgraphs(&names)
                ),
            )
        };
        errors.push(error.on_field(type_name, field_name));
        return None;
    }

    let owner = candidates.first()?;
    let mut arguments = owner.field.arguments.clone();
    for declaration in declarations {
        for argument in &declaration.field.arguments {
            if !arguments.iter().any(|existing| existing.name == argument.name) {
                arguments.push(argument.clone());
            }
        }
    }
    Some(SupergraphField {
        name: field_name.to_string(),
        ty: owner.field.ty.clone(),
        arguments,
        owner: owner.subgraph.to_string(),
        resolvable_in: candidates
            .iter()
            .map(|declaration| declaration.subgraph.to_string())
            .collect(),
        external_in,
        requires: inherited_requires(owner, &resolving),
        provides: candidates
            .iter()
            .filter_map(|declaration| {
                declaration
                    .field
                    .provides
                    .clone()
                    .map(|provides| (declaration.subgraph.to_string(), provides))
            })
            .collect(),
        override_from: owner.field.override_from.clone(),
    })
}

/// The `@requires` of the owner, or of the declaration it took the field
/// over from when the owner declares none.
fn inherited_requires<'a>(
    owner: &'a Declaration<'a>,
    resolving: &[&'a Declaration<'a>],
) -> Option<crate::directives::FieldSet> {
    let mut current = owner;
    let mut visited = vec![current.subgraph];
    loop {
        if let Some(requires) = &current.field.requires {
            return Some(requires.clone());
        }
        let from = current.field.override_from.as_deref()?;
        if visited.contains(&from) {
            return None;
        }
        current = resolving
            .iter()
            .copied()
            .find(|declaration| declaration.subgraph == from)?;
        visited.push(current.subgraph);
    }
}

fn describe_subgraphs(names: &[String]) -> String {
    let quoted = names.iter().map(|name| format!("\"{name}\"")).join(", ");
    if names.len() == 1 {
        format!("subgraph {quoted}")
    } else {
        format!("subgraphs {quoted}")
    }
}
