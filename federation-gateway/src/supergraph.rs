//! The composed supergraph: merged types, field ownership, entity keys and
//! `@requires` dependencies.
//!
//! A [`Supergraph`] is produced once by [`crate::composition::compose`] and
//! then shared read-only between requests.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::composition::requires::RequiresGraph;
use crate::directives::FieldSet;
use crate::schema::ArgumentDefinition;
use crate::schema::TypeKind;
use crate::schema::TypeRef;

/// The name and routing URL of a subgraph.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SubgraphInfo {
    pub name: String,
    pub url: String,
}

/// A `@key` declared by one subgraph.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct EntityKey {
    pub fields: FieldSet,
    pub resolvable: bool,
}

/// A type of the supergraph, merged across subgraphs.
#[derive(Clone, Debug)]
pub struct SupergraphType {
    pub name: String,
    pub kind: TypeKind,
    /// The subgraphs declaring this type, in composition order.
    pub declared_in: Vec<String>,
    /// Keys per declaring subgraph. Only subgraphs with `@key` appear.
    pub keys: IndexMap<String, Vec<EntityKey>>,
    pub fields: IndexMap<String, SupergraphField>,
    pub interfaces: Vec<String>,
    pub members: Vec<String>,
    pub enum_values: Vec<String>,
    pub input_fields: IndexMap<String, ArgumentDefinition>,
}

impl SupergraphType {
    pub fn is_entity(&self) -> bool {
        !self.keys.is_empty()
    }

    /// The resolvable keys the given subgraph declares for this type.
    pub fn keys_in(&self, subgraph: &str) -> impl Iterator<Item = &EntityKey> {
        self.keys
            .get(subgraph)
            .into_iter()
            .flatten()
            .filter(|key| key.resolvable)
    }
}

/// A field of a composite type with its resolved ownership.
#[derive(Clone, Debug)]
pub struct SupergraphField {
    pub name: String,
    pub ty: TypeRef,
    pub arguments: Vec<ArgumentDefinition>,
    /// The authoritative subgraph.
    pub owner: String,
    /// Every subgraph able to resolve the field, owner first.
    pub resolvable_in: Vec<String>,
    /// Subgraphs declaring the field `@external`.
    pub external_in: Vec<String>,
    /// Fields of the parent type needed to resolve this one.
    pub requires: Option<FieldSet>,
    /// Subfields a subgraph returns along with this field.
    pub provides: IndexMap<String, FieldSet>,
    /// The subgraph this field was taken over from, if any.
    pub override_from: Option<String>,
}

impl SupergraphField {
    pub fn is_resolvable_in(&self, subgraph: &str) -> bool {
        self.resolvable_in.iter().any(|name| name == subgraph)
    }
}

/// A `Type.field` coordinate.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldCoordinate {
    pub type_name: String,
    pub field_name: String,
}

impl FieldCoordinate {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        FieldCoordinate {
            type_name: type_name.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for FieldCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

/// The result of a successful composition.
#[derive(Clone, Debug)]
pub struct Supergraph {
    pub(crate) subgraphs: IndexMap<String, SubgraphInfo>,
    pub(crate) types: IndexMap<String, SupergraphType>,
    pub(crate) query_type: String,
    pub(crate) mutation_type: Option<String>,
    pub(crate) requires_graph: RequiresGraph,
    pub(crate) sdl: String,
}

impl Supergraph {
    pub fn subgraphs(&self) -> impl Iterator<Item = &SubgraphInfo> {
        self.subgraphs.values()
    }

    pub fn subgraph(&self, name: &str) -> Option<&SubgraphInfo> {
        self.subgraphs.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &SupergraphType> {
        self.types.values()
    }

    pub fn get_type(&self, name: &str) -> Option<&SupergraphType> {
        self.types.get(name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&SupergraphField> {
        self.types.get(type_name)?.fields.get(field_name)
    }

    /// The authoritative subgraph for `type_name.field_name`.
    pub fn owner(&self, type_name: &str, field_name: &str) -> Option<&str> {
        self.field(type_name, field_name)
            .map(|field| field.owner.as_str())
    }

    /// Every composite field with its owner, in type then field order.
    pub fn ownership(&self) -> impl Iterator<Item = (FieldCoordinate, &str)> {
        self.types.values().flat_map(|ty| {
            ty.fields.values().map(move |field| {
                (
                    FieldCoordinate::new(&ty.name, &field.name),
                    field.owner.as_str(),
                )
            })
        })
    }

    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation_type.as_deref()
    }

    /// The object types a value of `type_name` may have at runtime.
    pub fn possible_types(&self, type_name: &str) -> Vec<&str> {
        let Some(ty) = self.types.get(type_name) else {
            return Vec::new();
        };
        match ty.kind {
            TypeKind::Object => vec![ty.name.as_str()],
            TypeKind::Union => ty.members.iter().map(String::as_str).collect(),
            TypeKind::Interface => self
                .types
                .values()
                .filter(|candidate| {
                    candidate.kind == TypeKind::Object
                        && candidate.interfaces.iter().any(|name| name == type_name)
                })
                .map(|candidate| candidate.name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True if a value of `runtime_type` satisfies the type condition.
    pub fn type_condition_matches(&self, condition: &str, runtime_type: &str) -> bool {
        condition == runtime_type || self.possible_types(condition).contains(&runtime_type)
    }

    pub fn is_entity(&self, type_name: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(SupergraphType::is_entity)
    }

    /// The union of the keys declared for `type_name`, normalized.
    pub fn keys(&self, type_name: &str) -> Vec<FieldSet> {
        let mut keys: Vec<FieldSet> = self
            .types
            .get(type_name)
            .into_iter()
            .flat_map(|ty| ty.keys.values().flatten())
            .map(|key| key.fields.normalized())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// The fields `coordinate` directly depends on through `@requires`.
    pub fn requires_dependencies(&self, coordinate: &FieldCoordinate) -> Vec<FieldCoordinate> {
        self.requires_graph.dependencies(coordinate)
    }

    /// The supergraph schema, annotated with `join__` directives.
    pub fn sdl(&self) -> &str {
        &self.sdl
    }
}
