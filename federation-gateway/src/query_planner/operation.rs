//! Client operation normalization.
//!
//! The selected operation is validated against the supergraph, its fragment
//! spreads are inlined and every field is annotated with its parent and
//! output types. The normalized form prints to a canonical string, whose
//! hash keys the plan cache.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;

use apollo_compiler::ast;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::error::PlanningError;
use crate::json_ext::Object;
use crate::schema::InputValue;
use crate::schema::TypeKind;
use crate::schema::TypeRef;
use crate::supergraph::Supergraph;

pub(crate) const TYPENAME: &str = "__typename";

/// The kind of a GraphQL operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// A directive applied in an executable document. Only `@skip` and
/// `@include` are kept.
#[derive(Clone, Debug, PartialEq)]
pub struct Directive {
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
}

impl Directive {
    fn condition(&self) -> Option<&InputValue> {
        self.arguments
            .iter()
            .find(|(name, _)| name == "if")
            .map(|(_, value)| value)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        write_arguments(f, &self.arguments)
    }
}

/// Evaluate `@skip` and `@include` against the variables.
pub(crate) fn is_included(directives: &[Directive], variables: &Object) -> bool {
    directives.iter().all(|directive| {
        let condition = directive
            .condition()
            .and_then(|condition| condition.as_bool(variables));
        match (directive.name.as_str(), condition) {
            ("skip", Some(skip)) => !skip,
            ("include", Some(include)) => include,
            _ => true,
        }
    })
}

pub(crate) fn write_arguments(
    f: &mut impl Write,
    arguments: &[(String, InputValue)],
) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    let arguments = arguments
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .join(", ");
    write!(f, "({arguments})")
}

/// A variable definition of the operation.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<InputValue>,
}

impl fmt::Display for VariableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}: {}", self.name, self.ty)?;
        if let Some(default_value) = &self.default_value {
            write!(f, " = {default_value}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
    /// The type this field is selected on.
    pub parent_type: String,
    /// The output type of the field.
    pub ty: TypeRef,
}

impl Field {
    /// The key of this field in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

/// An operation ready for planning.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedOperation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDefinition>,
    pub root_type: String,
    pub selection_set: Vec<Selection>,
}

impl NormalizedOperation {
    /// Parse, select and normalize an operation of `query`.
    pub fn parse(
        supergraph: &Supergraph,
        query: &str,
        operation_name: Option<&str>,
    ) -> Result<NormalizedOperation, PlanningError> {
        let document = ast::Document::parse(query, "query.graphql")
            .map_err(|invalid| PlanningError::ParseFailure(invalid.errors.to_string()))?;

        let mut operations = Vec::new();
        let mut fragments = HashMap::new();
        for definition in &document.definitions {
            match definition {
                ast::Definition::OperationDefinition(operation) => operations.push(operation),
                ast::Definition::FragmentDefinition(fragment) => {
                    fragments.insert(fragment.name.as_str(), fragment);
                }
                _ => {}
            }
        }
        let operation = match operation_name {
            Some(name) => operations
                .into_iter()
                .find(|operation| operation.name.as_ref().is_some_and(|n| n.as_str() == name))
                .ok_or_else(|| PlanningError::UnknownOperation(name.to_string()))?,
            None => match operations.as_slice() {
                [] => return Err(PlanningError::MissingOperation),
                [operation] => *operation,
                _ => return Err(PlanningError::AmbiguousOperation),
            },
        };

        let (kind, root_type) = match operation.operation_type {
            ast::OperationType::Query => (OperationKind::Query, supergraph.query_type().to_string()),
            ast::OperationType::Mutation => (
                OperationKind::Mutation,
                supergraph
                    .mutation_type()
                    .ok_or_else(|| PlanningError::UnknownType("Mutation".to_string()))?
                    .to_string(),
            ),
            ast::OperationType::Subscription => {
                return Err(PlanningError::UnsupportedOperation(
                    OperationKind::Subscription.to_string(),
                ));
            }
        };

        let normalizer = Normalizer {
            supergraph,
            fragments,
        };
        let selection_set =
            normalizer.selection_set(&operation.selection_set, &root_type, &mut Vec::new())?;
        Ok(NormalizedOperation {
            kind,
            name: operation.name.as_ref().map(|name| name.to_string()),
            variables: operation
                .variables
                .iter()
                .map(|variable| VariableDefinition {
                    name: variable.name.to_string(),
                    ty: TypeRef::from(&*variable.ty),
                    default_value: variable
                        .default_value
                        .as_ref()
                        .map(|value| InputValue::from(&**value)),
                })
                .collect(),
            root_type,
            selection_set,
        })
    }

    /// The plan cache key: a SHA-256 of the canonical printed form.
    pub fn signature(&self) -> String {
        hex::encode(Sha256::digest(self.to_string().as_bytes()))
    }
}

impl fmt::Display for NormalizedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(name) = &self.name {
            write!(f, " {name}")?;
        }
        if !self.variables.is_empty() {
            write!(f, "({})", self.variables.iter().join(", "))?;
        }
        f.write_str(" ")?;
        write_selection_set(f, &self.selection_set)
    }
}

fn write_selection_set(f: &mut fmt::Formatter<'_>, selections: &[Selection]) -> fmt::Result {
    f.write_str("{")?;
    for selection in selections {
        f.write_str(" ")?;
        match selection {
            Selection::Field(field) => {
                if let Some(alias) = &field.alias {
                    write!(f, "{alias}: ")?;
                }
                f.write_str(&field.name)?;
                write_arguments(f, &field.arguments)?;
                for directive in &field.directives {
                    write!(f, " {directive}")?;
                }
                if !field.selection_set.is_empty() {
                    f.write_str(" ")?;
                    write_selection_set(f, &field.selection_set)?;
                }
            }
            Selection::InlineFragment(fragment) => {
                f.write_str("...")?;
                if let Some(type_condition) = &fragment.type_condition {
                    write!(f, " on {type_condition}")?;
                }
                for directive in &fragment.directives {
                    write!(f, " {directive}")?;
                }
                f.write_str(" ")?;
                write_selection_set(f, &fragment.selection_set)?;
            }
        }
    }
    f.write_str(" }")
}

struct Normalizer<'a> {
    supergraph: &'a Supergraph,
    fragments: HashMap<&'a str, &'a apollo_compiler::Node<ast::FragmentDefinition>>,
}

impl<'a> Normalizer<'a> {
    fn selection_set(
        &self,
        selections: &'a [ast::Selection],
        parent_type: &str,
        spreads: &mut Vec<&'a str>,
    ) -> Result<Vec<Selection>, PlanningError> {
        let mut normalized = Vec::new();
        for selection in selections {
            match selection {
                ast::Selection::Field(field) => {
                    normalized.push(Selection::Field(self.field(field, parent_type, spreads)?));
                }
                ast::Selection::InlineFragment(fragment) => {
                    let type_condition = match &fragment.type_condition {
                        Some(type_condition) => {
                            self.check_type(type_condition)?;
                            type_condition.to_string()
                        }
                        None => parent_type.to_string(),
                    };
                    normalized.push(Selection::InlineFragment(InlineFragment {
                        selection_set: self.selection_set(
                            &fragment.selection_set,
                            &type_condition,
                            spreads,
                        )?,
                        type_condition: Some(type_condition),
                        directives: directives(&fragment.directives),
                    }));
                }
                ast::Selection::FragmentSpread(spread) => {
                    let name = spread.fragment_name.as_str();
                    let fragment = self
                        .fragments
                        .get(name)
                        .ok_or_else(|| PlanningError::UnknownFragment(name.to_string()))?;
                    if spreads.contains(&name) {
                        return Err(PlanningError::ParseFailure(format!(
                            "fragment \"{name}\" spreads itself"
                        )));
                    }
                    let type_condition = fragment.type_condition.as_str();
                    self.check_type(type_condition)?;
                    spreads.push(name);
                    let selection_set =
                        self.selection_set(&fragment.selection_set, type_condition, spreads)?;
                    spreads.pop();
                    normalized.push(Selection::InlineFragment(InlineFragment {
                        type_condition: Some(type_condition.to_string()),
                        directives: directives(&spread.directives),
                        selection_set,
                    }));
                }
            }
        }
        Ok(normalized)
    }

    fn check_type(&self, type_name: &str) -> Result<(), PlanningError> {
        match self.supergraph.get_type(type_name) {
            Some(ty) if ty.kind.is_composite() => Ok(()),
            _ => Err(PlanningError::UnknownType(type_name.to_string())),
        }
    }

    fn field(
        &self,
        field: &'a ast::Field,
        parent_type: &str,
        spreads: &mut Vec<&'a str>,
    ) -> Result<Field, PlanningError> {
        let name = field.name.as_str();
        let ty = if name == TYPENAME {
            TypeRef::NonNull(Box::new(TypeRef::Named("String".to_string())))
        } else if name.starts_with("__") {
            return Err(PlanningError::UnsupportedIntrospection(name.to_string()));
        } else {
            self.supergraph
                .field(parent_type, name)
                .map(|definition| definition.ty.clone())
                .ok_or_else(|| PlanningError::UnknownField {
                    type_name: parent_type.to_string(),
                    field_name: name.to_string(),
                })?
        };

        let output_kind = self
            .supergraph
            .get_type(ty.named_type())
            .map(|output| output.kind);
        let selection_set = match output_kind {
            Some(kind) if kind.is_composite() => {
                if field.selection_set.is_empty() {
                    return Err(PlanningError::MissingSubselection {
                        type_name: parent_type.to_string(),
                        field_name: name.to_string(),
                    });
                }
                self.selection_set(&field.selection_set, ty.named_type(), spreads)?
            }
            _ => Vec::new(),
        };

        Ok(Field {
            alias: field.alias.as_ref().map(|alias| alias.to_string()),
            name: name.to_string(),
            arguments: field
                .arguments
                .iter()
                .map(|argument| (argument.name.to_string(), InputValue::from(&*argument.value)))
                .collect(),
            directives: directives(&field.directives),
            selection_set,
            parent_type: parent_type.to_string(),
            ty,
        })
    }
}

fn directives(directives: &ast::DirectiveList) -> Vec<Directive> {
    directives
        .iter()
        .filter(|directive| matches!(directive.name.as_str(), "skip" | "include"))
        .map(|directive| Directive {
            name: directive.name.to_string(),
            arguments: directive
                .arguments
                .iter()
                .map(|argument| (argument.name.to_string(), InputValue::from(&*argument.value)))
                .collect(),
        })
        .collect()
}

/// The kind of the named output type of `ty`, if it is a known type.
pub(crate) fn output_kind(supergraph: &Supergraph, ty: &TypeRef) -> Option<TypeKind> {
    supergraph.get_type(ty.named_type()).map(|output| output.kind)
}
