//! The federation directive model.
//!
//! Subgraph documents annotate their types and fields with a closed set of
//! directives. They are parsed once into [`FederationDirective`] values, and
//! everything downstream matches on those variants.

use std::fmt;

use apollo_compiler::ast;
use apollo_compiler::Node;
use itertools::Itertools;

use crate::error::CompositionError;
use crate::error::CompositionErrorCode;

/// Directives that may appear in a subgraph without affecting composition.
const PASSTHROUGH_DIRECTIVES: [&str; 12] = [
    "deprecated",
    "specifiedBy",
    "skip",
    "include",
    "defer",
    "stream",
    "link",
    "tag",
    "inaccessible",
    "extends",
    "composeDirective",
    "interfaceObject",
];

const FEDERATION_PREFIX: &str = "federation__";

/// A selection of fields, as used by `@key`, `@requires` and `@provides`.
///
/// Items are kept in declaration order; [`FieldSet::normalized`] gives the
/// order-insensitive form used for comparisons.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FieldSet(pub Vec<FieldSetItem>);

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FieldSetItem {
    pub name: String,
    pub selections: FieldSet,
}

impl FieldSet {
    /// Parse the string form of a field set, e.g. `id organization { id }`.
    pub fn parse(source: &str) -> Result<FieldSet, String> {
        let document = ast::Document::parse(format!("{{ {source} }}"), "field_set.graphql")
            .map_err(|invalid| invalid.errors.to_string())?;
        let selection_set = match document.definitions.as_slice() {
            [ast::Definition::OperationDefinition(operation)] => &operation.selection_set,
            _ => return Err(format!("\"{source}\" is not a selection set")),
        };
        let field_set = Self::from_selections(selection_set)?;
        if field_set.0.is_empty() {
            return Err("field set is empty".to_string());
        }
        Ok(field_set)
    }

    fn from_selections(selections: &[ast::Selection]) -> Result<FieldSet, String> {
        selections
            .iter()
            .map(|selection| match selection {
                ast::Selection::Field(field) => {
                    if field.alias.is_some() {
                        return Err(format!("field \"{}\" cannot be aliased", field.name));
                    }
                    if !field.arguments.is_empty() {
                        return Err(format!("field \"{}\" cannot have arguments", field.name));
                    }
                    if !field.directives.is_empty() {
                        return Err(format!("field \"{}\" cannot have directives", field.name));
                    }
                    Ok(FieldSetItem {
                        name: field.name.to_string(),
                        selections: Self::from_selections(&field.selection_set)?,
                    })
                }
                ast::Selection::FragmentSpread(_) | ast::Selection::InlineFragment(_) => {
                    Err("fragments are not supported in field sets".to_string())
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(FieldSet)
    }

    /// Sorted and deduplicated at every level.
    pub fn normalized(&self) -> FieldSet {
        let mut items: Vec<FieldSetItem> = Vec::new();
        for item in &self.0 {
            match items.iter_mut().find(|existing| existing.name == item.name) {
                Some(existing) => {
                    existing.selections.0.extend(item.selections.0.iter().cloned());
                }
                None => items.push(item.clone()),
            }
        }
        let mut items: Vec<FieldSetItem> = items
            .into_iter()
            .map(|item| FieldSetItem {
                name: item.name,
                selections: item.selections.normalized(),
            })
            .collect();
        items.sort();
        FieldSet(items)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSetItem> {
        self.0.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|item| item.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&FieldSetItem> {
        self.0.iter().find(|item| item.name == name)
    }

    /// Union of two field sets.
    pub fn merge(&self, other: &FieldSet) -> FieldSet {
        let mut merged = self.clone();
        merged.0.extend(other.0.iter().cloned());
        merged.normalized()
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join(" "))
    }
}

impl fmt::Display for FieldSetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.selections.is_empty() {
            write!(f, " {{ {} }}", self.selections)?;
        }
        Ok(())
    }
}

/// A parsed federation directive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FederationDirective {
    /// `@key(fields:, resolvable:)` on an object or interface type.
    Key { fields: FieldSet, resolvable: bool },
    /// `@external` on a field, or on a type to mark all of its fields.
    External,
    /// `@requires(fields:)` on a field.
    Requires { fields: FieldSet },
    /// `@provides(fields:)` on a field.
    Provides { fields: FieldSet },
    /// `@override(from:)` on a field.
    Override { from: String },
    /// `@shareable` on a field, or on a type to mark all of its fields.
    Shareable,
}

/// Where a directive is applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum DirectiveLocation {
    Type,
    Field,
}

impl DirectiveLocation {
    fn describe(self) -> &'static str {
        match self {
            DirectiveLocation::Type => "a type",
            DirectiveLocation::Field => "a field",
        }
    }
}

/// Parses directive applications for one subgraph.
pub(crate) struct DirectiveParser<'a> {
    subgraph: &'a str,
    /// Directives defined in the subgraph document itself.
    custom: Vec<String>,
}

impl<'a> DirectiveParser<'a> {
    pub(crate) fn new(subgraph: &'a str, document: &ast::Document) -> Self {
        let custom = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::DirectiveDefinition(definition) => {
                    Some(definition.name.to_string())
                }
                _ => None,
            })
            .collect();
        DirectiveParser { subgraph, custom }
    }

    /// Parse the directives applied at one location.
    ///
    /// Errors are pushed to `errors`; the offending directive is dropped.
    pub(crate) fn parse(
        &self,
        directives: &ast::DirectiveList,
        location: DirectiveLocation,
        type_name: &str,
        field_name: Option<&str>,
        errors: &mut Vec<CompositionError>,
    ) -> Vec<FederationDirective> {
        let mut parsed = Vec::new();
        for directive in directives.iter() {
            match self.parse_one(directive, location) {
                Ok(Some(directive)) => parsed.push(directive),
                Ok(None) => {}
                Err(message) => {
                    let error = CompositionError::new(
                        CompositionErrorCode::InvalidDirective,
                        self.subgraph,
                        message,
                    );
                    errors.push(match field_name {
                        Some(field_name) => error.on_field(type_name, field_name),
                        None => error.on_type(type_name),
                    });
                }
            }
        }
        parsed
    }

    fn parse_one(
        &self,
        directive: &Node<ast::Directive>,
        location: DirectiveLocation,
    ) -> Result<Option<FederationDirective>, String> {
        let raw_name = directive.name.as_str();
        let name = raw_name.strip_prefix(FEDERATION_PREFIX).unwrap_or(raw_name);
        let arguments = Arguments::new(raw_name, directive)?;
        let (parsed, allowed) = match name {
            "key" => {
                arguments.only(&["fields", "resolvable"])?;
                let fields = arguments.field_set("fields")?;
                let resolvable = arguments.optional_bool("resolvable")?.unwrap_or(true);
                (
                    FederationDirective::Key { fields, resolvable },
                    &[DirectiveLocation::Type][..],
                )
            }
            "external" => {
                arguments.only(&["reason"])?;
                (
                    FederationDirective::External,
                    &[DirectiveLocation::Type, DirectiveLocation::Field][..],
                )
            }
            "requires" => {
                arguments.only(&["fields"])?;
                let fields = arguments.field_set("fields")?;
                (
                    FederationDirective::Requires { fields },
                    &[DirectiveLocation::Field][..],
                )
            }
            "provides" => {
                arguments.only(&["fields"])?;
                let fields = arguments.field_set("fields")?;
                (
                    FederationDirective::Provides { fields },
                    &[DirectiveLocation::Field][..],
                )
            }
            "override" => {
                arguments.only(&["from"])?;
                let from = arguments.string("from")?;
                (
                    FederationDirective::Override { from },
                    &[DirectiveLocation::Field][..],
                )
            }
            "shareable" => {
                arguments.only(&[])?;
                (
                    FederationDirective::Shareable,
                    &[DirectiveLocation::Type, DirectiveLocation::Field][..],
                )
            }
            _ if PASSTHROUGH_DIRECTIVES.contains(&name)
                || self.custom.iter().any(|custom| custom == raw_name) =>
            {
                return Ok(None);
            }
            _ => return Err(format!("unknown directive \"@{raw_name}\"")),
        };
        if !allowed.contains(&location) {
            return Err(format!(
                "directive \"@{raw_name}\" cannot be applied to {}",
                location.describe()
            ));
        }
        Ok(Some(parsed))
    }
}

struct Arguments<'a> {
    directive: &'a str,
    arguments: &'a [Node<ast::Argument>],
}

impl<'a> Arguments<'a> {
    fn new(directive: &'a str, node: &'a ast::Directive) -> Result<Self, String> {
        let arguments = Arguments {
            directive,
            arguments: &node.arguments,
        };
        if let Some(duplicate) = node
            .arguments
            .iter()
            .map(|argument| argument.name.as_str())
            .duplicates()
            .next()
        {
            return Err(format!(
                "argument \"{duplicate}\" is repeated in \"@{directive}\""
            ));
        }
        Ok(arguments)
    }

    fn only(&self, allowed: &[&str]) -> Result<(), String> {
        match self
            .arguments
            .iter()
            .find(|argument| !allowed.contains(&argument.name.as_str()))
        {
            Some(unknown) => Err(format!(
                "unknown argument \"{}\" in \"@{}\"",
                unknown.name, self.directive
            )),
            None => Ok(()),
        }
    }

    fn get(&self, name: &str) -> Option<&ast::Value> {
        self.arguments
            .iter()
            .find(|argument| argument.name.as_str() == name)
            .map(|argument| &*argument.value)
    }

    fn string(&self, name: &str) -> Result<String, String> {
        match self.get(name) {
            Some(ast::Value::String(value)) => Ok(value.to_string()),
            Some(_) => Err(format!(
                "argument \"{name}\" of \"@{}\" must be a string",
                self.directive
            )),
            None => Err(format!(
                "\"@{}\" is missing its required argument \"{name}\"",
                self.directive
            )),
        }
    }

    fn optional_bool(&self, name: &str) -> Result<Option<bool>, String> {
        match self.get(name) {
            Some(ast::Value::Boolean(value)) => Ok(Some(*value)),
            Some(_) => Err(format!(
                "argument \"{name}\" of \"@{}\" must be a boolean",
                self.directive
            )),
            None => Ok(None),
        }
    }

    fn field_set(&self, name: &str) -> Result<FieldSet, String> {
        let source = self.string(name)?;
        FieldSet::parse(&source).map_err(|reason| {
            format!(
                "invalid field set \"{source}\" in \"@{}\": {reason}",
                self.directive
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_type_directives(
        sdl: &str,
    ) -> (Vec<FederationDirective>, Vec<FederationDirective>, Vec<CompositionError>) {
        let document = ast::Document::parse(sdl, "test.graphql").unwrap();
        let parser = DirectiveParser::new("products", &document);
        let object = document
            .definitions
            .iter()
            .find_map(|definition| match definition {
                ast::Definition::ObjectTypeDefinition(object) => Some(object),
                _ => None,
            })
            .unwrap();
        let mut errors = Vec::new();
        let on_type = parser.parse(
            &object.directives,
            DirectiveLocation::Type,
            &object.name,
            None,
            &mut errors,
        );
        let on_field = parser.parse(
            &object.fields[0].directives,
            DirectiveLocation::Field,
            &object.name,
            Some(object.fields[0].name.as_str()),
            &mut errors,
        );
        (on_type, on_field, errors)
    }

    #[test]
    fn field_set_parsing_and_normalization() {
        let fields = FieldSet::parse("sku id organization { name id }").unwrap();
        assert_eq!(fields.to_string(), "sku id organization { name id }");
        assert_eq!(
            fields.normalized().to_string(),
            "id organization { id name } sku"
        );
        assert_eq!(
            FieldSet::parse("id sku").unwrap().normalized(),
            FieldSet::parse("sku id").unwrap().normalized()
        );
        assert!(FieldSet::parse("id {").is_err());
        assert!(FieldSet::parse("alias: id").is_err());
        assert!(FieldSet::parse("... on Product { id }").is_err());
    }

    #[test]
    fn parses_federation_directives() {
        let (on_type, on_field, errors) = parse_type_directives(
            r#"
            type Product @key(fields: "id") @federation__key(fields: "sku", resolvable: false) {
              receipt: String @requires(fields: "creditCardNumber") @override(from: "b") @tag(name: "x")
            }
            "#,
        );
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            on_type,
            vec![
                FederationDirective::Key {
                    fields: FieldSet::parse("id").unwrap(),
                    resolvable: true,
                },
                FederationDirective::Key {
                    fields: FieldSet::parse("sku").unwrap(),
                    resolvable: false,
                },
            ]
        );
        assert_eq!(
            on_field,
            vec![
                FederationDirective::Requires {
                    fields: FieldSet::parse("creditCardNumber").unwrap(),
                },
                FederationDirective::Override {
                    from: "b".to_string()
                },
            ]
        );
    }

    #[test]
    fn rejects_invalid_directives() {
        let (_, _, errors) = parse_type_directives(
            r#"
            type Product @requires(fields: "id") @key(fields: 3) {
              id: ID! @key(fields: "id") @unknown @override(form: "b")
            }
            "#,
        );
        let messages: Vec<String> = errors.iter().map(|error| error.message.clone()).collect();
        assert_eq!(
            messages,
            vec![
                "directive \"@requires\" cannot be applied to a type",
                "argument \"fields\" of \"@key\" must be a string",
                "directive \"@key\" cannot be applied to a field",
                "unknown directive \"@unknown\"",
                "unknown argument \"form\" in \"@override\"",
            ]
        );
        assert!(
            errors
                .iter()
                .all(|error| error.code == CompositionErrorCode::InvalidDirective)
        );
        assert_eq!(errors[2].field_name.as_deref(), Some("id"));
    }

    #[test]
    fn directives_defined_in_the_document_are_accepted() {
        let (_, on_field, errors) = parse_type_directives(
            r#"
            directive @custom on FIELD_DEFINITION
            type Product {
              id: ID! @custom @shareable
            }
            "#,
        );
        assert!(errors.is_empty());
        assert_eq!(on_field, vec![FederationDirective::Shareable]);
    }
}
