//! Reads one subgraph document into the typed model used by composition.

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use indexmap::IndexMap;

use crate::directives::DirectiveLocation;
use crate::directives::DirectiveParser;
use crate::directives::FederationDirective;
use crate::directives::FieldSet;
use crate::error::CompositionError;
use crate::error::CompositionErrorCode;
use crate::schema::ArgumentDefinition;
use crate::schema::TypeKind;
use crate::schema::TypeRef;
use crate::subgraph::Subgraph;
use crate::supergraph::EntityKey;

/// Root fields every federated subgraph exposes for the gateway's own use.
const FEDERATION_ROOT_FIELDS: [&str; 2] = ["_entities", "_service"];

#[derive(Clone, Debug)]
pub(crate) struct ExtractedSubgraph {
    pub(crate) name: String,
    pub(crate) types: IndexMap<String, ExtractedType>,
}

#[derive(Clone, Debug)]
pub(crate) struct ExtractedType {
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) keys: Vec<EntityKey>,
    pub(crate) fields: IndexMap<String, ExtractedField>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) members: Vec<String>,
    pub(crate) enum_values: Vec<String>,
    pub(crate) input_fields: IndexMap<String, ArgumentDefinition>,
}

impl ExtractedType {
    fn new(name: String, kind: TypeKind) -> Self {
        ExtractedType {
            name,
            kind,
            keys: Vec::new(),
            fields: IndexMap::new(),
            interfaces: Vec::new(),
            members: Vec::new(),
            enum_values: Vec::new(),
            input_fields: IndexMap::new(),
        }
    }

    pub(crate) fn is_key_field(&self, field_name: &str) -> bool {
        self.keys.iter().any(|key| key.fields.contains(field_name))
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ExtractedField {
    pub(crate) name: String,
    pub(crate) ty: TypeRef,
    pub(crate) arguments: Vec<ArgumentDefinition>,
    pub(crate) external: bool,
    pub(crate) shareable: bool,
    pub(crate) requires: Option<FieldSet>,
    pub(crate) provides: Option<FieldSet>,
    pub(crate) override_from: Option<String>,
}

/// Type-level directives that apply to every field of a type.
#[derive(Default)]
struct TypeFlags {
    external: bool,
    shareable: bool,
}

struct Extractor<'a> {
    subgraph: &'a Subgraph,
    directives: DirectiveParser<'a>,
    root_names: IndexMap<String, String>,
    types: IndexMap<String, ExtractedType>,
    errors: &'a mut Vec<CompositionError>,
}

/// Extract the types of one subgraph, pushing any problem to `errors`.
pub(crate) fn extract_subgraph(
    subgraph: &Subgraph,
    errors: &mut Vec<CompositionError>,
) -> ExtractedSubgraph {
    let document = &subgraph.type_defs;
    let mut extractor = Extractor {
        subgraph,
        directives: DirectiveParser::new(&subgraph.name, document),
        root_names: root_operation_names(document),
        types: IndexMap::new(),
        errors,
    };
    for definition in &document.definitions {
        extractor.definition(definition);
    }
    extractor.validate_field_sets();
    ExtractedSubgraph {
        name: subgraph.name.clone(),
        types: extractor.types,
    }
}

/// Maps custom root type names (`schema { query: RootQuery }`) to the
/// default ones.
fn root_operation_names(document: &ast::Document) -> IndexMap<String, String> {
    let mut names = IndexMap::new();
    for definition in &document.definitions {
        let root_operations = match definition {
            ast::Definition::SchemaDefinition(schema) => &schema.root_operations,
            ast::Definition::SchemaExtension(schema) => &schema.root_operations,
            _ => continue,
        };
        for root_operation in root_operations {
            let (operation_type, type_name) = &**root_operation;
            let default_name = match operation_type {
                ast::OperationType::Query => "Query",
                ast::OperationType::Mutation => "Mutation",
                ast::OperationType::Subscription => "Subscription",
            };
            names.insert(type_name.to_string(), default_name.to_string());
        }
    }
    names
}

fn is_federation_type(name: &str) -> bool {
    name.starts_with('_')
        || name.starts_with("link__")
        || name.starts_with("federation__")
        || name.starts_with("join__")
        || name == "FieldSet"
}

impl Extractor<'_> {
    fn type_name(&self, name: &str) -> String {
        self.root_names
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn type_ref(&self, ty: &TypeRef) -> TypeRef {
        match ty {
            TypeRef::Named(name) => TypeRef::Named(self.type_name(name)),
            TypeRef::List(inner) => TypeRef::List(Box::new(self.type_ref(inner))),
            TypeRef::NonNull(inner) => TypeRef::NonNull(Box::new(self.type_ref(inner))),
        }
    }

    fn error(&mut self, code: CompositionErrorCode, message: String) -> &mut CompositionError {
        self.errors
            .push(CompositionError::new(code, &self.subgraph.name, message));
        let last = self.errors.len() - 1;
        &mut self.errors[last]
    }

    fn definition(&mut self, definition: &ast::Definition) {
        match definition {
            ast::Definition::ObjectTypeDefinition(object) => self.composite(
                &object.name,
                TypeKind::Object,
                &object.directives,
                &object.implements_interfaces,
                &object.fields,
            ),
            ast::Definition::ObjectTypeExtension(object) => self.composite(
                &object.name,
                TypeKind::Object,
                &object.directives,
                &object.implements_interfaces,
                &object.fields,
            ),
            ast::Definition::InterfaceTypeDefinition(interface) => self.composite(
                &interface.name,
                TypeKind::Interface,
                &interface.directives,
                &interface.implements_interfaces,
                &interface.fields,
            ),
            ast::Definition::InterfaceTypeExtension(interface) => self.composite(
                &interface.name,
                TypeKind::Interface,
                &interface.directives,
                &interface.implements_interfaces,
                &interface.fields,
            ),
            ast::Definition::UnionTypeDefinition(union_) => {
                self.union_type(&union_.name, &union_.directives, &union_.members)
            }
            ast::Definition::UnionTypeExtension(union_) => {
                self.union_type(&union_.name, &union_.directives, &union_.members)
            }
            ast::Definition::EnumTypeDefinition(enum_) => {
                self.enum_type(&enum_.name, &enum_.directives, &enum_.values)
            }
            ast::Definition::EnumTypeExtension(enum_) => {
                self.enum_type(&enum_.name, &enum_.directives, &enum_.values)
            }
            ast::Definition::InputObjectTypeDefinition(input) => {
                self.input_type(&input.name, &input.directives, &input.fields)
            }
            ast::Definition::InputObjectTypeExtension(input) => {
                self.input_type(&input.name, &input.directives, &input.fields)
            }
            ast::Definition::ScalarTypeDefinition(scalar) => {
                self.scalar_type(&scalar.name, &scalar.directives)
            }
            ast::Definition::ScalarTypeExtension(scalar) => {
                self.scalar_type(&scalar.name, &scalar.directives)
            }
            ast::Definition::OperationDefinition(_) | ast::Definition::FragmentDefinition(_) => {
                let name = self.subgraph.name.clone();
                self.error(
                    CompositionErrorCode::InvalidGraphQL,
                    format!("subgraph \"{name}\" contains an executable definition"),
                );
            }
            ast::Definition::DirectiveDefinition(_)
            | ast::Definition::SchemaDefinition(_)
            | ast::Definition::SchemaExtension(_) => {}
        }
    }

    /// Get or create the type, checking its kind against earlier
    /// definitions and extensions in the same subgraph.
    fn entry(&mut self, raw_name: &str, kind: TypeKind) -> Option<String> {
        if is_federation_type(raw_name) {
            return None;
        }
        let name = self.type_name(raw_name);
        if let Some(existing) = self.types.get(&name) {
            if existing.kind != kind {
                let message = format!(
                    "type \"{name}\" is declared both as {} and as {kind}",
                    existing.kind
                );
                self.error(CompositionErrorCode::TypeKindMismatch, message)
                    .type_name = Some(name);
                return None;
            }
        } else {
            self.types
                .insert(name.clone(), ExtractedType::new(name.clone(), kind));
        }
        Some(name)
    }

    fn type_directives(
        &mut self,
        name: &str,
        directives: &ast::DirectiveList,
    ) -> Vec<FederationDirective> {
        self.directives
            .parse(directives, DirectiveLocation::Type, name, None, self.errors)
    }

    fn composite(
        &mut self,
        raw_name: &str,
        kind: TypeKind,
        directives: &ast::DirectiveList,
        interfaces: &[Name],
        fields: &[Node<ast::FieldDefinition>],
    ) {
        let Some(name) = self.entry(raw_name, kind) else {
            return;
        };
        let mut flags = TypeFlags::default();
        let mut keys = Vec::new();
        for directive in self.type_directives(&name, directives) {
            match directive {
                FederationDirective::Key { fields, resolvable } => {
                    keys.push(EntityKey { fields, resolvable })
                }
                FederationDirective::External => flags.external = true,
                FederationDirective::Shareable => flags.shareable = true,
                // location checks reject the field-only directives
                FederationDirective::Requires { .. }
                | FederationDirective::Provides { .. }
                | FederationDirective::Override { .. } => {}
            }
        }

        let mut extracted = Vec::new();
        for field in fields {
            if name == "Query" && FEDERATION_ROOT_FIELDS.contains(&field.name.as_str()) {
                continue;
            }
            extracted.push(self.field(&name, field, &flags));
        }

        let interfaces: Vec<String> = interfaces
            .iter()
            .map(|interface| self.type_name(interface))
            .collect();
        let mut duplicates = Vec::new();
        if let Some(ty) = self.types.get_mut(&name) {
            ty.keys.extend(keys);
            for interface in interfaces {
                if !ty.interfaces.contains(&interface) {
                    ty.interfaces.push(interface);
                }
            }
            for field in extracted {
                if ty.fields.contains_key(&field.name) {
                    duplicates.push(field.name);
                } else {
                    ty.fields.insert(field.name.clone(), field);
                }
            }
        }
        for field_name in duplicates {
            let error = self.error(
                CompositionErrorCode::InvalidGraphQL,
                format!("field \"{name}.{field_name}\" is declared more than once"),
            );
            error.type_name = Some(name.clone());
            error.field_name = Some(field_name);
        }
    }

    fn field(
        &mut self,
        type_name: &str,
        field: &ast::FieldDefinition,
        flags: &TypeFlags,
    ) -> ExtractedField {
        let field_name = field.name.to_string();
        let mut extracted = ExtractedField {
            name: field_name.clone(),
            ty: self.type_ref(&TypeRef::from(&field.ty)),
            arguments: field
                .arguments
                .iter()
                .map(|argument| ArgumentDefinition::from(&**argument))
                .collect(),
            external: flags.external,
            shareable: flags.shareable,
            requires: None,
            provides: None,
            override_from: None,
        };
        let directives = self.directives.parse(
            &field.directives,
            DirectiveLocation::Field,
            type_name,
            Some(field_name.as_str()),
            self.errors,
        );
        let mut invalid = Vec::new();
        for directive in directives {
            match directive {
                FederationDirective::External => extracted.external = true,
                FederationDirective::Shareable => extracted.shareable = true,
                FederationDirective::Requires { fields } => {
                    if extracted.requires.replace(fields).is_some() {
                        invalid.push("\"@requires\" is repeated".to_string());
                    }
                }
                FederationDirective::Provides { fields } => {
                    if extracted.provides.replace(fields).is_some() {
                        invalid.push("\"@provides\" is repeated".to_string());
                    }
                }
                FederationDirective::Override { from } => {
                    if from == self.subgraph.name {
                        invalid.push(format!(
                            "field \"{type_name}.{field_name}\" cannot override its own subgraph \"{from}\""
                        ));
                    } else if extracted.override_from.replace(from).is_some() {
                        invalid.push("\"@override\" is repeated".to_string());
                    }
                }
                FederationDirective::Key { .. } => {}
            }
        }
        if extracted.external && extracted.override_from.is_some() {
            invalid.push(format!(
                "field \"{type_name}.{field_name}\" is @external and cannot use @override"
            ));
            extracted.override_from = None;
        }
        for message in invalid {
            let error = self.error(CompositionErrorCode::InvalidDirective, message);
            error.type_name = Some(type_name.to_string());
            error.field_name = Some(field_name.clone());
        }
        extracted
    }

    fn union_type(
        &mut self,
        raw_name: &str,
        directives: &ast::DirectiveList,
        members: &[ast::NamedType],
    ) {
        let Some(name) = self.entry(raw_name, TypeKind::Union) else {
            return;
        };
        self.type_directives(&name, directives);
        let members: Vec<String> = members.iter().map(|member| self.type_name(member)).collect();
        if let Some(ty) = self.types.get_mut(&name) {
            for member in members {
                if !ty.members.contains(&member) {
                    ty.members.push(member);
                }
            }
        }
    }

    fn enum_type(
        &mut self,
        raw_name: &str,
        directives: &ast::DirectiveList,
        values: &[Node<ast::EnumValueDefinition>],
    ) {
        let Some(name) = self.entry(raw_name, TypeKind::Enum) else {
            return;
        };
        self.type_directives(&name, directives);
        if let Some(ty) = self.types.get_mut(&name) {
            for value in values {
                let value = value.value.to_string();
                if !ty.enum_values.contains(&value) {
                    ty.enum_values.push(value);
                }
            }
        }
    }

    fn input_type(
        &mut self,
        raw_name: &str,
        directives: &ast::DirectiveList,
        fields: &[Node<ast::InputValueDefinition>],
    ) {
        let Some(name) = self.entry(raw_name, TypeKind::InputObject) else {
            return;
        };
        self.type_directives(&name, directives);
        if let Some(ty) = self.types.get_mut(&name) {
            for field in fields {
                ty.input_fields
                    .entry(field.name.to_string())
                    .or_insert_with(|| ArgumentDefinition::from(&**field));
            }
        }
    }

    fn scalar_type(&mut self, raw_name: &str, directives: &ast::DirectiveList) {
        if let Some(name) = self.entry(raw_name, TypeKind::Scalar) {
            self.type_directives(&name, directives);
        }
    }

    /// Check the field sets of `@key`, `@requires` and `@provides` against
    /// the types of this subgraph.
    fn validate_field_sets(&mut self) {
        let mut invalid = Vec::new();
        for ty in self.types.values() {
            for key in &ty.keys {
                for item in key.fields.iter() {
                    if !ty.fields.contains_key(&item.name) {
                        invalid.push((
                            ty.name.clone(),
                            None,
                            format!(
                                "@key(fields: \"{}\") on \"{}\" selects undefined field \"{}\"",
                                key.fields, ty.name, item.name
                            ),
                        ));
                    }
                }
            }
            for field in ty.fields.values() {
                if let Some(requires) = &field.requires {
                    for item in requires.iter() {
                        let message = match ty.fields.get(&item.name) {
                            None => format!(
                                "@requires(fields: \"{requires}\") on \"{}.{}\" selects undefined field \"{}\"",
                                ty.name, field.name, item.name
                            ),
                            Some(required) if !required.external => format!(
                                "@requires(fields: \"{requires}\") on \"{}.{}\" selects \"{}\", which is not @external",
                                ty.name, field.name, item.name
                            ),
                            Some(_) => continue,
                        };
                        invalid.push((ty.name.clone(), Some(field.name.clone()), message));
                    }
                }
                if let Some(provides) = &field.provides {
                    let returned = self.types.get(field.ty.named_type());
                    let message = match returned {
                        Some(returned) if returned.kind.is_composite() => provides
                            .iter()
                            .find(|item| !returned.fields.contains_key(&item.name))
                            .map(|item| {
                                format!(
                                    "@provides(fields: \"{provides}\") on \"{}.{}\" selects undefined field \"{}\"",
                                    ty.name, field.name, item.name
                                )
                            }),
                        _ => Some(format!(
                            "@provides on \"{}.{}\" requires a composite return type declared in the subgraph",
                            ty.name, field.name
                        )),
                    };
                    if let Some(message) = message {
                        invalid.push((ty.name.clone(), Some(field.name.clone()), message));
                    }
                }
            }
        }
        for (type_name, field_name, message) in invalid {
            let error = self.error(CompositionErrorCode::InvalidDirective, message);
            error.type_name = Some(type_name);
            error.field_name = field_name;
        }
    }
}
