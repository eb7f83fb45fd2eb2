//! Prints the composed schema with `join__` directives recording which
//! subgraph resolves what.

use std::fmt::Write;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::schema::TypeKind;
use crate::supergraph::SubgraphInfo;
use crate::supergraph::SupergraphField;
use crate::supergraph::SupergraphType;

const JOIN_DEFINITIONS: &str = r#"directive @join__field(graph: join__Graph, requires: join__FieldSet, provides: join__FieldSet, type: String, external: Boolean, override: String) repeatable on FIELD_DEFINITION | INPUT_FIELD_DEFINITION

directive @join__graph(name: String!, url: String!) on ENUM_VALUE

directive @join__type(graph: join__Graph!, key: join__FieldSet, extension: Boolean! = false, resolvable: Boolean! = true) repeatable on OBJECT | INTERFACE | UNION | ENUM | INPUT_OBJECT | SCALAR

directive @link(url: String, as: String, for: link__Purpose, import: [link__Import]) repeatable on SCHEMA

scalar join__FieldSet

scalar link__Import

enum link__Purpose {
  SECURITY
  EXECUTION
}
"#;

/// Assigns every subgraph a `join__Graph` enum value.
pub(crate) struct GraphNames(IndexMap<String, String>);

impl GraphNames {
    pub(crate) fn new<'a>(subgraphs: impl Iterator<Item = &'a SubgraphInfo>) -> Self {
        let mut names: IndexMap<String, String> = IndexMap::new();
        for subgraph in subgraphs {
            let mut base: String = subgraph
                .name
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect();
            if base.is_empty() || base.starts_with(|c: char| c.is_ascii_digit()) {
                base.insert(0, '_');
            }
            let mut candidate = base.clone();
            let mut suffix = 1;
            while names.values().any(|existing| *existing == candidate) {
                suffix += 1;
                candidate = format!("{base}_{suffix}");
            }
            names.insert(subgraph.name.clone(), candidate);
        }
        GraphNames(names)
    }

    fn get<'a>(&'a self, subgraph: &'a str) -> &'a str {
        self.0.get(subgraph).map(String::as_str).unwrap_or(subgraph)
    }
}

pub(crate) fn print_supergraph(
    subgraphs: &IndexMap<String, SubgraphInfo>,
    types: &IndexMap<String, SupergraphType>,
    query_type: &str,
    mutation_type: Option<&str>,
) -> String {
    let graphs = GraphNames::new(subgraphs.values());
    let mut out = String::new();

    out.push_str("schema\n");
    out.push_str("  @link(url: \"https://specs.apollo.dev/link/v1.0\")\n");
    out.push_str("  @link(url: \"https://specs.apollo.dev/join/v0.3\", for: EXECUTION)\n");
    out.push_str("{\n");
    let _ = writeln!(out, "  query: {query_type}");
    if let Some(mutation_type) = mutation_type {
        let _ = writeln!(out, "  mutation: {mutation_type}");
    }
    out.push_str("}\n\n");
    out.push_str(JOIN_DEFINITIONS);

    out.push_str("\nenum join__Graph {\n");
    for subgraph in subgraphs.values() {
        let _ = writeln!(
            out,
            "  {} @join__graph(name: {}, url: {})",
            graphs.get(&subgraph.name),
            quote(&subgraph.name),
            quote(&subgraph.url)
        );
    }
    out.push_str("}\n");

    for ty in types.values() {
        out.push('\n');
        print_type(&mut out, &graphs, ty);
    }
    out
}

fn print_type(out: &mut String, graphs: &GraphNames, ty: &SupergraphType) {
    out.push_str(ty.kind.sdl_keyword());
    out.push(' ');
    out.push_str(&ty.name);
    if !ty.interfaces.is_empty() {
        let _ = write!(out, " implements {}", ty.interfaces.join(" & "));
    }
    for subgraph in &ty.declared_in {
        let graph = graphs.get(subgraph);
        match ty.keys.get(subgraph) {
            Some(keys) => {
                for key in keys {
                    let _ = write!(
                        out,
                        "\n  @join__type(graph: {graph}, key: {}",
                        quote(&key.fields.to_string())
                    );
                    if !key.resolvable {
                        out.push_str(", resolvable: false");
                    }
                    out.push(')');
                }
            }
            None => {
                let _ = write!(out, "\n  @join__type(graph: {graph})");
            }
        }
    }

    match ty.kind {
        TypeKind::Object | TypeKind::Interface => {
            out.push_str("\n{\n");
            for field in ty.fields.values() {
                print_field(out, graphs, ty, field);
            }
            out.push_str("}\n");
        }
        TypeKind::Union => {
            let _ = writeln!(out, " = {}", ty.members.join(" | "));
        }
        TypeKind::Enum => {
            out.push_str("\n{\n");
            for value in &ty.enum_values {
                let _ = writeln!(out, "  {value}");
            }
            out.push_str("}\n");
        }
        TypeKind::InputObject => {
            out.push_str("\n{\n");
            for field in ty.input_fields.values() {
                let _ = writeln!(out, "  {field}");
            }
            out.push_str("}\n");
        }
        TypeKind::Scalar => out.push('\n'),
    }
}

fn print_field(out: &mut String, graphs: &GraphNames, ty: &SupergraphType, field: &SupergraphField) {
    let _ = write!(out, "  {}", field.name);
    if !field.arguments.is_empty() {
        let _ = write!(out, "({})", field.arguments.iter().join(", "));
    }
    let _ = write!(out, ": {}", field.ty);

    // every declaring subgraph resolves the field: no annotation needed
    let everywhere = field.external_in.is_empty()
        && field.requires.is_none()
        && field.provides.is_empty()
        && field.override_from.is_none()
        && ty.declared_in.len() == field.resolvable_in.len();
    if !everywhere {
        for subgraph in &field.resolvable_in {
            let _ = write!(out, " @join__field(graph: {}", graphs.get(subgraph));
            if *subgraph == field.owner {
                if let Some(requires) = &field.requires {
                    let _ = write!(out, ", requires: {}", quote(&requires.to_string()));
                }
                if let Some(from) = &field.override_from {
                    let _ = write!(out, ", override: {}", quote(from));
                }
            }
            if let Some(provides) = field.provides.get(subgraph) {
                let _ = write!(out, ", provides: {}", quote(&provides.to_string()));
            }
            out.push(')');
        }
        for subgraph in &field.external_in {
            let _ = write!(
                out,
                " @join__field(graph: {}, external: true)",
                graphs.get(subgraph)
            );
        }
    }
    out.push('\n');
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
