use federation_gateway::compose;
use federation_gateway::error::CompositionErrorCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::support::A;
use crate::support::B;
use crate::support::C;
use crate::support::abc;
use crate::support::compose_schemas;

#[test]
fn override_moves_ownership_to_the_overriding_subgraph() {
    let supergraph = compose(&abc()).unwrap();
    assert_eq!(supergraph.owner("Product", "paymentReceipt"), Some("c"));
    assert_eq!(supergraph.owner("Product", "creditCardNumber"), Some("a"));
    assert_eq!(supergraph.owner("Query", "product"), Some("a"));

    let receipt = supergraph.field("Product", "paymentReceipt").unwrap();
    assert_eq!(receipt.resolvable_in, vec!["c".to_string()]);
    assert_eq!(receipt.override_from.as_deref(), Some("b"));
    assert_eq!(
        receipt.requires.as_ref().map(ToString::to_string).as_deref(),
        Some("creditCardNumber")
    );
    assert!(supergraph.sdl().contains(r#"override: "b""#));
}

#[test]
fn every_field_has_one_owner() {
    let supergraph = compose(&abc()).unwrap();
    for (coordinate, owner) in supergraph.ownership() {
        assert!(
            ["a", "c"].contains(&owner),
            "{coordinate} is owned by {owner}"
        );
    }
    assert!(
        supergraph
            .ownership()
            .all(|(_, owner)| owner != "b")
    );
}

#[test]
fn composition_is_deterministic() {
    let first = compose(&abc()).unwrap();
    let second = compose(&abc()).unwrap();
    assert_eq!(first.sdl(), second.sdl());

    let broken = [
        ("a", "type Query { product: Product } type Product { name: String }"),
        ("b", "type Product { name: String price: Int @requires(fields: \"name\") }"),
        ("c", "type Product { name: String }"),
    ];
    let first = compose_schemas(&broken).unwrap_err();
    let second = compose_schemas(&broken).unwrap_err();
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn duplicate_fields_without_override_are_ambiguous() {
    let errors = compose_schemas(&[
        (
            "a",
            r#"type Query { product: Product } type Product @key(fields: "id") { id: ID! name: String }"#,
        ),
        (
            "b",
            r#"type Product @key(fields: "id") { id: ID! name: String }"#,
        ),
    ])
    .unwrap_err();
    assert_eq!(errors.codes(), vec![CompositionErrorCode::FieldOwnershipAmbiguous]);
    let error = errors.iter().next().unwrap();
    assert!(error.message.contains("\"a\""), "{}", error.message);
    assert!(error.message.contains("\"b\""), "{}", error.message);
    assert_eq!(
        serde_json::to_value(error).unwrap()["fieldName"],
        json!("name")
    );
}

#[test]
fn shareable_fields_compose() {
    let supergraph = compose_schemas(&[
        (
            "a",
            r#"type Query { product: Product } type Product @key(fields: "id") { id: ID! name: String @shareable }"#,
        ),
        (
            "b",
            r#"type Product @key(fields: "id") { id: ID! name: String @shareable }"#,
        ),
    ])
    .unwrap();
    let name = supergraph.field("Product", "name").unwrap();
    assert_eq!(name.owner, "a");
    assert_eq!(name.resolvable_in, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn override_cycles_are_requires_cycles() {
    let errors = compose_schemas(&[
        (
            "a",
            r#"type Query { product: Product } type Product @key(fields: "id") { id: ID! name: String @override(from: "b") }"#,
        ),
        (
            "b",
            r#"type Product @key(fields: "id") { id: ID! name: String @override(from: "a") }"#,
        ),
    ])
    .unwrap_err();
    assert!(errors.codes().contains(&CompositionErrorCode::RequiresCycle));
}

#[test]
fn requires_cycles_across_subgraphs() {
    let errors = compose_schemas(&[
        (
            "a",
            r#"type Query { product: Product }
            type Product @key(fields: "id") { id: ID! x: String @external y: String @requires(fields: "x") }"#,
        ),
        (
            "b",
            r#"type Product @key(fields: "id") { id: ID! y: String @external x: String @requires(fields: "y") }"#,
        ),
    ])
    .unwrap_err();
    assert_eq!(errors.codes(), vec![CompositionErrorCode::RequiresCycle]);
}

#[test]
fn external_fields_need_a_resolver() {
    let errors = compose_schemas(&[
        ("a", A),
        (
            "b",
            r#"type Product @key(fields: "id") { id: ID! weight: Int @external shipping: Int @requires(fields: "weight") }"#,
        ),
    ])
    .unwrap_err();
    assert!(errors.codes().contains(&CompositionErrorCode::ExternalUnresolvable));
}

#[test]
fn entity_keys_must_match() {
    let errors = compose_schemas(&[
        ("a", A),
        (
            "c",
            r#"type Product @key(fields: "creditCardNumber") { creditCardNumber: String @external receipt: String }"#,
        ),
    ])
    .unwrap_err();
    assert!(errors.codes().contains(&CompositionErrorCode::KeyMismatch));
}

#[test]
fn errors_are_collected_together() {
    let errors = compose_schemas(&[
        ("a", A),
        ("b", B),
        ("c", C),
        ("d", r#"type Product @key(fields: "sku") { id: ID! }"#),
    ])
    .unwrap_err();
    let codes = errors.codes();
    assert!(codes.contains(&CompositionErrorCode::InvalidDirective), "{codes:?}");
    assert!(codes.contains(&CompositionErrorCode::FieldOwnershipAmbiguous), "{codes:?}");
}
