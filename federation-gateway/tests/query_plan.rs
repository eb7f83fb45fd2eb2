use std::sync::Arc;

use federation_gateway::compose;
use federation_gateway::error::PlanningError;
use federation_gateway::execution::ExecutionOptions;
use federation_gateway::query_planner::OperationKind;
use federation_gateway::query_planner::QueryPlanner;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::support::abc;
use crate::support::compose_schemas;
use crate::support::gateway;
use crate::support::subgraphs;

fn abc_planner() -> QueryPlanner {
    QueryPlanner::new(Arc::new(compose(&abc()).unwrap()))
}

#[test]
fn requires_supplier_precedes_the_dependent_fetch() {
    let plan = abc_planner()
        .plan(r#"{ product(id: "1") { id creditCardNumber paymentReceipt } }"#, None)
        .unwrap();
    assert_eq!(plan.services(), vec!["a", "c"]);

    let supplier = &plan.nodes[0];
    assert_eq!(supplier.service_name, "a");
    assert!(!supplier.is_entity_fetch());
    assert!(supplier.operation.contains("creditCardNumber"));
    assert!(supplier.operation.contains("__typename"));
    assert_eq!(supplier.output_keys, vec!["product".to_string()]);

    let dependent = &plan.nodes[1];
    assert_eq!(dependent.service_name, "c");
    assert_eq!(dependent.depends_on, vec![0]);
    assert_eq!(dependent.merge_path.to_string(), "product");
    assert_eq!(
        dependent.operation,
        "query($representations: [_Any!]!) { _entities(representations: $representations) { ... on Product { paymentReceipt } } }"
    );
    assert_eq!(
        serde_json::to_value(&dependent.requires).unwrap(),
        json!([{
            "kind": "InlineFragment",
            "typeCondition": "Product",
            "selections": [
                {"kind": "Field", "name": "__typename"},
                {"kind": "Field", "name": "id"},
                {"kind": "Field", "name": "creditCardNumber"}
            ]
        }])
    );
    assert_eq!(dependent.output_keys, vec!["paymentReceipt".to_string()]);
}

#[test]
fn plans_serialize_as_camel_case() {
    let plan = abc_planner()
        .plan(r#"query Receipt { product(id: "1") { paymentReceipt } }"#, None)
        .unwrap();
    let serialized = serde_json::to_value(&plan).unwrap();
    let node = &serialized["nodes"][1];
    assert_eq!(node["serviceName"], json!("c"));
    assert_eq!(node["operationKind"], json!("query"));
    assert_eq!(node["operationName"], json!("Receipt__c__1"));
    assert_eq!(node["mergePath"], json!(["product"]));
    assert_eq!(node["dependsOn"], json!([0]));
}

#[test]
fn one_fetch_per_subgraph_when_fields_are_local() {
    let plan = abc_planner()
        .plan(r#"{ product(id: "1") { id creditCardNumber } }"#, None)
        .unwrap();
    assert_eq!(plan.nodes.len(), 1);
    assert_eq!(
        plan.nodes[0].operation,
        r#"query { product(id: "1") { id creditCardNumber } }"#
    );
}

#[test]
fn variables_are_forwarded_where_used() {
    let plan = abc_planner()
        .plan(
            "query ($id: ID!) { product(id: $id) { paymentReceipt } }",
            None,
        )
        .unwrap();
    assert_eq!(plan.nodes[0].variable_usages, vec!["id".to_string()]);
    assert!(plan.nodes[0].operation.starts_with("query($id: ID!)"));
    assert!(plan.nodes[1].variable_usages.is_empty());
}

#[test]
fn added_fields_do_not_clash_with_client_aliases() {
    let plan = abc_planner()
        .plan(
            r#"{ product(id: "1") { creditCardNumber: id paymentReceipt } }"#,
            None,
        )
        .unwrap();
    assert_eq!(
        plan.nodes[0].operation,
        r#"query { product(id: "1") { creditCardNumber: id __fedgw_creditCardNumber: creditCardNumber __typename id } }"#
    );
    assert_eq!(
        serde_json::to_value(&plan.nodes[1].requires).unwrap(),
        json!([{
            "kind": "InlineFragment",
            "typeCondition": "Product",
            "selections": [
                {"kind": "Field", "name": "__typename"},
                {"kind": "Field", "name": "id"},
                {"kind": "Field", "alias": "__fedgw_creditCardNumber", "name": "creditCardNumber"}
            ]
        }])
    );
}

#[test]
fn mutation_fields_run_in_order() {
    let supergraph = compose_schemas(&[
        (
            "accounts",
            "type Query { me: String } type Mutation { login: String logout: String }",
        ),
        ("cart", "type Mutation { addItem: Int clear: Int }"),
    ])
    .unwrap();
    let plan = QueryPlanner::new(Arc::new(supergraph))
        .plan("mutation { login addItem clear logout }", None)
        .unwrap();
    let services: Vec<&str> = plan
        .nodes
        .iter()
        .map(|node| node.service_name.as_str())
        .collect();
    assert_eq!(services, vec!["accounts", "cart", "accounts"]);
    assert!(plan.nodes.iter().all(|node| node.operation_kind == OperationKind::Mutation));
    assert_eq!(plan.nodes[1].output_keys, vec!["addItem".to_string(), "clear".to_string()]);
    assert_eq!(plan.nodes[1].depends_on, vec![0]);
    assert_eq!(plan.nodes[2].depends_on, vec![0, 1]);
}

#[test]
fn invalid_operations_are_rejected() {
    let planner = abc_planner();
    assert_eq!(
        planner.plan("{ product(id: \"1\") { price } }", None).unwrap_err(),
        PlanningError::UnknownField {
            type_name: "Product".to_string(),
            field_name: "price".to_string(),
        }
    );
    assert_eq!(
        planner.plan("query A { product(id: \"1\") { id } } query B { product(id: \"2\") { id } }", None)
            .unwrap_err(),
        PlanningError::AmbiguousOperation
    );
    assert_eq!(
        planner.plan("{ product(id: \"1\") { id } }", Some("C")).unwrap_err(),
        PlanningError::UnknownOperation("C".to_string())
    );
    assert_eq!(
        planner.plan("{ product(id: ", None).unwrap_err().code(),
        "GRAPHQL_PARSE_FAILED"
    );
    assert_eq!(
        planner.plan("subscription { product(id: \"1\") { id } }", None).unwrap_err(),
        PlanningError::UnsupportedOperation("subscription".to_string())
    );
}

#[tokio::test]
async fn the_plan_cache_shares_equivalent_plans() {
    let gateway = gateway(&subgraphs(&[("a", crate::support::A)]), &[], ExecutionOptions::default());
    let first = gateway
        .plan(
            "query { product(id: \"1\") { ...Card } } fragment Card on Product { creditCardNumber }",
            None,
        )
        .await
        .unwrap();
    let second = gateway
        .plan("{\n  product(id: \"1\") {\n    ... on Product { creditCardNumber }\n  }\n}", None)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}
