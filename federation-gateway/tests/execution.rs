use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use federation_gateway::execution::ExecutionOptions;
use federation_gateway::graphql;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;

use crate::support::MockSubgraph;
use crate::support::abc;
use crate::support::gateway;
use crate::support::subgraphs;

const QUERY: &str = r#"{ product(id: "1") { id creditCardNumber paymentReceipt } }"#;

fn product_service() -> Arc<MockSubgraph> {
    MockSubgraph::responding(json!({
        "data": {"product": {"__typename": "Product", "id": "1", "creditCardNumber": "4111"}}
    }))
}

/// Issues a receipt for every representation, from its card number.
fn receipt_service(delay: Duration) -> Arc<MockSubgraph> {
    MockSubgraph::delayed(delay, |request| {
        let entities: Vec<Value> = request.variables["representations"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|representation| {
                json!({"paymentReceipt": format!("paid with {}", representation["creditCardNumber"].as_str().unwrap_or("?"))})
            })
            .collect();
        Ok(json!({"data": {"_entities": entities}}))
    })
}

fn error_paths(response: &graphql::Response) -> Vec<String> {
    response
        .errors
        .iter()
        .map(|error| {
            error
                .path
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default()
        })
        .collect()
}

#[tokio::test]
async fn required_fields_travel_to_the_overriding_subgraph() {
    let (a, b, c) = (
        product_service(),
        MockSubgraph::responding(json!({"data": null})),
        receipt_service(Duration::ZERO),
    );
    let gateway = gateway(
        &abc(),
        &[("a", a.clone()), ("b", b.clone()), ("c", c.clone())],
        ExecutionOptions::default(),
    );

    let response = gateway.execute(graphql::Request::new(QUERY)).await;
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"data": {"product": {
            "id": "1",
            "creditCardNumber": "4111",
            "paymentReceipt": "paid with 4111"
        }}})
    );

    assert_eq!(a.requests().len(), 1);
    assert!(b.requests().is_empty());
    let requests = c.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].variables["representations"],
        json!([{"__typename": "Product", "id": "1", "creditCardNumber": "4111"}])
    );
}

#[tokio::test]
async fn dependent_fetch_timing_out_only_nulls_its_field() {
    let gateway = gateway(
        &abc(),
        &[
            ("a", product_service()),
            ("b", MockSubgraph::responding(json!({"data": null}))),
            ("c", receipt_service(Duration::from_secs(5))),
        ],
        ExecutionOptions {
            subgraph_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );

    let response = gateway.execute(graphql::Request::new(QUERY)).await;
    assert_eq!(
        response.data,
        Some(json!({"product": {"id": "1", "creditCardNumber": "4111", "paymentReceipt": null}}))
    );
    assert_eq!(error_paths(&response), vec!["product/paymentReceipt"]);
    assert_eq!(
        serde_json::to_value(&response.errors[0]).unwrap()["path"],
        json!(["product", "paymentReceipt"])
    );
    assert_eq!(response.errors[0].code(), Some("SUBREQUEST_TIMEOUT"));
    assert_eq!(response.errors[0].extensions["service"], json!("c"));
}

#[tokio::test]
async fn request_deadline_with_partial_results() {
    let gateway = gateway(
        &abc(),
        &[
            ("a", product_service()),
            ("b", MockSubgraph::responding(json!({"data": null}))),
            ("c", receipt_service(Duration::from_secs(5))),
        ],
        ExecutionOptions {
            timeout: Some(Duration::from_millis(100)),
            partial_results: true,
            ..Default::default()
        },
    );

    let response = gateway.execute(graphql::Request::new(QUERY)).await;
    assert_eq!(
        response.data,
        Some(json!({"product": {"id": "1", "creditCardNumber": "4111", "paymentReceipt": null}}))
    );
    assert_eq!(error_paths(&response), vec!["product/paymentReceipt"]);
    assert_eq!(response.errors[0].code(), Some("REQUEST_TIMEOUT"));
}

#[tokio::test]
async fn request_deadline_without_partial_results_fails_the_response() {
    let gateway = gateway(
        &abc(),
        &[
            ("a", product_service()),
            ("b", MockSubgraph::responding(json!({"data": null}))),
            ("c", receipt_service(Duration::from_secs(5))),
        ],
        ExecutionOptions {
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        },
    );

    let response = gateway.execute(graphql::Request::new(QUERY)).await;
    assert_eq!(response.data, None);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].code(), Some("REQUEST_TIMEOUT"));
}

#[tokio::test]
async fn a_killed_subgraph_does_not_block_unaffected_fields() {
    let schemas = subgraphs(&[
        ("a", crate::support::A),
        ("b", crate::support::B),
        ("c", crate::support::C),
        ("status", "type Query { status: String }"),
    ]);
    let c = receipt_service(Duration::ZERO);
    let gateway = gateway(
        &schemas,
        &[
            ("a", MockSubgraph::down("a")),
            ("b", MockSubgraph::responding(json!({"data": null}))),
            ("c", c.clone()),
            ("status", MockSubgraph::responding(json!({"data": {"status": "ok"}}))),
        ],
        ExecutionOptions::default(),
    );

    let response = gateway
        .execute(graphql::Request::new(
            r#"{ product(id: "1") { id paymentReceipt } status }"#,
        ))
        .await;
    assert_eq!(response.data, Some(json!({"product": null, "status": "ok"})));
    assert_eq!(error_paths(&response), vec!["product"]);
    assert_eq!(response.errors[0].code(), Some("SUBREQUEST_HTTP_ERROR"));
    assert!(c.requests().is_empty());
}

#[tokio::test]
async fn a_killed_dependent_subgraph_keeps_the_supplied_fields() {
    let gateway = gateway(
        &abc(),
        &[
            ("a", product_service()),
            ("b", MockSubgraph::responding(json!({"data": null}))),
            ("c", MockSubgraph::down("c")),
        ],
        ExecutionOptions::default(),
    );

    let response = gateway.execute(graphql::Request::new(QUERY)).await;
    assert_eq!(
        response.data,
        Some(json!({"product": {"id": "1", "creditCardNumber": "4111", "paymentReceipt": null}}))
    );
    assert_eq!(error_paths(&response), vec!["product/paymentReceipt"]);
    assert_eq!(response.errors[0].code(), Some("SUBREQUEST_HTTP_ERROR"));
}

#[tokio::test]
async fn missing_required_data_skips_the_dependent_fetch() {
    let c = receipt_service(Duration::ZERO);
    let gateway = gateway(
        &abc(),
        &[
            (
                "a",
                MockSubgraph::responding(json!({
                    "data": {"product": {"__typename": "Product", "id": "1"}},
                    "errors": [{"message": "card vault unavailable", "path": ["product", "creditCardNumber"]}]
                })),
            ),
            ("b", MockSubgraph::responding(json!({"data": null}))),
            ("c", c.clone()),
        ],
        ExecutionOptions::default(),
    );

    let response = gateway.execute(graphql::Request::new(QUERY)).await;
    assert_eq!(
        response.data,
        Some(json!({"product": {"id": "1", "creditCardNumber": null, "paymentReceipt": null}}))
    );
    assert_eq!(
        error_paths(&response),
        vec!["product/creditCardNumber", "product/paymentReceipt"]
    );
    assert_eq!(response.errors[0].extensions["service"], json!("a"));
    assert_eq!(response.errors[1].code(), Some("EXECUTION_MISSING_REQUIREMENTS"));
    assert!(c.requests().is_empty());
}

#[tokio::test]
async fn entity_lists_merge_in_representation_order() {
    let schemas = subgraphs(&[
        (
            "products",
            r#"type Query { top: [Product] } type Product @key(fields: "upc") { upc: String! name: String }"#,
        ),
        (
            "inventory",
            r#"type Product @key(fields: "upc") { upc: String! stock: Int }"#,
        ),
    ]);
    let inventory = MockSubgraph::new(|request| {
        let stock: Vec<Value> = request.variables["representations"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|representation| match representation["upc"].as_str() {
                Some("1") => json!({"stock": 10}),
                Some("2") => json!({"stock": 0}),
                _ => Value::Null,
            })
            .collect();
        Ok(json!({"data": {"_entities": stock}}))
    });
    let gateway = gateway(
        &schemas,
        &[
            (
                "products",
                MockSubgraph::responding(json!({"data": {"top": [
                    {"__typename": "Product", "upc": "1", "name": "Table"},
                    {"__typename": "Product", "upc": "2", "name": "Chair"},
                    {"__typename": "Product", "upc": "1", "name": "Table"},
                    {"__typename": "Product", "upc": "3", "name": "Lamp"}
                ]}})),
            ),
            ("inventory", inventory.clone()),
        ],
        ExecutionOptions::default(),
    );

    let response = gateway
        .execute(graphql::Request::new("{ top { name stock } }"))
        .await;
    assert_eq!(
        response.data,
        Some(json!({"top": [
            {"name": "Table", "stock": 10},
            {"name": "Chair", "stock": 0},
            {"name": "Table", "stock": 10},
            {"name": "Lamp", "stock": null}
        ]}))
    );
    assert!(response.errors.is_empty());
    assert_eq!(
        inventory.requests()[0].variables["representations"]
            .as_array()
            .map(Vec::len),
        Some(3)
    );
}

#[tokio::test]
async fn mutations_reach_subgraphs_in_order() {
    let schemas = subgraphs(&[
        (
            "accounts",
            "type Query { me: String } type Mutation { login: String logout: String }",
        ),
        ("cart", "type Mutation { addItem: Int }"),
    ]);
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = |service: &'static str, data: Value| {
        let log = log.clone();
        MockSubgraph::delayed(Duration::from_millis(10), move |request| {
            log.lock().unwrap().push(format!("{service}: {}", request.query));
            let mut object = serde_json::Map::new();
            for (key, value) in data.as_object().into_iter().flatten() {
                if request.query.contains(key.as_str()) {
                    object.insert(key.clone(), value.clone());
                }
            }
            Ok(json!({"data": object}))
        })
    };
    let gateway = gateway(
        &schemas,
        &[
            ("accounts", recorder("accounts", json!({"login": "token", "logout": "bye"}))),
            ("cart", recorder("cart", json!({"addItem": 1}))),
        ],
        ExecutionOptions::default(),
    );

    let response = gateway
        .execute(graphql::Request::new("mutation { login addItem logout }"))
        .await;
    assert_eq!(
        response.data,
        Some(json!({"login": "token", "addItem": 1, "logout": "bye"}))
    );
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "accounts: mutation { login }".to_string(),
            "cart: mutation { addItem }".to_string(),
            "accounts: mutation { logout }".to_string(),
        ]
    );
}

#[tokio::test]
async fn subgraph_errors_are_attributed() {
    let gateway = gateway(
        &abc(),
        &[
            ("a", product_service()),
            ("b", MockSubgraph::responding(json!({"data": null}))),
            (
                "c",
                MockSubgraph::responding(json!({
                    "data": {"_entities": [null]},
                    "errors": [{"message": "card declined", "path": ["_entities", 0, "paymentReceipt"]}]
                })),
            ),
        ],
        ExecutionOptions::default(),
    );

    let response = gateway.execute(graphql::Request::new(QUERY)).await;
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "card declined");
    assert_eq!(error_paths(&response), vec!["product/paymentReceipt"]);
    assert_eq!(response.errors[0].extensions["service"], json!("c"));
}

#[tokio::test]
async fn unlocated_subgraph_errors_point_at_the_fields_they_nulled() {
    let gateway = gateway(
        &abc(),
        &[
            ("a", product_service()),
            ("b", MockSubgraph::responding(json!({"data": null}))),
            (
                "c",
                MockSubgraph::responding(json!({"data": null, "errors": [{"message": "boom"}]})),
            ),
        ],
        ExecutionOptions::default(),
    );

    let response = gateway.execute(graphql::Request::new(QUERY)).await;
    assert_eq!(
        response.data,
        Some(json!({"product": {"id": "1", "creditCardNumber": "4111", "paymentReceipt": null}}))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "boom");
    assert_eq!(
        serde_json::to_value(&response.errors[0]).unwrap()["path"],
        json!(["product", "paymentReceipt"])
    );
    assert_eq!(response.errors[0].extensions["service"], json!("c"));
}

#[tokio::test]
async fn unlocated_root_errors_point_at_the_root_fields() {
    let c = receipt_service(Duration::ZERO);
    let gateway = gateway(
        &abc(),
        &[
            (
                "a",
                MockSubgraph::responding(json!({"data": null, "errors": [{"message": "boom"}]})),
            ),
            ("b", MockSubgraph::responding(json!({"data": null}))),
            ("c", c.clone()),
        ],
        ExecutionOptions::default(),
    );

    let response = gateway.execute(graphql::Request::new(QUERY)).await;
    assert_eq!(response.data, Some(json!({"product": null})));
    assert_eq!(error_paths(&response), vec!["product"]);
    assert_eq!(response.errors[0].message, "boom");
    assert_eq!(response.errors[0].extensions["service"], json!("a"));
    assert!(c.requests().is_empty());
}

#[tokio::test]
async fn client_aliases_keep_their_own_values() {
    let c = receipt_service(Duration::ZERO);
    let gateway = gateway(
        &abc(),
        &[
            (
                "a",
                MockSubgraph::responding(json!({"data": {"product": {
                    "creditCardNumber": "1",
                    "__fedgw_creditCardNumber": "4111",
                    "__typename": "Product",
                    "id": "1"
                }}})),
            ),
            ("b", MockSubgraph::responding(json!({"data": null}))),
            ("c", c.clone()),
        ],
        ExecutionOptions::default(),
    );

    let response = gateway
        .execute(graphql::Request::new(
            r#"{ product(id: "1") { creditCardNumber: id paymentReceipt } }"#,
        ))
        .await;
    assert_eq!(
        response.data,
        Some(json!({"product": {"creditCardNumber": "1", "paymentReceipt": "paid with 4111"}}))
    );
    assert_eq!(
        c.requests()[0].variables["representations"],
        json!([{"__typename": "Product", "id": "1", "creditCardNumber": "4111"}])
    );
}
