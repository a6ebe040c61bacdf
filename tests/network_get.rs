mod common;

use common::{MockResolver, gateway, local, peer, registry};
use netfed::{FederationError, GraphQLRequest, OperationCategory, QueryError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn retrieve_with_aliases_and_references() {
    let answer = local(
        "Get",
        "Things",
        "Car",
        json!([
            { "name": "Golf", "hp": 150, "madeBy": [{ "name": "VW", "country": "DE" }] },
            { "name": "Model 3", "hp": "283", "madeBy": null }
        ]),
    );
    let resolver = Arc::new(MockResolver::new().answer("PeerA", answer));
    let gateway = gateway(registry(&["PeerA"]).await, resolver.clone(), TIMEOUT);

    let tree = gateway
        .process_request(GraphQLRequest::new(
            r#"{ Get { PeerA { Things { cars: Car(limit: 2) {
                name
                hp: horsepower
                madeBy { ... on Manufacturer { name } }
            } } } } }"#,
        ))
        .await
        .unwrap();

    assert!(tree.errors().is_empty());
    assert_eq!(
        tree.get(&["Get", "PeerA", "Things", "cars"]).result,
        Some(&json!([
            { "name": "Golf", "hp": 150, "madeBy": [{ "name": "VW" }] },
            { "name": "Model 3", "hp": null, "madeBy": null }
        ]))
    );

    let calls = resolver.calls();
    assert_eq!(calls[0].category, OperationCategory::Retrieve);
    assert_eq!(
        calls[0].sub_query,
        "{ Local { Get { Things { Car(limit: 2) { name hp: horsepower madeBy { ... on Manufacturer { name } } } } } } }"
    );
}

#[tokio::test]
async fn get_and_aggregate_in_one_query_call_each_peer_once_per_field() {
    let resolver = Arc::new(
        MockResolver::new()
            .answer("PeerA", local("Get", "Actions", "Drive", json!([{ "distance": 12.5 }])))
            .answer(
                "PeerB",
                local("Aggregate", "Things", "Car", json!([{ "weight": { "sum": 4200 } }])),
            ),
    );
    let gateway = gateway(registry(&["PeerA", "PeerB"]).await, resolver.clone(), TIMEOUT);

    let tree = gateway
        .process_request(GraphQLRequest::new(
            r#"{
                Get { PeerA { Actions { Drive { distance } } } }
                Aggregate { PeerB { Things { Car(groupBy: "name") { weight { sum } } } } }
            }"#,
        ))
        .await
        .unwrap();

    assert_eq!(resolver.calls().len(), 2);
    assert_eq!(
        tree.data(),
        &json!({
            "Get": { "PeerA": { "Actions": { "Drive": [{ "distance": 12.5 }] } } },
            "Aggregate": { "PeerB": { "Things": { "Car": [{ "weight": { "sum": 4200.0 } }] } } }
        })
    );
}

#[tokio::test]
async fn invalid_queries_are_rejected_before_dispatch() {
    let resolver = Arc::new(MockResolver::new());
    let gateway = gateway(registry(&["PeerA"]).await, resolver.clone(), TIMEOUT);

    let cases = [
        "{ Get { PeerB { Things { Car { name } } } } }",
        "{ Get { PeerA { Things { Truck { name } } } } }",
        "{ Get { PeerA { Things { Car(first: 3) { name } } } } }",
        "{ Aggregate { PeerA { Things { Car { horsepower { mean } } } } } }",
        "{ Get { PeerA { Things { Car { name { length } } } } } }",
        "{ Get { PeerA { Things { Car { madeBy } } } } }",
        "{ Get { PeerA { Things { Car { madeBy { ... on Car { name } } } } } } }",
        "{ Get { PeerA { Things { Car { ...missing } } } } }",
        "{ Get { PeerA { Things { Car(limit: \"ten\") { name } } } } }",
        "{ Get { PeerA } }",
    ];
    for query in cases {
        let result = gateway.process_request(GraphQLRequest::new(query)).await;
        assert!(matches!(result, Err(FederationError::Query(_))), "{} => {:?}", query, result);
    }
    assert!(resolver.calls().is_empty());

    let err = gateway
        .process_request(GraphQLRequest::new("{ Get { PeerB { Things { Car { name } } } } }"))
        .await
        .unwrap_err();
    let FederationError::Query(err) = err else { panic!("{:?}", err) };
    assert_eq!(
        err,
        QueryError::UnknownField {
            type_name: "GetPeers".to_string(),
            field: "PeerB".to_string()
        }
    );
}

#[tokio::test]
async fn operation_name_and_variables_select_and_fill_the_query() {
    let resolver = Arc::new(MockResolver::new().answer("PeerA", local("Get", "Things", "Car", json!([]))));
    let gateway = gateway(registry(&["PeerA"]).await, resolver.clone(), TIMEOUT);

    let request = GraphQLRequest {
        query: r#"
            query Unused { Get { PeerA { Things { Manufacturer { name } } } } }
            query Cars($limit: Int = 1, $filter: Object) {
                Get { PeerA { Things { Car(limit: $limit, where: $filter) { name } } } }
            }"#
        .to_string(),
        variables: Some(json!({ "filter": { "path": ["name"], "operator": "Equal", "valueString": "Golf" } })),
        operation_name: Some("Cars".to_string()),
        ..Default::default()
    };
    let tree = gateway.process_request(request).await.unwrap();

    assert_eq!(tree.get(&["Get", "PeerA", "Things", "Car"]).result, Some(&json!([])));
    let calls = resolver.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].sub_query,
        r#"{ Local { Get { Things { Car(limit: 1, where: {operator: "Equal", path: ["name"], valueString: "Golf"}) { name } } } } }"#
    );
}

#[tokio::test]
async fn registry_changes_are_picked_up_on_the_next_query() {
    let resolver = Arc::new(
        MockResolver::new()
            .answer("PeerA", local("Get", "Things", "Car", json!([{ "name": "a" }])))
            .answer("PeerB", local("Get", "Things", "Car", json!([{ "name": "b" }]))),
    );
    let registry = registry(&["PeerA"]).await;
    let gateway = gateway(registry.clone(), resolver, TIMEOUT);
    let query = "{ Get { PeerB { Things { Car { name } } } } }";

    assert!(gateway.process_request(GraphQLRequest::new(query)).await.is_err());
    let before = gateway.schema().await.unwrap();

    registry.register_peer(peer("PeerB")).await.unwrap();
    let tree = gateway.process_request(GraphQLRequest::new(query)).await.unwrap();

    assert_eq!(
        tree.get(&["Get", "PeerB", "Things", "Car"]).result,
        Some(&json!([{ "name": "b" }]))
    );
    let after = gateway.schema().await.unwrap();
    assert!(after.generation > before.generation);
    assert!(Arc::ptr_eq(&after, &gateway.schema().await.unwrap()));
}
