mod common;

use async_trait::async_trait;
use common::car_schema;
use http::StatusCode;
use netfed::BatchError;
use netfed::batch::{BatchKind, BatchPersister, BatchResponse, BatchService, Credentials, InMemoryObjectStore, StoredObject};
use netfed::config::{ApiKey, Permission};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

const ADMIN: Credentials<'static> = Credentials {
    key: "admin",
    token: "secret",
};

fn api_keys() -> Vec<ApiKey> {
    vec![
        ApiKey {
            id: "admin".to_string(),
            token: "secret".to_string(),
            permissions: vec![Permission::Read, Permission::Write],
        },
        ApiKey {
            id: "reader".to_string(),
            token: "secret".to_string(),
            permissions: vec![Permission::Read],
        },
    ]
}

fn service(persister: Arc<dyn BatchPersister>) -> BatchService {
    BatchService::new(car_schema(), api_keys(), persister)
}

fn three_drives(extra: Value) -> Vec<u8> {
    let mut body = json!({
        "actions": [
            { "@context": "http://example.org", "@class": "Drive", "schema": { "distance": 1.5 } },
            { "@class": "Drive", "schema": { "distance": 20 } },
            { "@class": "Drive", "schema": {} }
        ]
    });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        body.extend(extra.clone());
    }
    serde_json::to_vec(&body).unwrap()
}

fn ids(records: &[Value], id_field: &str) -> Vec<Uuid> {
    records
        .iter()
        .map(|r| r[id_field].as_str().unwrap().parse().unwrap())
        .collect()
}

/// Holds every persist call until released.
struct GatedPersister {
    gate: Arc<Notify>,
    store: Arc<InMemoryObjectStore>,
}

#[async_trait]
impl BatchPersister for GatedPersister {
    async fn persist(&self, objects: Vec<StoredObject>) -> Result<(), BatchError> {
        self.gate.notified().await;
        self.store.persist(objects).await
    }
}

#[tokio::test]
async fn synchronous_batch_confirms_every_record() {
    let store = Arc::new(InMemoryObjectStore::new());
    let service = service(store.clone());

    let response = service
        .create(BatchKind::Actions, Some(ADMIN), &three_drives(json!({})))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let BatchResponse::Ok(records) = &response else { panic!("{:?}", response) };
    assert_eq!(records.len(), 3);
    for record in records {
        assert_eq!(record["result"]["status"], "SUCCESS");
        assert_eq!(record["@class"], "Drive");
        assert_eq!(record["key"], "admin");
        assert!(record["creationTimeUnix"].as_i64().unwrap() > 0);
    }
    assert_eq!(records[0]["@context"], "http://example.org");

    assert_eq!(store.len().await, 3);
    for id in ids(records, "actionId") {
        assert!(store.get(id).await.is_some());
    }
}

#[tokio::test]
async fn asynchronous_batch_answers_before_persistence() {
    let gate = Arc::new(Notify::new());
    let store = Arc::new(InMemoryObjectStore::new());
    let service = service(Arc::new(GatedPersister {
        gate: gate.clone(),
        store: store.clone(),
    }));

    let response = service
        .create(
            BatchKind::Actions,
            Some(ADMIN),
            &three_drives(json!({ "async": true, "fields": ["actionId"] })),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    let BatchResponse::Accepted(records) = &response else { panic!("{:?}", response) };
    assert_eq!(records.len(), 3);
    for record in records {
        assert_eq!(record["result"]["status"], "PENDING");
        assert!(record.get("@class").is_none());
    }
    assert!(store.is_empty().await);

    gate.notify_one();
    tokio::time::timeout(Duration::from_secs(2), async {
        while store.len().await < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    for id in ids(records, "actionId") {
        assert!(store.get(id).await.is_some());
    }
}

#[tokio::test]
async fn unknown_field_value_rejects_the_whole_batch() {
    let store = Arc::new(InMemoryObjectStore::new());
    let service = service(store.clone());

    let response = service
        .create(
            BatchKind::Actions,
            Some(ADMIN),
            &three_drives(json!({ "fields": ["everything"] })),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let message = response.body()["error"][0]["message"].as_str().unwrap().to_string();
    assert!(message.starts_with("body.fields.0 in body"), "{}", message);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn authorization_is_checked_before_the_body() {
    let store = Arc::new(InMemoryObjectStore::new());
    let service = service(store.clone());
    let body = three_drives(json!({}));

    let missing = service.create(BatchKind::Actions, None, &body).await;
    assert_eq!(missing.status_code(), StatusCode::UNAUTHORIZED);

    let wrong_token = Credentials {
        key: "admin",
        token: "guess",
    };
    let wrong = service.create(BatchKind::Actions, Some(wrong_token), &body).await;
    assert_eq!(wrong.status_code(), StatusCode::UNAUTHORIZED);

    let reader = Credentials {
        key: "reader",
        token: "secret",
    };
    let forbidden = service.create(BatchKind::Actions, Some(reader), b"not even json").await;
    assert_eq!(forbidden, BatchResponse::Forbidden);
    assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);

    assert!(store.is_empty().await);
}

#[tokio::test]
async fn things_batch_checks_classes_against_the_local_schema() {
    let store = Arc::new(InMemoryObjectStore::new());
    let service = service(store.clone());

    let unknown = json!({ "things": [{ "@class": "Car" }, { "@class": "Drive" }] });
    let response = service
        .create(BatchKind::Things, Some(ADMIN), &serde_json::to_vec(&unknown).unwrap())
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let message = response.body()["error"][0]["message"].as_str().unwrap().to_string();
    assert!(message.starts_with("body.things.1.@class"), "{}", message);
    assert!(store.is_empty().await);

    let valid = json!({
        "things": [{ "@class": "Car", "schema": { "name": "Golf", "horsepower": 150 } }],
        "fields": ["thingId", "schema"]
    });
    let response = service
        .create(BatchKind::Things, Some(ADMIN), &serde_json::to_vec(&valid).unwrap())
        .await;
    let BatchResponse::Ok(records) = &response else { panic!("{:?}", response) };
    assert_eq!(records[0]["schema"], json!({ "name": "Golf", "horsepower": 150 }));
    assert!(records[0]["thingId"].is_string());
    assert!(records[0].get("key").is_none());
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn every_violation_is_listed_in_the_error_response() {
    let store = Arc::new(InMemoryObjectStore::new());
    let service = service(store.clone());
    let body = json!({
        "actions": [
            { "@class": "Drive", "schema": { "distance": 3 } },
            { "@class": "Fly" },
            { "schema": {} }
        ],
        "fields": ["everything"]
    });

    let response = service
        .create(BatchKind::Actions, Some(ADMIN), &serde_json::to_vec(&body).unwrap())
        .await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let messages: Vec<String> = response.body()["error"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].starts_with("body.actions.1.@class in body"), "{}", messages[0]);
    assert!(messages[1].starts_with("body.actions.2.@class in body"), "{}", messages[1]);
    assert!(messages[2].starts_with("body.fields.0 in body"), "{}", messages[2]);
    assert!(store.is_empty().await);
}
