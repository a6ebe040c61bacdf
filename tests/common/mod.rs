#![allow(dead_code)]

use async_trait::async_trait;
use netfed::query_executor::ConcurrentQueryExecutor;
use netfed::{
    Aggregation, ExecutionContext, FederationGateway, GraphQLResponse, InMemorySchemaRegistry, Params, Peer,
    PeerSchema, Resolver, ResolverError, SchemaClass, SchemaProperty, SimpleQueryPlanner,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn property(name: &str, data_type: &str) -> SchemaProperty {
    SchemaProperty {
        name: name.to_string(),
        data_type: vec![data_type.to_string()],
    }
}

/// Car and Manufacturer things plus a Drive action.
pub fn car_schema() -> PeerSchema {
    let mut schema = PeerSchema::default();
    schema.things.classes.push(SchemaClass {
        name: "Car".to_string(),
        properties: vec![
            property("name", "string"),
            property("horsepower", "int"),
            property("weight", "number"),
            property("madeBy", "Manufacturer"),
        ],
    });
    schema.things.classes.push(SchemaClass {
        name: "Manufacturer".to_string(),
        properties: vec![property("name", "string")],
    });
    schema.actions.classes.push(SchemaClass {
        name: "Drive".to_string(),
        properties: vec![property("distance", "number"), property("car", "Car")],
    });
    schema
}

pub fn peer(name: &str) -> Peer {
    Peer {
        name: name.to_string(),
        url: format!("http://{}.invalid/v1/graphql", name.to_lowercase()),
        schema: car_schema(),
    }
}

enum Reply {
    Answer(GraphQLResponse),
    Status(u16),
    Timeout,
}

/// Canned per-peer replies with optional delays. Every call is recorded, and
/// calls still running are counted so tests can see them being dropped.
#[derive(Default)]
pub struct MockResolver {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<Params>>,
    in_flight: Arc<AtomicUsize>,
    completed: AtomicUsize,
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlight(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers with `data` as the whole `data` member of the response.
    pub fn answer(self, peer: &str, data: Value) -> Self {
        let response = serde_json::from_value(serde_json::json!({ "data": data })).unwrap();
        self.respond(peer, response)
    }

    pub fn respond(mut self, peer: &str, response: GraphQLResponse) -> Self {
        self.replies.insert(peer.to_string(), Reply::Answer(response));
        self
    }

    pub fn fail(mut self, peer: &str, status: u16) -> Self {
        self.replies.insert(peer.to_string(), Reply::Status(status));
        self
    }

    pub fn time_out(mut self, peer: &str) -> Self {
        self.replies.insert(peer.to_string(), Reply::Timeout);
        self
    }

    pub fn delay(mut self, peer: &str, delay: Duration) -> Self {
        self.delays.insert(peer.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<Params> {
        self.calls.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    async fn reply(&self, params: &Params) -> Result<GraphQLResponse, ResolverError> {
        self.calls.lock().unwrap().push(params.clone());
        let _guard = InFlight::enter(&self.in_flight);

        if let Some(delay) = self.delays.get(&params.peer) {
            tokio::time::sleep(*delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        match self.replies.get(&params.peer) {
            Some(Reply::Answer(response)) => Ok(response.clone()),
            Some(Reply::Status(status)) => Err(ResolverError::Status {
                peer: params.peer.clone(),
                status: *status,
            }),
            Some(Reply::Timeout) => Err(ResolverError::Timeout(params.peer.clone())),
            None => Err(ResolverError::UnknownPeer(params.peer.clone())),
        }
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn proxy_retrieve_instance(&self, params: &Params) -> Result<GraphQLResponse, ResolverError> {
        self.reply(params).await
    }

    async fn proxy_aggregate_instance(&self, params: &Params) -> Result<GraphQLResponse, ResolverError> {
        self.reply(params).await
    }
}

pub async fn registry(peers: &[&str]) -> Arc<InMemorySchemaRegistry> {
    let registry = Arc::new(InMemorySchemaRegistry::new());
    let errors = registry.replace_all(peers.iter().map(|name| peer(name)).collect()).await;
    assert!(errors.is_empty(), "{:?}", errors);
    registry
}

pub fn gateway(
    registry: Arc<InMemorySchemaRegistry>,
    resolver: Arc<MockResolver>,
    query_timeout: Duration,
) -> FederationGateway {
    FederationGateway::new(
        registry,
        Arc::new(SimpleQueryPlanner::new()),
        Arc::new(ConcurrentQueryExecutor::new(query_timeout)),
        ExecutionContext::new(resolver),
        Aggregation::DEFAULT.to_vec(),
    )
}

/// `{ "Local": { <category>: { <kind>: { <class>: value } } } }`
pub fn local(category: &str, kind: &str, class: &str, value: Value) -> Value {
    serde_json::json!({ "Local": { category: { kind: { class: value } } } })
}
