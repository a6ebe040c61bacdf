//! The peer resolution contract and its HTTP implementation.
//!
//! A [`Resolver`] turns one [`Params`] into one peer answer. Every class
//! field of the federated schema carries a [`ResolveBinding`] that knows
//! which peer and class it stands for; at execution time the binding takes
//! the resolver out of the [`ExecutionContext`] and calls it exactly once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::query_planner::Selection;
use crate::response::{complete_selections, lookup};
use crate::schema_registry::SchemaRegistry;
use crate::{Kind, LOCAL_ROOT, OperationCategory, ResolutionError, ResolverError};

/// A literal argument value, with variables already substituted.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InputValue {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Enum(String),
    List(Vec<InputValue>),
    Object(BTreeMap<String, InputValue>),
}

impl InputValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            InputValue::String(s) | InputValue::Enum(s) => Some(s),
            _ => None,
        }
    }
}

/// Renders the value as a GraphQL literal.
impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Null => f.write_str("null"),
            InputValue::Int(i) => write!(f, "{}", i),
            InputValue::Float(x) => write!(f, "{:?}", x),
            InputValue::String(s) => write!(f, "{}", Value::String(s.clone())),
            InputValue::Boolean(b) => write!(f, "{}", b),
            InputValue::Enum(e) => f.write_str(e),
            InputValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            InputValue::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// One peer invocation: which peer, which class, what to fetch.
#[derive(Clone, Debug, PartialEq)]
pub struct Params {
    pub peer: String,
    pub category: OperationCategory,
    pub kind: Kind,
    pub class: String,
    pub arguments: BTreeMap<String, InputValue>,
    pub selections: Vec<Selection>,
    /// The document the peer is asked to run against its local schema.
    pub sub_query: String,
}

/// A peer's answer envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn proxy_retrieve_instance(&self, params: &Params) -> Result<GraphQLResponse, ResolverError>;
    async fn proxy_aggregate_instance(&self, params: &Params) -> Result<GraphQLResponse, ResolverError>;
}

/// Carries the active resolver to every resolve handler.
#[derive(Clone)]
pub struct ExecutionContext {
    resolver: Arc<dyn Resolver>,
}

impl ExecutionContext {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        ExecutionContext { resolver }
    }

    pub fn resolver(&self) -> &dyn Resolver {
        self.resolver.as_ref()
    }
}

/// Static identity of a class field in the federated schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolveBinding {
    pub peer: String,
    pub category: OperationCategory,
    pub kind: Kind,
    pub class: String,
}

/// A successful field resolution.
#[derive(Debug)]
pub struct Resolved {
    pub value: Value,
    /// Errors the peer reported alongside its data.
    pub peer_errors: Vec<GraphQLError>,
}

impl ResolveBinding {
    pub fn params(&self, arguments: BTreeMap<String, InputValue>, selections: Vec<Selection>) -> Params {
        let sub_query = render_sub_query(self, &arguments, &selections);
        Params {
            peer: self.peer.clone(),
            category: self.category,
            kind: self.kind,
            class: self.class.clone(),
            arguments,
            selections,
            sub_query,
        }
    }

    /// Path of this field's answer inside the peer's response.
    pub fn data_path(&self) -> [&str; 4] {
        [LOCAL_ROOT, self.category.root_field(), self.kind.as_str(), self.class.as_str()]
    }

    #[instrument(skip_all, fields(peer = %self.peer, class = %self.class, category = %self.category))]
    pub async fn resolve(
        &self,
        ctx: &ExecutionContext,
        arguments: BTreeMap<String, InputValue>,
        selections: Vec<Selection>,
    ) -> Result<Resolved, ResolutionError> {
        let params = self.params(arguments, selections);
        let resolver = ctx.resolver();
        let response = match self.category {
            OperationCategory::Retrieve => resolver.proxy_retrieve_instance(&params).await?,
            OperationCategory::Aggregate => resolver.proxy_aggregate_instance(&params).await?,
        };

        let path = self.data_path();
        let data = Value::Object(response.data);
        match lookup(&data, &path).result {
            Some(value) => Ok(Resolved {
                value: complete_selections(value, &params.selections),
                peer_errors: response.errors,
            }),
            None if !response.errors.is_empty() => Err(ResolutionError::PeerErrors {
                peer: self.peer.clone(),
                path: path.join("."),
                messages: response.errors.into_iter().map(|e| e.message).collect(),
            }),
            None => Err(ResolutionError::MissingData {
                peer: self.peer.clone(),
                path: path.join("."),
            }),
        }
    }
}

/// `{ Local { <Category> { <Kind> { <Class>(args) { ... } } } } }`
pub fn render_sub_query(
    binding: &ResolveBinding,
    arguments: &BTreeMap<String, InputValue>,
    selections: &[Selection],
) -> String {
    let mut out = format!(
        "{{ {} {{ {} {{ {} {{ {}",
        LOCAL_ROOT,
        binding.category.root_field(),
        binding.kind.as_str(),
        binding.class
    );
    if !arguments.is_empty() {
        out.push('(');
        for (i, (name, value)) in arguments.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&format!("{}: {}", name, value));
        }
        out.push(')');
    }
    out.push(' ');
    render_selections(&mut out, selections);
    out.push_str(" } } } }");
    out
}

fn render_selections(out: &mut String, selections: &[Selection]) {
    out.push('{');
    for selection in selections {
        out.push(' ');
        selection.render(out);
    }
    out.push_str(" }");
}

impl Selection {
    fn render(&self, out: &mut String) {
        use crate::query_planner::SelectionKind;

        if let Some(alias) = &self.alias {
            out.push_str(alias);
            out.push_str(": ");
        }
        out.push_str(&self.name);
        match &self.kind {
            SelectionKind::Leaf { .. } => {}
            SelectionKind::Object(children) => {
                out.push(' ');
                render_selections(out, children);
            }
            SelectionKind::Fragments(fragments) => {
                out.push_str(" {");
                for (type_condition, children) in fragments {
                    out.push_str(" ... on ");
                    out.push_str(type_condition);
                    out.push(' ');
                    render_selections(out, children);
                }
                out.push_str(" }");
            }
        }
    }
}

/// Forwards invocations to peers over HTTP. Peer URLs come from the
/// registry at call time so a refresh is picked up without rebuilding.
pub struct HttpResolver {
    client: reqwest::Client,
    registry: Arc<dyn SchemaRegistry>,
    timeout: Duration,
}

impl HttpResolver {
    pub fn new(registry: Arc<dyn SchemaRegistry>, timeout: Duration) -> Self {
        HttpResolver {
            client: reqwest::Client::new(),
            registry,
            timeout,
        }
    }

    async fn send(&self, params: &Params) -> Result<GraphQLResponse, ResolverError> {
        let snapshot = self.registry.peers().await?;
        let peer = snapshot
            .get(&params.peer)
            .ok_or_else(|| ResolverError::UnknownPeer(params.peer.clone()))?;

        debug!(peer = %peer.name, url = %peer.url, query = %params.sub_query, "dispatching sub-query");
        let request_body = json!({
            "query": params.sub_query,
            "variables": {}
        });

        let response = self
            .client
            .post(&peer.url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| transport_error(&peer.name, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::Status {
                peer: peer.name.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&peer.name, e))?;
        serde_json::from_slice::<GraphQLResponse>(&body).map_err(|e| ResolverError::Malformed {
            peer: peer.name.clone(),
            reason: e.to_string(),
        })
    }
}

fn transport_error(peer: &str, e: reqwest::Error) -> ResolverError {
    if e.is_timeout() {
        ResolverError::Timeout(peer.to_string())
    } else {
        ResolverError::Unreachable {
            peer: peer.to_string(),
            source: e,
        }
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    async fn proxy_retrieve_instance(&self, params: &Params) -> Result<GraphQLResponse, ResolverError> {
        self.send(params).await
    }

    async fn proxy_aggregate_instance(&self, params: &Params) -> Result<GraphQLResponse, ResolverError> {
        self.send(params).await
    }
}
