pub mod batch;
pub mod config;
pub mod error;
pub mod federation_gateway;
pub mod query_executor;
pub mod query_planner;
pub mod resolver;
pub mod response;
pub mod schema_builder;
pub mod schema_registry;

pub use error::{
    BatchError, BuildError, ConfigError, FederationError, LookupError, QueryError, RegistryError,
    ResolutionError, ResolverError, ValidationError,
};
pub use federation_gateway::FederationGateway;
pub use query_executor::ConcurrentQueryExecutor;
pub use query_planner::SimpleQueryPlanner;
pub use resolver::{ExecutionContext, GraphQLError, GraphQLResponse, HttpResolver, Params, Resolver};
pub use response::{FieldError, PathResult, ResponseTree};
pub use schema_builder::{Aggregation, FederatedSchema, build_peer_field};
pub use schema_registry::{InMemorySchemaRegistry, RegistrySnapshot, SchemaRegistry};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Key under which every peer nests its answer.
pub const LOCAL_ROOT: &str = "Local";

/// Root operation category of a federated query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationCategory {
    #[serde(rename = "Get")]
    Retrieve,
    Aggregate,
}

impl OperationCategory {
    pub const ALL: [OperationCategory; 2] = [OperationCategory::Retrieve, OperationCategory::Aggregate];

    /// Name of the root field this category is queried through.
    pub fn root_field(&self) -> &'static str {
        match self {
            OperationCategory::Retrieve => "Get",
            OperationCategory::Aggregate => "Aggregate",
        }
    }

    pub fn from_root_field(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.root_field() == name)
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.root_field())
    }
}

/// The two semantic kinds a class can belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Things,
    Actions,
}

impl Kind {
    pub const ALL: [Kind; 2] = [Kind::Things, Kind::Actions];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Things => "Things",
            Kind::Actions => "Actions",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A peer's published data schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerSchema {
    #[serde(default)]
    pub things: SemanticSchema,
    #[serde(default)]
    pub actions: SemanticSchema,
}

impl PeerSchema {
    pub fn classes(&self, kind: Kind) -> &[SchemaClass] {
        match kind {
            Kind::Things => &self.things.classes,
            Kind::Actions => &self.actions.classes,
        }
    }

    pub fn find_class(&self, name: &str) -> Option<(Kind, &SchemaClass)> {
        Kind::ALL.into_iter().find_map(|kind| {
            self.classes(kind)
                .iter()
                .find(|class| class.name == name)
                .map(|class| (kind, class))
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticSchema {
    #[serde(default)]
    pub classes: Vec<SchemaClass>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaClass {
    #[serde(rename = "class")]
    pub name: String,
    #[serde(default)]
    pub properties: Vec<SchemaProperty>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaProperty {
    pub name: String,
    /// Either a single primitive (`int`, `string`, ...) or the names of the
    /// classes a reference may point to.
    #[serde(rename = "dataType")]
    pub data_type: Vec<String>,
}

/// A known peer: where to reach it and what it serves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub url: String,
    pub schema: PeerSchema,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct GraphQLRequest {
    pub query: String,
    pub variables: Option<Value>,
    #[serde(rename = "operationName")]
    pub operation_name: Option<String>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        GraphQLRequest {
            query: query.into(),
            ..Default::default()
        }
    }
}
