//! Error types for the federation layer.

use serde::Serialize;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while reading or updating the peer schema registry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("peer {peer}: malformed schema: {reason}")]
    MalformedSchema { peer: String, reason: String },

    #[error("peer name {0:?} is not a valid GraphQL name")]
    InvalidPeerName(String),

    #[error("peer {0} appears more than once in the snapshot")]
    DuplicatePeer(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Failures while translating a peer schema into a federated field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("peer {peer}: {class}.{field} has untranslatable data type {data_type:?}")]
    UntranslatableField {
        peer: String,
        class: String,
        field: String,
        data_type: Vec<String>,
    },

    #[error("peer name {0} collides with an existing federated field")]
    DuplicatePeer(String),

    #[error("peer name {0:?} is not a valid GraphQL name")]
    InvalidPeerName(String),
}

/// Transport-level failures reported by a [`crate::Resolver`].
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("peer {0} is not known to the registry")]
    UnknownPeer(String),

    #[error("peer {peer} unreachable: {source}")]
    Unreachable {
        peer: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer {0} timed out")]
    Timeout(String),

    #[error("peer {peer} answered with status {status}")]
    Status { peer: String, status: u16 },

    #[error("peer {peer} sent a malformed reply: {reason}")]
    Malformed { peer: String, reason: String },

    #[error("registry unavailable: {0}")]
    Registry(#[from] RegistryError),
}

/// Failure of one field's resolve handler.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error("peer {peer} returned no data at {path}: {}", .messages.join("; "))]
    PeerErrors {
        peer: String,
        path: String,
        messages: Vec<String>,
    },

    #[error("peer {peer} returned no data at {path}")]
    MissingData { peer: String, path: String },
}

/// Client-input errors in a federated query document. The query is
/// rejected before any peer is contacted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("failed to parse query: {0}")]
    Parse(String),

    #[error("no operation named {0:?} in document")]
    UnknownOperation(String),

    #[error("document contains several operations, an operation name is required")]
    AmbiguousOperation,

    #[error("only query operations are supported")]
    UnsupportedOperation,

    #[error("cannot query field {field:?} on type {type_name:?}")]
    UnknownField { type_name: String, field: String },

    #[error("field {field:?} of type {type_name:?} must have a selection of subfields")]
    MissingSelection { type_name: String, field: String },

    #[error("field {field:?} must not have a selection since type {type_name:?} has no subfields")]
    UnexpectedSelection { type_name: String, field: String },

    #[error("unknown argument {argument:?} on field {field:?}")]
    UnknownArgument { field: String, argument: String },

    #[error("field {field:?} argument {argument:?} is required")]
    MissingArgument { field: String, argument: String },

    #[error("field {field:?} argument {argument:?}: {reason}")]
    InvalidArgument {
        field: String,
        argument: String,
        reason: String,
    },

    #[error("variable ${0} was not provided")]
    MissingVariable(String),

    #[error("unknown fragment {0:?}")]
    UnknownFragment(String),

    #[error("fragment {0:?} spreads itself")]
    FragmentCycle(String),

    #[error("fragment on {type_condition:?} cannot be spread on {type_name:?}")]
    InvalidFragmentType {
        type_name: String,
        type_condition: String,
    },

    #[error("fields conflict at {response_key:?}: {reason}")]
    FieldConflict { response_key: String, reason: String },

    #[error("query selects no peer fields")]
    Empty,
}

/// Path lookup miss in a [`crate::ResponseTree`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("not found: {segment:?} at depth {depth}")]
    NotFound { segment: String, depth: usize },
}

/// Top-level failures. Anything narrower is attached to the response.
#[derive(Error, Debug)]
pub enum FederationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("query exceeded its {0:?} deadline")]
    Timeout(std::time::Duration),
}

/// Failures while loading configuration or schema files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid listen address {0:?}")]
    InvalidListen(String),
}

/// A rejected field of a batch write body, addressed by its path in the
/// request (`body.fields.0`, `body.things.2.@class`).
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{path} in {location} {message}")]
pub struct ValidationError {
    pub path: String,
    pub location: String,
    pub message: String,
}

/// Failures while storing batch-created objects.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("failed to persist {count} objects: {reason}")]
    Persist { count: usize, reason: String },
}
