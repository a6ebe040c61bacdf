use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::schema_builder::Aggregation;
use crate::schema_registry::schema_from_sdl;
use crate::{ConfigError, Peer, PeerSchema};

/// Network configuration bundled at build time from `schemas/`.
pub const DEFAULT_CONFIG: &str = include_str!(concat!(env!("OUT_SCHEMAS"), "/network.yaml"));

/// Directory the bundled configuration resolves schema files against.
pub const DEFAULT_CONFIG_DIR: &str = env!("OUT_SCHEMAS");

#[derive(Parser, Debug)]
#[command(name = "netfed", version, about = "Federated query node for a peer network")]
pub struct Args {
    /// Network configuration file; the bundled one is used when omitted
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration
    #[arg(long)]
    pub listen: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Deadline for a whole federated query.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Deadline for a single peer call.
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,

    #[serde(default = "default_aggregations")]
    pub aggregations: Vec<Aggregation>,

    #[serde(default)]
    pub peers: BTreeMap<String, PeerConfig>,

    #[serde(default)]
    pub api_keys: Vec<ApiKey>,

    /// This node's own schema; batch writes are checked against it.
    #[serde(default)]
    pub local_schema: Option<SchemaFile>,
}

#[derive(Debug, Deserialize)]
pub struct PeerConfig {
    pub routing_url: String,
    pub schema: SchemaFile,
}

#[derive(Debug, Deserialize)]
pub struct SchemaFile {
    pub file: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_query_timeout_ms() -> u64 {
    10_000
}

fn default_peer_timeout_ms() -> u64 {
    5_000
}

fn default_aggregations() -> Vec<Aggregation> {
    Aggregation::DEFAULT.to_vec()
}

impl NetworkConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "network config read");
        Self::from_yaml(&contents, path)
    }

    pub fn from_yaml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(self.listen.clone()))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    /// Reads every peer's schema file. A peer whose file cannot be read is
    /// left out and its error returned next to the peers that loaded.
    pub fn load_peers(&self, base_dir: &Path) -> (Vec<Peer>, Vec<ConfigError>) {
        let mut peers = Vec::with_capacity(self.peers.len());
        let mut errors = Vec::new();

        for (name, peer_config) in &self.peers {
            match read_schema_file(base_dir, name, &peer_config.schema.file) {
                Ok(schema) => peers.push(Peer {
                    name: name.clone(),
                    url: peer_config.routing_url.clone(),
                    schema,
                }),
                Err(e) => {
                    warn!(peer = %name, error = %e, "skipping peer");
                    errors.push(e);
                }
            }
        }

        (peers, errors)
    }

    pub fn load_local_schema(&self, base_dir: &Path) -> Result<PeerSchema, ConfigError> {
        match &self.local_schema {
            Some(file) => read_schema_file(base_dir, "local", &file.file),
            None => Ok(PeerSchema::default()),
        }
    }
}

/// Loads a schema written as GraphQL SDL (`.graphql`, `.gql`), JSON, or
/// YAML, picked by extension.
pub fn read_schema_file(base_dir: &Path, peer: &str, file: &str) -> Result<PeerSchema, ConfigError> {
    let full_path = base_dir.join(file);
    debug!(peer, path = %full_path.display(), "reading schema file");
    let contents = fs::read_to_string(&full_path).map_err(|source| ConfigError::Io {
        path: full_path.clone(),
        source,
    })?;

    let parse_error = |reason: String| ConfigError::Parse {
        path: full_path.clone(),
        reason,
    };
    match full_path.extension().and_then(|ext| ext.to_str()) {
        Some("graphql" | "graphqls" | "gql") => {
            schema_from_sdl(peer, &contents).map_err(|e| parse_error(e.to_string()))
        }
        Some("json") => serde_json::from_str(&contents).map_err(|e| parse_error(e.to_string())),
        _ => serde_yaml::from_str(&contents).map_err(|e| parse_error(e.to_string())),
    }
}
