use async_trait::async_trait;
use graphql_parser::schema::{Definition, Type, TypeDefinition, parse_schema};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{Kind, Peer, PeerSchema, RegistryError, SchemaClass, SchemaProperty};

#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// The current snapshot. Callers keep the `Arc` for as long as they need
    /// a consistent view; a concurrent refresh never mutates it.
    async fn peers(&self) -> Result<Arc<RegistrySnapshot>, RegistryError>;
}

/// An immutable, ordered view of every registered peer.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    peers: Vec<Peer>,
}

impl RegistrySnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn get(&self, name: &str) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.name == name)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

pub struct InMemorySchemaRegistry {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        InMemorySchemaRegistry {
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    /// Swaps in a whole new peer set. Malformed peers are left out and
    /// reported; the rest are published together.
    pub async fn replace_all(&self, peers: Vec<Peer>) -> Vec<RegistryError> {
        let mut accepted: Vec<Peer> = Vec::with_capacity(peers.len());
        let mut errors = Vec::new();

        for peer in peers {
            if accepted.iter().any(|p| p.name == peer.name) {
                warn!(peer = %peer.name, "duplicate peer name, keeping the first registration");
                errors.push(RegistryError::DuplicatePeer(peer.name));
                continue;
            }
            match validate_peer(&peer) {
                Ok(()) => accepted.push(peer),
                Err(e) => {
                    warn!(peer = %peer.name, error = %e, "excluding peer from registry");
                    errors.push(e);
                }
            }
        }

        let mut snapshot = self.snapshot.write().await;
        let generation = snapshot.generation + 1;
        info!(generation, peers = accepted.len(), "registry refreshed");
        *snapshot = Arc::new(RegistrySnapshot {
            generation,
            peers: accepted,
        });

        errors
    }

    /// Adds or replaces a single peer.
    pub async fn register_peer(&self, peer: Peer) -> Result<(), RegistryError> {
        validate_peer(&peer)?;

        let mut snapshot = self.snapshot.write().await;
        let mut peers = snapshot.peers.clone();
        match peers.iter_mut().find(|p| p.name == peer.name) {
            Some(existing) => *existing = peer,
            None => peers.push(peer),
        }

        let generation = snapshot.generation + 1;
        *snapshot = Arc::new(RegistrySnapshot { generation, peers });
        Ok(())
    }
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn peers(&self) -> Result<Arc<RegistrySnapshot>, RegistryError> {
        Ok(self.snapshot.read().await.clone())
    }
}

/// `[_A-Za-z][_0-9A-Za-z]*`
pub(crate) fn is_graphql_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

pub fn validate_peer(peer: &Peer) -> Result<(), RegistryError> {
    if !is_graphql_name(&peer.name) {
        return Err(RegistryError::InvalidPeerName(peer.name.clone()));
    }
    let malformed = |reason: String| RegistryError::MalformedSchema {
        peer: peer.name.clone(),
        reason,
    };

    let mut class_names = HashSet::new();
    for kind in Kind::ALL {
        for class in peer.schema.classes(kind) {
            if !is_graphql_name(&class.name) {
                return Err(malformed(format!("invalid class name {:?}", class.name)));
            }
            if !class_names.insert(class.name.as_str()) {
                return Err(malformed(format!("duplicate class {}", class.name)));
            }

            let mut property_names = HashSet::new();
            for property in &class.properties {
                if !is_graphql_name(&property.name) {
                    return Err(malformed(format!(
                        "invalid property name {:?} on {}",
                        property.name, class.name
                    )));
                }
                if !property_names.insert(property.name.as_str()) {
                    return Err(malformed(format!(
                        "duplicate property {}.{}",
                        class.name, property.name
                    )));
                }
                if property.data_type.is_empty() {
                    return Err(malformed(format!(
                        "{}.{} declares no data type",
                        class.name, property.name
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Reads a peer schema written as GraphQL SDL. Object types become classes,
/// those carrying `@action` are actions, the rest things. Unions expand to
/// multi-target references.
pub fn schema_from_sdl(peer: &str, sdl: &str) -> Result<PeerSchema, RegistryError> {
    let document = parse_schema::<String>(sdl).map_err(|e| RegistryError::MalformedSchema {
        peer: peer.to_string(),
        reason: format!("failed to parse schema: {}", e),
    })?;

    let mut unions: HashMap<&str, &[String]> = HashMap::new();
    for definition in &document.definitions {
        if let Definition::TypeDefinition(TypeDefinition::Union(union_type)) = definition {
            unions.insert(union_type.name.as_str(), union_type.types.as_slice());
        }
    }

    let mut schema = PeerSchema::default();
    for definition in &document.definitions {
        if let Definition::TypeDefinition(TypeDefinition::Object(obj)) = definition {
            let properties = obj
                .fields
                .iter()
                .map(|field| SchemaProperty {
                    name: field.name.clone(),
                    data_type: sdl_data_type(&field.field_type, &unions),
                })
                .collect();
            let class = SchemaClass {
                name: obj.name.clone(),
                properties,
            };

            if obj.directives.iter().any(|d| d.name == "action") {
                schema.actions.classes.push(class);
            } else {
                schema.things.classes.push(class);
            }
        }
    }

    Ok(schema)
}

fn sdl_data_type<'a>(field_type: &Type<'a, String>, unions: &HashMap<&str, &[String]>) -> Vec<String> {
    match field_type {
        Type::NonNullType(inner) => sdl_data_type(inner, unions),
        Type::NamedType(name) => match name.as_str() {
            "Int" => vec!["int".to_string()],
            "Float" => vec!["number".to_string()],
            "String" | "ID" => vec!["string".to_string()],
            "Boolean" => vec!["boolean".to_string()],
            "Date" | "DateTime" => vec!["date".to_string()],
            other => match unions.get(other) {
                Some(members) => members.to_vec(),
                None => vec![other.to_string()],
            },
        },
        Type::ListType(inner) => {
            let element = sdl_data_type(inner, unions);
            // Lists of primitives have no translation; keep them visible to
            // the builder so it can report the field.
            if element.iter().all(|t| t.starts_with(char::is_uppercase)) {
                element
            } else {
                vec![format!("[{}]", element.join("|"))]
            }
        }
    }
}
