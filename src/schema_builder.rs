//! Builds the federated query surface: one namespace per peer, shaped by
//! that peer's published schema.
//!
//! The output is plain data. Every class becomes a [`ClassField`] whose
//! [`ObjectType`] is made of a fixed set of node kinds (scalar, nested
//! object, aggregate summary, reference), and which carries the
//! [`ResolveBinding`] the executor invokes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::resolver::ResolveBinding;
use crate::schema_registry::{RegistrySnapshot, is_graphql_name};
use crate::{BuildError, Kind, OperationCategory, Peer, PeerSchema, SchemaClass, SchemaProperty};

/// Statistics an aggregate query may ask for on a numeric field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Mean,
    Count,
    Sum,
    Minimum,
    Maximum,
    Mode,
    Median,
}

impl Aggregation {
    pub const DEFAULT: [Aggregation; 7] = [
        Aggregation::Mean,
        Aggregation::Count,
        Aggregation::Sum,
        Aggregation::Minimum,
        Aggregation::Maximum,
        Aggregation::Mode,
        Aggregation::Median,
    ];

    pub fn field_name(&self) -> &'static str {
        match self {
            Aggregation::Mean => "mean",
            Aggregation::Count => "count",
            Aggregation::Sum => "sum",
            Aggregation::Minimum => "minimum",
            Aggregation::Maximum => "maximum",
            Aggregation::Mode => "mode",
            Aggregation::Median => "median",
        }
    }

    fn scalar(&self) -> ScalarType {
        match self {
            Aggregation::Count => ScalarType::Int,
            _ => ScalarType::Float,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    Int,
    Float,
    String,
    Boolean,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutputNode {
    Scalar(ScalarType),
    Object(ObjectType),
    /// Statistical summary of one property in an aggregate query.
    Summary(ObjectType),
    /// Cross reference to classes of the same peer.
    Reference(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutputField {
    pub name: String,
    pub node: OutputNode,
    pub list: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectType {
    pub name: String,
    pub fields: Vec<OutputField>,
}

impl ObjectType {
    pub fn field(&self, name: &str) -> Option<&OutputField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgumentType {
    StringList,
    Int,
    Object,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgumentDef {
    pub name: &'static str,
    pub ty: ArgumentType,
    pub required: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassField {
    pub name: String,
    pub arguments: Vec<ArgumentDef>,
    pub object: Arc<ObjectType>,
    pub binding: ResolveBinding,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KindField {
    pub kind: Kind,
    pub type_name: String,
    pub classes: Vec<ClassField>,
}

impl KindField {
    pub fn class(&self, name: &str) -> Option<&ClassField> {
        self.classes.iter().find(|c| c.name == name)
    }
}

/// The namespace of one peer inside a federated surface.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerField {
    pub name: String,
    pub category: OperationCategory,
    pub type_name: String,
    pub kinds: Vec<KindField>,
}

impl PeerField {
    pub fn kind(&self, name: &str) -> Option<&KindField> {
        self.kinds.iter().find(|k| k.kind.as_str() == name)
    }

    /// Output type of a class regardless of its kind; used for references.
    pub fn class_object(&self, class: &str) -> Option<&Arc<ObjectType>> {
        self.kinds
            .iter()
            .find_map(|k| k.class(class))
            .map(|c| &c.object)
    }
}

/// All peers' namespaces for one operation category.
#[derive(Clone, Debug, PartialEq)]
pub struct FederatedSurface {
    pub category: OperationCategory,
    pub type_name: String,
    pub peers: Vec<PeerField>,
}

impl FederatedSurface {
    pub fn peer(&self, name: &str) -> Option<&PeerField> {
        self.peers.iter().find(|p| p.name == name)
    }
}

/// Both surfaces built from one registry snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct FederatedSchema {
    pub generation: u64,
    pub surfaces: Vec<FederatedSurface>,
    pub errors: Vec<BuildError>,
}

impl FederatedSchema {
    pub fn surface(&self, category: OperationCategory) -> Option<&FederatedSurface> {
        self.surfaces.iter().find(|s| s.category == category)
    }
}

pub fn build_federated_schema(snapshot: &RegistrySnapshot, aggregations: &[Aggregation]) -> FederatedSchema {
    let mut surfaces = Vec::new();
    let mut errors = Vec::new();
    for category in OperationCategory::ALL {
        let (surface, surface_errors) = build_federated_surface(category, snapshot.peers(), aggregations);
        surfaces.push(surface);
        // a broken peer fails identically in both categories
        for error in surface_errors {
            if !errors.contains(&error) {
                errors.push(error);
            }
        }
    }

    FederatedSchema {
        generation: snapshot.generation(),
        surfaces,
        errors,
    }
}

/// Builds every peer independently; a peer that fails is left out and its
/// error returned alongside the surface.
pub fn build_federated_surface(
    category: OperationCategory,
    peers: &[Peer],
    aggregations: &[Aggregation],
) -> (FederatedSurface, Vec<BuildError>) {
    let mut fields: Vec<PeerField> = Vec::with_capacity(peers.len());
    let mut errors = Vec::new();

    for peer in peers {
        if fields.iter().any(|f| f.name == peer.name) {
            errors.push(BuildError::DuplicatePeer(peer.name.clone()));
            continue;
        }
        match build_peer_field(&peer.name, &peer.schema, category, aggregations) {
            Ok(field) => fields.push(field),
            Err(e) => {
                warn!(peer = %peer.name, %category, error = %e, "peer left out of federated schema");
                errors.push(e);
            }
        }
    }

    let surface = FederatedSurface {
        category,
        type_name: format!("{}Peers", category),
        peers: fields,
    };
    (surface, errors)
}

/// Translates one peer schema into its namespace field. Pure: the same
/// input always produces an equal field.
pub fn build_peer_field(
    peer: &str,
    schema: &PeerSchema,
    category: OperationCategory,
    aggregations: &[Aggregation],
) -> Result<PeerField, BuildError> {
    if !is_graphql_name(peer) {
        return Err(BuildError::InvalidPeerName(peer.to_string()));
    }

    let mut kinds = Vec::new();
    for kind in Kind::ALL {
        let classes = schema.classes(kind);
        if classes.is_empty() {
            continue;
        }

        let classes = classes
            .iter()
            .map(|class| -> Result<ClassField, BuildError> {
                let object = match category {
                    OperationCategory::Retrieve => retrieve_object(peer, schema, class)?,
                    OperationCategory::Aggregate => aggregate_object(peer, schema, class, aggregations)?,
                };
                Ok(ClassField {
                    name: class.name.clone(),
                    arguments: class_arguments(category),
                    object: Arc::new(object),
                    binding: ResolveBinding {
                        peer: peer.to_string(),
                        category,
                        kind,
                        class: class.name.clone(),
                    },
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        kinds.push(KindField {
            kind,
            type_name: format!("{}{}{}Obj", peer, category, kind),
            classes,
        });
    }

    Ok(PeerField {
        name: peer.to_string(),
        category,
        type_name: format!("{}{}Obj", peer, category),
        kinds,
    })
}

fn class_arguments(category: OperationCategory) -> Vec<ArgumentDef> {
    match category {
        OperationCategory::Retrieve => vec![
            ArgumentDef {
                name: "where",
                ty: ArgumentType::Object,
                required: false,
            },
            ArgumentDef {
                name: "limit",
                ty: ArgumentType::Int,
                required: false,
            },
        ],
        OperationCategory::Aggregate => vec![
            ArgumentDef {
                name: "groupBy",
                ty: ArgumentType::StringList,
                required: true,
            },
            ArgumentDef {
                name: "where",
                ty: ArgumentType::Object,
                required: false,
            },
        ],
    }
}

enum Primitive {
    Int,
    Number,
    String,
    Boolean,
    Date,
}

enum DataType {
    Primitive(Primitive),
    Reference(Vec<String>),
}

fn translate(peer: &str, schema: &PeerSchema, class: &SchemaClass, property: &SchemaProperty) -> Result<DataType, BuildError> {
    let untranslatable = || BuildError::UntranslatableField {
        peer: peer.to_string(),
        class: class.name.clone(),
        field: property.name.clone(),
        data_type: property.data_type.clone(),
    };

    if let [single] = property.data_type.as_slice() {
        let primitive = match single.as_str() {
            "int" => Some(Primitive::Int),
            "number" => Some(Primitive::Number),
            "string" | "text" => Some(Primitive::String),
            "boolean" => Some(Primitive::Boolean),
            "date" => Some(Primitive::Date),
            _ => None,
        };
        if let Some(primitive) = primitive {
            return Ok(DataType::Primitive(primitive));
        }
    }

    let references_known_classes = !property.data_type.is_empty()
        && property
            .data_type
            .iter()
            .all(|target| target.starts_with(char::is_uppercase) && schema.find_class(target).is_some());
    if references_known_classes {
        Ok(DataType::Reference(property.data_type.clone()))
    } else {
        Err(untranslatable())
    }
}

fn retrieve_object(peer: &str, schema: &PeerSchema, class: &SchemaClass) -> Result<ObjectType, BuildError> {
    let mut fields = Vec::with_capacity(class.properties.len());
    for property in &class.properties {
        let (node, list) = match translate(peer, schema, class, property)? {
            DataType::Primitive(Primitive::Int) => (OutputNode::Scalar(ScalarType::Int), false),
            DataType::Primitive(Primitive::Number) => (OutputNode::Scalar(ScalarType::Float), false),
            DataType::Primitive(Primitive::String | Primitive::Date) => (OutputNode::Scalar(ScalarType::String), false),
            DataType::Primitive(Primitive::Boolean) => (OutputNode::Scalar(ScalarType::Boolean), false),
            DataType::Reference(targets) => (OutputNode::Reference(targets), true),
        };
        fields.push(OutputField {
            name: property.name.clone(),
            node,
            list,
        });
    }

    Ok(ObjectType {
        name: format!("{}{}{}Obj", peer, OperationCategory::Retrieve, class.name),
        fields,
    })
}

fn aggregate_object(
    peer: &str,
    schema: &PeerSchema,
    class: &SchemaClass,
    aggregations: &[Aggregation],
) -> Result<ObjectType, BuildError> {
    let prefix = format!("{}{}{}", peer, OperationCategory::Aggregate, class.name);
    let mut fields = Vec::with_capacity(class.properties.len() + 1);

    for property in &class.properties {
        let summary: Vec<(&str, ScalarType)> = match translate(peer, schema, class, property)? {
            DataType::Primitive(Primitive::Int | Primitive::Number) => aggregations
                .iter()
                .map(|a| (a.field_name(), a.scalar()))
                .collect(),
            DataType::Primitive(Primitive::String | Primitive::Date) => vec![("count", ScalarType::Int)],
            DataType::Primitive(Primitive::Boolean) => vec![
                ("count", ScalarType::Int),
                ("totalTrue", ScalarType::Int),
                ("totalFalse", ScalarType::Int),
                ("percentageTrue", ScalarType::Float),
                ("percentageFalse", ScalarType::Float),
            ],
            DataType::Reference(_) => continue,
        };

        fields.push(OutputField {
            name: property.name.clone(),
            node: OutputNode::Summary(ObjectType {
                name: format!("{}{}Obj", prefix, property.name),
                fields: summary
                    .into_iter()
                    .map(|(name, scalar)| OutputField {
                        name: name.to_string(),
                        node: OutputNode::Scalar(scalar),
                        list: false,
                    })
                    .collect(),
            }),
            list: false,
        });
    }

    fields.push(OutputField {
        name: "groupedBy".to_string(),
        node: OutputNode::Object(ObjectType {
            name: format!("{}GroupedByObj", prefix),
            fields: vec![
                OutputField {
                    name: "value".to_string(),
                    node: OutputNode::Scalar(ScalarType::String),
                    list: false,
                },
                OutputField {
                    name: "path".to_string(),
                    node: OutputNode::Scalar(ScalarType::String),
                    list: true,
                },
            ],
        }),
        list: false,
    });

    Ok(ObjectType {
        name: format!("{}Obj", prefix),
        fields,
    })
}
