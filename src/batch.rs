//! Batch creation of local things and actions.
//!
//! A batch body is authorized against the configured API keys, validated in
//! full, and only then handed to a [`BatchPersister`]. Synchronous batches
//! answer once the persister confirms; asynchronous ones answer `202` with
//! provisional records while persistence continues in the background.

use async_trait::async_trait;
use chrono::Utc;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ApiKey, Permission};
use crate::{BatchError, Kind, PeerSchema, ValidationError};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_TOKEN_HEADER: &str = "x-api-token";

const ALL_FIELDS: &str = "ALL";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BatchKind {
    Actions,
    Things,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Actions => "actions",
            BatchKind::Things => "things",
        }
    }

    /// Name of the identifier field on created records.
    pub fn id_field(&self) -> &'static str {
        match self {
            BatchKind::Actions => "actionId",
            BatchKind::Things => "thingId",
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            BatchKind::Actions => Kind::Actions,
            BatchKind::Things => Kind::Things,
        }
    }

    /// Values accepted in a body's `fields` list.
    pub fn allowed_fields(&self) -> [&'static str; 6] {
        [ALL_FIELDS, "@class", "schema", "key", self.id_field(), "creationTimeUnix"]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ObjectCreate {
    #[serde(rename = "@context", default)]
    pub context: Option<String>,
    #[serde(rename = "@class", default)]
    pub class: Option<String>,
    #[serde(default)]
    pub schema: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchCreateBody {
    #[serde(default)]
    pub actions: Vec<ObjectCreate>,
    #[serde(default)]
    pub things: Vec<ObjectCreate>,
    #[serde(rename = "async", default)]
    pub is_async: bool,
    /// Record fields to return; empty means all of them.
    #[serde(default)]
    pub fields: Vec<Option<String>>,
}

impl BatchCreateBody {
    pub fn items(&self, kind: BatchKind) -> &[ObjectCreate] {
        match kind {
            BatchKind::Actions => &self.actions,
            BatchKind::Things => &self.things,
        }
    }

    /// Requested field names with nulls and empty strings dropped.
    pub fn selected_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .flatten()
            .map(String::as_str)
            .filter(|f| !f.is_empty())
            .collect()
    }

    /// Checks the whole body. Every offending item and `fields` entry is
    /// reported, items first.
    pub fn validate(&self, kind: BatchKind, local_schema: &PeerSchema) -> Result<(), Vec<ValidationError>> {
        let invalid = |path: String, message: String| ValidationError {
            path,
            location: "body".to_string(),
            message,
        };
        let mut errors = Vec::new();

        let classes = local_schema.classes(kind.kind());
        for (i, item) in self.items(kind).iter().enumerate() {
            let item_path = format!("body.{}.{}", kind.as_str(), i);

            let class_name = match item.class.as_deref() {
                Some(name) if !name.is_empty() => name,
                _ => {
                    errors.push(invalid(format!("{}.@class", item_path), "is required".to_string()));
                    continue;
                }
            };
            let Some(class) = classes.iter().find(|c| c.name == class_name) else {
                errors.push(invalid(
                    format!("{}.@class", item_path),
                    format!("{} is not a {} class of the local schema", class_name, kind.kind()),
                ));
                continue;
            };
            for property in item.schema.keys() {
                if !class.properties.iter().any(|p| &p.name == property) {
                    errors.push(invalid(
                        format!("{}.schema.{}", item_path, property),
                        format!("is not a property of {}", class.name),
                    ));
                }
            }
        }

        let allowed = kind.allowed_fields();
        for (i, field) in self.fields.iter().enumerate() {
            let Some(field) = field.as_deref().filter(|f| !f.is_empty()) else {
                continue;
            };
            if !allowed.contains(&field) {
                errors.push(invalid(
                    format!("body.fields.{}", i),
                    format!("should be one of [{}]", allowed.join(" ")),
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Success,
    Pending,
}

/// An object accepted by a batch, as handed to the persister.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredObject {
    pub id: Uuid,
    pub kind: BatchKind,
    pub class: String,
    pub context: Option<String>,
    pub schema: Map<String, Value>,
    /// Id of the API key that created the object.
    pub key: String,
    pub creation_time_unix: i64,
}

impl StoredObject {
    /// The response record for this object, restricted to `fields`.
    pub fn record(&self, status: RecordStatus, fields: &[&str]) -> Value {
        let all = fields.is_empty() || fields.contains(&ALL_FIELDS);
        let wants = |name: &str| all || fields.contains(&name);

        let mut record = Map::new();
        if wants("@class") {
            record.insert("@class".to_string(), json!(self.class));
        }
        if let (true, Some(context)) = (all, &self.context) {
            record.insert("@context".to_string(), json!(context));
        }
        if wants("schema") {
            record.insert("schema".to_string(), Value::Object(self.schema.clone()));
        }
        if wants("key") {
            record.insert("key".to_string(), json!(self.key));
        }
        if wants(self.kind.id_field()) {
            record.insert(self.kind.id_field().to_string(), json!(self.id.to_string()));
        }
        if wants("creationTimeUnix") {
            record.insert("creationTimeUnix".to_string(), json!(self.creation_time_unix));
        }
        record.insert("result".to_string(), json!({ "status": status }));
        Value::Object(record)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: Vec<ErrorMessage>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorMessage {
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorResponse {
            error: vec![ErrorMessage {
                message: message.into(),
            }],
        }
    }
}

impl From<Vec<ValidationError>> for ErrorResponse {
    fn from(errors: Vec<ValidationError>) -> Self {
        ErrorResponse {
            error: errors
                .iter()
                .map(|e| ErrorMessage { message: e.to_string() })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BatchResponse {
    Ok(Vec<Value>),
    Accepted(Vec<Value>),
    Unauthorized,
    Forbidden,
    UnprocessableEntity(ErrorResponse),
    Failed(ErrorResponse),
}

impl BatchResponse {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BatchResponse::Ok(_) => StatusCode::OK,
            BatchResponse::Accepted(_) => StatusCode::ACCEPTED,
            BatchResponse::Unauthorized => StatusCode::UNAUTHORIZED,
            BatchResponse::Forbidden => StatusCode::FORBIDDEN,
            BatchResponse::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BatchResponse::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> Value {
        match self {
            BatchResponse::Ok(records) | BatchResponse::Accepted(records) => Value::Array(records.clone()),
            BatchResponse::Unauthorized => json!(ErrorResponse::new("missing or unknown API key")),
            BatchResponse::Forbidden => json!(ErrorResponse::new("API key lacks write permission")),
            BatchResponse::UnprocessableEntity(e) | BatchResponse::Failed(e) => json!(e),
        }
    }
}

#[async_trait]
pub trait BatchPersister: Send + Sync {
    async fn persist(&self, objects: Vec<StoredObject>) -> Result<(), BatchError>;
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<Vec<StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn get(&self, id: Uuid) -> Option<StoredObject> {
        self.objects.read().await.iter().find(|o| o.id == id).cloned()
    }
}

#[async_trait]
impl BatchPersister for InMemoryObjectStore {
    async fn persist(&self, objects: Vec<StoredObject>) -> Result<(), BatchError> {
        self.objects.write().await.extend(objects);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Credentials<'a> {
    pub key: &'a str,
    pub token: &'a str,
}

pub struct BatchService {
    local_schema: PeerSchema,
    api_keys: Vec<ApiKey>,
    persister: Arc<dyn BatchPersister>,
}

impl BatchService {
    pub fn new(local_schema: PeerSchema, api_keys: Vec<ApiKey>, persister: Arc<dyn BatchPersister>) -> Self {
        BatchService {
            local_schema,
            api_keys,
            persister,
        }
    }

    /// Matches the credentials against the configured keys. No configured
    /// keys means every request is unauthorized.
    fn authorize(&self, credentials: Option<Credentials<'_>>) -> Result<&ApiKey, BatchResponse> {
        let credentials = credentials.ok_or(BatchResponse::Unauthorized)?;
        let key = self
            .api_keys
            .iter()
            .find(|k| k.id == credentials.key && k.token == credentials.token)
            .ok_or(BatchResponse::Unauthorized)?;
        if !key.permissions.contains(&Permission::Write) {
            return Err(BatchResponse::Forbidden);
        }
        Ok(key)
    }

    pub async fn create(&self, kind: BatchKind, credentials: Option<Credentials<'_>>, body: &[u8]) -> BatchResponse {
        let key = match self.authorize(credentials) {
            Ok(key) => key,
            Err(response) => {
                warn!(kind = kind.as_str(), status = %response.status_code(), "batch rejected");
                return response;
            }
        };

        let body: BatchCreateBody = match serde_json::from_slice(body) {
            Ok(body) => body,
            Err(e) => {
                return BatchResponse::UnprocessableEntity(ErrorResponse::new(format!("invalid request body: {}", e)));
            }
        };
        if let Err(errors) = body.validate(kind, &self.local_schema) {
            info!(kind = kind.as_str(), violations = errors.len(), "batch failed validation");
            return BatchResponse::UnprocessableEntity(errors.into());
        }

        let creation_time_unix = Utc::now().timestamp_millis();
        let objects: Vec<StoredObject> = body
            .items(kind)
            .iter()
            .map(|item| StoredObject {
                id: Uuid::new_v4(),
                kind,
                class: item.class.clone().unwrap_or_default(),
                context: item.context.clone(),
                schema: item.schema.clone(),
                key: key.id.clone(),
                creation_time_unix,
            })
            .collect();

        let fields = body.selected_fields();
        if body.is_async {
            let records = objects.iter().map(|o| o.record(RecordStatus::Pending, &fields)).collect();
            let persister = self.persister.clone();
            let count = objects.len();
            tokio::spawn(async move {
                if let Err(e) = persister.persist(objects).await {
                    warn!(error = %e, "background batch persistence failed");
                }
            });
            info!(kind = kind.as_str(), count, "batch accepted");
            BatchResponse::Accepted(records)
        } else {
            let records = objects.iter().map(|o| o.record(RecordStatus::Success, &fields)).collect();
            let count = objects.len();
            match self.persister.persist(objects).await {
                Ok(()) => {
                    info!(kind = kind.as_str(), count, "batch persisted");
                    BatchResponse::Ok(records)
                }
                Err(e) => {
                    warn!(error = %e, "batch persistence failed");
                    BatchResponse::Failed(ErrorResponse::new(e.to_string()))
                }
            }
        }
    }
}
