use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::query_executor::QueryExecutor;
use crate::query_planner::QueryPlanner;
use crate::resolver::ExecutionContext;
use crate::response::ResponseTree;
use crate::schema_builder::{Aggregation, FederatedSchema, build_federated_schema};
use crate::schema_registry::SchemaRegistry;
use crate::{FederationError, GraphQLRequest};

pub struct FederationGateway {
    schema_registry: Arc<dyn SchemaRegistry>,
    query_planner: Arc<dyn QueryPlanner>,
    query_executor: Arc<dyn QueryExecutor>,
    context: ExecutionContext,
    aggregations: Vec<Aggregation>,
    federated_schema: RwLock<Option<Arc<FederatedSchema>>>,
}

impl FederationGateway {
    pub fn new(
        schema_registry: Arc<dyn SchemaRegistry>,
        query_planner: Arc<dyn QueryPlanner>,
        query_executor: Arc<dyn QueryExecutor>,
        context: ExecutionContext,
        aggregations: Vec<Aggregation>,
    ) -> Self {
        FederationGateway {
            schema_registry,
            query_planner,
            query_executor,
            context,
            aggregations,
            federated_schema: RwLock::new(None),
        }
    }

    /// The federated schema for the current registry generation, rebuilt
    /// only when the registry has changed since the last call.
    pub async fn schema(&self) -> Result<Arc<FederatedSchema>, FederationError> {
        let snapshot = self.schema_registry.peers().await?;

        if let Some(schema) = self.federated_schema.read().await.as_ref() {
            if schema.generation == snapshot.generation() {
                return Ok(schema.clone());
            }
        }

        let mut cached = self.federated_schema.write().await;
        if let Some(schema) = cached.as_ref() {
            if schema.generation == snapshot.generation() {
                return Ok(schema.clone());
            }
        }

        let schema = Arc::new(build_federated_schema(&snapshot, &self.aggregations));
        for error in &schema.errors {
            warn!(error = %error, "peer left out of the federated schema");
        }
        info!(generation = schema.generation, peers = snapshot.len(), "federated schema built");
        *cached = Some(schema.clone());
        Ok(schema)
    }

    pub async fn process_request(&self, request: GraphQLRequest) -> Result<ResponseTree, FederationError> {
        debug!(operation = ?request.operation_name, "processing request");

        let schema = self.schema().await?;
        let plan = self.query_planner.plan_query(&request, &schema).await?;
        debug!(invocations = plan.invocations.len(), "query planned");

        self.query_executor.execute_plan(plan, &self.context).await
    }
}
