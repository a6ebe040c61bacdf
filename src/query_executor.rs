use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::FederationError;
use crate::query_planner::QueryPlan;
use crate::resolver::ExecutionContext;
use crate::response::{FieldError, ResponseTree};

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute_plan(&self, plan: QueryPlan, ctx: &ExecutionContext) -> Result<ResponseTree, FederationError>;
}

/// Runs every invocation of a plan at once and composes the answers.
///
/// The calls are polled together on the caller's task, so when the query
/// times out or its future is dropped, every outstanding peer call is
/// dropped with it.
pub struct ConcurrentQueryExecutor {
    query_timeout: Duration,
}

impl ConcurrentQueryExecutor {
    pub fn new(query_timeout: Duration) -> Self {
        ConcurrentQueryExecutor { query_timeout }
    }
}

#[async_trait]
impl QueryExecutor for ConcurrentQueryExecutor {
    async fn execute_plan(&self, plan: QueryPlan, ctx: &ExecutionContext) -> Result<ResponseTree, FederationError> {
        let mut tree = ResponseTree::new();
        // Fix the key order to query order before anything completes.
        for invocation in &plan.invocations {
            tree.insert(&invocation.path, Value::Null);
        }

        let calls = plan.invocations.iter().map(|invocation| async move {
            let result = invocation
                .binding
                .resolve(ctx, invocation.arguments.clone(), invocation.selections.clone())
                .await;
            (invocation, result)
        });

        let results = tokio::time::timeout(self.query_timeout, join_all(calls))
            .await
            .map_err(|_| {
                warn!(timeout_ms = self.query_timeout.as_millis() as u64, "query timed out, abandoning peer calls");
                FederationError::Timeout(self.query_timeout)
            })?;

        for (invocation, result) in results {
            let peer = &invocation.binding.peer;
            match result {
                Ok(resolved) => {
                    debug!(peer = %peer, path = ?invocation.path, "field resolved");
                    tree.insert(&invocation.path, resolved.value);
                    for error in resolved.peer_errors {
                        tree.push_error(FieldError {
                            message: error.message,
                            path: invocation.path.clone(),
                            peer: peer.clone(),
                        });
                    }
                }
                Err(e) => {
                    warn!(peer = %peer, path = ?invocation.path, error = %e, "field resolution failed");
                    tree.push_error(FieldError {
                        message: e.to_string(),
                        path: invocation.path.clone(),
                        peer: peer.clone(),
                    });
                }
            }
        }

        Ok(tree)
    }
}
