//! Query dispatch: pick the backend for a connection, run the query under a
//! deadline, and hand back one [`QueryResult`] shape for both backends.

mod age;
pub mod classify;
pub mod columns;
mod deadline;
mod neo4j;
mod registry;

pub use age::build_cypher_wrapper;
pub use columns::resolve_return_columns;
pub use registry::{CancelHandle, ExecutionRecord, ExecutionRegistry, ExecutionScope};

pub(crate) use age::prepare_session;

use crate::db::{ConnectionDescriptor, EngineConfig, QueryError, QueryResult};
use age::AgeAdapter;
use neo4j::Neo4jAdapter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Resolves the connection a session is currently using.
pub trait ConnectionSource {
    fn active_connection(&self, session_id: &str) -> Option<ConnectionDescriptor>;
}

/// One query as handed to a backend adapter.
#[derive(Debug, Clone, Copy)]
pub struct QueryRequest<'q> {
    pub query: &'q str,
    pub timeout: Duration,
    /// Wrap the text in AGE's `cypher()` call before sending it.
    pub passthrough: bool,
}

/// A backend able to run one query to completion.
///
/// Implementations register a cancel handle on `scope` before doing any
/// deadline-bounded work and release their connection on every path.
pub(crate) trait BackendAdapter {
    async fn execute(
        &self,
        request: &QueryRequest<'_>,
        scope: &ExecutionScope,
        config: &EngineConfig,
    ) -> Result<QueryResult, QueryError>;
}

pub struct Engine {
    registry: Arc<ExecutionRegistry>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(ExecutionRegistry::new(config.connect_timeout())),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    /// Run `query` on `connection` for `session_id`.
    ///
    /// A `timeout_ms` of zero uses the configured default.
    pub async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        query: &str,
        timeout_ms: u64,
        session_id: &str,
        passthrough: bool,
    ) -> Result<QueryResult, QueryError> {
        let request = QueryRequest {
            query,
            timeout: self.timeout_for(timeout_ms),
            passthrough,
        };
        match connection {
            ConnectionDescriptor::GraphNative(endpoint) => {
                self.run(&Neo4jAdapter::new(endpoint), request, session_id)
                    .await
            }
            ConnectionDescriptor::RelationalGraph(endpoint) => {
                self.run(&AgeAdapter::new(endpoint), request, session_id)
                    .await
            }
        }
    }

    /// Like [`execute`](Self::execute), on whatever connection `source`
    /// has active for the session.
    pub async fn execute_for_session<S: ConnectionSource>(
        &self,
        source: &S,
        query: &str,
        timeout_ms: u64,
        session_id: &str,
        passthrough: bool,
    ) -> Result<QueryResult, QueryError> {
        let connection = source
            .active_connection(session_id)
            .ok_or(QueryError::NoActiveConnection)?;
        self.execute(&connection, query, timeout_ms, session_id, passthrough)
            .await
    }

    /// Cancel whatever is running for `session_id`. False if nothing was.
    pub async fn cancel(&self, session_id: &str) -> bool {
        self.registry.cancel(session_id).await
    }

    fn timeout_for(&self, timeout_ms: u64) -> Duration {
        if timeout_ms == 0 {
            Duration::from_millis(self.config.default_timeout_ms)
        } else {
            Duration::from_millis(timeout_ms)
        }
    }

    async fn run<A: BackendAdapter>(
        &self,
        adapter: &A,
        request: QueryRequest<'_>,
        session_id: &str,
    ) -> Result<QueryResult, QueryError> {
        let scope = ExecutionScope::open(Arc::clone(&self.registry), session_id);
        info!(
            session = %session_id,
            query = %scope.query_id(),
            timeout_ms = request.timeout.as_millis() as u64,
            "query started"
        );

        let outcome = adapter.execute(&request, &scope, &self.config).await;
        match &outcome {
            Ok(result) => info!(
                session = %session_id,
                query = %scope.query_id(),
                rows = result.row_count,
                nodes = result.nodes.len(),
                relationships = result.relationships.len(),
                elapsed_ms = result.execution_time_ms(),
                "query finished"
            ),
            Err(e) => warn!(
                session = %session_id,
                query = %scope.query_id(),
                code = e.code().unwrap_or("-"),
                "query failed: {}",
                e
            ),
        }
        outcome
    }
}
