//! Neo4j over Bolt.

use super::columns::{resolve_return_columns, return_keys};
use super::deadline::{race, Interrupted};
use super::registry::{CancelHandle, ExecutionScope};
use super::{BackendAdapter, QueryRequest};
use crate::db::{create_graph, EngineConfig, GraphNativeEndpoint, QueryError, QueryResult};
use crate::normalize::{BoltNormalizer, Normalizer};
use neo4rs::BoltType;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

pub struct Neo4jAdapter<'a> {
    endpoint: &'a GraphNativeEndpoint,
}

impl<'a> Neo4jAdapter<'a> {
    pub fn new(endpoint: &'a GraphNativeEndpoint) -> Self {
        Self { endpoint }
    }
}

impl BackendAdapter for Neo4jAdapter<'_> {
    async fn execute(
        &self,
        request: &QueryRequest<'_>,
        scope: &ExecutionScope,
        config: &EngineConfig,
    ) -> Result<QueryResult, QueryError> {
        let graph = create_graph(self.endpoint, config.fetch_size, config.connect_timeout())
            .await
            .map_err(|e| QueryError::ConnectionFailure(format!("{:#}", e)))?;

        let signal = Arc::new(Notify::new());
        scope.register(CancelHandle::Session(Arc::clone(&signal))).await;

        let start = Instant::now();
        let deadline = start + request.timeout;

        debug!("submitting query to {}", self.endpoint.display_string());
        let mut stream = race(
            graph.execute(neo4rs::query(request.query)),
            deadline,
            Some(&signal),
        )
        .await
        .map_err(|i| interrupted(i, scope))?
        .map_err(|e| failure(&e, scope))?;

        let mut records = Vec::new();
        let fetch = async {
            while let Some(row) = stream.next().await? {
                records.push(row);
            }
            Ok::<_, neo4rs::Error>(())
        };
        race(fetch, deadline, Some(&signal))
            .await
            .map_err(|i| interrupted(i, scope))?
            .map_err(|e| failure(&e, scope))?;
        let elapsed = start.elapsed();

        // Closes the session before normalizing.
        drop(stream);
        drop(graph);
        debug!("fetched {} records in {:?}", records.len(), elapsed);

        let mut keyed = Vec::with_capacity(records.len());
        for row in &records {
            let map: HashMap<String, BoltType> = row
                .to()
                .map_err(|e| QueryError::backend(None, format!("undecodable record: {}", e)))?;
            keyed.push(map);
        }

        let columns = match keyed.first() {
            Some(first) => order_columns(&return_keys(request.query), first.keys()),
            None => resolve_return_columns(request.query),
        };
        let raw_rows = keyed
            .into_iter()
            .map(|mut map| {
                columns
                    .iter()
                    .map(|c| map.remove(c).unwrap_or(BoltType::Null(neo4rs::BoltNull)))
                    .collect()
            })
            .collect();

        let (rows, collector) = BoltNormalizer.normalize_rows(raw_rows);
        Ok(QueryResult::assemble(columns, rows, collector, elapsed))
    }
}

fn interrupted(reason: Interrupted, scope: &ExecutionScope) -> QueryError {
    match reason {
        Interrupted::Deadline => QueryError::Timeout,
        Interrupted::Signal => {
            if scope.is_cancelled() {
                QueryError::Cancelled
            } else {
                QueryError::backend(None, "session closed")
            }
        }
    }
}

fn failure(err: &neo4rs::Error, scope: &ExecutionScope) -> QueryError {
    if scope.is_cancelled() {
        QueryError::Cancelled
    } else {
        QueryError::from_neo4j_error(err)
    }
}

/// Record keys in RETURN-clause order; keys the clause did not predict
/// follow, sorted.
fn order_columns<'k>(expected: &[String], keys: impl Iterator<Item = &'k String>) -> Vec<String> {
    let mut remaining: Vec<&String> = keys.collect();
    remaining.sort();

    let mut columns = Vec::with_capacity(remaining.len());
    for name in expected {
        if let Some(pos) = remaining.iter().position(|k| *k == name) {
            columns.push(remaining.remove(pos).clone());
        }
    }
    columns.extend(remaining.into_iter().cloned());
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_order_follows_return_clause() {
        let expected = strings(&["n", "mn", "total"]);
        let keys = strings(&["total", "n", "mn"]);
        assert_eq!(order_columns(&expected, keys.iter()), vec!["n", "mn", "total"]);
    }

    #[test]
    fn test_property_and_expression_keys_keep_clause_order() {
        let keys = strings(&["m", "n.name"]);
        assert_eq!(
            order_columns(&return_keys("MATCH (n)-->(m) RETURN n.name, m"), keys.iter()),
            vec!["n.name", "m"]
        );

        let keys = strings(&["p.age", "p.name"]);
        assert_eq!(
            order_columns(&return_keys("MATCH (p:Person) RETURN p.name, p.age"), keys.iter()),
            vec!["p.name", "p.age"]
        );

        let keys = strings(&["count(*)", "n"]);
        assert_eq!(
            order_columns(&return_keys("MATCH (n) RETURN n, count(*)"), keys.iter()),
            vec!["n", "count(*)"]
        );
    }

    #[test]
    fn test_unpredicted_keys_sorted_after() {
        let expected = strings(&["n"]);
        let keys = strings(&["count(*)", "n", "a.x + 1"]);
        assert_eq!(
            order_columns(&expected, keys.iter()),
            vec!["n", "a.x + 1", "count(*)"]
        );
    }

    #[test]
    fn test_no_resolved_names() {
        let keys = strings(&["b", "a"]);
        assert_eq!(order_columns(&[], keys.iter()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_signal_without_cancel_flag_is_backend_error() {
        let registry = Arc::new(crate::engine::ExecutionRegistry::new(
            std::time::Duration::from_millis(10),
        ));
        let scope = ExecutionScope::open(Arc::clone(&registry), "s");
        assert!(matches!(
            interrupted(Interrupted::Signal, &scope),
            QueryError::Backend { .. }
        ));
        assert!(matches!(
            interrupted(Interrupted::Deadline, &scope),
            QueryError::Timeout
        ));
        scope.register(CancelHandle::Session(Arc::new(Notify::new()))).await;
        registry.cancel("s").await;
        assert!(matches!(
            interrupted(Interrupted::Signal, &scope),
            QueryError::Cancelled
        ));
    }
}
