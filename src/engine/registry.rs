//! Bookkeeping for in-flight queries, keyed by session id, and the
//! out-of-band cancellation path.

use crate::db::{create_client, RelationalEndpoint};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How to stop a running query from outside the task executing it.
#[derive(Debug, Clone)]
pub enum CancelHandle {
    /// Wakes the task holding the Bolt session, which then drops it.
    Session(Arc<Notify>),
    /// A PostgreSQL backend process to signal with `pg_cancel_backend`.
    Backend {
        endpoint: RelationalEndpoint,
        pid: i32,
    },
}

impl CancelHandle {
    /// Issue the termination action. Returns once it has been sent.
    pub async fn cancel(&self, connect_timeout: Duration) -> bool {
        match self {
            CancelHandle::Session(signal) => {
                signal.notify_one();
                true
            }
            CancelHandle::Backend { endpoint, pid } => {
                let client = match create_client(endpoint, connect_timeout).await {
                    Ok(client) => client,
                    Err(e) => {
                        warn!("cancel side connection failed: {:#}", e);
                        return false;
                    }
                };
                match client
                    .query_one("SELECT pg_cancel_backend($1)", &[pid])
                    .await
                {
                    Ok(row) => {
                        let signalled: bool = row.try_get(0).unwrap_or(false);
                        debug!("pg_cancel_backend({}) -> {}", pid, signalled);
                        true
                    }
                    Err(e) => {
                        warn!("pg_cancel_backend({}) failed: {}", pid, e);
                        false
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub session_id: String,
    pub query_id: Uuid,
    pub handle: CancelHandle,
    pub cancelled: Arc<AtomicBool>,
}

/// At most one running query per session.
#[derive(Debug)]
pub struct ExecutionRegistry {
    records: DashMap<String, ExecutionRecord>,
    connect_timeout: Duration,
}

impl ExecutionRegistry {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            records: DashMap::new(),
            connect_timeout,
        }
    }

    /// Store `record`, returning whatever it replaced.
    pub fn register(&self, record: ExecutionRecord) -> Option<ExecutionRecord> {
        self.records.insert(record.session_id.clone(), record)
    }

    /// Cancel the query running for `session_id`.
    ///
    /// Returns false when nothing is running or the termination action
    /// could not be issued.
    pub async fn cancel(&self, session_id: &str) -> bool {
        // Clone out so no shard guard lives across the await below.
        let record = match self.records.get(session_id) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!("cancel: no query running for session {}", session_id);
                return false;
            }
        };
        self.terminate(&record).await
    }

    pub(crate) async fn terminate(&self, record: &ExecutionRecord) -> bool {
        record.cancelled.store(true, Ordering::SeqCst);
        info!(
            session = %record.session_id,
            query = %record.query_id,
            "cancelling query"
        );
        record.handle.cancel(self.connect_timeout).await
    }

    pub fn unregister(&self, session_id: &str) {
        self.records.remove(session_id);
    }

    /// Remove the record for `session_id` only if it still belongs to `query_id`.
    pub fn unregister_query(&self, session_id: &str, query_id: Uuid) {
        self.records
            .remove_if(session_id, |_, record| record.query_id == query_id);
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.records.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One query's stay in the registry. Dropping the scope removes its record.
#[derive(Debug)]
pub struct ExecutionScope {
    registry: Arc<ExecutionRegistry>,
    session_id: String,
    query_id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl ExecutionScope {
    pub fn open(registry: Arc<ExecutionRegistry>, session_id: &str) -> Self {
        Self {
            registry,
            session_id: session_id.to_string(),
            query_id: Uuid::new_v4(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish this query's cancel handle. A query already running for the
    /// same session is cancelled.
    pub async fn register(&self, handle: CancelHandle) {
        let record = ExecutionRecord {
            session_id: self.session_id.clone(),
            query_id: self.query_id,
            handle,
            cancelled: Arc::clone(&self.cancelled),
        };
        if let Some(prior) = self.registry.register(record) {
            if prior.query_id != self.query_id {
                warn!(
                    session = %self.session_id,
                    replaced = %prior.query_id,
                    "session already had a running query, cancelling it"
                );
                self.registry.terminate(&prior).await;
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }
}

impl Drop for ExecutionScope {
    fn drop(&mut self) {
        self.registry
            .unregister_query(&self.session_id, self.query_id);
    }
}
