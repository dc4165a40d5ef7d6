//! Apache AGE through the PostgreSQL wire protocol.

use super::columns::resolve_return_columns;
use super::deadline::race;
use super::registry::{CancelHandle, ExecutionScope};
use super::{BackendAdapter, QueryRequest};
use crate::agtype::AgtypeText;
use crate::db::{create_client, CellValue, EngineConfig, QueryError, QueryResult, RelationalEndpoint};
use crate::normalize::{AgtypeNormalizer, Normalizer, PgCell};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tokio::time::Instant;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, Row};
use tracing::debug;

const LOAD_AGE: &str = "LOAD 'age'";
const SEARCH_PATH: &str = "SET search_path = ag_catalog, \"$user\", public";

pub struct AgeAdapter<'a> {
    endpoint: &'a RelationalEndpoint,
}

impl<'a> AgeAdapter<'a> {
    pub fn new(endpoint: &'a RelationalEndpoint) -> Self {
        Self { endpoint }
    }

    fn statement(&self, request: &QueryRequest<'_>) -> Result<String, QueryError> {
        if !request.passthrough {
            return Ok(request.query.to_string());
        }
        if self.endpoint.graph_name.is_empty() {
            return Err(QueryError::backend(
                None,
                "passthrough needs a graph name on the connection",
            ));
        }
        Ok(build_cypher_wrapper(&self.endpoint.graph_name, request.query))
    }
}

impl BackendAdapter for AgeAdapter<'_> {
    async fn execute(
        &self,
        request: &QueryRequest<'_>,
        scope: &ExecutionScope,
        config: &EngineConfig,
    ) -> Result<QueryResult, QueryError> {
        let sql = self.statement(request)?;
        let client = create_client(self.endpoint, config.connect_timeout()).await?;

        prepare_session(&client).await?;
        let pid: i32 = client
            .query_one("SELECT pg_backend_pid()", &[])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|e| QueryError::from_pg_error(&e, "SELECT pg_backend_pid()"))?;
        scope
            .register(CancelHandle::Backend {
                endpoint: self.endpoint.clone(),
                pid,
            })
            .await;

        let timeout_ms = request.timeout.as_millis();
        let set_timeout = format!("SET statement_timeout = {}", timeout_ms);
        client
            .batch_execute(&set_timeout)
            .await
            .map_err(|e| failure(&e, &set_timeout, scope))?;

        // A cancel that reached an idle backend did nothing there.
        ensure_not_cancelled(scope)?;

        debug!(pid, session = %scope.session_id(), "executing: {}", sql);
        let start = Instant::now();
        let guard = start + request.timeout + config.statement_grace();
        let rows = race(client.query(sql.as_str(), &[]), guard, None)
            .await
            .map_err(|_| QueryError::Timeout)?
            .map_err(|e| failure(&e, &sql, scope))?;
        let elapsed = start.elapsed();

        // Ends the connection task.
        drop(client);

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_else(|| {
                if request.passthrough {
                    resolve_return_columns(request.query)
                } else {
                    Vec::new()
                }
            });
        let raw_rows = rows
            .iter()
            .map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(i, col)| extract_cell(row, i, col.type_()))
                    .collect()
            })
            .collect();

        let (rows, collector) = AgtypeNormalizer.normalize_rows(raw_rows);
        Ok(QueryResult::assemble(columns, rows, collector, elapsed))
    }
}

/// Statements every fresh AGE connection needs before running Cypher.
pub(crate) async fn prepare_session(client: &Client) -> Result<(), QueryError> {
    for stmt in [LOAD_AGE, SEARCH_PATH] {
        debug!("{}", stmt);
        client
            .batch_execute(stmt)
            .await
            .map_err(|e| QueryError::from_pg_error(&e, stmt))?;
    }
    Ok(())
}

fn failure(err: &tokio_postgres::Error, sql: &str, scope: &ExecutionScope) -> QueryError {
    interruption(err.code(), scope.is_cancelled())
        .unwrap_or_else(|| QueryError::from_pg_error(err, sql))
}

/// `query_canceled` is either our cancel or `statement_timeout` firing;
/// the scope's flag tells them apart. Other states are not interruptions.
fn interruption(code: Option<&SqlState>, cancelled: bool) -> Option<QueryError> {
    match code {
        Some(state) if *state == SqlState::QUERY_CANCELED => Some(if cancelled {
            QueryError::Cancelled
        } else {
            QueryError::Timeout
        }),
        _ => None,
    }
}

fn ensure_not_cancelled(scope: &ExecutionScope) -> Result<(), QueryError> {
    if scope.is_cancelled() {
        Err(QueryError::Cancelled)
    } else {
        Ok(())
    }
}

/// Wrap a Cypher query in AGE's `cypher()` set-returning function.
///
/// `$$` inside the query would end the dollar-quoted body early, so it is
/// escaped first.
pub fn build_cypher_wrapper(graph: &str, query: &str) -> String {
    let columns: Vec<String> = resolve_return_columns(query)
        .into_iter()
        .map(|c| format!("{} agtype", c))
        .collect();
    format!(
        "SELECT * FROM cypher('{}', $$\n{}\n$$) AS ({});",
        graph.replace('\'', "''"),
        query.replace("$$", "\\$\\$"),
        columns.join(", ")
    )
}

fn extract_cell(row: &Row, idx: usize, pg_type: &Type) -> PgCell {
    if pg_type.name() == "agtype" {
        return match row.try_get::<_, Option<AgtypeText>>(idx) {
            Ok(Some(AgtypeText(text))) => PgCell::Agtype(text),
            Ok(None) => PgCell::Value(CellValue::Null),
            Err(e) => PgCell::Value(CellValue::Opaque(format!("<{}>", e))),
        };
    }

    let cell = match *pg_type {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v.into())),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| CellValue::Float(v.into())),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Float),
        Type::TEXT | Type::VARCHAR | Type::NAME | Type::CHAR | Type::BPCHAR => {
            return row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(PgCell::Text)
                .unwrap_or(PgCell::Value(CellValue::Null));
        }
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Bytes),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Date),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Time),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(CellValue::DateTime),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<FixedOffset>>>(idx)
            .ok()
            .flatten()
            .map(CellValue::TimestampTz),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(CellValue::Json),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map(|v| v.map(CellValue::Text))
            .unwrap_or_else(|_| Some(CellValue::Opaque(format!("<{}>", pg_type.name())))),
    };
    PgCell::Value(cell.unwrap_or(CellValue::Null))
}
