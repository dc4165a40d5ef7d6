use super::{
    create_client, create_graph, ConnectionDescriptor, EngineConfig, GraphNativeEndpoint,
    QueryError, RelationalEndpoint,
};
use crate::engine::prepare_session;
use serde::Serialize;
use std::collections::BTreeSet;
use tokio_postgres::Client;
use tracing::debug;

/// Rows sampled per label table when collecting AGE property keys.
const PROPERTY_SAMPLE_ROWS: usize = 5;

/// Internal AGE labels every graph has.
const AGE_BASE_LABELS: [&str; 2] = ["_ag_label_vertex", "_ag_label_edge"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSchema {
    pub labels: Vec<String>,
    pub relationship_types: Vec<String>,
    pub property_keys: Vec<String>,
}

impl GraphSchema {
    fn sorted(mut self) -> Self {
        self.labels.sort();
        self.relationship_types.sort();
        self.property_keys.sort();
        self
    }
}

/// Node labels, relationship types and property keys of the target graph.
pub async fn introspect(
    connection: &ConnectionDescriptor,
    config: &EngineConfig,
) -> Result<GraphSchema, QueryError> {
    let schema = match connection {
        ConnectionDescriptor::GraphNative(endpoint) => introspect_neo4j(endpoint, config).await?,
        ConnectionDescriptor::RelationalGraph(endpoint) => {
            introspect_age(endpoint, config).await?
        }
    };
    Ok(schema.sorted())
}

/// Open a connection and run a trivial statement.
pub async fn test_connection(
    connection: &ConnectionDescriptor,
    config: &EngineConfig,
) -> Result<(), QueryError> {
    match connection {
        ConnectionDescriptor::GraphNative(endpoint) => {
            let column = neo4j_column(endpoint, config, "RETURN 1 AS n", "n").await?;
            debug!("neo4j answered {} row(s)", column.len());
            Ok(())
        }
        ConnectionDescriptor::RelationalGraph(endpoint) => {
            let client = create_client(endpoint, config.connect_timeout()).await?;
            prepare_session(&client).await?;
            ensure_graph(&client, &endpoint.graph_name).await
        }
    }
}

async fn introspect_neo4j(
    endpoint: &GraphNativeEndpoint,
    config: &EngineConfig,
) -> Result<GraphSchema, QueryError> {
    Ok(GraphSchema {
        labels: neo4j_column(endpoint, config, "CALL db.labels()", "label").await?,
        relationship_types: neo4j_column(
            endpoint,
            config,
            "CALL db.relationshipTypes()",
            "relationshipType",
        )
        .await?,
        property_keys: neo4j_column(endpoint, config, "CALL db.propertyKeys()", "propertyKey")
            .await?,
    })
}

/// Run `query` and collect one column of every row as text.
async fn neo4j_column(
    endpoint: &GraphNativeEndpoint,
    config: &EngineConfig,
    query: &str,
    column: &str,
) -> Result<Vec<String>, QueryError> {
    let graph = create_graph(endpoint, config.fetch_size, config.connect_timeout()).await?;
    let mut stream = graph
        .execute(neo4rs::query(query))
        .await
        .map_err(|e| QueryError::from_neo4j_error(&e))?;

    let mut values = Vec::new();
    while let Some(row) = stream
        .next()
        .await
        .map_err(|e| QueryError::from_neo4j_error(&e))?
    {
        match row.get::<neo4rs::BoltType>(column) {
            Ok(neo4rs::BoltType::String(s)) => values.push(s.value),
            Ok(other) => values.push(format!("{:?}", other)),
            Err(e) => debug!("row without '{}': {}", column, e),
        }
    }
    Ok(values)
}

async fn introspect_age(
    endpoint: &RelationalEndpoint,
    config: &EngineConfig,
) -> Result<GraphSchema, QueryError> {
    let client = create_client(endpoint, config.connect_timeout()).await?;
    prepare_session(&client).await?;
    ensure_graph(&client, &endpoint.graph_name).await?;

    let sql = r#"
        SELECT l.name::text AS name, l.kind::text AS kind
        FROM ag_catalog.ag_label l
        JOIN ag_catalog.ag_graph g ON l.graph = g.graphid
        WHERE g.name::text = $1
          AND l.name::text <> ALL($2)
        "#;
    let base_labels: Vec<String> = AGE_BASE_LABELS.iter().map(|s| s.to_string()).collect();
    let rows = client
        .query(sql, &[&endpoint.graph_name, &base_labels])
        .await
        .map_err(|e| QueryError::from_pg_error(&e, sql))?;

    let mut schema = GraphSchema::default();
    let mut label_names = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.get("name");
        let kind: String = row.get("kind");
        match kind.as_str() {
            "v" => schema.labels.push(name.clone()),
            "e" => schema.relationship_types.push(name.clone()),
            _ => {}
        }
        label_names.push(name);
    }

    let mut samples = Vec::new();
    for label in &label_names {
        let sample = format!(
            "SELECT properties::text FROM {}.{} LIMIT {}",
            quote_ident(&endpoint.graph_name),
            quote_ident(label),
            PROPERTY_SAMPLE_ROWS
        );
        match client.query(sample.as_str(), &[]).await {
            Ok(rows) => samples.extend(rows.iter().filter_map(|r| r.get::<_, Option<String>>(0))),
            // Label tables can be missing for labels created but never used.
            Err(e) => debug!("skipping label '{}': {}", label, e),
        }
    }
    schema.property_keys = property_keys(&samples);
    Ok(schema)
}

async fn ensure_graph(client: &Client, graph_name: &str) -> Result<(), QueryError> {
    let sql = "SELECT 1 FROM ag_catalog.ag_graph WHERE name::text = $1";
    let found = client
        .query_opt(sql, &[&graph_name])
        .await
        .map_err(|e| QueryError::from_pg_error(&e, sql))?;
    match found {
        Some(_) => Ok(()),
        None => Err(QueryError::SchemaNotFound(graph_name.to_string())),
    }
}

/// Keys of every JSON object among `samples`, deduplicated and sorted.
fn property_keys(samples: &[String]) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for text in samples {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(text) {
            keys.extend(map.into_iter().map(|(k, _)| k));
        }
    }
    keys.into_iter().collect()
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
