use super::Normalizer;
use crate::agtype::{self, AgValue, Edge, Vertex};
use crate::db::{
    node_display, relationship_display, CellValue, GraphCollector, GraphNode, GraphRef,
    GraphRelationship,
};
use tracing::debug;

/// A PostgreSQL cell after column-type decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum PgCell {
    /// Text form of an `agtype` column.
    Agtype(String),
    /// A text-typed column. It may still hold annotated agtype text, e.g.
    /// when the query casts `::text`.
    Text(String),
    /// Anything already decoded into a cell.
    Value(CellValue),
}

/// Normalizer for rows returned by AGE through SQL.
#[derive(Debug, Default, Clone, Copy)]
pub struct AgtypeNormalizer;

impl Normalizer for AgtypeNormalizer {
    type Value = PgCell;

    fn normalize_value(&self, value: PgCell, graph: &mut GraphCollector) -> CellValue {
        match value {
            PgCell::Agtype(raw) => normalize_text(raw, graph),
            PgCell::Text(raw) if looks_annotated(&raw) => normalize_text(raw, graph),
            PgCell::Text(raw) => CellValue::Text(raw),
            PgCell::Value(cell) => cell,
        }
    }
}

fn looks_annotated(raw: &str) -> bool {
    ["::vertex", "::edge", "::path"]
        .iter()
        .any(|suffix| raw.contains(suffix))
}

fn normalize_text(raw: String, graph: &mut GraphCollector) -> CellValue {
    match agtype::parse(&raw) {
        Ok(value) if value.has_graph() => cell_from(value, graph),
        Ok(_) => CellValue::Opaque(raw),
        Err(e) => {
            debug!("agtype left unparsed: {}", e);
            CellValue::Opaque(raw)
        }
    }
}

fn cell_from(value: AgValue, graph: &mut GraphCollector) -> CellValue {
    match value {
        AgValue::Vertex(v) => CellValue::Graph(collect_vertex(v, graph)),
        AgValue::Edge(e) => CellValue::Graph(collect_edge(e, graph)),
        AgValue::Path(items) => CellValue::Graph(collect_path(items, graph)),
        AgValue::List(items) => {
            CellValue::List(items.into_iter().map(|v| cell_from(v, graph)).collect())
        }
        AgValue::Map(entries) => CellValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k, cell_from(v, graph)))
                .collect(),
        ),
        AgValue::Scalar(json) => CellValue::from(&json),
    }
}

fn collect_vertex(vertex: Vertex, graph: &mut GraphCollector) -> GraphRef {
    let labels = if vertex.label.is_empty() {
        Vec::new()
    } else {
        vec![vertex.label]
    };
    let display = node_display(&labels, &vertex.properties);
    let id = vertex.id;
    graph.insert_node(GraphNode {
        id: id.clone(),
        labels,
        properties: vertex.properties,
    });
    GraphRef::node(id, display)
}

fn collect_edge(edge: Edge, graph: &mut GraphCollector) -> GraphRef {
    let display = relationship_display(&edge.label);
    let id = edge.id;
    graph.insert_relationship(GraphRelationship {
        id: id.clone(),
        rel_type: edge.label,
        start_node_id: edge.start_id,
        end_node_id: edge.end_id,
        properties: edge.properties,
    });
    GraphRef::relationship(id, display)
}

fn collect_path(items: Vec<AgValue>, graph: &mut GraphCollector) -> GraphRef {
    let (mut nodes, mut rels) = (0usize, 0usize);
    for item in items {
        match item {
            AgValue::Vertex(v) => {
                collect_vertex(v, graph);
                nodes += 1;
            }
            AgValue::Edge(e) => {
                collect_edge(e, graph);
                rels += 1;
            }
            AgValue::Map(entries) => {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .into_iter()
                    .map(|(k, v)| (k, to_json(v)))
                    .collect();
                if map.contains_key("start_id") || map.contains_key("end_id") {
                    collect_edge(agtype::edge_from(map), graph);
                    rels += 1;
                } else {
                    collect_vertex(agtype::vertex_from(map), graph);
                    nodes += 1;
                }
            }
            other => debug!("skipping non-element path item: {:?}", other),
        }
    }
    GraphRef::path(format!("Path(nodes={}, rels={})", nodes, rels))
}

/// Back to plain JSON, for map bodies that lost their annotation.
fn to_json(value: AgValue) -> serde_json::Value {
    use serde_json::{json, Value};
    match value {
        AgValue::Scalar(v) => v,
        AgValue::List(items) | AgValue::Path(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        AgValue::Map(entries) => {
            Value::Object(entries.into_iter().map(|(k, v)| (k, to_json(v))).collect())
        }
        AgValue::Vertex(v) => json!({"id": v.id, "label": v.label, "properties": v.properties}),
        AgValue::Edge(e) => json!({
            "id": e.id,
            "label": e.label,
            "start_id": e.start_id,
            "end_id": e.end_id,
            "properties": e.properties,
        }),
    }
}
