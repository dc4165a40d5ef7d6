use crate::engine::classify;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Property bag shared by nodes and relationships.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Longest property value used verbatim in a display string.
const DISPLAY_MAX_CHARS: usize = 50;

/// Properties consulted, in order, when naming a graph element.
const DISPLAY_KEYS: [&str; 4] = ["name", "title", "label", "id"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    /// Backend-scoped identity (Neo4j id or AGE graphid).
    pub id: String,
    pub labels: Vec<String>,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphRelationship {
    pub id: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub start_node_id: String,
    pub end_node_id: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphRefKind {
    Node,
    #[serde(rename = "rel")]
    Relationship,
    Path,
}

/// A cell standing in for a graph element stored in the result's node or
/// relationship set. Paths carry no id; their elements live in the sets.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphRef {
    pub kind: GraphRefKind,
    pub id: Option<String>,
    pub display: String,
}

impl GraphRef {
    pub fn node(id: impl Into<String>, display: String) -> Self {
        Self {
            kind: GraphRefKind::Node,
            id: Some(id.into()),
            display,
        }
    }

    pub fn relationship(id: impl Into<String>, display: String) -> Self {
        Self {
            kind: GraphRefKind::Relationship,
            id: Some(id.into()),
            display,
        }
    }

    pub fn path(display: String) -> Self {
        Self {
            kind: GraphRefKind::Path,
            id: None,
            display,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Json(serde_json::Value),
    List(Vec<CellValue>),
    Map(BTreeMap<String, CellValue>),
    /// A backend value that could not be decoded, kept verbatim.
    Opaque(String),
    Graph(GraphRef),
}

impl CellValue {
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Bytes(b) => format!("[{} bytes]", b.len()),
            CellValue::Date(d) => d.to_string(),
            CellValue::Time(t) => t.to_string(),
            CellValue::DateTime(dt) => dt.to_string(),
            CellValue::TimestampTz(dt) => dt.to_string(),
            CellValue::Json(j) => j.to_string(),
            CellValue::List(items) => {
                let items: Vec<String> = items.iter().map(|v| v.display()).collect();
                format!("[{}]", items.join(", "))
            }
            CellValue::Map(entries) => {
                let entries: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.display()))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            CellValue::Opaque(s) => s.clone(),
            CellValue::Graph(r) => r.display.clone(),
        }
    }

    pub fn as_graph_ref(&self) -> Option<&GraphRef> {
        match self {
            CellValue::Graph(r) => Some(r),
            _ => None,
        }
    }
}

impl From<&serde_json::Value> for CellValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Int(i),
                None => CellValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => CellValue::Text(s.clone()),
            serde_json::Value::Array(items) => {
                CellValue::List(items.iter().map(CellValue::from).collect())
            }
            serde_json::Value::Object(map) => CellValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), CellValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Deduplicated node and relationship sets filled while normalizing rows.
/// Insertion order is preserved; the first occurrence of an id wins.
#[derive(Debug, Default)]
pub struct GraphCollector {
    nodes: Vec<GraphNode>,
    node_index: HashMap<String, usize>,
    relationships: Vec<GraphRelationship>,
    relationship_index: HashMap<String, usize>,
}

impl GraphCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_relationship(&self, id: &str) -> bool {
        self.relationship_index.contains_key(id)
    }

    /// Returns false if a node with the same id was already collected.
    pub fn insert_node(&mut self, node: GraphNode) -> bool {
        if self.node_index.contains_key(&node.id) {
            return false;
        }
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        true
    }

    /// Returns false if a relationship with the same id was already collected.
    pub fn insert_relationship(&mut self, rel: GraphRelationship) -> bool {
        if self.relationship_index.contains_key(&rel.id) {
            return false;
        }
        self.relationship_index
            .insert(rel.id.clone(), self.relationships.len());
        self.relationships.push(rel);
        true
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn into_parts(self) -> (Vec<GraphNode>, Vec<GraphRelationship>) {
        (self.nodes, self.relationships)
    }
}

/// The unified table + graph view of one query's output.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
    pub execution_time: Duration,
    pub row_count: usize,
    /// Every cell is a graph element and there is at least one relationship to draw.
    pub is_graph_compatible: bool,
    /// Every cell is a path; the table view adds nothing.
    pub is_paths_only: bool,
}

impl QueryResult {
    pub fn empty(execution_time: Duration) -> Self {
        Self::assemble(Vec::new(), Vec::new(), GraphCollector::new(), execution_time)
    }

    /// Build the final result and compute its derived fields.
    pub fn assemble(
        columns: Vec<String>,
        rows: Vec<Vec<CellValue>>,
        graph: GraphCollector,
        execution_time: Duration,
    ) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        let (nodes, relationships) = graph.into_parts();
        let is_graph_compatible = classify::is_graph_compatible(&rows, relationships.len());
        let is_paths_only = classify::is_paths_only(&rows);
        let row_count = rows.len();
        Self {
            columns,
            rows,
            nodes,
            relationships,
            execution_time,
            row_count,
            is_graph_compatible,
            is_paths_only,
        }
    }

    pub fn execution_time_ms(&self) -> f64 {
        self.execution_time.as_secs_f64() * 1000.0
    }
}

/// First non-empty value among the display keys, truncated for labels.
pub fn display_name(props: &Properties) -> Option<String> {
    DISPLAY_KEYS.iter().find_map(|key| {
        let text = match props.get(*key)? {
            serde_json::Value::Null | serde_json::Value::Bool(false) => return None,
            serde_json::Value::String(s) if s.is_empty() => return None,
            serde_json::Value::Number(n) if n.as_f64() == Some(0.0) => return None,
            serde_json::Value::Array(a) if a.is_empty() => return None,
            serde_json::Value::Object(o) if o.is_empty() => return None,
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(truncate_display(&text))
    })
}

fn truncate_display(text: &str) -> String {
    if text.chars().count() > DISPLAY_MAX_CHARS {
        let head: String = text.chars().take(DISPLAY_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

pub fn node_display(labels: &[String], props: &Properties) -> String {
    match (labels.first(), display_name(props)) {
        (Some(label), Some(name)) => format!("({}: {})", label, name),
        (Some(label), None) => format!("({})", label),
        (None, _) => "(Node)".to_string(),
    }
}

pub fn relationship_display(rel_type: &str) -> String {
    if rel_type.is_empty() {
        "-[rel]->".to_string()
    } else {
        format!("-[:{}]->", rel_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: serde_json::Value) -> Properties {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_display_name_priority() {
        let p = props(json!({"id": 7, "title": "Matrix", "name": "Neo"}));
        assert_eq!(display_name(&p), Some("Neo".to_string()));
        let p = props(json!({"id": 7, "title": "Matrix"}));
        assert_eq!(display_name(&p), Some("Matrix".to_string()));
        let p = props(json!({"id": 7}));
        assert_eq!(display_name(&p), Some("7".to_string()));
        assert_eq!(display_name(&Properties::new()), None);
    }

    #[test]
    fn test_display_name_skips_empty_values() {
        let p = props(json!({"name": "", "title": null, "label": "L"}));
        assert_eq!(display_name(&p), Some("L".to_string()));
    }

    #[test]
    fn test_display_name_truncates() {
        let long = "x".repeat(60);
        let p = props(json!({ "name": long }));
        let shown = display_name(&p).unwrap();
        assert_eq!(shown.chars().count(), 53);
        assert!(shown.ends_with("..."));

        let exact = "y".repeat(50);
        let p = props(json!({ "name": exact.clone() }));
        assert_eq!(display_name(&p), Some(exact));
    }

    #[test]
    fn test_node_display() {
        let p = props(json!({"name": "Ann"}));
        assert_eq!(node_display(&["Person".to_string()], &p), "(Person: Ann)");
        assert_eq!(
            node_display(&["Person".to_string()], &Properties::new()),
            "(Person)"
        );
        assert_eq!(node_display(&[], &p), "(Node)");
    }

    #[test]
    fn test_relationship_display() {
        assert_eq!(relationship_display("KNOWS"), "-[:KNOWS]->");
        assert_eq!(relationship_display(""), "-[rel]->");
    }

    #[test]
    fn test_collector_dedup() {
        let mut graph = GraphCollector::new();
        let node = GraphNode {
            id: "1".into(),
            labels: vec!["Person".into()],
            properties: Properties::new(),
        };
        assert!(graph.insert_node(node.clone()));
        assert!(!graph.insert_node(node));
        assert_eq!(graph.node_count(), 1);
        assert!(!graph.contains_relationship("1"));
    }

    #[test]
    fn test_cell_display() {
        assert_eq!(CellValue::Null.display(), "NULL");
        assert_eq!(CellValue::Int(-100).display(), "-100");
        assert_eq!(CellValue::Bytes(vec![1, 2, 3]).display(), "[3 bytes]");
        let list = CellValue::List(vec![CellValue::Int(1), CellValue::Text("a".into())]);
        assert_eq!(list.display(), "[1, a]");
        let cell = CellValue::Graph(GraphRef::path("Path(length=2)".into()));
        assert_eq!(cell.display(), "Path(length=2)");
        assert_eq!(CellValue::Opaque("{bad".into()).display(), "{bad");
    }

    #[test]
    fn test_cell_from_json() {
        let cell = CellValue::from(&json!({"a": [1, 2.5, "x", null]}));
        let CellValue::Map(map) = cell else {
            panic!("expected map");
        };
        assert_eq!(
            map["a"],
            CellValue::List(vec![
                CellValue::Int(1),
                CellValue::Float(2.5),
                CellValue::Text("x".into()),
                CellValue::Null,
            ])
        );
    }

    #[test]
    fn test_assemble_counts_rows() {
        let rows = vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]];
        let result = QueryResult::assemble(
            vec!["n".into()],
            rows,
            GraphCollector::new(),
            Duration::from_millis(3),
        );
        assert_eq!(result.row_count, 2);
        assert!(!result.is_graph_compatible);
        assert!(!result.is_paths_only);
        assert!((result.execution_time_ms() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_result() {
        let r = QueryResult::empty(Duration::ZERO);
        assert!(r.columns.is_empty());
        assert!(r.rows.is_empty());
        assert_eq!(r.row_count, 0);
        assert!(!r.is_graph_compatible);
        assert!(!r.is_paths_only);
    }
}
